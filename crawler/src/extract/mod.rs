//! Turn fetched payloads into candidate documents.

use lazy_static::lazy_static;
use regex::Regex;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};
use url::Url;

pub mod api;
pub mod feed;
pub mod html;

pub use api::extract_api;
pub use feed::extract_feed;
pub use html::extract_html;

lazy_static! {
    static ref TAG: Regex = Regex::new(r"(?s)<[^>]*>").expect("valid regex");
    static ref ENTITY: Regex =
        Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").expect("valid regex");
}

/// One document candidate, before it gets an id and a fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedDocument {
    pub canonical_url: String,
    pub title: String,
    pub body_text: String,
    pub published_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    pub documents: Vec<ExtractedDocument>,
    /// Same-host links found on the page, fragment-free and deduplicated.
    pub links: Vec<Url>,
}

/// Collapse runs of whitespace to one space and trim.
pub(crate) fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn without_fragment(url: &Url) -> Url {
    let mut u = url.clone();
    u.set_fragment(None);
    u
}

/// Resolve `href` against `base`, keeping only http(s) targets.
pub(crate) fn resolve(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let url = base.join(href).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| without_fragment(&url))
}

pub(crate) fn decode_entities(s: &str) -> String {
    ENTITY
        .replace_all(s, |caps: &regex::Captures| {
            let name = &caps[1];
            let hex = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X"));
            let decoded = if let Some(hex) = hex {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32).map(String::from)
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32).map(String::from)
            } else {
                match name {
                    "amp" => Some("&".into()),
                    "lt" => Some("<".into()),
                    "gt" => Some(">".into()),
                    "quot" => Some("\"".into()),
                    "apos" => Some("'".into()),
                    "nbsp" => Some(" ".into()),
                    _ => None,
                }
            };
            decoded.unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Plain text from a markup fragment: tags removed, entities decoded, whitespace collapsed.
pub(crate) fn strip_markup(s: &str) -> String {
    let decoded = decode_entities(s);
    let text = TAG.replace_all(&decoded, " ");
    collapse_whitespace(&decode_entities(&text))
}

/// RFC 3339, RFC 2822, `YYYY-MM-DD HH:MM:SS` (UTC) or a bare date.
pub(crate) fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(t) = OffsetDateTime::parse(s, &Rfc3339) {
        return Some(t);
    }
    if let Ok(t) = OffsetDateTime::parse(s, &Rfc2822) {
        return Some(t);
    }
    let spaced = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    if let Ok(t) = PrimitiveDateTime::parse(s, spaced) {
        return Some(t.assume_utc());
    }
    let date_part = s.get(..10).unwrap_or(s);
    Date::parse(date_part, format_description!("[year]-[month]-[day]"))
        .ok()
        .map(|d| d.midnight().assume_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn timestamps_in_common_formats() {
        assert_eq!(parse_timestamp("2024-03-01T08:00:00Z"), Some(datetime!(2024-03-01 8:00 UTC)));
        assert_eq!(
            parse_timestamp("Fri, 01 Mar 2024 08:00:00 +0000"),
            Some(datetime!(2024-03-01 8:00 UTC))
        );
        assert_eq!(parse_timestamp("2024-03-01 08:00:00"), Some(datetime!(2024-03-01 8:00 UTC)));
        assert_eq!(parse_timestamp("2024-03-01"), Some(datetime!(2024-03-01 0:00 UTC)));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn markup_and_entities() {
        assert_eq!(strip_markup("&lt;p&gt;Go &amp; Rust&lt;/p&gt;"), "Go & Rust");
        assert_eq!(strip_markup("<b>并发</b>\n\n编程&#x4E2D;"), "并发 编程中");
        assert_eq!(decode_entities("&unknown;"), "&unknown;");
    }

    #[test]
    fn resolve_drops_fragments_and_other_schemes() {
        let base = Url::parse("https://studygolang.com/topics/1").unwrap();
        let reply = resolve(&base, "/topics/2#reply").unwrap();
        assert_eq!(reply.as_str(), "https://studygolang.com/topics/2");
        assert!(resolve(&base, "mailto:a@b.c").is_none());
        assert!(resolve(&base, "javascript:void(0)").is_none());
    }
}
