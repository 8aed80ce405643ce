use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

use super::{
    collapse_whitespace, decode_entities, parse_timestamp, resolve, strip_markup, Extracted,
    ExtractedDocument,
};
use crate::error::ParseError;
use crate::fetcher::RawPayload;

const FIELDS: &[&str] = &[
    "title",
    "link",
    "guid",
    "id",
    "description",
    "content:encoded",
    "content",
    "summary",
    "pubDate",
    "dc:date",
    "published",
    "updated",
];

lazy_static! {
    static ref RSS_ITEM: Regex =
        Regex::new(r"(?is)<item(?:\s[^>]*)?>(.*?)</item\s*>").expect("valid regex");
    static ref ATOM_ENTRY: Regex =
        Regex::new(r"(?is)<entry(?:\s[^>]*)?>(.*?)</entry\s*>").expect("valid regex");
    static ref FEED_ROOT: Regex = Regex::new(r"(?i)<(rss|feed|rdf:RDF)[\s>]").expect("valid regex");
    static ref CDATA: Regex = Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("valid regex");
    static ref ATOM_LINK: Regex = Regex::new(r"(?is)<link\s([^>]*?)/?>").expect("valid regex");
    static ref HREF: Regex =
        Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#).expect("valid regex");
    static ref REL: Regex = Regex::new(r#"(?i)rel\s*=\s*["']([^"']+)["']"#).expect("valid regex");
    static ref FIELD: HashMap<&'static str, Regex> = FIELDS
        .iter()
        .map(|name| {
            let n = regex::escape(name);
            let pattern = format!(r"(?is)<{n}(?:\s[^>]*)?>(.*?)</{n}\s*>");
            (*name, Regex::new(&pattern).expect("valid regex"))
        })
        .collect();
}

/// Raw inner content of the first `<name>` element, CDATA unwrapped.
fn field(block: &str, name: &str) -> Option<String> {
    let inner = FIELD.get(name)?.captures(block)?.get(1)?.as_str();
    let unwrapped = CDATA.replace_all(inner, "$1");
    let s = unwrapped.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn first_field(block: &str, names: &[&str]) -> Option<String> {
    names.iter().find_map(|n| field(block, n))
}

/// Atom `<link href=...>`, preferring `rel="alternate"` or no rel.
fn atom_link(block: &str) -> Option<String> {
    let mut fallback = None;
    for caps in ATOM_LINK.captures_iter(block) {
        let attrs = &caps[1];
        let Some(href) = HREF.captures(attrs).map(|c| c[1].to_string()) else {
            continue;
        };
        match REL.captures(attrs).map(|c| c[1].to_ascii_lowercase()) {
            None => return Some(href),
            Some(rel) if rel == "alternate" => return Some(href),
            Some(_) => {
                fallback.get_or_insert(href);
            }
        }
    }
    fallback
}

fn record(block: &str, payload: &RawPayload) -> Option<ExtractedDocument> {
    let link = first_field(block, &["link"])
        .map(|l| decode_entities(&l))
        .or_else(|| atom_link(block))
        .or_else(|| first_field(block, &["guid", "id"]))?;
    let url = resolve(&payload.final_url, &decode_entities(&link))?;
    let title = first_field(block, &["title"]).map(|t| strip_markup(&t)).unwrap_or_default();
    let body = first_field(block, &["content:encoded", "content", "description", "summary"])
        .map(|b| strip_markup(&b))
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| title.clone());
    if body.is_empty() {
        return None;
    }
    let published_at = first_field(block, &["pubDate", "dc:date", "published", "updated"])
        .and_then(|d| parse_timestamp(&collapse_whitespace(&d)));
    Some(ExtractedDocument { canonical_url: url.to_string(), title, body_text: body, published_at })
}

/// RSS items or Atom entries, one document each.
pub fn extract_feed(payload: &RawPayload) -> Result<Extracted, ParseError> {
    let body = payload.body.trim();
    if body.is_empty() {
        return Err(ParseError::Empty);
    }
    if !FEED_ROOT.is_match(body) {
        return Err(ParseError::Malformed {
            kind: "feed",
            reason: "no <rss> or <feed> root".into(),
        });
    }
    let documents: Vec<ExtractedDocument> = RSS_ITEM
        .captures_iter(body)
        .chain(ATOM_ENTRY.captures_iter(body))
        .filter_map(|c| c.get(1))
        .filter_map(|m| record(m.as_str(), payload))
        .collect();
    if documents.is_empty() {
        return Err(ParseError::NoContent { url: payload.final_url.to_string() });
    }
    Ok(Extracted { documents, links: Vec::new() })
}
