use lazy_static::lazy_static;
use scraper::node::Element;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashSet;
use url::Url;

use super::{
    collapse_whitespace, parse_timestamp, resolve, without_fragment, Extracted, ExtractedDocument,
};
use crate::error::ParseError;
use crate::fetcher::RawPayload;

lazy_static! {
    static ref SEL_TITLE: Selector = Selector::parse("title").expect("valid selector");
    static ref SEL_H1: Selector = Selector::parse("h1").expect("valid selector");
    static ref SEL_BODY: Selector = Selector::parse("body").expect("valid selector");
    static ref SEL_A: Selector = Selector::parse("a[href]").expect("valid selector");
    static ref SEL_CANONICAL: Selector =
        Selector::parse(r#"link[rel~="canonical"][href]"#).expect("valid selector");
    static ref SEL_OG_URL: Selector =
        Selector::parse(r#"meta[property="og:url"][content]"#).expect("valid selector");
    static ref SEL_OG_TITLE: Selector =
        Selector::parse(r#"meta[property="og:title"][content]"#).expect("valid selector");
    static ref SEL_PUBLISHED: Selector =
        Selector::parse(r#"meta[property="article:published_time"][content]"#)
            .expect("valid selector");
    static ref SEL_TIME: Selector = Selector::parse("time[datetime]").expect("valid selector");
}

/// Elements dropped with everything inside them.
const BOILERPLATE_TAGS: &[&str] = &[
    "nav", "header", "footer", "aside", "script", "style", "noscript", "form", "iframe", "svg",
    "template", "button", "select", "head",
];

/// class/id tokens that mark navigation or page chrome.
const BOILERPLATE_MARKERS: &[&str] = &[
    "nav", "menu", "sidebar", "footer", "comment", "breadcrumb", "banner", "advert", "share",
    "related", "cookie",
];

/// Containers whose text forms a block of its own.
const BLOCK_TAGS: &[&str] = &[
    "body", "div", "section", "article", "main", "table", "tbody", "thead", "tr", "td", "th", "ul",
    "ol", "li", "dl", "blockquote", "figure",
];

/// Inline-flow elements that still separate words.
const BREAK_TAGS: &[&str] =
    &["p", "br", "h1", "h2", "h3", "h4", "h5", "h6", "pre", "dt", "dd", "figcaption", "hr"];

fn is_boilerplate(el: &Element) -> bool {
    if BOILERPLATE_TAGS.contains(&el.name()) {
        return true;
    }
    let marks = |value: &str| {
        value
            .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
            .filter(|t| !t.is_empty())
            .any(|t| {
                let t = t.to_ascii_lowercase();
                BOILERPLATE_MARKERS.iter().any(|m| t.starts_with(m))
            })
    };
    el.attr("class").is_some_and(marks) || el.id().is_some_and(marks)
}

fn text_of(el: ElementRef) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

fn first_attr(doc: &Html, sel: &Selector, attr: &str) -> Option<String> {
    doc.select(sel)
        .filter_map(|e| e.value().attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// One pending unit of the content walk. `usize` is the index of the open
/// block that receives the text.
enum Step<'a> {
    Enter(ElementRef<'a>, usize),
    Text(&'a str, usize),
    Space(usize),
    Close(usize),
}

/// Split the subtree under `root` into text blocks. Text flows into the
/// innermost enclosing block container; boilerplate subtrees are skipped.
/// The walk keeps its own stack, so nesting depth is bounded by memory only.
fn collect_blocks(root: ElementRef) -> Vec<String> {
    let mut open: Vec<String> = vec![String::new()];
    let mut blocks = Vec::new();
    let mut stack = vec![Step::Close(0), Step::Enter(root, 0)];
    while let Some(step) = stack.pop() {
        match step {
            Step::Text(t, b) => open[b].push_str(t),
            Step::Space(b) => open[b].push(' '),
            Step::Close(b) => {
                let text = collapse_whitespace(&std::mem::take(&mut open[b]));
                if !text.is_empty() {
                    blocks.push(text);
                }
            }
            Step::Enter(el, b) => {
                let first = stack.len();
                for child in el.children() {
                    match child.value() {
                        Node::Text(t) => stack.push(Step::Text(t, b)),
                        Node::Element(e) if !is_boilerplate(e) => {
                            let Some(child_el) = ElementRef::wrap(child) else {
                                continue;
                            };
                            let name = e.name();
                            if BLOCK_TAGS.contains(&name) {
                                open.push(String::new());
                                let inner = open.len() - 1;
                                stack.extend([
                                    Step::Space(b),
                                    Step::Enter(child_el, inner),
                                    Step::Close(inner),
                                ]);
                            } else if BREAK_TAGS.contains(&name) {
                                stack.extend([
                                    Step::Space(b),
                                    Step::Enter(child_el, b),
                                    Step::Space(b),
                                ]);
                            } else {
                                stack.push(Step::Enter(child_el, b));
                            }
                        }
                        _ => {}
                    }
                }
                // Children were pushed in document order; pop them the same way.
                stack[first..].reverse();
            }
        }
    }
    blocks
}

/// The largest contiguous text block outside boilerplate regions.
pub fn main_text(doc: &Html) -> Option<String> {
    let root = doc.select(&SEL_BODY).next().unwrap_or_else(|| doc.root_element());
    collect_blocks(root).into_iter().max_by_key(|b| b.chars().count())
}

fn same_host(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

pub fn extract_html(payload: &RawPayload) -> Result<Extracted, ParseError> {
    if payload.body.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    let doc = Html::parse_document(&payload.body);
    let base = &payload.final_url;

    let canonical = first_attr(&doc, &SEL_CANONICAL, "href")
        .and_then(|h| resolve(base, &h))
        .or_else(|| first_attr(&doc, &SEL_OG_URL, "content").and_then(|h| resolve(base, &h)))
        .unwrap_or_else(|| without_fragment(base));

    let title = doc
        .select(&SEL_TITLE)
        .next()
        .map(text_of)
        .filter(|t| !t.is_empty())
        .or_else(|| first_attr(&doc, &SEL_OG_TITLE, "content"))
        .or_else(|| doc.select(&SEL_H1).map(text_of).find(|t| !t.is_empty()))
        .unwrap_or_default();

    let published_at = first_attr(&doc, &SEL_PUBLISHED, "content")
        .and_then(|s| parse_timestamp(&s))
        .or_else(|| {
            doc.select(&SEL_TIME)
                .filter_map(|e| e.value().attr("datetime"))
                .find_map(parse_timestamp)
        });

    let body_text =
        main_text(&doc).ok_or_else(|| ParseError::NoContent { url: base.to_string() })?;

    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(canonical.to_string());
    seen.insert(without_fragment(base).to_string());
    let links = doc
        .select(&SEL_A)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|h| resolve(base, h))
        .filter(|u| same_host(u, base))
        .filter(|u| seen.insert(u.to_string()))
        .collect();

    Ok(Extracted {
        documents: vec![ExtractedDocument {
            canonical_url: canonical.to_string(),
            title,
            body_text,
            published_at,
        }],
        links,
    })
}
