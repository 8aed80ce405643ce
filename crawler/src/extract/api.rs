use serde_json::Value;

use super::{parse_timestamp, resolve, strip_markup, Extracted, ExtractedDocument};
use crate::error::ParseError;
use crate::fetcher::RawPayload;

const LIST_KEYS: &[&str] = &["items", "data", "results"];
const URL_KEYS: &[&str] = &["url", "link"];
const BODY_KEYS: &[&str] = &["body", "content", "text", "summary"];
const DATE_KEYS: &[&str] = &["published_at", "date", "published"];

fn string_field<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| item.get(*k))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn record(item: &Value, payload: &RawPayload) -> Option<ExtractedDocument> {
    let url = resolve(&payload.final_url, string_field(item, URL_KEYS)?)?;
    let title = string_field(item, &["title"]).map(strip_markup).unwrap_or_default();
    let body_text = string_field(item, BODY_KEYS)
        .map(strip_markup)
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| title.clone());
    if body_text.is_empty() {
        return None;
    }
    let published_at = string_field(item, DATE_KEYS).and_then(parse_timestamp);
    Some(ExtractedDocument { canonical_url: url.to_string(), title, body_text, published_at })
}

/// JSON listing: a top-level array, or an object holding one under `items`, `data` or `results`.
pub fn extract_api(payload: &RawPayload) -> Result<Extracted, ParseError> {
    if payload.body.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    let json: Value = serde_json::from_str(&payload.body)
        .map_err(|e| ParseError::Malformed { kind: "api", reason: e.to_string() })?;
    let malformed = |reason: &str| ParseError::Malformed { kind: "api", reason: reason.into() };
    let items = match &json {
        Value::Array(arr) => arr,
        Value::Object(obj) => LIST_KEYS
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_array))
            .ok_or_else(|| malformed("no items/data/results array"))?,
        _ => return Err(malformed("expected an array or object")),
    };
    let documents: Vec<ExtractedDocument> =
        items.iter().filter_map(|i| record(i, payload)).collect();
    if documents.is_empty() {
        return Err(ParseError::NoContent { url: payload.final_url.to_string() });
    }
    Ok(Extracted { documents, links: Vec::new() })
}
