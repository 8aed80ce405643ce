//! Read path: query segmentation, posting merge and ranking.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use time::OffsetDateTime;

use crate::config::{QueryMode, SearchConfig};
use crate::document::{DocId, Document};
use crate::error::StoreError;
use crate::index::Posting;
use crate::segmenter::{SegmentKind, Segmenter};
use crate::store::Store;

#[derive(Debug, Serialize)]
pub struct SearchResults {
    pub query: String,
    pub took_s: f64,
    pub total_hits: usize,
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub score: f32,
    pub title: String,
    pub url: String,
    pub snippet: Option<String>,
}

#[derive(Clone)]
pub struct SearchService {
    store: Store,
    segmenter: Arc<Segmenter>,
    config: SearchConfig,
}

fn tf_weight(tf: u32) -> f32 {
    if tf > 0 { 1.0 + (tf as f32).ln() } else { 0.0 }
}

impl SearchService {
    pub fn new(store: Store, segmenter: Arc<Segmenter>, config: SearchConfig) -> Self {
        Self { store, segmenter, config }
    }

    /// Lookup by id for detail pages.
    pub fn document(&self, id: DocId) -> Result<Option<Document>, StoreError> {
        self.store.document(id)
    }

    pub fn query(&self, text: &str, limit: usize) -> Result<SearchResults, StoreError> {
        self.query_at(text, limit, OffsetDateTime::now_utc())
    }

    /// Query with an explicit clock for recency scoring.
    pub fn query_at(
        &self,
        text: &str,
        limit: usize,
        now: OffsetDateTime,
    ) -> Result<SearchResults, StoreError> {
        let start = std::time::Instant::now();
        let terms: BTreeSet<String> =
            self.segmenter.terms(text).into_iter().map(|(t, _)| t).collect();
        if terms.is_empty() {
            return Ok(SearchResults {
                query: text.to_string(),
                took_s: start.elapsed().as_secs_f64(),
                total_hits: 0,
                hits: vec![],
            });
        }

        // Readers see either all or none of a document's postings.
        let (lists, num_docs) = {
            let _guard = self.store.index_lock().read();
            let mut lists: Vec<Vec<Posting>> = Vec::with_capacity(terms.len());
            for term in &terms {
                lists.push(self.store.postings(term)?);
            }
            (lists, self.store.indexed_count().max(1))
        };

        let n = num_docs as f32;
        let mut scores: HashMap<DocId, (f32, usize)> = HashMap::new();
        for list in &lists {
            if list.is_empty() {
                continue;
            }
            let idf = (1.0 + n / list.len() as f32).ln();
            for p in list {
                let w = tf_weight(p.body_frequency())
                    + self.config.title_boost * tf_weight(p.title_frequency);
                let e = scores.entry(p.doc_id).or_insert((0.0, 0));
                e.0 += w * idf;
                e.1 += 1;
            }
        }
        if self.config.mode == QueryMode::All {
            scores.retain(|_, (_, matched)| *matched == terms.len());
        }

        let mut scored: Vec<(DocId, f32, Document)> = Vec::with_capacity(scores.len());
        for (doc_id, (score, _)) in scores {
            if let Some(doc) = self.store.document(doc_id)? {
                let score = score * self.recency_factor(&doc, now);
                scored.push((doc_id, score, doc));
            }
        }
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(b.0.cmp(&a.0)));
        let total_hits = scored.len();

        let k = limit.clamp(1, 100);
        let highlight: Vec<&str> = self
            .segmenter
            .segment(text)
            .into_iter()
            .filter(|s| s.kind != SegmentKind::Separator)
            .map(|s| s.text)
            .collect();
        let hits = scored
            .into_iter()
            .take(k)
            .map(|(doc_id, score, doc)| SearchHit {
                doc_id,
                score,
                snippet: snippet(&doc.body_text, &highlight, self.config.snippet_chars),
                title: doc.title,
                url: doc.canonical_url,
            })
            .collect();

        Ok(SearchResults {
            query: text.to_string(),
            took_s: start.elapsed().as_secs_f64(),
            total_hits,
            hits,
        })
    }

    fn recency_factor(&self, doc: &Document, now: OffsetDateTime) -> f32 {
        let age_days = ((now - doc.effective_time()).as_seconds_f32() / 86_400.0).max(0.0);
        let decay = 0.5f32.powf(age_days / self.config.recency_half_life_days);
        1.0 + self.config.recency_weight * decay
    }
}

/// Window of `width` chars around the first match of any term, with matches
/// wrapped in `<em>`. Falls back to the leading `width` chars.
pub fn snippet(text: &str, terms: &[&str], width: usize) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    let lower = text.to_lowercase();
    // Lower-casing can change byte lengths; only use positions when it did not.
    let first = if lower.len() == text.len() {
        terms
            .iter()
            .filter(|t| !t.trim().is_empty())
            .filter_map(|t| lower.find(&t.to_lowercase()))
            .min()
    } else {
        None
    };
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let center = first.map(|b| chars.partition_point(|&(i, _)| i < b)).unwrap_or(0);
    let start = center.saturating_sub(width / 3);
    let end = (start + width).min(chars.len());
    let from = chars[start].0;
    let to = if end < chars.len() { chars[end].0 } else { text.len() };
    Some(highlight_terms(&text[from..to], terms))
}

fn highlight_terms(snippet: &str, terms: &[&str]) -> String {
    let mut s = snippet.to_string();
    let mut sorted: Vec<&str> = terms.iter().copied().filter(|t| !t.trim().is_empty()).collect();
    sorted.sort_by_key(|t| std::cmp::Reverse(t.len()));
    sorted.dedup();
    if sorted.is_empty() {
        return s;
    }
    let alternation = sorted.iter().map(|t| regex::escape(t)).collect::<Vec<_>>().join("|");
    if let Ok(pat) = regex::RegexBuilder::new(&alternation).case_insensitive(true).build() {
        s = pat
            .replace_all(&s, |caps: &regex::Captures| format!("<em>{}</em>", &caps[0]))
            .to_string();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_centers_on_match_and_highlights() {
        let text = "前言 ".repeat(50) + "研究生 的 生活";
        let s = snippet(&text, &["研究生"], 30).unwrap();
        assert!(s.contains("<em>研究生</em>"));
        assert!(s.chars().count() <= 30 + "<em></em>".len());
    }

    #[test]
    fn snippet_without_match_uses_prefix() {
        let s = snippet("Go is fun", &["rust"], 5).unwrap();
        assert_eq!(s, "Go is");
        assert!(snippet("", &["rust"], 5).is_none());
    }

    #[test]
    fn highlight_is_case_insensitive() {
        assert_eq!(highlight_terms("Rust and rust", &["rust"]), "<em>Rust</em> and <em>rust</em>");
    }
}
