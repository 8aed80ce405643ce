use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use time::OffsetDateTime;
use unicode_normalization::UnicodeNormalization;

use crate::target::TargetId;

pub type DocId = u64;

/// A fetched and extracted page. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub canonical_url: String,
    pub title: String,
    pub body_text: String,
    pub content_hash: String,
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    pub source_target_id: TargetId,
}

impl Document {
    /// Build a document and compute its fingerprint.
    pub fn new(
        id: DocId,
        canonical_url: String,
        title: String,
        body_text: String,
        fetched_at: OffsetDateTime,
        published_at: Option<OffsetDateTime>,
        source_target_id: TargetId,
    ) -> Self {
        let content_hash = fingerprint(&body_text);
        Self {
            id,
            canonical_url,
            title,
            body_text,
            content_hash,
            fetched_at,
            published_at,
            source_target_id,
        }
    }

    /// Time used for recency ranking.
    pub fn effective_time(&self) -> OffsetDateTime {
        self.published_at.unwrap_or(self.fetched_at)
    }
}

/// SHA-1 over the body with whitespace removed, NFKC applied and case folded.
pub fn fingerprint(body: &str) -> String {
    let mut hasher = Sha1::new();
    let normalized: String =
        body.nfkc().filter(|c| !c.is_whitespace()).flat_map(char::to_lowercase).collect();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}
