use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

pub type TargetId = u64;

/// Closed set of source kinds; each has its own fetch/extract handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Html,
    Feed,
    Api,
}

impl SourceKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "html" | "page" => Some(SourceKind::Html),
            "feed" | "rss" | "atom" => Some(SourceKind::Feed),
            "api" | "json" => Some(SourceKind::Api),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::Html => "html",
            SourceKind::Feed => "feed",
            SourceKind::Api => "api",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetStatus {
    /// Never fetched.
    Pending,
    Ok { http_status: u16 },
    Duplicate,
    Unparseable { reason: String },
    NetworkError { reason: String },
    HttpError { status: u16 },
    /// Permanent refusal: bad URL, robots.txt, oversized body.
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlTarget {
    pub id: TargetId,
    pub source_url: String,
    pub source_kind: SourceKind,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_fetched_at: Option<OffsetDateTime>,
    pub last_status: TargetStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub next_eligible_at: OffsetDateTime,
    pub consecutive_failures: u32,
    /// No automatic scheduling until re-enabled.
    pub disabled: bool,
    /// Held by a worker (the `Fetching` phase).
    pub claimed: bool,
    pub discover: bool,
    pub discovered_from: Option<TargetId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl CrawlTarget {
    pub fn new(
        id: TargetId,
        source_url: String,
        source_kind: SourceKind,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            source_url,
            source_kind,
            last_fetched_at: None,
            last_status: TargetStatus::Pending,
            next_eligible_at: now,
            consecutive_failures: 0,
            disabled: false,
            claimed: false,
            discover: false,
            discovered_from: None,
            created_at: now,
        }
    }

    pub fn is_eligible(&self, now: OffsetDateTime) -> bool {
        !self.disabled && !self.claimed && now >= self.next_eligible_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn eligibility() {
        let now = datetime!(2024-05-01 12:00 UTC);
        let mut t = CrawlTarget::new(1, "https://studygolang.com/".into(), SourceKind::Html, now);
        assert!(t.is_eligible(now));
        t.next_eligible_at = now + time::Duration::minutes(5);
        assert!(!t.is_eligible(now));
        t.next_eligible_at = now;
        t.claimed = true;
        assert!(!t.is_eligible(now));
        t.claimed = false;
        t.disabled = true;
        assert!(!t.is_eligible(now));
    }
}
