//! Crawl runs: claim eligible targets, fetch and extract them on a bounded
//! worker pool, and record per-target outcomes.
//!
//! A target moves `Eligible → Fetching → {Succeeded, Failed, Skipped}` and
//! becomes eligible again after its cooldown. Transient failures back off
//! exponentially; permanent failures, or too many transient ones in a row,
//! disable the target until it is re-enabled by hand.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinSet;
use url::Url;

use lexi_core::config::CrawlerConfig;
use lexi_core::dedup::{DedupOutcome, Deduplicator};
use lexi_core::document::Document;
use lexi_core::error::StoreError;
use lexi_core::index::Indexer;
use lexi_core::store::Store;
use lexi_core::target::{CrawlTarget, SourceKind, TargetStatus};

use crate::error::{Disposition, FetchError};
use crate::fetcher::Fetcher;
use crate::source::SourceRegistry;

/// Result of one fetch cycle for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// At least one new document was accepted.
    Succeeded { http_status: u16 },
    /// Every extracted document was already known.
    Duplicate,
    Unparseable { reason: String },
    Failed { status: TargetStatus, permanent: bool },
}

impl Outcome {
    pub fn from_fetch_error(e: &FetchError) -> Self {
        let permanent = e.disposition() == Disposition::Reject;
        let status = match e {
            FetchError::Http { status, .. } => TargetStatus::HttpError { status: *status },
            FetchError::InvalidUrl { .. }
            | FetchError::Disallowed { .. }
            | FetchError::TooLarge { .. } => TargetStatus::Rejected { reason: e.to_string() },
            FetchError::Timeout { .. }
            | FetchError::Connection { .. }
            | FetchError::Body { .. } => TargetStatus::NetworkError { reason: e.to_string() },
        };
        Outcome::Failed { status, permanent }
    }
}

/// Cooldown after the `failures`-th consecutive transient failure.
pub fn backoff(config: &CrawlerConfig, failures: u32) -> Duration {
    let base = Duration::from_secs(config.backoff_base_secs);
    let max = Duration::from_secs(config.backoff_max_secs);
    let factor = 1u32.checked_shl(failures.saturating_sub(1)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}

/// Apply an outcome to the target record. Returns true if this disabled the target.
pub fn apply_outcome(
    target: &mut CrawlTarget,
    outcome: &Outcome,
    now: OffsetDateTime,
    config: &CrawlerConfig,
) -> bool {
    target.claimed = false;
    let status = match outcome {
        Outcome::Succeeded { http_status } => TargetStatus::Ok { http_status: *http_status },
        Outcome::Duplicate => TargetStatus::Duplicate,
        Outcome::Unparseable { reason } => TargetStatus::Unparseable { reason: reason.clone() },
        Outcome::Failed { status, permanent } => {
            target.last_status = status.clone();
            target.consecutive_failures += 1;
            target.next_eligible_at = now + backoff(config, target.consecutive_failures);
            let disable =
                *permanent || target.consecutive_failures >= config.max_consecutive_failures;
            let newly = disable && !target.disabled;
            target.disabled |= disable;
            return newly;
        }
    };
    target.last_status = status;
    target.consecutive_failures = 0;
    target.next_eligible_at = now + config.revisit_interval();
    false
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    pub claimed: usize,
    pub fetched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duplicate: usize,
    pub unparseable: usize,
    pub disabled: usize,
    /// New documents stored.
    pub accepted: usize,
    /// Documents indexed inline.
    pub indexed: usize,
    /// Targets registered from links.
    pub discovered: usize,
}

struct Report {
    target: CrawlTarget,
    outcome: Outcome,
    fetched: bool,
    disabled: bool,
    accepted: usize,
    indexed: usize,
    links: Vec<Url>,
}

#[derive(Clone)]
pub struct Scheduler {
    store: Store,
    fetcher: Arc<Fetcher>,
    sources: SourceRegistry,
    dedup: Deduplicator,
    indexer: Option<Indexer>,
    config: CrawlerConfig,
}

impl Scheduler {
    /// `indexer` is used only when `index_on_accept` is set.
    pub fn new(
        store: Store,
        config: &CrawlerConfig,
        sources: SourceRegistry,
        indexer: Option<Indexer>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            dedup: Deduplicator::new(store.clone()),
            fetcher: Arc::new(Fetcher::new(config)?),
            indexer: indexer.filter(|_| config.index_on_accept),
            store,
            sources,
            config: config.clone(),
        })
    }

    /// One crawl pass over the targets eligible now. Stops claiming when
    /// `shutdown` turns true, waits for in-flight targets and flushes the store.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<CrawlSummary, StoreError> {
        let released = self.store.release_claims()?;
        if released > 0 {
            tracing::info!(released, "released stale claims");
        }
        let start = OffsetDateTime::now_utc();
        let candidates = self.store.eligible_targets(start)?;
        tracing::info!(
            eligible = candidates.len(),
            workers = self.config.workers,
            "crawl run starting"
        );

        let workers = self.config.workers.max(1);
        let mut summary = CrawlSummary::default();
        let mut failure: Option<StoreError> = None;
        let mut tasks: JoinSet<Result<Report, StoreError>> = JoinSet::new();

        for candidate in candidates {
            if *shutdown.borrow() {
                tracing::info!("shutdown requested; no new claims");
                break;
            }
            if failure.is_some() {
                break;
            }
            while tasks.len() >= workers {
                if let Some(joined) = tasks.join_next().await {
                    self.absorb(joined, &mut summary, &mut failure);
                }
            }
            let Some(target) = self.store.claim_target(candidate.id, start)? else {
                continue;
            };
            summary.claimed += 1;
            let worker = self.clone();
            tasks.spawn(async move { worker.process(target).await });
        }
        while let Some(joined) = tasks.join_next().await {
            self.absorb(joined, &mut summary, &mut failure);
        }

        self.store.flush()?;
        if let Some(e) = failure {
            return Err(e);
        }
        tracing::info!(
            claimed = summary.claimed,
            fetched = summary.fetched,
            succeeded = summary.succeeded,
            failed = summary.failed,
            duplicate = summary.duplicate,
            unparseable = summary.unparseable,
            disabled = summary.disabled,
            accepted = summary.accepted,
            indexed = summary.indexed,
            discovered = summary.discovered,
            "crawl run complete"
        );
        Ok(summary)
    }

    fn absorb(
        &self,
        joined: Result<Result<Report, StoreError>, tokio::task::JoinError>,
        summary: &mut CrawlSummary,
        failure: &mut Option<StoreError>,
    ) {
        let report = match joined {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "store failure during crawl; stopping run");
                failure.get_or_insert(e);
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "crawl worker panicked");
                return;
            }
        };
        summary.fetched += usize::from(report.fetched);
        summary.accepted += report.accepted;
        summary.indexed += report.indexed;
        summary.disabled += usize::from(report.disabled);
        match report.outcome {
            Outcome::Succeeded { .. } => summary.succeeded += 1,
            Outcome::Duplicate => summary.duplicate += 1,
            Outcome::Unparseable { .. } => summary.unparseable += 1,
            Outcome::Failed { .. } => summary.failed += 1,
        }
        if failure.is_none() {
            if let Err(e) = self.register_links(&report.target, &report.links, summary) {
                failure.get_or_insert(e);
            }
        }
    }

    fn register_links(
        &self,
        from: &CrawlTarget,
        links: &[Url],
        summary: &mut CrawlSummary,
    ) -> Result<(), StoreError> {
        let now = OffsetDateTime::now_utc();
        for link in links {
            if summary.discovered >= self.config.max_discovered_per_run {
                break;
            }
            let (_, created) = self.store.register_target(
                link.as_str(),
                SourceKind::Html,
                true,
                Some(from.id),
                now,
            )?;
            if created {
                summary.discovered += 1;
                tracing::debug!(url = %link, from = from.id, "discovered target");
            }
        }
        Ok(())
    }

    async fn process(&self, mut target: CrawlTarget) -> Result<Report, StoreError> {
        let mut report_fetched = false;
        let mut accepted = 0;
        let mut indexed = 0;
        let mut links = Vec::new();

        let outcome = match self.sources.get(target.source_kind) {
            None => {
                let reason = format!("no handler for {} sources", target.source_kind);
                Outcome::Failed { status: TargetStatus::Rejected { reason }, permanent: true }
            }
            Some(source) => match source.fetch(&self.fetcher, &mut target).await {
                Err(e) => {
                    tracing::warn!(
                        target_id = target.id,
                        url = %target.source_url,
                        error = %e,
                        "fetch failed"
                    );
                    Outcome::from_fetch_error(&e)
                }
                Ok(payload) => {
                    report_fetched = true;
                    match source.extract(&payload) {
                        Err(e) => {
                            tracing::warn!(
                                target_id = target.id,
                                url = %target.source_url,
                                error = %e,
                                "unparseable payload"
                            );
                            Outcome::Unparseable { reason: e.to_string() }
                        }
                        Ok(extracted) => {
                            for item in extracted.documents {
                                let doc = Document::new(
                                    self.store.generate_id()?,
                                    item.canonical_url,
                                    item.title,
                                    item.body_text,
                                    payload.fetched_at,
                                    item.published_at,
                                    target.id,
                                );
                                if self.dedup.check_and_record(&doc)? == DedupOutcome::Accepted {
                                    accepted += 1;
                                    if let Some(indexer) = &self.indexer {
                                        match indexer.index_document(&doc) {
                                            Ok(_) => indexed += 1,
                                            Err(e) => tracing::warn!(
                                                doc_id = doc.id,
                                                error = %e,
                                                "inline indexing failed; left pending"
                                            ),
                                        }
                                    }
                                }
                            }
                            if target.discover {
                                links = extracted.links;
                            }
                            if accepted > 0 {
                                Outcome::Succeeded { http_status: payload.status }
                            } else {
                                Outcome::Duplicate
                            }
                        }
                    }
                }
            },
        };

        let now = OffsetDateTime::now_utc();
        let disabled = apply_outcome(&mut target, &outcome, now, &self.config);
        if disabled {
            tracing::warn!(
                target_id = target.id,
                url = %target.source_url,
                failures = target.consecutive_failures,
                "target disabled"
            );
        }
        self.store.save_target(&target)?;
        tracing::debug!(
            target_id = target.id,
            status = ?target.last_status,
            accepted,
            "target processed"
        );
        Ok(Report { target, outcome, fetched: report_fetched, disabled, accepted, indexed, links })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn config() -> CrawlerConfig {
        CrawlerConfig {
            backoff_base_secs: 60,
            backoff_max_secs: 600,
            max_consecutive_failures: 5,
            ..Default::default()
        }
    }

    fn target() -> CrawlTarget {
        let created = datetime!(2024-05-01 0:00 UTC);
        CrawlTarget::new(1, "https://studygolang.com/".into(), SourceKind::Html, created)
    }

    fn transient() -> Outcome {
        let status = TargetStatus::NetworkError { reason: "reset".into() };
        Outcome::Failed { status, permanent: false }
    }

    #[test]
    fn backoff_is_monotonic_and_capped() {
        let c = config();
        let delays: Vec<u64> = (1..=8).map(|n| backoff(&c, n).as_secs()).collect();
        assert_eq!(delays, vec![60, 120, 240, 480, 600, 600, 600, 600]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(backoff(&c, 200), Duration::from_secs(600));
    }

    #[test]
    fn transient_failures_disable_at_bound() {
        let c = config();
        let now = datetime!(2024-05-01 12:00 UTC);
        let mut t = target();
        for n in 1..5 {
            assert!(!apply_outcome(&mut t, &transient(), now, &c));
            assert_eq!(t.consecutive_failures, n);
            assert!(!t.disabled);
        }
        assert!(apply_outcome(&mut t, &transient(), now, &c));
        assert!(t.disabled);
        assert_eq!(t.next_eligible_at, now + Duration::from_secs(600));
    }

    #[test]
    fn permanent_failure_disables_immediately() {
        let mut t = target();
        let e = FetchError::Http { url: t.source_url.clone(), status: 404 };
        let now = datetime!(2024-05-01 12:00 UTC);
        assert!(apply_outcome(&mut t, &Outcome::from_fetch_error(&e), now, &config()));
        assert!(t.disabled);
        assert_eq!(t.last_status, TargetStatus::HttpError { status: 404 });
    }

    #[test]
    fn success_resets_failures_and_schedules_revisit() {
        let c = config();
        let now = datetime!(2024-05-01 12:00 UTC);
        let mut t = target();
        apply_outcome(&mut t, &transient(), now, &c);
        apply_outcome(&mut t, &Outcome::Duplicate, now, &c);
        assert_eq!(t.consecutive_failures, 0);
        assert_eq!(t.last_status, TargetStatus::Duplicate);
        assert_eq!(t.next_eligible_at, now + c.revisit_interval());
    }
}
