//! Crawl side of the pipeline: fetch sources, extract documents, hand them
//! to the deduplicator and record per-target state.

pub mod error;
pub mod extract;
pub mod fetcher;
pub mod robots;
pub mod scheduler;
pub mod source;

pub use error::{Disposition, FetchError, ParseError};
pub use extract::{Extracted, ExtractedDocument};
pub use fetcher::{Fetcher, RawPayload, RetryPolicy};
pub use scheduler::{CrawlSummary, Outcome, Scheduler};
pub use source::{Source, SourceRegistry};
