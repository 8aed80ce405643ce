pub mod config;
pub mod dedup;
pub mod dictionary;
pub mod document;
pub mod error;
pub mod index;
pub mod ready;
pub mod search;
pub mod segmenter;
pub mod store;
pub mod target;

pub use config::Config;
pub use dedup::{DedupOutcome, Deduplicator};
pub use dictionary::{Dictionary, DictionaryEntry, DictionarySource, Origin};
pub use document::{DocId, Document};
pub use error::{ConfigError, DictionaryError, IndexError, StoreError};
pub use index::{IndexOutcome, Indexer, Posting};
pub use ready::SegmenterGate;
pub use search::{SearchHit, SearchResults, SearchService};
pub use segmenter::{Segment, SegmentKind, Segmenter};
pub use store::{MetaFile, Store};
pub use target::{CrawlTarget, SourceKind, TargetId, TargetStatus};
