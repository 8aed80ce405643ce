//! Batch indexing runs over the store: drain the crawl handoff queue, rebuild
//! from scratch, or import JSON/JSONL document dumps.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::watch;
use walkdir::WalkDir;

use lexi_core::dedup::{DedupOutcome, Deduplicator};
use lexi_core::document::{DocId, Document};
use lexi_core::error::{IndexError, StoreError};
use lexi_core::index::{IndexOutcome, Indexer};
use lexi_core::store::MetaFile;

const META_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no .json or .jsonl input under {0:?}")]
    NoInput(PathBuf),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// One record of an import file.
#[derive(Debug, Deserialize)]
struct InputDoc {
    id: String,
    #[serde(default)]
    title: String,
    body: String,
    url: Option<String>,
    timestamp: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub processed: usize,
    pub indexed: usize,
    pub superseded: usize,
    pub failed: usize,
    /// Imported documents accepted by the deduplicator.
    pub imported: usize,
    /// Imported documents rejected as duplicate content.
    pub duplicate: usize,
    /// Import records skipped because they were not valid documents.
    pub malformed: usize,
}

pub struct IndexRun {
    indexer: Indexer,
    dedup: Deduplicator,
}

impl IndexRun {
    pub fn new(indexer: Indexer) -> Self {
        let dedup = Deduplicator::new(indexer.store().clone());
        Self { indexer, dedup }
    }

    /// Index every queued document. Documents queued while the run is going
    /// are picked up too; the run ends when the queue is empty or `shutdown` is set.
    pub fn run_pending(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<IndexSummary, IndexError> {
        let store = self.indexer.store();
        let mut summary = IndexSummary::default();
        let mut failed: HashSet<DocId> = HashSet::new();
        'drain: loop {
            let batch: Vec<DocId> =
                store.pending_ids()?.into_iter().filter(|id| !failed.contains(id)).collect();
            if batch.is_empty() {
                break;
            }
            for id in batch {
                if *shutdown.borrow() {
                    tracing::info!(
                        remaining = store.pending_ids()?.len(),
                        "shutdown requested; stopping index run"
                    );
                    break 'drain;
                }
                summary.processed += 1;
                match self.indexer.index_by_id(id) {
                    Ok(IndexOutcome::Indexed { .. }) => summary.indexed += 1,
                    Ok(IndexOutcome::Superseded { .. }) => summary.superseded += 1,
                    Err(e) => {
                        tracing::warn!(
                            doc_id = id,
                            error = %e,
                            "indexing failed; document stays queued"
                        );
                        summary.failed += 1;
                        failed.insert(id);
                    }
                }
            }
        }
        self.finish()?;
        tracing::info!(
            processed = summary.processed,
            indexed = summary.indexed,
            superseded = summary.superseded,
            failed = summary.failed,
            "index run complete"
        );
        Ok(summary)
    }

    /// Rebuild the whole index from stored documents.
    pub fn run_full(&self) -> Result<IndexSummary, IndexError> {
        let r = self.indexer.reindex_all()?;
        self.finish()?;
        Ok(IndexSummary {
            processed: r.processed,
            indexed: r.indexed,
            superseded: r.superseded,
            failed: r.failed,
            ..Default::default()
        })
    }

    /// Import a `.json`/`.jsonl` file, or every such file under a directory,
    /// through the deduplicator, then index what was accepted.
    ///
    /// Records that are not valid documents are logged and skipped. Only I/O
    /// and store failures end the import.
    pub fn import(
        &self,
        input: &Path,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<IndexSummary, ImportError> {
        let files = input_files(input);
        if files.is_empty() {
            return Err(ImportError::NoInput(input.to_path_buf()));
        }
        let mut imported = 0;
        let mut duplicate = 0;
        let mut malformed = 0;
        for file in &files {
            let read = read_docs(file)?;
            malformed += read.malformed;
            for doc in read.docs {
                match self.store_input(doc)? {
                    DedupOutcome::Accepted => imported += 1,
                    DedupOutcome::Duplicate { .. } => duplicate += 1,
                }
            }
            tracing::debug!(file = %file.display(), malformed = read.malformed, "import file read");
        }
        tracing::info!(files = files.len(), imported, duplicate, malformed, "import complete");
        let summary = self.run_pending(shutdown)?;
        Ok(IndexSummary { imported, duplicate, malformed, ..summary })
    }

    fn store_input(&self, input: InputDoc) -> Result<DedupOutcome, StoreError> {
        let store = self.indexer.store();
        let now = OffsetDateTime::now_utc();
        let published_at =
            input.timestamp.as_deref().and_then(|t| OffsetDateTime::parse(t, &Rfc3339).ok());
        let url = input
            .url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| format!("urn:lexi:import:{}", input.id));
        let id = store.generate_id()?;
        let doc = Document::new(id, url, input.title, input.body, now, published_at, 0);
        self.dedup.check_and_record(&doc)
    }

    fn finish(&self) -> Result<(), StoreError> {
        let store = self.indexer.store();
        let meta = MetaFile {
            indexed_docs: store.indexed_count() as u64,
            updated_at: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
            version: META_VERSION,
        };
        store.save_meta(&meta)?;
        store.flush()?;
        Ok(())
    }
}

fn input_files(input: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            let ext = p.extension().and_then(|s| s.to_str());
            if p.is_file() && matches!(ext, Some("json" | "jsonl")) {
                files.push(p.to_path_buf());
            }
        }
        files.sort();
    } else if input.is_file() {
        files.push(input.to_path_buf());
    }
    files
}

/// Documents read from one import file.
#[derive(Default)]
struct ReadDocs {
    docs: Vec<InputDoc>,
    malformed: usize,
}

impl ReadDocs {
    fn push(&mut self, file: &Path, line: usize, parsed: Result<InputDoc, serde_json::Error>) {
        match parsed {
            Ok(doc) => self.docs.push(doc),
            Err(e) => {
                tracing::warn!(
                    file = %file.display(),
                    line,
                    error = %e,
                    "skipping malformed record"
                );
                self.malformed += 1;
            }
        }
    }
}

fn read_docs(file: &Path) -> Result<ReadDocs, ImportError> {
    let io = |source| ImportError::Io { path: file.to_path_buf(), source };
    let reader = BufReader::new(File::open(file).map_err(io)?);
    let mut out = ReadDocs::default();

    if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
        for (n, line) in reader.lines().enumerate() {
            let line = line.map_err(io)?;
            if line.trim().is_empty() {
                continue;
            }
            out.push(file, n + 1, serde_json::from_str(&line));
        }
        return Ok(out);
    }

    // Whole-document JSON: a record's position is its array index.
    match serde_json::from_reader::<_, serde_json::Value>(reader) {
        Ok(serde_json::Value::Array(arr)) => {
            for (i, v) in arr.into_iter().enumerate() {
                out.push(file, i, serde_json::from_value(v));
            }
        }
        Ok(v) => out.push(file, 0, serde_json::from_value(v)),
        Err(e) if e.is_io() => {
            return Err(io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)));
        }
        Err(e) => out.push(file, 0, Err(e)),
    }
    Ok(out)
}
