//! Durable state in one sled database.
//!
//! | tree           | key                | value                  |
//! |----------------|--------------------|------------------------|
//! | `targets`      | target id (BE u64) | `CrawlTarget`          |
//! | `target_urls`  | source URL         | target id              |
//! | `documents`    | doc id             | `Document`             |
//! | `fingerprints` | content hash       | doc id                 |
//! | `pending`      | doc id             | empty, awaiting index  |
//! | `postings`     | term               | `Vec<Posting>` by id   |
//! | `doc_terms`    | doc id             | `Vec<String>` indexed  |
//! | `live`         | canonical URL      | indexed doc id         |
//!
//! Values are bincode, except the JSON run metadata in the default tree.

use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
};
use sled::{Transactional, Tree};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;

use crate::document::{DocId, Document};
use crate::error::StoreError;
use crate::index::Posting;
use crate::target::{CrawlTarget, SourceKind, TargetId};

const META_KEY: &[u8] = b"meta";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaFile {
    pub indexed_docs: u64,
    pub updated_at: String,
    pub version: u32,
}

#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

struct Inner {
    db: sled::Db,
    targets: Tree,
    target_urls: Tree,
    documents: Tree,
    fingerprints: Tree,
    pending: Tree,
    postings: Tree,
    doc_terms: Tree,
    live: Tree,
    /// Writers hold it exclusively while a document's postings change.
    index_lock: RwLock<()>,
    /// Entries in `doc_terms`, maintained by index commits.
    indexed: AtomicU64,
}

pub(crate) fn id_key(id: u64) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

pub(crate) fn decode_id(tree: &'static str, bytes: &[u8]) -> Result<u64, StoreError> {
    <[u8; 8]>::try_from(bytes)
        .map(u64::from_be_bytes)
        .map_err(|_| StoreError::Corrupt { tree, message: format!("id of {} bytes", bytes.len()) })
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(bincode::deserialize(bytes)?)
}

/// Convert an error into a transaction abort.
pub(crate) fn abort<E>(e: E) -> ConflictableTransactionError<E> {
    ConflictableTransactionError::Abort(e)
}

pub(crate) fn flatten_txn<E: From<sled::Error>>(e: TransactionError<E>) -> E {
    match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => E::from(e),
    }
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "store opened");
        Self::from_db(db)
    }

    /// In-memory store that is deleted on drop.
    pub fn temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let doc_terms = db.open_tree("doc_terms")?;
        let indexed = AtomicU64::new(doc_terms.len() as u64);
        let inner = Inner {
            targets: db.open_tree("targets")?,
            target_urls: db.open_tree("target_urls")?,
            documents: db.open_tree("documents")?,
            fingerprints: db.open_tree("fingerprints")?,
            pending: db.open_tree("pending")?,
            postings: db.open_tree("postings")?,
            doc_terms,
            live: db.open_tree("live")?,
            index_lock: RwLock::new(()),
            indexed,
            db,
        };
        Ok(Self { inner: Arc::new(inner) })
    }

    /// Monotonic id shared by targets and documents.
    pub fn generate_id(&self) -> Result<u64, StoreError> {
        Ok(self.inner.db.generate_id()?)
    }

    pub fn flush(&self) -> Result<usize, StoreError> {
        Ok(self.inner.db.flush()?)
    }

    // --- crawl targets ---

    /// Register a target by URL. Returns the stored target and whether it was created.
    pub fn register_target(
        &self,
        url: &str,
        kind: SourceKind,
        discover: bool,
        discovered_from: Option<TargetId>,
        now: OffsetDateTime,
    ) -> Result<(CrawlTarget, bool), StoreError> {
        let new_id = self.generate_id()?;
        let mut fresh = CrawlTarget::new(new_id, url.to_string(), kind, now);
        fresh.discover = discover;
        fresh.discovered_from = discovered_from;
        let fresh_bytes = bincode::serialize(&fresh)?;

        let result = (&self.inner.targets, &self.inner.target_urls).transaction(
            |(targets, urls)| -> ConflictableTransactionResult<(CrawlTarget, bool), StoreError> {
                if let Some(id) = urls.get(url.as_bytes())? {
                    let bytes = targets.get(&id)?.ok_or_else(|| {
                        abort(StoreError::Corrupt {
                            tree: "target_urls",
                            message: format!("dangling target for {url}"),
                        })
                    })?;
                    let existing: CrawlTarget = decode(&bytes).map_err(abort)?;
                    return Ok((existing, false));
                }
                targets.insert(id_key(new_id), fresh_bytes.clone())?;
                urls.insert(url.as_bytes(), id_key(new_id))?;
                Ok((fresh.clone(), true))
            },
        );
        result.map_err(flatten_txn)
    }

    pub fn target(&self, id: TargetId) -> Result<Option<CrawlTarget>, StoreError> {
        self.inner.targets.get(id_key(id))?.map(|b| decode(&b)).transpose()
    }

    pub fn target_by_url(&self, url: &str) -> Result<Option<CrawlTarget>, StoreError> {
        match self.inner.target_urls.get(url.as_bytes())? {
            Some(id) => self.target(decode_id("target_urls", &id)?),
            None => Ok(None),
        }
    }

    pub fn targets(&self) -> Result<Vec<CrawlTarget>, StoreError> {
        self.inner.targets.iter().values().map(|v| decode(&v?)).collect()
    }

    /// Targets eligible at `now`, earliest due first.
    pub fn eligible_targets(&self, now: OffsetDateTime) -> Result<Vec<CrawlTarget>, StoreError> {
        let mut out: Vec<CrawlTarget> =
            self.targets()?.into_iter().filter(|t| t.is_eligible(now)).collect();
        out.sort_by_key(|t| (t.next_eligible_at, t.id));
        Ok(out)
    }

    /// Atomically move an eligible target into the fetching phase.
    /// Returns `None` when the target is not eligible or another worker holds it.
    pub fn claim_target(
        &self,
        id: TargetId,
        now: OffsetDateTime,
    ) -> Result<Option<CrawlTarget>, StoreError> {
        let key = id_key(id);
        loop {
            let Some(current) = self.inner.targets.get(&key)? else {
                return Ok(None);
            };
            let mut target: CrawlTarget = decode(&current)?;
            if !target.is_eligible(now) {
                return Ok(None);
            }
            target.claimed = true;
            let next = bincode::serialize(&target)?;
            match self.inner.targets.compare_and_swap(&key, Some(&current), Some(next))? {
                Ok(()) => return Ok(Some(target)),
                Err(_) => continue,
            }
        }
    }

    /// Persist a target after a fetch, releasing its claim.
    pub fn save_target(&self, target: &CrawlTarget) -> Result<(), StoreError> {
        let mut t = target.clone();
        t.claimed = false;
        self.inner.targets.insert(id_key(t.id), bincode::serialize(&t)?)?;
        Ok(())
    }

    /// Release claims left behind by an interrupted run.
    pub fn release_claims(&self) -> Result<usize, StoreError> {
        let mut released = 0;
        for t in self.targets()? {
            if t.claimed {
                self.save_target(&t)?;
                released += 1;
            }
        }
        Ok(released)
    }

    /// Manual re-enable: clears failures and makes the target due now.
    pub fn enable_target(
        &self,
        id: TargetId,
        now: OffsetDateTime,
    ) -> Result<CrawlTarget, StoreError> {
        let mut t = self.target(id)?.ok_or_else(|| StoreError::TargetNotFound(id.to_string()))?;
        t.disabled = false;
        t.consecutive_failures = 0;
        t.next_eligible_at = now;
        self.save_target(&t)?;
        t.claimed = false;
        Ok(t)
    }

    // --- documents ---

    pub fn document(&self, id: DocId) -> Result<Option<Document>, StoreError> {
        self.inner.documents.get(id_key(id))?.map(|b| decode(&b)).transpose()
    }

    /// All stored documents in id order.
    pub fn documents(&self) -> impl Iterator<Item = Result<Document, StoreError>> + '_ {
        self.inner.documents.iter().values().map(|v| decode(&v?))
    }

    pub fn document_count(&self) -> usize {
        self.inner.documents.len()
    }

    pub fn document_by_hash(&self, hash: &str) -> Result<Option<DocId>, StoreError> {
        self.inner
            .fingerprints
            .get(hash.as_bytes())?
            .map(|b| decode_id("fingerprints", &b))
            .transpose()
    }

    /// Documents accepted by the crawler and not yet indexed, in id order.
    pub fn pending_ids(&self) -> Result<Vec<DocId>, StoreError> {
        self.inner.pending.iter().keys().map(|k| decode_id("pending", &k?)).collect()
    }

    pub fn enqueue_pending(&self, id: DocId) -> Result<(), StoreError> {
        self.inner.pending.insert(id_key(id), Vec::new())?;
        Ok(())
    }

    // --- index reads ---

    pub fn postings(&self, term: &str) -> Result<Vec<Posting>, StoreError> {
        match self.inner.postings.get(term.as_bytes())? {
            Some(b) => decode(&b),
            None => Ok(Vec::new()),
        }
    }

    /// Number of documents with live postings.
    pub fn indexed_count(&self) -> usize {
        self.inner.indexed.load(Ordering::Acquire) as usize
    }

    pub fn is_indexed(&self, id: DocId) -> Result<bool, StoreError> {
        Ok(self.inner.doc_terms.contains_key(id_key(id))?)
    }

    pub fn live_document(&self, canonical_url: &str) -> Result<Option<DocId>, StoreError> {
        self.inner.live.get(canonical_url.as_bytes())?.map(|b| decode_id("live", &b)).transpose()
    }

    /// Every posting list, for comparisons and diagnostics.
    pub fn dump_postings(&self) -> Result<BTreeMap<String, Vec<Posting>>, StoreError> {
        let mut out = BTreeMap::new();
        for kv in self.inner.postings.iter() {
            let (k, v) = kv?;
            let term = String::from_utf8_lossy(&k).into_owned();
            out.insert(term, decode(&v)?);
        }
        Ok(out)
    }

    pub fn save_meta(&self, meta: &MetaFile) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(meta)
            .map_err(|e| StoreError::Corrupt { tree: "meta", message: e.to_string() })?;
        self.inner.db.insert(META_KEY, json)?;
        Ok(())
    }

    pub fn load_meta(&self) -> Result<Option<MetaFile>, StoreError> {
        match self.inner.db.get(META_KEY)? {
            Some(b) => serde_json::from_slice(&b)
                .map(Some)
                .map_err(|e| StoreError::Corrupt { tree: "meta", message: e.to_string() }),
            None => Ok(None),
        }
    }

    // --- crate internals for the dedup and index writers ---

    pub(crate) fn dedup_trees(&self) -> (&Tree, &Tree, &Tree) {
        (&self.inner.fingerprints, &self.inner.documents, &self.inner.pending)
    }

    pub(crate) fn index_trees(&self) -> (&Tree, &Tree, &Tree, &Tree) {
        (&self.inner.postings, &self.inner.doc_terms, &self.inner.live, &self.inner.pending)
    }

    pub(crate) fn index_lock(&self) -> &RwLock<()> {
        &self.inner.index_lock
    }

    /// Apply a committed change in the number of indexed documents.
    pub(crate) fn adjust_indexed(&self, delta: i64) {
        let _ = self.inner.indexed.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            Some(n.saturating_add_signed(delta))
        });
    }

    /// Drop every posting, document term list and live entry.
    pub(crate) fn clear_index(&self) -> Result<(), StoreError> {
        self.inner.postings.clear()?;
        self.inner.doc_terms.clear()?;
        self.inner.live.clear()?;
        self.inner.indexed.store(0, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use time::macros::datetime;

    fn html(store: &Store, url: &str, now: OffsetDateTime) -> (CrawlTarget, bool) {
        store.register_target(url, SourceKind::Html, false, None, now).unwrap()
    }

    #[test]
    fn register_is_idempotent_per_url() {
        let store = Store::temporary().unwrap();
        let now = datetime!(2024-05-01 0:00 UTC);
        let (a, created) = html(&store, "https://a.example/", now);
        assert!(created);
        let (b, created) =
            store.register_target("https://a.example/", SourceKind::Feed, true, None, now).unwrap();
        assert!(!created);
        assert_eq!(a.id, b.id);
        assert_eq!(b.source_kind, SourceKind::Html);
        assert_eq!(store.targets().unwrap().len(), 1);
        assert_eq!(store.target_by_url("https://a.example/").unwrap().unwrap().id, a.id);
    }

    #[test]
    fn claim_is_exclusive_until_saved() {
        let store = Store::temporary().unwrap();
        let now = datetime!(2024-05-01 0:00 UTC);
        let (t, _) = html(&store, "https://a.example/", now);
        let claimed = store.claim_target(t.id, now).unwrap().unwrap();
        assert!(claimed.claimed);
        assert!(store.claim_target(t.id, now).unwrap().is_none());
        assert!(store.eligible_targets(now).unwrap().is_empty());
        store.save_target(&claimed).unwrap();
        assert!(store.claim_target(t.id, now).unwrap().is_some());
        assert_eq!(store.release_claims().unwrap(), 1);
        assert_eq!(store.eligible_targets(now).unwrap().len(), 1);
    }

    #[test]
    fn racing_claims_have_one_winner() {
        let store = Store::temporary().unwrap();
        let now = datetime!(2024-05-01 0:00 UTC);
        let (t, _) = html(&store, "https://a.example/", now);
        let workers = 8;
        let barrier = Arc::new(Barrier::new(workers));
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let (store, barrier) = (store.clone(), barrier.clone());
                std::thread::spawn(move || {
                    barrier.wait();
                    store.claim_target(t.id, now).unwrap()
                })
            })
            .collect();
        let winners = handles.into_iter().filter_map(|h| h.join().unwrap()).count();
        assert_eq!(winners, 1);
        assert!(store.target(t.id).unwrap().unwrap().claimed);
    }

    #[test]
    fn enable_clears_disabled_state() {
        let store = Store::temporary().unwrap();
        let now = datetime!(2024-05-01 0:00 UTC);
        let (mut t, _) = html(&store, "https://a.example/", now);
        t.disabled = true;
        t.consecutive_failures = 5;
        store.save_target(&t).unwrap();
        assert!(store.eligible_targets(now).unwrap().is_empty());
        let later = now + time::Duration::hours(1);
        let t = store.enable_target(t.id, later).unwrap();
        assert!(!t.disabled);
        assert_eq!(t.consecutive_failures, 0);
        assert_eq!(store.eligible_targets(later).unwrap().len(), 1);
        assert!(matches!(store.enable_target(999_999, later), Err(StoreError::TargetNotFound(_))));
    }

    #[test]
    fn meta_round_trip() {
        let store = Store::temporary().unwrap();
        assert!(store.load_meta().unwrap().is_none());
        let meta =
            MetaFile { indexed_docs: 3, updated_at: "2024-01-01T00:00:00Z".into(), version: 1 };
        store.save_meta(&meta).unwrap();
        assert_eq!(store.load_meta().unwrap(), Some(meta));
    }
}
