use sled::transaction::ConflictableTransactionResult;
use sled::Transactional;

use crate::document::{DocId, Document};
use crate::error::StoreError;
use crate::store::{abort, decode_id, flatten_txn, id_key, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// Fingerprint was new; the document is stored and queued for indexing.
    Accepted,
    Duplicate { existing: DocId },
}

/// Content-fingerprint gate in front of the document store.
#[derive(Clone)]
pub struct Deduplicator {
    store: Store,
}

impl Deduplicator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Record the document's fingerprint if unseen and persist the document.
    ///
    /// Check, record, document write and index enqueue are one transaction:
    /// concurrent callers with the same fingerprint get exactly one `Accepted`.
    pub fn check_and_record(&self, doc: &Document) -> Result<DedupOutcome, StoreError> {
        let doc_bytes = bincode::serialize(doc)?;
        let key = id_key(doc.id);
        let hash = doc.content_hash.as_bytes();
        let (fingerprints, documents, pending) = self.store.dedup_trees();

        let result = (fingerprints, documents, pending).transaction(
            |(fp, docs, queue)| -> ConflictableTransactionResult<DedupOutcome, StoreError> {
                if let Some(existing) = fp.get(hash)? {
                    let existing = decode_id("fingerprints", &existing).map_err(abort)?;
                    return Ok(DedupOutcome::Duplicate { existing });
                }
                fp.insert(hash, key.clone())?;
                docs.insert(key.clone(), doc_bytes.clone())?;
                queue.insert(key.clone(), Vec::new())?;
                Ok(DedupOutcome::Accepted)
            },
        );
        let outcome = result.map_err(flatten_txn)?;
        if let DedupOutcome::Duplicate { existing } = outcome {
            tracing::debug!(
                doc_id = doc.id,
                existing,
                url = %doc.canonical_url,
                "duplicate content"
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use time::macros::datetime;

    fn doc(store: &Store, url: &str, body: &str) -> Document {
        let id = store.generate_id().unwrap();
        let fetched = datetime!(2024-05-01 0:00 UTC);
        Document::new(id, url.into(), "t".into(), body.into(), fetched, None, 1)
    }

    #[test]
    fn same_content_is_stored_once() {
        let store = Store::temporary().unwrap();
        let dedup = Deduplicator::new(store.clone());
        let a = doc(&store, "https://a/1", "Go 语言 并发");
        let b = doc(&store, "https://b/2", "go语言\n并发");
        assert_eq!(dedup.check_and_record(&a).unwrap(), DedupOutcome::Accepted);
        assert_eq!(dedup.check_and_record(&b).unwrap(), DedupOutcome::Duplicate { existing: a.id });
        assert_eq!(store.document_count(), 1);
        assert_eq!(store.pending_ids().unwrap(), vec![a.id]);
        assert_eq!(store.document_by_hash(&a.content_hash).unwrap(), Some(a.id));
    }

    #[test]
    fn concurrent_duplicates_accept_once() {
        let store = Store::temporary().unwrap();
        let dedup = Arc::new(Deduplicator::new(store.clone()));
        let docs: Vec<Document> =
            (0..8).map(|i| doc(&store, &format!("https://s{i}/"), "同一 内容")).collect();
        let handles: Vec<_> = docs
            .into_iter()
            .map(|d| {
                let dedup = dedup.clone();
                std::thread::spawn(move || dedup.check_and_record(&d).unwrap())
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| *o == DedupOutcome::Accepted)
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(store.document_count(), 1);
    }
}
