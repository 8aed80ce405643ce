use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionResult, TransactionalTree};
use sled::Transactional;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::document::{DocId, Document};
use crate::error::IndexError;
use crate::segmenter::Segmenter;
use crate::store::{abort, decode_id, flatten_txn, id_key, Store};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: DocId,
    /// Occurrences in title and body together.
    pub term_frequency: u32,
    pub title_frequency: u32,
    /// Body term positions.
    pub positions: Vec<u32>,
    pub title_positions: Vec<u32>,
}

impl Posting {
    pub fn body_frequency(&self) -> u32 {
        self.term_frequency - self.title_frequency
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed { terms: usize },
    /// A newer version of the same canonical URL is already live.
    Superseded { by: DocId },
}

/// Term → posting for one document, built from its title and body.
pub fn build_postings(segmenter: &Segmenter, doc: &Document) -> BTreeMap<String, Posting> {
    let mut out: BTreeMap<String, Posting> = BTreeMap::new();
    let new_posting = || Posting {
        doc_id: doc.id,
        term_frequency: 0,
        title_frequency: 0,
        positions: Vec::new(),
        title_positions: Vec::new(),
    };
    for (term, pos) in segmenter.terms(&doc.title) {
        let p = out.entry(term).or_insert_with(new_posting);
        p.term_frequency += 1;
        p.title_frequency += 1;
        p.title_positions.push(pos as u32);
    }
    for (term, pos) in segmenter.terms(&doc.body_text) {
        let p = out.entry(term).or_insert_with(new_posting);
        p.term_frequency += 1;
        p.positions.push(pos as u32);
    }
    out
}

type TxnResult<T> = ConflictableTransactionResult<T, IndexError>;

fn read_list(postings: &TransactionalTree, term: &str) -> TxnResult<Vec<Posting>> {
    match postings.get(term.as_bytes())? {
        Some(b) => bincode::deserialize(&b).map_err(|e| abort(IndexError::from(e))),
        None => Ok(Vec::new()),
    }
}

fn write_list(postings: &TransactionalTree, term: &str, list: &[Posting]) -> TxnResult<()> {
    if list.is_empty() {
        postings.remove(term.as_bytes())?;
    } else {
        let bytes = bincode::serialize(list).map_err(|e| abort(IndexError::from(e)))?;
        postings.insert(term.as_bytes(), bytes)?;
    }
    Ok(())
}

/// Remove every posting of `doc_id` recorded in `doc_terms`.
/// Returns whether the document was indexed.
fn remove_doc(
    postings: &TransactionalTree,
    doc_terms: &TransactionalTree,
    doc_id: DocId,
) -> TxnResult<bool> {
    let Some(raw) = doc_terms.get(id_key(doc_id))? else {
        return Ok(false);
    };
    let terms: Vec<String> = bincode::deserialize(&raw).map_err(|e| abort(IndexError::from(e)))?;
    for term in &terms {
        let mut list = read_list(postings, term)?;
        list.retain(|p| p.doc_id != doc_id);
        write_list(postings, term, &list)?;
    }
    doc_terms.remove(id_key(doc_id))?;
    Ok(true)
}

fn read_id(tree: &TransactionalTree, key: &[u8], name: &'static str) -> TxnResult<Option<DocId>> {
    match tree.get(key)? {
        Some(b) => decode_id(name, &b).map(Some).map_err(|e| abort(IndexError::from(e))),
        None => Ok(None),
    }
}

/// Sole writer of the inverted index.
#[derive(Clone)]
pub struct Indexer {
    store: Store,
    segmenter: Arc<Segmenter>,
}

impl Indexer {
    pub fn new(store: Store, segmenter: Arc<Segmenter>) -> Self {
        Self { store, segmenter }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Merge one document into the index.
    ///
    /// All posting changes for the document, including removal of its earlier
    /// postings and of the previously live version of its canonical URL,
    /// commit in one transaction. On error nothing is written.
    pub fn index_document(&self, doc: &Document) -> Result<IndexOutcome, IndexError> {
        let postings = build_postings(&self.segmenter, doc);
        let terms: Vec<String> = postings.keys().cloned().collect();
        let terms_bytes = bincode::serialize(&terms)?;
        let key = id_key(doc.id);

        let (t_postings, t_doc_terms, t_live, t_pending) = self.store.index_trees();
        let _guard = self.store.index_lock().write();
        let trees = (t_postings, t_doc_terms, t_live, t_pending);
        // Commits the outcome plus the change in the number of indexed documents.
        let result = trees.transaction(|(p, dt, live, pending)| -> TxnResult<(IndexOutcome, i64)> {
            let url = doc.canonical_url.as_bytes();
            let mut delta = 1;
            if let Some(current) = read_id(live, url, "live")? {
                if current > doc.id {
                    pending.remove(key.clone())?;
                    return Ok((IndexOutcome::Superseded { by: current }, 0));
                }
                if current != doc.id && remove_doc(p, dt, current)? {
                    delta -= 1;
                }
            }
            if remove_doc(p, dt, doc.id)? {
                delta -= 1;
            }
            for (term, posting) in &postings {
                let mut list = read_list(p, term)?;
                match list.binary_search_by_key(&doc.id, |x| x.doc_id) {
                    Ok(i) => list[i] = posting.clone(),
                    Err(i) => list.insert(i, posting.clone()),
                }
                write_list(p, term, &list)?;
            }
            dt.insert(key.clone(), terms_bytes.clone())?;
            live.insert(url, id_key(doc.id))?;
            pending.remove(key.clone())?;
            Ok((IndexOutcome::Indexed { terms: postings.len() }, delta))
        });
        let (outcome, delta) = result.map_err(flatten_txn)?;
        self.store.adjust_indexed(delta);
        match outcome {
            IndexOutcome::Indexed { terms } => {
                tracing::debug!(doc_id = doc.id, terms, "document indexed")
            }
            IndexOutcome::Superseded { by } => {
                tracing::debug!(doc_id = doc.id, by, "document superseded")
            }
        }
        Ok(outcome)
    }

    /// Index a stored document by id.
    pub fn index_by_id(&self, id: DocId) -> Result<IndexOutcome, IndexError> {
        let doc = self.store.document(id)?.ok_or(IndexError::MissingDocument(id))?;
        self.index_document(&doc)
    }

    /// Drop the index and replay every stored document in id order.
    /// Per-document failures are logged and counted; storage scan failures abort.
    pub fn reindex_all(&self) -> Result<ReindexSummary, IndexError> {
        {
            let _guard = self.store.index_lock().write();
            self.store.clear_index()?;
        }
        let mut summary = ReindexSummary::default();
        let mut seen_urls: HashSet<String> = HashSet::new();
        for doc in self.store.documents() {
            let doc = doc?;
            summary.processed += 1;
            seen_urls.insert(doc.canonical_url.clone());
            match self.index_document(&doc) {
                Ok(IndexOutcome::Indexed { .. }) => summary.indexed += 1,
                Ok(IndexOutcome::Superseded { .. }) => summary.superseded += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(doc_id = doc.id, error = %e, "reindex failed for document");
                }
            }
        }
        summary.live = seen_urls.len();
        tracing::info!(
            processed = summary.processed,
            indexed = summary.indexed,
            live = summary.live,
            "full reindex complete"
        );
        Ok(summary)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReindexSummary {
    pub processed: usize,
    pub indexed: usize,
    pub superseded: usize,
    pub failed: usize,
    /// Distinct canonical URLs seen.
    pub live: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::{Dictionary, DictionaryEntry, Origin};
    use time::macros::datetime;

    fn segmenter() -> Arc<Segmenter> {
        let dict = Dictionary::from_entries(vec![
            DictionaryEntry { term: "研究生".into(), weight: 1.0, origin: Origin::User },
            DictionaryEntry { term: "研究".into(), weight: 1.0, origin: Origin::General },
        ]);
        Arc::new(Segmenter::new(Arc::new(dict)))
    }

    fn doc(id: DocId, url: &str, title: &str, body: &str) -> Document {
        let fetched = datetime!(2024-05-01 0:00 UTC);
        Document::new(id, url.into(), title.into(), body.into(), fetched, None, 1)
    }

    #[test]
    fn title_and_body_counts_are_separate() {
        let p = build_postings(&segmenter(), &doc(1, "u", "研究生 golang", "研究生 研究 研究生"));
        let g = &p["研究生"];
        assert_eq!(g.term_frequency, 3);
        assert_eq!(g.title_frequency, 1);
        assert_eq!(g.body_frequency(), 2);
        assert_eq!(g.positions, vec![0, 2]);
        assert_eq!(p["golang"].title_positions, vec![1]);
    }

    #[test]
    fn reindexing_replaces_postings() {
        let store = Store::temporary().unwrap();
        let indexer = Indexer::new(store.clone(), segmenter());
        let d = doc(7, "https://a/1", "研究生", "研究");
        indexer.index_document(&d).unwrap();
        let once = store.dump_postings().unwrap();
        indexer.index_document(&d).unwrap();
        assert_eq!(store.dump_postings().unwrap(), once);
        assert_eq!(store.postings("研究生").unwrap().len(), 1);
    }

    #[test]
    fn newer_version_of_url_replaces_older() {
        let store = Store::temporary().unwrap();
        let indexer = Indexer::new(store.clone(), segmenter());
        indexer.index_document(&doc(1, "https://a/1", "研究", "")).unwrap();
        indexer.index_document(&doc(2, "https://a/1", "研究生", "")).unwrap();
        assert!(store.postings("研究").unwrap().is_empty());
        assert_eq!(store.postings("研究生").unwrap()[0].doc_id, 2);
        assert_eq!(store.live_document("https://a/1").unwrap(), Some(2));
        let out = indexer.index_document(&doc(1, "https://a/1", "研究", "")).unwrap();
        assert_eq!(out, IndexOutcome::Superseded { by: 2 });
        assert!(store.postings("研究").unwrap().is_empty());
    }

    #[test]
    fn indexed_count_follows_commits() {
        let store = Store::temporary().unwrap();
        let indexer = Indexer::new(store.clone(), segmenter());
        indexer.index_document(&doc(1, "https://a/1", "研究", "")).unwrap();
        indexer.index_document(&doc(1, "https://a/1", "研究", "")).unwrap();
        indexer.index_document(&doc(2, "https://a/2", "研究生", "")).unwrap();
        assert_eq!(store.indexed_count(), 2);
        indexer.index_document(&doc(3, "https://a/1", "研究生", "")).unwrap();
        assert_eq!(store.indexed_count(), 2);
        indexer.index_document(&doc(1, "https://a/1", "研究", "")).unwrap();
        assert_eq!(store.indexed_count(), 2);
        store.clear_index().unwrap();
        assert_eq!(store.indexed_count(), 0);
    }

    #[test]
    fn aborted_merge_leaves_index_untouched() {
        let store = Store::temporary().unwrap();
        let indexer = Indexer::new(store.clone(), segmenter());
        indexer.index_document(&doc(1, "https://a/1", "", "golang")).unwrap();
        // "golang" sorts before "zzz", so the merge fails after touching a list.
        store.index_trees().0.insert("zzz", vec![0xff; 3]).unwrap();
        let raw = |store: &Store| -> Vec<(Vec<u8>, Vec<u8>)> {
            let (postings, doc_terms, live, _) = store.index_trees();
            [postings, doc_terms, live]
                .into_iter()
                .flat_map(|t| t.iter().map(|kv| kv.unwrap()))
                .map(|(k, v)| (k.to_vec(), v.to_vec()))
                .collect()
        };
        let before = raw(&store);

        let err = indexer.index_document(&doc(2, "https://a/2", "", "golang zzz"));
        assert!(err.is_err());
        assert_eq!(raw(&store), before);
        assert!(!store.is_indexed(2).unwrap());
        assert_eq!(store.live_document("https://a/2").unwrap(), None);
        assert_eq!(store.indexed_count(), 1);
        assert_eq!(store.postings("golang").unwrap().len(), 1);
    }
}
