use lexi_core::config::{QueryMode, SearchConfig};
use lexi_core::dictionary::{Dictionary, DictionaryEntry, Origin};
use lexi_core::{Deduplicator, DedupOutcome, Document, Indexer, SearchService, Segmenter, Store};
use std::sync::Arc;
use time::macros::datetime;
use time::OffsetDateTime;

fn segmenter() -> Arc<Segmenter> {
    let dict = Dictionary::from_entries(vec![
        DictionaryEntry { term: "研究生".into(), weight: 1.0, origin: Origin::User },
        DictionaryEntry { term: "研究".into(), weight: 1.0, origin: Origin::General },
        DictionaryEntry { term: "生命".into(), weight: 1.0, origin: Origin::General },
        DictionaryEntry { term: "并发".into(), weight: 1.0, origin: Origin::General },
    ]);
    Arc::new(Segmenter::new(Arc::new(dict)))
}

const NOW: OffsetDateTime = datetime!(2024-06-01 0:00 UTC);

fn store_doc(
    store: &Store,
    url: &str,
    title: &str,
    body: &str,
    fetched: OffsetDateTime,
) -> Document {
    let id = store.generate_id().unwrap();
    let doc = Document::new(id, url.into(), title.into(), body.into(), fetched, None, 1);
    let outcome = Deduplicator::new(store.clone()).check_and_record(&doc).unwrap();
    assert_eq!(outcome, DedupOutcome::Accepted);
    doc
}

#[test]
fn title_match_ranks_above_partial_body_match() {
    let store = Store::temporary().unwrap();
    let seg = segmenter();
    let indexer = Indexer::new(store.clone(), seg.clone());
    let titled = store_doc(&store, "https://a/1", "研究生命", "关于 学习 的 文章", NOW);
    let partial = store_doc(&store, "https://a/2", "杂谈", "研究 工作 与 生 活", NOW);
    indexer.index_document(&titled).unwrap();
    indexer.index_document(&partial).unwrap();

    for mode in [QueryMode::All, QueryMode::Any] {
        let config = SearchConfig { mode, ..SearchConfig::default() };
        let search = SearchService::new(store.clone(), seg.clone(), config);
        let res = search.query_at("研究生", 10, NOW).unwrap();
        assert_eq!(res.hits[0].doc_id, titled.id);
        assert!(res.hits.iter().skip(1).all(|h| h.score <= res.hits[0].score));
        assert_eq!(res.hits[0].title, "研究生命");
    }
}

#[test]
fn intersection_and_union_semantics() {
    let store = Store::temporary().unwrap();
    let seg = segmenter();
    let indexer = Indexer::new(store.clone(), seg.clone());
    let both = store_doc(&store, "https://a/1", "并发", "研究 并发 模型", NOW);
    let one = store_doc(&store, "https://a/2", "研究", "只有 研究", NOW);
    indexer.index_document(&both).unwrap();
    indexer.index_document(&one).unwrap();

    let all = SearchService::new(store.clone(), seg.clone(), SearchConfig::default());
    let hits: Vec<u64> =
        all.query_at("研究 并发", 10, NOW).unwrap().hits.iter().map(|h| h.doc_id).collect();
    assert_eq!(hits, vec![both.id]);

    let config = SearchConfig { mode: QueryMode::Any, ..SearchConfig::default() };
    let any = SearchService::new(store.clone(), seg.clone(), config);
    let res = any.query_at("研究 并发", 10, NOW).unwrap();
    assert_eq!(res.total_hits, 2);
    assert_eq!(res.hits[0].doc_id, both.id);
}

#[test]
fn recency_breaks_equal_relevance() {
    let store = Store::temporary().unwrap();
    let seg = segmenter();
    let indexer = Indexer::new(store.clone(), seg.clone());
    let old = store_doc(&store, "https://a/old", "并发", "并发 一", datetime!(2023-01-01 0:00 UTC));
    let new = store_doc(&store, "https://a/new", "并发", "并发 二", datetime!(2024-05-30 0:00 UTC));
    indexer.index_document(&new).unwrap();
    indexer.index_document(&old).unwrap();
    let search = SearchService::new(store.clone(), seg, SearchConfig::default());
    let res = search.query_at("并发", 10, NOW).unwrap();
    assert_eq!(res.hits[0].doc_id, new.id);
    assert!(res.hits[0].score > res.hits[1].score);
}

#[test]
fn no_terms_means_empty_results() {
    let store = Store::temporary().unwrap();
    let search = SearchService::new(store, segmenter(), SearchConfig::default());
    let res = search.query("  ， the ", 10).unwrap();
    assert_eq!(res.total_hits, 0);
    assert!(res.hits.is_empty());
    assert!(search.query("并发", 10).unwrap().hits.is_empty());
}

#[test]
fn full_reindex_matches_incremental_build() {
    let store = Store::temporary().unwrap();
    let indexer = Indexer::new(store.clone(), segmenter());
    let docs = vec![
        store_doc(&store, "https://a/1", "研究生命", "研究 生命 研究生", NOW),
        store_doc(&store, "https://a/2", "并发", "Go 并发 goroutines", NOW),
        store_doc(&store, "https://a/1", "研究生命 v2", "研究生 新 内容", NOW),
    ];
    for d in &docs {
        indexer.index_document(d).unwrap();
    }
    // index one document twice more
    indexer.index_document(&docs[1]).unwrap();
    let incremental = store.dump_postings().unwrap();

    let summary = indexer.reindex_all().unwrap();
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.live, 2);
    assert_eq!(store.dump_postings().unwrap(), incremental);
    assert_eq!(store.indexed_count(), 2);
    assert!(store.pending_ids().unwrap().is_empty());
}

#[test]
fn document_lookup_by_id() {
    let store = Store::temporary().unwrap();
    let d = store_doc(&store, "https://a/1", "标题", "正文", NOW);
    let search = SearchService::new(store, segmenter(), SearchConfig::default());
    assert_eq!(search.document(d.id).unwrap(), Some(d));
    assert_eq!(search.document(424242).unwrap(), None);
}
