use std::fs;
use std::sync::Arc;
use tokio::sync::watch;

use lexi_core::dictionary::{Dictionary, DictionaryEntry, Origin};
use lexi_core::index::Indexer;
use lexi_core::segmenter::Segmenter;
use lexi_core::store::Store;
use lexi_indexer::{ImportError, IndexRun};

fn run_over(store: &Store) -> IndexRun {
    let dict = Dictionary::from_entries(vec![
        DictionaryEntry { term: "并发".into(), weight: 1.0, origin: Origin::User },
        DictionaryEntry { term: "编程".into(), weight: 1.0, origin: Origin::General },
    ]);
    let segmenter = Arc::new(Segmenter::new(Arc::new(dict)));
    IndexRun::new(Indexer::new(store.clone(), segmenter))
}

fn running() -> watch::Receiver<bool> {
    watch::channel(false).1
}

const JSONL: &str = r#"{"id":"a","title":"并发编程","body":"goroutine 并发","url":"https://studygolang.com/a","timestamp":"2024-03-01T08:00:00Z"}

{"id":"b","title":"镜像","body":"Goroutine  并发","url":"https://mirror.example.com/a"}
{"id":"c","title":"编程","body":"编程 入门"}
"#;

#[test]
fn jsonl_import_dedups_and_indexes() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("crawl.jsonl");
    fs::write(&file, JSONL).unwrap();
    let store = Store::temporary().unwrap();
    let run = run_over(&store);

    let summary = run.import(&file, &running()).unwrap();
    assert_eq!(summary.imported, 2);
    assert_eq!(summary.duplicate, 1);
    assert_eq!(summary.indexed, 2);
    assert!(store.pending_ids().unwrap().is_empty());
    assert_eq!(store.postings("并发").unwrap().len(), 1);
    assert_eq!(store.postings("编程").unwrap().len(), 2);
    assert!(store.live_document("urn:lexi:import:c").unwrap().is_some());
    assert_eq!(store.load_meta().unwrap().unwrap().indexed_docs, 2);

    let again = run.run_pending(&running()).unwrap();
    assert_eq!(again.processed, 0);
}

#[test]
fn directory_import_reads_json_arrays_and_jsonl() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("nested")).unwrap();
    fs::write(
        dir.path().join("nested/batch.json"),
        r#"[{"id":"x","title":"并发","body":"第一篇"},{"id":"y","title":"并发","body":"第二篇"}]"#,
    )
    .unwrap();
    fs::write(dir.path().join("one.jsonl"), r#"{"id":"z","body":"第三篇"}"#).unwrap();
    fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
    let store = Store::temporary().unwrap();

    let summary = run_over(&store).import(dir.path(), &running()).unwrap();
    assert_eq!(summary.imported, 3);
    assert_eq!(store.document_count(), 3);
}

#[test]
fn malformed_records_are_skipped_and_counted() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("a.jsonl"),
        "{\"id\":\"a\",\"body\":\"并发 一\"}\n{not json}\n{\"id\":\"b\"}\n",
    )
    .unwrap();
    fs::write(dir.path().join("b.json"), r#"[{"id":"c","body":"编程 二"}, 42]"#).unwrap();
    fs::write(dir.path().join("c.json"), "[{broken").unwrap();
    let store = Store::temporary().unwrap();

    let summary = run_over(&store).import(dir.path(), &running()).unwrap();
    assert_eq!(summary.malformed, 4);
    assert_eq!(summary.imported, 2);
    assert_eq!(summary.indexed, 2);
    assert!(store.pending_ids().unwrap().is_empty());
    assert_eq!(store.postings("并发").unwrap().len(), 1);
    assert_eq!(store.postings("编程").unwrap().len(), 1);
}

#[test]
fn empty_directory_has_no_input() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::temporary().unwrap();
    let result = run_over(&store).import(dir.path(), &running());
    assert!(matches!(result, Err(ImportError::NoInput(_))));
}

#[test]
fn full_rebuild_matches_incremental() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("crawl.jsonl");
    fs::write(&file, JSONL).unwrap();
    let store = Store::temporary().unwrap();
    let run = run_over(&store);
    run.import(&file, &running()).unwrap();
    let incremental = store.dump_postings().unwrap();

    let full = run.run_full().unwrap();
    assert_eq!(full.processed, 2);
    assert_eq!(full.indexed, 2);
    assert_eq!(store.dump_postings().unwrap(), incremental);
}

#[test]
fn shutdown_leaves_queue_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("crawl.jsonl");
    fs::write(&file, JSONL).unwrap();
    let store = Store::temporary().unwrap();
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let summary = run_over(&store).import(&file, &rx).unwrap();
    assert_eq!(summary.imported, 2);
    assert_eq!(summary.processed, 0);
    assert_eq!(store.pending_ids().unwrap().len(), 2);
}
