use criterion::{criterion_group, criterion_main, Criterion};
use lexi_core::dictionary::{Dictionary, DictionaryEntry, Origin};
use lexi_core::segmenter::Segmenter;
use std::sync::Arc;

const TEXT: &str = "Go 语言的并发模型基于 goroutine 和 channel，研究生命周期管理是并发编程的核心问题。";

fn bench_segment(c: &mut Criterion) {
    let words = ["语言", "并发", "模型", "并发模型", "研究", "研究生", "生命", "生命周期", "管理", "编程", "核心", "问题"];
    let dict = Dictionary::from_entries(
        words.iter().map(|w| DictionaryEntry {
            term: w.to_string(),
            weight: 1.0,
            origin: Origin::General,
        }),
    );
    let seg = Segmenter::new(Arc::new(dict));
    let text = TEXT.repeat(64);
    c.bench_function("segment_mixed_text", |b| b.iter(|| seg.segment(&text)));
    c.bench_function("terms_mixed_text", |b| b.iter(|| seg.terms(&text)));
}

criterion_group!(benches, bench_segment);
criterion_main!(benches);
