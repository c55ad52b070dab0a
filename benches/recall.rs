//! Benchmarks for semantic recall over a populated store

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use phloem::embedding::{Embedder, LocalEmbedder};
use phloem::search::recall;
use phloem::storage::queries::{insert_memory, InsertMemory};
use phloem::storage::Store;
use phloem::types::{Cancellation, MemoryFilters};

fn populated_store(count: usize) -> (Store, LocalEmbedder) {
    let store = Store::open_in_memory().unwrap();
    let embedder = LocalEmbedder::default();

    for i in 0..count {
        let content = format!(
            "memory {} about {} and {}",
            i,
            ["auth", "deploys", "caching", "migrations"][i % 4],
            ["postgres", "sqlite", "redis", "kafka"][i % 4]
        );
        let embedding = embedder.embed(&content).unwrap();
        store
            .with_transaction(|conn| {
                insert_memory(
                    conn,
                    &InsertMemory {
                        content: content.clone(),
                        tags: vec![],
                        context: None,
                        scope: String::new(),
                        embedding: embedding.clone(),
                        model: "local-hash-v1".to_string(),
                    },
                )
            })
            .unwrap();
    }

    (store, embedder)
}

fn bench_recall(c: &mut Criterion) {
    for size in [100usize, 1000] {
        let (store, embedder) = populated_store(size);
        c.bench_function(&format!("recall_top10_of_{}", size), |b| {
            b.iter(|| {
                recall(
                    &store,
                    &embedder,
                    black_box("why did we pick postgres for auth"),
                    10,
                    &MemoryFilters::default(),
                    &Cancellation::none(),
                )
                .unwrap()
            });
        });
    }
}

criterion_group!(benches, bench_recall);
criterion_main!(benches);
