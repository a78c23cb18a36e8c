use anyhow::Result;

use ilkley::btree::Ilkley;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{rng, Rng};

const TEST_DB: &str = "bench";

// Utility function for creating a database to use with benchmarks
async fn create_database(entries: usize) -> Result<Ilkley<usize, String>> {
    let db = Ilkley::try_new(TEST_DB, 16).await?;

    for i in 0..entries {
        let _ = db.insert(i, format!("value_{i}")).await;
    }

    Ok(db)
}

fn cleanup() {
    let _ = std::fs::remove_file("bench.data");
    let _ = std::fs::remove_file("bench.log");
}

fn ilkley_get(c: &mut Criterion) {
    cleanup();
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("get");
    for size in [256, 1024, 4096, 8192].iter() {
        let db = rt
            .block_on(async { create_database(*size).await })
            .expect("creates database");
        group.bench_with_input(BenchmarkId::new("ilkley get", size), size, |b, size| {
            b.to_async(tokio::runtime::Runtime::new().expect("build tokio runtime"))
                .iter(|| async {
                    let key = rng().random_range(0..*size);
                    let _ = db.get(&key).await;
                })
        });
        rt.block_on(async { db.close().await }).expect("closes");
        cleanup();
    }
    group.finish();
}

fn ilkley_upsert(c: &mut Criterion) {
    cleanup();
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("upsert");
    for size in [256, 1024, 4096, 8192].iter() {
        let db = rt
            .block_on(async { create_database(*size).await })
            .expect("creates database");
        group.bench_with_input(BenchmarkId::new("ilkley upsert", size), size, |b, size| {
            b.to_async(tokio::runtime::Runtime::new().expect("build tokio runtime"))
                .iter(|| async {
                    let key = rng().random_range(0..*size);
                    let _ = db.insert(key, "replacement".to_string()).await;
                })
        });
        rt.block_on(async { db.close().await }).expect("closes");
        cleanup();
    }
    group.finish();
}

fn ilkley_browse(c: &mut Criterion) {
    cleanup();
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("browse");
    for size in [256, 1024, 4096].iter() {
        let db = rt
            .block_on(async { create_database(*size).await })
            .expect("creates database");
        group.bench_with_input(BenchmarkId::new("ilkley browse", size), size, |b, size| {
            b.to_async(tokio::runtime::Runtime::new().expect("build tokio runtime"))
                .iter(|| async {
                    let count = db.browse().await.count();
                    assert_eq!(count, *size);
                })
        });
        rt.block_on(async { db.close().await }).expect("closes");
        cleanup();
    }
    group.finish();
}

criterion_group!(benches, ilkley_get, ilkley_upsert, ilkley_browse);
criterion_main!(benches);
