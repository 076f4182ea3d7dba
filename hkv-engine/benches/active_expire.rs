//! Benchmarks the bounded active-expiration sweep (`spec.md` §4.7) across a
//! keyspace with many hashes, each carrying one field due to expire.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hkv_engine::{Db, HfeConfig};

fn populate(db: &mut Db, count: usize) {
    for i in 0..count {
        let key = format!("k{i}");
        db.set(key.as_bytes(), b"f", b"v", false);
        db.hexpire(key.as_bytes(), &[b"f"], 1, hkv_engine::listpack::ExpireCondition::None, 0)
            .unwrap();
    }
}

fn bench_active_expire(c: &mut Criterion) {
    c.bench_function("active_expire_10k_hashes", |b| {
        b.iter_batched(
            || {
                let mut db = Db::new(0, HfeConfig::default());
                populate(&mut db, 10_000);
                db
            },
            |mut db| {
                black_box(db.active_expire(10_000, usize::MAX));
            },
            criterion::BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, bench_active_expire);
criterion_main!(benches);
