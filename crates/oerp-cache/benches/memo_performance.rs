use criterion::{black_box, criterion_group, criterion_main, Criterion};
use oerp_cache::{Cache, CacheConfig};

fn bench_memo_lookups(c: &mut Criterion) {
    let cache = Cache::new(CacheConfig::default().unlimited_entries());
    for i in 0..1000 {
        cache.put("bench", "ir.translation.get", &format!("key_{}", i), &i);
    }

    c.bench_function("memo_hit", |b| {
        b.iter(|| {
            let value: Option<i32> = cache.get("bench", "ir.translation.get", black_box("key_500"));
            black_box(value)
        })
    });

    c.bench_function("memo_invalidate_tag", |b| {
        cache.bind("ir.translation", "ir.translation.get");
        b.iter(|| {
            cache.put("bench", "ir.translation.get", "key", &1);
            black_box(cache.invalidate_tag("bench", "ir.translation"))
        })
    });
}

criterion_group!(benches, bench_memo_lookups);
criterion_main!(benches);
