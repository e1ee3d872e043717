use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use linked_handle_map::{Handle, LinkedHandleMap};
use std::time::Duration;

type Map = LinkedHandleMap<String, u64>;

fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
    std::iter::from_fn(move || {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        Some(s)
    })
}

fn key(n: u64) -> String {
    format!("k{:016x}", n)
}

fn filled(seed: u64, n: usize) -> (Map, Vec<Handle>) {
    let mut m = Map::new();
    let handles = lcg(seed)
        .take(n)
        .enumerate()
        .map(|(i, x)| m.emplace_back(key(x), i as u64).unwrap().0)
        .collect();
    (m, handles)
}

// 10k picks out of `handles`, repeats allowed.
fn pick(handles: &[Handle]) -> Vec<Handle> {
    let n = handles.len();
    let mut s = 0x9e3779b97f4a7c15u64;
    (0..10_000)
        .map(|_| {
            s = s.wrapping_mul(2862933555777941757).wrapping_add(3037000493);
            handles[(s as usize) % n]
        })
        .collect()
}

fn bench_emplace_back_100k(c: &mut Criterion) {
    c.bench_function("linked::emplace_back_fresh_100k", |b| {
        b.iter_batched(
            Map::new,
            |mut m| {
                for (i, x) in lcg(1).take(100_000).enumerate() {
                    let _ = m.emplace_back(key(x), i as u64).unwrap();
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("linked::emplace_front_reserved_100k", |b| {
        b.iter_batched(
            || {
                let mut m = Map::new();
                m.reserve(100_000);
                m
            },
            |mut m| {
                for (i, x) in lcg(2).take(100_000).enumerate() {
                    let _ = m.emplace_front(key(x), i as u64).unwrap();
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_find_hit_10k(c: &mut Criterion) {
    c.bench_function("linked::find_hit_10k_on_100k", |b| {
        let (m, handles) = filled(7, 100_000);
        let queries: Vec<String> = pick(&handles)
            .into_iter()
            .map(|h| h.key(&m).unwrap().clone())
            .collect();
        b.iter(|| {
            for k in &queries {
                black_box(m.find(k));
            }
        })
    });
}

fn bench_bump_front_10k(c: &mut Criterion) {
    c.bench_function("linked::bump_front_10k_on_100k", |b| {
        b.iter_batched(
            || {
                let (m, handles) = filled(123, 100_000);
                let targets = pick(&handles);
                (m, targets)
            },
            |(mut m, targets)| {
                for h in targets {
                    m.bump_front(h);
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_lru_touch_or_evict(c: &mut Criterion) {
    c.bench_function("linked::lru_touch_or_evict_100k_cap_10k", |b| {
        b.iter_batched(
            Map::new,
            |mut m| {
                for x in lcg(42).take(100_000) {
                    let k = key(x % 20_000);
                    match m.find(&k) {
                        Some(h) => {
                            m.bump_front(h);
                        }
                        None => {
                            if m.len() == 10_000 {
                                m.pop_back();
                            }
                            let _ = m.emplace_front(k, x).unwrap();
                        }
                    }
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_erase_random_10k(c: &mut Criterion) {
    c.bench_function("linked::erase_random_10k_of_110k", |b| {
        b.iter_batched(
            || {
                let (m, handles) = filled(5, 110_000);
                let targets = pick(&handles);
                (m, targets)
            },
            |(mut m, targets)| {
                // Repeated picks hit stale handles, which are no-ops.
                for h in targets {
                    let _ = m.erase(h);
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_iter_all_100k(c: &mut Criterion) {
    c.bench_function("linked::iter_all_100k", |b| {
        let (m, _) = filled(999, 100_000);
        b.iter(|| {
            let mut sum = 0u64;
            for (_h, _k, v) in m.iter() {
                sum = sum.wrapping_add(*v);
            }
            black_box(sum)
        })
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(12)
        .measurement_time(Duration::from_secs(5))
        .warm_up_time(Duration::from_secs(1))
}

criterion_group! {
    name = benches_insert;
    config = bench_config();
    targets = bench_emplace_back_100k
}
criterion_group! {
    name = benches_ops;
    config = bench_config();
    targets = bench_find_hit_10k,
              bench_bump_front_10k,
              bench_lru_touch_or_evict,
              bench_erase_random_10k,
              bench_iter_all_100k
}
criterion_main!(benches_insert, benches_ops);
