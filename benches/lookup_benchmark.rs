//! Benchmarks for the local lookup path.
//!
//! Run with: cargo bench
//!
//! This benchmark suite measures:
//! - Prefix set lookups at different list sizes
//! - Rice decoding of a full list update
//! - URL pattern generation

use std::collections::BTreeSet;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use webrisk::api::RiceDeltaEncoding;
use webrisk::diff::decode_rice_integers;
use webrisk::urls::generate_patterns;
use webrisk::{HashPrefix, HashPrefixes, PrefixSet};

/// Generate about `count` distinct 4-byte prefixes plus a few full hashes.
fn generate_prefixes(count: usize) -> HashPrefixes {
    let unique: BTreeSet<HashPrefix> = (0..count)
        .map(|i| {
            let full = HashPrefix::from_pattern(&format!("host{}.example/path", i));
            let len = if i % 50 == 0 { 32 } else { 4 };
            full.truncate(len)
        })
        .collect();
    unique.into_iter().collect()
}

/// Generate full hashes to query, roughly `hit_ratio` of them listed.
fn generate_queries(count: usize, hit_ratio: f64) -> Vec<HashPrefix> {
    let hits = (count as f64 * hit_ratio) as usize;
    (0..count)
        .map(|i| {
            if i < hits {
                HashPrefix::from_pattern(&format!("host{}.example/path", i))
            } else {
                HashPrefix::from_pattern(&format!("miss{}.example/", i))
            }
        })
        .collect()
}

/// Rice-encode an ascending sequence with parameter `k`.
fn rice_encode(values: &[u32], k: u32) -> RiceDeltaEncoding {
    let mut data: Vec<u8> = Vec::new();
    let mut pos = 0usize;
    let mut push_bit = |bit: bool| {
        if pos % 8 == 0 {
            data.push(0);
        }
        if bit {
            let last = data.len() - 1;
            data[last] |= 1 << (pos % 8);
        }
        pos += 1;
    };
    for pair in values.windows(2) {
        let delta = (pair[1] - pair[0]) as u64;
        for _ in 0..(delta >> k) {
            push_bit(true);
        }
        push_bit(false);
        for i in 0..k {
            push_bit(delta & (1 << i) != 0);
        }
    }
    RiceDeltaEncoding {
        first_value: values[0] as u64,
        rice_parameter: k,
        entry_count: (values.len() - 1) as u32,
        encoded_data: data,
    }
}

fn bench_prefix_set_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("prefix_set_lookup");
    let queries = generate_queries(1000, 0.1);
    group.throughput(Throughput::Elements(queries.len() as u64));

    for size in [1_000, 100_000, 1_000_000] {
        let set = PrefixSet::import(&generate_prefixes(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &set, |b, set| {
            b.iter(|| {
                for q in &queries {
                    black_box(set.lookup(black_box(q.as_bytes())));
                }
            })
        });
    }
    group.finish();
}

fn bench_rice_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("rice_decode");

    for count in [10_000u32, 500_000] {
        let step = u32::MAX / count;
        let values: Vec<u32> = (0..count).map(|i| i * step + (i % 7)).collect();
        let encoded = rice_encode(&values, 28);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &encoded, |b, encoded| {
            b.iter(|| decode_rice_integers(black_box(encoded)).unwrap())
        });
    }
    group.finish();
}

fn bench_generate_patterns(c: &mut Criterion) {
    let urls = [
        "http://example.com/",
        "https://a.b.c.d.e.f.g.example.com/1/2/3/4/5/page.html?q=1",
        "http://%31%36%38%2e%31%38%38%2e%39%39%2e%32%36/%2E%73%65%63%75%72%65/",
    ];
    c.bench_function("generate_patterns", |b| {
        b.iter(|| {
            for url in &urls {
                black_box(generate_patterns(black_box(url)).unwrap());
            }
        })
    });
}

criterion_group!(
    benches,
    bench_prefix_set_lookup,
    bench_rice_decode,
    bench_generate_patterns
);
criterion_main!(benches);
