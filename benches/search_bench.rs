//! Benchmarks for StashKV lookups

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use stashkv::{build_dict, DataReader, Hashtable, SliceReader};

const ITEMS: usize = 100_000;
const BATCH: usize = 1024;

fn build_table() -> (Hashtable, Vec<Vec<u8>>) {
    let keys: Vec<Vec<u8>> = (0..ITEMS as u64).map(|i| i.to_le_bytes().to_vec()).collect();
    let vals: Vec<Vec<u8>> = (0..ITEMS as u64).map(|i| (i * 7).to_le_bytes().to_vec()).collect();
    let key_refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
    let val_refs: Vec<&[u8]> = vals.iter().map(|v| v.as_slice()).collect();
    let mut inputs: Vec<Box<dyn DataReader + Send + '_>> =
        vec![Box::new(SliceReader::new(&key_refs, &val_refs))];
    let mut sink: Vec<u8> = Vec::new();
    build_dict(&mut inputs, &mut sink).unwrap();
    (Hashtable::from_bytes(sink).unwrap(), keys)
}

fn lookup_benchmarks(c: &mut Criterion) {
    let (table, keys) = build_table();

    let mut group = c.benchmark_group("lookup");
    group.throughput(Throughput::Elements(1));
    group.bench_function("search_hit", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 7919) % ITEMS;
            black_box(table.search(&keys[i]))
        })
    });
    group.bench_function("search_miss", |b| {
        let absent = (ITEMS as u64 + 1).to_le_bytes();
        b.iter(|| black_box(table.search(&absent)))
    });
    group.finish();

    let mut group = c.benchmark_group("batched");
    group.throughput(Throughput::Elements(BATCH as u64));
    let queries: Vec<&[u8]> = keys.iter().take(BATCH).map(|k| k.as_slice()).collect();
    group.bench_function("batch_search", |b| {
        let mut out: Vec<Option<&[u8]>> = vec![None; BATCH];
        b.iter(|| black_box(table.batch_search(&queries, &mut out, None)))
    });
    let packed: Vec<u8> = queries.iter().flat_map(|k| k.iter().copied()).collect();
    group.bench_function("batch_fetch", |b| {
        let mut data = vec![0u8; BATCH * 8];
        b.iter(|| black_box(table.batch_fetch(&packed, &mut data, None, None)))
    });
    group.finish();
}

criterion_group!(benches, lookup_benchmarks);
criterion_main!(benches);
