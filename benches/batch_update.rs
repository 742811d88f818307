use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use unitree_db::{HashAlgorithm, MemoryNodeStore, SparseMerkleTrie};

const BASE_SIZE: usize = 10_000;
const BATCH_SIZES: [usize; 3] = [10, 100, 1_000];

fn pairs(range: std::ops::Range<usize>) -> Vec<(String, String)> {
    range
        .map(|i| (format!("key-{i}"), format!("value-{i}")))
        .collect()
}

fn committed_trie(size: usize, hash: HashAlgorithm) -> SparseMerkleTrie {
    let store = Arc::new(MemoryNodeStore::new());
    let mut trie = SparseMerkleTrie::new(store, hash.hasher());
    trie.atomic_update(&pairs(0..size)).unwrap();
    trie.commit().unwrap();
    trie
}

fn batch_update_benches(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_update");

    for &batch in BATCH_SIZES.iter() {
        let writes = pairs(BASE_SIZE..BASE_SIZE + batch);
        group.bench_with_input(BenchmarkId::new("atomic_update", batch), &writes, |b, writes| {
            let mut trie = committed_trie(BASE_SIZE, HashAlgorithm::Sha256);
            let base = trie.root();
            b.iter(|| {
                black_box(trie.atomic_update(writes).unwrap());
                trie.revert(base).unwrap();
            });
        });
    }

    for hash in [HashAlgorithm::Sha256, HashAlgorithm::Blake2b, HashAlgorithm::Blake3] {
        let writes = pairs(BASE_SIZE..BASE_SIZE + 100);
        group.bench_with_input(BenchmarkId::new("hash", hash.name()), &writes, |b, writes| {
            let mut trie = committed_trie(1_000, hash);
            let base = trie.root();
            b.iter(|| {
                black_box(trie.update(writes).unwrap());
                trie.revert(base).unwrap();
            });
        });
    }

    group.finish();
}

fn proof_benches(c: &mut Criterion) {
    let mut group = c.benchmark_group("proofs");
    let mut trie = committed_trie(BASE_SIZE, HashAlgorithm::Sha256);

    group.bench_function("merkle_proof", |b| {
        b.iter(|| black_box(trie.merkle_proof(b"key-4242").unwrap()));
    });

    group.bench_function("merkle_proof_compressed", |b| {
        b.iter(|| black_box(trie.merkle_proof_compressed(b"key-4242").unwrap()));
    });

    let proof = trie.merkle_proof(b"key-4242").unwrap();
    group.bench_function("verify_inclusion", |b| {
        b.iter(|| {
            black_box(
                trie.verify_inclusion(&proof, b"key-4242", b"value-4242")
                    .unwrap(),
            )
        });
    });

    group.finish();
}

criterion_group!(benches, batch_update_benches, proof_benches);
criterion_main!(benches);
