//! Criterion microbenchmarks for esn-core verifiers.
//!
//! Run with: `cargo bench -p esn-core --features test-utils`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use esn_core::mpt::testing::TestTrie;
use esn_core::proof::ProofLimits;
use esn_core::signing::testing::TestSigner;
use esn_core::{
    build_inclusion_path, build_merkle_root, decode_transaction, keccak, recover_signer,
    rlp_encode_index, verify_bunch_inclusion, verify_trie_proof, DepositProofV1, Hash256,
};

fn leaves(n: usize) -> Vec<Hash256> {
    (0..n as u64).map(|i| keccak(i.to_be_bytes())).collect()
}

/// Mega root construction and inclusion checks across bunch depths.
fn bench_merkle(c: &mut Criterion) {
    let mut group = c.benchmark_group("merkle");

    for depth in [4u32, 8, 12] {
        let leaves = leaves(1 << depth);
        let root = build_merkle_root(&leaves).expect("root");
        let index = leaves.len() / 3;
        let path = build_inclusion_path(&leaves, index).expect("path");

        group.throughput(Throughput::Elements(leaves.len() as u64));
        group.bench_with_input(BenchmarkId::new("build_root", depth), &leaves, |b, leaves| {
            b.iter(|| build_merkle_root(black_box(leaves)));
        });
        group.bench_with_input(BenchmarkId::new("verify_inclusion", depth), &path, |b, path| {
            b.iter(|| {
                verify_bunch_inclusion(
                    black_box(&leaves[index]),
                    index as u64,
                    black_box(path),
                    &root,
                )
            });
        });
    }

    group.finish();
}

/// MPT proof verification for tries of typical block sizes.
fn bench_trie_proof(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpt");

    for count in [16usize, 128, 512] {
        let values: Vec<Vec<u8>> = (0..count)
            .map(|i| {
                let mut v = vec![0xf8; 120];
                v[..8].copy_from_slice(&(i as u64).to_be_bytes());
                v
            })
            .collect();
        let trie = TestTrie::from_indexed_values(&values);
        let root = trie.root();
        let key = rlp_encode_index((count / 2) as u64);
        let proof = trie.proof(&key);

        group.bench_function(BenchmarkId::new("verify", count), |b| {
            b.iter(|| verify_trie_proof(&root, &key, black_box(&values[count / 2]), &proof));
        });
    }

    group.finish();
}

/// Signer recovery and proof decoding.
fn bench_decode(c: &mut Criterion) {
    let signer = TestSigner::from_seed(1);
    let digest = keccak(b"bunch");
    let signature = signer.sign(&digest);

    let raw_tx = esn_core::tx::testing::sign_eip1559_transfer(
        &signer,
        1,
        0,
        [0x4c; 20],
        alloy_primitives::U256::from(1_000u64),
        &[],
    );
    let proof = DepositProofV1::new(
        1,
        rlp_encode_index(0),
        raw_tx.clone(),
        vec![vec![0xaa; 532]; 6],
        vec![0xbb; 300],
        vec![vec![0xcc; 532]; 6],
    )
    .to_bytes();
    let limits = ProofLimits::default();

    let mut group = c.benchmark_group("decode");
    group.bench_function("recover_signer", |b| {
        b.iter(|| recover_signer(black_box(&digest), black_box(&signature)));
    });
    group.bench_function("decode_eip1559", |b| {
        b.iter(|| decode_transaction(black_box(&raw_tx)));
    });
    group.throughput(Throughput::Bytes(proof.len() as u64));
    group.bench_function("deposit_proof", |b| {
        b.iter(|| DepositProofV1::from_bytes(black_box(&proof), &limits));
    });
    group.finish();
}

criterion_group!(benches, bench_merkle, bench_trie_proof, bench_decode);

criterion_main!(benches);
