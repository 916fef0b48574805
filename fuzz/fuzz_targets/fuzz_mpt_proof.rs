#![no_main]
//! MPT proof verification must reject arbitrary proofs without panicking.

use arbitrary::{Arbitrary, Unstructured};
use esn_core::verify_trie_proof;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct FuzzMptInput {
    root: [u8; 32],
    key: Vec<u8>,
    value: Vec<u8>,
    proof_nodes: Vec<Vec<u8>>,
    // Pin the root to the first node so verification gets past the hash check.
    root_from_first_node: bool,
}

fuzz_target!(|data: &[u8]| {
    let mut u = Unstructured::new(data);
    let Ok(input) = FuzzMptInput::arbitrary(&mut u) else {
        return;
    };

    if input.proof_nodes.len() > 64 {
        return;
    }
    let total_bytes: usize = input.proof_nodes.iter().map(Vec::len).sum();
    if total_bytes > 128 * 1024 {
        return;
    }

    let root = match input.proof_nodes.first() {
        Some(first) if input.root_from_first_node => esn_core::keccak(first),
        _ => input.root,
    };
    let _ = verify_trie_proof(&root, &input.key, &input.value, &input.proof_nodes);
});
