//! Merkle-Patricia-Trie inclusion proofs.
//!
//! Verifies that `value` is stored at `key` in a trie committed to by `root`,
//! given the RLP-encoded nodes on the path (as returned by `eth_getProof` or
//! a block's tx/receipt trie). Nodes shorter than 32 bytes are embedded in
//! their parent and are resolved in place; every other reference must be
//! matched by the next proof node, in order.
//!
//! Verification fails closed: a hash mismatch, a diverging nibble path, a
//! missing child, a different terminal value or unused trailing proof nodes
//! all reject the proof.

use thiserror::Error;

use crate::keccak;
use crate::rlp::{decode_list, RlpItem};
use crate::types::Hash256;

/// Upper bound on nodes walked, independent of the proof length.
const MAX_TRIE_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrieProofError {
    #[error("empty proof")]
    EmptyProof,

    #[error("node {index} hash mismatch: expected {expected}, got {got}")]
    HashMismatch {
        index: usize,
        expected: String,
        got: String,
    },

    #[error("malformed node at depth {depth}: {reason}")]
    MalformedNode { depth: usize, reason: String },

    #[error("key path diverges at nibble {offset}")]
    PathMismatch { offset: usize },

    #[error("key not present in trie")]
    KeyNotFound,

    #[error("value mismatch")]
    ValueMismatch,

    #[error("proof ended before reaching the value")]
    ProofTooShort,

    #[error("{0} unused proof node(s) after the value")]
    UnusedNodes(usize),

    #[error("trie deeper than {0} nodes")]
    TooDeep(usize),
}

/// Reference from a parent node to a child.
#[derive(Debug, Clone, Copy)]
enum NodeRef<'a> {
    Hash(Hash256),
    Inline(&'a [u8]),
}

/// RLP encoding of an integer index, the key of tx and receipt tries.
pub fn rlp_encode_index(index: u64) -> Vec<u8> {
    alloy_rlp::encode(index)
}

/// Split bytes into high/low nibbles.
pub fn bytes_to_nibbles(bytes: &[u8]) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(bytes.len() * 2);
    for b in bytes {
        nibbles.push(b >> 4);
        nibbles.push(b & 0x0f);
    }
    nibbles
}

/// Decode a hex-prefix encoded path into `(nibbles, is_leaf)`.
pub fn hp_decode(encoded: &[u8]) -> Result<(Vec<u8>, bool), String> {
    let Some(&first) = encoded.first() else {
        return Err("empty path".to_string());
    };
    let flag = first >> 4;
    if flag > 3 {
        return Err(format!("invalid hex-prefix flag {flag}"));
    }
    let is_odd = flag & 0x01 != 0;
    let is_leaf = flag & 0x02 != 0;

    let mut nibbles = Vec::with_capacity(encoded.len() * 2);
    if is_odd {
        nibbles.push(first & 0x0f);
    } else if first & 0x0f != 0 {
        return Err("non-zero padding nibble in even path".to_string());
    }
    for &b in &encoded[1..] {
        nibbles.push(b >> 4);
        nibbles.push(b & 0x0f);
    }
    Ok((nibbles, is_leaf))
}

/// Encode nibbles with the hex-prefix flag.
pub fn hp_encode(nibbles: &[u8], is_leaf: bool) -> Vec<u8> {
    let flag: u8 = if is_leaf { 0x20 } else { 0x00 };
    let mut out = Vec::with_capacity(nibbles.len() / 2 + 1);
    let rest = if nibbles.len() % 2 == 1 {
        out.push(flag | 0x10 | (nibbles[0] & 0x0f));
        &nibbles[1..]
    } else {
        out.push(flag);
        nibbles
    };
    for pair in rest.chunks_exact(2) {
        out.push((pair[0] << 4) | (pair[1] & 0x0f));
    }
    out
}

fn malformed(depth: usize, reason: impl Into<String>) -> TrieProofError {
    TrieProofError::MalformedNode {
        depth,
        reason: reason.into(),
    }
}

fn child_ref<'a>(item: &RlpItem<'a>, depth: usize) -> Result<NodeRef<'a>, TrieProofError> {
    if item.list {
        if item.raw.len() >= 32 {
            return Err(malformed(depth, "embedded node of 32 bytes or more"));
        }
        return Ok(NodeRef::Inline(item.raw));
    }
    match item.payload.len() {
        0 => Err(TrieProofError::KeyNotFound),
        32 => {
            let mut hash = [0u8; 32];
            hash.copy_from_slice(item.payload);
            Ok(NodeRef::Hash(hash))
        }
        n => Err(malformed(depth, format!("child reference of {n} bytes"))),
    }
}

fn terminal_value<'a>(item: &RlpItem<'a>, depth: usize) -> Result<&'a [u8], TrieProofError> {
    if item.list {
        return Err(malformed(depth, "value is a list"));
    }
    Ok(item.payload)
}

/// Verify that `value` is stored under `key` in the trie with root `root`.
pub fn verify_trie_proof<N: AsRef<[u8]>>(
    root: &Hash256,
    key: &[u8],
    value: &[u8],
    proof: &[N],
) -> Result<(), TrieProofError> {
    if proof.is_empty() {
        return Err(TrieProofError::EmptyProof);
    }

    let nibbles = bytes_to_nibbles(key);
    let mut offset = 0usize;
    let mut next = NodeRef::Hash(*root);
    let mut consumed = 0usize;

    for depth in 0..MAX_TRIE_DEPTH {
        let node: &[u8] = match next {
            NodeRef::Hash(expected) => {
                let node = proof
                    .get(consumed)
                    .ok_or(TrieProofError::ProofTooShort)?
                    .as_ref();
                let got = keccak(node);
                if got != expected {
                    return Err(TrieProofError::HashMismatch {
                        index: consumed,
                        expected: hex::encode(expected),
                        got: hex::encode(got),
                    });
                }
                consumed += 1;
                node
            }
            NodeRef::Inline(raw) => raw,
        };

        let items = decode_list(node).map_err(|e| malformed(depth, e.to_string()))?;
        let found = match items.len() {
            17 => {
                if offset == nibbles.len() {
                    Some(terminal_value(&items[16], depth)?)
                } else {
                    let nibble = usize::from(nibbles[offset]);
                    offset += 1;
                    next = child_ref(&items[nibble], depth)?;
                    None
                }
            }
            2 => {
                if items[0].list {
                    return Err(malformed(depth, "path is a list"));
                }
                let (path, is_leaf) =
                    hp_decode(items[0].payload).map_err(|reason| malformed(depth, reason))?;
                let remaining = &nibbles[offset..];

                if is_leaf {
                    if path != remaining {
                        return Err(TrieProofError::PathMismatch { offset });
                    }
                    Some(terminal_value(&items[1], depth)?)
                } else {
                    if path.is_empty() {
                        return Err(malformed(depth, "extension with empty path"));
                    }
                    if !remaining.starts_with(&path) {
                        return Err(TrieProofError::PathMismatch { offset });
                    }
                    offset += path.len();
                    next = child_ref(&items[1], depth)?;
                    None
                }
            }
            n => return Err(malformed(depth, format!("node has {n} items"))),
        };

        if let Some(stored) = found {
            if stored.is_empty() {
                return Err(TrieProofError::KeyNotFound);
            }
            if stored != value {
                return Err(TrieProofError::ValueMismatch);
            }
            let unused = proof.len() - consumed;
            if unused > 0 {
                return Err(TrieProofError::UnusedNodes(unused));
            }
            return Ok(());
        }
    }

    Err(TrieProofError::TooDeep(MAX_TRIE_DEPTH))
}

/// Reference trie construction for fixtures and benches.
#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use alloy_rlp::Encodable;

    use super::{bytes_to_nibbles, hp_encode};
    use crate::keccak;
    use crate::rlp::encode_list_of_raw;
    use crate::types::Hash256;

    /// Trie built from `(key, value)` pairs, able to emit inclusion proofs.
    #[derive(Debug, Clone)]
    pub struct TestTrie {
        entries: Vec<(Vec<u8>, Vec<u8>)>,
    }

    impl TestTrie {
        /// Keys must be unique; values must be non-empty.
        pub fn new(mut entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
            entries.sort();
            entries.dedup_by(|a, b| a.0 == b.0);
            Self { entries }
        }

        /// Trie whose keys are `rlp(index)`, like a block's tx/receipt trie.
        pub fn from_indexed_values(values: &[Vec<u8>]) -> Self {
            let entries = values
                .iter()
                .enumerate()
                .map(|(i, v)| (super::rlp_encode_index(i as u64), v.clone()))
                .collect();
            Self::new(entries)
        }

        pub fn root(&self) -> Hash256 {
            keccak(self.root_node(None, &mut Vec::new()))
        }

        /// Proof nodes for `key`, root first.
        pub fn proof(&self, key: &[u8]) -> Vec<Vec<u8>> {
            let mut collected = Vec::new();
            let root = self.root_node(Some(key), &mut collected);
            // Deepest node was pushed first; hashed children only, plus the root.
            let mut proof: Vec<Vec<u8>> = collected
                .into_iter()
                .filter(|node| node.len() >= 32)
                .collect();
            proof.reverse();
            if proof.first() != Some(&root) {
                proof.insert(0, root);
            }
            proof
        }

        fn root_node(&self, target: Option<&[u8]>, proof: &mut Vec<Vec<u8>>) -> Vec<u8> {
            let nibbled: Vec<(Vec<u8>, &[u8])> = self
                .entries
                .iter()
                .map(|(k, v)| (bytes_to_nibbles(k), v.as_slice()))
                .collect();
            let refs: Vec<(&[u8], &[u8])> =
                nibbled.iter().map(|(k, v)| (k.as_slice(), *v)).collect();
            let target = target.map(bytes_to_nibbles);
            if refs.is_empty() {
                // Empty trie: rlp("").
                return vec![0x80];
            }
            build_node(&refs, target.as_deref(), proof)
        }
    }

    fn encode_bytes(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        data.encode(&mut out);
        out
    }

    /// Child reference: embedded when shorter than 32 bytes, otherwise the hash.
    fn reference(node: Vec<u8>) -> Vec<u8> {
        if node.len() < 32 {
            node
        } else {
            encode_bytes(&keccak(&node))
        }
    }

    fn common_prefix_len(entries: &[(&[u8], &[u8])]) -> usize {
        let first = entries[0].0;
        let mut len = first.len();
        for (key, _) in &entries[1..] {
            len = len.min(
                first
                    .iter()
                    .zip(key.iter())
                    .take_while(|(a, b)| a == b)
                    .count(),
            );
        }
        len
    }

    fn build_node(
        entries: &[(&[u8], &[u8])],
        target: Option<&[u8]>,
        proof: &mut Vec<Vec<u8>>,
    ) -> Vec<u8> {
        let node = if entries.len() == 1 {
            let (key, value) = entries[0];
            let path = encode_bytes(&hp_encode(key, true));
            let value = encode_bytes(value);
            encode_list_of_raw([path.as_slice(), value.as_slice()])
        } else {
            let prefix = common_prefix_len(entries);
            if prefix > 0 {
                let stripped: Vec<(&[u8], &[u8])> =
                    entries.iter().map(|(k, v)| (&k[prefix..], *v)).collect();
                let child_target = target
                    .filter(|t| t.len() >= prefix && t[..prefix] == entries[0].0[..prefix])
                    .map(|t| &t[prefix..]);
                let child = build_node(&stripped, child_target, proof);
                let path = encode_bytes(&hp_encode(&entries[0].0[..prefix], false));
                let child = reference(child);
                encode_list_of_raw([path.as_slice(), child.as_slice()])
            } else {
                let mut slots: Vec<Vec<u8>> = Vec::with_capacity(17);
                for nibble in 0u8..16 {
                    let group: Vec<(&[u8], &[u8])> = entries
                        .iter()
                        .filter(|(k, _)| k.first() == Some(&nibble))
                        .map(|(k, v)| (&k[1..], *v))
                        .collect();
                    if group.is_empty() {
                        slots.push(vec![0x80]);
                        continue;
                    }
                    let child_target = target
                        .filter(|t| t.first() == Some(&nibble))
                        .map(|t| &t[1..]);
                    slots.push(reference(build_node(&group, child_target, proof)));
                }
                let value = entries
                    .iter()
                    .find(|(k, _)| k.is_empty())
                    .map(|(_, v)| encode_bytes(v))
                    .unwrap_or_else(|| vec![0x80]);
                slots.push(value);
                encode_list_of_raw(slots.iter().map(Vec::as_slice))
            }
        };
        if target.is_some() {
            proof.push(node.clone());
        }
        node
    }
}
