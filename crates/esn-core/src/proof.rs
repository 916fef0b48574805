//! Versioned RLP wire format of claim proofs.
//!
//! Both proofs are a single RLP list whose first item is the format version.
//! Decoding is a fixed step that runs before any semantic check: size limits
//! are applied to the raw bytes, the version is read, then the whole tuple is
//! decoded and trailing bytes are rejected.
//!
//! ```text
//! deposit    = [1, blockNumber, txPathKey, rawTransaction, [txProofNode..],
//!               rawReceipt, [receiptProofNode..]]
//! withdrawal = [1, bunchIndex, blockNumber, [sibling..], perBlockTxRoot,
//!               rawTransaction, txPathKey, [txProofNode..]]
//! ```

use alloy_primitives::{Bytes, B256};
use alloy_rlp::{Decodable, Encodable, Header, RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::merkle::MAX_BUNCH_DEPTH;
use crate::types::Hash256;

/// Current proof format.
pub const PROOF_VERSION_V1: u8 = 1;

/// Maximum encoded proof size (512 KiB).
pub const MAX_PROOF_BYTES: usize = 512 * 1024;
/// Maximum number of trie nodes per proof.
pub const MAX_PROOF_NODES: usize = 64;
/// Maximum total size of the trie nodes of one proof (128 KiB).
pub const MAX_PROOF_NODES_BYTES: usize = 128 * 1024;
/// Maximum size of a raw transaction inside a proof (128 KiB).
pub const MAX_RAW_TX_BYTES: usize = 128 * 1024;
/// Maximum size of a raw receipt inside a proof (256 KiB).
pub const MAX_RAW_RECEIPT_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProofCodecError {
    #[error("malformed proof: {0}")]
    Malformed(String),

    #[error("unsupported proof version {0}")]
    UnsupportedVersion(u8),

    #[error("{what} {got} exceeds limit {limit}")]
    LimitExceeded {
        what: &'static str,
        got: usize,
        limit: usize,
    },
}

impl From<alloy_rlp::Error> for ProofCodecError {
    fn from(e: alloy_rlp::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

/// Resource bounds applied to a decoded proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProofLimits {
    pub max_proof_bytes: usize,
    /// Per trie, not per proof.
    pub max_proof_nodes: usize,
    /// Sum over the nodes of one trie.
    pub max_proof_nodes_bytes: usize,
    pub max_raw_tx_bytes: usize,
    pub max_raw_receipt_bytes: usize,
    pub max_bunch_depth: u8,
}

impl Default for ProofLimits {
    fn default() -> Self {
        Self {
            max_proof_bytes: MAX_PROOF_BYTES,
            max_proof_nodes: MAX_PROOF_NODES,
            max_proof_nodes_bytes: MAX_PROOF_NODES_BYTES,
            max_raw_tx_bytes: MAX_RAW_TX_BYTES,
            max_raw_receipt_bytes: MAX_RAW_RECEIPT_BYTES,
            max_bunch_depth: MAX_BUNCH_DEPTH,
        }
    }
}

impl ProofLimits {
    fn check(what: &'static str, got: usize, limit: usize) -> Result<(), ProofCodecError> {
        if got > limit {
            return Err(ProofCodecError::LimitExceeded { what, got, limit });
        }
        Ok(())
    }

    fn check_encoded(&self, bytes: &[u8]) -> Result<(), ProofCodecError> {
        Self::check("proof bytes", bytes.len(), self.max_proof_bytes)
    }

    fn check_nodes(&self, nodes: &[Bytes]) -> Result<(), ProofCodecError> {
        Self::check("proof nodes", nodes.len(), self.max_proof_nodes)?;
        let total: usize = nodes.iter().map(|node| node.len()).sum();
        Self::check("proof node bytes", total, self.max_proof_nodes_bytes)
    }

    fn check_raw_tx(&self, raw: &[u8]) -> Result<(), ProofCodecError> {
        Self::check("raw transaction bytes", raw.len(), self.max_raw_tx_bytes)
    }

    fn check_raw_receipt(&self, raw: &[u8]) -> Result<(), ProofCodecError> {
        Self::check("raw receipt bytes", raw.len(), self.max_raw_receipt_bytes)
    }
}

/// Read the version without decoding the rest of the tuple.
pub fn peek_version(bytes: &[u8]) -> Result<u8, ProofCodecError> {
    let mut buf = bytes;
    let header = Header::decode(&mut buf)?;
    if !header.list {
        return Err(ProofCodecError::Malformed("expected list".to_string()));
    }
    Ok(u8::decode(&mut buf)?)
}

fn decode_exact<T: Decodable>(bytes: &[u8]) -> Result<T, ProofCodecError> {
    let version = peek_version(bytes)?;
    if version != PROOF_VERSION_V1 {
        return Err(ProofCodecError::UnsupportedVersion(version));
    }
    let mut buf = bytes;
    let decoded = T::decode(&mut buf)?;
    if !buf.is_empty() {
        return Err(ProofCodecError::Malformed(format!(
            "{} trailing bytes",
            buf.len()
        )));
    }
    Ok(decoded)
}

fn encode_to_vec<T: Encodable>(value: &T) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.length());
    value.encode(&mut out);
    out
}

/// Proof that a transaction and its receipt sit in a finalized ETH block.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct DepositProofV1 {
    pub version: u8,
    pub block_number: u64,
    pub tx_path_key: Bytes,
    pub raw_transaction: Bytes,
    pub tx_proof_nodes: Vec<Bytes>,
    pub raw_receipt: Bytes,
    pub receipt_proof_nodes: Vec<Bytes>,
}

impl DepositProofV1 {
    pub fn new(
        block_number: u64,
        tx_path_key: Vec<u8>,
        raw_transaction: Vec<u8>,
        tx_proof_nodes: Vec<Vec<u8>>,
        raw_receipt: Vec<u8>,
        receipt_proof_nodes: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            version: PROOF_VERSION_V1,
            block_number,
            tx_path_key: tx_path_key.into(),
            raw_transaction: raw_transaction.into(),
            tx_proof_nodes: tx_proof_nodes.into_iter().map(Bytes::from).collect(),
            raw_receipt: raw_receipt.into(),
            receipt_proof_nodes: receipt_proof_nodes.into_iter().map(Bytes::from).collect(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode_to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8], limits: &ProofLimits) -> Result<Self, ProofCodecError> {
        limits.check_encoded(bytes)?;
        let proof: Self = decode_exact(bytes)?;
        limits.check_raw_tx(&proof.raw_transaction)?;
        limits.check_raw_receipt(&proof.raw_receipt)?;
        limits.check_nodes(&proof.tx_proof_nodes)?;
        limits.check_nodes(&proof.receipt_proof_nodes)?;
        Ok(proof)
    }
}

/// Proof that a transaction sits in an ESN block covered by a posted bunch.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct WithdrawalProofV1 {
    pub version: u8,
    pub bunch_index: u64,
    pub block_number: u64,
    pub block_in_bunch_siblings: Vec<B256>,
    pub per_block_tx_root: B256,
    pub raw_transaction: Bytes,
    pub tx_path_key: Bytes,
    pub tx_proof_nodes: Vec<Bytes>,
}

impl WithdrawalProofV1 {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bunch_index: u64,
        block_number: u64,
        block_in_bunch_siblings: Vec<Hash256>,
        per_block_tx_root: Hash256,
        raw_transaction: Vec<u8>,
        tx_path_key: Vec<u8>,
        tx_proof_nodes: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            version: PROOF_VERSION_V1,
            bunch_index,
            block_number,
            block_in_bunch_siblings: block_in_bunch_siblings.into_iter().map(B256::from).collect(),
            per_block_tx_root: B256::from(per_block_tx_root),
            raw_transaction: raw_transaction.into(),
            tx_path_key: tx_path_key.into(),
            tx_proof_nodes: tx_proof_nodes.into_iter().map(Bytes::from).collect(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode_to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8], limits: &ProofLimits) -> Result<Self, ProofCodecError> {
        limits.check_encoded(bytes)?;
        let proof: Self = decode_exact(bytes)?;
        ProofLimits::check(
            "bunch siblings",
            proof.block_in_bunch_siblings.len(),
            usize::from(limits.max_bunch_depth),
        )?;
        limits.check_raw_tx(&proof.raw_transaction)?;
        limits.check_nodes(&proof.tx_proof_nodes)?;
        Ok(proof)
    }

    pub fn siblings(&self) -> Vec<Hash256> {
        self.block_in_bunch_siblings.iter().map(|h| h.0).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deposit() -> DepositProofV1 {
        DepositProofV1::new(
            42,
            vec![0x80],
            vec![0xc1, 0x01],
            vec![vec![0xaa; 40], vec![0xbb; 3]],
            vec![0x02, 0xc0],
            vec![vec![0xcc; 33]],
        )
    }

    fn withdrawal() -> WithdrawalProofV1 {
        WithdrawalProofV1::new(
            3,
            17,
            vec![[0x01; 32], [0x02; 32]],
            [0x03; 32],
            vec![0xc0],
            vec![0x01],
            vec![vec![0xdd; 50]],
        )
    }

    #[test]
    fn deposit_roundtrip() {
        let proof = deposit();
        let bytes = proof.to_bytes();
        assert_eq!(peek_version(&bytes).unwrap(), PROOF_VERSION_V1);
        assert_eq!(DepositProofV1::from_bytes(&bytes, &ProofLimits::default()).unwrap(), proof);
    }

    #[test]
    fn withdrawal_roundtrip() {
        let proof = withdrawal();
        let bytes = proof.to_bytes();
        let back = WithdrawalProofV1::from_bytes(&bytes, &ProofLimits::default()).unwrap();
        assert_eq!(back, proof);
        assert_eq!(back.siblings(), vec![[0x01; 32], [0x02; 32]]);
    }

    #[test]
    fn unknown_version_rejected() {
        let mut proof = deposit();
        proof.version = 2;
        assert_eq!(
            DepositProofV1::from_bytes(&proof.to_bytes(), &ProofLimits::default()),
            Err(ProofCodecError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = deposit().to_bytes();
        bytes.push(0x00);
        assert!(matches!(
            DepositProofV1::from_bytes(&bytes, &ProofLimits::default()),
            Err(ProofCodecError::Malformed(_))
        ));
    }

    #[test]
    fn wrong_shape_is_malformed_not_panic() {
        let bytes = deposit().to_bytes();
        assert!(matches!(
            WithdrawalProofV1::from_bytes(&bytes, &ProofLimits::default()),
            Err(ProofCodecError::Malformed(_))
        ));
        for cut in [0, 1, 5, bytes.len() / 2, bytes.len() - 1] {
            assert!(DepositProofV1::from_bytes(&bytes[..cut], &ProofLimits::default()).is_err());
        }
        assert!(DepositProofV1::from_bytes(&[0x83, 1, 2, 3], &ProofLimits::default()).is_err());
    }

    #[test]
    fn limits_enforced() {
        let bytes = deposit().to_bytes();
        let tight = ProofLimits {
            max_proof_nodes: 1,
            ..ProofLimits::default()
        };
        assert!(matches!(
            DepositProofV1::from_bytes(&bytes, &tight),
            Err(ProofCodecError::LimitExceeded { what: "proof nodes", got: 2, limit: 1 })
        ));

        let tiny = ProofLimits {
            max_proof_bytes: 10,
            ..ProofLimits::default()
        };
        assert!(matches!(
            DepositProofV1::from_bytes(&bytes, &tiny),
            Err(ProofCodecError::LimitExceeded { what: "proof bytes", .. })
        ));

        let shallow = ProofLimits {
            max_bunch_depth: 1,
            ..ProofLimits::default()
        };
        assert!(matches!(
            WithdrawalProofV1::from_bytes(&withdrawal().to_bytes(), &shallow),
            Err(ProofCodecError::LimitExceeded { what: "bunch siblings", .. })
        ));
    }

    #[test]
    fn raw_payload_limits_enforced() {
        let limits = ProofLimits {
            max_raw_tx_bytes: 64,
            max_raw_receipt_bytes: 64,
            ..ProofLimits::default()
        };

        let mut proof = deposit();
        proof.raw_transaction = vec![0xc0; 64].into();
        proof.raw_receipt = vec![0xc0; 64].into();
        assert!(DepositProofV1::from_bytes(&proof.to_bytes(), &limits).is_ok());

        proof.raw_transaction = vec![0xc0; 65].into();
        assert_eq!(
            DepositProofV1::from_bytes(&proof.to_bytes(), &limits),
            Err(ProofCodecError::LimitExceeded {
                what: "raw transaction bytes",
                got: 65,
                limit: 64
            })
        );

        let mut proof = deposit();
        proof.raw_receipt = vec![0xc0; 65].into();
        assert_eq!(
            DepositProofV1::from_bytes(&proof.to_bytes(), &limits),
            Err(ProofCodecError::LimitExceeded {
                what: "raw receipt bytes",
                got: 65,
                limit: 64
            })
        );

        let mut proof = withdrawal();
        proof.raw_transaction = vec![0xc0; 65].into();
        assert!(matches!(
            WithdrawalProofV1::from_bytes(&proof.to_bytes(), &limits),
            Err(ProofCodecError::LimitExceeded { what: "raw transaction bytes", .. })
        ));
    }
}
