#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]
#![deny(clippy::cast_precision_loss)]
#![deny(clippy::cast_possible_truncation)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::cast_sign_loss)]

//! Core types and verifiers for the ETH <-> ESN relay.
//!
//! Everything in this crate is deterministic and free of I/O:
//!
//! - [`merkle`]: the power-of-two aggregation tree used for bunch mega roots
//! - [`mpt`]: Merkle-Patricia-Trie inclusion proofs for per-block tx/receipt roots
//! - [`tx`] / [`receipt`]: decoding of the raw values those proofs commit to
//! - [`signing`]: secp256k1 signer recovery and the bunch signing digest
//! - [`proof`]: the versioned RLP wire format of deposit and withdrawal proofs
//!
//! Stateful relay logic lives in `esn-bridge`; persistence in `esn-storage`.

pub mod error;
pub mod merkle;
pub mod mpt;
pub mod proof;
pub mod receipt;
pub(crate) mod rlp;
pub mod signing;
pub mod tx;
pub mod types;
pub mod validators;

pub use error::ErrorKind;
pub use merkle::{
    build_inclusion_path, build_merkle_root, compute_root_from_path, verify_bunch_inclusion,
    MerkleError, MAX_BUNCH_DEPTH,
};
pub use mpt::{rlp_encode_index, verify_trie_proof, TrieProofError};
pub use proof::{DepositProofV1, ProofCodecError, ProofLimits, WithdrawalProofV1};
pub use receipt::{
    decode_receipt, find_transfer, DecodedReceipt, Log, ReceiptDecodeError, ReceiptStatus,
    TransferEvent, TRANSFER_EVENT_TOPIC,
};
pub use signing::{
    address_from_public_key, recover_signer, BunchHeader, Signature65, SignatureError,
    SigningDomain,
};
pub use tx::{decode_transaction, DecodedTransaction, TxDecodeError, TxType};
pub use types::{Address, BlockHeaderRecord, Bunch, Hash256, ProposalKey};
pub use validators::{ValidatorSet, ValidatorSetError};

/// keccak256 of `data` as a plain byte array.
pub fn keccak(data: impl AsRef<[u8]>) -> Hash256 {
    alloy_primitives::keccak256(data).0
}
