//! Withdrawal claims: value locked on ESN, released on ETH.
//!
//! The proof ties a native value transfer into the ESN lock address to a
//! block covered by a posted bunch: first the block's transactions root up
//! to the bunch's mega root, then the transaction down to that root.

use alloy_primitives::U256;
use esn_core::{
    decode_transaction, verify_bunch_inclusion, verify_trie_proof, Address, ErrorKind, Hash256,
    MerkleError, ProofCodecError, ProofLimits, TrieProofError, TxDecodeError, WithdrawalProofV1,
};
use esn_storage::{BunchStore, BunchStoreError, ClaimDirection, ClaimStore, ClaimStoreError, ProcessedClaim};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::events::WithdrawalClaimed;
use crate::ledger::{LedgerError, ReleaseLedger};

#[derive(Debug, Error)]
pub enum WithdrawalClaimError {
    #[error("malformed proof: {0}")]
    MalformedProof(#[from] ProofCodecError),

    #[error("unknown bunch {0}")]
    UnknownBunch(u64),

    #[error("block {block_number} not in bunch {bunch_index}")]
    BlockOutOfRange { bunch_index: u64, block_number: u64 },

    #[error("expected {expected} bunch siblings, got {got}")]
    SiblingCount { expected: usize, got: usize },

    #[error("block not in bunch: {0}")]
    NotInBunch(#[source] MerkleError),

    #[error("invalid tx proof: {0}")]
    InvalidTxProof(#[source] TrieProofError),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(#[from] TxDecodeError),

    #[error("transaction does not pay the lock address")]
    NotToLockAddress,

    #[error("zero-value transfer")]
    ZeroValue,

    #[error("transaction chain id {got:?} does not match {expected}")]
    ChainIdMismatch { expected: u64, got: Option<u64> },

    #[error("withdrawal 0x{0} already processed")]
    AlreadyProcessed(String),

    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("storage: {0}")]
    Storage(String),
}

impl WithdrawalClaimError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedProof(_) | Self::InvalidTransaction(_) => ErrorKind::Malformed,
            Self::UnknownBunch(_) => ErrorKind::Sequence,
            Self::BlockOutOfRange { .. }
            | Self::SiblingCount { .. }
            | Self::NotInBunch(_)
            | Self::InvalidTxProof(_)
            | Self::NotToLockAddress
            | Self::ZeroValue
            | Self::ChainIdMismatch { .. } => ErrorKind::Proof,
            Self::AlreadyProcessed(_) => ErrorKind::Replay,
            Self::Ledger(_) => ErrorKind::Ledger,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<BunchStoreError> for WithdrawalClaimError {
    fn from(e: BunchStoreError) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<ClaimStoreError> for WithdrawalClaimError {
    fn from(e: ClaimStoreError) -> Self {
        match e {
            ClaimStoreError::AlreadyProcessed { tx_hash, .. } => Self::AlreadyProcessed(tx_hash),
            other => Self::Storage(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalConfig {
    /// ESN address receiving locked value.
    #[serde(with = "esn_core::types::hex_20")]
    pub lock_address: Address,
    /// Only transactions signed for this chain are accepted when set.
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub limits: ProofLimits,
}

/// A withdrawal proof that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedWithdrawal {
    pub tx_hash: Hash256,
    pub bunch_index: u64,
    pub block_number: u64,
    pub sender: Address,
    pub value: U256,
}

pub struct WithdrawalClaimVerifier<L> {
    config: WithdrawalConfig,
    bunches: BunchStore,
    claims: ClaimStore,
    ledger: L,
}

impl<L: ReleaseLedger> WithdrawalClaimVerifier<L> {
    pub fn new(config: WithdrawalConfig, bunches: BunchStore, claims: ClaimStore, ledger: L) -> Self {
        Self {
            config,
            bunches,
            claims,
            ledger,
        }
    }

    pub fn config(&self) -> &WithdrawalConfig {
        &self.config
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Run every check short of the replay mark and the release.
    pub fn verify_withdrawal(
        &self,
        proof_bytes: &[u8],
    ) -> Result<VerifiedWithdrawal, WithdrawalClaimError> {
        let proof = WithdrawalProofV1::from_bytes(proof_bytes, &self.config.limits)?;
        let bunch_index = proof.bunch_index;
        let block_number = proof.block_number;

        let bunch = self
            .bunches
            .get(bunch_index)?
            .ok_or(WithdrawalClaimError::UnknownBunch(bunch_index))?;
        if !bunch.contains(block_number) {
            return Err(WithdrawalClaimError::BlockOutOfRange {
                bunch_index,
                block_number,
            });
        }
        let siblings = proof.siblings();
        let depth = usize::from(bunch.bunch_depth);
        if siblings.len() != depth {
            return Err(WithdrawalClaimError::SiblingCount {
                expected: depth,
                got: siblings.len(),
            });
        }

        let per_block_tx_root = proof.per_block_tx_root.0;
        verify_bunch_inclusion(
            &per_block_tx_root,
            block_number - bunch.start_block_number,
            &siblings,
            &bunch.transactions_mega_root,
        )
        .map_err(WithdrawalClaimError::NotInBunch)?;
        verify_trie_proof(
            &per_block_tx_root,
            &proof.tx_path_key,
            &proof.raw_transaction,
            &proof.tx_proof_nodes,
        )
        .map_err(WithdrawalClaimError::InvalidTxProof)?;
        debug!(bunch_index, block_number, "withdrawal inclusion verified");

        let tx = decode_transaction(&proof.raw_transaction)?;
        if tx.to != Some(self.config.lock_address) {
            return Err(WithdrawalClaimError::NotToLockAddress);
        }
        if tx.value.is_zero() {
            return Err(WithdrawalClaimError::ZeroValue);
        }
        if let Some(expected) = self.config.chain_id {
            if tx.chain_id != Some(expected) {
                return Err(WithdrawalClaimError::ChainIdMismatch {
                    expected,
                    got: tx.chain_id,
                });
            }
        }

        Ok(VerifiedWithdrawal {
            tx_hash: tx.hash,
            bunch_index,
            block_number,
            sender: tx.sender,
            value: tx.value,
        })
    }

    /// Verify `proof_bytes`, mark the transaction processed and release the
    /// value to its sender. A failed release drops the mark.
    pub fn claim_withdrawal(
        &self,
        proof_bytes: &[u8],
    ) -> Result<WithdrawalClaimed, WithdrawalClaimError> {
        let verified = self.verify_withdrawal(proof_bytes).map_err(|e| {
            warn!(error = %e, kind = %e.kind(), "withdrawal proof rejected");
            e
        })?;

        self.claims.mark_processed(&ProcessedClaim {
            direction: ClaimDirection::Withdrawal,
            tx_hash: verified.tx_hash,
            recipient: verified.sender,
            amount: verified.value.to_string(),
            block_number: verified.block_number,
        })?;

        if let Err(e) = self.ledger.release(&verified.sender, verified.value) {
            error!(
                tx_hash = %hex::encode(verified.tx_hash),
                error = %e,
                "withdrawal release failed"
            );
            if let Err(rollback) = self.claims.unmark(ClaimDirection::Withdrawal, &verified.tx_hash) {
                error!(
                    tx_hash = %hex::encode(verified.tx_hash),
                    ledger_error = %e,
                    error = %rollback,
                    "withdrawal left marked after failed rollback"
                );
                return Err(rollback.into());
            }
            return Err(e.into());
        }

        info!(
            tx_hash = %hex::encode(verified.tx_hash),
            bunch_index = verified.bunch_index,
            block_number = verified.block_number,
            recipient = %hex::encode(verified.sender),
            value = %verified.value,
            "withdrawal claimed"
        );
        Ok(WithdrawalClaimed {
            tx_hash: verified.tx_hash,
            bunch_index: verified.bunch_index,
            block_number: verified.block_number,
            recipient: verified.sender,
            amount: verified.value,
        })
    }

    pub fn is_processed(&self, tx_hash: &Hash256) -> Result<bool, WithdrawalClaimError> {
        Ok(self
            .claims
            .is_processed(ClaimDirection::Withdrawal, tx_hash)?)
    }
}
