//! Deposit claims: value locked on ETH, released on ESN.
//!
//! The proof ties a transaction and its receipt to the roots of a block
//! finalized by the Reverse Relay. The receipt must carry an ERC-20
//! `Transfer` of the bridged token into the lock contract; its sender is
//! credited with the transferred amount, once per transaction hash.

use alloy_primitives::U256;
use esn_core::{
    decode_receipt, find_transfer, keccak, verify_trie_proof, Address, DepositProofV1, ErrorKind,
    Hash256, ProofCodecError, ProofLimits, ReceiptDecodeError, TrieProofError,
};
use esn_storage::{
    ClaimDirection, ClaimStore, ClaimStoreError, ProcessedClaim, ReverseRelayStore,
    ReverseRelayStoreError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::events::DepositClaimed;
use crate::ledger::{CreditLedger, LedgerError};

#[derive(Debug, Error)]
pub enum DepositClaimError {
    #[error("malformed proof: {0}")]
    MalformedProof(#[from] ProofCodecError),

    #[error("block {0} not finalized")]
    NotFinalized(u64),

    #[error("invalid tx proof: {0}")]
    InvalidTxProof(#[source] TrieProofError),

    #[error("invalid receipt proof: {0}")]
    InvalidReceiptProof(#[source] TrieProofError),

    #[error("invalid receipt: {0}")]
    InvalidReceipt(#[from] ReceiptDecodeError),

    #[error("transaction reverted")]
    TransactionFailed,

    #[error("no transfer of token 0x{token} into lock contract 0x{lock}")]
    NoLockTransfer { token: String, lock: String },

    #[error("zero-amount transfer")]
    ZeroAmount,

    #[error("deposit 0x{0} already processed")]
    AlreadyProcessed(String),

    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("storage: {0}")]
    Storage(String),
}

impl DepositClaimError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedProof(_) | Self::InvalidReceipt(_) => ErrorKind::Malformed,
            Self::NotFinalized(_) => ErrorKind::Sequence,
            Self::InvalidTxProof(_)
            | Self::InvalidReceiptProof(_)
            | Self::TransactionFailed
            | Self::NoLockTransfer { .. }
            | Self::ZeroAmount => ErrorKind::Proof,
            Self::AlreadyProcessed(_) => ErrorKind::Replay,
            Self::Ledger(_) => ErrorKind::Ledger,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<ReverseRelayStoreError> for DepositClaimError {
    fn from(e: ReverseRelayStoreError) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<ClaimStoreError> for DepositClaimError {
    fn from(e: ClaimStoreError) -> Self {
        match e {
            ClaimStoreError::AlreadyProcessed { tx_hash, .. } => Self::AlreadyProcessed(tx_hash),
            other => Self::Storage(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositConfig {
    /// ERC-20 token bridged from ETH.
    #[serde(with = "esn_core::types::hex_20")]
    pub token_contract: Address,
    /// Contract holding locked tokens on ETH.
    #[serde(with = "esn_core::types::hex_20")]
    pub lock_contract: Address,
    #[serde(default)]
    pub limits: ProofLimits,
}

/// A deposit proof that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedDeposit {
    pub tx_hash: Hash256,
    pub block_number: u64,
    pub sender: Address,
    pub amount: U256,
}

pub struct DepositClaimVerifier<L> {
    config: DepositConfig,
    headers: ReverseRelayStore,
    claims: ClaimStore,
    ledger: L,
}

impl<L: CreditLedger> DepositClaimVerifier<L> {
    pub fn new(
        config: DepositConfig,
        headers: ReverseRelayStore,
        claims: ClaimStore,
        ledger: L,
    ) -> Self {
        Self {
            config,
            headers,
            claims,
            ledger,
        }
    }

    pub fn config(&self) -> &DepositConfig {
        &self.config
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Run every check short of the replay mark and the credit.
    pub fn verify_deposit(&self, proof_bytes: &[u8]) -> Result<VerifiedDeposit, DepositClaimError> {
        let proof = DepositProofV1::from_bytes(proof_bytes, &self.config.limits)?;
        let block_number = proof.block_number;

        let record = self
            .headers
            .record(block_number)?
            .ok_or(DepositClaimError::NotFinalized(block_number))?;

        verify_trie_proof(
            &record.transactions_root,
            &proof.tx_path_key,
            &proof.raw_transaction,
            &proof.tx_proof_nodes,
        )
        .map_err(DepositClaimError::InvalidTxProof)?;
        verify_trie_proof(
            &record.receipts_root,
            &proof.tx_path_key,
            &proof.raw_receipt,
            &proof.receipt_proof_nodes,
        )
        .map_err(DepositClaimError::InvalidReceiptProof)?;
        debug!(block_number, "deposit inclusion verified");

        let receipt = decode_receipt(&proof.raw_receipt)?;
        if receipt.status.is_failure() {
            return Err(DepositClaimError::TransactionFailed);
        }
        let transfer = find_transfer(
            &receipt.logs,
            &self.config.token_contract,
            &self.config.lock_contract,
        )
        .ok_or_else(|| DepositClaimError::NoLockTransfer {
            token: hex::encode(self.config.token_contract),
            lock: hex::encode(self.config.lock_contract),
        })?;
        if transfer.amount.is_zero() {
            return Err(DepositClaimError::ZeroAmount);
        }

        Ok(VerifiedDeposit {
            tx_hash: keccak(&proof.raw_transaction),
            block_number,
            sender: transfer.from,
            amount: transfer.amount,
        })
    }

    /// Verify `proof_bytes`, mark the transaction processed and credit the
    /// sender. A failed credit releases the mark.
    pub fn claim_deposit(&self, proof_bytes: &[u8]) -> Result<DepositClaimed, DepositClaimError> {
        let verified = self.verify_deposit(proof_bytes).map_err(|e| {
            warn!(error = %e, kind = %e.kind(), "deposit proof rejected");
            e
        })?;

        self.claims.mark_processed(&ProcessedClaim {
            direction: ClaimDirection::Deposit,
            tx_hash: verified.tx_hash,
            recipient: verified.sender,
            amount: verified.amount.to_string(),
            block_number: verified.block_number,
        })?;

        if let Err(e) = self.ledger.credit(&verified.sender, verified.amount) {
            error!(
                tx_hash = %hex::encode(verified.tx_hash),
                error = %e,
                "deposit credit failed"
            );
            if let Err(rollback) = self.claims.unmark(ClaimDirection::Deposit, &verified.tx_hash) {
                error!(
                    tx_hash = %hex::encode(verified.tx_hash),
                    ledger_error = %e,
                    error = %rollback,
                    "deposit left marked after failed rollback"
                );
                return Err(rollback.into());
            }
            return Err(e.into());
        }

        info!(
            tx_hash = %hex::encode(verified.tx_hash),
            block_number = verified.block_number,
            recipient = %hex::encode(verified.sender),
            amount = %verified.amount,
            "deposit claimed"
        );
        Ok(DepositClaimed {
            tx_hash: verified.tx_hash,
            block_number: verified.block_number,
            recipient: verified.sender,
            amount: verified.amount,
        })
    }

    pub fn is_processed(&self, tx_hash: &Hash256) -> Result<bool, DepositClaimError> {
        Ok(self.claims.is_processed(ClaimDirection::Deposit, tx_hash)?)
    }
}
