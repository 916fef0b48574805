//! Processed-claim sets, one tree per direction.
//!
//! Marking is insert-if-absent, so two racing claims for the same
//! transaction hash cannot both succeed. Entries are never pruned; `unmark`
//! exists only to roll back a mark whose ledger mutation failed.

use esn_core::types::{hex_20, hex_32, Address, Hash256};
use serde::{Deserialize, Serialize};
use sled::Tree;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{json_decode, json_encode};

#[derive(Debug, Error)]
pub enum ClaimStoreError {
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("{direction} claim for transaction 0x{tx_hash} already processed")]
    AlreadyProcessed {
        direction: ClaimDirection,
        tx_hash: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimDirection {
    /// Locked on ETH, released on ESN.
    Deposit,
    /// Locked on ESN, released on ETH.
    Withdrawal,
}

impl ClaimDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
        }
    }
}

impl std::fmt::Display for ClaimDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What was released for a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedClaim {
    pub direction: ClaimDirection,
    #[serde(with = "hex_32")]
    pub tx_hash: Hash256,
    #[serde(with = "hex_20")]
    pub recipient: Address,
    /// Decimal amount.
    pub amount: String,
    pub block_number: u64,
}

#[derive(Clone)]
pub struct ClaimStore {
    deposits: Tree,
    withdrawals: Tree,
}

impl ClaimStore {
    pub fn open(db: &sled::Db) -> Result<Self, ClaimStoreError> {
        Ok(Self {
            deposits: db.open_tree("claims_deposit")?,
            withdrawals: db.open_tree("claims_withdrawal")?,
        })
    }

    fn tree(&self, direction: ClaimDirection) -> &Tree {
        match direction {
            ClaimDirection::Deposit => &self.deposits,
            ClaimDirection::Withdrawal => &self.withdrawals,
        }
    }

    pub fn is_processed(
        &self,
        direction: ClaimDirection,
        tx_hash: &Hash256,
    ) -> Result<bool, ClaimStoreError> {
        Ok(self.tree(direction).contains_key(tx_hash)?)
    }

    pub fn get(
        &self,
        direction: ClaimDirection,
        tx_hash: &Hash256,
    ) -> Result<Option<ProcessedClaim>, ClaimStoreError> {
        match self.tree(direction).get(tx_hash)? {
            Some(bytes) => Ok(Some(json_decode(&bytes).map_err(ClaimStoreError::Corrupt)?)),
            None => Ok(None),
        }
    }

    /// Insert `claim` if its transaction hash is not yet present.
    pub fn mark_processed(&self, claim: &ProcessedClaim) -> Result<(), ClaimStoreError> {
        let bytes = json_encode(claim).map_err(ClaimStoreError::Corrupt)?;
        let swapped = self.tree(claim.direction).compare_and_swap(
            claim.tx_hash,
            None::<&[u8]>,
            Some(bytes),
        )?;
        if swapped.is_err() {
            return Err(ClaimStoreError::AlreadyProcessed {
                direction: claim.direction,
                tx_hash: hex::encode(claim.tx_hash),
            });
        }
        debug!(
            direction = %claim.direction,
            tx_hash = %hex::encode(claim.tx_hash),
            "marked claim processed"
        );
        Ok(())
    }

    /// Roll back a mark.
    pub fn unmark(&self, direction: ClaimDirection, tx_hash: &Hash256) -> Result<(), ClaimStoreError> {
        self.tree(direction).remove(tx_hash)?;
        warn!(
            direction = %direction,
            tx_hash = %hex::encode(tx_hash),
            "rolled back processed claim"
        );
        Ok(())
    }

    pub fn count(&self, direction: ClaimDirection) -> usize {
        self.tree(direction).len()
    }
}
