//! Reverse Relay (ETH -> ESN): per-block header roots agreed by the validator
//! committee.
//!
//! Per block the state moves `Empty -> Proposed(k) -> Finalized`, where `k`
//! counts distinct validators. Finalization requires `ceil(2N/3)` proposers
//! behind one candidate and strictly follows the latest finalized block; the
//! first candidate to be finalized wins and all others are discarded.

use esn_core::{Address, BlockHeaderRecord, ErrorKind, Hash256, ValidatorSet};
use esn_storage::{Proposal, ReverseRelayStore, ReverseRelayStoreError};
use thiserror::Error;
use tracing::{debug, warn};

use crate::events::{BlockFinalized, BlockProposed};

#[derive(Debug, Error)]
pub enum ReverseRelayError {
    #[error("caller 0x{0} is not a validator")]
    NotValidator(String),

    #[error("block {block_number} already finalized (latest {latest})")]
    AlreadyFinalized { block_number: u64, latest: u64 },

    #[error("validator 0x{proposer} already proposed for block {block_number}")]
    AlreadyProposed {
        block_number: u64,
        proposer: String,
    },

    #[error("invalid block no.: expected {expected}, got {got}")]
    OutOfSequence { expected: u64, got: u64 },

    #[error("no proposal {index} for block {block_number}")]
    ProposalNotFound { block_number: u64, index: u64 },

    #[error("not enough proposals: {have} of {need} validators")]
    NotEnoughProposals { have: usize, need: usize },

    #[error("storage: {0}")]
    Storage(String),
}

impl ReverseRelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotValidator(_) => ErrorKind::Authorization,
            Self::AlreadyFinalized { .. }
            | Self::AlreadyProposed { .. }
            | Self::OutOfSequence { .. } => ErrorKind::Sequence,
            Self::ProposalNotFound { .. } | Self::NotEnoughProposals { .. } => ErrorKind::Quorum,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<ReverseRelayStoreError> for ReverseRelayError {
    fn from(e: ReverseRelayStoreError) -> Self {
        match e {
            ReverseRelayStoreError::AlreadyFinalized {
                block_number,
                latest,
            } => Self::AlreadyFinalized {
                block_number,
                latest,
            },
            ReverseRelayStoreError::AlreadyProposed {
                block_number,
                proposer,
            } => Self::AlreadyProposed {
                block_number,
                proposer,
            },
            ReverseRelayStoreError::OutOfSequence { expected, got } => {
                Self::OutOfSequence { expected, got }
            }
            ReverseRelayStoreError::ProposalNotFound {
                block_number,
                index,
            } => Self::ProposalNotFound {
                block_number,
                index,
            },
            ReverseRelayStoreError::InsufficientProposers { have, need } => {
                Self::NotEnoughProposals { have, need }
            }
            other @ (ReverseRelayStoreError::Sled(_) | ReverseRelayStoreError::Corrupt(_)) => {
                Self::Storage(other.to_string())
            }
        }
    }
}

/// ETH header relay bound to one validator set.
#[derive(Clone)]
pub struct ReverseRelay {
    validators: ValidatorSet,
    store: ReverseRelayStore,
}

impl ReverseRelay {
    pub fn new(validators: ValidatorSet, store: ReverseRelayStore) -> Self {
        Self { validators, store }
    }

    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    /// Distinct proposers needed to finalize.
    pub fn quorum(&self) -> usize {
        self.validators.quorum()
    }

    fn authorize(&self, caller: &Address) -> Result<(), ReverseRelayError> {
        if !self.validators.contains(caller) {
            warn!(caller = %hex::encode(caller), "rejected call from non-validator");
            return Err(ReverseRelayError::NotValidator(hex::encode(caller)));
        }
        Ok(())
    }

    /// Propose the roots of `block_number` on behalf of `caller`.
    ///
    /// Proposals ahead of `latest + 1` are accepted and wait for their turn.
    pub fn propose_block(
        &self,
        caller: &Address,
        block_number: u64,
        transactions_root: &Hash256,
        receipts_root: &Hash256,
    ) -> Result<BlockProposed, ReverseRelayError> {
        self.authorize(caller)?;
        let outcome = self
            .store
            .add_proposal(block_number, caller, transactions_root, receipts_root)?;

        debug!(
            block_number,
            index = outcome.index,
            proposers = outcome.proposer_count,
            quorum = self.quorum(),
            "block proposed"
        );
        Ok(BlockProposed {
            block_number,
            proposal_index: outcome.index,
            proposer: *caller,
            proposer_count: outcome.proposer_count,
            new_candidate: outcome.created,
        })
    }

    /// Finalize candidate `proposal_index` of `block_number`.
    pub fn finalize_proposal(
        &self,
        caller: &Address,
        block_number: u64,
        proposal_index: u64,
    ) -> Result<BlockFinalized, ReverseRelayError> {
        self.authorize(caller)?;
        let outcome = self
            .store
            .finalize(block_number, proposal_index, self.quorum())
            .map_err(|e| {
                warn!(block_number, proposal_index, error = %e, "finalization rejected");
                ReverseRelayError::from(e)
            })?;

        Ok(BlockFinalized {
            record: outcome.record,
            proposal_index,
            proposer_count: outcome.proposer_count,
            discarded_candidates: outcome.discarded,
        })
    }

    pub fn latest_block_number(&self) -> Result<u64, ReverseRelayError> {
        Ok(self.store.latest_block_number()?)
    }

    /// Pending candidates for `block_number`; zero once finalized.
    pub fn get_proposals_count(&self, block_number: u64) -> Result<u64, ReverseRelayError> {
        Ok(self.store.proposal_count(block_number)?)
    }

    pub fn proposal(
        &self,
        block_number: u64,
        proposal_index: u64,
    ) -> Result<Option<Proposal>, ReverseRelayError> {
        Ok(self.store.proposal(block_number, proposal_index)?)
    }

    /// Finalized roots of `block_number`.
    pub fn block_header(&self, block_number: u64) -> Result<Option<BlockHeaderRecord>, ReverseRelayError> {
        Ok(self.store.record(block_number)?)
    }
}
