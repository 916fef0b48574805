//! Reverse Relay state: finalized ETH header roots and pending proposals.
//!
//! ## Trees
//!
//! - `rr_records`: `be(block)` -> `BlockHeaderRecord`
//! - `rr_proposals`: `be(block) ++ be(index)` -> `Proposal`
//! - `rr_proposal_index`: `be(block) ++ proposal_key` -> `be(index)`
//! - `rr_proposers`: `be(block) ++ validator` -> `be(index)`
//! - `rr_meta`: `latest_block_number`, `count: ++ be(block)`
//!
//! A validator proposes at most once per block. Finalizing a block writes its
//! record, advances the latest block number and deletes every proposal, index
//! and proposer entry for that block in the same transaction.

use esn_core::types::{hex_20_seq, hex_32, Address, BlockHeaderRecord, Hash256, ProposalKey};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::{Transactional, Tree};
use thiserror::Error;
use tracing::{debug, info};

use crate::{decode_u64, json_decode, json_encode};

const LATEST_KEY: &[u8] = b"latest_block_number";
const COUNT_PREFIX: &[u8] = b"count:";

#[derive(Debug, Error)]
pub enum ReverseRelayStoreError {
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("block {block_number} already finalized (latest {latest})")]
    AlreadyFinalized { block_number: u64, latest: u64 },

    #[error("validator 0x{proposer} already proposed for block {block_number}")]
    AlreadyProposed {
        block_number: u64,
        proposer: String,
    },

    #[error("out of sequence: expected block {expected}, got {got}")]
    OutOfSequence { expected: u64, got: u64 },

    #[error("no proposal {index} for block {block_number}")]
    ProposalNotFound { block_number: u64, index: u64 },

    #[error("proposal has {have} distinct proposers, {need} required")]
    InsufficientProposers { have: usize, need: usize },
}

type TxResult<T> = Result<T, ConflictableTransactionError<ReverseRelayStoreError>>;

fn abort<T>(e: ReverseRelayStoreError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(e))
}

fn corrupt(e: String) -> ConflictableTransactionError<ReverseRelayStoreError> {
    ConflictableTransactionError::Abort(ReverseRelayStoreError::Corrupt(e))
}

fn flatten<T>(r: Result<T, TransactionError<ReverseRelayStoreError>>) -> Result<T, ReverseRelayStoreError> {
    match r {
        Ok(v) => Ok(v),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(ReverseRelayStoreError::Sled(e)),
    }
}

/// Candidate roots for one block and the validators backing them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub block_number: u64,
    pub index: u64,
    #[serde(with = "hex_32")]
    pub transactions_root: Hash256,
    #[serde(with = "hex_32")]
    pub receipts_root: Hash256,
    /// Distinct proposers in arrival order.
    #[serde(with = "hex_20_seq")]
    pub proposers: Vec<Address>,
}

impl Proposal {
    pub fn key(&self) -> ProposalKey {
        ProposalKey::new(&self.transactions_root, &self.receipts_root)
    }
}

/// Result of a successful proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProposalOutcome {
    pub index: u64,
    /// `true` if this call created the candidate.
    pub created: bool,
    pub proposer_count: usize,
}

/// Result of a successful finalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeOutcome {
    pub record: BlockHeaderRecord,
    pub proposer_count: usize,
    /// Candidates deleted, the finalized one included.
    pub discarded: u64,
}

fn block_key(block_number: u64) -> [u8; 8] {
    block_number.to_be_bytes()
}

fn proposal_slot(block_number: u64, index: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&block_number.to_be_bytes());
    key[8..].copy_from_slice(&index.to_be_bytes());
    key
}

fn proposal_index_key(block_number: u64, key: &ProposalKey) -> [u8; 40] {
    let mut out = [0u8; 40];
    out[..8].copy_from_slice(&block_number.to_be_bytes());
    out[8..].copy_from_slice(&key.0);
    out
}

fn proposer_key(block_number: u64, proposer: &Address) -> [u8; 28] {
    let mut out = [0u8; 28];
    out[..8].copy_from_slice(&block_number.to_be_bytes());
    out[8..].copy_from_slice(proposer);
    out
}

fn count_key(block_number: u64) -> Vec<u8> {
    let mut key = COUNT_PREFIX.to_vec();
    key.extend_from_slice(&block_number.to_be_bytes());
    key
}

fn tx_latest(meta: &TransactionalTree) -> TxResult<u64> {
    let raw = meta.get(LATEST_KEY)?;
    decode_u64(raw)
        .map_err(corrupt)?
        .ok_or_else(|| corrupt("latest block number missing".to_string()))
}

fn tx_count(meta: &TransactionalTree, block_number: u64) -> TxResult<u64> {
    let raw = meta.get(count_key(block_number))?;
    Ok(decode_u64(raw).map_err(corrupt)?.unwrap_or(0))
}

/// Durable Reverse Relay state.
#[derive(Clone)]
pub struct ReverseRelayStore {
    records: Tree,
    proposals: Tree,
    proposal_index: Tree,
    proposers: Tree,
    meta: Tree,
}

impl ReverseRelayStore {
    /// Open the trees; `initial_latest` seeds the latest block number on a
    /// fresh database and is ignored afterwards.
    pub fn open(db: &sled::Db, initial_latest: u64) -> Result<Self, ReverseRelayStoreError> {
        let store = Self {
            records: db.open_tree("rr_records")?,
            proposals: db.open_tree("rr_proposals")?,
            proposal_index: db.open_tree("rr_proposal_index")?,
            proposers: db.open_tree("rr_proposers")?,
            meta: db.open_tree("rr_meta")?,
        };
        let seeded = store
            .meta
            .compare_and_swap(LATEST_KEY, None::<&[u8]>, Some(&initial_latest.to_be_bytes()[..]))?;
        if seeded.is_ok() {
            info!(latest = initial_latest, "initialized reverse relay");
        }
        Ok(store)
    }

    pub fn latest_block_number(&self) -> Result<u64, ReverseRelayStoreError> {
        decode_u64(self.meta.get(LATEST_KEY)?)
            .map_err(ReverseRelayStoreError::Corrupt)?
            .ok_or_else(|| ReverseRelayStoreError::Corrupt("latest block number missing".to_string()))
    }

    pub fn record(&self, block_number: u64) -> Result<Option<BlockHeaderRecord>, ReverseRelayStoreError> {
        match self.records.get(block_key(block_number))? {
            Some(bytes) => Ok(Some(json_decode(&bytes).map_err(ReverseRelayStoreError::Corrupt)?)),
            None => Ok(None),
        }
    }

    pub fn proposal(
        &self,
        block_number: u64,
        index: u64,
    ) -> Result<Option<Proposal>, ReverseRelayStoreError> {
        match self.proposals.get(proposal_slot(block_number, index))? {
            Some(bytes) => Ok(Some(json_decode(&bytes).map_err(ReverseRelayStoreError::Corrupt)?)),
            None => Ok(None),
        }
    }

    /// Number of distinct candidates pending for `block_number`.
    pub fn proposal_count(&self, block_number: u64) -> Result<u64, ReverseRelayStoreError> {
        decode_u64(self.meta.get(count_key(block_number))?)
            .map(|c| c.unwrap_or(0))
            .map_err(ReverseRelayStoreError::Corrupt)
    }

    /// Index of the candidate with these roots, if pending.
    pub fn find_proposal(
        &self,
        block_number: u64,
        key: &ProposalKey,
    ) -> Result<Option<u64>, ReverseRelayStoreError> {
        decode_u64(self.proposal_index.get(proposal_index_key(block_number, key))?)
            .map_err(ReverseRelayStoreError::Corrupt)
    }

    pub fn has_proposed(
        &self,
        block_number: u64,
        proposer: &Address,
    ) -> Result<bool, ReverseRelayStoreError> {
        Ok(self
            .proposers
            .contains_key(proposer_key(block_number, proposer))?)
    }

    /// Record `proposer`'s vote for the given roots.
    ///
    /// Joins an existing candidate with the same roots or creates one at the
    /// next index. Rejected if the block is already finalized or the
    /// validator already proposed for it.
    pub fn add_proposal(
        &self,
        block_number: u64,
        proposer: &Address,
        transactions_root: &Hash256,
        receipts_root: &Hash256,
    ) -> Result<ProposalOutcome, ReverseRelayStoreError> {
        let key = ProposalKey::new(transactions_root, receipts_root);
        let r = (&self.proposals, &self.proposal_index, &self.proposers, &self.meta).transaction(
            |(proposals, index_tree, proposers, meta)| {
                let latest = tx_latest(meta)?;
                if block_number <= latest {
                    return abort(ReverseRelayStoreError::AlreadyFinalized {
                        block_number,
                        latest,
                    });
                }
                let voter_key = proposer_key(block_number, proposer);
                if proposers.get(voter_key)?.is_some() {
                    return abort(ReverseRelayStoreError::AlreadyProposed {
                        block_number,
                        proposer: hex::encode(proposer),
                    });
                }

                let idx_key = proposal_index_key(block_number, &key);
                let existing = decode_u64(index_tree.get(idx_key)?).map_err(corrupt)?;
                let (index, created, proposal) = match existing {
                    Some(index) => {
                        let bytes = proposals
                            .get(proposal_slot(block_number, index))?
                            .ok_or_else(|| corrupt(format!("index points at missing proposal {index}")))?;
                        let mut proposal: Proposal = json_decode(&bytes).map_err(corrupt)?;
                        proposal.proposers.push(*proposer);
                        (index, false, proposal)
                    }
                    None => {
                        let index = tx_count(meta, block_number)?;
                        meta.insert(count_key(block_number), &(index + 1).to_be_bytes()[..])?;
                        index_tree.insert(&idx_key[..], &index.to_be_bytes()[..])?;
                        let proposal = Proposal {
                            block_number,
                            index,
                            transactions_root: *transactions_root,
                            receipts_root: *receipts_root,
                            proposers: vec![*proposer],
                        };
                        (index, true, proposal)
                    }
                };

                proposals.insert(
                    &proposal_slot(block_number, index)[..],
                    json_encode(&proposal).map_err(corrupt)?,
                )?;
                proposers.insert(&voter_key[..], &index.to_be_bytes()[..])?;

                Ok(ProposalOutcome {
                    index,
                    created,
                    proposer_count: proposal.proposers.len(),
                })
            },
        );
        let outcome = flatten(r)?;

        debug!(
            block_number,
            index = outcome.index,
            created = outcome.created,
            proposers = outcome.proposer_count,
            proposer = %hex::encode(proposer),
            key = %key.to_hex(),
            "stored proposal"
        );
        Ok(outcome)
    }

    /// Finalize candidate `index` of `block_number`.
    ///
    /// Requires `block_number == latest + 1` and at least `min_proposers`
    /// distinct proposers behind the candidate.
    pub fn finalize(
        &self,
        block_number: u64,
        index: u64,
        min_proposers: usize,
    ) -> Result<FinalizeOutcome, ReverseRelayStoreError> {
        let r = (
            &self.records,
            &self.proposals,
            &self.proposal_index,
            &self.proposers,
            &self.meta,
        )
            .transaction(|(records, proposals, index_tree, proposers, meta)| {
                let latest = tx_latest(meta)?;
                if block_number <= latest {
                    return abort(ReverseRelayStoreError::AlreadyFinalized {
                        block_number,
                        latest,
                    });
                }
                let expected = latest.checked_add(1).ok_or_else(|| {
                    corrupt("latest block number at u64::MAX".to_string())
                })?;
                if block_number != expected {
                    return abort(ReverseRelayStoreError::OutOfSequence {
                        expected,
                        got: block_number,
                    });
                }

                let Some(bytes) = proposals.get(proposal_slot(block_number, index))? else {
                    return abort(ReverseRelayStoreError::ProposalNotFound {
                        block_number,
                        index,
                    });
                };
                let chosen: Proposal = json_decode(&bytes).map_err(corrupt)?;
                if chosen.proposers.len() < min_proposers {
                    return abort(ReverseRelayStoreError::InsufficientProposers {
                        have: chosen.proposers.len(),
                        need: min_proposers,
                    });
                }

                let record = BlockHeaderRecord {
                    block_number,
                    transactions_root: chosen.transactions_root,
                    receipts_root: chosen.receipts_root,
                };
                records.insert(&block_key(block_number)[..], json_encode(&record).map_err(corrupt)?)?;
                meta.insert(LATEST_KEY, &block_number.to_be_bytes()[..])?;

                let count = tx_count(meta, block_number)?;
                for i in 0..count {
                    let slot = proposal_slot(block_number, i);
                    if let Some(bytes) = proposals.remove(&slot[..])? {
                        let candidate: Proposal = json_decode(&bytes).map_err(corrupt)?;
                        index_tree.remove(&proposal_index_key(block_number, &candidate.key())[..])?;
                        for voter in &candidate.proposers {
                            proposers.remove(&proposer_key(block_number, voter)[..])?;
                        }
                    }
                }
                meta.remove(count_key(block_number))?;

                Ok(FinalizeOutcome {
                    record,
                    proposer_count: chosen.proposers.len(),
                    discarded: count,
                })
            });
        let outcome = flatten(r)?;

        info!(
            block_number,
            index,
            proposers = outcome.proposer_count,
            discarded = outcome.discarded,
            transactions_root = %hex::encode(outcome.record.transactions_root),
            receipts_root = %hex::encode(outcome.record.receipts_root),
            "finalized block header"
        );
        Ok(outcome)
    }
}
