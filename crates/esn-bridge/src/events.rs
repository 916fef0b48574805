//! Events emitted by successful relay and claim calls.
//!
//! Each entry point returns its event; [`RelayEvent`] wraps them for callers
//! that publish a single stream.

use alloy_primitives::U256;
use esn_core::types::{hex_20, hex_20_seq, hex_32, Address, BlockHeaderRecord, Bunch, Hash256};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockProposed {
    pub block_number: u64,
    pub proposal_index: u64,
    #[serde(with = "hex_20")]
    pub proposer: Address,
    /// Distinct validators now backing this candidate.
    pub proposer_count: usize,
    pub new_candidate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockFinalized {
    pub record: BlockHeaderRecord,
    pub proposal_index: u64,
    pub proposer_count: usize,
    pub discarded_candidates: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BunchSubmitted {
    pub bunch_index: u64,
    pub bunch: Bunch,
    #[serde(with = "hex_32")]
    pub last_block_hash: Hash256,
    #[serde(with = "hex_20_seq")]
    pub signers: Vec<Address>,
    pub next_start_block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepositClaimed {
    #[serde(with = "hex_32")]
    pub tx_hash: Hash256,
    pub block_number: u64,
    #[serde(with = "hex_20")]
    pub recipient: Address,
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WithdrawalClaimed {
    #[serde(with = "hex_32")]
    pub tx_hash: Hash256,
    pub bunch_index: u64,
    pub block_number: u64,
    #[serde(with = "hex_20")]
    pub recipient: Address,
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RelayEvent {
    BlockProposed(BlockProposed),
    BlockFinalized(BlockFinalized),
    BunchSubmitted(BunchSubmitted),
    DepositClaimed(DepositClaimed),
    WithdrawalClaimed(WithdrawalClaimed),
}

impl RelayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BlockProposed(_) => "block_proposed",
            Self::BlockFinalized(_) => "block_finalized",
            Self::BunchSubmitted(_) => "bunch_submitted",
            Self::DepositClaimed(_) => "deposit_claimed",
            Self::WithdrawalClaimed(_) => "withdrawal_claimed",
        }
    }
}

macro_rules! impl_from_event {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for RelayEvent {
                fn from(event: $variant) -> Self {
                    Self::$variant(event)
                }
            }
        )*
    };
}

impl_from_event!(
    BlockProposed,
    BlockFinalized,
    BunchSubmitted,
    DepositClaimed,
    WithdrawalClaimed
);
