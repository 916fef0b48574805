//! Append-only bunch array of the Bunch Relay.
//!
//! Bunches are numbered from 1; `count()` is therefore also the index of the
//! latest bunch. Each append checks continuity against the stored next start
//! block number and advances it by `2^bunch_depth` in the same transaction.

use esn_core::Bunch;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Transactional, Tree};
use thiserror::Error;
use tracing::info;

use crate::{decode_u64, json_decode, json_encode};

const COUNT_KEY: &[u8] = b"count";
const NEXT_START_KEY: &[u8] = b"next_start_block_number";

#[derive(Debug, Error)]
pub enum BunchStoreError {
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("start block {got} does not continue the bunch chain (expected {expected})")]
    StartMismatch { expected: u64, got: u64 },

    #[error("bunch depth {0} out of range")]
    InvalidDepth(u8),
}

fn corrupt(e: String) -> ConflictableTransactionError<BunchStoreError> {
    ConflictableTransactionError::Abort(BunchStoreError::Corrupt(e))
}

#[derive(Clone)]
pub struct BunchStore {
    bunches: Tree,
    meta: Tree,
}

impl BunchStore {
    /// Open the trees; `first_start_block` seeds the next expected start
    /// block on a fresh database and is ignored afterwards.
    pub fn open(db: &sled::Db, first_start_block: u64) -> Result<Self, BunchStoreError> {
        let store = Self {
            bunches: db.open_tree("bunches")?,
            meta: db.open_tree("bunch_meta")?,
        };
        let seeded = store.meta.compare_and_swap(
            NEXT_START_KEY,
            None::<&[u8]>,
            Some(&first_start_block.to_be_bytes()[..]),
        )?;
        if seeded.is_ok() {
            info!(first_start_block, "initialized bunch relay");
        }
        Ok(store)
    }

    /// Number of bunches appended, equal to the latest bunch index.
    pub fn count(&self) -> Result<u64, BunchStoreError> {
        decode_u64(self.meta.get(COUNT_KEY)?)
            .map(|c| c.unwrap_or(0))
            .map_err(BunchStoreError::Corrupt)
    }

    pub fn next_start_block_number(&self) -> Result<u64, BunchStoreError> {
        decode_u64(self.meta.get(NEXT_START_KEY)?)
            .map_err(BunchStoreError::Corrupt)?
            .ok_or_else(|| BunchStoreError::Corrupt("next start block missing".to_string()))
    }

    /// Bunch at `index` (1-based).
    pub fn get(&self, index: u64) -> Result<Option<Bunch>, BunchStoreError> {
        match self.bunches.get(index.to_be_bytes())? {
            Some(bytes) => Ok(Some(json_decode(&bytes).map_err(BunchStoreError::Corrupt)?)),
            None => Ok(None),
        }
    }

    /// Append `bunch`, returning its index.
    pub fn append(&self, bunch: &Bunch) -> Result<u64, BunchStoreError> {
        let end = bunch
            .end_block_number()
            .ok_or(BunchStoreError::InvalidDepth(bunch.bunch_depth))?;
        let encoded = json_encode(bunch).map_err(BunchStoreError::Corrupt)?;

        let r: Result<u64, TransactionError<BunchStoreError>> =
            (&self.bunches, &self.meta).transaction(|(bunches, meta)| {
                let expected = decode_u64(meta.get(NEXT_START_KEY)?)
                    .map_err(corrupt)?
                    .ok_or_else(|| corrupt("next start block missing".to_string()))?;
                if bunch.start_block_number != expected {
                    return Err(ConflictableTransactionError::Abort(
                        BunchStoreError::StartMismatch {
                            expected,
                            got: bunch.start_block_number,
                        },
                    ));
                }
                let index = decode_u64(meta.get(COUNT_KEY)?).map_err(corrupt)?.unwrap_or(0) + 1;
                bunches.insert(&index.to_be_bytes()[..], encoded.as_slice())?;
                meta.insert(COUNT_KEY, &index.to_be_bytes()[..])?;
                meta.insert(NEXT_START_KEY, &end.to_be_bytes()[..])?;
                Ok(index)
            });
        let index = match r {
            Ok(index) => index,
            Err(TransactionError::Abort(e)) => return Err(e),
            Err(TransactionError::Storage(e)) => return Err(BunchStoreError::Sled(e)),
        };

        info!(
            index,
            start_block_number = bunch.start_block_number,
            bunch_depth = bunch.bunch_depth,
            next_start_block_number = end,
            "appended bunch"
        );
        Ok(index)
    }
}
