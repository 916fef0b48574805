#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]
#![deny(clippy::cast_precision_loss)]
#![deny(clippy::cast_possible_truncation)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::cast_sign_loss)]

//! Persistence for the relay state.
//!
//! One sled database holds every tree; the stores in the submodules open
//! their own trees from the shared [`sled::Db`]. Records are JSON encoded.
//! State changes touching more than one tree run in a single sled
//! transaction.

use std::path::Path;

use sled::Tree;
use thiserror::Error;
use tracing::info;

pub mod bunches;
pub mod claims;
pub mod reverse_relay;

pub use bunches::{BunchStore, BunchStoreError};
pub use claims::{ClaimDirection, ClaimStore, ClaimStoreError, ProcessedClaim};
pub use reverse_relay::{
    FinalizeOutcome, Proposal, ProposalOutcome, ReverseRelayStore, ReverseRelayStoreError,
};

pub const SCHEMA_VERSION: &str = "1";
const META_SCHEMA_KEY: &[u8] = b"schema_version";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),
    #[error("schema mismatch: expected {expected}, found {found:?}")]
    SchemaMismatch {
        expected: String,
        found: Option<String>,
    },
}

/// Handle on the relay database.
#[derive(Clone)]
pub struct Storage {
    db: sled::Db,
    meta: Tree,
}

impl Storage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Wrap an already opened database (temporary databases in tests).
    pub fn from_db(db: sled::Db) -> Result<Self, StorageError> {
        let meta = db.open_tree("meta")?;
        let storage = Self { db, meta };
        storage.init_schema()?;
        Ok(storage)
    }

    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        match self.meta.get(META_SCHEMA_KEY)? {
            Some(val) => {
                let current = String::from_utf8_lossy(&val).to_string();
                if current != SCHEMA_VERSION {
                    return Err(StorageError::SchemaMismatch {
                        expected: SCHEMA_VERSION.to_string(),
                        found: Some(current),
                    });
                }
            }
            None => {
                self.meta.insert(META_SCHEMA_KEY, SCHEMA_VERSION.as_bytes())?;
                info!(schema = SCHEMA_VERSION, "initialized schema version");
            }
        }
        Ok(())
    }
}

/// JSON encode for storage.
pub(crate) fn json_encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, String> {
    serde_json::to_vec(value).map_err(|e| format!("json encode: {e}"))
}

/// JSON decode from storage.
pub(crate) fn json_decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, String> {
    serde_json::from_slice(bytes).map_err(|e| format!("json decode: {e}"))
}

/// Big-endian `u64` stored value; `None` if absent.
pub(crate) fn decode_u64(bytes: Option<impl AsRef<[u8]>>) -> Result<Option<u64>, String> {
    match bytes {
        None => Ok(None),
        Some(b) => {
            let b = b.as_ref();
            let array: [u8; 8] = b
                .try_into()
                .map_err(|_| format!("expected 8-byte counter, got {} bytes", b.len()))?;
            Ok(Some(u64::from_be_bytes(array)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn schema_version_is_enforced() {
        let dir = tempdir().expect("tmpdir");
        {
            let storage = Storage::open(dir.path()).expect("open");
            storage
                .meta
                .insert(META_SCHEMA_KEY, b"999")
                .expect("overwrite");
            storage.flush().expect("flush");
        }
        let reopened = Storage::open(dir.path());
        assert!(matches!(reopened, Err(StorageError::SchemaMismatch { .. })));
    }

    #[test]
    fn reopen_same_schema() {
        let dir = tempdir().expect("tmpdir");
        {
            Storage::open(dir.path()).expect("open").flush().expect("flush");
        }
        Storage::open(dir.path()).expect("reopen");
    }

    #[test]
    fn decode_u64_values() {
        assert_eq!(decode_u64(None::<&[u8]>), Ok(None));
        assert_eq!(decode_u64(Some(7u64.to_be_bytes())), Ok(Some(7)));
        assert!(decode_u64(Some([1u8, 2, 3])).is_err());
    }
}
