//! Rejection taxonomy shared by every relay and claim entry point.

use serde::{Deserialize, Serialize};

/// Category of a rejected relay or claim call.
///
/// All categories are fail-closed: the caller must resubmit with corrected or
/// more complete data. Nothing is retried by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller is not a member of the validator set.
    Authorization,
    /// Block number / start block number out of order.
    Sequence,
    /// Not enough matching proposals or signatures.
    Quorum,
    /// Merkle, MPT or bunch-inclusion verification failed, or the proven
    /// value does not describe a lock.
    Proof,
    /// Transaction hash already claimed.
    Replay,
    /// Malformed recovery id, unrecoverable or unordered signatures.
    Signature,
    /// Proof bytes failed to decode or exceeded limits.
    Malformed,
    /// Persistence layer failure.
    Storage,
    /// The destination ledger refused the credit/release.
    Ledger,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorization => "authorization",
            Self::Sequence => "sequence",
            Self::Quorum => "quorum",
            Self::Proof => "proof",
            Self::Replay => "replay",
            Self::Signature => "signature",
            Self::Malformed => "malformed",
            Self::Storage => "storage",
            Self::Ledger => "ledger",
        }
    }

    /// Relay agents treat a replay rejection as a completed claim.
    pub fn is_already_processed(&self) -> bool {
        matches!(self, Self::Replay)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
