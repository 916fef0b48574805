//! Immutable validator committee snapshot.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::types::Address;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidatorSetError {
    #[error("validator set is empty")]
    Empty,

    #[error("duplicate validator 0x{0}")]
    Duplicate(String),
}

/// Fixed committee injected into each relay instance.
///
/// Rotation is modeled as a new instance, never in-place mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSet {
    members: BTreeSet<Address>,
}

impl ValidatorSet {
    pub fn new(members: impl IntoIterator<Item = Address>) -> Result<Self, ValidatorSetError> {
        let mut set = BTreeSet::new();
        for member in members {
            if !set.insert(member) {
                return Err(ValidatorSetError::Duplicate(hex::encode(member)));
            }
        }
        if set.is_empty() {
            return Err(ValidatorSetError::Empty);
        }
        Ok(Self { members: set })
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.members.contains(address)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// `ceil(2N / 3)`.
    pub fn quorum(&self) -> usize {
        (2 * self.members.len()).div_ceil(3)
    }

    /// Members in ascending address order.
    pub fn members(&self) -> impl Iterator<Item = &Address> {
        self.members.iter()
    }
}
