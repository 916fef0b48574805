//! Destination-ledger collaborators.
//!
//! The claim verifiers only ever call [`CreditLedger::credit`] (deposits,
//! released on ESN) and [`ReleaseLedger::release`] (withdrawals, released on
//! ETH). Everything else about balances is the collaborator's business.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use alloy_primitives::U256;
use esn_core::Address;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("insufficient locked balance: requested {requested}, available {available}")]
    InsufficientLocked { requested: U256, available: U256 },

    #[error("balance overflow")]
    Overflow,

    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("ledger rejected: {0}")]
    Rejected(String),
}

/// Credits value released by a deposit claim.
pub trait CreditLedger {
    fn credit(&self, recipient: &Address, amount: U256) -> Result<(), LedgerError>;
}

/// Releases value by a withdrawal claim.
pub trait ReleaseLedger {
    fn release(&self, recipient: &Address, amount: U256) -> Result<(), LedgerError>;
}

impl<T: CreditLedger + ?Sized> CreditLedger for Arc<T> {
    fn credit(&self, recipient: &Address, amount: U256) -> Result<(), LedgerError> {
        (**self).credit(recipient, amount)
    }
}

impl<T: ReleaseLedger + ?Sized> ReleaseLedger for Arc<T> {
    fn release(&self, recipient: &Address, amount: U256) -> Result<(), LedgerError> {
        (**self).release(recipient, amount)
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    locked: U256,
    balances: BTreeMap<Address, U256>,
}

/// In-memory ledger backed by a locked reserve.
///
/// `lock` funds the reserve; every credit or release draws from it, so the
/// total paid out can never exceed the total locked.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut LedgerState) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| LedgerError::Unavailable("ledger lock poisoned".to_string()))?;
        f(&mut state)
    }

    /// Add `amount` to the locked reserve.
    pub fn lock(&self, amount: U256) -> Result<(), LedgerError> {
        self.with_state(|state| {
            state.locked = state.locked.checked_add(amount).ok_or(LedgerError::Overflow)?;
            Ok(())
        })
    }

    pub fn locked(&self) -> Result<U256, LedgerError> {
        self.with_state(|state| Ok(state.locked))
    }

    pub fn balance_of(&self, account: &Address) -> Result<U256, LedgerError> {
        self.with_state(|state| Ok(state.balances.get(account).copied().unwrap_or_default()))
    }

    /// Sum of every paid-out balance.
    pub fn total_paid(&self) -> Result<U256, LedgerError> {
        self.with_state(|state| {
            state
                .balances
                .values()
                .try_fold(U256::ZERO, |acc, v| acc.checked_add(*v))
                .ok_or(LedgerError::Overflow)
        })
    }

    fn pay(&self, recipient: &Address, amount: U256) -> Result<(), LedgerError> {
        self.with_state(|state| {
            let remaining = state
                .locked
                .checked_sub(amount)
                .ok_or(LedgerError::InsufficientLocked {
                    requested: amount,
                    available: state.locked,
                })?;
            let balance = state.balances.entry(*recipient).or_default();
            *balance = balance.checked_add(amount).ok_or(LedgerError::Overflow)?;
            state.locked = remaining;
            Ok(())
        })?;
        debug!(recipient = %hex::encode(recipient), %amount, "ledger paid out");
        Ok(())
    }
}

impl CreditLedger for MemoryLedger {
    fn credit(&self, recipient: &Address, amount: U256) -> Result<(), LedgerError> {
        self.pay(recipient, amount)
    }
}

impl ReleaseLedger for MemoryLedger {
    fn release(&self, recipient: &Address, amount: U256) -> Result<(), LedgerError> {
        self.pay(recipient, amount)
    }
}
