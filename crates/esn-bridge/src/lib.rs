#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]
#![deny(clippy::cast_precision_loss)]
#![deny(clippy::cast_possible_truncation)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::cast_sign_loss)]

//! Stateful relay and claim services for the ETH <-> ESN bridge.
//!
//! - [`ReverseRelay`]: ETH block roots proposed and finalized on ESN
//! - [`BunchRelay`]: co-signed ESN bunch headers posted on ETH
//! - [`DepositClaimVerifier`] / [`WithdrawalClaimVerifier`]: proof-gated,
//!   one-time releases against the relayed roots
//!
//! [`EsnBridge`] wires all four over one database from a [`BridgeConfig`].

pub mod bunch_relay;
pub mod config;
pub mod deposit;
pub mod events;
pub mod ledger;
pub mod locator;
pub mod reverse_relay;
pub mod withdrawal;

pub use bunch_relay::{BunchRelay, BunchRelayError};
pub use config::BridgeConfig;
pub use deposit::{DepositClaimError, DepositClaimVerifier, DepositConfig, VerifiedDeposit};
pub use events::{
    BlockFinalized, BlockProposed, BunchSubmitted, DepositClaimed, RelayEvent, WithdrawalClaimed,
};
pub use ledger::{CreditLedger, LedgerError, MemoryLedger, ReleaseLedger};
pub use locator::{find_bunch_index, search_bunches, BlockRoots, BunchBuilder, LocatorError};
pub use reverse_relay::{ReverseRelay, ReverseRelayError};
pub use withdrawal::{
    VerifiedWithdrawal, WithdrawalClaimError, WithdrawalClaimVerifier, WithdrawalConfig,
};

use anyhow::{Context, Result};
use esn_storage::{BunchStore, ClaimStore, ReverseRelayStore, Storage};
use tracing::info;

/// Both relays and both claim verifiers over one database.
pub struct EsnBridge<C, R> {
    storage: Storage,
    reverse_relay: ReverseRelay,
    bunch_relay: BunchRelay,
    deposits: DepositClaimVerifier<C>,
    withdrawals: WithdrawalClaimVerifier<R>,
}

impl<C: CreditLedger, R: ReleaseLedger> EsnBridge<C, R> {
    /// Open the database at `config.storage.path`.
    pub fn open(config: &BridgeConfig, credit: C, release: R) -> Result<Self> {
        let storage = Storage::open(&config.storage.path).with_context(|| {
            format!("failed opening database at {}", config.storage.path.display())
        })?;
        Self::with_storage(config, storage, credit, release)
    }

    pub fn with_storage(
        config: &BridgeConfig,
        storage: Storage,
        credit: C,
        release: R,
    ) -> Result<Self> {
        let validators = config.validator_set()?;
        let db = storage.db();

        let headers = ReverseRelayStore::open(db, config.reverse_relay.initial_latest_block_number)
            .context("failed opening reverse relay store")?;
        let bunches = BunchStore::open(db, config.bunch_relay.first_start_block_number)
            .context("failed opening bunch store")?;
        let claims = ClaimStore::open(db).context("failed opening claim store")?;

        let reverse_relay = ReverseRelay::new(validators.clone(), headers.clone());
        let bunch_relay = BunchRelay::new(validators.clone(), config.signing_domain()?, bunches.clone());
        let deposits =
            DepositClaimVerifier::new(config.deposit_config()?, headers, claims.clone(), credit);
        let withdrawals =
            WithdrawalClaimVerifier::new(config.withdrawal_config()?, bunches, claims, release);

        info!(
            validators = validators.len(),
            quorum = validators.quorum(),
            latest_block_number = reverse_relay.latest_block_number()?,
            next_start_block_number = bunch_relay.get_next_start_block_number()?,
            "bridge opened"
        );
        Ok(Self {
            storage,
            reverse_relay,
            bunch_relay,
            deposits,
            withdrawals,
        })
    }

    pub fn reverse_relay(&self) -> &ReverseRelay {
        &self.reverse_relay
    }

    pub fn bunch_relay(&self) -> &BunchRelay {
        &self.bunch_relay
    }

    pub fn deposits(&self) -> &DepositClaimVerifier<C> {
        &self.deposits
    }

    pub fn withdrawals(&self) -> &WithdrawalClaimVerifier<R> {
        &self.withdrawals
    }

    pub fn flush(&self) -> Result<()> {
        self.storage.flush().context("failed flushing database")
    }
}
