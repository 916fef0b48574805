use anyhow::{anyhow, Context, Result};
use esn_core::types::parse_hex_array;
use esn_core::{Address, ProofLimits, SigningDomain, ValidatorSet};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

use crate::deposit::DepositConfig;
use crate::withdrawal::WithdrawalConfig;

/// Overrides `storage.path`.
pub const DB_PATH_ENV: &str = "ESN_BRIDGE_DB_PATH";

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub validators: ValidatorsConfig,
    #[serde(default)]
    pub reverse_relay: ReverseRelayConfig,
    pub bunch_relay: BunchRelayConfig,
    pub deposit: DepositSection,
    pub withdrawal: WithdrawalSection,
    pub storage: StorageConfig,
    #[serde(default)]
    pub limits: ProofLimits,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorsConfig {
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReverseRelayConfig {
    /// Block number treated as already finalized on first start.
    #[serde(default)]
    pub initial_latest_block_number: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BunchRelayConfig {
    pub contract_address: String,
    /// Hex; defaults to the EIP-191 version-0 prefix.
    #[serde(default)]
    pub domain_prefix: Option<String>,
    #[serde(default)]
    pub first_start_block_number: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepositSection {
    pub token_contract: String,
    pub lock_contract: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawalSection {
    pub lock_address: String,
    #[serde(default)]
    pub chain_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl BridgeConfig {
    pub fn from_toml(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading config file: {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut cfg: BridgeConfig = toml::from_str(raw).context("failed parsing config toml")?;

        if let Ok(v) = env::var(DB_PATH_ENV) {
            if !v.trim().is_empty() {
                cfg.storage.path = PathBuf::from(v);
            }
        }

        let storage_path = cfg.storage.path.to_string_lossy().into_owned();
        cfg.storage.path = PathBuf::from(resolve_env_ref(&storage_path)?);
        for address in &mut cfg.validators.addresses {
            *address = resolve_env_ref(address)?;
        }
        cfg.bunch_relay.contract_address = resolve_env_ref(&cfg.bunch_relay.contract_address)?;
        cfg.deposit.token_contract = resolve_env_ref(&cfg.deposit.token_contract)?;
        cfg.deposit.lock_contract = resolve_env_ref(&cfg.deposit.lock_contract)?;
        cfg.withdrawal.lock_address = resolve_env_ref(&cfg.withdrawal.lock_address)?;

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        self.validator_set()?;
        self.signing_domain()?;
        self.deposit_config()?;
        self.withdrawal_config()?;
        if self.limits.max_bunch_depth > esn_core::MAX_BUNCH_DEPTH {
            return Err(anyhow!(
                "limits.max_bunch_depth must be <= {}",
                esn_core::MAX_BUNCH_DEPTH
            ));
        }
        if self.limits.max_proof_nodes == 0 {
            return Err(anyhow!("limits.max_proof_nodes must be > 0"));
        }
        Ok(())
    }

    pub fn validator_set(&self) -> Result<ValidatorSet> {
        let members = self
            .validators
            .addresses
            .iter()
            .enumerate()
            .map(|(i, a)| parse_address(a).with_context(|| format!("validators.addresses[{i}]")))
            .collect::<Result<Vec<_>>>()?;
        ValidatorSet::new(members).context("invalid validator set")
    }

    pub fn signing_domain(&self) -> Result<SigningDomain> {
        let contract = parse_address(&self.bunch_relay.contract_address)
            .context("bunch_relay.contract_address")?;
        let mut domain = SigningDomain::eip191(contract);
        if let Some(prefix) = &self.bunch_relay.domain_prefix {
            let prefix = prefix.trim();
            domain.prefix = hex::decode(prefix.strip_prefix("0x").unwrap_or(prefix))
                .context("bunch_relay.domain_prefix is not hex")?;
        }
        Ok(domain)
    }

    pub fn deposit_config(&self) -> Result<DepositConfig> {
        Ok(DepositConfig {
            token_contract: parse_address(&self.deposit.token_contract)
                .context("deposit.token_contract")?,
            lock_contract: parse_address(&self.deposit.lock_contract)
                .context("deposit.lock_contract")?,
            limits: self.limits,
        })
    }

    pub fn withdrawal_config(&self) -> Result<WithdrawalConfig> {
        Ok(WithdrawalConfig {
            lock_address: parse_address(&self.withdrawal.lock_address)
                .context("withdrawal.lock_address")?,
            chain_id: self.withdrawal.chain_id,
            limits: self.limits,
        })
    }
}

fn parse_address(value: &str) -> Result<Address> {
    parse_hex_array::<20>(value).map_err(|e| anyhow!("invalid address {value:?}: {e}"))
}

pub fn resolve_env_ref(value: &str) -> Result<String> {
    const PREFIX: &str = "env:";
    if let Some(var) = value.strip_prefix(PREFIX) {
        let var = var.trim();
        if var.is_empty() {
            return Err(anyhow!("invalid env ref: {value}"));
        }
        return env::var(var).with_context(|| format!("missing env var {var} for {value}"));
    }
    Ok(value.to_string())
}
