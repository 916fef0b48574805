use std::io::Write;
use std::path::PathBuf;

use esn_bridge::config::{BridgeConfig, DB_PATH_ENV};
use esn_core::signing::EIP191_VALIDATOR_PREFIX;

const VALID: &str = r#"
[validators]
addresses = [
    "0x0101010101010101010101010101010101010101",
    "0x0202020202020202020202020202020202020202",
    "env:ESN_CONFIG_TEST_V3",
]

[reverse_relay]
initial_latest_block_number = 19000000

[bunch_relay]
contract_address = "0xcccccccccccccccccccccccccccccccccccccccc"
first_start_block_number = 4096

[deposit]
token_contract = "0x7070707070707070707070707070707070707070"
lock_contract = "4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c"

[withdrawal]
lock_address = "0x5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e"
chain_id = 7777

[storage]
path = "/var/lib/esn-bridge"

[limits]
max_proof_nodes = 32
"#;

#[test]
fn loads_and_resolves_config_file() {
    std::env::set_var("ESN_CONFIG_TEST_V3", "0x0303030303030303030303030303030303030303");
    std::env::set_var(DB_PATH_ENV, "/tmp/esn-override");

    let mut f = tempfile::NamedTempFile::new().unwrap();
    write!(f, "{VALID}").unwrap();
    let cfg = BridgeConfig::from_toml(f.path()).unwrap();

    assert_eq!(cfg.storage.path, PathBuf::from("/tmp/esn-override"));
    assert_eq!(cfg.reverse_relay.initial_latest_block_number, 19_000_000);
    assert_eq!(cfg.bunch_relay.first_start_block_number, 4096);

    let validators = cfg.validator_set().unwrap();
    assert_eq!(validators.len(), 3);
    assert_eq!(validators.quorum(), 2);
    assert!(validators.contains(&[0x03; 20]));

    let domain = cfg.signing_domain().unwrap();
    assert_eq!(domain.prefix, EIP191_VALIDATOR_PREFIX.to_vec());
    assert_eq!(domain.contract, [0xcc; 20]);

    let deposit = cfg.deposit_config().unwrap();
    assert_eq!(deposit.lock_contract, [0x4c; 20]);
    assert_eq!(deposit.limits.max_proof_nodes, 32);
    assert_eq!(
        deposit.limits.max_proof_bytes,
        esn_core::ProofLimits::default().max_proof_bytes
    );

    let withdrawal = cfg.withdrawal_config().unwrap();
    assert_eq!(withdrawal.lock_address, [0x5e; 20]);
    assert_eq!(withdrawal.chain_id, Some(7777));

    std::env::remove_var(DB_PATH_ENV);

    // Custom domain prefix.
    let raw = VALID.replace(
        "first_start_block_number = 4096",
        "first_start_block_number = 4096\ndomain_prefix = \"0x1945\"",
    );
    let cfg = BridgeConfig::from_toml_str(&raw).unwrap();
    assert_eq!(cfg.signing_domain().unwrap().prefix, vec![0x19, 0x45]);

    // Rejections.
    let duplicate = VALID.replace("env:ESN_CONFIG_TEST_V3", "0x0101010101010101010101010101010101010101");
    let err = BridgeConfig::from_toml_str(&duplicate).unwrap_err();
    assert!(format!("{err:#}").contains("duplicate validator"), "{err:#}");

    let short = VALID.replace("0x7070707070707070707070707070707070707070", "0x7070");
    let err = BridgeConfig::from_toml_str(&short).unwrap_err();
    assert!(format!("{err:#}").contains("deposit.token_contract"), "{err:#}");

    let missing_env = VALID.replace("env:ESN_CONFIG_TEST_V3", "env:ESN_CONFIG_TEST_UNSET");
    assert!(BridgeConfig::from_toml_str(&missing_env).is_err());

    let empty = VALID.replace(
        r#"    "0x0101010101010101010101010101010101010101",
    "0x0202020202020202020202020202020202020202",
    "env:ESN_CONFIG_TEST_V3",
"#,
        "",
    );
    let err = BridgeConfig::from_toml_str(&empty).unwrap_err();
    assert!(format!("{err:#}").contains("empty"), "{err:#}");

    let deep = VALID.replace("max_proof_nodes = 32", "max_bunch_depth = 40");
    assert!(BridgeConfig::from_toml_str(&deep).is_err());

    assert!(BridgeConfig::from_toml(&PathBuf::from("/nonexistent/esn.toml")).is_err());
}
