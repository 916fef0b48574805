//! Relay records shared by the storage and bridge crates.
//!
//! Hashes and addresses are plain byte arrays so that they serialize
//! deterministically and compare by value. JSON renders them as hex.

use serde::{Deserialize, Serialize};

use crate::keccak;
use crate::merkle::MAX_BUNCH_DEPTH;

/// 32-byte keccak256 hash.
pub type Hash256 = [u8; 32];

/// 20-byte account address. Ordering is big-endian by value.
pub type Address = [u8; 20];

/// ETH block header roots finalized by the Reverse Relay.
///
/// Written once per block number, never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeaderRecord {
    pub block_number: u64,
    #[serde(with = "hex_32")]
    pub transactions_root: Hash256,
    #[serde(with = "hex_32")]
    pub receipts_root: Hash256,
}

/// Aggregated header covering `2^bunch_depth` consecutive ESN blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bunch {
    pub start_block_number: u64,
    pub bunch_depth: u8,
    #[serde(with = "hex_32")]
    pub transactions_mega_root: Hash256,
    #[serde(with = "hex_32")]
    pub receipts_mega_root: Hash256,
}

impl Bunch {
    /// Number of blocks covered, `None` if the depth is out of range.
    pub fn block_count(&self) -> Option<u64> {
        block_count_for_depth(self.bunch_depth)
    }

    /// First block number after this bunch.
    pub fn end_block_number(&self) -> Option<u64> {
        self.block_count()
            .and_then(|count| self.start_block_number.checked_add(count))
    }

    /// Whether `block_number` falls in `[start, start + 2^depth)`.
    pub fn contains(&self, block_number: u64) -> bool {
        match self.end_block_number() {
            Some(end) => block_number >= self.start_block_number && block_number < end,
            None => false,
        }
    }
}

/// `2^depth`, bounded by [`MAX_BUNCH_DEPTH`].
pub fn block_count_for_depth(depth: u8) -> Option<u64> {
    if depth > MAX_BUNCH_DEPTH {
        return None;
    }
    1u64.checked_shl(u32::from(depth))
}

/// Content address of a Reverse Relay candidate tuple.
///
/// `keccak256(transactions_root ++ receipts_root)`; two validators proposing
/// the same roots for a block land on the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProposalKey(#[serde(with = "hex_32")] pub Hash256);

impl ProposalKey {
    pub fn new(transactions_root: &Hash256, receipts_root: &Hash256) -> Self {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(transactions_root);
        buf[32..].copy_from_slice(receipts_root);
        Self(keccak(buf))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Parse a `0x`-optional hex string into a fixed-size array.
pub fn parse_hex_array<const N: usize>(s: &str) -> Result<[u8; N], String> {
    let s = s.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    let raw = hex::decode(s).map_err(|e| e.to_string())?;
    raw.as_slice()
        .try_into()
        .map_err(|_| format!("expected {} bytes, got {}", N, raw.len()))
}

/// Serde helper for 32-byte arrays as hex strings.
pub mod hex_32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_hex_array(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde helper for 20-byte addresses as hex strings.
pub mod hex_20 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 20], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 20], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_hex_array(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde helper for address lists as hex strings.
pub mod hex_20_seq {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(addresses: &[[u8; 20]], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(addresses.iter().map(hex::encode))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<[u8; 20]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Vec::<String>::deserialize(deserializer)?;
        raw.iter()
            .map(|s| super::parse_hex_array(s).map_err(serde::de::Error::custom))
            .collect()
    }
}
