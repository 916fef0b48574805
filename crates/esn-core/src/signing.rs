//! secp256k1 signer recovery and the bunch signing digest.
//!
//! Signatures are 65 bytes `r ++ s ++ v` with `v` in `{0, 1, 27, 28}`.
//! High-`s` signatures are rejected so each signer has exactly one valid
//! encoding.
//!
//! Bunch digest (v1):
//! `keccak256(prefix ++ contract ++ u256(start) ++ u256(depth) ++ txMegaRoot
//!  ++ receiptsMegaRoot ++ lastBlockHash)`
//! where `prefix` defaults to the EIP-191 version-0 bytes `0x19 0x00`.

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, SECP256K1};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keccak;
use crate::types::{hex_20, hex_32, Address, Bunch, Hash256};

/// EIP-191 "data with intended validator" prefix.
pub const EIP191_VALIDATOR_PREFIX: &[u8] = &[0x19, 0x00];

/// secp256k1 group order divided by two, big-endian.
const SECP256K1_HALF_ORDER: [u8; 32] = [
    0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0x5d, 0x57, 0x6e, 0x73, 0x57, 0xa4, 0x50, 0x1d, 0xdf, 0xe9, 0x2f, 0x46, 0x68, 0x1b,
    0x20, 0xa0,
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("invalid recovery id {0}")]
    InvalidRecoveryId(u8),

    #[error("signature s value is not in the lower half order")]
    HighS,

    #[error("malformed signature: {0}")]
    Malformed(String),

    #[error("signer recovery failed: {0}")]
    RecoveryFailed(String),
}

/// 65-byte recoverable signature `r ++ s ++ v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature65(pub [u8; 65]);

impl Signature65 {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SignatureError> {
        let array: [u8; 65] = bytes
            .try_into()
            .map_err(|_| SignatureError::Malformed(format!("expected 65 bytes, got {}", bytes.len())))?;
        Ok(Self(array))
    }

    /// Build from the components of a transaction signature.
    pub fn from_parts(r: &[u8; 32], s: &[u8; 32], recovery_id: u8) -> Self {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(r);
        out[32..64].copy_from_slice(s);
        out[64] = recovery_id;
        Self(out)
    }

    /// Normalized recovery id (0 or 1).
    pub fn recovery_id(&self) -> Result<u8, SignatureError> {
        match self.0[64] {
            v @ (0 | 1) => Ok(v),
            v @ (27 | 28) => Ok(v - 27),
            v => Err(SignatureError::InvalidRecoveryId(v)),
        }
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Ethereum address of an uncompressed secp256k1 public key.
pub fn address_from_public_key(public_key: &PublicKey) -> Address {
    let uncompressed = public_key.serialize_uncompressed();
    let hash = keccak(&uncompressed[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    address
}

/// Recover the address that produced `signature` over `digest`.
pub fn recover_signer(digest: &Hash256, signature: &Signature65) -> Result<Address, SignatureError> {
    let recovery_id = signature.recovery_id()?;
    if signature.0[32..64] > SECP256K1_HALF_ORDER[..] {
        return Err(SignatureError::HighS);
    }

    let recovery_id = RecoveryId::from_i32(i32::from(recovery_id))
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;
    let recoverable = RecoverableSignature::from_compact(&signature.0[..64], recovery_id)
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;
    let message = Message::from_digest_slice(digest)
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;
    let public_key = SECP256K1
        .recover_ecdsa(&message, &recoverable)
        .map_err(|e| SignatureError::RecoveryFailed(e.to_string()))?;
    Ok(address_from_public_key(&public_key))
}

/// Domain a bunch header is signed for: a prefix and the relay contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningDomain {
    #[serde(with = "hex_bytes")]
    pub prefix: Vec<u8>,
    #[serde(with = "hex_20")]
    pub contract: Address,
}

impl SigningDomain {
    /// EIP-191 version-0 domain bound to `contract`.
    pub fn eip191(contract: Address) -> Self {
        Self {
            prefix: EIP191_VALIDATOR_PREFIX.to_vec(),
            contract,
        }
    }
}

/// The signed content of a bunch submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BunchHeader {
    pub start_block_number: u64,
    pub bunch_depth: u8,
    #[serde(with = "hex_32")]
    pub transactions_mega_root: Hash256,
    #[serde(with = "hex_32")]
    pub receipts_mega_root: Hash256,
    #[serde(with = "hex_32")]
    pub last_block_hash: Hash256,
}

impl BunchHeader {
    /// Five 32-byte big-endian words.
    pub fn encode(&self) -> [u8; 160] {
        let mut out = [0u8; 160];
        out[24..32].copy_from_slice(&self.start_block_number.to_be_bytes());
        out[63] = self.bunch_depth;
        out[64..96].copy_from_slice(&self.transactions_mega_root);
        out[96..128].copy_from_slice(&self.receipts_mega_root);
        out[128..160].copy_from_slice(&self.last_block_hash);
        out
    }

    /// Digest validators sign for this header under `domain`.
    pub fn signing_digest(&self, domain: &SigningDomain) -> Hash256 {
        let mut buf = Vec::with_capacity(domain.prefix.len() + 20 + 160);
        buf.extend_from_slice(&domain.prefix);
        buf.extend_from_slice(&domain.contract);
        buf.extend_from_slice(&self.encode());
        keccak(buf)
    }

    /// The stored bunch (the block hash is only signed, not kept).
    pub fn to_bunch(&self) -> Bunch {
        Bunch {
            start_block_number: self.start_block_number,
            bunch_depth: self.bunch_depth,
            transactions_mega_root: self.transactions_mega_root,
            receipts_mega_root: self.receipts_mega_root,
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// Deterministic signers for fixtures.
#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};

    use super::{address_from_public_key, Signature65};
    use crate::keccak;
    use crate::types::{Address, Hash256};

    /// A secp256k1 key derived from a seed.
    #[derive(Debug, Clone, Copy)]
    pub struct TestSigner {
        secret: SecretKey,
    }

    impl TestSigner {
        pub fn from_seed(seed: u64) -> Self {
            let mut material = keccak(seed.to_be_bytes());
            loop {
                if let Ok(secret) = SecretKey::from_slice(&material) {
                    return Self { secret };
                }
                material = keccak(material);
            }
        }

        pub fn address(&self) -> Address {
            address_from_public_key(&PublicKey::from_secret_key_global(&self.secret))
        }

        /// Sign `digest`, `v` in `{27, 28}`.
        pub fn sign(&self, digest: &Hash256) -> Signature65 {
            let message = Message::from_digest(*digest);
            let signature = SECP256K1.sign_ecdsa_recoverable(&message, &self.secret);
            let (recovery_id, compact) = signature.serialize_compact();
            let mut out = [0u8; 65];
            out[..64].copy_from_slice(&compact);
            out[64] = 27 + u8::from(recovery_id.to_i32() == 1);
            Signature65(out)
        }
    }

    /// `count` signers sorted by descending address.
    pub fn signers_descending(count: u64) -> Vec<TestSigner> {
        let mut signers: Vec<TestSigner> = (1..=count).map(TestSigner::from_seed).collect();
        signers.sort_by(|a, b| b.address().cmp(&a.address()));
        signers
    }
}
