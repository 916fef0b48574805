//! Decoding of raw transactions committed to by a block's transaction trie.
//!
//! Supports legacy (pre- and post-EIP-155), EIP-2930 and EIP-1559 envelopes.
//! The sender is recovered from the signature over the reconstructed signing
//! payload; the hash is `keccak256` of the raw bytes exactly as stored in the
//! trie.

use alloy_primitives::U256;
use thiserror::Error;

use crate::keccak;
use crate::rlp::{decode_list, encode_list_of_raw, RlpItem};
use crate::signing::{recover_signer, Signature65, SignatureError};
use crate::types::{Address, Hash256};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxDecodeError {
    #[error("empty transaction")]
    Empty,

    #[error("rlp: {0}")]
    Rlp(String),

    #[error("unsupported transaction type 0x{0:02x}")]
    UnsupportedType(u8),

    #[error("expected {expected} fields, got {got}")]
    FieldCount { expected: usize, got: usize },

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("invalid signature v value {0}")]
    InvalidV(u64),

    #[error(transparent)]
    Signature(#[from] SignatureError),
}

/// EIP-2718 envelope type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxType {
    Legacy,
    AccessList,
    DynamicFee,
}

impl TxType {
    pub fn type_byte(&self) -> Option<u8> {
        match self {
            Self::Legacy => None,
            Self::AccessList => Some(0x01),
            Self::DynamicFee => Some(0x02),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransaction {
    pub tx_type: TxType,
    /// `None` for pre-EIP-155 legacy transactions.
    pub chain_id: Option<u64>,
    pub nonce: u64,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub value: U256,
    pub input: Vec<u8>,
    pub sender: Address,
    pub hash: Hash256,
}

/// Field positions shared by every envelope.
struct Layout {
    fields: usize,
    chain_id: Option<usize>,
    nonce: usize,
    to: usize,
    value: usize,
    input: usize,
    /// First signature field (`v` or `yParity`); `r` and `s` follow.
    signature: usize,
}

const LEGACY: Layout = Layout {
    fields: 9,
    chain_id: None,
    nonce: 0,
    to: 3,
    value: 4,
    input: 5,
    signature: 6,
};

const ACCESS_LIST: Layout = Layout {
    fields: 11,
    chain_id: Some(0),
    nonce: 1,
    to: 4,
    value: 5,
    input: 6,
    signature: 8,
};

const DYNAMIC_FEE: Layout = Layout {
    fields: 12,
    chain_id: Some(0),
    nonce: 1,
    to: 5,
    value: 6,
    input: 7,
    signature: 9,
};

fn invalid(field: &'static str, reason: impl Into<String>) -> TxDecodeError {
    TxDecodeError::InvalidField {
        field,
        reason: reason.into(),
    }
}

fn string_payload<'a>(item: &RlpItem<'a>, field: &'static str) -> Result<&'a [u8], TxDecodeError> {
    if item.list {
        return Err(invalid(field, "expected string, got list"));
    }
    Ok(item.payload)
}

fn canonical_uint<'a>(
    item: &RlpItem<'a>,
    field: &'static str,
    max_len: usize,
) -> Result<&'a [u8], TxDecodeError> {
    let payload = string_payload(item, field)?;
    if payload.len() > max_len {
        return Err(invalid(field, format!("{} bytes exceeds {max_len}", payload.len())));
    }
    if payload.first() == Some(&0) {
        return Err(invalid(field, "leading zero"));
    }
    Ok(payload)
}

pub(crate) fn decode_u64(item: &RlpItem<'_>, field: &'static str) -> Result<u64, TxDecodeError> {
    let payload = canonical_uint(item, field, 8)?;
    let mut buf = [0u8; 8];
    buf[8 - payload.len()..].copy_from_slice(payload);
    Ok(u64::from_be_bytes(buf))
}

pub(crate) fn decode_u256(item: &RlpItem<'_>, field: &'static str) -> Result<U256, TxDecodeError> {
    let payload = canonical_uint(item, field, 32)?;
    Ok(U256::from_be_slice(payload))
}

fn decode_word(item: &RlpItem<'_>, field: &'static str) -> Result<[u8; 32], TxDecodeError> {
    let payload = canonical_uint(item, field, 32)?;
    let mut word = [0u8; 32];
    word[32 - payload.len()..].copy_from_slice(payload);
    Ok(word)
}

fn decode_to(item: &RlpItem<'_>) -> Result<Option<Address>, TxDecodeError> {
    let payload = string_payload(item, "to")?;
    match payload.len() {
        0 => Ok(None),
        20 => {
            let mut address = [0u8; 20];
            address.copy_from_slice(payload);
            Ok(Some(address))
        }
        n => Err(invalid("to", format!("{n} bytes"))),
    }
}

/// Decode a raw transaction and recover its sender.
pub fn decode_transaction(raw: &[u8]) -> Result<DecodedTransaction, TxDecodeError> {
    let Some(&first) = raw.first() else {
        return Err(TxDecodeError::Empty);
    };

    let (tx_type, layout, body) = if first >= 0xc0 {
        (TxType::Legacy, &LEGACY, raw)
    } else {
        match first {
            0x01 => (TxType::AccessList, &ACCESS_LIST, &raw[1..]),
            0x02 => (TxType::DynamicFee, &DYNAMIC_FEE, &raw[1..]),
            other => return Err(TxDecodeError::UnsupportedType(other)),
        }
    };

    let items = decode_list(body).map_err(|e| TxDecodeError::Rlp(e.to_string()))?;
    if items.len() != layout.fields {
        return Err(TxDecodeError::FieldCount {
            expected: layout.fields,
            got: items.len(),
        });
    }

    let nonce = decode_u64(&items[layout.nonce], "nonce")?;
    let to = decode_to(&items[layout.to])?;
    let value = decode_u256(&items[layout.value], "value")?;
    let input = string_payload(&items[layout.input], "input")?.to_vec();
    let v = decode_u64(&items[layout.signature], "v")?;
    let r = decode_word(&items[layout.signature + 1], "r")?;
    let s = decode_word(&items[layout.signature + 2], "s")?;

    let unsigned = &items[..layout.signature];
    let (chain_id, recovery_id, signing_hash) = match tx_type {
        TxType::Legacy => {
            let fields = unsigned.iter().map(|i| i.raw);
            match v {
                27 | 28 => (None, v - 27, keccak(encode_list_of_raw(fields))),
                v if v >= 35 => {
                    let chain_id = (v - 35) / 2;
                    let chain_id_rlp = alloy_rlp::encode(chain_id);
                    let empty: &[u8] = &[0x80];
                    let payload = encode_list_of_raw(
                        fields.chain([chain_id_rlp.as_slice(), empty, empty]),
                    );
                    (Some(chain_id), (v - 35) % 2, keccak(payload))
                }
                other => return Err(TxDecodeError::InvalidV(other)),
            }
        }
        TxType::AccessList | TxType::DynamicFee => {
            if v > 1 {
                return Err(TxDecodeError::InvalidV(v));
            }
            let chain_id = match layout.chain_id {
                Some(idx) => decode_u64(&items[idx], "chain_id")?,
                None => return Err(invalid("chain_id", "missing")),
            };
            let mut payload = vec![first];
            payload.extend(encode_list_of_raw(unsigned.iter().map(|i| i.raw)));
            (Some(chain_id), v, keccak(payload))
        }
    };

    // recovery_id is 0 or 1 on every path above.
    let recovery_id = u8::from(recovery_id == 1);
    let signature = Signature65::from_parts(&r, &s, recovery_id);
    let sender = recover_signer(&signing_hash, &signature)?;

    Ok(DecodedTransaction {
        tx_type,
        chain_id,
        nonce,
        to,
        value,
        input,
        sender,
        hash: keccak(raw),
    })
}

/// Signed transaction encoders for fixtures.
#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use alloy_primitives::U256;
    use alloy_rlp::Encodable;

    use crate::keccak;
    use crate::rlp::encode_list_of_raw;
    use crate::signing::testing::TestSigner;
    use crate::types::Address;

    const GAS_PRICE: u64 = 1_000_000_000;
    const GAS_LIMIT: u64 = 21_000;

    fn enc<T: Encodable + ?Sized>(value: &T) -> Vec<u8> {
        let mut out = Vec::new();
        value.encode(&mut out);
        out
    }

    fn signature_fields(signer: &TestSigner, digest: &[u8; 32]) -> (u64, Vec<u8>, Vec<u8>) {
        let sig = signer.sign(digest);
        let r = U256::from_be_slice(&sig.0[..32]);
        let s = U256::from_be_slice(&sig.0[32..64]);
        (u64::from(sig.0[64] - 27), enc(&r), enc(&s))
    }

    /// Legacy value transfer; EIP-155 replay protection when `chain_id` is set.
    pub fn sign_legacy_transfer(
        signer: &TestSigner,
        chain_id: Option<u64>,
        nonce: u64,
        to: Address,
        value: U256,
        input: &[u8],
    ) -> Vec<u8> {
        let base = [
            enc(&nonce),
            enc(&GAS_PRICE),
            enc(&GAS_LIMIT),
            enc(&to[..]),
            enc(&value),
            enc(input),
        ];
        let mut unsigned: Vec<&[u8]> = base.iter().map(Vec::as_slice).collect();
        let chain_rlp = chain_id.map(|id| enc(&id));
        let empty: &[u8] = &[0x80];
        if let Some(chain_rlp) = &chain_rlp {
            unsigned.extend([chain_rlp.as_slice(), empty, empty]);
        }
        let digest = keccak(encode_list_of_raw(unsigned.iter().copied()));
        let (parity, r, s) = signature_fields(signer, &digest);
        let v = match chain_id {
            Some(id) => 35 + 2 * id + parity,
            None => 27 + parity,
        };
        let v = enc(&v);
        encode_list_of_raw(
            base.iter()
                .map(Vec::as_slice)
                .chain([v.as_slice(), r.as_slice(), s.as_slice()]),
        )
    }

    /// Sign the typed envelope `ty || rlp(base)` and append the signature.
    fn sign_typed(signer: &TestSigner, ty: u8, base: &[Vec<u8>]) -> Vec<u8> {
        let mut payload = vec![ty];
        payload.extend(encode_list_of_raw(base.iter().map(Vec::as_slice)));
        let digest = keccak(&payload);
        let (parity, r, s) = signature_fields(signer, &digest);
        let parity = enc(&parity);

        let mut out = vec![ty];
        out.extend(encode_list_of_raw(
            base.iter()
                .map(Vec::as_slice)
                .chain([parity.as_slice(), r.as_slice(), s.as_slice()]),
        ));
        out
    }

    /// EIP-1559 value transfer with an empty access list.
    pub fn sign_eip1559_transfer(
        signer: &TestSigner,
        chain_id: u64,
        nonce: u64,
        to: Address,
        value: U256,
        input: &[u8],
    ) -> Vec<u8> {
        let base = [
            enc(&chain_id),
            enc(&nonce),
            enc(&GAS_PRICE),
            enc(&(GAS_PRICE * 2)),
            enc(&GAS_LIMIT),
            enc(&to[..]),
            enc(&value),
            enc(input),
            vec![0xc0],
        ];
        sign_typed(signer, 0x02, &base)
    }

    /// EIP-2930 value transfer whose access list warms one storage slot of
    /// `to`.
    pub fn sign_eip2930_transfer(
        signer: &TestSigner,
        chain_id: u64,
        nonce: u64,
        to: Address,
        value: U256,
        input: &[u8],
    ) -> Vec<u8> {
        let slot = enc(&[0u8; 32][..]);
        let slots = encode_list_of_raw([slot.as_slice()]);
        let address = enc(&to[..]);
        let entry = encode_list_of_raw([address.as_slice(), slots.as_slice()]);
        let access_list = encode_list_of_raw([entry.as_slice()]);
        let base = [
            enc(&chain_id),
            enc(&nonce),
            enc(&GAS_PRICE),
            enc(&GAS_LIMIT),
            enc(&to[..]),
            enc(&value),
            enc(input),
            access_list,
        ];
        sign_typed(signer, 0x01, &base)
    }
}
