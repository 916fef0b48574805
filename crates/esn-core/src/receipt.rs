//! Decoding of raw receipts committed to by a block's receipts trie, and
//! matching of ERC-20 `Transfer` logs.

use alloy_primitives::U256;
use thiserror::Error;

use crate::rlp::{decode_list, RlpItem};
use crate::tx::decode_u64;
use crate::types::{Address, Hash256};

/// `keccak256("Transfer(address,address,uint256)")`.
pub const TRANSFER_EVENT_TOPIC: Hash256 = [
    0xdd, 0xf2, 0x52, 0xad, 0x1b, 0xe2, 0xc8, 0x9b, 0x69, 0xc2, 0xb0, 0x68, 0xfc, 0x37, 0x8d,
    0xaa, 0x95, 0x2b, 0xa7, 0xf1, 0x63, 0xc4, 0xa1, 0x16, 0x28, 0xf5, 0x5a, 0x4d, 0xf5, 0x23,
    0xb3, 0xef,
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiptDecodeError {
    #[error("empty receipt")]
    Empty,

    #[error("rlp: {0}")]
    Rlp(String),

    #[error("expected 4 receipt fields, got {0}")]
    FieldCount(usize),

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Outcome field of a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Failure,
    /// Pre-Byzantium intermediate state root; carries no success bit.
    PostState(Hash256),
}

impl ReceiptStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Hash256>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedReceipt {
    /// EIP-2718 type byte; `None` for legacy receipts.
    pub tx_type: Option<u8>,
    pub status: ReceiptStatus,
    pub cumulative_gas_used: u64,
    pub logs: Vec<Log>,
}

/// An ERC-20 transfer extracted from a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferEvent {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ReceiptDecodeError {
    ReceiptDecodeError::InvalidField {
        field,
        reason: reason.into(),
    }
}

fn fixed<const N: usize>(item: &RlpItem<'_>, field: &'static str) -> Result<[u8; N], ReceiptDecodeError> {
    if item.list {
        return Err(invalid(field, "expected string, got list"));
    }
    item.payload
        .try_into()
        .map_err(|_| invalid(field, format!("expected {N} bytes, got {}", item.payload.len())))
}

fn decode_log(item: &RlpItem<'_>) -> Result<Log, ReceiptDecodeError> {
    if !item.list {
        return Err(invalid("log", "expected list"));
    }
    let fields = decode_list(item.raw).map_err(|e| ReceiptDecodeError::Rlp(e.to_string()))?;
    let [address, topics, data] = fields.as_slice() else {
        return Err(invalid("log", format!("expected 3 fields, got {}", fields.len())));
    };

    if !topics.list {
        return Err(invalid("topics", "expected list"));
    }
    let topics = decode_list(topics.raw)
        .map_err(|e| ReceiptDecodeError::Rlp(e.to_string()))?
        .iter()
        .map(|t| fixed::<32>(t, "topic"))
        .collect::<Result<Vec<_>, _>>()?;

    if data.list {
        return Err(invalid("data", "expected string, got list"));
    }

    Ok(Log {
        address: fixed::<20>(address, "address")?,
        topics,
        data: data.payload.to_vec(),
    })
}

/// Decode a legacy or EIP-2718 typed receipt.
pub fn decode_receipt(raw: &[u8]) -> Result<DecodedReceipt, ReceiptDecodeError> {
    let Some(&first) = raw.first() else {
        return Err(ReceiptDecodeError::Empty);
    };
    let (tx_type, body) = if first < 0x80 {
        (Some(first), &raw[1..])
    } else {
        (None, raw)
    };

    let fields = decode_list(body).map_err(|e| ReceiptDecodeError::Rlp(e.to_string()))?;
    let [status, gas, bloom, logs] = fields.as_slice() else {
        return Err(ReceiptDecodeError::FieldCount(fields.len()));
    };

    if status.list {
        return Err(invalid("status", "expected string, got list"));
    }
    let status = match status.payload {
        [] => ReceiptStatus::Failure,
        [0x01] => ReceiptStatus::Success,
        root if root.len() == 32 => ReceiptStatus::PostState(fixed::<32>(status, "status")?),
        other => return Err(invalid("status", format!("{} bytes", other.len()))),
    };

    let cumulative_gas_used = decode_u64(gas, "cumulative_gas_used")
        .map_err(|e| invalid("cumulative_gas_used", e.to_string()))?;
    fixed::<256>(bloom, "logs_bloom")?;

    if !logs.list {
        return Err(invalid("logs", "expected list"));
    }
    let logs = decode_list(logs.raw)
        .map_err(|e| ReceiptDecodeError::Rlp(e.to_string()))?
        .iter()
        .map(decode_log)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DecodedReceipt {
        tx_type,
        status,
        cumulative_gas_used,
        logs,
    })
}

/// Address in the low 20 bytes of an indexed topic; `None` if the upper
/// 12 bytes are not zero.
pub fn topic_address(topic: &Hash256) -> Option<Address> {
    if topic[..12].iter().any(|b| *b != 0) {
        return None;
    }
    let mut address = [0u8; 20];
    address.copy_from_slice(&topic[12..]);
    Some(address)
}

/// Interpret `log` as an ERC-20 `Transfer` event.
pub fn parse_transfer(log: &Log) -> Option<TransferEvent> {
    let [topic0, from, to] = log.topics.as_slice() else {
        return None;
    };
    if topic0 != &TRANSFER_EVENT_TOPIC || log.data.len() != 32 {
        return None;
    }
    Some(TransferEvent {
        token: log.address,
        from: topic_address(from)?,
        to: topic_address(to)?,
        amount: U256::from_be_slice(&log.data),
    })
}

/// First `Transfer` of `token` into `recipient`.
pub fn find_transfer(logs: &[Log], token: &Address, recipient: &Address) -> Option<TransferEvent> {
    logs.iter()
        .filter(|log| &log.address == token)
        .filter_map(parse_transfer)
        .find(|transfer| &transfer.to == recipient)
}

/// Receipt and log encoders for fixtures.
#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use alloy_primitives::U256;
    use alloy_rlp::Encodable;

    use super::{Log, TRANSFER_EVENT_TOPIC};
    use crate::rlp::encode_list_of_raw;
    use crate::types::{Address, Hash256};

    fn enc<T: Encodable + ?Sized>(value: &T) -> Vec<u8> {
        let mut out = Vec::new();
        value.encode(&mut out);
        out
    }

    fn address_topic(address: &Address) -> Hash256 {
        let mut topic = [0u8; 32];
        topic[12..].copy_from_slice(address);
        topic
    }

    pub fn transfer_log(token: Address, from: Address, to: Address, amount: U256) -> Log {
        Log {
            address: token,
            topics: vec![TRANSFER_EVENT_TOPIC, address_topic(&from), address_topic(&to)],
            data: amount.to_be_bytes::<32>().to_vec(),
        }
    }

    fn encode_log(log: &Log) -> Vec<u8> {
        let topics: Vec<Vec<u8>> = log.topics.iter().map(|t| enc(&t[..])).collect();
        let topics = encode_list_of_raw(topics.iter().map(Vec::as_slice));
        let address = enc(&log.address[..]);
        let data = enc(log.data.as_slice());
        encode_list_of_raw([address.as_slice(), topics.as_slice(), data.as_slice()])
    }

    /// Encode a receipt; `tx_type` of `None` produces a legacy receipt.
    pub fn encode_receipt(tx_type: Option<u8>, success: bool, cumulative_gas: u64, logs: &[Log]) -> Vec<u8> {
        let status = if success { vec![0x01] } else { vec![0x80] };
        encode_with_status(tx_type, status, cumulative_gas, logs)
    }

    /// Pre-Byzantium legacy receipt carrying an intermediate state root.
    pub fn encode_post_state_receipt(state_root: Hash256, cumulative_gas: u64, logs: &[Log]) -> Vec<u8> {
        encode_with_status(None, enc(&state_root[..]), cumulative_gas, logs)
    }

    fn encode_with_status(tx_type: Option<u8>, status: Vec<u8>, cumulative_gas: u64, logs: &[Log]) -> Vec<u8> {
        let gas = enc(&cumulative_gas);
        let bloom = enc(&[0u8; 256][..]);
        let logs: Vec<Vec<u8>> = logs.iter().map(encode_log).collect();
        let logs = encode_list_of_raw(logs.iter().map(Vec::as_slice));

        let mut out = Vec::new();
        if let Some(ty) = tx_type {
            out.push(ty);
        }
        out.extend(encode_list_of_raw([
            status.as_slice(),
            gas.as_slice(),
            bloom.as_slice(),
            logs.as_slice(),
        ]));
        out
    }
}
