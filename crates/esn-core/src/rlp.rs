//! Minimal RLP item splitting on top of `alloy_rlp::Header`.
//!
//! Trie nodes, transactions and receipts are decoded field by field from
//! borrowed slices; nothing is copied until a verifier needs it.

use alloy_rlp::{Buf, Header};

/// One RLP item inside a list.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RlpItem<'a> {
    /// Full encoding including the header.
    pub(crate) raw: &'a [u8],
    /// Payload without the header.
    pub(crate) payload: &'a [u8],
    pub(crate) list: bool,
}

/// Take the next item off `buf`.
pub(crate) fn split_item<'a>(buf: &mut &'a [u8]) -> Result<RlpItem<'a>, alloy_rlp::Error> {
    let start: &'a [u8] = *buf;
    let header = Header::decode(buf)?;
    let rest: &'a [u8] = *buf;
    if rest.len() < header.payload_length {
        return Err(alloy_rlp::Error::InputTooShort);
    }
    let payload = &rest[..header.payload_length];
    buf.advance(header.payload_length);
    let consumed = start.len() - buf.len();
    Ok(RlpItem {
        raw: &start[..consumed],
        payload,
        list: header.list,
    })
}

/// Decode `data` as exactly one list and return its items.
pub(crate) fn decode_list(data: &[u8]) -> Result<Vec<RlpItem<'_>>, alloy_rlp::Error> {
    let mut buf = data;
    let outer = split_item(&mut buf)?;
    if !outer.list {
        return Err(alloy_rlp::Error::UnexpectedString);
    }
    if !buf.is_empty() {
        return Err(alloy_rlp::Error::Custom("trailing bytes after list"));
    }

    let mut inner = outer.payload;
    let mut items = Vec::new();
    while !inner.is_empty() {
        items.push(split_item(&mut inner)?);
    }
    Ok(items)
}

/// Wrap already-encoded items in a list header.
pub(crate) fn encode_list_of_raw<'a>(items: impl IntoIterator<Item = &'a [u8]> + Clone) -> Vec<u8> {
    let payload_length: usize = items.clone().into_iter().map(<[u8]>::len).sum();
    let mut out = Vec::with_capacity(payload_length + 9);
    Header {
        list: true,
        payload_length,
    }
    .encode(&mut out);
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_single_byte_and_strings() {
        // [0x05, "dog", []]
        let data = [0xc6, 0x05, 0x83, b'd', b'o', b'g', 0xc0];
        let items = decode_list(&data).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].payload, &[0x05]);
        assert_eq!(items[0].raw, &[0x05]);
        assert_eq!(items[1].payload, b"dog");
        assert_eq!(items[1].raw, &[0x83, b'd', b'o', b'g']);
        assert!(items[2].list);
        assert!(items[2].payload.is_empty());
    }

    #[test]
    fn rejects_string_and_trailing() {
        assert!(decode_list(&[0x83, b'd', b'o', b'g']).is_err());
        assert!(decode_list(&[0xc0, 0x00]).is_err());
        assert!(decode_list(&[0xc3, 0x01]).is_err());
        assert!(decode_list(&[]).is_err());
    }

    #[test]
    fn reencode_roundtrip() {
        let data = [0xc6, 0x05, 0x83, b'd', b'o', b'g', 0xc0];
        let items = decode_list(&data).unwrap();
        let out = encode_list_of_raw(items.iter().map(|i| i.raw));
        assert_eq!(out, data);
    }
}
