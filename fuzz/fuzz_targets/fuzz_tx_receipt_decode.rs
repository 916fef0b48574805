#![no_main]
//! Transaction and receipt decoding on untrusted bytes.

use esn_core::{decode_receipt, decode_transaction, find_transfer};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 512 * 1024 {
        return;
    }

    if let Ok(tx) = decode_transaction(data) {
        assert_eq!(tx.hash, esn_core::keccak(data));
    }

    if let Ok(receipt) = decode_receipt(data) {
        for log in &receipt.logs {
            let _ = find_transfer(std::slice::from_ref(log), &log.address, &[0u8; 20]);
        }
    }
});
