#![no_main]
//! Deposit and withdrawal proof decoding on untrusted bytes.

use esn_core::{DepositProofV1, ProofLimits, WithdrawalProofV1};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let limits = ProofLimits::default();

    if let Ok(proof) = DepositProofV1::from_bytes(data, &limits) {
        let again = DepositProofV1::from_bytes(&proof.to_bytes(), &limits);
        assert_eq!(again.ok(), Some(proof));
    }
    if let Ok(proof) = WithdrawalProofV1::from_bytes(data, &limits) {
        assert!(proof.siblings().len() <= usize::from(limits.max_bunch_depth));
        let again = WithdrawalProofV1::from_bytes(&proof.to_bytes(), &limits);
        assert_eq!(again.ok(), Some(proof));
    }
});
