//! Relay state persistence across reopen.
//!
//! 1. Finalized records, pending proposals, bunches and claims survive a restart
//! 2. Seed values passed on reopen never overwrite existing state
//! 3. Every store lives in the same schema-checked database

use esn_core::{BlockHeaderRecord, Bunch};
use esn_storage::{
    BunchStore, ClaimDirection, ClaimStore, ClaimStoreError, ProcessedClaim, ReverseRelayStore,
    Storage,
};
use tempfile::tempdir;

fn bunch(start: u64, depth: u8, tag: u8) -> Bunch {
    Bunch {
        start_block_number: start,
        bunch_depth: depth,
        transactions_mega_root: [tag; 32],
        receipts_mega_root: [tag.wrapping_add(1); 32],
    }
}

#[test]
fn relay_state_survives_restart() {
    let dir = tempdir().expect("tmpdir");

    {
        let storage = Storage::open(dir.path()).expect("open");
        let relay = ReverseRelayStore::open(storage.db(), 100).expect("relay");
        relay.add_proposal(101, &[1; 20], &[0xa0; 32], &[0xb0; 32]).unwrap();
        relay.add_proposal(101, &[2; 20], &[0xa0; 32], &[0xb0; 32]).unwrap();
        relay.finalize(101, 0, 2).unwrap();
        relay.add_proposal(102, &[3; 20], &[0xa1; 32], &[0xb1; 32]).unwrap();

        let bunches = BunchStore::open(storage.db(), 0).expect("bunches");
        bunches.append(&bunch(0, 1, 1)).unwrap();
        bunches.append(&bunch(2, 2, 3)).unwrap();

        let claims = ClaimStore::open(storage.db()).expect("claims");
        claims
            .mark_processed(&ProcessedClaim {
                direction: ClaimDirection::Deposit,
                tx_hash: [0xee; 32],
                recipient: [0xa1; 20],
                amount: "42".to_string(),
                block_number: 101,
            })
            .unwrap();

        storage.flush().expect("flush");
    }

    let storage = Storage::open(dir.path()).expect("reopen");

    let relay = ReverseRelayStore::open(storage.db(), 0).expect("relay");
    assert_eq!(relay.latest_block_number().unwrap(), 101);
    assert_eq!(
        relay.record(101).unwrap(),
        Some(BlockHeaderRecord {
            block_number: 101,
            transactions_root: [0xa0; 32],
            receipts_root: [0xb0; 32],
        })
    );
    assert_eq!(relay.proposal_count(102).unwrap(), 1);
    assert!(relay.has_proposed(102, &[3; 20]).unwrap());

    let bunches = BunchStore::open(storage.db(), 999).expect("bunches");
    assert_eq!(bunches.count().unwrap(), 2);
    assert_eq!(bunches.next_start_block_number().unwrap(), 6);
    assert_eq!(bunches.get(2).unwrap(), Some(bunch(2, 2, 3)));

    let claims = ClaimStore::open(storage.db()).expect("claims");
    assert!(claims.is_processed(ClaimDirection::Deposit, &[0xee; 32]).unwrap());
    let again = claims.mark_processed(&ProcessedClaim {
        direction: ClaimDirection::Deposit,
        tx_hash: [0xee; 32],
        recipient: [0xa2; 20],
        amount: "1".to_string(),
        block_number: 101,
    });
    assert!(matches!(again, Err(ClaimStoreError::AlreadyProcessed { .. })));
}
