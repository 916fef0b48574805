mod common;

use common::Harness;
use esn_bridge::ReverseRelayError;
use esn_core::ErrorKind;

#[test]
fn quorum_follows_two_thirds() {
    for (n, quorum) in [(1, 1), (2, 2), (3, 2), (4, 3), (5, 4), (6, 4), (7, 5)] {
        let h = Harness::with_validators(n);
        assert_eq!(h.reverse_relay.quorum(), quorum, "n = {n}");
    }
}

#[test]
fn finalization_requires_quorum_behind_one_candidate() {
    let h = Harness::new();
    let (v1, v2, v3) = (h.validator(0), h.validator(1), h.validator(2));

    // Split vote: two candidates with one proposer each.
    let a = h.reverse_relay.propose_block(&v1, 1, &[0xa1; 32], &[0xa2; 32]).unwrap();
    let b = h.reverse_relay.propose_block(&v2, 1, &[0xb1; 32], &[0xb2; 32]).unwrap();
    assert_eq!((a.proposal_index, b.proposal_index), (0, 1));
    assert!(a.new_candidate && b.new_candidate);
    assert_eq!(h.reverse_relay.get_proposals_count(1).unwrap(), 2);

    for index in [0, 1] {
        let err = h.reverse_relay.finalize_proposal(&v3, 1, index).unwrap_err();
        assert!(matches!(err, ReverseRelayError::NotEnoughProposals { have: 1, need: 2 }));
    }

    // Third validator joins candidate B.
    let joined = h.reverse_relay.propose_block(&v3, 1, &[0xb1; 32], &[0xb2; 32]).unwrap();
    assert_eq!(joined.proposal_index, 1);
    assert_eq!(joined.proposer_count, 2);
    assert!(!joined.new_candidate);

    let finalized = h.reverse_relay.finalize_proposal(&v1, 1, 1).unwrap();
    assert_eq!(finalized.record.transactions_root, [0xb1; 32]);
    assert_eq!(finalized.record.receipts_root, [0xb2; 32]);
    assert_eq!(finalized.discarded_candidates, 2);
    assert_eq!(h.reverse_relay.latest_block_number().unwrap(), 1);
    assert_eq!(h.reverse_relay.get_proposals_count(1).unwrap(), 0);
    assert!(h.reverse_relay.proposal(1, 0).unwrap().is_none());
}

#[test]
fn first_finalized_wins() {
    let h = Harness::with_validators(4);
    let v: Vec<_> = (0..4).map(|i| h.validator(i)).collect();
    assert_eq!(h.reverse_relay.quorum(), 3);

    for proposer in &v[..3] {
        h.reverse_relay.propose_block(proposer, 1, &[1; 32], &[1; 32]).unwrap();
    }
    h.reverse_relay.propose_block(&v[3], 1, &[2; 32], &[2; 32]).unwrap();

    h.reverse_relay.finalize_proposal(&v[3], 1, 0).unwrap();
    let err = h.reverse_relay.finalize_proposal(&v[3], 1, 1).unwrap_err();
    assert!(matches!(err, ReverseRelayError::AlreadyFinalized { block_number: 1, latest: 1 }));
    assert_eq!(err.kind(), ErrorKind::Sequence);
    assert_eq!(h.reverse_relay.block_header(1).unwrap().unwrap().transactions_root, [1; 32]);
}

#[test]
fn blocks_finalize_strictly_in_order() {
    let h = Harness::new();
    let (v1, v2) = (h.validator(0), h.validator(1));

    // Early proposals for block 2 are kept until block 1 lands.
    h.reverse_relay.propose_block(&v1, 2, &[2; 32], &[2; 32]).unwrap();
    h.reverse_relay.propose_block(&v2, 2, &[2; 32], &[2; 32]).unwrap();
    let err = h.reverse_relay.finalize_proposal(&v1, 2, 0).unwrap_err();
    assert!(matches!(err, ReverseRelayError::OutOfSequence { expected: 1, got: 2 }));

    h.finalize_block(1, &[1; 32], &[1; 32]);
    h.reverse_relay.finalize_proposal(&v1, 2, 0).unwrap();
    assert_eq!(h.reverse_relay.latest_block_number().unwrap(), 2);

    let err = h.reverse_relay.propose_block(&v1, 2, &[3; 32], &[3; 32]).unwrap_err();
    assert!(matches!(err, ReverseRelayError::AlreadyFinalized { block_number: 2, latest: 2 }));
}

#[test]
fn duplicate_and_foreign_proposers() {
    let h = Harness::new();
    let v1 = h.validator(0);

    h.reverse_relay.propose_block(&v1, 1, &[1; 32], &[1; 32]).unwrap();
    let err = h.reverse_relay.propose_block(&v1, 1, &[1; 32], &[1; 32]).unwrap_err();
    assert!(matches!(err, ReverseRelayError::AlreadyProposed { block_number: 1, .. }));
    let err = h.reverse_relay.propose_block(&v1, 1, &[9; 32], &[9; 32]).unwrap_err();
    assert!(matches!(err, ReverseRelayError::AlreadyProposed { .. }));
    assert_eq!(h.reverse_relay.get_proposals_count(1).unwrap(), 1);

    let err = h.reverse_relay.propose_block(&[0xee; 20], 1, &[1; 32], &[1; 32]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert_eq!(err.to_string(), format!("caller 0x{} is not a validator", "ee".repeat(20)));
}

#[test]
fn state_survives_restart() {
    let h = Harness::new();
    let (v1, v2) = (h.validator(0), h.validator(1));
    h.finalize_block(1, &[1; 32], &[1; 32]);
    h.reverse_relay.propose_block(&v1, 2, &[2; 32], &[2; 32]).unwrap();

    let h = h.reopen();
    assert_eq!(h.reverse_relay.latest_block_number().unwrap(), 1);
    assert_eq!(h.reverse_relay.get_proposals_count(2).unwrap(), 1);
    let err = h.reverse_relay.propose_block(&v1, 2, &[2; 32], &[2; 32]).unwrap_err();
    assert!(matches!(err, ReverseRelayError::AlreadyProposed { .. }));

    h.reverse_relay.propose_block(&v2, 2, &[2; 32], &[2; 32]).unwrap();
    h.reverse_relay.finalize_proposal(&v2, 2, 0).unwrap();
    assert_eq!(h.reverse_relay.latest_block_number().unwrap(), 2);
}
