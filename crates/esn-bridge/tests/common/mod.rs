#![allow(dead_code)]

use std::sync::Arc;

use alloy_primitives::U256;
use esn_bridge::{
    BlockRoots, BunchBuilder, BunchRelay, DepositClaimVerifier, DepositConfig, MemoryLedger,
    ReverseRelay, WithdrawalClaimVerifier, WithdrawalConfig,
};
use esn_core::mpt::testing::TestTrie;
use esn_core::receipt::testing::{encode_receipt, transfer_log};
use esn_core::signing::testing::{signers_descending, TestSigner};
use esn_core::tx::testing::sign_legacy_transfer;
use esn_core::{
    keccak, rlp_encode_index, Address, BunchHeader, DepositProofV1, Hash256, ProofLimits,
    Signature65, SigningDomain, ValidatorSet,
};
use esn_storage::{BunchStore, ClaimStore, ReverseRelayStore, Storage};
use tempfile::TempDir;

pub const TOKEN: Address = [0x70; 20];
pub const ETH_LOCK: Address = [0x4c; 20];
pub const ESN_LOCK: Address = [0x5e; 20];
pub const RELAY_CONTRACT: Address = [0xcc; 20];
pub const ESN_CHAIN_ID: u64 = 7_777;

/// Validators sorted by descending address, wired over a temp database.
pub struct Harness {
    pub dir: TempDir,
    pub storage: Storage,
    pub signers: Vec<TestSigner>,
    pub validators: ValidatorSet,
    pub ledger: Arc<MemoryLedger>,
    pub reverse_relay: ReverseRelay,
    pub bunch_relay: BunchRelay,
    pub deposits: DepositClaimVerifier<Arc<MemoryLedger>>,
    pub withdrawals: WithdrawalClaimVerifier<Arc<MemoryLedger>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_validators(3)
    }

    pub fn with_validators(count: u64) -> Self {
        let dir = tempfile::tempdir().expect("tmpdir");
        let storage = Storage::open(dir.path().join("db")).expect("open storage");
        Self::build(dir, storage, count, Arc::new(MemoryLedger::new()))
    }

    /// Reopen the database of `self` as a fresh harness (restart). The
    /// in-memory ledger carries over.
    pub fn reopen(self) -> Self {
        let count = self.signers.len() as u64;
        let Harness {
            dir,
            storage,
            ledger,
            reverse_relay,
            bunch_relay,
            deposits,
            withdrawals,
            ..
        } = self;
        storage.flush().expect("flush");
        drop((reverse_relay, bunch_relay, deposits, withdrawals, storage));
        let storage = Storage::open(dir.path().join("db")).expect("reopen storage");
        Self::build(dir, storage, count, ledger)
    }

    fn build(dir: TempDir, storage: Storage, count: u64, ledger: Arc<MemoryLedger>) -> Self {
        let signers = signers_descending(count);
        let validators = ValidatorSet::new(signers.iter().map(TestSigner::address)).unwrap();
        let db = storage.db();
        let headers = ReverseRelayStore::open(db, 0).unwrap();
        let bunches = BunchStore::open(db, 0).unwrap();
        let claims = ClaimStore::open(db).unwrap();

        let reverse_relay = ReverseRelay::new(validators.clone(), headers.clone());
        let bunch_relay = BunchRelay::new(
            validators.clone(),
            SigningDomain::eip191(RELAY_CONTRACT),
            bunches.clone(),
        );
        let deposits = DepositClaimVerifier::new(
            DepositConfig {
                token_contract: TOKEN,
                lock_contract: ETH_LOCK,
                limits: ProofLimits::default(),
            },
            headers,
            claims.clone(),
            Arc::clone(&ledger),
        );
        let withdrawals = WithdrawalClaimVerifier::new(
            WithdrawalConfig {
                lock_address: ESN_LOCK,
                chain_id: Some(ESN_CHAIN_ID),
                limits: ProofLimits::default(),
            },
            bunches,
            claims,
            Arc::clone(&ledger),
        );
        Self {
            dir,
            storage,
            signers,
            validators,
            ledger,
            reverse_relay,
            bunch_relay,
            deposits,
            withdrawals,
        }
    }

    pub fn validator(&self, i: usize) -> Address {
        self.signers[i].address()
    }

    /// Propose `roots` from the first `quorum` validators and finalize.
    pub fn finalize_block(&self, block_number: u64, tx_root: &Hash256, receipts_root: &Hash256) {
        for signer in self.signers.iter().take(self.validators.quorum()) {
            self.reverse_relay
                .propose_block(&signer.address(), block_number, tx_root, receipts_root)
                .expect("propose");
        }
        self.reverse_relay
            .finalize_proposal(&self.validator(0), block_number, 0)
            .expect("finalize");
    }

    /// Signatures over `header` from `signers`, in the given order.
    pub fn sign_header(&self, header: &BunchHeader, signers: &[usize]) -> Vec<Signature65> {
        let digest = header.signing_digest(self.bunch_relay.domain());
        signers.iter().map(|i| self.signers[*i].sign(&digest)).collect()
    }

    /// Signatures from the first `quorum` validators (already descending).
    pub fn quorum_signatures(&self, header: &BunchHeader) -> Vec<Signature65> {
        let who: Vec<usize> = (0..self.validators.quorum()).collect();
        self.sign_header(header, &who)
    }
}

/// An ETH block holding a locking ERC-20 transfer at `position`.
pub struct EthDepositBlock {
    pub transactions: Vec<Vec<u8>>,
    pub receipts: Vec<Vec<u8>>,
    pub tx_trie: TestTrie,
    pub receipt_trie: TestTrie,
}

impl EthDepositBlock {
    /// `padding` unrelated transactions precede the deposit.
    pub fn new(depositor: &TestSigner, amount: U256, padding: usize) -> Self {
        let mut transactions = Vec::new();
        let mut receipts = Vec::new();
        for n in 0..padding {
            let other = TestSigner::from_seed(500 + n as u64);
            transactions.push(sign_legacy_transfer(
                &other,
                Some(1),
                n as u64,
                [0x99; 20],
                U256::from(1u64),
                &[],
            ));
            receipts.push(encode_receipt(None, true, 21_000 * (n as u64 + 1), &[]));
        }
        // ERC-20 transfer(lock, amount) call; only the receipt log is trusted.
        let mut input = vec![0xa9, 0x05, 0x9c, 0xbb];
        input.extend_from_slice(&[0u8; 12]);
        input.extend_from_slice(&ETH_LOCK);
        input.extend_from_slice(&amount.to_be_bytes::<32>());
        transactions.push(sign_legacy_transfer(
            depositor,
            Some(1),
            0,
            TOKEN,
            U256::ZERO,
            &input,
        ));
        receipts.push(encode_receipt(
            Some(0x02),
            true,
            60_000,
            &[transfer_log(TOKEN, depositor.address(), ETH_LOCK, amount)],
        ));
        Self::from_parts(transactions, receipts)
    }

    pub fn from_parts(transactions: Vec<Vec<u8>>, receipts: Vec<Vec<u8>>) -> Self {
        let tx_trie = TestTrie::from_indexed_values(&transactions);
        let receipt_trie = TestTrie::from_indexed_values(&receipts);
        Self {
            transactions,
            receipts,
            tx_trie,
            receipt_trie,
        }
    }

    pub fn deposit_position(&self) -> usize {
        self.transactions.len() - 1
    }

    pub fn proof(&self, block_number: u64, position: usize) -> DepositProofV1 {
        let key = rlp_encode_index(position as u64);
        DepositProofV1::new(
            block_number,
            key.clone(),
            self.transactions[position].clone(),
            self.tx_trie.proof(&key),
            self.receipts[position].clone(),
            self.receipt_trie.proof(&key),
        )
    }

    pub fn tx_hash(&self, position: usize) -> Hash256 {
        keccak(&self.transactions[position])
    }
}

/// One ESN block: its transactions and their trie.
pub struct EsnBlock {
    pub number: u64,
    pub transactions: Vec<Vec<u8>>,
    pub trie: TestTrie,
}

impl EsnBlock {
    pub fn new(number: u64, transactions: Vec<Vec<u8>>) -> Self {
        let trie = TestTrie::from_indexed_values(&transactions);
        Self {
            number,
            transactions,
            trie,
        }
    }

    pub fn roots(&self) -> BlockRoots {
        BlockRoots {
            transactions_root: self.trie.root(),
            receipts_root: keccak(self.trie.root()),
            block_hash: keccak(self.number.to_be_bytes()),
        }
    }
}

/// Native transfer into the ESN lock address.
pub fn esn_withdrawal_tx(sender: &TestSigner, nonce: u64, value: U256) -> Vec<u8> {
    sign_legacy_transfer(sender, Some(ESN_CHAIN_ID), nonce, ESN_LOCK, value, &[])
}

/// `2^depth` ESN blocks starting at `start`; block `start + k` holds the
/// transactions `txs(k)` returns (never empty).
pub fn esn_blocks(start: u64, depth: u8, txs: impl Fn(u64) -> Vec<Vec<u8>>) -> Vec<EsnBlock> {
    (0..(1u64 << depth))
        .map(|k| EsnBlock::new(start + k, txs(k)))
        .collect()
}

pub fn builder_for(start: u64, depth: u8, blocks: &[EsnBlock]) -> BunchBuilder {
    let mut builder = BunchBuilder::new(start, depth).expect("builder");
    for block in blocks {
        builder.push(block.roots()).expect("push");
    }
    builder
}

/// Filler transaction for blocks without withdrawals.
pub fn filler_tx(seed: u64) -> Vec<u8> {
    let signer = TestSigner::from_seed(10_000 + seed);
    sign_legacy_transfer(
        &signer,
        Some(ESN_CHAIN_ID),
        seed,
        [0x12; 20],
        U256::from(3u64),
        &[],
    )
}
