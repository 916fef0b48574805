//! Off-chain helpers for relay agents: locating the bunch that covers a
//! block and assembling bunch headers and withdrawal proofs.

use esn_core::merkle::{build_inclusion_path, build_merkle_root, MerkleError};
use esn_core::types::block_count_for_depth;
use esn_core::{Bunch, BunchHeader, Hash256, WithdrawalProofV1, MAX_BUNCH_DEPTH};
use thiserror::Error;

/// Index (1-based) of the bunch covering `block_number`.
///
/// `bunches` must be the posted sequence in order.
pub fn find_bunch_index(bunches: &[Bunch], block_number: u64) -> Option<u64> {
    let count = u64::try_from(bunches.len()).ok()?;
    search_bunches(count, block_number, |index| {
        let position = usize::try_from(index - 1).map_err(|_| ())?;
        bunches.get(position).copied().ok_or(())
    })
    .ok()
    .flatten()
}

/// Binary search over `count` posted bunches fetched one at a time by
/// 1-based index. Posted bunches are contiguous, so at most
/// `floor(log2(count)) + 1` bunches are read.
pub fn search_bunches<E, F>(count: u64, block_number: u64, mut get: F) -> Result<Option<u64>, E>
where
    F: FnMut(u64) -> Result<Bunch, E>,
{
    let (mut lo, mut hi) = (1u64, count);
    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        let bunch = get(mid)?;
        if bunch.start_block_number > block_number {
            hi = mid - 1;
        } else if bunch.contains(block_number) {
            return Ok(Some(mid));
        } else {
            lo = mid + 1;
        }
    }
    Ok(None)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocatorError {
    #[error("bunch depth {0} exceeds maximum")]
    DepthTooLarge(u8),

    #[error("bunch is full ({0} blocks)")]
    Full(u64),

    #[error("bunch incomplete: {have} of {need} blocks")]
    Incomplete { have: u64, need: u64 },

    #[error("block {block_number} outside bunch starting at {start} with {count} blocks")]
    OutOfRange {
        block_number: u64,
        start: u64,
        count: u64,
    },

    #[error(transparent)]
    Merkle(#[from] MerkleError),
}

/// Roots of one ESN block as seen by the relay agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRoots {
    pub transactions_root: Hash256,
    pub receipts_root: Hash256,
    pub block_hash: Hash256,
}

/// Accumulates `2^depth` consecutive blocks into a bunch header.
#[derive(Debug, Clone)]
pub struct BunchBuilder {
    start_block_number: u64,
    depth: u8,
    capacity: u64,
    blocks: Vec<BlockRoots>,
}

impl BunchBuilder {
    pub fn new(start_block_number: u64, depth: u8) -> Result<Self, LocatorError> {
        if depth > MAX_BUNCH_DEPTH {
            return Err(LocatorError::DepthTooLarge(depth));
        }
        let capacity = block_count_for_depth(depth).ok_or(LocatorError::DepthTooLarge(depth))?;
        Ok(Self {
            start_block_number,
            depth,
            capacity,
            blocks: Vec::new(),
        })
    }

    pub fn start_block_number(&self) -> u64 {
        self.start_block_number
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    fn len(&self) -> u64 {
        // Vec length never exceeds capacity, itself a u64.
        u64::try_from(self.blocks.len()).unwrap_or(u64::MAX)
    }

    pub fn is_complete(&self) -> bool {
        self.len() == self.capacity
    }

    /// Append the next block's roots.
    pub fn push(&mut self, roots: BlockRoots) -> Result<(), LocatorError> {
        if self.is_complete() {
            return Err(LocatorError::Full(self.capacity));
        }
        self.blocks.push(roots);
        Ok(())
    }

    fn ensure_complete(&self) -> Result<(), LocatorError> {
        if !self.is_complete() {
            return Err(LocatorError::Incomplete {
                have: self.len(),
                need: self.capacity,
            });
        }
        Ok(())
    }

    fn tx_roots(&self) -> Vec<Hash256> {
        self.blocks.iter().map(|b| b.transactions_root).collect()
    }

    /// Header for validators to sign.
    pub fn header(&self) -> Result<BunchHeader, LocatorError> {
        self.ensure_complete()?;
        let receipts: Vec<Hash256> = self.blocks.iter().map(|b| b.receipts_root).collect();
        let last_block_hash = self
            .blocks
            .last()
            .map(|b| b.block_hash)
            .ok_or(LocatorError::Incomplete {
                have: 0,
                need: self.capacity,
            })?;
        Ok(BunchHeader {
            start_block_number: self.start_block_number,
            bunch_depth: self.depth,
            transactions_mega_root: build_merkle_root(&self.tx_roots())?,
            receipts_mega_root: build_merkle_root(&receipts)?,
            last_block_hash,
        })
    }

    fn offset(&self, block_number: u64) -> Result<usize, LocatorError> {
        let out_of_range = || LocatorError::OutOfRange {
            block_number,
            start: self.start_block_number,
            count: self.capacity,
        };
        let offset = block_number
            .checked_sub(self.start_block_number)
            .filter(|o| *o < self.capacity)
            .ok_or_else(out_of_range)?;
        usize::try_from(offset).map_err(|_| out_of_range())
    }

    /// Sibling path of `block_number` in the transactions mega tree.
    pub fn transactions_path(&self, block_number: u64) -> Result<Vec<Hash256>, LocatorError> {
        self.ensure_complete()?;
        let offset = self.offset(block_number)?;
        Ok(build_inclusion_path(&self.tx_roots(), offset)?)
    }

    /// Withdrawal proof for a transaction in `block_number`, given its
    /// trie key, raw bytes and per-block MPT proof.
    pub fn build_withdrawal_proof(
        &self,
        bunch_index: u64,
        block_number: u64,
        tx_path_key: Vec<u8>,
        raw_transaction: Vec<u8>,
        tx_proof_nodes: Vec<Vec<u8>>,
    ) -> Result<WithdrawalProofV1, LocatorError> {
        let siblings = self.transactions_path(block_number)?;
        let offset = self.offset(block_number)?;
        let per_block_tx_root = self.blocks[offset].transactions_root;
        Ok(WithdrawalProofV1::new(
            bunch_index,
            block_number,
            siblings,
            per_block_tx_root,
            raw_transaction,
            tx_path_key,
            tx_proof_nodes,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use esn_core::verify_bunch_inclusion;

    fn bunch(start: u64, depth: u8) -> Bunch {
        Bunch {
            start_block_number: start,
            bunch_depth: depth,
            transactions_mega_root: [0; 32],
            receipts_mega_root: [0; 32],
        }
    }

    fn roots(n: u8) -> BlockRoots {
        BlockRoots {
            transactions_root: [n; 32],
            receipts_root: [n.wrapping_add(100); 32],
            block_hash: [n.wrapping_add(200); 32],
        }
    }

    #[test]
    fn locates_bunches() {
        // [0,2) [2,6) [6,7) [7,15)
        let bunches = vec![bunch(0, 1), bunch(2, 2), bunch(6, 0), bunch(7, 3)];
        assert_eq!(find_bunch_index(&bunches, 0), Some(1));
        assert_eq!(find_bunch_index(&bunches, 1), Some(1));
        assert_eq!(find_bunch_index(&bunches, 2), Some(2));
        assert_eq!(find_bunch_index(&bunches, 5), Some(2));
        assert_eq!(find_bunch_index(&bunches, 6), Some(3));
        assert_eq!(find_bunch_index(&bunches, 14), Some(4));
        assert_eq!(find_bunch_index(&bunches, 15), None);
        assert_eq!(find_bunch_index(&[], 0), None);
    }

    #[test]
    fn search_reads_logarithmically_many_bunches() {
        // 1000 contiguous depth-1 bunches covering blocks [0, 2000).
        let bunches: Vec<Bunch> = (0..1000u64).map(|i| bunch(2 * i, 1)).collect();
        for block in [0, 1, 777, 1000, 1998, 1999, 2000, 5000] {
            let mut reads = 0u32;
            let found = search_bunches(1000, block, |index| {
                reads += 1;
                Ok::<_, ()>(bunches[(index - 1) as usize])
            })
            .unwrap();
            let expected = (block < 2000).then(|| block / 2 + 1);
            assert_eq!(found, expected, "block {block}");
            assert!(reads <= 10, "block {block}: {reads} reads");
        }
    }

    #[test]
    fn search_propagates_fetch_errors() {
        let err = search_bunches(3, 0, |index| Err::<Bunch, _>(index)).unwrap_err();
        assert_eq!(err, 2);
        assert_eq!(search_bunches(0, 0, |_| Err::<Bunch, _>(())), Ok(None));
    }

    #[test]
    fn block_before_first_bunch() {
        let bunches = vec![bunch(10, 1)];
        assert_eq!(find_bunch_index(&bunches, 9), None);
        assert_eq!(find_bunch_index(&bunches, 11), Some(1));
    }

    #[test]
    fn builder_paths_verify() {
        let mut builder = BunchBuilder::new(40, 2).unwrap();
        assert!(matches!(
            builder.header(),
            Err(LocatorError::Incomplete { have: 0, need: 4 })
        ));
        for n in 0..4 {
            builder.push(roots(n)).unwrap();
        }
        assert_eq!(builder.push(roots(9)), Err(LocatorError::Full(4)));

        let header = builder.header().unwrap();
        assert_eq!(header.last_block_hash, roots(3).block_hash);
        for (offset, block) in (40..44u64).enumerate() {
            let path = builder.transactions_path(block).unwrap();
            let leaf = roots(u8::try_from(offset).unwrap()).transactions_root;
            verify_bunch_inclusion(&leaf, block - 40, &path, &header.transactions_mega_root)
                .unwrap();
        }
        assert!(matches!(
            builder.transactions_path(44),
            Err(LocatorError::OutOfRange { .. })
        ));
    }

    #[test]
    fn depth_zero_bunch() {
        let mut builder = BunchBuilder::new(3, 0).unwrap();
        builder.push(roots(7)).unwrap();
        let header = builder.header().unwrap();
        assert_eq!(header.transactions_mega_root, roots(7).transactions_root);
        assert!(builder.transactions_path(3).unwrap().is_empty());
    }

    #[test]
    fn rejects_oversized_depth() {
        assert_eq!(
            BunchBuilder::new(0, MAX_BUNCH_DEPTH + 1).unwrap_err(),
            LocatorError::DepthTooLarge(MAX_BUNCH_DEPTH + 1)
        );
    }
}
