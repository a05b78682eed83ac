//! Fixed capacity block buffers.

use std::collections::TryReserveError;
use std::mem;

use crate::format::{DecodeError, ValueDecoder};

/// Buffer of values with a fixed capacity and an explicit count of valid values.
/// The storage is allocated once and reused by every [`Block::fill`].
#[derive(Debug, Default)]
pub struct Block {
    data: Vec<u32>,
    len: usize,
}

impl Block {
    /// Allocates a block able to hold `capacity` values.
    pub fn with_capacity(capacity: usize) -> Result<Self, TryReserveError> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)?;
        data.resize(capacity, 0);

        return Ok(Block { data, len: 0 });
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Returns the number of valid values.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Checks if the block reached its capacity.
    pub fn is_full(&self) -> bool {
        self.len == self.data.len()
    }

    /// Returns valid values.
    pub fn values(&self) -> &[u32] {
        &self.data[..self.len]
    }

    /// Replaces block contents with values read from the decoder.
    pub fn fill(&mut self, decoder: &mut impl ValueDecoder) -> Result<usize, DecodeError> {
        self.len = 0;
        self.len = decoder.read_values(&mut self.data)?;

        return Ok(self.len);
    }

    /// Replaces block contents with a copy of `values`, truncated to the block capacity.
    pub fn load(&mut self, values: &[u32]) -> usize {
        self.len = values.len().min(self.data.len());
        self.data[..self.len].copy_from_slice(&values[..self.len]);

        return self.len;
    }

    /// Sorts valid values in ascending order.
    pub fn sort(&mut self) {
        if self.len > 1 {
            self.data[..self.len].sort_unstable();
        }
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

/// Fixed set of blocks reused batch after batch.
#[derive(Debug)]
pub struct BlockStore {
    blocks: Vec<Block>,
    block_size: usize,
}

impl BlockStore {
    /// Allocates `blocks_number` blocks of `block_size` values each.
    pub fn new(blocks_number: usize, block_size: usize) -> Result<Self, TryReserveError> {
        let mut blocks = Vec::new();
        blocks.try_reserve_exact(blocks_number)?;
        for _ in 0..blocks_number {
            blocks.push(Block::with_capacity(block_size)?);
        }

        return Ok(BlockStore { blocks, block_size });
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns all blocks, active ones first.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Reads the next batch from the decoder. Returns the number of active (non-empty) blocks.
    ///
    /// Blocks are filled in order, so active blocks always form a prefix of the store.
    pub fn fill(&mut self, decoder: &mut impl ValueDecoder) -> Result<usize, DecodeError> {
        self.clear();

        let mut active = 0;
        for block in self.blocks.iter_mut() {
            if block.fill(decoder)? == 0 {
                break;
            }
            active += 1;
            if !block.is_full() {
                break;
            }
        }

        return Ok(active);
    }

    /// Returns the number of non-empty blocks.
    pub fn active(&self) -> usize {
        self.blocks.iter().filter(|block| !block.is_empty()).count()
    }

    /// Returns the total number of valid values in the batch.
    pub fn len(&self) -> usize {
        self.blocks.iter().map(Block::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Moves a block out of the store, leaving an unallocated placeholder in its slot.
    /// The block must be given back with [`BlockStore::restore`] before the next batch.
    pub fn lend(&mut self, idx: usize) -> Block {
        mem::take(&mut self.blocks[idx])
    }

    /// Puts a lent block back into its slot.
    pub fn restore(&mut self, idx: usize, block: Block) {
        self.blocks[idx] = block;
    }

    pub fn clear(&mut self) {
        self.blocks.iter_mut().for_each(Block::clear);
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use rstest::*;

    use super::{Block, BlockStore};
    use crate::format::TextDecoder;

    #[test]
    fn test_block() {
        let mut block = Block::with_capacity(3).unwrap();
        assert_eq!(block.capacity(), 3);
        assert!(block.is_empty());

        block.load(&[9, 1]);
        assert_eq!(block.is_full(), false);
        block.sort();
        assert_eq!(block.values(), &[1, 9]);

        assert_eq!(block.load(&[4, 3, 2, 1]), 3);
        assert_eq!(block.is_full(), true);
        block.sort();
        assert_eq!(block.values(), &[2, 3, 4]);
    }

    #[rstest]
    #[case("", 0, vec![])]
    #[case("7", 1, vec![vec![7]])]
    #[case("5 1 4", 2, vec![vec![5, 1], vec![4]])]
    #[case("5 1 4 2", 2, vec![vec![5, 1], vec![4, 2]])]
    #[case("5 1 4 2 3 0 9", 3, vec![vec![5, 1], vec![4, 2], vec![3, 0]])]
    fn test_block_store_fill(#[case] input: &str, #[case] active: usize, #[case] expected: Vec<Vec<u32>>) {
        let mut store = BlockStore::new(3, 2).unwrap();
        let mut decoder = TextDecoder::new(io::Cursor::new(input.as_bytes()));

        assert_eq!(store.fill(&mut decoder).unwrap(), active);
        assert_eq!(store.active(), active);

        let actual = Vec::from_iter(store.blocks()[..active].iter().map(|block| block.values().to_vec()));
        assert_eq!(actual, expected);
        assert!(store.blocks()[active..].iter().all(|block| block.is_empty()));
    }

    #[test]
    fn test_block_store_reuse_resets_counts() {
        let mut store = BlockStore::new(2, 2).unwrap();
        let mut decoder = TextDecoder::new(io::Cursor::new("1 2 3 4 5".as_bytes()));

        assert_eq!(store.fill(&mut decoder).unwrap(), 2);
        assert_eq!(store.len(), 4);

        assert_eq!(store.fill(&mut decoder).unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.blocks()[0].values(), &[5]);
        assert!(store.blocks()[1].is_empty());
        assert_eq!(store.blocks()[1].capacity(), 2);

        assert_eq!(store.fill(&mut decoder).unwrap(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_block_store_lend_and_restore() {
        let mut store = BlockStore::new(2, 4).unwrap();
        store.blocks[1].load(&[3, 1, 2]);

        let mut block = store.lend(1);
        assert_eq!(store.blocks()[1].capacity(), 0);
        block.sort();
        store.restore(1, block);

        assert_eq!(store.blocks()[1].values(), &[1, 2, 3]);
        assert_eq!(store.block_size(), 4);
    }
}
