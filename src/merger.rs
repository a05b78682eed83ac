//! Sorted sequence mergers.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::buffer::Block;

/// Merges the sorted blocks of a batch into a single sorted sequence.
///
/// Each step selects the block holding the smallest unconsumed value; among equal values the block with the
/// lowest index wins. Time complexity is *m* \* log(*n*) where *m* is the number of values and *n* is the
/// number of blocks.
pub struct BlockMerger<'a> {
    // binary heap is max-heap by default so we reverse it to convert it to min-heap,
    // the block index takes part in the ordering to break ties towards the lowest index
    heads: BinaryHeap<Reverse<(u32, usize)>>,
    blocks: &'a [Block],
    cursors: Vec<usize>,
}

impl<'a> BlockMerger<'a> {
    /// Creates a merger over blocks whose values are sorted in ascending order,
    /// otherwise the result is undefined.
    pub fn new(blocks: &'a [Block]) -> Self {
        let mut heads = BinaryHeap::with_capacity(blocks.len());
        for (idx, block) in blocks.iter().enumerate() {
            if let Some(&value) = block.values().first() {
                heads.push(Reverse((value, idx)));
            }
        }

        return BlockMerger {
            heads,
            blocks,
            cursors: vec![0; blocks.len()],
        };
    }
}

impl<'a> Iterator for BlockMerger<'a> {
    type Item = u32;

    fn next(&mut self) -> Option<Self::Item> {
        let Reverse((value, idx)) = self.heads.pop()?;

        self.cursors[idx] += 1;
        if let Some(&next) = self.blocks[idx].values().get(self.cursors[idx]) {
            self.heads.push(Reverse((next, idx)));
        }

        return Some(value);
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .blocks
            .iter()
            .zip(&self.cursors)
            .map(|(block, cursor)| block.len() - cursor)
            .sum();

        (remaining, Some(remaining))
    }
}

/// Two-way streaming merger of sorted inputs.
///
/// Always emits the smaller of the two current fronts, the left one when they are equal.
/// Once an input is exhausted the rest of the other one is drained as is. An input error is returned in place of
/// the value and ends the merge.
pub struct RunMerger<L, R>
where
    L: Iterator,
    R: Iterator,
{
    left: L,
    right: R,
    left_head: Option<u32>,
    right_head: Option<u32>,
    left_done: bool,
    right_done: bool,
    failed: bool,
}

impl<E, L, R> RunMerger<L, R>
where
    L: Iterator<Item = Result<u32, E>>,
    R: Iterator<Item = Result<u32, E>>,
{
    pub fn new(left: L, right: R) -> Self {
        RunMerger {
            left,
            right,
            left_head: None,
            right_head: None,
            left_done: false,
            right_done: false,
            failed: false,
        }
    }

    fn refill(
        input: &mut impl Iterator<Item = Result<u32, E>>,
        head: &mut Option<u32>,
        done: &mut bool,
    ) -> Result<(), E> {
        if head.is_none() && !*done {
            match input.next() {
                Some(value) => *head = Some(value?),
                None => *done = true,
            }
        }

        return Ok(());
    }

    fn advance(&mut self) -> Result<Option<u32>, E> {
        // heads are pulled lazily: an input error is reported after the values selected before it
        Self::refill(&mut self.left, &mut self.left_head, &mut self.left_done)?;
        Self::refill(&mut self.right, &mut self.right_head, &mut self.right_done)?;

        let take_left = match (self.left_head, self.right_head) {
            (Some(left), Some(right)) => left <= right,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => return Ok(None),
        };

        return Ok(if take_left {
            self.left_head.take()
        } else {
            self.right_head.take()
        });
    }
}

impl<E, L, R> Iterator for RunMerger<L, R>
where
    L: Iterator<Item = Result<u32, E>>,
    R: Iterator<Item = Result<u32, E>>,
{
    type Item = Result<u32, E>;

    /// Returns the next value from the inputs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let result = self.advance().transpose();
        if let Some(Err(_)) = result {
            self.failed = true;
        }

        return result;
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::error::Error;
    use std::io::{self, ErrorKind};

    use rstest::*;

    use super::{BlockMerger, RunMerger};
    use crate::buffer::Block;

    fn block(values: &[u32]) -> Block {
        let mut block = Block::with_capacity(values.len().max(1)).unwrap();
        block.load(values);
        block
    }

    #[rstest]
    #[case(vec![], vec![])]
    #[case(vec![vec![], vec![]], vec![])]
    #[case(
        vec![vec![4, 5, 7], vec![1, 6], vec![3], vec![]],
        vec![1, 3, 4, 5, 6, 7],
    )]
    #[case(
        vec![vec![1, 2], vec![3, 4]],
        vec![1, 2, 3, 4],
    )]
    #[case(
        vec![vec![2, 2, 9], vec![0, 2], vec![2]],
        vec![0, 2, 2, 2, 2, 9],
    )]
    fn test_block_merger(#[case] blocks: Vec<Vec<u32>>, #[case] expected: Vec<u32>) {
        let blocks = Vec::from_iter(blocks.iter().map(|values| block(values)));

        let merger = BlockMerger::new(&blocks);
        assert_eq!(merger.size_hint(), (expected.len(), Some(expected.len())));

        assert_eq!(Vec::from_iter(merger), expected);
    }

    #[test]
    fn test_block_merger_takes_lowest_block_first_on_ties() {
        let blocks = vec![block(&[5, 8]), block(&[5]), block(&[1, 5])];
        let mut merger = BlockMerger::new(&blocks);

        assert_eq!(merger.next(), Some(1));
        // three fives pending, consumed in block order 0, 1, 2
        let order = Vec::from_iter((0..3).map(|_| {
            let before = merger.cursors.clone();
            assert_eq!(merger.next(), Some(5));
            (0..blocks.len()).find(|&idx| merger.cursors[idx] != before[idx]).unwrap()
        }));
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(merger.next(), Some(8));
        assert_eq!(merger.next(), None);
    }

    #[rstest]
    #[case(vec![], vec![], vec![])]
    #[case(vec![Ok(2), Ok(2), Ok(5)], vec![Ok(2), Ok(4)], vec![Ok(2), Ok(2), Ok(2), Ok(4), Ok(5)])]
    #[case(vec![Ok(1), Ok(3)], vec![], vec![Ok(1), Ok(3)])]
    #[case(vec![], vec![Ok(0), Ok(9)], vec![Ok(0), Ok(9)])]
    #[case(
        vec![Ok(1), Ok(4)],
        vec![Ok(2), Ok(3), Ok(5), Ok(6)],
        vec![Ok(1), Ok(2), Ok(3), Ok(4), Ok(5), Ok(6)],
    )]
    #[case(
        vec![Ok(1), Err(io::Error::new(ErrorKind::Other, "test error")), Ok(7)],
        vec![Ok(2)],
        vec![Ok(1), Err(io::Error::new(ErrorKind::Other, "test error"))],
    )]
    #[case(
        vec![Ok(3)],
        vec![Err(io::Error::new(ErrorKind::Other, "test error"))],
        vec![Err(io::Error::new(ErrorKind::Other, "test error"))],
    )]
    fn test_run_merger(
        #[case] left: Vec<Result<u32, io::Error>>,
        #[case] right: Vec<Result<u32, io::Error>>,
        #[case] expected: Vec<Result<u32, io::Error>>,
    ) {
        let merger = RunMerger::new(left.into_iter(), right.into_iter());
        let actual = Vec::from_iter(merger);
        assert!(
            compare_vectors_of_result::<_, io::Error>(&actual, &expected),
            "actual={:?}, expected={:?}",
            actual,
            expected
        );
    }

    #[test]
    fn test_run_merger_advances_left_on_ties() {
        let pulls = RefCell::new(Vec::new());
        let left = [2, 2, 3].into_iter().inspect(|_| pulls.borrow_mut().push('l'));
        let right = [2, 4].into_iter().inspect(|_| pulls.borrow_mut().push('r'));

        let merger = RunMerger::new(left.map(Ok::<_, io::Error>), right.map(Ok::<_, io::Error>));
        let merged: Vec<u32> = merger.map(Result::unwrap).collect();

        assert_eq!(merged, vec![2, 2, 2, 3, 4]);
        assert_eq!(*pulls.borrow(), vec!['l', 'r', 'l', 'l', 'r']);
    }

    fn compare_vectors_of_result<T: PartialEq, E: Error + 'static>(
        actual: &Vec<Result<T, E>>,
        expected: &Vec<Result<T, E>>,
    ) -> bool {
        actual.len() == expected.len()
            && actual
                .into_iter()
                .zip(expected)
                .all(|(actual_result, expected_result)| match (actual_result, expected_result) {
                    (Ok(actual_result), Ok(expected_result)) if actual_result == expected_result => true,
                    (Err(actual_err), Err(expected_err)) => actual_err.to_string() == expected_err.to_string(),
                    _ => false,
                })
    }
}
