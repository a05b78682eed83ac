//! Parallel block sorter.

use std::sync::mpsc;

use crate::buffer::BlockStore;
use crate::sort::SortError;

/// Sorts the blocks of a batch concurrently, one job per block.
///
/// Each job owns the block it sorts and hands it back on completion, so a block is never touched by two
/// jobs at once and every job is finished before the store is read into again.
pub struct ParallelBlockSorter {
    /// Sorting thread pool.
    thread_pool: rayon::ThreadPool,
}

impl ParallelBlockSorter {
    /// Creates a sorter backed by a pool of `threads_number` threads.
    pub fn new(threads_number: usize) -> Result<Self, SortError> {
        log::info!("initializing thread-pool (threads: {})", threads_number);

        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads_number)
            .thread_name(|idx| format!("block-sorter-{}", idx))
            .panic_handler(|_| log::error!("block sorting job panicked"))
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(ParallelBlockSorter { thread_pool });
    }

    pub fn threads_number(&self) -> usize {
        self.thread_pool.current_num_threads()
    }

    /// Sorts every active block of the store. Blocks holding less than two values are already sorted and
    /// are completed without a job.
    ///
    /// Blocks until all jobs have reported back. Returns the number of completed blocks.
    pub fn sort(&self, store: &mut BlockStore) -> Result<usize, SortError> {
        let active = store.active();
        let (done_tx, done_rx) = mpsc::channel();

        let mut spawned = 0;
        for idx in 0..store.blocks().len() {
            if store.blocks()[idx].len() <= 1 {
                continue;
            }

            let mut block = store.lend(idx);
            let done_tx = done_tx.clone();
            self.thread_pool.spawn(move || {
                block.sort();
                // the receiver outlives every job unless the sort already failed
                let _ = done_tx.send((idx, block));
            });
            spawned += 1;
        }
        drop(done_tx);

        let mut completed = active - spawned;
        for _ in 0..spawned {
            let (idx, block) = done_rx.recv().map_err(|_| SortError::WorkerLost)?;
            store.restore(idx, block);
            completed += 1;
        }

        log::debug!("sorted {} blocks ({} jobs)", completed, spawned);

        return Ok(completed);
    }
}

#[cfg(test)]
mod test {
    use rand::seq::SliceRandom;
    use rand::Rng;
    use rstest::*;

    use super::ParallelBlockSorter;
    use crate::buffer::BlockStore;

    #[rstest]
    #[case(1, 4, 16)]
    #[case(2, 4, 16)]
    #[case(4, 4, 1000)]
    #[case(4, 3, 1)]
    fn test_parallel_block_sorter(#[case] threads: usize, #[case] blocks: usize, #[case] block_size: usize) {
        let sorter = ParallelBlockSorter::new(threads).unwrap();
        let mut store = BlockStore::new(blocks, block_size).unwrap();
        let mut rng = rand::thread_rng();

        for round in 0..3 {
            // the last block of every round is partially filled
            let mut expected = Vec::new();
            for idx in 0..blocks {
                let len = if idx + 1 == blocks { block_size / 2 } else { block_size };
                let mut values = Vec::from_iter((0..len).map(|_| rng.gen_range(0..100u32)));
                values.shuffle(&mut rng);
                let mut block = store.lend(idx);
                block.load(&values);
                store.restore(idx, block);
                values.sort();
                expected.push(values);
            }

            let active = store.active();
            assert_eq!(sorter.sort(&mut store).unwrap(), active, "round {}", round);

            for (block, values) in store.blocks().iter().zip(&expected) {
                assert_eq!(block.values(), values.as_slice());
                assert_eq!(block.capacity(), block_size);
            }
        }
    }

    #[test]
    fn test_parallel_block_sorter_empty_batch() {
        let sorter = ParallelBlockSorter::new(2).unwrap();
        let mut store = BlockStore::new(2, 8).unwrap();

        assert_eq!(sorter.sort(&mut store).unwrap(), 0);
        assert_eq!(sorter.threads_number(), 2);
    }
}
