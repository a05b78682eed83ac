//! Two input external sorter.

use std::panic;
use std::path::{Path, PathBuf};
use std::thread;

use crate::format::{Format, ValueDecoder};
use crate::merger::RunMerger;
use crate::naming::{FUSION_SUFFIX, SORTED_SUFFIXES};
use crate::run::{self, RunReader};
use crate::sort::{ExternalSorter, ExternalSorterBuilder, SortError, SortStats};

/// Summary of a two input sort.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DualStats {
    pub first: SortStats,
    pub second: SortStats,
}

impl DualStats {
    /// Returns the number of values in the merged output.
    pub fn values(&self) -> u64 {
        self.first.values + self.second.values
    }
}

/// Sorts two inputs concurrently, one [`ExternalSorter`] each, and merges both sorted runs into one output.
pub struct DualSorter {
    first: ExternalSorter,
    second: ExternalSorter,
}

/// Temporary files of a two input sort.
struct StagedRuns {
    sorted: [PathBuf; 2],
    merged: PathBuf,
}

impl StagedRuns {
    fn paths(&self) -> [&Path; 3] {
        [&self.sorted[0], &self.sorted[1], &self.merged]
    }
}

impl DualSorter {
    /// Builds both sorters from the same configuration.
    pub fn new(builder: &ExternalSorterBuilder) -> Result<Self, SortError> {
        return Ok(DualSorter {
            first: builder.clone().build()?,
            second: builder.clone().build()?,
        });
    }

    /// Sorts two input files into `output` using the same layout for all of them.
    pub fn sort_files(
        &self,
        first: &Path,
        second: &Path,
        output: &Path,
        format: Format,
    ) -> Result<DualStats, SortError> {
        let first_input = format.open(first)?;
        let second_input = format.open(second)?;

        self.sort_into(first_input, second_input, output, format)
    }

    /// Sorts values from both inputs into a single binary run at `output`.
    ///
    /// The merge only starts once both inputs are sorted; if either sort fails its error is returned and the
    /// output is left untouched.
    pub fn sort<F, S>(&self, first: F, second: S, output: &Path) -> Result<DualStats, SortError>
    where
        F: ValueDecoder + Send,
        S: ValueDecoder + Send,
    {
        self.sort_into(first, second, output, Format::Binary)
    }

    fn sort_into<F, S>(&self, first: F, second: S, output: &Path, format: Format) -> Result<DualStats, SortError>
    where
        F: ValueDecoder + Send,
        S: ValueDecoder + Send,
    {
        let naming = self.first.naming();
        let staged = StagedRuns {
            sorted: [
                naming.derive(output, SORTED_SUFFIXES[0]),
                naming.derive(output, SORTED_SUFFIXES[1]),
            ],
            merged: naming.derive(output, FUSION_SUFFIX),
        };
        for path in staged.paths() {
            run::ensure_free(path)?;
        }

        let result = self.sort_staged(first, second, output, format, &staged);
        if result.is_err() {
            staged.paths().iter().for_each(|path| run::discard(path));
        }

        return result;
    }

    fn sort_staged<F, S>(
        &self,
        first: F,
        second: S,
        output: &Path,
        format: Format,
        staged: &StagedRuns,
    ) -> Result<DualStats, SortError>
    where
        F: ValueDecoder + Send,
        S: ValueDecoder + Send,
    {
        let sorted = &staged.sorted;
        let (first_result, second_result) = thread::scope(|scope| {
            let first_worker = thread::Builder::new()
                .name("sort-first".into())
                .spawn_scoped(scope, move || self.first.sort(first, &sorted[0]))
                .map_err(SortError::Spawn)?;
            let second_worker = thread::Builder::new()
                .name("sort-second".into())
                .spawn_scoped(scope, move || self.second.sort(second, &sorted[1]))
                .map_err(SortError::Spawn)?;

            Ok::<_, SortError>((join(first_worker), join(second_worker)))
        })?;

        let stats = DualStats {
            first: first_result?,
            second: second_result?,
        };

        let read_buf_size = self.first.read_buf_size();
        let left = RunReader::open_with_capacity(&sorted[0], read_buf_size)?;
        let right = RunReader::open_with_capacity(&sorted[1], read_buf_size)?;
        let merged = format.write(RunMerger::new(left, right), &staged.merged)?;
        debug_assert_eq!(merged, stats.values());

        run::promote(&staged.merged, output)?;
        for path in sorted {
            run::remove(path)?;
        }

        log::info!(
            "merged {} + {} values into {}",
            stats.first.values,
            stats.second.values,
            output.display()
        );

        return Ok(stats);
    }
}

fn join<T>(worker: thread::ScopedJoinHandle<'_, T>) -> T {
    match worker.join() {
        Ok(result) => result,
        Err(payload) => panic::resume_unwind(payload),
    }
}
