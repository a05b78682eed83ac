//! External sorter.

use std::collections::TryReserveError;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::buffer::BlockStore;
use crate::format::{self, DecodeError, Format, ValueDecoder};
use crate::merger::BlockMerger;
use crate::naming::{RunNaming, RunPaths, ScratchDirNaming, SuffixNaming};
use crate::parallel::ParallelBlockSorter;
use crate::run::{self, RunWriter, DEFAULT_READ_BUFFER};

/// Default number of values per block.
pub const DEFAULT_BLOCK_SIZE: usize = 1 << 20;
/// Default number of blocks per batch.
pub const DEFAULT_BLOCKS_NUMBER: usize = 4;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Sorter parameter out of range.
    InvalidParameter { name: &'static str, value: usize },
    /// Temporary directory creation error.
    TempDir(io::Error),
    /// Block buffers allocation error.
    Allocation(TryReserveError),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Sorting thread start error.
    Spawn(io::Error),
    /// A block sorting job ended without handing its block back.
    WorkerLost,
    /// File operation error.
    IO { path: PathBuf, source: io::Error },
    /// Input data stream error.
    Input(DecodeError),
    /// Input stream holds no values.
    EmptyInput,
}

impl SortError {
    /// Attaches the path of the file an I/O operation failed on.
    pub fn io(path: &Path, source: io::Error) -> Self {
        SortError::IO {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::TempDir(err) => Some(err),
            SortError::Allocation(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::Spawn(err) => Some(err),
            SortError::IO { source, .. } => Some(source),
            SortError::Input(err) => Some(err),
            SortError::InvalidParameter { .. } | SortError::WorkerLost | SortError::EmptyInput => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::InvalidParameter { name, value } => {
                write!(f, "{} must be a positive integer, got {}", name, value)
            }
            SortError::TempDir(err) => write!(f, "temporary directory not created: {}", err),
            SortError::Allocation(err) => write!(f, "block buffers not allocated: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::Spawn(err) => write!(f, "sorting thread not started: {}", err),
            SortError::WorkerLost => write!(f, "block sorting job terminated unexpectedly"),
            SortError::IO { path, source } => write!(f, "I/O operation on {} failed: {}", path.display(), source),
            SortError::Input(err) => write!(f, "input data stream error: {}", err),
            SortError::EmptyInput => write!(f, "input contains no numbers"),
        }
    }
}

/// Sort summary.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SortStats {
    /// Number of sorted values.
    pub values: u64,
    /// Number of batches read from the input.
    pub batches: u64,
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder {
    /// Number of values per block.
    block_size: usize,
    /// Number of blocks read and sorted per batch.
    blocks_number: usize,
    /// Number of threads to be used to sort blocks in parallel.
    threads_number: Option<usize>,
    /// Number of values loaded by a single run reader refill.
    read_buf_size: usize,
    /// Directory to be used to store temporary runs.
    tmp_dir: Option<Box<Path>>,
    /// Temporary runs naming strategy.
    naming: Option<Arc<dyn RunNaming>>,
}

impl ExternalSorterBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter, SortError> {
        ExternalSorter::new(
            self.block_size,
            self.blocks_number,
            self.threads_number,
            self.read_buf_size,
            self.naming,
            self.tmp_dir.as_deref(),
        )
    }

    /// Sets number of values per block (M).
    pub fn with_block_size(mut self, block_size: usize) -> ExternalSorterBuilder {
        self.block_size = block_size;
        return self;
    }

    /// Sets number of blocks per batch (N).
    pub fn with_blocks_number(mut self, blocks_number: usize) -> ExternalSorterBuilder {
        self.blocks_number = blocks_number;
        return self;
    }

    /// Sets number of threads to be used to sort blocks in parallel. Defaults to the number of blocks.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets number of values loaded by a single run reader refill.
    pub fn with_read_buffer(mut self, read_buf_size: usize) -> ExternalSorterBuilder {
        self.read_buf_size = read_buf_size;
        return self;
    }

    /// Sets directory to be used to store temporary runs.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets temporary runs naming strategy. Takes precedence over [`ExternalSorterBuilder::with_tmp_dir`].
    pub fn with_naming(mut self, naming: impl RunNaming + 'static) -> ExternalSorterBuilder {
        self.naming = Some(Arc::new(naming));
        return self;
    }
}

impl Default for ExternalSorterBuilder {
    fn default() -> Self {
        ExternalSorterBuilder {
            block_size: DEFAULT_BLOCK_SIZE,
            blocks_number: DEFAULT_BLOCKS_NUMBER,
            threads_number: None,
            read_buf_size: DEFAULT_READ_BUFFER,
            tmp_dir: None,
            naming: None,
        }
    }
}

/// External sort driver states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortState {
    /// Reading the next batch of blocks from the input.
    AwaitingBatch,
    /// Sorting the blocks of the batch in parallel.
    SortingBatch,
    /// Merging the sorted blocks into the batch run.
    MergingBatch,
    /// Merging the batch run into the prefix run.
    FoldingIntoPrefix,
    /// Input exhausted, promoting the prefix run to the output.
    Finalizing,
}

/// External sorter.
///
/// Reads the input batch by batch, each batch being at most `blocks_number` blocks of `block_size` values.
/// Blocks are sorted in parallel, merged into a batch run and the batch run is merged into the prefix run
/// holding everything sorted so far. Memory consumption is bounded by the block store regardless of the
/// input size.
pub struct ExternalSorter {
    /// Number of values per block.
    block_size: usize,
    /// Number of blocks per batch.
    blocks_number: usize,
    /// Number of values loaded by a single run reader refill.
    read_buf_size: usize,
    /// Parallel block sorter.
    block_sorter: ParallelBlockSorter,
    /// Temporary runs naming strategy.
    naming: Arc<dyn RunNaming>,
}

impl ExternalSorter {
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `block_size` - Number of values per block.
    /// * `blocks_number` - Number of blocks per batch.
    /// * `threads_number` - Number of threads to be used to sort blocks in parallel. If the parameter is
    ///   [`None`] one thread per block is used.
    /// * `read_buf_size` - Number of values loaded by a single run reader refill.
    /// * `naming` - Temporary runs naming strategy.
    /// * `tmp_path` - Directory to be used to store temporary runs when no naming strategy is given. If both
    ///   are [`None`] temporary runs are placed next to the output.
    pub fn new(
        block_size: usize,
        blocks_number: usize,
        threads_number: Option<usize>,
        read_buf_size: usize,
        naming: Option<Arc<dyn RunNaming>>,
        tmp_path: Option<&Path>,
    ) -> Result<Self, SortError> {
        let threads_number = threads_number.unwrap_or(blocks_number);
        for (name, value) in [
            ("block size", block_size),
            ("blocks number", blocks_number),
            ("threads number", threads_number),
            ("read buffer size", read_buf_size),
        ] {
            if value == 0 {
                return Err(SortError::InvalidParameter { name, value });
            }
        }

        let naming: Arc<dyn RunNaming> = match (naming, tmp_path) {
            (Some(naming), _) => naming,
            (None, Some(tmp_path)) => Arc::new(ScratchDirNaming::new(Some(tmp_path))?),
            (None, None) => Arc::new(SuffixNaming),
        };

        return Ok(ExternalSorter {
            block_size,
            blocks_number,
            read_buf_size,
            block_sorter: ParallelBlockSorter::new(threads_number)?,
            naming,
        });
    }

    pub fn read_buf_size(&self) -> usize {
        self.read_buf_size
    }

    pub fn naming(&self) -> &dyn RunNaming {
        self.naming.as_ref()
    }

    /// Sorts an input file into `output` using the same layout for both.
    pub fn sort_file(&self, input: &Path, output: &Path, format: Format) -> Result<SortStats, SortError> {
        let decoder = format.open(input)?;

        match format {
            Format::Binary => self.sort(decoder, output),
            Format::Text => format::sort_to_text(self.naming(), output, self.read_buf_size, |staged| {
                self.sort(decoder, staged)
            }),
        }
    }

    /// Sorts values from the input into a binary run at `output`.
    ///
    /// The output is only written once the whole input has been sorted. Temporary runs must not exist yet,
    /// otherwise the sort fails before reading any input. On failure every temporary run is removed and the
    /// output is left untouched.
    ///
    /// # Arguments
    /// * `input` - Input stream values to be fetched from
    /// * `output` - Path of the resulting run
    pub fn sort<D: ValueDecoder>(&self, mut input: D, output: &Path) -> Result<SortStats, SortError> {
        let runs = self.naming.run_paths(output);
        runs.reserve()?;

        let result = self.sort_batches(&mut input, output, &runs);
        if result.is_err() {
            runs.discard();
        }

        return result;
    }

    fn sort_batches(
        &self,
        input: &mut impl ValueDecoder,
        output: &Path,
        runs: &RunPaths,
    ) -> Result<SortStats, SortError> {
        let mut blocks = BlockStore::new(self.blocks_number, self.block_size).map_err(SortError::Allocation)?;
        let mut stats = SortStats::default();
        let mut has_prefix = false;
        let mut state = SortState::AwaitingBatch;

        loop {
            log::trace!("{}: {:?}", output.display(), state);

            state = match state {
                SortState::AwaitingBatch => {
                    let active = blocks.fill(input).map_err(SortError::Input)?;
                    if active == 0 {
                        SortState::Finalizing
                    } else {
                        stats.batches += 1;
                        stats.values += blocks.len() as u64;
                        log::debug!(
                            "batch {}: {} values in {} blocks",
                            stats.batches,
                            blocks.len(),
                            active
                        );
                        SortState::SortingBatch
                    }
                }
                SortState::SortingBatch => {
                    self.block_sorter.sort(&mut blocks)?;
                    SortState::MergingBatch
                }
                SortState::MergingBatch => {
                    self.write_batch_run(&blocks, &runs.batch)?;
                    SortState::FoldingIntoPrefix
                }
                SortState::FoldingIntoPrefix => {
                    self.fold(runs, has_prefix)?;
                    has_prefix = true;
                    SortState::AwaitingBatch
                }
                SortState::Finalizing => {
                    if !has_prefix {
                        return Err(SortError::EmptyInput);
                    }
                    run::promote(&runs.prefix, output)?;

                    log::info!(
                        "sorted {} values in {} batches into {}",
                        stats.values,
                        stats.batches,
                        output.display()
                    );

                    return Ok(stats);
                }
            };
        }
    }

    fn write_batch_run(&self, blocks: &BlockStore, path: &Path) -> Result<u64, SortError> {
        let mut writer = RunWriter::create(path)?;
        for value in BlockMerger::new(blocks.blocks()) {
            writer.push(value)?;
        }

        let written = writer.finish()?;
        debug_assert_eq!(written, blocks.len() as u64);

        return Ok(written);
    }

    fn fold(&self, runs: &RunPaths, has_prefix: bool) -> Result<(), SortError> {
        if !has_prefix {
            log::debug!("seeding prefix run {}", runs.prefix.display());
            return run::promote(&runs.batch, &runs.prefix);
        }

        run::merge_runs(&runs.prefix, &runs.batch, &runs.fusion, self.read_buf_size)?;
        run::remove(&runs.batch)?;
        // the previous prefix stays readable under its name until the rename replaces it
        run::promote(&runs.fusion, &runs.prefix)?;

        return Ok(());
    }
}
