//! `ext-merge-sort` sorts files of unsigned 32-bit integers that do not fit into memory.
//!
//! The input is consumed in batches of `N` blocks of `M` values. Blocks of a batch are sorted in parallel and
//! merged into a sorted run stored on disk, then the run is merged into the prefix run holding everything sorted
//! so far. Once the input is exhausted the prefix run becomes the output. Memory consumption is bounded by the
//! `N` \* `M` values of the block store no matter how large the input is. For more information see
//! [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Input formats:**
//!   binary files of fixed-width native byte order values or text files of whitespace separated decimal numbers.
//! * **Parallel block sorting:**
//!   every block of a batch is sorted by its own job on a dedicated thread pool.
//! * **Two input mode:**
//!   two inputs are sorted concurrently and merged into a single output.
//! * **Pluggable temporary files placement:**
//!   temporary runs are placed next to the output or in a private scratch directory.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use env_logger;
//! use log;
//!
//! use ext_merge_sort::{ExternalSorterBuilder, Format};
//!
//! fn main() {
//!     env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();
//!
//!     let sorter = ExternalSorterBuilder::new()
//!         .with_block_size(1_000_000)
//!         .with_blocks_number(4)
//!         .build()
//!         .unwrap();
//!
//!     let stats = sorter
//!         .sort_file(Path::new("input.bin"), Path::new("output.bin"), Format::Binary)
//!         .unwrap();
//!
//!     println!("sorted {} numbers", stats.values);
//! }
//! ```

pub mod buffer;
pub mod dual;
pub mod format;
pub mod merger;
pub mod naming;
pub mod parallel;
pub mod run;
pub mod sort;

pub use buffer::{Block, BlockStore};
pub use dual::{DualSorter, DualStats};
pub use format::{BinaryDecoder, DecodeError, Format, TextDecoder, ValueDecoder};
pub use merger::{BlockMerger, RunMerger};
pub use naming::{RunNaming, ScratchDirNaming, SuffixNaming};
pub use parallel::ParallelBlockSorter;
pub use run::{RunReader, RunWriter};
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError, SortStats};
