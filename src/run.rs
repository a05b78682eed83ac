//! Sorted runs stored on the file system.
//!
//! A run is a file of fixed-width native byte order values in non-decreasing order. It is written once by a
//! [`RunWriter`], read sequentially by a [`RunReader`] and removed as soon as it has been merged into a successor.

use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

use crate::format::{BinaryDecoder, DecodeError, ValueDecoder, VALUE_SIZE};
use crate::merger::RunMerger;
use crate::sort::SortError;

/// Number of values loaded by a single run reader refill.
pub const DEFAULT_READ_BUFFER: usize = 4096;

/// Forward-only buffered cursor over a run file.
pub struct RunReader {
    path: PathBuf,
    decoder: BinaryDecoder<fs::File>,
    buffer: Vec<u32>,
    position: usize,
    loaded: usize,
}

impl RunReader {
    /// Opens a run with the default read buffer.
    pub fn open(path: &Path) -> Result<Self, SortError> {
        Self::open_with_capacity(path, DEFAULT_READ_BUFFER)
    }

    /// Opens a run loading up to `capacity` values per refill.
    pub fn open_with_capacity(path: &Path, capacity: usize) -> Result<Self, SortError> {
        let file = fs::File::open(path).map_err(|err| SortError::io(path, err))?;

        return Ok(RunReader {
            path: path.to_path_buf(),
            decoder: BinaryDecoder::new(file),
            buffer: vec![0; capacity.max(1)],
            position: 0,
            loaded: 0,
        });
    }

    /// Returns the next value of the run or [`None`] once a refill yields nothing.
    pub fn next_value(&mut self) -> Result<Option<u32>, SortError> {
        if self.position >= self.loaded {
            self.loaded = self.decoder.read_values(&mut self.buffer).map_err(|err| match err {
                DecodeError::IO(err) => SortError::io(&self.path, err),
                err => SortError::io(&self.path, io::Error::new(io::ErrorKind::InvalidData, err)),
            })?;
            self.position = 0;

            if self.loaded == 0 {
                return Ok(None);
            }
        }

        let value = self.buffer[self.position];
        self.position += 1;

        return Ok(Some(value));
    }
}

impl Iterator for RunReader {
    type Item = Result<u32, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_value().transpose()
    }
}

/// Buffered writer producing a new run file.
pub struct RunWriter {
    path: PathBuf,
    writer: io::BufWriter<fs::File>,
    written: u64,
}

impl RunWriter {
    /// Creates a new run file. Fails if `path` is already taken.
    pub fn create(path: &Path) -> Result<Self, SortError> {
        let file = create_new(path)?;

        return Ok(RunWriter {
            path: path.to_path_buf(),
            writer: io::BufWriter::with_capacity(DEFAULT_READ_BUFFER * VALUE_SIZE, file),
            written: 0,
        });
    }

    /// Appends a value to the run.
    pub fn push(&mut self, value: u32) -> Result<(), SortError> {
        self.writer
            .write_all(&value.to_ne_bytes())
            .map_err(|err| SortError::io(&self.path, err))?;
        self.written += 1;

        return Ok(());
    }

    /// Appends every value of the iterator to the run.
    pub fn extend<I>(&mut self, values: I) -> Result<(), SortError>
    where
        I: IntoIterator<Item = Result<u32, SortError>>,
    {
        for value in values {
            self.push(value?)?;
        }

        return Ok(());
    }

    /// Flushes and closes the run. Returns the number of written values.
    pub fn finish(mut self) -> Result<u64, SortError> {
        self.writer.flush().map_err(|err| SortError::io(&self.path, err))?;

        return Ok(self.written);
    }
}

/// Creates a new file for writing. Fails if `path` is already taken.
pub fn create_new(path: &Path) -> Result<fs::File, SortError> {
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|err| SortError::io(path, err))
}

/// Fails with [`io::ErrorKind::AlreadyExists`] if anything exists at `path`.
pub fn ensure_free(path: &Path) -> Result<(), SortError> {
    match fs::symlink_metadata(path) {
        Ok(_) => Err(SortError::io(
            path,
            io::Error::new(io::ErrorKind::AlreadyExists, "temporary run name is already taken"),
        )),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(SortError::io(path, err)),
    }
}

/// Writes every value into a new run at `path`. Returns the number of written values.
///
/// Fails without touching `path` if it is already taken; a partially written run is removed.
pub fn write_run<I>(values: I, path: &Path) -> Result<u64, SortError>
where
    I: IntoIterator<Item = Result<u32, SortError>>,
{
    let mut writer = RunWriter::create(path)?;

    let result = writer.extend(values).and_then(|()| writer.finish());
    if result.is_err() {
        discard(path);
    }

    return result;
}

/// Merges two runs into a new run at `output`. Returns the number of values in the output.
///
/// Fails without touching `output` if it is already taken. On failure a partially written output is removed;
/// the inputs are left untouched.
pub fn merge_runs(left: &Path, right: &Path, output: &Path, read_buf_size: usize) -> Result<u64, SortError> {
    let left_reader = RunReader::open_with_capacity(left, read_buf_size)?;
    let right_reader = RunReader::open_with_capacity(right, read_buf_size)?;

    let written = write_run(RunMerger::new(left_reader, right_reader), output)?;

    log::debug!(
        "merged {} and {} into {} ({} values)",
        left.display(),
        right.display(),
        output.display(),
        written
    );

    return Ok(written);
}

/// Moves a finished run to its new name, replacing any previous file there.
/// Falls back to copying when the run cannot be renamed (e.g. across file systems).
pub fn promote(from: &Path, to: &Path) -> Result<(), SortError> {
    if let Err(err) = fs::rename(from, to) {
        log::debug!(
            "renaming {} to {} failed ({}), copying instead",
            from.display(),
            to.display(),
            err
        );
        copy_into(from, to)?;
    }

    return Ok(());
}

/// Copies `from` into a temporary file next to `to`, renames the copy to `to` and removes `from`.
/// `to` keeps its previous content until the copy is complete.
fn copy_into(from: &Path, to: &Path) -> Result<(), SortError> {
    let parent = match to.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut source = fs::File::open(from).map_err(|err| SortError::io(from, err))?;
    let mut copy = tempfile::Builder::new()
        .prefix(".promote")
        .tempfile_in(parent)
        .map_err(|err| SortError::io(parent, err))?;

    io::copy(&mut source, copy.as_file_mut()).map_err(|err| SortError::io(copy.path(), err))?;
    copy.as_file_mut().flush().map_err(|err| SortError::io(copy.path(), err))?;
    copy.persist(to).map_err(|err| SortError::io(to, err.error))?;
    fs::remove_file(from).map_err(|err| SortError::io(from, err))?;

    return Ok(());
}

/// Removes a run file, failing on anything but a missing file.
pub fn remove(path: &Path) -> Result<(), SortError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(SortError::io(path, err)),
    }
}

/// Best effort removal used on failure paths.
pub fn discard(path: &Path) {
    if let Err(err) = remove(path) {
        log::warn!("temporary run not removed: {}", err);
    }
}
