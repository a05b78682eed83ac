//! Temporary run naming.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::run;
use crate::sort::SortError;

/// Suffix of the run holding everything merged so far.
pub const PREFIX_SUFFIX: &str = "prefijo";
/// Suffix of the run produced from the current batch.
pub const BATCH_SUFFIX: &str = "bloques";
/// Suffix of a merge or export result before it replaces its target.
pub const FUSION_SUFFIX: &str = "fusion";
/// Suffixes of the sorted runs of the first and second input in two-file mode.
pub const SORTED_SUFFIXES: [&str; 2] = ["ordenada1", "ordenada2"];
/// Suffix of the binary run staged before a text export.
pub const BINARY_SUFFIX: &str = "bin";

/// Run naming strategy. Derives the paths of temporary runs from the path of the file they lead to.
pub trait RunNaming: Send + Sync {
    /// Returns the path of the temporary file tagged `suffix` that belongs to `target`.
    fn derive(&self, target: &Path, suffix: &str) -> PathBuf;

    /// Returns all runs used while sorting into `output`.
    fn run_paths(&self, output: &Path) -> RunPaths {
        RunPaths {
            prefix: self.derive(output, PREFIX_SUFFIX),
            batch: self.derive(output, BATCH_SUFFIX),
            fusion: self.derive(output, FUSION_SUFFIX),
        }
    }
}

/// Places temporary runs next to the target, appending a `.suffix` to its name.
#[derive(Debug, Default, Clone, Copy)]
pub struct SuffixNaming;

impl RunNaming for SuffixNaming {
    fn derive(&self, target: &Path, suffix: &str) -> PathBuf {
        let mut name = OsString::from(target.as_os_str());
        name.push(".");
        name.push(suffix);

        PathBuf::from(name)
    }
}

/// Places temporary runs in a private scratch directory removed on drop.
#[derive(Debug)]
pub struct ScratchDirNaming {
    dir: tempfile::TempDir,
}

impl ScratchDirNaming {
    /// Creates a scratch directory inside `parent`, or inside the OS temporary directory if [`None`].
    pub fn new(parent: Option<&Path>) -> Result<Self, SortError> {
        let dir = if let Some(parent) = parent {
            tempfile::tempdir_in(parent)
        } else {
            tempfile::tempdir()
        }
        .map_err(|err| SortError::TempDir(err))?;

        log::info!("using {} as a temporary directory", dir.path().display());

        return Ok(ScratchDirNaming { dir });
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl RunNaming for ScratchDirNaming {
    fn derive(&self, target: &Path, suffix: &str) -> PathBuf {
        let mut name = target.file_name().map(OsString::from).unwrap_or_else(|| OsString::from("run"));
        name.push(".");
        name.push(suffix);

        self.dir.path().join(name)
    }
}

/// Temporary runs of a single sort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub prefix: PathBuf,
    pub batch: PathBuf,
    pub fusion: PathBuf,
}

impl RunPaths {
    /// Fails if any of the runs is already taken, so that no file the sort did not create is overwritten or
    /// removed.
    pub fn reserve(&self) -> Result<(), SortError> {
        for path in [&self.prefix, &self.batch, &self.fusion] {
            run::ensure_free(path)?;
        }

        return Ok(());
    }

    /// Removes every run that still exists.
    pub fn discard(&self) {
        for path in [&self.prefix, &self.batch, &self.fusion] {
            run::discard(path);
        }
    }
}

#[cfg(test)]
mod test {
    use std::path::{Path, PathBuf};

    use rstest::*;

    use super::{RunNaming, RunPaths, ScratchDirNaming, SuffixNaming};
    use crate::sort::SortError;

    #[rstest]
    #[case("out.bin", "out.bin.prefijo", "out.bin.bloques", "out.bin.fusion")]
    #[case("/data/sorted", "/data/sorted.prefijo", "/data/sorted.bloques", "/data/sorted.fusion")]
    fn test_suffix_naming(#[case] output: &str, #[case] prefix: &str, #[case] batch: &str, #[case] fusion: &str) {
        let paths = SuffixNaming.run_paths(Path::new(output));

        assert_eq!(
            paths,
            RunPaths {
                prefix: PathBuf::from(prefix),
                batch: PathBuf::from(batch),
                fusion: PathBuf::from(fusion),
            }
        );
    }

    #[test]
    fn test_scratch_dir_naming() {
        let naming = ScratchDirNaming::new(None).unwrap();
        let scratch = naming.path().to_path_buf();

        let staged = naming.derive(Path::new("/data/out.txt"), "ordenada1");
        assert_eq!(staged, scratch.join("out.txt.ordenada1"));

        // runs derived from a staged run stay inside the scratch directory
        let paths = naming.run_paths(&staged);
        assert_eq!(paths.prefix, scratch.join("out.txt.ordenada1.prefijo"));

        std::fs::write(&paths.batch, b"").unwrap();
        paths.discard();
        assert!(!paths.batch.exists());

        drop(naming);
        assert!(!scratch.exists());
    }

    #[test]
    fn test_run_paths_reserve() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SuffixNaming.run_paths(&dir.path().join("out"));
        paths.reserve().unwrap();

        std::fs::write(&paths.fusion, b"user data").unwrap();
        match paths.reserve() {
            Err(SortError::IO { path, .. }) => assert_eq!(path, paths.fusion),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(std::fs::read(&paths.fusion).unwrap(), b"user data");
    }
}
