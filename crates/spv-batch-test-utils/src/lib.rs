//! Shared code of `spv-batch` crates for testing.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// `ShaderDir` sets up a temp dir filled with placeholder shader sources. Dropping it cleans
/// the dir up, except when panic unwinding, so you can inspect it when a test fails.
#[must_use]
pub struct ShaderDir(TempDir);

impl ShaderDir {
    /// Create a new, empty [`ShaderDir`].
    ///
    /// # Errors
    /// If the temp dir could not be created.
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self(tempfile::Builder::new().prefix("spv-batch-").tempdir()?))
    }

    /// Create a new [`ShaderDir`] containing a placeholder file for each of `names`.
    ///
    /// # Errors
    /// If the temp dir or any of the files could not be created.
    pub fn with_files<'name>(names: impl IntoIterator<Item = &'name str>) -> anyhow::Result<Self> {
        let dir = Self::new()?;
        for name in names {
            dir.add_file(name)?;
        }
        Ok(dir)
    }

    /// Writes a minimal GLSL source under `name` and returns its path.
    ///
    /// # Errors
    /// If the file could not be written.
    pub fn add_file(&self, name: &str) -> anyhow::Result<PathBuf> {
        let path = self.path().join(name);
        fs::write(&path, "#version 450\nvoid main() {}\n")?;
        Ok(path)
    }

    /// Creates a subdirectory `name` and returns its path.
    ///
    /// # Errors
    /// If the directory could not be created.
    pub fn add_dir(&self, name: &str) -> anyhow::Result<PathBuf> {
        let path = self.path().join(name);
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Root of the temp dir.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.0.path()
    }
}

impl Drop for ShaderDir {
    fn drop(&mut self) {
        // when a test fails, keep directory
        if std::thread::panicking() {
            self.0.disable_cleanup(true);
        }
    }
}
