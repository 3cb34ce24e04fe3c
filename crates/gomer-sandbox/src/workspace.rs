//! Per-request workspace directories.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::errors::SandboxError;

/// An isolated directory owned by one sandbox invocation.
///
/// The directory and everything in it is removed when the value is dropped,
/// on every exit path of the owning call.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Allocate a fresh directory named `<prefix><random>`.
    ///
    /// Created under `root` when given, otherwise under the system temp dir.
    pub fn create(prefix: &str, root: Option<&Path>) -> Result<Self, SandboxError> {
        let mut builder = tempfile::Builder::new();
        let _ = builder.prefix(prefix);
        let dir = match root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(SandboxError::Workspace)?;
        debug!(path = %dir.path().display(), "workspace created");
        Ok(Self { dir })
    }

    /// Root of the workspace.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `file` inside the workspace, byte for byte.
    pub fn write_source(&self, file: &str, contents: &[u8]) -> Result<PathBuf, SandboxError> {
        let path = self.dir.path().join(file);
        std::fs::write(&path, contents).map_err(|source| SandboxError::WriteSource {
            file: file.to_owned(),
            source,
        })?;
        Ok(path)
    }
}
