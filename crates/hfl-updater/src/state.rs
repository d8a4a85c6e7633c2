//! Persisted patch level.
//!
//! A single text file holds the installed patch version. It is written only
//! after a whole pass has been applied, staged as `{file}.tmp` and renamed.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Result, UpdateError};
use crate::replace::staged_path;
use crate::version::VersionComparator;

/// Handle to the local version file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalState {
    path: PathBuf,
}

impl LocalState {
    /// Creates a handle for the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the version file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the recorded version.
    ///
    /// Falls back to the comparator's default when the file is absent or empty.
    pub fn read(&self, comparator: VersionComparator) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let version = content.trim();
                if version.is_empty() {
                    Ok(comparator.default_local_version().to_string())
                } else {
                    Ok(version.to_string())
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(
                    "No version file at {}, assuming {}",
                    self.path.display(),
                    comparator.default_local_version()
                );
                Ok(comparator.default_local_version().to_string())
            }
            Err(e) => Err(UpdateError::State(format!(
                "failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Records `version`, replacing the file in one rename.
    pub fn write(&self, version: &str) -> Result<()> {
        let tmp = staged_path(&self.path);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                UpdateError::State(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        fs::write(&tmp, version.trim()).map_err(|e| {
            UpdateError::State(format!("failed to write {}: {e}", tmp.display()))
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            UpdateError::State(format!("failed to replace {}: {e}", self.path.display()))
        })?;

        tracing::info!("Recorded patch version {} in {}", version, self.path.display());
        Ok(())
    }
}
