//! Moves staged files into place.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, UpdateError};
use crate::manifest::ArtifactDescriptor;

/// Suffix of staged files.
pub const STAGING_SUFFIX: &str = ".tmp";

/// Path a staged copy of `target` is written to.
#[must_use]
pub fn staged_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

/// Replaces files under an install root with their staged copies.
#[derive(Debug, Clone)]
pub struct AtomicReplacer {
    install_root: PathBuf,
}

impl AtomicReplacer {
    /// Creates a replacer for `install_root`.
    #[must_use]
    pub fn new(install_root: impl Into<PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
        }
    }

    /// Final path of an artifact.
    #[must_use]
    pub fn target_path(&self, descriptor: &ArtifactDescriptor) -> PathBuf {
        self.install_root.join(&descriptor.name)
    }

    /// Moves `{name}.tmp` over `name` and returns the final path.
    pub fn apply(&self, descriptor: &ArtifactDescriptor) -> Result<PathBuf> {
        let target = self.target_path(descriptor);
        replace_file(&staged_path(&target), &target)?;
        Ok(target)
    }
}

/// Moves `staged` to `target`, removing an existing `target` first.
///
/// Removal and rename are two steps: a crash between them leaves `target`
/// absent with `staged` still on disk.
pub fn replace_file(staged: &Path, target: &Path) -> Result<()> {
    let fail = |reason: String| UpdateError::ReplaceFailed {
        path: target.to_path_buf(),
        reason,
    };

    if !staged.is_file() {
        return Err(fail(format!("staged file {} is missing", staged.display())));
    }

    if target.exists() {
        tracing::debug!("Removing {}", target.display());
        fs::remove_file(target).map_err(|e| fail(format!("remove failed: {e}")))?;
    }

    fs::rename(staged, target).map_err(|e| fail(format!("rename failed: {e}")))?;
    tracing::info!("Replaced {}", target.display());
    Ok(())
}
