//! Error types for the update orchestration engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during an update run.
///
/// Every variant terminates the current update pass. Nothing in the engine
/// retries; a retry is a fresh run of the whole orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum UpdateError {
    /// The manifest endpoint could not be reached or answered with a non-success status.
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// The manifest was received but is missing required fields or has the wrong shape.
    #[error("malformed manifest: {0}")]
    MalformedManifest(String),

    /// A version string could not be parsed under the active comparison strategy.
    #[error("invalid {strategy} version: {value:?}")]
    Parse {
        /// The offending version string.
        value: String,
        /// Name of the comparison strategy.
        strategy: &'static str,
    },

    /// An artifact request failed at the transport level or returned a non-200 status.
    #[error("download of {name} failed{}: {reason}", .status.map(|s| format!(" with status {s}")).unwrap_or_default())]
    DownloadFailed {
        /// Artifact name.
        name: String,
        /// HTTP status, when a response was received.
        status: Option<u16>,
        /// Transport or server detail.
        reason: String,
    },

    /// Downloaded bytes do not match the digest announced by the manifest.
    #[error("integrity check failed for {name}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        /// Artifact name.
        name: String,
        /// Digest from the manifest.
        expected: String,
        /// Digest of the downloaded bytes.
        actual: String,
    },

    /// Moving a staged file into place failed.
    #[error("failed to replace {}: {reason}", .path.display())]
    ReplaceFailed {
        /// Final target path.
        path: PathBuf,
        /// Underlying I/O detail.
        reason: String,
    },

    /// Staging or handing off the replacement of the running executable failed.
    #[error("self-update failed: {0}")]
    SelfUpdateFailed(String),

    /// A detached process (target program, installer or helper) could not be started.
    #[error("failed to launch {}: {reason}", .path.display())]
    LaunchFailed {
        /// Program that was to be started.
        path: PathBuf,
        /// Underlying spawn error.
        reason: String,
    },

    /// The presentation layer asked the run to stop.
    #[error("update interrupted")]
    Interrupted,

    /// Reading or writing the local version file failed.
    #[error("local state error: {0}")]
    State(String),

    /// Settings could not be loaded, saved or validated.
    #[error("configuration error: {0}")]
    Config(String),
}

impl UpdateError {
    /// Returns a short message suitable for the presentation layer.
    #[must_use]
    pub fn user_message(&self) -> &str {
        match self {
            Self::RemoteUnavailable(_) => {
                "Could not reach the update server. Please check your network connection."
            }
            Self::MalformedManifest(_) => "The update server sent invalid version information.",
            Self::Parse { .. } => "A version number could not be understood.",
            Self::DownloadFailed { .. } => "Downloading an update file failed.",
            Self::IntegrityMismatch { .. } => {
                "A downloaded file failed verification. The download may be corrupted."
            }
            Self::ReplaceFailed { .. } => {
                "An update file could not be installed. Is the program still running?"
            }
            Self::SelfUpdateFailed(_) => "The launcher could not update itself.",
            Self::LaunchFailed { .. } => "The program could not be started.",
            Self::Interrupted => "The update was cancelled.",
            Self::State(_) | Self::Config(_) => "An unexpected error occurred.",
        }
    }

    /// Stable identifier of the error kind, used in the run report.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RemoteUnavailable(_) => "remote_unavailable",
            Self::MalformedManifest(_) => "malformed_manifest",
            Self::Parse { .. } => "parse_error",
            Self::DownloadFailed { .. } => "download_failed",
            Self::IntegrityMismatch { .. } => "integrity_mismatch",
            Self::ReplaceFailed { .. } => "replace_failed",
            Self::SelfUpdateFailed(_) => "self_update_failed",
            Self::LaunchFailed { .. } => "launch_failed",
            Self::Interrupted => "interrupted",
            Self::State(_) => "state_error",
            Self::Config(_) => "config_error",
        }
    }

    /// Returns whether running the whole orchestrator again could plausibly succeed.
    ///
    /// The engine itself never retries.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RemoteUnavailable(_)
                | Self::DownloadFailed { .. }
                | Self::ReplaceFailed { .. }
                | Self::Interrupted
        )
    }
}

impl From<serde_json::Error> for UpdateError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedManifest(err.to_string())
    }
}

/// Result type alias for update operations.
pub type Result<T> = std::result::Result<T, UpdateError>;
