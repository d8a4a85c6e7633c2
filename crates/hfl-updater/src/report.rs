//! Run report for post-update diagnostics.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, UpdateError};
use crate::orchestrator::{FollowUp, UpdateOutcome};

/// Default report file name under the install root.
pub const REPORT_FILE_NAME: &str = "last_update.json";

/// Record of the most recent update run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Whether the update pass succeeded.
    pub success: bool,
    /// Final status text.
    pub message: String,
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Program or installer the run handed over to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launched: Option<PathBuf>,
    /// Launch failure after a successful update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_error: Option<String>,
    /// Error kind identifier when the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Stage the run failed in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<String>,
}

impl RunReport {
    /// Builds a report from a finished run.
    #[must_use]
    pub fn from_outcome(outcome: &UpdateOutcome) -> Self {
        let launched = match &outcome.follow_up {
            FollowUp::LaunchProgram(path)
            | FollowUp::LaunchInstaller(path)
            | FollowUp::SelfUpdateHandoff(path) => Some(path.clone()),
            FollowUp::None => None,
        };

        Self {
            success: outcome.succeeded,
            message: outcome.message.clone(),
            timestamp: Utc::now(),
            launched,
            launch_error: outcome.launch_error.clone(),
            error_kind: outcome.error.as_ref().map(|e| e.kind().to_string()),
            failed_at: outcome.failed_at.map(|stage| stage.to_string()),
        }
    }

    /// Default report path for an install root.
    #[must_use]
    pub fn default_path(install_root: &Path) -> PathBuf {
        install_root.join(REPORT_FILE_NAME)
    }

    /// Writes the report as pretty JSON.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                UpdateError::State(format!("failed to create report directory: {e}"))
            })?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| UpdateError::State(format!("failed to serialize report: {e}")))?;
        fs::write(path, content)
            .map_err(|e| UpdateError::State(format!("failed to write report: {e}")))?;

        tracing::debug!("Run report written to {}", path.display());
        Ok(())
    }

    /// Reads a report, if one exists and parses.
    #[must_use]
    pub fn read_from(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Stage;

    #[test]
    fn test_failure_report() {
        let outcome = UpdateOutcome {
            succeeded: false,
            message: "integrity check failed".to_string(),
            follow_up: FollowUp::None,
            launch_error: None,
            error: Some(UpdateError::IntegrityMismatch {
                name: "a.dll".to_string(),
                expected: "aa".to_string(),
                actual: "bb".to_string(),
            }),
            failed_at: Some(Stage::Downloading(0)),
        };

        let report = RunReport::from_outcome(&outcome);
        assert!(!report.success);
        assert_eq!(report.error_kind.as_deref(), Some("integrity_mismatch"));
        assert_eq!(report.failed_at.as_deref(), Some("downloading file 1"));
        assert!(report.launched.is_none());
    }

    #[test]
    fn test_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = RunReport::default_path(dir.path());
        let outcome = UpdateOutcome {
            succeeded: true,
            message: "Up to date".to_string(),
            follow_up: FollowUp::LaunchProgram(dir.path().join("app")),
            launch_error: Some("permission denied".to_string()),
            error: None,
            failed_at: None,
        };

        let report = RunReport::from_outcome(&outcome);
        report.write_to(&path).unwrap();

        let json = fs::read_to_string(&path).unwrap();
        assert!(!json.contains("error_kind"));
        assert_eq!(RunReport::read_from(&path), Some(report));
    }

    #[test]
    fn test_read_missing_report() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RunReport::read_from(&dir.path().join("missing.json")).is_none());
    }
}
