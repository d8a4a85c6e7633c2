//! Configuration types for the update engine.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::digest::DigestAlgorithm;
use crate::error::{Result, UpdateError};
use crate::version::VersionComparator;

/// Default update server, used when no settings file is present.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Default name of the persisted patch version file.
pub const DEFAULT_STATE_FILE: &str = "version";

/// Default installer artifact name; `{version}` is replaced by the remote major version.
pub const DEFAULT_INSTALLER_NAME: &str = "Setup_{version}.exe";

/// Default delay the self-update helper waits before touching the old executable.
pub const DEFAULT_SETTLE_DELAY_SECS: u64 = 2;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Who starts the target program or installer once the update decision is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchPolicy {
    /// The engine starts it as a detached process.
    #[default]
    Detached,
    /// The engine only emits a launch request event; the presentation layer starts it.
    Presenter,
}

impl fmt::Display for LaunchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detached => write!(f, "detached"),
            Self::Presenter => write!(f, "presenter"),
        }
    }
}

/// Static shared-secret credentials for the artifact endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl BasicAuth {
    /// Value for the `Authorization` header.
    #[must_use]
    pub fn header_value(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {token}")
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Settings for replacing the launcher's own executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfUpdateSettings {
    /// Overrides the version the running launcher reports about itself.
    /// Unset means the binary's own version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,
    /// Artifact name of the launcher on the update server.
    pub artifact_name: String,
    /// Path of the running executable. Resolved from the process when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<PathBuf>,
    /// Seconds the helper waits for this process to release its image.
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,
}

impl SelfUpdateSettings {
    /// Creates settings for the given launcher artifact name.
    #[must_use]
    pub fn new(artifact_name: impl Into<String>) -> Self {
        Self {
            current_version: None,
            artifact_name: artifact_name.into(),
            executable: None,
            settle_delay_secs: DEFAULT_SETTLE_DELAY_SECS,
        }
    }

    /// Version to compare against the server: the override if set, else `binary_version`.
    #[must_use]
    pub fn running_version<'a>(&'a self, binary_version: &'a str) -> &'a str {
        self.current_version.as_deref().unwrap_or(binary_version)
    }

    /// Path of the executable to replace.
    pub fn executable_path(&self) -> Result<PathBuf> {
        match &self.executable {
            Some(path) => Ok(path.clone()),
            None => std::env::current_exe().map_err(|e| {
                UpdateError::SelfUpdateFailed(format!("cannot locate running executable: {e}"))
            }),
        }
    }

    /// The settle delay as a duration.
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

fn default_settle_delay() -> u64 {
    DEFAULT_SETTLE_DELAY_SECS
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_installed_version() -> String {
    "0.0.0".to_string()
}

fn default_install_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_state_file() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_FILE)
}

fn default_installer_name() -> String {
    DEFAULT_INSTALLER_NAME.to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Settings for one update run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdaterSettings {
    /// Update server base URL, without trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Major version of the installed target program.
    #[serde(default = "default_installed_version")]
    pub installed_version: String,

    /// Version comparison strategy for every comparison in a run.
    #[serde(default)]
    pub comparator: VersionComparator,

    /// Digest algorithm of the hashes in the manifest.
    #[serde(default)]
    pub digest: DigestAlgorithm,

    /// Directory that patch files, the installer and the state file are relative to.
    #[serde(default = "default_install_root")]
    pub install_root: PathBuf,

    /// File holding the installed patch version, relative to `install_root`.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Installer artifact name template.
    #[serde(default = "default_installer_name")]
    pub installer_name: String,

    /// Who starts the target program or installer.
    #[serde(default)]
    pub launch_policy: LaunchPolicy,

    /// Check hotfixes even when the installed major version is ahead of the server.
    #[serde(default)]
    pub hotfix_when_ahead: bool,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Credentials sent to the artifact endpoint only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_auth: Option<BasicAuth>,

    /// Self-update configuration; self-update is skipped when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_update: Option<SelfUpdateSettings>,
}

impl Default for UpdaterSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            installed_version: default_installed_version(),
            comparator: VersionComparator::default(),
            digest: DigestAlgorithm::default(),
            install_root: default_install_root(),
            state_file: default_state_file(),
            installer_name: default_installer_name(),
            artifact_auth: None,
            self_update: None,
            launch_policy: LaunchPolicy::default(),
            hotfix_when_ahead: false,
            timeout_secs: default_timeout(),
        }
    }
}

impl UpdaterSettings {
    /// Load settings from a TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            UpdateError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        toml::from_str(&content)
            .map_err(|e| UpdateError::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Load settings from `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            tracing::debug!("No settings at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save settings to a TOML file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                UpdateError::Config(format!("failed to create config directory: {e}"))
            })?;
        }

        let content = self.to_toml()?;
        std::fs::write(path, content)
            .map_err(|e| UpdateError::Config(format!("failed to write settings: {e}")))
    }

    /// Serializes the settings as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| UpdateError::Config(format!("failed to serialize settings: {e}")))
    }

    /// Get the default settings file path.
    #[must_use]
    pub fn config_path() -> PathBuf {
        directories::ProjectDirs::from("com", "HotfixLauncher", "HFL")
            .map(|dirs| dirs.config_dir().join("launcher.toml"))
            .unwrap_or_else(|| PathBuf::from("launcher.toml"))
    }

    /// Checks values the engine relies on before a run starts.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(UpdateError::Config("base_url must not be empty".to_string()));
        }
        if !self.installer_name.contains("{version}") {
            tracing::warn!(
                "installer_name {:?} has no {{version}} placeholder",
                self.installer_name
            );
        }
        self.comparator
            .validate(&self.installed_version)
            .map_err(|e| UpdateError::Config(format!("installed_version: {e}")))?;
        if let Some(self_update) = &self.self_update {
            if let Some(version) = &self_update.current_version {
                self.comparator
                    .validate(version)
                    .map_err(|e| UpdateError::Config(format!("self_update.current_version: {e}")))?;
            }
            if self_update.artifact_name.trim().is_empty() {
                return Err(UpdateError::Config(
                    "self_update.artifact_name must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Base URL with any trailing slashes removed.
    #[must_use]
    pub fn normalized_base_url(&self) -> &str {
        self.base_url.trim().trim_end_matches('/')
    }

    /// Absolute or root-relative path of the patch version file.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.install_root.join(&self.state_file)
    }

    /// Installer artifact name for a given major version.
    #[must_use]
    pub fn installer_artifact_name(&self, version: &str) -> String {
        self.installer_name.replace("{version}", version)
    }

    /// Request timeout as a duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = UpdaterSettings::default();
        assert_eq!(settings.base_url, "http://localhost:8000");
        assert_eq!(settings.comparator, VersionComparator::DottedNumeric);
        assert_eq!(settings.digest, DigestAlgorithm::Md5);
        assert_eq!(settings.launch_policy, LaunchPolicy::Detached);
        assert!(settings.self_update.is_none());
        assert!(!settings.hotfix_when_ahead);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let settings: UpdaterSettings = toml::from_str(
            r#"
            base_url = "https://updates.example.com/"
            installed_version = "2.0.0"

            [artifact_auth]
            username = "bjfu"
            password = "bjfu"
            "#,
        )
        .unwrap();

        assert_eq!(settings.normalized_base_url(), "https://updates.example.com");
        assert_eq!(settings.installed_version, "2.0.0");
        assert_eq!(settings.state_file, PathBuf::from("version"));
        assert_eq!(
            settings.artifact_auth.unwrap().header_value(),
            "Basic YmpmdTpiamZ1"
        );
    }

    #[test]
    fn test_self_update_section() {
        let settings: UpdaterSettings = toml::from_str(
            r#"
            [self_update]
            artifact_name = "hfl-launcher.exe"
            "#,
        )
        .unwrap();

        let self_update = settings.self_update.unwrap();
        assert_eq!(self_update.settle_delay(), Duration::from_secs(2));
        assert!(self_update.executable.is_none());
        assert_eq!(self_update.running_version("1.1.0"), "1.1.0");
    }

    #[test]
    fn test_current_version_override() {
        let settings: UpdaterSettings = toml::from_str(
            r#"
            [self_update]
            current_version = "1.0.0"
            artifact_name = "hfl-launcher.exe"
            "#,
        )
        .unwrap();

        let self_update = settings.self_update.unwrap();
        assert_eq!(self_update.running_version("1.1.0"), "1.0.0");
    }

    #[test]
    fn test_saved_self_update_does_not_pin_version() {
        let settings = UpdaterSettings {
            self_update: Some(SelfUpdateSettings::new("hfl-launcher")),
            ..Default::default()
        };
        let rendered = settings.to_toml().unwrap();
        assert!(rendered.contains("artifact_name"));
        assert!(!rendered.contains("current_version"));
    }

    #[test]
    fn test_validate_rejects_bad_installed_version() {
        let settings = UpdaterSettings {
            installed_version: "two".to_string(),
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(UpdateError::Config(_))));

        let settings = UpdaterSettings {
            comparator: VersionComparator::Timestamp,
            installed_version: "2.0.0".to_string(),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_installer_artifact_name() {
        let settings = UpdaterSettings::default();
        assert_eq!(settings.installer_artifact_name("2.1.0"), "Setup_2.1.0.exe");
    }

    #[test]
    fn test_debug_redacts_password() {
        let auth = BasicAuth {
            username: "user".to_string(),
            password: "secret".to_string(),
        };
        let debug = format!("{auth:?}");
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("launcher.toml");

        let settings = UpdaterSettings {
            installed_version: "3.1.4".to_string(),
            self_update: Some(SelfUpdateSettings::new("hfl-launcher")),
            ..Default::default()
        };
        settings.save_to(&path).unwrap();

        let loaded = UpdaterSettings::load_from(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = UpdaterSettings::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(settings, UpdaterSettings::default());
    }
}
