//! Remote update metadata.
//!
//! The server answers `GET {base_url}/api/updater/version` with a JSON object:
//!
//! ```json
//! {
//!   "main_program": "bin/app.exe",
//!   "version": "2.0.0",
//!   "hash": "…",
//!   "hotfix": "2.0.0.3",
//!   "files": [{ "filename": "bin/app.dll", "hash": "…" }],
//!   "updater_version": "1.1.0",
//!   "updater_hash": "…"
//! }
//! ```
//!
//! [`RawManifest`] mirrors that wire shape; [`UpdateManifest`] is the validated
//! form the orchestrator works with.

use std::path::{Component, Path};
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{Result, UpdateError};
use crate::transport::{HttpRequest, HttpTransport};

/// Path of the manifest endpoint relative to the base URL.
pub const MANIFEST_PATH: &str = "/api/updater/version";

/// An artifact the server publishes, identified by its relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    /// Relative path under the install root; also the download name.
    pub name: String,
    /// Hex digest of the artifact bytes.
    pub expected_digest: String,
}

impl ArtifactDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, expected_digest: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expected_digest: expected_digest.into(),
        }
    }
}

/// Version and digest of a newer launcher build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfUpdateInfo {
    /// Launcher version published by the server.
    pub version: String,
    /// Digest of the launcher artifact.
    pub digest: String,
}

/// Validated update metadata for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateManifest {
    /// Program to start after updating, relative to the install root.
    pub target_program_path: String,
    /// Latest major release.
    pub latest_major_version: String,
    /// Digest of the major release installer.
    pub major_artifact_digest: String,
    /// Latest patch level; empty when the server publishes none.
    pub latest_patch_version: String,
    /// Files to replace for the latest patch level, in apply order.
    pub patch_artifacts: Vec<ArtifactDescriptor>,
    /// Present when the server publishes a launcher build.
    pub self_update: Option<SelfUpdateInfo>,
}

impl UpdateManifest {
    /// Returns true when the server announces a patch level.
    #[must_use]
    pub fn has_patch_version(&self) -> bool {
        !self.latest_patch_version.trim().is_empty()
    }
}

/// `hotfix` is published either as a string or as a bare integer.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PatchVersion {
    Text(String),
    Number(i64),
}

impl PatchVersion {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s.trim().to_string(),
            Self::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawFile {
    filename: String,
    hash: String,
}

/// Wire shape of the manifest response.
#[derive(Debug, Deserialize)]
struct RawManifest {
    main_program: String,
    version: String,
    hash: String,
    hotfix: PatchVersion,
    files: Vec<RawFile>,
    #[serde(default)]
    updater_version: Option<String>,
    #[serde(default)]
    updater_hash: Option<String>,
}

impl TryFrom<RawManifest> for UpdateManifest {
    type Error = UpdateError;

    fn try_from(raw: RawManifest) -> Result<Self> {
        let self_update = match (raw.updater_version, raw.updater_hash) {
            (Some(version), Some(digest)) => Some(SelfUpdateInfo { version, digest }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(UpdateError::MalformedManifest(
                    "updater_version without updater_hash".to_string(),
                ));
            }
            (None, Some(_)) => {
                return Err(UpdateError::MalformedManifest(
                    "updater_hash without updater_version".to_string(),
                ));
            }
        };

        require_non_empty("main_program", &raw.main_program)?;
        require_non_empty("version", &raw.version)?;
        validate_artifact_name(&raw.main_program)?;

        let patch_artifacts = raw
            .files
            .into_iter()
            .map(|file| {
                validate_artifact_name(&file.filename)?;
                Ok(ArtifactDescriptor::new(file.filename, file.hash))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            target_program_path: raw.main_program,
            latest_major_version: raw.version.trim().to_string(),
            major_artifact_digest: raw.hash,
            latest_patch_version: raw.hotfix.into_string(),
            patch_artifacts,
            self_update,
        })
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(UpdateError::MalformedManifest(format!(
            "field `{field}` is empty"
        )));
    }
    Ok(())
}

/// Rejects names that would escape the install root.
pub fn validate_artifact_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(UpdateError::MalformedManifest(
            "artifact name is empty".to_string(),
        ));
    }

    let path = Path::new(name);
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(UpdateError::MalformedManifest(format!(
                    "unsafe artifact name: {name}"
                )));
            }
        }
    }
    // A leading backslash is a root on Windows but a plain character elsewhere
    if name.starts_with('\\') || name.split(['/', '\\']).any(|part| part == "..") {
        return Err(UpdateError::MalformedManifest(format!(
            "unsafe artifact name: {name}"
        )));
    }
    Ok(())
}

/// Parses a manifest response body.
pub fn parse_manifest(body: &[u8]) -> Result<UpdateManifest> {
    let raw: RawManifest = serde_json::from_slice(body)?;
    UpdateManifest::try_from(raw)
}

/// Retrieves the manifest from the update server.
pub struct ManifestFetcher {
    transport: Arc<dyn HttpTransport>,
}

impl ManifestFetcher {
    /// Creates a fetcher over the given transport.
    #[must_use]
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Fetches and validates the manifest. No retry.
    pub fn fetch(&self, base_url: &str) -> Result<UpdateManifest> {
        let url = format!("{}{MANIFEST_PATH}", base_url.trim().trim_end_matches('/'));
        tracing::info!("Fetching update manifest from {}", url);

        let response = self
            .transport
            .send(&HttpRequest::get(url.as_str()))
            .map_err(|e| UpdateError::RemoteUnavailable(format!("{url}: {e}")))?;

        if !response.is_success() {
            return Err(UpdateError::RemoteUnavailable(format!(
                "{url} answered {}",
                response.status_line()
            )));
        }

        let manifest = parse_manifest(&response.body)?;
        tracing::debug!(
            "Manifest: major {}, patch {:?}, {} file(s), launcher {:?}",
            manifest.latest_major_version,
            manifest.latest_patch_version,
            manifest.patch_artifacts.len(),
            manifest.self_update.as_ref().map(|s| s.version.as_str())
        );
        Ok(manifest)
    }
}
