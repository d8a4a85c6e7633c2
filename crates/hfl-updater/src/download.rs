//! Artifact download and verification.
//!
//! Artifacts are fetched whole from `GET {base_url}/updater/{name}`, checked
//! against the digest the manifest announced, and only then written to disk
//! as `{name}.tmp` next to their final location.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::BasicAuth;
use crate::digest::{DigestAlgorithm, verify_digest};
use crate::error::{Result, UpdateError};
use crate::events::EventSink;
use crate::manifest::ArtifactDescriptor;
use crate::replace::staged_path;
use crate::transport::{HttpRequest, HttpTransport};

/// Path of the artifact endpoint relative to the base URL.
pub const ARTIFACT_PATH: &str = "/updater/";

/// Formats a byte count in human-readable form.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Downloads artifacts and verifies their digests.
pub struct ArtifactDownloader {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    install_root: PathBuf,
    algorithm: DigestAlgorithm,
    auth: Option<BasicAuth>,
}

impl ArtifactDownloader {
    /// Creates a downloader for artifacts under `base_url`, staged below `install_root`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: &str,
        install_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            install_root: install_root.into(),
            algorithm: DigestAlgorithm::default(),
            auth: None,
        }
    }

    /// Sets the digest algorithm used for verification.
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Sends basic-auth credentials with every artifact request.
    #[must_use]
    pub fn with_auth(mut self, auth: Option<BasicAuth>) -> Self {
        self.auth = auth;
        self
    }

    /// URL of an artifact.
    #[must_use]
    pub fn artifact_url(&self, name: &str) -> String {
        format!(
            "{}{ARTIFACT_PATH}{}",
            self.base_url,
            name.replace('\\', "/").trim_start_matches('/')
        )
    }

    /// Downloads an artifact and checks it against its expected digest.
    ///
    /// Nothing is written to disk. A text-only progress event is sent before
    /// the request.
    pub fn fetch_and_verify(
        &self,
        descriptor: &ArtifactDescriptor,
        events: &mut EventSink,
    ) -> Result<Vec<u8>> {
        let url = self.artifact_url(&descriptor.name);
        events.status(format!("Downloading {}", descriptor.name));
        tracing::info!("Downloading {}", url);

        let mut request = HttpRequest::get(url.as_str());
        if let Some(auth) = &self.auth {
            request = request.with_header("Authorization", auth.header_value());
        }

        let response = self
            .transport
            .send(&request)
            .map_err(|e| UpdateError::DownloadFailed {
                name: descriptor.name.clone(),
                status: None,
                reason: e.to_string(),
            })?;

        if !response.is_ok() {
            return Err(UpdateError::DownloadFailed {
                name: descriptor.name.clone(),
                status: Some(response.status),
                reason: if response.reason.is_empty() {
                    "unexpected status".to_string()
                } else {
                    response.reason
                },
            });
        }

        tracing::debug!(
            "Received {} for {}",
            format_bytes(response.body.len() as u64),
            descriptor.name
        );

        events.status(format!("Verifying {}", descriptor.name));
        verify_digest(
            self.algorithm,
            &descriptor.name,
            &response.body,
            &descriptor.expected_digest,
        )?;
        Ok(response.body)
    }

    /// Writes verified bytes to `{install_root}/{name}.tmp`.
    pub fn stage(&self, descriptor: &ArtifactDescriptor, bytes: &[u8]) -> Result<PathBuf> {
        let target = self.install_root.join(&descriptor.name);
        let staged = staged_path(&target);
        write_staged(&staged, bytes).map_err(|reason| UpdateError::ReplaceFailed {
            path: target,
            reason,
        })?;
        Ok(staged)
    }
}

/// Writes `bytes` to `path`, creating parent directories.
pub(crate) fn write_staged(path: &Path, bytes: &[u8]) -> std::result::Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
    }
    fs::write(path, bytes).map_err(|e| format!("failed to write {}: {e}", path.display()))?;
    tracing::debug!("Staged {} ({})", path.display(), format_bytes(bytes.len() as u64));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::UpdateEvent;
    use crate::transport::HttpResponse;
    use crate::transport::test_support::ScriptedTransport;
    use std::sync::mpsc;

    const BASE: &str = "http://updates.test";
    const HELLO_MD5: &str = "65a8e27d8879283831b664bd8b7f0ad4";

    fn downloader(transport: Arc<ScriptedTransport>, root: &Path) -> ArtifactDownloader {
        ArtifactDownloader::new(transport, BASE, root)
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_artifact_url() {
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(Arc::new(ScriptedTransport::default()), dir.path());
        assert_eq!(
            d.artifact_url("bin\\app.dll"),
            "http://updates.test/updater/bin/app.dll"
        );
    }

    #[test]
    fn test_verifying_follows_download() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::default().route(
            "http://updates.test/updater/hello.txt",
            HttpResponse::new(200, "Hello, World!"),
        ));
        let (tx, rx) = mpsc::channel();
        let mut events = EventSink::new(tx);

        let bytes = downloader(transport, dir.path())
            .fetch_and_verify(&ArtifactDescriptor::new("hello.txt", HELLO_MD5), &mut events)
            .unwrap();

        assert_eq!(bytes, b"Hello, World!");
        let texts: Vec<_> = rx
            .try_iter()
            .map(|event| match event {
                UpdateEvent::Progress { percent: None, text } => text,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(texts, vec!["Downloading hello.txt", "Verifying hello.txt"]);
    }

    #[test]
    fn test_failed_request_is_never_verified() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel();
        let mut events = EventSink::new(tx);

        downloader(Arc::new(ScriptedTransport::default()), dir.path())
            .fetch_and_verify(&ArtifactDescriptor::new("gone.dll", HELLO_MD5), &mut events)
            .unwrap_err();

        assert!(!rx.try_iter().any(|event| matches!(
            event,
            UpdateEvent::Progress { ref text, .. } if text.starts_with("Verifying")
        )));
    }

    #[test]
    fn test_non_200_is_download_failed() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::default().route(
            "http://updates.test/updater/a.dll",
            HttpResponse::new(204, ""),
        ));

        let err = downloader(transport, dir.path())
            .fetch_and_verify(
                &ArtifactDescriptor::new("a.dll", HELLO_MD5),
                &mut EventSink::disconnected(),
            )
            .unwrap_err();

        assert!(matches!(
            err,
            UpdateError::DownloadFailed {
                status: Some(204),
                ..
            }
        ));
    }

    #[test]
    fn test_transport_error_has_no_status() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(
            ScriptedTransport::default().fail("http://updates.test/updater/a.dll", "timed out"),
        );

        let err = downloader(transport, dir.path())
            .fetch_and_verify(
                &ArtifactDescriptor::new("a.dll", HELLO_MD5),
                &mut EventSink::disconnected(),
            )
            .unwrap_err();

        assert!(matches!(err, UpdateError::DownloadFailed { status: None, .. }));
    }

    #[test]
    fn test_mismatch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::default().route(
            "http://updates.test/updater/a.dll",
            HttpResponse::new(200, "tampered"),
        ));

        let err = downloader(transport, dir.path())
            .fetch_and_verify(
                &ArtifactDescriptor::new("a.dll", HELLO_MD5),
                &mut EventSink::disconnected(),
            )
            .unwrap_err();

        assert!(matches!(err, UpdateError::IntegrityMismatch { .. }));
        assert!(!dir.path().join("a.dll").exists());
        assert!(!dir.path().join("a.dll.tmp").exists());
    }

    #[test]
    fn test_auth_header_only_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::default().route(
            "http://updates.test/updater/hello.txt",
            HttpResponse::new(200, "Hello, World!"),
        ));
        let auth = BasicAuth {
            username: "user".to_string(),
            password: "pass".to_string(),
        };

        downloader(transport.clone(), dir.path())
            .with_auth(Some(auth))
            .fetch_and_verify(
                &ArtifactDescriptor::new("hello.txt", HELLO_MD5),
                &mut EventSink::disconnected(),
            )
            .unwrap();

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0].header("Authorization"), Some("Basic dXNlcjpwYXNz"));
    }

    #[test]
    fn test_stage_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(Arc::new(ScriptedTransport::default()), dir.path());

        let staged = d
            .stage(&ArtifactDescriptor::new("deep/dir/a.dll", "x"), b"bytes")
            .unwrap();

        assert_eq!(staged, dir.path().join("deep/dir/a.dll.tmp"));
        assert_eq!(fs::read(&staged).unwrap(), b"bytes");
        assert!(!dir.path().join("deep/dir/a.dll").exists());
    }
}
