//! Content digests for download integrity checks.
//!
//! Digests are non-cryptographic fingerprints here: they catch truncated or
//! corrupted transfers, not tampering. MD5 is what update servers publish by
//! default; SHA-256 can be selected per deployment.

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, UpdateError};

/// Digest algorithm used for artifact verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestAlgorithm {
    /// MD5, hex encoded (32 characters).
    #[default]
    Md5,
    /// SHA-256, hex encoded (64 characters).
    Sha256,
}

impl DigestAlgorithm {
    /// Computes the lowercase hex digest of `data`.
    #[must_use]
    pub fn hex_digest(&self, data: &[u8]) -> String {
        match self {
            Self::Md5 => hex::encode(Md5::digest(data)),
            Self::Sha256 => hex::encode(Sha256::digest(data)),
        }
    }

    /// Get a human-readable label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha256 => "SHA-256",
        }
    }
}

/// Verifies `data` against `expected`, comparing hex case-insensitively.
///
/// Returns the computed digest on success.
pub fn verify_digest(
    algorithm: DigestAlgorithm,
    name: &str,
    data: &[u8],
    expected: &str,
) -> Result<String> {
    let actual = algorithm.hex_digest(data);
    let expected = expected.trim();

    if !actual.eq_ignore_ascii_case(expected) {
        return Err(UpdateError::IntegrityMismatch {
            name: name.to_string(),
            expected: expected.to_lowercase(),
            actual,
        });
    }

    tracing::debug!("{} verified for {}: {}", algorithm.label(), name, actual);
    Ok(actual)
}
