//! Version comparison strategies.
//!
//! Two representations are supported: dotted numeric versions
//! (`"2.0.1"`, `"1.2.3.4"`) and integer timestamps (`"1718000000"`).
//! A run uses exactly one [`VersionComparator`] for every comparison it makes.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UpdateError};

/// A dotted numeric version with any number of segments.
///
/// Ordering is segment by segment from the left. When one version is a strict
/// prefix of the other, the longer one is greater (`1.2.3.1 > 1.2.3`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DottedVersion(Vec<u64>);

impl DottedVersion {
    /// Returns the numeric segments.
    #[must_use]
    pub fn segments(&self) -> &[u64] {
        &self.0
    }
}

impl FromStr for DottedVersion {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let invalid = || UpdateError::Parse {
            value: s.to_string(),
            strategy: VersionComparator::DottedNumeric.label(),
        };

        // `u64::from_str` accepts a leading '+', which is not a valid segment
        let segments = trimmed
            .split('.')
            .map(|part| {
                if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid());
                }
                part.parse::<u64>().map_err(|_| invalid())
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self(segments))
    }
}

impl fmt::Display for DottedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
            first = false;
        }
        Ok(())
    }
}

impl PartialOrd for DottedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DottedVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(&other.0) {
            match a.cmp(b) {
                Ordering::Equal => {}
                other => return other,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

/// Parses an integer timestamp version. Only plain ASCII digits are accepted.
fn parse_timestamp(s: &str) -> Result<i64> {
    let invalid = || UpdateError::Parse {
        value: s.to_string(),
        strategy: VersionComparator::Timestamp.label(),
    };
    let trimmed = s.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    trimmed.parse::<i64>().map_err(|_| invalid())
}

/// Ordering strategy over version strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionComparator {
    /// `major.minor.patch[...]`, compared numerically per segment.
    #[default]
    #[serde(rename = "dotted", alias = "dotted_numeric")]
    DottedNumeric,
    /// A single integer, typically seconds since the epoch.
    Timestamp,
}

impl VersionComparator {
    /// Returns true when `remote` is strictly newer than `local`.
    ///
    /// Fails with [`UpdateError::Parse`] if either string is not valid under
    /// this strategy.
    pub fn is_newer(&self, remote: &str, local: &str) -> Result<bool> {
        Ok(self.compare(remote, local)? == Ordering::Greater)
    }

    /// Compares two version strings under this strategy.
    pub fn compare(&self, a: &str, b: &str) -> Result<Ordering> {
        match self {
            Self::DottedNumeric => {
                let a = DottedVersion::from_str(a)?;
                let b = DottedVersion::from_str(b)?;
                Ok(a.cmp(&b))
            }
            Self::Timestamp => Ok(parse_timestamp(a)?.cmp(&parse_timestamp(b)?)),
        }
    }

    /// Checks that `version` parses under this strategy.
    pub fn validate(&self, version: &str) -> Result<()> {
        match self {
            Self::DottedNumeric => DottedVersion::from_str(version).map(|_| ()),
            Self::Timestamp => parse_timestamp(version).map(|_| ()),
        }
    }

    /// Version assumed when nothing has been recorded locally yet.
    #[must_use]
    pub const fn default_local_version(&self) -> &'static str {
        match self {
            Self::DottedNumeric => "0.0.0",
            Self::Timestamp => "0",
        }
    }

    /// Get a human-readable label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::DottedNumeric => "dotted",
            Self::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for VersionComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}
