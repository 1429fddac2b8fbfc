use std::fmt;

use chrono::{DateTime, FixedOffset, SecondsFormat};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Result, UpdaterError};
use crate::fetcher::ensure_https;

/// How an app's upstream identifies a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseIdKind {
    Version,
    Timestamp,
}

impl fmt::Display for ReleaseIdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseIdKind::Version => f.write_str("VERSION"),
            ReleaseIdKind::Timestamp => f.write_str("TIMESTAMP"),
        }
    }
}

/// Identity of one release.
///
/// Versions compare by exact string equality, timestamps by instant, so
/// `2020-01-01T01:00:00+01:00` equals `2020-01-01T00:00:00Z`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseId {
    Version(String),
    Timestamp(DateTime<FixedOffset>),
}

impl ReleaseId {
    pub fn kind(&self) -> ReleaseIdKind {
        match self {
            ReleaseId::Version(_) => ReleaseIdKind::Version,
            ReleaseId::Timestamp(_) => ReleaseIdKind::Timestamp,
        }
    }

    /// Parse a stored or fetched value as the given kind.
    pub fn parse(kind: ReleaseIdKind, value: &str) -> Result<Self> {
        match kind {
            ReleaseIdKind::Version => Ok(ReleaseId::Version(value.to_string())),
            ReleaseIdKind::Timestamp => parse_timestamp(value).map(ReleaseId::Timestamp),
        }
    }

    /// String form used for persistence; timestamps keep their offset.
    pub fn value_as_string(&self) -> String {
        match self {
            ReleaseId::Version(version) => version.clone(),
            ReleaseId::Timestamp(created) => created.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        }
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value_as_string())
    }
}

/// Parse an ISO-8601 zoned timestamp, ignoring a trailing `[Region/Zone]` suffix.
pub fn parse_timestamp(value: &str) -> Result<DateTime<FixedOffset>> {
    let trimmed = value.trim();
    let without_zone = match trimmed.find('[') {
        Some(index) if trimmed.ends_with(']') => &trimmed[..index],
        _ => trimmed,
    };
    DateTime::parse_from_rfc3339(without_zone)
        .map_err(|err| UpdaterError::parse(format!("invalid timestamp '{value}': {err}")))
}

/// What is installed on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledMetadata {
    pub version_name: String,
    pub release_id: ReleaseId,
}

impl InstalledMetadata {
    pub fn new(version_name: impl Into<String>, release_id: ReleaseId) -> Self {
        Self {
            version_name: version_name.into(),
            release_id,
        }
    }
}

/// Latest release offered upstream for the device's platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableMetadata {
    download_url: Url,
    release_id: ReleaseId,
    /// When upstream published the release, if it says.
    pub published_at: Option<DateTime<FixedOffset>>,
    /// Artefact size in bytes, if known.
    pub file_size: Option<u64>,
    /// Published SHA-256 (hex, lowercase) of the artefact, if any.
    pub file_sha256: Option<String>,
}

impl AvailableMetadata {
    /// Create metadata for an https download URL; anything else is rejected.
    pub fn new(download_url: Url, release_id: ReleaseId) -> Result<Self> {
        ensure_https(&download_url)?;
        Ok(Self {
            download_url,
            release_id,
            published_at: None,
            file_size: None,
            file_sha256: None,
        })
    }

    pub fn with_published_at(mut self, published_at: Option<DateTime<FixedOffset>>) -> Self {
        self.published_at = published_at;
        self
    }

    pub fn with_file_size(mut self, file_size: Option<u64>) -> Self {
        self.file_size = file_size;
        self
    }

    pub fn with_file_sha256(mut self, sha256: Option<String>) -> Self {
        self.file_sha256 = sha256.map(|hash| hash.to_ascii_lowercase());
        self
    }

    pub fn download_url(&self) -> &Url {
        &self.download_url
    }

    pub fn release_id(&self) -> &ReleaseId {
        &self.release_id
    }
}
