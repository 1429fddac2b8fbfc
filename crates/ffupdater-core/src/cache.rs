//! Persisted copy of the last fetched metadata per app.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use crate::app::App;
use crate::error::{Result, UpdaterError};
use crate::fetcher::parse_https_url;
use crate::platform::Platform;
use crate::prefs::PreferenceStore;
use crate::release::{parse_timestamp, AvailableMetadata, ReleaseId};

const URL_SUFFIX: &str = "download_url";
const RELEASE_ID_SUFFIX: &str = "release_id";
const SHA256_SUFFIX: &str = "file_sha256";
const SIZE_SUFFIX: &str = "file_size";
const PUBLISHED_SUFFIX: &str = "published_at";
const PLATFORM_SUFFIX: &str = "platform";
const CREATED_SUFFIX: &str = "created_epoch_ms";

fn key(app: App, suffix: &str) -> String {
    format!("download_metadata_{}_{suffix}", app.id())
}

const ALL_SUFFIXES: [&str; 7] = [
    CREATED_SUFFIX,
    URL_SUFFIX,
    RELEASE_ID_SUFFIX,
    SHA256_SUFFIX,
    SIZE_SUFFIX,
    PUBLISHED_SUFFIX,
    PLATFORM_SUFFIX,
];

/// Metadata cache on top of a [`PreferenceStore`], valid for a fixed TTL.
///
/// One entry per app, tagged with the platform it was resolved for. A lookup
/// for another platform is a miss, since the download URL differs per ABI.
#[derive(Clone)]
pub struct MetadataCache {
    prefs: Arc<dyn PreferenceStore>,
    ttl: Duration,
}

impl MetadataCache {
    pub fn new(prefs: Arc<dyn PreferenceStore>, ttl: Duration) -> Self {
        Self { prefs, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached metadata for `platform` younger than the TTL, if any.
    pub fn get(&self, app: App, platform: Platform) -> Result<Option<AvailableMetadata>> {
        self.get_at(app, platform, Utc::now().timestamp_millis())
    }

    fn get_at(&self, app: App, platform: Platform, now_ms: i64) -> Result<Option<AvailableMetadata>> {
        let Some(created) = self.prefs.get_i64(&key(app, CREATED_SUFFIX)) else {
            return Ok(None);
        };
        let age = now_ms.saturating_sub(created);
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        if age < 0 || age >= ttl_ms {
            debug!(%app, age_ms = age, "cached metadata expired");
            return Ok(None);
        }
        let cached_platform = self.prefs.get_string(&key(app, PLATFORM_SUFFIX));
        if cached_platform.as_deref() != Some(platform.as_str()) {
            debug!(%app, %platform, cached = ?cached_platform, "cached metadata is for another platform");
            return Ok(None);
        }

        let (Some(url), Some(release_id)) = (
            self.prefs.get_string(&key(app, URL_SUFFIX)),
            self.prefs.get_string(&key(app, RELEASE_ID_SUFFIX)),
        ) else {
            return Ok(None);
        };

        let url = parse_https_url(&url).map_err(|err| {
            UpdaterError::parse(format!("cached download url of {app} is invalid: {err}"))
        })?;
        let release_id = ReleaseId::parse(app.release_id_kind(), &release_id)?;
        let sha256 = self.prefs.get_string(&key(app, SHA256_SUFFIX));
        let file_size = match self.prefs.get_i64(&key(app, SIZE_SUFFIX)) {
            Some(size) => Some(u64::try_from(size).map_err(|_| {
                UpdaterError::parse(format!("cached file size of {app} is negative: {size}"))
            })?),
            None => None,
        };
        let published_at = self
            .prefs
            .get_string(&key(app, PUBLISHED_SUFFIX))
            .map(|value| parse_timestamp(&value))
            .transpose()?;

        debug!(%app, %release_id, "using cached metadata");
        Ok(Some(
            AvailableMetadata::new(url, release_id)?
                .with_file_sha256(sha256)
                .with_file_size(file_size)
                .with_published_at(published_at),
        ))
    }

    pub fn put(&self, app: App, platform: Platform, metadata: &AvailableMetadata) -> Result<()> {
        self.put_at(app, platform, metadata, Utc::now().timestamp_millis())
    }

    fn put_at(
        &self,
        app: App,
        platform: Platform,
        metadata: &AvailableMetadata,
        now_ms: i64,
    ) -> Result<()> {
        self.prefs.remove(&key(app, CREATED_SUFFIX))?;
        self.prefs
            .put_string(&key(app, PLATFORM_SUFFIX), platform.as_str())?;
        self.prefs
            .put_string(&key(app, URL_SUFFIX), metadata.download_url().as_str())?;
        self.prefs.put_string(
            &key(app, RELEASE_ID_SUFFIX),
            &metadata.release_id().value_as_string(),
        )?;
        match &metadata.file_sha256 {
            Some(hash) => self.prefs.put_string(&key(app, SHA256_SUFFIX), hash)?,
            None => self.prefs.remove(&key(app, SHA256_SUFFIX))?,
        }
        match metadata.file_size.and_then(|size| i64::try_from(size).ok()) {
            Some(size) => self.prefs.put_i64(&key(app, SIZE_SUFFIX), size)?,
            None => self.prefs.remove(&key(app, SIZE_SUFFIX))?,
        }
        match &metadata.published_at {
            Some(published_at) => self
                .prefs
                .put_string(&key(app, PUBLISHED_SUFFIX), &published_at.to_rfc3339())?,
            None => self.prefs.remove(&key(app, PUBLISHED_SUFFIX))?,
        }
        // Written last so a half-written entry is never considered fresh.
        self.prefs.put_i64(&key(app, CREATED_SUFFIX), now_ms)
    }

    pub fn invalidate(&self, app: App) -> Result<()> {
        for suffix in ALL_SUFFIXES {
            self.prefs.remove(&key(app, suffix))?;
        }
        Ok(())
    }
}
