use std::sync::Arc;
use std::time::Duration;

use crate::app::App;
use crate::platform::Platform;
use crate::release::ReleaseIdKind;

/// Convenient result alias for updater operations.
pub type Result<T> = std::result::Result<T, UpdaterError>;

/// Errors that can occur while checking for, verifying or installing an update.
#[derive(thiserror::Error, Debug)]
pub enum UpdaterError {
    /// Connection or transport failure while talking to an upstream API.
    #[error("network request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// The upstream answered, but not with a success status.
    #[error("{url} answered with HTTP status {status}")]
    Http {
        /// Requested URL.
        url: String,
        /// Returned status code.
        status: u16,
    },
    /// A response body could not be decoded from JSON.
    #[error("response decoding failed: {0}")]
    Json(#[from] serde_json::Error),
    /// A response (or a persisted value) was decodable but did not contain what we need.
    #[error("unexpected data: {0}")]
    Parse(String),
    /// The release exists but has no artefact for the requested platform.
    #[error("release {release} has no asset for {platform}")]
    NoMatchingAsset {
        /// Tag or name of the inspected release.
        release: String,
        /// Platform that was asked for.
        platform: Platform,
    },
    /// No release with usable artefacts was found at all.
    #[error("no usable release found for {0}")]
    NoMatchingRelease(String),
    /// The device cannot run the app (API level or ABI).
    #[error("{app} is not supported on this device: {reason}")]
    UnsupportedDevice {
        /// Requested app.
        app: App,
        /// Human readable reason.
        reason: String,
    },
    /// A download or API URL did not use https.
    #[error("refusing non-https url: {0}")]
    InsecureUrl(String),
    /// A URL could not be parsed.
    #[error("invalid url {url}: {reason}")]
    InvalidUrl {
        /// Offending input.
        url: String,
        /// Parser message.
        reason: String,
    },
    /// Installed and available release ids were of different kinds.
    #[error("release id kinds differ for {app}: expected {expected}, got {actual}")]
    ReleaseIdMismatch {
        /// App whose metadata was compared.
        app: App,
        /// Kind declared by the catalog.
        expected: ReleaseIdKind,
        /// Kind that was encountered.
        actual: ReleaseIdKind,
    },
    /// The APK container or its signing block could not be parsed.
    #[error("malformed apk: {0}")]
    MalformedApk(String),
    /// The signing certificate is not a well-formed DER structure.
    #[error("malformed signing certificate: {0}")]
    MalformedCertificate(String),
    /// The signing certificate did not match the pinned fingerprint.
    #[error("signing certificate of {app} does not match the pinned fingerprint (got {actual})")]
    SignatureMismatch {
        /// App that was verified.
        app: App,
        /// Hex encoded SHA-256 of the encountered certificate.
        actual: String,
    },
    /// The downloaded artefact hash did not match the published one.
    #[error("download integrity check failed (expected {expected}, got {actual})")]
    IntegrityMismatch {
        /// Expected SHA-256 digest.
        expected: String,
        /// Actual SHA-256 digest.
        actual: String,
    },
    /// A newer download request for the same app replaced this one.
    #[error("download {id} for {app} was superseded by a newer request")]
    StaleDownload {
        /// App being downloaded.
        app: App,
        /// Identifier of the discarded download.
        id: u64,
    },
    /// The installer collaborator reported a failure.
    #[error("installation failed: {0}")]
    Install(String),
    /// Failed to perform an I/O operation.
    #[error("filesystem operation failed: {0}")]
    Io(#[from] std::io::Error),
    /// A bounded wait elapsed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The fetch was cancelled before it produced a result.
    #[error("metadata fetch was cancelled")]
    Cancelled,
    /// Failure observed through a shared fetch handle.
    #[error("{0}")]
    Fetch(Arc<UpdaterError>),
    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl UpdaterError {
    /// Helper for wrapping validation failures.
    pub fn validation(msg: impl Into<String>) -> Self {
        UpdaterError::Other(msg.into())
    }

    /// Map a failed blocking task. A panic inside the task is resumed on the
    /// caller so a fault in APK parsing or hashing is never reported as an
    /// ordinary error; an aborted task becomes [`UpdaterError::Cancelled`].
    pub(crate) fn from_join(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            std::panic::resume_unwind(err.into_panic());
        }
        UpdaterError::Cancelled
    }

    /// Helper for upstream data that does not have the expected shape.
    pub fn parse(msg: impl Into<String>) -> Self {
        UpdaterError::Parse(msg.into())
    }

    /// The underlying error, looking through shared fetch failures.
    pub fn root(&self) -> &UpdaterError {
        match self {
            UpdaterError::Fetch(inner) => inner.root(),
            other => other,
        }
    }

    /// True when the app cannot be offered on this device ("unsupported on this device").
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self.root(),
            UpdaterError::NoMatchingAsset { .. }
                | UpdaterError::NoMatchingRelease(_)
                | UpdaterError::UnsupportedDevice { .. }
        )
    }

    /// True for failures where trying again later may help ("could not check for updates").
    pub fn is_transient(&self) -> bool {
        matches!(
            self.root(),
            UpdaterError::Network(_)
                | UpdaterError::Http { .. }
                | UpdaterError::Timeout(_)
                | UpdaterError::Cancelled
        )
    }

    /// True when installation must be blocked because the artefact is untrusted.
    pub fn is_untrusted(&self) -> bool {
        matches!(
            self.root(),
            UpdaterError::SignatureMismatch { .. } | UpdaterError::IntegrityMismatch { .. }
        )
    }
}
