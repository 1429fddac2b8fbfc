//! Update checks and verified installs for the Firefox family on Android.
//!
//! The crate knows a fixed catalog of apps ([`App`]). For each of them it can
//! resolve the latest release for the device's ABI from GitHub, the Mozilla
//! archive or Mozilla CI ([`MetadataFetcher`]), compare it with what is
//! installed ([`InstalledMetadataRegister`], [`is_update_available`]) and,
//! once the user agrees, download the APK, check its signing certificate
//! against the pinned fingerprint and hand it to an installer ([`AppUpdater`]).
//!
//! ```ignore
//! use std::sync::Arc;
//! use ffupdater_core::{
//!     App, DeviceEnvironment, HttpApiConsumer, MetadataFetcher, UpdaterConfig, Upstreams,
//! };
//!
//! # async fn demo() -> ffupdater_core::Result<()> {
//! let config = UpdaterConfig::default();
//! let api = Arc::new(HttpApiConsumer::builder().config(&config).build()?);
//! let device = Arc::new(DeviceEnvironment::new(["arm64-v8a", "armeabi-v7a"], 30));
//! let fetcher = MetadataFetcher::new(Upstreams::new(api, &config), device)?;
//!
//! let metadata = fetcher.fetch(App::FirefoxFocus).wait().await?;
//! println!("{} -> {}", metadata.release_id(), metadata.download_url());
//! # Ok(())
//! # }
//! ```

mod apk;
mod app;
mod cache;
mod config;
mod error;
mod fetcher;
mod install;
mod installed;
mod metadata;
mod platform;
mod prefs;
mod release;
mod signature;
mod update_check;
mod updater;
pub mod upstream;

#[cfg(test)]
mod testing;

pub use apk::signing_certificate;
pub use app::{App, AppSpec, Channel, GithubRepo, Source, TagFormat};
pub use cache::MetadataCache;
pub use config::UpdaterConfig;
pub use error::{Result, UpdaterError};
pub use fetcher::{
    consume_json, ensure_https, parse_https_url, ApiConsumer, HttpApiConsumer,
    HttpApiConsumerBuilder,
};
pub use install::{select_installer, InstallBackend, Installer, IntentInstaller, SessionInstaller};
pub use installed::{InstalledMetadataRegister, PackageInfo, PackageManager};
pub use metadata::{FetchHandle, MetadataFetcher};
pub use platform::{resolve_best_abi, DeviceEnvironment, Platform};
pub use prefs::{FilePreferences, MemoryPreferences, PreferenceStore};
pub use release::{AvailableMetadata, InstalledMetadata, ReleaseId, ReleaseIdKind};
pub use signature::{certificate_fingerprint, FingerprintResult, SignatureVerifier};
pub use update_check::{is_update_available, UpdateStatus};
pub use updater::{AppUpdater, InstallOutcome};
pub use upstream::{ReleaseSource, Upstreams};

pub use reqwest::Url;
