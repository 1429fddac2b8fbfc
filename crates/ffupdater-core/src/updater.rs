use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tempfile::{NamedTempFile, PathPersistError};
use tokio::task;
use tracing::{debug, info};

use crate::app::App;
use crate::cache::MetadataCache;
use crate::error::{Result, UpdaterError};
use crate::fetcher::{ensure_https, ApiConsumer};
use crate::install::Installer;
use crate::installed::InstalledMetadataRegister;
use crate::release::{AvailableMetadata, ReleaseId};
use crate::signature::{FingerprintResult, SignatureVerifier};

/// Downloads, verifies and installs app releases.
pub struct AppUpdater {
    api: Arc<dyn ApiConsumer>,
    register: InstalledMetadataRegister,
    installer: Arc<dyn Installer>,
    verifier: SignatureVerifier,
    cache: Option<MetadataCache>,
    download_dir: PathBuf,
    next_download: AtomicU64,
    latest: Mutex<HashMap<App, u64>>,
}

impl AppUpdater {
    pub fn new(
        api: Arc<dyn ApiConsumer>,
        register: InstalledMetadataRegister,
        installer: Arc<dyn Installer>,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            api,
            register,
            installer,
            verifier: SignatureVerifier::new(),
            cache: None,
            download_dir: download_dir.into(),
            next_download: AtomicU64::new(1),
            latest: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_verifier(mut self, verifier: SignatureVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    /// Invalidate `cache` for an app once it was installed.
    pub fn with_cache(mut self, cache: MetadataCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn register(&self) -> &InstalledMetadataRegister {
        &self.register
    }

    /// Allocate the id of a new download of `app`, superseding earlier ones.
    pub fn begin_download(&self, app: App) -> u64 {
        let id = self.next_download.fetch_add(1, Ordering::SeqCst);
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(app, id);
        id
    }

    pub fn is_current(&self, app: App, id: u64) -> bool {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&app)
            == Some(&id)
    }

    fn ensure_current(&self, app: App, id: u64) -> Result<()> {
        if self.is_current(app, id) {
            Ok(())
        } else {
            debug!(%app, id, "discarding superseded download");
            Err(UpdaterError::StaleDownload { app, id })
        }
    }

    /// Download the release described by `metadata`, verify it and install it.
    pub async fn download_and_install(
        &self,
        app: App,
        metadata: &AvailableMetadata,
    ) -> Result<InstallOutcome> {
        let url = metadata.download_url();
        ensure_https(url)?;
        let download_id = self.begin_download(app);
        info!(%app, download_id, %url, "downloading");

        let bytes = self.api.fetch_bytes(url).await?;
        self.ensure_current(app, download_id)?;
        check_integrity(metadata, &bytes)?;

        let verifier = self.verifier.clone();
        let apk = bytes.clone();
        let fingerprint = task::spawn_blocking(move || verifier.verify_apk(app, &apk))
            .await
            .map_err(UpdaterError::from_join)??;
        let fingerprint = match fingerprint {
            FingerprintResult::Valid(hex) => hex,
            FingerprintResult::Invalid(hex) => {
                return Err(UpdaterError::SignatureMismatch { app, actual: hex })
            }
            FingerprintResult::AppNotInstalled => {
                return Err(UpdaterError::validation("downloaded apk has no signer"))
            }
        };

        let target = self
            .download_dir
            .join(format!("{}.apk", app.id().to_ascii_lowercase()));
        let apk_path = target.clone();
        task::spawn_blocking(move || persist_apk(&bytes, &target))
            .await
            .map_err(UpdaterError::from_join)??;

        // A newer request may have started while we were verifying.
        self.ensure_current(app, download_id)?;
        self.installer.install(app, &apk_path).await?;

        self.register.save_release_id(app, metadata.release_id())?;
        if let Some(cache) = &self.cache {
            cache.invalidate(app)?;
        }
        info!(%app, release_id = %metadata.release_id(), installer = self.installer.name(), "installed");

        Ok(InstallOutcome {
            app,
            download_id,
            apk_path,
            release_id: metadata.release_id().clone(),
            fingerprint,
        })
    }
}

fn check_integrity(metadata: &AvailableMetadata, bytes: &Bytes) -> Result<()> {
    if let Some(size) = metadata.file_size {
        if bytes.len() as u64 != size {
            return Err(UpdaterError::IntegrityMismatch {
                expected: format!("{size} bytes"),
                actual: format!("{} bytes", bytes.len()),
            });
        }
    }
    if let Some(expected) = &metadata.file_sha256 {
        let actual = hex::encode(Sha256::digest(bytes));
        if &actual != expected {
            return Err(UpdaterError::IntegrityMismatch {
                expected: expected.clone(),
                actual,
            });
        }
    }
    Ok(())
}

/// Write the APK next to its final name and rename it into place.
fn persist_apk(bytes: &[u8], target: &Path) -> Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| UpdaterError::validation("download path must have a parent directory"))?;
    if !parent.exists() {
        fs::create_dir_all(parent)?;
    }

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.as_file().sync_all()?;
    temp.into_temp_path()
        .persist(target)
        .map_err(map_persist_error)?;
    Ok(())
}

fn map_persist_error(err: PathPersistError) -> UpdaterError {
    UpdaterError::Io(err.error)
}

/// Result of a successful installation.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub app: App,
    pub download_id: u64,
    /// Where the verified APK was stored.
    pub apk_path: PathBuf,
    pub release_id: ReleaseId,
    /// Hex SHA-256 of the signing certificate.
    pub fingerprint: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apk::tests::build_apk;
    use crate::apk::SCHEME_V2_ID;
    use crate::install::select_installer;
    use crate::install::tests::RecordingBackend;
    use crate::installed::tests::FakePackages;
    use crate::platform::Platform;
    use crate::prefs::{MemoryPreferences, PreferenceStore};
    use crate::release::ReleaseIdKind;
    use crate::signature::certificate_fingerprint;
    use crate::testing::MockApi;
    use reqwest::Url;
    use std::time::Duration;
    use tempfile::tempdir;

    const APK_URL: &str = "https://firefox-ci-tc.services.mozilla.com/target.apk";
    const CERT: &[u8] = b"\x30\x06\x02\x01\x01\x02\x01\x02";

    struct Fixture {
        updater: AppUpdater,
        backend: Arc<RecordingBackend>,
        prefs: Arc<MemoryPreferences>,
        _dir: tempfile::TempDir,
    }

    fn fixture(api: MockApi, pin: [u8; 32]) -> Fixture {
        let dir = tempdir().unwrap();
        let prefs = Arc::new(MemoryPreferences::new());
        let register = InstalledMetadataRegister::new(Arc::new(FakePackages::default()), prefs.clone());
        let backend = Arc::new(RecordingBackend::default());
        let updater = AppUpdater::new(
            Arc::new(api),
            register,
            select_installer(true, backend.clone()),
            dir.path().join("downloads"),
        )
        .with_verifier(SignatureVerifier::new().with_pin(App::FirefoxNightly, pin))
        .with_cache(MetadataCache::new(prefs.clone(), Duration::from_secs(600)));
        Fixture {
            updater,
            backend,
            prefs,
            _dir: dir,
        }
    }

    fn metadata(apk: &[u8]) -> AvailableMetadata {
        AvailableMetadata::new(
            Url::parse(APK_URL).unwrap(),
            ReleaseId::parse(ReleaseIdKind::Timestamp, "2021-02-03T04:05:06Z").unwrap(),
        )
        .unwrap()
        .with_file_sha256(Some(hex::encode(Sha256::digest(apk))))
    }

    #[tokio::test]
    async fn verified_download_is_installed_and_recorded() {
        let apk = build_apk(SCHEME_V2_ID, CERT);
        let fixture = fixture(
            MockApi::new().body(APK_URL, apk.clone()),
            certificate_fingerprint(CERT),
        );
        let metadata = metadata(&apk);
        MetadataCache::new(fixture.prefs.clone(), Duration::from_secs(600))
            .put(App::FirefoxNightly, Platform::Aarch64, &metadata)
            .unwrap();

        let outcome = fixture
            .updater
            .download_and_install(App::FirefoxNightly, &metadata)
            .await
            .unwrap();

        assert_eq!(fs::read(&outcome.apk_path).unwrap(), apk);
        assert_eq!(outcome.fingerprint, hex::encode(certificate_fingerprint(CERT)));
        assert_eq!(fixture.backend.calls.lock().unwrap()[0].1, "org.mozilla.fenix");
        assert_eq!(
            fixture
                .prefs
                .get_string("device_app_register_FIREFOX_NIGHTLY_version_name")
                .as_deref(),
            Some("2021-02-03T04:05:06Z")
        );
        assert_eq!(
            fixture.prefs.get_i64("download_metadata_FIREFOX_NIGHTLY_created_epoch_ms"),
            None
        );
    }

    #[tokio::test]
    async fn signature_mismatch_blocks_installation() {
        let apk = build_apk(SCHEME_V2_ID, CERT);
        let fixture = fixture(MockApi::new().body(APK_URL, apk.clone()), [0u8; 32]);

        let err = fixture
            .updater
            .download_and_install(App::FirefoxNightly, &metadata(&apk))
            .await
            .unwrap_err();
        assert!(err.is_untrusted());
        assert!(matches!(err, UpdaterError::SignatureMismatch { .. }));
        assert!(fixture.backend.calls.lock().unwrap().is_empty());
        assert_eq!(
            fixture.prefs.get_string("device_app_register_FIREFOX_NIGHTLY_version_name"),
            None
        );
    }

    #[tokio::test]
    async fn corrupted_download_is_rejected() {
        let apk = build_apk(SCHEME_V2_ID, CERT);
        let mut corrupted = apk.clone();
        corrupted[0] = b'X';
        let fixture = fixture(
            MockApi::new().body(APK_URL, corrupted),
            certificate_fingerprint(CERT),
        );

        let err = fixture
            .updater
            .download_and_install(App::FirefoxNightly, &metadata(&apk))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdaterError::IntegrityMismatch { .. }));
        assert!(fixture.backend.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn superseded_download_is_discarded() {
        let apk = build_apk(SCHEME_V2_ID, CERT);
        let fixture = fixture(
            MockApi::new()
                .body(APK_URL, apk.clone())
                .delay(Duration::from_millis(50)),
            certificate_fingerprint(CERT),
        );
        let metadata = metadata(&apk);

        let (first, second) = tokio::join!(
            fixture.updater.download_and_install(App::FirefoxNightly, &metadata),
            fixture.updater.download_and_install(App::FirefoxNightly, &metadata),
        );
        assert!(matches!(
            first,
            Err(UpdaterError::StaleDownload { app: App::FirefoxNightly, .. })
        ));
        let second = second.unwrap();
        assert!(fixture.updater.is_current(App::FirefoxNightly, second.download_id));
        assert_eq!(fixture.backend.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_install_records_nothing() {
        let apk = build_apk(SCHEME_V2_ID, CERT);
        let dir = tempdir().unwrap();
        let prefs = Arc::new(MemoryPreferences::new());
        let backend = Arc::new(RecordingBackend {
            fail: true,
            ..RecordingBackend::default()
        });
        let updater = AppUpdater::new(
            Arc::new(MockApi::new().body(APK_URL, apk.clone())),
            InstalledMetadataRegister::new(Arc::new(FakePackages::default()), prefs.clone()),
            select_installer(true, backend.clone()),
            dir.path(),
        )
        .with_verifier(
            SignatureVerifier::new().with_pin(App::FirefoxNightly, certificate_fingerprint(CERT)),
        );

        let err = updater
            .download_and_install(App::FirefoxNightly, &metadata(&apk))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdaterError::Install(_)));
        assert_eq!(backend.calls.lock().unwrap().len(), 1);
        assert_eq!(
            prefs.get_string("device_app_register_FIREFOX_NIGHTLY_version_name"),
            None
        );
    }
}
