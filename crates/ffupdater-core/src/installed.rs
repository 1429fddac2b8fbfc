//! What is installed on the device, and which release it came from.

use std::sync::Arc;

use tracing::debug;

use crate::app::App;
use crate::error::{Result, UpdaterError};
use crate::prefs::PreferenceStore;
use crate::release::{InstalledMetadata, ReleaseId, ReleaseIdKind};

/// Package as reported by the device's package database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub version_name: String,
    /// DER encoded signing certificates, signer first.
    pub signing_certificates: Vec<Vec<u8>>,
}

/// Read access to the device's package database.
pub trait PackageManager: Send + Sync {
    fn package_info(&self, package_name: &str) -> Option<PackageInfo>;
}

fn timestamp_key(app: App) -> String {
    format!("device_app_register_{}_version_name", app.id())
}

/// Builds [`InstalledMetadata`] from the package manager and persisted release ids.
#[derive(Clone)]
pub struct InstalledMetadataRegister {
    packages: Arc<dyn PackageManager>,
    prefs: Arc<dyn PreferenceStore>,
}

impl InstalledMetadataRegister {
    pub fn new(packages: Arc<dyn PackageManager>, prefs: Arc<dyn PreferenceStore>) -> Self {
        Self { packages, prefs }
    }

    pub fn package_manager(&self) -> &dyn PackageManager {
        self.packages.as_ref()
    }

    /// Installed metadata of `app`.
    ///
    /// `None` when the app is not installed, or when it is a timestamp app whose
    /// release has never been recorded by [`save_release_id`](Self::save_release_id).
    pub fn get_metadata(&self, app: App) -> Result<Option<InstalledMetadata>> {
        let Some(info) = self.packages.package_info(app.package_name()) else {
            return Ok(None);
        };

        let release_id = match app.release_id_kind() {
            ReleaseIdKind::Version => ReleaseId::Version(info.version_name.clone()),
            ReleaseIdKind::Timestamp => match self.prefs.get_string(&timestamp_key(app)) {
                Some(stored) => ReleaseId::parse(ReleaseIdKind::Timestamp, &stored)?,
                None => {
                    debug!(%app, "installed, but no release timestamp recorded");
                    return Ok(None);
                }
            },
        };
        Ok(Some(InstalledMetadata::new(info.version_name, release_id)))
    }

    /// Remember the release that was just installed. Versions are never stored.
    pub fn save_release_id(&self, app: App, release_id: &ReleaseId) -> Result<()> {
        if release_id.kind() != app.release_id_kind() {
            return Err(UpdaterError::ReleaseIdMismatch {
                app,
                expected: app.release_id_kind(),
                actual: release_id.kind(),
            });
        }
        match release_id {
            ReleaseId::Timestamp(_) => self
                .prefs
                .put_string(&timestamp_key(app), &release_id.value_as_string()),
            ReleaseId::Version(_) => Ok(()),
        }
    }

    pub fn is_installed(&self, app: App) -> bool {
        self.packages.package_info(app.package_name()).is_some()
    }

    pub fn installed_apps(&self) -> Vec<App> {
        App::all().filter(|app| self.is_installed(*app)).collect()
    }

    pub fn not_installed_apps(&self) -> Vec<App> {
        App::all().filter(|app| !self.is_installed(*app)).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::prefs::MemoryPreferences;
    use std::collections::HashMap;

    /// Package database backed by a map.
    #[derive(Default)]
    pub(crate) struct FakePackages(pub HashMap<String, PackageInfo>);

    impl FakePackages {
        pub(crate) fn with(mut self, package: &str, version: &str) -> Self {
            self.0.insert(
                package.to_string(),
                PackageInfo {
                    version_name: version.to_string(),
                    signing_certificates: vec![b"cert".to_vec()],
                },
            );
            self
        }
    }

    impl PackageManager for FakePackages {
        fn package_info(&self, package_name: &str) -> Option<PackageInfo> {
            self.0.get(package_name).cloned()
        }
    }

    fn register(packages: FakePackages) -> (Arc<MemoryPreferences>, InstalledMetadataRegister) {
        let prefs = Arc::new(MemoryPreferences::new());
        (
            prefs.clone(),
            InstalledMetadataRegister::new(Arc::new(packages), prefs),
        )
    }

    #[test]
    fn version_apps_use_the_version_name() {
        let (_, register) = register(FakePackages::default().with("org.mozilla.focus", "8.13.1"));

        let metadata = register.get_metadata(App::FirefoxFocus).unwrap().unwrap();
        assert_eq!(metadata.version_name, "8.13.1");
        assert_eq!(metadata.release_id, ReleaseId::Version("8.13.1".into()));
        assert_eq!(register.get_metadata(App::FirefoxKlar).unwrap(), None);
    }

    #[test]
    fn timestamp_apps_need_a_recorded_release() {
        let (prefs, register) = register(FakePackages::default().with("org.mozilla.fenix", "87.0a1"));
        assert_eq!(register.get_metadata(App::FirefoxNightly).unwrap(), None);

        let created = ReleaseId::parse(ReleaseIdKind::Timestamp, "2021-02-03T04:05:06+01:00").unwrap();
        register.save_release_id(App::FirefoxNightly, &created).unwrap();
        assert_eq!(
            prefs.get_string("device_app_register_FIREFOX_NIGHTLY_version_name").as_deref(),
            Some("2021-02-03T04:05:06+01:00")
        );

        let metadata = register.get_metadata(App::FirefoxNightly).unwrap().unwrap();
        assert_eq!(metadata.version_name, "87.0a1");
        assert_eq!(metadata.release_id, created);
    }

    #[test]
    fn versions_are_not_persisted_and_kinds_are_checked() {
        let (prefs, register) = register(FakePackages::default());
        register
            .save_release_id(App::Lockwise, &ReleaseId::Version("4.0.3".into()))
            .unwrap();
        assert_eq!(prefs.get_string("device_app_register_LOCKWISE_version_name"), None);

        let err = register
            .save_release_id(App::FirefoxBeta, &ReleaseId::Version("86.0".into()))
            .unwrap_err();
        assert!(matches!(err, UpdaterError::ReleaseIdMismatch { .. }));
    }

    #[test]
    fn corrupt_timestamp_is_an_error() {
        let (prefs, register) = register(FakePackages::default().with("org.mozilla.fenix", "87.0a1"));
        prefs
            .put_string("device_app_register_FIREFOX_NIGHTLY_version_name", "87.0a1")
            .unwrap();
        assert!(register.get_metadata(App::FirefoxNightly).is_err());
    }

    #[test]
    fn partitions_the_catalog() {
        let (_, register) = register(
            FakePackages::default()
                .with("org.mozilla.firefox", "68.11.0")
                .with("mozilla.lockbox", "4.0.3"),
        );
        assert_eq!(
            register.installed_apps(),
            vec![App::FennecRelease, App::FirefoxRelease, App::Lockwise]
        );
        assert_eq!(register.not_installed_apps().len(), 7);
        assert!(!register.is_installed(App::FirefoxNightly));
    }
}
