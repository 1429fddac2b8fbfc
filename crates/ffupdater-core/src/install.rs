//! Handing verified APKs to the operating system.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::app::App;
use crate::error::{Result, UpdaterError};

/// OS-level install primitives.
#[async_trait]
pub trait InstallBackend: Send + Sync {
    /// Stream the APK into a package-installer session and commit it.
    async fn install_session(&self, package_name: &str, apk: &Path) -> Result<()>;

    /// Open the system installer for the APK and wait for the user's decision.
    async fn install_intent(&self, package_name: &str, apk: &Path) -> Result<()>;
}

/// Installs a verified APK for an app.
#[async_trait]
pub trait Installer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn install(&self, app: App, apk: &Path) -> Result<()>;
}

fn ensure_apk_exists(apk: &Path) -> Result<()> {
    if apk.is_file() {
        Ok(())
    } else {
        Err(UpdaterError::Install(format!(
            "{} does not exist",
            apk.display()
        )))
    }
}

/// Installer using package-installer sessions.
pub struct SessionInstaller {
    backend: Arc<dyn InstallBackend>,
}

impl SessionInstaller {
    pub fn new(backend: Arc<dyn InstallBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Installer for SessionInstaller {
    fn name(&self) -> &'static str {
        "session"
    }

    async fn install(&self, app: App, apk: &Path) -> Result<()> {
        ensure_apk_exists(apk)?;
        info!(%app, apk = %apk.display(), "installing through session");
        self.backend.install_session(app.package_name(), apk).await
    }
}

/// Installer for systems without session support.
pub struct IntentInstaller {
    backend: Arc<dyn InstallBackend>,
}

impl IntentInstaller {
    pub fn new(backend: Arc<dyn InstallBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Installer for IntentInstaller {
    fn name(&self) -> &'static str {
        "intent"
    }

    async fn install(&self, app: App, apk: &Path) -> Result<()> {
        ensure_apk_exists(apk)?;
        info!(%app, apk = %apk.display(), "installing through intent");
        self.backend.install_intent(app.package_name(), apk).await
    }
}

/// Pick the install strategy once, from the platform's capabilities.
pub fn select_installer(supports_sessions: bool, backend: Arc<dyn InstallBackend>) -> Arc<dyn Installer> {
    if supports_sessions {
        Arc::new(SessionInstaller::new(backend))
    } else {
        Arc::new(IntentInstaller::new(backend))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Backend recording every request.
    #[derive(Default)]
    pub(crate) struct RecordingBackend {
        pub calls: Mutex<Vec<(&'static str, String, PathBuf)>>,
        pub fail: bool,
    }

    #[async_trait]
    impl InstallBackend for RecordingBackend {
        async fn install_session(&self, package_name: &str, apk: &Path) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(("session", package_name.to_string(), apk.to_path_buf()));
            if self.fail {
                return Err(UpdaterError::Install("session aborted".into()));
            }
            Ok(())
        }

        async fn install_intent(&self, package_name: &str, apk: &Path) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(("intent", package_name.to_string(), apk.to_path_buf()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn strategy_follows_capability() {
        let dir = tempfile::tempdir().unwrap();
        let apk = dir.path().join("focus.apk");
        std::fs::write(&apk, b"apk").unwrap();

        let backend = Arc::new(RecordingBackend::default());
        let session = select_installer(true, backend.clone());
        let intent = select_installer(false, backend.clone());
        assert_eq!(session.name(), "session");
        assert_eq!(intent.name(), "intent");

        session.install(App::FirefoxFocus, &apk).await.unwrap();
        intent.install(App::FirefoxKlar, &apk).await.unwrap();

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls[0].0, "session");
        assert_eq!(calls[0].1, "org.mozilla.focus");
        assert_eq!(calls[1].0, "intent");
        assert_eq!(calls[1].1, "org.mozilla.klar");
    }

    #[tokio::test]
    async fn missing_file_is_rejected_before_the_backend() {
        let backend = Arc::new(RecordingBackend::default());
        let installer = select_installer(true, backend.clone());
        let err = installer
            .install(App::Lockwise, Path::new("/nonexistent/lockwise.apk"))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdaterError::Install(_)));
        assert!(backend.calls.lock().unwrap().is_empty());
    }
}
