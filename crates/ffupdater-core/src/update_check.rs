use serde::Serialize;

use crate::app::App;
use crate::error::{Result, UpdaterError};
use crate::release::{AvailableMetadata, InstalledMetadata, ReleaseId};

/// Whether `available` is a different release than `installed`.
///
/// Any difference counts, so an older build offered upstream is also reported
/// as an update. Versions compare as exact strings, timestamps by instant.
pub fn is_update_available(
    app: App,
    installed: &InstalledMetadata,
    available: &AvailableMetadata,
) -> Result<bool> {
    let expected = app.release_id_kind();
    for actual in [installed.release_id.kind(), available.release_id().kind()] {
        if actual != expected {
            return Err(UpdaterError::ReleaseIdMismatch {
                app,
                expected,
                actual,
            });
        }
    }

    Ok(match (&installed.release_id, available.release_id()) {
        (ReleaseId::Version(installed), ReleaseId::Version(available)) => installed != available,
        (ReleaseId::Timestamp(installed), ReleaseId::Timestamp(available)) => installed != available,
        // Both kinds were checked against the catalog above.
        _ => unreachable!("release id kinds of {app} were checked above"),
    })
}

/// Outcome of checking one app, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateStatus {
    NotInstalled { available: String },
    UpToDate { installed: String },
    UpdateAvailable { installed: String, available: String },
    /// Installed, but the installed release is unknown (no recorded timestamp).
    Unknown { available: String },
}

impl UpdateStatus {
    /// Classify `app` given what the register and the fetcher reported.
    pub fn evaluate(
        app: App,
        installed: Option<&InstalledMetadata>,
        is_installed: bool,
        available: &AvailableMetadata,
    ) -> Result<Self> {
        let available_id = available.release_id().value_as_string();
        Ok(match installed {
            Some(installed) if is_update_available(app, installed, available)? => {
                UpdateStatus::UpdateAvailable {
                    installed: installed.release_id.value_as_string(),
                    available: available_id,
                }
            }
            Some(installed) => UpdateStatus::UpToDate {
                installed: installed.release_id.value_as_string(),
            },
            None if is_installed => UpdateStatus::Unknown {
                available: available_id,
            },
            None => UpdateStatus::NotInstalled {
                available: available_id,
            },
        })
    }

    pub fn needs_install(&self) -> bool {
        !matches!(self, UpdateStatus::UpToDate { .. })
    }
}
