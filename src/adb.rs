//! Device access through the `adb` command line tool.

use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use ffupdater_core::{InstallBackend, PackageInfo, PackageManager, UpdaterError};
use tracing::{debug, warn};

/// One device reachable through adb.
#[derive(Debug, Clone, Default)]
pub struct AdbDevice {
    serial: Option<String>,
}

impl AdbDevice {
    pub fn new(serial: Option<String>) -> Self {
        Self { serial }
    }

    fn command(&self) -> Command {
        let mut command = Command::new("adb");
        if let Some(serial) = &self.serial {
            command.args(["-s", serial]);
        }
        command
    }

    fn async_command(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new("adb");
        if let Some(serial) = &self.serial {
            command.args(["-s", serial]);
        }
        command
    }

    fn shell(&self, args: &[&str]) -> Result<String> {
        let output = self
            .command()
            .arg("shell")
            .args(args)
            .output()
            .context("failed to run adb")?;
        if !output.status.success() {
            bail!(
                "adb shell {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// ABIs in preference order, as reported by the device.
    pub fn abis(&self) -> Result<Vec<String>> {
        let list = self.shell(&["getprop", "ro.product.cpu.abilist"])?;
        Ok(list
            .trim()
            .split(',')
            .map(str::trim)
            .filter(|abi| !abi.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub fn api_level(&self) -> Result<u32> {
        let sdk = self.shell(&["getprop", "ro.build.version.sdk"])?;
        sdk.trim()
            .parse()
            .with_context(|| format!("unexpected sdk level '{}'", sdk.trim()))
    }

    fn version_name(&self, package_name: &str) -> Result<Option<String>> {
        let dump = self.shell(&["dumpsys", "package", package_name])?;
        Ok(dump
            .lines()
            .find_map(|line| line.trim().strip_prefix("versionName="))
            .map(str::to_string))
    }

    /// Signing certificate of an installed package, read from its base APK.
    fn signing_certificate(&self, package_name: &str) -> Result<Vec<u8>> {
        let paths = self.shell(&["pm", "path", package_name])?;
        let remote = paths
            .lines()
            .filter_map(|line| line.trim().strip_prefix("package:"))
            .find(|path| path.ends_with("base.apk"))
            .or_else(|| paths.lines().find_map(|line| line.trim().strip_prefix("package:")))
            .with_context(|| format!("no apk path for {package_name}"))?;

        let dir = tempfile::tempdir()?;
        let local = dir.path().join("base.apk");
        let status = self
            .command()
            .arg("pull")
            .arg(remote)
            .arg(&local)
            .output()
            .context("failed to run adb pull")?
            .status;
        if !status.success() {
            bail!("adb pull {remote} failed");
        }
        let apk = std::fs::read(&local)?;
        Ok(ffupdater_core::signing_certificate(&apk)?)
    }
}

impl PackageManager for AdbDevice {
    fn package_info(&self, package_name: &str) -> Option<PackageInfo> {
        let version_name = match self.version_name(package_name) {
            Ok(Some(version_name)) => version_name,
            Ok(None) => return None,
            Err(err) => {
                warn!(package_name, error = %err, "could not query package");
                return None;
            }
        };
        let signing_certificates = match self.signing_certificate(package_name) {
            Ok(certificate) => vec![certificate],
            Err(err) => {
                debug!(package_name, error = %err, "signing certificate unavailable");
                Vec::new()
            }
        };
        Some(PackageInfo {
            version_name,
            signing_certificates,
        })
    }
}

fn install_error(err: impl std::fmt::Display) -> UpdaterError {
    UpdaterError::Install(err.to_string())
}

#[async_trait]
impl InstallBackend for AdbDevice {
    async fn install_session(&self, package_name: &str, apk: &Path) -> ffupdater_core::Result<()> {
        debug!(package_name, apk = %apk.display(), "adb install");
        let output = self
            .async_command()
            .args(["install", "-r"])
            .arg(apk)
            .output()
            .await
            .map_err(install_error)?;
        if !output.status.success() {
            return Err(install_error(String::from_utf8_lossy(&output.stderr).trim()));
        }
        Ok(())
    }

    async fn install_intent(&self, package_name: &str, apk: &Path) -> ffupdater_core::Result<()> {
        let remote = format!("/data/local/tmp/{package_name}.apk");
        let pushed = self
            .async_command()
            .arg("push")
            .arg(apk)
            .arg(&remote)
            .status()
            .await
            .map_err(install_error)?;
        if !pushed.success() {
            return Err(install_error(format!("adb push to {remote} failed")));
        }

        let started = self
            .async_command()
            .args([
                "shell",
                "am",
                "start",
                "-a",
                "android.intent.action.VIEW",
                "-t",
                "application/vnd.android.package-archive",
                "-d",
            ])
            .arg(format!("file://{remote}"))
            .status()
            .await
            .map_err(install_error)?;
        if !started.success() {
            return Err(install_error("could not open the package installer"));
        }
        Ok(())
    }
}
