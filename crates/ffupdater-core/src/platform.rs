//! Device ABI handling.
//!
//! Android reports an ordered list of supported ABIs, most preferred first.
//! The first recognised entry decides which artefact gets downloaded.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::app::App;
use crate::error::{Result, UpdaterError};

/// Binary interface an artefact is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Platform {
    Aarch64,
    Arm,
    X86,
    X86_64,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Aarch64,
        Platform::Arm,
        Platform::X86,
        Platform::X86_64,
    ];

    /// Map an Android ABI string (`Build.SUPPORTED_ABIS`) to a platform.
    pub fn from_abi(abi: &str) -> Option<Self> {
        match abi.trim() {
            "arm64-v8a" => Some(Self::Aarch64),
            "armeabi-v7a" => Some(Self::Arm),
            "x86_64" => Some(Self::X86_64),
            "x86" => Some(Self::X86),
            _ => None,
        }
    }

    /// Canonical Android ABI name.
    pub fn abi_name(&self) -> &'static str {
        match self {
            Self::Aarch64 => "arm64-v8a",
            Self::Arm => "armeabi-v7a",
            Self::X86 => "x86",
            Self::X86_64 => "x86_64",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aarch64 => "AARCH64",
            Self::Arm => "ARM",
            Self::X86 => "X86",
            Self::X86_64 => "X86_64",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = UpdaterError;

    fn from_str(value: &str) -> Result<Self> {
        if let Some(platform) = Self::from_abi(value) {
            return Ok(platform);
        }
        Self::ALL
            .into_iter()
            .find(|platform| platform.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| UpdaterError::validation(format!("unknown platform or ABI '{value}'")))
    }
}

/// Return the platform of the first recognised ABI, falling back to ARM.
///
/// Empty and unknown entries are skipped.
pub fn resolve_best_abi<I, S>(abis: I) -> Platform
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    abis.into_iter()
        .find_map(|abi| Platform::from_abi(abi.as_ref()))
        .unwrap_or(Platform::Arm)
}

/// ABIs and API level of the device the apps get installed on.
#[derive(Debug)]
pub struct DeviceEnvironment {
    abis: Vec<String>,
    api_level: u32,
    best: OnceLock<Platform>,
}

impl DeviceEnvironment {
    /// Describe a device by its reported ABI list (most preferred first) and API level.
    pub fn new<I, S>(abis: I, api_level: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            abis: abis.into_iter().map(Into::into).collect(),
            api_level,
            best: OnceLock::new(),
        }
    }

    /// Derive the ABI list from the architecture this process runs on.
    pub fn detect(api_level: u32) -> Self {
        let abis: &[&str] = match std::env::consts::ARCH {
            "aarch64" => &["arm64-v8a", "armeabi-v7a"],
            "arm" => &["armeabi-v7a"],
            "x86_64" => &["x86_64", "x86"],
            "x86" => &["x86"],
            _ => &[],
        };
        Self::new(abis.iter().copied(), api_level)
    }

    pub fn abis(&self) -> &[String] {
        &self.abis
    }

    pub fn api_level(&self) -> u32 {
        self.api_level
    }

    /// Recognised platforms in device preference order.
    pub fn platforms(&self) -> Vec<Platform> {
        self.abis
            .iter()
            .filter_map(|abi| Platform::from_abi(abi))
            .collect()
    }

    /// Best suited platform; resolved once and memoized.
    pub fn best_platform(&self) -> Platform {
        *self.best.get_or_init(|| resolve_best_abi(&self.abis))
    }

    /// Platform to fetch for `app`, honouring the app's ABI constraints.
    pub fn platform_for(&self, app: App) -> Result<Platform> {
        let spec = app.spec();
        if spec.api_level_too_low(self.api_level) {
            return Err(UpdaterError::UnsupportedDevice {
                app,
                reason: format!(
                    "requires API level {} but device has {}",
                    spec.min_api_level, self.api_level
                ),
            });
        }

        let best = self.best_platform();
        let Some(supported) = spec.supported_abis else {
            return Ok(best);
        };
        if supported.contains(&best) {
            return Ok(best);
        }
        self.platforms()
            .into_iter()
            .find(|platform| supported.contains(platform))
            .ok_or_else(|| UpdaterError::UnsupportedDevice {
                app,
                reason: format!("no device ABI among {supported:?}"),
            })
    }

    pub fn is_supported(&self, app: App) -> bool {
        self.platform_for(app).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_recognised_abi_wins() {
        assert_eq!(
            resolve_best_abi(["mips", "", "x86_64", "arm64-v8a"]),
            Platform::X86_64
        );
        assert_eq!(
            resolve_best_abi(["arm64-v8a", "armeabi-v7a"]),
            Platform::Aarch64
        );
        assert_eq!(resolve_best_abi(["armeabi", "x86"]), Platform::X86);
    }

    #[test]
    fn falls_back_to_arm() {
        assert_eq!(resolve_best_abi(Vec::<String>::new()), Platform::Arm);
        assert_eq!(resolve_best_abi(["mips64", "riscv64", ""]), Platform::Arm);
    }

    #[test]
    fn best_platform_is_memoized() {
        let device = DeviceEnvironment::new(["armeabi", "x86"], 30);
        assert_eq!(device.best_platform(), Platform::X86);
        assert_eq!(device.best_platform(), Platform::X86);
        assert_eq!(device.platforms(), vec![Platform::X86]);
    }

    #[test]
    fn platform_for_respects_app_constraints() {
        let device = DeviceEnvironment::new(["x86_64", "x86", "armeabi-v7a"], 30);
        assert_eq!(device.platform_for(App::FirefoxFocus).unwrap(), Platform::X86_64);
        // Firefox Lite only ships ARM builds.
        assert_eq!(device.platform_for(App::FirefoxLite).unwrap(), Platform::Arm);

        let x86_only = DeviceEnvironment::new(["x86"], 30);
        let err = x86_only.platform_for(App::FirefoxLite).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn old_devices_are_rejected() {
        let device = DeviceEnvironment::new(["arm64-v8a"], 19);
        assert!(!device.is_supported(App::FirefoxRelease));
        assert!(device.is_supported(App::FennecRelease));
    }

    #[test]
    fn parses_platform_names() {
        assert_eq!("arm64-v8a".parse::<Platform>().unwrap(), Platform::Aarch64);
        assert_eq!("x86_64".parse::<Platform>().unwrap(), Platform::X86_64);
        assert_eq!("arm".parse::<Platform>().unwrap(), Platform::Arm);
        assert!("sparc".parse::<Platform>().is_err());
    }
}
