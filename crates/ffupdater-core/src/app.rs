//! The fixed catalog of supported apps.
//!
//! Every entry is a static [`AppSpec`] record. Behaviour that differs between
//! apps (where releases come from, how tags are parsed, which ABIs exist) is
//! data on the record, so callers look it up instead of matching on [`App`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UpdaterError};
use crate::platform::Platform;
use crate::release::ReleaseIdKind;

/// Identifier of a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum App {
    FennecRelease,
    FennecBeta,
    FennecNightly,
    FirefoxRelease,
    FirefoxBeta,
    FirefoxNightly,
    FirefoxFocus,
    FirefoxKlar,
    FirefoxLite,
    Lockwise,
}

/// Mozilla release track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Release,
    Beta,
    Nightly,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Release => "release",
            Channel::Beta => "beta",
            Channel::Nightly => "nightly",
        }
    }
}

/// How the version is embedded in a GitHub tag name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFormat {
    /// `v1.2.3` or `1.2.3`.
    StripV,
    /// `release-v1.2.3-rc`: text after the first `v` up to the next `-`.
    Embedded,
}

impl TagFormat {
    pub fn extract_version(&self, tag_name: &str) -> Result<String> {
        let version = match self {
            TagFormat::StripV => tag_name.trim().trim_start_matches('v'),
            TagFormat::Embedded => tag_name
                .split_once('v')
                .map(|(_, rest)| rest.split('-').next().unwrap_or(rest))
                .unwrap_or(""),
        };
        if version.is_empty() {
            return Err(UpdaterError::parse(format!(
                "no version in tag name '{tag_name}'"
            )));
        }
        Ok(version.to_string())
    }
}

/// GitHub repository publishing an app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GithubRepo {
    pub owner: &'static str,
    pub repo: &'static str,
    /// Token the asset name must contain, for repos that publish several apps.
    pub app_token: Option<&'static str>,
    pub tag_format: TagFormat,
    /// Whether assets are built per ABI.
    pub per_platform_assets: bool,
}

/// Where the release metadata of an app comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Github(GithubRepo),
    /// Version from product-details, APK from the FTP archive.
    MozillaFtp(Channel),
    /// Chain-of-trust document of the Fenix task index.
    MozillaCi(Channel),
}

/// Static description of one catalog entry.
#[derive(Debug)]
pub struct AppSpec {
    pub app: App,
    pub title: &'static str,
    pub description: &'static str,
    pub package_name: &'static str,
    pub min_api_level: u32,
    /// SHA-256 of the publisher's signing certificate.
    pub signature_hash: [u8; 32],
    pub release_id_kind: ReleaseIdKind,
    pub source: Source,
    /// `None` means every ABI is served.
    pub supported_abis: Option<&'static [Platform]>,
}

impl AppSpec {
    pub fn signature_hash_hex(&self) -> String {
        hex::encode(self.signature_hash)
    }

    pub(crate) fn api_level_too_low(&self, api_level: u32) -> bool {
        api_level < self.min_api_level
    }
}

const FOCUS_ANDROID: &str = "focus-android";
const API_JELLY_BEAN: u32 = 16;
const API_LOLLIPOP: u32 = 21;
const API_NOUGAT: u32 = 24;

static CATALOG: [AppSpec; 10] = [
    AppSpec {
        app: App::FennecRelease,
        title: "Firefox (Fennec) Release",
        description: "The classic Firefox for Android, downloaded from the Mozilla archive.",
        package_name: "org.mozilla.firefox",
        min_api_level: API_JELLY_BEAN,
        signature_hash: fingerprint("a78b62a5165b4494b2fead9e76a280d22d937fee6251aece599446b2ea319b04"),
        release_id_kind: ReleaseIdKind::Version,
        source: Source::MozillaFtp(Channel::Release),
        supported_abis: None,
    },
    AppSpec {
        app: App::FennecBeta,
        title: "Firefox (Fennec) Beta",
        description: "Prerelease of the classic Firefox for Android for developers and testers.",
        package_name: "org.mozilla.firefox_beta",
        min_api_level: API_JELLY_BEAN,
        signature_hash: fingerprint("a78b62a5165b4494b2fead9e76a280d22d937fee6251aece599446b2ea319b04"),
        release_id_kind: ReleaseIdKind::Version,
        source: Source::MozillaFtp(Channel::Beta),
        supported_abis: None,
    },
    AppSpec {
        app: App::FennecNightly,
        title: "Firefox (Fennec) Nightly",
        description: "Bleeding edge builds of the classic Firefox for Android.",
        package_name: "org.mozilla.fennec_aurora",
        min_api_level: API_JELLY_BEAN,
        signature_hash: fingerprint("bc0488838d06f4ca6bf32386daab0dd8ebcf3e7730787459f62fb3cd14a1baaa"),
        release_id_kind: ReleaseIdKind::Version,
        source: Source::MozillaFtp(Channel::Nightly),
        supported_abis: None,
    },
    AppSpec {
        app: App::FirefoxRelease,
        title: "Firefox Release",
        description: "The default Firefox browser from Mozilla, built by Mozilla CI.",
        package_name: "org.mozilla.firefox",
        min_api_level: API_LOLLIPOP,
        signature_hash: fingerprint("a78b62a5165b4494b2fead9e76a280d22d937fee6251aece599446b2ea319b04"),
        release_id_kind: ReleaseIdKind::Timestamp,
        source: Source::MozillaCi(Channel::Release),
        supported_abis: None,
    },
    AppSpec {
        app: App::FirefoxBeta,
        title: "Firefox Beta",
        description: "Prerelease of Firefox for developers and testers.",
        package_name: "org.mozilla.firefox_beta",
        min_api_level: API_LOLLIPOP,
        signature_hash: fingerprint("a78b62a5165b4494b2fead9e76a280d22d937fee6251aece599446b2ea319b04"),
        release_id_kind: ReleaseIdKind::Timestamp,
        source: Source::MozillaCi(Channel::Beta),
        supported_abis: None,
    },
    AppSpec {
        app: App::FirefoxNightly,
        title: "Firefox Nightly",
        description: "Nightly builds of Firefox; may contain bugs that affect daily use.",
        package_name: "org.mozilla.fenix",
        min_api_level: API_LOLLIPOP,
        signature_hash: fingerprint("5004779088e7f988d5bc5cc5f8798febf4f8cd084a1b2a46efd4c8ee4aeaf211"),
        release_id_kind: ReleaseIdKind::Timestamp,
        source: Source::MozillaCi(Channel::Nightly),
        supported_abis: None,
    },
    AppSpec {
        app: App::FirefoxFocus,
        title: "Firefox Focus",
        description: "Privacy focused browser that erases history on exit.",
        package_name: "org.mozilla.focus",
        min_api_level: API_LOLLIPOP,
        signature_hash: fingerprint("6203a473be36d64ee37f87fa500edbc79eab930610ab9b9fa4ca7d5c1f1b4ffc"),
        release_id_kind: ReleaseIdKind::Version,
        source: Source::Github(GithubRepo {
            owner: "mozilla-mobile",
            repo: FOCUS_ANDROID,
            app_token: Some("focus"),
            tag_format: TagFormat::StripV,
            per_platform_assets: true,
        }),
        supported_abis: Some(&[Platform::Aarch64, Platform::Arm, Platform::X86_64, Platform::X86]),
    },
    AppSpec {
        app: App::FirefoxKlar,
        title: "Firefox Klar",
        description: "Firefox Focus for Germany, Switzerland and Austria.",
        package_name: "org.mozilla.klar",
        min_api_level: API_LOLLIPOP,
        signature_hash: fingerprint("6203a473be36d64ee37f87fa500edbc79eab930610ab9b9fa4ca7d5c1f1b4ffc"),
        release_id_kind: ReleaseIdKind::Version,
        source: Source::Github(GithubRepo {
            owner: "mozilla-mobile",
            repo: FOCUS_ANDROID,
            app_token: Some("klar"),
            tag_format: TagFormat::StripV,
            per_platform_assets: true,
        }),
        supported_abis: Some(&[Platform::Aarch64, Platform::Arm, Platform::X86_64, Platform::X86]),
    },
    AppSpec {
        app: App::FirefoxLite,
        title: "Firefox Lite",
        description: "Small browser designed to reduce mobile data consumption.",
        package_name: "org.mozilla.rocket",
        min_api_level: API_LOLLIPOP,
        signature_hash: fingerprint("863a46f0973932b7d0199b549112741c2d2731ac72ea11b7523aa90a11bf5691"),
        release_id_kind: ReleaseIdKind::Version,
        source: Source::Github(GithubRepo {
            owner: "mozilla-tw",
            repo: "FirefoxLite",
            app_token: None,
            tag_format: TagFormat::StripV,
            per_platform_assets: false,
        }),
        supported_abis: Some(&[Platform::Aarch64, Platform::Arm]),
    },
    AppSpec {
        app: App::Lockwise,
        title: "Lockwise",
        description: "Password manager that syncs with Firefox.",
        package_name: "mozilla.lockbox",
        min_api_level: API_NOUGAT,
        signature_hash: fingerprint("64d26b507078deba2fee42d6bd0bfad41d39ffc4e791f281028e5e73d3c8d2f2"),
        release_id_kind: ReleaseIdKind::Version,
        source: Source::Github(GithubRepo {
            owner: "mozilla-lockwise",
            repo: "lockwise-android",
            app_token: None,
            tag_format: TagFormat::Embedded,
            per_platform_assets: false,
        }),
        supported_abis: None,
    },
];

impl App {
    /// Every catalog entry, in catalog order.
    pub fn all() -> impl Iterator<Item = App> {
        CATALOG.iter().map(|spec| spec.app)
    }

    pub fn spec(&self) -> &'static AppSpec {
        &CATALOG[*self as usize]
    }

    /// Stable identifier used in preference keys and on the command line.
    pub fn id(&self) -> &'static str {
        match self {
            App::FennecRelease => "FENNEC_RELEASE",
            App::FennecBeta => "FENNEC_BETA",
            App::FennecNightly => "FENNEC_NIGHTLY",
            App::FirefoxRelease => "FIREFOX_RELEASE",
            App::FirefoxBeta => "FIREFOX_BETA",
            App::FirefoxNightly => "FIREFOX_NIGHTLY",
            App::FirefoxFocus => "FIREFOX_FOCUS",
            App::FirefoxKlar => "FIREFOX_KLAR",
            App::FirefoxLite => "FIREFOX_LITE",
            App::Lockwise => "LOCKWISE",
        }
    }

    pub fn package_name(&self) -> &'static str {
        self.spec().package_name
    }

    pub fn release_id_kind(&self) -> ReleaseIdKind {
        self.spec().release_id_kind
    }
}

impl fmt::Display for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for App {
    type Err = UpdaterError;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().replace('-', "_");
        App::all()
            .find(|app| app.id().eq_ignore_ascii_case(&normalized))
            .ok_or_else(|| UpdaterError::validation(format!("unknown app '{value}'")))
    }
}

const fn fingerprint(hex: &str) -> [u8; 32] {
    let digits = hex.as_bytes();
    assert!(digits.len() == 64, "fingerprint must have 64 hex digits");
    let mut out = [0u8; 32];
    let mut i = 0;
    while i < 32 {
        out[i] = (nibble(digits[2 * i]) << 4) | nibble(digits[2 * i + 1]);
        i += 1;
    }
    out
}

const fn nibble(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        b'A'..=b'F' => digit - b'A' + 10,
        _ => panic!("invalid hex digit in fingerprint"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_indexed_by_app() {
        for (index, app) in App::all().enumerate() {
            assert_eq!(app as usize, index);
            assert_eq!(app.spec().app, app);
        }
        assert_eq!(App::all().count(), 10);
    }

    #[test]
    fn fingerprints_round_trip_to_hex() {
        assert_eq!(
            App::FirefoxKlar.spec().signature_hash_hex(),
            "6203a473be36d64ee37f87fa500edbc79eab930610ab9b9fa4ca7d5c1f1b4ffc"
        );
    }

    #[test]
    fn parses_ids() {
        assert_eq!("FIREFOX_KLAR".parse::<App>().unwrap(), App::FirefoxKlar);
        assert_eq!("firefox-focus".parse::<App>().unwrap(), App::FirefoxFocus);
        assert!("FIREFOX_ESR".parse::<App>().is_err());
    }

    #[test]
    fn tag_formats() {
        assert_eq!(TagFormat::StripV.extract_version("v8.13.1").unwrap(), "8.13.1");
        assert_eq!(TagFormat::StripV.extract_version("2.1.19").unwrap(), "2.1.19");
        assert_eq!(
            TagFormat::Embedded.extract_version("release-v4.0.3-rc2").unwrap(),
            "4.0.3"
        );
        assert!(TagFormat::Embedded.extract_version("release").is_err());
        assert!(TagFormat::StripV.extract_version("v").is_err());
    }

    #[test]
    fn every_entry_declares_a_source_matching_its_kind() {
        for app in App::all() {
            let spec = app.spec();
            let expected = match spec.source {
                Source::MozillaCi(_) => ReleaseIdKind::Timestamp,
                Source::Github(_) | Source::MozillaFtp(_) => ReleaseIdKind::Version,
            };
            assert_eq!(spec.release_id_kind, expected, "{app}");
        }
    }
}
