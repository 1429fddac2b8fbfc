use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::ReleaseSource;
use crate::app::{AppSpec, Channel, Source};
use crate::error::{Result, UpdaterError};
use crate::fetcher::{consume_json, parse_https_url, ApiConsumer};
use crate::platform::Platform;
use crate::release::{AvailableMetadata, ReleaseId};

const PRODUCT_DETAILS_URL: &str = "https://product-details.mozilla.org/1.0/mobile_versions.json";

/// Versions document of the Mozilla product-details service.
#[derive(Debug, Clone, Deserialize)]
pub struct MobileVersions {
    pub version: String,
    pub beta_version: String,
    pub nightly_version: String,
}

impl MobileVersions {
    /// Version of `channel`; empty values are treated as missing.
    pub fn for_channel(&self, channel: Channel) -> Result<&str> {
        let version = match channel {
            Channel::Release => &self.version,
            Channel::Beta => &self.beta_version,
            Channel::Nightly => &self.nightly_version,
        };
        let version = version.trim();
        if version.is_empty() {
            return Err(UpdaterError::parse(format!(
                "product-details has no {} version",
                channel.as_str()
            )));
        }
        Ok(version)
    }
}

pub struct ProductDetailsClient {
    api: Arc<dyn ApiConsumer>,
}

impl ProductDetailsClient {
    pub fn new(api: Arc<dyn ApiConsumer>) -> Self {
        Self { api }
    }

    pub async fn mobile_versions(&self) -> Result<MobileVersions> {
        let url = parse_https_url(PRODUCT_DETAILS_URL)?;
        consume_json(self.api.as_ref(), &url).await
    }

    pub async fn version(&self, channel: Channel) -> Result<String> {
        let versions = self.mobile_versions().await?;
        versions.for_channel(channel).map(str::to_string)
    }
}

fn ftp_folder_and_suffix(platform: Platform) -> (&'static str, &'static str) {
    match platform {
        Platform::Aarch64 => ("aarch64", "aarch64"),
        Platform::Arm => ("api-16", "arm"),
        Platform::X86 => ("x86", "i386"),
        Platform::X86_64 => ("x86_64", "x86_64"),
    }
}

/// Archive URL of a Fennec build. Nightlies live in a folder named after the ESR major version.
pub fn ftp_download_url(channel: Channel, version: &str, platform: Platform) -> Result<Url> {
    let (folder, suffix) = ftp_folder_and_suffix(platform);
    let raw = match channel {
        Channel::Release | Channel::Beta => format!(
            "https://ftp.mozilla.org/pub/mobile/releases/{version}/android-{folder}/multi/fennec-{version}.multi.android-{suffix}.apk"
        ),
        Channel::Nightly => {
            let esr = version.split('.').next().unwrap_or(version);
            format!(
                "https://ftp.mozilla.org/pub/mobile/nightly/latest-mozilla-esr{esr}-android-{folder}/fennec-{version}.multi.android-{suffix}.apk"
            )
        }
    };
    parse_https_url(&raw)
}

/// Redirector URL that always points at the newest build of `channel`.
pub fn official_download_url(channel: Channel, platform: Platform) -> Result<Url> {
    let product = match channel {
        Channel::Release => "fennec-latest",
        Channel::Beta => "fennec-beta-latest",
        Channel::Nightly => "fennec-nightly-latest",
    };
    let os = match platform {
        Platform::Aarch64 | Platform::Arm => "android",
        Platform::X86 | Platform::X86_64 => "android-x86",
    };
    parse_https_url(&format!(
        "https://download.mozilla.org/?product={product}&os={os}&lang=multi"
    ))
}

/// Resolves Fennec releases: version from product-details, APK from the FTP
/// archive if it answers, otherwise the official redirector.
pub struct FtpProber {
    api: Arc<dyn ApiConsumer>,
    product_details: ProductDetailsClient,
}

impl FtpProber {
    pub fn new(api: Arc<dyn ApiConsumer>) -> Self {
        Self {
            product_details: ProductDetailsClient::new(api.clone()),
            api,
        }
    }

    async fn probe(&self, url: &Url) -> bool {
        match self.api.is_available(url).await {
            Ok(available) => available,
            Err(err) => {
                warn!(%url, error = %err, "availability probe failed");
                false
            }
        }
    }

    pub async fn resolve(&self, channel: Channel, platform: Platform) -> Result<AvailableMetadata> {
        let version = self.product_details.version(channel).await?;
        let ftp_url = ftp_download_url(channel, &version, platform)?;

        let download_url = if self.probe(&ftp_url).await {
            ftp_url
        } else {
            debug!(%ftp_url, "archive url unavailable, using official redirector");
            official_download_url(channel, platform)?
        };

        info!(channel = channel.as_str(), %version, %download_url, "resolved fennec release");
        AvailableMetadata::new(download_url, ReleaseId::Version(version))
    }
}

#[async_trait]
impl ReleaseSource for FtpProber {
    async fn resolve_release(&self, app: &AppSpec, platform: Platform) -> Result<AvailableMetadata> {
        let Source::MozillaFtp(channel) = app.source else {
            return Err(UpdaterError::validation(format!(
                "{} is not published on the Mozilla archive",
                app.app
            )));
        };
        self.resolve(channel, platform).await
    }
}
