//! Clients for the places releases are published.

mod github;
mod mozilla;
mod mozilla_ci;

use std::sync::Arc;

use async_trait::async_trait;

use crate::app::{AppSpec, Source};
use crate::config::UpdaterConfig;
use crate::error::Result;
use crate::fetcher::ApiConsumer;
use crate::platform::Platform;
use crate::release::AvailableMetadata;

pub use github::{select_asset, Asset, GithubClient, Release};
pub use mozilla::{ftp_download_url, official_download_url, FtpProber, MobileVersions, ProductDetailsClient};
pub use mozilla_ci::{ChainOfTrust, MozillaCiClient};

/// One way of finding the latest release of an app.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Resolve download URL and release id for `app` on `platform`.
    async fn resolve_release(&self, app: &AppSpec, platform: Platform) -> Result<AvailableMetadata>;
}

/// Strategy table: one client per [`Source`] family.
pub struct Upstreams {
    github: GithubClient,
    ftp: FtpProber,
    mozilla_ci: MozillaCiClient,
}

impl Upstreams {
    pub fn new(api: Arc<dyn ApiConsumer>, config: &UpdaterConfig) -> Self {
        Self {
            github: GithubClient::new(api.clone())
                .paging(config.github_results_per_page, config.github_max_pages),
            ftp: FtpProber::new(api.clone()),
            mozilla_ci: MozillaCiClient::new(api),
        }
    }

    pub fn for_source(&self, source: &Source) -> &dyn ReleaseSource {
        match source {
            Source::Github(_) => &self.github,
            Source::MozillaFtp(_) => &self.ftp,
            Source::MozillaCi(_) => &self.mozilla_ci,
        }
    }

    pub async fn resolve(&self, app: &AppSpec, platform: Platform) -> Result<AvailableMetadata> {
        self.for_source(&app.source)
            .resolve_release(app, platform)
            .await
    }
}
