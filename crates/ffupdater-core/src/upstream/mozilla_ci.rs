use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::ReleaseSource;
use crate::app::{AppSpec, Channel, Source};
use crate::error::{Result, UpdaterError};
use crate::fetcher::{consume_json, parse_https_url, ApiConsumer};
use crate::platform::Platform;
use crate::release::{parse_timestamp, AvailableMetadata, ReleaseId};

const TASK_INDEX: &str = "https://firefox-ci-tc.services.mozilla.com/api/index/v1/task";

/// Chain-of-trust document published next to every signed Fenix build.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainOfTrust {
    pub task: Task,
    #[serde(default)]
    pub artifacts: HashMap<String, Artifact>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub created: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Artifact {
    #[serde(default)]
    pub sha256: Option<String>,
}

fn artifact_name(platform: Platform) -> String {
    format!("public/build/{}/target.apk", platform.abi_name())
}

fn task_base(channel: Channel, platform: Platform) -> String {
    format!(
        "{TASK_INDEX}/mobile.v2.fenix.{}.latest.{}/artifacts",
        channel.as_str(),
        platform.abi_name()
    )
}

impl ChainOfTrust {
    fn created(&self) -> Result<ReleaseId> {
        let created = self
            .task
            .created
            .as_deref()
            .filter(|created| !created.trim().is_empty())
            .ok_or_else(|| UpdaterError::parse("chain-of-trust has no task.created"))?;
        parse_timestamp(created).map(ReleaseId::Timestamp)
    }

    fn sha256_of(&self, name: &str) -> Result<String> {
        self.artifacts
            .get(name)
            .and_then(|artifact| artifact.sha256.as_deref())
            .filter(|hash| !hash.is_empty())
            .map(str::to_string)
            .ok_or_else(|| UpdaterError::parse(format!("chain-of-trust has no sha256 for {name}")))
    }
}

/// Resolves Fenix builds through the Taskcluster index.
pub struct MozillaCiClient {
    api: Arc<dyn ApiConsumer>,
}

impl MozillaCiClient {
    pub fn new(api: Arc<dyn ApiConsumer>) -> Self {
        Self { api }
    }

    pub async fn chain_of_trust(&self, channel: Channel, platform: Platform) -> Result<ChainOfTrust> {
        let url = parse_https_url(&format!(
            "{}/public/chain-of-trust.json",
            task_base(channel, platform)
        ))?;
        consume_json(self.api.as_ref(), &url).await
    }

    pub async fn resolve(&self, channel: Channel, platform: Platform) -> Result<AvailableMetadata> {
        let chain = self.chain_of_trust(channel, platform).await?;
        let name = artifact_name(platform);
        let release_id = chain.created()?;
        let sha256 = chain.sha256_of(&name)?;
        let download_url = parse_https_url(&format!("{}/{name}", task_base(channel, platform)))?;

        info!(channel = channel.as_str(), %release_id, %download_url, "resolved fenix build");
        let published_at = match &release_id {
            ReleaseId::Timestamp(created) => Some(*created),
            ReleaseId::Version(_) => None,
        };
        Ok(AvailableMetadata::new(download_url, release_id)?
            .with_published_at(published_at)
            .with_file_sha256(Some(sha256)))
    }
}

#[async_trait]
impl ReleaseSource for MozillaCiClient {
    async fn resolve_release(&self, app: &AppSpec, platform: Platform) -> Result<AvailableMetadata> {
        let Source::MozillaCi(channel) = app.source else {
            return Err(UpdaterError::validation(format!(
                "{} is not built by Mozilla CI",
                app.app
            )));
        };
        self.resolve(channel, platform).await
    }
}
