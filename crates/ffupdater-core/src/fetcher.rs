use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::UpdaterConfig;
use crate::error::{Result, UpdaterError};

/// Abstraction over the HTTPS requests the upstream clients make.
#[async_trait]
pub trait ApiConsumer: Send + Sync {
    /// Fetch the body of `url`. Non-success statuses are errors.
    async fn fetch_bytes(&self, url: &Url) -> Result<Bytes>;

    /// Check with a HEAD request whether `url` answers with a 2xx status.
    async fn is_available(&self, url: &Url) -> Result<bool>;
}

/// Fetch `url` and decode the body as JSON.
pub async fn consume_json<T, A>(api: &A, url: &Url) -> Result<T>
where
    T: DeserializeOwned,
    A: ApiConsumer + ?Sized,
{
    let bytes = api.fetch_bytes(url).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Reject anything that is not https.
pub fn ensure_https(url: &Url) -> Result<()> {
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(UpdaterError::InsecureUrl(url.to_string()))
    }
}

/// Parse `raw` and make sure it is an https URL.
pub fn parse_https_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|err| UpdaterError::InvalidUrl {
        url: raw.to_string(),
        reason: err.to_string(),
    })?;
    ensure_https(&url)?;
    Ok(url)
}

/// Builder for [`HttpApiConsumer`].
#[derive(Default)]
pub struct HttpApiConsumerBuilder {
    client: Option<Client>,
    request_timeout: Option<Duration>,
    probe_timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl HttpApiConsumerBuilder {
    /// Provide a custom reqwest client instance.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Timeout of the HEAD requests used for availability probes.
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Apply the network settings of `config`.
    pub fn config(self, config: &UpdaterConfig) -> Self {
        self.request_timeout(config.request_timeout())
            .probe_timeout(config.probe_timeout())
            .user_agent(config.user_agent.clone())
    }

    /// Build the client.
    pub fn build(self) -> Result<HttpApiConsumer> {
        let request_timeout = self.request_timeout.unwrap_or(Duration::from_secs(10));
        let probe_timeout = self.probe_timeout.unwrap_or(Duration::from_secs(5));
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .https_only(true)
                .timeout(request_timeout)
                .user_agent(
                    self.user_agent
                        .unwrap_or_else(|| concat!("ffupdater/", env!("CARGO_PKG_VERSION")).into()),
                )
                .build()?,
        };

        Ok(HttpApiConsumer {
            client,
            probe_timeout,
        })
    }
}

/// reqwest backed [`ApiConsumer`].
#[derive(Clone)]
pub struct HttpApiConsumer {
    client: Client,
    probe_timeout: Duration,
}

impl HttpApiConsumer {
    /// Create a new builder.
    pub fn builder() -> HttpApiConsumerBuilder {
        HttpApiConsumerBuilder::default()
    }
}

#[async_trait]
impl ApiConsumer for HttpApiConsumer {
    async fn fetch_bytes(&self, url: &Url) -> Result<Bytes> {
        ensure_https(url)?;
        debug!(%url, "GET");
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpdaterError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?)
    }

    async fn is_available(&self, url: &Url) -> Result<bool> {
        ensure_https(url)?;
        debug!(%url, "HEAD");
        let response = self
            .client
            .head(url.clone())
            .timeout(self.probe_timeout)
            .send()
            .await?;
        Ok(response.status().is_success())
    }
}
