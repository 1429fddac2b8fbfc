//! In-memory stand-ins for the network, shared by the unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;

use crate::error::{Result, UpdaterError};
use crate::fetcher::ApiConsumer;

enum Response {
    Body(Bytes),
    Status(u16),
}

/// [`ApiConsumer`] answering from a fixed URL table; unknown URLs are 404.
#[derive(Default)]
pub struct MockApi {
    responses: HashMap<String, Response>,
    available: HashMap<String, bool>,
    delay: Option<Duration>,
    requests: Mutex<Vec<String>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn json(self, url: &str, value: serde_json::Value) -> Self {
        let body = serde_json::to_vec(&value).unwrap();
        self.body(url, body)
    }

    pub fn body(mut self, url: &str, body: impl Into<Bytes>) -> Self {
        self.responses.insert(url.to_string(), Response::Body(body.into()));
        self
    }

    pub fn status(mut self, url: &str, status: u16) -> Self {
        self.responses.insert(url.to_string(), Response::Status(status));
        self
    }

    pub fn available(mut self, url: &str, available: bool) -> Self {
        self.available.insert(url.to_string(), available);
        self
    }

    /// Delay every GET, to keep fetches in flight.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.as_str() == url)
            .count()
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ApiConsumer for MockApi {
    async fn fetch_bytes(&self, url: &Url) -> Result<Bytes> {
        self.requests.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.responses.get(url.as_str()) {
            Some(Response::Body(body)) => Ok(body.clone()),
            Some(Response::Status(status)) => Err(UpdaterError::Http {
                url: url.to_string(),
                status: *status,
            }),
            None => Err(UpdaterError::Http {
                url: url.to_string(),
                status: 404,
            }),
        }
    }

    async fn is_available(&self, url: &Url) -> Result<bool> {
        self.requests.lock().unwrap().push(format!("HEAD {url}"));
        Ok(self.available.get(url.as_str()).copied().unwrap_or(false))
    }
}
