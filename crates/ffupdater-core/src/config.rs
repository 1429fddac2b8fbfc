//! Configuration for the updater.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Configuration for fetching and installing updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Timeout of regular API requests and downloads, in seconds.
    pub request_timeout_secs: u64,
    /// Timeout of availability probes, in seconds.
    pub probe_timeout_secs: u64,
    /// How long fetched metadata is reused without network access, in seconds.
    pub cache_ttl_secs: u64,
    /// Page size when enumerating GitHub releases.
    pub github_results_per_page: u32,
    /// Maximum number of GitHub release pages to enumerate.
    pub github_max_pages: u32,
    /// User agent sent with every request.
    pub user_agent: String,
    /// Where preferences are stored.
    pub data_dir: PathBuf,
    /// Where downloaded APKs are kept until installation.
    pub download_dir: PathBuf,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ffupdater");
        let download_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ffupdater")
            .join("downloads");
        Self {
            request_timeout_secs: 10,
            probe_timeout_secs: 5,
            cache_ttl_secs: 10 * 60,
            github_results_per_page: 20,
            github_max_pages: 4,
            user_agent: concat!("ffupdater/", env!("CARGO_PKG_VERSION")).to_string(),
            data_dir,
            download_dir,
        }
    }
}

impl UpdaterConfig {
    /// Load the configuration from a JSON file; `None` yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = fs::read(path)?;
                Ok(serde_json::from_slice(&raw)?)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// File backing the persisted preferences.
    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join("preferences.json")
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn cache_ttl_secs(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = secs;
        self
    }

    pub fn github_paging(mut self, results_per_page: u32, max_pages: u32) -> Self {
        self.github_results_per_page = results_per_page;
        self.github_max_pages = max_pages;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_files_fall_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "cache_ttl_secs": 30, "github_max_pages": 2 }}"#).unwrap();

        let config = UpdaterConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.cache_ttl(), Duration::from_secs(30));
        assert_eq!(config.github_max_pages, 2);
        assert_eq!(config.github_results_per_page, 20);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn missing_path_means_defaults() {
        let config = UpdaterConfig::load(None).unwrap();
        assert_eq!(config.cache_ttl(), Duration::from_secs(600));
        assert!(config.preferences_path().ends_with("preferences.json"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "cache_ttl_secs = 30").unwrap();
        assert!(UpdaterConfig::load(Some(file.path())).is_err());
    }
}
