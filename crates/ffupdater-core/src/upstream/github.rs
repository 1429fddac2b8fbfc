use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, info};

use super::ReleaseSource;
use crate::app::{AppSpec, GithubRepo, Source};
use crate::error::{Result, UpdaterError};
use crate::fetcher::{consume_json, parse_https_url, ApiConsumer};
use crate::platform::Platform;
use crate::release::{parse_timestamp, AvailableMetadata, ReleaseId};

const API_BASE: &str = "https://api.github.com/repos";

const AARCH64_TOKENS: &[&str] = &["arm64-v8a", "arm64", "aarch64"];
const ARM_TOKENS: &[&str] = &["armeabi-v7a", "arm"];
const X86_64_TOKENS: &[&str] = &["x86_64", "x64"];
const X86_TOKENS: &[&str] = &["x86", "i386", "i686"];

/// Release object of the GitHub REST API (only the fields we use).
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: Option<u64>,
}

fn contains_any(name: &str, tokens: &[&str]) -> bool {
    tokens.iter().any(|token| name.contains(token))
}

fn matches_platform(name: &str, platform: Platform) -> bool {
    match platform {
        Platform::Aarch64 => contains_any(name, AARCH64_TOKENS),
        Platform::Arm => contains_any(name, ARM_TOKENS) && !contains_any(name, AARCH64_TOKENS),
        Platform::X86_64 => contains_any(name, X86_64_TOKENS),
        Platform::X86 => contains_any(name, X86_TOKENS) && !contains_any(name, X86_64_TOKENS),
    }
}

/// First `.apk` asset whose name (case-insensitively) carries the app token and,
/// when given, the platform.
pub fn select_asset<'a>(
    assets: &'a [Asset],
    app_token: Option<&str>,
    platform: Option<Platform>,
) -> Option<&'a Asset> {
    let app_token = app_token.map(str::to_ascii_lowercase);
    assets.iter().find(|asset| {
        let name = asset.name.to_ascii_lowercase();
        name.ends_with(".apk")
            && app_token.as_deref().map_or(true, |token| name.contains(token))
            && platform.map_or(true, |platform| matches_platform(&name, platform))
    })
}

/// Client for the GitHub releases API.
pub struct GithubClient {
    api: Arc<dyn ApiConsumer>,
    results_per_page: u32,
    max_pages: u32,
}

impl GithubClient {
    pub fn new(api: Arc<dyn ApiConsumer>) -> Self {
        Self {
            api,
            results_per_page: 20,
            max_pages: 4,
        }
    }

    /// Configure how the release list is enumerated when `latest` has no assets.
    pub fn paging(mut self, results_per_page: u32, max_pages: u32) -> Self {
        self.results_per_page = results_per_page.max(1);
        self.max_pages = max_pages.max(1);
        self
    }

    fn latest_url(repo: &GithubRepo) -> Result<Url> {
        parse_https_url(&format!(
            "{API_BASE}/{}/{}/releases/latest",
            repo.owner, repo.repo
        ))
    }

    fn page_url(&self, repo: &GithubRepo, page: u32) -> Result<Url> {
        parse_https_url(&format!(
            "{API_BASE}/{}/{}/releases?per_page={}&page={page}",
            repo.owner, repo.repo, self.results_per_page
        ))
    }

    pub async fn latest_release(&self, repo: &GithubRepo) -> Result<Release> {
        consume_json(self.api.as_ref(), &Self::latest_url(repo)?).await
    }

    /// Walk the release list for the first release that has assets at all.
    pub async fn find_release_with_assets(&self, repo: &GithubRepo) -> Result<Release> {
        for page in 1..=self.max_pages {
            let releases: Vec<Release> =
                consume_json(self.api.as_ref(), &self.page_url(repo, page)?).await?;
            if releases.is_empty() {
                break;
            }
            if let Some(release) = releases.into_iter().find(|release| !release.assets.is_empty()) {
                return Ok(release);
            }
        }
        Err(UpdaterError::NoMatchingRelease(format!(
            "{}/{}",
            repo.owner, repo.repo
        )))
    }

    /// Latest release of `repo` and its asset for `platform`.
    pub async fn resolve(
        &self,
        repo: &GithubRepo,
        platform: Option<Platform>,
    ) -> Result<AvailableMetadata> {
        let latest = self.latest_release(repo).await?;
        let release = if latest.assets.is_empty() {
            debug!(tag = %latest.tag_name, "latest release has no assets, enumerating releases");
            self.find_release_with_assets(repo).await?
        } else {
            latest
        };

        let asset = select_asset(&release.assets, repo.app_token, platform).ok_or_else(|| {
            UpdaterError::NoMatchingAsset {
                release: release.tag_name.clone(),
                platform: platform.unwrap_or(Platform::Arm),
            }
        })?;
        let version = repo.tag_format.extract_version(&release.tag_name)?;
        let download_url = parse_https_url(&asset.browser_download_url)?;
        let published_at = release
            .published_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()?;

        info!(repo = repo.repo, %version, asset = %asset.name, "resolved github release");
        Ok(AvailableMetadata::new(download_url, ReleaseId::Version(version))?
            .with_published_at(published_at)
            .with_file_size(asset.size))
    }
}

#[async_trait]
impl ReleaseSource for GithubClient {
    async fn resolve_release(&self, app: &AppSpec, platform: Platform) -> Result<AvailableMetadata> {
        let Source::Github(repo) = &app.source else {
            return Err(UpdaterError::validation(format!(
                "{} is not published on GitHub",
                app.app
            )));
        };
        let platform = repo.per_platform_assets.then_some(platform);
        self.resolve(repo, platform).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use crate::testing::MockApi;
    use serde_json::json;

    fn asset(name: &str) -> Asset {
        Asset {
            name: name.into(),
            browser_download_url: format!("https://github.com/dl/{name}"),
            size: None,
        }
    }

    #[test]
    fn picks_the_asset_for_each_platform() {
        let assets = vec![asset("app-arm64-v8a.apk"), asset("app-x86.apk")];

        assert_eq!(
            select_asset(&assets, None, Some(Platform::Aarch64)).unwrap().name,
            "app-arm64-v8a.apk"
        );
        assert_eq!(
            select_asset(&assets, None, Some(Platform::X86)).unwrap().name,
            "app-x86.apk"
        );
        assert!(select_asset(&assets, None, Some(Platform::X86_64)).is_none());
        // arm64 must not be mistaken for 32-bit ARM.
        assert!(select_asset(&assets, None, Some(Platform::Arm)).is_none());
    }

    #[test]
    fn x86_does_not_match_x86_64_and_tokens_are_required() {
        let assets = vec![
            asset("focus-8.0-x86_64.apk"),
            asset("klar-8.0-x86.apk"),
            asset("focus-8.0-x86.apk"),
            asset("focus-8.0-x86.apk.asc"),
        ];
        assert_eq!(
            select_asset(&assets, Some("focus"), Some(Platform::X86)).unwrap().name,
            "focus-8.0-x86.apk"
        );
        assert_eq!(
            select_asset(&assets, Some("klar"), Some(Platform::X86)).unwrap().name,
            "klar-8.0-x86.apk"
        );
        assert!(select_asset(&assets, Some("klar"), Some(Platform::X86_64)).is_none());
    }

    #[test]
    fn platform_agnostic_takes_first_apk() {
        let assets = vec![asset("notes.txt"), asset("Lite-2.1.19.APK"), asset("other.apk")];
        assert_eq!(select_asset(&assets, None, None).unwrap().name, "Lite-2.1.19.APK");
    }

    fn focus_repo() -> GithubRepo {
        match App::FirefoxFocus.spec().source {
            Source::Github(repo) => repo,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn resolves_latest_release() {
        let api = MockApi::new().json(
            "https://api.github.com/repos/mozilla-mobile/focus-android/releases/latest",
            json!({
                "tag_name": "v8.13.1",
                "published_at": "2021-02-01T12:00:00Z",
                "assets": [
                    { "name": "focus-8.13.1-arm64-v8a.apk", "browser_download_url": "https://github.com/focus-arm64.apk", "size": 10 },
                    { "name": "focus-8.13.1-x86.apk", "browser_download_url": "https://github.com/focus-x86.apk", "size": 11 }
                ]
            }),
        );
        let client = GithubClient::new(Arc::new(api));

        let metadata = client
            .resolve(&focus_repo(), Some(Platform::Aarch64))
            .await
            .unwrap();
        assert_eq!(metadata.release_id(), &ReleaseId::Version("8.13.1".into()));
        assert_eq!(
            metadata.download_url().as_str(),
            "https://github.com/focus-arm64.apk"
        );
        assert_eq!(metadata.file_size, Some(10));
        assert!(metadata.published_at.is_some());

        let err = client
            .resolve(&focus_repo(), Some(Platform::X86_64))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UpdaterError::NoMatchingAsset {
                platform: Platform::X86_64,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn falls_back_to_release_list_when_latest_has_no_assets() {
        let api = Arc::new(
            MockApi::new()
                .json(
                    "https://api.github.com/repos/mozilla-mobile/focus-android/releases/latest",
                    json!({ "tag_name": "v9.0.0", "assets": [] }),
                )
                .json(
                    "https://api.github.com/repos/mozilla-mobile/focus-android/releases?per_page=2&page=1",
                    json!([
                        { "tag_name": "v9.0.0", "assets": [] },
                        { "tag_name": "v8.9.0-beta", "assets": [] }
                    ]),
                )
                .json(
                    "https://api.github.com/repos/mozilla-mobile/focus-android/releases?per_page=2&page=2",
                    json!([
                        { "tag_name": "v8.8.0", "assets": [
                            { "name": "focus-8.8.0-armeabi-v7a.apk", "browser_download_url": "https://github.com/focus-arm.apk" }
                        ] }
                    ]),
                ),
        );
        let client = GithubClient::new(api.clone()).paging(2, 3);

        let metadata = client
            .resolve(&focus_repo(), Some(Platform::Arm))
            .await
            .unwrap();
        assert_eq!(metadata.release_id(), &ReleaseId::Version("8.8.0".into()));
        assert_eq!(api.request_count("https://api.github.com/repos/mozilla-mobile/focus-android/releases?per_page=2&page=3"), 0);
    }

    #[tokio::test]
    async fn fails_when_no_release_has_assets() {
        let api = MockApi::new()
            .json(
                "https://api.github.com/repos/mozilla-mobile/focus-android/releases/latest",
                json!({ "tag_name": "v9.0.0", "assets": [] }),
            )
            .json(
                "https://api.github.com/repos/mozilla-mobile/focus-android/releases?per_page=20&page=1",
                json!([{ "tag_name": "v9.0.0", "assets": [] }]),
            )
            .json(
                "https://api.github.com/repos/mozilla-mobile/focus-android/releases?per_page=20&page=2",
                json!([]),
            );
        let client = GithubClient::new(Arc::new(api));

        let err = client
            .resolve(&focus_repo(), Some(Platform::Arm))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdaterError::NoMatchingRelease(_)));
        assert!(err.is_unsupported());
    }

    #[tokio::test]
    async fn malformed_json_is_a_decode_error() {
        let api = MockApi::new().body(
            "https://api.github.com/repos/mozilla-mobile/focus-android/releases/latest",
            b"{\"assets\": []}".to_vec(),
        );
        let client = GithubClient::new(Arc::new(api));
        let err = client
            .resolve(&focus_repo(), Some(Platform::Arm))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdaterError::Json(_)));
    }
}
