//! GitHub REST client implementing repository discovery and fetch.

use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use url::Url;

use crate::error::SourceError;
use crate::languages::{Lang, matches_language};
use crate::source::{RepositoryDiscovery, RepositoryFetcher, RepositoryRef, SourceFile};

const API_VERSION: &str = "2022-11-28";
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw+json";

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub api_url: String,
    /// Bearer token; unauthenticated requests work with a lower rate limit.
    pub token: Option<String>,
    pub language: Lang,
    pub max_files_per_repo: usize,
    pub max_file_bytes: u64,
    pub timeout: Duration,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".into(),
            token: None,
            language: Lang::Python,
            max_files_per_repo: 200,
            max_file_bytes: 200_000,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    config: GitHubConfig,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<RepoItem>,
}

#[derive(Deserialize)]
struct RepoItem {
    full_name: String,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    default_branch: Option<String>,
}

#[derive(Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: Option<u64>,
}

impl GitHubClient {
    /// # Errors
    ///
    /// Returns an error if the token is not a valid header value or the client cannot be built.
    pub fn new(config: GitHubConfig) -> Result<Self, SourceError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(JSON_MEDIA_TYPE));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static(API_VERSION));
        if let Some(token) = config.token.as_deref().filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| SourceError::Other(format!("invalid GitHub token: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .user_agent(concat!("refit/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, config })
    }

    fn endpoint<'s>(&self, segments: impl IntoIterator<Item = &'s str>) -> Result<Url, SourceError> {
        let mut url = Url::parse(&self.config.api_url)?;
        url.path_segments_mut()
            .map_err(|()| SourceError::Other(format!("invalid API URL: {}", self.config.api_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, SourceError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let exhausted = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            == Some("0");
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || (status == reqwest::StatusCode::FORBIDDEN && exhausted)
        {
            return Err(SourceError::RateLimited);
        }
        Err(SourceError::Status {
            status: status.as_u16(),
            url: response.url().to_string(),
        })
    }

    async fn default_branch(&self, full_name: &str) -> Result<String, SourceError> {
        let url = self.endpoint(std::iter::once("repos").chain(full_name.split('/')))?;
        let repo: RepoItem = self.send(self.http.get(url)).await?.json().await?;
        repo.default_branch
            .ok_or_else(|| SourceError::Other(format!("{full_name} has no default branch")))
    }

    async fn fetch_file(
        &self,
        full_name: &str,
        branch: &str,
        path: &str,
    ) -> Result<SourceFile, SourceError> {
        let mut url = self.endpoint(
            std::iter::once("repos")
                .chain(full_name.split('/'))
                .chain(std::iter::once("contents"))
                .chain(path.split('/')),
        )?;
        url.query_pairs_mut().append_pair("ref", branch);
        let text = self
            .send(self.http.get(url).header(ACCEPT, RAW_MEDIA_TYPE))
            .await?
            .text()
            .await?;
        Ok(SourceFile {
            path: path.to_owned(),
            text,
        })
    }
}

impl RepositoryDiscovery for GitHubClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<RepositoryRef>, SourceError> {
        let url = self.endpoint(["search", "repositories"])?;
        let q = format!("{query} language:{}", self.config.language.id());
        let per_page = limit.clamp(1, 100).to_string();
        let response: SearchResponse = self
            .send(self.http.get(url).query(&[
                ("q", q.as_str()),
                ("sort", "stars"),
                ("order", "desc"),
                ("per_page", per_page.as_str()),
            ]))
            .await?
            .json()
            .await?;

        tracing::debug!(query, found = response.items.len(), "GitHub repository search");
        Ok(response
            .items
            .into_iter()
            .take(limit)
            .map(|item| RepositoryRef {
                full_name: item.full_name,
                stars: item.stargazers_count,
                default_branch: item.default_branch,
            })
            .collect())
    }
}

impl RepositoryFetcher for GitHubClient {
    async fn fetch_files(&self, repository: &RepositoryRef) -> Result<Vec<SourceFile>, SourceError> {
        let full_name = repository.full_name.as_str();
        let branch = match &repository.default_branch {
            Some(branch) => branch.clone(),
            None => self.default_branch(full_name).await?,
        };

        let mut url = self.endpoint(
            std::iter::once("repos")
                .chain(full_name.split('/'))
                .chain(["git", "trees", branch.as_str()]),
        )?;
        url.query_pairs_mut().append_pair("recursive", "1");
        let tree: TreeResponse = self.send(self.http.get(url)).await?.json().await?;
        if tree.truncated {
            tracing::warn!(repository = full_name, "GitHub tree listing truncated");
        }

        let paths: Vec<String> = tree
            .tree
            .into_iter()
            .filter(|e| e.kind == "blob" && matches_language(&e.path, self.config.language))
            .filter(|e| e.size.is_none_or(|s| s <= self.config.max_file_bytes))
            .map(|e| e.path)
            .take(self.config.max_files_per_repo)
            .collect();

        let mut files = Vec::with_capacity(paths.len());
        for path in &paths {
            match self.fetch_file(full_name, &branch, path).await {
                Ok(file) => files.push(file),
                Err(e) => {
                    tracing::warn!(repository = full_name, path, "skipping file: {e}");
                }
            }
        }
        tracing::debug!(
            repository = full_name,
            candidates = paths.len(),
            fetched = files.len(),
            "fetched repository files"
        );
        Ok(files)
    }
}
