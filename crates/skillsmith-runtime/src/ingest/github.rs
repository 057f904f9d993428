//! Code-host client abstraction (spec §4.4). A `reqwest`-backed
//! implementation talks to the GitHub REST API; tests use a scripted
//! in-memory double behind the same trait instead.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::auth::{AuthHeader, TokenExchange};
use crate::error::{Result, RuntimeError};

#[derive(Debug, Clone)]
pub struct RepoMetadata {
    pub owner: String,
    pub name: String,
    pub default_branch: String,
    pub description: String,
    pub stars: u64,
    pub forks: u64,
    pub topics: Vec<String>,
}

impl RepoMetadata {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn html_url(&self) -> String {
        format!("https://github.com/{}", self.full_name())
    }
}

#[async_trait]
pub trait CodeHostClient: Send + Sync {
    async fn get_repo(&self, auth: &AuthHeader, owner: &str, repo: &str) -> Result<RepoMetadata>;

    /// Directory entry names at `path` on `branch`; empty if the path
    /// doesn't exist.
    async fn list_dir(
        &self,
        auth: &AuthHeader,
        owner: &str,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> Result<Vec<String>>;

    /// Raw file content, `None` on 404.
    async fn get_file(
        &self,
        auth: &AuthHeader,
        owner: &str,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> Result<Option<String>>;

    async fn search_by_topic(
        &self,
        auth: &AuthHeader,
        topic: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<RepoMetadata>>;
}

pub struct GithubRestClient {
    http: reqwest::Client,
    base_url: String,
}

impl GithubRestClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .user_agent("skillsmith-ingest/0.1")
                .build()
                .expect("building the HTTP client with static config never fails"),
            base_url: "https://api.github.com".to_string(),
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder, auth: &AuthHeader) -> reqwest::RequestBuilder {
        match auth {
            AuthHeader::AppInstallation(token) | AuthHeader::StaticBearer(token) => {
                builder.bearer_auth(token)
            }
            AuthHeader::Anonymous => builder,
        }
    }
}

impl Default for GithubRestClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    owner: OwnerResponse,
    name: String,
    default_branch: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
    #[serde(default)]
    topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OwnerResponse {
    login: String,
}

impl From<RepoResponse> for RepoMetadata {
    fn from(r: RepoResponse) -> Self {
        RepoMetadata {
            owner: r.owner.login,
            name: r.name,
            default_branch: r.default_branch,
            description: r.description.unwrap_or_default(),
            stars: r.stargazers_count,
            forks: r.forks_count,
            topics: r.topics,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ContentsEntry {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ContentsFile {
    content: String,
    encoding: String,
}

#[derive(Debug, Deserialize)]
struct SearchReposResponse {
    items: Vec<RepoResponse>,
}

#[async_trait]
impl CodeHostClient for GithubRestClient {
    async fn get_repo(&self, auth: &AuthHeader, owner: &str, repo: &str) -> Result<RepoMetadata> {
        let url = format!("{}/repos/{owner}/{repo}", self.base_url);
        let resp = self
            .authorize(self.http.get(&url), auth)
            .send()
            .await
            .map_err(|e| RuntimeError::Upstream(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(RuntimeError::UpstreamRateLimited { retry_after_ms: 60_000 });
        }
        let body: RepoResponse = resp
            .error_for_status()
            .map_err(|e| RuntimeError::Upstream(e.to_string()))?
            .json()
            .await
            .map_err(|e| RuntimeError::Upstream(e.to_string()))?;
        Ok(body.into())
    }

    async fn list_dir(
        &self,
        auth: &AuthHeader,
        owner: &str,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> Result<Vec<String>> {
        let url = format!("{}/repos/{owner}/{repo}/contents/{path}?ref={branch}", self.base_url);
        let resp = self
            .authorize(self.http.get(&url), auth)
            .send()
            .await
            .map_err(|e| RuntimeError::Upstream(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let entries: Vec<ContentsEntry> = resp
            .error_for_status()
            .map_err(|e| RuntimeError::Upstream(e.to_string()))?
            .json()
            .await
            .map_err(|e| RuntimeError::Upstream(e.to_string()))?;
        Ok(entries
            .into_iter()
            .filter(|e| e.kind == "dir")
            .map(|e| e.name)
            .collect())
    }

    async fn get_file(
        &self,
        auth: &AuthHeader,
        owner: &str,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> Result<Option<String>> {
        let url = format!("{}/repos/{owner}/{repo}/contents/{path}?ref={branch}", self.base_url);
        let resp = self
            .authorize(self.http.get(&url), auth)
            .send()
            .await
            .map_err(|e| RuntimeError::Upstream(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let file: ContentsFile = resp
            .error_for_status()
            .map_err(|e| RuntimeError::Upstream(e.to_string()))?
            .json()
            .await
            .map_err(|e| RuntimeError::Upstream(e.to_string()))?;
        if file.encoding != "base64" {
            return Err(RuntimeError::Upstream(format!("unsupported content encoding: {}", file.encoding)));
        }
        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(file.content.replace('\n', ""))
            .map_err(|e| RuntimeError::Upstream(format!("invalid base64 content: {e}")))?;
        Ok(Some(String::from_utf8_lossy(&decoded).to_string()))
    }

    async fn search_by_topic(
        &self,
        auth: &AuthHeader,
        topic: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<RepoMetadata>> {
        let url = format!(
            "{}/search/repositories?q=topic:{topic}&sort=stars&order=desc&page={page}&per_page={per_page}",
            self.base_url
        );
        let resp = self
            .authorize(self.http.get(&url), auth)
            .send()
            .await
            .map_err(|e| RuntimeError::Upstream(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(RuntimeError::UpstreamRateLimited { retry_after_ms: 60_000 });
        }
        let body: SearchReposResponse = resp
            .error_for_status()
            .map_err(|e| RuntimeError::Upstream(e.to_string()))?
            .json()
            .await
            .map_err(|e| RuntimeError::Upstream(e.to_string()))?;
        Ok(body.items.into_iter().map(RepoMetadata::from).collect())
    }
}

#[async_trait]
impl TokenExchange for GithubRestClient {
    async fn create_installation_token(
        &self,
        app_jwt: &str,
        installation_id: &str,
    ) -> Result<(String, DateTime<Utc>)> {
        #[derive(Deserialize)]
        struct TokenResponse {
            token: String,
            expires_at: DateTime<Utc>,
        }
        let url = format!("{}/app/installations/{installation_id}/access_tokens", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(app_jwt)
            .send()
            .await
            .map_err(|e| RuntimeError::Upstream(e.to_string()))?;
        let body: TokenResponse = resp
            .error_for_status()
            .map_err(|e| RuntimeError::Upstream(e.to_string()))?
            .json()
            .await
            .map_err(|e| RuntimeError::Upstream(e.to_string()))?;
        Ok((body.token, body.expires_at))
    }
}
