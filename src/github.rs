//! Rate-limited GitHub REST client.
//!
//! [`GitHubClient`] wraps the handful of endpoints ingestion needs and
//! implements [`RepoSource`], the seam the discovery and enrichment
//! orchestrators are written against.
//!
//! # Rate limiting
//!
//! A response with status 403 or 429 and `X-RateLimit-Remaining: 0` is a
//! quota signal. The client sleeps until `X-RateLimit-Reset` plus a
//! configured buffer, then retries the same request once. A second
//! consecutive quota signal is returned as [`ApiError::Exhausted`] rather
//! than retried again.
//!
//! Any other non-2xx response becomes [`ApiError::Http`] with the status
//! and body; the caller decides whether to skip or abort.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use github_trend_core::models::{normalize_timestamp, Contributor, RepoRecord, Topics};

use crate::config::GitHubConfig;

/// Page size of the contributors and stargazers feeds.
pub const DETAIL_PAGE_SIZE: u32 = 100;

const STAR_MEDIA_TYPE: &str = "application/vnd.github.v3.star+json";
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";

#[derive(Debug, Error)]
pub enum ApiError {
    /// The quota was still exhausted after one sleep-and-retry.
    #[error("GitHub rate limit exhausted (resets at unix {reset_at})")]
    Exhausted { reset_at: i64 },

    #[error("GitHub API error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("GitHub request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected GitHub response: {0}")]
    Decode(String),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// One page of `/search/repositories`. Items are kept raw so a single
/// malformed item can be reported without losing the rest of the page.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub total_count: u64,
    pub items: Vec<Value>,
}

/// Quota snapshot from `/rate_limit`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub resource: String,
    pub limit: u64,
    pub remaining: u64,
    pub reset: i64,
}

/// The GitHub operations ingestion depends on.
#[async_trait]
pub trait RepoSource: Send + Sync {
    /// `total_count` of a search query (fetched with `per_page=1`).
    async fn count_repositories(&self, query: &str) -> ApiResult<u64>;

    /// One page of search results in the configured sort order.
    async fn search_repositories(&self, query: &str, page: u32) -> ApiResult<SearchPage>;

    /// Current stargazer count, `None` if the repository is not found.
    async fn repository_stars(&self, repo_name: &str) -> ApiResult<Option<u64>>;

    /// Decoded README markdown, `None` if the repository has none.
    async fn readme(&self, repo_name: &str) -> ApiResult<Option<String>>;

    async fn contributors(&self, repo_name: &str, page: u32) -> ApiResult<Vec<Contributor>>;

    /// `starred_at` timestamps of one stargazer page.
    async fn stargazers(&self, repo_name: &str, page: u32) -> ApiResult<Vec<String>>;
}

pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    sort: String,
    order: String,
    per_page: u32,
    rate_limit_buffer_secs: u64,
}

impl GitHubClient {
    /// Build a client from configuration. The token is read from the
    /// environment variable named by `github.token_env`; without one the
    /// client runs unauthenticated at a much lower quota.
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty());
        if token.is_none() {
            warn!(
                env = %config.token_env,
                "no GitHub token set; requests are unauthenticated"
            );
        }
        Self::with_token(config, token)
    }

    pub fn with_token(config: &GitHubConfig, token: Option<String>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, config.user_agent.parse()?);
        headers.insert(ACCEPT, JSON_MEDIA_TYPE.parse()?);
        if let Some(token) = token {
            headers.insert(
                AUTHORIZATION,
                format!("Bearer {}", token)
                    .parse()
                    .context("GitHub token is not a valid header value")?,
            );
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            sort: config.sort.clone(),
            order: config.order.clone(),
            per_page: config.per_page,
            rate_limit_buffer_secs: config.rate_limit_buffer_secs,
        })
    }

    /// GET with the single sleep-and-retry on a quota signal.
    async fn get(&self, path: &str, query: &[(&str, String)], accept: &str) -> ApiResult<Response> {
        let url = format!("{}{}", self.api_url, path);
        let mut limited_once = false;

        loop {
            debug!(%url, ?query, "GET");
            let response = self
                .http
                .get(&url)
                .header(ACCEPT, accept)
                .query(query)
                .send()
                .await?;

            let Some(reset_at) = quota_reset(&response) else {
                return Ok(response);
            };
            if limited_once {
                return Err(ApiError::Exhausted { reset_at });
            }
            limited_once = true;

            let wait = rate_limit_sleep_secs(
                reset_at,
                chrono::Utc::now().timestamp(),
                self.rate_limit_buffer_secs,
            );
            warn!(wait_secs = wait, reset_at, "GitHub rate limit reached; sleeping");
            tokio::time::sleep(Duration::from_secs(wait)).await;
        }
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> ApiResult<Value> {
        let response = ensure_success(self.get(path, query, JSON_MEDIA_TYPE).await?).await?;
        Ok(response.json().await?)
    }

    /// Snapshot of the `core` and `search` quotas.
    pub async fn rate_limit(&self) -> ApiResult<Vec<RateLimitStatus>> {
        let json = self.get_json("/rate_limit", &[]).await?;
        let resources = json
            .get("resources")
            .and_then(Value::as_object)
            .ok_or_else(|| ApiError::Decode("missing resources".into()))?;

        Ok(["core", "search"]
            .iter()
            .filter_map(|name| {
                let r = resources.get(*name)?;
                Some(RateLimitStatus {
                    resource: name.to_string(),
                    limit: r.get("limit")?.as_u64()?,
                    remaining: r.get("remaining")?.as_u64()?,
                    reset: r.get("reset")?.as_i64()?,
                })
            })
            .collect())
    }
}

#[async_trait]
impl RepoSource for GitHubClient {
    async fn count_repositories(&self, query: &str) -> ApiResult<u64> {
        let json = self
            .get_json(
                "/search/repositories",
                &[("q", query.to_string()), ("per_page", "1".to_string())],
            )
            .await?;
        json.get("total_count")
            .and_then(Value::as_u64)
            .ok_or_else(|| ApiError::Decode("search response without total_count".into()))
    }

    async fn search_repositories(&self, query: &str, page: u32) -> ApiResult<SearchPage> {
        let json = self
            .get_json(
                "/search/repositories",
                &[
                    ("q", query.to_string()),
                    ("sort", self.sort.clone()),
                    ("order", self.order.clone()),
                    ("per_page", self.per_page.to_string()),
                    ("page", page.to_string()),
                ],
            )
            .await?;
        parse_search_page(json)
    }

    async fn repository_stars(&self, repo_name: &str) -> ApiResult<Option<u64>> {
        // Core quota, not the 30/min search quota.
        let response = self
            .get(&format!("/repos/{}", repo_name), &[], JSON_MEDIA_TYPE)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let json: Value = ensure_success(response).await?.json().await?;
        Ok(json.get("stargazers_count").and_then(Value::as_u64))
    }

    async fn readme(&self, repo_name: &str) -> ApiResult<Option<String>> {
        let response = self
            .get(&format!("/repos/{}/readme", repo_name), &[], JSON_MEDIA_TYPE)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let json: Value = ensure_success(response).await?.json().await?;
        decode_readme(&json).map(Some)
    }

    async fn contributors(&self, repo_name: &str, page: u32) -> ApiResult<Vec<Contributor>> {
        let response = self
            .get(
                &format!("/repos/{}/contributors", repo_name),
                &[
                    ("page", page.to_string()),
                    ("per_page", DETAIL_PAGE_SIZE.to_string()),
                ],
                JSON_MEDIA_TYPE,
            )
            .await?;
        // Empty repositories answer 204 with no body.
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        let json: Value = ensure_success(response).await?.json().await?;
        parse_contributors(&json)
    }

    async fn stargazers(&self, repo_name: &str, page: u32) -> ApiResult<Vec<String>> {
        let response = self
            .get(
                &format!("/repos/{}/stargazers", repo_name),
                &[
                    ("page", page.to_string()),
                    ("per_page", DETAIL_PAGE_SIZE.to_string()),
                ],
                STAR_MEDIA_TYPE,
            )
            .await?;
        let json: Value = ensure_success(response).await?.json().await?;
        let events = json
            .as_array()
            .ok_or_else(|| ApiError::Decode("stargazers response is not an array".into()))?;
        Ok(events
            .iter()
            .filter_map(|e| e.get("starred_at").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }
}

/// Reset time if `response` is a quota signal.
fn quota_reset(response: &Response) -> Option<i64> {
    let status = response.status();
    if status != StatusCode::FORBIDDEN && status != StatusCode::TOO_MANY_REQUESTS {
        return None;
    }
    let headers = response.headers();
    let remaining = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())?;
    if remaining.trim() != "0" {
        return None;
    }
    Some(
        headers
            .get("x-ratelimit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or_else(|| chrono::Utc::now().timestamp()),
    )
}

/// Seconds to wait before retrying: time until reset (never negative)
/// plus the buffer.
pub fn rate_limit_sleep_secs(reset_at: i64, now: i64, buffer_secs: u64) -> u64 {
    (reset_at - now).max(0) as u64 + buffer_secs
}

async fn ensure_success(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Http {
        status: status.as_u16(),
        body,
    })
}

fn parse_search_page(json: Value) -> ApiResult<SearchPage> {
    let total_count = json
        .get("total_count")
        .and_then(Value::as_u64)
        .ok_or_else(|| ApiError::Decode("search response without total_count".into()))?;
    let items = match json.get("items") {
        Some(Value::Array(items)) => items.clone(),
        None | Some(Value::Null) => Vec::new(),
        Some(_) => return Err(ApiError::Decode("search items is not an array".into())),
    };
    Ok(SearchPage { total_count, items })
}

fn decode_readme(json: &Value) -> ApiResult<String> {
    let content = json.get("content").and_then(Value::as_str).unwrap_or("");
    match json.get("encoding").and_then(Value::as_str) {
        Some("base64") => {
            // The API wraps base64 at 60 columns.
            let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(compact)
                .map_err(|e| ApiError::Decode(format!("README is not valid base64: {}", e)))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        Some("") | None => Ok(content.to_string()),
        Some(other) => Err(ApiError::Decode(format!(
            "unsupported README encoding '{}'",
            other
        ))),
    }
}

fn parse_contributors(json: &Value) -> ApiResult<Vec<Contributor>> {
    let entries = json
        .as_array()
        .ok_or_else(|| ApiError::Decode("contributors response is not an array".into()))?;
    Ok(entries
        .iter()
        .filter_map(|c| {
            Some(Contributor {
                login: c.get("login")?.as_str()?.to_string(),
                url: c.get("html_url")?.as_str()?.to_string(),
                avatar_url: c
                    .get("avatar_url")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                contributions: c.get("contributions").and_then(Value::as_i64).unwrap_or(0),
            })
        })
        .collect())
}

/// Extract a [`RepoRecord`] from one search item.
///
/// `full_name` and `html_url` are required. Missing or null optional
/// fields take their empty value; a field of the wrong type or an
/// unparseable timestamp is an error for this item only.
pub fn parse_search_item(item: &Value) -> Result<RepoRecord> {
    let name = required_str(item, "full_name")?;
    let url = required_str(item, "html_url")?;

    let topics = match item.get("topics") {
        None | Some(Value::Null) => Topics::new(),
        Some(Value::Array(tags)) => {
            let mut topics = Topics::new();
            for tag in tags {
                let tag = tag
                    .as_str()
                    .ok_or_else(|| anyhow!("topics contains a non-string value"))?;
                topics.insert(tag);
            }
            topics
        }
        Some(_) => anyhow::bail!("topics is not an array"),
    };

    let owner_type = item
        .get("owner")
        .and_then(|o| o.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    Ok(RepoRecord {
        name,
        url,
        description: optional_str(item, "description")?.unwrap_or_default(),
        stars: optional_i64(item, "stargazers_count")?,
        forks: optional_i64(item, "forks_count")?,
        language: optional_str(item, "language")?.filter(|l| !l.is_empty()),
        created_at: timestamp(item, "created_at")?,
        updated_at: timestamp(item, "updated_at")?,
        topics,
        size: optional_i64(item, "size")?,
        homepage: optional_str(item, "homepage")?.unwrap_or_default(),
        owner_type,
        pushed_at: timestamp(item, "pushed_at")?,
    })
}

fn required_str(item: &Value, key: &str) -> Result<String> {
    match item.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::String(_)) | None | Some(Value::Null) => anyhow::bail!("missing {}", key),
        Some(other) => anyhow::bail!("{} is not a string: {}", key, other),
    }
}

fn optional_str(item: &Value, key: &str) -> Result<Option<String>> {
    match item.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => anyhow::bail!("{} is not a string: {}", key, other),
    }
}

fn optional_i64(item: &Value, key: &str) -> Result<i64> {
    match item.get(key) {
        None | Some(Value::Null) => Ok(0),
        Some(v) => v
            .as_i64()
            .ok_or_else(|| anyhow!("{} is not an integer: {}", key, v)),
    }
}

fn timestamp(item: &Value, key: &str) -> Result<Option<String>> {
    match optional_str(item, key)? {
        None => Ok(None),
        Some(raw) => normalize_timestamp(&raw).with_context(|| format!("bad {}", key)),
    }
}
