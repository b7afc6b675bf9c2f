//! TOML configuration.
//!
//! Every default lives in exactly one place: a `default_*` function or a
//! `Default` impl below. The loaded [`Config`] is never mutated; commands
//! borrow it and pass it down.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use github_trend_core::graph::CommunityAlgorithm;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitHubConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Name of the environment variable holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_min_stars")]
    pub min_stars: u64,
    #[serde(default = "default_sort")]
    pub sort: String,
    #[serde(default = "default_order")]
    pub order: String,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    /// Page cap per discovery sub-window.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    /// Seconds added on top of the rate-limit reset time before retrying.
    #[serde(default = "default_rate_limit_buffer_secs")]
    pub rate_limit_buffer_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token_env: default_token_env(),
            min_stars: default_min_stars(),
            sort: default_sort(),
            order: default_order(),
            per_page: default_per_page(),
            max_pages: default_max_pages(),
            request_delay_ms: default_request_delay_ms(),
            rate_limit_buffer_secs: default_rate_limit_buffer_secs(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_min_stars() -> u64 {
    100
}
fn default_sort() -> String {
    "stars".to_string()
}
fn default_order() -> String {
    "desc".to_string()
}
fn default_per_page() -> u32 {
    100
}
fn default_max_pages() -> u32 {
    10
}
fn default_request_delay_ms() -> u64 {
    1000
}
fn default_rate_limit_buffer_secs() -> u64 {
    10
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    concat!("gtrend/", env!("CARGO_PKG_VERSION")).to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentConfig {
    /// Mapping rows younger than this are served from the vector store.
    #[serde(default = "default_freshness_hours")]
    pub freshness_hours: i64,
    /// Stargazer page ceiling; repositories needing more are flagged.
    #[serde(default = "default_star_history_max_pages")]
    pub star_history_max_pages: u64,
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    #[serde(default = "default_repo_delay_ms")]
    pub repo_delay_ms: u64,
    #[serde(default = "default_renew_readme")]
    pub renew_readme: bool,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            freshness_hours: default_freshness_hours(),
            star_history_max_pages: default_star_history_max_pages(),
            page_delay_ms: default_page_delay_ms(),
            repo_delay_ms: default_repo_delay_ms(),
            renew_readme: default_renew_readme(),
        }
    }
}

fn default_freshness_hours() -> i64 {
    24
}
fn default_star_history_max_pages() -> u64 {
    1000
}
fn default_page_delay_ms() -> u64 {
    500
}
fn default_repo_delay_ms() -> u64 {
    1500
}
fn default_renew_readme() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Base URL. OpenAI-compatible endpoints get `/embeddings` appended,
    /// Ollama gets `/api/embed`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    /// Input is cut to this many characters before embedding.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: default_dims(),
            url: None,
            api_key_env: default_openai_key_env(),
            max_chars: default_max_chars(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_dims() -> usize {
    1024
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_chars() -> usize {
    8000
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_completion_provider(),
            model: None,
            url: None,
            api_key_env: default_openai_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_completion_provider() -> String {
    "disabled".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1500
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    #[serde(default = "default_vector_backend")]
    pub backend: String,
    /// Qdrant gRPC URL, e.g. `http://localhost:6334`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: default_vector_backend(),
            url: None,
            api_key_env: None,
            collection: default_collection(),
        }
    }
}

fn default_vector_backend() -> String {
    "sqlite".to_string()
}
fn default_collection() -> String {
    "github_repos".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_retrieval_limit")]
    pub limit: usize,
    #[serde(default = "default_top_contributors")]
    pub top_contributors: i64,
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: default_retrieval_limit(),
            top_contributors: default_top_contributors(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

fn default_retrieval_limit() -> usize {
    5
}
fn default_top_contributors() -> i64 {
    10
}
fn default_excerpt_chars() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    #[serde(default = "default_community_algorithm")]
    pub community_algorithm: String,
    #[serde(default = "default_min_node_value")]
    pub min_node_value: u64,
    #[serde(default = "default_min_edge_value")]
    pub min_edge_value: u64,
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            community_algorithm: default_community_algorithm(),
            min_node_value: default_min_node_value(),
            min_edge_value: default_min_edge_value(),
            max_nodes: default_max_nodes(),
        }
    }
}

impl AnalyticsConfig {
    /// Parsed algorithm. `load_config` has already rejected unknown names.
    pub fn algorithm(&self) -> CommunityAlgorithm {
        self.community_algorithm.parse().unwrap_or_default()
    }
}

fn default_community_algorithm() -> String {
    "louvain".to_string()
}
fn default_min_node_value() -> u64 {
    1000
}
fn default_min_edge_value() -> u64 {
    100
}
fn default_max_nodes() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate github
    if !(1..=100).contains(&config.github.per_page) {
        anyhow::bail!("github.per_page must be in 1..=100");
    }
    if config.github.max_pages == 0 {
        anyhow::bail!("github.max_pages must be >= 1");
    }
    match config.github.order.as_str() {
        "asc" | "desc" => {}
        other => anyhow::bail!("github.order must be asc or desc, got '{}'", other),
    }

    // Validate enrichment
    if config.enrichment.freshness_hours < 0 {
        anyhow::bail!("enrichment.freshness_hours must be >= 0");
    }
    if config.enrichment.star_history_max_pages == 0 {
        anyhow::bail!("enrichment.star_history_max_pages must be >= 1");
    }

    // Validate embedding
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    // Validate completion
    match config.completion.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.completion.model.is_none() {
                anyhow::bail!("completion.model must be specified when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown completion provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    // Validate vector backend
    match config.vector.backend.as_str() {
        "sqlite" => {}
        "qdrant" => {
            if config.vector.url.is_none() {
                anyhow::bail!("vector.url is required when backend is 'qdrant'");
            }
        }
        other => anyhow::bail!(
            "Unknown vector backend: '{}'. Must be sqlite or qdrant.",
            other
        ),
    }

    if config.retrieval.limit == 0 {
        anyhow::bail!("retrieval.limit must be >= 1");
    }

    config
        .analytics
        .community_algorithm
        .parse::<CommunityAlgorithm>()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse_config("[db]\npath = \"./data/gtrend.sqlite\"\n").unwrap();
        assert_eq!(config.github.min_stars, 100);
        assert_eq!(config.github.per_page, 100);
        assert_eq!(config.github.rate_limit_buffer_secs, 10);
        assert_eq!(config.enrichment.freshness_hours, 24);
        assert_eq!(config.enrichment.star_history_max_pages, 1000);
        assert!(config.enrichment.renew_readme);
        assert_eq!(config.embedding.dims, 1024);
        assert_eq!(config.embedding.max_chars, 8000);
        assert_eq!(config.vector.collection, "github_repos");
        assert_eq!(config.retrieval.top_contributors, 10);
        assert_eq!(config.analytics.algorithm(), CommunityAlgorithm::Louvain);
        assert_eq!(config.completion.max_tokens, 1500);
    }

    #[test]
    fn rejects_out_of_range_page_size() {
        let err = parse_config("[db]\npath = \"x\"\n[github]\nper_page = 250\n").unwrap_err();
        assert!(err.to_string().contains("per_page"));
    }

    #[test]
    fn qdrant_requires_url() {
        assert!(parse_config("[db]\npath = \"x\"\n[vector]\nbackend = \"qdrant\"\n").is_err());
        assert!(parse_config(
            "[db]\npath = \"x\"\n[vector]\nbackend = \"qdrant\"\nurl = \"http://localhost:6334\"\n"
        )
        .is_ok());
    }

    #[test]
    fn rejects_unknown_names() {
        assert!(parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse_config(
            "[db]\npath = \"x\"\n[analytics]\ncommunity_algorithm = \"fast_greedy\"\n"
        )
        .is_err());
        assert!(parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").is_err());
    }
}
