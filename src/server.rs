//! HTTP JSON API.
//!
//! Serves retrieval, question answering, repository lookups and the
//! analytics data contracts to browser dashboards and scripts.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/stats` | Row counts and ingestion log |
//! | `POST` | `/search` | `{query, limit?}` → ranked repositories |
//! | `POST` | `/ask` | `{query, context?}` → generated answer |
//! | `GET`  | `/repos/{owner}/{name}` | Repository details with top contributors |
//! | `GET`  | `/analytics/years` | Repository counts per creation year |
//! | `GET`  | `/analytics/languages` | Language share per year |
//! | `GET`  | `/analytics/topics` | Topic frequencies |
//! | `GET`  | `/analytics/communities` | Topic graph with communities |
//! | `GET`  | `/analytics/growth` | Fastest-growing repository of a year |
//! | `GET`  | `/analytics/contributors` | Top contributors |
//! | `GET`  | `/analytics/stars/{owner}/{name}` | Daily and cumulative stars |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so dashboards served
//! from another origin can call the API.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use github_trend_core::graph::CommunityGraph;
use github_trend_core::star_history::StarPoint;

use crate::analytics::{self, ContributorTotal, GrowthLeader, TopicCount, YearCount, YearLanguages};
use crate::answer::answer;
use crate::completion::CompletionProvider;
use crate::config::Config;
use crate::metadata::{repo_details, RepoDetails};
use crate::retrieval::{RetrievedRepo, Retriever};
use crate::stats::{collect_stats, Stats};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub retriever: Retriever,
    pub completion: Arc<dyn CompletionProvider>,
}

/// All routes with CORS applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .route("/search", post(handle_search))
        .route("/ask", post(handle_ask))
        .route("/repos/{owner}/{name}", get(handle_repo))
        .route("/analytics/years", get(handle_years))
        .route("/analytics/languages", get(handle_languages))
        .route("/analytics/topics", get(handle_topics))
        .route("/analytics/communities", get(handle_communities))
        .route("/analytics/growth", get(handle_growth))
        .route("/analytics/contributors", get(handle_contributors))
        .route("/analytics/stars/{owner}/{name}", get(handle_stars))
        .layer(cors)
        .with_state(state)
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "server listening");
    println!("github-trend API listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Error type that converts into a JSON error response.
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = %format!("{:#}", err), "request failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: format!("{:#}", err),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

type ApiResponse<T> = Result<Json<T>, AppError>;

// ============ GET /health, /stats ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_stats(State(state): State<AppState>) -> ApiResponse<Stats> {
    Ok(Json(collect_stats(&state.pool).await?))
}

// ============ POST /search, /ask ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<RetrievedRepo>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> ApiResponse<SearchResponse> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let limit = req.limit.unwrap_or(state.config.retrieval.limit);
    if limit == 0 {
        return Err(bad_request("limit must be at least 1"));
    }
    let results = state.retriever.search(&req.query, limit).await?;
    Ok(Json(SearchResponse { results }))
}

#[derive(Deserialize)]
struct AskRequest {
    query: String,
    #[serde(default)]
    context: Option<String>,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> ApiResponse<AskResponse> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let text = answer(
        &state.retriever,
        state.completion.as_ref(),
        &req.query,
        req.context.as_deref(),
    )
    .await;
    Ok(Json(AskResponse { answer: text }))
}

// ============ GET /repos/{owner}/{name} ============

async fn handle_repo(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
) -> ApiResponse<RepoDetails> {
    let full_name = format!("{}/{}", owner, name);
    repo_details(
        &state.pool,
        &full_name,
        state.config.retrieval.top_contributors,
    )
    .await?
    .map(Json)
    .ok_or_else(|| not_found(format!("repository not found: {}", full_name)))
}

// ============ GET /analytics/* ============

#[derive(Deserialize)]
struct YearsQuery {
    #[serde(default = "default_min_stars")]
    min_stars: i64,
    #[serde(default)]
    min_forks: i64,
}

fn default_min_stars() -> i64 {
    100
}

async fn handle_years(
    State(state): State<AppState>,
    Query(q): Query<YearsQuery>,
) -> ApiResponse<Vec<YearCount>> {
    Ok(Json(
        analytics::repo_counts_by_year(&state.pool, q.min_stars, q.min_forks).await?,
    ))
}

#[derive(Deserialize)]
struct LanguagesQuery {
    #[serde(default = "default_top")]
    top: i64,
    #[serde(default = "default_true")]
    percentage: bool,
}

fn default_top() -> i64 {
    20
}
fn default_true() -> bool {
    true
}

async fn handle_languages(
    State(state): State<AppState>,
    Query(q): Query<LanguagesQuery>,
) -> ApiResponse<Vec<YearLanguages>> {
    Ok(Json(
        analytics::language_share_by_year(&state.pool, q.top, q.percentage).await?,
    ))
}

#[derive(Deserialize)]
struct TopicsQuery {
    begin_year: Option<i32>,
    end_year: Option<i32>,
    limit: Option<usize>,
}

async fn handle_topics(
    State(state): State<AppState>,
    Query(q): Query<TopicsQuery>,
) -> ApiResponse<Vec<TopicCount>> {
    let mut topics = analytics::topic_counts(&state.pool, q.begin_year, q.end_year).await?;
    if let Some(limit) = q.limit {
        topics.truncate(limit);
    }
    Ok(Json(topics))
}

async fn handle_communities(State(state): State<AppState>) -> ApiResponse<CommunityGraph> {
    Ok(Json(
        analytics::topic_communities(&state.pool, &state.config.analytics).await?,
    ))
}

#[derive(Deserialize)]
struct GrowthQuery {
    year: Option<i32>,
}

async fn handle_growth(
    State(state): State<AppState>,
    Query(q): Query<GrowthQuery>,
) -> ApiResponse<GrowthLeader> {
    use chrono::Datelike;
    let year = q.year.unwrap_or_else(|| chrono::Utc::now().year());
    analytics::fastest_growing(&state.pool, year)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("no repositories created in {}", year)))
}

#[derive(Deserialize)]
struct ContributorsQuery {
    #[serde(default = "default_contributors_limit")]
    limit: i64,
}

fn default_contributors_limit() -> i64 {
    20
}

async fn handle_contributors(
    State(state): State<AppState>,
    Query(q): Query<ContributorsQuery>,
) -> ApiResponse<Vec<ContributorTotal>> {
    Ok(Json(analytics::top_contributors(&state.pool, q.limit).await?))
}

async fn handle_stars(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
) -> ApiResponse<Vec<StarPoint>> {
    let full_name = format!("{}/{}", owner, name);
    analytics::star_series(state.retriever.vectors().as_ref(), &full_name)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("no star history for {}", full_name)))
}
