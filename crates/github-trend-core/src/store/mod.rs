//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the capability the enrichment pipeline and
//! the retrieval service need from a vector index: one point per
//! repository, addressed by [`vector_id`](crate::models::vector_id), with
//! cosine nearest-neighbor search and exact-match lookup by repository
//! name.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//! The app crate provides a SQLite BLOB store and a Qdrant REST client;
//! [`memory::InMemoryVectorStore`] backs tests.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{ScoredPoint, VectorPoint};

/// Abstract vector index.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_collection`](VectorStore::ensure_collection) | Create the cosine collection if missing |
/// | [`upsert`](VectorStore::upsert) | Insert or replace a point by id |
/// | [`retrieve`](VectorStore::retrieve) | Fetch one point by id |
/// | [`search`](VectorStore::search) | Nearest neighbors, raw cosine descending |
/// | [`scroll_by_repo`](VectorStore::scroll_by_repo) | Points whose payload `repo_name` matches exactly |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend name for logs and stats.
    fn backend(&self) -> &'static str;

    /// Create the collection with cosine distance and `dims` dimensions.
    /// Calling it again is a no-op.
    async fn ensure_collection(&self, dims: usize) -> Result<()>;

    async fn upsert(&self, point: &VectorPoint) -> Result<()>;

    async fn retrieve(&self, id: Uuid) -> Result<Option<VectorPoint>>;

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>>;

    async fn scroll_by_repo(&self, repo_name: &str, limit: usize) -> Result<Vec<VectorPoint>>;
}

/// Order hits by descending score, dropping anything past `limit`.
pub fn rank(mut hits: Vec<ScoredPoint>, limit: usize) -> Vec<ScoredPoint> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(limit);
    hits
}
