//! Semantic retrieval over indexed repositories.
//!
//! Embeds the query, asks the vector store for the nearest points and
//! joins each hit with its metadata row. Hits keep the store's raw score
//! and order.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use github_trend_core::embedding::truncate_chars;
use github_trend_core::star_history::StarHistory;
use github_trend_core::store::VectorStore;

use crate::config::Config;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::metadata::{repo_details, RepoDetails};

/// One retrieval hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedRepo {
    pub repo_name: String,
    pub score: f32,
    /// README cut to `retrieval.excerpt_chars` characters.
    pub readme_excerpt: String,
    pub readme_truncated: bool,
    pub star_history: StarHistory,
    pub last_updated: String,
    /// `None` when the point has no metadata row.
    pub details: Option<RepoDetails>,
}

#[derive(Clone)]
pub struct Retriever {
    config: Arc<Config>,
    pool: SqlitePool,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Retriever {
    pub fn new(
        config: Arc<Config>,
        pool: SqlitePool,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            config,
            pool,
            vectors,
            embedder,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn vectors(&self) -> &Arc<dyn VectorStore> {
        &self.vectors
    }

    /// Top `limit` repositories for `query`, best first. A blank query
    /// returns no hits without calling the embedding service.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<RetrievedRepo>> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let vector = embed_query(
            self.embedder.as_ref(),
            query,
            self.config.embedding.max_chars,
        )
        .await?;
        let hits = self.vectors.search(&vector, limit).await?;

        let excerpt_chars = self.config.retrieval.excerpt_chars;
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let details = repo_details(
                &self.pool,
                &hit.payload.repo_name,
                self.config.retrieval.top_contributors,
            )
            .await?;
            let excerpt = truncate_chars(&hit.payload.readme_content, excerpt_chars);
            results.push(RetrievedRepo {
                readme_truncated: excerpt.len() < hit.payload.readme_content.len(),
                readme_excerpt: excerpt.to_string(),
                repo_name: hit.payload.repo_name,
                score: hit.score,
                star_history: hit.payload.star_history,
                last_updated: hit.payload.last_updated,
                details,
            });
        }
        Ok(results)
    }
}
