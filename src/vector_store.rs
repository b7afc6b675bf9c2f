//! Vector store backends.
//!
//! [`SqliteVectorStore`] keeps points as little-endian f32 BLOBs in the
//! metadata database and answers nearest-neighbor queries by brute-force
//! cosine similarity, which is plenty for tens of thousands of
//! repositories. [`QdrantStore`](crate::qdrant::QdrantStore) talks to a
//! Qdrant server over gRPC. [`create_vector_store`] picks one from
//! `vector.backend` at startup.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

use github_trend_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use github_trend_core::models::{ScoredPoint, VectorPoint};
use github_trend_core::store::{rank, VectorStore};

use crate::config::Config;
use crate::qdrant::QdrantStore;

/// SQLite implementation of [`VectorStore`].
pub struct SqliteVectorStore {
    pool: SqlitePool,
    collection: String,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool, collection: impl Into<String>) -> Self {
        Self {
            pool,
            collection: collection.into(),
        }
    }

    /// Number of points in the collection.
    pub async fn count(&self) -> Result<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM vector_points WHERE collection = ?")
                .bind(&self.collection)
                .fetch_one(&self.pool)
                .await?,
        )
    }
}

fn point_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<VectorPoint> {
    let id: String = row.get("id");
    let blob: Vec<u8> = row.get("embedding");
    let payload_json: String = row.get("payload_json");
    Ok(VectorPoint {
        id: Uuid::parse_str(&id)?,
        vector: blob_to_vec(&blob),
        payload: serde_json::from_str(&payload_json)?,
    })
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn ensure_collection(&self, dims: usize) -> Result<()> {
        sqlx::query(
            "INSERT INTO vector_collections (name, dims, distance) VALUES (?, ?, 'cosine') \
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(&self.collection)
        .bind(dims as i64)
        .execute(&self.pool)
        .await?;

        let existing: i64 = sqlx::query_scalar("SELECT dims FROM vector_collections WHERE name = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;
        if existing != dims as i64 {
            bail!(
                "collection '{}' has {} dimensions, embedding.dims is {}",
                self.collection,
                existing,
                dims
            );
        }
        Ok(())
    }

    async fn upsert(&self, point: &VectorPoint) -> Result<()> {
        let payload_json = serde_json::to_string(&point.payload)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO vector_points (collection, id, repo_name, dims, embedding, payload_json, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(collection, id) DO UPDATE SET
                repo_name = excluded.repo_name,
                dims = excluded.dims,
                embedding = excluded.embedding,
                payload_json = excluded.payload_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.collection)
        .bind(point.id.to_string())
        .bind(&point.payload.repo_name)
        .bind(point.vector.len() as i64)
        .bind(vec_to_blob(&point.vector))
        .bind(&payload_json)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn retrieve(&self, id: Uuid) -> Result<Option<VectorPoint>> {
        let row = sqlx::query(
            "SELECT id, embedding, payload_json FROM vector_points WHERE collection = ? AND id = ?",
        )
        .bind(&self.collection)
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(point_from_row).transpose()
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>> {
        let rows = sqlx::query(
            "SELECT id, embedding, payload_json FROM vector_points WHERE collection = ?",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let point = point_from_row(row)?;
            hits.push(ScoredPoint {
                id: point.id,
                score: cosine_similarity(vector, &point.vector),
                payload: point.payload,
            });
        }

        Ok(rank(hits, limit))
    }

    async fn scroll_by_repo(&self, repo_name: &str, limit: usize) -> Result<Vec<VectorPoint>> {
        let rows = sqlx::query(
            "SELECT id, embedding, payload_json FROM vector_points \
             WHERE collection = ? AND repo_name = ? ORDER BY id LIMIT ?",
        )
        .bind(&self.collection)
        .bind(repo_name)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(point_from_row).collect()
    }
}

/// Build the configured backend and make sure its collection exists.
pub async fn create_vector_store(
    config: &Config,
    pool: &SqlitePool,
) -> Result<Arc<dyn VectorStore>> {
    let store: Arc<dyn VectorStore> = match config.vector.backend.as_str() {
        "sqlite" => Arc::new(SqliteVectorStore::new(
            pool.clone(),
            config.vector.collection.clone(),
        )),
        "qdrant" => Arc::new(QdrantStore::new(&config.vector)?),
        other => bail!("Unknown vector backend: {}", other),
    };
    store.ensure_collection(config.embedding.dims).await?;
    Ok(store)
}
