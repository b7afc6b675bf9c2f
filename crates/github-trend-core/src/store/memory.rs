//! In-memory [`VectorStore`] implementation for tests.
//!
//! Points live in a `BTreeMap` behind `std::sync::RwLock`. Search is
//! brute-force cosine similarity over all stored vectors.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::embedding::cosine_similarity;
use crate::models::{ScoredPoint, VectorPoint};

use super::{rank, VectorStore};

/// In-memory vector store.
#[derive(Default)]
pub struct InMemoryVectorStore {
    dims: RwLock<Option<usize>>,
    points: RwLock<BTreeMap<Uuid, VectorPoint>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<Uuid, VectorPoint>>> {
        self.points
            .read()
            .map_err(|_| anyhow!("vector store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<Uuid, VectorPoint>>> {
        self.points
            .write()
            .map_err(|_| anyhow!("vector store lock poisoned"))
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ensure_collection(&self, dims: usize) -> Result<()> {
        let mut current = self
            .dims
            .write()
            .map_err(|_| anyhow!("vector store lock poisoned"))?;
        if current.is_none() {
            *current = Some(dims);
        }
        Ok(())
    }

    async fn upsert(&self, point: &VectorPoint) -> Result<()> {
        let dims = *self
            .dims
            .read()
            .map_err(|_| anyhow!("vector store lock poisoned"))?;
        if let Some(dims) = dims {
            if point.vector.len() != dims {
                anyhow::bail!(
                    "vector has {} dimensions, collection expects {}",
                    point.vector.len(),
                    dims
                );
            }
        }
        self.write()?.insert(point.id, point.clone());
        Ok(())
    }

    async fn retrieve(&self, id: Uuid) -> Result<Option<VectorPoint>> {
        Ok(self.read()?.get(&id).cloned())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>> {
        let hits = self
            .read()?
            .values()
            .map(|p| ScoredPoint {
                id: p.id,
                score: cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();
        Ok(rank(hits, limit))
    }

    async fn scroll_by_repo(&self, repo_name: &str, limit: usize) -> Result<Vec<VectorPoint>> {
        Ok(self
            .read()?
            .values()
            .filter(|p| p.payload.repo_name == repo_name)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{vector_id, RepoPayload};
    use crate::star_history::StarHistory;

    fn point(name: &str, vector: Vec<f32>) -> VectorPoint {
        VectorPoint {
            id: vector_id(name),
            vector,
            payload: RepoPayload {
                repo_name: name.to_string(),
                readme_content: format!("{} readme", name),
                star_history: StarHistory::default(),
                last_updated: "2024-01-01T00:00:00+00:00".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection(2).await.unwrap();
        store.upsert(&point("a/one", vec![1.0, 0.0])).await.unwrap();
        store.upsert(&point("a/one", vec![0.0, 1.0])).await.unwrap();
        assert_eq!(store.len(), 1);
        let got = store.retrieve(vector_id("a/one")).await.unwrap().unwrap();
        assert_eq!(got.vector, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn search_orders_by_raw_cosine() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection(2).await.unwrap();
        store.upsert(&point("a/near", vec![1.0, 0.1])).await.unwrap();
        store.upsert(&point("a/far", vec![-1.0, 0.0])).await.unwrap();
        store.upsert(&point("a/zero", vec![0.0, 0.0])).await.unwrap();

        let hits = store.search(&[1.0, 0.0], 10).await.unwrap();
        let names: Vec<&str> = hits.iter().map(|h| h.payload.repo_name.as_str()).collect();
        assert_eq!(names, vec!["a/near", "a/zero", "a/far"]);
        assert!(hits[2].score < 0.0);

        assert_eq!(store.search(&[1.0, 0.0], 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejects_wrong_dimensions() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection(3).await.unwrap();
        assert!(store.upsert(&point("a/x", vec![1.0])).await.is_err());
    }

    #[tokio::test]
    async fn scroll_matches_exact_repo_name() {
        let store = InMemoryVectorStore::new();
        store.upsert(&point("a/x", vec![1.0])).await.unwrap();
        store.upsert(&point("a/xy", vec![1.0])).await.unwrap();
        let found = store.scroll_by_repo("a/x", 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].payload.repo_name, "a/x");
    }
}
