//! Qdrant backend for [`VectorStore`], over the gRPC API of
//! [`qdrant_client`].
//!
//! Point ids are the UUIDs from
//! [`vector_id`](github_trend_core::models::vector_id). The
//! [`RepoPayload`] fields are stored as top-level payload keys, so
//! `repo_name` can be matched by a filter.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigKind;
use qdrant_client::qdrant::vectors_output::VectorsOptions;
use qdrant_client::qdrant::{
    CollectionInfo, Condition, CreateCollectionBuilder, Distance, Filter, GetPointsBuilder,
    PointId, PointStruct, ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder,
    Value as QdrantValue, VectorParamsBuilder, VectorsOutput,
};
use qdrant_client::{Payload, Qdrant};
use tracing::info;
use uuid::Uuid;

use github_trend_core::models::{RepoPayload, ScoredPoint, VectorPoint};
use github_trend_core::store::VectorStore;

use crate::config::VectorConfig;

pub struct QdrantStore {
    client: Qdrant,
    collection: String,
}

impl QdrantStore {
    pub fn new(config: &VectorConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow!("vector.url required for qdrant backend"))?;
        let api_key = match &config.api_key_env {
            Some(var) => Some(
                std::env::var(var).map_err(|_| anyhow!("{} environment variable not set", var))?,
            ),
            None => None,
        };
        Self::connect(&url, &config.collection, api_key)
    }

    /// Build the client. No request is made until the first operation.
    pub fn connect(url: &str, collection: &str, api_key: Option<String>) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .build()
            .with_context(|| format!("invalid Qdrant url '{}'", url))?;
        Ok(Self {
            client,
            collection: collection.to_string(),
        })
    }
}

/// Dimensions of a collection with a single unnamed vector.
fn configured_dims(info: &CollectionInfo) -> Option<u64> {
    let config = info
        .config
        .as_ref()?
        .params
        .as_ref()?
        .vectors_config
        .as_ref()?
        .config
        .as_ref()?;
    match config {
        VectorsConfigKind::Params(params) => Some(params.size),
        VectorsConfigKind::ParamsMap(_) => None,
    }
}

fn to_payload(payload: &RepoPayload) -> Result<Payload> {
    Payload::try_from(serde_json::to_value(payload)?)
        .context("repository payload is not a JSON object")
}

fn from_payload(fields: HashMap<String, QdrantValue>) -> Result<RepoPayload> {
    let object: serde_json::Map<String, serde_json::Value> = fields
        .into_iter()
        .map(|(key, value)| (key, value.into_json()))
        .collect();
    serde_json::from_value(serde_json::Value::Object(object))
        .context("Qdrant payload is not a repository payload")
}

fn parse_id(id: Option<PointId>) -> Result<Uuid> {
    match id.and_then(|id| id.point_id_options) {
        Some(PointIdOptions::Uuid(s)) => Ok(Uuid::parse_str(&s)?),
        Some(PointIdOptions::Num(n)) => bail!("Qdrant point id {} is not a UUID", n),
        None => bail!("Qdrant point without id"),
    }
}

fn dense_vector(vectors: Option<VectorsOutput>) -> Vec<f32> {
    match vectors.and_then(|v| v.vectors_options) {
        Some(VectorsOptions::Vector(v)) => v.data,
        _ => Vec::new(),
    }
}

fn repo_filter(repo_name: &str) -> Filter {
    Filter::must([Condition::matches("repo_name", repo_name.to_string())])
}

fn to_point(
    id: Option<PointId>,
    payload: HashMap<String, QdrantValue>,
    vectors: Option<VectorsOutput>,
) -> Result<VectorPoint> {
    Ok(VectorPoint {
        id: parse_id(id)?,
        vector: dense_vector(vectors),
        payload: from_payload(payload)?,
    })
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn backend(&self) -> &'static str {
        "qdrant"
    }

    async fn ensure_collection(&self, dims: usize) -> Result<()> {
        if !self.client.collection_exists(self.collection.as_str()).await? {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(self.collection.as_str())
                        .vectors_config(VectorParamsBuilder::new(dims as u64, Distance::Cosine)),
                )
                .await?;
            info!(collection = %self.collection, dims, "created Qdrant collection");
            return Ok(());
        }

        let info = self.client.collection_info(self.collection.as_str()).await?;
        match info.result.as_ref().and_then(configured_dims) {
            Some(size) if size != dims as u64 => bail!(
                "collection '{}' has {} dimensions, embedding.dims is {}",
                self.collection,
                size,
                dims
            ),
            _ => Ok(()),
        }
    }

    async fn upsert(&self, point: &VectorPoint) -> Result<()> {
        let record = PointStruct::new(
            point.id.to_string(),
            point.vector.clone(),
            to_payload(&point.payload)?,
        );
        self.client
            .upsert_points(
                UpsertPointsBuilder::new(self.collection.as_str(), vec![record]).wait(true),
            )
            .await?;
        Ok(())
    }

    async fn retrieve(&self, id: Uuid) -> Result<Option<VectorPoint>> {
        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(
                    self.collection.as_str(),
                    vec![PointId::from(id.to_string())],
                )
                .with_payload(true)
                .with_vectors(true),
            )
            .await?;
        response
            .result
            .into_iter()
            .next()
            .map(|p| to_point(p.id, p.payload, p.vectors))
            .transpose()
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>> {
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(self.collection.as_str(), vector.to_vec(), limit as u64)
                    .with_payload(true),
            )
            .await?;
        response
            .result
            .into_iter()
            .map(|hit| {
                Ok(ScoredPoint {
                    id: parse_id(hit.id)?,
                    score: hit.score,
                    payload: from_payload(hit.payload)?,
                })
            })
            .collect()
    }

    async fn scroll_by_repo(&self, repo_name: &str, limit: usize) -> Result<Vec<VectorPoint>> {
        let response = self
            .client
            .scroll(
                ScrollPointsBuilder::new(self.collection.as_str())
                    .filter(repo_filter(repo_name))
                    .limit(u32::try_from(limit).unwrap_or(u32::MAX))
                    .with_payload(true)
                    .with_vectors(false),
            )
            .await?;
        response
            .result
            .into_iter()
            .map(|p| to_point(p.id, p.payload, p.vectors))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use qdrant_client::qdrant::condition::ConditionOneOf;
    use qdrant_client::qdrant::r#match::MatchValue;
    use qdrant_client::qdrant::{
        CollectionConfig, CollectionParams, VectorOutput, VectorParams, VectorsConfig,
    };
    use serde_json::json;

    use github_trend_core::star_history::StarHistory;

    const ID: &str = "6f1c2f7e-0a4b-5c1d-9e8f-0123456789ab";

    fn payload_fields(name: &str) -> HashMap<String, QdrantValue> {
        [
            ("repo_name", json!(name)),
            ("readme_content", json!("hello")),
            ("star_history", json!({ "2024-01-01": 3 })),
            ("last_updated", json!("2024-06-01T00:00:00Z")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), QdrantValue::from(v)))
        .collect()
    }

    #[test]
    fn payload_fields_become_repo_payload() {
        let payload = from_payload(payload_fields("a/b")).unwrap();
        assert_eq!(payload.repo_name, "a/b");
        assert_eq!(payload.readme_content, "hello");
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(payload.star_history.get(&day), Some(3));
    }

    #[test]
    fn repo_payload_is_stored_as_top_level_keys() {
        let payload = RepoPayload {
            repo_name: "tokio-rs/tokio".into(),
            readme_content: "runtime".into(),
            star_history: StarHistory::from_timestamps(["2024-03-02T10:00:00Z"]),
            last_updated: "2024-03-05T00:00:00Z".into(),
        };
        let point = PointStruct::new(ID.to_string(), vec![0.5, 0.5], to_payload(&payload).unwrap());

        let name = point.payload.get("repo_name").cloned().unwrap();
        assert_eq!(name.into_json(), json!("tokio-rs/tokio"));
        assert_eq!(from_payload(point.payload).unwrap(), payload);
    }

    #[test]
    fn only_uuid_ids_are_accepted() {
        let id = parse_id(Some(PointId::from(ID.to_string()))).unwrap();
        assert_eq!(id.to_string(), ID);
        assert!(parse_id(Some(PointId::from(7u64))).is_err());
        assert!(parse_id(None).is_err());
    }

    #[test]
    fn dense_vector_is_extracted() {
        let output = VectorsOutput {
            vectors_options: Some(VectorsOptions::Vector(VectorOutput {
                data: vec![0.25, 0.75],
                ..Default::default()
            })),
        };
        assert_eq!(dense_vector(Some(output)), vec![0.25, 0.75]);
        assert!(dense_vector(None).is_empty());
    }

    #[test]
    fn reads_dimensions_of_unnamed_vector() {
        let info = CollectionInfo {
            config: Some(CollectionConfig {
                params: Some(CollectionParams {
                    vectors_config: Some(VectorsConfig {
                        config: Some(VectorsConfigKind::Params(VectorParams {
                            size: 8,
                            distance: Distance::Cosine.into(),
                            ..Default::default()
                        })),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(configured_dims(&info), Some(8));
        assert_eq!(configured_dims(&CollectionInfo::default()), None);
    }

    #[test]
    fn scroll_filter_matches_repo_name_exactly() {
        let filter = repo_filter("a/b");
        assert_eq!(filter.must.len(), 1);
        let Some(ConditionOneOf::Field(field)) = filter.must[0].condition_one_of.clone() else {
            panic!("expected a field condition");
        };
        assert_eq!(field.key, "repo_name");
        assert_eq!(
            field.r#match.and_then(|m| m.match_value),
            Some(MatchValue::Keyword("a/b".into()))
        );
    }

    #[tokio::test]
    async fn connect_is_lazy() {
        let store = QdrantStore::connect("http://localhost:6334", "repos", None).unwrap();
        assert_eq!(store.backend(), "qdrant");
        assert_eq!(store.collection, "repos");
    }
}
