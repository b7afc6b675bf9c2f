//! Core data models used throughout github-trend.
//!
//! These types represent the repository facts, contributors, and vector
//! points that flow through the ingestion and retrieval pipeline.

use std::fmt;

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::star_history::StarHistory;

/// Storage format for every repository timestamp.
pub const DB_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Repository topics as an ordered set of tags.
///
/// Insertion order is preserved and duplicates are dropped. The
/// comma-joined form only exists at the storage boundary
/// ([`Topics::to_storage`] / [`Topics::from_storage`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topics(Vec<String>);

impl Topics {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Add a tag. Blank tags and duplicates are ignored.
    pub fn insert(&mut self, tag: &str) -> bool {
        let tag = tag.trim();
        if tag.is_empty() || self.0.iter().any(|t| t == tag) {
            return false;
        }
        self.0.push(tag.to_string());
        true
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|t| t == tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialize as the comma-joined column value.
    pub fn to_storage(&self) -> String {
        self.0.join(",")
    }

    /// Parse a comma-joined column value. Empty input yields no topics.
    pub fn from_storage(raw: &str) -> Self {
        raw.split(',').collect()
    }
}

impl<'a> FromIterator<&'a str> for Topics {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut topics = Topics::new();
        for tag in iter {
            topics.insert(tag);
        }
        topics
    }
}

/// A repository row in the metadata store, keyed by `url`.
///
/// `stars_last_update` is owned by the store: it is set from the prior
/// `stars` value whenever a row is overwritten, so it is not part of the
/// incoming record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoRecord {
    /// Qualified name, `owner/repo`.
    pub name: String,
    pub url: String,
    pub description: String,
    pub stars: i64,
    pub forks: i64,
    pub language: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub topics: Topics,
    pub size: i64,
    pub homepage: String,
    pub owner_type: String,
    pub pushed_at: Option<String>,
}

/// A contributor of one repository, as returned by the contributors feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contributor {
    pub login: String,
    /// Profile URL; the contributor's identity.
    pub url: String,
    pub avatar_url: String,
    pub contributions: i64,
}

/// Payload stored next to each vector point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoPayload {
    pub repo_name: String,
    pub readme_content: String,
    #[serde(default)]
    pub star_history: StarHistory,
    /// RFC 3339 timestamp of the write.
    pub last_updated: String,
}

/// One point of the vector collection: one per repository.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    pub id: Uuid,
    /// Empty when a backend returns the point without its vector.
    pub vector: Vec<f32>,
    pub payload: RepoPayload,
}

/// A nearest-neighbor hit. `score` is the raw similarity from the index.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: Uuid,
    pub score: f32,
    pub payload: RepoPayload,
}

/// Deterministic vector-store identifier for a repository.
///
/// UUID v5 in the URL namespace over `github.com/{repo_name}`, so the id
/// can always be recomputed without consulting the mapping table.
pub fn vector_id(repo_name: &str) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("github.com/{}", repo_name).as_bytes(),
    )
}

/// Fingerprint of the content a vector point was embedded from.
pub fn content_hash(readme: &str, history: &StarHistory) -> String {
    let mut hasher = Sha256::new();
    hasher.update(readme.as_bytes());
    hasher.update([0u8]);
    for (date, count) in history.iter() {
        hasher.update(date.to_string().as_bytes());
        hasher.update(count.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Error returned when a timestamp matches none of the accepted formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampError(pub String);

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized timestamp: '{}'", self.0)
    }
}

impl std::error::Error for TimestampError {}

/// Normalize an API timestamp to [`DB_DATETIME_FORMAT`] (UTC).
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD`,
/// `DD/MM/YYYY HH:MM:SS` and `DD/MM/YYYY`. Empty input maps to `None`.
pub fn normalize_timestamp(raw: &str) -> Result<Option<String>, TimestampError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(
            dt.naive_utc().format(DB_DATETIME_FORMAT).to_string(),
        ));
    }

    for fmt in [DB_DATETIME_FORMAT, "%d/%m/%Y %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(Some(dt.format(DB_DATETIME_FORMAT).to_string()));
        }
    }

    for fmt in ["%Y-%m-%d", "%d/%m/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            if let Some(dt) = d.and_hms_opt(0, 0, 0) {
                return Ok(Some(dt.format(DB_DATETIME_FORMAT).to_string()));
            }
        }
    }

    Err(TimestampError(raw.to_string()))
}

/// Parse a `YYYY-MM-DD` date argument.
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        Ok(d) => Ok(d),
        Err(_) => bail!("invalid date '{}': expected YYYY-MM-DD", raw),
    }
}
