//! Metadata store: repository facts, the ingestion log, the
//! repository↔vector mapping, and contributors.
//!
//! Topics cross this boundary as [`Topics`]; the comma-joined form exists
//! only in the SQL bindings here.

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::error;
use uuid::Uuid;

use github_trend_core::models::{Contributor, RepoRecord, Topics};

/// Whether an upsert created the row or overwrote an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Insert or update one repository keyed by `url`.
///
/// On update `stars_last_update` takes the row's previous `stars` and
/// `stars` takes the incoming value, in the same statement. Insert vs.
/// update is decided by an existence check on the same connection, so
/// call this inside the page transaction.
pub async fn upsert_repository(
    conn: &mut SqliteConnection,
    repo: &RepoRecord,
) -> Result<UpsertOutcome> {
    let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM repositories WHERE url = ?")
        .bind(&repo.url)
        .fetch_one(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO repositories (url, name, description, stars, forks, language,
                                  created_at, updated_at, topics, size, homepage,
                                  owner_type, pushed_at, stars_last_update)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
        ON CONFLICT(url) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            stars_last_update = repositories.stars,
            stars = excluded.stars,
            forks = excluded.forks,
            language = excluded.language,
            updated_at = excluded.updated_at,
            topics = excluded.topics,
            size = excluded.size,
            homepage = excluded.homepage,
            owner_type = excluded.owner_type,
            pushed_at = excluded.pushed_at
        "#,
    )
    .bind(&repo.url)
    .bind(&repo.name)
    .bind(&repo.description)
    .bind(repo.stars)
    .bind(repo.forks)
    .bind(&repo.language)
    .bind(&repo.created_at)
    .bind(&repo.updated_at)
    .bind(repo.topics.to_storage())
    .bind(repo.size)
    .bind(&repo.homepage)
    .bind(&repo.owner_type)
    .bind(&repo.pushed_at)
    .execute(&mut *conn)
    .await?;

    Ok(if exists {
        UpsertOutcome::Updated
    } else {
        UpsertOutcome::Inserted
    })
}

/// Counters of one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub total: i64,
    pub new: i64,
    pub updated: i64,
}

/// Add one run's counters to the cumulative log row for `table`.
///
/// Counters only ever grow. Call once per run.
pub async fn record_ingest_run(pool: &SqlitePool, table: &str, counts: RunCounts) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO ingest_log (table_name, last_update, records_total, records_new, records_updated)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(table_name) DO UPDATE SET
            last_update = excluded.last_update,
            records_total = ingest_log.records_total + excluded.records_total,
            records_new = ingest_log.records_new + excluded.records_new,
            records_updated = ingest_log.records_updated + excluded.records_updated
        "#,
    )
    .bind(table)
    .bind(now)
    .bind(counts.total)
    .bind(counts.new)
    .bind(counts.updated)
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestLogEntry {
    pub table_name: String,
    pub last_update: i64,
    pub records_total: i64,
    pub records_new: i64,
    pub records_updated: i64,
}

pub async fn ingest_log(pool: &SqlitePool) -> Result<Vec<IngestLogEntry>> {
    let rows = sqlx::query(
        "SELECT table_name, last_update, records_total, records_new, records_updated \
         FROM ingest_log ORDER BY table_name",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| IngestLogEntry {
            table_name: row.get("table_name"),
            last_update: row.get("last_update"),
            records_total: row.get("records_total"),
            records_new: row.get("records_new"),
            records_updated: row.get("records_updated"),
        })
        .collect())
}

/// A repository↔vector mapping row. Timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub repo_name: String,
    pub vector_id: Uuid,
    /// Hash of the content the point was embedded from; empty when the
    /// stored vector is a fallback and must be recomputed.
    pub content_hash: String,
    pub created_at: i64,
    pub last_updated: i64,
    /// When the stored star history was last paged from the API. Only a
    /// stargazer fetch moves it; README-only writes keep it.
    pub stars_fetched_at: i64,
}

pub async fn get_mapping(pool: &SqlitePool, repo_name: &str) -> Result<Option<Mapping>> {
    let row = sqlx::query(
        "SELECT repo_name, vector_id, content_hash, created_at, last_updated, stars_fetched_at \
         FROM repo_vector_mapping WHERE repo_name = ?",
    )
    .bind(repo_name)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let vector_id: String = row.get("vector_id");
    Ok(Some(Mapping {
        repo_name: row.get("repo_name"),
        vector_id: Uuid::parse_str(&vector_id)?,
        content_hash: row.get("content_hash"),
        created_at: row.get("created_at"),
        last_updated: row.get("last_updated"),
        stars_fetched_at: row.get("stars_fetched_at"),
    }))
}

/// Insert or refresh a mapping row. `created_at` is kept on update.
pub async fn put_mapping(
    pool: &SqlitePool,
    repo_name: &str,
    vector_id: Uuid,
    content_hash: &str,
    now: i64,
    stars_fetched_at: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO repo_vector_mapping
            (repo_name, vector_id, content_hash, created_at, last_updated, stars_fetched_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(repo_name) DO UPDATE SET
            vector_id = excluded.vector_id,
            content_hash = excluded.content_hash,
            last_updated = excluded.last_updated,
            stars_fetched_at = excluded.stars_fetched_at
        "#,
    )
    .bind(repo_name)
    .bind(vector_id.to_string())
    .bind(content_hash)
    .bind(now)
    .bind(now)
    .bind(stars_fetched_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Refresh the timestamps of an unchanged point.
pub async fn touch_mapping(
    pool: &SqlitePool,
    repo_name: &str,
    now: i64,
    stars_fetched_at: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE repo_vector_mapping SET last_updated = ?, stars_fetched_at = ? WHERE repo_name = ?",
    )
    .bind(now)
    .bind(stars_fetched_at)
    .bind(repo_name)
    .execute(pool)
    .await?;
    Ok(())
}

/// Upsert contributors and their contribution counts for one repository
/// in a single transaction. On failure the transaction is rolled back
/// and the error returned.
pub async fn save_contributors(
    pool: &SqlitePool,
    repo_url: &str,
    contributors: &[Contributor],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    match write_contributors(&mut *tx, repo_url, contributors).await {
        Ok(()) => {
            tx.commit().await?;
            Ok(())
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                error!(repo_url, error = %rollback_err, "contributor rollback failed");
            }
            error!(repo_url, error = %e, "contributor write rolled back");
            Err(e)
        }
    }
}

async fn write_contributors(
    conn: &mut SqliteConnection,
    repo_url: &str,
    contributors: &[Contributor],
) -> Result<()> {
    for c in contributors {
        sqlx::query(
            r#"
            INSERT INTO contributors (url, login, avatar_url)
            VALUES (?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                login = excluded.login,
                avatar_url = excluded.avatar_url
            "#,
        )
        .bind(&c.url)
        .bind(&c.login)
        .bind(&c.avatar_url)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO repo_contributors (contributor_url, repo_url, contributions)
            VALUES (?, ?, ?)
            ON CONFLICT(contributor_url, repo_url) DO UPDATE SET
                contributions = excluded.contributions
            "#,
        )
        .bind(&c.url)
        .bind(repo_url)
        .bind(c.contributions)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Display fields of one repository joined with its top contributors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepoDetails {
    pub name: String,
    pub url: String,
    pub description: String,
    pub stars: i64,
    pub stars_last_update: i64,
    pub forks: i64,
    pub language: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub pushed_at: Option<String>,
    pub topics: Topics,
    pub homepage: String,
    pub owner_type: String,
    pub top_contributors: Vec<Contributor>,
}

/// Look up a repository by its qualified name. `None` if unknown.
pub async fn repo_details(
    pool: &SqlitePool,
    repo_name: &str,
    top_contributors: i64,
) -> Result<Option<RepoDetails>> {
    let row = sqlx::query(
        r#"
        SELECT name, url, description, stars, stars_last_update, forks, language,
               created_at, updated_at, pushed_at, topics, homepage, owner_type
        FROM repositories WHERE name = ?
        ORDER BY stars DESC LIMIT 1
        "#,
    )
    .bind(repo_name)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let url: String = row.get("url");

    let contributor_rows = sqlx::query(
        r#"
        SELECT c.login, c.url, c.avatar_url, rc.contributions
        FROM repo_contributors rc
        JOIN contributors c ON c.url = rc.contributor_url
        WHERE rc.repo_url = ?
        ORDER BY rc.contributions DESC, c.login ASC
        LIMIT ?
        "#,
    )
    .bind(&url)
    .bind(top_contributors)
    .fetch_all(pool)
    .await?;

    let topics: String = row.get("topics");
    Ok(Some(RepoDetails {
        name: row.get("name"),
        url,
        description: row.get("description"),
        stars: row.get("stars"),
        stars_last_update: row.get("stars_last_update"),
        forks: row.get("forks"),
        language: row.get("language"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        pushed_at: row.get("pushed_at"),
        topics: Topics::from_storage(&topics),
        homepage: row.get("homepage"),
        owner_type: row.get("owner_type"),
        top_contributors: contributor_rows
            .iter()
            .map(|r| Contributor {
                login: r.get("login"),
                url: r.get("url"),
                avatar_url: r.get("avatar_url"),
                contributions: r.get("contributions"),
            })
            .collect(),
    }))
}

/// `(name, url)` of repositories created on or after `since` (all
/// repositories when `None`), oldest first.
pub async fn repos_created_since(
    pool: &SqlitePool,
    since: Option<NaiveDate>,
    limit: Option<i64>,
) -> Result<Vec<(String, String)>> {
    let rows = sqlx::query(
        r#"
        SELECT name, url FROM repositories
        WHERE (?1 IS NULL OR created_at >= ?1)
        ORDER BY created_at ASC, name ASC
        LIMIT ?2
        "#,
    )
    .bind(since.map(|d| format!("{} 00:00:00", d.format("%Y-%m-%d"))))
    .bind(limit.unwrap_or(-1))
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|r| (r.get("name"), r.get("url")))
        .collect())
}
