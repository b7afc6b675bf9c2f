//! Schema creation. Every statement is `IF NOT EXISTS`, so running it on
//! an existing database is a no-op.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes on an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Repository facts, keyed by html url
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repositories (
            url TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            stars INTEGER NOT NULL DEFAULT 0,
            forks INTEGER NOT NULL DEFAULT 0,
            language TEXT,
            created_at TEXT,
            updated_at TEXT,
            topics TEXT NOT NULL DEFAULT '',
            size INTEGER NOT NULL DEFAULT 0,
            homepage TEXT NOT NULL DEFAULT '',
            owner_type TEXT NOT NULL DEFAULT '',
            pushed_at TEXT,
            stars_last_update INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Cumulative run counters per logical table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_log (
            table_name TEXT PRIMARY KEY,
            last_update INTEGER NOT NULL,
            records_total INTEGER NOT NULL DEFAULT 0,
            records_new INTEGER NOT NULL DEFAULT 0,
            records_updated INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Repository -> vector point
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repo_vector_mapping (
            repo_name TEXT PRIMARY KEY,
            vector_id TEXT NOT NULL,
            content_hash TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            last_updated INTEGER NOT NULL,
            stars_fetched_at INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Databases created before the star clock was split from last_updated
    if !has_column(pool, "repo_vector_mapping", "stars_fetched_at").await? {
        sqlx::query(
            "ALTER TABLE repo_vector_mapping \
             ADD COLUMN stars_fetched_at INTEGER NOT NULL DEFAULT 0",
        )
        .execute(pool)
        .await?;
        sqlx::query("UPDATE repo_vector_mapping SET stars_fetched_at = last_updated")
            .execute(pool)
            .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contributors (
            url TEXT PRIMARY KEY,
            login TEXT NOT NULL,
            avatar_url TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repo_contributors (
            contributor_url TEXT NOT NULL,
            repo_url TEXT NOT NULL,
            contributions INTEGER NOT NULL DEFAULT 0,
            UNIQUE(contributor_url, repo_url)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Points for the sqlite vector backend
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_points (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            repo_name TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            payload_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (collection, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_collections (
            name TEXT PRIMARY KEY,
            dims INTEGER NOT NULL,
            distance TEXT NOT NULL DEFAULT 'cosine'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_repositories_name ON repositories(name)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_repositories_created_at ON repositories(created_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_repo_contributors_repo ON repo_contributors(repo_url)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vector_points_repo ON vector_points(collection, repo_name)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn has_column(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    let found: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
            .bind(table)
            .bind(column)
            .fetch_one(pool)
            .await?;
    Ok(found > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn adds_star_clock_to_existing_mapping_table() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE repo_vector_mapping (repo_name TEXT PRIMARY KEY, vector_id TEXT NOT NULL, \
             content_hash TEXT NOT NULL DEFAULT '', created_at INTEGER NOT NULL, \
             last_updated INTEGER NOT NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO repo_vector_mapping VALUES ('a/b', 'x', 'h', 10, 500)")
            .execute(&pool)
            .await
            .unwrap();

        apply(&pool).await.unwrap();
        apply(&pool).await.unwrap();

        let fetched: i64 = sqlx::query_scalar(
            "SELECT stars_fetched_at FROM repo_vector_mapping WHERE repo_name = 'a/b'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(fetched, 500);
    }
}
