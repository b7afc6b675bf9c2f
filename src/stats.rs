//! Database statistics and ingestion overview.
//!
//! Summarizes what has been collected: row counts per table, how many
//! repositories have a vector point, how many of those still carry a
//! fallback embedding, and the cumulative ingestion log. Used by
//! `gtrend stats`.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::metadata::{ingest_log, IngestLogEntry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub repositories: i64,
    pub contributors: i64,
    pub repo_contributors: i64,
    pub mapped: i64,
    /// Mapping rows whose point holds a zero fallback vector.
    pub degraded: i64,
    pub ingest_log: Vec<IngestLogEntry>,
}

async fn count(pool: &SqlitePool, sql: &str) -> Result<i64> {
    Ok(sqlx::query_scalar(sql).fetch_one(pool).await?)
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<Stats> {
    Ok(Stats {
        repositories: count(pool, "SELECT COUNT(*) FROM repositories").await?,
        contributors: count(pool, "SELECT COUNT(*) FROM contributors").await?,
        repo_contributors: count(pool, "SELECT COUNT(*) FROM repo_contributors").await?,
        mapped: count(pool, "SELECT COUNT(*) FROM repo_vector_mapping").await?,
        degraded: count(
            pool,
            "SELECT COUNT(*) FROM repo_vector_mapping WHERE content_hash = ''",
        )
        .await?,
        ingest_log: ingest_log(pool).await?,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("github-trend — Database Stats");
    println!("=============================");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!("  Vector store:  {} ({})", config.vector.backend, config.vector.collection);
    println!();
    println!("  Repositories:  {}", stats.repositories);
    println!("  Contributors:  {}", stats.contributors);
    println!("  Contributions: {}", stats.repo_contributors);
    println!(
        "  Indexed:       {} / {} ({}%)",
        stats.mapped,
        stats.repositories,
        if stats.repositories > 0 {
            (stats.mapped * 100) / stats.repositories
        } else {
            0
        }
    );
    if stats.degraded > 0 {
        println!("  Degraded:      {} (zero-vector fallback)", stats.degraded);
    }

    if !stats.ingest_log.is_empty() {
        println!();
        println!("  Ingestion log:");
        println!(
            "  {:<20} {:>10} {:>10} {:>10}   {}",
            "TABLE", "TOTAL", "NEW", "UPDATED", "LAST RUN"
        );
        println!("  {}", "-".repeat(72));
        for entry in &stats.ingest_log {
            println!(
                "  {:<20} {:>10} {:>10} {:>10}   {}",
                entry.table_name,
                entry.records_total,
                entry.records_new,
                entry.records_updated,
                format_ts_relative(entry.last_update)
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }
    match delta {
        0..=59 => "just now".to_string(),
        60..=3599 => plural(delta / 60, "min"),
        3600..=86399 => plural(delta / 3600, "hour"),
        _ if delta < 86400 * 30 => plural(delta / 86400, "day"),
        _ => format_ts_iso(ts),
    }
}

fn plural(n: i64, unit: &str) -> String {
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
