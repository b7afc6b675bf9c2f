//! Windowed repository discovery.
//!
//! Splits a creation-date range into sub-windows (see
//! [`month_windows`]), counts each window, and pages through its search
//! results, upserting every repository into the metadata store. A page
//! is written in one transaction; each item runs in its own savepoint so
//! a malformed item is recorded and skipped without touching the rest.
//!
//! One in-flight request at a time, with `github.request_delay_ms`
//! between requests. Every write is an upsert keyed by URL, so an
//! interrupted run is resumed by running it again.

use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use sqlx::{Connection, SqlitePool};
use tracing::{info, warn};

use github_trend_core::window::{month_windows, DateWindow};

use crate::config::Config;
use crate::github::{parse_search_item, RepoSource};
use crate::metadata::{record_ingest_run, upsert_repository, RunCounts, UpsertOutcome};
use crate::progress::{ProgressEvent, ProgressReporter};

/// The search endpoint serves at most this many results per query.
pub const SEARCH_RESULT_CAP: u64 = 1000;

/// Ingest log key for discovery runs.
pub const REPOSITORIES_TABLE: &str = "repositories";

/// A search item that could not be extracted or written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub repo: String,
    pub url: String,
    pub error: String,
    pub page: u32,
}

/// A search page that could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPage {
    pub window: String,
    pub page: u32,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    pub total: i64,
    pub new: i64,
    pub updated: i64,
    pub errors: Vec<ItemError>,
    pub windows_scanned: usize,
    pub windows_skipped: usize,
    pub failed_pages: Vec<FailedPage>,
}

impl DiscoveryReport {
    pub fn counts(&self) -> RunCounts {
        RunCounts {
            total: self.total,
            new: self.new,
            updated: self.updated,
        }
    }
}

/// Number of pages to request for a window with `count` results.
pub fn pages_for(count: u64, per_page: u32, max_pages: u32) -> u32 {
    let per_page = u64::from(per_page.max(1));
    let reachable = count.min(SEARCH_RESULT_CAP);
    let pages = reachable.div_ceil(per_page);
    pages.min(u64::from(max_pages)) as u32
}

async fn pause(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

/// Discover repositories created between `start` and `end` (inclusive).
///
/// `max_pages` overrides `github.max_pages` for this run. The ingestion
/// log receives exactly one additive write at the end of the run.
pub async fn run_discovery(
    config: &Config,
    pool: &SqlitePool,
    source: &dyn RepoSource,
    start: NaiveDate,
    end: NaiveDate,
    max_pages: Option<u32>,
    progress: &dyn ProgressReporter,
) -> Result<DiscoveryReport> {
    let gh = &config.github;
    let max_pages = max_pages.unwrap_or(gh.max_pages);
    let windows = month_windows(start, end);
    let mut report = DiscoveryReport::default();

    info!(%start, %end, windows = windows.len(), "starting discovery");

    for (i, window) in windows.iter().enumerate() {
        let query = window.query(gh.min_stars);

        let count = match source.count_repositories(&query).await {
            Ok(count) => count,
            Err(e) => {
                warn!(%window, error = %e, "count query failed; skipping window");
                report.windows_skipped += 1;
                pause(gh.request_delay_ms).await;
                continue;
            }
        };
        pause(gh.request_delay_ms).await;

        progress.report(ProgressEvent::Window {
            window: window.to_string(),
            count,
            index: i + 1,
            windows: windows.len(),
        });

        if count == 0 {
            info!(%window, "no repositories; skipping window");
            report.windows_skipped += 1;
            continue;
        }
        if count > SEARCH_RESULT_CAP {
            warn!(%window, count, "window exceeds the search result cap; results truncated");
        }

        scan_window(
            pool,
            source,
            window,
            &query,
            count,
            max_pages,
            gh.per_page,
            gh.request_delay_ms,
            &mut report,
        )
        .await?;
        report.windows_scanned += 1;
    }

    record_ingest_run(pool, REPOSITORIES_TABLE, report.counts()).await?;

    info!(
        total = report.total,
        new = report.new,
        updated = report.updated,
        errors = report.errors.len(),
        failed_pages = report.failed_pages.len(),
        "discovery finished"
    );
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
async fn scan_window(
    pool: &SqlitePool,
    source: &dyn RepoSource,
    window: &DateWindow,
    query: &str,
    count: u64,
    max_pages: u32,
    per_page: u32,
    delay_ms: u64,
    report: &mut DiscoveryReport,
) -> Result<()> {
    let pages = pages_for(count, per_page, max_pages);

    for page in 1..=pages {
        let result = source.search_repositories(query, page).await;
        pause(delay_ms).await;

        let search_page = match result {
            Ok(p) => p,
            Err(e) => {
                warn!(%window, page, error = %e, "search page failed");
                report.failed_pages.push(FailedPage {
                    window: window.to_string(),
                    page,
                    error: e.to_string(),
                });
                continue;
            }
        };

        if search_page.items.is_empty() {
            break;
        }

        let before = (report.total, report.errors.len());
        write_page(pool, &search_page.items, page, report).await?;
        info!(
            %window,
            page,
            pages,
            written = report.total - before.0,
            errors = report.errors.len() - before.1,
            "page committed"
        );
    }
    Ok(())
}

/// Upsert one page of raw search items in a single transaction.
async fn write_page(
    pool: &SqlitePool,
    items: &[Value],
    page: u32,
    report: &mut DiscoveryReport,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    for item in items {
        let mut savepoint = Connection::begin(&mut *tx).await?;

        let written = match parse_search_item(item) {
            Ok(record) => upsert_repository(&mut *savepoint, &record).await,
            Err(e) => Err(e),
        };

        match written {
            Ok(outcome) => {
                savepoint.commit().await?;
                report.total += 1;
                match outcome {
                    UpsertOutcome::Inserted => report.new += 1,
                    UpsertOutcome::Updated => report.updated += 1,
                }
            }
            Err(e) => {
                savepoint.rollback().await?;
                let error = ItemError {
                    repo: item_field(item, "full_name"),
                    url: item_field(item, "html_url"),
                    error: format!("{:#}", e),
                    page,
                };
                warn!(repo = %error.repo, page, error = %error.error, "skipping repository");
                report.errors.push(error);
            }
        }
    }

    tx.commit().await?;
    Ok(())
}

fn item_field(item: &Value, key: &str) -> String {
    item.get(key)
        .and_then(Value::as_str)
        .unwrap_or("<unknown>")
        .to_string()
}
