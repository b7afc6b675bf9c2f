//! CLI command runners.
//!
//! Each `run_*` function opens what it needs from configuration, does
//! one unit of work and prints a summary to stdout. Progress and logs go
//! to stderr.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::analytics;
use crate::answer::answer;
use crate::completion::create_completion;
use crate::config::Config;
use crate::db;
use crate::discover::{run_discovery, ItemError};
use crate::embedding::create_provider;
use crate::enrich::{run_enrichment, EnrichContext, EnrichOptions};
use crate::github::GitHubClient;
use crate::progress::ProgressMode;
use crate::retrieval::Retriever;
use crate::server::AppState;
use crate::vector_store::create_vector_store;

pub async fn run_discover(
    config: &Config,
    start: NaiveDate,
    end: NaiveDate,
    max_pages: Option<u32>,
    errors_path: Option<&Path>,
    progress: ProgressMode,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let client = GitHubClient::new(&config.github)?;
    let reporter = progress.reporter();

    let report = run_discovery(
        config,
        &pool,
        &client,
        start,
        end,
        max_pages,
        reporter.as_ref(),
    )
    .await?;

    println!("discover {}..{}", start, end);
    println!("  windows scanned: {}", report.windows_scanned);
    println!("  windows skipped: {}", report.windows_skipped);
    println!("  repositories:    {}", report.total);
    println!("  new:             {}", report.new);
    println!("  updated:         {}", report.updated);
    println!("  item errors:     {}", report.errors.len());
    println!("  failed pages:    {}", report.failed_pages.len());

    if let Some(path) = errors_path {
        if !report.errors.is_empty() {
            write_item_errors(path, &report.errors)?;
            println!("  errors written:  {}", path.display());
        }
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

/// One JSON object per line.
fn write_item_errors(path: &Path, errors: &[ItemError]) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = std::io::BufWriter::new(file);
    for e in errors {
        serde_json::to_writer(&mut out, e)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

pub async fn run_enrich(
    config: &Config,
    since: Option<NaiveDate>,
    renew: bool,
    no_readme: bool,
    limit: Option<i64>,
    progress: ProgressMode,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let client = GitHubClient::new(&config.github)?;
    let embedder = create_provider(&config.embedding)?;
    let vectors = create_vector_store(config, &pool).await?;
    let reporter = progress.reporter();

    let ctx = EnrichContext {
        config,
        pool: &pool,
        source: &client,
        vectors: vectors.as_ref(),
        embedder: embedder.as_ref(),
    };
    let opts = EnrichOptions {
        renew,
        renew_readme: config.enrichment.renew_readme && !no_readme,
    };

    let report = run_enrichment(&ctx, since, limit, opts, reporter.as_ref()).await?;

    println!("enrich");
    println!("  repositories:    {}", report.total);
    println!("  succeeded:       {}", report.success);
    println!("  failed:          {}", report.failed);
    println!("  vectors written: {}", report.vectors_written);
    if report.degraded > 0 {
        println!("  zero vectors:    {}", report.degraded);
    }
    if !report.exceeded_limit_repos.is_empty() {
        println!("  exceeded page ceiling:");
        for name in &report.exceeded_limit_repos {
            println!("    {}", name);
        }
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

/// Shared state for `search`, `ask` and `serve`.
pub async fn build_state(config: &Config) -> Result<AppState> {
    let config = Arc::new(config.clone());
    let pool = db::connect(&config).await?;
    let embedder = create_provider(&config.embedding)?;
    let vectors = create_vector_store(&config, &pool).await?;
    let completion = create_completion(&config.completion)?;
    let retriever = Retriever::new(config.clone(), pool.clone(), vectors, embedder);

    Ok(AppState {
        config,
        pool,
        retriever,
        completion,
    })
}

pub async fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    let state = build_state(config).await?;
    let limit = limit.unwrap_or(config.retrieval.limit);
    let results = state.retriever.search(query, limit).await?;

    if results.is_empty() {
        println!("No results.");
    }
    for (i, r) in results.iter().enumerate() {
        println!("{}. [{:.3}] {}", i + 1, r.score, r.repo_name);
        if let Some(d) = &r.details {
            println!(
                "    stars: {}  forks: {}  language: {}",
                d.stars,
                d.forks,
                d.language.as_deref().unwrap_or("-")
            );
            if !d.description.is_empty() {
                println!("    {}", d.description);
            }
        }
        if !r.readme_excerpt.is_empty() {
            let excerpt: String = r.readme_excerpt.chars().take(160).collect();
            println!("    > {}", excerpt);
        }
        println!();
    }

    state.pool.close().await;
    Ok(())
}

pub async fn run_ask(config: &Config, query: &str, context: Option<&str>) -> Result<()> {
    let state = build_state(config).await?;
    let text = answer(&state.retriever, state.completion.as_ref(), query, context).await;
    println!("{}", text);
    state.pool.close().await;
    Ok(())
}

/// Which analytics view to print.
#[derive(Debug, Clone)]
pub enum AnalyticsView {
    Years { min_stars: i64, min_forks: i64 },
    Languages { top: i64, percentage: bool },
    Topics { begin_year: Option<i32>, end_year: Option<i32>, limit: usize },
    Communities,
    Growth { year: Option<i32> },
    Stars { repo: String },
    Contributors { limit: i64 },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print one analytics view as JSON.
pub async fn run_analytics(config: &Config, view: AnalyticsView) -> Result<()> {
    let pool = db::connect(config).await?;

    match view {
        AnalyticsView::Years {
            min_stars,
            min_forks,
        } => print_json(&analytics::repo_counts_by_year(&pool, min_stars, min_forks).await?)?,
        AnalyticsView::Languages { top, percentage } => {
            print_json(&analytics::language_share_by_year(&pool, top, percentage).await?)?
        }
        AnalyticsView::Topics {
            begin_year,
            end_year,
            limit,
        } => {
            let mut topics = analytics::topic_counts(&pool, begin_year, end_year).await?;
            topics.truncate(limit);
            print_json(&topics)?
        }
        AnalyticsView::Communities => {
            print_json(&analytics::topic_communities(&pool, &config.analytics).await?)?
        }
        AnalyticsView::Growth { year } => {
            let year = year.unwrap_or_else(|| chrono::Utc::now().year());
            match analytics::fastest_growing(&pool, year).await? {
                Some(leader) => print_json(&leader)?,
                None => println!("No repositories created in {}.", year),
            }
        }
        AnalyticsView::Stars { repo } => {
            let vectors = create_vector_store(config, &pool).await?;
            match analytics::star_series(vectors.as_ref(), &repo).await? {
                Some(series) => print_json(&series)?,
                None => println!("No star history for {}.", repo),
            }
        }
        AnalyticsView::Contributors { limit } => {
            print_json(&analytics::top_contributors(&pool, limit).await?)?
        }
    }

    pool.close().await;
    Ok(())
}

pub async fn run_rate_limit(config: &Config) -> Result<()> {
    let client = GitHubClient::new(&config.github)?;
    let statuses = client.rate_limit().await?;

    println!("{:<10} {:>8} {:>10}   {}", "RESOURCE", "LIMIT", "REMAINING", "RESETS");
    for s in &statuses {
        let reset = chrono::DateTime::from_timestamp(s.reset, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| s.reset.to_string());
        println!(
            "{:<10} {:>8} {:>10}   {}",
            s.resource, s.limit, s.remaining, reset
        );
    }
    Ok(())
}
