//! Per-repository enrichment.
//!
//! For one repository: fetch the README and contributors, rebuild the
//! star history, and keep the vector store, the mapping table and the
//! metadata store convergent. The mapping row is the freshness record:
//! a repository whose stars were paged less than
//! `enrichment.freshness_hours` ago reuses the star history (and, unless
//! asked, the README) stored in its vector point instead of paging
//! through stargazers again. Only a stargazer fetch moves that clock, so
//! README renewal never postpones the next star refresh.
//!
//! Write order is point first, mapping second. A mapping row therefore
//! never refers to a point that was not written.

use std::time::Duration;

use anyhow::Result;
use chrono::{NaiveDate, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use github_trend_core::markdown::clean_markdown;
use github_trend_core::models::{content_hash, vector_id, Contributor, RepoPayload, VectorPoint};
use github_trend_core::star_history::{pages_needed, StarHistory};
use github_trend_core::store::VectorStore;

use crate::config::Config;
use crate::embedding::{create_embedding, EmbeddingProvider};
use crate::github::{RepoSource, DETAIL_PAGE_SIZE};
use crate::metadata::{
    get_mapping, put_mapping, repos_created_since, save_contributors, touch_mapping, Mapping,
};
use crate::progress::{ProgressEvent, ProgressReporter};

/// Everything one enrichment pass needs. Borrowed for the whole run.
pub struct EnrichContext<'a> {
    pub config: &'a Config,
    pub pool: &'a SqlitePool,
    pub source: &'a dyn RepoSource,
    pub vectors: &'a dyn VectorStore,
    pub embedder: &'a dyn EmbeddingProvider,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrichOptions {
    /// Ignore the freshness window and refetch everything.
    pub renew: bool,
    /// Refetch the README even when the cached point is fresh.
    pub renew_readme: bool,
}

/// What happened to one repository.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichOutcome {
    pub name: String,
    pub contributors: usize,
    pub star_history: StarHistory,
    pub readme: String,
    /// Stargazer paging stopped at the page ceiling; the history is
    /// empty or partial.
    pub exceeded_limit: bool,
    pub refetched_stars: bool,
    pub refetched_readme: bool,
    /// A new embedding and point were written.
    pub wrote_vector: bool,
    /// The written vector is the zero fallback.
    pub embedding_degraded: bool,
}

async fn pause(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

fn is_fresh(mapping: &Mapping, now: i64, freshness_hours: i64) -> bool {
    now - mapping.stars_fetched_at <= freshness_hours * 3600
}

/// Enrich one repository and write its vector point and mapping.
pub async fn enrich_repository(
    ctx: &EnrichContext<'_>,
    name: &str,
    url: &str,
    opts: EnrichOptions,
) -> Result<EnrichOutcome> {
    let settings = &ctx.config.enrichment;
    let now = Utc::now().timestamp();

    let mapping = get_mapping(ctx.pool, name).await?;

    let cached = match &mapping {
        Some(m) if !opts.renew && is_fresh(m, now, settings.freshness_hours) => {
            match ctx.vectors.retrieve(m.vector_id).await {
                Ok(Some(point)) => Some(point.payload),
                Ok(None) => {
                    warn!(repo = name, "fresh mapping without a vector point; refetching");
                    None
                }
                Err(e) => {
                    warn!(repo = name, error = %e, "cached point unavailable; refetching");
                    None
                }
            }
        }
        _ => None,
    };

    let refetched_readme = opts.renew_readme || cached.is_none();
    let readme = match &cached {
        Some(payload) if !refetched_readme => payload.readme_content.clone(),
        _ => fetch_readme(ctx.source, name).await,
    };

    let contributors = fetch_contributors(ctx.source, name, settings.page_delay_ms).await;
    if !contributors.is_empty() {
        if let Err(e) = save_contributors(ctx.pool, url, &contributors).await {
            warn!(repo = name, error = %e, "contributors not saved; continuing");
        }
    }

    let refetched_stars = cached.is_none();
    let (star_history, exceeded_limit) = match cached {
        Some(payload) => (payload.star_history, false),
        None => fetch_star_history(ctx, name).await,
    };

    let mut outcome = EnrichOutcome {
        name: name.to_string(),
        contributors: contributors.len(),
        star_history,
        readme,
        exceeded_limit,
        refetched_stars,
        refetched_readme,
        wrote_vector: false,
        embedding_degraded: false,
    };

    if refetched_stars || refetched_readme {
        write_point(ctx, mapping.as_ref(), &mut outcome, now).await?;
    }

    Ok(outcome)
}

/// Convergent write of the point and its mapping.
///
/// Unchanged content with an existing point only refreshes the mapping
/// timestamp. A degraded embedding is stored with an empty content hash
/// so the next run embeds again.
async fn write_point(
    ctx: &EnrichContext<'_>,
    mapping: Option<&Mapping>,
    outcome: &mut EnrichOutcome,
    now: i64,
) -> Result<()> {
    let id = vector_id(&outcome.name);
    let hash = content_hash(&outcome.readme, &outcome.star_history);
    let stars_fetched_at = match mapping {
        Some(m) if !outcome.refetched_stars => m.stars_fetched_at,
        _ => now,
    };

    if let Some(m) = mapping {
        if !m.content_hash.is_empty()
            && m.content_hash == hash
            && ctx.vectors.retrieve(id).await?.is_some()
        {
            touch_mapping(ctx.pool, &outcome.name, now, stars_fetched_at).await?;
            info!(repo = %outcome.name, "content unchanged; mapping refreshed");
            return Ok(());
        }
    }

    let embedded = create_embedding(
        ctx.embedder,
        &outcome.readme,
        ctx.config.embedding.max_chars,
    )
    .await;

    let point = VectorPoint {
        id,
        vector: embedded.vector,
        payload: RepoPayload {
            repo_name: outcome.name.clone(),
            readme_content: outcome.readme.clone(),
            star_history: outcome.star_history.clone(),
            last_updated: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        },
    };
    ctx.vectors.upsert(&point).await?;

    let stored_hash = if embedded.degraded { "" } else { hash.as_str() };
    put_mapping(ctx.pool, &outcome.name, id, stored_hash, now, stars_fetched_at).await?;

    outcome.wrote_vector = true;
    outcome.embedding_degraded = embedded.degraded;
    Ok(())
}

async fn fetch_readme(source: &dyn RepoSource, name: &str) -> String {
    match source.readme(name).await {
        Ok(Some(raw)) => clean_markdown(&raw),
        Ok(None) => String::new(),
        Err(e) => {
            warn!(repo = name, error = %e, "README fetch failed");
            String::new()
        }
    }
}

/// All contributors, paging until a short or empty page. A failed page
/// ends paging with what was collected so far.
async fn fetch_contributors(
    source: &dyn RepoSource,
    name: &str,
    page_delay_ms: u64,
) -> Vec<Contributor> {
    let mut all = Vec::new();
    let mut page = 1;
    loop {
        match source.contributors(name, page).await {
            Ok(batch) => {
                let short = batch.len() < DETAIL_PAGE_SIZE as usize;
                all.extend(batch);
                if short {
                    break;
                }
            }
            Err(e) => {
                warn!(repo = name, page, error = %e, "contributors page failed");
                break;
            }
        }
        page += 1;
        pause(page_delay_ms).await;
    }
    all
}

/// Daily star counts, and whether the page ceiling was hit.
///
/// A full page at the ceiling is only a truncation if more stars exist:
/// the known count decides, and without one page `ceiling + 1` is
/// checked for emptiness.
async fn fetch_star_history(ctx: &EnrichContext<'_>, name: &str) -> (StarHistory, bool) {
    let settings = &ctx.config.enrichment;
    let ceiling = settings.star_history_max_pages;

    let known_stars = match ctx.source.repository_stars(name).await {
        Ok(Some(stars)) if pages_needed(stars, DETAIL_PAGE_SIZE) > ceiling => {
            warn!(
                repo = name,
                stars,
                ceiling,
                "star history exceeds the page ceiling; skipping"
            );
            return (StarHistory::default(), true);
        }
        Ok(stars) => stars,
        Err(e) => {
            warn!(repo = name, error = %e, "star count lookup failed; paging anyway");
            None
        }
    };
    pause(settings.page_delay_ms).await;

    let mut history = StarHistory::default();
    let mut page: u64 = 1;
    while page <= ceiling {
        match ctx.source.stargazers(name, page_no(page)).await {
            Ok(timestamps) => {
                for ts in &timestamps {
                    history.record_timestamp(ts);
                }
                if timestamps.len() < DETAIL_PAGE_SIZE as usize {
                    return (history, false);
                }
            }
            Err(e) => {
                warn!(repo = name, page, error = %e, "stargazers page failed; history is partial");
                return (history, false);
            }
        }
        page += 1;
        pause(settings.page_delay_ms).await;
    }

    let truncated = match known_stars {
        Some(stars) => stars > ceiling * u64::from(DETAIL_PAGE_SIZE),
        None => match ctx.source.stargazers(name, page_no(page)).await {
            Ok(more) => !more.is_empty(),
            Err(e) => {
                warn!(repo = name, page, error = %e, "could not check past the page ceiling");
                true
            }
        },
    };
    if truncated {
        warn!(repo = name, ceiling, "stopped at the page ceiling; history is partial");
    }
    (history, truncated)
}

fn page_no(page: u64) -> u32 {
    u32::try_from(page).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichReport {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub vectors_written: usize,
    pub degraded: usize,
    pub exceeded_limit_repos: Vec<String>,
}

/// Enrich every repository created on or after `since` (all when
/// `None`), one at a time.
///
/// A failing repository is logged and counted; the loop always goes on.
pub async fn run_enrichment(
    ctx: &EnrichContext<'_>,
    since: Option<NaiveDate>,
    limit: Option<i64>,
    opts: EnrichOptions,
    progress: &dyn ProgressReporter,
) -> Result<EnrichReport> {
    let repos = repos_created_since(ctx.pool, since, limit).await?;
    let mut report = EnrichReport {
        total: repos.len(),
        ..Default::default()
    };
    info!(since = ?since, repos = repos.len(), "starting enrichment");

    for (i, (name, url)) in repos.iter().enumerate() {
        if i > 0 {
            pause(ctx.config.enrichment.repo_delay_ms).await;
        }
        progress.report(ProgressEvent::Enriching {
            repo: name.clone(),
            n: i as u64 + 1,
            total: repos.len() as u64,
        });

        match enrich_repository(ctx, name, url, opts).await {
            Ok(outcome) => {
                report.success += 1;
                if outcome.wrote_vector {
                    report.vectors_written += 1;
                }
                if outcome.embedding_degraded {
                    report.degraded += 1;
                }
                if outcome.exceeded_limit {
                    report.exceeded_limit_repos.push(outcome.name);
                }
            }
            Err(e) => {
                error!(repo = %name, error = %format!("{:#}", e), "enrichment failed");
                report.failed += 1;
            }
        }
    }

    info!(
        success = report.success,
        failed = report.failed,
        exceeded = report.exceeded_limit_repos.len(),
        "enrichment finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn mapping(stars_fetched_at: i64) -> Mapping {
        Mapping {
            repo_name: "a/b".into(),
            vector_id: Uuid::nil(),
            content_hash: String::new(),
            created_at: 0,
            last_updated: 0,
            stars_fetched_at,
        }
    }

    #[test]
    fn freshness_window_is_inclusive() {
        let now = 100 * 3600;
        assert!(is_fresh(&mapping(now - 12 * 3600), now, 24));
        assert!(is_fresh(&mapping(now - 24 * 3600), now, 24));
        assert!(!is_fresh(&mapping(now - 36 * 3600), now, 24));
        assert!(!is_fresh(&mapping(now - 1), now, 0));
    }

    #[test]
    fn freshness_follows_the_star_clock_not_last_updated() {
        let now = 100 * 3600;
        let m = Mapping {
            last_updated: now,
            ..mapping(now - 30 * 3600)
        };
        assert!(!is_fresh(&m, now, 24));
    }
}
