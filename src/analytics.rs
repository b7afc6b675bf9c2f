//! Aggregates over the metadata and vector stores, shaped for charts.
//!
//! Every function returns plain serializable data; rendering is left to
//! whoever consumes the CLI or HTTP output.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use github_trend_core::graph::{CommunityGraph, TopicGraph};
use github_trend_core::models::Topics;
use github_trend_core::star_history::StarPoint;
use github_trend_core::store::VectorStore;

use crate::config::AnalyticsConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YearCount {
    pub year: i32,
    pub count: i64,
}

/// Repositories per creation year with at least `min_stars` stars and
/// `min_forks` forks.
pub async fn repo_counts_by_year(
    pool: &SqlitePool,
    min_stars: i64,
    min_forks: i64,
) -> Result<Vec<YearCount>> {
    let rows = sqlx::query(
        r#"
        SELECT CAST(substr(created_at, 1, 4) AS INTEGER) AS year, COUNT(*) AS num
        FROM repositories
        WHERE stars >= ? AND forks >= ? AND created_at IS NOT NULL
        GROUP BY year
        ORDER BY year
        "#,
    )
    .bind(min_stars)
    .bind(min_forks)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|r| YearCount {
            year: r.get::<i64, _>("year") as i32,
            count: r.get("num"),
        })
        .collect())
}

/// Language groups for one year. Values are counts, or percentages of
/// the year's total when requested.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearLanguages {
    pub year: i32,
    pub groups: BTreeMap<String, f64>,
}

/// Language share per creation year.
///
/// Empty language is grouped as `non-code`; JavaScript/TypeScript and
/// C/C++/C# are merged; the `top` most common languages are kept and the
/// rest folded into `others`. Every year carries every group (missing
/// ones as 0).
pub async fn language_share_by_year(
    pool: &SqlitePool,
    top: i64,
    percentage: bool,
) -> Result<Vec<YearLanguages>> {
    let rows = sqlx::query(
        r#"
        WITH top_languages AS (
            SELECT language FROM repositories
            WHERE language IS NOT NULL AND language <> ''
            GROUP BY language
            ORDER BY COUNT(*) DESC
            LIMIT ?
        )
        SELECT
            CASE
                WHEN language IS NULL OR language = '' THEN 'non-code'
                WHEN language IN ('JavaScript', 'TypeScript') THEN 'JavaScript/TypeScript'
                WHEN language IN ('C', 'C++', 'C#') THEN 'C/C++/C#'
                WHEN language IN (SELECT language FROM top_languages) THEN language
                ELSE 'others'
            END AS language_group,
            CAST(substr(created_at, 1, 4) AS INTEGER) AS year,
            COUNT(*) AS num
        FROM repositories
        WHERE created_at IS NOT NULL
        GROUP BY language_group, year
        ORDER BY year
        "#,
    )
    .bind(top)
    .fetch_all(pool)
    .await?;

    let counts: Vec<(i32, String, i64)> = rows
        .iter()
        .map(|r| {
            (
                r.get::<i64, _>("year") as i32,
                r.get("language_group"),
                r.get("num"),
            )
        })
        .collect();
    Ok(pivot_language_counts(&counts, percentage))
}

fn pivot_language_counts(counts: &[(i32, String, i64)], percentage: bool) -> Vec<YearLanguages> {
    let groups: Vec<&str> = {
        let mut g: Vec<&str> = counts.iter().map(|(_, g, _)| g.as_str()).collect();
        g.sort_unstable();
        g.dedup();
        g
    };

    let mut by_year: BTreeMap<i32, BTreeMap<String, f64>> = BTreeMap::new();
    for (year, group, num) in counts {
        let row = by_year.entry(*year).or_insert_with(|| {
            groups.iter().map(|g| (g.to_string(), 0.0)).collect()
        });
        *row.entry(group.clone()).or_insert(0.0) += *num as f64;
    }

    by_year
        .into_iter()
        .map(|(year, mut shares)| {
            if percentage {
                let total: f64 = shares.values().sum();
                if total > 0.0 {
                    for v in shares.values_mut() {
                        *v = *v / total * 100.0;
                    }
                }
            }
            YearLanguages {
                year,
                groups: shares,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrowthLeader {
    pub name: String,
    pub stars: i64,
    pub stars_last_update: i64,
    pub growth: i64,
}

/// Repository created in `year` with the largest star gain between the
/// last two discovery runs.
pub async fn fastest_growing(pool: &SqlitePool, year: i32) -> Result<Option<GrowthLeader>> {
    let row = sqlx::query(
        r#"
        SELECT name, stars, stars_last_update, (stars - stars_last_update) AS growth
        FROM repositories
        WHERE created_at >= ? AND created_at < ? AND stars_last_update IS NOT NULL
        ORDER BY growth DESC, name ASC
        LIMIT 1
        "#,
    )
    .bind(format!("{:04}-01-01", year))
    .bind(format!("{:04}-01-01", year + 1))
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| GrowthLeader {
        name: r.get("name"),
        stars: r.get("stars"),
        stars_last_update: r.get("stars_last_update"),
        growth: r.get("growth"),
    }))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicCount {
    pub topic: String,
    pub count: u64,
}

async fn topic_sets(
    pool: &SqlitePool,
    begin_year: Option<i32>,
    end_year: Option<i32>,
) -> Result<Vec<Topics>> {
    let begin = begin_year.map(|y| format!("{:04}-01-01", y));
    let end = end_year.map(|y| format!("{:04}-01-01", y + 1));

    let rows = sqlx::query(
        r#"
        SELECT topics FROM repositories
        WHERE (?1 IS NULL OR created_at >= ?1)
          AND (?2 IS NULL OR created_at < ?2)
        "#,
    )
    .bind(begin)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|r| Topics::from_storage(&r.get::<String, _>("topics")))
        .filter(|t| !t.is_empty())
        .collect())
}

/// Repositories per topic, most common first. Years are inclusive
/// creation-year bounds.
pub async fn topic_counts(
    pool: &SqlitePool,
    begin_year: Option<i32>,
    end_year: Option<i32>,
) -> Result<Vec<TopicCount>> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for topics in topic_sets(pool, begin_year, end_year).await? {
        for tag in topics.iter() {
            *counts.entry(tag.to_string()).or_insert(0) += 1;
        }
    }

    let mut out: Vec<TopicCount> = counts
        .into_iter()
        .map(|(topic, count)| TopicCount { topic, count })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.topic.cmp(&b.topic)));
    Ok(out)
}

/// Topic co-occurrence graph with communities from the configured
/// algorithm.
pub async fn topic_communities(
    pool: &SqlitePool,
    config: &AnalyticsConfig,
) -> Result<CommunityGraph> {
    let sets = topic_sets(pool, None, None).await?;
    let graph = TopicGraph::build(
        sets.iter(),
        config.min_node_value,
        config.min_edge_value,
        config.max_nodes,
    );
    let detector = config.algorithm().detector();
    Ok(CommunityGraph::detect(&graph, detector.as_ref()))
}

/// Daily and cumulative stars of one repository from its vector point.
/// `None` if the repository has no point.
pub async fn star_series(
    store: &dyn VectorStore,
    repo_name: &str,
) -> Result<Option<Vec<StarPoint>>> {
    let points = store.scroll_by_repo(repo_name, 10).await?;
    Ok(points
        .into_iter()
        .next()
        .map(|p| p.payload.star_history.cumulative()))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContributorTotal {
    pub login: String,
    pub url: String,
    pub repos: i64,
    pub contributions: i64,
    /// Stars of each repository shared out by contribution share.
    pub allocated_stars: f64,
}

/// Contributors ranked by total contributions across all repositories.
pub async fn top_contributors(pool: &SqlitePool, limit: i64) -> Result<Vec<ContributorTotal>> {
    let rows = sqlx::query(
        r#"
        WITH repo_totals AS (
            SELECT repo_url, SUM(contributions) AS total
            FROM repo_contributors
            GROUP BY repo_url
        )
        SELECT c.login, c.url,
               COUNT(*) AS repos,
               SUM(rc.contributions) AS contributions,
               TOTAL(CASE WHEN rt.total > 0
                          THEN CAST(r.stars AS REAL) * rc.contributions / rt.total
                          ELSE 0.0 END) AS allocated_stars
        FROM repo_contributors rc
        JOIN contributors c ON c.url = rc.contributor_url
        JOIN repo_totals rt ON rt.repo_url = rc.repo_url
        LEFT JOIN repositories r ON r.url = rc.repo_url
        GROUP BY c.url
        ORDER BY contributions DESC, c.login ASC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|r| ContributorTotal {
            login: r.get("login"),
            url: r.get("url"),
            repos: r.get("repos"),
            contributions: r.get("contributions"),
            allocated_stars: r.get("allocated_stars"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pivot_fills_missing_groups_and_normalizes() {
        let counts = vec![
            (2023, "Rust".to_string(), 3),
            (2023, "others".to_string(), 1),
            (2024, "Rust".to_string(), 2),
        ];

        let raw = pivot_language_counts(&counts, false);
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[1].groups["others"], 0.0);

        let pct = pivot_language_counts(&counts, true);
        assert!((pct[0].groups["Rust"] - 75.0).abs() < 1e-9);
        assert!((pct[0].groups["others"] - 25.0).abs() < 1e-9);
        assert!((pct[1].groups["Rust"] - 100.0).abs() < 1e-9);
    }
}
