//! Analytics queries over a seeded metadata store.

use sqlx::SqlitePool;
use tempfile::TempDir;

use github_trend::analytics::{
    fastest_growing, language_share_by_year, repo_counts_by_year, topic_communities,
    topic_counts, top_contributors,
};
use github_trend::config::{parse_config, AnalyticsConfig};
use github_trend::core::models::{Contributor, RepoRecord, Topics};
use github_trend::db;
use github_trend::metadata::{save_contributors, upsert_repository};
use github_trend::migrate;

fn repo(name: &str, year: i32, stars: i64, language: Option<&str>, topics: &[&str]) -> RepoRecord {
    RepoRecord {
        name: name.to_string(),
        url: format!("https://github.com/{}", name),
        description: String::new(),
        stars,
        forks: 10,
        language: language.map(str::to_string),
        created_at: Some(format!("{}-06-01 12:00:00", year)),
        updated_at: None,
        topics: topics.iter().copied().collect::<Topics>(),
        size: 0,
        homepage: String::new(),
        owner_type: "User".to_string(),
        pushed_at: None,
    }
}

async fn seed(repos: &[RepoRecord]) -> (TempDir, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let config = parse_config(&format!(
        "[db]\npath = \"{}/gtrend.sqlite\"\n",
        tmp.path().display()
    ))
    .unwrap();
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();

    let mut conn = pool.acquire().await.unwrap();
    for r in repos {
        upsert_repository(&mut *conn, r).await.unwrap();
    }
    drop(conn);
    (tmp, pool)
}

fn fixture() -> Vec<RepoRecord> {
    vec![
        repo("a/rust1", 2023, 500, Some("Rust"), &["cli", "rust"]),
        repo("a/rust2", 2023, 50, Some("Rust"), &["rust"]),
        repo("b/web", 2023, 900, Some("TypeScript"), &["web", "cli"]),
        repo("c/docs", 2024, 300, None, &["awesome"]),
        repo("d/js", 2024, 700, Some("JavaScript"), &["web"]),
        repo("e/cpp", 2024, 400, Some("C++"), &[]),
    ]
}

#[tokio::test]
async fn test_repo_counts_by_year_filters_by_stars() {
    let (_tmp, pool) = seed(&fixture()).await;

    let years = repo_counts_by_year(&pool, 100, 0).await.unwrap();
    let pairs: Vec<(i32, i64)> = years.iter().map(|y| (y.year, y.count)).collect();
    assert_eq!(pairs, vec![(2023, 2), (2024, 3)]);

    let none = repo_counts_by_year(&pool, 100, 11).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_language_groups_merge_and_fill() {
    let (_tmp, pool) = seed(&fixture()).await;

    let counts = language_share_by_year(&pool, 20, false).await.unwrap();
    assert_eq!(counts.len(), 2);

    let y2023 = &counts[0].groups;
    assert_eq!(counts[0].year, 2023);
    assert_eq!(y2023["Rust"], 2.0);
    assert_eq!(y2023["JavaScript/TypeScript"], 1.0);
    assert_eq!(y2023["non-code"], 0.0);

    let y2024 = &counts[1].groups;
    assert_eq!(y2024["non-code"], 1.0);
    assert_eq!(y2024["C/C++/C#"], 1.0);
    assert_eq!(y2024["Rust"], 0.0);

    let shares = language_share_by_year(&pool, 20, true).await.unwrap();
    let total: f64 = shares[1].groups.values().sum();
    assert!((total - 100.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_language_outside_top_is_others() {
    let (_tmp, pool) = seed(&fixture()).await;

    let counts = language_share_by_year(&pool, 1, false).await.unwrap();
    // Rust is the single most common language; merged groups keep their names.
    assert_eq!(counts[0].groups["Rust"], 2.0);
    assert_eq!(counts[0].groups["JavaScript/TypeScript"], 1.0);
    assert!(!counts[0].groups.contains_key("Go"));
}

#[tokio::test]
async fn test_topic_counts_with_year_bounds() {
    let (_tmp, pool) = seed(&fixture()).await;

    let all = topic_counts(&pool, None, None).await.unwrap();
    assert_eq!(all[0].topic, "cli");
    assert_eq!(all[0].count, 2);
    assert_eq!(all.len(), 4);

    let only_2024 = topic_counts(&pool, Some(2024), Some(2024)).await.unwrap();
    let names: Vec<&str> = only_2024.iter().map(|t| t.topic.as_str()).collect();
    assert_eq!(names, vec!["awesome", "web"]);
}

#[tokio::test]
async fn test_topic_communities_respect_thresholds() {
    let (_tmp, pool) = seed(&fixture()).await;
    let config = AnalyticsConfig {
        min_node_value: 1,
        min_edge_value: 1,
        ..Default::default()
    };

    let graph = topic_communities(&pool, &config).await.unwrap();
    assert!(!graph.nodes.is_empty());
    assert!(graph.nodes.iter().any(|n| n.name == "cli"));

    let strict = AnalyticsConfig::default();
    let empty = topic_communities(&pool, &strict).await.unwrap();
    assert!(empty.nodes.is_empty());
}

#[tokio::test]
async fn test_fastest_growing_uses_previous_stars() {
    let (_tmp, pool) = seed(&fixture()).await;

    // A row seen once has no previous count, so its growth is its stars.
    let first = fastest_growing(&pool, 2024).await.unwrap().unwrap();
    assert_eq!(first.name, "d/js");
    assert_eq!(first.growth, 700);

    let mut conn = pool.acquire().await.unwrap();
    for r in [
        repo("c/docs", 2024, 310, None, &["awesome"]),
        repo("d/js", 2024, 760, Some("JavaScript"), &["web"]),
        repo("e/cpp", 2024, 500, Some("C++"), &[]),
    ] {
        upsert_repository(&mut *conn, &r).await.unwrap();
    }
    drop(conn);

    let leader = fastest_growing(&pool, 2024).await.unwrap().unwrap();
    assert_eq!(leader.name, "e/cpp");
    assert_eq!(leader.growth, 100);
    assert_eq!(leader.stars_last_update, 400);

    assert!(fastest_growing(&pool, 2019).await.unwrap().is_none());
}

#[tokio::test]
async fn test_top_contributors_allocate_stars() {
    let (_tmp, pool) = seed(&fixture()).await;

    let alice = |n| Contributor {
        login: "alice".into(),
        url: "https://github.com/alice".into(),
        avatar_url: String::new(),
        contributions: n,
    };
    let bob = Contributor {
        login: "bob".into(),
        url: "https://github.com/bob".into(),
        avatar_url: String::new(),
        contributions: 25,
    };
    save_contributors(&pool, "https://github.com/a/rust1", &[alice(75), bob])
        .await
        .unwrap();
    save_contributors(&pool, "https://github.com/b/web", &[alice(10)])
        .await
        .unwrap();

    let top = top_contributors(&pool, 10).await.unwrap();
    assert_eq!(top.len(), 2);
    assert_eq!(top[0].login, "alice");
    assert_eq!(top[0].repos, 2);
    assert_eq!(top[0].contributions, 85);
    // 500 * 75/100 + 900 * 10/10
    assert!((top[0].allocated_stars - 1275.0).abs() < 1e-9);
    assert!((top[1].allocated_stars - 125.0).abs() < 1e-9);
}
