//! GitHub client behavior against a mock API server.

use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use github_trend::config::GitHubConfig;
use github_trend::github::{ApiError, GitHubClient, RepoSource};

fn client(server: &MockServer) -> GitHubClient {
    let config = GitHubConfig {
        api_url: server.uri(),
        rate_limit_buffer_secs: 0,
        ..Default::default()
    };
    GitHubClient::with_token(&config, Some("test-token".to_string())).unwrap()
}

fn quota_exhausted() -> ResponseTemplate {
    ResponseTemplate::new(403)
        .insert_header("x-ratelimit-remaining", "0")
        .insert_header("x-ratelimit-reset", Utc::now().timestamp().to_string().as_str())
        .set_body_json(json!({ "message": "API rate limit exceeded" }))
}

#[tokio::test]
async fn test_rate_limited_request_is_retried_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .respond_with(quota_exhausted())
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 321,
            "items": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let count = client(&server)
        .count_repositories("stars:>=100 created:2024-01-01..2024-01-07")
        .await
        .unwrap();
    assert_eq!(count, 321);
}

#[tokio::test]
async fn test_second_rate_limit_is_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .respond_with(quota_exhausted())
        .expect(2)
        .mount(&server)
        .await;

    let err = client(&server)
        .count_repositories("stars:>=100")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Exhausted { .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_forbidden_with_quota_left_is_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/o/r/readme"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "4000")
                .set_body_string("blocked"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).readme("o/r").await.unwrap_err();
    match err {
        ApiError::Http { status, body } => {
            assert_eq!(status, 403);
            assert_eq!(body, "blocked");
        }
        other => panic!("expected Http error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_search_page_sends_sort_and_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("sort", "stars"))
        .and(query_param("order", "desc"))
        .and(query_param("page", "2"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 2,
            "items": [
                { "full_name": "a/b", "html_url": "https://github.com/a/b" },
                { "full_name": "c/d", "html_url": "https://github.com/c/d" }
            ]
        })))
        .mount(&server)
        .await;

    let page = client(&server)
        .search_repositories("stars:>=100", 2)
        .await
        .unwrap();
    assert_eq!(page.total_count, 2);
    assert_eq!(page.items.len(), 2);
}

#[tokio::test]
async fn test_missing_readme_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/o/r/readme"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })))
        .mount(&server)
        .await;

    assert_eq!(client(&server).readme("o/r").await.unwrap(), None);
}

#[tokio::test]
async fn test_readme_is_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/o/r/readme"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "encoding": "base64",
            "content": "IyBI\nZWxs\nbw==\n"
        })))
        .mount(&server)
        .await;

    assert_eq!(
        client(&server).readme("o/r").await.unwrap().as_deref(),
        Some("# Hello")
    );
}

#[tokio::test]
async fn test_stargazers_use_star_media_type() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/o/r/stargazers"))
        .and(header("accept", "application/vnd.github.v3.star+json"))
        .and(query_param("per_page", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "starred_at": "2024-01-05T01:00:00Z", "user": { "login": "x" } },
            { "starred_at": "2024-01-06T01:00:00Z", "user": { "login": "y" } }
        ])))
        .mount(&server)
        .await;

    let stars = client(&server).stargazers("o/r", 1).await.unwrap();
    assert_eq!(stars, vec!["2024-01-05T01:00:00Z", "2024-01-06T01:00:00Z"]);
}

#[tokio::test]
async fn test_empty_repository_has_no_contributors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/o/empty/contributors"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    assert!(client(&server)
        .contributors("o/empty", 1)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_repository_stars_use_repo_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/o/r"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "full_name": "o/r",
            "stargazers_count": 4321
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/o/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })))
        .mount(&server)
        .await;

    let gh = client(&server);
    assert_eq!(gh.repository_stars("o/r").await.unwrap(), Some(4321));
    assert_eq!(gh.repository_stars("o/gone").await.unwrap(), None);
}

#[tokio::test]
async fn test_rate_limit_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rate_limit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resources": {
                "core": { "limit": 5000, "remaining": 4990, "reset": 1700000000 },
                "search": { "limit": 30, "remaining": 29, "reset": 1700000060 }
            }
        })))
        .mount(&server)
        .await;

    let statuses = client(&server).rate_limit().await.unwrap();
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].resource, "core");
    assert_eq!(statuses[1].remaining, 29);
}
