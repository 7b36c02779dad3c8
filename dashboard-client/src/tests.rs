use crate::{CircuitState, DashboardApiClient};
use serde_json::json;
use triage_core::{
    ApiConfig, CoreError, DashboardApiError, MembershipChange, Mutation, SetKey, TriageApi,
    TriageSet,
};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> DashboardApiClient {
    let config = ApiConfig {
        base_url: server.uri(),
        timeout_secs: 5,
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 5,
        ..ApiConfig::default()
    };
    DashboardApiClient::new(&config).unwrap()
}

fn post_json(id: &str, subreddit: &str) -> serde_json::Value {
    json!({
        "id": id,
        "title": "Looking for a payment processor",
        "author": "founder42",
        "subreddit": subreddit,
        "sentiment": "neutral",
        "score": 0.1,
        "upvotes": 12,
        "comments": 3,
        "keywords": ["payment"],
        "url": format!("https://reddit.com/{}", id)
    })
}

#[tokio::test]
async fn test_fetch_dashboard() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dashboard-data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "posts": [post_json("abc123", "r/SaaS"), post_json("def456", "r/startups")],
            "average_sentiment": 0.4,
            "flagged_ids": ["abc123"],
            "ignored_ids": [],
            "engaged_ids": ["def456"],
            "monitored_subreddits": ["SaaS", "startups"],
            "keywords": ["payment"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let data = client.fetch_dashboard().await.unwrap();

    assert_eq!(data.posts.len(), 2);
    assert_eq!(data.posts[0].subreddit, "r/SaaS");
    assert_eq!(data.flagged_ids, Some(vec!["abc123".to_string()]));
    assert_eq!(data.engaged_ids, Some(vec!["def456".to_string()]));
    assert_eq!(
        data.monitored_subreddits,
        Some(vec!["SaaS".to_string(), "startups".to_string()])
    );
}

#[tokio::test]
async fn test_dashboard_in_band_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dashboard-data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": "database unavailable",
            "posts": [],
            "average_sentiment": 0
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client.fetch_dashboard().await;

    match result {
        Err(CoreError::DashboardApi(DashboardApiError::InvalidResponse { details })) => {
            assert_eq!(details, "database unavailable");
        }
        other => panic!("expected in-band error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fetch_string_lists() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flagged"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["abc123", "xyz789"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/monitored-subreddits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["SaaS", "r/startups"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/keywords"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["payment", "merchant of record"])))
        .mount(&server)
        .await;

    let client = client_for(&server);

    assert_eq!(client.fetch_flagged().await.unwrap(), vec!["abc123", "xyz789"]);
    // Prefix handling belongs to the engine; the client passes values through.
    assert_eq!(
        client.fetch_monitored_subreddits().await.unwrap(),
        vec!["SaaS", "r/startups"]
    );
    assert_eq!(
        client.fetch_keywords().await.unwrap(),
        vec!["payment", "merchant of record"]
    );

    let metrics = client.metrics().await;
    assert_eq!(metrics.total_requests, 3);
    assert_eq!(metrics.successful_requests, 3);
    assert!(metrics.routes.contains_key("GET /keywords"));
}

#[tokio::test]
async fn test_unexpected_payload_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flagged"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client.fetch_flagged().await;

    assert!(matches!(
        result,
        Err(CoreError::DashboardApi(DashboardApiError::InvalidResponse { .. }))
    ));
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/keywords"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/keywords"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["payment"])))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let keywords = client.fetch_keywords().await.unwrap();

    assert_eq!(keywords, vec!["payment"]);
    let stats = client.retry_stats();
    assert_eq!(stats.retries, 1);
    assert_eq!(stats.recovered, 1);

    let metrics = client.metrics().await;
    assert_eq!(metrics.total_requests, 2);
    assert_eq!(metrics.http_errors, 1);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flagged"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client.fetch_flagged().await;

    assert!(matches!(
        result,
        Err(CoreError::DashboardApi(DashboardApiError::NotFound { .. }))
    ));
    assert_eq!(client.retry_stats().exhausted, 1);
}

#[tokio::test]
async fn test_rate_limit_uses_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/monitored-subreddits"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/monitored-subreddits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["SaaS"])))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let subreddits = client.fetch_monitored_subreddits().await.unwrap();

    assert_eq!(subreddits, vec!["SaaS"]);
    assert_eq!(client.metrics().await.rate_limited_requests, 1);
}

#[tokio::test]
async fn test_flag_posts_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/flag"))
        .and(body_json(json!({ "id": "abc123" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mutation = Mutation::new(TriageSet::Flagged, MembershipChange::Add, "abc123");

    client.apply_mutation(&mutation).await.unwrap();
}

#[tokio::test]
async fn test_add_subreddit_and_keyword_bodies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/monitored-subreddits"))
        .and(body_json(json!({ "subreddit": "SaaS" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/keywords"))
        .and(body_json(json!({ "keyword": "payment" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .apply_mutation(&Mutation::new(
            SetKey::MonitoredSubreddits,
            MembershipChange::Add,
            "SaaS",
        ))
        .await
        .unwrap();
    client
        .apply_mutation(&Mutation::new(
            SetKey::Keywords,
            MembershipChange::Add,
            "payment",
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_remove_keyword_encodes_path() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/keywords/merchant%20of%20record"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mutation = Mutation::new(
        SetKey::Keywords,
        MembershipChange::Remove,
        "merchant of record",
    );

    client.apply_mutation(&mutation).await.unwrap();
}

#[tokio::test]
async fn test_unsuccessful_mutation_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/engage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": "Unknown post"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mutation = Mutation::new(TriageSet::Engaged, MembershipChange::Add, "gone");
    let result = client.apply_mutation(&mutation).await;

    match result {
        Err(CoreError::DashboardApi(DashboardApiError::Rejected { endpoint, reason })) => {
            assert_eq!(endpoint, "POST /engage");
            assert_eq!(reason, "Unknown post");
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert_eq!(client.metrics().await.rejected_mutations, 1);
}

#[tokio::test]
async fn test_non_json_success_body_is_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/monitored-subreddits/SaaS"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mutation = Mutation::new(
        SetKey::MonitoredSubreddits,
        MembershipChange::Remove,
        "SaaS",
    );

    assert!(client.apply_mutation(&mutation).await.is_ok());
}

#[tokio::test]
async fn test_failed_mutation_is_sent_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ignore"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mutation = Mutation::new(TriageSet::Ignored, MembershipChange::Add, "abc123");
    let result = client.apply_mutation(&mutation).await;

    assert!(matches!(
        result,
        Err(CoreError::DashboardApi(DashboardApiError::EndpointUnavailable { .. }))
    ));
    assert_eq!(client.retry_stats().retries, 0);
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() {
    let config = ApiConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        timeout_secs: 2,
        max_attempts: 1,
        ..ApiConfig::default()
    };
    let client = DashboardApiClient::new(&config).unwrap();

    let result = client.fetch_keywords().await;

    let error = result.unwrap_err();
    assert!(error.is_network_error());
    assert_eq!(client.metrics().await.transport_errors, 1);
    assert_eq!(client.retry_stats().exhausted, 1);
    assert_eq!(client.circuit_state(), CircuitState::Closed);
}
