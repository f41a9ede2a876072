use std::time::Duration;

use reqwest::Client;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feed_core::{
    FeedError, FeedParams, FeedTransport, FetchCoordinator, FetchOutcome, HttpTransport,
    PageCursor, PageRequest, PagedFeedCache,
};

fn sample_page() -> String {
    r#"{
  "status": "success",
  "entities": [
    { "urn": "urn:activity:1", "owner_guid": "100", "message": "first" },
    { "urn": "urn:activity:2", "owner_guid": "101", "boosted": true }
  ],
  "load-next": "1700000000"
}"#
    .to_string()
}

fn request(endpoint: &str) -> PageRequest {
    PageRequest {
        endpoint: endpoint.into(),
        params: FeedParams::new(),
        limit: 12,
        offset: None,
        as_activities: true,
        inject_boost: false,
    }
}

#[tokio::test]
async fn get_parses_entities_and_cursor() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v2/feeds/subscribed/activities"))
        .and(query_param("limit", "12"))
        .and(query_param("as_activities", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string(sample_page()),
        )
        .mount(&server)
        .await;

    let transport = HttpTransport::new(Client::new(), &server.uri()).unwrap();
    let page = transport
        .get(&request("api/v2/feeds/subscribed/activities"))
        .await
        .unwrap();

    assert_eq!(page.entities.len(), 2);
    assert_eq!(page.entities[0].owner_guid.as_deref(), Some("100"));
    assert!(page.entities[1].boosted);
    assert_eq!(page.next_cursor, Some(PageCursor::from("1700000000")));
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sample_page()))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(Client::new(), &server.uri())
        .unwrap()
        .with_retries(2, Duration::from_millis(10));
    let page = transport.get(&request("feed")).await.unwrap();

    assert_eq!(page.entities.len(), 2);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(Client::new(), &server.uri())
        .unwrap()
        .with_retries(3, Duration::from_millis(10));
    let err = transport.get(&request("feed")).await.unwrap_err();

    match err {
        FeedError::Status { status, .. } => assert_eq!(status, 404),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn cache_pages_through_http_feed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/feed"))
        .and(query_param("offset", "1700000000"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{ "entities": [ { "urn": "urn:activity:3" } ], "load-next": "" }"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sample_page()))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(Client::new(), &server.uri()).unwrap();
    let cache = PagedFeedCache::new(FetchCoordinator::new(std::sync::Arc::new(transport)));
    cache.set_endpoint("feed");

    assert_eq!(cache.fetch(false, false).await, FetchOutcome::Applied { count: 2 });
    assert_eq!(cache.load_more().await, FetchOutcome::Applied { count: 1 });
    assert_eq!(cache.len(), 3);
    assert!(!cache.has_more());
}
