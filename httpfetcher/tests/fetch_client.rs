use httpfetcher::{build_headers, FetchClient, FetchError, FetchRequest, NetworkFailure};
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;
use syncstore::models::{AuthConfig, AuthMethod, Credentials, FieldPath};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn bearer(token: &str) -> AuthConfig {
    AuthConfig {
        method: AuthMethod::Bearer,
        credentials: Credentials {
            token: Some(token.to_string()),
            ..Default::default()
        },
    }
}

#[tokio::test]
async fn fetch_returns_array_elements_and_sends_auth() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .and(header("Authorization", "Bearer t-1"))
        .and(header("Accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "a", "name": "Kitab A"},
            {"id": "b", "name": "Kitab B"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = format!("{}/items", server.uri());
    let request = FetchRequest::new(&endpoint, build_headers(&bearer("t-1")), Duration::from_secs(5));
    let records = FetchClient::new().fetch(&request).await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[1]["name"], json!("Kitab B"));
}

#[tokio::test]
async fn fetch_wraps_single_object() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/item"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "only"})))
        .mount(&server)
        .await;

    let endpoint = format!("{}/item", server.uri());
    let request = FetchRequest::new(&endpoint, build_headers(&AuthConfig::default()), Duration::from_secs(5));
    let records = FetchClient::new().fetch(&request).await.unwrap();

    assert_eq!(records, vec![json!({"id": "only"})]);
}

#[tokio::test]
async fn fetch_sends_query_and_unwraps_response_root() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("status", "active"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"items": [{"id": 1}, {"id": 2}, {"id": 3}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = format!("{}/search", server.uri());
    let root = FieldPath::parse("data.items");
    let request = FetchRequest::new(&endpoint, build_headers(&AuthConfig::default()), Duration::from_secs(5))
        .with_query(vec![("status".to_string(), "active".to_string())])
        .with_response_root(Some(&root));
    let records = FetchClient::new().fetch(&request).await.unwrap();

    assert_eq!(records.len(), 3);
}

#[tokio::test]
async fn fetch_reports_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let endpoint = format!("{}/items", server.uri());
    let request = FetchRequest::new(&endpoint, build_headers(&AuthConfig::default()), Duration::from_secs(5));
    let err = FetchClient::new().fetch(&request).await.unwrap_err();

    match err {
        FetchError::Http { status, body } => {
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(body, "boom");
        }
        other => panic!("expected HTTP error, got {other:?}"),
    }
}

#[tokio::test]
async fn fetch_times_out_on_slow_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let endpoint = format!("{}/slow", server.uri());
    let request = FetchRequest::new(&endpoint, build_headers(&AuthConfig::default()), Duration::from_millis(200));
    let err = FetchClient::new().fetch(&request).await.unwrap_err();

    assert!(err.is_timeout(), "unexpected error: {err:?}");
    assert!(matches!(
        err,
        FetchError::Network {
            reason: NetworkFailure::Timeout
        }
    ));
}

#[tokio::test]
async fn fetch_reports_connection_failure() {
    // Reserve a free port, then release it so the connect is refused.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let endpoint = format!("http://127.0.0.1:{port}/gone");

    let request = FetchRequest::new(&endpoint, build_headers(&AuthConfig::default()), Duration::from_secs(5));
    let err = FetchClient::new().fetch(&request).await.unwrap_err();

    assert!(matches!(
        err,
        FetchError::Network {
            reason: NetworkFailure::Connection(_)
        }
    ), "unexpected error: {err:?}");
}

#[tokio::test]
async fn fetch_rejects_malformed_endpoint_and_body() {
    let request = FetchRequest::new("not a url", build_headers(&AuthConfig::default()), Duration::from_secs(1));
    let err = FetchClient::new().fetch(&request).await.unwrap_err();
    assert!(matches!(err, FetchError::InvalidEndpoint { .. }));

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;
    let endpoint = server.uri();
    let request = FetchRequest::new(&endpoint, build_headers(&AuthConfig::default()), Duration::from_secs(5));
    let err = FetchClient::new().fetch(&request).await.unwrap_err();
    assert!(matches!(err, FetchError::Decode(_)));
}
