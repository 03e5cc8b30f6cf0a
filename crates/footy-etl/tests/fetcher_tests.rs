//! HTTP fetcher tests against a mock open-data server

use footy_etl::error::EtlError;
use footy_etl::models::CompetitionSeason;
use footy_etl::source::{Credentials, Endpoints, HttpFetcher, ResourceFetcher};
use serde_json::json;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(5, None).unwrap()
}

#[tokio::test]
async fn test_fetch_returns_records() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data/matches/7/235.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"match_id": 1, "match_status": "available"},
            {"match_id": 2, "match_status": "scheduled"}
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let endpoints = Endpoints::new(format!("{}/data", mock_server.uri()));
    let records = fetcher()
        .fetch(&endpoints.matches(CompetitionSeason::new(7, 235)))
        .await
        .unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["match_id"], 1);
}

#[tokio::test]
async fn test_non_success_status_is_empty_payload() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/three-sixty/3788741.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let url = format!("{}/three-sixty/3788741.json", mock_server.uri());
    let records = fetcher().fetch(&url).await.unwrap();

    assert!(records.is_empty());
}

#[tokio::test]
async fn test_server_error_is_empty_payload() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let url = format!("{}/competitions.json", mock_server.uri());
    assert!(fetcher().fetch(&url).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_basic_auth_is_sent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/competitions.json"))
        .and(header("authorization", "Basic dXNlcjpzZWNyZXQ="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"competition_id": 7}])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let fetcher = HttpFetcher::new(
        5,
        Some(Credentials {
            username: "user".into(),
            password: "secret".into(),
        }),
    )
    .unwrap();
    let endpoints = Endpoints::new(mock_server.uri());

    let records = fetcher.fetch(&endpoints.competitions()).await.unwrap();
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn test_invalid_body_is_an_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&mock_server)
        .await;

    let url = format!("{}/events/1.json", mock_server.uri());
    let err = fetcher().fetch(&url).await.unwrap_err();

    assert!(matches!(err, EtlError::Fetch { .. }));
}

#[tokio::test]
async fn test_unreachable_host_is_an_error() {
    // Nothing listens on port 9 on the loopback interface
    let err = fetcher().fetch("http://127.0.0.1:9/competitions.json").await.unwrap_err();
    assert!(matches!(err, EtlError::Http(_)));
}
