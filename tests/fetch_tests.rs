use std::time::Duration;

use scurry::{Fetcher, HttpFetcher, ScrapeError};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn returns_the_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>hello</html>"))
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new();
    let body = fetcher
        .fetch(&CancellationToken::new(), &format!("{}/page", server.uri()))
        .await
        .unwrap();
    assert_eq!(body, "<html>hello</html>");
}

// Status codes are not translated into errors; whatever body arrived is
// handed through.
#[tokio::test]
async fn non_success_status_still_yields_the_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new();
    let body = fetcher
        .fetch(&CancellationToken::new(), &server.uri())
        .await
        .unwrap();
    assert_eq!(body, "missing");
}

#[tokio::test]
async fn cancellation_aborts_the_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let fetcher = HttpFetcher::new();
    let result = fetcher.fetch(&cancel, &server.uri()).await;
    assert!(matches!(result, Err(ScrapeError::Cancelled)));
}

#[tokio::test]
async fn connection_errors_surface_as_fetch_errors() {
    let fetcher = HttpFetcher::new();
    let result = fetcher
        .fetch(&CancellationToken::new(), "http://127.0.0.1:1/unreachable")
        .await;
    assert!(matches!(result, Err(ScrapeError::Fetch { .. })));
}
