/// Integration tests for the HTTP fetcher against a throwaway local server.

use std::time::Duration;

use chrono::NaiveDate;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use harvest_core::{HarvestConfig, Job, PayloadFormat};
use harvest_fetch::{FailureKind, Fetcher, HttpFetcher};

// ============================================================================
// Test Helpers
// ============================================================================

/// Serve one canned HTTP response per incoming connection, then stop.
/// Returns the base URL and a handle yielding the request lines seen.
async fn serve(responses: Vec<String>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let mut request_lines = Vec::new();
        for response in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let text = String::from_utf8_lossy(&buf).to_string();
            request_lines.push(text.lines().next().unwrap_or_default().to_string());
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        }
        request_lines
    });

    (format!("http://{addr}"), handle)
}

fn response(status: &str, extra_headers: &[&str], body: &str) -> String {
    let mut out = format!("HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n", body.len());
    for header in extra_headers {
        out.push_str(header);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    out.push_str(body);
    out
}

fn fetcher_for(base: &str, format: PayloadFormat) -> HttpFetcher {
    let mut config = HarvestConfig::default();
    config.fetch.url_template = format!("{base}/trends?geo=US-{{entity}}&q={{query}}&from={{start}}&to={{end}}");
    config.fetch.format = format;
    config.fetch.timeout_secs = 5;
    config.start_date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    config.end_date = NaiveDate::from_ymd_opt(2020, 3, 31).unwrap();
    HttpFetcher::from_config(&config).unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn successful_timeline_is_parsed() {
    let body = r#")]}',{"default":{"timelineData":[{"time":"1577836800","value":[12],"hasData":[true]},{"time":"1578441600","value":[18],"hasData":[true]}]}}"#;
    let (base, server) = serve(vec![response("200 OK", &["Content-Type: application/json"], body)]).await;

    let fetcher = fetcher_for(&base, PayloadFormat::TrendsTimeline);
    let series = fetcher.fetch(&Job::new("CA", "STD test")).await.unwrap();

    assert_eq!(series.len(), 2);
    assert_eq!(series.points()[0].date, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
    assert_eq!(series.points()[1].value, Some(18.0));

    let lines = server.await.unwrap();
    assert_eq!(
        lines[0],
        "GET /trends?geo=US-CA&q=STD+test&from=2020-01-01&to=2020-03-31 HTTP/1.1"
    );
}

#[tokio::test]
async fn empty_csv_is_success_not_failure() {
    let (base, server) = serve(vec![response("200 OK", &[], "date,value\n")]).await;

    let fetcher = fetcher_for(&base, PayloadFormat::Csv);
    let series = fetcher.fetch(&Job::new("WY", "flu")).await.unwrap();
    assert!(series.is_empty());
    server.await.unwrap();
}

#[tokio::test]
async fn throttled_response_carries_retry_after() {
    let (base, server) = serve(vec![response(
        "429 Too Many Requests",
        &["Retry-After: 75"],
        "slow down",
    )])
    .await;

    let fetcher = fetcher_for(&base, PayloadFormat::TrendsTimeline);
    let err = fetcher.fetch(&Job::new("CA", "flu")).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::RateLimited);
    assert_eq!(err.retry_after(), Some(Duration::from_secs(75)));
    server.await.unwrap();
}

#[tokio::test]
async fn truncated_throttle_body_is_still_rate_limited() {
    // Content-Length promises more than the server sends before closing
    let truncated = "HTTP/1.1 429 Too Many Requests\r\nContent-Length: 100\r\nRetry-After: 45\r\nConnection: close\r\n\r\nshort".to_string();
    let (base, server) = serve(vec![truncated]).await;

    let fetcher = fetcher_for(&base, PayloadFormat::TrendsTimeline);
    let err = fetcher.fetch(&Job::new("CA", "flu")).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::RateLimited);
    assert_eq!(err.retry_after(), Some(Duration::from_secs(45)));
    server.await.unwrap();
}

#[tokio::test]
async fn unauthorized_is_fatal_and_garbage_is_transient() {
    let (base, server) = serve(vec![
        response("401 Unauthorized", &[], "no key"),
        response("200 OK", &[], "<html>captcha</html>"),
    ])
    .await;

    let fetcher = fetcher_for(&base, PayloadFormat::TrendsTimeline);
    let job = Job::new("CA", "flu");

    let fatal = fetcher.fetch(&job).await.unwrap_err();
    assert_eq!(fatal.kind(), FailureKind::Fatal);

    let malformed = fetcher.fetch(&job).await.unwrap_err();
    assert_eq!(malformed.kind(), FailureKind::Transient);
    server.await.unwrap();
}

#[tokio::test]
async fn connection_refused_is_transient() {
    // bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let fetcher = fetcher_for(&format!("http://{addr}"), PayloadFormat::TrendsTimeline);
    let err = fetcher.fetch(&Job::new("CA", "flu")).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Transient);
}
