//! Integration tests for single engine runs against a mock server.

use iodid::client::ClientConfig;
use iodid::engine::{run_load, EngineParams};
use iodid::statsd::StatsdClient;
use reqwest::Method;
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn params_for(server: &MockServer, route: &str) -> EngineParams {
    EngineParams::new(format!("{}{}", server.uri(), route))
}

#[tokio::test]
async fn test_fixed_count_run_sends_workers_times_runs() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .expect(6)
        .mount(&server)
        .await;

    let mut params = params_for(&server, "/health");
    params.workers = 2;
    params.runs_per_worker = Some(3);

    let results = run_load(&params).await.unwrap();

    assert_eq!(results.count(), 6);
    assert_eq!(results.status_latencies[&200].len(), 6);
    assert_eq!(results.error_count(), 0);
    assert!(results.elapsed > Duration::ZERO);
}

#[tokio::test]
async fn test_post_sends_body_and_headers() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/submit"))
        .and(header("content-type", "application/json"))
        .and(header("x-run", "trace"))
        .and(body_string(r#"{"k":"v"}"#))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let mut params = params_for(&server, "/submit");
    params.method = Method::POST;
    params.body = Some(r#"{"k":"v"}"#.to_string());
    params.client = ClientConfig {
        content_type: Some("application/json".to_string()),
        headers: vec![("X-Run".to_string(), "trace".to_string())],
        ..ClientConfig::default()
    };

    let results = run_load(&params).await.unwrap();
    assert_eq!(results.status_latencies[&201].len(), 1);
}

#[tokio::test]
async fn test_error_statuses_are_counted() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut params = params_for(&server, "/");
    params.workers = 3;

    let results = run_load(&params).await.unwrap();

    assert_eq!(results.count(), 3);
    assert_eq!(results.errors["503"], 3);
    assert_eq!(results.errors_desc["503"], "503 Service Unavailable");
    assert!(results
        .render_errors()
        .contains("503 Service Unavailable (3 occurences)"));
}

#[tokio::test]
async fn test_connection_refused_is_a_transport_failure() {
    // Bind then drop to get a port nothing listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut params = EngineParams::new(format!("http://127.0.0.1:{}/", port));
    params.workers = 2;

    let results = run_load(&params).await.unwrap();

    assert_eq!(results.count(), 0);
    assert_eq!(results.transport_failures, 2);
    assert_eq!(results.error_count(), 2);
}

#[tokio::test]
async fn test_duration_run_stops_on_time() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(20)))
        .mount(&server)
        .await;

    let mut params = params_for(&server, "/");
    params.workers = 2;
    params.runs_per_worker = None;
    params.duration = Some(Duration::from_millis(300));

    let results = run_load(&params).await.unwrap();

    assert!(results.count() >= 2, "got {} responses", results.count());
    assert!(results.elapsed >= Duration::from_millis(300));
    assert!(results.elapsed < Duration::from_secs(5));
}

#[tokio::test]
async fn test_statsd_lines_are_emitted_per_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let address = format!("udp://{}", receiver.local_addr().unwrap());
    let statsd = Arc::new(StatsdClient::new(&address, "test").unwrap());

    let mut params = params_for(&server, "/ping");
    params.statsd = Some(statsd);

    let results = run_load(&params).await.unwrap();
    assert_eq!(results.count(), 1);

    let mut lines = Vec::new();
    let mut buf = [0u8; 1024];
    for _ in 0..2 {
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        lines.push(String::from_utf8_lossy(&buf[..len]).to_string());
    }

    let port = server.address().port();
    let name = format!("test.GET.127.0.0.1:{}./ping", port);
    assert!(
        lines.iter().any(|l| l.starts_with(&format!("{}:", name)) && l.ends_with("|ms")),
        "lines: {:?}",
        lines
    );
    assert!(
        lines.contains(&format!("{}.200:1|c", name)),
        "lines: {:?}",
        lines
    );
}
