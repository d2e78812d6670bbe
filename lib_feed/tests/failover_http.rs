//! Integration tests for the failover client against local HTTP responders.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lib_feed::retrieve::RequestOptions;
use lib_feed::{FailoverClient, FailoverConfig, FailoverError};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

struct MockHttp {
    base_url: String,
    hits: Arc<AtomicUsize>,
}

/// Answers every request with the same status, extra header lines and body.
async fn spawn_http(status: &'static str, extra_headers: &'static str, body: &'static str) -> MockHttp {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind to random port");
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                // Consume the request head.
                let mut buf = vec![0u8; 4096];
                let mut read = 0;
                loop {
                    match stream.read(&mut buf[read..]).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            read += n;
                            if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") || read == buf.len() {
                                break;
                            }
                        }
                    }
                }

                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n{}\r\n{}",
                    status,
                    body.len(),
                    extra_headers,
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.flush().await;
            });
        }
    });

    MockHttp {
        base_url: format!("http://127.0.0.1:{}", port),
        hits,
    }
}

/// An address with nothing listening behind it.
async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

fn config(base_urls: Vec<String>) -> FailoverConfig {
    FailoverConfig {
        retry_backoff_unit_ms: 10,
        attempt_timeout_ms: 2_000,
        ..FailoverConfig::with_base_urls(base_urls)
    }
}

#[derive(Debug, Deserialize, PartialEq)]
struct Stats {
    online: u32,
}

#[tokio::test]
async fn test_fails_over_to_third_address() {
    // 1. Two dead addresses ahead of one live one
    let live = spawn_http("200 OK", "", r#"{"online":12}"#).await;
    let dead_a = dead_address().await;
    let dead_b = dead_address().await;
    let client = FailoverClient::new(&config(vec![dead_a.clone(), dead_b.clone(), live.base_url.clone()])).unwrap();

    // 2. Call
    let response = client.execute::<Stats>("/stats", RequestOptions::get()).await.unwrap();

    // 3. Assertions
    assert!(response.success);
    assert_eq!(response.status, 200);
    assert_eq!(response.address, live.base_url);
    assert_eq!(response.data, Some(Stats { online: 12 }));
    assert_eq!(live.hits.load(Ordering::SeqCst), 1);

    let statuses = client.tracker().statuses();
    let failures: Vec<u32> = statuses.iter().map(|s| s.consecutive_failures).collect();
    assert_eq!(failures, vec![1, 1, 0]);
    assert!(statuses.iter().all(|s| s.is_healthy));
}

#[tokio::test]
async fn test_rate_limit_is_terminal() {
    // 1. A server that always answers 429 with a retry hint
    let limited = spawn_http(
        "429 Too Many Requests",
        "Retry-After: 7\r\n",
        r#"{"message":"Slow down","limits":{"stats":{"perMinute":30}}}"#,
    )
    .await;
    let backup = spawn_http("200 OK", "", r#"{"online":1}"#).await;
    let client = FailoverClient::new(&config(vec![limited.base_url.clone(), backup.base_url.clone()])).unwrap();

    // 2. Call
    let err = client.execute::<Stats>("/stats", RequestOptions::get()).await.unwrap_err();

    // 3. Assertions: one attempt, no failover, address still healthy
    match &err {
        FailoverError::RateLimited(info) => {
            assert_eq!(info.retry_after_secs, 7);
            assert_eq!(info.message.as_deref(), Some("Slow down"));
            assert!(info.limits.as_ref().map_or(false, |l| l.contains_key("stats")));
        }
        other => panic!("expected RateLimited, got {:?}", other),
    }
    assert!(err.is_rate_limited());
    assert_eq!(err.retry_after_secs(), Some(7));
    assert_eq!(limited.hits.load(Ordering::SeqCst), 1);
    assert_eq!(backup.hits.load(Ordering::SeqCst), 0);
    assert_eq!(client.tracker().statuses()[0].consecutive_failures, 0);
}

#[tokio::test]
async fn test_error_status_is_returned_without_failover() {
    let broken = spawn_http("500 Internal Server Error", "", r#"{"error":"db down"}"#).await;
    let backup = spawn_http("200 OK", "", r#"{"online":1}"#).await;
    let client = FailoverClient::new(&config(vec![broken.base_url.clone(), backup.base_url.clone()])).unwrap();

    let response = client.execute::<Value>("/stats", RequestOptions::get()).await.unwrap();

    assert!(!response.success);
    assert_eq!(response.status, 500);
    assert!(response.data.is_none());
    assert_eq!(response.error_body.as_deref(), Some(r#"{"error":"db down"}"#));
    assert_eq!(backup.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_all_addresses_down_raises_last_error() {
    let client = FailoverClient::new(&config(vec![
        dead_address().await,
        dead_address().await,
        dead_address().await,
    ]))
    .unwrap();

    let started = tokio::time::Instant::now();
    let err = client.execute::<Value>("/stats", RequestOptions::get()).await.unwrap_err();

    match err {
        FailoverError::Exhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, FailoverError::Network { .. }));
        }
        other => panic!("expected Exhausted, got {:?}", other),
    }
    // Linear backoff: 10ms after the first try, 20ms after the second.
    assert!(started.elapsed() >= std::time::Duration::from_millis(30));
    assert!(client
        .tracker()
        .statuses()
        .iter()
        .all(|s| s.consecutive_failures == 1));
}

#[tokio::test]
async fn test_failed_address_is_deprioritized_on_next_call() {
    let dead = dead_address().await;
    let live = spawn_http("200 OK", "", r#"{"online":3}"#).await;
    let client = FailoverClient::new(&config(vec![dead.clone(), live.base_url.clone()])).unwrap();

    client.execute::<Stats>("/stats", RequestOptions::get()).await.unwrap();
    let response = client.execute::<Stats>("/stats", RequestOptions::get()).await.unwrap();

    // The second call goes straight to the live address.
    assert_eq!(response.address, live.base_url);
    assert_eq!(live.hits.load(Ordering::SeqCst), 2);
    assert_eq!(client.tracker().statuses()[0].consecutive_failures, 1);
}

#[tokio::test]
async fn test_get_json_decodes_body() {
    let live = spawn_http("200 OK", "", r#"{"online":42}"#).await;
    let client = FailoverClient::new(&config(vec![live.base_url.clone()])).unwrap();

    let stats: Option<Stats> = client.get_json("/stats", &[("region", "eu")]).await.unwrap();
    assert_eq!(stats, Some(Stats { online: 42 }));
}

#[test]
fn test_invalid_config_is_rejected_at_construction() {
    let empty = FailoverClient::new(&config(Vec::new()));
    assert!(matches!(empty, Err(FailoverError::NoEndpoints)));

    let no_attempts = FailoverConfig {
        max_attempts: 0,
        ..config(vec!["http://127.0.0.1:1".to_string()])
    };
    assert!(matches!(FailoverClient::new(&no_attempts), Err(FailoverError::Config(_))));

    let no_threshold = FailoverConfig {
        failure_threshold: 0,
        ..config(vec!["http://127.0.0.1:1".to_string()])
    };
    assert!(matches!(FailoverClient::new(&no_threshold), Err(FailoverError::Config(_))));
}
