use clova_proxy::config::{Config, UpstreamConfig};
use clova_proxy::server::{self, RelayState};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;

const UPSTREAM_PATH: &str = "/v3/chat-completions/HCX-005";

/// 启动代理，上游指向 mock 服务器
async fn spawn_relay(upstream: &ServerGuard) -> SocketAddr {
    spawn_relay_with(&upstream.url(), 5).await
}

async fn spawn_relay_with(upstream_base: &str, timeout_secs: u64) -> SocketAddr {
    let config = Config {
        upstream: UpstreamConfig {
            url: format!("{}{}", upstream_base, UPSTREAM_PATH),
            timeout_secs,
            forward_request_id: true,
        },
        ..Config::default()
    };
    let state = Arc::new(RelayState::new(config).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, state, std::future::pending::<()>()));
    addr
}

async fn post_relay(addr: SocketAddr, path: &str, body: Value) -> reqwest::Response {
    let client = reqwest::Client::new();
    timeout(
        Duration::from_secs(5),
        client
            .post(format!("http://{}{}", addr, path))
            .json(&body)
            .send(),
    )
    .await
    .expect("代理请求超时")
    .expect("代理请求失败")
}

#[tokio::test]
async fn test_relay_accumulates_stream() {
    let mut upstream = Server::new_async().await;
    let mock = upstream
        .mock("POST", UPSTREAM_PATH)
        .match_header("authorization", "Bearer nv-secret-key")
        .match_header("accept", "text/event-stream")
        .match_body(Matcher::Json(json!({
            "requestId": "req-42",
            "messages": [{"role": "user", "content": "hello"}],
            "temperature": 0.5
        })))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(
            "event: token\ndata: {\"message\":{\"content\":\"A\"}}\n\n\
             event: token\ndata: {\"message\":{\"content\":\"B\"}}\n\n",
        )
        .create_async()
        .await;

    let addr = spawn_relay(&upstream).await;
    let response = post_relay(
        addr,
        "/clova-proxy",
        json!({
            "apiKey": "nv-secret-key",
            "requestId": "req-42",
            "messages": [{"role": "user", "content": "hello"}],
            "temperature": 0.5
        }),
    )
    .await;

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert_eq!(response.headers()["content-type"], "application/json");
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!({"success": true, "content": "AB", "requestId": "req-42"})
    );

    mock.assert_async().await;
}

#[tokio::test]
async fn test_relay_absent_request_id_is_null() {
    let mut upstream = Server::new_async().await;
    let _mock = upstream
        .mock("POST", UPSTREAM_PATH)
        .match_header("x-ncp-clovastudio-request-id", Matcher::Missing)
        .with_status(200)
        .with_body("data: {\"message\":{\"content\":\" Hi \"}}\ndata: {\"message\":{\"content\":\"there \"}}\n")
        .create_async()
        .await;

    let addr = spawn_relay(&upstream).await;
    let response = post_relay(addr, "/clova-proxy", json!({"apiKey": "k", "messages": []})).await;

    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!({"success": true, "content": "Hi there", "requestId": null})
    );
}

#[tokio::test]
async fn test_relay_missing_api_key() {
    let mut upstream = Server::new_async().await;
    let mock = upstream
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let addr = spawn_relay(&upstream).await;
    let response = post_relay(addr, "/clova-proxy", json!({"messages": []})).await;

    assert_eq!(response.status(), 500);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], json!(false));
    assert!(!body["error"].as_str().unwrap().is_empty());

    mock.assert_async().await;
}

#[tokio::test]
async fn test_relay_upstream_unavailable() {
    let mut upstream = Server::new_async().await;
    let _mock = upstream
        .mock("POST", UPSTREAM_PATH)
        .with_status(503)
        .with_body("service unavailable")
        .create_async()
        .await;

    let addr = spawn_relay(&upstream).await;
    let response = post_relay(addr, "/clova-proxy", json!({"apiKey": "k"})).await;

    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!({"success": false, "error": "Clova API returned 503"})
    );
}

#[tokio::test]
async fn test_relay_skips_malformed_sse_lines() {
    let mut upstream = Server::new_async().await;
    let _mock = upstream
        .mock("POST", UPSTREAM_PATH)
        .with_status(200)
        .with_body("data: {bad json\ndata: {\"message\":{\"content\":\"X\"}}\n")
        .create_async()
        .await;

    let addr = spawn_relay(&upstream).await;
    let response = post_relay(addr, "/clova-proxy", json!({"apiKey": "k", "requestId": 7})).await;

    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"success": true, "content": "X", "requestId": 7}));
}

#[tokio::test]
async fn test_preflight_and_not_found() {
    let upstream = Server::new_async().await;
    let addr = spawn_relay(&upstream).await;
    let client = reqwest::Client::new();

    let response = client
        .request(reqwest::Method::OPTIONS, format!("http://{}/any/path", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert_eq!(
        response.headers()["access-control-allow-methods"],
        "GET, POST, OPTIONS"
    );
    assert_eq!(
        response.headers()["access-control-allow-headers"],
        "Content-Type, Authorization"
    );
    assert!(response.bytes().await.unwrap().is_empty());

    let response = client
        .get(format!("http://{}/anything", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert!(response.headers().get("access-control-allow-origin").is_none());
    assert!(response.bytes().await.unwrap().is_empty());

    let response = post_relay(addr, "/wrong-path", json!({"apiKey": "k"})).await;
    assert_eq!(response.status(), 404);
    assert!(response.bytes().await.unwrap().is_empty());
}

/// 发出响应头和一个片段后不再发送数据的上游
async fn spawn_stalling_upstream() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = stream.read(&mut buf).await;

        let line = "data: {\"message\":{\"content\":\"partial\"}}\n";
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\n\r\n{:x}\r\n{}\r\n",
            line.len(),
            line
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.flush().await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    format!("http://{}", addr)
}

#[tokio::test]
async fn test_relay_reports_upstream_timeout() {
    let upstream = spawn_stalling_upstream().await;
    let addr = spawn_relay_with(&upstream, 1).await;

    let started = std::time::Instant::now();
    let response = post_relay(addr, "/clova-proxy", json!({"apiKey": "k", "messages": []})).await;

    assert_eq!(response.status(), 500);
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!({"success": false, "error": "upstream request timed out after 1s"})
    );
}
