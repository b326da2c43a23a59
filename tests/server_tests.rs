//! HTTP surface served on an ephemeral port and driven with raw HTTP/1.1 requests.

mod common;

use anyhow::Result;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use cmsbridge::config::BridgeConfig;
use cmsbridge::engine::SharedBackend;
use cmsbridge::server::{router, AppState, USER_HEADER};

async fn serve() -> Result<std::net::SocketAddr> {
    let backend: SharedBackend = common::memory_backend();
    let app = router(AppState::new(backend, BridgeConfig::default()));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(addr)
}

/// Send one request and return the status code and the body.
async fn request(addr: std::net::SocketAddr, method: &str, path: &str, user: Option<&str>, body: &str) -> Result<(u16, String)> {
    let mut stream = TcpStream::connect(addr).await?;
    let mut head = format!("{} {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n", method, path);
    if let Some(u) = user {
        head.push_str(&format!("{}: {}\r\n", USER_HEADER, u));
    }
    head.push_str(&format!("Content-Type: application/json\r\nContent-Length: {}\r\n\r\n", body.len()));
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body.as_bytes()).await?;
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await?;
    let text = String::from_utf8_lossy(&raw).to_string();
    let status = text.split_whitespace().nth(1).unwrap_or("0").parse::<u16>()?;
    let body = text.split_once("\r\n\r\n").map(|(_, b)| b.to_string()).unwrap_or_default();
    Ok((status, body))
}

#[tokio::test]
async fn test_lists_and_calls_tools_over_http() -> Result<()> {
    let addr = serve().await?;

    let (status, body) = request(addr, "GET", "/", None, "").await?;
    assert_eq!(status, 200);
    assert!(body.contains("cmsbridge ok"));

    let (status, body) = request(addr, "GET", "/tools", None, "").await?;
    assert_eq!(status, 200);
    let listed: Value = serde_json::from_str(&body)?;
    assert_eq!(listed["tools"].as_array().unwrap().len(), 6);

    let (status, body) = request(addr, "POST", "/tools/ReadTable", Some("editor"), r#"{"table":"pages","uid":2}"#).await?;
    assert_eq!(status, 200);
    let result: Value = serde_json::from_str(&body)?;
    assert_eq!(result["isError"], false);
    assert_eq!(result["content"]["records"][0]["title"], "About us");
    Ok(())
}

#[tokio::test]
async fn test_transport_errors_use_http_statuses() -> Result<()> {
    let addr = serve().await?;

    let (status, body) = request(addr, "POST", "/tools/Nope", None, "{}").await?;
    assert_eq!(status, 404);
    let payload: Value = serde_json::from_str(&body)?;
    assert_eq!(payload["error"]["code"], "unknown_tool");

    let (status, _) = request(addr, "POST", "/tools/ReadTable", None, "[1,2]").await?;
    assert_eq!(status, 400);

    // tool failures stay in-band
    let (status, body) = request(addr, "POST", "/tools/ReadTable", None, r#"{"table":"be_users"}"#).await?;
    assert_eq!(status, 200);
    let result: Value = serde_json::from_str(&body)?;
    assert_eq!(result["isError"], true);
    Ok(())
}

#[tokio::test]
async fn test_drafts_follow_the_user_header() -> Result<()> {
    let addr = serve().await?;
    let (status, _) = request(
        addr, "POST", "/tools/WriteTable", Some("alice"),
        r#"{"action":"update","table":"pages","uid":2,"data":{"title":"Alice draft"}}"#,
    ).await?;
    assert_eq!(status, 200);

    let (_, mine) = request(addr, "POST", "/tools/ReadTable", Some("alice"), r#"{"table":"pages","uid":2}"#).await?;
    let (_, theirs) = request(addr, "POST", "/tools/ReadTable", Some("bob"), r#"{"table":"pages","uid":2}"#).await?;
    let mine: Value = serde_json::from_str(&mine)?;
    let theirs: Value = serde_json::from_str(&theirs)?;
    assert_eq!(mine["content"]["records"][0]["title"], "Alice draft");
    assert_eq!(theirs["content"]["records"][0]["title"], "About us");
    Ok(())
}
