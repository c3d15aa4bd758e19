//! Client and server over HTTP: an event stream down, POSTs up.

use mcp_engine::rpc::{MethodTable, RpcConnection};
use mcp_engine::transport::{HttpOptions, HttpTransport, SseServer, SseServerOptions};
use mcp_engine::{ArgumentsExt, Client, Server, ToolBuilder, Transport};
use reqwest::StatusCode;
use serde_json::{Map, Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

async fn start_server() -> (Server, SocketAddr) {
    let server = Server::new("http-test-server", "1.0");
    server
        .tools()
        .register_fn(
            ToolBuilder::new("echo", "Echo the input")
                .string_param("input", "Text to echo")
                .build(),
            |args| args.required::<String>("input"),
        )
        .await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    // short keep-alives so a dropped stream is noticed quickly
    let options = SseServerOptions {
        keep_alive_interval: Duration::from_millis(100),
        ..Default::default()
    };
    let sse = SseServer::new(server.clone(), options);
    tokio::spawn(sse.serve(listener));
    (server, addr)
}

async fn connect(addr: SocketAddr) -> Client {
    let options = HttpOptions::new(&format!("http://{}/sse", addr)).unwrap();
    Client::builder("http-test", "1.0")
        .with_request_timeout(Duration::from_secs(5))
        .connect_http(options)
        .await
        .unwrap()
}

fn input(text: &str) -> Map<String, Value> {
    let mut arguments = Map::new();
    arguments.insert("input".to_string(), json!(text));
    arguments
}

#[tokio::test]
async fn initialized_before_first_use() {
    let (_server, addr) = start_server().await;
    let client = connect(addr).await;

    // the HTTP connect waits for the handshake
    assert!(client.is_initialized());
    assert_eq!(
        client.server_info().unwrap().server_info.name,
        "http-test-server"
    );

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");
    client.dispose().await.unwrap();
}

#[tokio::test]
async fn calls_over_http() {
    let (_server, addr) = start_server().await;
    let client = connect(addr).await;

    let result = client.call_tool("echo", input("hello there")).await.unwrap();
    assert!(!result.is_error);
    assert_eq!(result.text(), "hello there");

    let missing = client.call_tool("nope", Map::new()).await.unwrap();
    assert!(missing.is_error);

    client.ping().await.unwrap();
    client.dispose().await.unwrap();
}

#[tokio::test]
async fn sessions_are_independent() {
    let (_server, addr) = start_server().await;
    let first = connect(addr).await;
    let second = connect(addr).await;

    let (a, b) = tokio::join!(
        first.call_tool("echo", input("first")),
        second.call_tool("echo", input("second")),
    );
    assert_eq!(a.unwrap().text(), "first");
    assert_eq!(b.unwrap().text(), "second");

    first.dispose().await.unwrap();
    // closing one session leaves the other running
    assert_eq!(
        second.call_tool("echo", input("still")).await.unwrap().text(),
        "still"
    );
    second.dispose().await.unwrap();
}

#[tokio::test]
async fn tool_changes_reach_http_clients() {
    let (server, addr) = start_server().await;
    let client = connect(addr).await;
    assert_eq!(client.tools().await.unwrap().len(), 1);

    server
        .tools()
        .register_fn(ToolBuilder::new("late", "Added while serving").build(), |_| {
            Ok("late")
        })
        .await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while client.cached_tools().map(|t| t.len()) != Some(2) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("tool list refreshed");

    assert_eq!(
        client.call_tool("late", Map::new()).await.unwrap().text(),
        "late"
    );
    client.dispose().await.unwrap();
}

#[tokio::test]
async fn unknown_session_is_rejected() {
    let (_server, addr) = start_server().await;
    let response = reqwest::Client::new()
        .post(format!(
            "http://{}/messages?sessionId={}",
            addr,
            uuid::Uuid::new_v4()
        ))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn connect_fails_without_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let options = HttpOptions::new(&format!("http://{}/sse", addr)).unwrap();
    let result = Client::builder("http-test", "1.0").connect_http(options).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn closing_releases_the_server_session() {
    let (_server, addr) = start_server().await;
    let options = HttpOptions::new(&format!("http://{}/sse", addr)).unwrap();
    let transport = Arc::new(HttpTransport::connect(options).await.unwrap());
    let connection = RpcConnection::start(transport.clone(), MethodTable::new());

    connection.request("ping", None).await.unwrap();
    let endpoint = transport.post_url().expect("endpoint announced");

    connection.close().await.unwrap();
    assert!(!transport.is_connected());

    let http = reqwest::Client::new();
    let ping = r#"{"jsonrpc":"2.0","id":99,"method":"ping"}"#;
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = http
                .post(endpoint.clone())
                .body(ping)
                .send()
                .await
                .unwrap()
                .status();
            if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
                break;
            }
            assert_eq!(status, StatusCode::ACCEPTED);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("server session ends once the client closes");
}
