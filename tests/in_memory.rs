//! Server and client wired together through in-process channels.

use mcp_engine::server_session::ServerSession;
use mcp_engine::transport::ChannelTransport;
use mcp_engine::{ArgumentsExt, Client, Server, ToolBuilder};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;

async fn connect(server: &Server) -> Client {
    let (client_side, server_side) = ChannelTransport::pair();
    let server = server.clone();
    tokio::spawn(async move { server.serve(server_side).await });
    Client::builder("in-memory", "1.0")
        .connect(client_side)
        .await
        .unwrap()
}

fn arguments(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("arguments must be an object"),
    }
}

#[tokio::test]
async fn concurrent_calls_are_matched_by_id() {
    let server = Server::new("sleepy", "1.0");
    server
        .tools()
        .register_async(
            ToolBuilder::new("sleep", "Sleep, then report")
                .number_param("ms", "How long to sleep")
                .build(),
            |args| async move {
                let ms: u64 = args.required("ms")?;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<_, anyhow::Error>(format!("slept {}", ms))
            },
        )
        .await;
    let client = connect(&server).await;

    // later calls finish first
    let calls = [120u64, 80, 40, 0].map(|ms| {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .call_tool("sleep", arguments(json!({ "ms": ms })))
                .await
                .map(|result| (ms, result.text().to_string()))
        })
    });
    for call in calls {
        let (ms, text) = call.await.unwrap().unwrap();
        assert_eq!(text, format!("slept {}", ms));
    }
}

#[tokio::test]
async fn later_registration_wins() {
    let server = Server::new("dupes", "1.0");
    server
        .tools()
        .register_fn(ToolBuilder::new("greet", "First greeting").build(), |_| {
            Ok("first")
        })
        .await;
    server
        .tools()
        .register_fn(ToolBuilder::new("greet", "Second greeting").build(), |_| {
            Ok("second")
        })
        .await;
    let client = connect(&server).await;

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].description, "Second greeting");
    assert_eq!(
        client.call_tool("greet", Map::new()).await.unwrap().text(),
        "second"
    );
}

#[tokio::test]
async fn unregistered_tools_disappear() {
    let server = Server::new("shrinking", "1.0");
    server
        .tools()
        .register_fn(ToolBuilder::new("gone", "Soon removed").build(), |_| Ok("here"))
        .await;
    let client = connect(&server).await;
    assert!(!client.call_tool("gone", Map::new()).await.unwrap().is_error);

    assert!(server.tools().unregister("gone").await);
    let result = client.call_tool("gone", Map::new()).await.unwrap();
    assert!(result.is_error);
    assert_eq!(result.text(), "Tool gone not found");
}

#[tokio::test]
async fn panicking_tool_keeps_the_connection() {
    let server = Server::new("fragile", "1.0");
    server
        .tools()
        .register_fn(
            ToolBuilder::new("explode", "Panics").build(),
            |_| -> anyhow::Result<String> { panic!("boom") },
        )
        .await;
    let client = connect(&server).await;

    let result = client.call_tool("explode", Map::new()).await.unwrap();
    assert!(result.is_error);
    assert_eq!(result.text(), "boom");
    client.ping().await.unwrap();
}

#[tokio::test]
async fn server_can_ping_the_client() {
    let server = Server::new("pinger", "1.0");
    let (client_side, server_side) = ChannelTransport::pair();
    let session = ServerSession::start(server, Arc::new(server_side));
    let connection = session.connection().clone();
    tokio::spawn(session.run());

    let client = Client::builder("in-memory", "1.0")
        .connect(client_side)
        .await
        .unwrap();

    let answer = connection.request("ping", None).await.unwrap();
    assert_eq!(answer, json!({}));

    client.dispose().await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), connection.closed())
        .await
        .expect("server side sees the disconnect");
}

#[tokio::test]
async fn dropping_the_client_ends_the_session() {
    let server = Server::new("abandoned", "1.0");
    let (client_side, server_side) = ChannelTransport::pair();
    let session = ServerSession::start(server, Arc::new(server_side));
    let connection = session.connection().clone();
    tokio::spawn(session.run());

    let client = Client::builder("in-memory", "1.0")
        .connect(client_side)
        .await
        .unwrap();
    client.ping().await.unwrap();

    // no dispose: the last handle going away is enough
    drop(client);
    tokio::time::timeout(Duration::from_secs(1), connection.closed())
        .await
        .expect("server side sees the disconnect");
}
