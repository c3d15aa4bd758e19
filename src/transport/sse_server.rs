//! Server-side HTTP streaming endpoint
//!
//! - `GET /sse` opens a session. The first event is `endpoint`, whose data is
//!   the POST URL for that session; every message the server sends afterwards
//!   arrives as a `message` event.
//! - `POST /messages?sessionId=<id>` carries client messages into the session
//!   and answers `202 Accepted`. Responses travel back over the event stream.
//!
//! Each session runs the regular server dispatch loop over a
//! [`ChannelTransport`]; the session ends when its event stream is dropped.

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures_util::stream::Stream;
use http::{HeaderValue, Method};
use serde::Deserialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use uuid::Uuid;

use crate::errors::Error;
use crate::server::Server;
use crate::transport::{CHANNEL_BUFFER_SIZE, ChannelTransport};

/// Configuration options for the SSE server
#[derive(Debug, Clone)]
pub struct SseServerOptions {
    /// Address to bind the server to
    pub bind_address: String,
    /// Route that opens the event stream
    pub sse_path: String,
    /// Route that accepts client messages
    pub message_path: String,
    /// CORS allowed origins; `None` allows any origin
    pub allowed_origins: Option<Vec<String>>,
    /// Interval between keep-alive comments on idle streams
    pub keep_alive_interval: Duration,
}

impl Default for SseServerOptions {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8090".to_string(),
            sse_path: "/sse".to_string(),
            message_path: "/messages".to_string(),
            allowed_origins: None,
            keep_alive_interval: Duration::from_secs(15),
        }
    }
}

struct AppState {
    server: Server,
    sessions: Mutex<HashMap<Uuid, mpsc::Sender<String>>>,
    message_path: String,
    keep_alive_interval: Duration,
}

impl AppState {
    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, mpsc::Sender<String>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Uuid,
}

/// HTTP front end that serves one MCP session per event stream
pub struct SseServer {
    options: SseServerOptions,
    server: Server,
}

impl SseServer {
    /// Create an HTTP front end for `server`
    pub fn new(server: Server, options: SseServerOptions) -> Self {
        Self { options, server }
    }

    /// Build the axum router without binding a socket
    pub fn router(&self) -> Router {
        let state = Arc::new(AppState {
            server: self.server.clone(),
            sessions: Mutex::new(HashMap::new()),
            message_path: self.options.message_path.clone(),
            keep_alive_interval: self.options.keep_alive_interval,
        });

        let origins = match &self.options.allowed_origins {
            Some(origins) => AllowOrigin::list(
                origins
                    .iter()
                    .filter_map(|origin| HeaderValue::from_str(origin).ok()),
            ),
            None => AllowOrigin::any(),
        };
        let cors = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
            .allow_origin(origins);

        Router::new()
            .route(&self.options.sse_path, get(handle_sse_connection))
            .route(&self.options.message_path, post(handle_client_message))
            .layer(cors)
            .with_state(state)
    }

    /// Bind the configured address and serve until the task is aborted
    pub async fn run(self) -> Result<(), Error> {
        let addr = self
            .options
            .bind_address
            .parse::<SocketAddr>()
            .map_err(|e| Error::Transport(format!("Invalid bind address: {}", e)))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Transport(format!("Failed to bind to {}: {}", addr, e)))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<(), Error> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Starting SSE server on {}", addr);
        }
        axum::serve(listener, self.router().into_make_service())
            .await
            .map_err(|e| Error::Transport(format!("Server error: {}", e)))
    }
}

async fn handle_sse_connection(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = Uuid::new_v4();
    tracing::info!(session = %session_id, "New SSE connection");

    let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let (outbound_tx, mut outbound_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    state.sessions().insert(session_id, inbound_tx);

    let server = state.server.clone();
    tokio::spawn(async move {
        let transport = ChannelTransport::new(inbound_rx, outbound_tx);
        if let Err(e) = server.serve(transport).await {
            tracing::warn!(session = %session_id, "Session ended with error: {}", e);
        }
    });

    let endpoint = format!("{}?sessionId={}", state.message_path, session_id);
    let keep_alive = KeepAlive::new().interval(state.keep_alive_interval);

    let stream = async_stream::stream! {
        // Removing the inbound sender ends the session's read loop
        let _session = scopeguard::guard(state, move |state| {
            state.sessions().remove(&session_id);
            tracing::info!(session = %session_id, "SSE connection closed");
        });

        yield Ok(Event::default().event("endpoint").data(endpoint));

        while let Some(line) = outbound_rx.recv().await {
            yield Ok(Event::default().event("message").data(line));
        }
    };

    Sse::new(stream).keep_alive(keep_alive)
}

async fn handle_client_message(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> Response {
    let Some(session) = state.sessions().get(&query.session_id).cloned() else {
        tracing::warn!(session = %query.session_id, "Message for unknown session");
        return (StatusCode::NOT_FOUND, "Unknown session").into_response();
    };

    for line in body.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if session.send(line.to_string()).await.is_err() {
            return (StatusCode::GONE, "Session closed").into_response();
        }
    }

    StatusCode::ACCEPTED.into_response()
}
