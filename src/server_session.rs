//! MCP Server Session
//!
//! One connection's view of a [`Server`]: the handshake state machine, the
//! method table answering protocol requests, and the task that forwards
//! registry changes as `notifications/tools/list_changed`.

use serde_json::{Value, json};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::errors::Error;
use crate::lifecycle::{Lifecycle, SessionState};
use crate::rpc::{MethodTable, RpcConnection};
use crate::server::Server;
use crate::transport::Transport;
use crate::types::initialize::{InitializeRequestParams, InitializeResult};
use crate::types::prompts::ListPromptsResult;
use crate::types::resources::{ListResourceTemplatesResult, ListResourcesResult};
use crate::types::tools::{CallToolParams, ListToolsResult};

/// A server bound to one connection
pub struct ServerSession {
    server: Server,
    lifecycle: Arc<Lifecycle>,
    connection: Arc<RpcConnection>,
}

impl ServerSession {
    /// Start answering requests arriving on `transport`
    pub fn start(server: Server, transport: Arc<dyn Transport>) -> Self {
        let lifecycle = Arc::new(Lifecycle::new());
        let methods = session_methods(&server, &lifecycle);
        let connection = RpcConnection::start(transport, methods);
        info!(server = %server.info().name, "Session started");

        Self {
            server,
            lifecycle,
            connection,
        }
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    pub fn connection(&self) -> &Arc<RpcConnection> {
        &self.connection
    }

    /// Run until the peer disconnects, then release the transport
    pub async fn run(self) -> Result<(), Error> {
        let mut changes = self.server.tools().subscribe();

        loop {
            tokio::select! {
                _ = self.connection.closed() => break,
                change = changes.recv() => match change {
                    Ok(()) | Err(RecvError::Lagged(_)) => self.notify_tools_changed().await,
                    Err(RecvError::Closed) => {
                        self.connection.closed().await;
                        break;
                    }
                },
            }
        }

        info!(server = %self.server.info().name, "Session ended");
        self.connection.close().await
    }

    async fn notify_tools_changed(&self) {
        if !self.lifecycle.wants_tool_list_changed() {
            return;
        }
        debug!("Notifying client of tool list change");
        if let Err(e) = self
            .connection
            .notify("notifications/tools/list_changed", None)
            .await
        {
            warn!("Failed to send tool list change: {}", e);
        }
    }
}

/// Register a request handler that is refused until `initialize` arrived.
///
/// The state is checked when the request is read, not when its future runs.
fn serve_initialized<F, Fut>(
    methods: &mut MethodTable,
    lifecycle: &Arc<Lifecycle>,
    method: &'static str,
    handler: F,
) where
    F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, Error>> + Send + 'static,
{
    let lifecycle = lifecycle.clone();
    methods.on_request(method, move |params| {
        let call = lifecycle.check_request(method).map(|()| handler(params));
        async move { call?.await }
    });
}

fn session_methods(server: &Server, lifecycle: &Arc<Lifecycle>) -> MethodTable {
    let mut methods = MethodTable::new();

    let init_server = server.clone();
    let init_lifecycle = lifecycle.clone();
    methods.on_request("initialize", move |params| {
        let result = InitializeRequestParams::from_params(params)
            .and_then(|params| init_lifecycle.begin(params))
            .and_then(|handshake| {
                let result = InitializeResult {
                    // echo whatever version the client asked for
                    protocol_version: handshake.protocol_version,
                    capabilities: init_server.capabilities(),
                    server_info: init_server.info().clone(),
                    instructions: init_server.instructions().map(str::to_string),
                };
                Ok(serde_json::to_value(result)?)
            });
        async move { result }
    });

    let ack_lifecycle = lifecycle.clone();
    methods.on_notification("notifications/initialized", move |_| {
        ack_lifecycle.acknowledge();
    });

    methods.on_request("ping", |_| async { Ok(json!({})) });

    let tools = server.tools().clone();
    serve_initialized(&mut methods, lifecycle, "tools/list", move |_| {
        let tools = tools.clone();
        async move {
            let result = ListToolsResult {
                tools: tools.list_tools().await,
            };
            Ok(serde_json::to_value(result)?)
        }
    });

    let tools = server.tools().clone();
    serve_initialized(&mut methods, lifecycle, "tools/call", move |params| {
        let tools = tools.clone();
        async move {
            let params: CallToolParams = serde_json::from_value(params.unwrap_or(Value::Null))
                .map_err(|e| Error::InvalidParams(format!("tools/call: {}", e)))?;
            Ok(serde_json::to_value(tools.call(params).await)?)
        }
    });

    let resources = server.resources().clone();
    serve_initialized(&mut methods, lifecycle, "resources/list", move |_| {
        let resources = resources.clone();
        async move {
            let result = ListResourcesResult {
                resources: resources.list_resources().await,
            };
            Ok(serde_json::to_value(result)?)
        }
    });

    let resources = server.resources().clone();
    serve_initialized(
        &mut methods,
        lifecycle,
        "resources/templates/list",
        move |_| {
            let resources = resources.clone();
            async move {
                let result = ListResourceTemplatesResult {
                    resource_templates: resources.list_templates().await,
                };
                Ok(serde_json::to_value(result)?)
            }
        },
    );

    serve_initialized(&mut methods, lifecycle, "prompts/list", |_| async {
        Ok(serde_json::to_value(ListPromptsResult::default())?)
    });

    methods
}
