//! MCP Client Core implementation
//!
//! A [`Client`] drives one server connection: it performs the handshake,
//! keeps a cache of the server's tools, answers pings from the server and
//! optionally pings the server itself to detect a dead peer.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::Error;
use crate::rpc::{MethodTable, RpcConnection};
use crate::transport::{HttpOptions, HttpTransport, ProcessOptions, ProcessTransport, Transport};
use crate::types::initialize::{
    ClientCapabilities, Implementation, InitializeRequestParams, InitializeResult,
    PROTOCOL_VERSION,
};
use crate::types::prompts::ListPromptsResult;
use crate::types::resources::{ListResourceTemplatesResult, ListResourcesResult};
use crate::types::tools::{CallToolParams, CallToolResult, ListToolsResult, Tool};

/// Decides locally whether a tool call may be sent
pub type Permission = Arc<dyn Fn(&str, &Map<String, Value>) -> bool + Send + Sync>;

/// Periodic liveness check of the server.
///
/// A ping that fails or outlives `timeout` closes the connection, which fails
/// every pending call. The owning process is only terminated when
/// `exit_on_failure` is set, which it is not by default.
#[derive(Debug, Clone)]
pub struct KeepAlive {
    /// Time between pings
    pub interval: Duration,
    /// How long a ping may take before the server counts as dead
    pub timeout: Duration,
    /// Terminate the whole process instead of only closing the connection.
    /// Defaults to `false`.
    pub exit_on_failure: bool,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            exit_on_failure: false,
        }
    }
}

impl KeepAlive {
    /// Ping every `interval`, giving each ping `timeout` to answer
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            exit_on_failure: false,
        }
    }

    /// Exit the process with a non-zero status when a ping fails
    pub fn with_exit_on_failure(mut self, exit: bool) -> Self {
        self.exit_on_failure = exit;
        self
    }
}

/// Configuration for the MCP client
#[derive(Clone)]
pub struct ClientConfig {
    /// Name reported in `clientInfo`
    pub name: String,
    pub version: String,
    /// Applied to every request; `None` waits as long as the connection lives
    pub request_timeout: Option<Duration>,
    pub keep_alive: Option<KeepAlive>,
    pub permission: Option<Permission>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "mcp-engine".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            request_timeout: None,
            keep_alive: None,
            permission: None,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("request_timeout", &self.request_timeout)
            .field("keep_alive", &self.keep_alive)
            .field("permission", &self.permission.is_some())
            .finish()
    }
}

/// Builder for creating Client instances with custom configuration
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Create a builder reporting `name` and `version` as `clientInfo`
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            config: ClientConfig {
                name: name.into(),
                version: version.into(),
                ..Default::default()
            },
        }
    }

    /// Create a builder from an existing configuration
    pub fn from_config(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// Ping the server periodically
    pub fn with_keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.config.keep_alive = Some(keep_alive);
        self
    }

    /// Consult `permission` before each tool call
    pub fn with_permission<F>(mut self, permission: F) -> Self
    where
        F: Fn(&str, &Map<String, Value>) -> bool + Send + Sync + 'static,
    {
        self.config.permission = Some(Arc::new(permission));
        self
    }

    /// The configuration built so far
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect over an already open transport, waiting for the handshake
    pub async fn connect<T: Transport + 'static>(self, transport: T) -> Result<Client, Error> {
        Client::start(Arc::new(transport), self.config, true).await
    }

    /// Spawn a server process. Returns as soon as `initialize` is written.
    pub async fn connect_process(self, options: &ProcessOptions) -> Result<Client, Error> {
        let transport = ProcessTransport::spawn(options)?;
        Client::start(Arc::new(transport), self.config, false).await
    }

    /// Connect to an SSE endpoint, waiting for the handshake
    pub async fn connect_http(self, options: HttpOptions) -> Result<Client, Error> {
        let transport = HttpTransport::connect(options).await?;
        Client::start(Arc::new(transport), self.config, true).await
    }
}

struct Inner {
    connection: Arc<RpcConnection>,
    config: ClientConfig,
    server: watch::Sender<Option<InitializeResult>>,
    tools: Mutex<Option<Vec<Tool>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

/// Main client for MCP protocol communication
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Create a new client builder
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(name, version)
    }

    async fn start(
        transport: Arc<dyn Transport>,
        config: ClientConfig,
        wait_for_initialize: bool,
    ) -> Result<Self, Error> {
        let tools_changed = Arc::new(Notify::new());

        let mut methods = MethodTable::new();
        methods.on_request("ping", |_| async { Ok(json!({})) });
        let changed = tools_changed.clone();
        methods.on_notification("notifications/tools/list_changed", move |_| {
            changed.notify_one();
        });

        let connection = RpcConnection::start(transport, methods);
        let (server, _) = watch::channel(None);
        let client = Client {
            inner: Arc::new(Inner {
                connection,
                config,
                server,
                tools: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        };

        let params = InitializeRequestParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities {
                roots: Some([("listChanged".to_string(), json!(false))].into_iter().collect()),
                sampling: Some(Default::default()),
                ..Default::default()
            },
            client_info: Implementation::new(
                client.inner.config.name.clone(),
                client.inner.config.version.clone(),
            ),
        };
        let params = Some(serde_json::to_value(params)?);

        if wait_for_initialize {
            let result = match client
                .inner
                .connection
                .request_with_timeout("initialize", params, client.inner.config.request_timeout)
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    let _ = client.inner.connection.close().await;
                    return Err(e);
                }
            };
            client.handshake_completed(serde_json::from_value(result)?);
            client.notify_initialized().await?;
            let warm = client.clone();
            client.spawn(async move {
                if let Err(e) = warm.refresh_tools().await {
                    warn!("Failed to load tool list: {}", e);
                }
            });
        } else {
            let pending = client
                .inner
                .connection
                .start_request("initialize", params)
                .await?;
            // The server reads in order, so everything written after the
            // initialize request is seen after it.
            client.notify_initialized().await?;
            let handshake = client.clone();
            client.spawn(async move {
                let result = pending
                    .wait()
                    .await
                    .and_then(|value| Ok(serde_json::from_value::<InitializeResult>(value)?));
                match result {
                    Ok(result) => {
                        handshake.handshake_completed(result);
                        if let Err(e) = handshake.refresh_tools().await {
                            warn!("Failed to load tool list: {}", e);
                        }
                    }
                    Err(e) => {
                        error!("Initialize failed: {}", e);
                        let _ = handshake.inner.connection.close().await;
                    }
                }
            });
        }

        client.spawn(refresh_on_change(
            Arc::downgrade(&client.inner),
            client.inner.connection.clone(),
            tools_changed,
        ));
        if let Some(keep_alive) = client.inner.config.keep_alive.clone() {
            client.spawn(keep_alive_loop(client.inner.connection.clone(), keep_alive));
        }

        Ok(client)
    }

    fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    fn handshake_completed(&self, result: InitializeResult) {
        info!(
            server = %result.server_info.name,
            version = %result.server_info.version,
            protocol = %result.protocol_version,
            "Connected to MCP server"
        );
        self.inner.server.send_replace(Some(result));
    }

    async fn notify_initialized(&self) -> Result<(), Error> {
        self.inner
            .connection
            .notify("notifications/initialized", None)
            .await
    }

    /// The server's `initialize` answer, if it has arrived
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.inner.server.borrow().clone()
    }

    /// Whether the handshake has completed
    pub fn is_initialized(&self) -> bool {
        self.inner.server.borrow().is_some()
    }

    /// Wait for the handshake to complete
    pub async fn initialized(&self) -> Result<InitializeResult, Error> {
        let mut server = self.inner.server.subscribe();
        tokio::select! {
            result = server.wait_for(Option::is_some) => match result {
                Ok(info) => info.clone().ok_or(Error::ConnectionClosed),
                Err(_) => Err(Error::ConnectionClosed),
            },
            _ = self.inner.connection.closed() => Err(Error::ConnectionClosed),
        }
    }

    /// Whether the connection is still open
    pub fn is_connected(&self) -> bool {
        !self.inner.connection.is_closed()
    }

    /// The configuration this client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    async fn request<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<R, Error> {
        let result = self
            .inner
            .connection
            .request_with_timeout(method, params, self.inner.config.request_timeout)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Fetch the tool list from the server and update the cache
    pub async fn list_tools(&self) -> Result<Vec<Tool>, Error> {
        let result: ListToolsResult = self.request("tools/list", None).await?;
        *self.inner.tools.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(result.tools.clone());
        Ok(result.tools)
    }

    /// The cached tool list, fetched on first use
    pub async fn tools(&self) -> Result<Vec<Tool>, Error> {
        if let Some(tools) = self.cached_tools() {
            return Ok(tools);
        }
        self.list_tools().await
    }

    /// The cached tool list, without asking the server
    pub fn cached_tools(&self) -> Option<Vec<Tool>> {
        self.inner
            .tools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn refresh_tools(&self) -> Result<(), Error> {
        let tools = self.list_tools().await?;
        debug!(count = tools.len(), "Tool cache refreshed");
        Ok(())
    }

    /// List the server's resources
    pub async fn list_resources(&self) -> Result<ListResourcesResult, Error> {
        self.request("resources/list", None).await
    }

    /// List the server's resource templates
    pub async fn list_resource_templates(&self) -> Result<ListResourceTemplatesResult, Error> {
        self.request("resources/templates/list", None).await
    }

    /// List the server's prompts
    pub async fn list_prompts(&self) -> Result<ListPromptsResult, Error> {
        self.request("prompts/list", None).await
    }

    /// Check that the server is responsive
    pub async fn ping(&self) -> Result<(), Error> {
        self.request::<Value>("ping", None).await.map(|_| ())
    }

    /// Call a tool on the server.
    ///
    /// A call refused by the permission predicate never leaves the process and
    /// comes back as an error result.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<CallToolResult, Error> {
        if let Some(permission) = &self.inner.config.permission {
            if !permission(name, &arguments) {
                info!(tool = %name, "Tool call denied");
                return Ok(CallToolResult::error(format!(
                    "Permission denied for tool {}",
                    name
                )));
            }
        }

        let params = CallToolParams {
            name: name.to_string(),
            arguments,
            meta: None,
        };
        self.request("tools/call", Some(serde_json::to_value(params)?))
            .await
    }

    /// Close the connection and release the transport.
    ///
    /// For a spawned server this kills the process and waits for it.
    pub async fn dispose(&self) -> Result<(), Error> {
        let tasks: Vec<_> = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
        self.inner.connection.close().await
    }
}

async fn refresh_on_change(
    client: Weak<Inner>,
    connection: Arc<RpcConnection>,
    changed: Arc<Notify>,
) {
    loop {
        tokio::select! {
            _ = connection.closed() => break,
            _ = changed.notified() => {
                let Some(inner) = client.upgrade() else { break };
                debug!("Server tool list changed");
                if let Err(e) = (Client { inner }).refresh_tools().await {
                    warn!("Failed to refresh tool list: {}", e);
                }
            }
        }
    }
}

async fn keep_alive_loop(connection: Arc<RpcConnection>, keep_alive: KeepAlive) {
    let mut ticker = tokio::time::interval(keep_alive.interval);
    // the first tick fires immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = connection.closed() => break,
            _ = ticker.tick() => {}
        }

        match connection
            .request_with_timeout("ping", None, Some(keep_alive.timeout))
            .await
        {
            Ok(_) => debug!("Keep-alive ping answered"),
            Err(e) => {
                error!("Server failed keep-alive ping: {}", e);
                if keep_alive.exit_on_failure {
                    std::process::exit(1);
                }
                if let Err(e) = connection.close().await {
                    warn!("Error closing connection: {}", e);
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Message, Response, decode_line, encode_line};
    use crate::server::Server;
    use crate::transport::ChannelTransport;
    use crate::types::tools::ToolBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn echo_server() -> Server {
        let server = Server::new("test-server", "1.0");
        server
            .tools()
            .register_fn(
                ToolBuilder::new("echo", "Echo the input")
                    .string_param("input", "Text to echo")
                    .build(),
                |args| {
                    Ok(args
                        .get("input")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string())
                },
            )
            .await;
        server
    }

    fn serve(server: &Server) -> ChannelTransport {
        let (client_side, server_side) = ChannelTransport::pair();
        let server = server.clone();
        tokio::spawn(async move { server.serve(server_side).await });
        client_side
    }

    fn input(text: &str) -> Map<String, Value> {
        let mut arguments = Map::new();
        arguments.insert("input".to_string(), json!(text));
        arguments
    }

    /// Answers `initialize` and then nothing else
    fn mute_after_handshake() -> ChannelTransport {
        let (client_side, peer) = ChannelTransport::pair();
        tokio::spawn(async move {
            while let Ok(Some(line)) = peer.read_line().await {
                let Ok(Message::Request(request)) = decode_line(&line) else {
                    continue;
                };
                if request.method != "initialize" {
                    continue;
                }
                let result = json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "serverInfo": { "name": "mute", "version": "0" }
                });
                let response = Message::Response(Response::success(request.id, result));
                let line = encode_line(&response).unwrap();
                peer.write(line.as_bytes()).await.unwrap();
            }
        });
        client_side
    }

    #[tokio::test]
    async fn handshake_and_call() {
        let server = echo_server().await;
        let client = Client::builder("test-client", "0.1")
            .connect(serve(&server))
            .await
            .unwrap();

        let info = client.initialized().await.unwrap();
        assert_eq!(info.server_info.name, "test-server");
        assert_eq!(info.protocol_version, PROTOCOL_VERSION);
        assert!(client.is_initialized());

        let result = client.call_tool("echo", input("hello there")).await.unwrap();
        assert!(!result.is_error);
        assert_eq!(result.text(), "hello there");

        client.ping().await.unwrap();
        client.dispose().await.unwrap();
        assert!(client.ping().await.is_err());
    }

    #[tokio::test]
    async fn denied_calls_stay_local() {
        let server = echo_server().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let client = Client::builder("test-client", "0.1")
            .with_permission(move |name, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                name != "echo"
            })
            .connect(serve(&server))
            .await
            .unwrap();

        let result = client.call_tool("echo", input("hi")).await.unwrap();
        assert!(result.is_error);
        assert_eq!(result.text(), "Permission denied for tool echo");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let result = client.call_tool("missing", Map::new()).await.unwrap();
        assert!(result.is_error);
        assert_eq!(result.text(), "Tool missing not found");
    }

    #[tokio::test]
    async fn cache_follows_server_changes() {
        let server = echo_server().await;
        let client = Client::builder("test-client", "0.1")
            .connect(serve(&server))
            .await
            .unwrap();
        assert_eq!(client.tools().await.unwrap().len(), 1);

        server
            .tools()
            .register_fn(ToolBuilder::new("late", "Added later").build(), |_| Ok("ok"))
            .await;

        let mut attempts = 0;
        while client.cached_tools().map(|t| t.len()) != Some(2) {
            attempts += 1;
            assert!(attempts < 100, "tool cache never refreshed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn request_timeout_applies() {
        let client = Client::builder("test-client", "0.1")
            .with_request_timeout(Duration::from_millis(50))
            .connect(mute_after_handshake())
            .await
            .unwrap();

        match client.ping().await {
            Err(Error::Timeout(_)) => {}
            other => panic!("expected timeout, got {:?}", other),
        }
        // a timed out request leaves the connection usable
        assert!(client.is_connected());
    }

    #[test]
    fn keep_alive_only_closes_by_default() {
        assert!(!KeepAlive::default().exit_on_failure);
        let keep_alive = KeepAlive::new(Duration::from_secs(5), Duration::from_secs(1));
        assert!(!keep_alive.exit_on_failure);
        assert!(keep_alive.with_exit_on_failure(true).exit_on_failure);
    }

    #[tokio::test]
    async fn keep_alive_closes_dead_connection() {
        let client = Client::builder("test-client", "0.1")
            .with_keep_alive(KeepAlive::new(
                Duration::from_millis(20),
                Duration::from_millis(50),
            ))
            .connect(mute_after_handshake())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while client.is_connected() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(client.ping().await.is_err());
    }
}
