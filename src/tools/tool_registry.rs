use futures::FutureExt;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

use crate::tools::output::{ToolOutput, error_result, panic_result};
use crate::types::tools::{CallToolParams, CallToolResult, Tool, ToolBuilder};

/// Handler type for registered tools
pub type ToolHandler =
    Arc<dyn Fn(Map<String, Value>) -> BoxFuture<'static, anyhow::Result<ToolOutput>> + Send + Sync>;

/// A tool descriptor bound to its handler
#[derive(Clone)]
pub struct RegisteredTool {
    pub tool: Tool,
    pub handler: ToolHandler,
}

/// Name to handler map shared by every session of a server.
///
/// Registration may happen at any time; each change is announced on the
/// channel returned by [`ToolRegistry::subscribe`] so sessions can notify
/// their clients.
pub struct ToolRegistry {
    tools: RwLock<IndexMap<String, RegisteredTool>>,
    changes: broadcast::Sender<()>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            tools: RwLock::new(IndexMap::new()),
            changes,
        }
    }

    /// Insert or replace the tool named `tool.name`
    pub async fn register(&self, tool: Tool, handler: ToolHandler) {
        let name = tool.name.clone();
        let replaced = self
            .tools
            .write()
            .await
            .insert(name.clone(), RegisteredTool { tool, handler })
            .is_some();

        if replaced {
            tracing::info!(tool = %name, "Replaced tool registration");
        } else {
            tracing::info!(tool = %name, "Registered tool");
        }
        self.notify_changed();
    }

    /// Register a synchronous handler over the raw argument map
    pub async fn register_fn<F, O>(&self, tool: Tool, handler: F)
    where
        F: Fn(Map<String, Value>) -> anyhow::Result<O> + Send + Sync + 'static,
        O: Into<ToolOutput>,
    {
        let handler: ToolHandler = Arc::new(
            move |args: Map<String, Value>| -> BoxFuture<'static, anyhow::Result<ToolOutput>> {
                futures::future::ready(handler(args).map(Into::<ToolOutput>::into)).boxed()
            },
        );
        self.register(tool, handler).await
    }

    /// Register an async handler over the raw argument map
    pub async fn register_async<F, Fut, O>(&self, tool: Tool, handler: F)
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
        O: Into<ToolOutput> + 'static,
    {
        let handler: ToolHandler = Arc::new(
            move |args: Map<String, Value>| -> BoxFuture<'static, anyhow::Result<ToolOutput>> {
                let call = handler(args);
                async move { call.await.map(Into::<ToolOutput>::into) }.boxed()
            },
        );
        self.register(tool, handler).await
    }

    /// Register a handler taking a typed argument struct.
    ///
    /// The descriptor is derived from `A`'s schema; arguments are
    /// deserialized into `A` before the handler runs.
    pub async fn register_typed<A, F, Fut, O>(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
        O: Into<ToolOutput> + 'static,
    {
        let tool = ToolBuilder::from_args::<A>(name, description).build();
        let tool_name = tool.name.clone();
        let handler = Arc::new(handler);

        let handler: ToolHandler = Arc::new(
            move |args: Map<String, Value>| -> BoxFuture<'static, anyhow::Result<ToolOutput>> {
                let handler = handler.clone();
                let tool_name = tool_name.clone();
                async move {
                    let args: A = serde_json::from_value(Value::Object(args)).map_err(|e| {
                        anyhow::anyhow!("Invalid arguments for {}: {}", tool_name, e)
                    })?;
                    handler(args).await.map(Into::<ToolOutput>::into)
                }
                .boxed()
            },
        );
        self.register(tool, handler).await
    }

    /// Remove a tool; returns whether it existed
    pub async fn unregister(&self, name: &str) -> bool {
        let removed = self.tools.write().await.shift_remove(name).is_some();
        if removed {
            tracing::info!(tool = %name, "Unregistered tool");
            self.notify_changed();
        }
        removed
    }

    /// Registered descriptors in registration order
    pub async fn list_tools(&self) -> Vec<Tool> {
        self.tools
            .read()
            .await
            .values()
            .map(|registered| registered.tool.clone())
            .collect()
    }

    pub async fn get(&self, name: &str) -> Option<RegisteredTool> {
        self.tools.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    /// Receive a message each time the tool set changes
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }

    fn notify_changed(&self) {
        // No receivers just means no session is listening
        let _ = self.changes.send(());
    }

    /// Invoke a tool and turn every outcome into a call result.
    ///
    /// Unknown tools, missing required arguments, handler errors and panics all
    /// come back as `isError` results; this never fails.
    pub async fn call(&self, params: CallToolParams) -> CallToolResult {
        let CallToolParams {
            name,
            arguments,
            meta,
        } = params;

        if let Some(token) = meta.and_then(|meta| meta.progress_token) {
            tracing::debug!(tool = %name, progress_token = %token, "Tool call carries progress token");
        }

        let Some(registered) = self.get(&name).await else {
            tracing::warn!(tool = %name, "Call to unknown tool");
            return CallToolResult::error(format!("Tool {} not found", name));
        };

        let missing = registered
            .tool
            .input_schema
            .required
            .iter()
            .find(|required| matches!(arguments.get(*required), None | Some(Value::Null)));
        if let Some(missing) = missing {
            return CallToolResult::error(format!("Missing required parameter: {}", missing));
        }

        tracing::debug!(tool = %name, "Invoking tool");
        let handler = registered.handler;
        let invocation = AssertUnwindSafe(async move { handler(arguments).await }).catch_unwind();

        match invocation.await {
            Ok(Ok(output)) => output.into_result(),
            Ok(Err(error)) => {
                tracing::warn!(tool = %name, "Tool failed: {:#}", error);
                error_result(&error)
            }
            Err(payload) => {
                tracing::error!(tool = %name, "Tool panicked");
                panic_result(payload)
            }
        }
    }
}
