//! MCP Server
//!
//! A [`Server`] owns the tool and resource registries and the identity it
//! reports during the handshake. It is cheap to clone; every connection served
//! gets its own [`ServerSession`] with independent handshake state while the
//! registries are shared.

use serde_json::json;
use std::sync::Arc;

use crate::errors::Error;
use crate::server_session::ServerSession;
use crate::tools::{ResourceRegistry, ToolRegistry};
use crate::transport::{StdioTransport, Transport};
use crate::types::initialize::{Implementation, ServerCapabilities};

/// Builder for [`Server`]
pub struct ServerBuilder {
    name: String,
    version: String,
    instructions: Option<String>,
    tools: Option<Arc<ToolRegistry>>,
    resources: Option<Arc<ResourceRegistry>>,
}

impl ServerBuilder {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            instructions: None,
            tools: None,
            resources: None,
        }
    }

    /// Free-form usage notes returned from `initialize`
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Share an existing tool registry instead of creating one
    pub fn with_tool_registry(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_resource_registry(mut self, resources: Arc<ResourceRegistry>) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn build(self) -> Server {
        Server {
            info: Implementation::new(self.name, self.version),
            instructions: self.instructions,
            tools: self.tools.unwrap_or_default(),
            resources: self.resources.unwrap_or_default(),
        }
    }
}

/// Server for the Model Context Protocol
#[derive(Clone)]
pub struct Server {
    info: Implementation,
    instructions: Option<String>,
    tools: Arc<ToolRegistry>,
    resources: Arc<ResourceRegistry>,
}

impl Server {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        ServerBuilder::new(name, version).build()
    }

    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> ServerBuilder {
        ServerBuilder::new(name, version)
    }

    pub fn info(&self) -> &Implementation {
        &self.info
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn resources(&self) -> &Arc<ResourceRegistry> {
        &self.resources
    }

    /// Capabilities advertised in every `initialize` response
    pub fn capabilities(&self) -> ServerCapabilities {
        let mut capabilities = ServerCapabilities::default();
        capabilities
            .tools
            .insert("listChanged".to_string(), json!(true));
        capabilities
    }

    /// Serve one connection until the peer goes away
    pub async fn serve<T: Transport + 'static>(&self, transport: T) -> Result<(), Error> {
        ServerSession::start(self.clone(), Arc::new(transport))
            .run()
            .await
    }

    /// Serve this process's stdin/stdout
    pub async fn serve_stdio(&self) -> Result<(), Error> {
        tracing::info!(server = %self.info.name, "Serving MCP over stdio");
        self.serve(StdioTransport::new()).await
    }
}
