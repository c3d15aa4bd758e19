//! Remote tools as callable functions
//!
//! [`RemoteTool`] pairs a tool descriptor with the client that serves it, so
//! an application (an LLM driver, typically) can hand the schema to a model
//! and invoke the tool without knowing which server it lives on.

use serde_json::{Map, Value, json};

use crate::client::Client;
use crate::errors::Error;
use crate::types::tools::{CallToolResult, Tool};

#[derive(Clone)]
pub struct RemoteTool {
    tool: Tool,
    client: Client,
}

impl RemoteTool {
    pub fn new(tool: Tool, client: Client) -> Self {
        Self { tool, client }
    }

    pub fn name(&self) -> &str {
        &self.tool.name
    }

    pub fn description(&self) -> &str {
        &self.tool.description
    }

    pub fn tool(&self) -> &Tool {
        &self.tool
    }

    /// Function schema: `{title, description, type, properties, required}`
    pub fn json_schema(&self) -> Value {
        let schema = &self.tool.input_schema;
        json!({
            "title": self.tool.name,
            "description": self.tool.description,
            "type": schema.kind,
            "properties": schema.properties,
            "required": schema.required,
        })
    }

    pub async fn invoke(&self, arguments: Map<String, Value>) -> Result<CallToolResult, Error> {
        self.client.call_tool(&self.tool.name, arguments).await
    }
}

impl std::fmt::Debug for RemoteTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTool")
            .field("name", &self.tool.name)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// The server's tools bound to this client
    pub async fn functions(&self) -> Result<Vec<RemoteTool>, Error> {
        Ok(self
            .tools()
            .await?
            .into_iter()
            .map(|tool| RemoteTool::new(tool, self.clone()))
            .collect())
    }
}
