//! MCP Initialization Types
//!
//! Types exchanged during the `initialize` handshake: protocol version,
//! capability flags and implementation identity for both peers.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Error;

/// Protocol version this crate speaks
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// A capability entry, e.g. `{"listChanged": true}`
pub type Capability = IndexMap<String, Value>;

/// Name and version of a client or server implementation
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Implementation {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

impl Implementation {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Capabilities declared by the client
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ClientCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<Capability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Capability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Capability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Capability>,
    /// Some clients send a bare boolean here, others an object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Value>,
}

impl ClientCapabilities {
    /// Whether the client asked for `notifications/tools/list_changed`
    pub fn wants_tool_list_changed(&self) -> bool {
        flag(self.tools.as_ref(), "listChanged")
    }
}

/// Capabilities advertised by the server
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Capability,
    #[serde(default)]
    pub resources: Capability,
    #[serde(default)]
    pub prompts: Capability,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub sampling: Capability,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub roots: Capability,
}

impl ServerCapabilities {
    /// Whether the server will send `notifications/tools/list_changed`
    pub fn tools_list_changed(&self) -> bool {
        flag(Some(&self.tools), "listChanged")
    }
}

fn flag(capability: Option<&Capability>, key: &str) -> bool {
    capability
        .and_then(|c| c.get(key))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Parameters of the `initialize` request
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InitializeRequestParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    #[serde(rename = "clientInfo")]
    pub client_info: Implementation,
}

impl InitializeRequestParams {
    /// Accepts named params or the positional form
    /// `[protocolVersion, capabilities, clientInfo]`.
    pub fn from_params(params: Option<Value>) -> Result<Self, Error> {
        match params {
            Some(Value::Array(items)) => {
                let mut items = items.into_iter();
                let protocol_version = items
                    .next()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .ok_or_else(|| {
                        Error::InvalidParams("missing protocolVersion".to_string())
                    })?;
                let capabilities = match items.next() {
                    Some(Value::Null) | None => ClientCapabilities::default(),
                    Some(value) => serde_json::from_value(value)
                        .map_err(|e| Error::InvalidParams(format!("capabilities: {}", e)))?,
                };
                let client_info = items
                    .next()
                    .ok_or_else(|| Error::InvalidParams("missing clientInfo".to_string()))
                    .and_then(|value| {
                        serde_json::from_value(value)
                            .map_err(|e| Error::InvalidParams(format!("clientInfo: {}", e)))
                    })?;
                Ok(Self {
                    protocol_version,
                    capabilities,
                    client_info,
                })
            }
            Some(value) => serde_json::from_value(value)
                .map_err(|e| Error::InvalidParams(format!("initialize: {}", e))),
            None => Err(Error::InvalidParams(
                "initialize requires parameters".to_string(),
            )),
        }
    }
}

/// Result of the `initialize` request
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: Implementation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}
