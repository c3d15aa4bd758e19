//! MCP Prompt Types
//!
//! Prompts are not served; `prompts/list` always answers with an empty list,
//! but a client may still receive prompt descriptors from other servers.

use serde::{Deserialize, Serialize};

/// An argument accepted by a prompt
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// A prompt descriptor
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Prompt {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

/// Result of `prompts/list`
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ListPromptsResult {
    pub prompts: Vec<Prompt>,
}
