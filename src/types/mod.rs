//! MCP Type Definitions
//!
//! Wire shapes for the handshake, tools, resources and prompts.

pub mod initialize;
pub mod prompts;
pub mod resources;
pub mod tools;

pub use initialize::{
    Capability, ClientCapabilities, Implementation, InitializeRequestParams, InitializeResult,
    PROTOCOL_VERSION, ServerCapabilities,
};
pub use prompts::{ListPromptsResult, Prompt, PromptArgument};
pub use resources::{
    ListResourceTemplatesResult, ListResourcesResult, Resource, ResourceTemplate,
};
pub use tools::{
    CallToolParams, CallToolResult, Content, InputSchema, ListToolsResult, ParameterBuilder,
    ParameterSchema, ParameterType, RequestMeta, Tool, ToolBuilder, ToolParameter,
};
