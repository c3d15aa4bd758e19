//! Tool Support
//!
//! The registry that binds tool descriptors to handlers, the resource catalog,
//! and the conversions between raw JSON arguments/results and Rust values.

pub mod arguments;
pub mod output;
pub mod resource_registry;
pub mod tool_registry;

pub use arguments::ArgumentsExt;
pub use output::ToolOutput;
pub use resource_registry::ResourceRegistry;
pub use tool_registry::{RegisteredTool, ToolHandler, ToolRegistry};
