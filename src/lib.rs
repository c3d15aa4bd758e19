//! MCP Engine
//!
//! A Rust implementation of the Model Context Protocol: newline-delimited
//! JSON-RPC 2.0 over a child process's stdio or an HTTP event stream, a
//! registry of callable tools and catalog resources, a server that dispatches
//! protocol requests to that registry and a client that drives a remote server.
//!
//! ```no_run
//! use mcp_engine::{Server, ToolBuilder};
//!
//! # async fn run() -> Result<(), mcp_engine::Error> {
//! let server = Server::new("example", "1.0");
//! server
//!     .tools()
//!     .register_fn(
//!         ToolBuilder::new("echo", "Echo the input")
//!             .string_param("input", "Text to echo")
//!             .build(),
//!         |args| Ok(args["input"].as_str().unwrap_or_default().to_string()),
//!     )
//!     .await;
//! server.serve_stdio().await
//! # }
//! ```

pub mod client;
pub mod errors;
pub mod lifecycle;
pub mod messages;
pub mod rpc;
pub mod server;
pub mod server_session;
pub mod tools;
pub mod transport;
pub mod types;

pub use client::{Client, ClientBuilder, ClientConfig, ClientPool, KeepAlive, RemoteTool};
pub use errors::Error;
pub use server::{Server, ServerBuilder};
pub use tools::{ArgumentsExt, ResourceRegistry, ToolOutput, ToolRegistry};
pub use transport::Transport;
pub use types::tools::{CallToolResult, ParameterBuilder, ParameterType, Tool, ToolBuilder};
