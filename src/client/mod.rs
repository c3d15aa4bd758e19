//! MCP Client Implementation
//!
//! [`Client`] talks to one server over any [`Transport`](crate::transport::Transport);
//! [`RemoteTool`] and [`ClientPool`] expose the tools of one or many servers
//! as plain callable functions.

pub mod client;
pub mod function;
pub mod pool;

pub use client::{Client, ClientBuilder, ClientConfig, KeepAlive, Permission};
pub use function::RemoteTool;
pub use pool::ClientPool;
