//! A set of named clients used as one tool source

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::warn;

use crate::client::{Client, RemoteTool};
use crate::errors::Error;
use crate::types::tools::CallToolResult;

/// Named clients queried as a single tool source
#[derive(Default)]
pub struct ClientPool {
    clients: IndexMap<String, Client>,
}

impl ClientPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client; one already registered under `name` is returned
    pub fn insert(&mut self, name: impl Into<String>, client: Client) -> Option<Client> {
        self.clients.insert(name.into(), client)
    }

    /// Take a client out of the pool without disposing it
    pub fn remove(&mut self, name: &str) -> Option<Client> {
        self.clients.shift_remove(name)
    }

    /// Look up a client by name
    pub fn get(&self, name: &str) -> Option<&Client> {
        self.clients.get(name)
    }

    /// Number of clients in the pool
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the pool has no clients
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Clients with their names, in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Client)> {
        self.clients
            .iter()
            .map(|(name, client)| (name.as_str(), client))
    }

    /// Tools of every member, in insertion order.
    ///
    /// A member that fails to list is skipped.
    pub async fn functions(&self) -> Vec<RemoteTool> {
        let mut functions = Vec::new();
        for (name, client) in &self.clients {
            match client.functions().await {
                Ok(tools) => functions.extend(tools),
                Err(e) => warn!(client = %name, "Failed to list tools: {}", e),
            }
        }
        functions
    }

    /// Route a call to the first member offering `tool`
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: Map<String, Value>,
    ) -> Result<CallToolResult, Error> {
        for client in self.clients.values() {
            let Ok(tools) = client.tools().await else {
                continue;
            };
            if tools.iter().any(|t| t.name == tool) {
                return client.call_tool(tool, arguments).await;
            }
        }
        Ok(CallToolResult::error(format!("Tool {} not found", tool)))
    }

    /// Dispose every member; the first error is returned after all are closed
    pub async fn dispose(&mut self) -> Result<(), Error> {
        let mut first_error = None;
        for (name, client) in self.clients.drain(..) {
            if let Err(e) = client.dispose().await {
                warn!(client = %name, "Failed to close client: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Server;
    use crate::transport::ChannelTransport;
    use crate::types::tools::ToolBuilder;
    use serde_json::json;

    async fn member(server_name: &str, tool: &str) -> Client {
        let server = Server::new(server_name, "1.0");
        let reply = format!("{} from {}", tool, server_name);
        server
            .tools()
            .register_fn(
                ToolBuilder::new(tool, "Reply with a fixed text").build(),
                move |_| Ok(reply.clone()),
            )
            .await;

        let (client_side, server_side) = ChannelTransport::pair();
        tokio::spawn(async move { server.serve(server_side).await });
        Client::builder("pool-test", "0.1")
            .connect(client_side)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn routes_calls_to_the_owner() {
        let mut pool = ClientPool::new();
        pool.insert("a", member("alpha", "first").await);
        pool.insert("b", member("beta", "second").await);

        let names: Vec<String> = pool
            .functions()
            .await
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(names, vec!["first", "second"]);

        let result = pool.call_tool("second", Map::new()).await.unwrap();
        assert_eq!(result.text(), "second from beta");

        let result = pool.call_tool("third", Map::new()).await.unwrap();
        assert!(result.is_error);

        pool.dispose().await.unwrap();
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn member_permissions_apply() {
        let server = Server::new("guarded", "1.0");
        server
            .tools()
            .register_fn(ToolBuilder::new("rm", "Remove things").build(), |_| {
                Ok("gone")
            })
            .await;
        let (client_side, server_side) = ChannelTransport::pair();
        tokio::spawn(async move { server.serve(server_side).await });
        let guarded = Client::builder("pool-test", "0.1")
            .with_permission(|_, args| args.get("confirm") == Some(&json!(true)))
            .connect(client_side)
            .await
            .unwrap();

        let mut pool = ClientPool::new();
        pool.insert("guarded", guarded);

        let denied = pool.call_tool("rm", Map::new()).await.unwrap();
        assert!(denied.is_error);

        let mut arguments = Map::new();
        arguments.insert("confirm".to_string(), json!(true));
        let allowed = pool.call_tool("rm", arguments).await.unwrap();
        assert!(!allowed.is_error);
        assert_eq!(allowed.text(), "gone");
    }
}
