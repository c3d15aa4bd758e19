//! Typed access to raw `tools/call` arguments.

use anyhow::{Context, anyhow};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Argument lookup helpers for handlers registered over raw argument maps
pub trait ArgumentsExt {
    /// Fails with `Missing required parameter: {name}` when absent or null
    fn required<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T>;

    fn optional<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<Option<T>>;

    /// Missing optional parameters take the type's default value
    fn or_default<T: DeserializeOwned + Default>(&self, name: &str) -> anyhow::Result<T> {
        Ok(self.optional(name)?.unwrap_or_default())
    }
}

impl ArgumentsExt for Map<String, Value> {
    fn required<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        self.optional(name)?
            .ok_or_else(|| anyhow!("Missing required parameter: {}", name))
    }

    fn optional<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<Option<T>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .with_context(|| format!("Invalid value for parameter: {}", name)),
        }
    }
}
