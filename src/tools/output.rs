//! Conversion of handler return values and failures into call results.

use serde_json::Value;
use std::any::Any;
use std::backtrace::BacktraceStatus;

use crate::types::tools::{CallToolResult, Content};

/// Value returned by a tool handler
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// One text content item
    Text(String),
    /// One text content item per line
    Lines(Vec<String>),
    /// Stringified into one text item
    Json(Value),
    /// Reported as an error item with text `null`
    Null,
}

impl ToolOutput {
    pub fn into_result(self) -> CallToolResult {
        match self {
            ToolOutput::Text(text) => CallToolResult::success([text]),
            ToolOutput::Lines(lines) => CallToolResult::success(lines),
            ToolOutput::Json(Value::Null) | ToolOutput::Null => CallToolResult::error("null"),
            ToolOutput::Json(Value::String(text)) => CallToolResult::success([text]),
            ToolOutput::Json(value) => CallToolResult::success([value.to_string()]),
        }
    }
}

impl From<String> for ToolOutput {
    fn from(value: String) -> Self {
        ToolOutput::Text(value)
    }
}

impl From<&str> for ToolOutput {
    fn from(value: &str) -> Self {
        ToolOutput::Text(value.to_string())
    }
}

impl From<Vec<String>> for ToolOutput {
    fn from(value: Vec<String>) -> Self {
        ToolOutput::Lines(value)
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ToolOutput::Null,
            Value::String(text) => ToolOutput::Text(text),
            other => ToolOutput::Json(other),
        }
    }
}

impl From<()> for ToolOutput {
    fn from(_: ()) -> Self {
        ToolOutput::Null
    }
}

impl<T: Into<ToolOutput>> From<Option<T>> for ToolOutput {
    fn from(value: Option<T>) -> Self {
        value.map_or(ToolOutput::Null, Into::into)
    }
}

macro_rules! display_output {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for ToolOutput {
                fn from(value: $ty) -> Self {
                    ToolOutput::Text(value.to_string())
                }
            }
        )*
    };
}

display_output!(bool, i32, i64, u32, u64, usize, f32, f64);

/// Frames from these crates and modules are invocation plumbing, not user code
const MACHINERY_PREFIXES: &[&str] = &[
    "mcp_engine::tools::",
    "mcp_engine::server",
    "mcp_engine::rpc::",
    "tokio::",
    "futures_util::",
    "futures_core::",
    "futures::",
    "core::",
    "std::",
    "alloc::",
    "anyhow::",
    "__rust",
    "_start",
    "__libc",
    "start_thread",
];

fn is_machinery(symbol: &str) -> bool {
    let symbol = symbol.trim_start_matches('<');
    MACHINERY_PREFIXES
        .iter()
        .any(|prefix| symbol.starts_with(prefix))
}

/// Cause chain plus captured backtrace with invocation frames removed
pub(crate) fn clean_trace(error: &anyhow::Error) -> String {
    let mut lines: Vec<String> = error
        .chain()
        .skip(1)
        .map(|cause| format!("Caused by: {}", cause))
        .collect();

    let backtrace = error.backtrace();
    if backtrace.status() == BacktraceStatus::Captured {
        let rendered = backtrace.to_string();
        let mut keep = false;
        for line in rendered.lines() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("at ") {
                if keep {
                    lines.push(line.to_string());
                }
                continue;
            }
            let symbol = trimmed
                .split_once(": ")
                .map(|(_, symbol)| symbol)
                .unwrap_or(trimmed);
            keep = !is_machinery(symbol);
            if keep {
                lines.push(line.to_string());
            }
        }
    }

    lines.join("\n")
}

/// Error result for a failed handler: message first, then the cleaned trace
pub(crate) fn error_result(error: &anyhow::Error) -> CallToolResult {
    CallToolResult {
        is_error: true,
        content: vec![
            Content::text(error.to_string()),
            Content::text(format!("StackTrace:\n{}", clean_trace(error))),
        ],
    }
}

/// Error result for a handler that panicked
pub(crate) fn panic_result(payload: Box<dyn Any + Send>) -> CallToolResult {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "tool handler panicked".to_string());
    CallToolResult {
        is_error: true,
        content: vec![
            Content::text(message),
            Content::text("StackTrace:\n".to_string()),
        ],
    }
}
