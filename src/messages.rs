//! MCP Message Types
//!
//! JSON-RPC 2.0 message structures and the newline-delimited framing used on
//! every transport. One message is one compact JSON document followed by `\n`;
//! batching is not supported.

use crate::errors::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const JSONRPC_VERSION: &str = "2.0";

/// Request identifier, echoed verbatim by the peer
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_string())
    }
}

/// The top-level Message enum for handling JSON-RPC 2.0 messages
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

/// A request expecting exactly one response with the same id
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Request {
    /// JSON-RPC version, always "2.0"
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Response for a JSON-RPC request
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Response {
    /// JSON-RPC version, always "2.0"
    pub jsonrpc: String,
    /// ID from the request
    pub id: RequestId,
    /// Either a result or an error
    #[serde(flatten)]
    pub outcome: ResponseOutcome,
}

/// Represents either a successful result or an error
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ResponseOutcome {
    /// Success case with a result
    Success { result: Value },
    /// Error case with error details
    Error { error: ErrorData },
}

/// Error information for failed requests
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorData {
    /// Error code (e.g., -32600 for Invalid Request)
    pub code: i32,
    /// Human-readable error message
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<ErrorData> for Error {
    fn from(error: ErrorData) -> Self {
        Error::Rpc {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}

/// Notification is a request without an expected response
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Notification {
    /// JSON-RPC version, always "2.0"
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

impl Response {
    /// Create a success response carrying `result`
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            outcome: ResponseOutcome::Success { result },
        }
    }

    /// Create an error response from a local error
    pub fn from_error(id: RequestId, error: &Error) -> Self {
        error_response(id, error.to_code(), &error.to_string(), None)
    }

    /// Turn the response into the caller-facing result
    pub fn into_result(self) -> Result<Value, Error> {
        match self.outcome {
            ResponseOutcome::Success { result } => Ok(result),
            ResponseOutcome::Error { error } => Err(error.into()),
        }
    }
}

/// Create an error response with the given code, message, and optional data
pub fn error_response(id: RequestId, code: i32, message: &str, data: Option<Value>) -> Response {
    Response {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id,
        outcome: ResponseOutcome::Error {
            error: ErrorData {
                code,
                message: message.to_string(),
                data,
            },
        },
    }
}

impl Message {
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(request) => Some(&request.method),
            Message::Notification(notification) => Some(&notification.method),
            Message::Response(_) => None,
        }
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Message::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Response(response)
    }
}

impl From<Notification> for Message {
    fn from(notification: Notification) -> Self {
        Message::Notification(notification)
    }
}

// Classify on field presence: id + result/error is a response, id + method a
// request, and a method without id a notification.
impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        use serde::de::Error as _;

        let value = Value::deserialize(deserializer)?;
        let object = value
            .as_object()
            .ok_or_else(|| D::Error::custom("JSON-RPC message must be an object"))?;

        if !object.contains_key("jsonrpc") {
            return Err(D::Error::custom("Missing jsonrpc field"));
        }

        let has_id = object.get("id").is_some_and(|id| !id.is_null());
        let is_response = object.contains_key("result") || object.contains_key("error");

        if has_id && is_response {
            let response: Response =
                serde_json::from_value(value).map_err(|e| D::Error::custom(e.to_string()))?;
            Ok(Message::Response(response))
        } else if has_id && object.contains_key("method") {
            let request: Request =
                serde_json::from_value(value).map_err(|e| D::Error::custom(e.to_string()))?;
            Ok(Message::Request(request))
        } else if !has_id && object.contains_key("method") {
            let notification: Notification =
                serde_json::from_value(value).map_err(|e| D::Error::custom(e.to_string()))?;
            Ok(Message::Notification(notification))
        } else {
            Err(D::Error::custom("Invalid JSON-RPC message format"))
        }
    }
}

/// Serialize a message as one newline-terminated line
pub fn encode_line(message: &Message) -> Result<String, Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Parse one line of input into a message
pub fn decode_line(line: &str) -> Result<Message, Error> {
    let line = line.trim();
    if line.is_empty() {
        return Err(Error::Protocol("empty line".to_string()));
    }
    Ok(serde_json::from_str(line)?)
}
