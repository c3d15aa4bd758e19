//! MCP Lifecycle Management
//!
//! Per-connection handshake state on the server side:
//!
//! ```text
//! Uninitialized --initialize--> AwaitingAck --notifications/initialized--> Ready
//! ```
//!
//! Before `initialize` only `initialize` and `ping` are answered. Requests are
//! served from `AwaitingAck` onwards because HTTP peers may deliver the first
//! request ahead of the acknowledgement. The state never goes back; a new
//! handshake needs a new connection.

use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::errors::Error;
use crate::types::initialize::{ClientCapabilities, Implementation, InitializeRequestParams};

/// Handshake states of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    AwaitingAck,
    Ready,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "Uninitialized"),
            SessionState::AwaitingAck => write!(f, "AwaitingAck"),
            SessionState::Ready => write!(f, "Ready"),
        }
    }
}

/// What the client declared in `initialize`
#[derive(Debug, Clone)]
pub struct Handshake {
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: Implementation,
}

struct Inner {
    state: SessionState,
    handshake: Option<Handshake>,
}

/// Handshake state machine for one connection
pub struct Lifecycle {
    inner: RwLock<Inner>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: SessionState::Uninitialized,
                handshake: None,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    /// Record the client's `initialize` and move to `AwaitingAck`
    pub fn begin(&self, params: InitializeRequestParams) -> Result<Handshake, Error> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.state != SessionState::Uninitialized {
            return Err(Error::InvalidState(format!(
                "initialize received in state {}",
                inner.state
            )));
        }

        let handshake = Handshake {
            protocol_version: params.protocol_version,
            capabilities: params.capabilities,
            client_info: params.client_info,
        };
        info!(
            client = %handshake.client_info.name,
            version = %handshake.client_info.version,
            protocol = %handshake.protocol_version,
            "Client initializing"
        );

        inner.state = SessionState::AwaitingAck;
        inner.handshake = Some(handshake.clone());
        Ok(handshake)
    }

    /// Handle `notifications/initialized`; returns whether the state changed
    pub fn acknowledge(&self) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match inner.state {
            SessionState::AwaitingAck => {
                inner.state = SessionState::Ready;
                debug!("Handshake complete");
                true
            }
            state => {
                warn!(state = %state, "Unexpected initialized notification");
                false
            }
        }
    }

    /// Whether a request for `method` may be served in the current state
    pub fn check_request(&self, method: &str) -> Result<(), Error> {
        match (self.state(), method) {
            (SessionState::Uninitialized, "initialize" | "ping") => Ok(()),
            (SessionState::Uninitialized, _) => Err(Error::NotInitialized(format!(
                "{} received before initialize",
                method
            ))),
            _ => Ok(()),
        }
    }

    pub fn handshake(&self) -> Option<Handshake> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .handshake
            .clone()
    }

    /// Whether the client opted in to `notifications/tools/list_changed`
    pub fn wants_tool_list_changed(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .handshake
            .as_ref()
            .is_some_and(|h| h.capabilities.wants_tool_list_changed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::error_codes;
    use serde_json::json;

    fn params(list_changed: bool) -> InitializeRequestParams {
        InitializeRequestParams::from_params(Some(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": { "tools": { "listChanged": list_changed } },
            "clientInfo": { "name": "test-client", "version": "0.1" }
        })))
        .unwrap()
    }

    #[test]
    fn full_handshake() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), SessionState::Uninitialized);

        lifecycle.begin(params(true)).unwrap();
        assert_eq!(lifecycle.state(), SessionState::AwaitingAck);
        assert!(lifecycle.wants_tool_list_changed());

        assert!(lifecycle.acknowledge());
        assert_eq!(lifecycle.state(), SessionState::Ready);
        assert!(!lifecycle.acknowledge());
        assert_eq!(lifecycle.state(), SessionState::Ready);
    }

    #[test]
    fn gating_before_initialize() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.check_request("ping").is_ok());
        assert!(lifecycle.check_request("initialize").is_ok());

        let err = lifecycle.check_request("tools/list").unwrap_err();
        assert_eq!(err.to_code(), error_codes::SERVER_NOT_INITIALIZED);

        lifecycle.begin(params(false)).unwrap();
        assert!(lifecycle.check_request("tools/list").is_ok());
        assert!(!lifecycle.wants_tool_list_changed());
    }

    #[test]
    fn second_initialize_is_rejected() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin(params(false)).unwrap();
        let err = lifecycle.begin(params(true)).unwrap_err();
        assert_eq!(err.to_code(), error_codes::INVALID_REQUEST);
        assert!(!lifecycle.wants_tool_list_changed());
    }

    #[test]
    fn early_ack_is_ignored() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.acknowledge());
        assert_eq!(lifecycle.state(), SessionState::Uninitialized);
    }
}
