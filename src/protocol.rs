//! JSON-RPC protocol handling for LSP
//!
//! Implements the JSON-RPC 2.0 message format used by LSP,
//! including Content-Length header parsing for stdio transport.

use serde::{Deserialize, Serialize};

/// JSON-RPC version constant
pub const JSONRPC_VERSION: &str = "2.0";

fn frame(body: String) -> Vec<u8> {
    format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
}

/// JSON-RPC request message
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: i64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: i64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }

    /// Encode request to LSP wire format with Content-Length header
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        Ok(frame(serde_json::to_string(self)?))
    }
}

/// JSON-RPC notification (no id, no response expected)
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }

    /// Encode notification to LSP wire format with Content-Length header
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        Ok(frame(serde_json::to_string(self)?))
    }
}

/// JSON-RPC response (outgoing to server - for responding to server requests)
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponseOut {
    pub jsonrpc: &'static str,
    pub id: serde_json::Value,
    pub result: serde_json::Value,
}

impl JsonRpcResponseOut {
    /// Create a success response with null result
    pub fn success_null(id: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: serde_json::Value::Null,
        }
    }

    /// Encode response to LSP wire format with Content-Length header
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        Ok(frame(serde_json::to_string(self)?))
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RpcFailure {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl std::fmt::Display for RpcFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// One decoded frame from the server, before protocol-level classification.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<RpcFailure>,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
}

/// Classified form of a [`RawMessage`]
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    /// Response to a request we sent
    Response {
        id: i64,
        result: Result<serde_json::Value, RpcFailure>,
    },
    /// Server -> client request: requires a response from us
    ServerRequest {
        id: serde_json::Value,
        method: String,
    },
    /// Server -> client notification
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

impl RawMessage {
    pub fn classify(self) -> Option<IncomingMessage> {
        match (self.id, self.method) {
            // id + method: request from the server to us
            (Some(id), Some(method)) => Some(IncomingMessage::ServerRequest { id, method }),
            // id only: response to one of our requests
            (Some(id), None) => {
                let id = id.as_i64()?;
                let result = match self.error {
                    Some(err) => Err(err),
                    None => Ok(self.result.unwrap_or(serde_json::Value::Null)),
                };
                Some(IncomingMessage::Response { id, result })
            }
            // method only: notification
            (None, Some(method)) => Some(IncomingMessage::Notification {
                method,
                params: self.params,
            }),
            (None, None) => None,
        }
    }
}

/// Parse Content-Length header from LSP message headers
///
/// LSP uses HTTP-like headers before the JSON body:
/// ```text
/// Content-Length: 123\r\n
/// \r\n
/// {"jsonrpc": "2.0", ...}
/// ```
pub fn parse_content_length(headers: &str) -> Option<usize> {
    for line in headers.lines() {
        let line = line.trim();
        if line.to_lowercase().starts_with("content-length:") {
            return line
                .split(':')
                .nth(1)
                .and_then(|len| len.trim().parse().ok());
        }
    }
    None
}
