//! Sans-I/O protocol engine
//!
//! A pure state machine between the transport's byte stream and the rest of
//! the manager. Outgoing client intents are serialized to framed bytes;
//! inbound bytes are decoded into [`Event`]s. The engine never touches a
//! socket or a process: all I/O lives in [`crate::transport`].
//!
//! Frames the engine originates on its own (the `initialized` notification
//! after the handshake, null acks for server->client requests) are queued
//! internally and drained by the pump via [`ProtocolEngine::take_outbound`].

use crate::error::{LspmError, Result};
use crate::protocol::{
    parse_content_length, IncomingMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponseOut, RawMessage, RpcFailure,
};
use crate::requests::RequestId;
use crate::types::{Diagnostic, Position, ServerCapabilities};

/// Reserved id for the initialize request; the request table starts at 1.
pub const INIT_REQUEST_ID: i64 = 0;

/// Protocol lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Normal,
    ShuttingDown,
    Exited,
}

impl LifecycleState {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Normal => "normal",
            LifecycleState::ShuttingDown => "shutting-down",
            LifecycleState::Exited => "exited",
        }
    }
}

/// Typed event decoded from the inbound stream.
///
/// Constructed only by the engine.
#[derive(Debug, Clone)]
pub enum Event {
    /// Initialize handshake completed
    Ready(ServerCapabilities),
    /// Unsolicited diagnostics push for one document
    Diagnostics { uri: String, items: Vec<Diagnostic> },
    /// Response to a request we issued
    Response {
        id: RequestId,
        result: std::result::Result<serde_json::Value, RpcFailure>,
    },
    /// window/logMessage or window/showMessage text
    LogMessage(String),
}

/// Sans-I/O LSP client state machine for one server
pub struct ProtocolEngine {
    /// Language name, for logging only
    language: String,
    state: LifecycleState,
    /// Inbound bytes not yet forming a complete frame
    buffer: Vec<u8>,
    /// Engine-originated frames awaiting transmission
    outbound: Vec<Vec<u8>>,
}

impl ProtocolEngine {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            state: LifecycleState::Uninitialized,
            buffer: Vec::new(),
            outbound: Vec::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Drain frames the engine queued on its own behalf
    pub fn take_outbound(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbound)
    }

    fn ensure_normal(&self) -> Result<()> {
        if self.state == LifecycleState::Normal {
            Ok(())
        } else {
            Err(LspmError::NotReady {
                state: self.state.name(),
            })
        }
    }

    fn encode(msg: std::result::Result<Vec<u8>, serde_json::Error>) -> Result<Vec<u8>> {
        msg.map_err(|e| LspmError::Decode(e.to_string()))
    }

    // ========== Client intents ==========

    /// Begin the initialize handshake
    pub fn initialize(&mut self, root_uri: &str) -> Result<Vec<u8>> {
        if self.state != LifecycleState::Uninitialized {
            return Err(LspmError::NotReady {
                state: self.state.name(),
            });
        }

        let params = serde_json::json!({
            "processId": std::process::id(),
            "rootUri": root_uri,
            "capabilities": {
                "textDocument": {
                    "completion": {
                        "completionItem": { "documentationFormat": ["markdown", "plaintext"] }
                    },
                    "hover": { "contentFormat": ["markdown", "plaintext"] },
                    "definition": { "linkSupport": true },
                    "publishDiagnostics": {}
                }
            }
        });

        self.state = LifecycleState::Initializing;
        tracing::debug!(language = %self.language, "sending initialize");
        Self::encode(JsonRpcRequest::new(INIT_REQUEST_ID, "initialize", Some(params)).encode())
    }

    /// textDocument/didOpen
    pub fn did_open(&mut self, uri: &str, language_id: &str, text: &str, version: i32) -> Result<Vec<u8>> {
        self.ensure_normal()?;
        let params = serde_json::json!({
            "textDocument": {
                "uri": uri,
                "languageId": language_id,
                "version": version,
                "text": text
            }
        });
        Self::encode(JsonRpcNotification::new("textDocument/didOpen", Some(params)).encode())
    }

    /// textDocument/didChange (full document sync)
    pub fn did_change(&mut self, uri: &str, version: i32, text: &str) -> Result<Vec<u8>> {
        self.ensure_normal()?;
        let params = serde_json::json!({
            "textDocument": { "uri": uri, "version": version },
            "contentChanges": [{ "text": text }]
        });
        Self::encode(JsonRpcNotification::new("textDocument/didChange", Some(params)).encode())
    }

    /// textDocument/didClose
    pub fn did_close(&mut self, uri: &str) -> Result<Vec<u8>> {
        self.ensure_normal()?;
        let params = serde_json::json!({
            "textDocument": { "uri": uri }
        });
        Self::encode(JsonRpcNotification::new("textDocument/didClose", Some(params)).encode())
    }

    /// textDocument/completion
    pub fn request_completion(&mut self, id: RequestId, uri: &str, pos: Position) -> Result<Vec<u8>> {
        self.position_request(id, "textDocument/completion", uri, pos)
    }

    /// textDocument/hover
    pub fn request_hover(&mut self, id: RequestId, uri: &str, pos: Position) -> Result<Vec<u8>> {
        self.position_request(id, "textDocument/hover", uri, pos)
    }

    /// textDocument/definition
    pub fn request_definition(&mut self, id: RequestId, uri: &str, pos: Position) -> Result<Vec<u8>> {
        self.position_request(id, "textDocument/definition", uri, pos)
    }

    fn position_request(&mut self, id: RequestId, method: &str, uri: &str, pos: Position) -> Result<Vec<u8>> {
        self.ensure_normal()?;
        let params = serde_json::json!({
            "textDocument": { "uri": uri },
            "position": { "line": pos.line, "character": pos.character }
        });
        Self::encode(JsonRpcRequest::new(id, method, Some(params)).encode())
    }

    /// Shutdown request plus exit notification, in one buffer
    pub fn shutdown(&mut self) -> Result<Vec<u8>> {
        self.ensure_normal()?;
        self.state = LifecycleState::ShuttingDown;

        let mut bytes = Self::encode(JsonRpcRequest::new(i64::MAX, "shutdown", None).encode())?;
        bytes.extend(Self::encode(JsonRpcNotification::new("exit", None).encode())?);
        Ok(bytes)
    }

    /// Mark the protocol as finished; called once the process is gone
    pub fn mark_exited(&mut self) {
        self.state = LifecycleState::Exited;
    }

    // ========== Inbound decoding ==========

    /// Feed inbound bytes, returning every event completed by them.
    ///
    /// A partial trailing frame stays buffered for the next call. Malformed
    /// headers or bodies are logged and skipped; later frames still decode.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Event> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        loop {
            let Some(header_end) = find_header_end(&self.buffer) else {
                break;
            };

            let headers = String::from_utf8_lossy(&self.buffer[..header_end]).into_owned();
            let body_start = header_end + 4;

            let Some(content_len) = parse_content_length(&headers) else {
                tracing::warn!(
                    language = %self.language,
                    "frame headers without Content-Length, skipping"
                );
                self.buffer.drain(..body_start);
                continue;
            };

            if self.buffer.len() < body_start + content_len {
                // Partial body; wait for more bytes
                break;
            }

            let body: Vec<u8> = self.buffer[body_start..body_start + content_len].to_vec();
            self.buffer.drain(..body_start + content_len);

            match serde_json::from_slice::<RawMessage>(&body) {
                Ok(raw) => {
                    if let Some(event) = self.dispatch(raw) {
                        events.push(event);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        language = %self.language,
                        error = %e,
                        "unparsable frame body, skipping"
                    );
                }
            }
        }
        events
    }

    fn dispatch(&mut self, raw: RawMessage) -> Option<Event> {
        match raw.classify()? {
            IncomingMessage::ServerRequest { id, method } => {
                // Acknowledge with null so the server never blocks on us
                // (workDoneProgress/create, registerCapability, ...)
                tracing::debug!(language = %self.language, %method, "acknowledging server request");
                if let Ok(encoded) = JsonRpcResponseOut::success_null(id).encode() {
                    self.outbound.push(encoded);
                }
                None
            }
            IncomingMessage::Response { id, result } => self.dispatch_response(id, result),
            IncomingMessage::Notification { method, params } => {
                self.dispatch_notification(&method, params)
            }
        }
    }

    fn dispatch_response(
        &mut self,
        id: i64,
        result: std::result::Result<serde_json::Value, RpcFailure>,
    ) -> Option<Event> {
        if id == INIT_REQUEST_ID && self.state == LifecycleState::Initializing {
            return match result {
                Ok(value) => {
                    let capabilities = value
                        .get("capabilities")
                        .cloned()
                        .and_then(|c| serde_json::from_value(c).ok())
                        .unwrap_or_default();

                    self.state = LifecycleState::Normal;
                    if let Ok(encoded) =
                        JsonRpcNotification::new("initialized", Some(serde_json::json!({}))).encode()
                    {
                        self.outbound.push(encoded);
                    }
                    tracing::info!(language = %self.language, "server initialized");
                    Some(Event::Ready(capabilities))
                }
                Err(err) => {
                    tracing::error!(language = %self.language, %err, "initialize failed");
                    Some(Event::LogMessage(format!("initialize failed: {}", err)))
                }
            };
        }

        if id == i64::MAX {
            // Shutdown acknowledgment
            tracing::debug!(language = %self.language, "shutdown acknowledged");
            return None;
        }

        Some(Event::Response { id, result })
    }

    fn dispatch_notification(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Option<Event> {
        match method {
            "textDocument/publishDiagnostics" => {
                let params = params?;
                let uri = params.get("uri")?.as_str()?.to_string();
                let items = params
                    .get("diagnostics")
                    .cloned()
                    .and_then(|d| serde_json::from_value(d).ok())
                    .unwrap_or_default();
                Some(Event::Diagnostics { uri, items })
            }
            "window/logMessage" | "window/showMessage" => {
                let text = params
                    .as_ref()
                    .and_then(|p| p.get("message"))
                    .and_then(|m| m.as_str())?
                    .to_string();
                Some(Event::LogMessage(text))
            }
            other => {
                tracing::trace!(language = %self.language, method = %other, "unhandled notification");
                None
            }
        }
    }
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn frame(body: &serde_json::Value) -> Vec<u8> {
        let body = body.to_string();
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
    }

    fn init_response() -> serde_json::Value {
        json!({
            "jsonrpc": "2.0",
            "id": 0,
            "result": {
                "capabilities": {
                    "completionProvider": {},
                    "hoverProvider": true,
                    "definitionProvider": true
                }
            }
        })
    }

    /// Engine that has completed the handshake
    fn ready_engine() -> ProtocolEngine {
        let mut engine = ProtocolEngine::new("rust");
        engine.initialize("file:///ws").unwrap();
        let events = engine.feed(&frame(&init_response()));
        assert!(matches!(events[0], Event::Ready(_)));
        // Drain the handshake's queued `initialized` notification so tests
        // observe only the outbound frames they trigger themselves.
        engine.take_outbound();
        engine
    }

    #[test]
    fn test_handshake_lifecycle() {
        let mut engine = ProtocolEngine::new("rust");
        assert_eq!(engine.state(), LifecycleState::Uninitialized);

        let bytes = engine.initialize("file:///ws").unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("\"method\":\"initialize\""));
        assert_eq!(engine.state(), LifecycleState::Initializing);

        let events = engine.feed(&frame(&init_response()));
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Ready(caps) => assert!(caps.hover_provider.is_some()),
            other => panic!("expected Ready, got {:?}", other),
        }
        assert_eq!(engine.state(), LifecycleState::Normal);

        // The initialized notification is queued for the pump
        let outbound = engine.take_outbound();
        assert_eq!(outbound.len(), 1);
        assert!(String::from_utf8_lossy(&outbound[0]).contains("\"method\":\"initialized\""));
    }

    #[test]
    fn test_calls_rejected_outside_normal() {
        let mut engine = ProtocolEngine::new("rust");
        assert!(matches!(
            engine.did_open("file:///a.rs", "rust", "", 1),
            Err(LspmError::NotReady { state: "uninitialized" })
        ));

        engine.initialize("file:///ws").unwrap();
        assert!(matches!(
            engine.request_hover(1, "file:///a.rs", Position::new(0, 0)),
            Err(LspmError::NotReady { state: "initializing" })
        ));

        // Double initialize is also rejected
        assert!(engine.initialize("file:///ws").is_err());
    }

    #[test]
    fn test_feed_reassembles_split_frames() {
        let mut engine = ready_engine();

        let response = frame(&json!({"jsonrpc": "2.0", "id": 1, "result": null}));
        let (first, second) = response.split_at(response.len() / 2);

        assert!(engine.feed(first).is_empty());
        let events = engine.feed(second);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::Response { id: 1, .. }));
    }

    #[test]
    fn test_feed_multiple_frames_in_one_chunk() {
        let mut engine = ready_engine();

        let mut bytes = frame(&json!({"jsonrpc": "2.0", "id": 2, "result": null}));
        bytes.extend(frame(&json!({
            "jsonrpc": "2.0",
            "method": "window/logMessage",
            "params": {"type": 3, "message": "indexing done"}
        })));

        let events = engine.feed(&bytes);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::Response { id: 2, .. }));
        match &events[1] {
            Event::LogMessage(text) => assert_eq!(text, "indexing done"),
            other => panic!("expected LogMessage, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_frame_does_not_desync() {
        let mut engine = ready_engine();

        // Headers without Content-Length, then garbage JSON, then a valid frame
        let mut bytes = b"X-Bogus: 1\r\n\r\n".to_vec();
        let garbage = b"{not json";
        bytes.extend(
            format!("Content-Length: {}\r\n\r\n", garbage.len()).into_bytes(),
        );
        bytes.extend_from_slice(garbage);
        bytes.extend(frame(&json!({"jsonrpc": "2.0", "id": 5, "result": "ok"})));

        let events = engine.feed(&bytes);
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Response { id, result } => {
                assert_eq!(*id, 5);
                assert_eq!(result.as_ref().unwrap(), &json!("ok"));
            }
            other => panic!("expected Response, got {:?}", other),
        }
    }

    #[test]
    fn test_diagnostics_event() {
        let mut engine = ready_engine();

        let events = engine.feed(&frame(&json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": {
                "uri": "file:///a.rs",
                "diagnostics": [{
                    "range": {
                        "start": {"line": 0, "character": 0},
                        "end": {"line": 0, "character": 4}
                    },
                    "severity": 1,
                    "message": "unresolved import"
                }]
            }
        })));

        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Diagnostics { uri, items } => {
                assert_eq!(uri, "file:///a.rs");
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].message, "unresolved import");
            }
            other => panic!("expected Diagnostics, got {:?}", other),
        }
    }

    #[test]
    fn test_server_request_gets_null_ack() {
        let mut engine = ready_engine();

        let events = engine.feed(&frame(&json!({
            "jsonrpc": "2.0",
            "id": "progress-token",
            "method": "window/workDoneProgress/create",
            "params": {"token": "t1"}
        })));
        assert!(events.is_empty());

        let outbound = engine.take_outbound();
        assert_eq!(outbound.len(), 1);
        let ack = String::from_utf8_lossy(&outbound[0]);
        assert!(ack.contains("\"id\":\"progress-token\""));
        assert!(ack.contains("\"result\":null"));
    }

    #[test]
    fn test_error_response_carried_through() {
        let mut engine = ready_engine();

        let events = engine.feed(&frame(&json!({
            "jsonrpc": "2.0",
            "id": 9,
            "error": {"code": -32801, "message": "content modified"}
        })));
        match &events[0] {
            Event::Response { id: 9, result } => {
                assert_eq!(result.as_ref().unwrap_err().code, -32801);
            }
            other => panic!("expected error Response, got {:?}", other),
        }
    }

    #[test]
    fn test_shutdown_transitions() {
        let mut engine = ready_engine();

        let bytes = engine.shutdown().unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("\"method\":\"shutdown\""));
        assert!(text.contains("\"method\":\"exit\""));
        assert_eq!(engine.state(), LifecycleState::ShuttingDown);

        // No further intents accepted
        assert!(engine.did_close("file:///a.rs").is_err());

        engine.mark_exited();
        assert_eq!(engine.state(), LifecycleState::Exited);
    }
}
