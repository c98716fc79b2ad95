//! Error types for the language server process manager.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LspmError {
    /// Server executable could not be started.
    #[error("failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },

    /// Server process exited unexpectedly.
    #[error("language server for '{language}' exited unexpectedly")]
    Crashed { language: String },

    /// JSON-RPC error returned by the server.
    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i32, message: String },

    /// Malformed frame on the wire.
    #[error("protocol decode error: {0}")]
    Decode(String),

    /// Call issued before the server finished its initialize handshake,
    /// or after shutdown began.
    #[error("server not ready (state: {state})")]
    NotReady { state: &'static str },

    /// Failed to decode a result payload into its typed form.
    #[error("unexpected result shape: {0}")]
    ResultShape(String),

    /// Background task channel closed.
    #[error("transport channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, LspmError>;
