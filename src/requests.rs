//! Pending-request tracking
//!
//! Maps outgoing request ids to the oneshot that will carry the response
//! back to the caller. Ids are unique and strictly increasing for the
//! lifetime of one server instance; a respawned server gets a fresh table
//! and a fresh counter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use tokio::sync::oneshot;

use crate::error::{LspmError, Result};
use crate::protocol::RpcFailure;

/// Request id, unique per server instance
pub type RequestId = i64;

/// What kind of code-intelligence request an id belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Completion,
    Hover,
    Definition,
}

/// Atomic ID generator for JSON-RPC requests
///
/// Starts at 1: id 0 is reserved for the initialize handshake.
pub struct IdGenerator(AtomicI64);

impl IdGenerator {
    pub fn new() -> Self {
        Self(AtomicI64::new(1))
    }

    pub fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) type RawResponder = oneshot::Sender<Result<serde_json::Value>>;
pub(crate) type RawReceiver = oneshot::Receiver<Result<serde_json::Value>>;

/// Pending request awaiting response
struct PendingRequest {
    kind: RequestKind,
    uri: String,
    /// Dropped (without sending) when the owning document closes
    responder: Option<RawResponder>,
}

/// Table of in-flight requests for one server instance
#[derive(Default)]
pub struct RequestTable {
    entries: HashMap<RequestId, PendingRequest>,
    ids: IdGenerator,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request, returning its id and the receiving half
    pub fn register(&mut self, kind: RequestKind, uri: &str) -> (RequestId, RawReceiver) {
        let id = self.ids.next();
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            id,
            PendingRequest {
                kind,
                uri: uri.to_string(),
                responder: Some(tx),
            },
        );
        (id, rx)
    }

    /// Resolve a request by id, invoking and removing its responder.
    ///
    /// A response for an abandoned id removes the entry silently; a response
    /// for an unknown id is logged and ignored.
    pub fn resolve(&mut self, id: RequestId, result: std::result::Result<serde_json::Value, RpcFailure>) {
        match self.entries.remove(&id) {
            Some(entry) => {
                if let Some(responder) = entry.responder {
                    let result = result.map_err(|err| LspmError::Rpc {
                        code: err.code,
                        message: err.message,
                    });
                    // Receiver may have been dropped by the caller; fine either way
                    let _ = responder.send(result);
                } else {
                    tracing::debug!(id, kind = ?entry.kind, "late response for abandoned request");
                }
            }
            None => {
                tracing::debug!(id, "response for unknown request id");
            }
        }
    }

    /// Abandon every pending request for a document.
    ///
    /// The responders are dropped without sending, so the callers' futures
    /// settle as abandoned. The ids stay in the table so a late response is
    /// swallowed instead of being treated as unknown.
    pub fn abandon(&mut self, uri: &str) {
        for (id, entry) in self.entries.iter_mut() {
            if entry.uri == uri && entry.responder.is_some() {
                tracing::debug!(id, uri, kind = ?entry.kind, "abandoning pending request");
                entry.responder = None;
            }
        }
    }

    /// Remove an entry that never made it onto the wire
    pub fn discard(&mut self, id: RequestId) {
        self.entries.remove(&id);
    }

    /// Abandon everything; used at instance teardown and on crash
    pub fn abandon_all(&mut self) {
        self.entries.clear();
    }

    /// Number of entries still awaiting a response (abandoned ones excluded)
    pub fn live_count(&self) -> usize {
        self.entries.values().filter(|e| e.responder.is_some()).count()
    }
}

/// Typed handle for an in-flight request
///
/// Decoding into the typed result happens when the reply is awaited, so the
/// table itself only ever sees raw JSON values.
pub struct Reply<T> {
    rx: RawReceiver,
    decode: fn(serde_json::Value) -> Result<T>,
}

/// How an in-flight request ended
#[derive(Debug)]
pub enum ReplyOutcome<T> {
    Ok(T),
    Err(LspmError),
    /// Document closed (or server torn down) before a response arrived
    Abandoned,
}

impl<T> Reply<T> {
    pub(crate) fn new(rx: RawReceiver, decode: fn(serde_json::Value) -> Result<T>) -> Self {
        Self { rx, decode }
    }

    /// A reply that settles immediately with the given raw value; used for
    /// no-op results (unmapped language) and immediate errors.
    pub(crate) fn settled(value: Result<serde_json::Value>, decode: fn(serde_json::Value) -> Result<T>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(value);
        Self { rx, decode }
    }

    /// Wait for the response
    pub async fn recv(self) -> ReplyOutcome<T> {
        match self.rx.await {
            Ok(Ok(value)) => match (self.decode)(value) {
                Ok(typed) => ReplyOutcome::Ok(typed),
                Err(e) => ReplyOutcome::Err(e),
            },
            Ok(Err(e)) => ReplyOutcome::Err(e),
            // Sender dropped without sending: abandoned
            Err(_) => ReplyOutcome::Abandoned,
        }
    }
}

impl<T> ReplyOutcome<T> {
    pub fn is_abandoned(&self) -> bool {
        matches!(self, ReplyOutcome::Abandoned)
    }

    pub fn unwrap_ok(self) -> T
    where
        T: std::fmt::Debug,
    {
        match self {
            ReplyOutcome::Ok(v) => v,
            ReplyOutcome::Err(e) => panic!("reply failed: {}", e),
            ReplyOutcome::Abandoned => panic!("reply abandoned"),
        }
    }
}
