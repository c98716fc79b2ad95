//! One live language server
//!
//! Glues a [`Transport`], a [`ProtocolEngine`] and a [`RequestTable`]
//! together for a single language, and tracks the documents currently bound
//! to it. All methods here run on the pump's scheduling context; the only
//! shared state with the background tasks is the transport's queues.

use std::collections::HashMap;
use std::path::Path;

use tokio::time::Instant;

use crate::config::ServerCommand;
use crate::document::DocumentBinding;
use crate::engine::{Event, LifecycleState, ProtocolEngine};
use crate::error::{LspmError, Result};
use crate::registry::EditorHooks;
use crate::requests::{RawReceiver, RequestKind, RequestTable};
use crate::transport::{Drained, Transport};
use crate::types::{Position, ServerCapabilities};

/// Outcome of one pump pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    Alive,
    /// Process exited; the instance must be removed from the registry
    Dead,
}

/// A running server for one language
pub struct ServerInstance {
    language: String,
    transport: Transport,
    engine: ProtocolEngine,
    requests: RequestTable,
    /// Documents currently bound, by uri
    documents: HashMap<String, DocumentBinding>,
    /// Set when the bound set becomes empty; cleared by any rebind
    idle_since: Option<Instant>,
    capabilities: Option<ServerCapabilities>,
    dead: bool,
}

impl ServerInstance {
    /// Spawn the server process and start the initialize handshake
    pub fn spawn(language: &str, command: &ServerCommand, working_dir: &Path) -> Result<Self> {
        let transport = Transport::spawn(
            language,
            &command.command,
            &command.args,
            working_dir,
            &command.env,
        )?;

        let mut engine = ProtocolEngine::new(language);
        let root_uri = format!("file://{}", working_dir.display());
        let init_frame = engine.initialize(&root_uri)?;
        transport.write(init_frame)?;

        Ok(Self {
            language: language.to_string(),
            transport,
            engine,
            requests: RequestTable::new(),
            documents: HashMap::new(),
            idle_since: None,
            capabilities: None,
            dead: false,
        })
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub fn is_ready(&self) -> bool {
        self.engine.state() == LifecycleState::Normal
    }

    pub fn capabilities(&self) -> Option<&ServerCapabilities> {
        self.capabilities.as_ref()
    }

    pub fn bound_documents(&self) -> usize {
        self.documents.len()
    }

    pub fn has_document(&self, uri: &str) -> bool {
        self.documents.contains_key(uri)
    }

    /// Whether the idle timer has been running for at least `grace`
    pub fn idle_expired(&self, grace: tokio::time::Duration) -> bool {
        self.idle_since
            .map(|since| since.elapsed() >= grace)
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub(crate) fn idle_timer_running(&self) -> bool {
        self.idle_since.is_some()
    }

    // ========== Document binding ==========

    /// Bind a document, cancelling any pending idle teardown
    pub fn bind(&mut self, uri: &str, text: &str) {
        self.idle_since = None;

        if self.documents.contains_key(uri) {
            return;
        }

        let mut binding = DocumentBinding::new(uri, self.language.clone(), text);
        if self.is_ready() {
            match self.engine.did_open(uri, &binding.language, text, binding.version) {
                Ok(frame) => {
                    if self.transport.write(frame).is_ok() {
                        binding.announced = true;
                    }
                }
                Err(e) => tracing::warn!(uri, "didOpen failed: {}", e),
            }
        }
        // Not ready yet: announced stays false and the didOpen is replayed
        // when the Ready event arrives.
        self.documents.insert(uri.to_string(), binding);
    }

    /// Unbind a document; starts the idle timer if nothing remains bound
    pub fn unbind(&mut self, uri: &str) {
        if self.documents.remove(uri).is_none() {
            return;
        }

        self.requests.abandon(uri);

        if self.is_ready() {
            if let Ok(frame) = self.engine.did_close(uri) {
                let _ = self.transport.write(frame);
            }
        }

        if self.documents.is_empty() {
            tracing::debug!(language = %self.language, "no documents bound, idle timer started");
            self.idle_since = Some(Instant::now());
        }
    }

    /// Record a document change and notify the server
    pub fn change(&mut self, uri: &str, text: &str) {
        let Some(binding) = self.documents.get_mut(uri) else {
            return;
        };
        let version = binding.apply_change(text);
        let announced = binding.announced;

        if announced && self.is_ready() {
            match self.engine.did_change(uri, version, text) {
                Ok(frame) => {
                    let _ = self.transport.write(frame);
                }
                Err(e) => tracing::warn!(uri, "didChange failed: {}", e),
            }
        }
    }

    // ========== Requests ==========

    /// Issue a code-intelligence request, returning the raw response channel
    pub fn request(&mut self, kind: RequestKind, uri: &str, pos: Position) -> Result<RawReceiver> {
        if !self.is_ready() {
            return Err(LspmError::NotReady {
                state: self.engine.state().name(),
            });
        }

        let (id, rx) = self.requests.register(kind, uri);
        let frame = match kind {
            RequestKind::Completion => self.engine.request_completion(id, uri, pos),
            RequestKind::Hover => self.engine.request_hover(id, uri, pos),
            RequestKind::Definition => self.engine.request_definition(id, uri, pos),
        };

        match frame.and_then(|f| self.transport.write(f)) {
            Ok(()) => Ok(rx),
            Err(e) => {
                self.requests.discard(id);
                Err(e)
            }
        }
    }

    // ========== Pump ==========

    /// One pump pass: flush outbound, drain inbound, dispatch events
    pub fn pump(&mut self, hooks: &EditorHooks) -> PumpStatus {
        for frame in self.engine.take_outbound() {
            let _ = self.transport.write(frame);
        }

        let bytes = match self.transport.read() {
            Drained::Open(bytes) => bytes,
            Drained::Closed => {
                tracing::warn!(language = %self.language, "server process exited");
                self.dead = true;
                self.engine.mark_exited();
                self.requests.abandon_all();
                return PumpStatus::Dead;
            }
        };

        if !bytes.is_empty() {
            for event in self.engine.feed(&bytes) {
                self.dispatch(event, hooks);
            }
            // Frames generated while decoding (initialized, null acks)
            for frame in self.engine.take_outbound() {
                let _ = self.transport.write(frame);
            }
        }

        PumpStatus::Alive
    }

    fn dispatch(&mut self, event: Event, hooks: &EditorHooks) {
        match event {
            Event::Ready(capabilities) => {
                tracing::info!(language = %self.language, "server ready");
                self.capabilities = Some(capabilities);
                self.announce_pending();
            }
            Event::Response { id, result } => {
                self.requests.resolve(id, result);
            }
            Event::Diagnostics { uri, items } => {
                (hooks.on_diagnostics)(&uri, &items);
            }
            Event::LogMessage(text) => {
                (hooks.on_log)(&self.language, &text);
            }
        }
    }

    /// Replay didOpen for documents bound before the handshake finished
    fn announce_pending(&mut self) {
        let pending: Vec<(String, String, String, i32)> = self
            .documents
            .values()
            .filter(|b| !b.announced)
            .map(|b| (b.uri.clone(), b.language.clone(), b.text.clone(), b.version))
            .collect();

        for (uri, language, text, version) in pending {
            match self.engine.did_open(&uri, &language, &text, version) {
                Ok(frame) => {
                    if self.transport.write(frame).is_ok() {
                        if let Some(binding) = self.documents.get_mut(&uri) {
                            binding.announced = true;
                        }
                    }
                }
                Err(e) => tracing::warn!(uri = %uri, "deferred didOpen failed: {}", e),
            }
        }
    }

    // ========== Lifecycle ==========

    /// Graceful shutdown: protocol farewell, then kill and join the transport
    pub async fn shutdown(&mut self) {
        tracing::info!(language = %self.language, "shutting down server");

        if self.is_ready() {
            if let Ok(frame) = self.engine.shutdown() {
                let _ = self.transport.write(frame);
            }
        }

        self.transport.stop().await;
        self.engine.mark_exited();
        self.requests.abandon_all();
    }
}
