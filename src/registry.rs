//! Server registry and pump loop
//!
//! Owns every live [`ServerInstance`], creates them lazily on first document
//! open, routes editor calls to the right instance, and runs the idle reaper
//! that tears a server down once nothing has been bound to it for the grace
//! period. All state here is touched only from the pump's context; the
//! background I/O tasks live inside each instance's transport.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::config::LspmConfig;
use crate::document::{extension_to_language_id, path_to_uri};
use crate::error::LspmError;
use crate::instance::{PumpStatus, ServerInstance};
use crate::requests::{RawReceiver, Reply, RequestKind};
use crate::types::{
    decode_completion, decode_definition, decode_hover, CompletionItem, Diagnostic, Location,
    Position,
};

/// Editor-facing callbacks for unsolicited events
pub struct EditorHooks {
    /// Diagnostics pushed for a document: (uri, items)
    pub on_diagnostics: Box<dyn Fn(&str, &[Diagnostic]) + Send>,
    /// Server log/show message: (language, text)
    pub on_log: Box<dyn Fn(&str, &str) + Send>,
    /// Spawn failure or crash, surfaced as an editor notification
    pub on_server_failure: Box<dyn Fn(&str, &LspmError) + Send>,
}

impl Default for EditorHooks {
    fn default() -> Self {
        Self {
            on_diagnostics: Box::new(|_, _| {}),
            on_log: Box::new(|_, _| {}),
            on_server_failure: Box::new(|_, _| {}),
        }
    }
}

enum RawRequest {
    Channel(RawReceiver),
    /// No server for this language; resolves as an empty result
    NoServer,
    Failed(LspmError),
}

/// One document open in the editor, tracked for routing and so a
/// crash-respawned server can be rebound to it
struct OpenDocument {
    language: String,
    text: String,
}

/// Manages every live language server
pub struct ServerRegistry {
    config: LspmConfig,
    working_dir: PathBuf,
    hooks: EditorHooks,
    /// At most one live instance per language
    instances: HashMap<String, ServerInstance>,
    /// Languages whose spawn failed; not retried until invalidated
    unavailable: HashSet<String>,
    /// Documents open in the editor, by uri
    open_documents: HashMap<String, OpenDocument>,
}

impl ServerRegistry {
    pub fn new(config: LspmConfig, working_dir: PathBuf, hooks: EditorHooks) -> Self {
        Self {
            config,
            working_dir,
            hooks,
            instances: HashMap::new(),
            unavailable: HashSet::new(),
            open_documents: HashMap::new(),
        }
    }

    /// Languages with a running server
    pub fn running_languages(&self) -> Vec<&str> {
        self.instances.keys().map(|s| s.as_str()).collect()
    }

    /// Allow a failed language to be retried on the next acquire
    pub fn invalidate(&mut self, language: &str) {
        self.unavailable.remove(language);
    }

    /// Get or create the instance for a language.
    ///
    /// Idempotent: an existing live instance is returned as-is. Returns
    /// `None` for unmapped languages (silent no-op per configuration
    /// contract) and for languages quarantined by a spawn failure.
    fn acquire(&mut self, language: &str) -> Option<&mut ServerInstance> {
        if !self.config.enabled || self.unavailable.contains(language) {
            return None;
        }

        if self.instances.contains_key(language) {
            return self.instances.get_mut(language);
        }

        let command = self.config.command_for(language)?;

        match ServerInstance::spawn(language, command, &self.working_dir) {
            Ok(mut instance) => {
                // Rebind every document that is still open for this
                // language: after a crash the editor keeps its documents,
                // and the fresh server must hear their didOpen again (the
                // replay happens once it reports ready). This also keeps
                // the bound set non-empty, so the idle reaper still owns
                // the instance's teardown.
                for (uri, doc) in &self.open_documents {
                    if doc.language == language {
                        instance.bind(uri, &doc.text);
                    }
                }
                self.instances.insert(language.to_string(), instance);
                self.instances.get_mut(language)
            }
            Err(e) => {
                tracing::warn!(language, "spawn failed: {}", e);
                (self.hooks.on_server_failure)(language, &e);
                self.unavailable.insert(language.to_string());
                None
            }
        }
    }

    // ========== Document lifecycle (editor -> manager) ==========

    /// A document was opened in the editor
    pub fn document_opened(&mut self, uri: &str, language: &str, text: &str) {
        self.open_documents.insert(
            uri.to_string(),
            OpenDocument {
                language: language.to_string(),
                text: text.to_string(),
            },
        );

        if let Some(instance) = self.acquire(language) {
            instance.bind(uri, text);
        }
    }

    /// A document was opened by filesystem path; the uri and language
    /// are derived from it
    pub fn document_opened_path(&mut self, path: &str, text: &str) {
        let uri = path_to_uri(path);
        let language = extension_to_language_id(path);
        self.document_opened(&uri, language, text);
    }

    /// A document's content changed
    pub fn document_changed(&mut self, uri: &str, text: &str) {
        let Some(doc) = self.open_documents.get_mut(uri) else {
            return;
        };
        doc.text = text.to_string();
        let language = doc.language.clone();

        if let Some(instance) = self.instances.get_mut(&language) {
            instance.change(uri, text);
        }
    }

    /// A document was closed. Non-blocking: pending requests are abandoned
    /// and teardown, if any, happens later on the pump.
    pub fn document_closed(&mut self, uri: &str) {
        let Some(doc) = self.open_documents.remove(uri) else {
            return;
        };
        if let Some(instance) = self.instances.get_mut(&doc.language) {
            instance.unbind(uri);
        }
    }

    // ========== Requests (editor -> manager) ==========

    /// Completion items at a position
    pub fn request_completion(&mut self, uri: &str, pos: Position) -> Reply<Vec<CompletionItem>> {
        self.typed_request(RequestKind::Completion, uri, pos, decode_completion)
    }

    /// Hover documentation (markdown) at a position
    pub fn request_hover(&mut self, uri: &str, pos: Position) -> Reply<Option<String>> {
        self.typed_request(RequestKind::Hover, uri, pos, decode_hover)
    }

    /// Definition locations for the symbol at a position
    pub fn request_definition(&mut self, uri: &str, pos: Position) -> Reply<Vec<Location>> {
        self.typed_request(RequestKind::Definition, uri, pos, decode_definition)
    }

    fn typed_request<T>(
        &mut self,
        kind: RequestKind,
        uri: &str,
        pos: Position,
        decode: fn(serde_json::Value) -> crate::error::Result<T>,
    ) -> Reply<T> {
        match self.raw_request(kind, uri, pos) {
            RawRequest::Channel(rx) => Reply::new(rx, decode),
            RawRequest::NoServer => Reply::settled(Ok(serde_json::Value::Null), decode),
            RawRequest::Failed(e) => Reply::settled(Err(e), decode),
        }
    }

    fn raw_request(&mut self, kind: RequestKind, uri: &str, pos: Position) -> RawRequest {
        let Some(language) = self.open_documents.get(uri).map(|d| d.language.clone()) else {
            return RawRequest::NoServer;
        };
        if self.config.command_for(&language).is_none() {
            // Unmapped language: no server, no spawn, empty result
            return RawRequest::NoServer;
        }

        match self.acquire(&language) {
            Some(instance) => match instance.request(kind, uri, pos) {
                Ok(rx) => RawRequest::Channel(rx),
                Err(e) => RawRequest::Failed(e),
            },
            None => RawRequest::NoServer,
        }
    }

    // ========== Pump loop & idle reaper ==========

    /// One pump pass over every instance, plus the idle reaper.
    ///
    /// Meant to be called on a fixed interval, independent of document
    /// activity; see [`ServerRegistry::run`].
    pub async fn tick(&mut self) {
        // Pump every instance; collect crashed ones
        let mut crashed = Vec::new();
        for (language, instance) in self.instances.iter_mut() {
            if instance.pump(&self.hooks) == PumpStatus::Dead {
                crashed.push(language.clone());
            }
        }

        // Crashed instances are removed immediately, no grace period; the
        // next acquire for the language spawns fresh.
        for language in crashed {
            tracing::warn!(language = %language, "removing crashed server");
            if let Some(mut instance) = self.instances.remove(&language) {
                instance.shutdown().await;
            }
            (self.hooks.on_server_failure)(
                &language,
                &LspmError::Crashed {
                    language: language.clone(),
                },
            );
        }

        // Idle reaper
        let grace = self.config.idle_grace();
        let expired: Vec<String> = self
            .instances
            .iter()
            .filter(|(_, i)| i.idle_expired(grace))
            .map(|(lang, _)| lang.clone())
            .collect();

        for language in expired {
            tracing::info!(language = %language, "idle grace expired, tearing down server");
            if let Some(mut instance) = self.instances.remove(&language) {
                instance.shutdown().await;
            }
        }
    }

    /// Drive [`ServerRegistry::tick`] forever on the configured interval
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.config.pump_interval());
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    /// Shut every server down; used at editor exit
    pub async fn shutdown_all(&mut self) {
        let languages: Vec<String> = self.instances.keys().cloned().collect();
        for language in languages {
            if let Some(mut instance) = self.instances.remove(&language) {
                instance.shutdown().await;
            }
        }
        self.open_documents.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerCommand;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Config whose only server is `cat`, which accepts bytes and echoes
    /// them back; enough to exercise spawn/bind/teardown paths.
    fn cat_config(language: &str, idle_grace_secs: u64) -> LspmConfig {
        let mut servers = HashMap::new();
        servers.insert(
            language.to_string(),
            ServerCommand {
                command: "cat".into(),
                args: vec![],
                env: HashMap::new(),
            },
        );
        LspmConfig {
            enabled: true,
            pump_interval_ms: 10,
            idle_grace_secs,
            servers,
        }
    }

    fn registry(config: LspmConfig) -> ServerRegistry {
        ServerRegistry::new(config, PathBuf::from("/tmp"), EditorHooks::default())
    }

    #[tokio::test]
    #[serial]
    async fn test_acquire_is_idempotent() {
        let mut reg = registry(cat_config("python", 10));

        reg.document_opened("file:///a.py", "python", "print(1)");
        reg.document_opened("file:///b.py", "python", "print(2)");
        reg.document_opened("file:///a.py", "python", "print(1)");

        assert_eq!(reg.running_languages(), vec!["python"]);
        let instance = reg.instances.get("python").unwrap();
        assert_eq!(instance.bound_documents(), 2);

        reg.shutdown_all().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_unmapped_language_is_silent_noop() {
        let mut reg = registry(cat_config("python", 10));

        reg.document_opened("file:///main.cbl", "cobol", "");
        assert!(reg.instances.is_empty());

        let reply = reg.request_completion("file:///main.cbl", Position::new(0, 0));
        let items = reply.recv().await.unwrap_ok();
        assert!(items.is_empty());
        assert!(reg.instances.is_empty(), "no subprocess spawned");
    }

    #[tokio::test]
    #[serial]
    async fn test_spawn_failure_quarantines_language() {
        let failures: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(vec![]));
        let failures_clone = failures.clone();

        let mut servers = HashMap::new();
        servers.insert(
            "fortran".to_string(),
            ServerCommand {
                command: "no-such-language-server".into(),
                args: vec![],
                env: HashMap::new(),
            },
        );
        let config = LspmConfig {
            servers,
            ..LspmConfig::default()
        };
        let hooks = EditorHooks {
            on_server_failure: Box::new(move |language, _| {
                failures_clone.lock().unwrap().push(language.to_string());
            }),
            ..EditorHooks::default()
        };
        let mut reg = ServerRegistry::new(config, PathBuf::from("/tmp"), hooks);

        reg.document_opened("file:///a.f90", "fortran", "");
        assert_eq!(failures.lock().unwrap().len(), 1);

        // Quarantined: a second open does not retry the spawn
        reg.document_opened("file:///b.f90", "fortran", "");
        assert_eq!(failures.lock().unwrap().len(), 1);

        // Explicit invalidation allows a retry
        reg.invalidate("fortran");
        reg.document_opened("file:///c.f90", "fortran", "");
        assert_eq!(failures.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    #[serial]
    async fn test_idle_reaper_tears_down_after_grace() {
        let mut reg = registry(cat_config("go", 1));

        reg.document_opened("file:///main.go", "go", "package main");
        assert_eq!(reg.instances.len(), 1);

        reg.document_closed("file:///main.go");
        reg.tick().await;
        assert_eq!(reg.instances.len(), 1, "still inside the grace period");

        tokio::time::sleep(Duration::from_millis(1100)).await;
        reg.tick().await;
        assert!(reg.instances.is_empty(), "torn down after the grace period");

        // Next open spawns fresh
        reg.document_opened("file:///main.go", "go", "package main");
        assert_eq!(reg.instances.len(), 1);
        reg.shutdown_all().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_rebind_cancels_idle_teardown() {
        let mut reg = registry(cat_config("go", 1));

        reg.document_opened("file:///main.go", "go", "package main");
        reg.document_closed("file:///main.go");
        reg.tick().await;

        tokio::time::sleep(Duration::from_millis(500)).await;
        reg.document_opened("file:///other.go", "go", "package other");

        tokio::time::sleep(Duration::from_millis(700)).await;
        reg.tick().await;
        assert_eq!(
            reg.instances.len(),
            1,
            "rebind before expiry must cancel the teardown"
        );

        reg.shutdown_all().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_crash_removes_instance_immediately() {
        let failures: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(vec![]));
        let failures_clone = failures.clone();

        let mut servers = HashMap::new();
        servers.insert(
            "rust".to_string(),
            ServerCommand {
                // Exits immediately: looks like a crash to the pump
                command: "true".into(),
                args: vec![],
                env: HashMap::new(),
            },
        );
        let config = LspmConfig {
            servers,
            idle_grace_secs: 600,
            ..LspmConfig::default()
        };
        let hooks = EditorHooks {
            on_server_failure: Box::new(move |language, _| {
                failures_clone.lock().unwrap().push(language.to_string());
            }),
            ..EditorHooks::default()
        };
        let mut reg = ServerRegistry::new(config, PathBuf::from("/tmp"), hooks);

        reg.document_opened("file:///lib.rs", "rust", "");
        assert_eq!(reg.instances.len(), 1);

        let mut removed = false;
        for _ in 0..100 {
            reg.tick().await;
            if reg.instances.is_empty() {
                removed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(removed, "crashed instance removed without grace period");
        assert_eq!(*failures.lock().unwrap(), vec!["rust".to_string()]);
    }

    #[tokio::test]
    #[serial]
    async fn test_request_for_unopened_document_is_noop() {
        let mut reg = registry(cat_config("python", 10));
        let reply = reg.request_hover("file:///never-opened.py", Position::new(0, 0));
        match reply.recv().await {
            crate::requests::ReplyOutcome::Ok(None) => {}
            other => panic!("expected empty hover, got {:?}", other),
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_respawn_after_crash_rebinds_open_documents() {
        let mut reg = registry(cat_config("python", 1));
        reg.document_opened("file:///a.py", "python", "print(1)");

        // Emulate the pump having removed a crashed instance while the
        // editor keeps the document open
        let mut dead = reg.instances.remove("python").unwrap();
        dead.shutdown().await;

        // The next request respawns and rebinds the still-open document
        let _reply = reg.request_hover("file:///a.py", Position::new(0, 0));
        let instance = reg.instances.get("python").expect("respawned");
        assert_eq!(instance.bound_documents(), 1);
        assert!(instance.has_document("file:///a.py"));

        // With the document rebound, closing it still drives the reaper
        reg.document_closed("file:///a.py");
        tokio::time::sleep(Duration::from_millis(1100)).await;
        reg.tick().await;
        assert!(reg.instances.is_empty(), "respawned instance reaped after close");
    }

    #[tokio::test]
    #[serial]
    async fn test_document_opened_by_path() {
        let mut reg = registry(cat_config("python", 10));
        reg.document_opened_path("/tmp/script.py", "print(1)");

        assert_eq!(reg.running_languages(), vec!["python"]);
        let instance = reg.instances.get("python").unwrap();
        assert!(instance.has_document("file:///tmp/script.py"));

        reg.shutdown_all().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_shutdown_all() {
        let mut reg = registry(cat_config("python", 10));
        reg.document_opened("file:///a.py", "python", "");
        reg.shutdown_all().await;
        assert!(reg.instances.is_empty());
        assert!(reg.open_documents.is_empty());
    }
}
