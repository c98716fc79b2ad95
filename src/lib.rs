//! Language server process manager
//!
//! Spawns and supervises one language-server subprocess per language, pumps
//! bytes to and from each server on background tasks, decodes the JSON-RPC
//! stream into typed events, correlates responses to the requests that
//! caused them, multiplexes open documents onto shared servers, and tears
//! servers down once they have been idle past a grace period.
//!
//! # Components
//!
//! - [`types`] - LSP type definitions (Position, Range, Location, etc.)
//! - [`protocol`] - JSON-RPC message framing
//! - [`engine`] - sans-I/O protocol state machine producing [`engine::Event`]s
//! - [`transport`] - subprocess plus its background reader/writer tasks
//! - [`requests`] - in-flight request correlation
//! - [`document`] - per-document bindings and version counters
//! - [`instance`] - one transport + engine + request table per language
//! - [`registry`] - lazy acquire, pump loop, and the idle reaper
//! - [`config`] - immutable language -> launch-command table
//!
//! # Threading
//!
//! Each instance owns two blocking background tasks (stdout reader, stdin
//! writer); everything else runs on the registry's pump tick and never
//! blocks. The transport queues are the only state shared across tasks.
//!
//! # Example
//!
//! ```no_run
//! use lspm::{EditorHooks, LspmConfig, Position, ServerRegistry};
//!
//! # async fn demo() {
//! let mut registry = ServerRegistry::new(
//!     LspmConfig::default(),
//!     std::path::PathBuf::from("/project"),
//!     EditorHooks::default(),
//! );
//!
//! registry.document_opened("file:///project/src/lib.rs", "rust", "fn main() {}");
//! let reply = registry.request_hover("file:///project/src/lib.rs", Position::new(0, 3));
//!
//! // Elsewhere, a fixed-interval loop drives `registry.tick().await`.
//! # }
//! ```

pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod instance;
pub mod protocol;
pub mod registry;
pub mod requests;
pub mod transport;
pub mod types;

pub use config::{LspmConfig, ServerCommand};
pub use engine::Event;
pub use error::{LspmError, Result};
pub use registry::{EditorHooks, ServerRegistry};
pub use requests::{Reply, ReplyOutcome};
pub use types::{CompletionItem, Diagnostic, Location, Position, Range};
