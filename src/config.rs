//! Launch-command configuration
//!
//! Maps language identifiers to server launch commands, loaded from a TOML
//! file. The table is handed to the registry at construction and never
//! mutated afterwards; a language without an entry simply has no server.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// How to launch the server for one language
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerCommand {
    /// Path to the server binary (can use $PATH)
    pub command: String,

    /// Arguments to pass to the server
    pub args: Vec<String>,

    /// Environment variables to set
    pub env: HashMap<String, String>,
}

impl Default for ServerCommand {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }
}

/// Manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LspmConfig {
    /// Whether language servers are started at all
    pub enabled: bool,

    /// Pump tick interval in milliseconds
    pub pump_interval_ms: u64,

    /// How long an instance may sit with no bound documents before teardown
    pub idle_grace_secs: u64,

    /// Per-language launch commands
    pub servers: HashMap<String, ServerCommand>,
}

impl Default for LspmConfig {
    fn default() -> Self {
        let mut servers = HashMap::new();

        servers.insert(
            "rust".to_string(),
            ServerCommand {
                command: "rust-analyzer".to_string(),
                args: vec![],
                env: HashMap::new(),
            },
        );

        servers.insert(
            "python".to_string(),
            ServerCommand {
                command: "pyright-langserver".to_string(),
                args: vec!["--stdio".to_string()],
                env: HashMap::new(),
            },
        );

        servers.insert(
            "typescript".to_string(),
            ServerCommand {
                command: "typescript-language-server".to_string(),
                args: vec!["--stdio".to_string()],
                env: HashMap::new(),
            },
        );

        servers.insert(
            "go".to_string(),
            ServerCommand {
                command: "gopls".to_string(),
                args: vec![],
                env: HashMap::new(),
            },
        );

        Self {
            enabled: true,
            pump_interval_ms: 50,
            idle_grace_secs: 10,
            servers,
        }
    }
}

impl LspmConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Launch command for a language, if one is configured
    pub fn command_for(&self, language: &str) -> Option<&ServerCommand> {
        self.servers.get(language)
    }

    /// All configured language names
    pub fn languages(&self) -> Vec<&str> {
        self.servers.keys().map(|s| s.as_str()).collect()
    }

    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms)
    }

    pub fn idle_grace(&self) -> Duration {
        Duration::from_secs(self.idle_grace_secs)
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
