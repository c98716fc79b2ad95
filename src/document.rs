//! Document bindings for LSP synchronization
//!
//! Each open document is bound to exactly one server instance at a time.
//! The binding carries the monotonic version counter the didChange
//! notifications require, plus the latest text so a didOpen can be replayed
//! if the server finishes its handshake after the document was opened.

use std::path::Path;

/// One document bound to a server instance
#[derive(Debug, Clone)]
pub struct DocumentBinding {
    /// Document URI (file:// scheme)
    pub uri: String,
    /// Language identifier ("rust", "python", ...)
    pub language: String,
    /// Version number, incremented on every change while bound
    pub version: i32,
    /// Latest full text of the document
    pub text: String,
    /// Whether didOpen has been sent to the server yet
    pub announced: bool,
}

impl DocumentBinding {
    pub fn new(uri: impl Into<String>, language: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            language: language.into(),
            version: 1,
            text: text.into(),
            announced: false,
        }
    }

    /// Record a change, bumping the version
    pub fn apply_change(&mut self, text: impl Into<String>) -> i32 {
        self.version += 1;
        self.text = text.into();
        self.version
    }
}

/// Convert a file path to a file:// URI
pub fn path_to_uri(path: &str) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        Path::new(path)
            .canonicalize()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| path.to_string())
    };
    format!("file://{}", path)
}

/// Get language ID from file extension
pub fn extension_to_language_id(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match ext.to_lowercase().as_str() {
        "rs" => "rust",

        "ts" => "typescript",
        "tsx" => "typescriptreact",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",

        "py" | "pyi" | "pyw" => "python",

        "go" => "go",

        "java" => "java",
        "kt" | "kts" => "kotlin",

        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "c++" => "cpp",
        "hpp" | "hh" | "hxx" | "h++" => "cpp",

        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "zig" => "zig",

        "html" | "htm" => "html",
        "css" => "css",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",

        "sh" | "bash" | "zsh" => "shellscript",
        "md" | "markdown" => "markdown",

        _ => "plaintext",
    }
}
