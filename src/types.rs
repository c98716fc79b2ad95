//! LSP type definitions
//!
//! Core types used in Language Server Protocol communication, plus the
//! tolerant decoders for the result shapes servers actually send.

use serde::{Deserialize, Serialize};

use crate::error::{LspmError, Result};

/// A position in a text document (0-indexed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Line number (0-indexed)
    pub line: u32,
    /// Character offset in the line (0-indexed)
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// A range in a text document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    /// Start position (inclusive)
    pub start: Position,
    /// End position (exclusive)
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }
}

/// A location in a document (URI + range)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Document URI (file:// scheme)
    pub uri: String,
    /// Range within the document
    pub range: Range,
}

impl Location {
    /// Get the file path from the URI
    pub fn file_path(&self) -> &str {
        self.uri.strip_prefix("file://").unwrap_or(&self.uri)
    }
}

/// A single completion suggestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionItem {
    /// Text shown in the completion popup
    pub display_text: String,
    /// Range the completion replaces, when the server provides one
    pub insert_range: Option<Range>,
    /// Markdown or plaintext documentation
    pub documentation: Option<String>,
}

/// A diagnostic pushed by the server for one document
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Diagnostic {
    pub range: Range,
    #[serde(default)]
    pub severity: Option<i32>,
    pub message: String,
}

/// Capabilities advertised by the server in its initialize result.
///
/// Only the fields the manager cares about; the full blob is kept as-is.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(default)]
    pub completion_provider: Option<serde_json::Value>,
    #[serde(default)]
    pub hover_provider: Option<serde_json::Value>,
    #[serde(default)]
    pub definition_provider: Option<serde_json::Value>,
}

// ========== Result decoding ==========
//
// Servers are loose about result shapes: definition may be a single Location,
// a list, or null; completion a bare array or a CompletionList object; hover
// contents a string, a MarkupContent object, or an array of either.

/// Decode a `textDocument/completion` result
pub fn decode_completion(value: serde_json::Value) -> Result<Vec<CompletionItem>> {
    if value.is_null() {
        return Ok(vec![]);
    }

    let items = if let Some(items) = value.get("items") {
        items.clone()
    } else {
        value
    };

    let raw: Vec<RawCompletionItem> = serde_json::from_value(items)
        .map_err(|e| LspmError::ResultShape(format!("completion: {}", e)))?;

    Ok(raw.into_iter().map(RawCompletionItem::into_item).collect())
}

/// Decode a `textDocument/hover` result into markdown text
pub fn decode_hover(value: serde_json::Value) -> Result<Option<String>> {
    if value.is_null() {
        return Ok(None);
    }

    let contents = value
        .get("contents")
        .cloned()
        .ok_or_else(|| LspmError::ResultShape("hover without contents".into()))?;

    let text = hover_contents_to_text(&contents);
    Ok(if text.is_empty() { None } else { Some(text) })
}

/// Decode a `textDocument/definition` result
pub fn decode_definition(value: serde_json::Value) -> Result<Vec<Location>> {
    if value.is_null() {
        return Ok(vec![]);
    }

    // Try as array first
    if let Ok(locations) = serde_json::from_value::<Vec<Location>>(value.clone()) {
        return Ok(locations);
    }

    // Try as single location
    if let Ok(location) = serde_json::from_value::<Location>(value.clone()) {
        return Ok(vec![location]);
    }

    // LocationLink[] - extract target
    if let Some(links) = value.as_array() {
        let mut out = Vec::new();
        for link in links {
            if let (Some(uri), Some(range)) = (
                link.get("targetUri").and_then(|v| v.as_str()),
                link.get("targetSelectionRange").or_else(|| link.get("targetRange")),
            ) {
                if let Ok(range) = serde_json::from_value::<Range>(range.clone()) {
                    out.push(Location {
                        uri: uri.to_string(),
                        range,
                    });
                }
            }
        }
        return Ok(out);
    }

    Err(LspmError::ResultShape("definition".into()))
}

fn hover_contents_to_text(contents: &serde_json::Value) -> String {
    match contents {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(obj) => obj
            .get("value")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        serde_json::Value::Array(parts) => parts
            .iter()
            .map(hover_contents_to_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"),
        _ => String::new(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCompletionItem {
    label: String,
    #[serde(default)]
    text_edit: Option<serde_json::Value>,
    #[serde(default)]
    documentation: Option<serde_json::Value>,
}

impl RawCompletionItem {
    fn into_item(self) -> CompletionItem {
        let insert_range = self
            .text_edit
            .as_ref()
            .and_then(|e| e.get("range"))
            .and_then(|r| serde_json::from_value(r.clone()).ok());

        let documentation = self.documentation.as_ref().map(|d| match d {
            serde_json::Value::String(s) => s.clone(),
            other => other
                .get("value")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        });

        CompletionItem {
            display_text: self.label,
            insert_range,
            documentation: documentation.filter(|d| !d.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_decode_completion_bare_array() {
        let items = decode_completion(json!([
            {"label": "foo"},
            {"label": "bar", "documentation": "does bar things"}
        ]))
        .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].display_text, "foo");
        assert_eq!(items[1].documentation.as_deref(), Some("does bar things"));
    }

    #[test]
    fn test_decode_completion_list_object() {
        let items = decode_completion(json!({
            "isIncomplete": false,
            "items": [{
                "label": "push",
                "textEdit": {
                    "range": {
                        "start": {"line": 3, "character": 4},
                        "end": {"line": 3, "character": 8}
                    },
                    "newText": "push"
                },
                "documentation": {"kind": "markdown", "value": "Appends an element"}
            }]
        }))
        .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].insert_range,
            Some(Range::new(Position::new(3, 4), Position::new(3, 8)))
        );
        assert_eq!(items[0].documentation.as_deref(), Some("Appends an element"));
    }

    #[test]
    fn test_decode_completion_null() {
        assert!(decode_completion(json!(null)).unwrap().is_empty());
    }

    #[test]
    fn test_decode_hover_variants() {
        let md = decode_hover(json!({"contents": {"kind": "markdown", "value": "# Doc"}})).unwrap();
        assert_eq!(md.as_deref(), Some("# Doc"));

        let plain = decode_hover(json!({"contents": "plain text"})).unwrap();
        assert_eq!(plain.as_deref(), Some("plain text"));

        let parts = decode_hover(json!({"contents": ["one", {"value": "two"}]})).unwrap();
        assert_eq!(parts.as_deref(), Some("one\n\ntwo"));

        assert_eq!(decode_hover(json!(null)).unwrap(), None);
    }

    #[test]
    fn test_decode_definition_single_and_array() {
        let loc = json!({
            "uri": "file:///src/lib.rs",
            "range": {
                "start": {"line": 1, "character": 0},
                "end": {"line": 1, "character": 5}
            }
        });

        let single = decode_definition(loc.clone()).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].file_path(), "/src/lib.rs");

        let many = decode_definition(json!([loc])).unwrap();
        assert_eq!(many.len(), 1);

        assert!(decode_definition(json!(null)).unwrap().is_empty());
    }

    #[test]
    fn test_decode_definition_links() {
        let links = json!([{
            "targetUri": "file:///src/main.rs",
            "targetRange": {
                "start": {"line": 10, "character": 0},
                "end": {"line": 20, "character": 1}
            },
            "targetSelectionRange": {
                "start": {"line": 10, "character": 3},
                "end": {"line": 10, "character": 7}
            }
        }]);

        let locations = decode_definition(links).unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].range.start, Position::new(10, 3));
    }
}
