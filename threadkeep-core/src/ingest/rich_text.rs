//! Rich-text document flattening
//!
//! Cursor stores user-authored turns as a serialized editor document: a tree of
//! nodes with a `type`, optional `text`, and `children`. Flattening walks the
//! tree depth-first and produces plain text with light markdown markup:
//!
//! | Node | Output |
//! |------|--------|
//! | `text`, `code-highlight` | its `text` (backticked if `format` has the code bit) |
//! | `code` | fenced block tagged with `language` |
//! | `inline-code` | text wrapped in single backticks |
//! | `paragraph` | children followed by a line break |
//! | `linebreak` | a line break |
//! | anything else | children, no markup |

use serde_json::Value;

/// Maximum nesting depth walked; deeper subtrees are dropped.
const MAX_DEPTH: usize = 128;

/// Text-format bit marking inline code on a text node.
const FORMAT_CODE: u64 = 16;

/// Flatten a serialized rich-text document.
///
/// A document that fails to parse flattens to an empty string.
pub fn flatten(document: &str) -> String {
    match serde_json::from_str::<Value>(document) {
        Ok(value) => flatten_value(&value),
        Err(e) => {
            tracing::debug!(error = %e, "Unparseable rich text document");
            String::new()
        }
    }
}

/// Flatten an already-parsed document.
///
/// Accepts either a `{"root": ...}` wrapper or a bare node.
pub fn flatten_value(value: &Value) -> String {
    let root = value.get("root").unwrap_or(value);
    let mut out = String::new();
    walk(root, 0, &mut out);
    out
}

fn walk(node: &Value, depth: usize, out: &mut String) {
    if depth > MAX_DEPTH {
        return;
    }
    let node_type = node.get("type").and_then(Value::as_str).unwrap_or("");

    match node_type {
        "text" | "code-highlight" => {
            let text = node.get("text").and_then(Value::as_str).unwrap_or("");
            let format = node.get("format").and_then(Value::as_u64).unwrap_or(0);
            if node_type == "text" && format & FORMAT_CODE != 0 && !text.is_empty() {
                out.push('`');
                out.push_str(text);
                out.push('`');
            } else {
                out.push_str(text);
            }
        }
        "linebreak" => out.push('\n'),
        "code" => {
            let language = node.get("language").and_then(Value::as_str).unwrap_or("");
            let mut body = String::new();
            walk_children(node, depth, &mut body);
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("```");
            out.push_str(language);
            out.push('\n');
            out.push_str(body.trim_end_matches('\n'));
            out.push_str("\n```\n");
        }
        "inline-code" => {
            let mut inner = String::new();
            walk_children(node, depth, &mut inner);
            if inner.is_empty() {
                inner.push_str(node.get("text").and_then(Value::as_str).unwrap_or(""));
            }
            out.push('`');
            out.push_str(&inner);
            out.push('`');
        }
        "paragraph" => {
            walk_children(node, depth, out);
            out.push('\n');
        }
        _ => walk_children(node, depth, out),
    }
}

fn walk_children(node: &Value, depth: usize, out: &mut String) {
    if let Some(children) = node.get("children").and_then(Value::as_array) {
        for child in children {
            walk(child, depth + 1, out);
        }
    }
}
