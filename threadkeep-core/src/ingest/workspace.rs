//! Workspace/project location
//!
//! Neither source records which project a conversation belongs to, so the
//! project is recovered from tool results that mention a workspace, falling
//! back to paths the source keeps for the whole session (Claude's `cwd`).
//!
//! Sessions that touch several workspaces keep the first one seen as their
//! primary project.

use crate::types::Message;
use serde_json::Value;

/// Project name used when a path has no usable final segment.
pub const UNKNOWN_PROJECT: &str = "unknown";

/// Key under which tool results list the workspaces they touched.
const WORKSPACE_RESULTS_KEY: &str = "workspaceResults";

/// Nesting depth searched inside a tool result payload.
const MAX_PAYLOAD_DEPTH: usize = 64;

/// Outcome of locating a session's project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceResolution {
    /// Most likely project path
    pub primary: Option<String>,
    /// Distinct paths in first-seen order
    pub paths: Vec<String>,
    pub multi_workspace: bool,
}

impl WorkspaceResolution {
    pub fn has_project(&self) -> bool {
        self.primary.is_some()
    }
}

/// Locate the project for a message sequence.
///
/// The first tool invocation carrying a recovered path wins. `fallback` holds
/// session-level paths reported by the source and is consulted only when no
/// tool invocation yields a path.
pub fn locate(messages: &[Message], fallback: &[String]) -> WorkspaceResolution {
    let mut paths: Vec<String> = Vec::new();

    for path in messages
        .iter()
        .filter_map(|m| m.tool.as_ref())
        .filter_map(|t| t.workspace_path.as_deref())
    {
        if !path.is_empty() && !paths.iter().any(|p| p == path) {
            paths.push(path.to_string());
        }
    }

    if paths.is_empty() {
        if let Some(path) = fallback.iter().map(|p| p.trim()).find(|p| !p.is_empty()) {
            paths.push(path.to_string());
        }
    }

    WorkspaceResolution {
        primary: paths.first().cloned(),
        multi_workspace: paths.len() > 1,
        paths,
    }
}

/// Derive a display name from a project path.
///
/// Trailing `/` and `\` are stripped and the final segment returned; an empty
/// or all-separator path yields [`UNKNOWN_PROJECT`].
pub fn project_name(path: &str) -> String {
    let trimmed = path.trim_end_matches(['/', '\\']);
    trimmed
        .rsplit(['/', '\\'])
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(UNKNOWN_PROJECT)
        .to_string()
}

/// Recover a workspace path from a raw tool result string.
///
/// Unparseable payloads simply yield nothing.
pub fn workspace_from_result(payload: &str) -> Option<String> {
    let value: Value = serde_json::from_str(payload).ok()?;
    workspace_from_value(&value)
}

/// Recover a workspace path from a parsed tool result payload.
///
/// Searches depth-first, in document order, for a `workspaceResults` object and
/// returns its first key.
pub fn workspace_from_value(value: &Value) -> Option<String> {
    find_workspace(value, 0)
}

fn find_workspace(value: &Value, depth: usize) -> Option<String> {
    if depth > MAX_PAYLOAD_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => {
            if let Some(Value::Object(results)) = map.get(WORKSPACE_RESULTS_KEY) {
                if let Some(key) = results.keys().find(|k| !k.is_empty()) {
                    return Some(key.clone());
                }
            }
            map.values().find_map(|v| find_workspace(v, depth + 1))
        }
        Value::Array(items) => items.iter().find_map(|v| find_workspace(v, depth + 1)),
        // Some sources double-encode results as a JSON string
        Value::String(s) if s.trim_start().starts_with('{') => workspace_from_result(s),
        _ => None,
    }
}
