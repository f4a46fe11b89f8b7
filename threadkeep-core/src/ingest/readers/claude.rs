//! Claude Code JSONL reader
//!
//! Reads session logs from `~/.claude/projects/[encoded-path]/[session-id].jsonl`.
//!
//! # Error Handling
//!
//! The reader is designed to be resilient:
//!
//! - **Malformed JSON lines**: logged at debug, counted, skipped.
//! - **Missing fields**: every raw field is optional via `#[serde(default)]`.
//! - **Unknown record types** (`summary`, `system`, `file-history-snapshot`, ...):
//!   ignored; only `user` and `assistant` records become messages.
//! - **Unknown content blocks**: ignored via a `#[serde(other)]` catch-all.
//!
//! Bulk timestamps come from file modification times, so a sync pass never
//! parses a file it does not import.

use crate::error::{Error, Result};
use crate::ingest::reader::{newest_first, SessionStamp, SourceReader};
use crate::ingest::workspace;
use crate::types::{preview_text, Message, Role, Session, SessionContent, SessionId, Source, ToolInvocation};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Session file pattern, relative to the projects root.
const SESSION_PATTERN: &str = "*/*.jsonl";

/// Invocation name used when a tool result has no matching tool_use.
const UNKNOWN_TOOL: &str = "tool_result";

/// Preview length for session summaries.
const PREVIEW_CHARS: usize = 120;

/// Reader for Claude Code session logs.
pub struct ClaudeReader {
    root: PathBuf,
}

/// Per-session summary produced by [`ClaudeReader::list_sessions`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClaudeSessionSummary {
    pub native_id: String,
    /// Working directory, or the decoded project directory name
    pub project_path: Option<String>,
    pub project_name: Option<String>,
    pub message_count: usize,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    /// First user message, collapsed to one line
    pub preview: Option<String>,
    pub file_path: PathBuf,
}

/// Everything recovered from one session file.
#[derive(Debug, Default)]
struct ParsedFile {
    session_id: Option<String>,
    cwd: Option<String>,
    messages: Vec<Message>,
    first_timestamp: Option<DateTime<Utc>>,
    last_timestamp: Option<DateTime<Utc>>,
    skipped_lines: usize,
}

impl ClaudeReader {
    /// Create a reader over a projects root (normally `~/.claude/projects`).
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every session file under the root.
    fn session_files(&self) -> Result<Vec<PathBuf>> {
        if !self.root.is_dir() {
            return Err(Error::StoreConnection(format!(
                "Claude projects directory not found at {}",
                self.root.display()
            )));
        }

        let pattern = self.root.join(SESSION_PATTERN);
        let pattern = pattern.to_string_lossy();
        let paths = glob::glob(&pattern)
            .map_err(|e| Error::Config(format!("invalid session pattern {}: {}", pattern, e)))?;

        let mut files = Vec::new();
        for entry in paths {
            match entry {
                Ok(path) if path.is_file() => files.push(path),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Unreadable entry under Claude projects"),
            }
        }
        Ok(files)
    }

    /// Locate `<id>.jsonl` in any project subdirectory.
    fn find_file(&self, native_id: &str) -> Result<Option<PathBuf>> {
        if native_id.is_empty() || native_id.contains(['/', '\\']) {
            return Ok(None);
        }
        let file_name = format!("{}.jsonl", native_id);
        Ok(self
            .session_files()?
            .into_iter()
            .find(|p| p.file_name().and_then(|n| n.to_str()) == Some(file_name.as_str())))
    }

    /// Summaries of every session, newest first.
    ///
    /// Files that cannot be read are logged and left out.
    pub fn list_sessions(&self) -> Result<Vec<ClaudeSessionSummary>> {
        let mut summaries = Vec::new();
        for path in self.session_files()? {
            let parsed = match parse_file(&path) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable session file");
                    continue;
                }
            };

            let native_id = parsed
                .session_id
                .clone()
                .or_else(|| file_stem(&path))
                .unwrap_or_default();
            let project_path = parsed.cwd.clone().or_else(|| decode_project_dir(&path));
            let preview = parsed
                .messages
                .iter()
                .find(|m| m.role == Role::User && !m.content.trim().is_empty())
                .map(|m| preview_text(&m.content, PREVIEW_CHARS));

            summaries.push(ClaudeSessionSummary {
                native_id,
                project_name: project_path.as_deref().map(workspace::project_name),
                project_path,
                message_count: parsed.messages.len(),
                first_timestamp: parsed.first_timestamp,
                last_timestamp: parsed.last_timestamp,
                preview,
                file_path: path,
            });
        }

        summaries.sort_by(|a, b| b.last_timestamp.cmp(&a.last_timestamp));
        Ok(summaries)
    }
}

impl SourceReader for ClaudeReader {
    fn source(&self) -> Source {
        Source::Claude
    }

    fn is_available(&self) -> bool {
        self.root.is_dir()
    }

    fn session_timestamps(&self, limit: Option<usize>) -> Result<Vec<SessionStamp>> {
        let mut stamps = Vec::new();
        for path in self.session_files()? {
            let Some(native_id) = file_stem(&path) else {
                continue;
            };
            match std::fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(modified) => stamps.push(SessionStamp {
                    native_id,
                    modified_at: DateTime::<Utc>::from(modified),
                }),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "No modification time, skipping");
                }
            }
        }
        Ok(newest_first(stamps, limit))
    }

    fn load_session(&self, native_id: &str) -> Result<SessionContent> {
        let path = self
            .find_file(native_id)?
            .ok_or_else(|| Error::SessionNotFound(SessionId::new(Source::Claude, native_id).to_string()))?;

        let parsed = parse_file(&path)?;
        if parsed.skipped_lines > 0 {
            tracing::debug!(
                session_id = native_id,
                skipped = parsed.skipped_lines,
                "Skipped malformed lines"
            );
        }

        let modified_at = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from)
            .or(parsed.last_timestamp);

        let path_hints: Vec<String> = parsed
            .cwd
            .clone()
            .or_else(|| decode_project_dir(&path))
            .into_iter()
            .collect();

        Ok(SessionContent {
            session: Session {
                id: SessionId::new(Source::Claude, native_id),
                title: None,
                created_at: parsed.first_timestamp,
                modified_at,
                message_count: parsed.messages.len(),
                path_hints,
            },
            messages: parsed.messages,
        })
    }

    fn contains(&self, native_id: &str) -> Result<bool> {
        if !self.is_available() {
            return Ok(false);
        }
        Ok(self.find_file(native_id)?.is_some())
    }
}

// ============================================
// Raw JSONL record types (serde deserialization)
// ============================================

/// A single line from a Claude Code session log.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawRecord {
    uuid: Option<String>,
    session_id: Option<String>,
    #[serde(rename = "type")]
    record_type: Option<String>,
    timestamp: Option<String>,
    cwd: Option<String>,
    message: Option<RawMessage>,
    /// Structured tool result attached to user records
    tool_use_result: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawMessage {
    content: Option<RawContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        #[serde(default)]
        tool_use_id: String,
        #[serde(default)]
        content: Value,
    },
    #[serde(other)]
    Unknown,
}

// ============================================
// Parsing
// ============================================

fn parse_file(path: &Path) -> Result<ParsedFile> {
    let file = File::open(path).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to open {}: {}", path.display(), e),
        ))
    })?;

    let mut parsed = ParsedFile::default();
    let mut tool_names: HashMap<String, String> = HashMap::new();

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::debug!(line = index + 1, error = %e, "Read error");
                parsed.skipped_lines += 1;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let record: RawRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!(path = %path.display(), line = index + 1, error = %e, "Malformed line");
                parsed.skipped_lines += 1;
                continue;
            }
        };

        if parsed.session_id.is_none() {
            parsed.session_id = record.session_id.clone();
        }
        if parsed.cwd.is_none() {
            parsed.cwd = record.cwd.clone().filter(|c| !c.is_empty());
        }

        let timestamp = record
            .timestamp
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        if let Some(ts) = timestamp {
            parsed.first_timestamp.get_or_insert(ts);
            parsed.last_timestamp = Some(ts);
        }

        let messages = match record.record_type.as_deref() {
            Some("assistant") => assistant_messages(&record, timestamp, &mut tool_names),
            Some("user") => user_messages(&record, timestamp, &tool_names),
            _ => continue,
        };
        parsed.messages.extend(messages);
    }

    Ok(parsed)
}

fn assistant_messages(
    record: &RawRecord,
    timestamp: Option<DateTime<Utc>>,
    tool_names: &mut HashMap<String, String>,
) -> Vec<Message> {
    let Some(content) = record.message.as_ref().and_then(|m| m.content.as_ref()) else {
        return Vec::new();
    };

    let (text, tools) = match content {
        RawContent::Text(text) => (text.clone(), Vec::new()),
        RawContent::Blocks(blocks) => {
            let mut texts = Vec::new();
            let mut tools = Vec::new();
            for block in blocks {
                match block {
                    ContentBlock::Text { text } if !text.is_empty() => texts.push(text.as_str()),
                    ContentBlock::ToolUse { id, name, input } => {
                        if !id.is_empty() {
                            tool_names.insert(id.clone(), name.clone());
                        }
                        tools.push(ToolInvocation {
                            name: name.clone(),
                            input: input.clone(),
                            result: None,
                            workspace_path: None,
                        });
                    }
                    _ => {}
                }
            }
            (texts.join("\n"), tools)
        }
    };

    let mut tools = tools.into_iter();
    let first_tool = tools.next();
    if text.trim().is_empty() && first_tool.is_none() {
        return Vec::new();
    }

    let mut messages = vec![Message {
        role: if first_tool.is_some() { Role::Tool } else { Role::Assistant },
        content: text,
        native_id: record.uuid.clone(),
        timestamp,
        tool: first_tool,
    }];

    // Further invocations in the same record get their own turns
    messages.extend(tools.map(|tool| Message {
        role: Role::Tool,
        content: String::new(),
        native_id: record.uuid.clone(),
        timestamp,
        tool: Some(tool),
    }));
    messages
}

fn user_messages(
    record: &RawRecord,
    timestamp: Option<DateTime<Utc>>,
    tool_names: &HashMap<String, String>,
) -> Vec<Message> {
    let Some(content) = record.message.as_ref().and_then(|m| m.content.as_ref()) else {
        return Vec::new();
    };

    let record_workspace = record
        .tool_use_result
        .as_ref()
        .and_then(workspace::workspace_from_value);

    let mut messages = Vec::new();
    match content {
        RawContent::Text(text) => {
            if !text.trim().is_empty() {
                messages.push(user_message(record, text.clone(), timestamp));
            }
        }
        RawContent::Blocks(blocks) => {
            let mut texts = Vec::new();
            let mut results = Vec::new();
            for block in blocks {
                match block {
                    ContentBlock::Text { text } if !text.is_empty() => texts.push(text.as_str()),
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                    } => {
                        let result = result_text(content);
                        let workspace_path = record_workspace
                            .clone()
                            .or_else(|| workspace::workspace_from_value(content));
                        results.push(Message {
                            role: Role::Tool,
                            content: result.clone(),
                            native_id: record.uuid.clone(),
                            timestamp,
                            tool: Some(ToolInvocation {
                                name: tool_names
                                    .get(tool_use_id)
                                    .cloned()
                                    .unwrap_or_else(|| UNKNOWN_TOOL.to_string()),
                                input: Value::Null,
                                result: Some(result),
                                workspace_path,
                            }),
                        });
                    }
                    _ => {}
                }
            }

            let text = texts.join("\n");
            if !text.trim().is_empty() {
                messages.push(user_message(record, text, timestamp));
            }
            messages.extend(results);
        }
    }
    messages
}

fn user_message(record: &RawRecord, content: String, timestamp: Option<DateTime<Utc>>) -> Message {
    Message {
        role: Role::User,
        content,
        native_id: record.uuid.clone(),
        timestamp,
        tool: None,
    }
}

/// Tool result content is a string or a list of text blocks.
fn result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()?.to_str().map(str::to_string)
}

/// Decode a project directory name back to a path.
///
/// `-home-user-dev-myproject` becomes `/home/user/dev/myproject`. Literal
/// dashes in the original path cannot be told apart from separators.
fn decode_project_dir(file_path: &Path) -> Option<String> {
    let folder_name = file_path.parent()?.file_name()?.to_str()?;
    if !folder_name.starts_with('-') {
        return None;
    }
    Some(folder_name.replace('-', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_session(root: &Path, dir: &str, id: &str, lines: &[&str]) -> PathBuf {
        let project = root.join(dir);
        std::fs::create_dir_all(&project).unwrap();
        let path = project.join(format!("{}.jsonl", id));
        let mut file = File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        path
    }

    #[test]
    fn test_decode_project_dir() {
        let path = PathBuf::from("/x/projects/-home-user-dev-myproject/abc.jsonl");
        assert_eq!(decode_project_dir(&path).as_deref(), Some("/home/user/dev/myproject"));

        let path = PathBuf::from("/x/projects/plain/abc.jsonl");
        assert!(decode_project_dir(&path).is_none());
    }

    #[test]
    fn test_load_session_normalizes_records() {
        let tmp = TempDir::new().unwrap();
        write_session(
            tmp.path(),
            "-home-me-app",
            "s1",
            &[
                r#"{"type":"summary","summary":"ignored"}"#,
                r#"{"type":"user","sessionId":"s1","cwd":"/home/me/app","uuid":"u1","timestamp":"2025-01-01T10:00:00Z","message":{"role":"user","content":"Fix the bug"}}"#,
                r#"{not json"#,
                r#"{"type":"assistant","uuid":"a1","timestamp":"2025-01-01T10:00:05Z","message":{"content":[{"type":"text","text":"Looking"},{"type":"text","text":"now"},{"type":"tool_use","id":"t1","name":"Read","input":{"file_path":"src/main.rs"}}]}}"#,
                r#"{"type":"user","uuid":"u2","timestamp":"2025-01-01T10:00:06Z","message":{"content":[{"type":"tool_result","tool_use_id":"t1","content":"fn main() {}"}]}}"#,
                r#"{"type":"user","uuid":"u3","message":{"content":[{"type":"tool_result","tool_use_id":"zz","content":[{"type":"text","text":"orphan"}]}]}}"#,
                r#"{"type":"assistant","uuid":"a2","timestamp":"2025-01-01T10:01:00Z","message":{"content":"Done."}}"#,
            ],
        );

        let reader = ClaudeReader::new(tmp.path().to_path_buf());
        let content = reader.load_session("s1").unwrap();
        let roles: Vec<Role> = content.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Tool, Role::Tool, Role::Tool, Role::Assistant]
        );

        assert_eq!(content.messages[0].content, "Fix the bug");
        assert_eq!(content.messages[1].content, "Looking\nnow");
        assert_eq!(content.messages[1].tool.as_ref().unwrap().name, "Read");
        assert_eq!(content.messages[2].tool.as_ref().unwrap().name, "Read");
        assert_eq!(content.messages[2].content, "fn main() {}");
        assert_eq!(content.messages[3].tool.as_ref().unwrap().name, "tool_result");
        assert_eq!(content.messages[3].content, "orphan");

        assert_eq!(content.session.path_hints, vec!["/home/me/app"]);
        assert_eq!(
            content.session.created_at.unwrap().to_rfc3339(),
            "2025-01-01T10:00:00+00:00"
        );
    }

    #[test]
    fn test_tool_use_result_workspace() {
        let tmp = TempDir::new().unwrap();
        write_session(
            tmp.path(),
            "-p",
            "s2",
            &[
                r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"codebase_search","input":{}}]}}"#,
                r#"{"type":"user","toolUseResult":{"success":{"workspaceResults":{"/a/b":{}}}},"message":{"content":[{"type":"tool_result","tool_use_id":"t1","content":"ok"}]}}"#,
            ],
        );
        let reader = ClaudeReader::new(tmp.path().to_path_buf());
        let content = reader.load_session("s2").unwrap();
        let resolution = workspace::locate(&content.messages, &content.session.path_hints);
        assert_eq!(resolution.primary.as_deref(), Some("/a/b"));
    }

    #[test]
    fn test_empty_and_missing_sessions() {
        let tmp = TempDir::new().unwrap();
        write_session(tmp.path(), "-p", "empty", &[r#"{"type":"summary"}"#]);
        let reader = ClaudeReader::new(tmp.path().to_path_buf());

        let content = reader.load_session("empty").unwrap();
        assert!(content.is_empty());
        // Fallback to the decoded directory name
        assert_eq!(content.session.path_hints, vec!["/p"]);

        assert!(matches!(
            reader.load_session("nope"),
            Err(Error::SessionNotFound(_))
        ));
        assert!(reader.contains("empty").unwrap());
        assert!(!reader.contains("nope").unwrap());
    }

    #[test]
    fn test_timestamps_and_summaries() {
        let tmp = TempDir::new().unwrap();
        write_session(
            tmp.path(),
            "-home-me-alpha",
            "a",
            &[r#"{"type":"user","sessionId":"a","cwd":"/home/me/alpha","timestamp":"2025-02-01T00:00:00Z","message":{"content":"  first\n question "}}"#],
        );
        write_session(
            tmp.path(),
            "-home-me-beta",
            "b",
            &[r#"{"type":"user","timestamp":"2025-03-01T00:00:00Z","message":{"content":"second"}}"#],
        );

        let reader = ClaudeReader::new(tmp.path().to_path_buf());
        assert_eq!(reader.session_timestamps(None).unwrap().len(), 2);
        assert_eq!(reader.session_timestamps(Some(1)).unwrap().len(), 1);
        assert_eq!(reader.session_count().unwrap(), 2);

        let summaries = reader.list_sessions().unwrap();
        assert_eq!(summaries[0].native_id, "b");
        assert_eq!(summaries[0].project_name.as_deref(), Some("beta"));
        assert_eq!(summaries[1].project_path.as_deref(), Some("/home/me/alpha"));
        assert_eq!(summaries[1].preview.as_deref(), Some("first question"));
        assert_eq!(summaries[1].message_count, 1);
    }

    #[test]
    fn test_missing_root() {
        let reader = ClaudeReader::new(PathBuf::from("/nonexistent/projects"));
        assert!(!reader.is_available());
        assert!(!reader.contains("x").unwrap());
        assert!(matches!(
            reader.session_timestamps(None),
            Err(Error::StoreConnection(_))
        ));
    }
}
