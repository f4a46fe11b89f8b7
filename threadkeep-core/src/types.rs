//! Core domain types for threadkeep
//!
//! These types normalize chat history from every supported source into one
//! model, and describe the locally owned organizational index kept beside it.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Source** | A host application whose private history we read (Cursor, Claude Code) |
//! | **Native id** | The id a source uses for one of its sessions |
//! | **Composite id** | `<source>:<native-id>`, unique across all sources |
//! | **Session** | One continuous conversation, owned by its source (read-only here) |
//! | **Message** | One turn within a session, in source order |
//! | **SessionMetadata** | Our mutable record for a session: nickname, tags, project, sync bookkeeping |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ============================================
// Sources and identifiers
// ============================================

/// Host applications whose chat history can be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Cursor composer history (SQLite key/value store)
    Cursor,
    /// Claude Code session logs (JSONL per session)
    Claude,
}

impl Source {
    /// Every supported source, in lookup order.
    pub const ALL: [Source; 2] = [Source::Cursor, Source::Claude];

    /// Returns the display name for this source
    pub fn display_name(&self) -> &'static str {
        match self {
            Source::Cursor => "Cursor",
            Source::Claude => "Claude Code",
        }
    }

    /// Returns the tag used in composite ids and database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Cursor => "cursor",
            Source::Claude => "claude",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cursor" | "Cursor" => Ok(Source::Cursor),
            "claude" | "Claude" | "claude_code" => Ok(Source::Claude),
            _ => Err(format!("unknown source: {}", s)),
        }
    }
}

/// A globally unique session identifier: `<source>:<native-id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId {
    pub source: Source,
    pub native_id: String,
}

impl SessionId {
    pub fn new(source: Source, native_id: impl Into<String>) -> Self {
        Self {
            source,
            native_id: native_id.into(),
        }
    }

    /// Parse a composite id.
    ///
    /// Returns `None` when the input has no recognized source prefix or an
    /// empty native id, so callers can fall back to bare-id handling.
    pub fn parse(input: &str) -> Option<Self> {
        let (prefix, native) = input.split_once(':')?;
        let source = prefix.parse().ok()?;
        if native.is_empty() {
            return None;
        }
        Some(Self::new(source, native))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source.as_str(), self.native_id)
    }
}

// Serialized as the composite string
impl Serialize for SessionId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SessionId::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid session id: {}", raw)))
    }
}

// ============================================
// Messages
// ============================================

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    /// A turn dominated by a tool invocation or tool result
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

/// A side-effecting or information-gathering action recorded in a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Tool name ("Read", "codebase_search", ...)
    pub name: String,
    /// Arguments as recorded by the source
    pub input: serde_json::Value,
    /// Result text, when the source recorded one
    pub result: Option<String>,
    /// Workspace path recovered from the result payload
    pub workspace_path: Option<String>,
}

/// One turn of a conversation, normalized across sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Plain text with light markdown markup
    pub content: String,
    /// Source-native message id
    pub native_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub tool: Option<ToolInvocation>,
}

impl Message {
    /// Short single-line preview of the content.
    pub fn preview(&self, max_chars: usize) -> String {
        preview_text(&self.content, max_chars)
    }
}

/// Collapse whitespace and cut to `max_chars` characters, appending "..." when cut.
pub fn preview_text(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let cut: String = collapsed.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

// ============================================
// Sessions (source-owned, read-only)
// ============================================

/// A conversation as reported by its source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    /// Title, when the source keeps one
    pub title: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// Source-reported last modification
    pub modified_at: Option<DateTime<Utc>>,
    /// Raw message count as loaded
    pub message_count: usize,
    /// Project paths the source records directly for the whole session
    pub path_hints: Vec<String>,
}

/// A session together with its normalized messages.
#[derive(Debug, Clone)]
pub struct SessionContent {
    pub session: Session,
    pub messages: Vec<Message>,
}

impl SessionContent {
    /// A session record that exists but holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Preview of the first user message with non-blank content.
    pub fn first_user_preview(&self, max_chars: usize) -> Option<String> {
        self.messages
            .iter()
            .find(|m| m.role == Role::User && !m.content.trim().is_empty())
            .map(|m| m.preview(max_chars))
    }
}

// ============================================
// Session metadata (locally owned, mutable)
// ============================================

/// Our organizational record for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Composite id, `<source>:<native-id>`
    pub id: String,
    pub source: Source,
    /// Globally unique when present
    pub nickname: Option<String>,
    pub tags: BTreeSet<String>,
    pub project_path: Option<String>,
    pub project_name: Option<String>,
    pub has_project: bool,
    /// Every distinct workspace path observed in the session
    pub workspace_paths: Vec<String>,
    pub multi_workspace: bool,
    pub preview: Option<String>,
    pub message_count: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl SessionMetadata {
    /// An unsynced record with no project.
    pub fn new(id: &SessionId) -> Self {
        Self {
            id: id.to_string(),
            source: id.source,
            nickname: None,
            tags: BTreeSet::new(),
            project_path: None,
            project_name: None,
            has_project: false,
            workspace_paths: Vec::new(),
            multi_workspace: false,
            preview: None,
            message_count: 0,
            created_at: None,
            last_synced_at: None,
        }
    }

    /// Set or clear the project, keeping path, name and flag consistent.
    pub fn set_project(&mut self, path: Option<String>) {
        match path {
            Some(path) => {
                self.project_name = Some(crate::ingest::workspace::project_name(&path));
                self.project_path = Some(path);
                self.has_project = true;
            }
            None => {
                self.project_path = None;
                self.project_name = None;
                self.has_project = false;
            }
        }
    }

    /// Parsed composite id.
    pub fn session_id(&self) -> Option<SessionId> {
        SessionId::parse(&self.id)
    }

    /// Native id portion of the composite id.
    pub fn native_id(&self) -> &str {
        self.id
            .split_once(':')
            .map(|(_, native)| native)
            .unwrap_or(&self.id)
    }
}

/// A project path and how many sessions reference it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub path: String,
    pub name: String,
    pub session_count: i64,
}

/// A tag and how many sessions carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagInfo {
    pub tag: String,
    pub session_count: i64,
}

/// Aggregate counts over the metadata store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub total_sessions: i64,
    pub cursor_sessions: i64,
    pub claude_sessions: i64,
    pub with_project: i64,
    pub with_nickname: i64,
    pub with_tags: i64,
    pub distinct_tags: i64,
    pub distinct_projects: i64,
}

/// Store counts plus live source counts, for drift comparison.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub store: StoreCounts,
    /// Sessions currently visible in the Cursor store, if readable
    pub cursor_live_sessions: Option<usize>,
    /// Sessions currently visible in the Claude projects tree, if readable
    pub claude_live_sessions: Option<usize>,
    pub last_bulk_sync: Option<DateTime<Utc>>,
}
