//! Cursor composer history reader
//!
//! Reads `state.vscdb`, a SQLite file whose `cursorDiskKV` table maps opaque
//! string keys to JSON values. Two layouts exist across Cursor versions:
//!
//! - **Legacy**: one row per session under `composerData:<id>`, and one row
//!   per message under `bubbleId:<sessionId>:<bubbleId>`.
//! - **Newer**: a single `composer.composerData` row holding
//!   `{"allComposers": [...]}`, each entry carrying its id, timestamps and
//!   either an inline `conversation` or bubble headers.
//!
//! Lookups try the newer layout first and fall back to legacy rows.
//!
//! # Error Handling
//!
//! - **Missing file / missing table**: [`Error::StoreConnection`]
//! - **Busy store**: retried with exponential backoff, then [`Error::StoreLocked`]
//! - **Malformed JSON**: [`Error::DataCorruption`] for that session only
//! - **Missing bubble rows**: skipped, the rest of the session still loads

use crate::error::{Error, Result};
use crate::ingest::reader::{newest_first, SessionStamp, SourceReader};
use crate::ingest::rich_text;
use crate::ingest::workspace;
use crate::types::{Message, Role, Session, SessionContent, SessionId, Source, ToolInvocation};
use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Key/value table holding composer data.
const KV_TABLE: &str = "cursorDiskKV";
/// Well-known key of the newer single-document layout.
const COMPOSER_INDEX_KEY: &str = "composer.composerData";
/// Legacy per-session key prefix.
const SESSION_PREFIX: &str = "composerData:";
/// Legacy per-message key prefix.
const MESSAGE_PREFIX: &str = "bubbleId:";

/// Busy-store retry policy.
const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_millis(400);

/// Bubble type codes.
const BUBBLE_USER: i64 = 1;
const BUBBLE_ASSISTANT: i64 = 2;

/// Reader for Cursor's global storage database.
pub struct CursorReader {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl CursorReader {
    /// Create a reader for the database at `path`. Nothing is opened until first use.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            conn: Mutex::new(None),
        }
    }

    /// Path to the backing database.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self) -> Result<Connection> {
        if !self.path.exists() {
            return Err(Error::StoreConnection(format!(
                "Cursor database not found at {}",
                self.path.display()
            )));
        }

        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            Error::StoreConnection(format!(
                "failed to open Cursor database {}: {}",
                self.path.display(),
                e
            ))
        })?;

        // Busy handling is ours, with bounded backoff
        conn.busy_timeout(Duration::ZERO)?;

        tracing::debug!(path = %self.path.display(), "Opened Cursor database");
        Ok(conn)
    }

    /// Run a query against the lazily opened connection, retrying while busy.
    fn with_retry<T, F>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(&Connection) -> rusqlite::Result<T>,
    {
        let mut guard = self.lock();
        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        let Some(conn) = guard.as_ref() else {
            return Err(Error::StoreConnection("Cursor database not open".to_string()));
        };

        let mut delay = BASE_BACKOFF;
        let mut attempt = 1;
        loop {
            match op(conn) {
                Ok(value) => return Ok(value),
                Err(e) if is_busy(&e) && attempt < MAX_ATTEMPTS => {
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Cursor store busy, retrying");
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(MAX_BACKOFF);
                    attempt += 1;
                }
                Err(e) if is_busy(&e) => {
                    tracing::warn!(attempts = attempt, "Cursor store still busy, giving up");
                    return Err(Error::StoreLocked(format!(
                        "{} stayed busy after {} attempts",
                        self.path.display(),
                        attempt
                    )));
                }
                Err(e) if is_missing_table(&e) => {
                    return Err(Error::StoreConnection(format!(
                        "{} is not a Cursor database: {}",
                        self.path.display(),
                        e
                    )));
                }
                Err(e) => return Err(Error::Database(e)),
            }
        }
    }

    /// Fetch a single value as text.
    fn get_value(&self, key: &str) -> Result<Option<String>> {
        let sql = format!("SELECT value FROM {} WHERE key = ?1", KV_TABLE);
        self.with_retry(|conn| {
            conn.query_row(&sql, [key], |row| Ok(value_text(row.get_ref(0)?)))
                .optional()
                .map(Option::flatten)
        })
    }

    /// Parse the newer single-document index, if present.
    ///
    /// An unparseable index is treated as absent so legacy rows stay readable.
    fn load_index(&self) -> Result<Option<RawComposerIndex>> {
        let Some(text) = self.get_value(COMPOSER_INDEX_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str(&text) {
            Ok(index) => Ok(Some(index)),
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable composer index, falling back to legacy rows");
                Ok(None)
            }
        }
    }

    /// Find one session in the newer layout, then in legacy rows.
    fn find_composer(&self, native_id: &str) -> Result<RawComposer> {
        if let Some(index) = self.load_index()? {
            if let Some(found) = index
                .all_composers
                .unwrap_or_default()
                .into_iter()
                .find(|c| c.composer_id.as_deref() == Some(native_id))
            {
                return Ok(found);
            }
        }

        let key = format!("{}{}", SESSION_PREFIX, native_id);
        let text = self
            .get_value(&key)?
            .ok_or_else(|| Error::SessionNotFound(SessionId::new(Source::Cursor, native_id).to_string()))?;

        serde_json::from_str(&text).map_err(|e| corruption(native_id, e.to_string()))
    }

    /// Inline conversation, or bubbles resolved from their header rows.
    fn resolve_bubbles(&self, native_id: &str, composer: &mut RawComposer) -> Result<Vec<RawBubble>> {
        if let Some(conversation) = composer.conversation.take().filter(|c| !c.is_empty()) {
            return Ok(conversation);
        }

        let headers = composer.full_conversation_headers_only.take().unwrap_or_default();
        let bubble_ids: Vec<String> = headers.into_iter().filter_map(|h| h.bubble_id).collect();
        if bubble_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!("SELECT value FROM {} WHERE key = ?1", KV_TABLE);
        let rows: Vec<(String, Option<String>)> = self.with_retry(|conn| {
            let mut stmt = conn.prepare_cached(&sql)?;
            let mut rows = Vec::with_capacity(bubble_ids.len());
            for bubble_id in &bubble_ids {
                let key = format!("{}{}:{}", MESSAGE_PREFIX, native_id, bubble_id);
                let value = stmt
                    .query_row([&key], |row| Ok(value_text(row.get_ref(0)?)))
                    .optional()?
                    .flatten();
                rows.push((bubble_id.clone(), value));
            }
            Ok(rows)
        })?;

        let mut bubbles = Vec::with_capacity(rows.len());
        for (bubble_id, value) in rows {
            match value {
                Some(text) => {
                    let bubble: RawBubble = serde_json::from_str(&text)
                        .map_err(|e| corruption(native_id, format!("bubble {}: {}", bubble_id, e)))?;
                    bubbles.push(bubble);
                }
                None => {
                    tracing::debug!(session_id = native_id, bubble_id = %bubble_id, "Bubble row missing, skipping");
                }
            }
        }
        Ok(bubbles)
    }

    /// Timestamps from the newer single-document layout.
    fn index_stamps(&self) -> Result<Vec<SessionStamp>> {
        let Some(text) = self.get_value(COMPOSER_INDEX_KEY)? else {
            return Ok(Vec::new());
        };
        let index: ComposerStampIndex = match serde_json::from_str(&text) {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable composer index, ignoring for timestamps");
                return Ok(Vec::new());
            }
        };

        Ok(index
            .all_composers
            .unwrap_or_default()
            .into_iter()
            .filter_map(|c| {
                let native_id = c.composer_id?;
                let modified_at = c
                    .last_updated_at
                    .as_ref()
                    .and_then(parse_timestamp)
                    .or_else(|| c.created_at.as_ref().and_then(parse_timestamp))
                    .unwrap_or(DateTime::UNIX_EPOCH);
                Some(SessionStamp {
                    native_id,
                    modified_at,
                })
            })
            .collect())
    }

    /// Timestamps from legacy per-session rows, extracted inside SQLite.
    fn legacy_stamps(&self) -> Result<Vec<SessionStamp>> {
        let sql = format!(
            r#"
            SELECT
                substr(key, {start}),
                CASE WHEN json_valid(CAST(value AS TEXT))
                     THEN json_extract(CAST(value AS TEXT), '$.lastUpdatedAt') END,
                CASE WHEN json_valid(CAST(value AS TEXT))
                     THEN json_extract(CAST(value AS TEXT), '$.createdAt') END
            FROM {table}
            WHERE key LIKE '{prefix}%'
            "#,
            start = SESSION_PREFIX.len() + 1,
            table = KV_TABLE,
            prefix = SESSION_PREFIX,
        );

        self.with_retry(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let stamps = stmt
                .query_map([], |row| {
                    let native_id: String = row.get(0)?;
                    let updated = sql_timestamp(row.get_ref(1)?);
                    let created = sql_timestamp(row.get_ref(2)?);
                    Ok(SessionStamp {
                        native_id,
                        modified_at: updated.or(created).unwrap_or(DateTime::UNIX_EPOCH),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(stamps)
        })
    }
}

impl SourceReader for CursorReader {
    fn source(&self) -> Source {
        Source::Cursor
    }

    fn is_available(&self) -> bool {
        self.path.exists()
    }

    fn session_timestamps(&self, limit: Option<usize>) -> Result<Vec<SessionStamp>> {
        let mut stamps = self.index_stamps()?;
        let indexed: HashSet<String> = stamps.iter().map(|s| s.native_id.clone()).collect();
        stamps.extend(
            self.legacy_stamps()?
                .into_iter()
                .filter(|s| !indexed.contains(&s.native_id)),
        );
        Ok(newest_first(stamps, limit))
    }

    fn load_session(&self, native_id: &str) -> Result<SessionContent> {
        let mut composer = self.find_composer(native_id)?;
        let bubbles = self.resolve_bubbles(native_id, &mut composer)?;
        let raw_count = bubbles.len();

        let messages: Vec<Message> = bubbles.into_iter().filter_map(bubble_to_message).collect();

        let created_at = composer.created_at.as_ref().and_then(parse_timestamp);
        let modified_at = composer
            .last_updated_at
            .as_ref()
            .and_then(parse_timestamp)
            .or(created_at);

        tracing::debug!(
            session_id = native_id,
            bubbles = raw_count,
            messages = messages.len(),
            "Loaded Cursor session"
        );

        Ok(SessionContent {
            session: Session {
                id: SessionId::new(Source::Cursor, native_id),
                title: composer.name.filter(|n| !n.trim().is_empty()),
                created_at,
                modified_at,
                message_count: raw_count,
                path_hints: Vec::new(),
            },
            messages,
        })
    }

    fn contains(&self, native_id: &str) -> Result<bool> {
        if self
            .index_stamps()?
            .iter()
            .any(|s| s.native_id == native_id)
        {
            return Ok(true);
        }
        let sql = format!("SELECT 1 FROM {} WHERE key = ?1", KV_TABLE);
        let key = format!("{}{}", SESSION_PREFIX, native_id);
        self.with_retry(|conn| {
            conn.query_row(&sql, [&key], |_| Ok(()))
                .optional()
                .map(|found| found.is_some())
        })
    }

    fn close(&self) {
        if let Some(conn) = self.lock().take() {
            if let Err((_, e)) = conn.close() {
                tracing::warn!(error = %e, "Failed to close Cursor database cleanly");
            }
        }
    }
}

// ============================================
// Raw Cursor record types (serde deserialization)
// ============================================

/// Newer layout: one document listing every composer.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawComposerIndex {
    all_composers: Option<Vec<RawComposer>>,
}

/// A composer (session) record in either layout.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawComposer {
    composer_id: Option<String>,
    name: Option<String>,
    created_at: Option<Value>,
    last_updated_at: Option<Value>,
    conversation: Option<Vec<RawBubble>>,
    full_conversation_headers_only: Option<Vec<RawHeader>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawHeader {
    bubble_id: Option<String>,
}

/// One message ("bubble").
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawBubble {
    bubble_id: Option<String>,
    #[serde(rename = "type")]
    bubble_type: Option<i64>,
    text: Option<String>,
    /// Serialized editor document, as a string or inline object
    rich_text: Option<Value>,
    created_at: Option<Value>,
    tool_former_data: Option<RawToolFormer>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawToolFormer {
    name: Option<String>,
    raw_args: Option<Value>,
    result: Option<Value>,
}

/// Field-selective view of the index: message lists are skipped, not built.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ComposerStampIndex {
    all_composers: Option<Vec<ComposerStamp>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ComposerStamp {
    composer_id: Option<String>,
    created_at: Option<Value>,
    last_updated_at: Option<Value>,
}

// ============================================
// Normalization
// ============================================

fn bubble_to_message(bubble: RawBubble) -> Option<Message> {
    let text = bubble.text.unwrap_or_default();
    let content = if text.trim().is_empty() {
        match &bubble.rich_text {
            Some(Value::String(document)) => rich_text::flatten(document),
            Some(document @ Value::Object(_)) => rich_text::flatten_value(document),
            _ => String::new(),
        }
    } else {
        text
    };

    let tool = bubble.tool_former_data.and_then(tool_invocation);
    let role = match (bubble.bubble_type, &tool) {
        (_, Some(_)) => Role::Tool,
        (Some(BUBBLE_USER), None) => Role::User,
        (Some(BUBBLE_ASSISTANT), None) => Role::Assistant,
        _ => return None,
    };

    if content.trim().is_empty() && tool.is_none() {
        return None;
    }

    Some(Message {
        role,
        content,
        native_id: bubble.bubble_id,
        timestamp: bubble.created_at.as_ref().and_then(parse_timestamp),
        tool,
    })
}

fn tool_invocation(data: RawToolFormer) -> Option<ToolInvocation> {
    let name = data.name.filter(|n| !n.is_empty())?;

    // rawArgs is usually a JSON document serialized into a string
    let input = match data.raw_args {
        Some(Value::String(s)) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        Some(other) => other,
        None => Value::Null,
    };

    let (result, workspace_path) = match data.result {
        Some(Value::String(s)) => {
            let path = workspace::workspace_from_result(&s);
            (Some(s), path)
        }
        Some(Value::Null) | None => (None, None),
        Some(other) => {
            let path = workspace::workspace_from_value(&other);
            (Some(other.to_string()), path)
        }
    };

    Some(ToolInvocation {
        name,
        input,
        result,
        workspace_path,
    })
}

// ============================================
// Helpers
// ============================================

fn corruption(native_id: &str, message: String) -> Error {
    Error::DataCorruption {
        id: SessionId::new(Source::Cursor, native_id).to_string(),
        message,
    }
}

fn is_busy(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn is_missing_table(error: &rusqlite::Error) -> bool {
    matches!(error, rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("no such table"))
}

/// Values are stored as TEXT or BLOB depending on the Cursor version.
fn value_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
        _ => None,
    }
}

fn sql_timestamp(value: ValueRef<'_>) -> Option<DateTime<Utc>> {
    match value {
        ValueRef::Integer(ms) => DateTime::from_timestamp_millis(ms),
        ValueRef::Real(ms) => DateTime::from_timestamp_millis(ms as i64),
        ValueRef::Text(bytes) => parse_timestamp(&Value::String(String::from_utf8_lossy(bytes).into_owned())),
        _ => None,
    }
}

/// Epoch milliseconds, or an RFC 3339 string.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(DateTime::from_timestamp_millis),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis)),
        _ => None,
    }
}
