//! Ingestion layer: reading sources and syncing the metadata store
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │  Source stores  │ ──► │    SyncEngine    │ ──► │    Database     │
//! │ (vscdb, jsonl)  │     │                  │     │ (metadata, tags)│
//! └─────────────────┘     └──────────────────┘     └─────────────────┘
//!                               │
//!                               ▼
//!                    ┌──────────────────────┐
//!                    │  SourceReader        │
//!                    │  ├─ CursorReader     │
//!                    │  └─ ClaudeReader     │
//!                    └──────────────────────┘
//! ```
//!
//! ## Staleness
//!
//! Each session moves through `Unknown → Imported → Stale → Imported`. A
//! session is re-imported when it has no metadata, no recorded sync time, or
//! a source timestamp strictly newer than its `last_synced_at`. Bulk passes
//! only read timestamps, so unchanged sessions cost one map lookup.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use threadkeep_core::{Config, Database};
//! use threadkeep_core::ingest::{readers, SyncEngine};
//!
//! let config = Config::load()?;
//! let db = Database::open(&Config::database_path())?;
//! db.migrate()?;
//! let readers = readers::create_all_readers(&config.sources);
//!
//! let report = SyncEngine::new(&db, &readers).sync_all(config.sync.limit())?;
//! println!("Synced {} of {} sessions", report.synced, report.examined);
//! ```

mod reader;
pub mod readers;
pub mod rich_text;
pub mod workspace;

pub use reader::{newest_first, SessionStamp, SourceReader};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{SessionContent, SessionId, SessionMetadata, Source};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Length of the first-message preview kept in metadata.
pub const PREVIEW_CHARS: usize = 120;

/// Result of a bulk sync pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Sessions listed by the readers
    pub examined: usize,
    /// Sessions imported (created + updated)
    pub synced: usize,
    /// Imported with no prior metadata
    pub created: usize,
    /// Re-imported because the source moved on
    pub updated: usize,
    /// Metadata already current
    pub skipped_fresh: usize,
    /// No messages, never imported
    pub skipped_empty: usize,
    /// Per-session failures (not found, corrupt)
    pub failed: usize,
    /// Failures by composite id
    pub errors: Vec<(String, String)>,
}

impl SyncReport {
    fn merge_outcome(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Created => {
                self.synced += 1;
                self.created += 1;
            }
            SyncOutcome::Updated => {
                self.synced += 1;
                self.updated += 1;
            }
            SyncOutcome::Fresh => self.skipped_fresh += 1,
            SyncOutcome::Empty => self.skipped_empty += 1,
        }
    }
}

/// What happened to one session during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Fresh,
    Empty,
}

/// Whether a session needs (re-)importing.
pub fn needs_sync(existing: Option<&SessionMetadata>, source_modified: DateTime<Utc>) -> bool {
    match existing.and_then(|m| m.last_synced_at) {
        None => true,
        Some(last_synced) => source_modified > last_synced,
    }
}

/// Build fresh metadata for a loaded session.
///
/// `last_synced_at` is `now`, never earlier than a previously recorded value.
/// Nickname and tags are carried over from `previous`.
pub fn build_metadata(
    content: &SessionContent,
    previous: Option<&SessionMetadata>,
    now: DateTime<Utc>,
) -> SessionMetadata {
    let resolution = workspace::locate(&content.messages, &content.session.path_hints);

    let mut meta = SessionMetadata::new(&content.session.id);
    meta.set_project(resolution.primary);
    meta.workspace_paths = resolution.paths;
    meta.multi_workspace = resolution.multi_workspace;
    meta.preview = content.first_user_preview(PREVIEW_CHARS);
    meta.message_count = content.messages.len() as i64;
    meta.created_at = content
        .session
        .created_at
        .or_else(|| content.messages.iter().find_map(|m| m.timestamp));
    meta.last_synced_at = Some(match previous.and_then(|p| p.last_synced_at) {
        Some(prev) if prev > now => prev,
        _ => now,
    });

    if let Some(previous) = previous {
        meta.nickname = previous.nickname.clone();
        meta.tags = previous.tags.clone();
    }
    meta
}

/// Synchronizes the metadata store with the source readers.
///
/// The engine borrows its store and readers; it holds no state between passes.
pub struct SyncEngine<'a> {
    db: &'a Database,
    readers: &'a [Box<dyn SourceReader>],
}

impl<'a> SyncEngine<'a> {
    pub fn new(db: &'a Database, readers: &'a [Box<dyn SourceReader>]) -> Self {
        Self { db, readers }
    }

    /// Reader for a source, if one is registered.
    pub fn reader(&self, source: Source) -> Option<&'a dyn SourceReader> {
        self.readers
            .iter()
            .find(|r| r.source() == source)
            .map(|r| r.as_ref())
    }

    /// Bulk sync across every available reader.
    ///
    /// `limit` caps each reader to its N most recently modified sessions.
    pub fn sync_all(&self, limit: Option<usize>) -> Result<SyncReport> {
        self.sync_all_with_progress(limit, |_, _, _| {})
    }

    /// Bulk sync with a progress callback.
    ///
    /// The callback receives `(current_index, total, composite_id)` before each
    /// session is examined.
    ///
    /// Per-session failures are logged and counted; store-level failures abort
    /// the pass.
    pub fn sync_all_with_progress<F>(&self, limit: Option<usize>, mut on_progress: F) -> Result<SyncReport>
    where
        F: FnMut(usize, usize, &str),
    {
        let mut work: Vec<(&dyn SourceReader, SessionStamp)> = Vec::new();
        for reader in self.readers {
            if !reader.is_available() {
                tracing::debug!(source = %reader.source(), "Source not available, skipping");
                continue;
            }
            let stamps = reader.session_timestamps(limit)?;
            tracing::info!(
                source = %reader.source(),
                count = stamps.len(),
                "Collected session timestamps"
            );
            work.extend(stamps.into_iter().map(|s| (reader.as_ref(), s)));
        }

        let total = work.len();
        let now = Utc::now();
        let mut report = SyncReport::default();

        for (i, (reader, stamp)) in work.into_iter().enumerate() {
            let id = SessionId::new(reader.source(), stamp.native_id);
            let composite = id.to_string();
            on_progress(i, total, &composite);
            report.examined += 1;

            match self.sync_stamp(reader, &id, stamp.modified_at, now) {
                Ok(outcome) => report.merge_outcome(outcome),
                Err(e) if e.is_per_session() => {
                    tracing::warn!(session_id = %composite, error = %e, "Skipping session");
                    report.failed += 1;
                    report.errors.push((composite, e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            examined = report.examined,
            created = report.created,
            updated = report.updated,
            fresh = report.skipped_fresh,
            empty = report.skipped_empty,
            failed = report.failed,
            "Sync complete"
        );
        Ok(report)
    }

    fn sync_stamp(
        &self,
        reader: &dyn SourceReader,
        id: &SessionId,
        source_modified: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SyncOutcome> {
        let composite = id.to_string();
        let existing = self.db.get_metadata(&composite)?;
        if !needs_sync(existing.as_ref(), source_modified) {
            return Ok(SyncOutcome::Fresh);
        }

        let content = reader.load_session(&id.native_id)?;
        if content.is_empty() {
            tracing::debug!(session_id = %composite, "Session has no messages, not importing");
            return Ok(SyncOutcome::Empty);
        }

        let meta = build_metadata(&content, existing.as_ref(), now);
        self.db.upsert_metadata(&meta)?;
        tracing::debug!(
            session_id = %composite,
            messages = meta.message_count,
            project = meta.project_name.as_deref().unwrap_or("-"),
            "Imported session"
        );

        Ok(if existing.is_some() {
            SyncOutcome::Updated
        } else {
            SyncOutcome::Created
        })
    }

    /// Import one session on demand, regardless of staleness.
    ///
    /// A session with no messages is reported as `SessionNotFound`.
    pub fn sync_one(&self, id: &SessionId) -> Result<SessionMetadata> {
        let reader = self.reader(id.source).ok_or_else(|| {
            Error::StoreConnection(format!("no reader registered for {}", id.source))
        })?;

        let composite = id.to_string();
        let content = reader.load_session(&id.native_id)?;
        if content.is_empty() {
            return Err(Error::SessionNotFound(composite));
        }

        let existing = self.db.get_metadata(&composite)?;
        let meta = build_metadata(&content, existing.as_ref(), Utc::now());
        self.db.upsert_metadata(&meta)?;
        tracing::info!(session_id = %composite, "Imported session on demand");

        // Re-read so the caller sees stored nickname and tags
        Ok(self.db.get_metadata(&composite)?.unwrap_or(meta))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory reader used by sync and service tests.

    use super::*;
    use crate::types::{Message, Role, Session, ToolInvocation};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Clone)]
    pub enum FakeSession {
        Messages(Vec<Message>),
        Corrupt,
        Locked,
    }

    pub struct FakeReader {
        pub source: Source,
        pub sessions: Mutex<BTreeMap<String, (DateTime<Utc>, FakeSession)>>,
        pub loads: Mutex<usize>,
        pub closed: Mutex<usize>,
    }

    impl FakeReader {
        pub fn new(source: Source) -> Self {
            Self {
                source,
                sessions: Mutex::new(BTreeMap::new()),
                loads: Mutex::new(0),
                closed: Mutex::new(0),
            }
        }

        pub fn put(&self, native_id: &str, modified_at: DateTime<Utc>, session: FakeSession) {
            self.sessions
                .lock()
                .unwrap()
                .insert(native_id.to_string(), (modified_at, session));
        }

        pub fn loads(&self) -> usize {
            *self.loads.lock().unwrap()
        }
    }

    pub fn user(text: &str) -> Message {
        Message {
            role: Role::User,
            content: text.to_string(),
            native_id: None,
            timestamp: None,
            tool: None,
        }
    }

    pub fn assistant(text: &str) -> Message {
        Message {
            role: Role::Assistant,
            content: text.to_string(),
            ..user(text)
        }
    }

    pub fn tool_with_workspace(path: &str) -> Message {
        Message {
            role: Role::Tool,
            content: String::new(),
            native_id: None,
            timestamp: None,
            tool: Some(ToolInvocation {
                name: "codebase_search".to_string(),
                input: serde_json::json!({}),
                result: None,
                workspace_path: Some(path.to_string()),
            }),
        }
    }

    impl SourceReader for FakeReader {
        fn source(&self) -> Source {
            self.source
        }

        fn is_available(&self) -> bool {
            true
        }

        fn session_timestamps(&self, limit: Option<usize>) -> Result<Vec<SessionStamp>> {
            let stamps = self
                .sessions
                .lock()
                .unwrap()
                .iter()
                .map(|(id, (ts, _))| SessionStamp {
                    native_id: id.clone(),
                    modified_at: *ts,
                })
                .collect();
            Ok(newest_first(stamps, limit))
        }

        fn load_session(&self, native_id: &str) -> Result<SessionContent> {
            *self.loads.lock().unwrap() += 1;
            let id = SessionId::new(self.source, native_id);
            let sessions = self.sessions.lock().unwrap();
            let Some((ts, session)) = sessions.get(native_id) else {
                return Err(Error::SessionNotFound(id.to_string()));
            };
            match session {
                FakeSession::Corrupt => Err(Error::DataCorruption {
                    id: id.to_string(),
                    message: "bad json".to_string(),
                }),
                FakeSession::Locked => Err(Error::StoreLocked("database is locked".to_string())),
                FakeSession::Messages(messages) => Ok(SessionContent {
                    session: Session {
                        id,
                        title: None,
                        created_at: Some(*ts),
                        modified_at: Some(*ts),
                        message_count: messages.len(),
                        path_hints: Vec::new(),
                    },
                    messages: messages.clone(),
                }),
            }
        }

        fn contains(&self, native_id: &str) -> Result<bool> {
            Ok(self.sessions.lock().unwrap().contains_key(native_id))
        }

        fn close(&self) {
            *self.closed.lock().unwrap() += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use chrono::{Duration, TimeZone};

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_needs_sync() {
        let mut meta = SessionMetadata::new(&SessionId::new(Source::Claude, "x"));
        assert!(needs_sync(None, ts(0)));
        assert!(needs_sync(Some(&meta), ts(0)));

        meta.last_synced_at = Some(ts(10));
        assert!(!needs_sync(Some(&meta), ts(5)));
        assert!(!needs_sync(Some(&meta), ts(10)));
        assert!(needs_sync(Some(&meta), ts(11)));
    }

    #[test]
    fn test_empty_sessions_never_imported() {
        let db = test_db();
        let reader = FakeReader::new(Source::Cursor);
        reader.put("empty", ts(0), FakeSession::Messages(vec![]));
        reader.put("full", ts(0), FakeSession::Messages(vec![user("hi")]));
        let readers: Vec<Box<dyn SourceReader>> = vec![Box::new(reader)];

        let engine = SyncEngine::new(&db, &readers);
        let report = engine.sync_all(None).unwrap();
        assert_eq!(report.examined, 2);
        assert_eq!(report.created, 1);
        assert_eq!(report.skipped_empty, 1);
        assert!(db.get_metadata("cursor:empty").unwrap().is_none());

        assert!(matches!(
            engine.sync_one(&SessionId::new(Source::Cursor, "empty")),
            Err(Error::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_bulk_sync_idempotent() {
        let db = test_db();
        let reader = FakeReader::new(Source::Claude);
        reader.put(
            "s1",
            ts(0),
            FakeSession::Messages(vec![user("hello there"), assistant("hi"), tool_with_workspace("/a/b")]),
        );
        let readers: Vec<Box<dyn SourceReader>> = vec![Box::new(reader)];
        let engine = SyncEngine::new(&db, &readers);

        let first = engine.sync_all(None).unwrap();
        assert_eq!(first.synced, 1);
        let before = db.get_metadata("claude:s1").unwrap().unwrap();
        assert_eq!(before.project_name.as_deref(), Some("b"));
        assert_eq!(before.preview.as_deref(), Some("hello there"));
        assert_eq!(before.message_count, 3);

        let second = engine.sync_all(None).unwrap();
        assert_eq!(second.synced, 0);
        assert_eq!(second.skipped_fresh, 1);
        assert_eq!(db.get_metadata("claude:s1").unwrap().unwrap(), before);
    }

    #[test]
    fn test_newer_source_triggers_update() {
        let db = test_db();
        let reader = FakeReader::new(Source::Claude);
        reader.put("s1", ts(0), FakeSession::Messages(vec![user("one")]));
        let readers: Vec<Box<dyn SourceReader>> = vec![Box::new(reader)];
        let engine = SyncEngine::new(&db, &readers);
        engine.sync_all(None).unwrap();
        db.set_nickname("claude:s1", "keep").unwrap();

        // Same session, modified after the recorded sync time
        let future = Utc::now() + Duration::hours(1);
        let reader = FakeReader::new(Source::Claude);
        reader.put("s1", future, FakeSession::Messages(vec![user("one"), assistant("two")]));
        let readers: Vec<Box<dyn SourceReader>> = vec![Box::new(reader)];
        let report = SyncEngine::new(&db, &readers).sync_all(None).unwrap();

        assert_eq!(report.updated, 1);
        let meta = db.get_metadata("claude:s1").unwrap().unwrap();
        assert_eq!(meta.message_count, 2);
        assert_eq!(meta.nickname.as_deref(), Some("keep"));
    }

    #[test]
    fn test_per_session_failures_skipped() {
        let db = test_db();
        let reader = FakeReader::new(Source::Cursor);
        reader.put("bad", ts(1), FakeSession::Corrupt);
        reader.put("good", ts(0), FakeSession::Messages(vec![user("ok")]));
        let readers: Vec<Box<dyn SourceReader>> = vec![Box::new(reader)];

        let mut seen = Vec::new();
        let report = SyncEngine::new(&db, &readers)
            .sync_all_with_progress(None, |i, total, id| seen.push((i, total, id.to_string())))
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.synced, 1);
        assert_eq!(report.errors[0].0, "cursor:bad");
        assert_eq!(
            seen,
            vec![(0, 2, "cursor:bad".to_string()), (1, 2, "cursor:good".to_string())]
        );
    }

    #[test]
    fn test_store_locked_aborts_pass() {
        let db = test_db();
        let cursor = FakeReader::new(Source::Cursor);
        cursor.put("busy", ts(2), FakeSession::Locked);
        cursor.put("older", ts(1), FakeSession::Messages(vec![user("ok")]));
        let claude = FakeReader::new(Source::Claude);
        claude.put("later", ts(0), FakeSession::Messages(vec![user("ok")]));
        let readers: Vec<Box<dyn SourceReader>> = vec![Box::new(cursor), Box::new(claude)];

        let mut seen = Vec::new();
        let result = SyncEngine::new(&db, &readers)
            .sync_all_with_progress(None, |_, _, id| seen.push(id.to_string()));

        assert!(matches!(result, Err(Error::StoreLocked(_))));
        assert_eq!(seen, vec!["cursor:busy".to_string()]);
        assert!(db.get_metadata("cursor:older").unwrap().is_none());
        assert!(db.get_metadata("claude:later").unwrap().is_none());
    }

    #[test]
    fn test_limit_caps_per_reader() {
        let db = test_db();
        let reader = FakeReader::new(Source::Claude);
        for i in 0..5 {
            reader.put(&format!("s{}", i), ts(i), FakeSession::Messages(vec![user("x")]));
        }
        let readers: Vec<Box<dyn SourceReader>> = vec![Box::new(reader)];
        let report = SyncEngine::new(&db, &readers).sync_all(Some(2)).unwrap();
        assert_eq!(report.examined, 2);
        assert!(db.get_metadata("claude:s4").unwrap().is_some());
        assert!(db.get_metadata("claude:s0").unwrap().is_none());
    }

    #[test]
    fn test_last_synced_never_moves_backwards() {
        let content = SessionContent {
            session: crate::types::Session {
                id: SessionId::new(Source::Claude, "x"),
                title: None,
                created_at: None,
                modified_at: None,
                message_count: 1,
                path_hints: vec!["/fallback/dir".to_string()],
            },
            messages: vec![user("hi")],
        };
        let mut previous = SessionMetadata::new(&content.session.id);
        previous.last_synced_at = Some(ts(100));

        let meta = build_metadata(&content, Some(&previous), ts(50));
        assert_eq!(meta.last_synced_at, Some(ts(100)));
        assert_eq!(meta.project_name.as_deref(), Some("dir"));

        let meta = build_metadata(&content, Some(&previous), ts(200));
        assert_eq!(meta.last_synced_at, Some(ts(200)));
    }
}
