//! Session service: the facade front ends talk to
//!
//! Composes the source readers, the sync engine and the metadata store. Reads
//! keep the store fresh on their own: when auto-sync is enabled and the last
//! bulk pass is older than the configured interval, a pass runs first.
//!
//! ## Identifier resolution
//!
//! An identifier given to [`SessionService::get`] (and to every mutation) is
//! tried, in order, as:
//!
//! 1. a nickname
//! 2. an exact composite id (`cursor:<id>`, `claude:<id>`)
//! 3. a prefix of a composite or native id
//! 4. a session the store has not seen yet, imported on demand
//!
//! A bare native id is checked against every source before steps 2-4; if
//! more than one recognizes it the lookup fails with `AmbiguousIdentifier`,
//! even when one copy is already stored.

use crate::config::Config;
use crate::db::{Database, MetadataFilter};
use crate::error::{Error, Result};
use crate::ingest::{readers, SourceReader, SyncEngine, SyncReport};
use crate::types::{
    Message, ProjectInfo, Role, Session, SessionId, SessionMetadata, Source, Statistics, TagInfo,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Reverse;
use std::path::Path;

/// Ordering for [`SessionService::list`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Most recently created first
    #[default]
    Newest,
    Oldest,
    MostMessages,
}

impl std::str::FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "newest" => Ok(SortOrder::Newest),
            "oldest" => Ok(SortOrder::Oldest),
            "most-messages" | "messages" => Ok(SortOrder::MostMessages),
            _ => Err(format!("unknown sort order: {}", s)),
        }
    }
}

/// Filters and ordering for listing sessions.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Project path or project name
    pub project: Option<String>,
    pub tag: Option<String>,
    pub source: Option<Source>,
    pub has_tags: Option<bool>,
    pub sort: SortOrder,
    pub limit: Option<usize>,
}

/// Options for [`SessionService::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Narrowing applied before matching
    pub list: ListOptions,
    /// Overrides the configured case sensitivity
    pub case_sensitive: Option<bool>,
}

/// A session's metadata with its normalized messages.
#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    pub metadata: SessionMetadata,
    pub session: Session,
    pub messages: Vec<Message>,
}

/// Facade over readers, sync engine and metadata store.
pub struct SessionService {
    config: Config,
    db: Database,
    readers: Vec<Box<dyn SourceReader>>,
    last_bulk_sync: Option<DateTime<Utc>>,
}

impl SessionService {
    /// Open with the default database location.
    pub fn open(config: Config) -> Result<Self> {
        Self::open_at(config, &Config::database_path())
    }

    /// Open with an explicit database file.
    pub fn open_at(config: Config, db_path: &Path) -> Result<Self> {
        let db = Database::open(db_path)?;
        db.migrate()?;
        let readers = readers::create_all_readers(&config.sources);
        Ok(Self::from_parts(config, db, readers))
    }

    /// Assemble from already-built parts. The database must be migrated.
    pub fn from_parts(config: Config, db: Database, readers: Vec<Box<dyn SourceReader>>) -> Self {
        Self {
            config,
            db,
            readers,
            last_bulk_sync: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// When the last bulk sync finished, if one ran in this service's lifetime.
    pub fn last_bulk_sync(&self) -> Option<DateTime<Utc>> {
        self.last_bulk_sync
    }

    fn engine(&self) -> SyncEngine<'_> {
        SyncEngine::new(&self.db, &self.readers)
    }

    // ============================================
    // Sync
    // ============================================

    /// Run a bulk sync when forced, or when auto-sync is on and the interval elapsed.
    ///
    /// Returns the report of the pass that ran, if any.
    pub fn ensure_fresh(&mut self, force: bool) -> Result<Option<SyncReport>> {
        if !force && !self.config.sync.auto_sync {
            return Ok(None);
        }
        let due = match self.last_bulk_sync {
            None => true,
            Some(last) => Utc::now() - last > self.config.sync.interval(),
        };
        if !force && !due {
            return Ok(None);
        }
        self.sync(None).map(Some)
    }

    /// Run a bulk sync now. `limit` overrides the configured per-source cap.
    pub fn sync(&mut self, limit: Option<usize>) -> Result<SyncReport> {
        self.sync_with_progress(limit, |_, _, _| {})
    }

    /// Run a bulk sync now, reporting `(current, total, composite_id)`.
    pub fn sync_with_progress<F>(&mut self, limit: Option<usize>, on_progress: F) -> Result<SyncReport>
    where
        F: FnMut(usize, usize, &str),
    {
        let limit = limit.or_else(|| self.config.sync.limit());
        let report = self.engine().sync_all_with_progress(limit, on_progress)?;
        self.last_bulk_sync = Some(Utc::now());
        Ok(report)
    }

    // ============================================
    // Reads
    // ============================================

    /// List session metadata.
    pub fn list(&mut self, options: &ListOptions) -> Result<Vec<SessionMetadata>> {
        self.ensure_fresh(false)?;
        self.list_stored(options)
    }

    fn list_stored(&self, options: &ListOptions) -> Result<Vec<SessionMetadata>> {
        let filter = MetadataFilter {
            project: options.project.clone(),
            source: options.source,
            any_tags: options.tag.iter().map(|t| t.trim().to_string()).collect(),
            has_tags: options.has_tags,
            limit: None,
        };
        let mut records = self.db.list_metadata(&filter)?;

        // Missing creation time sorts as oldest
        match options.sort {
            SortOrder::Newest => records.sort_by_key(|m| Reverse(m.created_at)),
            SortOrder::Oldest => records.sort_by_key(|m| m.created_at),
            SortOrder::MostMessages => records.sort_by_key(|m| Reverse(m.message_count)),
        }

        if let Some(limit) = options.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    /// Resolve an identifier to its metadata.
    pub fn get(&mut self, identifier: &str) -> Result<SessionMetadata> {
        self.ensure_fresh(false)?;
        let import = self.config.sync.auto_sync;
        self.resolve(identifier, import)
    }

    /// Substring search over nickname, tags, preview and project name.
    pub fn search(&mut self, query: &str, options: &SearchOptions) -> Result<Vec<SessionMetadata>> {
        let case_sensitive = options
            .case_sensitive
            .unwrap_or(self.config.search.case_sensitive);
        let needle = if case_sensitive {
            query.trim().to_string()
        } else {
            query.trim().to_lowercase()
        };

        let records = self.list(&options.list)?;
        if needle.is_empty() {
            return Ok(records);
        }

        Ok(records
            .into_iter()
            .filter(|meta| {
                searchable_fields(meta).any(|field| {
                    if case_sensitive {
                        field.contains(&needle)
                    } else {
                        field.to_lowercase().contains(&needle)
                    }
                })
            })
            .collect())
    }

    /// Load a session's messages for display.
    pub fn messages(&mut self, identifier: &str, include_tools: bool) -> Result<Transcript> {
        let metadata = self.get(identifier)?;
        let id = metadata
            .session_id()
            .ok_or_else(|| Error::InvalidInput(format!("malformed stored id: {}", metadata.id)))?;
        let reader = self.reader(id.source)?;
        let content = reader.load_session(&id.native_id)?;

        let messages = content
            .messages
            .into_iter()
            .filter(|m| include_tools || m.role != Role::Tool)
            .collect();

        Ok(Transcript {
            metadata,
            session: content.session,
            messages,
        })
    }

    /// Projects with session counts.
    pub fn projects(&mut self) -> Result<Vec<ProjectInfo>> {
        self.ensure_fresh(false)?;
        self.db.list_projects()
    }

    /// Tags with session counts.
    pub fn tags(&self) -> Result<Vec<TagInfo>> {
        self.db.list_tags()
    }

    /// Store counts alongside live source counts.
    pub fn statistics(&self) -> Result<Statistics> {
        let store = self.db.counts()?;
        let live = |source: Source| -> Option<usize> {
            let reader = self.readers.iter().find(|r| r.source() == source)?;
            if !reader.is_available() {
                return None;
            }
            match reader.session_count() {
                Ok(count) => Some(count),
                Err(e) => {
                    tracing::warn!(source = %source, error = %e, "Could not count live sessions");
                    None
                }
            }
        };

        Ok(Statistics {
            store,
            cursor_live_sessions: live(Source::Cursor),
            claude_live_sessions: live(Source::Claude),
            last_bulk_sync: self.last_bulk_sync,
        })
    }

    // ============================================
    // Mutations
    // ============================================

    /// Assign a globally unique nickname.
    pub fn set_nickname(&mut self, identifier: &str, nickname: &str) -> Result<SessionMetadata> {
        let meta = self.resolve(identifier, true)?;
        self.db.set_nickname(&meta.id, nickname)?;
        self.reload(&meta.id)
    }

    pub fn clear_nickname(&mut self, identifier: &str) -> Result<SessionMetadata> {
        let meta = self.resolve(identifier, true)?;
        self.db.clear_nickname(&meta.id)?;
        self.reload(&meta.id)
    }

    /// Add a tag (no-op when already present).
    pub fn add_tag(&mut self, identifier: &str, tag: &str) -> Result<SessionMetadata> {
        let meta = self.resolve(identifier, true)?;
        self.db.add_tag(&meta.id, tag)?;
        self.reload(&meta.id)
    }

    /// Remove a tag (no-op when absent).
    pub fn remove_tag(&mut self, identifier: &str, tag: &str) -> Result<SessionMetadata> {
        let meta = self.resolve(identifier, true)?;
        self.db.remove_tag(&meta.id, tag)?;
        self.reload(&meta.id)
    }

    /// Forget a session's metadata. The source history is untouched, so a
    /// later sync imports it again without nickname or tags.
    pub fn delete(&mut self, identifier: &str) -> Result<SessionMetadata> {
        let meta = self.resolve(identifier, false)?;
        self.db.delete_metadata(&meta.id)?;
        tracing::info!(session_id = %meta.id, "Deleted session metadata");
        Ok(meta)
    }

    /// Close every reader and the store.
    pub fn close(self) -> Result<()> {
        for reader in &self.readers {
            reader.close();
        }
        self.db.close()
    }

    // ============================================
    // Resolution
    // ============================================

    fn reader(&self, source: Source) -> Result<&dyn SourceReader> {
        self.engine()
            .reader(source)
            .ok_or_else(|| Error::StoreConnection(format!("no reader registered for {}", source)))
    }

    fn reload(&self, id: &str) -> Result<SessionMetadata> {
        self.db
            .get_metadata(id)?
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    fn resolve(&self, identifier: &str, import: bool) -> Result<SessionMetadata> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(Error::InvalidInput("identifier must not be empty".to_string()));
        }

        if let Some(meta) = self.db.get_by_nickname(identifier)? {
            return Ok(meta);
        }

        // A bare id that several sources know stays ambiguous even when the
        // store holds only one of them.
        if SessionId::parse(identifier).is_none() {
            let known = self.sources_knowing(identifier)?;
            if known.len() > 1 {
                return Err(ambiguous(identifier, &known));
            }
        }

        if let Some(meta) = self.db.get_metadata(identifier)? {
            return Ok(meta);
        }
        if let Some(meta) = self.db.resolve_prefix(identifier)? {
            return Ok(meta);
        }

        if import {
            return self.import(identifier);
        }
        Err(Error::SessionNotFound(identifier.to_string()))
    }

    /// Import a session the store has never seen.
    fn import(&self, identifier: &str) -> Result<SessionMetadata> {
        let id = match SessionId::parse(identifier) {
            Some(id) => id,
            None => self.sole_source(identifier)?,
        };
        self.engine().sync_one(&id)
    }

    /// Find the single source that knows a bare native id.
    fn sole_source(&self, native_id: &str) -> Result<SessionId> {
        let mut found = self.sources_knowing(native_id)?;
        match found.len() {
            0 => Err(Error::SessionNotFound(native_id.to_string())),
            1 => Ok(found.remove(0)),
            _ => Err(ambiguous(native_id, &found)),
        }
    }

    /// Every available source holding a session with this exact native id.
    fn sources_knowing(&self, native_id: &str) -> Result<Vec<SessionId>> {
        let mut found = Vec::new();
        for reader in &self.readers {
            if reader.is_available() && reader.contains(native_id)? {
                found.push(SessionId::new(reader.source(), native_id));
            }
        }
        Ok(found)
    }
}

fn ambiguous(identifier: &str, candidates: &[SessionId]) -> Error {
    Error::AmbiguousIdentifier {
        identifier: identifier.to_string(),
        candidates: candidates.iter().map(SessionId::to_string).collect(),
    }
}

fn searchable_fields(meta: &SessionMetadata) -> impl Iterator<Item = &str> {
    meta.nickname
        .as_deref()
        .into_iter()
        .chain(meta.tags.iter().map(String::as_str))
        .chain(meta.preview.as_deref())
        .chain(meta.project_name.as_deref())
}
