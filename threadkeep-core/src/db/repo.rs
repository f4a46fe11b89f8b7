//! Database repository layer
//!
//! Query and write operations for session metadata and tags. Sync-owned
//! fields (project, preview, counts, timestamps) are replaced wholesale by
//! [`Database::upsert_metadata`]; nicknames and tags are user-owned and only
//! change through their dedicated operations.

use crate::error::{Error, Result};
use crate::types::{ProjectInfo, SessionMetadata, Source, StoreCounts, TagInfo};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Columns selected for every metadata read, with tags folded into a JSON array.
const METADATA_COLUMNS: &str = r#"
    m.id, m.source, m.nickname, m.project_path, m.project_name, m.has_project,
    m.workspace_paths, m.multi_workspace, m.preview, m.message_count,
    m.created_at, m.last_synced_at,
    (SELECT json_group_array(t.tag) FROM session_tags t WHERE t.session_id = m.id) AS tags
"#;

/// Candidates reported in an ambiguous prefix error.
const MAX_CANDIDATES: usize = 10;

/// Filter for listing session metadata
#[derive(Debug, Default, Clone)]
pub struct MetadataFilter {
    /// Match project path or project name exactly
    pub project: Option<String>,
    pub source: Option<Source>,
    /// Keep sessions carrying at least one of these tags
    pub any_tags: Vec<String>,
    /// `Some(true)`: only tagged sessions, `Some(false)`: only untagged
    pub has_tags: Option<bool>,
    /// Maximum number of records to return
    pub limit: Option<usize>,
}

/// Database handle (single connection behind a mutex)
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        tracing::debug!(path = %path.display(), "Opened metadata store");
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.lock();
        super::schema::run_migrations(&conn)
    }

    /// File backing this store, `None` when in memory
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Close the connection, surfacing any error SQLite reports.
    pub fn close(self) -> Result<()> {
        let conn = self.conn.into_inner().unwrap_or_else(PoisonError::into_inner);
        conn.close().map_err(|(_, e)| Error::Database(e))
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================
    // Metadata operations
    // ============================================

    /// Insert or update the sync-owned fields of a record.
    ///
    /// Nickname and tags are left untouched on existing rows and never
    /// written from `meta`.
    pub fn upsert_metadata(&self, meta: &SessionMetadata) -> Result<()> {
        let conn = self.lock();
        let workspace_paths = serde_json::to_string(&meta.workspace_paths)?;
        conn.execute(
            r#"
            INSERT INTO session_metadata (
                id, source, project_path, project_name, has_project,
                workspace_paths, multi_workspace, preview, message_count,
                created_at, last_synced_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                source = excluded.source,
                project_path = excluded.project_path,
                project_name = excluded.project_name,
                has_project = excluded.has_project,
                workspace_paths = excluded.workspace_paths,
                multi_workspace = excluded.multi_workspace,
                preview = excluded.preview,
                message_count = excluded.message_count,
                created_at = excluded.created_at,
                last_synced_at = excluded.last_synced_at
            "#,
            params![
                meta.id,
                meta.source.as_str(),
                meta.project_path,
                meta.project_name,
                meta.has_project,
                workspace_paths,
                meta.multi_workspace,
                meta.preview,
                meta.message_count,
                meta.created_at.map(format_timestamp),
                meta.last_synced_at.map(format_timestamp),
            ],
        )?;
        Ok(())
    }

    /// Get a record by composite id
    pub fn get_metadata(&self, id: &str) -> Result<Option<SessionMetadata>> {
        let conn = self.lock();
        let sql = format!("SELECT {} FROM session_metadata m WHERE m.id = ?", METADATA_COLUMNS);
        conn.query_row(&sql, [id], Self::row_to_metadata)
            .optional()
            .map_err(Error::from)
    }

    /// Get a record by nickname
    pub fn get_by_nickname(&self, nickname: &str) -> Result<Option<SessionMetadata>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {} FROM session_metadata m WHERE m.nickname = ?",
            METADATA_COLUMNS
        );
        conn.query_row(&sql, [nickname.trim()], Self::row_to_metadata)
            .optional()
            .map_err(Error::from)
    }

    /// Resolve an id prefix against composite ids and native ids.
    ///
    /// Returns `Ok(None)` when nothing matches and `AmbiguousIdentifier` when
    /// more than one record does.
    pub fn resolve_prefix(&self, prefix: &str) -> Result<Option<SessionMetadata>> {
        if prefix.is_empty() {
            return Ok(None);
        }
        let pattern = format!("{}%", escape_like(prefix));
        let matches = {
            let conn = self.lock();
            let sql = format!(
                r#"
                SELECT {} FROM session_metadata m
                WHERE m.id LIKE ?1 ESCAPE '\'
                   OR substr(m.id, instr(m.id, ':') + 1) LIKE ?1 ESCAPE '\'
                ORDER BY m.id
                LIMIT {}
                "#,
                METADATA_COLUMNS,
                MAX_CANDIDATES + 1
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([&pattern], Self::row_to_metadata)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.into_iter().next()),
            _ => Err(Error::AmbiguousIdentifier {
                identifier: prefix.to_string(),
                candidates: matches
                    .into_iter()
                    .take(MAX_CANDIDATES)
                    .map(|m| m.id)
                    .collect(),
            }),
        }
    }

    /// Assign a nickname, enforcing global uniqueness.
    ///
    /// The ownership check and the write happen in one transaction. Setting a
    /// record's current nickname again succeeds.
    pub fn set_nickname(&self, id: &str, nickname: &str) -> Result<()> {
        let nickname = nickname.trim();
        if nickname.is_empty() {
            return Err(Error::InvalidInput("nickname must not be empty".to_string()));
        }

        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let owner: Option<String> = tx
            .query_row(
                "SELECT id FROM session_metadata WHERE nickname = ?",
                [nickname],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(owner) = owner {
            if owner != id {
                return Err(Error::NicknameConflict {
                    nickname: nickname.to_string(),
                    owner,
                });
            }
        }

        let updated = tx.execute(
            "UPDATE session_metadata SET nickname = ? WHERE id = ?",
            params![nickname, id],
        )?;
        if updated == 0 {
            return Err(Error::SessionNotFound(id.to_string()));
        }

        tx.commit()?;
        tracing::debug!(session_id = id, nickname, "Nickname set");
        Ok(())
    }

    /// Remove a record's nickname.
    pub fn clear_nickname(&self, id: &str) -> Result<()> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE session_metadata SET nickname = NULL WHERE id = ?",
            [id],
        )?;
        if updated == 0 {
            return Err(Error::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Add a tag. Returns `false` when the tag was already present.
    pub fn add_tag(&self, id: &str, tag: &str) -> Result<bool> {
        let tag = validate_tag(tag)?;
        let conn = self.lock();
        if !Self::exists(&conn, id)? {
            return Err(Error::SessionNotFound(id.to_string()));
        }
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO session_tags (session_id, tag) VALUES (?, ?)",
            params![id, tag],
        )?;
        Ok(inserted > 0)
    }

    /// Remove a tag. Returns `false` when the tag was not present.
    pub fn remove_tag(&self, id: &str, tag: &str) -> Result<bool> {
        let tag = validate_tag(tag)?;
        let conn = self.lock();
        if !Self::exists(&conn, id)? {
            return Err(Error::SessionNotFound(id.to_string()));
        }
        let removed = conn.execute(
            "DELETE FROM session_tags WHERE session_id = ? AND tag = ?",
            params![id, tag],
        )?;
        Ok(removed > 0)
    }

    /// Records carrying a tag
    pub fn list_by_tag(&self, tag: &str) -> Result<Vec<SessionMetadata>> {
        self.list_metadata(&MetadataFilter {
            any_tags: vec![tag.trim().to_string()],
            ..Default::default()
        })
    }

    /// Records whose project path or name equals `project`
    pub fn list_by_project(&self, project: &str) -> Result<Vec<SessionMetadata>> {
        self.list_metadata(&MetadataFilter {
            project: Some(project.to_string()),
            ..Default::default()
        })
    }

    /// List records with optional filtering, newest first
    pub fn list_metadata(&self, filter: &MetadataFilter) -> Result<Vec<SessionMetadata>> {
        let conn = self.lock();

        let mut sql = format!("SELECT {} FROM session_metadata m WHERE 1=1", METADATA_COLUMNS);
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

        if let Some(project) = &filter.project {
            sql.push_str(" AND (m.project_path = ? OR m.project_name = ?)");
            params.push(Box::new(project.clone()));
            params.push(Box::new(project.clone()));
        }

        if let Some(source) = &filter.source {
            sql.push_str(" AND m.source = ?");
            params.push(Box::new(source.as_str().to_string()));
        }

        if !filter.any_tags.is_empty() {
            let placeholders = vec!["?"; filter.any_tags.len()].join(", ");
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM session_tags t WHERE t.session_id = m.id AND t.tag IN ({}))",
                placeholders
            ));
            for tag in &filter.any_tags {
                params.push(Box::new(tag.clone()));
            }
        }

        match filter.has_tags {
            Some(true) => {
                sql.push_str(" AND EXISTS (SELECT 1 FROM session_tags t WHERE t.session_id = m.id)")
            }
            Some(false) => sql
                .push_str(" AND NOT EXISTS (SELECT 1 FROM session_tags t WHERE t.session_id = m.id)"),
            None => {}
        }

        sql.push_str(" ORDER BY m.created_at DESC NULLS LAST, m.id");

        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_refs.as_slice(), Self::row_to_metadata)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Distinct projects with session counts, most used first
    pub fn list_projects(&self) -> Result<Vec<ProjectInfo>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT project_path, MAX(project_name), COUNT(*) AS session_count
            FROM session_metadata
            WHERE has_project = 1 AND project_path IS NOT NULL
            GROUP BY project_path
            ORDER BY session_count DESC, project_path
            "#,
        )?;
        let projects = stmt
            .query_map([], |row| {
                let path: String = row.get(0)?;
                let name: Option<String> = row.get(1)?;
                Ok(ProjectInfo {
                    name: name.unwrap_or_else(|| crate::ingest::workspace::project_name(&path)),
                    path,
                    session_count: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(projects)
    }

    /// Distinct tags with session counts, most used first
    pub fn list_tags(&self) -> Result<Vec<TagInfo>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT tag, COUNT(*) AS session_count
            FROM session_tags
            GROUP BY tag
            ORDER BY session_count DESC, tag
            "#,
        )?;
        let tags = stmt
            .query_map([], |row| {
                Ok(TagInfo {
                    tag: row.get(0)?,
                    session_count: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    /// Delete a record and its tags. Returns `false` if it did not exist.
    pub fn delete_metadata(&self, id: &str) -> Result<bool> {
        let conn = self.lock();
        let deleted = conn.execute("DELETE FROM session_metadata WHERE id = ?", [id])?;
        Ok(deleted > 0)
    }

    /// Aggregate counts over the whole store
    pub fn counts(&self) -> Result<StoreCounts> {
        let conn = self.lock();
        conn.query_row(
            r#"
            SELECT
                (SELECT COUNT(*) FROM session_metadata),
                (SELECT COUNT(*) FROM session_metadata WHERE source = 'cursor'),
                (SELECT COUNT(*) FROM session_metadata WHERE source = 'claude'),
                (SELECT COUNT(*) FROM session_metadata WHERE has_project = 1),
                (SELECT COUNT(*) FROM session_metadata WHERE nickname IS NOT NULL),
                (SELECT COUNT(DISTINCT session_id) FROM session_tags),
                (SELECT COUNT(DISTINCT tag) FROM session_tags),
                (SELECT COUNT(DISTINCT project_path) FROM session_metadata WHERE has_project = 1)
            "#,
            [],
            |row| {
                Ok(StoreCounts {
                    total_sessions: row.get(0)?,
                    cursor_sessions: row.get(1)?,
                    claude_sessions: row.get(2)?,
                    with_project: row.get(3)?,
                    with_nickname: row.get(4)?,
                    with_tags: row.get(5)?,
                    distinct_tags: row.get(6)?,
                    distinct_projects: row.get(7)?,
                })
            },
        )
        .map_err(Error::from)
    }

    fn exists(conn: &Connection, id: &str) -> Result<bool> {
        let found = conn
            .query_row("SELECT 1 FROM session_metadata WHERE id = ?", [id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    fn row_to_metadata(row: &Row) -> rusqlite::Result<SessionMetadata> {
        let source_str: String = row.get("source")?;
        let workspace_paths_str: Option<String> = row.get("workspace_paths")?;
        let tags_str: Option<String> = row.get("tags")?;
        let created_at_str: Option<String> = row.get("created_at")?;
        let last_synced_str: Option<String> = row.get("last_synced_at")?;

        let source = source_str.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?;

        Ok(SessionMetadata {
            id: row.get("id")?,
            source,
            nickname: row.get("nickname")?,
            tags: tags_str
                .and_then(|s| serde_json::from_str::<BTreeSet<String>>(&s).ok())
                .unwrap_or_default(),
            project_path: row.get("project_path")?,
            project_name: row.get("project_name")?,
            has_project: row.get("has_project")?,
            workspace_paths: workspace_paths_str
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            multi_workspace: row.get("multi_workspace")?,
            preview: row.get("preview")?,
            message_count: row.get("message_count")?,
            created_at: created_at_str.as_deref().and_then(parse_timestamp),
            last_synced_at: last_synced_str.as_deref().and_then(parse_timestamp),
        })
    }
}

/// Fixed-width RFC 3339 so stored timestamps sort lexically.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn validate_tag(tag: &str) -> Result<&str> {
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(Error::InvalidInput("tag must not be empty".to_string()));
    }
    Ok(tag)
}

fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionId;
    use chrono::TimeZone;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn create_test_metadata(source: Source, native_id: &str) -> SessionMetadata {
        let mut meta = SessionMetadata::new(&SessionId::new(source, native_id));
        meta.message_count = 3;
        meta.preview = Some("hello".to_string());
        meta.created_at = Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        meta.last_synced_at = Some(Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap());
        meta
    }

    #[test]
    fn test_metadata_crud() {
        let db = test_db();
        let mut meta = create_test_metadata(Source::Claude, "s1");
        meta.set_project(Some("/home/me/app".to_string()));
        meta.workspace_paths = vec!["/home/me/app".to_string(), "/tmp/x".to_string()];
        meta.multi_workspace = true;
        db.upsert_metadata(&meta).unwrap();

        let loaded = db.get_metadata("claude:s1").unwrap().unwrap();
        assert_eq!(loaded, meta);
        assert!(db.get_metadata("claude:missing").unwrap().is_none());

        assert!(db.delete_metadata("claude:s1").unwrap());
        assert!(!db.delete_metadata("claude:s1").unwrap());
    }

    #[test]
    fn test_upsert_preserves_user_fields() {
        let db = test_db();
        let meta = create_test_metadata(Source::Cursor, "c1");
        db.upsert_metadata(&meta).unwrap();
        db.set_nickname("cursor:c1", "keeper").unwrap();
        db.add_tag("cursor:c1", "bug").unwrap();

        let mut resynced = meta.clone();
        resynced.message_count = 10;
        db.upsert_metadata(&resynced).unwrap();

        let loaded = db.get_metadata("cursor:c1").unwrap().unwrap();
        assert_eq!(loaded.message_count, 10);
        assert_eq!(loaded.nickname.as_deref(), Some("keeper"));
        assert!(loaded.tags.contains("bug"));
    }

    #[test]
    fn test_nickname_uniqueness() {
        let db = test_db();
        db.upsert_metadata(&create_test_metadata(Source::Cursor, "a")).unwrap();
        db.upsert_metadata(&create_test_metadata(Source::Claude, "b")).unwrap();

        db.set_nickname("cursor:a", "foo").unwrap();
        let err = db.set_nickname("claude:b", "foo").unwrap_err();
        match err {
            Error::NicknameConflict { nickname, owner } => {
                assert_eq!(nickname, "foo");
                assert_eq!(owner, "cursor:a");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(db.get_metadata("claude:b").unwrap().unwrap().nickname.is_none());

        // Re-setting on the owner is fine
        db.set_nickname("cursor:a", "foo").unwrap();
        assert_eq!(db.get_by_nickname("foo").unwrap().unwrap().id, "cursor:a");

        db.clear_nickname("cursor:a").unwrap();
        assert!(db.get_by_nickname("foo").unwrap().is_none());
        db.set_nickname("claude:b", "foo").unwrap();
    }

    #[test]
    fn test_nickname_validation() {
        let db = test_db();
        assert!(matches!(
            db.set_nickname("cursor:a", "   "),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            db.set_nickname("cursor:missing", "x"),
            Err(Error::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_prefix_resolution() {
        let db = test_db();
        db.upsert_metadata(&create_test_metadata(Source::Cursor, "abc111")).unwrap();
        db.upsert_metadata(&create_test_metadata(Source::Cursor, "abc222")).unwrap();

        match db.resolve_prefix("abc").unwrap_err() {
            Error::AmbiguousIdentifier { candidates, .. } => {
                assert_eq!(candidates, vec!["cursor:abc111", "cursor:abc222"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(db.resolve_prefix("abc1").unwrap().unwrap().id, "cursor:abc111");
        assert_eq!(db.resolve_prefix("cursor:abc2").unwrap().unwrap().id, "cursor:abc222");
        assert!(db.resolve_prefix("zzz").unwrap().is_none());
        // LIKE wildcards are literal
        assert!(db.resolve_prefix("%").unwrap().is_none());
    }

    #[test]
    fn test_tags_idempotent() {
        let db = test_db();
        db.upsert_metadata(&create_test_metadata(Source::Claude, "t")).unwrap();

        assert!(db.add_tag("claude:t", " bug ").unwrap());
        assert!(!db.add_tag("claude:t", "bug").unwrap());
        assert_eq!(db.list_by_tag("bug").unwrap().len(), 1);
        assert_eq!(
            db.list_tags().unwrap(),
            vec![TagInfo {
                tag: "bug".to_string(),
                session_count: 1
            }]
        );

        assert!(db.remove_tag("claude:t", "bug").unwrap());
        assert!(!db.remove_tag("claude:t", "bug").unwrap());
        assert!(matches!(db.add_tag("claude:t", ""), Err(Error::InvalidInput(_))));
        assert!(matches!(
            db.add_tag("claude:nope", "x"),
            Err(Error::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_filters_projects_and_counts() {
        let db = test_db();
        let mut a = create_test_metadata(Source::Cursor, "a");
        a.set_project(Some("/w/app".to_string()));
        let mut b = create_test_metadata(Source::Claude, "b");
        b.set_project(Some("/w/app".to_string()));
        let c = create_test_metadata(Source::Claude, "c");
        for meta in [&a, &b, &c] {
            db.upsert_metadata(meta).unwrap();
        }
        db.add_tag("claude:c", "later").unwrap();
        db.set_nickname("cursor:a", "first").unwrap();

        assert_eq!(db.list_by_project("app").unwrap().len(), 2);
        assert_eq!(db.list_by_project("/w/app").unwrap().len(), 2);

        let filter = MetadataFilter {
            source: Some(Source::Claude),
            has_tags: Some(false),
            ..Default::default()
        };
        let records = db.list_metadata(&filter).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "claude:b");

        let limited = db
            .list_metadata(&MetadataFilter {
                limit: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 2);

        let projects = db.list_projects().unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name, "app");
        assert_eq!(projects[0].session_count, 2);

        let counts = db.counts().unwrap();
        assert_eq!(counts.total_sessions, 3);
        assert_eq!(counts.cursor_sessions, 1);
        assert_eq!(counts.claude_sessions, 2);
        assert_eq!(counts.with_project, 2);
        assert_eq!(counts.with_nickname, 1);
        assert_eq!(counts.with_tags, 1);
        assert_eq!(counts.distinct_tags, 1);
        assert_eq!(counts.distinct_projects, 1);
    }

    #[test]
    fn test_delete_cascades_tags() {
        let db = test_db();
        db.upsert_metadata(&create_test_metadata(Source::Claude, "d")).unwrap();
        db.add_tag("claude:d", "x").unwrap();
        db.delete_metadata("claude:d").unwrap();
        assert!(db.list_tags().unwrap().is_empty());
    }

    #[test]
    fn test_open_file_and_close() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("metadata.db");
        let db = Database::open(&path).unwrap();
        db.migrate().unwrap();
        assert_eq!(db.path(), Some(path.as_path()));
        db.close().unwrap();
        assert!(path.exists());
    }
}
