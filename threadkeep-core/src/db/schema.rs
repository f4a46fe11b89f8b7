//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: session metadata and tags
    r#"
    CREATE TABLE IF NOT EXISTS session_metadata (
        id               TEXT PRIMARY KEY,      -- <source>:<native-id>
        source           TEXT NOT NULL,
        nickname         TEXT UNIQUE,
        project_path     TEXT,
        project_name     TEXT,
        has_project      INTEGER NOT NULL DEFAULT 0,
        preview          TEXT,
        message_count    INTEGER NOT NULL DEFAULT 0,
        created_at       DATETIME,
        last_synced_at   DATETIME
    );

    CREATE INDEX IF NOT EXISTS idx_session_metadata_source ON session_metadata(source);
    CREATE INDEX IF NOT EXISTS idx_session_metadata_project ON session_metadata(project_path);
    CREATE INDEX IF NOT EXISTS idx_session_metadata_created ON session_metadata(created_at);

    CREATE TABLE IF NOT EXISTS session_tags (
        session_id       TEXT NOT NULL REFERENCES session_metadata(id) ON DELETE CASCADE,
        tag              TEXT NOT NULL,
        PRIMARY KEY (session_id, tag)
    );

    CREATE INDEX IF NOT EXISTS idx_session_tags_tag ON session_tags(tag);
    "#,
    // Version 2: every workspace a session touched
    r#"
    ALTER TABLE session_metadata ADD COLUMN workspace_paths TEXT NOT NULL DEFAULT '[]';
    ALTER TABLE session_metadata ADD COLUMN multi_workspace INTEGER NOT NULL DEFAULT 0;
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version = get_schema_version(conn)?;

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(migration)?;
            tx.execute_batch(&format!("PRAGMA user_version = {}", version))?;
            tx.commit()?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column_names(conn: &Connection, table: &str) -> Vec<String> {
        conn.prepare(&format!("PRAGMA table_info({})", table))
            .unwrap()
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        // Run migrations twice - should be idempotent
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["session_metadata", "session_tags"] {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }

        let columns = column_names(&conn, "session_metadata");
        assert!(columns.contains(&"workspace_paths".to_string()));
        assert!(columns.contains(&"multi_workspace".to_string()));
    }

    #[test]
    fn test_v1_store_upgrades_in_place() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0]).unwrap();
        conn.execute_batch("PRAGMA user_version = 1").unwrap();
        conn.execute(
            "INSERT INTO session_metadata (id, source, nickname, message_count)
             VALUES ('claude:s1', 'claude', 'keeper', 4)",
            [],
        )
        .unwrap();

        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let (nickname, paths, multi): (String, String, i64) = conn
            .query_row(
                "SELECT nickname, workspace_paths, multi_workspace FROM session_metadata WHERE id = 'claude:s1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(nickname, "keeper");
        assert_eq!(paths, "[]");
        assert_eq!(multi, 0);
    }

    #[test]
    fn test_tags_cascade_on_delete() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO session_metadata (id, source) VALUES ('cursor:a', 'cursor')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO session_tags (session_id, tag) VALUES ('cursor:a', 'bug')",
            [],
        )
        .unwrap();
        conn.execute("DELETE FROM session_metadata WHERE id = 'cursor:a'", [])
            .unwrap();

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM session_tags", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
