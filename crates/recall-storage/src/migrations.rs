//! Database schema migrations.
//!
//! Version 1 creates the namespaces, entries, entry_filters, chunks,
//! chunks_fts, deletion_queue, and schema_migrations tables.

use rusqlite::Connection;
use tracing::info;

use recall_core::error::RecallError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), RecallError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| RecallError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| RecallError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
///
/// The partial unique indexes enforce "at most one ready version per config"
/// and "at most one ready and one pending entry per key" at the storage
/// level. Timestamps are Unix milliseconds.
fn apply_v1(conn: &Connection) -> Result<(), RecallError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS namespaces (
            id              TEXT PRIMARY KEY NOT NULL,
            namespace       TEXT NOT NULL,
            model_id        TEXT NOT NULL,
            dimension       INTEGER NOT NULL CHECK (dimension > 0),
            filter_names    TEXT NOT NULL DEFAULT '[]',
            config_key      TEXT NOT NULL,
            status          TEXT NOT NULL
                            CHECK (status IN ('pending', 'ready', 'replaced')),
            version         INTEGER NOT NULL,
            created_at      INTEGER NOT NULL,
            UNIQUE (config_key, version)
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_namespaces_one_ready
            ON namespaces (config_key) WHERE status = 'ready';

        CREATE INDEX IF NOT EXISTS idx_namespaces_listing
            ON namespaces (status, created_at, id);

        CREATE TABLE IF NOT EXISTS entries (
            id              TEXT PRIMARY KEY NOT NULL,
            namespace_id    TEXT NOT NULL REFERENCES namespaces(id),
            key             TEXT,
            title           TEXT,
            content_hash    TEXT,
            filter_values   TEXT NOT NULL DEFAULT '[]',
            importance      REAL NOT NULL DEFAULT 1.0,
            metadata        TEXT,
            status          TEXT NOT NULL
                            CHECK (status IN ('pending', 'ready', 'replaced')),
            chunker         TEXT,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_one_ready
            ON entries (namespace_id, key)
            WHERE status = 'ready' AND key IS NOT NULL;

        CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_one_pending
            ON entries (namespace_id, key)
            WHERE status = 'pending' AND key IS NOT NULL;

        CREATE INDEX IF NOT EXISTS idx_entries_listing
            ON entries (namespace_id, status, created_at, id);

        CREATE INDEX IF NOT EXISTS idx_entries_pending_age
            ON entries (status, updated_at);

        -- One row per filter value, kept in canonical JSON for exact matching.
        CREATE TABLE IF NOT EXISTS entry_filters (
            entry_id        TEXT NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
            name            TEXT NOT NULL,
            value           TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_entry_filters_lookup
            ON entry_filters (name, value, entry_id);

        CREATE INDEX IF NOT EXISTS idx_entry_filters_entry
            ON entry_filters (entry_id);

        -- No foreign key: chunks of a deleted entry outlive its row until the
        -- deletion sweep reclaims them.
        CREATE TABLE IF NOT EXISTS chunks (
            entry_id        TEXT NOT NULL,
            ord             INTEGER NOT NULL CHECK (ord >= 0),
            text            TEXT NOT NULL,
            metadata        TEXT,
            embedding       BLOB NOT NULL,
            searchable_text TEXT,
            PRIMARY KEY (entry_id, ord)
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(body);

        CREATE TRIGGER IF NOT EXISTS chunks_fts_insert AFTER INSERT ON chunks BEGIN
            INSERT INTO chunks_fts (rowid, body)
            VALUES (new.rowid, COALESCE(new.searchable_text, new.text));
        END;

        CREATE TRIGGER IF NOT EXISTS chunks_fts_delete AFTER DELETE ON chunks BEGIN
            DELETE FROM chunks_fts WHERE rowid = old.rowid;
        END;

        CREATE TABLE IF NOT EXISTS deletion_queue (
            entry_id        TEXT PRIMARY KEY NOT NULL,
            start_order     INTEGER NOT NULL DEFAULT 0,
            enqueued_at     INTEGER NOT NULL
        );

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| RecallError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    fn insert_namespace(conn: &Connection, id: &str, status: &str, version: i64) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO namespaces (id, namespace, model_id, dimension, config_key, status, version, created_at)
             VALUES (?1, 'docs', 'm', 3, 'k', ?2, ?3, 0)",
            rusqlite::params![id, status, version],
        )
    }

    #[test]
    fn test_migrations_run_once() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        // Running again should be idempotent.
        run_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_one_ready_namespace_per_config() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        insert_namespace(&conn, "ns-1", "ready", 1).unwrap();
        insert_namespace(&conn, "ns-2", "pending", 2).unwrap();
        assert!(insert_namespace(&conn, "ns-3", "ready", 3).is_err());
        insert_namespace(&conn, "ns-4", "replaced", 4).unwrap();
    }

    #[test]
    fn test_one_ready_and_one_pending_entry_per_key() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        insert_namespace(&conn, "ns-1", "ready", 1).unwrap();

        let insert = |id: &str, key: Option<&str>, status: &str| {
            conn.execute(
                "INSERT INTO entries (id, namespace_id, key, status, created_at, updated_at)
                 VALUES (?1, 'ns-1', ?2, ?3, 0, 0)",
                rusqlite::params![id, key, status],
            )
        };

        insert("e1", Some("doc"), "ready").unwrap();
        insert("e2", Some("doc"), "pending").unwrap();
        assert!(insert("e3", Some("doc"), "ready").is_err());
        assert!(insert("e4", Some("doc"), "pending").is_err());
        insert("e5", Some("doc"), "replaced").unwrap();

        // Keyless entries are never constrained.
        insert("e6", None, "ready").unwrap();
        insert("e7", None, "ready").unwrap();
    }

    #[test]
    fn test_fts_triggers_follow_chunks() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO chunks (entry_id, ord, text, embedding, searchable_text)
             VALUES ('e1', 0, 'raw text', x'00000000', 'searchable words')",
            [],
        )
        .unwrap();

        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM chunks_fts WHERE chunks_fts MATCH 'searchable'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits, 1);

        conn.execute("DELETE FROM chunks WHERE entry_id = 'e1'", []).unwrap();
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks_fts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_entry_filters_cascade() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        insert_namespace(&conn, "ns-1", "ready", 1).unwrap();
        conn.execute(
            "INSERT INTO entries (id, namespace_id, status, created_at, updated_at)
             VALUES ('e1', 'ns-1', 'ready', 0, 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO entry_filters (entry_id, name, value) VALUES ('e1', 'region', '\"us\"')",
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM entries WHERE id = 'e1'", []).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM entry_filters", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
