//! Database migrations for Phloem

use rusqlite::Connection;

use crate::error::{map_sqlite, Result};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Current on-disk version (0 for a fresh database)
pub fn current_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )
    .map_err(map_sqlite)?;

    let version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);
    Ok(version)
}

/// Whether any migration would run on this database
pub fn pending_migrations(conn: &Connection) -> Result<bool> {
    Ok(current_version(conn)? < SCHEMA_VERSION)
}

/// Apply all pending migrations in order, each inside a transaction
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current = current_version(conn)?;

    if current < 1 {
        apply(conn, 1, migrate_v1)?;
    }
    if current < 2 {
        apply(conn, 2, migrate_v2)?;
    }

    Ok(())
}

fn apply(conn: &Connection, version: i32, step: fn(&Connection) -> Result<()>) -> Result<()> {
    conn.execute_batch("BEGIN").map_err(map_sqlite)?;
    let result = step(conn).and_then(|_| {
        conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
            .map_err(map_sqlite)?;
        Ok(())
    });
    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT").map_err(map_sqlite)?;
            tracing::info!(version, "applied schema migration");
            Ok(())
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

/// Initial schema: memories, tags, citations, embeddings
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            context TEXT,
            content_hash TEXT NOT NULL,
            seq INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- Tags table (normalized)
        CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );

        -- Memory-tag relationship
        CREATE TABLE IF NOT EXISTS memory_tags (
            memory_id TEXT NOT NULL,
            tag_id INTEGER NOT NULL,
            PRIMARY KEY (memory_id, tag_id),
            FOREIGN KEY (memory_id) REFERENCES memories(id) ON DELETE CASCADE,
            FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
        );

        -- File citations; follow their owning memory
        CREATE TABLE IF NOT EXISTS citations (
            id TEXT PRIMARY KEY,
            memory_id TEXT NOT NULL,
            file_path TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            snippet TEXT,
            confidence REAL NOT NULL DEFAULT 1.0,
            status TEXT NOT NULL DEFAULT 'valid',
            last_verified_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (memory_id) REFERENCES memories(id) ON DELETE CASCADE
        );

        -- Embedding vectors, stored as little-endian f32 blobs
        CREATE TABLE IF NOT EXISTS embeddings (
            memory_id TEXT PRIMARY KEY,
            embedding BLOB NOT NULL,
            model TEXT NOT NULL,
            dimensions INTEGER NOT NULL,
            FOREIGN KEY (memory_id) REFERENCES memories(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_memories_hash ON memories(content_hash);
        CREATE INDEX IF NOT EXISTS idx_memory_tags_memory ON memory_tags(memory_id);
        CREATE INDEX IF NOT EXISTS idx_memory_tags_tag ON memory_tags(tag_id);
        CREATE INDEX IF NOT EXISTS idx_citations_memory ON citations(memory_id);
        "#,
    )
    .map_err(map_sqlite)?;
    Ok(())
}

/// Adds scope isolation and the edge graph
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        ALTER TABLE memories ADD COLUMN scope TEXT NOT NULL DEFAULT '';

        CREATE TABLE IF NOT EXISTS scopes (
            name TEXT PRIMARY KEY,
            created_at TEXT NOT NULL
        );

        -- Directed labeled edges; (source, target, kind) is unique
        CREATE TABLE IF NOT EXISTS memory_edges (
            source_id TEXT NOT NULL,
            target_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            weight REAL NOT NULL,
            reason TEXT,
            created_at TEXT NOT NULL,
            PRIMARY KEY (source_id, target_id, kind),
            FOREIGN KEY (source_id) REFERENCES memories(id) ON DELETE CASCADE,
            FOREIGN KEY (target_id) REFERENCES memories(id) ON DELETE CASCADE
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_memories_scope_hash
            ON memories(scope, content_hash);
        CREATE INDEX IF NOT EXISTS idx_memories_scope_created
            ON memories(scope, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_edges_source ON memory_edges(source_id);
        CREATE INDEX IF NOT EXISTS idx_edges_target ON memory_edges(target_id);
        "#,
    )
    .map_err(map_sqlite)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_reaches_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), SCHEMA_VERSION);
        assert!(!pending_migrations(&conn).unwrap());
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn v1_database_upgrades_to_v2() {
        let conn = Connection::open_in_memory().unwrap();
        current_version(&conn).unwrap();
        apply(&conn, 1, migrate_v1).unwrap();
        assert_eq!(current_version(&conn).unwrap(), 1);

        run_migrations(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), SCHEMA_VERSION);

        // Scope column and edge table exist after the upgrade
        conn.execute(
            "INSERT INTO memories (id, content, context, content_hash, seq, created_at, updated_at, scope)
             VALUES ('a', 'x', NULL, 'h', 1, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z', 's')",
            [],
        )
        .unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM memory_edges", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
