//! Database connection management
//!
//! A single shared SQLite connection in WAL mode behind a mutex. Readers and
//! writers in the same process serialize through it; lock contention from
//! other handles surfaces as a retryable error.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};

use super::migrations::{pending_migrations, run_migrations};
use crate::config::EngineConfig;
use crate::error::{map_sqlite, PhloemError, Result};

/// Number of retries for a busy database before surfacing the error
const BUSY_RETRIES: u32 = 3;

/// Backoff between busy retries
const BUSY_BACKOFF: std::time::Duration = std::time::Duration::from_millis(50);

/// Storage engine wrapping a shared SQLite connection
pub struct Store {
    config: EngineConfig,
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open or create the database under the configured data directory
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.ensure_data_dir()?;

        let db_path = config.db_path();
        let existed = db_path.exists();
        let conn = Self::create_connection(&db_path)?;

        // Snapshot the database before the schema changes underneath it
        if existed && pending_migrations(&conn)? {
            let backup_path = config.backup_path();
            std::fs::copy(&db_path, &backup_path)
                .map_err(|e| PhloemError::io_at(backup_path.clone(), e))?;
            crate::config::restrict_file_permissions(&backup_path)?;
            tracing::info!(backup = %backup_path.display(), "database backed up before migration");
        }

        run_migrations(&conn)?;
        crate::config::restrict_file_permissions(&db_path)?;

        Ok(Self {
            config,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(map_sqlite)?;
        Self::configure_pragmas(&conn)?;
        run_migrations(&conn)?;
        Ok(Self {
            config: EngineConfig::default(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn create_connection(db_path: &Path) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags).map_err(map_sqlite)?;
        Self::configure_pragmas(&conn)?;
        Ok(conn)
    }

    /// WAL for crash recovery, NORMAL sync, foreign keys on for cascades
    fn configure_pragmas(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=5000;
            PRAGMA cache_size=-32000;
            PRAGMA temp_store=MEMORY;
            PRAGMA foreign_keys=ON;
            "#,
        )
        .map_err(map_sqlite)?;
        Ok(())
    }

    /// Execute a read-only function with the connection
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn).map_err(normalize)
    }

    /// Execute a function inside a transaction. Rolls back on any error;
    /// partial mutations are never persisted.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(map_sqlite)?;
        let result = f(&tx).map_err(normalize)?;
        tx.commit().map_err(map_sqlite)?;
        Ok(result)
    }

    /// Like [`Store::with_transaction`], retrying on a busy database
    pub fn with_write<F, T>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(&Connection) -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            match self.with_transaction(&mut f) {
                Err(e) if e.is_retryable() && attempt < BUSY_RETRIES => {
                    attempt += 1;
                    tracing::warn!(attempt, "database busy, retrying write");
                    std::thread::sleep(BUSY_BACKOFF);
                }
                other => return other,
            }
        }
    }

    /// Get database size in bytes
    pub fn db_size(&self) -> Result<i64> {
        self.with_connection(|conn| {
            let size: i64 = conn
                .query_row(
                    "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                    [],
                    |row| row.get(0),
                )
                .map_err(map_sqlite)?;
            Ok(size)
        })
    }

    /// Run the SQLite integrity check; failure is fatal
    pub fn check_integrity(&self) -> Result<()> {
        self.with_connection(|conn| {
            let status: String = conn
                .query_row("PRAGMA integrity_check", [], |row| row.get(0))
                .map_err(map_sqlite)?;
            if status == "ok" {
                Ok(())
            } else {
                Err(PhloemError::StorageCorrupt(status))
            }
        })
    }

    /// Get configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Clone for Store {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            conn: self.conn.clone(),
        }
    }
}

/// Promote lock/corruption failures hidden inside generic database errors
fn normalize(err: PhloemError) -> PhloemError {
    match err {
        PhloemError::Database(e) => map_sqlite(e),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        store.check_integrity().unwrap();
    }

    #[test]
    fn open_on_disk_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            data_dir: dir.path().join("phloem"),
            ..Default::default()
        };
        let store = Store::open(config.clone()).unwrap();
        assert!(config.db_path().exists());
        assert!(store.db_size().unwrap() > 0);
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let store = Store::open_in_memory().unwrap();
        let result: Result<()> = store.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO scopes (name, created_at) VALUES ('x', 'now')",
                [],
            )
            .map_err(map_sqlite)?;
            Err(PhloemError::Internal("forced".into()))
        });
        assert!(result.is_err());

        let count: i64 = store
            .with_connection(|conn| {
                conn.query_row("SELECT COUNT(*) FROM scopes", [], |row| row.get(0))
                    .map_err(map_sqlite)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
