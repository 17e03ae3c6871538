//! Shared SQLite handle.
//!
//! `rusqlite::Connection` is `Send` but not `Sync`, so every access goes through
//! one `parking_lot::Mutex`. Writes here are single-row inserts; holding the
//! lock for the duration of a closure is cheap enough to do from async handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::schema;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Open (creating parent directories as needed) and migrate the file at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| StoreError::Path {
                path: dir.to_owned(),
                reason: e.to_string(),
            })?;
        }
        let db = Self::wrap(Connection::open(path)?, path.to_owned())?;
        info!(path = %path.display(), "incident store opened");
        Ok(db)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::wrap(Connection::open_in_memory()?, PathBuf::from(":memory:"))
    }

    fn wrap(conn: Connection, path: PathBuf) -> Result<Self, StoreError> {
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        f(&self.conn.lock())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema_version(&self) -> Result<Option<u32>, StoreError> {
        self.with_conn(|conn| read_version(conn).map_err(StoreError::from))
    }
}

fn read_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()
}

/// Apply pragmas and DDL, then stamp the schema version once.
fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(schema::PRAGMAS)
        .map_err(|e| StoreError::schema("pragmas", e))?;
    conn.execute_batch(schema::CREATE_TABLES)
        .map_err(|e| StoreError::schema("tables", e))?;

    match read_version(conn).map_err(|e| StoreError::schema("version", e))? {
        Some(found) => debug!(found, "schema already stamped"),
        None => {
            let _ = conn
                .execute("INSERT INTO schema_version (version) VALUES (?1)", [schema::SCHEMA_VERSION])
                .map_err(|e| StoreError::schema("version", e))?;
        }
    }
    Ok(())
}
