//! DuckDB-backed metadata store
//!
//! Table layout:
//! ```text
//! intake_metadata_store
//! ├── region          VARCHAR  (namespace)
//! ├── metadata_key    VARCHAR  (remote file name)
//! └── metadata_value  VARCHAR  (last accepted marker)
//!     PRIMARY KEY (region, metadata_key)
//! ```
//!
//! Every `put` runs in its own auto-committed transaction, so it is on disk
//! (WAL) before the call returns.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use duckdb::{params, Connection, OptionalExt};

use crate::store::{MetadataStore, StoreError};

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS intake_metadata_store (
        region VARCHAR NOT NULL,
        metadata_key VARCHAR NOT NULL,
        metadata_value VARCHAR NOT NULL,
        PRIMARY KEY (region, metadata_key)
    );";

const SELECT_VALUE: &str = "SELECT metadata_value FROM intake_metadata_store \
     WHERE region = ? AND metadata_key = ?";

const UPSERT_VALUE: &str = "INSERT OR REPLACE INTO intake_metadata_store \
     (region, metadata_key, metadata_value) VALUES (?, ?, ?)";

const SELECT_REGION: &str = "SELECT metadata_key, metadata_value FROM intake_metadata_store \
     WHERE region = ? ORDER BY metadata_key";

/// Persistent store in a single DuckDB database file.
pub struct DuckDbStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for DuckDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl DuckDbStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| StoreError::backend("open", e))?;
        log::debug!("metadata store: opened {}", path.display());
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Non-persistent database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::backend("open", e))?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.execute_batch(CREATE_TABLE)
            .map_err(|e| StoreError::backend("create table", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Database file, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl MetadataStore for DuckDbStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(SELECT_VALUE, params![namespace, key], |row| {
            row.get::<_, String>(0)
        })
        .optional()
        .map_err(|e| StoreError::backend("get", e))
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(UPSERT_VALUE, params![namespace, key, value])
            .map_err(|e| StoreError::backend("put", e))?;
        Ok(())
    }

    fn entries(&self, namespace: &str) -> Result<Vec<(String, String)>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(SELECT_REGION)
            .map_err(|e| StoreError::backend("list", e))?;
        let rows = stmt
            .query_map(params![namespace], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| StoreError::backend("list", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::backend("list", e))
    }
}
