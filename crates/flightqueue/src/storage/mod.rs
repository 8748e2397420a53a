//! Storage layer for flightqueue.
//!
//! This module provides `SQLite`-based persistence for flights, the
//! row-per-node linked list and the command history. The submodules expose
//! plain functions over `&Connection`; [`Storage`] owns the connection and
//! hands out transactions as units of work.

pub mod commands;
pub mod flights;
pub mod integrity;
pub mod migrations;
pub mod nodes;
pub mod schema;

use std::path::{Path, PathBuf};

use rusqlite::{Connection, Transaction};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Storage engine for the flight queue.
///
/// Provides persistent storage using `SQLite` with support for:
/// - Flight records
/// - Sentinel-bounded node chains, one per named list
/// - Atomic units of work with savepoints for sub-steps
/// - Persisted undo/redo history
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist
    /// and brings the schema up to date.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // WAL for concurrent readers (e.g. a second `flightq list`)
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read-only access to the connection.
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `work` in a transaction.
    ///
    /// The transaction commits when `work` returns `Ok` and rolls back when
    /// it returns `Err`, so a failed unit of work leaves no partial writes.
    ///
    /// # Errors
    ///
    /// Returns the error of `work`, or a database error from begin/commit.
    pub fn unit_of_work<T, F>(&mut self, work: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut tx = self.conn.transaction()?;
        let value = work(&mut tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let total_flights = flights::count(&self.conn)?;
        let (active_nodes, history_nodes): (i64, i64) = self.conn.query_row(
            r"
            SELECT COALESCE(SUM(active), 0), COALESCE(SUM(1 - active), 0)
            FROM nodes WHERE kind = 'regular'
            ",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let lists: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM list_state", [], |row| row.get(0))?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_flights,
            lists,
            active_nodes,
            history_nodes,
            db_size_bytes,
        })
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StorageStats {
    /// Total number of flight records.
    pub total_flights: i64,
    /// Number of named lists.
    pub lists: i64,
    /// Regular nodes currently linked.
    pub active_nodes: i64,
    /// Retired regular nodes kept as history.
    pub history_nodes: i64,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
