//! Errors from the SQLite job database.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Statement, connection or row-mapping failure reported by rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The directory that should hold `jobs.db` could not be created.
    #[error("Cannot create database directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A schema migration was rejected; nothing after it was applied.
    #[error("Migration v{version} ({name}) failed: {reason}")]
    Migration {
        version: u32,
        name: &'static str,
        reason: String,
    },

    /// A writer panicked while holding the shared connection.
    #[error("Job database connection poisoned by a panicked writer")]
    ConnectionPoisoned,
}
