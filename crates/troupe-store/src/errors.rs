//! Error types for the persistence subsystem.

use thiserror::Error;

/// Errors returned by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` database error. Rows that fail to map back onto the domain
    /// model (unknown status strings and the like) also surface here, as
    /// column conversion failures.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

/// Convenience alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;
