//! Error types for the SQLite storage backend.
//!
//! Storage-level failures propagate unchanged (`rusqlite::Error` is wrapped
//! via `#[from]`, never re-described); the backend adds its own variants
//! only for failures that originate here: schema sync, query generation,
//! and migration invariants.

use thiserror::Error;

use strukt_core::IdType;

/// Errors that can occur in the SQLite backend.
#[derive(Debug, Error)]
pub enum SqliteError {
    /// SQLite operation failure, propagated unchanged.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Core schema/expression pipeline failure.
    #[error(transparent)]
    Core(#[from] strukt_core::StruktError),

    /// JSON serialization or deserialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Query generation received a node sequence it cannot express.
    #[error("query generation error: {0}")]
    QueryGeneration(String),

    /// Schema synchronization failure.
    #[error("schema sync error: {0}")]
    SchemaSync(String),

    /// A migration modifier changed the identity of an item.
    ///
    /// Identity is the join key between trash and keep bookkeeping; drift
    /// is never silently corrected.
    #[error("identity mismatch during migration: old id '{old}', new id '{new}'")]
    IdentityMismatch {
        /// Identity read from the old row.
        old: String,
        /// Identity found on the transformed item.
        new: String,
    },

    /// Migration between structure sets with different id types.
    #[error("cannot migrate from id type {from} to id type {to}")]
    IncompatibleIdTypes {
        /// Source id type.
        from: IdType,
        /// Target id type.
        to: IdType,
    },

    /// Migration machinery failure outside the storage layer.
    #[error("migration error: {0}")]
    Migration(String),

    /// The targeted structure does not exist.
    #[error("structure '{0}' with id '{1}' was not found")]
    StructureNotFound(String, String),
}

/// Convenience alias for results with [`SqliteError`].
pub type Result<T> = std::result::Result<T, SqliteError>;
