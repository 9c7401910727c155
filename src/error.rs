// ⚠️ Error Types - Store and configuration failures
//
// Nothing in the engine is fatal: store errors are logged by the watcher that
// received them and the aggregate keeps its last known values.

use thiserror::Error;

/// Errors raised by a `RemoteStore` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Stored body is not valid JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Document exists but does not have the expected shape.
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Query filter names a field that cannot be used as a JSON path.
    #[error("invalid query field: {0}")]
    InvalidField(String),

    /// The store was dropped while a subscription or fetch was pending.
    #[error("store is closed")]
    Closed,
}

/// Errors raised while loading `EngineConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Figment extraction or merge error.
    #[error("Configuration error: {0}")]
    Figment(#[from] figment::Error),

    /// A configuration field has an invalid value.
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}
