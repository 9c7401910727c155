// Receipt Calculation Engine - Core Library
// Live financial summary for one client, aggregated from store subscriptions

pub mod error;
pub mod config;
pub mod store;          // RemoteStore contract: fetch once + subscribe
pub mod db;             // SQLite-backed RemoteStore with its event loop
pub mod entities;       // Subject, classification, transaction, estimates
pub mod reducer;        // AggregateState + the single merge point
pub mod dependent;      // Dependent subscription node
pub mod watchers;       // Transaction + fixed estimate watchers
pub mod resolution;     // Subject → classification chain
pub mod persistence;    // Debounced write-back
pub mod engine;         // Subject lifecycle

// Re-export commonly used types
pub use error::{ConfigError, StoreError};
pub use config::{Collections, EngineConfig};
pub use store::{
    DocPath, Document, Filter, Query, RemoteStore, Snapshot, Subscription, WatchTarget,
};
pub use db::{load_transactions_csv, setup_database, SqliteSnapshotWriter, SqliteStore};
pub use entities::{
    ClassificationRecord, EstimateDocument, LineItem, LineItemDocument, Subject,
    TransactionRecord,
};
pub use reducer::{AggregatePatch, AggregateReducer, AggregateState};
pub use dependent::DependentSubscription;
pub use watchers::{FixedDocumentKind, ReducerHandle};
pub use resolution::{CategoryResolver, IdentityResolver};
pub use persistence::{Clock, ManualClock, PersistenceSync, ReceiptSnapshot, SnapshotWriter, SystemClock};
pub use engine::AggregationEngine;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
