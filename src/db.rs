// 🗄️ SQLite Document Store - a RemoteStore backed by rusqlite
//
// Documents live in one table as JSON bodies keyed by (collection, doc_id).
// Live subscriptions are kept in memory; every write queues a fresh snapshot
// for each subscription on the written collection. Deliveries are processed
// one at a time by `run_until_idle`, which is the engine's event loop.
//
// A queued snapshot is evaluated when it is delivered, not when it is queued,
// so a subscriber always sees the newest data and repeated writes collapse
// into a single callback.

use crate::entities::TransactionRecord;
use crate::error::StoreError;
use crate::persistence::{ReceiptSnapshot, SnapshotWriter};
use crate::store::{
    DocPath, Document, FetchCallback, Query, RemoteStore, Snapshot, SnapshotCallback,
    Subscription, WatchTarget,
};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::rc::{Rc, Weak};
use tracing::{debug, info, warn};

pub fn setup_database(conn: &Connection) -> rusqlite::Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Documents Table (JSON bodies, insertion order kept in seq)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS documents (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            doc_id TEXT NOT NULL,
            body TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (collection, doc_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// SUBSCRIPTION REGISTRY
// ============================================================================

struct SubscriptionEntry {
    target: WatchTarget,
    callback: RefCell<SnapshotCallback>,
}

enum Delivery {
    Snapshot(u64),
    Fetch(DocPath, FetchCallback),
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscriptions: HashMap<u64, Rc<SubscriptionEntry>>,
    queue: VecDeque<Delivery>,
    /// Subscriptions with a snapshot already queued
    pending: HashSet<u64>,
}

impl Registry {
    fn enqueue_snapshot(&mut self, id: u64) {
        if self.pending.insert(id) {
            self.queue.push_back(Delivery::Snapshot(id));
        }
    }
}

struct StoreInner {
    conn: Connection,
    registry: RefCell<Registry>,
}

// ============================================================================
// SQLITE STORE
// ============================================================================

/// Cheap to clone; clones share the connection and the subscriptions
#[derive(Clone)]
pub struct SqliteStore {
    inner: Rc<StoreInner>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {:?}", path))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn).context("Failed to set up document tables")?;
        Ok(SqliteStore {
            inner: Rc::new(StoreInner {
                conn,
                registry: RefCell::new(Registry::default()),
            }),
        })
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Create or replace a document. Replacing keeps its original position.
    pub fn set_document(&self, path: &DocPath, body: &serde_json::Value) -> Result<(), StoreError> {
        let body_json = serde_json::to_string(body)?;
        self.inner.conn.execute(
            "INSERT INTO documents (collection, doc_id, body, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (collection, doc_id)
             DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            params![path.collection, path.id, body_json, Utc::now().to_rfc3339()],
        )?;

        debug!(%path, "document written");
        self.notify(&path.collection);
        Ok(())
    }

    /// Insert under a fresh UUID and return the id
    pub fn add_document(&self, collection: &str, body: &serde_json::Value) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.set_document(&DocPath::new(collection, id.clone()), body)?;
        Ok(id)
    }

    /// Returns whether a document was removed
    pub fn delete_document(&self, path: &DocPath) -> Result<bool, StoreError> {
        let removed = self.inner.conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND doc_id = ?2",
            params![path.collection, path.id],
        )?;

        if removed > 0 {
            debug!(%path, "document deleted");
            self.notify(&path.collection);
        }
        Ok(removed > 0)
    }

    // ========================================================================
    // READS
    // ========================================================================

    pub fn get_document(&self, path: &DocPath) -> Result<Option<Document>, StoreError> {
        let row = self
            .inner
            .conn
            .query_row(
                "SELECT doc_id, body FROM documents WHERE collection = ?1 AND doc_id = ?2",
                params![path.collection, path.id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        match row {
            Some((id, body)) => Ok(Some(Document::new(id, serde_json::from_str(&body)?))),
            None => Ok(None),
        }
    }

    /// Equality query in insertion order
    pub fn run_query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let mut sql = String::from("SELECT doc_id, body FROM documents WHERE collection = ?1");
        let mut values = vec![SqlValue::Text(query.collection.clone())];

        for filter in &query.filters {
            validate_field(&filter.field)?;
            values.push(json_to_sql(&filter.field, &filter.value)?);
            sql.push_str(&format!(
                " AND json_extract(body, '$.{}') = ?{}",
                filter.field,
                values.len()
            ));
        }
        sql.push_str(" ORDER BY seq");

        let mut stmt = self.inner.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, body)| -> Result<Document, StoreError> {
                Ok(Document::new(id, serde_json::from_str(&body)?))
            })
            .collect()
    }

    pub fn document_count(&self, collection: &str) -> Result<i64, StoreError> {
        let count = self.inner.conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn evaluate(&self, target: &WatchTarget) -> Result<Snapshot, StoreError> {
        match target {
            WatchTarget::Document(path) => self.get_document(path).map(Snapshot::Document),
            WatchTarget::Query(query) => self.run_query(query).map(Snapshot::Query),
        }
    }

    // ========================================================================
    // EVENT LOOP
    // ========================================================================

    fn notify(&self, collection: &str) {
        let mut registry = self.inner.registry.borrow_mut();
        let mut ids: Vec<u64> = registry
            .subscriptions
            .iter()
            .filter(|(_, entry)| entry.target.collection() == collection)
            .map(|(id, _)| *id)
            .collect();
        // Oldest subscription first
        ids.sort_unstable();
        for id in ids {
            registry.enqueue_snapshot(id);
        }
    }

    /// Process queued deliveries until none are left. Callbacks may queue
    /// more work; it is processed in the same call.
    pub fn run_until_idle(&self) -> usize {
        let mut delivered = 0;

        loop {
            // Registry borrow must end before any callback runs
            let next = self.inner.registry.borrow_mut().queue.pop_front();
            let Some(delivery) = next else { break };

            match delivery {
                Delivery::Fetch(path, on_result) => {
                    on_result(self.get_document(&path));
                    delivered += 1;
                }
                Delivery::Snapshot(id) => {
                    let entry = {
                        let mut registry = self.inner.registry.borrow_mut();
                        registry.pending.remove(&id);
                        registry.subscriptions.get(&id).cloned()
                    };
                    // Unsubscribed after the delivery was queued
                    let Some(entry) = entry else { continue };

                    let result = self.evaluate(&entry.target);
                    if let Err(e) = &result {
                        warn!(subscription = id, error = %e, "snapshot evaluation failed");
                    }
                    (entry.callback.borrow_mut())(result);
                    delivered += 1;
                }
            }
        }

        delivered
    }

    pub fn pending_deliveries(&self) -> usize {
        self.inner.registry.borrow().queue.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.registry.borrow().subscriptions.len()
    }

    // ========================================================================
    // IMPORT
    // ========================================================================

    /// Seed from `{ "collection": { "id": { ...body } } }`
    pub fn import_documents(&self, seed: &serde_json::Value) -> Result<usize> {
        let collections = seed
            .as_object()
            .context("Seed must be an object of collections")?;

        let mut imported = 0;
        for (collection, docs) in collections {
            let docs = docs
                .as_object()
                .with_context(|| format!("Collection {} must be an object of documents", collection))?;

            for (id, body) in docs {
                self.set_document(&DocPath::new(collection.as_str(), id.as_str()), body)
                    .with_context(|| format!("Failed to import {}/{}", collection, id))?;
                imported += 1;
            }
        }

        info!(imported, "documents imported");
        Ok(imported)
    }

    pub fn load_documents_json(&self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file: {:?}", path))?;
        let seed: serde_json::Value =
            serde_json::from_str(&content).context("Failed to parse seed JSON")?;
        self.import_documents(&seed)
    }

    /// Insert transactions as auto-id documents
    pub fn insert_transactions(&self, collection: &str, transactions: &[TransactionRecord]) -> Result<usize> {
        for tx in transactions {
            let body = serde_json::to_value(tx)?;
            self.add_document(collection, &body)?;
        }

        info!(count = transactions.len(), collection, "transactions inserted");
        Ok(transactions.len())
    }
}

/// Read `categoryId,type,amount[,description]` rows
pub fn load_transactions_csv(csv_path: &Path) -> Result<Vec<TransactionRecord>> {
    let mut rdr = csv::Reader::from_path(csv_path).context("Failed to open CSV file")?;

    let mut transactions = Vec::new();
    for result in rdr.deserialize() {
        let transaction: TransactionRecord = result.context("Failed to deserialize transaction")?;
        transactions.push(transaction);
    }

    Ok(transactions)
}

fn validate_field(field: &str) -> Result<(), StoreError> {
    let valid = !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidField(field.to_string()))
    }
}

fn json_to_sql(field: &str, value: &serde_json::Value) -> Result<SqlValue, StoreError> {
    use serde_json::Value;

    match value {
        Value::Null => Ok(SqlValue::Null),
        // json_extract yields 1/0 for booleans
        Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(SqlValue::Integer(i)),
            None => n
                .as_f64()
                .map(SqlValue::Real)
                .ok_or_else(|| StoreError::InvalidField(field.to_string())),
        },
        Value::String(s) => Ok(SqlValue::Text(s.clone())),
        Value::Array(_) | Value::Object(_) => Err(StoreError::InvalidField(field.to_string())),
    }
}

// ============================================================================
// REMOTE STORE IMPLEMENTATION
// ============================================================================

impl RemoteStore for SqliteStore {
    fn fetch_once(&self, path: &DocPath, on_result: FetchCallback) {
        self.inner
            .registry
            .borrow_mut()
            .queue
            .push_back(Delivery::Fetch(path.clone(), on_result));
    }

    fn subscribe(
        &self,
        target: WatchTarget,
        on_change: SnapshotCallback,
    ) -> Result<Subscription, StoreError> {
        if let WatchTarget::Query(query) = &target {
            for filter in &query.filters {
                validate_field(&filter.field)?;
                json_to_sql(&filter.field, &filter.value)?;
            }
        }

        let id = {
            let mut registry = self.inner.registry.borrow_mut();
            registry.next_id += 1;
            let id = registry.next_id;
            registry.subscriptions.insert(
                id,
                Rc::new(SubscriptionEntry {
                    target,
                    callback: RefCell::new(on_change),
                }),
            );
            // Initial snapshot
            registry.enqueue_snapshot(id);
            id
        };

        let store: Weak<StoreInner> = Rc::downgrade(&self.inner);
        Ok(Subscription::new(move || {
            let Some(inner) = store.upgrade() else { return };
            let removed = {
                let mut registry = inner.registry.borrow_mut();
                registry.pending.remove(&id);
                registry.subscriptions.remove(&id)
            };
            // Dropping the callback may cancel other subscriptions it owns,
            // so it happens after the registry borrow is released.
            drop(removed);
        }))
    }
}

// ============================================================================
// WRITE-BACK
// ============================================================================

/// Persists receipt snapshots as documents in one collection
pub struct SqliteSnapshotWriter {
    store: SqliteStore,
    collection: String,
}

impl SqliteSnapshotWriter {
    pub fn new(store: SqliteStore, collection: impl Into<String>) -> Self {
        SqliteSnapshotWriter {
            store,
            collection: collection.into(),
        }
    }
}

impl SnapshotWriter for SqliteSnapshotWriter {
    fn write(&self, subject_id: &str, snapshot: &ReceiptSnapshot) -> Result<()> {
        let body = serde_json::to_value(snapshot)?;
        self.store
            .set_document(&DocPath::new(self.collection.as_str(), subject_id), &body)
            .with_context(|| format!("Failed to save receipt calculation for {}", subject_id))?;
        Ok(())
    }
}
