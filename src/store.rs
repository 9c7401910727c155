// 🔌 Remote Store Contract - "fetch once" and "subscribe to changes"
//
// The engine never talks to a database directly. Everything it knows arrives
// through this trait: a one-shot document fetch and live subscriptions that
// deliver the complete current result on every change.
//
// Callbacks run on the store's event loop, one at a time. A store must never
// invoke a callback for a subscription that has already been unsubscribed.

use crate::error::StoreError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ADDRESSING
// ============================================================================

/// Path to a single document: `collection/id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocPath {
    pub collection: String,
    pub id: String,
}

impl DocPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        DocPath {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Equality filter on a top-level document field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub value: serde_json::Value,
}

/// Collection query: every filter must match (logical AND)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
}

impl Query {
    pub fn new(collection: impl Into<String>) -> Self {
        Query {
            collection: collection.into(),
            filters: Vec::new(),
        }
    }

    /// Add a `field == value` constraint
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            value: value.into(),
        });
        self
    }
}

/// What a subscription watches
#[derive(Debug, Clone, PartialEq)]
pub enum WatchTarget {
    Document(DocPath),
    Query(Query),
}

impl WatchTarget {
    pub fn collection(&self) -> &str {
        match self {
            WatchTarget::Document(path) => &path.collection,
            WatchTarget::Query(query) => &query.collection,
        }
    }
}

// ============================================================================
// DOCUMENTS & SNAPSHOTS
// ============================================================================

/// A stored document: id plus its JSON body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: serde_json::Value,
}

impl Document {
    pub fn new(id: impl Into<String>, data: serde_json::Value) -> Self {
        Document {
            id: id.into(),
            data,
        }
    }

    /// Decode the body into a typed record
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.data.clone()).map_err(|source| StoreError::Decode {
            path: self.id.clone(),
            source,
        })
    }
}

/// Complete current result of a watch target
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    /// Single document (`None` = does not exist)
    Document(Option<Document>),
    /// Query result in store order
    Query(Vec<Document>),
}

impl Snapshot {
    /// Documents contained in the snapshot, in order
    pub fn documents(&self) -> &[Document] {
        match self {
            Snapshot::Document(Some(doc)) => std::slice::from_ref(doc),
            Snapshot::Document(None) => &[],
            Snapshot::Query(docs) => docs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.documents().is_empty()
    }
}

// ============================================================================
// CALLBACKS & SUBSCRIPTION HANDLE
// ============================================================================

pub type FetchCallback = Box<dyn FnOnce(Result<Option<Document>, StoreError>)>;
pub type SnapshotCallback = Box<dyn FnMut(Result<Snapshot, StoreError>)>;

/// Unsubscribe handle. Dropping it tears the subscription down.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Wrap the store-specific teardown action
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Subscription {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Handle for a watcher that never got a live subscription
    pub fn noop() -> Self {
        Subscription { cancel: None }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    /// Stop receiving callbacks (synchronous)
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

// ============================================================================
// REMOTE STORE
// ============================================================================

pub trait RemoteStore {
    /// One-shot read. The result is delivered later on the event loop and
    /// cannot be cancelled once issued.
    fn fetch_once(&self, path: &DocPath, on_result: FetchCallback);

    /// Live watch. `on_change` receives the full current result first, then
    /// again after every change, until the returned handle is dropped.
    fn subscribe(
        &self,
        target: WatchTarget,
        on_change: SnapshotCallback,
    ) -> Result<Subscription, StoreError>;
}
