// 👀 Watchers - live subscriptions that feed the aggregate reducer
//
// Each watcher turns store snapshots into an `AggregatePatch` for its own
// slice of the state and hands it to the session's reducer. Watchers never
// read each other's fields.
//
// Fixed-document watchers (one per estimate document, keyed by subject id)
// live for the whole session. The transaction watcher depends on the resolved
// classification id and is owned by the category resolver.

use crate::config::EngineConfig;
use crate::entities::{sum_expenses, EstimateDocument, LineItemDocument};
use crate::error::StoreError;
use crate::reducer::{AggregatePatch, AggregateReducer, AggregateState};
use crate::store::{DocPath, Document, Query, RemoteStore, Snapshot, Subscription, WatchTarget};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::{debug, warn};

// ============================================================================
// REDUCER HANDLE
// ============================================================================

/// A session's reducer plus its liveness flag.
///
/// Once closed, every `apply` through any clone of the handle is discarded,
/// so results that arrive after teardown never reach the state.
#[derive(Clone)]
pub struct ReducerHandle {
    reducer: Rc<RefCell<AggregateReducer>>,
    alive: Rc<Cell<bool>>,
}

impl ReducerHandle {
    pub fn new(reducer: AggregateReducer) -> Self {
        ReducerHandle {
            reducer: Rc::new(RefCell::new(reducer)),
            alive: Rc::new(Cell::new(true)),
        }
    }

    /// Returns whether the patch was applied
    pub fn apply(&self, source: &'static str, patch: AggregatePatch) -> bool {
        if !self.alive.get() {
            debug!(source, ?patch, "discarding update for closed session");
            return false;
        }
        let (state, mut observers) = self.reducer.borrow_mut().apply_detached(patch);
        // Observers may read back through this handle
        for observer in &mut observers {
            observer(&state);
        }
        self.reducer.borrow_mut().restore_observers(observers);
        true
    }

    pub fn is_alive(&self) -> bool {
        self.alive.get()
    }

    pub fn close(&self) {
        self.alive.set(false);
    }

    pub fn state(&self) -> AggregateState {
        self.reducer.borrow().state().clone()
    }

    pub fn applied_count(&self) -> u64 {
        self.reducer.borrow().applied_count()
    }

    pub fn observe(&self, observer: impl FnMut(&AggregateState) + 'static) {
        self.reducer.borrow_mut().observe(observer);
    }
}

// ============================================================================
// DEPENDENT TRANSACTION WATCHER
// ============================================================================

/// Watch expenses tagged with `category_id` and report their absolute sum
/// as `general_expense`. Returns `None` if the store refused the query.
pub fn watch_transactions(
    store: &dyn RemoteStore,
    handle: ReducerHandle,
    config: &EngineConfig,
    category_id: &str,
) -> Option<Subscription> {
    let query = Query::new(config.collections.transactions.as_str())
        .where_eq("categoryId", category_id)
        .where_eq("type", config.expense_type.as_str());
    let expense_type = config.expense_type.clone();
    let category = category_id.to_string();

    let on_change = Box::new(move |result: Result<Snapshot, StoreError>| match result {
        Ok(snapshot) => {
            let total = sum_expenses(snapshot.documents(), &expense_type);
            debug!(category_id = %category, total, "transactions changed");
            handle.apply("transactions", AggregatePatch::general_expense(total));
        }
        Err(e) => warn!(category_id = %category, error = %e, "transaction subscription failed"),
    });

    match store.subscribe(WatchTarget::Query(query), on_change) {
        Ok(subscription) => Some(subscription),
        Err(e) => {
            warn!(category_id, error = %e, "could not subscribe to transactions");
            None
        }
    }
}

// ============================================================================
// FIXED DOCUMENT WATCHERS
// ============================================================================

/// Which estimate document a fixed watcher reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixedDocumentKind {
    SipWalls,
    Roof,
    Estimate,
}

impl FixedDocumentKind {
    pub const ALL: [FixedDocumentKind; 3] = [
        FixedDocumentKind::SipWalls,
        FixedDocumentKind::Roof,
        FixedDocumentKind::Estimate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FixedDocumentKind::SipWalls => "sip_walls",
            FixedDocumentKind::Roof => "ceiling",
            FixedDocumentKind::Estimate => "contract",
        }
    }

    pub fn path(&self, config: &EngineConfig, subject_id: &str) -> DocPath {
        let collection = match self {
            FixedDocumentKind::SipWalls => &config.collections.sip_walls_estimates,
            FixedDocumentKind::Roof => &config.collections.roof_estimates,
            FixedDocumentKind::Estimate => &config.collections.estimates,
        };
        DocPath::new(collection.as_str(), subject_id)
    }

    /// Patch for an existing document
    pub fn extract(&self, config: &EngineConfig, doc: &Document) -> Result<AggregatePatch, StoreError> {
        match self {
            FixedDocumentKind::SipWalls => {
                let estimate: LineItemDocument = doc.decode()?;
                Ok(AggregatePatch::sip_walls(estimate.sum_items(&config.sip_wall_items)))
            }
            FixedDocumentKind::Roof => {
                let estimate: LineItemDocument = doc.decode()?;
                Ok(AggregatePatch::ceiling_insulation(estimate.item_total(&config.ceiling_item)))
            }
            FixedDocumentKind::Estimate => {
                let estimate: EstimateDocument = doc.decode()?;
                Ok(AggregatePatch::contract_price(estimate.contract_price()))
            }
        }
    }
}

/// Watch one estimate document for the whole session.
///
/// A missing document produces no update; the field keeps its prior value.
pub fn watch_fixed_document(
    store: &dyn RemoteStore,
    handle: ReducerHandle,
    config: &EngineConfig,
    kind: FixedDocumentKind,
    subject_id: &str,
) -> Option<Subscription> {
    let path = kind.path(config, subject_id);
    let config = config.clone();
    let watched = path.clone();

    let on_change = Box::new(move |result: Result<Snapshot, StoreError>| {
        let doc = match result {
            Ok(Snapshot::Document(Some(doc))) => doc,
            Ok(Snapshot::Document(None)) => {
                debug!(path = %watched, "estimate document absent");
                return;
            }
            Ok(Snapshot::Query(_)) => {
                warn!(path = %watched, "unexpected query snapshot for document watch");
                return;
            }
            Err(e) => {
                warn!(path = %watched, error = %e, "estimate subscription failed");
                return;
            }
        };

        match kind.extract(&config, &doc) {
            Ok(patch) => {
                handle.apply(kind.name(), patch);
            }
            Err(e) => warn!(path = %watched, error = %e, "malformed estimate document"),
        }
    });

    match store.subscribe(WatchTarget::Document(path.clone()), on_change) {
        Ok(subscription) => Some(subscription),
        Err(e) => {
            warn!(%path, error = %e, "could not subscribe to estimate");
            None
        }
    }
}
