// ⚙️ Aggregation Engine - one live receipt calculation per subject
//
// Starting the engine for a subject creates fresh state, opens the three
// estimate watchers and kicks off the resolution chain
// (subject → classification → transactions). Switching subject or stopping
// tears every subscription down synchronously and closes the session's
// reducer handle, so nothing that arrives later can touch the state.

use crate::config::EngineConfig;
use crate::persistence::{Clock, PersistenceSync, SnapshotWriter};
use crate::reducer::{AggregateReducer, AggregateState};
use crate::resolution::{CategoryResolver, IdentityResolver};
use crate::store::{DocPath, RemoteStore, Subscription};
use crate::watchers::{watch_fixed_document, FixedDocumentKind, ReducerHandle};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, info};

// ============================================================================
// SESSION
// ============================================================================

struct Session {
    subject_id: String,
    handle: ReducerHandle,
    fixed: Vec<Subscription>,
    category: Rc<RefCell<Option<CategoryResolver>>>,
    persistence: Option<Rc<RefCell<PersistenceSync>>>,
}

impl Session {
    fn close(self) {
        // Late callbacks (including the identity fetch) see a dead handle
        self.handle.close();

        let resolver = self.category.borrow_mut().take();
        if let Some(resolver) = resolver {
            resolver.stop();
        }
        for subscription in self.fixed {
            subscription.unsubscribe();
        }
        if let Some(persistence) = &self.persistence {
            persistence.borrow_mut().cancel();
        }

        info!(subject_id = %self.subject_id, "receipt calculation stopped");
    }
}

// ============================================================================
// ENGINE
// ============================================================================

struct WriteBack {
    writer: Rc<dyn SnapshotWriter>,
    clock: Rc<dyn Clock>,
}

pub struct AggregationEngine {
    store: Rc<dyn RemoteStore>,
    config: EngineConfig,
    write_back: Option<WriteBack>,
    session: Option<Session>,
}

impl AggregationEngine {
    pub fn new(store: Rc<dyn RemoteStore>, config: EngineConfig) -> Self {
        AggregationEngine {
            store,
            config,
            write_back: None,
            session: None,
        }
    }

    /// Debounced write-back for every session started afterwards
    pub fn with_persistence(mut self, writer: Rc<dyn SnapshotWriter>, clock: Rc<dyn Clock>) -> Self {
        self.write_back = Some(WriteBack { writer, clock });
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Begin aggregating for `subject_id`, replacing any running session
    pub fn start(&mut self, subject_id: &str) {
        self.stop();

        let handle = ReducerHandle::new(AggregateReducer::new(self.config.operational_expense));

        let persistence = self.write_back.as_ref().map(|wb| {
            let sync = Rc::new(RefCell::new(PersistenceSync::new(
                subject_id,
                wb.writer.clone(),
                wb.clock.clone(),
                self.config.debounce(),
            )));
            let observer = sync.clone();
            handle.observe(move |state| observer.borrow_mut().observe(state));
            sync
        });

        let fixed: Vec<Subscription> = FixedDocumentKind::ALL
            .iter()
            .filter_map(|kind| {
                watch_fixed_document(self.store.as_ref(), handle.clone(), &self.config, *kind, subject_id)
            })
            .collect();

        let category: Rc<RefCell<Option<CategoryResolver>>> = Rc::new(RefCell::new(None));
        {
            let slot = category.clone();
            let store = self.store.clone();
            let handle = handle.clone();
            let config = self.config.clone();
            IdentityResolver::resolve(
                self.store.as_ref(),
                DocPath::new(self.config.collections.clients.as_str(), subject_id),
                move |lookup_key| {
                    if !handle.is_alive() {
                        debug!(lookup_key = %lookup_key, "subject resolved after teardown, ignoring");
                        return;
                    }
                    let resolver = CategoryResolver::start(store, handle, &config, lookup_key);
                    *slot.borrow_mut() = Some(resolver);
                },
            );
        }

        info!(subject_id, "receipt calculation started");
        self.session = Some(Session {
            subject_id: subject_id.to_string(),
            handle,
            fixed,
            category,
            persistence,
        });
    }

    /// Tear down every subscription of the running session
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn subject_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.subject_id.as_str())
    }

    /// Current aggregate state (None when stopped)
    pub fn state(&self) -> Option<AggregateState> {
        self.session.as_ref().map(|s| s.handle.state())
    }

    /// Number of patches applied in the running session
    pub fn applied_count(&self) -> u64 {
        self.session.as_ref().map_or(0, |s| s.handle.applied_count())
    }

    pub fn resolved_category(&self) -> Option<String> {
        let session = self.session.as_ref()?;
        let category = session.category.borrow();
        let id = category.as_ref().and_then(CategoryResolver::category_id);
        id
    }

    /// 0 or 1: at most one transaction watcher is ever live
    pub fn active_transaction_watchers(&self) -> usize {
        self.session.as_ref().map_or(0, |s| {
            s.category
                .borrow()
                .as_ref()
                .map_or(0, CategoryResolver::active_transaction_watchers)
        })
    }

    /// Enable or disable write-back for the running session
    pub fn set_editing(&self, editing: bool) {
        if let Some(persistence) = self.session.as_ref().and_then(|s| s.persistence.as_ref()) {
            persistence.borrow_mut().set_enabled(editing);
        }
    }

    /// Write the pending snapshot if its debounce window elapsed
    pub fn poll_persistence(&self) -> bool {
        self.session
            .as_ref()
            .and_then(|s| s.persistence.as_ref())
            .is_some_and(|p| p.borrow_mut().poll())
    }

    /// Write the pending snapshot immediately
    pub fn flush_persistence(&self) -> bool {
        self.session
            .as_ref()
            .and_then(|s| s.persistence.as_ref())
            .is_some_and(|p| p.borrow_mut().flush())
    }
}

impl Drop for AggregationEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{SqliteSnapshotWriter, SqliteStore};
    use crate::error::StoreError;
    use crate::persistence::ManualClock;
    use crate::store::{FetchCallback, SnapshotCallback, WatchTarget};
    use chrono::{Duration, Utc};
    use serde_json::json;

    const SUBJECT: &str = "client-1";

    fn seeded_store(config: &EngineConfig) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .import_documents(&json!({
                "clients": {
                    SUBJECT: { "lastName": "Иванов", "firstName": "Иван" },
                    "client-2": { "lastName": "Петров", "firstName": "Пётр" }
                },
                "categories": {
                    "cat1": { "title": "Иванов Иван", "row": 3 },
                    "cat2": { "title": "Петров Пётр", "row": 3 }
                },
                "sipWallsEstimates": {
                    SUBJECT: { "items": [
                        { "name": config.sip_wall_items[0], "total": 500000 },
                        { "name": config.sip_wall_items[1], "total": 300000 }
                    ]}
                }
            }))
            .unwrap();
        for (category, kind, amount) in [
            ("cat1", "expense", -200_000),
            ("cat1", "expense", -50_000),
            ("cat1", "income", 100_000),
            ("cat2", "expense", -10_000),
        ] {
            store
                .add_document("transactions", &json!({ "categoryId": category, "type": kind, "amount": amount }))
                .unwrap();
        }
        store
    }

    fn engine_for(store: &SqliteStore, config: EngineConfig) -> AggregationEngine {
        AggregationEngine::new(Rc::new(store.clone()), config)
    }

    #[test]
    fn test_defaults_before_any_delivery() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut engine = engine_for(&store, EngineConfig::default());
        engine.start(SUBJECT);

        let state = engine.state().unwrap();
        assert_eq!(state.operational_expense, 1_300_000.0);
        assert_eq!(state.total_expense, 1_300_000.0);
        assert_eq!(state.net_profit, -1_300_000.0);

        // Nothing stored for the subject: the state stays at defaults
        store.run_until_idle();
        assert_eq!(engine.state().unwrap(), state);
        assert_eq!(engine.resolved_category(), None);
    }

    #[test]
    fn test_full_chain_aggregates_every_source() {
        let config = EngineConfig::default();
        let store = seeded_store(&config);
        store
            .set_document(
                &DocPath::new("roofEstimates", SUBJECT),
                &json!({ "items": [{ "name": config.ceiling_item, "total": 100000 }] }),
            )
            .unwrap();
        store
            .set_document(
                &DocPath::new("estimates", SUBJECT),
                &json!({ "roofValues": { "contractPrice": { "value": 5000000 } } }),
            )
            .unwrap();

        let mut engine = engine_for(&store, config);
        engine.start(SUBJECT);
        store.run_until_idle();

        let state = engine.state().unwrap();
        assert_eq!(engine.resolved_category().as_deref(), Some("cat1"));
        assert_eq!(state.sip_walls, 800_000.0);
        assert_eq!(state.ceiling_insulation, 100_000.0);
        assert_eq!(state.general_expense, 250_000.0);
        assert_eq!(state.contract_price, 5_000_000.0);
        assert_eq!(state.total_expense, 2_450_000.0);
        assert_eq!(state.net_profit, 2_550_000.0);
        assert!(state.is_consistent());
    }

    #[test]
    fn test_contract_after_sip_walls() {
        let config = EngineConfig::default();
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .set_document(
                &DocPath::new("sipWallsEstimates", SUBJECT),
                &json!({ "items": [
                    { "name": config.sip_wall_items[0], "total": 500000 },
                    { "name": config.sip_wall_items[1], "total": 300000 }
                ]}),
            )
            .unwrap();

        let mut engine = engine_for(&store, config);
        engine.start(SUBJECT);
        store.run_until_idle();
        assert_eq!(engine.state().unwrap().total_expense, 2_100_000.0);

        store
            .set_document(
                &DocPath::new("estimates", SUBJECT),
                &json!({ "roofValues": { "contractPrice": { "value": 5000000 } } }),
            )
            .unwrap();
        store.run_until_idle();

        assert_eq!(engine.state().unwrap().net_profit, 2_900_000.0);
    }

    #[test]
    fn test_invariants_hold_after_every_update() {
        let config = EngineConfig::default();
        let store = seeded_store(&config);
        let mut engine = engine_for(&store, config.clone());
        engine.start(SUBJECT);

        let checked = Rc::new(RefCell::new(0));
        let counter = checked.clone();
        engine.session.as_ref().unwrap().handle.observe(move |state| {
            assert!(state.is_consistent(), "inconsistent state: {:?}", state);
            *counter.borrow_mut() += 1;
        });

        store.run_until_idle();
        store.add_document("transactions", &json!({ "categoryId": "cat1", "type": "expense", "amount": -1 })).unwrap();
        store
            .set_document(&DocPath::new("estimates", SUBJECT), &json!({ "roofValues": { "contractPrice": { "value": 7 } } }))
            .unwrap();
        store.run_until_idle();

        assert_eq!(*checked.borrow(), engine.applied_count());
        assert!(*checked.borrow() >= 4);
    }

    #[test]
    fn test_stop_prevents_late_identity_fetch() {
        let config = EngineConfig::default();
        let store = seeded_store(&config);
        let mut engine = engine_for(&store, config);

        engine.start(SUBJECT);
        let handle = engine.session.as_ref().unwrap().handle.clone();
        let notified = Rc::new(RefCell::new(0));
        let counter = notified.clone();
        handle.observe(move |_| *counter.borrow_mut() += 1);

        // Identity fetch and the three estimate snapshots are queued, not delivered
        assert!(store.pending_deliveries() >= 4);
        engine.stop();

        store.run_until_idle();
        assert_eq!(store.pending_deliveries(), 0);
        assert_eq!(handle.applied_count(), 0);
        assert_eq!(*notified.borrow(), 0);
        assert_eq!(handle.state().sip_walls, 0.0);
        assert_eq!(engine.state(), None);
        assert_eq!(store.subscription_count(), 0);
    }

    #[test]
    fn test_switch_subject_tears_down_previous_session() {
        let config = EngineConfig::default();
        let store = seeded_store(&config);
        let mut engine = engine_for(&store, config);

        engine.start(SUBJECT);
        store.run_until_idle();
        assert_eq!(engine.state().unwrap().general_expense, 250_000.0);

        engine.start("client-2");
        store.run_until_idle();

        let state = engine.state().unwrap();
        assert_eq!(engine.subject_id(), Some("client-2"));
        assert_eq!(engine.resolved_category().as_deref(), Some("cat2"));
        assert_eq!(state.general_expense, 10_000.0);
        // Fresh state: nothing carried over from client-1
        assert_eq!(state.sip_walls, 0.0);
        // 3 estimate watchers + classification query + transactions
        assert_eq!(store.subscription_count(), 5);
        assert_eq!(engine.active_transaction_watchers(), 1);

        // client-1 data no longer reaches the state
        store.add_document("transactions", &json!({ "categoryId": "cat1", "type": "expense", "amount": -1 })).unwrap();
        store.run_until_idle();
        assert_eq!(engine.state().unwrap().general_expense, 10_000.0);
    }

    #[test]
    fn test_classification_switch_keeps_single_watcher() {
        let config = EngineConfig::default();
        let store = seeded_store(&config);
        let mut engine = engine_for(&store, config);
        engine.start(SUBJECT);
        store.run_until_idle();

        // A second matching classification inserted later does not win
        store.set_document(&DocPath::new("categories", "cat3"), &json!({ "title": "Иванов Иван", "row": 3 })).unwrap();
        store.run_until_idle();
        assert_eq!(engine.resolved_category().as_deref(), Some("cat1"));

        // Removing the first promotes the second
        store.delete_document(&DocPath::new("categories", "cat1")).unwrap();
        store.run_until_idle();
        assert_eq!(engine.resolved_category().as_deref(), Some("cat3"));
        assert_eq!(engine.active_transaction_watchers(), 1);
        assert_eq!(engine.state().unwrap().general_expense, 0.0);
    }

    #[test]
    fn test_lost_classification_keeps_general_expense() {
        let config = EngineConfig::default();
        let store = seeded_store(&config);
        let mut engine = engine_for(&store, config);
        engine.start(SUBJECT);
        store.run_until_idle();

        store.delete_document(&DocPath::new("categories", "cat1")).unwrap();
        store.run_until_idle();

        assert_eq!(engine.active_transaction_watchers(), 0);
        assert_eq!(engine.state().unwrap().general_expense, 250_000.0);
    }

    #[test]
    fn test_debounced_write_back() {
        let config = EngineConfig::default();
        let store = seeded_store(&config);
        let clock = Rc::new(ManualClock::new(Utc::now()));
        let writer = Rc::new(SqliteSnapshotWriter::new(store.clone(), "receiptCalculations"));
        let mut engine = engine_for(&store, config).with_persistence(writer, clock.clone());

        engine.start(SUBJECT);
        store.run_until_idle();
        assert!(!engine.poll_persistence());

        clock.advance(Duration::milliseconds(500));
        assert!(engine.poll_persistence());

        let saved = store
            .get_document(&DocPath::new("receiptCalculations", SUBJECT))
            .unwrap()
            .unwrap();
        assert_eq!(saved.data["generalExpense"], 250_000.0);
        assert_eq!(saved.data["sipWalls"], 800_000.0);
        // Nothing pending after the write
        assert!(!engine.flush_persistence());
    }

    #[test]
    fn test_read_only_session_does_not_write() {
        let config = EngineConfig::default();
        let store = seeded_store(&config);
        let clock = Rc::new(ManualClock::new(Utc::now()));
        let writer = Rc::new(SqliteSnapshotWriter::new(store.clone(), "receiptCalculations"));
        let mut engine = engine_for(&store, config).with_persistence(writer, clock.clone());

        engine.start(SUBJECT);
        engine.set_editing(false);
        store.run_until_idle();
        clock.advance(Duration::seconds(1));

        assert!(!engine.poll_persistence());
        assert_eq!(store.document_count("receiptCalculations").unwrap(), 0);
    }

    /// Store whose every call fails
    struct BrokenStore;

    impl RemoteStore for BrokenStore {
        fn fetch_once(&self, _path: &DocPath, on_result: FetchCallback) {
            on_result(Err(StoreError::Closed));
        }

        fn subscribe(
            &self,
            _target: WatchTarget,
            _on_change: SnapshotCallback,
        ) -> Result<Subscription, StoreError> {
            Err(StoreError::Closed)
        }
    }

    #[test]
    fn test_store_failures_degrade_to_defaults() {
        let mut engine = AggregationEngine::new(Rc::new(BrokenStore), EngineConfig::default());
        engine.start(SUBJECT);

        assert!(engine.is_running());
        assert_eq!(engine.state().unwrap(), AggregateState::with_baseline(1_300_000.0));
        assert_eq!(engine.active_transaction_watchers(), 0);
        engine.stop();
        assert!(!engine.is_running());
    }
}
