// 🔎 Resolution Chain - subject → lookup key → classification id
//
// IdentityResolver performs the one-shot fetch of the subject document and
// derives the lookup key. CategoryResolver keeps a live query over the
// classification collection and drives the dependent transaction watcher
// whenever the first matching classification id changes.

use crate::config::EngineConfig;
use crate::dependent::DependentSubscription;
use crate::entities::classification::first_id;
use crate::entities::{ClassificationRecord, Subject};
use crate::error::StoreError;
use crate::store::{DocPath, Document, RemoteStore, Snapshot, Subscription, WatchTarget};
use crate::watchers::{watch_transactions, ReducerHandle};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, info, warn};

// ============================================================================
// IDENTITY RESOLVER
// ============================================================================

pub struct IdentityResolver;

impl IdentityResolver {
    /// Fetch the subject once and pass its lookup key to `on_resolved`.
    ///
    /// An absent subject or a failed fetch stops the chain with a warning.
    pub fn resolve(
        store: &dyn RemoteStore,
        path: DocPath,
        on_resolved: impl FnOnce(String) + 'static,
    ) {
        let subject_path = path.clone();
        store.fetch_once(
            &path,
            Box::new(move |result: Result<Option<Document>, StoreError>| {
                let doc = match result {
                    Ok(Some(doc)) => doc,
                    Ok(None) => {
                        warn!(path = %subject_path, "subject not found, skipping classification lookup");
                        return;
                    }
                    Err(e) => {
                        warn!(path = %subject_path, error = %e, "error fetching subject");
                        return;
                    }
                };

                match doc.decode::<Subject>() {
                    Ok(subject) => {
                        let missing = subject.missing_names();
                        if !missing.is_empty() {
                            warn!(path = %subject_path, ?missing, "subject name incomplete, lookup key uses empty parts");
                        }
                        let key = subject.lookup_key();
                        debug!(path = %subject_path, lookup_key = %key, "subject resolved");
                        on_resolved(key);
                    }
                    Err(e) => warn!(path = %subject_path, error = %e, "malformed subject document"),
                }
            }),
        );
    }
}

// ============================================================================
// CATEGORY RESOLVER
// ============================================================================

/// Live classification lookup owning the dependent transaction watcher
pub struct CategoryResolver {
    transactions: Rc<RefCell<DependentSubscription<String>>>,
    subscription: Option<Subscription>,
}

impl CategoryResolver {
    pub fn start(
        store: Rc<dyn RemoteStore>,
        handle: ReducerHandle,
        config: &EngineConfig,
        lookup_key: String,
    ) -> Self {
        let transactions = {
            let store = store.clone();
            let handle = handle.clone();
            let config = config.clone();
            Rc::new(RefCell::new(DependentSubscription::new(
                "transactions",
                move |category_id: &String| {
                    watch_transactions(store.as_ref(), handle.clone(), &config, category_id)
                },
            )))
        };

        let query = ClassificationRecord::query(&config.collections.categories, &lookup_key, config.category_row);
        let node = transactions.clone();
        let key = lookup_key.clone();

        let on_change = Box::new(move |result: Result<Snapshot, StoreError>| {
            if !handle.is_alive() {
                return;
            }
            match result {
                Ok(snapshot) => {
                    let category_id = first_id(snapshot.documents());
                    match &category_id {
                        Some(id) => debug!(lookup_key = %key, category_id = %id, "classification resolved"),
                        // generalExpense keeps its last value
                        None => info!(lookup_key = %key, "no classification for subject"),
                    }
                    node.borrow_mut().on_upstream_change(category_id);
                }
                Err(e) => warn!(lookup_key = %key, error = %e, "classification subscription failed"),
            }
        });

        let subscription = match store.subscribe(WatchTarget::Query(query), on_change) {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                warn!(lookup_key = %lookup_key, error = %e, "could not subscribe to classifications");
                None
            }
        };

        CategoryResolver {
            transactions,
            subscription,
        }
    }

    /// Currently resolved classification id
    pub fn category_id(&self) -> Option<String> {
        self.transactions.borrow().current_key().cloned()
    }

    /// 1 while a transaction watcher is live, else 0
    pub fn active_transaction_watchers(&self) -> usize {
        usize::from(self.transactions.borrow().is_active())
    }

    /// Tear down the classification query and the transaction watcher
    pub fn stop(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.transactions.borrow_mut().dispose();
    }
}
