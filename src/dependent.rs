// 🔗 Dependent Subscription - a live watch whose target depends on a key
//
// The node owns at most one child subscription. When the upstream key changes
// the old child is disposed synchronously before the new one is created, so
// two children are never live at the same time.

use crate::store::Subscription;
use std::fmt::Debug;
use tracing::debug;

type ChildFactory<K> = Box<dyn FnMut(&K) -> Option<Subscription>>;

pub struct DependentSubscription<K> {
    name: &'static str,
    key: Option<K>,
    child: Option<Subscription>,
    factory: ChildFactory<K>,
}

impl<K: Clone + PartialEq + Debug> DependentSubscription<K> {
    /// `factory` opens the child for a key; `None` means the child could not
    /// be opened and the node stays without one.
    pub fn new(name: &'static str, factory: impl FnMut(&K) -> Option<Subscription> + 'static) -> Self {
        DependentSubscription {
            name,
            key: None,
            child: None,
            factory: Box::new(factory),
        }
    }

    /// React to a new upstream value.
    ///
    /// Same key: nothing happens. Different key: old child torn down, then a
    /// new child opened. `None`: old child torn down, nothing opened.
    pub fn on_upstream_change(&mut self, key: Option<K>) {
        if key == self.key {
            return;
        }

        self.dispose();

        if let Some(new_key) = key {
            debug!(node = self.name, key = ?new_key, "opening dependent subscription");
            self.child = (self.factory)(&new_key);
            self.key = Some(new_key);
        }
    }

    pub fn current_key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    /// True while a child subscription is live
    pub fn is_active(&self) -> bool {
        self.child.as_ref().is_some_and(Subscription::is_active)
    }

    /// Tear down the child and forget the key
    pub fn dispose(&mut self) {
        if let Some(child) = self.child.take() {
            debug!(node = self.name, key = ?self.key, "closing dependent subscription");
            child.unsubscribe();
        }
        self.key = None;
    }
}
