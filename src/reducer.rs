// 🧮 Aggregate Reducer - the single merge point for the receipt calculation
//
// Watchers never touch the state directly. They send an `AggregatePatch` and
// the reducer merges it, then recomputes both derived fields from the merged
// state. After every `apply`:
//
//   total_expense == operational_expense + sip_walls + ceiling_insulation + general_expense
//   net_profit    == contract_price - total_expense

use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// AGGREGATE STATE
// ============================================================================

/// Derived financial summary for one subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateState {
    pub operational_expense: f64,
    pub sip_walls: f64,
    pub ceiling_insulation: f64,
    pub general_expense: f64,
    pub contract_price: f64,
    pub total_expense: f64,
    pub net_profit: f64,
}

impl AggregateState {
    /// Fresh state: every sourced field at zero, derived fields consistent
    pub fn with_baseline(operational_expense: f64) -> Self {
        let mut state = AggregateState {
            operational_expense,
            sip_walls: 0.0,
            ceiling_insulation: 0.0,
            general_expense: 0.0,
            contract_price: 0.0,
            total_expense: 0.0,
            net_profit: 0.0,
        };
        state.recompute();
        state
    }

    fn recompute(&mut self) {
        self.total_expense = self.operational_expense
            + self.sip_walls
            + self.ceiling_insulation
            + self.general_expense;
        self.net_profit = self.contract_price - self.total_expense;
    }

    /// Both invariants hold exactly
    pub fn is_consistent(&self) -> bool {
        self.total_expense
            == self.operational_expense + self.sip_walls + self.ceiling_insulation + self.general_expense
            && self.net_profit == self.contract_price - self.total_expense
    }
}

impl Default for AggregateState {
    fn default() -> Self {
        Self::with_baseline(crate::config::EngineConfig::default().operational_expense)
    }
}

// ============================================================================
// PARTIAL UPDATE
// ============================================================================

/// Subset of sourced fields reported by one watcher.
///
/// Derived fields are not part of a patch: only the reducer writes them.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operational_expense: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sip_walls: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ceiling_insulation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub general_expense: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_price: Option<f64>,
}

impl AggregatePatch {
    pub fn sip_walls(value: f64) -> Self {
        AggregatePatch {
            sip_walls: Some(value),
            ..Default::default()
        }
    }

    pub fn ceiling_insulation(value: f64) -> Self {
        AggregatePatch {
            ceiling_insulation: Some(value),
            ..Default::default()
        }
    }

    pub fn general_expense(value: f64) -> Self {
        AggregatePatch {
            general_expense: Some(value),
            ..Default::default()
        }
    }

    pub fn contract_price(value: f64) -> Self {
        AggregatePatch {
            contract_price: Some(value),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == AggregatePatch::default()
    }
}

// ============================================================================
// REDUCER
// ============================================================================

pub(crate) type StateObserver = Box<dyn FnMut(&AggregateState)>;

/// Owns the aggregate state; `apply` is the only way to change it
pub struct AggregateReducer {
    state: AggregateState,
    applied: u64,
    observers: Vec<StateObserver>,
}

impl AggregateReducer {
    pub fn new(operational_expense: f64) -> Self {
        AggregateReducer {
            state: AggregateState::with_baseline(operational_expense),
            applied: 0,
            observers: Vec::new(),
        }
    }

    pub fn state(&self) -> &AggregateState {
        &self.state
    }

    /// Number of patches applied so far
    pub fn applied_count(&self) -> u64 {
        self.applied
    }

    /// Called with the new state after every `apply`
    pub fn observe(&mut self, observer: impl FnMut(&AggregateState) + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Merge `patch` and recompute the derived fields.
    ///
    /// Recomputation runs on every call, whichever fields changed.
    pub fn apply(&mut self, patch: AggregatePatch) -> &AggregateState {
        self.merge(patch);
        for observer in &mut self.observers {
            observer(&self.state);
        }
        &self.state
    }

    /// Like `apply`, but hands the observers back to the caller instead of
    /// running them, so they can be notified once the reducer is released.
    /// Return them with `restore_observers`.
    pub(crate) fn apply_detached(&mut self, patch: AggregatePatch) -> (AggregateState, Vec<StateObserver>) {
        self.merge(patch);
        (self.state.clone(), std::mem::take(&mut self.observers))
    }

    /// Put detached observers back ahead of any registered meanwhile
    pub(crate) fn restore_observers(&mut self, mut observers: Vec<StateObserver>) {
        observers.append(&mut self.observers);
        self.observers = observers;
    }

    fn merge(&mut self, patch: AggregatePatch) {
        let state = &mut self.state;
        if let Some(value) = patch.operational_expense {
            state.operational_expense = value;
        }
        if let Some(value) = patch.sip_walls {
            state.sip_walls = value;
        }
        if let Some(value) = patch.ceiling_insulation {
            state.ceiling_insulation = value;
        }
        if let Some(value) = patch.general_expense {
            state.general_expense = value;
        }
        if let Some(value) = patch.contract_price {
            state.contract_price = value;
        }
        state.recompute();
        self.applied += 1;

        debug!(
            ?patch,
            total_expense = self.state.total_expense,
            net_profit = self.state.net_profit,
            "applied aggregate patch"
        );
    }
}
