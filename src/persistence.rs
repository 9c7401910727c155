// 💾 Persistence Sync - debounced write-back of the receipt calculation
//
// Observes the aggregate state and writes only the latest value once the
// state has been quiet for the debounce window. Writes are fire-and-forget:
// failures are logged, nothing is retried, and the in-memory state stays
// authoritative until the next change triggers another attempt.

use crate::reducer::AggregateState;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::rc::Rc;
use tracing::{debug, error};

// ============================================================================
// SNAPSHOT RECORD
// ============================================================================

/// Persisted form: full state plus write timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptSnapshot {
    #[serde(flatten)]
    pub state: AggregateState,
    pub updated_at: DateTime<Utc>,
}

impl ReceiptSnapshot {
    pub fn new(state: AggregateState, updated_at: DateTime<Utc>) -> Self {
        ReceiptSnapshot { state, updated_at }
    }
}

/// Destination of write-back
pub trait SnapshotWriter {
    fn write(&self, subject_id: &str, snapshot: &ReceiptSnapshot) -> anyhow::Result<()>;
}

// ============================================================================
// CLOCK
// ============================================================================

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock moved by hand (tests, replay)
pub struct ManualClock {
    now: Cell<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock {
            now: Cell::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

// ============================================================================
// PERSISTENCE SYNC
// ============================================================================

pub struct PersistenceSync {
    subject_id: String,
    writer: Rc<dyn SnapshotWriter>,
    clock: Rc<dyn Clock>,
    debounce: Duration,
    enabled: bool,
    pending: Option<AggregateState>,
    deadline: Option<DateTime<Utc>>,
    writes: u64,
    failures: u64,
}

impl PersistenceSync {
    pub fn new(
        subject_id: impl Into<String>,
        writer: Rc<dyn SnapshotWriter>,
        clock: Rc<dyn Clock>,
        debounce: Duration,
    ) -> Self {
        PersistenceSync {
            subject_id: subject_id.into(),
            writer,
            clock,
            debounce,
            enabled: true,
            pending: None,
            deadline: None,
            writes: 0,
            failures: 0,
        }
    }

    /// Read-only viewers do not write back. Disabling drops any pending write.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.cancel();
        }
    }

    /// Record a new state and restart the debounce window
    pub fn observe(&mut self, state: &AggregateState) {
        if !self.enabled {
            return;
        }
        self.pending = Some(state.clone());
        self.deadline = Some(self.clock.now() + self.debounce);
    }

    /// Write the pending state if its window has elapsed
    pub fn poll(&mut self) -> bool {
        match self.deadline {
            Some(deadline) if self.clock.now() >= deadline => self.write_pending(),
            _ => false,
        }
    }

    /// Write the pending state now, ignoring the window
    pub fn flush(&mut self) -> bool {
        self.write_pending()
    }

    /// Drop the pending state without writing it
    pub fn cancel(&mut self) {
        if self.pending.take().is_some() {
            debug!(subject_id = %self.subject_id, "pending write-back cancelled");
        }
        self.deadline = None;
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn write_count(&self) -> u64 {
        self.writes
    }

    pub fn failure_count(&self) -> u64 {
        self.failures
    }

    fn write_pending(&mut self) -> bool {
        self.deadline = None;
        let Some(state) = self.pending.take() else {
            return false;
        };

        let snapshot = ReceiptSnapshot::new(state, self.clock.now());
        match self.writer.write(&self.subject_id, &snapshot) {
            Ok(()) => {
                self.writes += 1;
                debug!(subject_id = %self.subject_id, "receipt calculation saved");
                true
            }
            Err(e) => {
                self.failures += 1;
                error!(subject_id = %self.subject_id, error = %e, "error saving receipt calculation");
                false
            }
        }
    }
}
