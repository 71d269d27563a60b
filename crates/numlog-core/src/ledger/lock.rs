use crate::{
    Record,
    ledger::{Classification, Ledger, WindowStats},
};
use parking_lot::Mutex;
use std::collections::HashSet;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Membership set and counters guarded together by one lock.
///
/// Keeping the counters under the same lock as the set is what makes a
/// snapshot consistent with the membership it describes.
#[derive(Debug, Default)]
pub(crate) struct LedgerState {
    seen: HashSet<Record>,
    unique_window: u64,
    duplicate_window: u64,
    unique_total: u64,
}

impl LedgerState {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            ..Self::default()
        }
    }

    pub(crate) fn classify(&mut self, record: &Record) -> Classification {
        if self.seen.insert(*record) {
            self.unique_window += 1;
            self.unique_total += 1;
            Classification::Unique
        } else {
            self.duplicate_window += 1;
            Classification::Duplicate
        }
    }

    pub(crate) fn take_window(&mut self) -> WindowStats {
        let stats = WindowStats {
            unique: self.unique_window,
            duplicates: self.duplicate_window,
            unique_total: self.unique_total,
        };
        self.unique_window = 0;
        self.duplicate_window = 0;
        stats
    }

    pub(crate) const fn unique_total(&self) -> u64 {
        self.unique_total
    }
}

/// A ledger backed by a single mutex.
///
/// Every classification and every snapshot is one critical section, so the
/// exactly-once invariants hold trivially. Contention grows with the number of
/// concurrent connections, which is fine for the small admission caps this
/// service runs with.
///
/// ## See Also
/// - [`ShardedLedger`] for higher connection counts.
///
/// [`ShardedLedger`]: crate::ShardedLedger
#[derive(Debug, Default)]
pub struct LockLedger {
    state: Mutex<LedgerState>,
}

impl LockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-sizes the membership set.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(LedgerState::with_capacity(capacity)),
        }
    }
}

impl Ledger for LockLedger {
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    fn classify(&self, record: &Record) -> Classification {
        self.state.lock().classify(record)
    }

    fn snapshot_and_reset(&self) -> WindowStats {
        self.state.lock().take_window()
    }

    fn unique_total(&self) -> u64 {
        self.state.lock().unique_total()
    }
}
