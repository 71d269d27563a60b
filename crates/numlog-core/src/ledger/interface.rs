use crate::Record;
use core::fmt;
use std::sync::Arc;

/// Outcome of classifying a record against the run's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// First time this record was seen in the run.
    Unique,
    /// The record was seen before, on any connection.
    Duplicate,
}

impl Classification {
    pub const fn is_unique(self) -> bool {
        matches!(self, Self::Unique)
    }
}

/// Counters captured by [`Ledger::snapshot_and_reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowStats {
    /// Unique records classified since the previous snapshot.
    pub unique: u64,
    /// Duplicate records classified since the previous snapshot.
    pub duplicates: u64,
    /// Unique records classified since the ledger was created.
    pub unique_total: u64,
}

impl fmt::Display for WindowStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Received {} unique numbers, {} duplicates. Unique total: {}",
            self.unique, self.duplicates, self.unique_total
        )
    }
}

/// A thread-safe membership ledger with windowed counters.
///
/// Implementations must uphold two invariants regardless of backing
/// structure:
///
/// - Exactly-once classification: concurrent `classify` calls for the same
///   never-seen record yield one [`Classification::Unique`] and only
///   [`Classification::Duplicate`] for every other call.
/// - Exactly-once attribution: a record classified while
///   [`Ledger::snapshot_and_reset`] runs is counted in either the returned
///   window or the next one, never both and never neither.
pub trait Ledger: Send + Sync {
    /// Tests membership and inserts the record if absent, updating counters.
    fn classify(&self, record: &Record) -> Classification;

    /// Returns the current window counts plus the lifetime total, then resets
    /// the window counts to zero.
    fn snapshot_and_reset(&self) -> WindowStats;

    /// Lifetime unique count. Does not reset anything.
    fn unique_total(&self) -> u64;
}

impl<L: Ledger + ?Sized> Ledger for Arc<L> {
    fn classify(&self, record: &Record) -> Classification {
        (**self).classify(record)
    }

    fn snapshot_and_reset(&self) -> WindowStats {
        (**self).snapshot_and_reset()
    }

    fn unique_total(&self) -> u64 {
        (**self).unique_total()
    }
}
