use crate::{
    Error, Record, Result,
    ledger::{Classification, Ledger, WindowStats, lock::LedgerState},
};
use core::hash::BuildHasher;
use parking_lot::Mutex;
use std::hash::RandomState;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// A ledger split into independently locked shards.
///
/// A record always hashes to the same shard, and each shard carries its own
/// window counters. A snapshot visits the shards one at a time, so a record
/// classified concurrently with a snapshot is counted before or after its
/// shard's reset, never both.
///
/// The lifetime total in a snapshot is the sum of each shard's total at the
/// moment that shard was visited, which keeps it consistent with the window
/// counts returned alongside it.
pub struct ShardedLedger {
    shards: Box<[Mutex<LedgerState>]>,
    mask: usize,
    hasher: RandomState,
}

impl ShardedLedger {
    /// Creates a ledger with `shards` rounded up to the next power of two.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `shards` is zero.
    pub fn new(shards: usize) -> Result<Self> {
        if shards == 0 {
            return Err(Error::Config {
                reason: "ledger shard count must be greater than 0".to_string(),
            });
        }

        let count = shards.next_power_of_two();
        let shards = (0..count)
            .map(|_| Mutex::new(LedgerState::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            shards,
            mask: count - 1,
            hasher: RandomState::new(),
        })
    }

    /// Number of shards after rounding.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard(&self, record: &Record) -> &Mutex<LedgerState> {
        let hash = self.hasher.hash_one(record) as usize;
        &self.shards[hash & self.mask]
    }
}

impl Ledger for ShardedLedger {
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    fn classify(&self, record: &Record) -> Classification {
        self.shard(record).lock().classify(record)
    }

    fn snapshot_and_reset(&self) -> WindowStats {
        self.shards
            .iter()
            .fold(WindowStats::default(), |mut acc, shard| {
                let stats = shard.lock().take_window();
                acc.unique += stats.unique;
                acc.duplicates += stats.duplicates;
                acc.unique_total += stats.unique_total;
                acc
            })
    }

    fn unique_total(&self) -> u64 {
        self.shards
            .iter()
            .map(|shard| shard.lock().unique_total())
            .sum()
    }
}

impl core::fmt::Debug for ShardedLedger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ShardedLedger")
            .field("shards", &self.shards.len())
            .finish_non_exhaustive()
    }
}
