//! Table handles
//!
//! A table is a name bound to one ordered index. Every data
//! operation takes the transaction it runs inside; the handle itself
//! holds no transactional state and can be shared freely across
//! threads.

use crate::stats::EngineStats;
use cinder_core::{OrderedMap, Result, ScanAction};
use cinder_txn::{InsertOutcome, Transaction};
use std::sync::Arc;

/// A named ordered table.
pub struct Table {
    name: String,
    index: Arc<dyn OrderedMap>,
    stats: Arc<EngineStats>,
}

impl Table {
    pub(crate) fn new(name: String, index: Arc<dyn OrderedMap>, stats: Arc<EngineStats>) -> Self {
        Table { name, index, stats }
    }

    /// The table's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of keys bound in the index, including keys whose
    /// current version is a tombstone.
    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    /// Point read.
    pub fn get(&self, txn: &mut Transaction, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let result = txn.get(&self.index, key);
        self.stats.observe(&result);
        result
    }

    /// Upsert.
    pub fn put(&self, txn: &mut Transaction, key: &[u8], value: &[u8]) -> Result<()> {
        let result = txn.put(&self.index, key, value);
        self.stats.observe(&result);
        result
    }

    /// Insert; reports whether the key was new or already present.
    pub fn insert(
        &self,
        txn: &mut Transaction,
        key: &[u8],
        value: &[u8],
    ) -> Result<InsertOutcome> {
        let result = txn.insert(&self.index, key, value);
        self.stats.observe(&result);
        result
    }

    /// Delete; returns whether a visible record was removed.
    pub fn remove(&self, txn: &mut Transaction, key: &[u8]) -> Result<bool> {
        let result = txn.remove(&self.index, key);
        self.stats.observe(&result);
        result
    }

    /// Ordered scan of `[low, high)`; `high = None` scans to the end.
    /// The callback receives `(key, value)` and steers with
    /// [`ScanAction`].
    pub fn scan(
        &self,
        txn: &mut Transaction,
        low: &[u8],
        high: Option<&[u8]>,
        cb: &mut dyn FnMut(&[u8], &[u8]) -> ScanAction,
    ) -> Result<()> {
        let result = txn.scan(&self.index, low, high, cb);
        self.stats.observe(&result);
        result
    }

    /// Reverse scan from `high` (inclusive) down to `low` (exclusive);
    /// `low = None` scans to the start.
    pub fn rscan(
        &self,
        txn: &mut Transaction,
        high: &[u8],
        low: Option<&[u8]>,
        cb: &mut dyn FnMut(&[u8], &[u8]) -> ScanAction,
    ) -> Result<()> {
        let result = txn.rscan(&self.index, high, low, cb);
        self.stats.observe(&result);
        result
    }
}
