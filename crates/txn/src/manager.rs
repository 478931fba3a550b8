//! Shared transaction-layer state
//!
//! [`TxnManager`] bundles everything a transaction needs — registry,
//! OID table, version store, epoch manager, worker slots, and the
//! log — into one explicit context constructed at engine init and
//! passed by reference. There are no crate-level globals; two engines
//! in one process never share state.

use crate::registry::XidRegistry;
use crate::transaction::Transaction;
use cinder_core::{Oid, Protocol, Result};
use cinder_log::LogManager;
use cinder_storage::{EpochManager, OidTable, VersionPtr, VersionStore, WorkerRegistry};
use std::sync::Arc;
use tracing::debug;

/// Construction parameters for the transaction layer.
#[derive(Debug, Clone)]
pub struct TxnManagerOptions {
    /// Maximum distinct worker threads.
    pub workers: usize,
    /// OIDs handed to a worker per extent refill.
    pub oid_extent: u64,
    /// Maximum concurrently live transactions.
    pub txn_slots: usize,
    /// Whether scans and failed lookups record leaf observations for
    /// commit-time phantom validation.
    pub phantom_protection: bool,
}

impl Default for TxnManagerOptions {
    fn default() -> Self {
        TxnManagerOptions {
            workers: 128,
            oid_extent: 8192,
            txn_slots: 4096,
            phantom_protection: true,
        }
    }
}

/// Owner of the transaction-layer shared state.
pub struct TxnManager {
    registry: XidRegistry,
    oids: OidTable,
    versions: VersionStore,
    epochs: Arc<EpochManager>,
    workers: WorkerRegistry,
    log: Arc<LogManager>,
    phantom_protection: bool,
}

impl TxnManager {
    /// Build the transaction layer on top of `log`.
    pub fn new(options: TxnManagerOptions, log: Arc<LogManager>) -> Self {
        let epochs = Arc::new(EpochManager::new(options.workers));
        TxnManager {
            registry: XidRegistry::new(options.txn_slots),
            oids: OidTable::new(options.workers, options.oid_extent),
            versions: VersionStore::new(Arc::clone(&epochs)),
            epochs,
            workers: WorkerRegistry::new(options.workers),
            log,
            phantom_protection: options.phantom_protection,
        }
    }

    /// Start a transaction under `protocol`.
    ///
    /// Allocates the XID and context, snapshots the log tail as the
    /// begin LSN, and enters the current epoch. The epoch is held
    /// until the transaction object is dropped.
    pub fn begin(self: &Arc<Self>, protocol: Protocol, read_only: bool) -> Result<Transaction> {
        let worker = self.workers.current()?;
        let guard = self.epochs.enter(worker);
        let begin = self.log.tail();
        let ctx = self.registry.alloc(begin)?;
        debug!(xid = %ctx.xid(), %begin, %protocol, read_only, "transaction begun");
        Ok(Transaction::new(
            Arc::clone(self),
            ctx,
            protocol,
            read_only,
            guard,
            self.log.new_txn_log(),
        ))
    }

    /// XID registry.
    pub fn registry(&self) -> &XidRegistry {
        &self.registry
    }

    /// OID indirection table.
    pub fn oids(&self) -> &OidTable {
        &self.oids
    }

    /// Version arena.
    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    /// Epoch manager.
    pub fn epochs(&self) -> &Arc<EpochManager> {
        &self.epochs
    }

    /// The log this layer appends to.
    pub fn log(&self) -> &Arc<LogManager> {
        &self.log
    }

    /// Whether phantom protection is on.
    pub fn phantom_protection(&self) -> bool {
        self.phantom_protection
    }

    /// Tick the epoch clock and recycle drained version slots.
    /// Returns the number of slots recycled.
    pub fn reclaim(&self) -> usize {
        self.versions.reclaim()
    }

    /// Prune version chains: for every OID, cut the chain below the
    /// newest version visible to the oldest live snapshot and defer
    /// the tail to epoch reclamation. Returns the number of versions
    /// queued for reclamation.
    pub fn vacuum(&self) -> usize {
        let horizon = self
            .registry
            .min_active_begin()
            .unwrap_or_else(|| self.log.tail());
        let mut pruned = 0;
        for raw in 0..self.oids.allocated_bound() {
            let oid = Oid::new(raw);
            let head = match self.oids.head(oid) {
                Ok(head) => head,
                Err(_) => continue,
            };
            let mut cursor = head;
            let mut boundary = VersionPtr::NIL;
            while cursor.is_some() {
                if let Some(lsn) = self.versions.stamp(cursor).lsn() {
                    if lsn <= horizon {
                        boundary = cursor;
                        break;
                    }
                }
                cursor = self.versions.prev(cursor);
            }
            if boundary.is_some() {
                let mut tail = self.versions.sever_prev(boundary);
                while tail.is_some() {
                    let next = self.versions.prev(tail);
                    self.versions.defer_free(tail);
                    pruned += 1;
                    tail = next;
                }
            }
        }
        if pruned > 0 {
            debug!(pruned, %horizon, "version chains vacuumed");
        }
        pruned
    }
}
