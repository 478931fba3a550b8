//! The engine
//!
//! [`Engine`] constructs every shared structure once — log,
//! transaction layer, table catalog, counters — and threads them
//! through the operations that need them. There are no process-wide
//! globals; two engines in one process are fully independent, and
//! shutdown is dropping the engine after worker threads have joined.

use crate::config::Config;
use crate::stats::{EngineStats, StatsSnapshot};
use crate::table::Table;
use cinder_core::{Error, Lsn, OrderedMap, Protocol, Result};
use cinder_index::LeafIndex;
use cinder_log::{now_micros, LogManager, LogRecord};
use cinder_txn::{Transaction, TxnManager, TxnManagerOptions};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Kind of ordered map backing a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableKind {
    /// Fence-keyed leaf pages; the only kind currently built in.
    #[default]
    LeafOrdered,
}

/// Per-transaction options for [`Engine::begin_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TxnOptions {
    /// Override the engine's default protocol.
    pub protocol: Option<Protocol>,
    /// Reject writes; read-only transactions skip absent-set
    /// recording and never append to the log.
    pub read_only: bool,
}

impl TxnOptions {
    /// Options for a read-only transaction under the default
    /// protocol.
    pub fn read_only() -> Self {
        TxnOptions {
            protocol: None,
            read_only: true,
        }
    }

    /// Options selecting `protocol`.
    pub fn with_protocol(protocol: Protocol) -> Self {
        TxnOptions {
            protocol: Some(protocol),
            read_only: false,
        }
    }
}

/// The embeddable engine: tables, transactions, reclamation.
pub struct Engine {
    config: Config,
    log: Arc<LogManager>,
    txns: Arc<TxnManager>,
    tables: DashMap<String, Arc<Table>>,
    stats: Arc<EngineStats>,
}

impl Engine {
    /// Construct an engine. Validates the configuration and builds
    /// the log, the transaction layer, and an empty catalog.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let log = Arc::new(LogManager::new());
        let txns = Arc::new(TxnManager::new(
            TxnManagerOptions {
                workers: config.workers,
                oid_extent: config.oid_extent,
                txn_slots: config.txn_slots,
                phantom_protection: config.phantom_protection,
            },
            Arc::clone(&log),
        ));
        info!(
            workers = config.workers,
            default_protocol = %config.default_protocol,
            phantom_protection = config.phantom_protection,
            "engine initialized"
        );
        Ok(Engine {
            config,
            log,
            txns,
            tables: DashMap::new(),
            stats: Arc::new(EngineStats::default()),
        })
    }

    /// Create a table of the default ordered-map kind.
    pub fn create_table(&self, name: &str) -> Result<Arc<Table>> {
        self.create_table_kind(name, TableKind::default())
    }

    /// Create a table of an explicit kind. The catalog record is
    /// appended through a transaction log handle, so table creation
    /// has an LSN like any other commit.
    pub fn create_table_kind(&self, name: &str, kind: TableKind) -> Result<Arc<Table>> {
        let entry = self.tables.entry(name.to_string());
        let entry = match entry {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(Error::TableExists(name.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => vacant,
        };

        let ctx = self.txns.registry().alloc(self.log.tail())?;
        let mut catalog_log = self.log.new_txn_log();
        catalog_log.append(LogRecord::CreateTable {
            name: name.to_string(),
            timestamp_micros: now_micros(),
        });
        let committed = catalog_log.commit(ctx.xid());
        self.txns.registry().free(ctx.xid());
        let lsn = committed?;

        let index: Arc<dyn OrderedMap> = match kind {
            TableKind::LeafOrdered => Arc::new(LeafIndex::new(self.config.index_fanout)),
        };
        let table = Arc::new(Table::new(
            name.to_string(),
            index,
            Arc::clone(&self.stats),
        ));
        entry.insert(Arc::clone(&table));
        debug!(table = name, ?kind, %lsn, "table created");
        Ok(table)
    }

    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Result<Arc<Table>> {
        self.tables
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::NoSuchTable(name.to_string()))
    }

    /// Begin a transaction under the engine's default protocol.
    pub fn begin(&self) -> Result<Transaction> {
        self.begin_with(TxnOptions::default())
    }

    /// Begin a transaction with explicit options.
    pub fn begin_with(&self, options: TxnOptions) -> Result<Transaction> {
        let protocol = options.protocol.unwrap_or(self.config.default_protocol);
        self.txns.begin(protocol, options.read_only)
    }

    /// Commit `txn`, recording the outcome in the engine counters.
    pub fn commit(&self, txn: Transaction) -> Result<Lsn> {
        let result = txn.commit();
        match &result {
            Ok(_) => self.stats.record_commit(),
            Err(e) => self.stats.observe_error(e),
        }
        result
    }

    /// Abort `txn` at the caller's request.
    pub fn abort(&self, txn: Transaction) {
        self.stats.record_abort(cinder_core::AbortReason::User);
        txn.abort();
    }

    /// Advance the epoch clock and recycle drained version slots.
    pub fn reclaim(&self) -> usize {
        self.txns.reclaim()
    }

    /// Prune version chains below the oldest live snapshot, then
    /// recycle what the epochs allow.
    pub fn vacuum(&self) -> usize {
        let pruned = self.txns.vacuum();
        self.txns.reclaim();
        pruned
    }

    /// Current log tail; the begin LSN the next transaction would
    /// get.
    pub fn log_tail(&self) -> Lsn {
        self.log.tail()
    }

    /// Copy out the commit/abort counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The engine configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_core::AbortReason;
    use cinder_log::decode_frames;

    #[test]
    fn create_table_and_duplicate_rejection() {
        let engine = Engine::new(Config::default()).unwrap();
        engine.create_table("accounts").unwrap();
        assert!(matches!(
            engine.create_table("accounts"),
            Err(Error::TableExists(_))
        ));
        assert!(matches!(
            engine.create_table_kind("accounts", TableKind::LeafOrdered),
            Err(Error::TableExists(_))
        ));
        assert!(engine.table("accounts").is_ok());
        assert!(matches!(
            engine.table("missing"),
            Err(Error::NoSuchTable(_))
        ));
    }

    #[test]
    fn table_creation_is_logged_with_an_lsn() {
        let engine = Engine::new(Config::default()).unwrap();
        assert_eq!(engine.log_tail(), Lsn::ZERO);
        engine.create_table("t").unwrap();
        assert_eq!(engine.log_tail(), Lsn::new(1));

        let records = decode_frames(&engine.log.buffered_bytes()).unwrap();
        assert!(records
            .iter()
            .any(|r| matches!(r, LogRecord::CreateTable { name, .. } if name == "t")));
    }

    #[test]
    fn invalid_config_is_rejected_at_init() {
        let config = Config {
            workers: 0,
            ..Config::default()
        };
        assert!(matches!(
            Engine::new(config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn commit_and_abort_feed_the_counters() {
        let engine = Engine::new(Config::default()).unwrap();
        let table = engine.create_table("t").unwrap();

        let mut txn = engine.begin().unwrap();
        table.put(&mut txn, b"k", b"v").unwrap();
        engine.commit(txn).unwrap();

        let txn = engine.begin().unwrap();
        engine.abort(txn);

        let stats = engine.stats();
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.aborts_for(AbortReason::User), 1);
    }

    #[test]
    fn two_engines_are_independent() {
        let a = Engine::new(Config::default()).unwrap();
        let b = Engine::new(Config::default()).unwrap();
        let ta = a.create_table("t").unwrap();
        b.create_table("t").unwrap();

        let mut txn = a.begin().unwrap();
        ta.put(&mut txn, b"k", b"v").unwrap();
        a.commit(txn).unwrap();

        let tb = b.table("t").unwrap();
        let mut txn = b.begin().unwrap();
        assert_eq!(tb.get(&mut txn, b"k").unwrap(), None);
        b.commit(txn).unwrap();
    }
}
