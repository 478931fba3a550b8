//! Engine configuration

use cinder_core::{Error, Protocol, Result};

/// Sizing and protocol defaults, fixed at engine construction.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum distinct threads that may touch the engine.
    pub workers: usize,
    /// Maximum concurrently live transactions.
    pub txn_slots: usize,
    /// OIDs handed to a worker per extent refill.
    pub oid_extent: u64,
    /// Index leaf capacity before a split.
    pub index_fanout: usize,
    /// Protocol used by `begin` unless overridden per transaction.
    pub default_protocol: Protocol,
    /// Record and validate index-leaf observations to keep scans and
    /// failed lookups phantom-free.
    pub phantom_protection: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            workers: 128,
            txn_slots: 4096,
            oid_extent: 8192,
            index_fanout: 64,
            default_protocol: Protocol::Si,
            phantom_protection: true,
        }
    }
}

impl Config {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be non-zero".into()));
        }
        if self.txn_slots == 0 {
            return Err(Error::InvalidConfig("txn_slots must be non-zero".into()));
        }
        if self.oid_extent == 0 {
            return Err(Error::InvalidConfig("oid_extent must be non-zero".into()));
        }
        if self.index_fanout < 2 {
            return Err(Error::InvalidConfig(
                "index_fanout must be at least 2".into(),
            ));
        }
        Ok(())
    }
}
