//! Commit and abort counters
//!
//! One counter per abort reason plus a commit counter, bumped on
//! every transaction outcome routed through the engine or a table
//! handle. Cheap enough to stay on unconditionally.

use cinder_core::{AbortReason, Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters. Shared between the engine and its table handles.
#[derive(Default)]
pub struct EngineStats {
    commits: AtomicU64,
    aborts: [AtomicU64; AbortReason::ALL.len()],
}

impl EngineStats {
    /// Count a committed transaction.
    pub fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an abort by reason.
    pub fn record_abort(&self, reason: AbortReason) {
        let slot = AbortReason::ALL
            .iter()
            .position(|r| *r == reason)
            .expect("reason is a member of ALL");
        self.aborts[slot].fetch_add(1, Ordering::Relaxed);
    }

    /// Inspect a result and count any abort it carries.
    pub fn observe<T>(&self, result: &Result<T>) {
        if let Err(e) = result {
            if let Some(reason) = e.abort_reason() {
                self.record_abort(reason);
            }
        }
    }

    /// Count the abort carried by `error`, if any.
    pub fn observe_error(&self, error: &Error) {
        if let Some(reason) = error.abort_reason() {
            self.record_abort(reason);
        }
    }

    /// Copy the counters out.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            commits: self.commits.load(Ordering::Relaxed),
            aborts: AbortReason::ALL
                .iter()
                .enumerate()
                .map(|(i, reason)| (*reason, self.aborts[i].load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    /// Transactions committed.
    pub commits: u64,
    /// Aborts, by reason.
    pub aborts: Vec<(AbortReason, u64)>,
}

impl StatsSnapshot {
    /// Aborts of one reason.
    pub fn aborts_for(&self, reason: AbortReason) -> u64 {
        self.aborts
            .iter()
            .find(|(r, _)| *r == reason)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    /// Aborts across all reasons.
    pub fn total_aborts(&self) -> u64 {
        self.aborts.iter().map(|(_, n)| n).sum()
    }
}
