//! Per-thread worker slots
//!
//! Epoch tracking and OID extent allocation both want uncontended
//! per-thread state, so each engine hands every thread that touches
//! it a dense worker slot. The slot is assigned on first use and
//! cached in a thread local keyed by engine id, so one thread can
//! drive several engines (the test suite does) without the slots
//! aliasing.

use cinder_core::{Error, Result};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Dense per-engine identity of a worker thread.
pub type WorkerId = usize;

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// engine id → worker slot for the current thread.
    static WORKER_SLOTS: RefCell<FxHashMap<u64, WorkerId>> =
        RefCell::new(FxHashMap::default());
}

/// Hands out worker slots for one engine instance.
pub struct WorkerRegistry {
    engine_id: u64,
    capacity: usize,
    next: AtomicUsize,
}

impl WorkerRegistry {
    /// Create a registry with room for `capacity` distinct threads.
    pub fn new(capacity: usize) -> Self {
        WorkerRegistry {
            engine_id: NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed),
            capacity,
            next: AtomicUsize::new(0),
        }
    }

    /// The slot of the calling thread, assigning one on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] once more than `capacity` distinct
    /// threads have asked for slots.
    pub fn current(&self) -> Result<WorkerId> {
        WORKER_SLOTS.with(|slots| {
            let mut slots = slots.borrow_mut();
            if let Some(&slot) = slots.get(&self.engine_id) {
                return Ok(slot);
            }
            let slot = self.next.fetch_add(1, Ordering::Relaxed);
            if slot >= self.capacity {
                return Err(Error::Internal(format!(
                    "worker slots exhausted: capacity {}",
                    self.capacity
                )));
            }
            slots.insert(self.engine_id, slot);
            Ok(slot)
        })
    }

    /// Maximum number of distinct worker threads.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots assigned so far.
    pub fn registered(&self) -> usize {
        self.next.load(Ordering::Relaxed).min(self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn same_thread_keeps_its_slot() {
        let registry = WorkerRegistry::new(4);
        let a = registry.current().unwrap();
        let b = registry.current().unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.registered(), 1);
    }

    #[test]
    fn distinct_threads_get_distinct_slots() {
        let registry = Arc::new(WorkerRegistry::new(8));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || registry.current().unwrap()));
        }
        let mut slots: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        slots.push(registry.current().unwrap());
        slots.sort_unstable();
        slots.dedup();
        assert_eq!(slots.len(), 5);
    }

    #[test]
    fn capacity_is_enforced() {
        let registry = Arc::new(WorkerRegistry::new(1));
        registry.current().unwrap();
        let registry2 = Arc::clone(&registry);
        let res = std::thread::spawn(move || registry2.current())
            .join()
            .unwrap();
        assert!(res.is_err());
    }

    #[test]
    fn two_engines_do_not_alias_slots() {
        let a = WorkerRegistry::new(4);
        let b = WorkerRegistry::new(4);
        let _ = a.current().unwrap();
        let slot_b = b.current().unwrap();
        // Fresh registry starts numbering from zero regardless of the
        // other registry's assignments.
        assert_eq!(slot_b, 0);
    }
}
