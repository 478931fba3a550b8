//! Epoch-based reclamation
//!
//! Version slots cannot be recycled while a concurrent reader may
//! still follow a pointer to them. Readers therefore bracket any
//! access to versioned memory with an [`EpochGuard`]; frees are
//! deferred with the epoch current at the time of the defer, and a
//! slot becomes recyclable only once every registered worker has
//! moved at least two epochs past it.
//!
//! The manager tracks one word per worker slot: the epoch the worker
//! entered, or an idle sentinel. `tick` advances the global epoch
//! when no worker is still pinned to an older one, so a stalled
//! transaction holds the epoch (and all deferred memory) in place
//! rather than risking a use-after-free.

use crate::worker::WorkerId;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

const IDLE: u64 = u64::MAX;

/// How many epochs a deferred free must age before its slot may be
/// recycled.
const GRACE_EPOCHS: u64 = 2;

struct WorkerEpoch {
    state: AtomicU64,
    /// Nesting depth: one worker slot may hold several guards at
    /// once (a thread running overlapping transactions). The slot
    /// stays pinned to the epoch of the outermost enter until the
    /// last guard drops.
    depth: AtomicU64,
}

/// Process-wide quiescent-state tracker for one engine.
pub struct EpochManager {
    global: AtomicU64,
    slots: Vec<WorkerEpoch>,
    deferred: Mutex<VecDeque<(u64, u64)>>,
}

impl EpochManager {
    /// Create a manager with one epoch slot per possible worker.
    pub fn new(workers: usize) -> Self {
        let slots = (0..workers)
            .map(|_| WorkerEpoch {
                state: AtomicU64::new(IDLE),
                depth: AtomicU64::new(0),
            })
            .collect();
        EpochManager {
            global: AtomicU64::new(1),
            slots,
            deferred: Mutex::new(VecDeque::new()),
        }
    }

    /// The current global epoch.
    pub fn current(&self) -> u64 {
        self.global.load(Ordering::SeqCst)
    }

    /// Mark the calling worker active in the current epoch.
    ///
    /// Every access to a version pointer must happen inside the
    /// returned guard; the guard clears the marking on drop, on every
    /// exit path.
    pub fn enter(self: &Arc<Self>, worker: WorkerId) -> EpochGuard {
        let epoch = self.global.load(Ordering::SeqCst);
        let slot = &self.slots[worker];
        if slot.depth.fetch_add(1, Ordering::SeqCst) == 0 {
            slot.state.store(epoch, Ordering::SeqCst);
        }
        EpochGuard {
            manager: Arc::clone(self),
            worker,
        }
    }

    fn exit(&self, worker: WorkerId) {
        let slot = &self.slots[worker];
        if slot.depth.fetch_sub(1, Ordering::SeqCst) == 1 {
            slot.state.store(IDLE, Ordering::SeqCst);
        }
    }

    /// Queue `token` for destruction once the current epoch has
    /// drained. Returns the epoch the free was deferred against.
    pub fn defer(&self, token: u64) -> u64 {
        let epoch = self.global.load(Ordering::SeqCst);
        self.deferred.lock().push_back((epoch, token));
        epoch
    }

    /// Oldest epoch any worker is still pinned to, or the global
    /// epoch when all workers are idle.
    fn min_active(&self) -> u64 {
        let mut min = self.global.load(Ordering::SeqCst);
        for slot in &self.slots {
            let state = slot.state.load(Ordering::SeqCst);
            if state != IDLE && state < min {
                min = state;
            }
        }
        min
    }

    /// Advance the global epoch if every registered worker has
    /// quiesced out of the previous one. Returns the epoch in effect
    /// afterwards.
    pub fn tick(&self) -> u64 {
        let current = self.global.load(Ordering::SeqCst);
        if self.min_active() >= current {
            match self.global.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    trace!(epoch = current + 1, "epoch advanced");
                    current + 1
                }
                Err(actual) => actual,
            }
        } else {
            current
        }
    }

    /// Move every token whose grace period has elapsed into `out`.
    ///
    /// A token deferred at epoch `e` is released once no worker is
    /// pinned to any epoch below `e + GRACE_EPOCHS`.
    pub fn drain_reclaimable(&self, out: &mut Vec<u64>) {
        let horizon = self.min_active();
        let mut deferred = self.deferred.lock();
        while let Some(&(epoch, token)) = deferred.front() {
            if epoch + GRACE_EPOCHS <= horizon {
                out.push(token);
                deferred.pop_front();
            } else {
                break;
            }
        }
    }

    /// Number of frees still waiting for their epoch to drain.
    pub fn pending(&self) -> usize {
        self.deferred.lock().len()
    }
}

/// Active-epoch marking for one worker; releases on drop.
pub struct EpochGuard {
    manager: Arc<EpochManager>,
    worker: WorkerId,
}

impl EpochGuard {
    /// The worker slot this guard pins.
    pub fn worker(&self) -> WorkerId {
        self.worker
    }
}

impl Drop for EpochGuard {
    fn drop(&mut self) {
        self.manager.exit(self.worker);
    }
}
