//! XID allocation and transaction contexts
//!
//! The registry hands out dense XIDs backed by a fixed slot table.
//! A slot is reused as soon as its transaction releases it, but each
//! reuse bumps the slot's generation, and the generation travels
//! inside the XID, so a stamp naming a released transaction can never
//! resolve to its successor.
//!
//! Contexts are `Arc`-held: `free` only unbinds the slot. A reader
//! that looked up the owner of an uncommitted version keeps the
//! context alive for as long as it needs it, which is what lets
//! validators read `state`/`end` without coordinating with release.

use cinder_core::{Error, Lsn, Result, TxnState, Xid};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Per-transaction control block.
///
/// All fields a concurrent observer may read (`state`, `end`, the
/// SSN stamps) are single atomics. `begin` is fixed before the
/// context is published and never changes.
pub struct XidContext {
    xid: Xid,
    begin: Lsn,
    state: AtomicU8,
    end: AtomicU64,
    /// η: youngest committed predecessor observed so far.
    hi: AtomicU64,
    /// π: oldest committed successor observed so far;
    /// `Lsn::INVALID` until one is seen.
    lo: AtomicU64,
}

impl XidContext {
    fn new(xid: Xid, begin: Lsn) -> Self {
        XidContext {
            xid,
            begin,
            state: AtomicU8::new(TxnState::Embryo.as_u8()),
            end: AtomicU64::new(Lsn::INVALID.as_u64()),
            hi: AtomicU64::new(0),
            lo: AtomicU64::new(Lsn::INVALID.as_u64()),
        }
    }

    /// The transaction's XID.
    pub fn xid(&self) -> Xid {
        self.xid
    }

    /// Snapshot LSN the transaction reads under.
    pub fn begin(&self) -> Lsn {
        self.begin
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxnState {
        TxnState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Publish a state transition.
    pub fn set_state(&self, state: TxnState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Commit LSN, or [`Lsn::INVALID`] before one is assigned.
    pub fn end(&self) -> Lsn {
        Lsn::new(self.end.load(Ordering::Acquire))
    }

    /// Record the commit LSN. Published before the COMMITTED state so
    /// racing readers that see COMMITTING can already order against
    /// it.
    pub fn set_end(&self, end: Lsn) {
        self.end.store(end.as_u64(), Ordering::Release);
    }

    /// η: youngest committed predecessor.
    pub fn hi(&self) -> Lsn {
        Lsn::new(self.hi.load(Ordering::Acquire))
    }

    /// π: oldest committed successor, or [`Lsn::INVALID`].
    pub fn lo(&self) -> Lsn {
        Lsn::new(self.lo.load(Ordering::Acquire))
    }

    /// Raise η to at least `lsn`.
    pub fn observe_predecessor(&self, lsn: Lsn) {
        self.hi.fetch_max(lsn.as_u64(), Ordering::AcqRel);
    }

    /// Lower π to at most `lsn`.
    pub fn observe_successor(&self, lsn: Lsn) {
        self.lo.fetch_min(lsn.as_u64(), Ordering::AcqRel);
    }

    /// Whether the exclusion window is empty: a successor exists and
    /// η has reached or passed it.
    pub fn exclusion_violated(&self) -> bool {
        let lo = self.lo();
        lo.is_valid() && self.hi() >= lo
    }
}

/// Fixed-capacity slot table mapping live XIDs to contexts.
pub struct XidRegistry {
    slots: Vec<RwLock<Option<Arc<XidContext>>>>,
    generations: Vec<AtomicU32>,
    free: Mutex<Vec<u32>>,
}

impl XidRegistry {
    /// Create a registry with room for `capacity` concurrently live
    /// transactions.
    pub fn new(capacity: usize) -> Self {
        XidRegistry {
            slots: (0..capacity).map(|_| RwLock::new(None)).collect(),
            generations: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            free: Mutex::new((0..capacity as u32).rev().collect()),
        }
    }

    /// Allocate an XID and its context, with `begin` as the snapshot
    /// LSN.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] when every slot is live.
    pub fn alloc(&self, begin: Lsn) -> Result<Arc<XidContext>> {
        let slot = self
            .free
            .lock()
            .pop()
            .ok_or_else(|| Error::Internal("transaction slots exhausted".to_string()))?;
        let generation = self.generations[slot as usize].fetch_add(1, Ordering::Relaxed) + 1;
        let xid = Xid::from_parts(slot, generation);
        let ctx = Arc::new(XidContext::new(xid, begin));
        *self.slots[slot as usize].write() = Some(Arc::clone(&ctx));
        Ok(ctx)
    }

    /// Release an XID. The slot becomes reusable immediately; holders
    /// of the context `Arc` keep reading it safely.
    pub fn free(&self, xid: Xid) {
        let slot = xid.slot() as usize;
        let mut guard = self.slots[slot].write();
        let is_current = guard.as_ref().map(|ctx| ctx.xid() == xid).unwrap_or(false);
        if is_current {
            *guard = None;
            drop(guard);
            self.free.lock().push(xid.slot());
        }
    }

    /// Resolve an XID to its context, if the XID is still live.
    ///
    /// A stale XID (slot reused under a newer generation) resolves to
    /// `None`.
    pub fn get(&self, xid: Xid) -> Option<Arc<XidContext>> {
        let guard = self.slots[xid.slot() as usize].read();
        guard
            .as_ref()
            .filter(|ctx| ctx.xid() == xid)
            .map(Arc::clone)
    }

    /// Smallest begin LSN among live transactions, or `None` when
    /// none are live. The vacuum horizon.
    pub fn min_active_begin(&self) -> Option<Lsn> {
        let mut min: Option<Lsn> = None;
        for slot in &self.slots {
            if let Some(ctx) = slot.read().as_ref() {
                if !ctx.state().is_terminal() {
                    let begin = ctx.begin();
                    min = Some(min.map_or(begin, |m| m.min(begin)));
                }
            }
        }
        min
    }

    /// Number of live transactions.
    pub fn live(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.read().is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_assigns_unique_live_xids() {
        let registry = XidRegistry::new(4);
        let a = registry.alloc(Lsn::new(1)).unwrap();
        let b = registry.alloc(Lsn::new(2)).unwrap();
        assert_ne!(a.xid(), b.xid());
        assert_eq!(registry.live(), 2);
    }

    #[test]
    fn context_starts_in_embryo() {
        let registry = XidRegistry::new(1);
        let ctx = registry.alloc(Lsn::new(5)).unwrap();
        assert_eq!(ctx.state(), TxnState::Embryo);
        assert_eq!(ctx.begin(), Lsn::new(5));
        assert!(!ctx.end().is_valid());
    }

    #[test]
    fn freed_slot_is_reused_with_new_generation() {
        let registry = XidRegistry::new(1);
        let first = registry.alloc(Lsn::ZERO).unwrap();
        let first_xid = first.xid();
        registry.free(first_xid);

        let second = registry.alloc(Lsn::ZERO).unwrap();
        assert_eq!(second.xid().slot(), first_xid.slot());
        assert!(second.xid().generation() > first_xid.generation());

        // The stale XID no longer resolves.
        assert!(registry.get(first_xid).is_none());
        assert!(registry.get(second.xid()).is_some());
    }

    #[test]
    fn capacity_exhaustion_is_an_error() {
        let registry = XidRegistry::new(1);
        let _held = registry.alloc(Lsn::ZERO).unwrap();
        assert!(registry.alloc(Lsn::ZERO).is_err());
    }

    #[test]
    fn context_outlives_free() {
        let registry = XidRegistry::new(1);
        let ctx = registry.alloc(Lsn::new(3)).unwrap();
        let xid = ctx.xid();
        registry.free(xid);
        // The Arc still answers.
        assert_eq!(ctx.begin(), Lsn::new(3));
        assert_eq!(ctx.xid(), xid);
    }

    #[test]
    fn min_active_begin_ignores_terminal_contexts() {
        let registry = XidRegistry::new(3);
        let a = registry.alloc(Lsn::new(10)).unwrap();
        let b = registry.alloc(Lsn::new(4)).unwrap();
        assert_eq!(registry.min_active_begin(), Some(Lsn::new(4)));

        b.set_state(TxnState::Committed);
        assert_eq!(registry.min_active_begin(), Some(Lsn::new(10)));

        a.set_state(TxnState::Aborted);
        assert_eq!(registry.min_active_begin(), None);
    }

    #[test]
    fn exclusion_window() {
        let registry = XidRegistry::new(1);
        let ctx = registry.alloc(Lsn::ZERO).unwrap();
        // No successor: trivially fine.
        assert!(!ctx.exclusion_violated());

        ctx.observe_predecessor(Lsn::new(10));
        ctx.observe_successor(Lsn::new(20));
        assert!(!ctx.exclusion_violated());

        ctx.observe_predecessor(Lsn::new(20));
        assert!(ctx.exclusion_violated());

        // Stamps only tighten.
        ctx.observe_successor(Lsn::new(30));
        assert_eq!(ctx.lo(), Lsn::new(20));
        ctx.observe_predecessor(Lsn::new(5));
        assert_eq!(ctx.hi(), Lsn::new(20));
    }
}
