//! Versioned record store
//!
//! Versions live in a grow-only arena of fixed-size chunks and are
//! addressed by [`VersionPtr`], an index into that arena. Keeping
//! references as indices (instead of raw pointers) lets the OID table
//! CAS a chain head in one word and lets the abort path unlink a
//! version with the same primitive.
//!
//! A slot holds three fields:
//! - `stamp`: one word, see [`Stamp`]. Written once at allocation,
//!   rewritten exactly once at commit (release store) or marked
//!   aborted.
//! - `prev`: the next-older version. Immutable from publication until
//!   the chain is pruned, at which point it transitions to NIL once.
//! - `payload`: the record bytes; `None` is a deletion tombstone.
//!
//! Slot storage is recycled through the epoch system: `defer_free`
//! parks the slot until every worker has quiesced past the deferring
//! epoch, so an in-flight head CAS can never observe a recycled slot.

use crate::epoch::EpochManager;
use cinder_core::{Error, Lsn, Result, Stamp};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Slots per arena chunk.
const CHUNK_SLOTS: usize = 1024;

/// Arena index of a version record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionPtr(u64);

impl VersionPtr {
    /// The null pointer: end of a chain, or an empty OID head.
    pub const NIL: VersionPtr = VersionPtr(u64::MAX);

    /// Whether this pointer addresses a version.
    #[inline]
    pub fn is_some(&self) -> bool {
        *self != VersionPtr::NIL
    }

    /// The raw index, for storage in an atomic word.
    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Rebuild from a raw word.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        VersionPtr(raw)
    }
}

impl fmt::Display for VersionPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_some() {
            write!(f, "v:{}", self.0)
        } else {
            f.write_str("v:nil")
        }
    }
}

struct VersionSlot {
    stamp: AtomicU64,
    prev: AtomicU64,
    /// Highest commit LSN of any transaction that read this version.
    pstamp: AtomicU64,
    /// Commit LSN of the transaction that overwrote this version;
    /// `Lsn::INVALID` while it is still the newest committed state.
    sstamp: AtomicU64,
    payload: RwLock<Option<Box<[u8]>>>,
}

impl VersionSlot {
    fn vacant() -> Self {
        VersionSlot {
            stamp: AtomicU64::new(Stamp::ABORTED.raw()),
            prev: AtomicU64::new(VersionPtr::NIL.raw()),
            pstamp: AtomicU64::new(0),
            sstamp: AtomicU64::new(Lsn::INVALID.as_u64()),
            payload: RwLock::new(None),
        }
    }

    fn reset(&self) {
        self.stamp.store(Stamp::ABORTED.raw(), Ordering::Release);
        self.prev.store(VersionPtr::NIL.raw(), Ordering::Relaxed);
        self.pstamp.store(0, Ordering::Relaxed);
        self.sstamp.store(Lsn::INVALID.as_u64(), Ordering::Relaxed);
        *self.payload.write() = None;
    }
}

/// Arena of version records, recycled through epochs.
pub struct VersionStore {
    chunks: RwLock<Vec<Arc<Vec<VersionSlot>>>>,
    next: AtomicU64,
    grow: Mutex<()>,
    free: Mutex<Vec<u64>>,
    epochs: Arc<EpochManager>,
}

impl VersionStore {
    /// Create a store that defers frees through `epochs`.
    pub fn new(epochs: Arc<EpochManager>) -> Self {
        VersionStore {
            chunks: RwLock::new(Vec::new()),
            next: AtomicU64::new(0),
            grow: Mutex::new(()),
            free: Mutex::new(Vec::new()),
            epochs,
        }
    }

    /// Allocate a version with the given stamp, back link, and
    /// payload (`None` installs a deletion tombstone).
    ///
    /// The slot is not reachable by any reader until the caller
    /// publishes it by CAS-ing it into an OID head; the CAS is the
    /// publication point.
    pub fn allocate(
        &self,
        stamp: Stamp,
        prev: VersionPtr,
        payload: Option<&[u8]>,
    ) -> Result<VersionPtr> {
        let index = match self.free.lock().pop() {
            Some(index) => index,
            None => {
                let index = self.next.fetch_add(1, Ordering::Relaxed);
                self.ensure_capacity(index)?;
                index
            }
        };
        let chunks = self.chunks.read();
        let slot = Self::slot_of(&chunks, index)?;
        *slot.payload.write() = payload.map(Box::from);
        slot.prev.store(prev.raw(), Ordering::Relaxed);
        slot.pstamp.store(0, Ordering::Relaxed);
        slot.sstamp.store(Lsn::INVALID.as_u64(), Ordering::Relaxed);
        slot.stamp.store(stamp.raw(), Ordering::Release);
        Ok(VersionPtr(index))
    }

    fn ensure_capacity(&self, index: u64) -> Result<()> {
        let needed_chunks = index as usize / CHUNK_SLOTS + 1;
        if self.chunks.read().len() >= needed_chunks {
            return Ok(());
        }
        let _grow = self.grow.lock();
        let mut chunks = self.chunks.write();
        while chunks.len() < needed_chunks {
            let chunk: Vec<VersionSlot> = (0..CHUNK_SLOTS).map(|_| VersionSlot::vacant()).collect();
            chunks.push(Arc::new(chunk));
        }
        Ok(())
    }

    fn slot_of<'a>(
        chunks: &'a [Arc<Vec<VersionSlot>>],
        index: u64,
    ) -> Result<&'a VersionSlot> {
        let chunk = chunks
            .get(index as usize / CHUNK_SLOTS)
            .ok_or_else(|| Error::Internal(format!("version index {} out of bounds", index)))?;
        Ok(&chunk[index as usize % CHUNK_SLOTS])
    }

    fn with_slot<T>(&self, ptr: VersionPtr, f: impl FnOnce(&VersionSlot) -> T) -> T {
        debug_assert!(ptr.is_some());
        let chunks = self.chunks.read();
        let slot = Self::slot_of(&chunks, ptr.raw()).expect("dangling version pointer");
        f(slot)
    }

    /// The version's stamp word.
    pub fn stamp(&self, ptr: VersionPtr) -> Stamp {
        self.with_slot(ptr, |slot| Stamp::from_raw(slot.stamp.load(Ordering::Acquire)))
    }

    /// Rewrite the stamp. Used exactly once per version: either the
    /// commit rewrite (uncommitted → committed, release store so the
    /// payload publishes with it) or the abort marking.
    pub fn set_stamp(&self, ptr: VersionPtr, stamp: Stamp) {
        self.with_slot(ptr, |slot| slot.stamp.store(stamp.raw(), Ordering::Release));
    }

    /// The next-older version in the chain.
    pub fn prev(&self, ptr: VersionPtr) -> VersionPtr {
        self.with_slot(ptr, |slot| {
            VersionPtr::from_raw(slot.prev.load(Ordering::Acquire))
        })
    }

    /// Cut the back link of `ptr`, making it the chain tail.
    ///
    /// Only the vacuum path does this, and only once no live snapshot
    /// can see past `ptr`.
    pub fn sever_prev(&self, ptr: VersionPtr) -> VersionPtr {
        self.with_slot(ptr, |slot| {
            VersionPtr::from_raw(slot.prev.swap(VersionPtr::NIL.raw(), Ordering::AcqRel))
        })
    }

    /// Copy out the payload. `None` is a deletion tombstone.
    pub fn read_payload(&self, ptr: VersionPtr) -> Option<Vec<u8>> {
        self.with_slot(ptr, |slot| {
            slot.payload.read().as_ref().map(|bytes| bytes.to_vec())
        })
    }

    /// Replace the payload in place.
    ///
    /// Legal only while the version is still owned by the writing
    /// transaction; committed payloads are immutable.
    pub fn write_payload(&self, ptr: VersionPtr, payload: Option<&[u8]>) {
        self.with_slot(ptr, |slot| {
            *slot.payload.write() = payload.map(Box::from);
        });
    }

    /// Highest commit LSN observed reading this version.
    pub fn pstamp(&self, ptr: VersionPtr) -> Lsn {
        self.with_slot(ptr, |slot| Lsn::new(slot.pstamp.load(Ordering::Acquire)))
    }

    /// Raise the reader high-watermark to at least `lsn`.
    pub fn raise_pstamp(&self, ptr: VersionPtr, lsn: Lsn) {
        self.with_slot(ptr, |slot| {
            slot.pstamp.fetch_max(lsn.as_u64(), Ordering::AcqRel);
        });
    }

    /// Commit LSN of this version's overwriter, or [`Lsn::INVALID`]
    /// while it is still the newest committed state of its record.
    pub fn sstamp(&self, ptr: VersionPtr) -> Lsn {
        self.with_slot(ptr, |slot| Lsn::new(slot.sstamp.load(Ordering::Acquire)))
    }

    /// Record that the version was overwritten at `lsn`.
    pub fn set_sstamp(&self, ptr: VersionPtr, lsn: Lsn) {
        self.with_slot(ptr, |slot| {
            slot.sstamp.store(lsn.as_u64(), Ordering::Release);
        });
    }

    /// Queue the slot for recycling after the current epoch drains.
    pub fn defer_free(&self, ptr: VersionPtr) {
        debug_assert!(ptr.is_some());
        let epoch = self.epochs.defer(ptr.raw());
        trace!(version = %ptr, epoch, "version free deferred");
    }

    /// Advance the epoch clock and recycle every slot whose grace
    /// period has elapsed. Returns the number of slots recycled.
    pub fn reclaim(&self) -> usize {
        self.epochs.tick();
        let mut tokens = Vec::new();
        self.epochs.drain_reclaimable(&mut tokens);
        if tokens.is_empty() {
            return 0;
        }
        {
            let chunks = self.chunks.read();
            for &token in &tokens {
                if let Ok(slot) = Self::slot_of(&chunks, token) {
                    slot.reset();
                }
            }
        }
        let count = tokens.len();
        self.free.lock().extend(tokens);
        trace!(recycled = count, "version slots recycled");
        count
    }

    /// Number of slots ever allocated (recycled or not).
    pub fn allocated(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_core::{Lsn, Xid};

    fn store() -> VersionStore {
        VersionStore::new(Arc::new(EpochManager::new(2)))
    }

    #[test]
    fn allocate_then_read_back() {
        let store = store();
        let xid = Xid::from_parts(0, 1);
        let ptr = store
            .allocate(Stamp::owned(xid), VersionPtr::NIL, Some(b"hello"))
            .unwrap();
        assert_eq!(store.stamp(ptr).owner(), Some(xid));
        assert_eq!(store.prev(ptr), VersionPtr::NIL);
        assert_eq!(store.read_payload(ptr), Some(b"hello".to_vec()));
    }

    #[test]
    fn tombstone_payload_reads_none() {
        let store = store();
        let ptr = store
            .allocate(Stamp::owned(Xid::from_parts(0, 1)), VersionPtr::NIL, None)
            .unwrap();
        assert_eq!(store.read_payload(ptr), None);
    }

    #[test]
    fn commit_rewrite_is_visible() {
        let store = store();
        let ptr = store
            .allocate(
                Stamp::owned(Xid::from_parts(1, 1)),
                VersionPtr::NIL,
                Some(b"v"),
            )
            .unwrap();
        store.set_stamp(ptr, Stamp::committed(Lsn::new(17)));
        assert_eq!(store.stamp(ptr).lsn(), Some(Lsn::new(17)));
    }

    #[test]
    fn chains_link_through_prev() {
        let store = store();
        let old = store
            .allocate(Stamp::committed(Lsn::new(1)), VersionPtr::NIL, Some(b"a"))
            .unwrap();
        let new = store
            .allocate(Stamp::committed(Lsn::new(2)), old, Some(b"b"))
            .unwrap();
        assert_eq!(store.prev(new), old);
        assert_eq!(store.prev(old), VersionPtr::NIL);
    }

    #[test]
    fn deferred_slots_are_recycled_after_grace() {
        let store = store();
        let ptr = store
            .allocate(Stamp::owned(Xid::from_parts(0, 1)), VersionPtr::NIL, Some(b"x"))
            .unwrap();
        store.defer_free(ptr);
        assert_eq!(store.reclaim(), 0);
        let recycled = store.reclaim() + store.reclaim();
        assert_eq!(recycled, 1);

        // The freed slot is handed back out before the bump allocator
        // grows the arena again.
        let again = store
            .allocate(Stamp::owned(Xid::from_parts(0, 2)), VersionPtr::NIL, Some(b"y"))
            .unwrap();
        assert_eq!(again, ptr);
        assert_eq!(store.allocated(), 1);
    }

    #[test]
    fn sever_prev_returns_the_cut_tail() {
        let store = store();
        let old = store
            .allocate(Stamp::committed(Lsn::new(1)), VersionPtr::NIL, Some(b"a"))
            .unwrap();
        let new = store
            .allocate(Stamp::committed(Lsn::new(2)), old, Some(b"b"))
            .unwrap();
        assert_eq!(store.sever_prev(new), old);
        assert_eq!(store.prev(new), VersionPtr::NIL);
    }

    #[test]
    fn grows_across_chunk_boundaries() {
        let store = store();
        let mut last = VersionPtr::NIL;
        for i in 0..(CHUNK_SLOTS as u64 + 10) {
            last = store
                .allocate(Stamp::committed(Lsn::new(i)), last, Some(&i.to_be_bytes()))
                .unwrap();
        }
        assert_eq!(store.stamp(last).lsn(), Some(Lsn::new(CHUNK_SLOTS as u64 + 9)));
        let mut hops = 0;
        let mut cursor = last;
        while cursor.is_some() {
            cursor = store.prev(cursor);
            hops += 1;
        }
        assert_eq!(hops, CHUNK_SLOTS as u64 + 10);
    }
}
