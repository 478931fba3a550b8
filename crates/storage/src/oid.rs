//! OID indirection table
//!
//! Maps an OID to the head of its version chain. The table is a
//! grow-only array of single words: the head is mutated exclusively
//! by CAS, and an uncommitted head doubles as the exclusive write
//! intent on the whole chain.
//!
//! Allocation is extent-based to keep the global counter off the hot
//! path: each worker holds a private extent and refills it from the
//! shared bump counter only when it runs dry, so no two workers can
//! ever hand out the same OID.

use crate::version::VersionPtr;
use crate::worker::WorkerId;
use cinder_core::{Error, Oid, Result};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};

/// Entries per table chunk.
const CHUNK_ENTRIES: usize = 4096;

#[derive(Default)]
struct OidExtent {
    next: u64,
    remaining: u64,
}

/// Grow-only mapping from OID to version-chain head.
pub struct OidTable {
    chunks: RwLock<Vec<Box<[AtomicU64]>>>,
    bump: AtomicU64,
    grow: Mutex<()>,
    extents: Vec<Mutex<OidExtent>>,
    extent_size: u64,
}

impl OidTable {
    /// Create a table with per-worker extents of `extent_size` OIDs.
    pub fn new(workers: usize, extent_size: u64) -> Self {
        OidTable {
            chunks: RwLock::new(Vec::new()),
            bump: AtomicU64::new(0),
            grow: Mutex::new(()),
            extents: (0..workers).map(|_| Mutex::new(OidExtent::default())).collect(),
            extent_size,
        }
    }

    /// Allocate a fresh OID from the calling worker's extent.
    ///
    /// The returned OID's head is NIL until the first version is
    /// installed.
    pub fn alloc(&self, worker: WorkerId) -> Result<Oid> {
        let mut extent = self.extents[worker].lock();
        if extent.remaining == 0 {
            let start = self.bump.fetch_add(self.extent_size, Ordering::Relaxed);
            self.ensure_capacity(start + self.extent_size)?;
            extent.next = start;
            extent.remaining = self.extent_size;
        }
        let oid = Oid::new(extent.next);
        extent.next += 1;
        extent.remaining -= 1;
        Ok(oid)
    }

    fn ensure_capacity(&self, entries: u64) -> Result<()> {
        let needed_chunks = (entries as usize + CHUNK_ENTRIES - 1) / CHUNK_ENTRIES;
        if self.chunks.read().len() >= needed_chunks {
            return Ok(());
        }
        let _grow = self.grow.lock();
        let mut chunks = self.chunks.write();
        while chunks.len() < needed_chunks {
            let chunk: Vec<AtomicU64> = (0..CHUNK_ENTRIES)
                .map(|_| AtomicU64::new(VersionPtr::NIL.raw()))
                .collect();
            chunks.push(chunk.into_boxed_slice());
        }
        Ok(())
    }

    fn entry<T>(&self, oid: Oid, f: impl FnOnce(&AtomicU64) -> T) -> Result<T> {
        let chunks = self.chunks.read();
        let chunk = chunks
            .get(oid.as_u64() as usize / CHUNK_ENTRIES)
            .ok_or_else(|| Error::Internal(format!("{} beyond allocated table", oid)))?;
        Ok(f(&chunk[oid.as_u64() as usize % CHUNK_ENTRIES]))
    }

    /// Atomic load of the chain head.
    pub fn head(&self, oid: Oid) -> Result<VersionPtr> {
        self.entry(oid, |word| VersionPtr::from_raw(word.load(Ordering::Acquire)))
    }

    /// Single-word CAS of the chain head.
    ///
    /// Returns `true` if `expected` was still the head and `new` is
    /// now installed.
    pub fn cas_head(&self, oid: Oid, expected: VersionPtr, new: VersionPtr) -> Result<bool> {
        self.entry(oid, |word| {
            word.compare_exchange(
                expected.raw(),
                new.raw(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        })
    }

    /// Upper bound of OIDs handed out (extent-granular; individual
    /// OIDs inside a live extent may not be in use yet).
    pub fn allocated_bound(&self) -> u64 {
        self.bump.load(Ordering::Relaxed)
    }
}
