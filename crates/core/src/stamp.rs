//! Single-word version stamps
//!
//! Every version carries one 64-bit stamp word that encodes which of
//! three states the version is in:
//!
//! - **committed at an LSN** — the high bit is clear and the low 63
//!   bits are the commit LSN;
//! - **uncommitted, owned by an XID** — the high bit is set and the
//!   low 63 bits are the packed owner XID;
//! - **aborted** — a reserved all-ones pattern, left behind when an
//!   aborting transaction could not unlink its version from the
//!   chain. Readers skip it.
//!
//! The word form makes the commit-time stamp rewrite a single release
//! store and lets readers snapshot a version's state with one load.

use crate::types::{Lsn, Xid};
use std::fmt;

const OWNED_BIT: u64 = 1 << 63;
const PAYLOAD_MASK: u64 = OWNED_BIT - 1;
const ABORTED_RAW: u64 = u64::MAX;

/// One-word version stamp. See the module docs for the encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stamp(u64);

impl Stamp {
    /// Stamp of a version whose owner aborted without unlinking it.
    pub const ABORTED: Stamp = Stamp(ABORTED_RAW);

    /// Stamp a version as committed at `lsn`.
    ///
    /// # Panics
    ///
    /// Panics if the LSN does not fit in 63 bits. The log allocates
    /// LSNs densely from zero, so this bound is unreachable in
    /// practice; hitting it means the clock itself is corrupt.
    pub fn committed(lsn: Lsn) -> Self {
        assert!(lsn.as_u64() <= PAYLOAD_MASK, "LSN overflows stamp payload");
        Stamp(lsn.as_u64())
    }

    /// Stamp a version as uncommitted, owned by `xid`.
    pub fn owned(xid: Xid) -> Self {
        debug_assert!(xid.as_u64() <= PAYLOAD_MASK);
        Stamp(OWNED_BIT | xid.as_u64())
    }

    /// Whether the version is committed.
    #[inline]
    pub fn is_committed(&self) -> bool {
        self.0 & OWNED_BIT == 0
    }

    /// Whether the version is an uncommitted write intent.
    #[inline]
    pub fn is_owned(&self) -> bool {
        self.0 & OWNED_BIT != 0 && self.0 != ABORTED_RAW
    }

    /// Whether the version belongs to a transaction that aborted.
    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.0 == ABORTED_RAW
    }

    /// The commit LSN, if committed.
    #[inline]
    pub fn lsn(&self) -> Option<Lsn> {
        self.is_committed().then(|| Lsn::new(self.0))
    }

    /// The owner XID, if uncommitted.
    #[inline]
    pub fn owner(&self) -> Option<Xid> {
        self.is_owned().then(|| Xid::from_u64(self.0 & PAYLOAD_MASK))
    }

    /// The raw word, for storage in an atomic.
    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Rebuild from a raw word previously produced by [`raw`](Self::raw).
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Stamp(raw)
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_aborted() {
            f.write_str("stamp:aborted")
        } else if let Some(lsn) = self.lsn() {
            write!(f, "stamp:@{}", lsn.as_u64())
        } else {
            write!(f, "stamp:{}", self.owner().expect("owned stamp"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn committed_stamp_exposes_lsn() {
        let stamp = Stamp::committed(Lsn::new(42));
        assert!(stamp.is_committed());
        assert!(!stamp.is_owned());
        assert!(!stamp.is_aborted());
        assert_eq!(stamp.lsn(), Some(Lsn::new(42)));
        assert_eq!(stamp.owner(), None);
    }

    #[test]
    fn owned_stamp_exposes_owner() {
        let xid = Xid::from_parts(3, 7);
        let stamp = Stamp::owned(xid);
        assert!(stamp.is_owned());
        assert!(!stamp.is_committed());
        assert_eq!(stamp.owner(), Some(xid));
        assert_eq!(stamp.lsn(), None);
    }

    #[test]
    fn aborted_stamp_is_neither_committed_nor_owned() {
        let stamp = Stamp::ABORTED;
        assert!(stamp.is_aborted());
        assert!(!stamp.is_committed());
        assert!(!stamp.is_owned());
    }

    proptest! {
        #[test]
        fn raw_roundtrip_preserves_classification(word in any::<u64>()) {
            let stamp = Stamp::from_raw(word);
            let back = Stamp::from_raw(stamp.raw());
            prop_assert_eq!(stamp, back);
            // Exactly one classification holds.
            let classes = [stamp.is_committed(), stamp.is_owned(), stamp.is_aborted()];
            prop_assert_eq!(classes.iter().filter(|c| **c).count(), 1);
        }

        #[test]
        fn committed_lsn_roundtrip(lsn in 0u64..(1 << 63)) {
            let stamp = Stamp::committed(Lsn::new(lsn));
            prop_assert_eq!(stamp.lsn(), Some(Lsn::new(lsn)));
        }
    }
}
