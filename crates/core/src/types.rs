//! Identity types for the engine core
//!
//! This module defines the three identities everything else is built
//! from:
//! - [`Oid`]: stable identity of a logical record
//! - [`Xid`]: short-lived identity of an in-flight transaction
//! - [`Lsn`]: log sequence number, the serialization clock

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable 64-bit identity of a logical record.
///
/// An OID is allocated on first insert and names the head slot of the
/// record's version chain in the OID table. OIDs are never reused
/// while the database is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Oid(u64);

impl Oid {
    /// Wrap a raw OID value.
    pub fn new(raw: u64) -> Self {
        Oid(raw)
    }

    /// The raw 64-bit value.
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oid:{}", self.0)
    }
}

/// Dense identity of an in-flight transaction.
///
/// An XID names a slot in the context registry plus a generation
/// counter so that a recycled slot never aliases a previous
/// transaction. The packed form fits in 63 bits, which lets a
/// [`Stamp`](crate::Stamp) carry an owner XID in a single word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Xid(u64);

impl Xid {
    const GEN_SHIFT: u32 = 32;

    /// Build an XID from a registry slot and its generation.
    ///
    /// The generation is truncated to 31 bits so the packed value
    /// stays below `1 << 63`.
    pub fn from_parts(slot: u32, generation: u32) -> Self {
        let generation = generation & 0x7fff_ffff;
        Xid(((generation as u64) << Self::GEN_SHIFT) | slot as u64)
    }

    /// The registry slot this XID occupies.
    #[inline]
    pub fn slot(&self) -> u32 {
        (self.0 & 0xffff_ffff) as u32
    }

    /// The slot generation at allocation time.
    #[inline]
    pub fn generation(&self) -> u32 {
        (self.0 >> Self::GEN_SHIFT) as u32
    }

    /// The packed 63-bit value.
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Rebuild an XID from its packed value.
    #[inline]
    pub fn from_u64(raw: u64) -> Self {
        Xid(raw)
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xid:{}.{}", self.slot(), self.generation())
    }
}

/// Log sequence number.
///
/// Monotone, non-decreasing, totally ordered across the process.
/// Produced only by the log; a committed transaction's end LSN is the
/// point at which it is linearized.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Lsn(u64);

impl Lsn {
    /// The zero LSN, older than every commit.
    pub const ZERO: Lsn = Lsn(0);

    /// Sentinel for "no LSN recorded". Compares greater than every
    /// real LSN.
    pub const INVALID: Lsn = Lsn(u64::MAX);

    /// Wrap a raw LSN value.
    pub fn new(raw: u64) -> Self {
        Lsn(raw)
    }

    /// The raw 64-bit value.
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whether this is a real LSN rather than the sentinel.
    #[inline]
    pub fn is_valid(&self) -> bool {
        *self != Lsn::INVALID
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "lsn:{}", self.0)
        } else {
            write!(f, "lsn:-")
        }
    }
}

/// Transaction lifecycle state.
///
/// Transitions: `Embryo → Active → Committing → {Committed, Aborted}`.
/// Terminal states are final. `Committing` is published so concurrent
/// readers that run into an uncommitted chain head can decide policy
/// (they skip; they never wait).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Allocated, no data access yet.
    Embryo,
    /// Executing reads and writes.
    Active,
    /// Commit protocol in progress; end LSN may already be assigned.
    Committing,
    /// Terminal: all writes are visible at the end LSN.
    Committed,
    /// Terminal: all writes have been unlinked or marked dead.
    Aborted,
}

impl TxnState {
    /// Encode for storage in an atomic word.
    #[inline]
    pub fn as_u8(self) -> u8 {
        match self {
            TxnState::Embryo => 0,
            TxnState::Active => 1,
            TxnState::Committing => 2,
            TxnState::Committed => 3,
            TxnState::Aborted => 4,
        }
    }

    /// Decode from an atomic word.
    ///
    /// # Panics
    ///
    /// Panics on a value that was never produced by [`as_u8`](Self::as_u8);
    /// that would mean a torn write, which the single-word encoding
    /// rules out.
    #[inline]
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TxnState::Embryo,
            1 => TxnState::Active,
            2 => TxnState::Committing,
            3 => TxnState::Committed,
            4 => TxnState::Aborted,
            other => panic!("invalid transaction state encoding: {}", other),
        }
    }

    /// Whether this state is terminal.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, TxnState::Committed | TxnState::Aborted)
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxnState::Embryo => "embryo",
            TxnState::Active => "active",
            TxnState::Committing => "committing",
            TxnState::Committed => "committed",
            TxnState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Concurrency-control protocol a transaction runs under.
///
/// The transaction record and the stores are protocol-agnostic; the
/// tag selects which validation path runs at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// Plain snapshot isolation. Write-write conflicts only.
    Si,
    /// Serializable snapshot isolation; shares the η/π exclusion
    /// check with SSN.
    Ssi,
    /// Serial safety net: tracks the youngest committed predecessor
    /// (η) and the oldest committed successor (π) and requires η < π
    /// at commit.
    Ssn,
    /// Multi-version OCC: the read set is revalidated against the
    /// begin snapshot at commit.
    Mvocc,
}

impl Protocol {
    /// Whether commit runs the η/π exclusion check.
    #[inline]
    pub fn uses_exclusion_window(&self) -> bool {
        matches!(self, Protocol::Ssi | Protocol::Ssn)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Si => "si",
            Protocol::Ssi => "ssi",
            Protocol::Ssn => "ssn",
            Protocol::Mvocc => "mvocc",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xid_roundtrips_slot_and_generation() {
        let xid = Xid::from_parts(17, 1042);
        assert_eq!(xid.slot(), 17);
        assert_eq!(xid.generation(), 1042);
        assert_eq!(Xid::from_u64(xid.as_u64()), xid);
    }

    #[test]
    fn xid_packed_value_fits_stamp_payload() {
        let xid = Xid::from_parts(u32::MAX, u32::MAX);
        assert!(xid.as_u64() < 1 << 63);
    }

    #[test]
    fn lsn_ordering_and_sentinel() {
        assert!(Lsn::ZERO < Lsn::new(1));
        assert!(Lsn::new(u64::MAX - 1) < Lsn::INVALID);
        assert!(!Lsn::INVALID.is_valid());
        assert!(Lsn::ZERO.is_valid());
    }

    #[test]
    fn txn_state_roundtrips_through_u8() {
        for state in [
            TxnState::Embryo,
            TxnState::Active,
            TxnState::Committing,
            TxnState::Committed,
            TxnState::Aborted,
        ] {
            assert_eq!(TxnState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn terminal_states() {
        assert!(TxnState::Committed.is_terminal());
        assert!(TxnState::Aborted.is_terminal());
        assert!(!TxnState::Committing.is_terminal());
    }

    #[test]
    fn exclusion_window_protocols() {
        assert!(Protocol::Ssn.uses_exclusion_window());
        assert!(Protocol::Ssi.uses_exclusion_window());
        assert!(!Protocol::Si.uses_exclusion_window());
        assert!(!Protocol::Mvocc.uses_exclusion_window());
    }
}
