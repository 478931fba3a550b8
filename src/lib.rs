//! # Cinder
//!
//! An in-memory, multi-version OLTP storage engine core: ordered
//! tables over a versioned record store, with snapshot-isolation
//! variants (SI, SSI, SSN, MVOCC) sharing one transaction shape.
//!
//! # Quick Start
//!
//! ```
//! use cinder::{Config, Engine, Protocol, ScanAction, TxnOptions};
//!
//! fn main() -> cinder::Result<()> {
//!     let engine = Engine::new(Config::default())?;
//!     let table = engine.create_table("accounts")?;
//!
//!     // Write under the default protocol (snapshot isolation).
//!     let mut txn = engine.begin()?;
//!     table.put(&mut txn, b"alice", b"100")?;
//!     table.put(&mut txn, b"bob", b"250")?;
//!     engine.commit(txn)?;
//!
//!     // Read back under a read-only snapshot.
//!     let mut txn = engine.begin_with(TxnOptions::read_only())?;
//!     assert_eq!(table.get(&mut txn, b"alice")?, Some(b"100".to_vec()));
//!     let mut names = Vec::new();
//!     table.scan(&mut txn, b"", None, &mut |key, _value| {
//!         names.push(key.to_vec());
//!         ScanAction::Continue
//!     })?;
//!     assert_eq!(names, vec![b"alice".to_vec(), b"bob".to_vec()]);
//!     engine.commit(txn)?;
//!
//!     // Serializable variants are a per-transaction choice.
//!     let txn = engine.begin_with(TxnOptions::with_protocol(Protocol::Ssn))?;
//!     engine.commit(txn)?;
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency model
//!
//! Writers never block readers and readers never block writers: each
//! record is a chain of immutable versions behind a stable OID, and a
//! transaction reads the newest version committed at or before its
//! begin LSN. Write-write conflicts are detected at install time by a
//! CAS on the chain head; validation at commit adds, per protocol,
//! the SSN/SSI exclusion window, MVOCC read revalidation, and
//! phantom checks over recorded index-leaf observations. Memory is
//! reclaimed through epochs, never while a reader may still hold a
//! version pointer.
//!
//! Keys and values are opaque byte strings. Aborts are ordinary
//! [`Error`] values carrying the abort kind; they never take down
//! more than the failing transaction.
//!
//! The engine crates (`cinder-core`, `cinder-storage`, `cinder-index`,
//! `cinder-txn`, `cinder-log`, `cinder-engine`) are internal; only
//! the surface re-exported here is stable.

// Re-export the public API from cinder-engine.
pub use cinder_engine::*;
