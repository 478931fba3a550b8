//! Core types and contracts for Cinder
//!
//! This crate defines the foundational vocabulary shared by every
//! layer of the engine:
//! - Identity types: [`Oid`], [`Xid`], [`Lsn`]
//! - Version stamps: [`Stamp`] (one word, CAS-friendly)
//! - The error taxonomy and [`Result`] alias
//! - The ordered-map contract the transaction layer validates
//!   phantoms against ([`traits::OrderedMap`])
//!
//! Nothing in this crate allocates shared state; it is the dependency
//! floor of the workspace.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod stamp;
pub mod traits;
pub mod types;

pub use error::{AbortReason, Error, Result};
pub use stamp::Stamp;
pub use traits::{
    InsertResult, LeafMutation, NodeObservation, OrderedMap, RangeObserver, ScanAction,
};
pub use types::{Lsn, Oid, Protocol, TxnState, Xid};
