//! Engine façade for Cinder
//!
//! This crate assembles the lower layers into the embeddable engine:
//! - [`Engine`]: owns the log, the transaction layer, and the table
//!   catalog; creates tables, begins transactions, commits and
//!   aborts them, and drives reclamation.
//! - [`Table`]: a named ordered index; all data operations go through
//!   a transaction.
//! - [`Config`]: sizing and protocol defaults, validated at init.
//!
//! The engine is the only component that knows about every layer;
//! nothing below it reaches across. Keys and values are opaque byte
//! strings throughout.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod database;
pub mod stats;
pub mod table;

pub use config::Config;
pub use database::{Engine, TableKind, TxnOptions};
pub use stats::{EngineStats, StatsSnapshot};
pub use table::Table;

// The vocabulary callers need alongside the engine.
pub use cinder_core::{AbortReason, Error, Lsn, Protocol, Result, ScanAction};
pub use cinder_txn::{InsertOutcome, Transaction};
