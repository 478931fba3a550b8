//! Ordered key→OID index
//!
//! A leaf-structured ordered map satisfying the contract in
//! `cinder_core::traits`: byte-lexicographic ordering, stable leaf
//! identities, and a per-leaf version counter that strictly increases
//! on any mutation of that leaf. Point lookups, inserts, and both
//! scan directions surface the `(leaf, version)` pairs the
//! transaction layer records for phantom validation.
//!
//! The internal node discipline is deliberately simple — a fence-keyed
//! directory of flat leaf pages — because callers only depend on the
//! observation contract, not on the shape of the tree.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod leaf;

pub use leaf::LeafIndex;
