//! # moss-index
//!
//! MossTree index engine for MossDB.
//!
//! This crate implements an in-memory ordered index for composite typed
//! keys, organized as a buffered B+-tree:
//! - Per-node lazy staging buffers defer insertions and deletions until they
//!   amortize into bulk pushes toward the leaves
//! - Matching pending insert/remove pairs cancel before ever reaching a leaf
//! - Queries reconcile pending and materialized state on the fly

#![warn(missing_docs)]
#![warn(clippy::all)]

/// MossTree implementation
pub mod mosstree;

pub use mosstree::{MossTree, TreeConfig, TreeStats};
