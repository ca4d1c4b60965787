//! System-wide constants for MossDB.
//!
//! This module defines constants used across the index engine.

// =============================================================================
// Node Sizing
// =============================================================================

/// Default byte budget for a single index node (4 KB).
///
/// Nodes are sized as if they were disk blocks even though the index is
/// in-memory; the branching factor and lazy-buffer cap are derived from this
/// budget.
pub const BLOCK_SIZE: usize = 4 * 1024;

/// Minimum node byte budget accepted by a tree configuration.
pub const MIN_BLOCK_SIZE: usize = 256;

/// Maximum node byte budget accepted by a tree configuration.
pub const MAX_BLOCK_SIZE: usize = 64 * 1024;

/// Packed key widths are rounded up to this alignment when budgeting node
/// space.
pub const KEY_ALIGN: usize = 4;

// =============================================================================
// Hashed Columns
// =============================================================================

/// Base of the polynomial rolling hash behind `HashedInt` columns.
pub const HASH_BASE: i64 = 1_000_000_007;

/// Modulus of the polynomial rolling hash behind `HashedInt` columns.
pub const HASH_MOD: i64 = 1_000_000_009;
