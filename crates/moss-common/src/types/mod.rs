//! Type definitions for MossDB.
//!
//! This module contains all core type definitions used across the index.

mod hashed;
mod ids;
mod packed;
mod temporal;

pub use hashed::HashedInt;
pub use ids::Rid;
pub use packed::{ColumnType, Datum, PackedKey, Schema};
pub use temporal::{Date, DateTime};
