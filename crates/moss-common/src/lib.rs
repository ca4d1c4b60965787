//! # moss-common
//!
//! Common types and utilities for MossDB.
//!
//! This crate provides the foundational types used across all MossDB
//! components. It includes:
//!
//! - **Types**: record ids ([`types::Rid`]), typed column values
//!   ([`types::Datum`], [`types::Date`], [`types::DateTime`],
//!   [`types::HashedInt`]) and the composite-key codec ([`types::Schema`],
//!   [`types::PackedKey`])
//! - **Errors**: unified error handling with [`MossError`]
//! - **Constants**: system-wide constants and limits
//!
//! ## Example
//!
//! ```rust
//! use moss_common::types::{ColumnType, Rid, Schema};
//!
//! let schema = Schema::new(vec![ColumnType::Int64, ColumnType::Int32]);
//! let key = schema.pack(&["42", "7"]).unwrap();
//! let rid = Rid::new(1);
//! assert!(rid.is_valid());
//! assert_eq!(key.width(), schema.width());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use error::{MossError, MossResult};
pub use types::{ColumnType, Date, DateTime, Datum, HashedInt, PackedKey, Rid, Schema};
