//! Error handling for MossDB.
//!
//! This module provides the unified error type used across MossDB
//! components. Structural invariant violations inside the index are
//! programmer errors and abort via assertions instead of surfacing here.

use thiserror::Error;

/// Result type alias for MossDB operations.
pub type MossResult<T> = std::result::Result<T, MossError>;

/// Errors that can occur in MossDB operations.
#[derive(Debug, Error)]
pub enum MossError {
    /// A packed row did not match the schema's column count.
    #[error("expected {expected} columns, found {found}")]
    ColumnCountMismatch {
        /// Number of columns declared by the schema.
        expected: usize,
        /// Number of columns supplied by the caller.
        found: usize,
    },

    /// A column value could not be parsed as its declared type.
    #[error("column {index} ({type_name}): cannot parse {value:?}")]
    ColumnParse {
        /// Zero-based column index.
        index: usize,
        /// Name of the declared column type.
        type_name: &'static str,
        /// The offending input.
        value: String,
    },
}
