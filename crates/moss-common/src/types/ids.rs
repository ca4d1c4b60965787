//! Core identifier types for MossDB.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of different id kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Record identifier - uniquely identifies a record referenced by an index.
///
/// Rids are opaque to the index: the caller chooses them and the index
/// stores and returns them verbatim. The value `-1` is reserved as the
/// invalidation sentinel and must never be supplied by callers.
///
/// # Example
///
/// ```rust
/// use moss_common::types::Rid;
///
/// let rid = Rid::new(42);
/// assert_eq!(rid.as_i64(), 42);
/// assert!(rid.is_valid());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Rid(i64);

impl Rid {
    /// Invalid rid constant, used as the tombstone sentinel.
    pub const INVALID: Self = Self(-1);

    /// Smallest representable rid; lower bound for rid-suffixed key ranges.
    pub const MIN: Self = Self(i64::MIN);

    /// Largest representable rid; upper bound for rid-suffixed key ranges.
    pub const MAX: Self = Self(i64::MAX);

    /// Creates a new `Rid` from a raw i64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw i64 value.
    #[inline]
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Checks if this is a valid rid.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "Rid(INVALID)")
        } else {
            write!(f, "Rid({})", self.0)
        }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Rid {
    #[inline]
    fn from(id: i64) -> Self {
        Self::new(id)
    }
}

impl From<Rid> for i64 {
    #[inline]
    fn from(id: Rid) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rid() {
        let rid = Rid::new(42);
        assert_eq!(rid.as_i64(), 42);
        assert!(rid.is_valid());
        assert!(!Rid::INVALID.is_valid());
    }

    #[test]
    fn test_rid_bounds() {
        assert!(Rid::MIN < Rid::INVALID);
        assert!(Rid::INVALID < Rid::MAX);
        assert!(Rid::MIN.is_valid());
        assert!(Rid::MAX.is_valid());
    }

    #[test]
    fn test_ordering() {
        assert!(Rid::new(1) < Rid::new(2));
        assert!(Rid::new(-5) < Rid::new(0));
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", Rid::new(7)), "Rid(7)");
        assert_eq!(format!("{:?}", Rid::INVALID), "Rid(INVALID)");
    }
}
