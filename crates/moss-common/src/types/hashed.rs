//! Hashed string columns.
//!
//! A `HashedInt` coerces a string into an integer key using a polynomial
//! rolling hash, so string-valued columns can participate in fixed-width
//! packed keys at the cost of a (negligible) collision probability.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{HASH_BASE, HASH_MOD};

/// A precomputed rolling hash of a string, compared as an `i64`.
///
/// # Example
///
/// ```rust
/// use moss_common::types::HashedInt;
///
/// assert_eq!(HashedInt::hash_of("a").value(), 97);
/// assert_eq!(HashedInt::hash_of(""), HashedInt::new(0));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct HashedInt(i64);

impl HashedInt {
    /// Wraps an already-computed hash value.
    #[inline]
    #[must_use]
    pub const fn new(hash: i64) -> Self {
        Self(hash)
    }

    /// Returns the raw hash value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// Hashes a string with the polynomial rolling hash.
    #[must_use]
    pub fn hash_of(s: &str) -> Self {
        let mut hash: i64 = 0;
        for byte in s.bytes() {
            hash = (hash * HASH_BASE + i64::from(byte)) % HASH_MOD;
        }
        Self(hash)
    }
}

impl fmt::Debug for HashedInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashedInt({})", self.0)
    }
}

impl fmt::Display for HashedInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for HashedInt {
    #[inline]
    fn from(hash: i64) -> Self {
        Self::new(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_string() {
        assert_eq!(HashedInt::hash_of("").value(), 0);
    }

    #[test]
    fn test_single_byte() {
        assert_eq!(HashedInt::hash_of("a").value(), i64::from(b'a'));
    }

    #[test]
    fn test_two_bytes() {
        let expected = (i64::from(b'a') * HASH_BASE + i64::from(b'b')) % HASH_MOD;
        assert_eq!(HashedInt::hash_of("ab").value(), expected);
    }

    #[test]
    fn test_hash_stays_in_range() {
        let hash = HashedInt::hash_of("a somewhat longer input string to fold repeatedly");
        assert!(hash.value() >= 0);
        assert!(hash.value() < HASH_MOD);
    }

    #[test]
    fn test_distinct_inputs() {
        assert_ne!(HashedInt::hash_of("ab"), HashedInt::hash_of("ba"));
    }
}
