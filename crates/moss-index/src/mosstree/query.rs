//! Point, range and existence queries.
//!
//! Reads never force maintenance: a query walks the tree and reconciles
//! materialized leaf entries with the pending buffers it passes, summing a
//! `+1` for every matching materialized or pending-insert occurrence and a
//! `-1` for every matching pending removal.

use std::cmp::Ordering;

use moss_common::types::{PackedKey, Rid, Schema};

use super::node::{Entry, NodeId};
use super::tree::MossTree;

impl MossTree {
    /// True if the exact `(key, rid)` pair is present.
    pub fn exists(&self, key: &PackedKey, rid: Rid) -> bool {
        assert!(rid.is_valid(), "existence check with the invalid rid sentinel");
        assert!(!key.is_null(), "existence check with the null key");
        if self.allows_duplicate {
            let probe = key.combine(rid);
            let hits = self.select(&probe, &probe);
            debug_assert!(hits.len() <= 1);
            !hits.is_empty()
        } else {
            self.select(key, key).contains(&rid)
        }
    }

    /// All rids stored under `key`, in ascending order.
    pub fn point(&self, key: &PackedKey) -> Vec<Rid> {
        assert!(!key.is_null(), "point query with the null key");
        if self.allows_duplicate {
            self.select(&key.combine(Rid::MIN), &key.combine(Rid::MAX))
        } else {
            self.select(key, key)
        }
    }

    /// All rids whose key falls in `[lo, hi]`, in ascending rid order.
    pub fn range(&self, lo: &PackedKey, hi: &PackedKey) -> Vec<Rid> {
        assert!(!lo.is_null() && !hi.is_null(), "range query with a null bound");
        assert!(
            self.schema.compare(lo, hi) != Ordering::Greater,
            "range bounds out of order"
        );
        if self.allows_duplicate {
            self.select(&lo.combine(Rid::MIN), &hi.combine(Rid::MAX))
        } else {
            self.select(lo, hi)
        }
    }

    /// Collects matching rids between two internal-key bounds (inclusive)
    /// and reconciles pending contributions.
    fn select(&self, lo: &PackedKey, hi: &PackedKey) -> Vec<Rid> {
        let mut plus: Vec<Rid> = Vec::new();
        let mut minus: Vec<Rid> = Vec::new();
        self.select_node(self.root, lo, hi, &mut plus, &mut minus);
        plus.sort_unstable();
        minus.sort_unstable();
        // multiset difference: every pending removal must cancel one hit
        let mut out = Vec::with_capacity(plus.len().saturating_sub(minus.len()));
        let mut mi = 0;
        for rid in plus {
            if mi < minus.len() && minus[mi] == rid {
                mi += 1;
            } else {
                out.push(rid);
            }
        }
        assert_eq!(mi, minus.len(), "pending removal without a matching entry");
        out
    }

    fn select_node(
        &self,
        id: NodeId,
        lo: &PackedKey,
        hi: &PackedKey,
        plus: &mut Vec<Rid>,
        minus: &mut Vec<Rid>,
    ) {
        let schema = &self.key_schema;
        let node = self.arena.get(id);

        // pending contributions staged at this level
        for e in &node.kvs_to_insert {
            if !e.is_tombstone() && in_range(schema, &e.key, lo, hi) {
                plus.push(e.value.rid().expect("pending entry without a rid"));
            }
        }
        for e in &node.kvs_to_remove {
            if !e.is_tombstone() && in_range(schema, &e.key, lo, hi) {
                minus.push(e.value.rid().expect("pending entry without a rid"));
            }
        }

        if node.is_leaf {
            let start = lower_bound(schema, &node.kvs, lo);
            for e in &node.kvs[start..] {
                if e.is_tombstone() {
                    continue;
                }
                if schema.compare(&e.key, hi) == Ordering::Greater {
                    break;
                }
                if in_range(schema, &e.key, lo, hi) {
                    plus.push(e.value.rid().expect("leaf entry without a rid"));
                }
            }
            for e in &node.kvs_unsorted {
                if !e.is_tombstone() && in_range(schema, &e.key, lo, hi) {
                    plus.push(e.value.rid().expect("leaf entry without a rid"));
                }
            }
        } else {
            // descend into every child whose bracket can intersect [lo, hi];
            // the bracket containing hi is included before the walk stops
            let start = lower_bound(schema, &node.kvs, lo);
            for e in &node.kvs[start..] {
                if e.is_tombstone() {
                    continue;
                }
                if let Some(child) = e.value.child() {
                    self.select_node(child, lo, hi, plus, minus);
                }
                if schema.compare(&e.key, hi) == Ordering::Greater {
                    break;
                }
            }
            // a pulled-up child in the overflow bucket has a known upper
            // bound but an unknown bracket start, so any bound past lo may
            // hold matches
            for e in &node.kvs_unsorted {
                if e.is_tombstone() {
                    continue;
                }
                if let Some(child) = e.value.child() {
                    if schema.compare(&e.key, lo) == Ordering::Greater {
                        self.select_node(child, lo, hi, plus, minus);
                    }
                }
            }
        }
    }
}

fn in_range(schema: &Schema, key: &PackedKey, lo: &PackedKey, hi: &PackedKey) -> bool {
    schema.compare(key, lo) != Ordering::Less && schema.compare(key, hi) != Ordering::Greater
}

/// First index whose key is not less than `key`.
///
/// Tolerates interspersed tombstones: a tombstoned probe borrows the nearest
/// valid entry to its left before comparing.
fn lower_bound(schema: &Schema, kvs: &[Entry], key: &PackedKey) -> usize {
    let mut lo = 0usize;
    let mut hi = kvs.len();
    while lo < hi {
        let mid = (lo + hi) / 2;
        let mut probe = mid;
        while probe > lo && kvs[probe].is_tombstone() {
            probe -= 1;
        }
        if kvs[probe].is_tombstone() {
            // nothing valid in [lo, mid]
            lo = mid + 1;
        } else if schema.compare(&kvs[probe].key, key) == Ordering::Less {
            lo = mid + 1;
        } else {
            hi = probe;
        }
    }
    lo
}
