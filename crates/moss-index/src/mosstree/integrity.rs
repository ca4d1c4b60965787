//! Structural invariant checks.
//!
//! The checker walks the whole tree and asserts every invariant the
//! maintenance engine is supposed to uphold. A violation is a bug in the
//! engine, never a runtime condition to tolerate, so every failure panics.

use std::cmp::Ordering;

use moss_common::types::PackedKey;

use super::node::{Entry, NodeId, ParentLink, SlotIndex};
use super::tree::MossTree;

impl MossTree {
    /// Verifies key ordering, subtree bounds, parent links and occupancy
    /// accounting across the whole tree. Panics on the first violation.
    pub fn check_integrity(&self) {
        let root = self.arena.get(self.root);
        assert!(root.parent.is_none(), "root node carries a parent link");
        if !root.is_leaf {
            assert!(root.num_kvs >= 2, "internal root with fewer than two children");
        }
        self.check_node(self.root, None, &PackedKey::null());
    }

    fn check_node(&self, id: NodeId, lb: Option<&PackedKey>, ub: &PackedKey) {
        let schema = &self.key_schema;
        let node = self.arena.get(id);

        let live = node.kvs.iter().filter(|e| !e.is_tombstone()).count()
            + node.kvs_unsorted.iter().filter(|e| !e.is_tombstone()).count();
        assert_eq!(live, node.num_kvs, "occupancy count out of sync");
        if id != self.root {
            assert!(node.num_kvs >= 1, "non-root node rests empty");
            // the leftmost child of each parent may rest arbitrarily low;
            // everyone else stays within one entry of the minimum (split and
            // redistribute shares land one short on even branching factors)
            if !self.is_leftmost_child(id) {
                assert!(
                    node.num_kvs + 1 >= self.min_occupancy(),
                    "non-leftmost node rests below minimum occupancy"
                );
            }
        }
        assert!(node.num_kvs <= self.branching, "node rests above the branching factor");

        // pending entries must target this subtree's key range
        for e in node.kvs_to_insert.iter().chain(node.kvs_to_remove.iter()) {
            if e.is_tombstone() {
                continue;
            }
            assert!(e.value.rid().is_some(), "pending entry without a rid");
            self.check_bounds(&e.key, lb, ub);
        }

        if node.is_leaf {
            let mut last: Option<&PackedKey> = None;
            for e in &node.kvs {
                if e.is_tombstone() {
                    continue;
                }
                assert!(!e.key.is_null(), "leaf entry with the null key");
                assert!(e.value.rid().is_some(), "leaf entry without a rid");
                if let Some(prev) = last {
                    assert_eq!(
                        schema.compare(prev, &e.key),
                        Ordering::Less,
                        "leaf keys out of order"
                    );
                }
                self.check_bounds(&e.key, lb, ub);
                last = Some(&e.key);
            }
            for e in &node.kvs_unsorted {
                if e.is_tombstone() {
                    continue;
                }
                assert!(!e.key.is_null(), "leaf entry with the null key");
                assert!(e.value.rid().is_some(), "leaf entry without a rid");
                self.check_bounds(&e.key, lb, ub);
            }
        } else {
            let mut bracket_lb = lb;
            let mut last_valid: Option<&Entry> = None;
            for (slot, e) in node.kvs.iter().enumerate() {
                if e.is_tombstone() {
                    continue;
                }
                let child = e.value.child().expect("internal slot without a child");
                self.check_parent_link(child, id, SlotIndex::Sorted(slot));
                if let Some(prev) = last_valid {
                    assert_eq!(
                        schema.compare(&prev.key, &e.key),
                        Ordering::Less,
                        "routing keys out of order"
                    );
                }
                let child_ub = if e.key.is_null() {
                    ub
                } else {
                    // every routing key stays strictly inside the bracket
                    assert_eq!(
                        schema.compare(&e.key, ub),
                        Ordering::Less,
                        "routing key escapes its subtree bound"
                    );
                    &e.key
                };
                self.check_node(child, bracket_lb, child_ub);
                if !e.key.is_null() {
                    bracket_lb = Some(&e.key);
                }
                last_valid = Some(e);
            }
            let last = last_valid.expect("internal node without children");
            assert!(last.key.is_null(), "last routing slot is not the +inf sentinel");

            for (slot, e) in node.kvs_unsorted.iter().enumerate() {
                if e.is_tombstone() {
                    continue;
                }
                let child = e.value.child().expect("internal slot without a child");
                self.check_parent_link(child, id, SlotIndex::Unsorted(slot));
                let child_ub = if e.key.is_null() {
                    ub
                } else {
                    assert_eq!(
                        schema.compare(&e.key, ub),
                        Ordering::Less,
                        "routing key escapes its subtree bound"
                    );
                    &e.key
                };
                // a pulled-up child's bracket start is unknown until the
                // bucket is merged
                self.check_node(child, None, child_ub);
            }
        }
    }

    fn check_bounds(&self, key: &PackedKey, lb: Option<&PackedKey>, ub: &PackedKey) {
        let schema = &self.key_schema;
        assert_eq!(
            schema.compare(key, ub),
            Ordering::Less,
            "key escapes its subtree's upper bound"
        );
        if let Some(lb) = lb {
            assert_ne!(
                schema.compare(key, lb),
                Ordering::Less,
                "key escapes its subtree's lower bound"
            );
        }
    }

    fn check_parent_link(&self, child: NodeId, parent: NodeId, slot: SlotIndex) {
        let link = self.arena.get(child).parent;
        assert_eq!(
            link,
            Some(ParentLink { node: parent, slot }),
            "child's parent link does not point back at its slot"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mosstree::TreeConfig;
    use moss_common::types::{ColumnType, Rid};

    fn test_tree() -> MossTree {
        MossTree::with_config(
            vec![ColumnType::Int64],
            vec!["id".into()],
            true,
            TreeConfig::for_testing(),
        )
    }

    #[test]
    fn test_empty_tree_passes() {
        test_tree().check_integrity();
    }

    #[test]
    fn test_deep_tree_passes() {
        let mut tree = test_tree();
        for i in 0..500i64 {
            let k = tree.schema().pack(&[&i.to_string()]).unwrap();
            tree.insert(&k, Rid::new(i + 1), false);
        }
        assert!(tree.height() >= 2);
        tree.check_integrity();
        tree.consolidate();
        tree.check_integrity();
    }

    #[test]
    #[should_panic(expected = "occupancy count out of sync")]
    fn test_corrupted_count_is_caught() {
        let mut tree = test_tree();
        let k = tree.schema().pack(&["1"]).unwrap();
        tree.insert(&k, Rid::new(1), false);
        tree.consolidate();
        tree.arena.get_mut(tree.root).num_kvs += 1;
        tree.check_integrity();
    }
}
