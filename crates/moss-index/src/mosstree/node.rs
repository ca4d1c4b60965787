//! Node layout for the MossTree.
//!
//! Leaves and internal nodes share one layout: a sorted entry vector, an
//! overflow bucket for entries not yet merged into sorted order, and two
//! pending buffers staging insertions and removals targeted at the node's
//! subtree. For internal nodes the last sorted entry carries the null key
//! (the plus-infinity sentinel) and routes everything not bounded by an
//! earlier slot.

use moss_common::types::{PackedKey, Rid};
use std::fmt;

/// Index of a node inside the tree's arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(u32);

impl NodeId {
    /// Invalid node id, used as the missing-neighbor sentinel.
    pub const INVALID: Self = Self(u32::MAX);

    pub fn from_usize(index: usize) -> Self {
        debug_assert!(index < u32::MAX as usize);
        Self(index as u32)
    }

    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "NodeId(INVALID)")
        } else {
            write!(f, "NodeId({})", self.0)
        }
    }
}

/// Payload of an entry: a child reference above the leaf level, a record id
/// at the leaf level, or the shared invalidation sentinel.
///
/// Using one `Tombstone` variant for both levels keeps the "invalid child
/// iff invalid rid" equivalence by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotValue {
    Child(NodeId),
    Rid(Rid),
    Tombstone,
}

impl SlotValue {
    pub fn is_tombstone(self) -> bool {
        matches!(self, SlotValue::Tombstone)
    }

    pub fn child(self) -> Option<NodeId> {
        match self {
            SlotValue::Child(id) => Some(id),
            _ => None,
        }
    }

    pub fn rid(self) -> Option<Rid> {
        match self {
            SlotValue::Rid(rid) => Some(rid),
            _ => None,
        }
    }
}

/// A key paired with its payload.
///
/// Invalidation replaces only the payload; the key keeps its value so a
/// sorted vector stays sorted around resting tombstones.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub key: PackedKey,
    pub value: SlotValue,
}

impl Entry {
    /// An entry holding a record id; also the shape of pending entries.
    pub fn rid(key: PackedKey, rid: Rid) -> Self {
        Self {
            key,
            value: SlotValue::Rid(rid),
        }
    }

    /// A routing entry bounding a child subtree.
    pub fn child(key: PackedKey, child: NodeId) -> Self {
        Self {
            key,
            value: SlotValue::Child(child),
        }
    }

    /// The plus-infinity routing slot.
    pub fn infinity(child: NodeId) -> Self {
        Self {
            key: PackedKey::null(),
            value: SlotValue::Child(child),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_tombstone()
    }

    pub fn invalidate(&mut self) {
        self.value = SlotValue::Tombstone;
    }
}

/// Which of a node's entry vectors a parent link points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotIndex {
    Sorted(usize),
    Unsorted(usize),
}

/// Back-reference from a child to the slot in its parent that owns it.
///
/// Re-seated whenever entry positions change (sort, split, merge), so it is
/// only trusted after the parent's last compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ParentLink {
    pub node: NodeId,
    pub slot: SlotIndex,
}

/// One tree node; leaves and internal nodes share the layout.
#[derive(Debug)]
pub(crate) struct Node {
    pub is_leaf: bool,
    /// Sorted, materialized entries.
    pub kvs: Vec<Entry>,
    /// Overflow bucket: valid entries not yet merged into `kvs`.
    pub kvs_unsorted: Vec<Entry>,
    /// Pending insertions targeted at this subtree.
    pub kvs_to_insert: Vec<Entry>,
    /// Pending removals targeted at this subtree.
    pub kvs_to_remove: Vec<Entry>,
    /// Count of valid entries in `kvs` plus `kvs_unsorted`.
    pub num_kvs: usize,
    /// Slot in the parent that owns this node; `None` for the root.
    pub parent: Option<ParentLink>,
    /// Left neighbor on this level.
    pub prev: NodeId,
    /// Right neighbor on this level.
    pub next: NodeId,
}

impl Node {
    /// Creates an empty node with capacity reserved for a full complement of
    /// entries. Auxiliary buffers reserve twice the lazy cap so merges do not
    /// reallocate mid-flight.
    pub fn new(is_leaf: bool, branching: usize, lazy_cap: usize) -> Self {
        Self {
            is_leaf,
            kvs: Vec::with_capacity(branching + 2 * lazy_cap),
            kvs_unsorted: Vec::with_capacity(2 * lazy_cap),
            kvs_to_insert: Vec::with_capacity(2 * lazy_cap),
            kvs_to_remove: Vec::with_capacity(2 * lazy_cap),
            num_kvs: 0,
            parent: None,
            prev: NodeId::INVALID,
            next: NodeId::INVALID,
        }
    }

    /// The pending buffer selected by direction.
    pub fn buffer_mut(&mut self, for_insert: bool) -> &mut Vec<Entry> {
        if for_insert {
            &mut self.kvs_to_insert
        } else {
            &mut self.kvs_to_remove
        }
    }

    /// Total entries staged in both pending buffers.
    pub fn pending_len(&self) -> usize {
        self.kvs_to_insert.len() + self.kvs_to_remove.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_sentinel() {
        let id = NodeId::from_usize(3);
        assert!(id.is_valid());
        assert_eq!(id.as_usize(), 3);
        assert!(!NodeId::INVALID.is_valid());
        assert_eq!(format!("{:?}", NodeId::INVALID), "NodeId(INVALID)");
    }

    #[test]
    fn test_slot_value() {
        let child = SlotValue::Child(NodeId::from_usize(1));
        assert_eq!(child.child(), Some(NodeId::from_usize(1)));
        assert_eq!(child.rid(), None);
        assert!(!child.is_tombstone());

        let rid = SlotValue::Rid(Rid::new(7));
        assert_eq!(rid.rid(), Some(Rid::new(7)));
        assert_eq!(rid.child(), None);

        assert!(SlotValue::Tombstone.is_tombstone());
    }

    #[test]
    fn test_entry_invalidate_keeps_key() {
        let mut entry = Entry::rid(PackedKey::null(), Rid::new(1));
        entry.invalidate();
        assert!(entry.is_tombstone());
        assert!(entry.key.is_null());
    }

    #[test]
    fn test_node_reserves() {
        let node = Node::new(true, 16, 4);
        assert!(node.kvs.capacity() >= 24);
        assert!(node.kvs_unsorted.capacity() >= 8);
        assert!(node.kvs_to_insert.capacity() >= 8);
        assert!(node.kvs_to_remove.capacity() >= 8);
        assert_eq!(node.num_kvs, 0);
        assert!(!node.prev.is_valid());
        assert!(!node.next.is_valid());
    }

    #[test]
    fn test_buffer_selection() {
        let mut node = Node::new(true, 4, 2);
        node.buffer_mut(true).push(Entry::rid(PackedKey::null(), Rid::new(1)));
        node.buffer_mut(false).push(Entry::rid(PackedKey::null(), Rid::new(2)));
        assert_eq!(node.kvs_to_insert.len(), 1);
        assert_eq!(node.kvs_to_remove.len(), 1);
        assert_eq!(node.pending_len(), 2);
    }
}
