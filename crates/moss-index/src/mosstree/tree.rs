//! The MossTree: construction, mutation entry points, and the lazy
//! maintenance engine.
//!
//! A mutation is appended as a pending entry in the root's insert (or
//! remove) buffer and the root is re-maintained. Maintenance pushes oversize
//! buffers down one level at a time, cancelling matching insert/remove pairs
//! along the way, and repairs structure (split, merge, redistribute) on the
//! way back up. A logical key is *present* when its leaf/materialized
//! occurrences plus pending insertions minus pending removals along its root
//! path balance to one.

use std::cmp::Ordering;
use std::mem;

use moss_common::types::{ColumnType, PackedKey, Rid, Schema};
use tracing::{debug, trace};

use super::arena::NodeArena;
use super::config::TreeConfig;
use super::node::{Entry, Node, NodeId, ParentLink, SlotIndex, SlotValue};

/// Counters for structural maintenance events.
///
/// `child_stages` counts every batch handed from a node to one of its
/// children; a workload whose pending pairs cancel at the root leaves it
/// untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeStats {
    /// Node splits performed.
    pub splits: usize,
    /// Sibling merges performed.
    pub merges: usize,
    /// Entry redistributions between siblings.
    pub redistributes: usize,
    /// Emptied nodes unlinked from their level.
    pub unlinks: usize,
    /// Pending batches staged into a child node.
    pub child_stages: usize,
}

/// Outcome of maintaining a subtree, reported to the caller.
#[derive(Default)]
struct MaintainResult {
    /// How many of the caller's child slots were invalidated by merges.
    count_merged: usize,
    /// A new left sibling to seat in the caller, produced by a split.
    kv_to_insert: Option<Entry>,
}

/// An in-memory ordered index over composite typed keys, organized as a
/// buffered B+-tree.
pub struct MossTree {
    pub(crate) schema: Schema,
    pub(crate) key_schema: Schema,
    names: Vec<String>,
    pub(crate) allows_duplicate: bool,
    config: TreeConfig,
    pub(crate) branching: usize,
    lazy_cap: usize,
    pub(crate) arena: NodeArena,
    pub(crate) root: NodeId,
    stats: TreeStats,
}

impl MossTree {
    /// Creates an index over the given column types with the default
    /// configuration.
    ///
    /// When `allows_duplicate` is set, an `Int64` rid column is appended to
    /// the internal key so every stored key is unique and removal of a
    /// specific `(key, rid)` pair is precise.
    #[must_use]
    pub fn new(types: Vec<ColumnType>, names: Vec<String>, allows_duplicate: bool) -> Self {
        Self::with_config(types, names, allows_duplicate, TreeConfig::default())
    }

    /// Creates an index with an explicit configuration.
    #[must_use]
    pub fn with_config(
        types: Vec<ColumnType>,
        names: Vec<String>,
        allows_duplicate: bool,
        config: TreeConfig,
    ) -> Self {
        let schema = Schema::new(types);
        let key_schema = if allows_duplicate {
            schema.with_rid_suffix()
        } else {
            schema.clone()
        };
        let branching = config.branching_factor(key_schema.width());
        let lazy_cap = TreeConfig::lazy_cap(branching);
        let mut arena = NodeArena::new();
        let root = arena.alloc(Node::new(true, branching, lazy_cap));
        debug!(branching, lazy_cap, "created index");
        Self {
            schema,
            key_schema,
            names,
            allows_duplicate,
            config,
            branching,
            lazy_cap,
            arena,
            root,
            stats: TreeStats::default(),
        }
    }

    /// The user-facing key schema (without the internal rid suffix).
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Column names supplied at construction.
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    /// Whether duplicate keys (with distinct rids) are accepted.
    #[must_use]
    pub fn allows_duplicate(&self) -> bool {
        self.allows_duplicate
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Maximum number of entries a node holds before it splits.
    #[must_use]
    pub fn branching_factor(&self) -> usize {
        self.branching
    }

    /// Maximum number of pending entries a node buffers before pushing them
    /// down.
    #[must_use]
    pub fn lazy_cap(&self) -> usize {
        self.lazy_cap
    }

    /// Structural maintenance counters.
    #[must_use]
    pub fn stats(&self) -> TreeStats {
        self.stats
    }

    /// Number of live nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Number of levels above the leaves (zero while the root is a leaf).
    #[must_use]
    pub fn height(&self) -> usize {
        let mut height = 0;
        let mut id = self.root;
        while !self.arena.get(id).is_leaf {
            height += 1;
            let node = self.arena.get(id);
            id = node
                .kvs
                .iter()
                .chain(node.kvs_unsorted.iter())
                .find_map(|e| e.value.child())
                .expect("internal node without children");
        }
        height
    }

    /// True when no entry is stored and nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let root = self.arena.get(self.root);
        root.is_leaf && root.num_kvs == 0 && root.pending_len() == 0
    }

    /// Total entries currently staged in pending buffers anywhere in the
    /// tree.
    #[must_use]
    pub fn pending_ops(&self) -> usize {
        self.arena.iter().map(|n| n.pending_len()).sum()
    }

    // =========================================================================
    // Mutation entry points
    // =========================================================================

    /// Inserts `(key, rid)`.
    ///
    /// With `check` set, an already-present key (or `(key, rid)` pair on a
    /// duplicate-allowing index) is rejected and `false` is returned.
    pub fn insert(&mut self, key: &PackedKey, rid: Rid, check: bool) -> bool {
        assert!(rid.is_valid(), "insert with the invalid rid sentinel");
        assert!(!key.is_null(), "insert with the null key");
        assert_eq!(key.width(), self.schema.width(), "key does not match the index schema");
        if check {
            let taken = if self.allows_duplicate {
                self.exists(key, rid)
            } else {
                !self.point(key).is_empty()
            };
            if taken {
                return false;
            }
        }
        let entry = Entry::rid(self.internal_key(key, rid), rid);
        self.arena.get_mut(self.root).kvs_to_insert.push(entry);
        let res = self.maintain(self.root);
        self.maintain_root(res);
        true
    }

    /// Removes `(key, rid)`.
    ///
    /// With `check` set, an absent pair is reported by returning `false`
    /// without staging anything. Without the check the pair must be present:
    /// an unmatched pending removal is a contract violation surfaced by the
    /// next query that meets it.
    pub fn remove(&mut self, key: &PackedKey, rid: Rid, check: bool) -> bool {
        assert!(rid.is_valid(), "remove with the invalid rid sentinel");
        assert!(!key.is_null(), "remove with the null key");
        assert_eq!(key.width(), self.schema.width(), "key does not match the index schema");
        if check && !self.exists(key, rid) {
            return false;
        }
        let entry = Entry::rid(self.internal_key(key, rid), rid);
        self.arena.get_mut(self.root).kvs_to_remove.push(entry);
        let res = self.maintain(self.root);
        self.maintain_root(res);
        true
    }

    /// Pushes every pending buffer down and applies it at the leaves,
    /// leaving the whole tree materialized.
    pub fn consolidate(&mut self) {
        let res = self.reconcile(self.root, true);
        self.maintain_root(res);
    }

    fn internal_key(&self, key: &PackedKey, rid: Rid) -> PackedKey {
        if self.allows_duplicate {
            key.combine(rid)
        } else {
            key.clone()
        }
    }

    /// Minimum occupancy structural repair restores toward: `ceil((B+1)/2)`.
    pub(crate) fn min_occupancy(&self) -> usize {
        (self.branching + 2) / 2
    }

    /// True when the node has no left sibling under the same parent: its
    /// level predecessor is absent or is the last child of the previous
    /// parent.
    pub(crate) fn is_leftmost_child(&self, id: NodeId) -> bool {
        let prev = self.arena.get(id).prev;
        !prev.is_valid() || {
            let link = self
                .arena
                .get(prev)
                .parent
                .expect("linked node without a parent");
            self.slot_entry(link).key.is_null()
        }
    }

    // =========================================================================
    // Lazy maintenance engine
    // =========================================================================

    /// Re-establishes a node's invariants after its buffers were modified.
    ///
    /// Cheap when everything is within the lazy caps; otherwise reconciles
    /// the node and repairs structure.
    fn maintain(&mut self, id: NodeId) -> MaintainResult {
        let needs_sort = {
            let node = self.arena.get(id);
            node.kvs.len() > self.branching || node.kvs_unsorted.len() > self.lazy_cap
        };
        if needs_sort {
            self.sort_kvs(id);
        }
        let within_cap = {
            let node = self.arena.get(id);
            node.kvs_to_insert.len() <= self.lazy_cap && node.kvs_to_remove.len() <= self.lazy_cap
        };
        if within_cap {
            return MaintainResult::default();
        }
        self.reconcile(id, false)
    }

    /// Cancels pending pairs, moves buffers toward the leaves and repairs
    /// structure. With `deep`, descends into every child so no pending entry
    /// survives anywhere in the subtree.
    fn reconcile(&mut self, id: NodeId, deep: bool) -> MaintainResult {
        {
            let schema = &self.key_schema;
            let node = self.arena.get_mut(id);
            invalidate_duplicate(schema, &mut node.kvs_to_insert, &mut node.kvs_to_remove);
            node.kvs_to_insert.retain(|e| !e.is_tombstone());
            node.kvs_to_remove.retain(|e| !e.is_tombstone());
        }
        if self.arena.get(id).is_leaf {
            self.apply_leaf(id);
        } else {
            let push_insert = {
                let node = self.arena.get(id);
                !node.kvs_to_insert.is_empty()
                    && (deep || node.kvs_to_insert.len() > self.lazy_cap)
            };
            if push_insert {
                self.push(id, true);
            }
            let push_remove = {
                let node = self.arena.get(id);
                !node.kvs_to_remove.is_empty()
                    && (deep || node.kvs_to_remove.len() > self.lazy_cap)
            };
            if push_remove {
                self.push(id, false);
            }
            if deep {
                self.descend_all(id);
            }
        }
        if id != self.root && self.arena.get(id).num_kvs < self.min_occupancy() {
            if let Some(res) = self.handle_underflow(id) {
                return res;
            }
        }
        if self.arena.get(id).num_kvs > self.branching {
            return self.split(id);
        }
        MaintainResult::default()
    }

    /// Merges the overflow bucket into the sorted entries, compacts
    /// tombstones away and re-seats the children's parent links.
    fn sort_kvs(&mut self, id: NodeId) {
        {
            let schema = &self.key_schema;
            let node = self.arena.get_mut(id);
            if !node.kvs_unsorted.is_empty() {
                node.kvs_unsorted.sort_by(|a, b| entry_cmp(schema, a, b));
                let sorted = mem::take(&mut node.kvs);
                let unsorted = mem::take(&mut node.kvs_unsorted);
                node.kvs = merge_sorted(schema, sorted, unsorted);
            }
            node.kvs.retain(|e| !e.is_tombstone());
            assert_eq!(node.kvs.len(), node.num_kvs, "occupancy count out of sync");
        }
        let seats: Vec<(NodeId, usize)> = {
            let node = self.arena.get(id);
            if node.is_leaf {
                Vec::new()
            } else {
                node.kvs
                    .iter()
                    .enumerate()
                    .filter_map(|(i, e)| e.value.child().map(|c| (c, i)))
                    .collect()
            }
        };
        for (child, slot) in seats {
            self.arena.get_mut(child).parent = Some(ParentLink {
                node: id,
                slot: SlotIndex::Sorted(slot),
            });
        }
    }

    /// Applies a leaf's pending buffers to its materialized entries and
    /// clears them.
    fn apply_leaf(&mut self, id: NodeId) {
        {
            let node = self.arena.get_mut(id);
            if node.kvs_to_insert.is_empty() && node.kvs_to_remove.is_empty() {
                return;
            }
            let staged = mem::take(&mut node.kvs_to_insert);
            node.num_kvs += staged.iter().filter(|e| !e.is_tombstone()).count();
            node.kvs_unsorted.extend(staged);
        }
        self.sort_kvs(id);
        {
            let schema = &self.key_schema;
            let node = self.arena.get_mut(id);
            let mut removes = mem::take(&mut node.kvs_to_remove);
            let (dead, _) = invalidate_duplicate(schema, &mut node.kvs, &mut removes);
            node.num_kvs -= dead;
            // unmatched removals vanish; removing an absent key is legal only
            // behind the existence check
        }
        self.sort_kvs(id);
    }

    /// Drains one pending buffer into the children whose brackets own its
    /// entries. The last routing slot carries the null key, so every entry
    /// finds a home.
    fn push(&mut self, id: NodeId, for_insert: bool) {
        self.sort_kvs(id);
        let buf = {
            let schema = &self.key_schema;
            let node = self.arena.get_mut(id);
            let mut buf = mem::take(node.buffer_mut(for_insert));
            buf.sort_by(|a, b| entry_cmp(schema, a, b));
            buf
        };
        trace!(node = id.as_usize(), pending = buf.len(), for_insert, "pushing buffer down");
        let mut drained = buf.into_iter().peekable();
        let mut merged = 0usize;
        let mut pulled: Vec<Entry> = Vec::new();
        let mut slot = 0usize;
        loop {
            let (bound, child) = {
                let node = self.arena.get(id);
                if slot >= node.kvs.len() {
                    break;
                }
                let entry = &node.kvs[slot];
                match entry.value.child() {
                    Some(c) => (entry.key.clone(), c),
                    // invalidated mid-walk by an earlier sibling merge
                    None => {
                        slot += 1;
                        continue;
                    }
                }
            };
            let mut batch: Vec<Entry> = Vec::new();
            while let Some(next) = drained.peek() {
                if next.is_tombstone() {
                    drained.next();
                    continue;
                }
                if self.key_schema.compare(&next.key, &bound) == Ordering::Less {
                    batch.push(drained.next().expect("peeked entry vanished"));
                } else {
                    break;
                }
            }
            if !batch.is_empty() {
                let res = self.stage(child, batch, for_insert);
                merged += res.count_merged;
                if let Some(kv) = res.kv_to_insert {
                    pulled.push(kv);
                }
            }
            slot += 1;
        }
        assert!(
            drained.next().is_none(),
            "pending entries survived past the +inf slot"
        );
        self.absorb_children_results(id, merged, pulled);
    }

    /// Hands a batch of pending entries to a child and re-maintains it.
    fn stage(&mut self, child: NodeId, batch: Vec<Entry>, for_insert: bool) -> MaintainResult {
        self.stats.child_stages += 1;
        self.arena.get_mut(child).buffer_mut(for_insert).extend(batch);
        self.maintain(child)
    }

    /// Recursively reconciles every child; used by [`MossTree::consolidate`].
    fn descend_all(&mut self, id: NodeId) {
        let mut merged = 0usize;
        let mut pulled: Vec<Entry> = Vec::new();
        let mut slot = 0usize;
        loop {
            let child = {
                let node = self.arena.get(id);
                if slot >= node.kvs.len() {
                    break;
                }
                node.kvs[slot].value.child()
            };
            if let Some(child) = child {
                let res = self.reconcile(child, true);
                merged += res.count_merged;
                if let Some(kv) = res.kv_to_insert {
                    pulled.push(kv);
                }
            }
            slot += 1;
        }
        // children parked in the overflow bucket (freshly split siblings)
        let mut uslot = 0usize;
        loop {
            let child = {
                let node = self.arena.get(id);
                if uslot >= node.kvs_unsorted.len() {
                    break;
                }
                node.kvs_unsorted[uslot].value.child()
            };
            if let Some(child) = child {
                let res = self.reconcile(child, true);
                merged += res.count_merged;
                if let Some(kv) = res.kv_to_insert {
                    pulled.push(kv);
                }
            }
            uslot += 1;
        }
        self.absorb_children_results(id, merged, pulled);
    }

    /// Folds children's maintenance results into this node: seats pulled-up
    /// split siblings in the overflow bucket and accounts for merged-away
    /// slots.
    fn absorb_children_results(&mut self, id: NodeId, merged: usize, pulled: Vec<Entry>) {
        if merged == 0 && pulled.is_empty() {
            return;
        }
        let seats: Vec<(NodeId, usize)> = {
            let node = self.arena.get_mut(id);
            node.num_kvs += pulled.len();
            node.num_kvs -= merged;
            let base = node.kvs_unsorted.len();
            let seats = pulled
                .iter()
                .enumerate()
                .filter_map(|(j, e)| e.value.child().map(|c| (c, base + j)))
                .collect();
            node.kvs_unsorted.extend(pulled);
            seats
        };
        for (child, slot) in seats {
            self.arena.get_mut(child).parent = Some(ParentLink {
                node: id,
                slot: SlotIndex::Unsorted(slot),
            });
        }
    }

    // =========================================================================
    // Structural repair
    // =========================================================================

    /// Resolves an occupancy shortfall. Returns `Some` when the node itself
    /// went away (merge or unlink) and the caller's slot count changed.
    fn handle_underflow(&mut self, id: NodeId) -> Option<MaintainResult> {
        if self.is_leftmost_child(id) {
            // the first child of each parent tolerates low occupancy
            if self.arena.get(id).num_kvs == 0 {
                return Some(self.unlink_empty(id));
            }
            return None;
        }
        let prev_id = self.arena.get(id).prev;
        let combined = self.arena.get(prev_id).num_kvs + self.arena.get(id).num_kvs;
        if combined <= self.branching {
            Some(self.merge_into_prev(id, prev_id))
        } else {
            self.redistribute_from_prev(id, prev_id);
            None
        }
    }

    /// Detaches an emptied node: forwards any pending work to its right
    /// neighbor, stitches the level links around it and invalidates its
    /// parent slot.
    fn unlink_empty(&mut self, id: NodeId) -> MaintainResult {
        self.stats.unlinks += 1;
        let node = self.arena.take(id);
        let link = node.parent.expect("unlinking the root");
        let (prev, next) = (node.prev, node.next);
        debug!(node = id.as_usize(), "unlinking emptied node");
        if node.pending_len() > 0 {
            // the right neighbor's bracket absorbs the vacated key range once
            // the parent compacts, so the forwarded entries stay in range
            let has_siblings = self.arena.get(link.node).num_kvs > 1;
            assert!(has_siblings, "emptied sole child still holds pending entries");
            assert!(next.is_valid(), "emptied node with siblings lacks a right neighbor");
            let neighbor = self.arena.get_mut(next);
            neighbor.kvs_to_insert.extend(node.kvs_to_insert);
            neighbor.kvs_to_remove.extend(node.kvs_to_remove);
        }
        if prev.is_valid() {
            self.arena.get_mut(prev).next = next;
        }
        if next.is_valid() {
            self.arena.get_mut(next).prev = prev;
        }
        self.slot_entry_mut(link).invalidate();
        self.arena.release(id);
        MaintainResult {
            count_merged: 1,
            kv_to_insert: None,
        }
    }

    /// Absorbs a node into its left sibling under the same parent.
    fn merge_into_prev(&mut self, id: NodeId, prev_id: NodeId) -> MaintainResult {
        self.stats.merges += 1;
        self.sort_kvs(id);
        self.sort_kvs(prev_id);
        let node = self.arena.take(id);
        let node_link = node.parent.expect("merging the root");
        let prev_link = self
            .arena
            .get(prev_id)
            .parent
            .expect("merging into the root");
        debug_assert_eq!(node_link.node, prev_link.node, "merge across parents");
        debug!(node = id.as_usize(), prev = prev_id.as_usize(), "merging into left sibling");

        let Node {
            is_leaf,
            kvs,
            kvs_unsorted,
            kvs_to_insert,
            kvs_to_remove,
            num_kvs,
            next,
            ..
        } = node;
        debug_assert!(kvs_unsorted.is_empty());

        let separator = self.slot_entry(prev_link).key.clone();
        debug_assert!(!separator.is_null());
        let seat_base = {
            let prev = self.arena.get_mut(prev_id);
            if !is_leaf && num_kvs > 0 {
                // the separator becomes a real bound on prev's old +inf child
                let last = prev.kvs.last_mut().expect("internal node without routing slots");
                debug_assert!(last.key.is_null());
                last.key = separator;
            }
            let base = prev.kvs.len();
            prev.kvs.extend(kvs);
            prev.kvs_to_insert.extend(kvs_to_insert);
            prev.kvs_to_remove.extend(kvs_to_remove);
            prev.num_kvs += num_kvs;
            prev.next = next;
            base
        };
        if !is_leaf {
            let seats: Vec<(NodeId, usize)> = {
                let prev = self.arena.get(prev_id);
                prev.kvs[seat_base..]
                    .iter()
                    .enumerate()
                    .filter_map(|(i, e)| e.value.child().map(|c| (c, seat_base + i)))
                    .collect()
            };
            for (child, slot) in seats {
                self.arena.get_mut(child).parent = Some(ParentLink {
                    node: prev_id,
                    slot: SlotIndex::Sorted(slot),
                });
            }
        }
        if next.is_valid() {
            self.arena.get_mut(next).prev = prev_id;
        }
        // the absorbed slot already carries the merged subtree's upper bound,
        // so the survivor takes it over and its old slot is invalidated
        self.slot_entry_mut(node_link).value = SlotValue::Child(prev_id);
        self.slot_entry_mut(prev_link).invalidate();
        self.arena.get_mut(prev_id).parent = Some(node_link);
        self.arena.release(id);

        let mut res = self.maintain(prev_id);
        res.count_merged += 1;
        res
    }

    /// Moves the tail of the left sibling into this node's overflow bucket
    /// and shifts the boundary key between them.
    fn redistribute_from_prev(&mut self, id: NodeId, prev_id: NodeId) {
        self.sort_kvs(prev_id);
        let prev_n = self.arena.get(prev_id).num_kvs;
        let node_n = self.arena.get(id).num_kvs;
        let k = (prev_n + node_n) / 2 - node_n;
        if k == 0 {
            return;
        }
        self.stats.redistributes += 1;
        trace!(node = id.as_usize(), prev = prev_id.as_usize(), moved = k, "redistributing");
        let prev_link = self
            .arena
            .get(prev_id)
            .parent
            .expect("redistributing into the root");
        let old_separator = self.slot_entry(prev_link).key.clone();
        let is_leaf = self.arena.get(id).is_leaf;

        let mut moved: Vec<Entry> = {
            let prev = self.arena.get_mut(prev_id);
            let at = prev.kvs.len() - k;
            prev.kvs.split_off(at)
        };
        let new_separator = if is_leaf {
            moved[0].key.clone()
        } else {
            // the moved tail ends with prev's +inf slot, now bounded by the
            // old separator; prev's new last slot takes over as +inf and its
            // key moves up as the boundary
            let last = moved.last_mut().expect("redistribute moved nothing");
            debug_assert!(last.key.is_null());
            last.key = old_separator;
            let prev = self.arena.get_mut(prev_id);
            let tail = prev.kvs.last_mut().expect("redistribute emptied the left sibling");
            mem::replace(&mut tail.key, PackedKey::null())
        };
        {
            let prev = self.arena.get_mut(prev_id);
            prev.num_kvs -= k;
        }
        let seats: Vec<(NodeId, usize)> = {
            let node = self.arena.get_mut(id);
            node.num_kvs += k;
            let base = node.kvs_unsorted.len();
            let seats = moved
                .iter()
                .enumerate()
                .filter_map(|(j, e)| e.value.child().map(|c| (c, base + j)))
                .collect();
            node.kvs_unsorted.append(&mut moved);
            seats
        };
        for (child, slot) in seats {
            self.arena.get_mut(child).parent = Some(ParentLink {
                node: id,
                slot: SlotIndex::Unsorted(slot),
            });
        }
        self.slot_entry_mut(prev_link).key = new_separator.clone();
        // pending entries at or past the boundary belong to the right sibling
        for for_insert in [true, false] {
            let give: Vec<Entry> = {
                let schema = &self.key_schema;
                let prev = self.arena.get_mut(prev_id);
                let buf = prev.buffer_mut(for_insert);
                let mut keep = Vec::with_capacity(buf.len());
                let mut give = Vec::new();
                for e in buf.drain(..) {
                    if e.is_tombstone() {
                        continue;
                    }
                    if schema.compare(&e.key, &new_separator) == Ordering::Less {
                        keep.push(e);
                    } else {
                        give.push(e);
                    }
                }
                *buf = keep;
                give
            };
            if !give.is_empty() {
                self.arena.get_mut(id).buffer_mut(for_insert).extend(give);
            }
        }
    }

    /// Splits an overfull node by carving off a new left sibling and pulling
    /// one separator up to the caller.
    fn split(&mut self, id: NodeId) -> MaintainResult {
        self.sort_kvs(id);
        self.stats.splits += 1;
        let is_leaf = self.arena.get(id).is_leaf;
        let total = self.arena.get(id).num_kvs;
        let k = total / 2;
        let prev_id = self.arena.alloc(Node::new(is_leaf, self.branching, self.lazy_cap));
        debug!(node = id.as_usize(), sibling = prev_id.as_usize(), moved = k, "splitting node");

        let (head, separator, old_prev) = {
            let node = self.arena.get_mut(id);
            let old_prev = node.prev;
            let take = if is_leaf { k } else { k + 1 };
            let mut head: Vec<Entry> = node.kvs.drain(..take).collect();
            let separator = if is_leaf {
                // a copy of the first key staying behind bounds the sibling
                node.kvs.first().expect("split emptied a node").key.clone()
            } else {
                // the pivot key moves up; its child becomes the sibling's
                // +inf child
                let pivot = head.pop().expect("split moved nothing");
                head.push(Entry::infinity(
                    pivot.value.child().expect("routing slot without a child"),
                ));
                pivot.key
            };
            node.num_kvs -= take;
            node.prev = prev_id;
            (head, separator, old_prev)
        };
        {
            let prev = self.arena.get_mut(prev_id);
            prev.num_kvs = head.len();
            prev.kvs.extend(head);
            prev.prev = old_prev;
            prev.next = id;
        }
        if old_prev.is_valid() {
            self.arena.get_mut(old_prev).next = prev_id;
        }
        // pending entries bounded by the separator follow the sibling
        for for_insert in [true, false] {
            let give: Vec<Entry> = {
                let schema = &self.key_schema;
                let node = self.arena.get_mut(id);
                let buf = node.buffer_mut(for_insert);
                let mut keep = Vec::with_capacity(buf.len());
                let mut give = Vec::new();
                for e in buf.drain(..) {
                    if e.is_tombstone() {
                        continue;
                    }
                    if schema.compare(&e.key, &separator) == Ordering::Less {
                        give.push(e);
                    } else {
                        keep.push(e);
                    }
                }
                *buf = keep;
                give
            };
            if !give.is_empty() {
                self.arena.get_mut(prev_id).buffer_mut(for_insert).extend(give);
            }
        }
        if !is_leaf {
            for owner in [prev_id, id] {
                let seats: Vec<(NodeId, usize)> = {
                    let node = self.arena.get(owner);
                    node.kvs
                        .iter()
                        .enumerate()
                        .filter_map(|(i, e)| e.value.child().map(|c| (c, i)))
                        .collect()
                };
                for (child, slot) in seats {
                    self.arena.get_mut(child).parent = Some(ParentLink {
                        node: owner,
                        slot: SlotIndex::Sorted(slot),
                    });
                }
            }
        }
        MaintainResult {
            count_merged: 0,
            kv_to_insert: Some(Entry::child(separator, prev_id)),
        }
    }

    // =========================================================================
    // Root maintenance
    // =========================================================================

    /// Applies a top-level maintenance result: grows a level when the root
    /// split, shrinks while a drained internal root has a single child.
    fn maintain_root(&mut self, res: MaintainResult) {
        if res.count_merged > 0 {
            let root = self.arena.get_mut(self.root);
            root.num_kvs -= res.count_merged;
        }
        if let Some(entry) = res.kv_to_insert {
            let sibling = entry.value.child().expect("pulled-up entry without a child");
            let old_root = self.root;
            let new_root = self.arena.alloc(Node::new(false, self.branching, self.lazy_cap));
            {
                let node = self.arena.get_mut(new_root);
                node.kvs.push(entry);
                node.kvs.push(Entry::infinity(old_root));
                node.num_kvs = 2;
            }
            self.arena.get_mut(sibling).parent = Some(ParentLink {
                node: new_root,
                slot: SlotIndex::Sorted(0),
            });
            self.arena.get_mut(old_root).parent = Some(ParentLink {
                node: new_root,
                slot: SlotIndex::Sorted(1),
            });
            self.root = new_root;
            debug!(root = new_root.as_usize(), "root grew a level");
        }
        loop {
            let root_id = self.root;
            let (is_leaf, n) = {
                let root = self.arena.get(root_id);
                (root.is_leaf, root.num_kvs)
            };
            if is_leaf || n > 1 {
                break;
            }
            if n == 0 {
                // every child vanished; the tree restarts from an empty leaf
                // that inherits whatever is still pending at the root
                let leaf = self.arena.alloc(Node::new(true, self.branching, self.lazy_cap));
                let (to_insert, to_remove) = {
                    let root = self.arena.get_mut(root_id);
                    (
                        mem::take(&mut root.kvs_to_insert),
                        mem::take(&mut root.kvs_to_remove),
                    )
                };
                {
                    let node = self.arena.get_mut(leaf);
                    node.kvs_to_insert = to_insert;
                    node.kvs_to_remove = to_remove;
                }
                self.root = leaf;
                self.arena.release(root_id);
                debug!(root = leaf.as_usize(), "tree drained to an empty leaf");
                let res = self.maintain(leaf);
                self.maintain_root(res);
                return;
            }
            // reconcile pending work before dropping a level
            {
                let schema = &self.key_schema;
                let root = self.arena.get_mut(root_id);
                invalidate_duplicate(schema, &mut root.kvs_to_insert, &mut root.kvs_to_remove);
                root.kvs_to_insert.retain(|e| !e.is_tombstone());
                root.kvs_to_remove.retain(|e| !e.is_tombstone());
            }
            if !self.arena.get(root_id).kvs_to_insert.is_empty() {
                self.push(root_id, true);
            }
            if !self.arena.get(root_id).kvs_to_remove.is_empty() {
                self.push(root_id, false);
            }
            self.sort_kvs(root_id);
            let promote = {
                let root = self.arena.get(root_id);
                if root.num_kvs == 1 {
                    debug_assert!(root.kvs[0].key.is_null());
                    root.kvs[0].value.child()
                } else {
                    // a push pulled a split back up; re-examine from the top
                    None
                }
            };
            if let Some(child) = promote {
                self.arena.get_mut(child).parent = None;
                self.root = child;
                self.arena.release(root_id);
                debug!(root = child.as_usize(), "root shrank a level");
            }
        }
    }

    // =========================================================================
    // Slot helpers
    // =========================================================================

    fn slot_entry(&self, link: ParentLink) -> &Entry {
        let parent = self.arena.get(link.node);
        match link.slot {
            SlotIndex::Sorted(i) => &parent.kvs[i],
            SlotIndex::Unsorted(i) => &parent.kvs_unsorted[i],
        }
    }

    fn slot_entry_mut(&mut self, link: ParentLink) -> &mut Entry {
        let parent = self.arena.get_mut(link.node);
        match link.slot {
            SlotIndex::Sorted(i) => &mut parent.kvs[i],
            SlotIndex::Unsorted(i) => &mut parent.kvs_unsorted[i],
        }
    }
}

/// Key order lifted to entries; tombstones keep their key, so a sorted run
/// stays sorted around them.
fn entry_cmp(schema: &Schema, a: &Entry, b: &Entry) -> Ordering {
    schema.compare(&a.key, &b.key)
}

/// Stable merge of two runs sorted under [`entry_cmp`].
fn merge_sorted(schema: &Schema, a: Vec<Entry>, b: Vec<Entry>) -> Vec<Entry> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let mut ai = a.into_iter().peekable();
    let mut bi = b.into_iter().peekable();
    loop {
        match (ai.peek(), bi.peek()) {
            (Some(x), Some(y)) => {
                if entry_cmp(schema, x, y) != Ordering::Greater {
                    out.push(ai.next().expect("peeked entry vanished"));
                } else {
                    out.push(bi.next().expect("peeked entry vanished"));
                }
            }
            (Some(_), None) => {
                out.extend(ai);
                break;
            }
            (None, _) => {
                out.extend(bi);
                break;
            }
        }
    }
    out
}

/// Sorts both vectors by key and tombstones every equal-key pair of valid
/// entries, one-for-one. Returns how many entries each vector lost.
fn invalidate_duplicate(
    schema: &Schema,
    a: &mut Vec<Entry>,
    b: &mut Vec<Entry>,
) -> (usize, usize) {
    a.sort_by(|x, y| entry_cmp(schema, x, y));
    b.sort_by(|x, y| entry_cmp(schema, x, y));
    let mut i = 0;
    let mut j = 0;
    let mut dead_a = 0;
    let mut dead_b = 0;
    while i < a.len() && j < b.len() {
        if a[i].is_tombstone() {
            i += 1;
            continue;
        }
        if b[j].is_tombstone() {
            j += 1;
            continue;
        }
        match schema.compare(&a[i].key, &b[j].key) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                a[i].invalidate();
                b[j].invalidate();
                dead_a += 1;
                dead_b += 1;
                i += 1;
                j += 1;
            }
        }
    }
    (dead_a, dead_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tree(allows_duplicate: bool) -> MossTree {
        MossTree::with_config(
            vec![ColumnType::Int64, ColumnType::Int32],
            vec!["number".into(), "color".into()],
            allows_duplicate,
            TreeConfig::for_testing(),
        )
    }

    fn key(tree: &MossTree, a: i64, b: i32) -> PackedKey {
        tree.schema()
            .pack(&[&a.to_string(), &b.to_string()])
            .expect("packing a test key")
    }

    #[test]
    fn test_tree_creation() {
        let tree = test_tree(true);
        assert!(tree.is_empty());
        assert_eq!(tree.height(), 0);
        assert_eq!(tree.node_count(), 1);
        assert!(tree.branching_factor() >= 2);
        assert!(tree.lazy_cap() >= 1);
        assert_eq!(tree.column_names(), &["number", "color"]);
        tree.check_integrity();
    }

    #[test]
    fn test_single_insert() {
        let mut tree = test_tree(true);
        let k = key(&tree, 42, 7);
        assert!(tree.insert(&k, Rid::new(1), false));
        assert!(!tree.is_empty());
        assert!(tree.exists(&k, Rid::new(1)));
        assert!(!tree.exists(&k, Rid::new(2)));
        tree.check_integrity();
    }

    #[test]
    fn test_many_inserts_split_the_root() {
        let mut tree = test_tree(true);
        for i in 0..200i64 {
            let k = key(&tree, i, (i % 7) as i32);
            assert!(tree.insert(&k, Rid::new(i + 1), false));
            tree.check_integrity();
        }
        assert!(tree.height() > 0);
        assert!(tree.stats().splits > 0);
        assert!(tree.node_count() > 1);
        for i in 0..200i64 {
            let k = key(&tree, i, (i % 7) as i32);
            assert!(tree.exists(&k, Rid::new(i + 1)), "missing entry {i}");
        }
    }

    #[test]
    fn test_descending_inserts() {
        let mut tree = test_tree(true);
        for i in (0..150i64).rev() {
            let k = key(&tree, i, 0);
            tree.insert(&k, Rid::new(i + 1), false);
            tree.check_integrity();
        }
        for i in 0..150i64 {
            assert!(tree.exists(&key(&tree, i, 0), Rid::new(i + 1)));
        }
    }

    #[test]
    fn test_unique_index_rejects_duplicates() {
        let mut tree = test_tree(false);
        let k = key(&tree, 5, 5);
        assert!(tree.insert(&k, Rid::new(1), true));
        assert!(!tree.insert(&k, Rid::new(2), true));
        assert_eq!(tree.point(&k), vec![Rid::new(1)]);
    }

    #[test]
    fn test_duplicate_key_distinct_rids() {
        let mut tree = test_tree(true);
        let k = key(&tree, 9, 9);
        for rid in 1..=3 {
            assert!(tree.insert(&k, Rid::new(rid), true));
        }
        assert!(!tree.insert(&k, Rid::new(2), true));
        assert_eq!(tree.point(&k), vec![Rid::new(1), Rid::new(2), Rid::new(3)]);
    }

    #[test]
    fn test_remove_with_check_reports_absence() {
        let mut tree = test_tree(true);
        let k = key(&tree, 1, 1);
        assert!(!tree.remove(&k, Rid::new(1), true));
        tree.insert(&k, Rid::new(1), false);
        assert!(tree.remove(&k, Rid::new(1), true));
        assert!(!tree.remove(&k, Rid::new(1), true));
    }

    #[test]
    fn test_insert_then_remove_round_trip() {
        let mut tree = test_tree(true);
        for i in 0..300i64 {
            tree.insert(&key(&tree, i, 0), Rid::new(i + 1), false);
        }
        for i in 0..300i64 {
            tree.remove(&key(&tree, i, 0), Rid::new(i + 1), false);
            tree.check_integrity();
        }
        tree.consolidate();
        assert!(tree.is_empty());
        assert_eq!(tree.height(), 0);
        for i in 0..300i64 {
            assert!(!tree.exists(&key(&tree, i, 0), Rid::new(i + 1)));
        }
        assert!(tree.stats().merges + tree.stats().unlinks > 0);
    }

    #[test]
    fn test_consolidate_clears_pending() {
        let mut tree = test_tree(true);
        for i in 0..50i64 {
            tree.insert(&key(&tree, i, 0), Rid::new(i + 1), false);
        }
        tree.consolidate();
        assert_eq!(tree.pending_ops(), 0);
        tree.check_integrity();
        for i in 0..50i64 {
            assert!(tree.exists(&key(&tree, i, 0), Rid::new(i + 1)));
        }
    }

    #[test]
    fn test_pending_pairs_cancel_at_the_root() {
        let mut tree = test_tree(true);
        for i in 0..200i64 {
            tree.insert(&key(&tree, i, 0), Rid::new(i + 1), false);
        }
        tree.consolidate();
        let staged_before = tree.stats().child_stages;
        let cap = tree.lazy_cap() as i64;

        // park matching pairs, then trip reconciliation with one extra pair
        for i in 0..cap {
            tree.insert(&key(&tree, 1000 + i, 0), Rid::new(2000 + i), false);
        }
        for i in 0..cap {
            tree.remove(&key(&tree, 1000 + i, 0), Rid::new(2000 + i), false);
        }
        tree.insert(&key(&tree, 1000 + cap, 0), Rid::new(2000 + cap), false);
        tree.remove(&key(&tree, 1000 + cap, 0), Rid::new(2000 + cap), false);

        assert_eq!(tree.stats().child_stages, staged_before, "pairs leaked below the root");
        for i in 0..=cap {
            assert!(tree.point(&key(&tree, 1000 + i, 0)).is_empty());
        }
        tree.check_integrity();
    }

    #[test]
    fn test_mixed_workload_integrity() {
        let mut tree = test_tree(true);
        for round in 0..10i64 {
            for i in 0..40i64 {
                let k = key(&tree, i * 10 + round, (round % 3) as i32);
                tree.insert(&k, Rid::new(round * 100 + i + 1), false);
                tree.check_integrity();
            }
            for i in (0..40i64).step_by(2) {
                let k = key(&tree, i * 10 + round, (round % 3) as i32);
                tree.remove(&k, Rid::new(round * 100 + i + 1), false);
                tree.check_integrity();
            }
        }
        tree.consolidate();
        tree.check_integrity();
    }

    #[test]
    #[should_panic(expected = "invalid rid sentinel")]
    fn test_insert_invalid_rid_panics() {
        let mut tree = test_tree(true);
        let k = key(&tree, 1, 1);
        tree.insert(&k, Rid::INVALID, false);
    }

    #[test]
    fn test_invalidate_duplicate_cancels_pairs() {
        let schema = Schema::new(vec![ColumnType::Int64]).with_rid_suffix();
        let user = Schema::new(vec![ColumnType::Int64]);
        let k = |v: i64, rid: i64| {
            Entry::rid(
                user.pack(&[&v.to_string()]).unwrap().combine(Rid::new(rid)),
                Rid::new(rid),
            )
        };
        let mut a = vec![k(1, 1), k(2, 2), k(3, 3)];
        let mut b = vec![k(2, 2), k(4, 4)];
        let (dead_a, dead_b) = invalidate_duplicate(&schema, &mut a, &mut b);
        assert_eq!((dead_a, dead_b), (1, 1));
        assert_eq!(a.iter().filter(|e| e.is_tombstone()).count(), 1);
        assert_eq!(b.iter().filter(|e| e.is_tombstone()).count(), 1);
    }

    #[test]
    fn test_merge_sorted_interleaves() {
        let schema = Schema::new(vec![ColumnType::Int64]);
        let e = |v: i64| Entry::rid(schema.pack(&[&v.to_string()]).unwrap(), Rid::new(v));
        let a = vec![e(1), e(4), e(6)];
        let b = vec![e(2), e(3), e(5)];
        let merged = merge_sorted(&schema, a, b);
        let keys: Vec<i64> = merged.iter().map(|x| x.value.rid().unwrap().as_i64()).collect();
        assert_eq!(keys, vec![1, 2, 3, 4, 5, 6]);
    }
}
