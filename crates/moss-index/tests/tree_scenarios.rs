//! End-to-end scenarios for the MossTree.
//!
//! Seeded workloads covering the interplay of lazy staging, pair
//! cancellation, structural repair and reconciling queries.

use moss_common::types::{ColumnType, PackedKey, Rid};
use moss_index::{MossTree, TreeConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn new_tree() -> MossTree {
    MossTree::new(
        vec![ColumnType::Int64, ColumnType::Int32],
        vec!["number".into(), "color".into()],
        true,
    )
}

fn small_tree() -> MossTree {
    MossTree::with_config(
        vec![ColumnType::Int64, ColumnType::Int32],
        vec!["number".into(), "color".into()],
        true,
        TreeConfig::for_testing(),
    )
}

fn pack(tree: &MossTree, a: i64, b: i32) -> PackedKey {
    tree.schema()
        .pack(&[&a.to_string(), &b.to_string()])
        .expect("packing a test key")
}

#[test]
fn ascending_small_load() {
    let mut tree = new_tree();
    for i in 1..=20i64 {
        let key = pack(&tree, i, i as i32);
        assert!(tree.insert(&key, Rid::new(i + 1), false));
        tree.check_integrity();
    }
    for i in 1..=20i64 {
        let key = pack(&tree, i, i as i32);
        assert!(tree.exists(&key, Rid::new(i + 1)));
    }
}

#[test]
fn insert_then_remove_round_trip() {
    let mut tree = small_tree();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let n = (tree.lazy_cap() + 1) * 100;

    let keys: Vec<(i64, i32)> = (0..n).map(|i| (rng.gen(), i as i32)).collect();
    for (i, &(a, b)) in keys.iter().enumerate() {
        tree.insert(&pack(&tree, a, b), Rid::new(i as i64 + 1), false);
    }
    tree.check_integrity();
    assert!(tree.height() > 0);

    for (i, &(a, b)) in keys.iter().enumerate() {
        tree.remove(&pack(&tree, a, b), Rid::new(i as i64 + 1), false);
        tree.check_integrity();
    }
    for (i, &(a, b)) in keys.iter().enumerate() {
        assert!(!tree.exists(&pack(&tree, a, b), Rid::new(i as i64 + 1)));
    }
    tree.consolidate();
    tree.check_integrity();
    assert!(tree.is_empty());
    assert_eq!(tree.height(), 0);
}

#[test]
fn flip_sequence() {
    let mut tree = small_tree();
    let mut rng = StdRng::seed_from_u64(0xf11b);
    const N: usize = 100;

    let keys: Vec<(i64, i32)> = (0..N).map(|i| (rng.gen(), i as i32)).collect();
    let mut used = vec![false; N];

    for _ in 0..3 * N {
        let i = rng.gen_range(0..N);
        let key = pack(&tree, keys[i].0, keys[i].1);
        if used[i] {
            assert!(tree.remove(&key, Rid::new(i as i64 + 1), false));
        } else {
            assert!(tree.insert(&key, Rid::new(i as i64 + 1), false));
        }
        used[i] = !used[i];
        tree.check_integrity();
    }
    for i in 0..N {
        let key = pack(&tree, keys[i].0, keys[i].1);
        let hits = tree.point(&key);
        if used[i] {
            assert_eq!(hits, vec![Rid::new(i as i64 + 1)]);
        } else {
            assert!(hits.is_empty());
        }
    }
}

#[test]
fn range_fidelity() {
    let mut tree = small_tree();
    let mut rng = StdRng::seed_from_u64(0x4a4e);
    const N: usize = 300;

    let keys: Vec<(i64, i32)> = (0..N).map(|i| (rng.gen(), i as i32)).collect();
    let mut used = vec![false; N];
    for (i, &(a, b)) in keys.iter().enumerate() {
        tree.insert(&pack(&tree, a, b), Rid::new(i as i64 + 1), false);
        used[i] = true;
    }
    for _ in 0..2 * N {
        let i = rng.gen_range(0..N);
        let key = pack(&tree, keys[i].0, keys[i].1);
        if used[i] {
            tree.remove(&key, Rid::new(i as i64 + 1), false);
        } else {
            tree.insert(&key, Rid::new(i as i64 + 1), false);
        }
        used[i] = !used[i];
    }
    tree.check_integrity();

    for _ in 0..50 {
        let mut a = rng.gen_range(0..N);
        let mut b = rng.gen_range(0..N);
        if keys[a] > keys[b] {
            std::mem::swap(&mut a, &mut b);
        }
        let hits = tree.range(
            &pack(&tree, keys[a].0, keys[a].1),
            &pack(&tree, keys[b].0, keys[b].1),
        );
        let mut expected: Vec<Rid> = (0..N)
            .filter(|&i| used[i] && keys[i] >= keys[a] && keys[i] <= keys[b])
            .map(|i| Rid::new(i as i64 + 1))
            .collect();
        expected.sort_unstable();
        assert_eq!(hits, expected, "range [{:?}, {:?}]", keys[a], keys[b]);
    }
}

#[test]
fn duplicate_key_distinct_rids() {
    let mut tree = new_tree();
    let key = pack(&tree, 77, 7);
    for rid in 1..=3i64 {
        assert!(tree.insert(&key, Rid::new(rid), true));
    }
    assert_eq!(tree.point(&key), vec![Rid::new(1), Rid::new(2), Rid::new(3)]);

    assert!(tree.remove(&key, Rid::new(2), true));
    assert_eq!(tree.point(&key), vec![Rid::new(1), Rid::new(3)]);
    assert!(!tree.exists(&key, Rid::new(2)));
    assert!(tree.exists(&key, Rid::new(1)));
}

#[test]
fn lazy_coalescing_never_touches_children() {
    let mut tree = new_tree();
    for i in 0..(tree.branching_factor() as i64 * 2) {
        tree.insert(&pack(&tree, i, 0), Rid::new(i + 1), false);
    }
    tree.consolidate();
    assert!(tree.height() > 0);
    assert_eq!(tree.pending_ops(), 0);

    let staged_before = tree.stats().child_stages;
    let cap = tree.lazy_cap() as i64;

    // park matching pairs in the root buffers, then trip reconciliation with
    // one extra pair; everything cancels at the root
    for i in 0..cap {
        tree.insert(&pack(&tree, 1 << 40 | i, 0), Rid::new(5000 + i), false);
    }
    for i in 0..cap {
        tree.remove(&pack(&tree, 1 << 40 | i, 0), Rid::new(5000 + i), false);
    }
    tree.insert(&pack(&tree, 1 << 40 | cap, 0), Rid::new(5000 + cap), false);
    tree.remove(&pack(&tree, 1 << 40 | cap, 0), Rid::new(5000 + cap), false);

    assert_eq!(
        tree.stats().child_stages,
        staged_before,
        "cancelled pairs reached a child"
    );
    for i in 0..=cap {
        assert!(tree.point(&pack(&tree, 1 << 40 | i, 0)).is_empty());
        assert!(!tree.exists(&pack(&tree, 1 << 40 | i, 0), Rid::new(5000 + i)));
    }
    tree.check_integrity();
}

#[test]
fn reinsert_after_remove_is_visible() {
    let mut tree = small_tree();
    for i in 0..100i64 {
        tree.insert(&pack(&tree, i, 0), Rid::new(i + 1), false);
    }
    for i in 0..50i64 {
        tree.remove(&pack(&tree, i, 0), Rid::new(i + 1), false);
        tree.insert(&pack(&tree, i, 0), Rid::new(i + 1), false);
        tree.check_integrity();
    }
    for i in 0..100i64 {
        assert!(tree.exists(&pack(&tree, i, 0), Rid::new(i + 1)), "entry {i} lost");
    }
}

#[test]
fn mixed_schema_with_strings_and_dates() {
    let mut tree = MossTree::with_config(
        vec![ColumnType::String, ColumnType::Date],
        vec!["name".into(), "joined".into()],
        false,
        TreeConfig::for_testing(),
    );
    let names = ["ada", "grace", "edsger", "barbara", "tony"];
    for (i, name) in names.iter().enumerate() {
        let key = tree
            .schema()
            .pack(&[name, &(19_000 + i as i32).to_string()])
            .unwrap();
        assert!(tree.insert(&key, Rid::new(i as i64 + 1), true));
    }
    tree.check_integrity();

    let lo = tree.schema().pack(&["ada", "0"]).unwrap();
    let hi = tree.schema().pack(&["grace", "99999"]).unwrap();
    let hits = tree.range(&lo, &hi);
    // ada, barbara, edsger, grace
    assert_eq!(hits.len(), 4);
    assert!(!hits.contains(&Rid::new(5)));
}
