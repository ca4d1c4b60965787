//! MossTree - a buffered B+-tree for composite typed keys.
//!
//! MossTree is a multi-way balanced search tree whose nodes carry lazy
//! staging buffers alongside their sorted entries:
//!
//! - **Lazy staging**: a mutation lands in the root's pending buffer and is
//!   only pushed toward the leaves once a buffer outgrows its cap, so the
//!   cost of a mutation amortizes across batches.
//! - **Pair cancellation**: an insert and a remove of the same key that meet
//!   in one node's buffers annihilate without ever touching a leaf.
//! - **Reconciling reads**: point and range queries combine materialized
//!   leaf entries with the pending buffers along every visited path.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        MossTree                          │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │ Internal node                                      │  │
//! │  │   kvs: [k1|c1] [k2|c2] [null|c3]   (routing slots) │  │
//! │  │   kvs_unsorted: overflow bucket                    │  │
//! │  │   kvs_to_insert / kvs_to_remove: pending buffers   │  │
//! │  └────────────────────────────────────────────────────┘  │
//! │       │           │           │                          │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐                     │
//! │  │ Leaf    │⇄│ Leaf    │⇄│ Leaf    │  (level links)      │
//! │  └─────────┘ └─────────┘ └─────────┘                     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The branching factor `B` is chosen so a node holding `B` sorted entries
//! plus `3·⌊√B⌋` buffered entries fits the configured block size; the buffer
//! cap is `L = ⌊√B⌋`.
//!
//! ## Usage
//!
//! ```rust
//! use moss_common::types::{ColumnType, Rid};
//! use moss_index::MossTree;
//!
//! let mut tree = MossTree::new(
//!     vec![ColumnType::Int64, ColumnType::Int32],
//!     vec!["number".into(), "color".into()],
//!     true,
//! );
//!
//! let key = tree.schema().pack(&["42", "7"]).unwrap();
//! tree.insert(&key, Rid::new(1), false);
//! assert!(tree.exists(&key, Rid::new(1)));
//! assert_eq!(tree.point(&key), vec![Rid::new(1)]);
//!
//! tree.remove(&key, Rid::new(1), true);
//! assert!(!tree.exists(&key, Rid::new(1)));
//! ```

mod arena;
mod config;
mod integrity;
mod node;
mod query;
mod tree;

pub use config::TreeConfig;
pub use tree::{MossTree, TreeStats};
