//! linked-handle-map: a single-threaded ordered hash map with stable
//! handles and O(1) relocation of entries to either end.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: keep an ordered sequence and a hash index over the same
//!   entries in lockstep, so a cache can look up by key and reorder by
//!   handle in O(1) without either view drifting from the other.
//! - Layers:
//!   - OrderedSequence<T>: slot arena of nodes with explicit prev/next
//!     links. Insert before any node, remove, and relocate in O(1);
//!     generational keys go stale exactly when their node is freed.
//!   - KeyIndex: `hashbrown::HashTable` of arena keys. Holds no data and
//!     no addresses; equality is resolved through the arena.
//!   - LinkedHandleMap<K, V, S>: public API. Every mutation goes through
//!     both layers as one step and exposes `Handle`s to entries.
//!
//! Constraints
//! - Single-threaded: `Send`, never `Sync`; no internal locking.
//! - Unique keys; a key is immutable once inserted, its value is not.
//! - Handles survive insertion, removal and reordering of other entries
//!   and splicing of their own entry; they go stale on erase or clear.
//! - Reentrancy: disallowed while a structural operation is in progress
//!   (only `K: Eq/Hash` run there); a debug-only guard enforces it.
//!
//! Insertion and rollback
//! - New entries are linked into the sequence first, then registered in
//!   the index. Index growth is the only fallible step; if it fails the
//!   node is unlinked and freed before `Error::ResourceExhausted` is
//!   returned, so no entry is ever present in one view and not the other.
//!
//! Hasher and rehashing invariants
//! - Each entry stores a precomputed `u64` hash and the index always
//!   rehashes from it; `K: Hash` is never invoked after insertion.
//!
//! Notes and non-goals
//! - No eviction policy, capacity bound or expiry: callers build those
//!   from `bump_front`/`bump_back` and `pop_front`/`pop_back`.
//! - Handles are not branded to their map; a handle from one map used on
//!   another may resolve to an unrelated entry. After `swap`, handles
//!   follow their entries into the other map; after `clone`, the original
//!   handles also address the corresponding entries of the clone.

pub mod error;
mod key_index;
pub mod linked_handle_map;
mod linked_handle_map_proptest;
mod reentrancy;
mod sequence;

// Public surface
pub use error::{Error, Result};
pub use linked_handle_map::{Handle, Iter, IterMut, LinkedHandleMap, Position};
