//! LinkedHandleMap: ordered hash map with stable handles.
//!
//! Entries live in an `OrderedSequence` (slot arena plus prev/next links)
//! and a `KeyIndex` maps each key's hash to the entry's slot. Every public
//! mutation updates both, so a handle that a caller holds keeps resolving
//! to its entry until that entry itself is removed.

use crate::error::{Error, Result};
use crate::key_index::KeyIndex;
use crate::reentrancy::DebugReentrancy;
use crate::sequence::{self, OrderedSequence};
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::ops::Index;
use slotmap::DefaultKey;
use std::collections::hash_map::RandomState;

/// Stable reference to one entry of a [`LinkedHandleMap`].
///
/// A handle survives insertion, removal and reordering of other entries
/// as well as splicing of its own entry. Once its entry is erased (or the
/// map is cleared) it never resolves again, even if the slot is reused.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Handle(DefaultKey);

impl Handle {
    pub(crate) fn new(k: DefaultKey) -> Self {
        Handle(k)
    }
    pub(crate) fn raw_handle(&self) -> DefaultKey {
        self.0
    }

    pub fn key<'a, K, V, S>(&self, map: &'a LinkedHandleMap<K, V, S>) -> Option<&'a K> {
        map.seq.get(self.0).map(|e| &e.key)
    }

    pub fn value<'a, K, V, S>(&self, map: &'a LinkedHandleMap<K, V, S>) -> Option<&'a V> {
        map.seq.get(self.0).map(|e| &e.value)
    }

    pub fn value_mut<'a, K, V, S>(&self, map: &'a mut LinkedHandleMap<K, V, S>) -> Option<&'a mut V> {
        map.seq.get_mut(self.0).map(|e| &mut e.value)
    }
}

/// Where an insertion or splice places its entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Position {
    /// Before the current front entry.
    Front,
    /// After the current back entry.
    Back,
    /// Immediately before the entry referenced by the handle.
    Before(Handle),
}

#[derive(Debug, Clone)]
struct Entry<K, V> {
    key: K,
    value: V,
    hash: u64,
}

/// Ordered associative container with O(1) average lookup and O(1)
/// relocation of any entry to either end.
///
/// The map imposes no eviction policy; it is the mechanism an LRU (or any
/// order-sensitive cache) is built on:
///
/// ```
/// use linked_handle_map::LinkedHandleMap;
///
/// let mut lru: LinkedHandleMap<&str, u32> = LinkedHandleMap::new();
/// lru.emplace_back("a", 1).unwrap();
/// let (b, _) = lru.emplace_back("b", 2).unwrap();
/// lru.emplace_back("c", 3).unwrap();
///
/// // Touching "b" makes it most recently used.
/// lru.bump_back(b);
/// assert_eq!(lru.keys().copied().collect::<Vec<_>>(), ["a", "c", "b"]);
///
/// // Evict from the front.
/// assert_eq!(lru.pop_front(), Some(("a", 1)));
/// ```
///
/// The map is `Send` but not `Sync`. Concurrent users must serialize all
/// access behind one lock around the whole map.
#[derive(Clone)]
pub struct LinkedHandleMap<K, V, S = RandomState> {
    hasher: S,
    index: KeyIndex,
    seq: OrderedSequence<Entry<K, V>>,
    reentrancy: DebugReentrancy,
}

impl<K, V> LinkedHandleMap<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_hasher(Default::default())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, Default::default())
    }
}

impl<K, V, S> Default for LinkedHandleMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

// Operations that never hash or compare keys.
impl<K, V, S> LinkedHandleMap<K, V, S> {
    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Largest number of entries the map could ever hold.
    pub fn max_len(&self) -> usize {
        OrderedSequence::<Entry<K, V>>::max_len().min(KeyIndex::max_len())
    }

    /// Number of keys the index holds before it has to grow.
    pub fn capacity(&self) -> usize {
        self.index.capacity()
    }

    pub fn max_load_factor(&self) -> f32 {
        self.index.max_load_factor()
    }

    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    /// Returns the front entry.
    ///
    /// # Panics
    ///
    /// Panics if the map is empty.
    pub fn front(&self) -> (&K, &V) {
        match self.seq.head().and_then(|s| self.seq.get(s)) {
            Some(e) => (&e.key, &e.value),
            None => panic!("front() called on an empty LinkedHandleMap"),
        }
    }

    /// Returns the back entry.
    ///
    /// # Panics
    ///
    /// Panics if the map is empty.
    pub fn back(&self) -> (&K, &V) {
        match self.seq.tail().and_then(|s| self.seq.get(s)) {
            Some(e) => (&e.key, &e.value),
            None => panic!("back() called on an empty LinkedHandleMap"),
        }
    }

    /// # Panics
    ///
    /// Panics if the map is empty.
    pub fn front_mut(&mut self) -> (&K, &mut V) {
        let head = self.seq.head();
        match head.and_then(|s| self.seq.get_mut(s)) {
            Some(e) => (&e.key, &mut e.value),
            None => panic!("front_mut() called on an empty LinkedHandleMap"),
        }
    }

    /// # Panics
    ///
    /// Panics if the map is empty.
    pub fn back_mut(&mut self) -> (&K, &mut V) {
        let tail = self.seq.tail();
        match tail.and_then(|s| self.seq.get_mut(s)) {
            Some(e) => (&e.key, &mut e.value),
            None => panic!("back_mut() called on an empty LinkedHandleMap"),
        }
    }

    pub fn front_handle(&self) -> Option<Handle> {
        self.seq.head().map(Handle::new)
    }

    pub fn back_handle(&self) -> Option<Handle> {
        self.seq.tail().map(Handle::new)
    }

    /// Handle of the entry after `handle`, or `None` at the back or when
    /// `handle` is stale. Stepping with handles stays valid while other
    /// entries are inserted, removed or moved in between.
    pub fn next_handle(&self, handle: Handle) -> Option<Handle> {
        self.seq.next(handle.raw_handle()).map(Handle::new)
    }

    pub fn prev_handle(&self, handle: Handle) -> Option<Handle> {
        self.seq.prev(handle.raw_handle()).map(Handle::new)
    }

    /// Whether `handle` still refers to a live entry.
    pub fn is_live(&self, handle: Handle) -> bool {
        self.seq.contains(handle.raw_handle())
    }

    /// Relocates the entry at `handle` so that it sits at `position`.
    ///
    /// The entry is neither rebuilt nor re-indexed, and every handle stays
    /// valid. Returns `false` without changing anything if `handle`, or
    /// the anchor of `Position::Before`, is stale.
    pub fn splice(&mut self, position: Position, handle: Handle) -> bool {
        let _g = self.reentrancy.enter();
        let before = match position {
            Position::Front => self.seq.head(),
            Position::Back => None,
            Position::Before(anchor) => Some(anchor.raw_handle()),
        };
        self.seq.move_before(handle.raw_handle(), before)
    }

    /// Moves the entry to the front. The relative order of every other
    /// entry is unchanged.
    pub fn bump_front(&mut self, handle: Handle) -> bool {
        self.splice(Position::Front, handle)
    }

    /// Moves the entry to the back. The relative order of every other
    /// entry is unchanged.
    pub fn bump_back(&mut self, handle: Handle) -> bool {
        self.splice(Position::Back, handle)
    }

    /// Removes the entry at `handle` and returns its key and value, or
    /// `None` if the handle is stale.
    pub fn remove(&mut self, handle: Handle) -> Option<(K, V)> {
        let removed = {
            let _g = self.reentrancy.enter();
            Self::unlink(&mut self.seq, &mut self.index, handle.raw_handle())
        };
        removed.map(|(e, _)| (e.key, e.value))
    }

    /// Removes the entry at `handle` and returns the handle of the entry
    /// that followed it (`None` at the back). A stale handle is a no-op
    /// that returns `None`.
    pub fn erase(&mut self, handle: Handle) -> Option<Handle> {
        let removed = {
            let _g = self.reentrancy.enter();
            Self::unlink(&mut self.seq, &mut self.index, handle.raw_handle())
        };
        removed.and_then(|(_, next)| next).map(Handle::new)
    }

    /// Erases from `first` up to but not including `last` (`None` erases
    /// through the back) and returns `last`. Each removal is individually
    /// complete; if `last` is not reachable from `first` everything from
    /// `first` onwards is erased.
    pub fn erase_range(&mut self, first: Handle, last: Option<Handle>) -> Option<Handle> {
        let mut cur = Some(first);
        let mut erased = 0usize;
        while let Some(h) = cur {
            if Some(h) == last {
                break;
            }
            if !self.is_live(h) {
                cur = None;
                break;
            }
            cur = self.erase(h);
            erased += 1;
        }
        log::trace!("erase_range removed {} entries", erased);
        cur
    }

    pub fn pop_front(&mut self) -> Option<(K, V)> {
        let head = self.seq.head()?;
        self.remove(Handle::new(head))
    }

    pub fn pop_back(&mut self) -> Option<(K, V)> {
        let tail = self.seq.tail()?;
        self.remove(Handle::new(tail))
    }

    /// Removes every entry. All outstanding handles become stale.
    ///
    /// Keys and values are dropped after the map is already empty.
    pub fn clear(&mut self) {
        let drained = {
            let _g = self.reentrancy.enter();
            self.index.clear();
            self.seq.drain()
        };
        log::trace!("cleared {} entries", drained.len());
        drop(drained);
    }

    /// Exchanges the contents of two maps. Handles follow their entries.
    pub fn swap(&mut self, other: &mut Self) {
        core::mem::swap(self, other);
    }

    /// Front-to-back traversal.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.seq.iter(),
        }
    }

    /// Front-to-back traversal with mutable values.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            inner: self.seq.iter_mut(),
        }
    }

    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &K> + ExactSizeIterator + '_ {
        self.iter().map(|(_, k, _)| k)
    }

    pub fn values(&self) -> impl DoubleEndedIterator<Item = &V> + ExactSizeIterator + '_ {
        self.iter().map(|(_, _, v)| v)
    }

    pub fn values_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut V> + ExactSizeIterator + '_ {
        self.iter_mut().map(|(_, _, v)| v)
    }

    /// Drops the index record and the sequence node for `slot` together.
    fn unlink(
        seq: &mut OrderedSequence<Entry<K, V>>,
        index: &mut KeyIndex,
        slot: DefaultKey,
    ) -> Option<(Entry<K, V>, Option<DefaultKey>)> {
        let hash = seq.get(slot)?.hash;
        let unregistered = index.unregister(hash, slot);
        debug_assert!(unregistered, "live entry had no index record");
        seq.remove(slot)
    }
}

impl<K, V, S> LinkedHandleMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_capacity_and_hasher(0, hasher)
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            hasher,
            index: KeyIndex::with_capacity(capacity),
            seq: OrderedSequence::with_capacity(capacity),
            reentrancy: DebugReentrancy::new(),
        }
    }

    fn make_hash<Q>(&self, q: &Q) -> u64
    where
        Q: ?Sized + Hash,
    {
        self.hasher.hash_one(q)
    }

    fn lookup_hashed<Q>(&self, hash: u64, q: &Q) -> Option<DefaultKey>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let seq = &self.seq;
        self.index.find(hash, |slot| {
            seq.get(slot)
                .map(|e| e.key.borrow() == q)
                .unwrap_or(false)
        })
    }

    fn lookup<Q>(&self, q: &Q) -> Option<DefaultKey>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.lookup_hashed(self.make_hash(q), q)
    }

    /// Resolves an insertion position to the node the new entry goes
    /// before (`None` = append).
    fn anchor(&self, position: Position) -> Option<DefaultKey> {
        match position {
            Position::Front => self.seq.head(),
            Position::Back => None,
            Position::Before(h) => {
                assert!(
                    self.seq.contains(h.raw_handle()),
                    "insertion position refers to an erased entry"
                );
                Some(h.raw_handle())
            }
        }
    }

    /// Links `entry` into the sequence, then records it in the index. If
    /// the index cannot grow, the freshly linked node is removed again
    /// before the error is returned.
    fn link_and_register(
        seq: &mut OrderedSequence<Entry<K, V>>,
        index: &mut KeyIndex,
        before: Option<DefaultKey>,
        entry: Entry<K, V>,
    ) -> Result<Handle> {
        let hash = entry.hash;
        let slot = seq.insert_before(before, entry);
        let linked = &*seq;
        let registered = index.register(hash, slot, |s| linked.get(s).map(|e| e.hash).unwrap_or(0));
        match registered {
            Ok(()) => Ok(Handle::new(slot)),
            Err(_) => {
                let _ = seq.remove(slot);
                log::warn!(
                    "key index exhausted with {} entries; provisional entry rolled back",
                    index.len()
                );
                Err(Error::ResourceExhausted { additional: 1 })
            }
        }
    }

    /// Inserts `key`/`value` at `position` unless the key is present.
    ///
    /// Returns the entry's handle and whether an insertion happened. On a
    /// key conflict the candidate pair is dropped and the existing entry
    /// is left untouched, value and position included.
    ///
    /// # Errors
    ///
    /// `Error::ResourceExhausted` if the index cannot grow; the map is
    /// unchanged.
    ///
    /// # Panics
    ///
    /// Panics if `position` is `Before` a stale handle and `key` is absent.
    pub fn emplace(&mut self, position: Position, key: K, value: V) -> Result<(Handle, bool)> {
        let _g = self.reentrancy.enter();
        let hash = self.make_hash(&key);
        if let Some(existing) = self.lookup_hashed(hash, &key) {
            return Ok((Handle::new(existing), false));
        }
        let before = self.anchor(position);
        let entry = Entry { key, value, hash };
        let handle = Self::link_and_register(&mut self.seq, &mut self.index, before, entry)?;
        Ok((handle, true))
    }

    pub fn emplace_front(&mut self, key: K, value: V) -> Result<(Handle, bool)> {
        self.emplace(Position::Front, key, value)
    }

    pub fn emplace_back(&mut self, key: K, value: V) -> Result<(Handle, bool)> {
        self.emplace(Position::Back, key, value)
    }

    /// Like [`emplace`](Self::emplace), but the value is only built when
    /// the key is absent: `make` never runs on a conflict.
    pub fn try_emplace<F>(&mut self, position: Position, key: K, make: F) -> Result<(Handle, bool)>
    where
        F: FnOnce() -> V,
    {
        let _g = self.reentrancy.enter();
        let hash = self.make_hash(&key);
        if let Some(existing) = self.lookup_hashed(hash, &key) {
            return Ok((Handle::new(existing), false));
        }
        let before = self.anchor(position);
        let entry = Entry {
            key,
            value: make(),
            hash,
        };
        let handle = Self::link_and_register(&mut self.seq, &mut self.index, before, entry)?;
        Ok((handle, true))
    }

    pub fn try_emplace_front<F>(&mut self, key: K, make: F) -> Result<(Handle, bool)>
    where
        F: FnOnce() -> V,
    {
        self.try_emplace(Position::Front, key, make)
    }

    pub fn try_emplace_back<F>(&mut self, key: K, make: F) -> Result<(Handle, bool)>
    where
        F: FnOnce() -> V,
    {
        self.try_emplace(Position::Back, key, make)
    }

    /// Returns the value for `key`, appending `V::default()` at the back
    /// first if the key is absent.
    pub fn get_or_insert_default(&mut self, key: K) -> Result<&mut V>
    where
        V: Default,
    {
        let _g = self.reentrancy.enter();
        let hash = self.make_hash(&key);
        let slot = match self.lookup_hashed(hash, &key) {
            Some(slot) => slot,
            None => {
                let entry = Entry {
                    key,
                    value: V::default(),
                    hash,
                };
                Self::link_and_register(&mut self.seq, &mut self.index, None, entry)?.raw_handle()
            }
        };
        let entry = self
            .seq
            .get_mut(slot)
            .expect("entry must exist after lookup or successful insert");
        Ok(&mut entry.value)
    }

    pub fn find<Q>(&self, q: &Q) -> Option<Handle>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter();
        self.lookup(q).map(Handle::new)
    }

    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter();
        self.lookup(q).is_some()
    }

    /// 1 if `q` is present, else 0.
    pub fn count<Q>(&self, q: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        usize::from(self.contains_key(q))
    }

    pub fn get<Q>(&self, q: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter();
        let slot = self.lookup(q)?;
        self.seq.get(slot).map(|e| &e.value)
    }

    pub fn get_mut<Q>(&mut self, q: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter();
        let slot = self.lookup(q)?;
        self.seq.get_mut(slot).map(|e| &mut e.value)
    }

    /// Strict lookup: never inserts.
    ///
    /// # Errors
    ///
    /// `Error::KeyNotFound` if `q` is absent.
    pub fn at<Q>(&self, q: &Q) -> Result<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.get(q).ok_or(Error::KeyNotFound)
    }

    /// # Errors
    ///
    /// `Error::KeyNotFound` if `q` is absent.
    pub fn at_mut<Q>(&mut self, q: &Q) -> Result<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.get_mut(q).ok_or(Error::KeyNotFound)
    }

    /// Removes `q` if present. Returns the number of entries removed.
    pub fn erase_key<Q>(&mut self, q: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let removed = {
            let _g = self.reentrancy.enter();
            match self.lookup(q) {
                Some(slot) => Self::unlink(&mut self.seq, &mut self.index, slot),
                None => None,
            }
        };
        usize::from(removed.is_some())
    }

    /// Sizes the key index to hold `expected` entries in total under the
    /// current load factor. Never shrinks; the sequence is not touched.
    pub fn reserve(&mut self, expected: usize) {
        let _g = self.reentrancy.enter();
        let seq = &self.seq;
        self.index
            .reserve(expected, |s| seq.get(s).map(|e| e.hash).unwrap_or(0));
        log::debug!(
            "reserved key index for {} entries (capacity {})",
            expected,
            self.index.capacity()
        );
    }

    /// Fallible growth for `additional` keys beyond the current length.
    ///
    /// # Errors
    ///
    /// `Error::ResourceExhausted` if the index cannot grow.
    pub fn try_reserve(&mut self, additional: usize) -> Result<()> {
        let _g = self.reentrancy.enter();
        let seq = &self.seq;
        self.index
            .try_reserve(additional, |s| seq.get(s).map(|e| e.hash).unwrap_or(0))
            .map_err(|_| Error::ResourceExhausted { additional })
    }

    /// Caps key index density at `factor` of the table's usable capacity
    /// (values above 1.0 are clamped), growing immediately if needed.
    ///
    /// # Panics
    ///
    /// Panics if `factor` is not positive or is NaN.
    pub fn set_max_load_factor(&mut self, factor: f32) {
        let _g = self.reentrancy.enter();
        let seq = &self.seq;
        self.index
            .set_max_load_factor(factor, |s| seq.get(s).map(|e| e.hash).unwrap_or(0));
    }
}

impl<K, V, S> fmt::Debug for LinkedHandleMap<K, V, S>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(_, k, v)| (k, v)))
            .finish()
    }
}

/// Two maps are equal when they hold the same pairs in the same order.
impl<K, V, S> PartialEq for LinkedHandleMap<K, V, S>
where
    K: PartialEq,
    V: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|((_, ka, va), (_, kb, vb))| ka == kb && va == vb)
    }
}

impl<K: Eq, V: Eq, S> Eq for LinkedHandleMap<K, V, S> {}

impl<K, Q, V, S> Index<&Q> for LinkedHandleMap<K, V, S>
where
    K: Eq + Hash + Borrow<Q>,
    Q: ?Sized + Eq + Hash,
    S: BuildHasher,
{
    type Output = V;

    /// # Panics
    ///
    /// Panics if the key is not present.
    fn index(&self, key: &Q) -> &V {
        self.get(key).expect("key not present in LinkedHandleMap")
    }
}

/// Appends pairs at the back with [`emplace`](LinkedHandleMap::emplace)
/// semantics: a key already present keeps its value and position.
///
/// # Panics
///
/// Panics if the key index cannot grow.
impl<K, V, S> Extend<(K, V)> for LinkedHandleMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        self.reserve(self.len().saturating_add(iter.size_hint().0));
        for (k, v) in iter {
            if let Err(e) = self.emplace_back(k, v) {
                panic!("LinkedHandleMap::extend: {e}");
            }
        }
    }
}

impl<K, V, S> FromIterator<(K, V)> for LinkedHandleMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::with_hasher(S::default());
        map.extend(iter);
        map
    }
}

impl<'a, K, V, S> IntoIterator for &'a LinkedHandleMap<K, V, S> {
    type Item = (Handle, &'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, K, V, S> IntoIterator for &'a mut LinkedHandleMap<K, V, S> {
    type Item = (Handle, &'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

/// Front-to-back iterator over `(handle, key, value)`.
pub struct Iter<'a, K, V> {
    inner: sequence::Iter<'a, Entry<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (Handle, &'a K, &'a V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(slot, e)| (Handle::new(slot), &e.key, &e.value))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> DoubleEndedIterator for Iter<'_, K, V> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner
            .next_back()
            .map(|(slot, e)| (Handle::new(slot), &e.key, &e.value))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Front-to-back iterator over `(handle, key, mutable value)`.
pub struct IterMut<'a, K, V> {
    inner: sequence::IterMut<'a, Entry<K, V>>,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (Handle, &'a K, &'a mut V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(slot, e)| (Handle::new(slot), &e.key, &mut e.value))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> DoubleEndedIterator for IterMut<'_, K, V> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner
            .next_back()
            .map(|(slot, e)| (Handle::new(slot), &e.key, &mut e.value))
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}

#[cfg(test)]
impl<K, V, S> LinkedHandleMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub(crate) fn fail_next_index_registration(&mut self) {
        self.index.fail_next_register();
    }

    /// Checks that the sequence and the index describe the same entries.
    pub(crate) fn assert_consistent(&self) {
        self.seq.debug_validate_links();
        assert_eq!(self.index.len(), self.seq.len(), "index/sequence size mismatch");
        for (slot, e) in self.seq.iter() {
            assert_eq!(e.hash, self.make_hash(&e.key), "stored hash is stale");
            assert_eq!(
                self.lookup_hashed(e.hash, &e.key),
                Some(slot),
                "index does not resolve key to its own entry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn order<S: BuildHasher>(m: &LinkedHandleMap<u32, String, S>) -> Vec<u32> {
        m.keys().copied().collect()
    }

    /// Invariant: a failed index registration leaves no provisional entry
    /// behind and the size unchanged.
    #[test]
    fn emplace_rolls_back_on_index_exhaustion() {
        let mut m: LinkedHandleMap<u32, String> = LinkedHandleMap::new();
        m.emplace_back(1, "1".into()).unwrap();
        m.emplace_back(2, "2".into()).unwrap();

        m.fail_next_index_registration();
        match m.emplace_front(3, "3".into()) {
            Err(Error::ResourceExhausted { .. }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(m.len(), 2);
        assert_eq!(order(&m), vec![1, 2]);
        assert!(!m.contains_key(&3));
        m.assert_consistent();

        // The map stays usable and the key can be inserted afterwards.
        let (h, inserted) = m.emplace_front(3, "3".into()).unwrap();
        assert!(inserted);
        assert_eq!(m.front_handle(), Some(h));
        m.assert_consistent();
    }

    /// Invariant: `try_emplace` and the index operator roll back the same way.
    #[test]
    fn lazy_insertions_roll_back_on_index_exhaustion() {
        let mut m: LinkedHandleMap<u32, String> = LinkedHandleMap::new();
        let (h1, _) = m.emplace_back(1, "1".into()).unwrap();

        m.fail_next_index_registration();
        let r = m.try_emplace(Position::Before(h1), 2, || "2".into());
        assert_eq!(r.unwrap_err(), Error::ResourceExhausted { additional: 1 });
        assert_eq!(order(&m), vec![1]);

        m.fail_next_index_registration();
        assert!(m.get_or_insert_default(9).is_err());
        assert_eq!(m.len(), 1);
        assert_eq!(m.front_handle(), Some(h1));
        assert_eq!(m.back_handle(), Some(h1));
        m.assert_consistent();
    }

    /// Invariant: a conflicting emplace never consults the index for
    /// registration, so a pending failure does not fire.
    #[test]
    fn conflict_short_circuits_before_registration() {
        let mut m: LinkedHandleMap<u32, String> = LinkedHandleMap::new();
        let (h, _) = m.emplace_back(1, "1".into()).unwrap();
        m.fail_next_index_registration();
        assert_eq!(m.emplace_front(1, "x".into()).unwrap(), (h, false));
        assert_eq!(m.at(&1).unwrap(), "1");
        // The pending failure is consumed by the next real insertion.
        assert!(m.emplace_back(2, "2".into()).is_err());
        m.assert_consistent();
    }

    /// Invariant: `try_emplace` on a present key never runs the constructor.
    #[test]
    fn try_emplace_is_lazy() {
        let mut m: LinkedHandleMap<String, String> = LinkedHandleMap::new();
        let calls = Cell::new(0);
        let make = || {
            calls.set(calls.get() + 1);
            "v".to_string()
        };
        let (h, inserted) = m.try_emplace_back("k".into(), make).unwrap();
        assert!(inserted);
        assert_eq!(calls.get(), 1);

        let (h2, inserted) = m
            .try_emplace_front("k".into(), || {
                calls.set(calls.get() + 1);
                "other".to_string()
            })
            .unwrap();
        assert!(!inserted);
        assert_eq!(h, h2);
        assert_eq!(calls.get(), 1, "constructor must not run on a present key");
        assert_eq!(h.value(&m), Some(&"v".to_string()));
    }

    /// Invariant: inserting before an erased entry is a caller bug.
    #[test]
    #[should_panic(expected = "insertion position refers to an erased entry")]
    fn emplace_before_stale_handle_panics() {
        let mut m: LinkedHandleMap<u32, String> = LinkedHandleMap::new();
        let (h, _) = m.emplace_back(1, "1".into()).unwrap();
        m.erase(h);
        let _ = m.emplace(Position::Before(h), 2, "2".into());
    }

    /// Invariant: a present key wins over a stale insertion anchor; the
    /// anchor is only consulted when a node is actually linked.
    #[test]
    fn conflict_with_stale_anchor_returns_existing() {
        let mut m: LinkedHandleMap<u32, String> = LinkedHandleMap::new();
        let (h1, _) = m.emplace_back(1, "1".into()).unwrap();
        let (h2, _) = m.emplace_back(2, "2".into()).unwrap();
        m.erase(h2);

        assert_eq!(m.emplace(Position::Before(h2), 1, "x".into()).unwrap(), (h1, false));
        assert_eq!(
            m.try_emplace(Position::Before(h2), 1, || "y".into()).unwrap(),
            (h1, false)
        );
        assert_eq!(m.at(&1).unwrap(), "1");
        assert_eq!(order(&m), vec![1]);
        m.assert_consistent();
    }

    /// Invariant: lookups survive total hash collisions.
    #[test]
    fn collisions_resolve_by_equality() {
        #[derive(Clone, Default)]
        struct ConstBuildHasher;
        struct ConstHasher;
        impl BuildHasher for ConstBuildHasher {
            type Hasher = ConstHasher;
            fn build_hasher(&self) -> Self::Hasher {
                ConstHasher
            }
        }
        impl core::hash::Hasher for ConstHasher {
            fn write(&mut self, _bytes: &[u8]) {}
            fn finish(&self) -> u64 {
                0
            }
        }

        let mut m: LinkedHandleMap<u32, String, ConstBuildHasher> =
            LinkedHandleMap::with_hasher(ConstBuildHasher);
        for k in 0..32u32 {
            m.emplace_back(k, k.to_string()).unwrap();
        }
        for k in (0..32u32).step_by(3) {
            assert_eq!(m.erase_key(&k), 1);
        }
        for k in 0..32u32 {
            assert_eq!(m.contains_key(&k), k % 3 != 0);
        }
        assert_eq!(order(&m).len(), m.len());
        m.assert_consistent();
    }

    /// Invariant (debug-only): re-entering the map from `K: Eq` during a
    /// lookup panics.
    #[cfg(debug_assertions)]
    #[test]
    fn reentrancy_panics_from_eq_during_find() {
        #[derive(Clone, Default)]
        struct ConstBuildHasher;
        struct ConstHasher;
        impl BuildHasher for ConstBuildHasher {
            type Hasher = ConstHasher;
            fn build_hasher(&self) -> Self::Hasher {
                ConstHasher
            }
        }
        impl core::hash::Hasher for ConstHasher {
            fn write(&mut self, _bytes: &[u8]) {}
            fn finish(&self) -> u64 {
                0
            }
        }

        type M = LinkedHandleMap<ReentryKey, i32, ConstBuildHasher>;

        struct ReentryKey {
            id: &'static str,
            map: *const M,
        }
        impl core::fmt::Debug for ReentryKey {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.id)
            }
        }
        impl PartialEq for ReentryKey {
            fn eq(&self, other: &Self) -> bool {
                if self.id == other.id {
                    return true;
                }
                let m = if self.map.is_null() { other.map } else { self.map };
                if !m.is_null() {
                    // Attempt to re-enter the same map during probing.
                    unsafe {
                        let _ = (*m).contains_key(other);
                    }
                }
                false
            }
        }
        impl Eq for ReentryKey {}
        impl Hash for ReentryKey {
            fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
                self.id.hash(state);
            }
        }

        let mut m: M = LinkedHandleMap::with_hasher(ConstBuildHasher);
        m.emplace_back(
            ReentryKey {
                id: "a",
                map: core::ptr::null(),
            },
            1,
        )
        .unwrap();

        let query = ReentryKey {
            id: "b",
            map: &m as *const M,
        };
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = m.find(&query);
        }));
        assert!(res.is_err(), "expected reentrancy to panic in debug builds");
    }

    /// Invariant (debug-only): `clear` drops keys and values outside the
    /// guarded section, so a value's `Drop` may query the map, as it may
    /// for `remove` and `erase_key`.
    #[cfg(debug_assertions)]
    #[test]
    fn clear_drops_values_outside_guarded_section() {
        use std::rc::Rc;

        type M = LinkedHandleMap<u32, Witness>;

        struct Witness {
            map: *const M,
            dropped: Rc<Cell<usize>>,
        }
        impl Drop for Witness {
            fn drop(&mut self) {
                // Re-enters the owning map; panics if a section is open.
                unsafe {
                    let _ = (*self.map).contains_key(&0);
                }
                self.dropped.set(self.dropped.get() + 1);
            }
        }

        let dropped = Rc::new(Cell::new(0));
        let mut m: M = LinkedHandleMap::new();
        let ptr = &m as *const M;
        for k in 1..=3 {
            m.emplace_back(
                k,
                Witness {
                    map: ptr,
                    dropped: dropped.clone(),
                },
            )
            .unwrap();
        }

        assert_eq!(m.erase_key(&1), 1);
        assert_eq!(dropped.get(), 1);
        m.clear();
        assert_eq!(dropped.get(), 3);
        assert!(m.is_empty());
        m.assert_consistent();
    }

    #[test]
    fn get_or_insert_default_appends_once() {
        let mut m: LinkedHandleMap<u32, String> = LinkedHandleMap::new();
        m.emplace_back(1, "1".into()).unwrap();
        m.get_or_insert_default(2).unwrap().push_str("two");
        m.get_or_insert_default(2).unwrap().push('!');
        *m.get_or_insert_default(1).unwrap() = "one".into();
        assert_eq!(order(&m), vec![1, 2]);
        assert_eq!(m.at(&2).unwrap(), "two!");
        assert_eq!(m.at(&1).unwrap(), "one");
        m.assert_consistent();
    }

    #[test]
    fn remove_and_pop_return_pairs() {
        let mut m: LinkedHandleMap<u32, String> = (1..=4).map(|k| (k, k.to_string())).collect();
        let h3 = m.find(&3).unwrap();
        assert_eq!(m.remove(h3), Some((3, "3".to_string())));
        assert_eq!(m.remove(h3), None);
        assert_eq!(m.pop_front(), Some((1, "1".to_string())));
        assert_eq!(m.pop_back(), Some((4, "4".to_string())));
        assert_eq!(order(&m), vec![2]);
        m.assert_consistent();
        assert_eq!(m.pop_back(), Some((2, "2".to_string())));
        assert_eq!(m.pop_front(), None);
        m.assert_consistent();
    }

    #[test]
    fn splice_to_arbitrary_position() {
        let mut m: LinkedHandleMap<u32, String> = (1..=5).map(|k| (k, k.to_string())).collect();
        let h1 = m.find(&1).unwrap();
        let h4 = m.find(&4).unwrap();
        assert!(m.splice(Position::Before(h4), h1));
        assert_eq!(order(&m), vec![2, 3, 1, 4, 5]);
        assert!(m.splice(Position::Before(h1), h1));
        assert_eq!(order(&m), vec![2, 3, 1, 4, 5]);
        assert_eq!(m.find(&1), Some(h1), "index untouched by splice");
        m.assert_consistent();
    }

    #[test]
    fn clear_keeps_index_and_sequence_together() {
        let mut m: LinkedHandleMap<u32, String> = (1..=5).map(|k| (k, k.to_string())).collect();
        let h = m.find(&2).unwrap();
        m.clear();
        assert!(m.is_empty());
        assert!(!m.is_live(h));
        assert_eq!(h.value(&m), None);
        m.assert_consistent();
        let (h2, _) = m.emplace_back(2, "again".into()).unwrap();
        assert_ne!(h, h2);
        m.assert_consistent();
    }
}
