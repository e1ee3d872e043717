//! OrderedSequence: a doubly linked list whose nodes live in a slot arena.
//!
//! Nodes are addressed by generational `slotmap` keys and link to each
//! other by key, never by address, so the arena may grow and reallocate
//! without invalidating anything a caller holds.
//!
//! ```text
//!   head ─► [s1] ◄──► [s2] ◄──► [s3] ◄── tail
//! ```
//!
//! Insertion before any node, removal, and relocation are O(1). A key
//! stays valid across relocation of its own node and across any change
//! to other nodes; it goes stale only when its node is removed or the
//! sequence is cleared.

use slotmap::{DefaultKey, SecondaryMap, SlotMap};

#[derive(Debug, Clone)]
struct Node<T> {
    item: T,
    prev: Option<DefaultKey>,
    next: Option<DefaultKey>,
}

#[derive(Debug, Clone)]
pub(crate) struct OrderedSequence<T> {
    nodes: SlotMap<DefaultKey, Node<T>>,
    head: Option<DefaultKey>,
    tail: Option<DefaultKey>,
}

impl<T> OrderedSequence<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: SlotMap::with_capacity_and_key(capacity),
            head: None,
            tail: None,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Upper bound on live nodes; slot indices are 32-bit.
    pub(crate) const fn max_len() -> usize {
        u32::MAX as usize - 1
    }

    #[inline]
    pub(crate) fn head(&self) -> Option<DefaultKey> {
        self.head
    }

    #[inline]
    pub(crate) fn tail(&self) -> Option<DefaultKey> {
        self.tail
    }

    #[inline]
    pub(crate) fn contains(&self, slot: DefaultKey) -> bool {
        self.nodes.contains_key(slot)
    }

    #[inline]
    pub(crate) fn get(&self, slot: DefaultKey) -> Option<&T> {
        self.nodes.get(slot).map(|n| &n.item)
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, slot: DefaultKey) -> Option<&mut T> {
        self.nodes.get_mut(slot).map(|n| &mut n.item)
    }

    pub(crate) fn next(&self, slot: DefaultKey) -> Option<DefaultKey> {
        self.nodes.get(slot).and_then(|n| n.next)
    }

    pub(crate) fn prev(&self, slot: DefaultKey) -> Option<DefaultKey> {
        self.nodes.get(slot).and_then(|n| n.prev)
    }

    /// Links `item` immediately before `before`, or at the back when
    /// `before` is `None`. `before` must be live.
    pub(crate) fn insert_before(&mut self, before: Option<DefaultKey>, item: T) -> DefaultKey {
        debug_assert!(before.map_or(true, |b| self.nodes.contains_key(b)));
        let slot = self.nodes.insert(Node {
            item,
            prev: None,
            next: None,
        });
        self.attach_before(slot, before);
        slot
    }

    /// Unlinks and frees `slot`, returning its item and the key of the
    /// node that followed it.
    pub(crate) fn remove(&mut self, slot: DefaultKey) -> Option<(T, Option<DefaultKey>)> {
        let next = self.detach(slot)?;
        let node = self.nodes.remove(slot)?;
        Some((node.item, next))
    }

    /// Relocates `slot` to sit immediately before `before` (`None` = back).
    ///
    /// Returns `false` and changes nothing if either key is stale. Moving
    /// a node before itself or before its current successor is a no-op.
    pub(crate) fn move_before(&mut self, slot: DefaultKey, before: Option<DefaultKey>) -> bool {
        if !self.nodes.contains_key(slot) {
            return false;
        }
        if let Some(b) = before {
            if !self.nodes.contains_key(b) {
                return false;
            }
            if b == slot {
                return true;
            }
        }
        if self.nodes[slot].next == before {
            return true;
        }
        self.detach(slot);
        self.attach_before(slot, before);
        true
    }

    /// Unlinks every node and hands the items back in arena order. Every
    /// key goes stale.
    pub(crate) fn drain(&mut self) -> Vec<T> {
        self.head = None;
        self.tail = None;
        self.nodes.drain().map(|(_, node)| node.item).collect()
    }

    pub(crate) fn iter(&self) -> Iter<'_, T> {
        Iter {
            nodes: &self.nodes,
            front: self.head,
            back: self.tail,
            remaining: self.nodes.len(),
        }
    }

    /// Ordered mutable traversal. Builds an O(n) scratch ordering first so
    /// each item can be handed out through safe disjoint borrows.
    pub(crate) fn iter_mut(&mut self) -> IterMut<'_, T> {
        let mut rank: SecondaryMap<DefaultKey, usize> = SecondaryMap::with_capacity(self.len());
        for (i, (slot, _)) in self.iter().enumerate() {
            rank.insert(slot, i);
        }
        let mut ordered: Vec<Option<(DefaultKey, &mut T)>> = Vec::with_capacity(self.len());
        ordered.resize_with(self.len(), || None);
        for (slot, node) in self.nodes.iter_mut() {
            if let Some(&i) = rank.get(slot) {
                ordered[i] = Some((slot, &mut node.item));
            }
        }
        IterMut {
            inner: ordered.into_iter().flatten().collect::<Vec<_>>().into_iter(),
        }
    }

    /// Returns the node's neighbours to each other and clears its links.
    /// Yields the former successor.
    fn detach(&mut self, slot: DefaultKey) -> Option<Option<DefaultKey>> {
        let (prev, next) = {
            let node = self.nodes.get(slot)?;
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        let node = &mut self.nodes[slot];
        node.prev = None;
        node.next = None;
        Some(next)
    }

    fn attach_before(&mut self, slot: DefaultKey, before: Option<DefaultKey>) {
        let prev = match before {
            Some(b) => self.nodes[b].prev,
            None => self.tail,
        };
        {
            let node = &mut self.nodes[slot];
            node.prev = prev;
            node.next = before;
        }
        match prev {
            Some(p) => self.nodes[p].next = Some(slot),
            None => self.head = Some(slot),
        }
        match before {
            Some(b) => self.nodes[b].prev = Some(slot),
            None => self.tail = Some(slot),
        }
    }

    #[cfg(test)]
    pub(crate) fn debug_validate_links(&self) {
        if self.head.is_none() || self.tail.is_none() {
            assert!(self.head.is_none());
            assert!(self.tail.is_none());
            assert_eq!(self.nodes.len(), 0);
            return;
        }
        let mut count = 0usize;
        let mut prev = None;
        let mut cur = self.head;
        while let Some(slot) = cur {
            let node = self.nodes.get(slot).expect("linked node missing from arena");
            assert_eq!(node.prev, prev, "back link mismatch");
            prev = Some(slot);
            cur = node.next;
            count += 1;
            assert!(count <= self.nodes.len(), "cycle in sequence");
        }
        assert_eq!(self.tail, prev);
        assert_eq!(count, self.nodes.len());
    }
}

/// Front-to-back traversal yielding `(slot, &item)`.
pub(crate) struct Iter<'a, T> {
    nodes: &'a SlotMap<DefaultKey, Node<T>>,
    front: Option<DefaultKey>,
    back: Option<DefaultKey>,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (DefaultKey, &'a T);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let slot = self.front?;
        let node = self.nodes.get(slot)?;
        self.front = node.next;
        self.remaining -= 1;
        Some((slot, &node.item))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> DoubleEndedIterator for Iter<'_, T> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let slot = self.back?;
        let node = self.nodes.get(slot)?;
        self.back = node.prev;
        self.remaining -= 1;
        Some((slot, &node.item))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

impl<T> Clone for Iter<'_, T> {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes,
            front: self.front,
            back: self.back,
            remaining: self.remaining,
        }
    }
}

/// Front-to-back traversal yielding `(slot, &mut item)`.
pub(crate) struct IterMut<'a, T> {
    inner: std::vec::IntoIter<(DefaultKey, &'a mut T)>,
}

impl<'a, T> Iterator for IterMut<'a, T> {
    type Item = (DefaultKey, &'a mut T);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> DoubleEndedIterator for IterMut<'_, T> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back()
    }
}

impl<T> ExactSizeIterator for IterMut<'_, T> {}
