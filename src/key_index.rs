//! KeyIndex: hash table from key hash to arena slot.
//!
//! The table stores only slot keys. Equality is decided by the caller,
//! which resolves a slot to its entry, and rehashing uses the hash each
//! entry stored at insertion. The index therefore never calls `K: Hash`
//! itself and never holds an address into the arena.

use hashbrown::{HashTable, TryReserveError};
use slotmap::DefaultKey;

// hashbrown keeps its tables at most 7/8 full.
const TABLE_MAX_LOAD: f32 = 0.875;

#[derive(Debug, Clone)]
pub(crate) struct KeyIndex {
    table: HashTable<DefaultKey>,
    max_load_factor: f32,
    #[cfg(test)]
    fail_next_register: bool,
}

impl KeyIndex {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            table: HashTable::with_capacity(capacity),
            max_load_factor: 1.0,
            #[cfg(test)]
            fail_next_register: false,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.table.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Theoretical upper bound on registered keys.
    pub(crate) fn max_len() -> usize {
        let per_bucket = core::mem::size_of::<DefaultKey>() + 1;
        (isize::MAX as usize / per_bucket) / 8 * 7
    }

    pub(crate) fn max_load_factor(&self) -> f32 {
        self.max_load_factor
    }

    pub(crate) fn find(
        &self,
        hash: u64,
        mut eq: impl FnMut(DefaultKey) -> bool,
    ) -> Option<DefaultKey> {
        self.table.find(hash, |&slot| eq(slot)).copied()
    }

    /// Records `slot` under `hash`. All growth happens through the fallible
    /// reservation, so on `Err` the table is exactly as before.
    pub(crate) fn register(
        &mut self,
        hash: u64,
        slot: DefaultKey,
        hash_of: impl Fn(DefaultKey) -> u64,
    ) -> Result<(), TryReserveError> {
        if self.take_injected_failure() {
            return Err(TryReserveError::CapacityOverflow);
        }
        let additional = self.growth_for(self.table.len() + 1);
        self.table.try_reserve(additional, |&s| hash_of(s))?;
        self.table.insert_unique(hash, slot, |&s| hash_of(s));
        Ok(())
    }

    pub(crate) fn unregister(&mut self, hash: u64, slot: DefaultKey) -> bool {
        match self.table.find_entry(hash, |&s| s == slot) {
            Ok(occupied) => {
                let _ = occupied.remove();
                true
            }
            Err(_) => false,
        }
    }

    /// Grows so that `expected` keys in total fit under the density
    /// ceiling. A target at or below the current length is a no-op.
    pub(crate) fn reserve(&mut self, expected: usize, hash_of: impl Fn(DefaultKey) -> u64) {
        let growth = self.growth_for(expected.max(self.table.len()));
        self.table.reserve(growth, |&s| hash_of(s));
    }

    pub(crate) fn try_reserve(
        &mut self,
        additional: usize,
        hash_of: impl Fn(DefaultKey) -> u64,
    ) -> Result<(), TryReserveError> {
        let growth = self.growth_for(self.table.len().saturating_add(additional));
        self.table.try_reserve(growth, |&s| hash_of(s))
    }

    /// Sets the density ceiling, relative to the table's own 7/8 limit,
    /// and grows right away if the current contents exceed it.
    pub(crate) fn set_max_load_factor(&mut self, factor: f32, hash_of: impl Fn(DefaultKey) -> u64) {
        assert!(
            factor > 0.0 && !factor.is_nan(),
            "max load factor must be positive, got {factor}"
        );
        let factor = factor.min(1.0);
        log::debug!(
            "key index max load factor {} -> {} (effective table load {:.3})",
            self.max_load_factor,
            factor,
            factor * TABLE_MAX_LOAD
        );
        self.max_load_factor = factor;
        let growth = self.growth_for(self.table.len());
        self.table.reserve(growth, |&s| hash_of(s));
    }

    pub(crate) fn clear(&mut self) {
        self.table.clear();
    }

    #[cfg(test)]
    pub(crate) fn fail_next_register(&mut self) {
        self.fail_next_register = true;
    }

    #[cfg(test)]
    fn take_injected_failure(&mut self) -> bool {
        core::mem::take(&mut self.fail_next_register)
    }

    #[cfg(not(test))]
    #[inline(always)]
    fn take_injected_failure(&mut self) -> bool {
        false
    }

    /// Additional slots to request so that `target` keys fit under the
    /// configured density.
    fn growth_for(&self, target: usize) -> usize {
        let required = if self.max_load_factor >= 1.0 {
            target
        } else {
            (target as f64 / f64::from(self.max_load_factor)).ceil() as usize
        };
        required.saturating_sub(self.table.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn fixture(n: u64) -> (SlotMap<DefaultKey, u64>, KeyIndex) {
        let mut slots = SlotMap::with_key();
        let mut index = KeyIndex::with_capacity(0);
        for h in 0..n {
            let slot = slots.insert(h);
            index.register(h, slot, |s| slots[s]).unwrap();
        }
        (slots, index)
    }

    #[test]
    fn register_find_unregister() {
        let (slots, mut index) = fixture(16);
        assert_eq!(index.len(), 16);
        for (slot, &h) in slots.iter() {
            assert_eq!(index.find(h, |s| s == slot), Some(slot));
        }
        let (slot, &h) = slots.iter().next().unwrap();
        assert!(index.unregister(h, slot));
        assert!(!index.unregister(h, slot));
        assert_eq!(index.find(h, |s| s == slot), None);
        assert_eq!(index.len(), 15);
    }

    #[test]
    fn injected_failure_leaves_table_untouched() {
        let (mut slots, mut index) = fixture(3);
        let slot = slots.insert(99);
        index.fail_next_register();
        assert!(index.register(99, slot, |s| slots[s]).is_err());
        assert_eq!(index.len(), 3);
        assert_eq!(index.find(99, |s| s == slot), None);
        // One-shot: the next registration goes through.
        assert!(index.register(99, slot, |s| slots[s]).is_ok());
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn load_factor_keeps_headroom() {
        let mut slots: SlotMap<DefaultKey, u64> = SlotMap::with_key();
        let mut index = KeyIndex::with_capacity(0);
        index.set_max_load_factor(0.5, |s| slots[s]);
        for h in 0..100 {
            let slot = slots.insert(h);
            index.register(h, slot, |s| slots[s]).unwrap();
            assert!(index.capacity() >= 2 * index.len());
        }
    }

    #[test]
    fn load_factor_is_clamped() {
        let (slots, mut index) = fixture(4);
        index.set_max_load_factor(4.0, |s| slots[s]);
        assert_eq!(index.max_load_factor(), 1.0);
    }

    #[test]
    #[should_panic(expected = "max load factor must be positive")]
    fn zero_load_factor_panics() {
        let (slots, mut index) = fixture(1);
        index.set_max_load_factor(0.0, |s| slots[s]);
    }

    #[test]
    fn reserve_grows_capacity() {
        let (slots, mut index) = fixture(2);
        index.reserve(1000, |s| slots[s]);
        assert!(index.capacity() >= 1000);
        let cap = index.capacity();
        index.reserve(2, |s| slots[s]);
        assert_eq!(index.capacity(), cap, "target below current size is a no-op");
        assert!(index.try_reserve(10, |s| slots[s]).is_ok());
        assert!(index.try_reserve(usize::MAX, |s| slots[s]).is_err());
    }
}
