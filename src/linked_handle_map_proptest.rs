#![cfg(test)]

// Property tests for LinkedHandleMap kept inside the crate so they can use
// the consistency check and index fault injection.

use crate::error::Error;
use crate::linked_handle_map::{Handle, LinkedHandleMap, Position};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hasher};

// Key newtype with Borrow<str> to exercise borrowed lookup.
#[derive(Clone, Eq, PartialEq, Hash)]
struct Key(String);
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::borrow::Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// Pool-indexed operations: indices shrink toward earlier keys and op
// lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    EmplaceFront(usize, i32),
    EmplaceBack(usize, i32),
    EmplaceBefore(usize, usize, i32),
    TryEmplaceFront(usize, i32),
    TryEmplaceBack(usize, i32),
    IndexDefault(usize),
    EraseKey(usize),
    EraseHandle(usize),
    BumpFront(usize),
    BumpBack(usize),
    SpliceBefore(usize, usize),
    Mutate(usize, i32),
    PopFront,
    PopBack,
    FailingInsert(usize, i32),
    Contains(String),
    Clear,
}

fn key_from(pool: &[String], i: usize) -> Key {
    Key(pool[i].clone())
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,4}", 1..=6).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(pool.clone());
        let op = prop_oneof![
            3 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::EmplaceFront(i, v)),
            3 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::EmplaceBack(i, v)),
            2 => (idx.clone(), idx.clone(), any::<i32>()).prop_map(|(i, j, v)| OpI::EmplaceBefore(i, j, v)),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::TryEmplaceFront(i, v)),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::TryEmplaceBack(i, v)),
            2 => idx.clone().prop_map(OpI::IndexDefault),
            2 => idx.clone().prop_map(OpI::EraseKey),
            2 => idx.clone().prop_map(OpI::EraseHandle),
            2 => idx.clone().prop_map(OpI::BumpFront),
            2 => idx.clone().prop_map(OpI::BumpBack),
            2 => (idx.clone(), idx.clone()).prop_map(|(i, j)| OpI::SpliceBefore(i, j)),
            1 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| OpI::Mutate(i, d)),
            1 => Just(OpI::PopFront),
            1 => Just(OpI::PopBack),
            1 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::FailingInsert(i, v)),
            1 => prop_oneof![
                contains_pool.prop_map(|s: String| s),
                "[a-z]{0,4}".prop_map(|s| s)
            ]
            .prop_map(OpI::Contains),
            1 => Just(OpI::Clear),
        ];
        proptest::collection::vec(op, 1..80).prop_map(move |ops| (pool.clone(), ops))
    })
}

struct Model {
    order: Vec<(Key, i32)>,
    live: HashMap<Key, Handle>,
    stale: Vec<Handle>,
}

impl Model {
    fn pos(&self, k: &Key) -> Option<usize> {
        self.order.iter().position(|(mk, _)| mk == k)
    }

    fn forget(&mut self, k: &Key) {
        if let Some(h) = self.live.remove(k) {
            self.stale.push(h);
        }
        if let Some(p) = self.pos(k) {
            self.order.remove(p);
        }
    }

    // Checks an insertion result against the model and applies it at `at`.
    fn check_insert(
        &mut self,
        res: Result<(Handle, bool), Error>,
        k: Key,
        v: i32,
        at: usize,
    ) -> Result<bool, TestCaseError> {
        let (h, inserted) = res.map_err(|e| TestCaseError::fail(format!("unexpected error: {e}")))?;
        match self.live.get(&k) {
            Some(&existing) => {
                prop_assert!(!inserted, "present key must not be inserted again");
                prop_assert_eq!(h, existing);
            }
            None => {
                prop_assert!(inserted, "absent key must be inserted");
                self.live.insert(k.clone(), h);
                self.order.insert(at, (k, v));
            }
        }
        Ok(inserted)
    }
}

// Property: State-machine equivalence against an ordered Vec model.
// Invariants exercised across random operation sequences:
// - Front-to-back order equals the model after every insert/erase/splice/bump.
// - len() parity; index and sequence stay consistent (assert_consistent).
// - Every live key resolves to the handle it was inserted with.
// - try_emplace never runs its constructor for a present key.
// - Erased and cleared handles never resolve again.
// - A failed index registration leaves the map exactly as before.
fn run_scenario<S: BuildHasher>(
    mut sut: LinkedHandleMap<Key, i32, S>,
    pool: &[String],
    ops: Vec<OpI>,
) -> Result<(), TestCaseError> {
    let mut model = Model {
        order: Vec::new(),
        live: HashMap::new(),
        stale: Vec::new(),
    };
    let calls = Cell::new(0usize);

    for op in ops {
        let front = matches!(
            op,
            OpI::TryEmplaceFront(..) | OpI::BumpFront(..) | OpI::PopFront
        );
        match op {
            OpI::EmplaceFront(i, v) => {
                let k = key_from(pool, i);
                let res = sut.emplace_front(k.clone(), v);
                model.check_insert(res, k, v, 0)?;
            }
            OpI::EmplaceBack(i, v) => {
                let k = key_from(pool, i);
                let res = sut.emplace_back(k.clone(), v);
                let at = model.order.len();
                model.check_insert(res, k, v, at)?;
            }
            OpI::EmplaceBefore(i, j, v) => {
                let k = key_from(pool, i);
                let anchor = key_from(pool, j);
                let (position, at) = match model.live.get(&anchor) {
                    Some(&h) => (Position::Before(h), model.pos(&anchor).unwrap()),
                    None => (Position::Back, model.order.len()),
                };
                let res = sut.emplace(position, k.clone(), v);
                model.check_insert(res, k, v, at)?;
            }
            OpI::TryEmplaceFront(i, v) | OpI::TryEmplaceBack(i, v) => {
                let k = key_from(pool, i);
                let before = calls.get();
                let make = || {
                    calls.set(calls.get() + 1);
                    v
                };
                let (res, at) = if front {
                    (sut.try_emplace_front(k.clone(), make), 0)
                } else {
                    (sut.try_emplace_back(k.clone(), make), model.order.len())
                };
                let inserted = model.check_insert(res, k, v, at)?;
                prop_assert_eq!(calls.get(), before + usize::from(inserted));
            }
            OpI::IndexDefault(i) => {
                let k = key_from(pool, i);
                let slot = sut
                    .get_or_insert_default(k.clone())
                    .map_err(|e| TestCaseError::fail(format!("unexpected error: {e}")))?;
                *slot = slot.wrapping_add(1);
                match model.pos(&k) {
                    Some(p) => model.order[p].1 = model.order[p].1.wrapping_add(1),
                    None => {
                        model.order.push((k.clone(), 1));
                        let h = sut.find(&k).expect("inserted key must be found");
                        model.live.insert(k, h);
                    }
                }
            }
            OpI::EraseKey(i) => {
                let k = key_from(pool, i);
                let present = model.live.contains_key(&k);
                // Borrowed lookup: stored Key, queried by &str.
                prop_assert_eq!(sut.erase_key(k.0.as_str()), usize::from(present));
                prop_assert_eq!(sut.erase_key(k.0.as_str()), 0, "second erase is a no-op");
                model.forget(&k);
            }
            OpI::EraseHandle(i) => {
                let k = key_from(pool, i);
                if let Some(&h) = model.live.get(&k) {
                    let p = model.pos(&k).unwrap();
                    let expected = model
                        .order
                        .get(p + 1)
                        .map(|(nk, _)| model.live[nk]);
                    prop_assert_eq!(sut.erase(h), expected);
                    model.forget(&k);
                } else if let Some(&h) = model.stale.first() {
                    prop_assert_eq!(sut.erase(h), None);
                }
            }
            OpI::BumpFront(i) | OpI::BumpBack(i) => {
                let k = key_from(pool, i);
                if let Some(&h) = model.live.get(&k) {
                    let moved = if front { sut.bump_front(h) } else { sut.bump_back(h) };
                    prop_assert!(moved);
                    let p = model.pos(&k).unwrap();
                    let item = model.order.remove(p);
                    if front {
                        model.order.insert(0, item);
                        prop_assert_eq!(sut.front_handle(), Some(h));
                    } else {
                        model.order.push(item);
                        prop_assert_eq!(sut.back_handle(), Some(h));
                    }
                } else if let Some(&h) = model.stale.first() {
                    prop_assert!(!sut.bump_front(h));
                }
            }
            OpI::SpliceBefore(i, j) => {
                let k = key_from(pool, i);
                let anchor = key_from(pool, j);
                if let (Some(&h), Some(&ha)) = (model.live.get(&k), model.live.get(&anchor)) {
                    prop_assert!(sut.splice(Position::Before(ha), h));
                    if k != anchor {
                        let p = model.pos(&k).unwrap();
                        let item = model.order.remove(p);
                        let pa = model.pos(&anchor).unwrap();
                        model.order.insert(pa, item);
                    }
                }
            }
            OpI::Mutate(i, d) => {
                let k = key_from(pool, i);
                if let Some(&h) = model.live.get(&k) {
                    match h.value_mut(&mut sut) {
                        Some(vr) => *vr = vr.wrapping_add(d),
                        None => prop_assert!(false, "live handle should resolve"),
                    }
                    let p = model.pos(&k).unwrap();
                    model.order[p].1 = model.order[p].1.wrapping_add(d);
                }
            }
            OpI::PopFront | OpI::PopBack => {
                let got = if front { sut.pop_front() } else { sut.pop_back() };
                let expected = if front {
                    model.order.first().cloned()
                } else {
                    model.order.last().cloned()
                };
                prop_assert_eq!(got.clone(), expected);
                if let Some((k, _)) = got {
                    model.forget(&k);
                }
            }
            OpI::FailingInsert(i, v) => {
                let k = key_from(pool, i);
                if !model.live.contains_key(&k) {
                    sut.fail_next_index_registration();
                    let res = sut.emplace_back(k.clone(), v);
                    let exhausted = matches!(res, Err(Error::ResourceExhausted { .. }));
                    prop_assert!(exhausted, "failed registration must report exhaustion, got {:?}", res);
                    prop_assert!(!sut.contains_key(&k));
                }
            }
            OpI::Contains(s) => {
                let has_model = model.order.iter().any(|(k, _)| k.0 == s);
                prop_assert_eq!(sut.contains_key(s.as_str()), has_model);
                prop_assert_eq!(sut.count(s.as_str()), usize::from(has_model));
            }
            OpI::Clear => {
                sut.clear();
                model.stale.extend(model.live.drain().map(|(_, h)| h));
                model.order.clear();
            }
        }

        // Post-conditions after each op
        sut.assert_consistent();
        prop_assert_eq!(sut.len(), model.order.len());
        prop_assert_eq!(sut.is_empty(), model.order.is_empty());
        let seen: Vec<(Key, i32)> = sut.iter().map(|(_, k, v)| (k.clone(), *v)).collect();
        prop_assert_eq!(&seen, &model.order);
        let seen_rev: Vec<Key> = sut.iter().rev().map(|(_, k, _)| k.clone()).collect();
        let model_rev: Vec<Key> = model.order.iter().rev().map(|(k, _)| k.clone()).collect();
        prop_assert_eq!(seen_rev, model_rev);
        for (k, &h) in &model.live {
            prop_assert_eq!(sut.find(k), Some(h));
            prop_assert_eq!(h.key(&sut), Some(k));
        }
        for &h in &model.stale {
            prop_assert!(h.value(&sut).is_none());
            prop_assert!(!sut.is_live(h));
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        run_scenario(LinkedHandleMap::new(), &pool, ops)?;
    }
}

// Collision variant using a constant hasher to stress equality resolution.
#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

// Property: same invariants under worst-case collisions and a dense
// load-factor setting, which forces frequent index growth.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        let mut sut: LinkedHandleMap<Key, i32, ConstBuildHasher> =
            LinkedHandleMap::with_hasher(ConstBuildHasher);
        sut.set_max_load_factor(0.25);
        run_scenario(sut, &pool, ops)?;
    }
}
