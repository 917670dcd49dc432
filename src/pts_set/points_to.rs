// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Points-to sets. The published interface guarantees ascending-order
//! iteration, which downstream consumers (persistence, alias queries,
//! deterministic solving) rely on.

use std::fmt;

use crate::pts_set::bit_set::{BitIter, DenseBitSet, Idx};

const SMALL_SET_CAPACITY: usize = 32;

pub trait PointsToSet<T> {
    type Iter<'a>: Iterator<Item = T>
    where
        Self: 'a;

    fn new() -> Self;
    fn clear(&mut self);
    fn count(&self) -> usize;
    fn contains(&self, elem: T) -> bool;
    fn is_empty(&self) -> bool;
    fn superset(&self, other: &Self) -> bool;
    fn insert(&mut self, elem: T) -> bool;
    fn remove(&mut self, elem: T) -> bool;
    fn union(&mut self, other: &Self) -> bool;
    fn subtract(&mut self, other: &Self) -> bool;
    fn intersect(&mut self, other: &Self) -> bool;
    fn iter<'a>(&'a self) -> Self::Iter<'a>;
}

/// Hybrid points-to set: an unsorted inline vector while the set is small, a
/// dense bit vector once it grows past [`SMALL_SET_CAPACITY`].
#[derive(Clone)]
pub struct HybridNodeSet<T> {
    repr: Repr<T>,
}

#[derive(Clone)]
enum Repr<T> {
    Inline(Vec<T>),
    Bits(DenseBitSet<T>),
}

impl<T: Idx + Ord> HybridNodeSet<T> {
    /// True iff the two sets share at least one element.
    pub fn intersects(&self, other: &HybridNodeSet<T>) -> bool {
        // Probe the smaller side against the larger one.
        if self.count() <= other.count() {
            self.iter().any(|e| other.contains(e))
        } else {
            other.iter().any(|e| self.contains(e))
        }
    }

    fn spill(small: &[T], extra: T) -> (DenseBitSet<T>, bool) {
        let mut bits = DenseBitSet::new();
        for elem in small {
            bits.insert(*elem);
        }
        let changed = bits.insert(extra);
        (bits, changed)
    }
}

impl<T: Idx + Ord> Default for HybridNodeSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Idx + Ord> PointsToSet<T> for HybridNodeSet<T> {
    fn new() -> Self {
        HybridNodeSet {
            repr: Repr::Inline(Vec::new()),
        }
    }

    fn clear(&mut self) {
        self.repr = Repr::Inline(Vec::new());
    }

    fn count(&self) -> usize {
        match &self.repr {
            Repr::Inline(small) => small.len(),
            Repr::Bits(bits) => bits.count(),
        }
    }

    fn contains(&self, elem: T) -> bool {
        match &self.repr {
            Repr::Inline(small) => small.contains(&elem),
            Repr::Bits(bits) => bits.contains(elem),
        }
    }

    fn is_empty(&self) -> bool {
        match &self.repr {
            Repr::Inline(small) => small.is_empty(),
            Repr::Bits(bits) => bits.is_empty(),
        }
    }

    fn superset(&self, other: &Self) -> bool {
        match (&self.repr, &other.repr) {
            (Repr::Bits(a), Repr::Bits(b)) => a.superset(b),
            _ => other.iter().all(|e| self.contains(e)),
        }
    }

    fn insert(&mut self, elem: T) -> bool {
        match &mut self.repr {
            Repr::Inline(small) => {
                if small.contains(&elem) {
                    false
                } else if small.len() < SMALL_SET_CAPACITY {
                    small.push(elem);
                    true
                } else {
                    let (bits, changed) = Self::spill(small, elem);
                    self.repr = Repr::Bits(bits);
                    changed
                }
            }
            Repr::Bits(bits) => bits.insert(elem),
        }
    }

    fn remove(&mut self, elem: T) -> bool {
        // A bit set never shrinks back to the inline form.
        match &mut self.repr {
            Repr::Inline(small) => {
                if let Some(pos) = small.iter().position(|e| *e == elem) {
                    small.swap_remove(pos);
                    true
                } else {
                    false
                }
            }
            Repr::Bits(bits) => bits.remove(elem),
        }
    }

    fn union(&mut self, other: &Self) -> bool {
        if let (Repr::Bits(a), Repr::Bits(b)) = (&mut self.repr, &other.repr) {
            return a.union(b);
        }
        if let Repr::Inline(b) = &other.repr {
            let mut changed = false;
            for elem in b.clone() {
                changed |= self.insert(elem);
            }
            return changed;
        }
        // Inline absorbing a bit set: upgrade first.
        let mut bits = DenseBitSet::new();
        if let Repr::Inline(a) = &self.repr {
            for elem in a {
                bits.insert(*elem);
            }
        }
        let changed = match &other.repr {
            Repr::Bits(b) => bits.union(b),
            Repr::Inline(_) => unreachable!(),
        };
        self.repr = Repr::Bits(bits);
        changed
    }

    fn subtract(&mut self, other: &Self) -> bool {
        match (&mut self.repr, &other.repr) {
            (Repr::Bits(a), Repr::Bits(b)) => a.subtract(b),
            (Repr::Bits(a), Repr::Inline(b)) => {
                let mut changed = false;
                for elem in b {
                    changed |= a.remove(*elem);
                }
                changed
            }
            (Repr::Inline(a), _) => {
                let before = a.len();
                a.retain(|e| !other.contains(*e));
                a.len() != before
            }
        }
    }

    fn intersect(&mut self, other: &Self) -> bool {
        match (&mut self.repr, &other.repr) {
            (Repr::Bits(a), Repr::Bits(b)) => a.intersect(b),
            (Repr::Bits(a), Repr::Inline(b)) => {
                // The result fits in the inline form again.
                let mut small: Vec<T> = b.iter().copied().filter(|e| a.contains(*e)).collect();
                small.sort_unstable();
                let changed = small.len() != a.count();
                self.repr = Repr::Inline(small);
                changed
            }
            (Repr::Inline(a), _) => {
                let before = a.len();
                a.retain(|e| other.contains(*e));
                a.len() != before
            }
        }
    }

    type Iter<'a> = HybridIter<'a, T>;
    fn iter(&self) -> HybridIter<'_, T> {
        match &self.repr {
            Repr::Inline(small) => {
                let mut sorted: Vec<T> = small.clone();
                sorted.sort_unstable();
                HybridIter::Inline {
                    elems: sorted,
                    next: 0,
                }
            }
            Repr::Bits(bits) => HybridIter::Bits(bits.iter()),
        }
    }
}

impl<'a, T: Idx + Ord> IntoIterator for &'a HybridNodeSet<T> {
    type Item = T;
    type IntoIter = HybridIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Idx + Ord> fmt::Debug for HybridNodeSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T: Idx + Ord> FromIterator<T> for HybridNodeSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = HybridNodeSet::new();
        for elem in iter {
            set.insert(elem);
        }
        set
    }
}

impl<T: Idx + Ord> PartialEq for HybridNodeSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.count() == other.count() && self.superset(other)
    }
}

impl<T: Idx + Ord> Eq for HybridNodeSet<T> {}

pub enum HybridIter<'a, T: Idx> {
    Inline { elems: Vec<T>, next: usize },
    Bits(BitIter<'a, T>),
}

impl<'a, T: Idx> Iterator for HybridIter<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        match self {
            HybridIter::Inline { elems, next } => {
                let elem = elems.get(*next).copied();
                *next += 1;
                elem
            }
            HybridIter::Bits(bits) => bits.next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::BTreeSet;

    fn random_set(len: usize) -> BTreeSet<u32> {
        let mut rng = rand::thread_rng();
        let mut set = BTreeSet::new();
        while set.len() < len {
            set.insert(rng.gen_range(1..1000));
        }
        set
    }

    fn hybrid_of(set: &BTreeSet<u32>) -> HybridNodeSet<u32> {
        set.iter().copied().collect()
    }

    #[test]
    fn small_set_stays_inline() {
        let reference = random_set(8);
        let mut set = hybrid_of(&reference);
        assert_eq!(set.count(), 8);
        assert!(matches!(set.repr, Repr::Inline(_)));
        assert_eq!(set.iter().collect::<BTreeSet<_>>(), reference);

        let probe = *reference.iter().next().unwrap();
        assert!(set.contains(probe));
        assert!(set.remove(probe));
        assert!(!set.contains(probe));
        assert_eq!(set.count(), 7);
    }

    #[test]
    fn large_set_spills_to_bits() {
        let reference = random_set(SMALL_SET_CAPACITY + 3);
        let mut set = hybrid_of(&reference);
        assert!(matches!(set.repr, Repr::Bits(_)));
        assert_eq!(set.iter().collect::<BTreeSet<_>>(), reference);

        let probe = *reference.iter().last().unwrap();
        assert!(set.remove(probe));
        assert_eq!(set.count(), SMALL_SET_CAPACITY + 2);
    }

    #[test]
    fn iteration_is_ascending_in_both_forms() {
        for len in [5, SMALL_SET_CAPACITY + 5] {
            let reference = random_set(len);
            let set = hybrid_of(&reference);
            let order: Vec<u32> = set.iter().collect();
            let mut sorted = order.clone();
            sorted.sort_unstable();
            assert_eq!(order, sorted);
        }
    }

    #[test]
    fn union_across_forms() {
        let small_ref = random_set(8);
        let large_ref = random_set(SMALL_SET_CAPACITY + 3);
        let small = hybrid_of(&small_ref);
        let large = hybrid_of(&large_ref);

        for (mut lhs, rhs) in [(small.clone(), &large), (large.clone(), &small)] {
            lhs.union(rhs);
            assert!(lhs.superset(&small) && lhs.superset(&large));
            assert_eq!(
                lhs.iter().collect::<BTreeSet<_>>(),
                small_ref.union(&large_ref).copied().collect::<BTreeSet<_>>()
            );
        }
    }

    #[test]
    fn subtract_and_intersect() {
        let mut small_ref = random_set(8);
        let mut large_ref = random_set(SMALL_SET_CAPACITY + 3);
        // Force some overlap.
        for x in small_ref.iter().take(4).copied().collect::<Vec<_>>() {
            large_ref.insert(x);
        }
        small_ref.extend(large_ref.iter().take(2).copied());
        let small = hybrid_of(&small_ref);
        let large = hybrid_of(&large_ref);

        let mut diff = large.clone();
        diff.subtract(&small);
        assert_eq!(
            diff.iter().collect::<BTreeSet<_>>(),
            large_ref.difference(&small_ref).copied().collect::<BTreeSet<_>>()
        );

        let mut inter = large.clone();
        inter.intersect(&small);
        assert_eq!(
            inter.iter().collect::<BTreeSet<_>>(),
            large_ref.intersection(&small_ref).copied().collect::<BTreeSet<_>>()
        );
        assert!(matches!(inter.repr, Repr::Inline(_)));
        assert!(inter.intersects(&large) || inter.is_empty());
    }
}
