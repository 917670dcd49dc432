// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Points-to tables keyed by graph nodes.
//!
//! `BasePtData` is the plain map from key to points-to set, with a reverse
//! map from elements back to owning keys. `DiffPtData` splits each set into
//! a diff part (not yet propagated) and a propagated part, so the solver
//! only pushes the delta along outgoing edges.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

use crate::pts_set::bit_set::Idx;
use crate::pts_set::points_to::PointsToSet;

pub struct BasePtData<K, D, DS> {
    pts_map: HashMap<K, DS>,
    rev_pts_map: HashMap<D, HashSet<K>>,
}

impl<K, D, DS> fmt::Debug for BasePtData<K, D, DS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        "BasePtData".fmt(f)
    }
}

impl<K, D, DS> BasePtData<K, D, DS>
where
    K: Hash + Eq + Copy,
    D: Idx,
    DS: PointsToSet<D>,
{
    pub fn new() -> BasePtData<K, D, DS> {
        BasePtData {
            pts_map: HashMap::new(),
            rev_pts_map: HashMap::new(),
        }
    }

    #[inline]
    pub fn pts_map(&self) -> &HashMap<K, DS> {
        &self.pts_map
    }

    #[inline]
    pub fn clear(&mut self) {
        self.pts_map.clear();
        self.rev_pts_map.clear();
    }

    #[inline]
    pub fn get_pts(&self, var: K) -> Option<&DS> {
        self.pts_map.get(&var)
    }

    #[inline]
    pub fn get_mut_pts(&mut self, var: K) -> Option<&mut DS> {
        self.pts_map.get_mut(&var)
    }

    /// Keys whose points-to set contains `elem`.
    #[inline]
    pub fn get_rev_pts(&self, elem: D) -> Option<&HashSet<K>> {
        self.rev_pts_map.get(&elem)
    }

    /// Adds `elem` to the points-to set of `var`.
    pub fn add_pts(&mut self, var: K, elem: D) -> bool {
        self.rev_pts_map.entry(elem).or_default().insert(var);
        self.pts_map.entry(var).or_insert_with(DS::new).insert(elem)
    }

    /// pts(dst) = pts(dst) U pts(src).
    pub fn union_pts(&mut self, dst_var: K, src_var: K) -> bool {
        if dst_var == src_var {
            return false;
        }
        match self.pts_map.remove(&src_var) {
            Some(src_ds) => {
                let changed = self.union_pts_to(dst_var, &src_ds);
                self.pts_map.insert(src_var, src_ds);
                changed
            }
            None => false,
        }
    }

    /// pts(dst) = pts(dst) U src_ds.
    pub fn union_pts_to(&mut self, dst_var: K, src_ds: &DS) -> bool {
        for elem in src_ds.iter() {
            self.rev_pts_map.entry(elem).or_default().insert(dst_var);
        }
        self.pts_map
            .entry(dst_var)
            .or_insert_with(DS::new)
            .union(src_ds)
    }

    pub fn remove_pts_elem(&mut self, var: K, elem: D) -> bool {
        if let Some(vars) = self.rev_pts_map.get_mut(&elem) {
            vars.remove(&var);
        }
        match self.pts_map.get_mut(&var) {
            Some(pts) => pts.remove(elem),
            None => false,
        }
    }

    pub fn clear_pts(&mut self, var: K) {
        if let Some(pts) = self.pts_map.get_mut(&var) {
            for elem in pts.iter() {
                if let Some(vars) = self.rev_pts_map.get_mut(&elem) {
                    vars.remove(&var);
                }
            }
            pts.clear();
        }
    }
}

impl<K, D, DS> Default for BasePtData<K, D, DS>
where
    K: Hash + Eq + Copy,
    D: Idx,
    DS: PointsToSet<D>,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Diff points-to data: incremental propagation works on the diff part only,
/// and `flush` promotes it into the propagated part once pushed.
pub struct DiffPtData<K, D, DS> {
    /// Points-to still waiting to be propagated.
    diff_pts_map: HashMap<K, DS>,
    /// Points-to already propagated.
    propa_pts_map: HashMap<K, DS>,

    marker: PhantomData<D>,
}

impl<K, D, DS> fmt::Debug for DiffPtData<K, D, DS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        "DiffPtData".fmt(f)
    }
}

impl<K, D, DS> DiffPtData<K, D, DS>
where
    K: Hash + Eq + Copy,
    D: Idx,
    DS: PointsToSet<D> + Clone,
{
    pub fn new() -> DiffPtData<K, D, DS> {
        DiffPtData {
            diff_pts_map: HashMap::new(),
            propa_pts_map: HashMap::new(),
            marker: PhantomData,
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.diff_pts_map.clear();
        self.propa_pts_map.clear();
    }

    /// Adds `elem` to the diff set of `var` unless it was already propagated.
    pub fn add_pts(&mut self, var: K, elem: D) -> bool {
        if let Some(propa) = self.propa_pts_map.get(&var) {
            if propa.contains(elem) {
                return false;
            }
        }
        self.diff_pts_map
            .entry(var)
            .or_insert_with(DS::new)
            .insert(elem)
    }

    /// diff(dst) = diff(dst) U (pts(src) - propa(dst)).
    pub fn union_pts(&mut self, dst_var: K, src_var: K) -> bool {
        if dst_var == src_var {
            return false;
        }
        let mut changed = false;
        if let Some(diff) = self.diff_pts_map.get(&src_var) {
            let src_ds = diff.clone();
            changed |= self.union_pts_to(dst_var, &src_ds);
        }
        if let Some(propa) = self.propa_pts_map.get(&src_var) {
            let src_ds = propa.clone();
            changed |= self.union_pts_to(dst_var, &src_ds);
        }
        changed
    }

    /// diff(dst) = diff(dst) U (src_ds - propa(dst)).
    pub fn union_pts_to(&mut self, dst_var: K, src_ds: &DS) -> bool {
        let propa = self.propa_pts_map.entry(dst_var).or_insert_with(DS::new);
        let mut fresh = src_ds.clone();
        fresh.subtract(propa);
        self.diff_pts_map
            .entry(dst_var)
            .or_insert_with(DS::new)
            .union(&fresh)
    }

    #[inline]
    pub fn get_diff_pts(&self, var: K) -> Option<&DS> {
        self.diff_pts_map.get(&var)
    }

    #[inline]
    pub fn get_propa_pts(&self, var: K) -> Option<&DS> {
        self.propa_pts_map.get(&var)
    }

    /// The full set: diff U propagated.
    pub fn full_pts(&self, var: K) -> DS {
        let mut full = match self.propa_pts_map.get(&var) {
            Some(propa) => propa.clone(),
            None => DS::new(),
        };
        if let Some(diff) = self.diff_pts_map.get(&var) {
            full.union(diff);
        }
        full
    }

    pub fn contains_pts(&self, var: K, elem: D) -> bool {
        self.diff_pts_map
            .get(&var)
            .map_or(false, |ds| ds.contains(elem))
            || self
                .propa_pts_map
                .get(&var)
                .map_or(false, |ds| ds.contains(elem))
    }

    /// Promotes all diff elements of `var` to the propagated set.
    pub fn flush(&mut self, var: K) {
        if let Some(diff) = self.diff_pts_map.get_mut(&var) {
            let propa = self.propa_pts_map.entry(var).or_insert_with(DS::new);
            propa.union(diff);
            diff.clear();
        }
    }

    pub fn remove_pts_elem(&mut self, var: K, elem: D) -> bool {
        let mut changed = false;
        if let Some(diff) = self.diff_pts_map.get_mut(&var) {
            changed |= diff.remove(elem);
        }
        if let Some(propa) = self.propa_pts_map.get_mut(&var) {
            changed |= propa.remove(elem);
        }
        changed
    }

    pub fn clear_pts(&mut self, var: K) {
        if let Some(diff) = self.diff_pts_map.get_mut(&var) {
            diff.clear();
        }
        if let Some(propa) = self.propa_pts_map.get_mut(&var) {
            propa.clear();
        }
    }

    /// Keys that carry any points-to information.
    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        let mut seen: HashSet<K> = self.propa_pts_map.keys().copied().collect();
        seen.extend(self.diff_pts_map.keys().copied());
        seen.into_iter()
    }
}

impl<K, D, DS> Default for DiffPtData<K, D, DS>
where
    K: Hash + Eq + Copy,
    D: Idx,
    DS: PointsToSet<D> + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pts_set::points_to::HybridNodeSet;

    type Diff = DiffPtData<u32, u32, HybridNodeSet<u32>>;

    #[test]
    fn diff_then_flush() {
        let mut data = Diff::new();
        assert!(data.add_pts(1, 10));
        assert!(!data.add_pts(1, 10));
        assert_eq!(data.get_diff_pts(1).unwrap().count(), 1);
        assert!(data.get_propa_pts(1).is_none());

        data.flush(1);
        assert!(data.get_diff_pts(1).unwrap().is_empty());
        assert!(data.get_propa_pts(1).unwrap().contains(10));

        // Re-adding a propagated element is a no-op.
        assert!(!data.add_pts(1, 10));
        assert!(data.contains_pts(1, 10));
    }

    #[test]
    fn union_skips_already_propagated() {
        let mut data = Diff::new();
        data.add_pts(1, 10);
        data.add_pts(1, 11);
        data.flush(1);
        data.add_pts(2, 10);

        // 10 is already propagated into 1, only the delta should land.
        assert!(data.union_pts(1, 2) == false);
        data.add_pts(2, 12);
        assert!(data.union_pts(1, 2));
        let diff = data.get_diff_pts(1).unwrap();
        assert!(diff.contains(12) && !diff.contains(10));
    }

    #[test]
    fn full_pts_merges_both_parts() {
        let mut data = Diff::new();
        data.add_pts(1, 10);
        data.flush(1);
        data.add_pts(1, 11);
        let full = data.full_pts(1);
        assert!(full.contains(10) && full.contains(11));
        assert_eq!(full.count(), 2);
    }

    #[test]
    fn base_reverse_map_tracks_owners() {
        let mut data: BasePtData<u32, u32, HybridNodeSet<u32>> = BasePtData::new();
        data.add_pts(1, 10);
        data.add_pts(2, 10);
        assert_eq!(data.get_rev_pts(10).unwrap().len(), 2);
        data.remove_pts_elem(1, 10);
        assert_eq!(data.get_rev_pts(10).unwrap().len(), 1);
    }
}
