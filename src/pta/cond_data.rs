// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The conditional points-to engine: targets qualified by a client-defined
//! condition (calling context, path predicate). Clients supply the
//! compatibility relation; a normalisation step collapses everything into
//! bit-vector form for downstream consumers.

use std::collections::HashMap;
use std::fmt::Debug;

use crate::graph::{NodeId, NodeSet};
use crate::pta::AliasResult;
use crate::pts_set::cond_points_to::{CondCompat, CondNodeSet, CondVar};
use crate::pts_set::points_to::PointsToSet;

pub struct CondPta<C: Ord + Clone + Debug + std::hash::Hash, R: CondCompat<C>> {
    compat: R,
    /// Path-sensitive clients get MustAlias out of mutual containment.
    path_sensitive: bool,
    tables: HashMap<CondVar<C, NodeId>, CondNodeSet<C, NodeId>>,
}

impl<C: Ord + Clone + Debug + std::hash::Hash, R: CondCompat<C>> CondPta<C, R> {
    pub fn new(compat: R, path_sensitive: bool) -> Self {
        CondPta {
            compat,
            path_sensitive,
            tables: HashMap::new(),
        }
    }

    pub fn add_pts(&mut self, var: CondVar<C, NodeId>, elem: CondVar<C, NodeId>) -> bool {
        self.tables.entry(var).or_default().insert(elem)
    }

    pub fn get_pts(&self, var: &CondVar<C, NodeId>) -> Option<&CondNodeSet<C, NodeId>> {
        self.tables.get(var)
    }

    /// pts(dst) = pts(dst) U pts(src).
    pub fn union_pts(&mut self, dst: &CondVar<C, NodeId>, src: &CondVar<C, NodeId>) -> bool {
        if dst == src {
            return false;
        }
        match self.tables.get(src).cloned() {
            Some(src_set) => self.tables.entry(dst.clone()).or_default().union(&src_set),
            None => false,
        }
    }

    /// Alias under the compatibility relation: mutual containment of
    /// non-empty sets is MustAlias for path-sensitive clients, any
    /// compatible overlap is MayAlias.
    pub fn alias(&self, a: &CondVar<C, NodeId>, b: &CondVar<C, NodeId>) -> AliasResult {
        let empty = CondNodeSet::new();
        let pa = self.tables.get(a).unwrap_or(&empty);
        let pb = self.tables.get(b).unwrap_or(&empty);

        if a == b {
            return if self.path_sensitive && !pa.is_empty() {
                AliasResult::MustAlias
            } else {
                AliasResult::MayAlias
            };
        }

        let mutual = !pa.is_empty()
            && !pb.is_empty()
            && pa.superset_compatible(pb, &self.compat, false)
            && pb.superset_compatible(pa, &self.compat, false);
        if self.path_sensitive && mutual {
            AliasResult::MustAlias
        } else if pa.intersects_compatible(pb, &self.compat, false) {
            AliasResult::MayAlias
        } else {
            AliasResult::NoAlias
        }
    }

    /// Collapses every conditional set into plain bit-vector form, keyed by
    /// the unqualified node.
    pub fn normalize(&self) -> HashMap<NodeId, NodeSet> {
        let mut flat: HashMap<NodeId, NodeSet> = HashMap::new();
        for (var, set) in &self.tables {
            flat.entry(var.node).or_default().union(&set.normalize());
        }
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pts_set::cond_points_to::EqualCond;

    fn var(cond: u32, node: usize) -> CondVar<u32, NodeId> {
        CondVar::new(cond, NodeId::new(node))
    }

    #[test]
    fn alias_is_condition_aware() {
        let mut pta = CondPta::new(EqualCond, false);
        // Under context 1 both p and q point to o; under context 2 only p.
        pta.add_pts(var(1, 10), var(1, 99));
        pta.add_pts(var(1, 11), var(1, 99));
        pta.add_pts(var(2, 10), var(2, 98));

        assert_eq!(pta.alias(&var(1, 10), &var(1, 11)), AliasResult::MayAlias);
        assert_eq!(pta.alias(&var(2, 10), &var(1, 11)), AliasResult::NoAlias);
    }

    #[test]
    fn mutual_containment_is_must_for_path_sensitive() {
        let mut pta = CondPta::new(EqualCond, true);
        pta.add_pts(var(1, 10), var(1, 99));
        pta.add_pts(var(1, 11), var(1, 99));
        assert_eq!(pta.alias(&var(1, 10), &var(1, 11)), AliasResult::MustAlias);

        let mut may = CondPta::new(EqualCond, false);
        may.add_pts(var(1, 10), var(1, 99));
        may.add_pts(var(1, 11), var(1, 99));
        assert_eq!(may.alias(&var(1, 10), &var(1, 11)), AliasResult::MayAlias);
    }

    #[test]
    fn normalize_collapses_conditions() {
        let mut pta = CondPta::new(EqualCond, false);
        pta.add_pts(var(1, 10), var(1, 99));
        pta.add_pts(var(2, 10), var(2, 98));
        let flat = pta.normalize();
        let pts = &flat[&NodeId::new(10)];
        assert!(pts.contains(NodeId::new(98)) && pts.contains(NodeId::new(99)));
        assert_eq!(pts.count(), 2);
    }
}
