// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The constraint graph the solver iterates on, derived from the PAG.
//!
//! A constraint node keeps the id of the PAG node it stands for; merged
//! nodes are stripped of their edges and tombstoned (ids are never reused),
//! and every endpoint query goes through the representative map.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::graph::generic::{make_edge_flag, EdgeFlag, GenericGraph, GraphEdge};
use crate::graph::pag::{Pag, PagEdgeKind};
use crate::graph::scc::{DirectedGraphView, EdgeProjection};
use crate::graph::{EdgeId, NodeId, NodeSet};
use crate::ir::location_set::LocationSet;
use crate::pts_set::points_to::PointsToSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConstraintEdgeKind {
    Addr,
    Copy,
    NormalGep,
    VariantGep,
    Load,
    Store,
}

impl ConstraintEdgeKind {
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Direct edges carry value flow without a memory dereference.
    pub fn is_direct(self) -> bool {
        matches!(
            self,
            ConstraintEdgeKind::Copy
                | ConstraintEdgeKind::NormalGep
                | ConstraintEdgeKind::VariantGep
        )
    }
}

#[derive(Clone, Debug)]
pub struct ConstraintEdge {
    pub src: NodeId,
    pub dst: NodeId,
    pub kind: ConstraintEdgeKind,
    /// Field projection of a NormalGep constraint.
    pub ls: Option<LocationSet>,
}

impl GraphEdge for ConstraintEdge {
    fn flag(&self) -> EdgeFlag {
        make_edge_flag(self.kind.code(), 0)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConstraintNode {
    /// Tombstone: the node was merged into its representative.
    pub merged: bool,
    /// The node represents a cycle containing a non-zero-offset gep.
    pub pwc: bool,
}

type EdgeBuckets = HashMap<NodeId, BTreeMap<ConstraintEdgeKind, BTreeSet<EdgeId>>>;

pub struct ConstraintGraph {
    graph: GenericGraph<ConstraintNode, ConstraintEdge>,
    in_edges: EdgeBuckets,
    out_edges: EdgeBuckets,
    /// Merged node -> representative (one step; chains are chased).
    reps: HashMap<NodeId, NodeId>,
    /// Representative -> ids it absorbed.
    sub_nodes: HashMap<NodeId, NodeSet>,
}

impl ConstraintGraph {
    pub fn new() -> Self {
        ConstraintGraph {
            graph: GenericGraph::new(),
            in_edges: HashMap::new(),
            out_edges: HashMap::new(),
            reps: HashMap::new(),
            sub_nodes: HashMap::new(),
        }
    }

    /// Derives the constraint graph: one node per PAG node, Addr/Copy/Gep/
    /// Load/Store constraints from the matching PAG edges, and Copy
    /// constraints from the inter-procedural and thread edges.
    pub fn build_from_pag(pag: &Pag) -> Self {
        let mut cg = ConstraintGraph::new();
        cg.ensure_nodes(pag.node_count());

        for id in pag.edges_of_kind(PagEdgeKind::Addr) {
            let edge = pag.edge(id);
            cg.add_addr_edge(edge.src, edge.dst);
        }
        for kind in [
            PagEdgeKind::Copy,
            PagEdgeKind::Call,
            PagEdgeKind::Ret,
            PagEdgeKind::ThreadFork,
            PagEdgeKind::ThreadJoin,
        ] {
            for id in pag.edges_of_kind(kind) {
                let edge = pag.edge(id);
                cg.add_copy_edge(edge.src, edge.dst);
            }
        }
        for id in pag.edges_of_kind(PagEdgeKind::NormalGep) {
            let edge = pag.edge(id);
            cg.add_normal_gep_edge(edge.src, edge.dst, edge.ls.unwrap());
        }
        for id in pag.edges_of_kind(PagEdgeKind::VariantGep) {
            let edge = pag.edge(id);
            cg.add_variant_gep_edge(edge.src, edge.dst);
        }
        for id in pag.edges_of_kind(PagEdgeKind::Load) {
            let edge = pag.edge(id);
            cg.add_load_edge(edge.src, edge.dst);
        }
        for id in pag.edges_of_kind(PagEdgeKind::Store) {
            let edge = pag.edge(id);
            cg.add_store_edge(edge.src, edge.dst);
        }
        cg
    }

    /// Grows the node space to cover `count` PAG nodes. Constraint ids must
    /// track PAG ids, so nodes are only ever appended.
    pub fn ensure_nodes(&mut self, count: usize) {
        while self.graph.node_count() < count {
            self.graph.add_node(ConstraintNode::default());
        }
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[inline]
    pub fn edge(&self, id: EdgeId) -> &ConstraintEdge {
        self.graph.edge(id)
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_merged(&self, node: NodeId) -> bool {
        self.graph.node(node).merged
    }

    pub fn is_pwc(&self, node: NodeId) -> bool {
        self.graph.node(node).pwc
    }

    pub fn set_pwc(&mut self, node: NodeId) {
        self.graph.node_mut(node).pwc = true;
    }

    /// The representative a node currently resolves to.
    pub fn scc_rep(&self, node: NodeId) -> NodeId {
        let mut cur = node;
        while let Some(&rep) = self.reps.get(&cur) {
            cur = rep;
        }
        cur
    }

    /// Ids absorbed by a representative (itself excluded).
    pub fn merged_sub_nodes(&self, rep: NodeId) -> NodeSet {
        self.sub_nodes.get(&rep).cloned().unwrap_or_default()
    }

    /// Live (unmerged) nodes, ascending.
    pub fn live_nodes(&self) -> Vec<NodeId> {
        self.graph
            .node_ids()
            .into_iter()
            .filter(|n| !self.is_merged(*n))
            .collect()
    }

    fn bucket_edges(&self, buckets: &EdgeBuckets, node: NodeId, kind: ConstraintEdgeKind) -> Vec<EdgeId> {
        buckets
            .get(&node)
            .and_then(|m| m.get(&kind))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn out_edges_of(&self, node: NodeId, kind: ConstraintEdgeKind) -> Vec<EdgeId> {
        self.bucket_edges(&self.out_edges, node, kind)
    }

    pub fn in_edges_of(&self, node: NodeId, kind: ConstraintEdgeKind) -> Vec<EdgeId> {
        self.bucket_edges(&self.in_edges, node, kind)
    }

    fn all_edges_of(&self, buckets: &EdgeBuckets, node: NodeId) -> Vec<EdgeId> {
        buckets
            .get(&node)
            .map(|m| m.values().flat_map(|set| set.iter().copied()).collect())
            .unwrap_or_default()
    }

    fn register(&mut self, edge: ConstraintEdge) -> Option<EdgeId> {
        let (src, dst, kind) = (edge.src, edge.dst, edge.kind);
        if self.graph.find_edge(src, dst, edge.flag()).is_some() {
            return None;
        }
        let id = self.graph.add_edge(src, dst, edge);
        self.out_edges
            .entry(src)
            .or_default()
            .entry(kind)
            .or_default()
            .insert(id);
        self.in_edges
            .entry(dst)
            .or_default()
            .entry(kind)
            .or_default()
            .insert(id);
        Some(id)
    }

    pub fn add_addr_edge(&mut self, src: NodeId, dst: NodeId) -> Option<EdgeId> {
        self.register(ConstraintEdge {
            src,
            dst,
            kind: ConstraintEdgeKind::Addr,
            ls: None,
        })
    }

    pub fn add_copy_edge(&mut self, src: NodeId, dst: NodeId) -> Option<EdgeId> {
        if src == dst {
            return None;
        }
        self.register(ConstraintEdge {
            src,
            dst,
            kind: ConstraintEdgeKind::Copy,
            ls: None,
        })
    }

    pub fn add_normal_gep_edge(&mut self, src: NodeId, dst: NodeId, ls: LocationSet) -> Option<EdgeId> {
        self.register(ConstraintEdge {
            src,
            dst,
            kind: ConstraintEdgeKind::NormalGep,
            ls: Some(ls),
        })
    }

    pub fn add_variant_gep_edge(&mut self, src: NodeId, dst: NodeId) -> Option<EdgeId> {
        self.register(ConstraintEdge {
            src,
            dst,
            kind: ConstraintEdgeKind::VariantGep,
            ls: None,
        })
    }

    pub fn add_load_edge(&mut self, src: NodeId, dst: NodeId) -> Option<EdgeId> {
        self.register(ConstraintEdge {
            src,
            dst,
            kind: ConstraintEdgeKind::Load,
            ls: None,
        })
    }

    pub fn add_store_edge(&mut self, src: NodeId, dst: NodeId) -> Option<EdgeId> {
        self.register(ConstraintEdge {
            src,
            dst,
            kind: ConstraintEdgeKind::Store,
            ls: None,
        })
    }

    fn remove_edge(&mut self, id: EdgeId) -> ConstraintEdge {
        let edge = self.graph.remove_edge(id);
        if let Some(m) = self.out_edges.get_mut(&edge.src) {
            if let Some(set) = m.get_mut(&edge.kind) {
                set.remove(&id);
            }
        }
        if let Some(m) = self.in_edges.get_mut(&edge.dst) {
            if let Some(set) = m.get_mut(&edge.kind) {
                set.remove(&id);
            }
        }
        edge
    }

    /// Re-targets the destination of an edge: remove, then re-register under
    /// the new endpoint (deduplicating against existing constraints).
    pub fn retarget_dst_of_edge(&mut self, id: EdgeId, new_dst: NodeId) -> Option<EdgeId> {
        let edge = self.remove_edge(id);
        match edge.kind {
            ConstraintEdgeKind::Addr => self.add_addr_edge(edge.src, new_dst),
            ConstraintEdgeKind::Copy => self.add_copy_edge(edge.src, new_dst),
            ConstraintEdgeKind::NormalGep => {
                self.add_normal_gep_edge(edge.src, new_dst, edge.ls.unwrap())
            }
            ConstraintEdgeKind::VariantGep => self.add_variant_gep_edge(edge.src, new_dst),
            ConstraintEdgeKind::Load => self.add_load_edge(edge.src, new_dst),
            ConstraintEdgeKind::Store => self.add_store_edge(edge.src, new_dst),
        }
    }

    pub fn retarget_src_of_edge(&mut self, id: EdgeId, new_src: NodeId) -> Option<EdgeId> {
        let edge = self.remove_edge(id);
        match edge.kind {
            ConstraintEdgeKind::Addr => self.add_addr_edge(new_src, edge.dst),
            ConstraintEdgeKind::Copy => self.add_copy_edge(new_src, edge.dst),
            ConstraintEdgeKind::NormalGep => {
                self.add_normal_gep_edge(new_src, edge.dst, edge.ls.unwrap())
            }
            ConstraintEdgeKind::VariantGep => self.add_variant_gep_edge(new_src, edge.dst),
            ConstraintEdgeKind::Load => self.add_load_edge(new_src, edge.dst),
            ConstraintEdgeKind::Store => self.add_store_edge(new_src, edge.dst),
        }
    }

    /// True when the edge cannot move a pointer past a field boundary.
    fn is_zero_offset_gep(&self, edge: &ConstraintEdge) -> bool {
        match edge.kind {
            ConstraintEdgeKind::NormalGep => edge.ls.unwrap().is_zero(),
            _ => false,
        }
    }

    /// Moves the incoming edges of a node being merged: outside edges are
    /// retargeted to the representative; inside Copy/Gep edges are deleted
    /// (recording whether a non-zero-offset gep was among them); inside
    /// Load/Store edges are retargeted, never deleted; inside Addr edges are
    /// removed. Returns whether a critical gep was found.
    fn move_in_edges_to_rep(&mut self, node: NodeId, rep: NodeId) -> bool {
        let mut inside = Vec::new();
        let mut outside = Vec::new();
        for id in self.all_edges_of(&self.in_edges, node) {
            if self.scc_rep(self.edge(id).src) == rep {
                inside.push(id);
            } else {
                outside.push(id);
            }
        }
        for id in outside {
            self.retarget_dst_of_edge(id, rep);
        }
        let mut critical_gep = false;
        for id in inside {
            let edge = self.edge(id).clone();
            match edge.kind {
                ConstraintEdgeKind::Copy => {
                    self.remove_edge(id);
                }
                ConstraintEdgeKind::NormalGep | ConstraintEdgeKind::VariantGep => {
                    if !self.is_zero_offset_gep(&edge) {
                        critical_gep = true;
                    }
                    self.remove_edge(id);
                }
                ConstraintEdgeKind::Load | ConstraintEdgeKind::Store => {
                    self.retarget_dst_of_edge(id, rep);
                }
                ConstraintEdgeKind::Addr => {
                    self.remove_edge(id);
                }
            }
        }
        critical_gep
    }

    fn move_out_edges_to_rep(&mut self, node: NodeId, rep: NodeId) -> bool {
        let mut inside = Vec::new();
        let mut outside = Vec::new();
        for id in self.all_edges_of(&self.out_edges, node) {
            if self.scc_rep(self.edge(id).dst) == rep {
                inside.push(id);
            } else {
                outside.push(id);
            }
        }
        for id in outside {
            self.retarget_src_of_edge(id, rep);
        }
        let mut critical_gep = false;
        for id in inside {
            let edge = self.edge(id).clone();
            match edge.kind {
                ConstraintEdgeKind::Copy => {
                    self.remove_edge(id);
                }
                ConstraintEdgeKind::NormalGep | ConstraintEdgeKind::VariantGep => {
                    if !self.is_zero_offset_gep(&edge) {
                        critical_gep = true;
                    }
                    self.remove_edge(id);
                }
                ConstraintEdgeKind::Load | ConstraintEdgeKind::Store => {
                    self.retarget_src_of_edge(id, rep);
                }
                ConstraintEdgeKind::Addr => {
                    self.remove_edge(id);
                }
            }
        }
        critical_gep
    }

    /// Merges `node` into `rep`: both edge sides are moved, the rep inherits
    /// the union of absorbed ids, the node is tombstoned. Returns whether the
    /// merge uncovered a positive-weight cycle.
    pub fn merge_node_to_rep(&mut self, node: NodeId, rep: NodeId) -> bool {
        assert_ne!(node, rep, "merging a node into itself");
        assert!(!self.is_merged(node), "node merged twice: {:?}", node);

        let pwc_in = self.move_in_edges_to_rep(node, rep);
        let pwc_out = self.move_out_edges_to_rep(node, rep);

        self.reps.insert(node, rep);
        let absorbed = self.sub_nodes.remove(&node).unwrap_or_default();
        let entry = self.sub_nodes.entry(rep).or_default();
        entry.insert(node);
        entry.union(&absorbed);
        let node_pwc = self.graph.node(node).pwc;
        self.graph.node_mut(node).merged = true;

        let pwc = pwc_in || pwc_out || node_pwc;
        if pwc {
            self.graph.node_mut(rep).pwc = true;
        }
        pwc
    }
}

impl Default for ConstraintGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectedGraphView for ConstraintGraph {
    fn view_nodes(&self) -> Vec<NodeId> {
        self.live_nodes()
    }

    fn direct_successors(&self, node: NodeId, projection: EdgeProjection) -> Vec<NodeId> {
        let kinds: &[ConstraintEdgeKind] = match projection {
            EdgeProjection::AllDirect => &[
                ConstraintEdgeKind::Copy,
                ConstraintEdgeKind::NormalGep,
                ConstraintEdgeKind::VariantGep,
            ],
            EdgeProjection::CopyOnly => &[ConstraintEdgeKind::Copy],
        };
        let mut succs = Vec::new();
        for kind in kinds {
            for id in self.out_edges_of(node, *kind) {
                succs.push(self.edge(id).dst);
            }
        }
        succs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: usize) -> NodeId {
        NodeId::new(n)
    }

    fn graph_with_nodes(count: usize) -> ConstraintGraph {
        let mut cg = ConstraintGraph::new();
        cg.ensure_nodes(count);
        cg
    }

    #[test]
    fn copy_self_loop_rejected() {
        let mut cg = graph_with_nodes(2);
        assert!(cg.add_copy_edge(node(0), node(0)).is_none());
        assert!(cg.add_copy_edge(node(0), node(1)).is_some());
        assert!(cg.add_copy_edge(node(0), node(1)).is_none());
    }

    #[test]
    fn merge_removes_inside_directs_and_keeps_memory_ops() {
        // Cycle 1 -> 2 -> 1, with an outside copy 0 -> 1, a load 1 -> 3 and
        // a store 4 -> 2.
        let mut cg = graph_with_nodes(5);
        cg.add_copy_edge(node(1), node(2));
        cg.add_copy_edge(node(2), node(1));
        cg.add_copy_edge(node(0), node(1));
        cg.add_load_edge(node(1), node(3));
        cg.add_store_edge(node(4), node(2));

        let pwc = cg.merge_node_to_rep(node(2), node(1));
        assert!(!pwc);
        assert!(cg.is_merged(node(2)));
        assert_eq!(cg.scc_rep(node(2)), node(1));

        // No direct edge has both endpoints on the same representative.
        for kind in [
            ConstraintEdgeKind::Copy,
            ConstraintEdgeKind::NormalGep,
            ConstraintEdgeKind::VariantGep,
        ] {
            for id in cg.out_edges_of(node(1), kind) {
                assert_ne!(cg.scc_rep(cg.edge(id).dst), node(1));
            }
        }
        // Memory operations survive, retargeted onto the rep.
        assert_eq!(cg.out_edges_of(node(1), ConstraintEdgeKind::Load).len(), 1);
        assert_eq!(cg.in_edges_of(node(1), ConstraintEdgeKind::Store).len(), 1);
        // The outside copy still lands on the rep.
        assert_eq!(cg.in_edges_of(node(1), ConstraintEdgeKind::Copy).len(), 1);
    }

    #[test]
    fn nonzero_gep_inside_cycle_flags_pwc() {
        let mut cg = graph_with_nodes(3);
        cg.add_copy_edge(node(1), node(2));
        cg.add_normal_gep_edge(node(2), node(1), LocationSet::from_offset(1));

        let pwc = cg.merge_node_to_rep(node(2), node(1));
        assert!(pwc);
        assert!(cg.is_pwc(node(1)));
    }

    #[test]
    fn zero_offset_gep_is_not_critical() {
        let mut cg = graph_with_nodes(3);
        cg.add_copy_edge(node(1), node(2));
        cg.add_normal_gep_edge(node(2), node(1), LocationSet::from_offset(0));

        let pwc = cg.merge_node_to_rep(node(2), node(1));
        assert!(!pwc);
        assert!(!cg.is_pwc(node(1)));
    }

    #[test]
    fn rep_chains_resolve_transitively() {
        let mut cg = graph_with_nodes(3);
        cg.merge_node_to_rep(node(1), node(0));
        cg.merge_node_to_rep(node(0), node(2));
        assert_eq!(cg.scc_rep(node(1)), node(2));
        let subs = cg.merged_sub_nodes(node(2));
        assert!(subs.contains(node(0)) && subs.contains(node(1)));
    }

    #[test]
    fn projection_selects_edge_families() {
        let mut cg = graph_with_nodes(3);
        cg.add_copy_edge(node(0), node(1));
        cg.add_normal_gep_edge(node(0), node(2), LocationSet::from_offset(1));

        let all = cg.direct_successors(node(0), EdgeProjection::AllDirect);
        let copies = cg.direct_successors(node(0), EdgeProjection::CopyOnly);
        assert_eq!(all.len(), 2);
        assert_eq!(copies, vec![node(1)]);
    }
}
