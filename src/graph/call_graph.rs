// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The pointer-analysis callgraph.
//!
//! Edges are keyed by `(caller, callee, kind, callsite id)`; each edge keeps
//! the callsites it stands for, split into direct and indirect sets.
//! CallSite ids are dense, 1-based, and stable once issued.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use log::warn;

use crate::graph::generic::{make_edge_flag, EdgeFlag, GenericGraph, GraphEdge};
use crate::graph::{EdgeId, NodeId};
use crate::ir::{CallSiteId, FuncId};
use crate::pts_set::bit_set::Idx;
use crate::util::chunked_queue::{ChunkedQueue, Cursor};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CgEdgeKind {
    CallRet,
    ThreadFork,
    ThreadJoin,
    HareParFor,
}

impl CgEdgeKind {
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Debug)]
pub struct CallGraphNode {
    pub func: FuncId,
}

#[derive(Debug)]
pub struct CallGraphEdge {
    pub caller: FuncId,
    pub callee: FuncId,
    pub kind: CgEdgeKind,
    pub cs_id: CallSiteId,
    /// Callsites (ICFG call nodes) statically resolved to this callee.
    pub direct_calls: BTreeSet<NodeId>,
    /// Callsites resolved here by points-to refinement. Disjoint from
    /// `direct_calls`.
    pub indirect_calls: BTreeSet<NodeId>,
}

impl GraphEdge for CallGraphEdge {
    fn flag(&self) -> EdgeFlag {
        make_edge_flag(self.kind.code(), self.cs_id.index() as u64)
    }
}

pub struct PtaCallGraph {
    graph: GenericGraph<CallGraphNode, CallGraphEdge>,
    func_nodes: HashMap<FuncId, NodeId>,
    /// (call node, callee) -> dense id, and its inverse, kept in lock-step.
    cs_to_id: HashMap<(NodeId, FuncId), CallSiteId>,
    id_to_cs: BTreeMap<CallSiteId, (NodeId, FuncId)>,
    /// CallSite ids start from 1.
    total_call_sites: u32,
    edge_map: HashMap<(FuncId, FuncId, CgEdgeKind, CallSiteId), EdgeId>,
    /// Callsites whose target never resolved to any function.
    unresolved_sites: BTreeSet<NodeId>,
    /// Functions in first-reached order; the builder drains this to process
    /// newly reachable bodies.
    reach_funcs: ChunkedQueue<FuncId>,
}

impl PtaCallGraph {
    pub fn new() -> Self {
        PtaCallGraph {
            graph: GenericGraph::new(),
            func_nodes: HashMap::new(),
            cs_to_id: HashMap::new(),
            id_to_cs: BTreeMap::new(),
            total_call_sites: 0,
            edge_map: HashMap::new(),
            unresolved_sites: BTreeSet::new(),
            reach_funcs: ChunkedQueue::new(),
        }
    }

    /// Registers a function node; newly seen functions enter the
    /// reachability queue.
    pub fn get_or_add_node(&mut self, func: FuncId) -> NodeId {
        if let Some(&node) = self.func_nodes.get(&func) {
            return node;
        }
        let node = self.graph.add_node(CallGraphNode { func });
        self.func_nodes.insert(func, node);
        self.reach_funcs.push(func);
        node
    }

    pub fn has_function(&self, func: FuncId) -> bool {
        self.func_nodes.contains_key(&func)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn reach_funcs_cursor(&self) -> Cursor {
        self.reach_funcs.cursor()
    }

    pub fn fetch_reach_func(&self, cursor: &mut Cursor) -> Option<FuncId> {
        self.reach_funcs.fetch(cursor)
    }

    /// Issues (or returns) the dense id of a `(callsite, callee)` pair.
    pub fn add_call_site(&mut self, call_node: NodeId, callee: FuncId) -> CallSiteId {
        if let Some(&id) = self.cs_to_id.get(&(call_node, callee)) {
            return id;
        }
        assert!(self.total_call_sites < u32::MAX, "callsite id overflow");
        self.total_call_sites += 1;
        let id = CallSiteId(self.total_call_sites);
        self.cs_to_id.insert((call_node, callee), id);
        self.id_to_cs.insert(id, (call_node, callee));
        id
    }

    pub fn call_site_id(&self, call_node: NodeId, callee: FuncId) -> Option<CallSiteId> {
        self.cs_to_id.get(&(call_node, callee)).copied()
    }

    pub fn call_site_of(&self, id: CallSiteId) -> Option<(NodeId, FuncId)> {
        self.id_to_cs.get(&id).copied()
    }

    pub fn total_call_sites(&self) -> u32 {
        self.total_call_sites
    }

    /// Every issued `(id, call node, callee, kind)` in id order.
    pub fn call_site_pairs(&self) -> Vec<(CallSiteId, NodeId, FuncId, CgEdgeKind)> {
        self.id_to_cs
            .iter()
            .filter_map(|(id, (cs, callee))| {
                self.edge_of_call_site(*id)
                    .map(|edge| (*id, *cs, *callee, self.graph.edge(edge).kind))
            })
            .collect()
    }

    fn edge_of_call_site(&self, id: CallSiteId) -> Option<EdgeId> {
        let (_, callee) = self.id_to_cs.get(&id)?;
        self.edge_map
            .iter()
            .find(|((_, e_callee, _, e_id), _)| e_callee == callee && *e_id == id)
            .map(|(_, edge)| *edge)
    }

    fn get_or_add_edge(
        &mut self,
        caller: FuncId,
        callee: FuncId,
        kind: CgEdgeKind,
        cs_id: CallSiteId,
    ) -> EdgeId {
        if let Some(&edge) = self.edge_map.get(&(caller, callee, kind, cs_id)) {
            return edge;
        }
        let caller_node = self.get_or_add_node(caller);
        let callee_node = self.get_or_add_node(callee);
        let edge = self.graph.add_edge(
            caller_node,
            callee_node,
            CallGraphEdge {
                caller,
                callee,
                kind,
                cs_id,
                direct_calls: BTreeSet::new(),
                indirect_calls: BTreeSet::new(),
            },
        );
        self.edge_map.insert((caller, callee, kind, cs_id), edge);
        edge
    }

    /// Records a statically resolved call. Returns the callsite id and
    /// whether the callsite was new on its edge.
    pub fn add_direct_call(
        &mut self,
        call_node: NodeId,
        caller: FuncId,
        callee: FuncId,
        kind: CgEdgeKind,
    ) -> (CallSiteId, bool) {
        let cs_id = self.add_call_site(call_node, callee);
        let edge = self.get_or_add_edge(caller, callee, kind, cs_id);
        let payload = self.graph.edge_mut(edge);
        debug_assert!(!payload.indirect_calls.contains(&call_node));
        let new = payload.direct_calls.insert(call_node);
        (cs_id, new)
    }

    /// Records a callsite resolved by the analysis. Returns the callsite id
    /// and whether the callsite was new on its edge.
    pub fn add_indirect_call(
        &mut self,
        call_node: NodeId,
        caller: FuncId,
        callee: FuncId,
    ) -> (CallSiteId, bool) {
        let cs_id = self.add_call_site(call_node, callee);
        let edge = self.get_or_add_edge(caller, callee, CgEdgeKind::CallRet, cs_id);
        let payload = self.graph.edge_mut(edge);
        debug_assert!(!payload.direct_calls.contains(&call_node));
        let new = payload.indirect_calls.insert(call_node);
        if new {
            self.unresolved_sites.remove(&call_node);
        }
        (cs_id, new)
    }

    pub fn has_edge(&self, call_node: NodeId, callee: FuncId) -> bool {
        match self.cs_to_id.get(&(call_node, callee)) {
            Some(id) => self.edge_of_call_site(*id).is_some(),
            None => false,
        }
    }

    /// Callees currently resolved for a callsite.
    pub fn callees_of(&self, call_node: NodeId) -> BTreeSet<FuncId> {
        self.cs_to_id
            .keys()
            .filter(|(cs, _)| *cs == call_node)
            .map(|(_, callee)| *callee)
            .collect()
    }

    /// Marks a callsite whose function-pointer never resolved; surfaced as a
    /// warning, analysis continues with an empty target set.
    pub fn note_unresolved_site(&mut self, call_node: NodeId) {
        if self.unresolved_sites.insert(call_node) {
            warn!("indirect callsite {:?} has no resolved callee", call_node);
        }
    }

    pub fn unresolved_sites(&self) -> &BTreeSet<NodeId> {
        &self.unresolved_sites
    }

    /// Functions transitively unreachable from `entry`. Diagnostic only; the
    /// analysis never fails on unreachable code.
    pub fn verify_reachability(&self, entry: FuncId) -> Vec<FuncId> {
        let mut reached: HashSet<FuncId> = HashSet::new();
        let mut stack = vec![entry];
        while let Some(func) = stack.pop() {
            if !reached.insert(func) {
                continue;
            }
            for (&(caller, callee, _, _), _) in &self.edge_map {
                if caller == func && !reached.contains(&callee) {
                    stack.push(callee);
                }
            }
        }
        let mut unreachable: Vec<FuncId> = self
            .func_nodes
            .keys()
            .filter(|f| !reached.contains(f))
            .copied()
            .collect();
        unreachable.sort();
        for func in &unreachable {
            warn!("function {:?} is unreachable from the entry point", func);
        }
        unreachable
    }
}

impl Default for PtaCallGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cs(n: usize) -> NodeId {
        NodeId::new(n)
    }

    #[test]
    fn call_site_ids_are_dense_one_based_and_stable() {
        let mut cg = PtaCallGraph::new();
        let a = cg.add_call_site(cs(10), FuncId(1));
        let b = cg.add_call_site(cs(10), FuncId(2));
        let again = cg.add_call_site(cs(10), FuncId(1));
        assert_eq!(a, CallSiteId(1));
        assert_eq!(b, CallSiteId(2));
        assert_eq!(a, again);
        assert_eq!(cg.call_site_of(a), Some((cs(10), FuncId(1))));
        assert_eq!(cg.total_call_sites(), 2);
    }

    #[test]
    fn direct_and_indirect_sets_stay_disjoint() {
        let mut cg = PtaCallGraph::new();
        let (_, new) = cg.add_direct_call(cs(10), FuncId(0), FuncId(1), CgEdgeKind::CallRet);
        assert!(new);
        let (_, again) = cg.add_direct_call(cs(10), FuncId(0), FuncId(1), CgEdgeKind::CallRet);
        assert!(!again);

        let (_, ind) = cg.add_indirect_call(cs(11), FuncId(0), FuncId(1));
        assert!(ind);
        assert_eq!(cg.callees_of(cs(10)), [FuncId(1)].into_iter().collect());
        assert!(cg.has_edge(cs(11), FuncId(1)));
        assert_eq!(cg.edge_count(), 2);
    }

    #[test]
    fn reachability_reports_orphans() {
        let mut cg = PtaCallGraph::new();
        cg.get_or_add_node(FuncId(0));
        cg.get_or_add_node(FuncId(9));
        cg.add_direct_call(cs(1), FuncId(0), FuncId(1), CgEdgeKind::CallRet);
        cg.add_direct_call(cs(2), FuncId(1), FuncId(2), CgEdgeKind::CallRet);

        let unreachable = cg.verify_reachability(FuncId(0));
        assert_eq!(unreachable, vec![FuncId(9)]);
    }

    #[test]
    fn unresolved_sites_are_remembered_until_resolved() {
        let mut cg = PtaCallGraph::new();
        cg.note_unresolved_site(cs(5));
        assert!(cg.unresolved_sites().contains(&cs(5)));
        cg.add_indirect_call(cs(5), FuncId(0), FuncId(1));
        assert!(!cg.unresolved_sites().contains(&cs(5)));
    }

    #[test]
    fn reach_queue_sees_new_functions() {
        let mut cg = PtaCallGraph::new();
        let mut cursor = cg.reach_funcs_cursor();
        cg.get_or_add_node(FuncId(3));
        cg.add_direct_call(cs(1), FuncId(3), FuncId(4), CgEdgeKind::CallRet);
        assert_eq!(cg.fetch_reach_func(&mut cursor), Some(FuncId(3)));
        assert_eq!(cg.fetch_reach_func(&mut cursor), Some(FuncId(4)));
        assert_eq!(cg.fetch_reach_func(&mut cursor), None);
    }
}
