// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The value-flow graph: def-use chains of top-level pointers.
//!
//! Statement nodes are allocated per PAG edge; multi-operand statements
//! (phi, cmp, binary/unary ops) get a single node holding ordered operands.
//! Every top-level PAG node has at most one defining VFG node; a second
//! definition means the graph is malformed and is rejected outright.

use std::collections::HashMap;

use crate::graph::generic::{make_edge_flag, EdgeFlag, GenericGraph, GraphEdge};
use crate::graph::{EdgeId, NodeId, NodeSet};
use crate::ir::{CallSiteId, FuncId, MemRegionId};
use crate::pts_set::bit_set::Idx;
use crate::pts_set::points_to::PointsToSet;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VfgNodeKind {
    /// Statement nodes; the payload is the PAG edge they were created from.
    Addr { edge: EdgeId },
    Copy { edge: EdgeId },
    Gep { edge: EdgeId },
    Load { edge: EdgeId },
    Store { edge: EdgeId },
    /// Multi-operand statements over PAG operand nodes, in ascending order.
    IntraPhi { res: NodeId, ops: Vec<NodeId> },
    Cmp { res: NodeId, ops: Vec<NodeId> },
    BinaryOp { res: NodeId, ops: Vec<NodeId> },
    UnaryOp { res: NodeId, ops: Vec<NodeId> },
    /// Argument and return plumbing.
    FormalParm { param: NodeId },
    ActualParm { call: NodeId, arg: NodeId },
    FormalRet { ret: NodeId },
    ActualRet { call: NodeId, dst: NodeId },
    /// Memory-SSA nodes of the sparse extension.
    FormalIn { func: FuncId, region: MemRegionId },
    FormalOut { func: FuncId, region: MemRegionId },
    ActualIn { call: NodeId, region: MemRegionId },
    ActualOut { call: NodeId, region: MemRegionId },
    MssaPhi { func: FuncId, region: MemRegionId },
}

#[derive(Clone, Debug)]
pub struct VfgNode {
    pub kind: VfgNodeKind,
    /// The abstract memory a memory-SSA node stands for.
    pub pts: Option<NodeSet>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VfgEdgeKind {
    IntraDirect,
    CallDirect(CallSiteId),
    RetDirect(CallSiteId),
    IntraInd,
    CallInd(CallSiteId),
    RetInd(CallSiteId),
    ThreadMhpInd,
}

impl VfgEdgeKind {
    fn code_and_label(self) -> (u8, u64) {
        match self {
            VfgEdgeKind::IntraDirect => (0, 0),
            VfgEdgeKind::CallDirect(cs) => (1, cs.index() as u64),
            VfgEdgeKind::RetDirect(cs) => (2, cs.index() as u64),
            VfgEdgeKind::IntraInd => (3, 0),
            VfgEdgeKind::CallInd(cs) => (4, cs.index() as u64),
            VfgEdgeKind::RetInd(cs) => (5, cs.index() as u64),
            VfgEdgeKind::ThreadMhpInd => (6, 0),
        }
    }

    pub fn is_direct(self) -> bool {
        matches!(
            self,
            VfgEdgeKind::IntraDirect | VfgEdgeKind::CallDirect(_) | VfgEdgeKind::RetDirect(_)
        )
    }
}

#[derive(Clone, Debug)]
pub struct VfgEdge {
    pub src: NodeId,
    pub dst: NodeId,
    pub kind: VfgEdgeKind,
    /// Which abstract memory flows along an indirect edge.
    pub pts: Option<NodeSet>,
}

impl GraphEdge for VfgEdge {
    fn flag(&self) -> EdgeFlag {
        let (code, label) = self.kind.code_and_label();
        make_edge_flag(code, label)
    }
}

pub struct Vfg {
    graph: GenericGraph<VfgNode, VfgEdge>,
    /// Top-level PAG node -> its unique defining VFG node.
    def_map: HashMap<NodeId, NodeId>,
    /// PAG edge -> statement node.
    stmt_map: HashMap<EdgeId, NodeId>,
    actual_parm_map: HashMap<(NodeId, NodeId), NodeId>,
    formal_parm_map: HashMap<NodeId, NodeId>,
    formal_ret_map: HashMap<NodeId, NodeId>,
    actual_ret_map: HashMap<NodeId, NodeId>,
}

impl Vfg {
    pub fn new() -> Self {
        Vfg {
            graph: GenericGraph::new(),
            def_map: HashMap::new(),
            stmt_map: HashMap::new(),
            actual_parm_map: HashMap::new(),
            formal_parm_map: HashMap::new(),
            formal_ret_map: HashMap::new(),
            actual_ret_map: HashMap::new(),
        }
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &VfgNode {
        self.graph.node(id)
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[inline]
    pub fn edge(&self, id: EdgeId) -> &VfgEdge {
        self.graph.edge(id)
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn edge_ids(&self) -> Vec<EdgeId> {
        self.graph.edge_iter().map(|(_, id)| id).collect()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.graph.node_ids()
    }

    pub fn add_node(&mut self, kind: VfgNodeKind, pts: Option<NodeSet>) -> NodeId {
        self.graph.add_node(VfgNode { kind, pts })
    }

    /// Records the defining node of a top-level PAG node.
    pub fn set_def(&mut self, pag_node: NodeId, vfg_node: NodeId) {
        let prior = self.def_map.insert(pag_node, vfg_node);
        assert!(
            prior.is_none(),
            "multiple value-flow definitions for node {:?}",
            pag_node
        );
    }

    pub fn def_of(&self, pag_node: NodeId) -> Option<NodeId> {
        self.def_map.get(&pag_node).copied()
    }

    /// Registers a statement node for a PAG edge; memoised per edge.
    pub fn get_or_add_stmt_node(&mut self, pag_edge: EdgeId, kind: VfgNodeKind) -> NodeId {
        if let Some(&node) = self.stmt_map.get(&pag_edge) {
            return node;
        }
        let node = self.add_node(kind, None);
        self.stmt_map.insert(pag_edge, node);
        node
    }

    pub fn stmt_node_of(&self, pag_edge: EdgeId) -> Option<NodeId> {
        self.stmt_map.get(&pag_edge).copied()
    }

    /// Points a PAG edge at an already-existing statement node; used when
    /// several operand edges share one multi-operand node.
    pub fn map_stmt_node(&mut self, pag_edge: EdgeId, node: NodeId) {
        self.stmt_map.insert(pag_edge, node);
    }

    pub fn get_or_add_actual_parm(&mut self, call: NodeId, arg: NodeId) -> NodeId {
        if let Some(&node) = self.actual_parm_map.get(&(call, arg)) {
            return node;
        }
        let node = self.add_node(VfgNodeKind::ActualParm { call, arg }, None);
        self.actual_parm_map.insert((call, arg), node);
        if let Some(def) = self.def_of(arg) {
            self.add_intra_direct_edge(def, node);
        }
        node
    }

    /// The formal-parameter node; it is the definition of the parameter.
    pub fn get_or_add_formal_parm(&mut self, param: NodeId) -> NodeId {
        if let Some(&node) = self.formal_parm_map.get(&param) {
            return node;
        }
        let node = self.add_node(VfgNodeKind::FormalParm { param }, None);
        self.formal_parm_map.insert(param, node);
        self.set_def(param, node);
        node
    }

    pub fn get_or_add_formal_ret(&mut self, ret: NodeId) -> NodeId {
        if let Some(&node) = self.formal_ret_map.get(&ret) {
            return node;
        }
        let node = self.add_node(VfgNodeKind::FormalRet { ret }, None);
        self.formal_ret_map.insert(ret, node);
        if let Some(def) = self.def_of(ret) {
            self.add_intra_direct_edge(def, node);
        }
        node
    }

    /// The actual-return node; it is the definition of the call destination.
    pub fn get_or_add_actual_ret(&mut self, call: NodeId, dst: NodeId) -> NodeId {
        if let Some(&node) = self.actual_ret_map.get(&call) {
            return node;
        }
        let node = self.add_node(VfgNodeKind::ActualRet { call, dst }, None);
        self.actual_ret_map.insert(call, node);
        self.set_def(dst, node);
        node
    }

    fn add_edge(&mut self, src: NodeId, dst: NodeId, kind: VfgEdgeKind, pts: Option<NodeSet>) -> Option<EdgeId> {
        let edge = VfgEdge {
            src,
            dst,
            kind,
            pts,
        };
        if let Some(existing) = self.graph.find_edge(src, dst, edge.flag()) {
            // Indirect edges accumulate the memory that flows across.
            if let Some(extra) = edge.pts {
                let payload = self.graph.edge_mut(existing);
                match &mut payload.pts {
                    Some(pts) => {
                        pts.union(&extra);
                    }
                    None => payload.pts = Some(extra),
                }
            }
            return None;
        }
        Some(self.graph.add_edge(src, dst, edge))
    }

    pub fn add_intra_direct_edge(&mut self, src: NodeId, dst: NodeId) -> Option<EdgeId> {
        self.add_edge(src, dst, VfgEdgeKind::IntraDirect, None)
    }

    pub fn add_call_direct_edge(&mut self, src: NodeId, dst: NodeId, cs: CallSiteId) -> Option<EdgeId> {
        self.add_edge(src, dst, VfgEdgeKind::CallDirect(cs), None)
    }

    pub fn add_ret_direct_edge(&mut self, src: NodeId, dst: NodeId, cs: CallSiteId) -> Option<EdgeId> {
        self.add_edge(src, dst, VfgEdgeKind::RetDirect(cs), None)
    }

    pub fn add_intra_ind_edge(&mut self, src: NodeId, dst: NodeId, pts: NodeSet) -> Option<EdgeId> {
        self.add_edge(src, dst, VfgEdgeKind::IntraInd, Some(pts))
    }

    pub fn add_call_ind_edge(&mut self, src: NodeId, dst: NodeId, cs: CallSiteId, pts: NodeSet) -> Option<EdgeId> {
        self.add_edge(src, dst, VfgEdgeKind::CallInd(cs), Some(pts))
    }

    pub fn add_ret_ind_edge(&mut self, src: NodeId, dst: NodeId, cs: CallSiteId, pts: NodeSet) -> Option<EdgeId> {
        self.add_edge(src, dst, VfgEdgeKind::RetInd(cs), Some(pts))
    }

    pub fn add_thread_mhp_ind_edge(&mut self, src: NodeId, dst: NodeId, pts: NodeSet) -> Option<EdgeId> {
        self.add_edge(src, dst, VfgEdgeKind::ThreadMhpInd, Some(pts))
    }
}

impl Default for Vfg {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pag_node(n: usize) -> NodeId {
        NodeId::new(n)
    }

    #[test]
    #[should_panic(expected = "multiple value-flow definitions")]
    fn second_definition_is_fatal() {
        let mut vfg = Vfg::new();
        let a = vfg.add_node(
            VfgNodeKind::IntraPhi {
                res: pag_node(1),
                ops: vec![],
            },
            None,
        );
        let b = vfg.add_node(
            VfgNodeKind::IntraPhi {
                res: pag_node(1),
                ops: vec![],
            },
            None,
        );
        vfg.set_def(pag_node(1), a);
        vfg.set_def(pag_node(1), b);
    }

    #[test]
    fn indirect_edges_accumulate_pts() {
        let mut vfg = Vfg::new();
        let a = vfg.add_node(
            VfgNodeKind::FormalIn {
                func: FuncId(0),
                region: MemRegionId(0),
            },
            None,
        );
        let b = vfg.add_node(
            VfgNodeKind::FormalOut {
                func: FuncId(0),
                region: MemRegionId(0),
            },
            None,
        );
        let first: NodeSet = [pag_node(4)].into_iter().collect();
        let second: NodeSet = [pag_node(5)].into_iter().collect();
        assert!(vfg.add_intra_ind_edge(a, b, first).is_some());
        assert!(vfg.add_intra_ind_edge(a, b, second).is_none());

        let ids = vfg.edge_ids();
        assert_eq!(ids.len(), 1);
        let pts = vfg.edge(ids[0]).pts.as_ref().unwrap();
        assert!(pts.contains(pag_node(4)) && pts.contains(pag_node(5)));
    }

    #[test]
    fn parm_nodes_are_memoised_and_define() {
        let mut vfg = Vfg::new();
        let fp = vfg.get_or_add_formal_parm(pag_node(3));
        assert_eq!(vfg.get_or_add_formal_parm(pag_node(3)), fp);
        assert_eq!(vfg.def_of(pag_node(3)), Some(fp));
        assert!(matches!(
            vfg.node(fp).kind,
            VfgNodeKind::FormalParm { param } if param == pag_node(3)
        ));
    }
}
