// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The interprocedural control-flow graph.
//!
//! One `Global` node per module holds the global initialisers; every
//! function contributes entry/exit nodes; callsites contribute a paired
//! `Call`/`Ret` node. Intra-procedural edges never cross function
//! boundaries.

use std::collections::HashMap;

use log::warn;

use crate::graph::call_graph::{CgEdgeKind, PtaCallGraph};
use crate::graph::generic::{make_edge_flag, EdgeFlag, GenericGraph, GraphEdge};
use crate::graph::{EdgeId, NodeId};
use crate::ir::{FuncId, InstrId, SymId};
use crate::pts_set::bit_set::Idx;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IcfgNodeKind {
    /// Module entry: holds global initialiser statements.
    Global,
    Intra(InstrId),
    FunEntry(FuncId),
    FunExit(FuncId),
    Call(InstrId),
    Ret(InstrId),
}

#[derive(Clone, Debug)]
pub struct IcfgNode {
    pub kind: IcfgNodeKind,
    /// Owning function; `None` only for the global node.
    pub func: Option<FuncId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IcfgEdgeKind {
    /// Intra-procedural flow, optionally guarded by a branch condition
    /// value and the taken-branch index.
    IntraCf { cond: Option<(SymId, u32)> },
    CallCf(InstrId),
    RetCf(InstrId),
}

#[derive(Clone, Debug)]
pub struct IcfgEdge {
    pub src: NodeId,
    pub dst: NodeId,
    pub kind: IcfgEdgeKind,
}

impl GraphEdge for IcfgEdge {
    fn flag(&self) -> EdgeFlag {
        match &self.kind {
            IcfgEdgeKind::IntraCf { .. } => make_edge_flag(0, 0),
            IcfgEdgeKind::CallCf(instr) => make_edge_flag(1, instr.index() as u64 + 1),
            IcfgEdgeKind::RetCf(instr) => make_edge_flag(2, instr.index() as u64 + 1),
        }
    }
}

pub struct Icfg {
    graph: GenericGraph<IcfgNode, IcfgEdge>,
    global_node: NodeId,
    intra_map: HashMap<InstrId, NodeId>,
    call_map: HashMap<InstrId, NodeId>,
    ret_map: HashMap<InstrId, NodeId>,
    entry_map: HashMap<FuncId, NodeId>,
    exit_map: HashMap<FuncId, NodeId>,
    call_to_ret: HashMap<NodeId, NodeId>,
}

impl Icfg {
    pub fn new() -> Self {
        let mut graph = GenericGraph::new();
        let global_node = graph.add_node(IcfgNode {
            kind: IcfgNodeKind::Global,
            func: None,
        });
        Icfg {
            graph,
            global_node,
            intra_map: HashMap::new(),
            call_map: HashMap::new(),
            ret_map: HashMap::new(),
            entry_map: HashMap::new(),
            exit_map: HashMap::new(),
            call_to_ret: HashMap::new(),
        }
    }

    #[inline]
    pub fn global_node(&self) -> NodeId {
        self.global_node
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &IcfgNode {
        self.graph.node(id)
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn func_of(&self, node: NodeId) -> Option<FuncId> {
        self.graph.node(node).func
    }

    pub fn get_or_add_intra_node(&mut self, instr: InstrId, func: FuncId) -> NodeId {
        if let Some(&node) = self.intra_map.get(&instr) {
            return node;
        }
        let node = self.graph.add_node(IcfgNode {
            kind: IcfgNodeKind::Intra(instr),
            func: Some(func),
        });
        self.intra_map.insert(instr, node);
        node
    }

    /// Creates the paired Call/Ret nodes for a callsite; memoised.
    pub fn get_or_add_call_node(&mut self, instr: InstrId, func: FuncId) -> NodeId {
        if let Some(&node) = self.call_map.get(&instr) {
            return node;
        }
        let call = self.graph.add_node(IcfgNode {
            kind: IcfgNodeKind::Call(instr),
            func: Some(func),
        });
        let ret = self.graph.add_node(IcfgNode {
            kind: IcfgNodeKind::Ret(instr),
            func: Some(func),
        });
        self.call_map.insert(instr, call);
        self.ret_map.insert(instr, ret);
        self.call_to_ret.insert(call, ret);
        call
    }

    pub fn get_or_add_ret_node(&mut self, instr: InstrId, func: FuncId) -> NodeId {
        self.get_or_add_call_node(instr, func);
        self.ret_map[&instr]
    }

    pub fn ret_node_of_call(&self, call_node: NodeId) -> NodeId {
        self.call_to_ret[&call_node]
    }

    pub fn get_or_add_fun_entry_node(&mut self, func: FuncId) -> NodeId {
        if let Some(&node) = self.entry_map.get(&func) {
            return node;
        }
        let node = self.graph.add_node(IcfgNode {
            kind: IcfgNodeKind::FunEntry(func),
            func: Some(func),
        });
        self.entry_map.insert(func, node);
        node
    }

    pub fn get_or_add_fun_exit_node(&mut self, func: FuncId) -> NodeId {
        if let Some(&node) = self.exit_map.get(&func) {
            return node;
        }
        let node = self.graph.add_node(IcfgNode {
            kind: IcfgNodeKind::FunExit(func),
            func: Some(func),
        });
        self.exit_map.insert(func, node);
        node
    }

    pub fn intra_node_of(&self, instr: InstrId) -> Option<NodeId> {
        self.intra_map.get(&instr).copied()
    }

    pub fn call_node_of(&self, instr: InstrId) -> Option<NodeId> {
        self.call_map.get(&instr).copied()
    }

    pub fn fun_entry_node(&self, func: FuncId) -> Option<NodeId> {
        self.entry_map.get(&func).copied()
    }

    pub fn fun_exit_node(&self, func: FuncId) -> Option<NodeId> {
        self.exit_map.get(&func).copied()
    }

    /// Adds an intra-procedural edge. Both endpoints must belong to the same
    /// function.
    pub fn add_intra_edge(&mut self, src: NodeId, dst: NodeId) -> Option<EdgeId> {
        self.add_intra_edge_impl(src, dst, None)
    }

    /// An intra edge annotated with its branch condition and taken index.
    pub fn add_conditional_intra_edge(
        &mut self,
        src: NodeId,
        dst: NodeId,
        cond: SymId,
        branch_id: u32,
    ) -> Option<EdgeId> {
        self.add_intra_edge_impl(src, dst, Some((cond, branch_id)))
    }

    fn add_intra_edge_impl(
        &mut self,
        src: NodeId,
        dst: NodeId,
        cond: Option<(SymId, u32)>,
    ) -> Option<EdgeId> {
        let src_func = self.func_of(src);
        let dst_func = self.func_of(dst);
        assert!(
            src_func.is_some() && src_func == dst_func,
            "intra edge crossing function boundary: {:?} -> {:?}",
            src,
            dst
        );
        let edge = IcfgEdge {
            src,
            dst,
            kind: IcfgEdgeKind::IntraCf { cond },
        };
        if self.graph.find_edge(src, dst, edge.flag()).is_some() {
            return None;
        }
        Some(self.graph.add_edge(src, dst, edge))
    }

    pub fn add_call_cf_edge(&mut self, call_node: NodeId, entry: NodeId, instr: InstrId) -> Option<EdgeId> {
        let edge = IcfgEdge {
            src: call_node,
            dst: entry,
            kind: IcfgEdgeKind::CallCf(instr),
        };
        if self.graph.find_edge(call_node, entry, edge.flag()).is_some() {
            return None;
        }
        Some(self.graph.add_edge(call_node, entry, edge))
    }

    pub fn add_ret_cf_edge(&mut self, exit: NodeId, ret_node: NodeId, instr: InstrId) -> Option<EdgeId> {
        let edge = IcfgEdge {
            src: exit,
            dst: ret_node,
            kind: IcfgEdgeKind::RetCf(instr),
        };
        if self.graph.find_edge(exit, ret_node, edge.flag()).is_some() {
            return None;
        }
        Some(self.graph.add_edge(exit, ret_node, edge))
    }

    /// Inserts CallCf/RetCf edges for every resolved (callsite, callee) pair
    /// the callgraph knows. Idempotent; returns how many edges were new.
    pub fn update_call_graph(&mut self, call_graph: &PtaCallGraph) -> usize {
        let mut added = 0;
        for (_, call_node, callee, kind) in call_graph.call_site_pairs() {
            if kind != CgEdgeKind::CallRet {
                continue;
            }
            let instr = match self.node(call_node).kind {
                IcfgNodeKind::Call(instr) => instr,
                other => panic!("callsite is not a call node: {:?}", other),
            };
            let (Some(entry), Some(exit)) =
                (self.fun_entry_node(callee), self.fun_exit_node(callee))
            else {
                warn!("callee {:?} has no body in the icfg", callee);
                continue;
            };
            if self.add_call_cf_edge(call_node, entry, instr).is_some() {
                added += 1;
            }
            let ret_node = self.ret_node_of_call(call_node);
            if self.add_ret_cf_edge(exit, ret_node, instr).is_some() {
                added += 1;
            }
        }
        added
    }
}

impl Default for Icfg {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodes_are_memoised() {
        let mut icfg = Icfg::new();
        let f = FuncId(0);
        let a = icfg.get_or_add_intra_node(InstrId(0), f);
        assert_eq!(icfg.get_or_add_intra_node(InstrId(0), f), a);
        let call = icfg.get_or_add_call_node(InstrId(1), f);
        assert_eq!(icfg.get_or_add_call_node(InstrId(1), f), call);
        // Call and Ret are paired.
        let ret = icfg.get_or_add_ret_node(InstrId(1), f);
        assert_eq!(icfg.ret_node_of_call(call), ret);
    }

    #[test]
    fn intra_edge_within_one_function() {
        let mut icfg = Icfg::new();
        let f = FuncId(0);
        let a = icfg.get_or_add_intra_node(InstrId(0), f);
        let b = icfg.get_or_add_intra_node(InstrId(1), f);
        assert!(icfg.add_intra_edge(a, b).is_some());
        // Idempotent.
        assert!(icfg.add_intra_edge(a, b).is_none());
    }

    #[test]
    #[should_panic(expected = "crossing function boundary")]
    fn cross_function_intra_edge_is_fatal() {
        let mut icfg = Icfg::new();
        let a = icfg.get_or_add_intra_node(InstrId(0), FuncId(0));
        let b = icfg.get_or_add_intra_node(InstrId(1), FuncId(1));
        icfg.add_intra_edge(a, b);
    }

    #[test]
    fn conditional_edges_carry_branch_info() {
        let mut icfg = Icfg::new();
        let f = FuncId(0);
        let a = icfg.get_or_add_intra_node(InstrId(0), f);
        let b = icfg.get_or_add_intra_node(InstrId(1), f);
        let edge = icfg.add_conditional_intra_edge(a, b, SymId(7), 1).unwrap();
        match &icfg.graph.edge(edge).kind {
            IcfgEdgeKind::IntraCf { cond } => assert_eq!(*cond, Some((SymId(7), 1))),
            other => panic!("unexpected kind {:?}", other),
        }
    }
}
