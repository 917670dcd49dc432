// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The sparse value-flow graph: the VFG extended with memory-SSA def-use.
//!
//! Memory nodes come from an external memory-SSA oracle; this type owns the
//! maps locating them, and the single entry point the analysis uses when a
//! new indirect call edge materialises.

use std::collections::BTreeMap;

use crate::graph::pag::Pag;
use crate::graph::vfg::Vfg;
use crate::graph::{EdgeId, NodeId};
use crate::ir::{CallSiteId, FuncId, MemRegionId};

pub struct Svfg {
    pub vfg: Vfg,
    /// (function, region) -> formal-in node: memory live on entry.
    pub formal_in: BTreeMap<(FuncId, MemRegionId), NodeId>,
    /// (function, region) -> formal-out node: memory escaping at return.
    pub formal_out: BTreeMap<(FuncId, MemRegionId), NodeId>,
    /// (call node, region) -> actual-in node: memory flowing into a call.
    pub actual_in: BTreeMap<(NodeId, MemRegionId), NodeId>,
    /// (call node, region) -> actual-out node: memory defined by a call.
    pub actual_out: BTreeMap<(NodeId, MemRegionId), NodeId>,
}

impl Svfg {
    pub fn new(vfg: Vfg) -> Self {
        Svfg {
            vfg,
            formal_in: BTreeMap::new(),
            formal_out: BTreeMap::new(),
            actual_in: BTreeMap::new(),
            actual_out: BTreeMap::new(),
        }
    }

    /// Wires a `(callsite, callee)` pair discovered during solving. Emits
    /// the four inter-procedural families — actuals into formals, formal
    /// return into actual return, actual-in into formal-in, formal-out into
    /// actual-out — and appends every new edge to `edges_out`.
    pub fn connect_caller_and_callee(
        &mut self,
        pag: &Pag,
        call_node: NodeId,
        callee: FuncId,
        cs_id: CallSiteId,
        edges_out: &mut Vec<EdgeId>,
    ) {
        // Actual parameters into formal parameters.
        let args = pag.callsite_args(call_node).cloned().unwrap_or_default();
        let params = pag.fun_args(callee).cloned().unwrap_or_default();
        for (arg, param) in args.iter().zip(params.iter()) {
            let ap = self.vfg.get_or_add_actual_parm(call_node, *arg);
            let fp = self.vfg.get_or_add_formal_parm(*param);
            if let Some(edge) = self.vfg.add_call_direct_edge(ap, fp, cs_id) {
                edges_out.push(edge);
            }
        }

        // Formal return into actual return.
        if let (Some(dst), Some(ret)) = (pag.callsite_ret(call_node), pag.fun_ret(callee)) {
            let fr = self.vfg.get_or_add_formal_ret(ret);
            let ar = self.vfg.get_or_add_actual_ret(call_node, dst);
            if let Some(edge) = self.vfg.add_ret_direct_edge(fr, ar, cs_id) {
                edges_out.push(edge);
            }
        }

        // Actual-in into formal-in, per region the callee consumes.
        let ains: Vec<(MemRegionId, NodeId)> = self
            .actual_in
            .range((call_node, MemRegionId(0))..=(call_node, MemRegionId(u32::MAX)))
            .map(|((_, region), node)| (*region, *node))
            .collect();
        for (region, ain) in ains {
            if let Some(&fin) = self.formal_in.get(&(callee, region)) {
                let pts = self.vfg.node(ain).pts.clone().unwrap_or_default();
                if let Some(edge) = self.vfg.add_call_ind_edge(ain, fin, cs_id, pts) {
                    edges_out.push(edge);
                }
            }
        }

        // Formal-out into actual-out, per region the callee defines.
        let fouts: Vec<(MemRegionId, NodeId)> = self
            .formal_out
            .range((callee, MemRegionId(0))..=(callee, MemRegionId(u32::MAX)))
            .map(|((_, region), node)| (*region, *node))
            .collect();
        for (region, fout) in fouts {
            if let Some(&aout) = self.actual_out.get(&(call_node, region)) {
                let pts = self.vfg.node(fout).pts.clone().unwrap_or_default();
                if let Some(edge) = self.vfg.add_ret_ind_edge(fout, aout, cs_id, pts) {
                    edges_out.push(edge);
                }
            }
        }
    }
}
