// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Two-pass construction of the value-flow graph, and the memory-SSA
//! overlay that turns it into the sparse VFG.
//!
//! Pass one allocates one node per statement-kind PAG edge (one shared node
//! for multi-operand statements) and records each top-level node's
//! definition. Pass two wires every use to its definition with direct
//! edges. The overlay then binds the oracle's memory-SSA records to nodes
//! and wires indirect def-use, intra- and inter-procedurally.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::debug;

use crate::graph::call_graph::{CgEdgeKind, PtaCallGraph};
use crate::graph::icfg::{Icfg, IcfgNodeKind};
use crate::graph::pag::{Pag, PagEdgeKind};
use crate::graph::svfg::Svfg;
use crate::graph::vfg::{Vfg, VfgNodeKind};
use crate::graph::{NodeId, NodeSet};
use crate::ir::oracles::{ConcurrencyOracle, MemSsa};
use crate::ir::{FuncId, InstrId, MemRegionId, MssaVersion};
use crate::pts_set::points_to::PointsToSet;

pub struct SvfgBuilder;

impl SvfgBuilder {
    /// Builds the direct (top-level def-use) part of the value-flow graph.
    pub fn build_vfg(pag: &Pag, call_graph: &PtaCallGraph) -> Vfg {
        let mut vfg = Vfg::new();

        // Address statements define their destination.
        for id in pag.edges_of_kind(PagEdgeKind::Addr) {
            let edge = pag.edge(id);
            let node = vfg.get_or_add_stmt_node(id, VfgNodeKind::Addr { edge: id });
            vfg.set_def(edge.dst, node);
        }

        // Copies, plus unlabelled call/ret edges from imported summaries,
        // grouped by destination: several incoming copies form a phi.
        let mut copy_groups: BTreeMap<NodeId, Vec<crate::graph::EdgeId>> = BTreeMap::new();
        for id in pag.edges_of_kind(PagEdgeKind::Copy) {
            copy_groups.entry(pag.edge(id).dst).or_default().push(id);
        }
        for kind in [PagEdgeKind::Call, PagEdgeKind::Ret] {
            for id in pag.edges_of_kind(kind) {
                let edge = pag.edge(id);
                if edge.label.is_none() {
                    copy_groups.entry(edge.dst).or_default().push(id);
                }
            }
        }
        for (dst, edges) in copy_groups {
            if let [single] = edges[..] {
                let node = vfg.get_or_add_stmt_node(single, VfgNodeKind::Copy { edge: single });
                vfg.set_def(dst, node);
            } else {
                let mut ops: Vec<NodeId> = edges.iter().map(|id| pag.edge(*id).src).collect();
                ops.sort_unstable();
                let node = vfg.add_node(VfgNodeKind::IntraPhi { res: dst, ops }, None);
                for id in edges {
                    vfg.map_stmt_node(id, node);
                }
                vfg.set_def(dst, node);
            }
        }

        for kind in [PagEdgeKind::NormalGep, PagEdgeKind::VariantGep] {
            for id in pag.edges_of_kind(kind) {
                let edge = pag.edge(id);
                let node = vfg.get_or_add_stmt_node(id, VfgNodeKind::Gep { edge: id });
                vfg.set_def(edge.dst, node);
            }
        }
        for id in pag.edges_of_kind(PagEdgeKind::Load) {
            let edge = pag.edge(id);
            let node = vfg.get_or_add_stmt_node(id, VfgNodeKind::Load { edge: id });
            vfg.set_def(edge.dst, node);
        }
        for id in pag.edges_of_kind(PagEdgeKind::Store) {
            vfg.get_or_add_stmt_node(id, VfgNodeKind::Store { edge: id });
        }

        // Multi-operand value statements share one node per destination.
        for (kind, make) in [
            (
                PagEdgeKind::Cmp,
                (|res, ops| VfgNodeKind::Cmp { res, ops }) as fn(NodeId, Vec<NodeId>) -> VfgNodeKind,
            ),
            (PagEdgeKind::BinaryOp, |res, ops| VfgNodeKind::BinaryOp {
                res,
                ops,
            }),
            (PagEdgeKind::UnaryOp, |res, ops| VfgNodeKind::UnaryOp {
                res,
                ops,
            }),
        ] {
            let mut groups: BTreeMap<NodeId, Vec<crate::graph::EdgeId>> = BTreeMap::new();
            for id in pag.edges_of_kind(kind) {
                groups.entry(pag.edge(id).dst).or_default().push(id);
            }
            for (dst, edges) in groups {
                let mut ops: Vec<NodeId> = edges.iter().map(|id| pag.edge(*id).src).collect();
                ops.sort_unstable();
                let node = vfg.add_node(make(dst, ops), None);
                for id in edges {
                    vfg.map_stmt_node(id, node);
                }
                vfg.set_def(dst, node);
            }
        }

        // Labelled call edges: actual-parameter into formal-parameter.
        for kind in [PagEdgeKind::Call, PagEdgeKind::ThreadFork] {
            for id in pag.edges_of_kind(kind) {
                let edge = pag.edge(id);
                let Some(call_node) = edge.label else { continue };
                let Some(callee) = pag.formal_func(edge.dst) else {
                    debug!("call edge {:?} targets an unknown formal", id);
                    continue;
                };
                let Some(cs_id) = call_graph.call_site_id(call_node, callee) else {
                    continue;
                };
                let ap = vfg.get_or_add_actual_parm(call_node, edge.src);
                let fp = vfg.get_or_add_formal_parm(edge.dst);
                vfg.add_call_direct_edge(ap, fp, cs_id);
            }
        }

        // Labelled ret edges: formal return into actual return.
        for kind in [PagEdgeKind::Ret, PagEdgeKind::ThreadJoin] {
            for id in pag.edges_of_kind(kind) {
                let edge = pag.edge(id);
                let Some(call_node) = edge.label else { continue };
                let Some(callee) = pag.formal_func(edge.src) else {
                    debug!("ret edge {:?} leaves an unknown formal", id);
                    continue;
                };
                let Some(cs_id) = call_graph.call_site_id(call_node, callee) else {
                    continue;
                };
                let fr = vfg.get_or_add_formal_ret(edge.src);
                let ar = vfg.get_or_add_actual_ret(call_node, edge.dst);
                vfg.add_ret_direct_edge(fr, ar, cs_id);
            }
        }

        // Pass two: wire uses to definitions.
        let nodes: Vec<(NodeId, VfgNodeKind)> = vfg
            .node_ids()
            .into_iter()
            .map(|id| (id, vfg.node(id).kind.clone()))
            .collect();
        for (node, kind) in nodes {
            let operands: Vec<NodeId> = match kind {
                VfgNodeKind::Copy { edge }
                | VfgNodeKind::Gep { edge }
                | VfgNodeKind::Load { edge } => vec![pag.edge(edge).src],
                VfgNodeKind::Store { edge } => {
                    let e = pag.edge(edge);
                    vec![e.src, e.dst]
                }
                VfgNodeKind::IntraPhi { ops, .. }
                | VfgNodeKind::Cmp { ops, .. }
                | VfgNodeKind::BinaryOp { ops, .. }
                | VfgNodeKind::UnaryOp { ops, .. } => ops,
                VfgNodeKind::ActualParm { arg, .. } => vec![arg],
                VfgNodeKind::FormalRet { ret } => vec![ret],
                _ => Vec::new(),
            };
            for op in operands {
                if let Some(def) = vfg.def_of(op) {
                    if def != node {
                        vfg.add_intra_direct_edge(def, node);
                    }
                }
            }
        }

        vfg
    }

    /// Builds the sparse VFG: the direct graph plus the memory-SSA overlay
    /// and, when a concurrency oracle is present, may-happen-in-parallel
    /// edges between parallel memory accesses.
    pub fn build(
        pag: &Pag,
        icfg: &Icfg,
        call_graph: &PtaCallGraph,
        functions: &[FuncId],
        mem_ssa: Option<&dyn MemSsa>,
        concurrency: Option<&dyn ConcurrencyOracle>,
    ) -> Svfg {
        let mut svfg = Svfg::new(Self::build_vfg(pag, call_graph));
        let Some(mem) = mem_ssa else {
            return svfg;
        };

        // Memory-access statement nodes by instruction.
        let mut access_nodes: HashMap<InstrId, Vec<NodeId>> = HashMap::new();
        let mut instr_regions: HashMap<InstrId, BTreeSet<MemRegionId>> = HashMap::new();
        for kind in [PagEdgeKind::Load, PagEdgeKind::Store] {
            for id in pag.edges_of_kind(kind) {
                let Some(site) = pag.edge_site(id) else { continue };
                let IcfgNodeKind::Intra(instr) = icfg.node(site).kind else {
                    continue;
                };
                if let Some(node) = svfg.vfg.stmt_node_of(id) {
                    access_nodes.entry(instr).or_default().push(node);
                }
            }
        }

        for &func in functions {
            let Some(summary) = mem.function_summary(func) else {
                continue;
            };
            let mut version_defs: HashMap<(MemRegionId, MssaVersion), NodeId> = HashMap::new();

            // Definitions first.
            for &(region, version) in &summary.entry_chis {
                let pts = mem.region_pts(region).clone();
                let node = svfg
                    .vfg
                    .add_node(VfgNodeKind::FormalIn { func, region }, Some(pts));
                svfg.formal_in.insert((func, region), node);
                version_defs.insert((region, version), node);
            }
            let mut phi_nodes: Vec<(NodeId, MemRegionId, Vec<MssaVersion>)> = Vec::new();
            for phi in &summary.phis {
                let pts = mem.region_pts(phi.region).clone();
                let node = svfg.vfg.add_node(
                    VfgNodeKind::MssaPhi {
                        func,
                        region: phi.region,
                    },
                    Some(pts),
                );
                version_defs.insert((phi.region, phi.def), node);
                phi_nodes.push((node, phi.region, phi.ops.clone()));
            }
            for &(instr, region, version) in &summary.store_chis {
                instr_regions.entry(instr).or_default().insert(region);
                if let Some(nodes) = access_nodes.get(&instr) {
                    for &node in nodes {
                        version_defs.insert((region, version), node);
                    }
                }
            }
            for &(instr, region, version) in &summary.call_chis {
                let Some(call_node) = icfg.call_node_of(instr) else {
                    continue;
                };
                let pts = mem.region_pts(region).clone();
                let node = svfg.vfg.add_node(
                    VfgNodeKind::ActualOut {
                        call: call_node,
                        region,
                    },
                    Some(pts),
                );
                svfg.actual_out.insert((call_node, region), node);
                version_defs.insert((region, version), node);
            }

            // Then uses.
            for &(instr, region, version) in &summary.load_mus {
                instr_regions.entry(instr).or_default().insert(region);
                let (Some(def), Some(uses)) = (
                    version_defs.get(&(region, version)).copied(),
                    access_nodes.get(&instr),
                ) else {
                    continue;
                };
                let pts = mem.region_pts(region).clone();
                for &use_node in uses {
                    svfg.vfg.add_intra_ind_edge(def, use_node, pts.clone());
                }
            }
            for &(region, version) in &summary.ret_mus {
                let pts = mem.region_pts(region).clone();
                let node = svfg
                    .vfg
                    .add_node(VfgNodeKind::FormalOut { func, region }, Some(pts.clone()));
                svfg.formal_out.insert((func, region), node);
                if let Some(def) = version_defs.get(&(region, version)).copied() {
                    svfg.vfg.add_intra_ind_edge(def, node, pts);
                }
            }
            for &(instr, region, version) in &summary.call_mus {
                let Some(call_node) = icfg.call_node_of(instr) else {
                    continue;
                };
                let pts = mem.region_pts(region).clone();
                let node = svfg.vfg.add_node(
                    VfgNodeKind::ActualIn {
                        call: call_node,
                        region,
                    },
                    Some(pts.clone()),
                );
                svfg.actual_in.insert((call_node, region), node);
                if let Some(def) = version_defs.get(&(region, version)).copied() {
                    svfg.vfg.add_intra_ind_edge(def, node, pts);
                }
            }
            for (node, region, ops) in phi_nodes {
                let pts = mem.region_pts(region).clone();
                for op in ops {
                    if let Some(def) = version_defs.get(&(region, op)).copied() {
                        svfg.vfg.add_intra_ind_edge(def, node, pts.clone());
                    }
                }
            }
        }

        // Inter-procedural families for every known (callsite, callee) pair.
        let mut edges = Vec::new();
        for (cs_id, call_node, callee, kind) in call_graph.call_site_pairs() {
            if kind == CgEdgeKind::CallRet {
                svfg.connect_caller_and_callee(pag, call_node, callee, cs_id, &mut edges);
            }
        }

        // Parallel memory accesses.
        if let Some(conc) = concurrency {
            for (a, b) in conc.mhp_pairs() {
                let shared: BTreeSet<MemRegionId> = match (instr_regions.get(&a), instr_regions.get(&b))
                {
                    (Some(ra), Some(rb)) => ra.intersection(rb).copied().collect(),
                    _ => continue,
                };
                if shared.is_empty() {
                    continue;
                }
                let mut pts = NodeSet::new();
                for region in &shared {
                    pts.union(mem.region_pts(*region));
                }
                let (Some(nodes_a), Some(nodes_b)) = (access_nodes.get(&a), access_nodes.get(&b))
                else {
                    continue;
                };
                for &na in nodes_a {
                    for &nb in nodes_b {
                        svfg.vfg.add_thread_mhp_ind_edge(na, nb, pts.clone());
                    }
                }
            }
        }

        svfg
    }
}
