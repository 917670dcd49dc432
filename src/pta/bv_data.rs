// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The bit-vector fixpoint engine.
//!
//! Each outer iteration collapses constraint-graph cycles, propagates diff
//! points-to sets along the constraints to a local fixpoint, then resolves
//! indirect callsites against the current solution. New call edges feed
//! fresh constraints (and value-flow families) back in; the engine stops
//! when an iteration discovers nothing.

use std::collections::VecDeque;
use std::time::Instant;

use log::{info, warn};

use crate::builder::pag_builder::BuiltProgram;
use crate::graph::call_graph::PtaCallGraph;
use crate::graph::constraint_graph::{ConstraintEdgeKind, ConstraintGraph};
use crate::graph::icfg::{Icfg, IcfgNodeKind};
use crate::graph::pag::Pag;
use crate::graph::scc::{EdgeProjection, SccDetector};
use crate::graph::svfg::Svfg;
use crate::graph::{NodeId, NodeSet};
use crate::ir::oracles::ClassHierarchyResolver;
use crate::ir::{FuncId, SymId};
use crate::pta::{AliasResult, DiffPtDataTy, PointsTo};
use crate::pts_set::points_to::PointsToSet;
use crate::util::chunked_queue::Cursor;
use crate::util::options::AnalysisOptions;

pub struct BvDataPta {
    options: AnalysisOptions,
    pag: Pag,
    icfg: Icfg,
    cg: ConstraintGraph,
    call_graph: PtaCallGraph,
    svfg: Option<Svfg>,
    virtual_resolver: Option<Box<dyn ClassHierarchyResolver>>,

    pt_data: DiffPtDataTy,
    worklist: VecDeque<NodeId>,
    addr_cursor: Cursor,
    iterations: usize,
    converged: bool,
}

impl BvDataPta {
    pub fn new(program: BuiltProgram, options: AnalysisOptions) -> Self {
        let BuiltProgram {
            pag,
            icfg,
            call_graph,
        } = program;
        let cg = ConstraintGraph::build_from_pag(&pag);
        let addr_cursor = pag.addr_edge_cursor();
        BvDataPta {
            options,
            pag,
            icfg,
            cg,
            call_graph,
            svfg: None,
            virtual_resolver: None,
            pt_data: DiffPtDataTy::new(),
            worklist: VecDeque::new(),
            addr_cursor,
            iterations: 0,
            converged: false,
        }
    }

    pub fn with_virtual_resolver(mut self, resolver: Box<dyn ClassHierarchyResolver>) -> Self {
        self.virtual_resolver = Some(resolver);
        self
    }

    /// Attaches a value-flow graph so newly discovered call edges extend it
    /// on the fly.
    pub fn attach_svfg(&mut self, svfg: Svfg) {
        self.svfg = Some(svfg);
    }

    #[inline]
    pub fn pag(&self) -> &Pag {
        &self.pag
    }

    #[inline]
    pub fn icfg(&self) -> &Icfg {
        &self.icfg
    }

    #[inline]
    pub fn call_graph(&self) -> &PtaCallGraph {
        &self.call_graph
    }

    #[inline]
    pub fn constraint_graph(&self) -> &ConstraintGraph {
        &self.cg
    }

    #[inline]
    pub fn svfg(&self) -> Option<&Svfg> {
        self.svfg.as_ref()
    }

    #[inline]
    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    // ---- public points-to surface -----------------------------------------

    /// The points-to set of a node, through its representative.
    pub fn get_pts(&self, node: NodeId) -> PointsTo {
        self.pt_data.full_pts(self.cg.scc_rep(node))
    }

    pub fn get_pts_of_sym(&self, sym: SymId) -> PointsTo {
        self.get_pts(self.pag.node_of(sym))
    }

    pub fn add_pts(&mut self, node: NodeId, obj: NodeId) -> bool {
        let rep = self.cg.scc_rep(node);
        if self.pt_data.add_pts(rep, obj) {
            self.worklist.push_back(rep);
            true
        } else {
            false
        }
    }

    pub fn union_pts(&mut self, dst: NodeId, src: NodeId) -> bool {
        let dst = self.cg.scc_rep(dst);
        let src_pts = self.get_pts(src);
        if self.pt_data.union_pts_to(dst, &src_pts) {
            self.worklist.push_back(dst);
            true
        } else {
            false
        }
    }

    pub fn clear_pts(&mut self, node: NodeId, obj: NodeId) -> bool {
        let rep = self.cg.scc_rep(node);
        self.pt_data.remove_pts_elem(rep, obj)
    }

    /// Substitutes every field-insensitive (or base) object by the set of
    /// all its fields. Idempotent.
    pub fn expand_fi_objs(&self, pts: &PointsTo) -> PointsTo {
        let mut expanded = pts.clone();
        for obj in pts.iter() {
            if !self.pag.node(obj).is_object() {
                continue;
            }
            if self.pag.base_obj_node(obj) == obj || self.pag.is_field_insensitive_obj(obj) {
                expanded.union(self.pag.all_fields_of(obj));
            }
        }
        expanded
    }

    /// Replaces a field object by its base when the base has been collapsed.
    /// Idempotent.
    pub fn normalize_pts(&self, pts: &mut PointsTo) {
        let mut collapsed = NodeSet::new();
        let mut dropped = NodeSet::new();
        for obj in pts.iter() {
            if self.pag.node(obj).is_object() && self.pag.is_field_insensitive_obj(obj) {
                let base = self.pag.base_obj_node(obj);
                if base != obj {
                    dropped.insert(obj);
                    collapsed.insert(base);
                }
            }
        }
        pts.subtract(&dropped);
        pts.union(&collapsed);
    }

    // ---- alias queries ----------------------------------------------------

    pub fn alias(&self, a: NodeId, b: NodeId) -> AliasResult {
        if a == b {
            return AliasResult::MayAlias;
        }
        let pts_a = self.expand_fi_objs(&self.get_pts(a));
        let pts_b = self.expand_fi_objs(&self.get_pts(b));
        self.alias_pts(&pts_a, &pts_b)
    }

    pub fn alias_syms(&self, a: SymId, b: SymId) -> AliasResult {
        self.alias(self.pag.node_of(a), self.pag.node_of(b))
    }

    /// Alias over explicit (already expanded) points-to sets.
    pub fn alias_pts(&self, pts_a: &PointsTo, pts_b: &PointsTo) -> AliasResult {
        let black_hole = self.pag.black_hole();
        if pts_a.contains(black_hole) || pts_b.contains(black_hole) {
            return AliasResult::MayAlias;
        }
        if pts_a.intersects(pts_b) {
            AliasResult::MayAlias
        } else {
            AliasResult::NoAlias
        }
    }

    // ---- the fixpoint -----------------------------------------------------

    pub fn solve(&mut self) {
        let start = Instant::now();
        loop {
            self.iterations += 1;
            if let Some(limit) = self.options.max_iterations {
                if self.iterations > limit {
                    warn!("iteration bound {} hit before fixpoint", limit);
                    break;
                }
            }
            self.collapse_cycles();
            self.propagate();
            if !self.resolve_indirect_calls() {
                self.converged = true;
                break;
            }
        }
        info!(
            "points-to solve: {} iterations in {}",
            self.iterations,
            humantime::format_duration(start.elapsed())
        );
    }

    /// Diagnostics after solving: callgraph reachability from the entry.
    pub fn finalize(&self, entry: FuncId) -> Vec<FuncId> {
        self.call_graph.verify_reachability(entry)
    }

    /// Materialises the field object `(base, ls)`, keeping the constraint
    /// graph's node space in step. Used when reloading persisted results.
    pub fn materialize_field(&mut self, base: NodeId, ls: crate::ir::location_set::LocationSet) -> NodeId {
        let node = self.pag.get_gep_obj(base, ls);
        self.cg.ensure_nodes(self.pag.node_count());
        node
    }

    /// Re-runs indirect-call resolution against the current solution until
    /// no further edge appears. Returns whether anything changed.
    pub fn update_call_graph(&mut self) -> bool {
        let mut changed = false;
        while self.resolve_indirect_calls() {
            changed = true;
            self.propagate();
        }
        changed
    }

    /// SCC detection over all direct constraint edges, followed by cycle
    /// collapse. Representatives of positive-weight cycles are flagged and
    /// their current pointees lose field precision.
    fn collapse_cycles(&mut self) {
        let mut scc = SccDetector::new();
        scc.find(&self.cg, EdgeProjection::AllDirect);

        let mut reps = Vec::new();
        while let Some(rep) = scc.pop_topo() {
            reps.push(rep);
        }
        for rep in reps {
            if !scc.is_in_cycle(rep) {
                continue;
            }
            let members = scc.sub_nodes(rep).clone();
            let mut pwc = self.has_nonzero_gep_self_loop(rep);
            for member in members.iter() {
                if member == rep {
                    continue;
                }
                // The member's solution moves to the representative before
                // its edges do.
                let member_pts = self.pt_data.full_pts(member);
                self.pt_data.union_pts_to(rep, &member_pts);
                self.pt_data.clear_pts(member);
                pwc |= self.cg.merge_node_to_rep(member, rep);
            }
            self.worklist.push_back(rep);
            if pwc {
                self.cg.set_pwc(rep);
                self.field_insensitivise_pointees(rep);
            }
        }
    }

    fn has_nonzero_gep_self_loop(&self, node: NodeId) -> bool {
        for kind in [ConstraintEdgeKind::NormalGep, ConstraintEdgeKind::VariantGep] {
            for id in self.cg.out_edges_of(node, kind) {
                let edge = self.cg.edge(id);
                if edge.dst != node {
                    continue;
                }
                match edge.ls {
                    Some(ls) => {
                        if !ls.is_zero() {
                            return true;
                        }
                    }
                    None => return true,
                }
            }
        }
        false
    }

    fn field_insensitivise_pointees(&mut self, rep: NodeId) {
        for obj in self.pt_data.full_pts(rep).iter() {
            if self.pag.node(obj).is_object() {
                self.pag.set_obj_field_insensitive(obj);
            }
        }
    }

    /// Worklist propagation to a local fixpoint.
    fn propagate(&mut self) {
        // Seed from Addr edges discovered since the last pass.
        while let Some(edge_id) = self.pag.fetch_addr_edge(&mut self.addr_cursor) {
            let edge = self.pag.edge(edge_id);
            let (src, dst) = (edge.src, edge.dst);
            let rep = self.cg.scc_rep(dst);
            if self.pt_data.add_pts(rep, src) {
                self.worklist.push_back(rep);
            }
        }

        while let Some(node) = self.worklist.pop_front() {
            let node = self.cg.scc_rep(node);
            self.process_node(node);
        }
    }

    fn process_node(&mut self, node: NodeId) {
        let Some(diff) = self.pt_data.get_diff_pts(node).cloned() else {
            return;
        };
        if !diff.is_empty() {
            // A positive-weight-cycle representative strips field precision
            // from everything it points to, including late arrivals.
            if self.cg.is_pwc(node) {
                for obj in diff.iter() {
                    if self.pag.node(obj).is_object() {
                        self.pag.set_obj_field_insensitive(obj);
                    }
                }
            }
            self.handle_load_store(node, &diff);
            self.handle_gep(node, &diff);
            self.handle_copy(node, &diff);
        }
        self.pt_data.flush(node);
    }

    /// x = *n and *n = y: materialise copy constraints against the new
    /// pointees, moving their current solution at once.
    fn handle_load_store(&mut self, node: NodeId, diff: &NodeSet) {
        for load in self.cg.out_edges_of(node, ConstraintEdgeKind::Load) {
            let dst = self.cg.scc_rep(self.cg.edge(load).dst);
            for obj in diff.iter() {
                let obj_rep = self.cg.scc_rep(obj);
                if self.cg.add_copy_edge(obj_rep, dst).is_some() {
                    let obj_pts = self.pt_data.full_pts(obj_rep);
                    if self.pt_data.union_pts_to(dst, &obj_pts) {
                        self.worklist.push_back(dst);
                    }
                }
            }
        }
        for store in self.cg.in_edges_of(node, ConstraintEdgeKind::Store) {
            let src = self.cg.scc_rep(self.cg.edge(store).src);
            for obj in diff.iter() {
                let obj_rep = self.cg.scc_rep(obj);
                if self.cg.add_copy_edge(src, obj_rep).is_some() {
                    let src_pts = self.pt_data.full_pts(src);
                    if self.pt_data.union_pts_to(obj_rep, &src_pts) {
                        self.worklist.push_back(obj_rep);
                    }
                }
            }
        }
    }

    /// p = gep n, ls: destinations collect field objects of the new
    /// pointees; variant offsets and positive-weight cycles collapse the
    /// object instead.
    fn handle_gep(&mut self, node: NodeId, diff: &NodeSet) {
        for kind in [ConstraintEdgeKind::NormalGep, ConstraintEdgeKind::VariantGep] {
            for gep in self.cg.out_edges_of(node, kind) {
                let edge = self.cg.edge(gep).clone();
                let dst = self.cg.scc_rep(edge.dst);
                let force_fi = edge.kind == ConstraintEdgeKind::VariantGep || self.cg.is_pwc(dst);
                for obj in diff.iter() {
                    if !self.pag.node(obj).is_object() {
                        continue;
                    }
                    let field = if self.pag.is_black_hole(obj) {
                        obj
                    } else if force_fi {
                        self.pag.set_obj_field_insensitive(obj);
                        self.pag.fi_obj_node(obj)
                    } else {
                        self.pag.get_gep_obj(obj, edge.ls.unwrap())
                    };
                    self.cg.ensure_nodes(self.pag.node_count());
                    if self.pt_data.add_pts(dst, field) {
                        self.worklist.push_back(dst);
                    }
                }
            }
        }
    }

    fn handle_copy(&mut self, node: NodeId, diff: &NodeSet) {
        for copy in self.cg.out_edges_of(node, ConstraintEdgeKind::Copy) {
            let dst = self.cg.scc_rep(self.cg.edge(copy).dst);
            if self.pt_data.union_pts_to(dst, diff) {
                self.worklist.push_back(dst);
            }
        }
    }

    /// On-the-fly callgraph refinement. Returns true when any new call edge
    /// appeared.
    fn resolve_indirect_calls(&mut self) -> bool {
        let mut changed = false;
        for (call_node, ptr_node) in self.pag.indirect_callsites() {
            let pts = self.pt_data.full_pts(self.cg.scc_rep(ptr_node));

            let callees: Vec<FuncId> = if self.pag.virtual_callsite_vtable(call_node).is_some()
                && self.virtual_resolver.is_some()
            {
                let IcfgNodeKind::Call(instr) = self.icfg.node(call_node).kind else {
                    panic!("virtual callsite is not a call node");
                };
                let expanded = self.expand_fi_objs(&pts);
                self.virtual_resolver
                    .as_ref()
                    .unwrap()
                    .resolve(instr, &expanded)
            } else {
                pts.iter()
                    .filter_map(|obj| self.pag.obj_function(obj))
                    .collect()
            };

            if callees.is_empty() {
                self.call_graph.note_unresolved_site(call_node);
                continue;
            }
            let caller = self
                .icfg
                .func_of(call_node)
                .expect("callsite outside any function");

            for callee in callees {
                let (cs_id, new) = self.call_graph.add_indirect_call(call_node, caller, callee);
                if !new {
                    continue;
                }
                changed = true;

                let new_edges = self.pag.connect_call(call_node, callee);
                self.cg.ensure_nodes(self.pag.node_count());
                for edge_id in &new_edges {
                    let edge = self.pag.edge(*edge_id);
                    let src = self.cg.scc_rep(edge.src);
                    let dst = self.cg.scc_rep(edge.dst);
                    if self.cg.add_copy_edge(src, dst).is_some() {
                        let src_pts = self.pt_data.full_pts(src);
                        if self.pt_data.union_pts_to(dst, &src_pts) {
                            self.worklist.push_back(dst);
                        }
                    }
                }

                if let Some(svfg) = &mut self.svfg {
                    let mut vf_edges = Vec::new();
                    svfg.connect_caller_and_callee(&self.pag, call_node, callee, cs_id, &mut vf_edges);
                }
            }
        }
        if changed {
            self.icfg.update_call_graph(&self.call_graph);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::pag_builder::PagBuilder;
    use crate::builder::svfg_builder::SvfgBuilder;
    use crate::graph::vfg::VfgEdgeKind;
    use crate::ir::location_set::LocationSet;
    use crate::ir::module::IrModule;
    use crate::ir::statements::{CallTarget, Statement};
    use crate::ir::symbols::{ObjInfo, SymbolRegistry, SymbolTable};

    fn build(module: &IrModule, symbols: &SymbolRegistry) -> BvDataPta {
        let program = PagBuilder::new(module, symbols, None, AnalysisOptions::default()).build();
        BvDataPta::new(program, AnalysisOptions::default())
    }

    /// a = &o; b = a; c = b; a = c
    fn copy_cycle() -> (BvDataPta, Vec<NodeId>) {
        let mut symbols = SymbolRegistry::new();
        let main = FuncId(0);
        let o = symbols.add_object(ObjInfo::default());
        let a = symbols.add_value();
        let b = symbols.add_value();
        let c = symbols.add_value();

        let mut module = IrModule::new();
        module.add_function(main, "main", vec![]);
        module.set_entry(main);
        module.add_instr(main, Statement::Addr { src: o, dst: a });
        module.add_instr(main, Statement::Copy { src: a, dst: b });
        module.add_instr(main, Statement::Copy { src: b, dst: c });
        module.add_instr(main, Statement::Copy { src: c, dst: a });
        module.add_instr(main, Statement::Ret { val: None });
        module.seal();

        let pta = build(&module, &symbols);
        let nodes = [o, a, b, c]
            .iter()
            .map(|s| pta.pag().node_of(*s))
            .collect();
        (pta, nodes)
    }

    #[test]
    fn copy_cycle_collapses_and_aliases() {
        let (mut pta, nodes) = copy_cycle();
        pta.solve();
        let (o, a, b, c) = (nodes[0], nodes[1], nodes[2], nodes[3]);

        // The cycle {a,b,c} shares one representative whose solution is {o}.
        let rep = pta.constraint_graph().scc_rep(a);
        assert_eq!(pta.constraint_graph().scc_rep(b), rep);
        assert_eq!(pta.constraint_graph().scc_rep(c), rep);
        for n in [a, b, c] {
            let pts = pta.get_pts(n);
            assert_eq!(pts.iter().collect::<Vec<_>>(), vec![o]);
        }
        assert_eq!(pta.alias(a, b), AliasResult::MayAlias);
        assert_eq!(pta.alias(b, c), AliasResult::MayAlias);
        assert!(pta.converged());
    }

    #[test]
    fn gep_cycle_forces_field_insensitivity() {
        // p = &o; q = gep p, 1; p = q — a positive-weight cycle.
        let mut symbols = SymbolRegistry::new();
        let main = FuncId(0);
        let o = symbols.add_object(ObjInfo {
            max_field_limit: 8,
            ..ObjInfo::default()
        });
        let p = symbols.add_value();
        let q = symbols.add_value();

        let mut module = IrModule::new();
        module.add_function(main, "main", vec![]);
        module.set_entry(main);
        module.add_instr(main, Statement::Addr { src: o, dst: p });
        module.add_instr(
            main,
            Statement::Gep {
                src: p,
                dst: q,
                ls: LocationSet::from_offset(1),
                constant: true,
            },
        );
        module.add_instr(main, Statement::Copy { src: q, dst: p });
        module.add_instr(main, Statement::Ret { val: None });
        module.seal();

        let mut pta = build(&module, &symbols);
        pta.solve();

        let p_node = pta.pag().node_of(p);
        let o_node = pta.pag().node_of(o);
        let rep = pta.constraint_graph().scc_rep(p_node);
        assert!(pta.constraint_graph().is_pwc(rep));
        assert!(pta.pag().is_field_insensitive_obj(o_node));
        // Subsequent field queries collapse to the object itself.
        let pts = pta.get_pts(p_node);
        assert!(pts.contains(o_node));
        assert!(pta.converged());
    }

    /// fp1 = &f; fp2 = &g; fp = phi(fp1, fp2); call fp()
    fn indirect_call_module() -> (IrModule, SymbolRegistry, Vec<SymId>) {
        let mut symbols = SymbolRegistry::new();
        let main = FuncId(0);
        let f = FuncId(1);
        let g = FuncId(2);

        let f_obj = symbols.add_function_object(f);
        let g_obj = symbols.add_function_object(g);
        let fp1 = symbols.add_value();
        let fp2 = symbols.add_value();
        let fp = symbols.add_value();
        let r = symbols.add_value();
        let f_param = symbols.add_value();
        let g_param = symbols.add_value();
        let f_ret = symbols.add_ret(f);
        let g_ret = symbols.add_ret(g);
        let arg_obj = symbols.add_object(ObjInfo::default());
        let arg = symbols.add_value();

        let mut module = IrModule::new();
        module.add_function(main, "main", vec![]);
        module.add_function(f, "f", vec![f_param]);
        module.add_function(g, "g", vec![g_param]);
        module.set_entry(main);

        module.add_instr(main, Statement::Addr { src: f_obj, dst: fp1 });
        module.add_instr(main, Statement::Addr { src: g_obj, dst: fp2 });
        module.add_instr(
            main,
            Statement::Phi {
                dst: fp,
                ops: vec![fp1, fp2],
            },
        );
        module.add_instr(main, Statement::Addr { src: arg_obj, dst: arg });
        module.add_instr(
            main,
            Statement::Call {
                target: CallTarget::FnPtr(fp),
                args: vec![arg],
                dst: Some(r),
            },
        );
        module.add_instr(main, Statement::Ret { val: None });
        module.add_instr(f, Statement::Ret { val: Some(f_param) });
        module.add_instr(g, Statement::Ret { val: Some(g_param) });
        module.seal();

        let _ = (f_ret, g_ret);
        (module, symbols, vec![fp, r, f_param, g_param])
    }

    #[test]
    fn indirect_calls_resolve_on_the_fly() {
        let (module, symbols, syms) = indirect_call_module();
        let program = PagBuilder::new(&module, &symbols, None, AnalysisOptions::default()).build();
        let svfg = SvfgBuilder::build(
            &program.pag,
            &program.icfg,
            &program.call_graph,
            &[FuncId(0), FuncId(1), FuncId(2)],
            None,
            None,
        );
        let mut pta = BvDataPta::new(program, AnalysisOptions::default());
        pta.attach_svfg(svfg);
        pta.solve();

        let fp = pta.pag().node_of(syms[0]);
        // fp sees both function objects.
        assert_eq!(pta.get_pts(fp).count(), 2);

        // Two (callsite, callee) pairs, two dense ids.
        assert_eq!(pta.call_graph().total_call_sites(), 2);
        assert!(pta.call_graph().unresolved_sites().is_empty());

        // Parameter passing flowed the argument object into both callees.
        let arg_pts_f = pta.get_pts_of_sym(syms[2]);
        let arg_pts_g = pta.get_pts_of_sym(syms[3]);
        assert_eq!(arg_pts_f.count(), 1);
        assert_eq!(arg_pts_g.count(), 1);

        // The return value came back through both Ret edges.
        let r = pta.pag().node_of(syms[1]);
        assert_eq!(pta.get_pts(r).count(), 1);

        // The value-flow graph gained call/ret direct families per callee.
        let svfg = pta.svfg().unwrap();
        let mut call_direct = 0;
        let mut ret_direct = 0;
        for id in svfg.vfg.edge_ids() {
            match svfg.vfg.edge(id).kind {
                VfgEdgeKind::CallDirect(_) => call_direct += 1,
                VfgEdgeKind::RetDirect(_) => ret_direct += 1,
                _ => {}
            }
        }
        assert_eq!(call_direct, 2);
        assert_eq!(ret_direct, 2);

        // The ICFG gained call/ret control-flow edges for both callees.
        assert!(pta.icfg().fun_entry_node(FuncId(1)).is_some());
        assert!(pta.icfg().fun_entry_node(FuncId(2)).is_some());
        assert!(pta.converged());
    }

    #[test]
    fn pts_is_monotone_across_iterations() {
        let (module, symbols, syms) = indirect_call_module();
        // Bound to a single iteration: the callgraph is not yet refined.
        let program = PagBuilder::new(&module, &symbols, None, AnalysisOptions::default()).build();
        let mut early = BvDataPta::new(
            program,
            AnalysisOptions {
                max_iterations: Some(1),
                ..AnalysisOptions::default()
            },
        );
        early.solve();
        assert!(!early.converged());

        let (module, symbols, _) = indirect_call_module();
        let mut full = build(&module, &symbols);
        full.solve();

        for raw in 0..symbols.total_syms() {
            let sym = SymId(raw);
            let node_early = early.pag().node_of(sym);
            let early_pts = early.get_pts(node_early);
            let full_pts = full.get_pts(full.pag().node_of(sym));
            assert!(
                full_pts.superset(&early_pts),
                "pts shrank for {:?}",
                sym
            );
        }
        let _ = syms;
    }

    #[test]
    fn alias_is_reflexive_and_symmetric_and_blackhole_forces_may() {
        let (mut pta, nodes) = copy_cycle();
        pta.solve();
        let (a, b) = (nodes[1], nodes[2]);
        assert_ne!(pta.alias(a, a), AliasResult::NoAlias);
        assert_eq!(pta.alias(a, b), pta.alias(b, a));

        // A pointer holding the black hole may alias anything.
        let mut with_bh: NodeSet = NodeSet::new();
        with_bh.insert(pta.pag().black_hole());
        let empty = NodeSet::new();
        assert_eq!(pta.alias_pts(&with_bh, &empty), AliasResult::MayAlias);
    }

    #[test]
    fn expand_and_normalize_are_idempotent() {
        let mut symbols = SymbolRegistry::new();
        let main = FuncId(0);
        let o = symbols.add_object(ObjInfo {
            max_field_limit: 8,
            ..ObjInfo::default()
        });
        let p = symbols.add_value();
        let q = symbols.add_value();
        let mut module = IrModule::new();
        module.add_function(main, "main", vec![]);
        module.set_entry(main);
        module.add_instr(main, Statement::Addr { src: o, dst: p });
        module.add_instr(
            main,
            Statement::Gep {
                src: p,
                dst: q,
                ls: LocationSet::from_offset(2),
                constant: true,
            },
        );
        module.add_instr(main, Statement::Ret { val: None });
        module.seal();

        let mut pta = build(&module, &symbols);
        pta.solve();

        let p_node = pta.pag().node_of(p);
        let once = pta.expand_fi_objs(&pta.get_pts(p_node));
        let twice = pta.expand_fi_objs(&once);
        assert_eq!(once, twice);

        let q_node = pta.pag().node_of(q);
        let mut pts = pta.get_pts(q_node);
        pta.normalize_pts(&mut pts);
        let mut again = pts.clone();
        pta.normalize_pts(&mut again);
        assert_eq!(pts, again);
    }
}
