// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Statement-by-statement construction of the PAG and ICFG from the
//! frontend's feed, with eager wiring of statically resolved calls.

use log::debug;

use crate::graph::call_graph::{CgEdgeKind, PtaCallGraph};
use crate::graph::icfg::Icfg;
use crate::graph::pag::Pag;
use crate::graph::NodeId;
use crate::ir::oracles::{ThreadApi, ThreadCallKind};
use crate::ir::statements::{CallTarget, IrAdapter, Statement};
use crate::ir::symbols::SymbolTable;
use crate::ir::{FuncId, InstrId, SymId};
use crate::util::options::AnalysisOptions;

pub struct BuiltProgram {
    pub pag: Pag,
    pub icfg: Icfg,
    pub call_graph: PtaCallGraph,
}

pub struct PagBuilder<'a> {
    adapter: &'a dyn IrAdapter,
    symbols: &'a dyn SymbolTable,
    thread_api: Option<&'a dyn ThreadApi>,

    pag: Pag,
    icfg: Icfg,
    call_graph: PtaCallGraph,
}

impl<'a> PagBuilder<'a> {
    pub fn new(
        adapter: &'a dyn IrAdapter,
        symbols: &'a dyn SymbolTable,
        thread_api: Option<&'a dyn ThreadApi>,
        options: AnalysisOptions,
    ) -> Self {
        PagBuilder {
            adapter,
            symbols,
            thread_api,
            pag: Pag::new(options),
            icfg: Icfg::new(),
            call_graph: PtaCallGraph::new(),
        }
    }

    pub fn build(mut self) -> BuiltProgram {
        self.pag.init_symbols(self.symbols);

        // Formal registries before any call wiring.
        for func in self.adapter.functions() {
            let params: Vec<NodeId> = self
                .adapter
                .function_params(func)
                .iter()
                .map(|sym| self.pag.node_of(*sym))
                .collect();
            self.pag.set_fun_args(func, params);
        }

        // Global initialisers hang off the module's global node.
        let global_node = self.icfg.global_node();
        for stmt in self.adapter.global_inits().to_vec() {
            self.process_plain_statement(&stmt, global_node, None);
        }

        if let Some(entry) = self.adapter.entry_function() {
            self.call_graph.get_or_add_node(entry);
        }
        for func in self.adapter.functions() {
            self.build_function(func);
        }

        BuiltProgram {
            pag: self.pag,
            icfg: self.icfg,
            call_graph: self.call_graph,
        }
    }

    fn build_function(&mut self, func: FuncId) {
        debug!("building pag for {}", self.adapter.function_name(func));
        let entry = self.icfg.get_or_add_fun_entry_node(func);
        let exit = self.icfg.get_or_add_fun_exit_node(func);

        let instrs: Vec<InstrId> = self.adapter.function_instrs(func).to_vec();
        for (pos, &instr) in instrs.iter().enumerate() {
            let stmt = self.adapter.statement(instr).clone();
            let node = match &stmt {
                Statement::Call { .. } => self.process_call(&stmt, instr, func),
                _ => {
                    let node = self.icfg.get_or_add_intra_node(instr, func);
                    self.process_plain_statement(&stmt, node, Some(func));
                    if matches!(stmt, Statement::Ret { .. }) {
                        self.icfg.add_intra_edge(node, exit);
                    }
                    node
                }
            };

            if pos == 0 {
                self.icfg.add_intra_edge(entry, node);
            }

            // Control continues from the Ret half of a callsite.
            let flow_src = match &stmt {
                Statement::Call { .. } => self.icfg.ret_node_of_call(node),
                _ => node,
            };
            for succ in self.adapter.instr_successors(instr).to_vec() {
                let succ_stmt = self.adapter.statement(succ.target).clone();
                let succ_node = match succ_stmt {
                    Statement::Call { .. } => self.icfg.get_or_add_call_node(succ.target, func),
                    _ => self.icfg.get_or_add_intra_node(succ.target, func),
                };
                match succ.cond {
                    Some((cond, branch_id)) => {
                        self.icfg
                            .add_conditional_intra_edge(flow_src, succ_node, cond, branch_id);
                    }
                    None => {
                        self.icfg.add_intra_edge(flow_src, succ_node);
                    }
                }
            }
        }
    }

    fn node_of(&self, sym: SymId) -> NodeId {
        self.pag.node_of(sym)
    }

    /// Everything but calls. `site` is the ICFG node the statement hangs off.
    fn process_plain_statement(&mut self, stmt: &Statement, site: NodeId, func: Option<FuncId>) {
        match stmt {
            Statement::Addr { src, dst } => {
                self.pag.add_addr_edge(self.node_of(*src), self.node_of(*dst));
            }
            Statement::Copy { src, dst } => {
                self.pag.add_copy_edge(self.node_of(*src), self.node_of(*dst));
            }
            Statement::Load { src, dst, field } => {
                let src_node = self.node_of(*src);
                let pointer = match field {
                    Some(ls) => {
                        let derived = self.pag.get_gep_val(src_node, *ls);
                        self.pag.add_gep_edge(src_node, derived, *ls, true);
                        derived
                    }
                    None => src_node,
                };
                let edge = self.pag.add_load_edge(pointer, self.node_of(*dst));
                self.pag.set_edge_site(edge, site);
            }
            Statement::Store { src, dst, field } => {
                let dst_node = self.node_of(*dst);
                let pointer = match field {
                    Some(ls) => {
                        let derived = self.pag.get_gep_val(dst_node, *ls);
                        self.pag.add_gep_edge(dst_node, derived, *ls, true);
                        derived
                    }
                    None => dst_node,
                };
                self.pag.add_store_edge(self.node_of(*src), pointer, site);
            }
            Statement::Gep {
                src,
                dst,
                ls,
                constant,
            } => {
                self.pag
                    .add_gep_edge(self.node_of(*src), self.node_of(*dst), *ls, *constant);
            }
            Statement::Phi { dst, ops } => {
                for op in ops {
                    self.pag.add_copy_edge(self.node_of(*op), self.node_of(*dst));
                }
            }
            Statement::Cmp { dst, ops } => {
                for op in ops {
                    self.pag.add_cmp_edge(self.node_of(*op), self.node_of(*dst));
                }
            }
            Statement::BinaryOp { dst, ops } => {
                for op in ops {
                    self.pag
                        .add_binary_op_edge(self.node_of(*op), self.node_of(*dst));
                }
            }
            Statement::UnaryOp { dst, op } => {
                self.pag
                    .add_unary_op_edge(self.node_of(*op), self.node_of(*dst));
            }
            Statement::Ret { val } => {
                if let (Some(val), Some(func)) = (val, func) {
                    if let Some(ret_node) = self.pag.fun_ret(func) {
                        self.pag.add_copy_edge(self.node_of(*val), ret_node);
                    }
                }
            }
            Statement::Branch | Statement::Nop => {}
            Statement::Call { .. } => unreachable!("calls are handled separately"),
        }
    }

    /// Returns the Call ICFG node of the callsite.
    fn process_call(&mut self, stmt: &Statement, instr: InstrId, func: FuncId) -> NodeId {
        let Statement::Call { target, args, dst } = stmt else {
            unreachable!()
        };
        let call_node = self.icfg.get_or_add_call_node(instr, func);
        let ret_node = self.icfg.get_or_add_ret_node(instr, func);
        self.icfg.add_intra_edge(call_node, ret_node);

        let arg_nodes: Vec<NodeId> = args.iter().map(|sym| self.node_of(*sym)).collect();
        let dst_node = dst.map(|sym| self.node_of(sym));
        self.pag.register_callsite(call_node, arg_nodes.clone(), dst_node);

        let thread_kind = self.thread_api.and_then(|api| api.call_kind(instr));
        match (target, thread_kind) {
            (CallTarget::Direct(callee), Some(ThreadCallKind::Fork)) => {
                self.call_graph
                    .add_direct_call(call_node, func, *callee, CgEdgeKind::ThreadFork);
                let params = self.pag.fun_args(*callee).cloned().unwrap_or_default();
                for (arg, param) in arg_nodes.iter().zip(params.iter()) {
                    self.pag.add_thread_fork_edge(*arg, *param, call_node);
                }
            }
            (CallTarget::Direct(callee), Some(ThreadCallKind::Join)) => {
                self.call_graph
                    .add_direct_call(call_node, func, *callee, CgEdgeKind::ThreadJoin);
                if let (Some(dst), Some(ret)) = (dst_node, self.pag.fun_ret(*callee)) {
                    self.pag.add_thread_join_edge(ret, dst, call_node);
                }
            }
            (CallTarget::Direct(callee), Some(ThreadCallKind::ParFor)) => {
                self.call_graph
                    .add_direct_call(call_node, func, *callee, CgEdgeKind::HareParFor);
                let params = self.pag.fun_args(*callee).cloned().unwrap_or_default();
                for (arg, param) in arg_nodes.iter().zip(params.iter()) {
                    self.pag.add_thread_fork_edge(*arg, *param, call_node);
                }
            }
            (CallTarget::Direct(callee), None) => {
                self.call_graph
                    .add_direct_call(call_node, func, *callee, CgEdgeKind::CallRet);
                self.pag.connect_call(call_node, *callee);
                let entry = self.icfg.get_or_add_fun_entry_node(*callee);
                let exit = self.icfg.get_or_add_fun_exit_node(*callee);
                self.icfg.add_call_cf_edge(call_node, entry, instr);
                self.icfg.add_ret_cf_edge(exit, ret_node, instr);
            }
            (CallTarget::FnPtr(fn_ptr), _) => {
                let fn_ptr_node = self.node_of(*fn_ptr);
                self.pag.register_indirect_callsite(call_node, fn_ptr_node);
                self.call_graph.note_unresolved_site(call_node);
            }
            (CallTarget::Virtual { vtable_ptr }, _) => {
                let vtable_node = self.node_of(*vtable_ptr);
                self.pag.register_indirect_callsite(call_node, vtable_node);
                self.pag.register_virtual_callsite(call_node, vtable_node);
                self.call_graph.note_unresolved_site(call_node);
            }
        }
        call_node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::pag::PagEdgeKind;
    use crate::ir::module::IrModule;
    use crate::ir::symbols::{ObjInfo, SymbolRegistry};

    /// fn main() { o: obj; p = &o; q = p; call f(q); r = f's return }
    /// fn f(a) { return a; }
    fn two_function_module() -> (IrModule, SymbolRegistry) {
        let mut symbols = SymbolRegistry::new();
        let main = FuncId(0);
        let f = FuncId(1);

        let o = symbols.add_object(ObjInfo::default());
        let p = symbols.add_value();
        let q = symbols.add_value();
        let r = symbols.add_value();
        let a = symbols.add_value();
        symbols.add_ret(f);

        let mut module = IrModule::new();
        module.add_function(main, "main", vec![]);
        module.add_function(f, "f", vec![a]);
        module.set_entry(main);

        module.add_instr(main, Statement::Addr { src: o, dst: p });
        module.add_instr(main, Statement::Copy { src: p, dst: q });
        module.add_instr(
            main,
            Statement::Call {
                target: CallTarget::Direct(f),
                args: vec![q],
                dst: Some(r),
            },
        );
        module.add_instr(main, Statement::Ret { val: None });
        module.add_instr(f, Statement::Ret { val: Some(a) });
        module.seal();
        (module, symbols)
    }

    #[test]
    fn direct_calls_are_wired_eagerly() {
        let (module, symbols) = two_function_module();
        let built = PagBuilder::new(&module, &symbols, None, AnalysisOptions::default()).build();

        assert_eq!(built.pag.edges_of_kind(PagEdgeKind::Addr).len(), 1);
        // q -> a parameter passing.
        assert_eq!(built.pag.edges_of_kind(PagEdgeKind::Call).len(), 1);
        // f's ret -> r.
        assert_eq!(built.pag.edges_of_kind(PagEdgeKind::Ret).len(), 1);
        assert_eq!(built.call_graph.total_call_sites(), 1);

        // The callsite produced paired Call/Ret nodes and CF edges into f.
        assert!(built.icfg.fun_entry_node(FuncId(1)).is_some());
        assert!(built.icfg.fun_exit_node(FuncId(1)).is_some());
    }

    #[test]
    fn fnptr_callsites_are_registered_not_wired() {
        let mut symbols = SymbolRegistry::new();
        let main = FuncId(0);
        let fp = symbols.add_value();
        let mut module = IrModule::new();
        module.add_function(main, "main", vec![]);
        module.set_entry(main);
        module.add_instr(
            main,
            Statement::Call {
                target: CallTarget::FnPtr(fp),
                args: vec![],
                dst: None,
            },
        );
        module.seal();

        let built = PagBuilder::new(&module, &symbols, None, AnalysisOptions::default()).build();
        assert_eq!(built.pag.indirect_callsites().len(), 1);
        assert_eq!(built.call_graph.unresolved_sites().len(), 1);
        assert_eq!(built.call_graph.total_call_sites(), 0);
    }
}
