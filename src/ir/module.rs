// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! An in-memory IR module: the reference [`IrAdapter`] implementation for
//! hand-written translation units and test programs.

use std::collections::HashMap;

use crate::ir::statements::{CfSuccessor, IrAdapter, Statement};
use crate::ir::{FuncId, InstrId, SymId};

#[derive(Clone, Debug)]
pub struct IrInstr {
    pub id: InstrId,
    pub stmt: Statement,
    pub succs: Vec<CfSuccessor>,
}

#[derive(Clone, Debug)]
pub struct IrFunction {
    pub id: FuncId,
    pub name: String,
    pub params: Vec<SymId>,
    pub instrs: Vec<IrInstr>,
}

#[derive(Default)]
pub struct IrModule {
    functions: Vec<IrFunction>,
    globals: Vec<Statement>,
    entry: Option<FuncId>,
    func_index: HashMap<FuncId, usize>,
    instr_index: HashMap<InstrId, (usize, usize)>,
    instr_lists: HashMap<FuncId, Vec<InstrId>>,
    next_instr: u32,
}

impl IrModule {
    pub fn new() -> Self {
        IrModule::default()
    }

    pub fn set_entry(&mut self, func: FuncId) {
        self.entry = Some(func);
    }

    pub fn add_global_init(&mut self, stmt: Statement) {
        self.globals.push(stmt);
    }

    pub fn add_function(&mut self, id: FuncId, name: &str, params: Vec<SymId>) {
        assert!(
            !self.func_index.contains_key(&id),
            "function registered twice: {:?}",
            id
        );
        self.func_index.insert(id, self.functions.len());
        self.instr_lists.insert(id, Vec::new());
        self.functions.push(IrFunction {
            id,
            name: name.to_string(),
            params,
            instrs: Vec::new(),
        });
    }

    /// Appends an instruction to `func` and returns its handle. Successors
    /// are wired separately with [`IrModule::add_successor`]; instructions
    /// without explicit successors fall through to the next one in layout
    /// order when the module is sealed.
    pub fn add_instr(&mut self, func: FuncId, stmt: Statement) -> InstrId {
        let id = InstrId(self.next_instr);
        self.next_instr += 1;
        let fpos = self.func_index[&func];
        let ipos = self.functions[fpos].instrs.len();
        self.functions[fpos].instrs.push(IrInstr {
            id,
            stmt,
            succs: Vec::new(),
        });
        self.instr_index.insert(id, (fpos, ipos));
        self.instr_lists.get_mut(&func).unwrap().push(id);
        id
    }

    pub fn add_successor(&mut self, instr: InstrId, succ: CfSuccessor) {
        let (fpos, ipos) = self.instr_index[&instr];
        self.functions[fpos].instrs[ipos].succs.push(succ);
    }

    /// Fills in fall-through successors for instructions that have none and
    /// are not returns.
    pub fn seal(&mut self) {
        for function in &mut self.functions {
            for ipos in 0..function.instrs.len() {
                let is_last = ipos + 1 == function.instrs.len();
                let instr = &function.instrs[ipos];
                if instr.succs.is_empty()
                    && !is_last
                    && !matches!(instr.stmt, Statement::Ret { .. })
                {
                    let next = function.instrs[ipos + 1].id;
                    function.instrs[ipos].succs.push(CfSuccessor::plain(next));
                }
            }
        }
    }
}

impl IrAdapter for IrModule {
    fn functions(&self) -> Vec<FuncId> {
        self.functions.iter().map(|f| f.id).collect()
    }

    fn entry_function(&self) -> Option<FuncId> {
        self.entry
    }

    fn function_name(&self, func: FuncId) -> &str {
        &self.functions[self.func_index[&func]].name
    }

    fn function_params(&self, func: FuncId) -> &[SymId] {
        &self.functions[self.func_index[&func]].params
    }

    fn function_instrs(&self, func: FuncId) -> &[InstrId] {
        &self.instr_lists[&func]
    }

    fn instr_func(&self, instr: InstrId) -> FuncId {
        let (fpos, _) = self.instr_index[&instr];
        self.functions[fpos].id
    }

    fn statement(&self, instr: InstrId) -> &Statement {
        let (fpos, ipos) = self.instr_index[&instr];
        &self.functions[fpos].instrs[ipos].stmt
    }

    fn instr_successors(&self, instr: InstrId) -> &[CfSuccessor] {
        let (fpos, ipos) = self.instr_index[&instr];
        &self.functions[fpos].instrs[ipos].succs
    }

    fn global_inits(&self) -> &[Statement] {
        &self.globals
    }
}
