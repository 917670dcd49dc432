// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The per-instruction statement feed the frontend hands to the builder.

use crate::ir::location_set::LocationSet;
use crate::ir::{FuncId, InstrId, SymId};

/// How a callsite names its target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallTarget {
    /// Statically resolved callee.
    Direct(FuncId),
    /// Call through a function pointer; resolved from `pts` of the pointer.
    FnPtr(SymId),
    /// Virtual dispatch; resolved from `pts` of the vtable pointer, by the
    /// class-hierarchy resolver when one is installed.
    Virtual { vtable_ptr: SymId },
}

/// One IR instruction, reduced to its pointer-relevant effect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Statement {
    /// `dst = &src`
    Addr { src: SymId, dst: SymId },
    /// `dst = src`
    Copy { src: SymId, dst: SymId },
    /// `dst = *src`, optionally through a field projection.
    Load {
        src: SymId,
        dst: SymId,
        field: Option<LocationSet>,
    },
    /// `*dst = src`, optionally through a field projection.
    Store {
        src: SymId,
        dst: SymId,
        field: Option<LocationSet>,
    },
    /// `dst = &src[ls]`; `constant` is false when the offset is not a
    /// compile-time constant.
    Gep {
        src: SymId,
        dst: SymId,
        ls: LocationSet,
        constant: bool,
    },
    /// `dst = phi(ops…)`
    Phi { dst: SymId, ops: Vec<SymId> },
    /// `dst = cmp(ops…)`
    Cmp { dst: SymId, ops: Vec<SymId> },
    /// `dst = binop(ops…)`
    BinaryOp { dst: SymId, ops: Vec<SymId> },
    /// `dst = unop(op)`
    UnaryOp { dst: SymId, op: SymId },
    /// A call; argument and destination symbols are the caller-side values.
    Call {
        target: CallTarget,
        args: Vec<SymId>,
        dst: Option<SymId>,
    },
    /// Function return.
    Ret { val: Option<SymId> },
    /// Pure control flow (branches, switches); shape comes from
    /// [`IrAdapter::instr_successors`].
    Branch,
    /// No pointer-relevant effect.
    Nop,
}

/// An intra-procedural control-flow successor, optionally guarded by the
/// branch condition value and the taken-branch index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CfSuccessor {
    pub target: InstrId,
    pub cond: Option<(SymId, u32)>,
}

impl CfSuccessor {
    pub fn plain(target: InstrId) -> Self {
        CfSuccessor { target, cond: None }
    }

    pub fn branch(target: InstrId, cond: SymId, branch_id: u32) -> Self {
        CfSuccessor {
            target,
            cond: Some((cond, branch_id)),
        }
    }
}

/// The instruction-level view of the translation unit.
pub trait IrAdapter {
    fn functions(&self) -> Vec<FuncId>;
    fn entry_function(&self) -> Option<FuncId>;
    fn function_name(&self, func: FuncId) -> &str;
    /// Formal parameter symbols, in declaration order.
    fn function_params(&self, func: FuncId) -> &[SymId];
    /// Instructions in layout order; the first one is the function entry.
    fn function_instrs(&self, func: FuncId) -> &[InstrId];
    fn instr_func(&self, instr: InstrId) -> FuncId;
    fn statement(&self, instr: InstrId) -> &Statement;
    fn instr_successors(&self, instr: InstrId) -> &[CfSuccessor];
    /// Module-level initialiser statements, attached to the global ICFG node.
    fn global_inits(&self) -> &[Statement] {
        &[]
    }
}
