// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The symbol-table interface between the frontend and the PAG.
//!
//! Symbols are dense: the first four are reserved for the black-hole object,
//! the constant object, the black-hole pointer and the null pointer, in that
//! order. The PAG materialises one node per symbol in ascending order, which
//! is what makes symbol ids and PAG node ids coincide.

use crate::ir::{FuncId, SymId};

pub const BLACK_HOLE_SYM: SymId = SymId(0);
pub const CONSTANT_SYM: SymId = SymId(1);
pub const BLK_PTR_SYM: SymId = SymId(2);
pub const NULL_PTR_SYM: SymId = SymId(3);

/// What a symbol denotes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymKind {
    /// A top-level value (SSA variable).
    Value,
    /// An address-taken abstract memory object.
    Object,
    /// The unique return value of a function.
    Ret(FuncId),
    /// The vararg bundle of a variadic function.
    VarArg(FuncId),
}

/// Static facts about an abstract memory object.
#[derive(Clone, Debug)]
pub struct ObjInfo {
    /// Bound on field expansion; field indices are taken modulo this.
    pub max_field_limit: u32,
    /// Created field-insensitive (e.g. arrays the frontend will not split).
    pub field_insensitive: bool,
    /// Constant memory; stores into it are ignored by some clients.
    pub constant: bool,
    /// Set when the object is a function, making it a callee candidate for
    /// function-pointer resolution.
    pub function: Option<FuncId>,
}

impl Default for ObjInfo {
    fn default() -> Self {
        ObjInfo {
            max_field_limit: 1,
            field_insensitive: false,
            constant: false,
            function: None,
        }
    }
}

/// The symbol table the frontend exposes to the analysis.
pub trait SymbolTable {
    fn total_syms(&self) -> u32;
    fn sym_kind(&self, sym: SymId) -> SymKind;
    /// Object facts for an object symbol. Panics on non-object symbols.
    fn obj_info(&self, sym: SymId) -> &ObjInfo;

    fn black_hole_sym(&self) -> SymId {
        BLACK_HOLE_SYM
    }
    fn constant_sym(&self) -> SymId {
        CONSTANT_SYM
    }
    fn blk_ptr_sym(&self) -> SymId {
        BLK_PTR_SYM
    }
    fn null_ptr_sym(&self) -> SymId {
        NULL_PTR_SYM
    }
}

/// A straightforward [`SymbolTable`] for embedders without a frontend of
/// their own: hand-written modules, external-PAG setups and tests.
pub struct SymbolRegistry {
    kinds: Vec<SymKind>,
    infos: Vec<Option<ObjInfo>>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        let mut registry = SymbolRegistry {
            kinds: Vec::new(),
            infos: Vec::new(),
        };
        // Reserved prefix: black hole, constant object, black-hole pointer,
        // null pointer.
        registry.push(
            SymKind::Object,
            Some(ObjInfo {
                field_insensitive: true,
                ..ObjInfo::default()
            }),
        );
        registry.push(
            SymKind::Object,
            Some(ObjInfo {
                field_insensitive: true,
                constant: true,
                ..ObjInfo::default()
            }),
        );
        registry.push(SymKind::Value, None);
        registry.push(SymKind::Value, None);
        registry
    }

    fn push(&mut self, kind: SymKind, info: Option<ObjInfo>) -> SymId {
        assert!(
            self.kinds.len() < u32::MAX as usize,
            "symbol id overflow"
        );
        let sym = SymId(self.kinds.len() as u32);
        self.kinds.push(kind);
        self.infos.push(info);
        sym
    }

    pub fn add_value(&mut self) -> SymId {
        self.push(SymKind::Value, None)
    }

    pub fn add_object(&mut self, info: ObjInfo) -> SymId {
        self.push(SymKind::Object, Some(info))
    }

    /// Registers a function: one object symbol standing for the function
    /// itself (the target of address-of), usable as a callee candidate.
    pub fn add_function_object(&mut self, func: FuncId) -> SymId {
        self.push(
            SymKind::Object,
            Some(ObjInfo {
                function: Some(func),
                ..ObjInfo::default()
            }),
        )
    }

    pub fn add_ret(&mut self, func: FuncId) -> SymId {
        self.push(SymKind::Ret(func), None)
    }

    pub fn add_vararg(&mut self, func: FuncId) -> SymId {
        self.push(SymKind::VarArg(func), None)
    }
}

impl Default for SymbolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable for SymbolRegistry {
    fn total_syms(&self) -> u32 {
        self.kinds.len() as u32
    }

    fn sym_kind(&self, sym: SymId) -> SymKind {
        self.kinds[sym.0 as usize]
    }

    fn obj_info(&self, sym: SymId) -> &ObjInfo {
        self.infos[sym.0 as usize]
            .as_ref()
            .expect("obj_info queried for a non-object symbol")
    }
}
