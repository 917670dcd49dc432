// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Frontend-facing types. The IR frontend itself is an external
//! collaborator; the analysis only sees dense handles and the statement feed
//! defined here.

pub mod location_set;
pub mod module;
pub mod oracles;
pub mod statements;
pub mod symbols;

use crate::pts_set::bit_set::Idx;

/// Symbol identifier issued by the external symbol table. PAG node indices
/// coincide with these for all symbol-backed nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymId(pub u32);

/// Function handle issued by the frontend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuncId(pub u32);

/// Instruction handle issued by the frontend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstrId(pub u32);

/// Dense identifier for a (callsite, callee) pair, 1-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallSiteId(pub u32);

/// Memory region handle issued by the memory-SSA oracle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemRegionId(pub u32);

/// SSA version of a memory region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MssaVersion(pub u32);

macro_rules! impl_idx {
    ($($ty:ident),*) => {
        $(
            impl Idx for $ty {
                #[inline]
                fn new(idx: usize) -> Self {
                    assert!(idx < u32::MAX as usize, "id overflow");
                    $ty(idx as u32)
                }
                #[inline]
                fn index(self) -> usize {
                    self.0 as usize
                }
            }
        )*
    };
}

impl_idx!(SymId, FuncId, InstrId, CallSiteId, MemRegionId);
