// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Optional oracles the analysis consults when they are installed: thread
//! API recognition, C++-style virtual-call resolution, memory SSA for the
//! sparse value-flow graph, and may-happen-in-parallel facts.

use crate::ir::{FuncId, InstrId, MemRegionId, MssaVersion};
use crate::pts_set::points_to::HybridNodeSet;

/// Thread-library knowledge: classifies callsites that spawn or join.
pub trait ThreadApi {
    fn call_kind(&self, instr: InstrId) -> Option<ThreadCallKind>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadCallKind {
    Fork,
    Join,
    ParFor,
}

/// Maps a virtual callsite and the points-to set of its vtable pointer to
/// concrete callees.
pub trait ClassHierarchyResolver {
    fn resolve(
        &self,
        callsite: InstrId,
        vtable_pts: &HybridNodeSet<crate::graph::NodeId>,
    ) -> Vec<FuncId>;
}

/// Memory-SSA facts for one function, as produced by an external oracle.
/// Versions are per-region SSA numbers; a def of `(region, v)` reaches every
/// use of `(region, v)` within the same function.
#[derive(Clone, Debug, Default)]
pub struct MemSsaSummary {
    /// Regions live on entry: version defined by the formal-in.
    pub entry_chis: Vec<(MemRegionId, MssaVersion)>,
    /// Regions escaping through return: version used by the formal-out.
    pub ret_mus: Vec<(MemRegionId, MssaVersion)>,
    /// Region phis: defined version and operand versions.
    pub phis: Vec<MssaPhi>,
    /// Loads: the region version each load instruction consumes.
    pub load_mus: Vec<(InstrId, MemRegionId, MssaVersion)>,
    /// Stores: the region version each store instruction defines.
    pub store_chis: Vec<(InstrId, MemRegionId, MssaVersion)>,
    /// Callsites: region versions flowing into a call...
    pub call_mus: Vec<(InstrId, MemRegionId, MssaVersion)>,
    /// ...and region versions defined by its returns.
    pub call_chis: Vec<(InstrId, MemRegionId, MssaVersion)>,
}

#[derive(Clone, Debug)]
pub struct MssaPhi {
    pub region: MemRegionId,
    pub def: MssaVersion,
    pub ops: Vec<MssaVersion>,
}

pub trait MemSsa {
    fn function_summary(&self, func: FuncId) -> Option<&MemSsaSummary>;
    /// The abstract objects a region stands for; becomes the `PointsTo`
    /// label of every indirect value-flow edge carrying that region.
    fn region_pts(&self, region: MemRegionId) -> &HybridNodeSet<crate::graph::NodeId>;
}

/// Pairs of memory-access instructions that may execute in parallel.
pub trait ConcurrencyOracle {
    fn mhp_pairs(&self) -> Vec<(InstrId, InstrId)>;
}
