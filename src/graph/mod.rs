// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

pub mod call_graph;
pub mod constraint_graph;
pub mod external_pag;
pub mod generic;
pub mod icfg;
pub mod pag;
pub mod scc;
pub mod svfg;
pub mod vfg;

use petgraph::graph::{EdgeIndex, NodeIndex};

use crate::pts_set::bit_set::Idx;
use crate::pts_set::points_to::HybridNodeSet;

/// Unique identifier for graph nodes. Each graph allocates its own dense
/// space; `NodeId::end()` is the reserved "absent" sentinel.
pub type NodeId = NodeIndex<u32>;
/// Unique identifier for graph edges.
pub type EdgeId = EdgeIndex<u32>;

/// A compact set of node ids with ascending iteration.
pub type NodeSet = HybridNodeSet<NodeId>;

impl Idx for NodeId {
    #[inline]
    fn new(idx: usize) -> Self {
        NodeIndex::new(idx)
    }

    #[inline]
    fn index(self) -> usize {
        self.index()
    }
}
