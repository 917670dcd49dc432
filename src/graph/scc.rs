// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Strongly-connected-component detection over any directed graph view.
//!
//! This is the Nuutila/Soisalon-Soininen refinement of Tarjan's algorithm:
//! one timestamp per node, a pending stack for in-progress components, and a
//! representative chosen as the member with the smallest timestamp. The DFS
//! is iterative; constraint graphs routinely contain copy chains deep enough
//! to overflow the call stack.
//!
//! The caller chooses which edges count as "direct" by passing an
//! [`EdgeProjection`] to `find` — there is no global mode switch.

use std::collections::{HashMap, HashSet};

use crate::graph::{NodeId, NodeSet};
use crate::pts_set::points_to::PointsToSet;

/// Which out-edges the detection walks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeProjection {
    /// Every direct (value-flow) edge.
    AllDirect,
    /// Copy edges only.
    CopyOnly,
}

/// The minimal graph surface the detector needs.
pub trait DirectedGraphView {
    /// Live node ids, in ascending order.
    fn view_nodes(&self) -> Vec<NodeId>;
    /// Successor node ids under the given projection.
    fn direct_successors(&self, node: NodeId, projection: EdgeProjection) -> Vec<NodeId>;
}

#[derive(Default)]
struct NodeSccInfo {
    visited: bool,
    in_scc: bool,
    rep: Option<NodeId>,
    sub_nodes: NodeSet,
}

pub struct SccDetector {
    info: HashMap<NodeId, NodeSccInfo>,
    /// Timestamp of the first visit of each node.
    visit_time: HashMap<NodeId, u32>,
    counter: u32,
    /// Nodes whose component root has not been popped yet.
    pending: Vec<NodeId>,
    /// Representatives in completion order; popping yields topological order
    /// of the component DAG.
    topo: Vec<NodeId>,
    rep_nodes: NodeSet,
    self_loops: HashSet<NodeId>,
}

impl SccDetector {
    pub fn new() -> Self {
        SccDetector {
            info: HashMap::new(),
            visit_time: HashMap::new(),
            counter: 0,
            pending: Vec::new(),
            topo: Vec::new(),
            rep_nodes: NodeSet::new(),
            self_loops: HashSet::new(),
        }
    }

    /// Auxiliary state is never live across runs.
    fn clear(&mut self) {
        self.info.clear();
        self.visit_time.clear();
        self.counter = 0;
        self.pending.clear();
        self.topo.clear();
        self.rep_nodes = NodeSet::new();
        self.self_loops.clear();
    }

    /// Detects components over every node of the view.
    pub fn find(&mut self, view: &impl DirectedGraphView, projection: EdgeProjection) {
        self.clear();
        for node in view.view_nodes() {
            if !self.visited(node) {
                self.visit(view, projection, node);
            }
        }
    }

    /// Detects components reachable from an explicit candidate set; used for
    /// incremental re-detection after new edges appear.
    pub fn find_from(
        &mut self,
        view: &impl DirectedGraphView,
        projection: EdgeProjection,
        candidates: &[NodeId],
    ) {
        self.clear();
        for &node in candidates {
            if !self.visited(node) {
                self.visit(view, projection, node);
            }
        }
    }

    /// The representative of `n`'s component; `n` itself if it was never
    /// visited.
    pub fn rep(&self, node: NodeId) -> NodeId {
        match self.info.get(&node).and_then(|i| i.rep) {
            Some(rep) => rep,
            None => node,
        }
    }

    /// Members of the component represented by `node`.
    pub fn sub_nodes(&self, node: NodeId) -> &NodeSet {
        &self
            .info
            .get(&node)
            .unwrap_or_else(|| panic!("scc rep not found: {:?}", node))
            .sub_nodes
    }

    pub fn rep_nodes(&self) -> &NodeSet {
        &self.rep_nodes
    }

    /// Pops the next representative in topological order.
    pub fn pop_topo(&mut self) -> Option<NodeId> {
        self.topo.pop()
    }

    /// Representatives in completion (reverse-topological) order, bottom of
    /// the stack first.
    pub fn topo_stack(&self) -> &[NodeId] {
        &self.topo
    }

    /// A node is in a cycle iff its component has more than one member or
    /// its representative carries a self-loop.
    pub fn is_in_cycle(&self, node: NodeId) -> bool {
        let rep = self.rep(node);
        match self.info.get(&rep) {
            Some(info) => info.sub_nodes.count() > 1 || self.self_loops.contains(&rep),
            None => false,
        }
    }

    fn visited(&self, node: NodeId) -> bool {
        self.info.get(&node).map_or(false, |i| i.visited)
    }

    fn in_scc(&self, node: NodeId) -> bool {
        self.info.get(&node).map_or(false, |i| i.in_scc)
    }

    fn set_rep(&mut self, node: NodeId, rep: NodeId) {
        self.info.entry(node).or_default().rep = Some(rep);
        self.info
            .entry(rep)
            .or_default()
            .sub_nodes
            .insert(node);
        if node != rep {
            self.info.get_mut(&node).unwrap().sub_nodes = NodeSet::new();
        }
    }

    fn pre_visit(&mut self, node: NodeId) {
        self.counter += 1;
        self.visit_time.insert(node, self.counter);
        self.set_rep(node, node);
        self.info.get_mut(&node).unwrap().visited = true;
    }

    /// Re-root `node` at whichever current representative was visited first.
    fn update_rep(&mut self, node: NodeId, via: NodeId) {
        let rep_n = self.rep(node);
        let rep_v = self.rep(via);
        let rep = if self.visit_time[&rep_n] < self.visit_time[&rep_v] {
            rep_n
        } else {
            rep_v
        };
        self.set_rep(node, rep);
    }

    fn post_visit(&mut self, node: NodeId) {
        if self.rep(node) == node {
            // `node` roots a component: adopt every pending node that was
            // visited after it.
            self.info.get_mut(&node).unwrap().in_scc = true;
            let time = self.visit_time[&node];
            while let Some(&top) = self.pending.last() {
                if self.visit_time[&top] <= time {
                    break;
                }
                self.pending.pop();
                self.info.get_mut(&top).unwrap().in_scc = true;
                self.set_rep(top, node);
            }
            self.topo.push(node);
            self.rep_nodes.insert(node);
        } else {
            self.pending.push(node);
        }
    }

    fn visit(&mut self, view: &impl DirectedGraphView, projection: EdgeProjection, root: NodeId) {
        struct Frame {
            node: NodeId,
            succs: Vec<NodeId>,
            next: usize,
        }

        self.pre_visit(root);
        let mut stack = vec![Frame {
            node: root,
            succs: view.direct_successors(root, projection),
            next: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            let node = frame.node;
            if frame.next < frame.succs.len() {
                let succ = frame.succs[frame.next];
                frame.next += 1;
                if succ == node {
                    self.self_loops.insert(node);
                }
                if !self.visited(succ) {
                    self.pre_visit(succ);
                    stack.push(Frame {
                        node: succ,
                        succs: view.direct_successors(succ, projection),
                        next: 0,
                    });
                } else if !self.in_scc(succ) {
                    self.update_rep(node, succ);
                }
            } else {
                stack.pop();
                self.post_visit(node);
                if let Some(parent) = stack.last() {
                    let parent_node = parent.node;
                    if !self.in_scc(node) {
                        self.update_rep(parent_node, node);
                    }
                }
            }
        }
    }
}

impl Default for SccDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestGraph {
        nodes: Vec<NodeId>,
        edges: Vec<(NodeId, NodeId)>,
    }

    impl TestGraph {
        fn new(nodes: &[usize], edges: &[(usize, usize)]) -> Self {
            TestGraph {
                nodes: nodes.iter().map(|&n| NodeId::new(n)).collect(),
                edges: edges
                    .iter()
                    .map(|&(a, b)| (NodeId::new(a), NodeId::new(b)))
                    .collect(),
            }
        }
    }

    impl DirectedGraphView for TestGraph {
        fn view_nodes(&self) -> Vec<NodeId> {
            self.nodes.clone()
        }

        fn direct_successors(&self, node: NodeId, _: EdgeProjection) -> Vec<NodeId> {
            self.edges
                .iter()
                .filter(|(src, _)| *src == node)
                .map(|(_, dst)| *dst)
                .collect()
        }
    }

    fn node(n: usize) -> NodeId {
        NodeId::new(n)
    }

    #[test]
    fn single_self_loop() {
        let graph = TestGraph::new(&[1], &[(1, 1)]);
        let mut scc = SccDetector::new();
        scc.find(&graph, EdgeProjection::AllDirect);

        assert_eq!(scc.rep_nodes().iter().collect::<Vec<_>>(), vec![node(1)]);
        assert_eq!(scc.sub_nodes(node(1)).iter().collect::<Vec<_>>(), vec![node(1)]);
        assert!(scc.is_in_cycle(node(1)));
    }

    #[test]
    fn chain_has_no_cycles() {
        let graph = TestGraph::new(&[1, 2, 3], &[(1, 2), (2, 3)]);
        let mut scc = SccDetector::new();
        scc.find(&graph, EdgeProjection::AllDirect);

        // Each node roots its own component; popping walks the chain in
        // topological order.
        assert_eq!(scc.rep_nodes().count(), 3);
        let mut pops = Vec::new();
        while let Some(rep) = scc.pop_topo() {
            pops.push(rep);
        }
        assert_eq!(pops, vec![node(1), node(2), node(3)]);
        for n in [1, 2, 3] {
            assert!(!scc.is_in_cycle(node(n)));
        }
    }

    #[test]
    fn cycle_with_tail() {
        let graph = TestGraph::new(&[1, 2, 3, 4, 5], &[(1, 2), (2, 3), (3, 4), (3, 5), (4, 2)]);
        let mut scc = SccDetector::new();
        scc.find(&graph, EdgeProjection::AllDirect);

        // {2,3,4} collapse; 1 and 5 are trivial.
        assert_eq!(scc.rep(node(3)), node(2));
        assert_eq!(scc.rep(node(4)), node(2));
        assert_eq!(
            scc.sub_nodes(node(2)).iter().collect::<Vec<_>>(),
            vec![node(2), node(3), node(4)]
        );
        assert!(scc.is_in_cycle(node(3)));
        assert!(!scc.is_in_cycle(node(1)));
        assert!(!scc.is_in_cycle(node(5)));

        let mut pops = Vec::new();
        while let Some(rep) = scc.pop_topo() {
            pops.push(rep);
        }
        assert_eq!(pops, vec![node(1), node(2), node(5)]);
    }

    #[test]
    fn rep_is_idempotent_and_membership_holds() {
        let graph = TestGraph::new(
            &[1, 2, 3, 4, 5, 6],
            &[(1, 2), (2, 1), (2, 3), (3, 4), (4, 5), (5, 3), (5, 6)],
        );
        let mut scc = SccDetector::new();
        scc.find(&graph, EdgeProjection::AllDirect);

        for n in 1..=6 {
            let rep = scc.rep(node(n));
            assert_eq!(scc.rep(rep), rep);
            assert!(scc.sub_nodes(rep).contains(node(n)));
        }
        assert_eq!(scc.rep(node(2)), scc.rep(node(1)));
        assert_eq!(scc.rep(node(4)), scc.rep(node(3)));
        assert_ne!(scc.rep(node(1)), scc.rep(node(3)));
    }

    #[test]
    fn candidate_restart_only_visits_reachable() {
        let graph = TestGraph::new(&[1, 2, 3, 4], &[(1, 2), (3, 4), (4, 3)]);
        let mut scc = SccDetector::new();
        scc.find_from(&graph, EdgeProjection::AllDirect, &[node(3)]);

        assert!(scc.is_in_cycle(node(3)));
        // Node 1 was not a candidate and not reachable from one.
        assert_eq!(scc.rep(node(1)), node(1));
        assert_eq!(scc.rep_nodes().count(), 1);
    }
}
