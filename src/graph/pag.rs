// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The program assignment graph: abstract values and objects as nodes,
//! assignment-like statements as edges.
//!
//! Nodes are created in ascending symbol order, so a symbol's id and its
//! node id coincide. Nodes invented during solving (field objects, dummies
//! for external summaries) take the next free index.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::debug;

use crate::graph::generic::{make_edge_flag, EdgeFlag, GenericGraph, GraphEdge};
use crate::graph::{EdgeId, NodeId, NodeSet};
use crate::ir::location_set::LocationSet;
use crate::ir::symbols::{SymKind, SymbolTable};
use crate::ir::{FuncId, SymId};
use crate::pts_set::bit_set::Idx;
use crate::pts_set::points_to::PointsToSet;
use crate::util::chunked_queue::{ChunkedQueue, Cursor};
use crate::util::options::AnalysisOptions;

/// Statement kinds carried by PAG edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PagEdgeKind {
    Addr,
    Copy,
    Load,
    Store,
    NormalGep,
    VariantGep,
    Call,
    Ret,
    ThreadFork,
    ThreadJoin,
    Cmp,
    BinaryOp,
    UnaryOp,
}

impl PagEdgeKind {
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Debug)]
pub struct PagEdge {
    pub src: NodeId,
    pub dst: NodeId,
    pub kind: PagEdgeKind,
    /// The ICFG node of the originating instruction, for callsite- and
    /// store-labelled edges.
    pub label: Option<NodeId>,
    /// Field projection of a NormalGep edge.
    pub ls: Option<LocationSet>,
}

impl GraphEdge for PagEdge {
    fn flag(&self) -> EdgeFlag {
        let label = self.label.map_or(0, |n| n.index() as u64 + 1);
        make_edge_flag(self.kind.code(), label)
    }
}

/// The closed variant set of PAG nodes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PagNodeKind {
    Value,
    GepValue { base: NodeId, ls: LocationSet },
    Object,
    GepObject { base: NodeId, ls: LocationSet },
    FiObject,
    DummyValue,
    DummyObject,
    Return(FuncId),
    VarArg(FuncId),
    CloneValue,
    CloneObject { base: NodeId },
    CloneGepObject { base: NodeId, ls: LocationSet },
}

#[derive(Clone, Debug)]
pub struct PagNode {
    pub kind: PagNodeKind,
    value: Option<SymId>,
}

impl PagNode {
    fn new(kind: PagNodeKind, value: Option<SymId>) -> Self {
        PagNode { kind, value }
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    /// The IR value backing this node. Dummy nodes have none; asking is a
    /// caller bug.
    pub fn value(&self) -> SymId {
        self.value
            .unwrap_or_else(|| panic!("dummy node has no value: {:?}", self.kind))
    }

    pub fn is_object(&self) -> bool {
        matches!(
            self.kind,
            PagNodeKind::Object
                | PagNodeKind::GepObject { .. }
                | PagNodeKind::FiObject
                | PagNodeKind::DummyObject
                | PagNodeKind::CloneObject { .. }
                | PagNodeKind::CloneGepObject { .. }
        )
    }

    pub fn is_top_level_ptr(&self) -> bool {
        !self.is_object()
    }

    pub fn is_address_taken_ptr(&self) -> bool {
        self.is_object()
    }
}

/// Mutable facts about an abstract memory object, copied in from the symbol
/// table and updated as the analysis collapses fields.
#[derive(Clone, Debug)]
pub struct MemObj {
    pub sym: Option<SymId>,
    pub max_field_limit: u32,
    pub field_insensitive: bool,
    pub constant: bool,
    pub function: Option<FuncId>,
}

type EdgeBuckets = HashMap<NodeId, BTreeMap<PagEdgeKind, BTreeSet<EdgeId>>>;

/// Argument and return nodes recorded for an imported external function
/// summary, keyed by function name.
#[derive(Clone, Debug, Default)]
pub struct ExternalCallSummary {
    pub args: BTreeMap<u32, NodeId>,
    pub ret: Option<NodeId>,
}

pub struct Pag {
    graph: GenericGraph<PagNode, PagEdge>,
    options: AnalysisOptions,

    /// Global per-kind edge registries, iterated when deriving graphs.
    kind_to_edges: BTreeMap<PagEdgeKind, BTreeSet<EdgeId>>,
    in_edges: EdgeBuckets,
    out_edges: EdgeBuckets,

    /// Base object node -> object facts.
    objects: HashMap<NodeId, MemObj>,
    /// Any object node -> its base object node.
    obj_base: HashMap<NodeId, NodeId>,
    /// `(base, bounded ls)` -> field object node.
    gep_obj_map: HashMap<(NodeId, LocationSet), NodeId>,
    /// `(base, ls)` -> derived value node.
    gep_val_map: HashMap<(NodeId, LocationSet), NodeId>,
    /// Base object node -> all of its field nodes (the base included).
    mem_to_fields: HashMap<NodeId, NodeSet>,

    black_hole: NodeId,
    constant_obj: NodeId,
    blk_ptr: NodeId,
    null_ptr: NodeId,

    /// Per-function formal nodes.
    fun_args: HashMap<FuncId, Vec<NodeId>>,
    fun_ret: HashMap<FuncId, NodeId>,
    fun_vararg: HashMap<FuncId, NodeId>,
    /// Formal parameter node -> owning function.
    param_func: HashMap<NodeId, FuncId>,
    /// Statement edge -> ICFG node of its instruction, for edges whose kind
    /// carries no label of its own (loads).
    edge_sites: HashMap<EdgeId, NodeId>,
    /// Per-callsite actual nodes, keyed by the call ICFG node.
    callsite_args: HashMap<NodeId, Vec<NodeId>>,
    callsite_ret: HashMap<NodeId, NodeId>,

    /// Call ICFG node -> function-pointer node, for on-the-fly resolution.
    indirect_callsites: BTreeMap<NodeId, NodeId>,
    /// Call ICFG node -> vtable-pointer node, resolved through the class
    /// hierarchy when a resolver is installed.
    virtual_callsites: BTreeMap<NodeId, NodeId>,

    /// Imported hand-written summaries, keyed by function name.
    external_summaries: HashMap<String, ExternalCallSummary>,

    /// Addr edges in discovery order; the solver drains this through a
    /// cursor and picks up edges added while it runs.
    addr_edge_queue: ChunkedQueue<EdgeId>,
}

impl Pag {
    pub fn new(options: AnalysisOptions) -> Self {
        Pag {
            graph: GenericGraph::new(),
            options,
            kind_to_edges: BTreeMap::new(),
            in_edges: HashMap::new(),
            out_edges: HashMap::new(),
            objects: HashMap::new(),
            obj_base: HashMap::new(),
            gep_obj_map: HashMap::new(),
            gep_val_map: HashMap::new(),
            mem_to_fields: HashMap::new(),
            black_hole: NodeId::end(),
            constant_obj: NodeId::end(),
            blk_ptr: NodeId::end(),
            null_ptr: NodeId::end(),
            fun_args: HashMap::new(),
            fun_ret: HashMap::new(),
            fun_vararg: HashMap::new(),
            param_func: HashMap::new(),
            edge_sites: HashMap::new(),
            callsite_args: HashMap::new(),
            callsite_ret: HashMap::new(),
            indirect_callsites: BTreeMap::new(),
            virtual_callsites: BTreeMap::new(),
            external_summaries: HashMap::new(),
            addr_edge_queue: ChunkedQueue::new(),
        }
    }

    /// Materialises one node per symbol, in ascending symbol order. Node
    /// index equality with symbol ids holds by construction and is asserted.
    pub fn init_symbols(&mut self, symbols: &dyn SymbolTable) {
        assert_eq!(self.graph.node_count(), 0, "symbols initialised twice");
        for raw in 0..symbols.total_syms() {
            let sym = SymId(raw);
            let node = match symbols.sym_kind(sym) {
                SymKind::Value => {
                    if sym == symbols.blk_ptr_sym() || sym == symbols.null_ptr_sym() {
                        PagNode::new(PagNodeKind::DummyValue, None)
                    } else {
                        PagNode::new(PagNodeKind::Value, Some(sym))
                    }
                }
                SymKind::Object => {
                    let info = symbols.obj_info(sym);
                    let special =
                        sym == symbols.black_hole_sym() || sym == symbols.constant_sym();
                    let kind = if special {
                        PagNodeKind::DummyObject
                    } else if info.field_insensitive {
                        PagNodeKind::FiObject
                    } else {
                        PagNodeKind::Object
                    };
                    let value = if special { None } else { Some(sym) };
                    PagNode::new(kind, value)
                }
                SymKind::Ret(func) => PagNode::new(PagNodeKind::Return(func), Some(sym)),
                SymKind::VarArg(func) => PagNode::new(PagNodeKind::VarArg(func), Some(sym)),
            };
            let is_object = node.is_object();
            let id = self.graph.add_node(node);
            assert_eq!(id.index(), sym.index(), "symbol/node id drift");

            if is_object {
                let info = symbols.obj_info(sym);
                self.register_object(
                    id,
                    MemObj {
                        sym: Some(sym),
                        max_field_limit: info.max_field_limit.min(self.options.max_field_limit),
                        field_insensitive: info.field_insensitive,
                        constant: info.constant,
                        function: info.function,
                    },
                );
            }
            match symbols.sym_kind(sym) {
                SymKind::Ret(func) => {
                    self.fun_ret.insert(func, id);
                }
                SymKind::VarArg(func) => {
                    self.fun_vararg.insert(func, id);
                }
                _ => {}
            }
        }
        self.black_hole = self.node_of(symbols.black_hole_sym());
        self.constant_obj = self.node_of(symbols.constant_sym());
        self.blk_ptr = self.node_of(symbols.blk_ptr_sym());
        self.null_ptr = self.node_of(symbols.null_ptr_sym());
    }

    fn register_object(&mut self, id: NodeId, obj: MemObj) {
        self.objects.insert(id, obj);
        self.obj_base.insert(id, id);
        self.mem_to_fields.entry(id).or_default().insert(id);
    }

    /// The node backing a symbol; ids coincide.
    #[inline]
    pub fn node_of(&self, sym: SymId) -> NodeId {
        let id = NodeId::new(sym.index());
        assert!(self.graph.contains_node(id), "missing node for {:?}", sym);
        id
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &PagNode {
        self.graph.node(id)
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[inline]
    pub fn edge(&self, id: EdgeId) -> &PagEdge {
        self.graph.edge(id)
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.graph.node_ids()
    }

    #[inline]
    pub fn black_hole(&self) -> NodeId {
        self.black_hole
    }

    #[inline]
    pub fn constant_obj(&self) -> NodeId {
        self.constant_obj
    }

    #[inline]
    pub fn null_ptr(&self) -> NodeId {
        self.null_ptr
    }

    #[inline]
    pub fn blk_ptr(&self) -> NodeId {
        self.blk_ptr
    }

    pub fn is_black_hole(&self, node: NodeId) -> bool {
        node == self.black_hole
    }

    /// Edges of one kind in deterministic `(flag, src, dst)`-registration
    /// order.
    pub fn edges_of_kind(&self, kind: PagEdgeKind) -> Vec<EdgeId> {
        self.kind_to_edges
            .get(&kind)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn out_edges_of(&self, node: NodeId, kind: PagEdgeKind) -> Vec<EdgeId> {
        self.out_edges
            .get(&node)
            .and_then(|m| m.get(&kind))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn in_edges_of(&self, node: NodeId, kind: PagEdgeKind) -> Vec<EdgeId> {
        self.in_edges
            .get(&node)
            .and_then(|m| m.get(&kind))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// A cursor over the Addr-edge discovery queue.
    pub fn addr_edge_cursor(&self) -> Cursor {
        self.addr_edge_queue.cursor()
    }

    pub fn fetch_addr_edge(&self, cursor: &mut Cursor) -> Option<EdgeId> {
        self.addr_edge_queue.fetch(cursor)
    }

    /// Canonicalising edge registration: returns the existing edge when the
    /// `(kind, src, dst, label)` key is already present.
    fn get_or_add_edge(
        &mut self,
        src: NodeId,
        dst: NodeId,
        kind: PagEdgeKind,
        label: Option<NodeId>,
        ls: Option<LocationSet>,
    ) -> (EdgeId, bool) {
        let edge = PagEdge {
            src,
            dst,
            kind,
            label,
            ls,
        };
        if let Some(existing) = self.graph.find_edge(src, dst, edge.flag()) {
            return (existing, false);
        }
        debug!("pag edge {:?} {:?} -> {:?}", kind, src, dst);
        let id = self.graph.add_edge(src, dst, edge);
        self.kind_to_edges.entry(kind).or_default().insert(id);
        self.out_edges
            .entry(src)
            .or_default()
            .entry(kind)
            .or_default()
            .insert(id);
        self.in_edges
            .entry(dst)
            .or_default()
            .entry(kind)
            .or_default()
            .insert(id);
        if kind == PagEdgeKind::Addr {
            self.addr_edge_queue.push(id);
        }
        (id, true)
    }

    pub fn add_addr_edge(&mut self, src: NodeId, dst: NodeId) -> EdgeId {
        assert!(
            self.node(src).is_object(),
            "addr edge source must be an object"
        );
        self.get_or_add_edge(src, dst, PagEdgeKind::Addr, None, None).0
    }

    pub fn add_copy_edge(&mut self, src: NodeId, dst: NodeId) -> EdgeId {
        self.get_or_add_edge(src, dst, PagEdgeKind::Copy, None, None).0
    }

    pub fn add_load_edge(&mut self, src: NodeId, dst: NodeId) -> EdgeId {
        self.get_or_add_edge(src, dst, PagEdgeKind::Load, None, None).0
    }

    /// Store edges are labelled with their instruction's ICFG node, so the
    /// same `(src, dst)` pair may carry one store per program point.
    pub fn add_store_edge(&mut self, src: NodeId, dst: NodeId, store_site: NodeId) -> EdgeId {
        self.get_or_add_edge(src, dst, PagEdgeKind::Store, Some(store_site), None)
            .0
    }

    pub fn add_normal_gep_edge(&mut self, src: NodeId, dst: NodeId, ls: LocationSet) -> EdgeId {
        self.get_or_add_edge(src, dst, PagEdgeKind::NormalGep, None, Some(ls))
            .0
    }

    pub fn add_variant_gep_edge(&mut self, src: NodeId, dst: NodeId) -> EdgeId {
        self.get_or_add_edge(src, dst, PagEdgeKind::VariantGep, None, None)
            .0
    }

    /// Registers a gep statement. The edge is anchored at the base of `src`'s
    /// gep chain with the composed location set; it degrades to a variant gep
    /// when the chain already contains one or the offset is not constant.
    pub fn add_gep_edge(
        &mut self,
        src: NodeId,
        dst: NodeId,
        ls: LocationSet,
        const_gep: bool,
    ) -> EdgeId {
        let (base, accumulated, variant) = self.gep_base_of(src);
        if variant || !const_gep {
            self.add_variant_gep_edge(base, dst)
        } else {
            self.add_normal_gep_edge(base, dst, accumulated + ls)
        }
    }

    pub fn add_call_edge(&mut self, src: NodeId, dst: NodeId, call_site: NodeId) -> EdgeId {
        self.get_or_add_edge(src, dst, PagEdgeKind::Call, Some(call_site), None)
            .0
    }

    pub fn add_ret_edge(&mut self, src: NodeId, dst: NodeId, call_site: NodeId) -> EdgeId {
        self.get_or_add_edge(src, dst, PagEdgeKind::Ret, Some(call_site), None)
            .0
    }

    pub fn add_thread_fork_edge(&mut self, src: NodeId, dst: NodeId, call_site: NodeId) -> EdgeId {
        self.get_or_add_edge(src, dst, PagEdgeKind::ThreadFork, Some(call_site), None)
            .0
    }

    pub fn add_thread_join_edge(&mut self, src: NodeId, dst: NodeId, call_site: NodeId) -> EdgeId {
        self.get_or_add_edge(src, dst, PagEdgeKind::ThreadJoin, Some(call_site), None)
            .0
    }

    pub fn add_cmp_edge(&mut self, src: NodeId, dst: NodeId) -> EdgeId {
        self.get_or_add_edge(src, dst, PagEdgeKind::Cmp, None, None).0
    }

    pub fn add_binary_op_edge(&mut self, src: NodeId, dst: NodeId) -> EdgeId {
        self.get_or_add_edge(src, dst, PagEdgeKind::BinaryOp, None, None)
            .0
    }

    pub fn add_unary_op_edge(&mut self, src: NodeId, dst: NodeId) -> EdgeId {
        self.get_or_add_edge(src, dst, PagEdgeKind::UnaryOp, None, None)
            .0
    }

    /// An edge carrying no program-point label; imported summaries have no
    /// ICFG node to label their store/call/ret edges with.
    pub fn add_unlabeled_edge(&mut self, src: NodeId, dst: NodeId, kind: PagEdgeKind) -> EdgeId {
        self.get_or_add_edge(src, dst, kind, None, None).0
    }

    /// An address of unmodelled memory: either an Addr edge from the
    /// black-hole object or a Copy from the null pointer, by configuration.
    pub fn add_blackhole_addr_edge(&mut self, dst: NodeId) -> EdgeId {
        if self.options.hand_black_hole {
            self.add_addr_edge(self.black_hole, dst)
        } else {
            self.add_copy_edge(self.null_ptr, dst)
        }
    }

    /// Base node, accumulated location set and variant-ness of the gep chain
    /// feeding `node`. A node carries at most one incoming gep edge.
    fn gep_base_of(&self, node: NodeId) -> (NodeId, LocationSet, bool) {
        let ngeps = self.in_edges_of(node, PagEdgeKind::NormalGep);
        let vgeps = self.in_edges_of(node, PagEdgeKind::VariantGep);
        match (ngeps.len(), vgeps.len()) {
            (0, 0) => (node, LocationSet::default(), false),
            (1, 0) => {
                let edge = self.edge(ngeps[0]);
                (edge.src, edge.ls.unwrap(), false)
            }
            (0, 1) => (self.edge(vgeps[0]).src, LocationSet::default(), true),
            _ => panic!("node {:?} has more than one incoming gep edge", node),
        }
    }

    // ---- field model -------------------------------------------------------

    /// The base object node of any object node.
    pub fn base_obj_node(&self, node: NodeId) -> NodeId {
        *self
            .obj_base
            .get(&node)
            .unwrap_or_else(|| panic!("not an object node: {:?}", node))
    }

    pub fn obj_of(&self, node: NodeId) -> &MemObj {
        let base = self.base_obj_node(node);
        &self.objects[&base]
    }

    pub fn is_field_insensitive_obj(&self, node: NodeId) -> bool {
        self.obj_of(node).field_insensitive
    }

    /// The function an object stands for, when it is a function object.
    pub fn obj_function(&self, node: NodeId) -> Option<FuncId> {
        self.obj_of(node).function
    }

    /// Collapses an object: its fields merge into the field-insensitive
    /// node. Existing field nodes stay registered; subsequent queries route
    /// to the base.
    pub fn set_obj_field_insensitive(&mut self, node: NodeId) {
        let base = self.base_obj_node(node);
        let obj = self.objects.get_mut(&base).unwrap();
        if !obj.field_insensitive {
            obj.field_insensitive = true;
            let node_ref = self.graph.node_mut(base);
            if node_ref.kind == PagNodeKind::Object {
                node_ref.kind = PagNodeKind::FiObject;
            }
        }
    }

    /// The field-insensitive node of an object; the base node plays this
    /// role.
    pub fn fi_obj_node(&self, node: NodeId) -> NodeId {
        self.base_obj_node(node)
    }

    /// The field object for `(base of node, ls)`, bounded by the object's
    /// field limit and collapsed when the object is field-insensitive.
    /// Querying through an existing field node composes the projections.
    pub fn get_gep_obj(&mut self, node: NodeId, ls: LocationSet) -> NodeId {
        match self.node(node).kind.clone() {
            PagNodeKind::GepObject { base, ls: prior }
            | PagNodeKind::CloneGepObject { base, ls: prior } => {
                self.gep_obj_of_base(base, prior + ls)
            }
            PagNodeKind::Object
            | PagNodeKind::FiObject
            | PagNodeKind::DummyObject
            | PagNodeKind::CloneObject { .. } => {
                let base = self.base_obj_node(node);
                self.gep_obj_of_base(base, ls)
            }
            other => panic!("gep object queried on a non-object node: {:?}", other),
        }
    }

    fn gep_obj_of_base(&mut self, base: NodeId, ls: LocationSet) -> NodeId {
        let obj = &self.objects[&base];
        if obj.field_insensitive {
            return base;
        }
        let bounded = ls.modulus(obj.max_field_limit);
        if self.options.first_field_eq_base && bounded.is_zero() {
            return base;
        }
        if let Some(&node) = self.gep_obj_map.get(&(base, bounded)) {
            return node;
        }
        self.add_gep_obj_node(base, bounded)
    }

    fn add_gep_obj_node(&mut self, base: NodeId, ls: LocationSet) -> NodeId {
        let value = self.graph.node(base).value;
        let id = self.graph.add_node(PagNode::new(
            PagNodeKind::GepObject { base, ls },
            value,
        ));
        self.gep_obj_map.insert((base, ls), id);
        self.obj_base.insert(id, base);
        self.mem_to_fields.get_mut(&base).unwrap().insert(id);
        id
    }

    /// The derived value node for `(base, ls)`, memoised; used for field
    /// projections on loads and stores.
    pub fn get_gep_val(&mut self, base: NodeId, ls: LocationSet) -> NodeId {
        if let Some(&node) = self.gep_val_map.get(&(base, ls)) {
            return node;
        }
        let value = self.graph.node(base).value;
        let id = self
            .graph
            .add_node(PagNode::new(PagNodeKind::GepValue { base, ls }, value));
        self.gep_val_map.insert((base, ls), id);
        id
    }

    /// All field nodes of an object, the base included.
    pub fn all_fields_of(&self, node: NodeId) -> &NodeSet {
        let base = self.base_obj_node(node);
        &self.mem_to_fields[&base]
    }

    /// Like [`Pag::all_fields_of`], but a collapsed object answers with just
    /// its field-insensitive node.
    pub fn fields_after_collapse(&self, node: NodeId) -> NodeSet {
        let base = self.base_obj_node(node);
        if self.objects[&base].field_insensitive {
            let mut set = NodeSet::new();
            set.insert(base);
            set
        } else {
            self.mem_to_fields[&base].clone()
        }
    }

    // ---- dummy and clone nodes --------------------------------------------

    pub fn add_dummy_val_node(&mut self) -> NodeId {
        self.graph.add_node(PagNode::new(PagNodeKind::DummyValue, None))
    }

    pub fn add_dummy_obj_node(&mut self, obj: MemObj) -> NodeId {
        let id = self.graph.add_node(PagNode::new(PagNodeKind::DummyObject, None));
        self.register_object(id, obj);
        id
    }

    pub fn add_clone_val_node(&mut self, origin: NodeId) -> NodeId {
        let value = self.graph.node(origin).value;
        self.graph
            .add_node(PagNode::new(PagNodeKind::CloneValue, value))
    }

    /// Clones a field object for type-based cloning clients; the clone keeps
    /// pointing at the original base.
    pub fn add_clone_gep_obj_node(&mut self, origin: NodeId) -> NodeId {
        let (base, ls) = match &self.node(origin).kind {
            PagNodeKind::GepObject { base, ls } | PagNodeKind::CloneGepObject { base, ls } => {
                (*base, *ls)
            }
            other => panic!("not a field object node: {:?}", other),
        };
        let value = self.graph.node(base).value;
        let id = self
            .graph
            .add_node(PagNode::new(PagNodeKind::CloneGepObject { base, ls }, value));
        self.obj_base.insert(id, base);
        self.mem_to_fields.get_mut(&base).unwrap().insert(id);
        id
    }

    pub fn add_clone_obj_node(&mut self, origin: NodeId) -> NodeId {
        let base = self.base_obj_node(origin);
        let obj = self.objects[&base].clone();
        let value = self.graph.node(base).value;
        let id = self
            .graph
            .add_node(PagNode::new(PagNodeKind::CloneObject { base }, value));
        self.objects.insert(id, obj);
        self.obj_base.insert(id, id);
        self.mem_to_fields.entry(id).or_default().insert(id);
        id
    }

    // ---- call wiring -------------------------------------------------------

    pub fn set_fun_args(&mut self, func: FuncId, args: Vec<NodeId>) {
        for &arg in &args {
            self.param_func.insert(arg, func);
        }
        self.fun_args.insert(func, args);
    }

    /// The function a formal node (parameter, vararg, return) belongs to.
    pub fn formal_func(&self, node: NodeId) -> Option<FuncId> {
        match self.node(node).kind {
            PagNodeKind::Return(func) | PagNodeKind::VarArg(func) => Some(func),
            _ => self.param_func.get(&node).copied(),
        }
    }

    pub fn set_edge_site(&mut self, edge: EdgeId, site: NodeId) {
        self.edge_sites.insert(edge, site);
    }

    /// The ICFG node of a statement edge: the explicit label when the kind
    /// carries one, the recorded site otherwise.
    pub fn edge_site(&self, edge: EdgeId) -> Option<NodeId> {
        self.edge(edge).label.or_else(|| self.edge_sites.get(&edge).copied())
    }

    pub fn fun_args(&self, func: FuncId) -> Option<&Vec<NodeId>> {
        self.fun_args.get(&func)
    }

    pub fn fun_ret(&self, func: FuncId) -> Option<NodeId> {
        self.fun_ret.get(&func).copied()
    }

    pub fn fun_vararg(&self, func: FuncId) -> Option<NodeId> {
        self.fun_vararg.get(&func).copied()
    }

    pub fn register_callsite(&mut self, call_node: NodeId, args: Vec<NodeId>, dst: Option<NodeId>) {
        self.callsite_args.insert(call_node, args);
        if let Some(dst) = dst {
            self.callsite_ret.insert(call_node, dst);
        }
    }

    pub fn callsite_args(&self, call_node: NodeId) -> Option<&Vec<NodeId>> {
        self.callsite_args.get(&call_node)
    }

    pub fn callsite_ret(&self, call_node: NodeId) -> Option<NodeId> {
        self.callsite_ret.get(&call_node).copied()
    }

    pub fn register_indirect_callsite(&mut self, call_node: NodeId, fn_ptr: NodeId) {
        self.indirect_callsites.insert(call_node, fn_ptr);
    }

    pub fn register_virtual_callsite(&mut self, call_node: NodeId, vtable_ptr: NodeId) {
        self.virtual_callsites.insert(call_node, vtable_ptr);
    }

    /// Indirect callsites in callsite order.
    pub fn indirect_callsites(&self) -> Vec<(NodeId, NodeId)> {
        self.indirect_callsites
            .iter()
            .map(|(cs, fp)| (*cs, *fp))
            .collect()
    }

    pub fn virtual_callsite_vtable(&self, call_node: NodeId) -> Option<NodeId> {
        self.virtual_callsites.get(&call_node).copied()
    }

    /// Wires a resolved call: Call edges from actuals to formals (overflow
    /// actuals into the vararg node) and the Ret edge back. Returns the
    /// newly created edges.
    pub fn connect_call(&mut self, call_node: NodeId, callee: FuncId) -> Vec<EdgeId> {
        let mut added = Vec::new();
        let args = self.callsite_args.get(&call_node).cloned().unwrap_or_default();
        let params = self.fun_args.get(&callee).cloned().unwrap_or_default();
        let vararg = self.fun_vararg(callee);
        for (pos, arg) in args.iter().enumerate() {
            let formal = match params.get(pos) {
                Some(param) => *param,
                None => match vararg {
                    Some(vararg) => vararg,
                    None => break,
                },
            };
            let (id, new) = self.get_or_add_edge(*arg, formal, PagEdgeKind::Call, Some(call_node), None);
            if new {
                added.push(id);
            }
        }
        if let (Some(dst), Some(ret)) = (self.callsite_ret(call_node), self.fun_ret(callee)) {
            let (id, new) = self.get_or_add_edge(ret, dst, PagEdgeKind::Ret, Some(call_node), None);
            if new {
                added.push(id);
            }
        }
        added
    }

    // ---- external summaries ------------------------------------------------

    pub fn record_external_summary(&mut self, name: &str, summary: ExternalCallSummary) -> bool {
        match self.external_summaries.entry(name.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(summary);
                true
            }
        }
    }

    pub fn external_summary(&self, name: &str) -> Option<&ExternalCallSummary> {
        self.external_summaries.get(name)
    }

    /// Stitches a real callsite to an imported summary by name: copies
    /// actuals into the summary's argument nodes and its return node into
    /// the callsite destination.
    pub fn connect_external_callsite(&mut self, call_node: NodeId, name: &str) -> Vec<EdgeId> {
        let Some(summary) = self.external_summaries.get(name).cloned() else {
            return Vec::new();
        };
        let mut added = Vec::new();
        let args = self.callsite_args.get(&call_node).cloned().unwrap_or_default();
        for (pos, arg) in args.iter().enumerate() {
            if let Some(&formal) = summary.args.get(&(pos as u32)) {
                let (id, new) = self.get_or_add_edge(*arg, formal, PagEdgeKind::Copy, None, None);
                if new {
                    added.push(id);
                }
            }
        }
        if let (Some(dst), Some(ret)) = (self.callsite_ret(call_node), summary.ret) {
            let (id, new) = self.get_or_add_edge(ret, dst, PagEdgeKind::Copy, None, None);
            if new {
                added.push(id);
            }
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::symbols::{ObjInfo, SymbolRegistry};

    fn pag_with(objs: usize, vals: usize) -> (Pag, Vec<NodeId>, Vec<NodeId>) {
        let mut symbols = SymbolRegistry::new();
        let obj_syms: Vec<_> = (0..objs)
            .map(|_| {
                symbols.add_object(ObjInfo {
                    max_field_limit: 4,
                    ..ObjInfo::default()
                })
            })
            .collect();
        let val_syms: Vec<_> = (0..vals).map(|_| symbols.add_value()).collect();
        let mut pag = Pag::new(AnalysisOptions::default());
        pag.init_symbols(&symbols);
        let obj_nodes = obj_syms.iter().map(|s| pag.node_of(*s)).collect();
        let val_nodes = val_syms.iter().map(|s| pag.node_of(*s)).collect();
        (pag, obj_nodes, val_nodes)
    }

    #[test]
    fn symbol_ids_and_node_ids_coincide() {
        let (pag, objs, vals) = pag_with(2, 2);
        assert_eq!(pag.node_count(), 8);
        // Reserved prefix occupies 0..4.
        assert_eq!(objs[0].index(), 4);
        assert_eq!(vals[1].index(), 7);
        assert!(pag.node(objs[0]).is_address_taken_ptr());
        assert!(pag.node(vals[0]).is_top_level_ptr());
    }

    #[test]
    fn edges_are_registered_on_both_endpoints() {
        let (mut pag, objs, vals) = pag_with(1, 2);
        let addr = pag.add_addr_edge(objs[0], vals[0]);
        let copy = pag.add_copy_edge(vals[0], vals[1]);
        assert!(pag.out_edges_of(objs[0], PagEdgeKind::Addr).contains(&addr));
        assert!(pag.in_edges_of(vals[0], PagEdgeKind::Addr).contains(&addr));
        assert!(pag.out_edges_of(vals[0], PagEdgeKind::Copy).contains(&copy));
        assert!(pag.in_edges_of(vals[1], PagEdgeKind::Copy).contains(&copy));
    }

    #[test]
    fn re_adding_an_edge_returns_the_existing_one() {
        let (mut pag, objs, vals) = pag_with(1, 2);
        let first = pag.add_addr_edge(objs[0], vals[0]);
        let count = pag.edge_count();
        let again = pag.add_addr_edge(objs[0], vals[0]);
        assert_eq!(first, again);
        assert_eq!(pag.edge_count(), count);
    }

    #[test]
    fn store_edges_duplicate_across_labels_only() {
        let (mut pag, _, vals) = pag_with(0, 2);
        // Labels are opaque ICFG handles; the PAG never dereferences them.
        let site_a = NodeId::new(100);
        let site_b = NodeId::new(101);
        let first = pag.add_store_edge(vals[0], vals[1], site_a);
        let same = pag.add_store_edge(vals[0], vals[1], site_a);
        let other = pag.add_store_edge(vals[0], vals[1], site_b);
        assert_eq!(first, same);
        assert_ne!(first, other);
        assert_eq!(pag.edges_of_kind(PagEdgeKind::Store).len(), 2);
    }

    #[test]
    fn gep_chains_compose_into_one_normal_gep() {
        let (mut pag, _, vals) = pag_with(0, 3);
        let (p, q, r) = (vals[0], vals[1], vals[2]);
        pag.add_gep_edge(p, q, LocationSet::from_offset(1), true);
        pag.add_gep_edge(q, r, LocationSet::from_offset(2), true);

        // Both edges anchor at `p`; the second carries the folded offset.
        let geps = pag.edges_of_kind(PagEdgeKind::NormalGep);
        assert_eq!(geps.len(), 2);
        let into_r = pag.in_edges_of(r, PagEdgeKind::NormalGep);
        assert_eq!(into_r.len(), 1);
        let edge = pag.edge(into_r[0]);
        assert_eq!(edge.src, p);
        assert_eq!(edge.ls.unwrap().offset(), 3);
    }

    #[test]
    fn non_constant_gep_degrades_to_variant() {
        let (mut pag, _, vals) = pag_with(0, 3);
        let (p, q, r) = (vals[0], vals[1], vals[2]);
        pag.add_gep_edge(p, q, LocationSet::from_offset(1), false);
        assert_eq!(pag.edges_of_kind(PagEdgeKind::VariantGep).len(), 1);

        // A chain through a variant gep stays variant.
        pag.add_gep_edge(q, r, LocationSet::from_offset(2), true);
        let into_r = pag.in_edges_of(r, PagEdgeKind::VariantGep);
        assert_eq!(into_r.len(), 1);
        assert_eq!(pag.edge(into_r[0]).src, p);
    }

    #[test]
    fn field_model_bounds_and_caches() {
        let (mut pag, objs, _) = pag_with(1, 0);
        let base = objs[0];
        let f1 = pag.get_gep_obj(base, LocationSet::from_offset(1));
        let f1_again = pag.get_gep_obj(base, LocationSet::from_offset(1));
        assert_eq!(f1, f1_again);

        // Offsets wrap at the object's limit (4).
        let f5 = pag.get_gep_obj(base, LocationSet::from_offset(5));
        assert_eq!(f1, f5);

        // Composition through a field node.
        let f3 = pag.get_gep_obj(f1, LocationSet::from_offset(2));
        assert_eq!(
            pag.get_gep_obj(base, LocationSet::from_offset(3)),
            f3
        );

        assert!(pag.all_fields_of(base).contains(f1));
        assert!(pag.all_fields_of(base).contains(base));
        assert_eq!(pag.base_obj_node(f1), base);
    }

    #[test]
    fn collapse_shadows_fields_in_later_queries() {
        let (mut pag, objs, _) = pag_with(1, 0);
        let base = objs[0];
        let f1 = pag.get_gep_obj(base, LocationSet::from_offset(1));
        pag.set_obj_field_insensitive(base);

        assert_eq!(pag.get_gep_obj(base, LocationSet::from_offset(2)), base);
        let collapsed = pag.fields_after_collapse(base);
        assert_eq!(collapsed.iter().collect::<Vec<_>>(), vec![base]);
        // The pre-existing field node is still registered.
        assert!(pag.all_fields_of(base).contains(f1));
    }

    #[test]
    fn first_field_eq_base_mode() {
        let mut symbols = SymbolRegistry::new();
        let obj = symbols.add_object(ObjInfo {
            max_field_limit: 4,
            ..ObjInfo::default()
        });
        let mut pag = Pag::new(AnalysisOptions {
            first_field_eq_base: true,
            ..AnalysisOptions::default()
        });
        pag.init_symbols(&symbols);
        let base = pag.node_of(obj);
        assert_eq!(pag.get_gep_obj(base, LocationSet::from_offset(0)), base);
        assert_ne!(pag.get_gep_obj(base, LocationSet::from_offset(1)), base);
    }

    #[test]
    fn blackhole_addr_modes() {
        let (mut pag, _, vals) = pag_with(0, 1);
        let edge = pag.add_blackhole_addr_edge(vals[0]);
        assert_eq!(pag.edge(edge).kind, PagEdgeKind::Copy);
        assert_eq!(pag.edge(edge).src, pag.null_ptr());

        let mut symbols = SymbolRegistry::new();
        let val = symbols.add_value();
        let mut handed = Pag::new(AnalysisOptions {
            hand_black_hole: true,
            ..AnalysisOptions::default()
        });
        handed.init_symbols(&symbols);
        let dst = handed.node_of(val);
        let edge = handed.add_blackhole_addr_edge(dst);
        assert_eq!(handed.edge(edge).kind, PagEdgeKind::Addr);
        assert_eq!(handed.edge(edge).src, handed.black_hole());
    }

    #[test]
    #[should_panic(expected = "dummy node has no value")]
    fn dummy_value_query_is_fatal() {
        let (mut pag, _, _) = pag_with(0, 0);
        let dummy = pag.add_dummy_val_node();
        pag.node(dummy).value();
    }
}
