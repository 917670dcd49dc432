// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Import of hand-written per-function PAG summaries.
//!
//! The format is line oriented:
//!
//! ```text
//! <node_id> v|o [<arg_no>|ret]
//! <src> <edge_kind> <dst> [<offset_or_cs_id>]
//! ```
//!
//! with `edge_kind` one of `addr`, `copy`, `load`, `store`, `gep`,
//! `variant-gep`, `call`, `ret`, `cmp`, `binary-op`, `unary-op`. The parser
//! is permissive about interior whitespace and skips blank and `#` comment
//! lines; the grammar above is the normative emitted form.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{anyhow, bail, Context, Result};
use log::info;
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{digit1, space0, space1};
use nom::combinator::{all_consuming, map, map_res, opt, value};
use nom::sequence::{preceded, tuple};
use nom::IResult;

use crate::graph::pag::{ExternalCallSummary, MemObj, Pag, PagEdgeKind};
use crate::graph::NodeId;
use crate::ir::location_set::LocationSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtEdgeKind {
    Addr,
    Copy,
    Load,
    Store,
    Gep,
    VariantGep,
    Call,
    Ret,
    Cmp,
    BinaryOp,
    UnaryOp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtNodeRole {
    Plain,
    Arg(u32),
    Ret,
}

#[derive(Clone, Debug)]
pub struct ExtEdge {
    pub src: u32,
    pub kind: ExtEdgeKind,
    pub dst: u32,
    pub attr: Option<u64>,
}

/// A parsed external PAG for one function.
#[derive(Clone, Debug, Default)]
pub struct ExternalPag {
    pub name: String,
    pub value_nodes: BTreeSet<u32>,
    pub object_nodes: BTreeSet<u32>,
    pub arg_nodes: BTreeMap<u32, u32>,
    pub ret_node: Option<u32>,
    pub edges: Vec<ExtEdge>,
}

#[derive(Debug)]
enum Line {
    Node { id: u32, object: bool, role: ExtNodeRole },
    Edge(ExtEdge),
}

fn number_u32(input: &str) -> IResult<&str, u32> {
    map_res(digit1, str::parse::<u32>)(input)
}

fn number_u64(input: &str) -> IResult<&str, u64> {
    map_res(digit1, str::parse::<u64>)(input)
}

fn node_role(input: &str) -> IResult<&str, ExtNodeRole> {
    alt((
        value(ExtNodeRole::Ret, tag("ret")),
        map(number_u32, ExtNodeRole::Arg),
    ))(input)
}

fn node_line(input: &str) -> IResult<&str, Line> {
    map(
        tuple((
            preceded(space0, number_u32),
            preceded(space1, alt((value(false, tag("v")), value(true, tag("o"))))),
            opt(preceded(space1, node_role)),
            space0,
        )),
        |(id, object, role, _)| Line::Node {
            id,
            object,
            role: role.unwrap_or(ExtNodeRole::Plain),
        },
    )(input)
}

fn edge_kind(input: &str) -> IResult<&str, ExtEdgeKind> {
    alt((
        value(ExtEdgeKind::Addr, tag("addr")),
        value(ExtEdgeKind::Copy, tag("copy")),
        value(ExtEdgeKind::Load, tag("load")),
        value(ExtEdgeKind::Store, tag("store")),
        value(ExtEdgeKind::VariantGep, tag("variant-gep")),
        value(ExtEdgeKind::Gep, tag("gep")),
        value(ExtEdgeKind::Call, tag("call")),
        value(ExtEdgeKind::Ret, tag("ret")),
        value(ExtEdgeKind::Cmp, tag("cmp")),
        value(ExtEdgeKind::BinaryOp, tag("binary-op")),
        value(ExtEdgeKind::UnaryOp, tag("unary-op")),
    ))(input)
}

fn edge_line(input: &str) -> IResult<&str, Line> {
    map(
        tuple((
            preceded(space0, number_u32),
            preceded(space1, edge_kind),
            preceded(space1, number_u32),
            opt(preceded(space1, number_u64)),
            space0,
        )),
        |(src, kind, dst, attr, _)| {
            Line::Edge(ExtEdge {
                src,
                kind,
                dst,
                attr,
            })
        },
    )(input)
}

fn parse_line(input: &str) -> Result<Line> {
    alt((all_consuming(node_line), all_consuming(edge_line)))(input)
        .map(|(_, line)| line)
        .map_err(|e| anyhow!("malformed external pag line {:?}: {}", input, e))
}

impl ExternalPag {
    /// Parses the external PAG of the function called `name`.
    pub fn parse(name: &str, text: &str) -> Result<ExternalPag> {
        let mut ext = ExternalPag {
            name: name.to_string(),
            ..ExternalPag::default()
        };
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parsed =
                parse_line(line).with_context(|| format!("{}:{}", name, lineno + 1))?;
            match parsed {
                Line::Node { id, object, role } => {
                    if id == u32::MAX {
                        bail!("{}:{}: node id {} is reserved", name, lineno + 1, id);
                    }
                    if object {
                        ext.object_nodes.insert(id);
                    } else {
                        ext.value_nodes.insert(id);
                    }
                    match role {
                        ExtNodeRole::Plain => {}
                        ExtNodeRole::Arg(no) => {
                            ext.arg_nodes.insert(no, id);
                        }
                        ExtNodeRole::Ret => ext.ret_node = Some(id),
                    }
                }
                Line::Edge(edge) => ext.edges.push(edge),
            }
        }
        Ok(ext)
    }

    /// Materialises this summary in the PAG: every external node becomes a
    /// fresh dummy node, edges are wired, and argument/return nodes are
    /// recorded for callsite stitching. Returns false when a summary for the
    /// function already exists.
    pub fn add_to_pag(&self, pag: &mut Pag) -> Result<bool> {
        if pag.external_summary(&self.name).is_some() {
            return Ok(false);
        }
        info!("importing external pag for {}", self.name);

        let mut ext_to_new: BTreeMap<u32, NodeId> = BTreeMap::new();
        for &ext_id in &self.value_nodes {
            ext_to_new.insert(ext_id, pag.add_dummy_val_node());
        }
        for &ext_id in &self.object_nodes {
            if self.value_nodes.contains(&ext_id) {
                bail!("{}: node {} declared both v and o", self.name, ext_id);
            }
            let node = pag.add_dummy_obj_node(MemObj {
                sym: None,
                max_field_limit: pag_default_field_limit(),
                field_insensitive: false,
                constant: false,
                function: None,
            });
            ext_to_new.insert(ext_id, node);
        }

        let resolve = |ext_id: u32| -> Result<NodeId> {
            ext_to_new
                .get(&ext_id)
                .copied()
                .ok_or_else(|| anyhow!("{}: edge references undeclared node {}", self.name, ext_id))
        };

        for edge in &self.edges {
            let src = resolve(edge.src)?;
            let dst = resolve(edge.dst)?;
            match edge.kind {
                ExtEdgeKind::Addr => {
                    if !self.object_nodes.contains(&edge.src) {
                        bail!("{}: addr edge from value node {}", self.name, edge.src);
                    }
                    pag.add_addr_edge(src, dst);
                }
                ExtEdgeKind::Copy => {
                    pag.add_copy_edge(src, dst);
                }
                ExtEdgeKind::Load => {
                    pag.add_load_edge(src, dst);
                }
                ExtEdgeKind::Store => {
                    pag.add_unlabeled_edge(src, dst, PagEdgeKind::Store);
                }
                ExtEdgeKind::Gep => {
                    let offset = edge.attr.unwrap_or(0);
                    pag.add_normal_gep_edge(src, dst, LocationSet::from_offset(offset as u32));
                }
                ExtEdgeKind::VariantGep => {
                    pag.add_variant_gep_edge(src, dst);
                }
                ExtEdgeKind::Call => {
                    pag.add_unlabeled_edge(src, dst, PagEdgeKind::Call);
                }
                ExtEdgeKind::Ret => {
                    pag.add_unlabeled_edge(src, dst, PagEdgeKind::Ret);
                }
                ExtEdgeKind::Cmp => {
                    pag.add_cmp_edge(src, dst);
                }
                ExtEdgeKind::BinaryOp => {
                    pag.add_binary_op_edge(src, dst);
                }
                ExtEdgeKind::UnaryOp => {
                    pag.add_unary_op_edge(src, dst);
                }
            }
        }

        let mut summary = ExternalCallSummary::default();
        for (&arg_no, &ext_id) in &self.arg_nodes {
            summary.args.insert(arg_no, resolve(ext_id)?);
        }
        if let Some(ret) = self.ret_node {
            summary.ret = Some(resolve(ret)?);
        }
        Ok(pag.record_external_summary(&self.name, summary))
    }
}

fn pag_default_field_limit() -> u32 {
    crate::util::options::AnalysisOptions::default().max_field_limit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::symbols::SymbolRegistry;
    use crate::util::options::AnalysisOptions;

    const MALLOC_LIKE: &str = "\
# returns fresh memory
1 o
2 v ret
1 addr 2
";

    #[test]
    fn parses_nodes_roles_and_edges() {
        let text = "\
0 v 0
1 v 1
2 v ret
3 o

0   copy   3
3 gep 1 4
1 store 0
";
        let ext = ExternalPag::parse("f", text).unwrap();
        assert_eq!(ext.value_nodes.len(), 3);
        assert_eq!(ext.object_nodes.len(), 1);
        assert_eq!(ext.arg_nodes.get(&0), Some(&0));
        assert_eq!(ext.arg_nodes.get(&1), Some(&1));
        assert_eq!(ext.ret_node, Some(2));
        assert_eq!(ext.edges.len(), 3);
        assert_eq!(ext.edges[1].kind, ExtEdgeKind::Gep);
        assert_eq!(ext.edges[1].attr, Some(4));
    }

    #[test]
    fn rejects_sentinel_and_garbage() {
        assert!(ExternalPag::parse("f", "4294967295 v\n").is_err());
        assert!(ExternalPag::parse("f", "1 q\n").is_err());
        assert!(ExternalPag::parse("f", "1 copy\n").is_err());
    }

    #[test]
    fn import_creates_dummies_and_edges() {
        let symbols = SymbolRegistry::new();
        let mut pag = Pag::new(AnalysisOptions::default());
        pag.init_symbols(&symbols);
        let nodes_before = pag.node_count();

        let ext = ExternalPag::parse("malloc", MALLOC_LIKE).unwrap();
        assert!(ext.add_to_pag(&mut pag).unwrap());
        assert_eq!(pag.node_count(), nodes_before + 2);
        assert_eq!(pag.edges_of_kind(PagEdgeKind::Addr).len(), 1);

        let summary = pag.external_summary("malloc").unwrap();
        assert!(summary.ret.is_some());

        // A second import of the same function is refused.
        assert!(!ext.add_to_pag(&mut pag).unwrap());
    }

    #[test]
    fn import_rejects_addr_from_value() {
        let symbols = SymbolRegistry::new();
        let mut pag = Pag::new(AnalysisOptions::default());
        pag.init_symbols(&symbols);
        let ext = ExternalPag::parse("f", "1 v\n2 v\n1 addr 2\n").unwrap();
        assert!(ext.add_to_pag(&mut pag).is_err());
    }
}
