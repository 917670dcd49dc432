// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Persistence of points-to results.
//!
//! The format is line oriented: one line per node
//!
//! ```text
//! <id> -> { <o1> <o2> ... }
//! ```
//!
//! followed by one line per field object
//!
//! ```text
//! <id> <base_id> <offset>
//! ```
//!
//! The reader reconstructs the points-to table, re-materialises every field
//! node (ids must agree with the writer's), and re-runs the on-the-fly
//! callgraph refinement.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use itertools::Itertools;
use log::info;
use nom::bytes::complete::tag;
use nom::character::complete::{digit1, space0, space1};
use nom::combinator::{all_consuming, map_res};
use nom::multi::separated_list0;
use nom::sequence::{preceded, tuple};
use nom::IResult;

use crate::graph::pag::PagNodeKind;
use crate::graph::NodeId;
use crate::ir::location_set::LocationSet;
use crate::pta::BvDataPta;
use crate::pts_set::points_to::PointsToSet;

pub fn write_points_to<W: Write>(pta: &BvDataPta, out: &mut W) -> Result<()> {
    for node in pta.pag().node_ids() {
        let pts = pta.get_pts(node);
        let objs = pts.iter().map(|o| o.index().to_string()).join(" ");
        if objs.is_empty() {
            writeln!(out, "{} -> {{  }}", node.index())?;
        } else {
            writeln!(out, "{} -> {{ {} }}", node.index(), objs)?;
        }
    }
    for node in pta.pag().node_ids() {
        if let PagNodeKind::GepObject { base, ls } = &pta.pag().node(node).kind {
            writeln!(out, "{} {} {}", node.index(), base.index(), ls.offset())?;
        }
    }
    Ok(())
}

pub fn write_points_to_file(pta: &BvDataPta, path: &Path) -> Result<()> {
    info!("storing points-to results to {}", path.display());
    let mut out = BufWriter::new(File::create(path)?);
    write_points_to(pta, &mut out)
}

fn number_u32(input: &str) -> IResult<&str, u32> {
    map_res(digit1, str::parse::<u32>)(input)
}

fn pts_line(input: &str) -> IResult<&str, (u32, Vec<u32>)> {
    let (rest, (var, _, _, objs, _, _)) = tuple((
        preceded(space0, number_u32),
        preceded(space0, tag("->")),
        preceded(space0, tag("{")),
        preceded(space0, separated_list0(space1, number_u32)),
        space0,
        tag("}"),
    ))(input)?;
    Ok((rest, (var, objs)))
}

fn field_line(input: &str) -> IResult<&str, (u32, u32, u32)> {
    let (rest, (id, base, offset)) = tuple((
        preceded(space0, number_u32),
        preceded(space1, number_u32),
        preceded(space1, number_u32),
    ))(input)?;
    Ok((rest, (id, base, offset)))
}

/// Loads persisted results into a freshly built analysis. Field nodes are
/// re-created in file order and must come out with the ids they were written
/// with; afterwards the callgraph is refined against the loaded solution.
pub fn read_points_to<R: BufRead>(pta: &mut BvDataPta, input: R) -> Result<()> {
    for (lineno, line) in input.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.contains("->") {
            let (_, (var, objs)) = all_consuming(pts_line)(trimmed)
                .map_err(|e| anyhow::anyhow!("line {}: {}", lineno + 1, e))?;
            let var = NodeId::new(var as usize);
            for obj in objs {
                pta.add_pts(var, NodeId::new(obj as usize));
            }
        } else {
            let (_, (id, base, offset)) = all_consuming(field_line)(trimmed)
                .map_err(|e| anyhow::anyhow!("line {}: {}", lineno + 1, e))?;
            let node = pta
                .materialize_field(NodeId::new(base as usize), LocationSet::from_offset(offset));
            if node.index() != id as usize {
                bail!(
                    "line {}: field node came out as {} instead of {}",
                    lineno + 1,
                    node.index(),
                    id
                );
            }
        }
    }
    pta.update_call_graph();
    Ok(())
}

pub fn read_points_to_file(pta: &mut BvDataPta, path: &Path) -> Result<()> {
    info!("loading points-to results from {}", path.display());
    let input = BufReader::new(
        File::open(path).with_context(|| format!("opening {}", path.display()))?,
    );
    read_points_to(pta, input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::pag_builder::PagBuilder;
    use crate::ir::module::IrModule;
    use crate::ir::statements::Statement;
    use crate::ir::symbols::{ObjInfo, SymbolRegistry};
    use crate::ir::FuncId;
    use crate::util::options::AnalysisOptions;

    fn fixture() -> (IrModule, SymbolRegistry) {
        let mut symbols = SymbolRegistry::new();
        let main = FuncId(0);
        let o = symbols.add_object(ObjInfo {
            max_field_limit: 8,
            ..ObjInfo::default()
        });
        let p = symbols.add_value();
        let q = symbols.add_value();
        let mut module = IrModule::new();
        module.add_function(main, "main", vec![]);
        module.set_entry(main);
        module.add_instr(main, Statement::Addr { src: o, dst: p });
        module.add_instr(
            main,
            Statement::Gep {
                src: p,
                dst: q,
                ls: LocationSet::from_offset(3),
                constant: true,
            },
        );
        module.add_instr(main, Statement::Ret { val: None });
        module.seal();
        (module, symbols)
    }

    fn build(module: &IrModule, symbols: &SymbolRegistry) -> BvDataPta {
        let program = PagBuilder::new(module, symbols, None, AnalysisOptions::default()).build();
        BvDataPta::new(program, AnalysisOptions::default())
    }

    #[test]
    fn round_trip_preserves_pts_and_field_nodes() {
        let (module, symbols) = fixture();
        let mut solved = build(&module, &symbols);
        solved.solve();

        let mut buffer = Vec::new();
        write_points_to(&solved, &mut buffer).unwrap();

        let mut reloaded = build(&module, &symbols);
        read_points_to(&mut reloaded, buffer.as_slice()).unwrap();

        assert_eq!(reloaded.pag().node_count(), solved.pag().node_count());
        for node in solved.pag().node_ids() {
            assert_eq!(
                solved.get_pts(node).iter().collect::<Vec<_>>(),
                reloaded.get_pts(node).iter().collect::<Vec<_>>(),
                "pts differ for {:?}",
                node
            );
        }
    }

    #[test]
    fn reader_rejects_garbage() {
        let (module, symbols) = fixture();
        let mut pta = build(&module, &symbols);
        assert!(read_points_to(&mut pta, "nonsense\n".as_bytes()).is_err());
    }

    #[test]
    fn empty_sets_round_trip() {
        let (module, symbols) = fixture();
        let solved = build(&module, &symbols);

        // Unsolved: every set is empty.
        let mut buffer = Vec::new();
        write_points_to(&solved, &mut buffer).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.lines().all(|l| l.contains("->")));

        let mut reloaded = build(&module, &symbols);
        read_points_to(&mut reloaded, buffer.as_slice()).unwrap();
        for node in reloaded.pag().node_ids() {
            assert!(reloaded.get_pts(node).is_empty());
        }
    }
}
