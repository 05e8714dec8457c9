//! DOT rendering of the CFG for graphviz inspection.

use anyhow::{Context, Result};
use smc_core::cfg::Cfg;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writes the CFG as a graphviz digraph: one record node per basic block
/// listing its phis and instructions, one edge per successor, with the
/// immediate dominator shown as a dashed edge.
pub fn write_dot(cfg: &Cfg, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("cannot write {}", path.display()))?;
    let mut out = BufWriter::new(file);

    writeln!(out, "digraph cfg {{")?;
    writeln!(out, "  node [shape=box, fontname=\"monospace\"];")?;

    for block in &cfg.blocks {
        let mut lines = vec![format!("b{}: {}", block.id, block.label)];
        for phi in &block.phis {
            lines.push(phi.to_string());
        }
        for instr in &block.instrs {
            lines.push(instr.to_string());
        }
        let text = lines
            .join("\\l")
            .replace('"', "\\\"");
        writeln!(out, "  b{} [label=\"{}\\l\"];", block.id, text)?;
    }

    for block in &cfg.blocks {
        for &succ in &block.succs {
            writeln!(out, "  b{} -> b{};", block.id, succ)?;
        }
        if let Some(idom) = block.idom {
            writeln!(out, "  b{} -> b{} [style=dashed, color=gray];", idom, block.id)?;
        }
    }

    writeln!(out, "}}")?;
    out.flush()?;
    Ok(())
}
