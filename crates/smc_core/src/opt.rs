//! SSA optimizer: constant propagation, copy propagation, dead-code
//! elimination.
//!
//! Passes iterate to a fixed point, bounded by a small pass-count limit.
//! Constant propagation folds arithmetic whose operands are known and
//! rewrites the folded instruction into a plain constant assignment; copy
//! propagation only records dest-is-a-copy facts in the value-info map
//! for consumers to consult. Dead-code elimination walks blocks in
//! reverse and drops definitions nobody reads — except anything that
//! writes a hardware state bit, which is never touched. Block structure
//! (successors, predecessors, phi operands) is left entirely alone.

use crate::ast::{BinOp, UnOp};
use crate::cfg::Cfg;
use crate::hw::HardwareContext;
use crate::ssa::{SsaInstr, SsaValue};
use log::debug;
use std::collections::{HashMap, HashSet};

/// Upper bound on optimization iterations.
pub const MAX_PASSES: usize = 5;

/// What the optimizer learned about a defined value.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueInfo {
    Constant(i64),
    Copy(SsaValue),
}

/// Counters reported in the statistics block after an optimized build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptStats {
    pub constants_found: usize,
    pub copies_found: usize,
    pub dead_removed: usize,
    pub iterations: usize,
}

/// Runs the pass pipeline to a fixed point and returns the event counts.
pub fn optimize(cfg: &mut Cfg, hw: &HardwareContext) -> OptStats {
    let mut stats = OptStats::default();
    let mut info: HashMap<SsaValue, ValueInfo> = HashMap::new();

    for pass in 0..MAX_PASSES {
        stats.iterations = pass + 1;
        let mut changed = false;
        changed |= propagate_constants(cfg, &mut info, &mut stats);
        changed |= propagate_copies(cfg, &mut info, &mut stats);
        changed |= eliminate_dead(cfg, hw, &mut stats);
        if !changed {
            break;
        }
    }
    debug!(
        "optimizer: {} constants, {} copies, {} dead, {} iterations",
        stats.constants_found, stats.copies_found, stats.dead_removed, stats.iterations
    );
    stats
}

/// Resolves a value through the info map to a constant, if known.
fn known_const(value: &SsaValue, info: &HashMap<SsaValue, ValueInfo>) -> Option<i64> {
    let mut cur = value.clone();
    // Copy chains are acyclic in SSA; bound the walk anyway.
    for _ in 0..64 {
        match &cur {
            SsaValue::Const(n) => return Some(*n),
            other => match info.get(other) {
                Some(ValueInfo::Constant(n)) => return Some(*n),
                Some(ValueInfo::Copy(next)) => cur = next.clone(),
                None => return None,
            },
        }
    }
    None
}

fn fold_binary(op: BinOp, a: i64, b: i64) -> i64 {
    match op {
        BinOp::LogicAnd => (a != 0 && b != 0) as i64,
        BinOp::LogicOr => (a != 0 || b != 0) as i64,
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
        BinOp::Eq => (a == b) as i64,
        BinOp::Ne => (a != b) as i64,
        BinOp::Lt => (a < b) as i64,
        BinOp::Le => (a <= b) as i64,
        BinOp::Gt => (a > b) as i64,
        BinOp::Ge => (a >= b) as i64,
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        // Divide-by-zero folds to 0 rather than aborting compilation.
        BinOp::Div => {
            if b == 0 {
                0
            } else {
                a / b
            }
        }
    }
}

fn propagate_constants(
    cfg: &mut Cfg,
    info: &mut HashMap<SsaValue, ValueInfo>,
    stats: &mut OptStats,
) -> bool {
    let mut changed = false;
    for block in &mut cfg.blocks {
        for instr in &mut block.instrs {
            // Folding replaces the whole instruction, so decide from a
            // shared view first and rewrite afterwards.
            let folded: Option<(SsaValue, i64)> = match &*instr {
                SsaInstr::BinaryOp { dest, op, lhs, rhs } => {
                    match (known_const(lhs, info), known_const(rhs, info)) {
                        (Some(a), Some(b)) => Some((dest.clone(), fold_binary(*op, a, b))),
                        _ => None,
                    }
                }
                SsaInstr::UnaryOp { dest, op, operand } => {
                    known_const(operand, info).map(|v| {
                        let folded = match op {
                            UnOp::Not => (v == 0) as i64,
                            UnOp::Neg => -v,
                        };
                        (dest.clone(), folded)
                    })
                }
                _ => None,
            };
            if let Some((dest, value)) = folded {
                debug!("fold {dest} -> {value}");
                info.insert(dest.clone(), ValueInfo::Constant(value));
                *instr = SsaInstr::Assign {
                    dest,
                    src: SsaValue::Const(value),
                };
                stats.constants_found += 1;
                changed = true;
                continue;
            }

            match instr {
                SsaInstr::Assign { dest, src } => {
                    if let Some(n) = known_const(src, info) {
                        if info.get(dest) != Some(&ValueInfo::Constant(n)) {
                            info.insert(dest.clone(), ValueInfo::Constant(n));
                            stats.constants_found += 1;
                            changed = true;
                        }
                        if *src != SsaValue::Const(n) {
                            *src = SsaValue::Const(n);
                            changed = true;
                        }
                    }
                }
                SsaInstr::Store { src, .. } => {
                    if let Some(n) = known_const(src, info) {
                        if *src != SsaValue::Const(n) {
                            *src = SsaValue::Const(n);
                            changed = true;
                        }
                    }
                }
                _ => {}
            }
        }
    }
    changed
}

fn propagate_copies(
    cfg: &Cfg,
    info: &mut HashMap<SsaValue, ValueInfo>,
    stats: &mut OptStats,
) -> bool {
    let mut changed = false;
    for block in &cfg.blocks {
        for instr in &block.instrs {
            if let SsaInstr::Assign { dest, src } = instr {
                let is_copy = matches!(src, SsaValue::Var { .. } | SsaValue::Temp(_));
                if is_copy && !info.contains_key(dest) {
                    info.insert(dest.clone(), ValueInfo::Copy(src.clone()));
                    stats.copies_found += 1;
                    changed = true;
                }
            }
        }
    }
    changed
}

/// Collects every value read anywhere in the CFG.
fn collect_uses(cfg: &Cfg) -> HashSet<SsaValue> {
    let mut uses = HashSet::new();
    let mut read = |v: &SsaValue, uses: &mut HashSet<SsaValue>| {
        if !matches!(v, SsaValue::Const(_)) {
            uses.insert(v.clone());
        }
    };
    for block in &cfg.blocks {
        for phi in &block.phis {
            for (_, v) in &phi.args {
                read(v, &mut uses);
            }
        }
        for instr in &block.instrs {
            match instr {
                SsaInstr::Assign { src, .. } => read(src, &mut uses),
                SsaInstr::BinaryOp { lhs, rhs, .. } => {
                    read(lhs, &mut uses);
                    read(rhs, &mut uses);
                }
                SsaInstr::UnaryOp { operand, .. } => read(operand, &mut uses),
                SsaInstr::Store { src, .. } => read(src, &mut uses),
                SsaInstr::Call { args, .. } => {
                    for a in args {
                        read(a, &mut uses);
                    }
                }
                SsaInstr::Branch { cond, .. } => read(cond, &mut uses),
                SsaInstr::Switch { selector, .. } => read(selector, &mut uses),
                SsaInstr::Load { .. } | SsaInstr::Return | SsaInstr::Jump(_) => {}
            }
        }
    }
    uses
}

fn eliminate_dead(cfg: &mut Cfg, hw: &HardwareContext, stats: &mut OptStats) -> bool {
    let uses = collect_uses(cfg);
    let mut changed = false;

    for block_idx in (0..cfg.blocks.len()).rev() {
        let block = &mut cfg.blocks[block_idx];
        let before = block.instrs.len();
        block.instrs.retain(|instr| {
            if instr.has_side_effect() {
                return true;
            }
            let Some(dest) = instr.dest() else {
                return true;
            };
            // A definition of a state-named variable is a hardware effect
            // regardless of its SSA uses.
            if let SsaValue::Var { name, .. } = dest {
                if hw.is_state(name) {
                    return true;
                }
            }
            let dead = !uses.contains(dest);
            if dead {
                debug!("dead: {instr}");
            }
            !dead
        });
        let removed = before - block.instrs.len();
        if removed > 0 {
            stats.dead_removed += removed;
            changed = true;
        }
    }
    changed
}
