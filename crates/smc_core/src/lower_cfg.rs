//! CFG-to-microcode lowering: the back half of the SSA pipeline.
//!
//! Three phases. Phase 1 pre-computes every block's start address from an
//! exact per-block word count (the emitter in phase 2 produces precisely
//! the counted words, so no estimate can drift). Phase 2 walks the blocks
//! in storage order — except the exit block, which always goes last so
//! the self-loop is the final word — translating each SSA instruction.
//! Phase 3 re-validates the result. Conditions are reconstructed from the
//! SSA definition chain (loads and operators back to source expressions)
//! and fed through the same hybrid varSel policy the direct walk uses.

use crate::ast::Expr;
use crate::cfg::{BlockId, Cfg};
use crate::cond::{CondAlloc, CondKind};
use crate::hw::HardwareContext;
use crate::program::{Program, SwitchDispatch, SwitchInfo};
use crate::ssa::{SsaInstr, SsaValue};
use crate::{CompileError, Result};
use log::debug;
use smc_common::limits;
use smc_common::mcode::{Code, MCode};
use std::collections::HashMap;

/// Lowers an (optionally optimized) CFG to a resolved program.
pub fn lower(cfg: &Cfg, hw: &HardwareContext) -> Result<Program> {
    let exprs = reconstruct_exprs(cfg);
    let order = emission_order(cfg);

    // Phase 1: exact block addresses.
    let mut block_address: HashMap<BlockId, usize> = HashMap::new();
    let mut addr = 0usize;
    for &b in &order {
        block_address.insert(b, addr);
        addr += block_word_count(cfg, b);
    }
    let total = addr;
    if total > 1 << limits::MAX_JADR_BITS {
        return Err(CompileError::CapacityExceeded(format!(
            "{total} words exceed the {}-bit address space",
            limits::MAX_JADR_BITS
        )));
    }

    // Phase 2: emission.
    let mut e = Emitter {
        hw,
        cfg,
        exprs,
        block_address,
        codes: Vec::new(),
        cond: CondAlloc::new(),
        dispatch: SwitchDispatch::default(),
        switch_infos: Vec::new(),
    };
    for &b in &order {
        e.block(b)?;
    }
    debug_assert_eq!(e.codes.len(), total, "phase 1/2 word counts diverged");

    let program = Program {
        codes: e.codes,
        switch_infos: e.switch_infos,
        dispatch: e.dispatch,
        lut: e.cond.build_lut(hw),
        timer_count: 0,
        var_sel_masks: e.cond.dependence_masks(hw),
    };

    // Phase 3: range validation.
    program.validate()?;
    Ok(program)
}

/// Storage order with the exit block moved to the end.
fn emission_order(cfg: &Cfg) -> Vec<BlockId> {
    (0..cfg.blocks.len())
        .filter(|&b| b != cfg.exit)
        .chain(std::iter::once(cfg.exit))
        .collect()
}

/// Exact number of words phase 2 emits for a block.
fn block_word_count(cfg: &Cfg, b: BlockId) -> usize {
    let block = &cfg.blocks[b];
    let mut count = block.phis.len();
    if b == cfg.entry {
        count += 1;
    }
    for instr in &block.instrs {
        count += match instr {
            SsaInstr::Branch { .. } => 2,
            _ => 1,
        };
    }
    count.max(1)
}

/// Rebuilds a source expression per SSA value from the definition chain.
///
/// Values defined by phis stay absent: a condition depending on a join
/// point has no single source expression and is rejected at its use.
fn reconstruct_exprs(cfg: &Cfg) -> HashMap<SsaValue, Expr> {
    let mut map: HashMap<SsaValue, Expr> = HashMap::new();
    let expr_of = |v: &SsaValue, map: &HashMap<SsaValue, Expr>| -> Option<Expr> {
        match v {
            SsaValue::Const(n) => Some(Expr::Num(*n)),
            other => map.get(other).cloned(),
        }
    };
    for block in &cfg.blocks {
        for instr in &block.instrs {
            match instr {
                SsaInstr::Load { dest, input } => {
                    map.insert(dest.clone(), Expr::Ident(input.clone()));
                }
                SsaInstr::Assign { dest, src } => {
                    if let Some(e) = expr_of(src, &map) {
                        map.insert(dest.clone(), e);
                    }
                }
                SsaInstr::BinaryOp { dest, op, lhs, rhs } => {
                    if let (Some(l), Some(r)) = (expr_of(lhs, &map), expr_of(rhs, &map)) {
                        map.insert(
                            dest.clone(),
                            Expr::Binary {
                                op: *op,
                                lhs: Box::new(l),
                                rhs: Box::new(r),
                            },
                        );
                    }
                }
                SsaInstr::UnaryOp { dest, op, operand } => {
                    if let Some(o) = expr_of(operand, &map) {
                        map.insert(
                            dest.clone(),
                            Expr::Unary {
                                op: *op,
                                operand: Box::new(o),
                            },
                        );
                    }
                }
                _ => {}
            }
        }
    }
    map
}

struct Emitter<'a> {
    hw: &'a HardwareContext,
    cfg: &'a Cfg,
    exprs: HashMap<SsaValue, Expr>,
    block_address: HashMap<BlockId, usize>,
    codes: Vec<Code>,
    cond: CondAlloc,
    dispatch: SwitchDispatch,
    switch_infos: Vec<SwitchInfo>,
}

impl<'a> Emitter<'a> {
    fn push(&mut self, mcode: MCode, label: impl Into<String>) {
        let code = Code::new(mcode, label);
        debug!("[{:3}] {}", self.codes.len(), code.label_str());
        self.codes.push(code);
    }

    /// A NOP that sequences explicitly to the next word.
    fn nop(&mut self, label: impl Into<String>) {
        let mut m = MCode::nop();
        m.forced_jmp = 1;
        m.jadr = (self.codes.len() + 1) as u32;
        self.push(m, label);
    }

    fn jump(&mut self, target: BlockId, label: impl Into<String>) {
        let mut m = MCode::nop();
        m.forced_jmp = 1;
        m.jadr = self.block_address[&target] as u32;
        self.push(m, label);
    }

    fn expr_of(&self, v: &SsaValue) -> Option<Expr> {
        match v {
            SsaValue::Const(n) => Some(Expr::Num(*n)),
            other => self.exprs.get(other).cloned(),
        }
    }

    fn block(&mut self, b: BlockId) -> Result<()> {
        let block = &self.cfg.blocks[b];
        let emitted_before = self.codes.len();

        if b == self.cfg.entry {
            let mut entry = MCode::nop();
            entry.state = self.hw.initial_state_value();
            entry.mask = self.hw.initial_mask();
            entry.state_capture = 1;
            self.push(entry, "main");
        }

        for phi in &block.phis {
            self.nop(format!("phi {phi}"));
        }

        for instr in &block.instrs {
            self.instr(b, instr)?;
        }

        if self.codes.len() == emitted_before {
            self.nop(format!("b{b}"));
        }
        Ok(())
    }

    fn instr(&mut self, b: BlockId, instr: &SsaInstr) -> Result<()> {
        match instr {
            SsaInstr::Store { state, src, .. } => {
                let sv = self.hw.state(state).ok_or_else(|| {
                    CompileError::MalformedProgram(format!("store to unknown state '{state}'"))
                })?;
                let Some(SsaValue::Const(n)) = resolve_const(src) else {
                    return Err(CompileError::UnsupportedConstruct(format!(
                        "state write '{state} = {src}' needs a constant value"
                    )));
                };
                let bit = 1u32 << sv.bit_index;
                let mut m = MCode::nop();
                m.mask = bit;
                m.state = if n != 0 { bit } else { 0 };
                m.state_capture = 1;
                self.push(m, format!("{state} = {}", (n != 0) as u32));
                Ok(())
            }
            SsaInstr::Branch {
                cond,
                then_blk,
                else_blk,
            } => {
                let expr = self.expr_of(cond).ok_or_else(|| {
                    CompileError::UnsupportedConstruct(format!(
                        "branch condition {cond} depends on a join point"
                    ))
                })?;
                let else_addr = self.block_address[else_blk] as u32;
                match self.cond.classify(&expr, self.hw)? {
                    CondKind::ConstFalse => {
                        // The else edge is taken unconditionally; the
                        // second word keeps the two-word branch shape.
                        self.jump(*else_blk, format!("br {expr} (never)"));
                        self.jump(*then_blk, "dead edge");
                    }
                    kind => {
                        let mut m = MCode::nop();
                        m.branch = 1;
                        m.jadr = else_addr;
                        match kind {
                            CondKind::DirectInput(idx) => m.state = idx + 1,
                            CondKind::Lut(var_sel) => m.var_sel = var_sel,
                            CondKind::ConstTrue | CondKind::ConstFalse => {}
                        }
                        self.push(m, format!("br {expr}"));
                        self.jump(*then_blk, "then edge");
                    }
                }
                Ok(())
            }
            SsaInstr::Jump(target) => {
                self.jump(*target, format!("jmp b{target}"));
                Ok(())
            }
            SsaInstr::Return => {
                let mut m = MCode::nop();
                m.forced_jmp = 1;
                if b == self.cfg.exit {
                    m.jadr = self.codes.len() as u32;
                    self.push(m, ":exit");
                } else {
                    m.jadr = self.block_address[&self.cfg.exit] as u32;
                    self.push(m, "return");
                }
                Ok(())
            }
            SsaInstr::Switch {
                selector,
                cases,
                default,
            } => {
                let expr = self.expr_of(selector).ok_or_else(|| {
                    CompileError::UnsupportedConstruct(
                        "switch selector depends on a join point".into(),
                    )
                })?;
                let Some(input) = expr.as_ident().and_then(|n| self.hw.input(n)) else {
                    return Err(CompileError::UnsupportedConstruct(format!(
                        "switch selector '{expr}' must be an input variable"
                    )));
                };
                if self.switch_infos.len() >= limits::MAX_SWITCHES {
                    return Err(CompileError::CapacityExceeded(format!(
                        "more than {} switch statements",
                        limits::MAX_SWITCHES
                    )));
                }
                let switch_id = self.switch_infos.len() as u32;
                self.dispatch.push_row();
                for (value, blk) in cases {
                    self.dispatch
                        .set_case(switch_id, *value, self.block_address[blk])?;
                }
                self.dispatch
                    .finalize_row(switch_id, self.block_address[default]);

                let start_addr = self.codes.len();
                let mut m = MCode::nop();
                m.switch_adr = 1;
                m.switch_sel = switch_id;
                m.state = input.input_index;
                self.push(m, format!("SWITCH {expr}"));
                self.switch_infos.push(SwitchInfo {
                    switch_id,
                    start_addr,
                    end_addr: self.block_address[default],
                    input_index: input.input_index,
                });
                Ok(())
            }
            // Data-flow instructions have no hardware counterpart; they
            // become sequencing NOPs so block addresses stay exact.
            other => {
                self.nop(format!("{other}"));
                Ok(())
            }
        }
    }
}

/// A constant if the value literally is one (optimized CFGs rewrite
/// store sources to constants; unoptimized constant writes are constants
/// already).
fn resolve_const(v: &SsaValue) -> Option<SsaValue> {
    match v {
        SsaValue::Const(_) => Some(v.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Assign, Function, SourceProgram, Stmt, TopDecl};
    use crate::{opt, ssa};

    fn source(body: Vec<Stmt>) -> (SourceProgram, HardwareContext) {
        let src = SourceProgram {
            decls: vec![
                TopDecl {
                    name: "LED0".into(),
                    init: Some(0),
                },
                TopDecl {
                    name: "a0".into(),
                    init: None,
                },
            ],
            functions: vec![Function {
                name: "main".into(),
                body,
            }],
        };
        let hw = HardwareContext::infer(&src).unwrap();
        (src, hw)
    }

    fn set_led(v: i64) -> Stmt {
        Stmt::Assign(Assign {
            name: "LED0".into(),
            value: Expr::Num(v),
        })
    }

    #[test]
    fn straight_line_program_validates_and_ends_in_exit() {
        let (src, hw) = source(vec![set_led(1)]);
        let cfg = ssa::build(&src, &hw).unwrap();
        let program = lower(&cfg, &hw).unwrap();

        let entry = &program.codes[0].mcode;
        assert_eq!(entry.state_capture, 1);
        let exit = &program.codes[program.exit_addr()].mcode;
        assert_eq!(exit.forced_jmp, 1);
        assert_eq!(exit.jadr as usize, program.exit_addr());
        assert!(program
            .codes
            .iter()
            .any(|c| c.mcode.state_capture == 1 && c.mcode.mask == 1 && c.mcode.state == 1));
    }

    #[test]
    fn branch_lowers_to_branch_plus_forced_jump() {
        // while (a0) { LED0 = 1; }
        let (src, hw) = source(vec![Stmt::While {
            cond: Expr::Ident("a0".into()),
            body: vec![set_led(1)],
        }]);
        let cfg = ssa::build(&src, &hw).unwrap();
        let program = lower(&cfg, &hw).unwrap();

        let br = program
            .codes
            .iter()
            .position(|c| c.mcode.branch == 1)
            .expect("branch word");
        // Jump-on-false: the branch targets the false (exit) block, the
        // following forced jump takes the true edge.
        let follow = &program.codes[br + 1].mcode;
        assert_eq!(follow.forced_jmp, 1);
        assert_ne!(follow.jadr, program.codes[br].mcode.jadr);
        // Direct input read: aux operand is index + 1.
        assert_eq!(program.codes[br].mcode.state, 1);
        assert_eq!(program.codes[br].mcode.var_sel, 0);
    }

    #[test]
    fn optimized_constant_write_still_reaches_hardware() {
        // x = 2 + 3; LED0 = x;  with the optimizer on.
        let (src, hw) = source(vec![
            Stmt::Assign(Assign {
                name: "x".into(),
                value: Expr::Binary {
                    op: crate::ast::BinOp::Add,
                    lhs: Box::new(Expr::Num(2)),
                    rhs: Box::new(Expr::Num(3)),
                },
            }),
            set_led(1),
        ]);
        let mut cfg = ssa::build(&src, &hw).unwrap();
        let stats = opt::optimize(&mut cfg, &hw);
        assert!(stats.constants_found >= 1);
        let program = lower(&cfg, &hw).unwrap();
        assert!(program
            .codes
            .iter()
            .any(|c| c.mcode.state_capture == 1 && c.mcode.mask == 1));
    }

    #[test]
    fn switch_dispatch_rows_point_at_case_blocks() {
        use crate::ast::{CaseLabel, SwitchArm};
        let (src, hw) = source(vec![Stmt::Switch {
            selector: Expr::Ident("a0".into()),
            arms: vec![
                SwitchArm {
                    label: CaseLabel::Value(0),
                    body: vec![set_led(1), Stmt::Break],
                },
                SwitchArm {
                    label: CaseLabel::Value(1),
                    body: vec![set_led(0), Stmt::Break],
                },
            ],
        }]);
        let cfg = ssa::build(&src, &hw).unwrap();
        let program = lower(&cfg, &hw).unwrap();

        assert_eq!(program.switch_infos.len(), 1);
        let d0 = program.dispatch.get(0, 0);
        let d1 = program.dispatch.get(0, 1);
        assert_ne!(d0, d1);
        // Unnamed selector values fall to the default (the switch exit).
        let dd = program.dispatch.get(0, 7);
        assert_ne!(dd, d0);
        program.validate().unwrap();
    }
}
