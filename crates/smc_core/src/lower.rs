//! AST-direct lowering: the single forward pass from syntax tree to
//! microcode words.
//!
//! The walk keeps a monotonically growing word array (the current address
//! is always the array length), a stack of loop/switch context frames for
//! `break`/`continue`, and a list of pending jumps for every forward
//! address. No sizes are pre-estimated: a word that needs an address it
//! does not know yet is emitted with `jadr = 0` and a pending-jump record,
//! and the resolver rewrites it once the whole program exists. Switch
//! statements additionally populate the dispatch memory as their case
//! markers are placed.

use crate::ast::{Assign, BinOp, Expr, SourceProgram, Stmt, SwitchArm};
use crate::cond::{CondAlloc, CondKind};
use crate::hw::HardwareContext;
use crate::program::{Program, SwitchDispatch, SwitchInfo};
use crate::resolve;
use crate::{CompileError, Result};
use log::{debug, warn};
use smc_common::limits;
use smc_common::mcode::{Code, MCode};

/// Kind of an active loop/switch context frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtxKind {
    While,
    For,
    Switch,
}

/// Where a resolved break should land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakTarget {
    /// Not yet known; filled in when the construct finishes lowering.
    Pending,
    /// A concrete address.
    Addr(usize),
    /// The program's exit word (infinite loops).
    Exit,
}

/// One frame of the loop/switch context stack.
///
/// Frames are pushed on body entry and popped on body exit; the nesting
/// depth always equals the source's static nesting depth. Popped frames
/// stay in the context history with their final targets so pending jumps
/// can resolve against them afterwards.
#[derive(Debug, Clone, Copy)]
pub struct LoopSwitchContext {
    pub kind: CtxKind,
    /// Address `continue` jumps to; None until known (and for switches).
    pub continue_target: Option<usize>,
    /// Address `break` jumps to.
    pub break_target: BreakTarget,
}

/// What a pending jump resolves against.
#[derive(Debug, Clone, Copy)]
pub enum PendingKind {
    /// The program's exit word.
    Exit,
    /// A literal address, patched in by the walk once the target is
    /// emitted. `None` past resolution means the walk lost track of it.
    Direct(Option<usize>),
    /// The break target of the context-history frame at this index.
    Break(usize),
    /// The continue target of the context-history frame at this index.
    Continue(usize),
}

/// A word emitted before its jump target was known.
#[derive(Debug, Clone, Copy)]
pub struct PendingJump {
    /// Address of the word whose `jadr` needs rewriting.
    pub instruction_index: usize,
    pub kind: PendingKind,
}

/// Output of the lowering walk, before address resolution.
#[derive(Debug)]
pub struct Lowered {
    pub program: Program,
    pub pending: Vec<PendingJump>,
    /// Every context frame ever pushed, with finalized targets.
    pub contexts: Vec<LoopSwitchContext>,
    /// Addresses of `break` words whose innermost frame was a switch;
    /// resolved by the interval scan of resolution pass B.
    pub switch_breaks: Vec<usize>,
}

/// Lowers `main` and fully resolves the result.
///
/// Convenience entry combining the walk with both resolution passes; the
/// returned program satisfies every structural invariant (callers may
/// re-check with [`Program::validate`]).
pub fn compile(ast: &SourceProgram, hw: &HardwareContext) -> Result<Program> {
    let mut lowered = lower(ast, hw)?;
    resolve::resolve_pending(&mut lowered)?;
    resolve::resolve_switch_breaks(&mut lowered)?;
    lowered.program.validate()?;
    Ok(lowered.program)
}

/// Runs the lowering walk only, leaving jump targets pending.
pub fn lower(ast: &SourceProgram, hw: &HardwareContext) -> Result<Lowered> {
    let main = ast.main().ok_or_else(|| {
        CompileError::MalformedProgram("no main() function".into())
    })?;

    let mut walk = Walk {
        hw,
        codes: Vec::new(),
        pending: Vec::new(),
        switch_breaks: Vec::new(),
        contexts: Vec::new(),
        stack: Vec::new(),
        cond: CondAlloc::new(),
        dispatch: SwitchDispatch::default(),
        switch_infos: Vec::new(),
        timer_count: 0,
        state_image: hw.initial_state_value(),
    };

    // Word 0 captures the reset pattern of every declared state bit.
    let mut entry = MCode::nop();
    entry.state = hw.initial_state_value();
    entry.mask = hw.initial_mask();
    entry.state_capture = 1;
    walk.push(entry, "main");

    walk.stmts(&main.body)?;

    // The :exit self-loop halts the engine; breaks out of infinite loops
    // and `return` both land here.
    let exit_addr = walk.cur();
    let mut exit = MCode::nop();
    exit.forced_jmp = 1;
    exit.jadr = exit_addr as u32;
    walk.push(exit, ":exit");

    debug_assert!(walk.stack.is_empty(), "context stack unbalanced");

    if walk.codes.len() > 1 << limits::MAX_JADR_BITS {
        return Err(CompileError::CapacityExceeded(format!(
            "{} words exceed the {}-bit address space",
            walk.codes.len(),
            limits::MAX_JADR_BITS
        )));
    }

    let program = Program {
        codes: walk.codes,
        switch_infos: walk.switch_infos,
        dispatch: walk.dispatch,
        lut: walk.cond.build_lut(hw),
        timer_count: walk.timer_count,
        var_sel_masks: walk.cond.dependence_masks(hw),
    };

    Ok(Lowered {
        program,
        pending: walk.pending,
        contexts: walk.contexts,
        switch_breaks: walk.switch_breaks,
    })
}

struct Walk<'a> {
    hw: &'a HardwareContext,
    codes: Vec<Code>,
    pending: Vec<PendingJump>,
    switch_breaks: Vec<usize>,
    contexts: Vec<LoopSwitchContext>,
    stack: Vec<usize>,
    cond: CondAlloc,
    dispatch: SwitchDispatch,
    switch_infos: Vec<SwitchInfo>,
    timer_count: usize,
    state_image: u32,
}

impl<'a> Walk<'a> {
    /// The next address to be emitted (= current word count).
    fn cur(&self) -> usize {
        self.codes.len()
    }

    fn push(&mut self, mcode: MCode, label: impl Into<String>) -> usize {
        let addr = self.codes.len();
        let code = Code::new(mcode, label);
        debug!("[{addr:3}] {}", code.label_str());
        self.codes.push(code);
        addr
    }

    /// Registers a pending jump for the word at `addr` and returns its
    /// index for later patching.
    fn pend(&mut self, addr: usize, kind: PendingKind) -> usize {
        self.pending.push(PendingJump {
            instruction_index: addr,
            kind,
        });
        self.pending.len() - 1
    }

    fn patch_direct(&mut self, pending_idx: usize, target: usize) {
        self.pending[pending_idx].kind = PendingKind::Direct(Some(target));
    }

    fn push_ctx(&mut self, ctx: LoopSwitchContext) -> usize {
        self.contexts.push(ctx);
        let idx = self.contexts.len() - 1;
        self.stack.push(idx);
        idx
    }

    fn pop_ctx(&mut self) {
        let popped = self.stack.pop();
        if popped.is_none() {
            warn!("popping an empty context stack");
        }
    }

    fn stmts(&mut self, body: &[Stmt]) -> Result<()> {
        for stmt in body {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Assign(a) => self.assigns(std::slice::from_ref(a)),
            Stmt::CommaAssign(list) => self.assigns(list),
            Stmt::Expr(e) => {
                warn!("expression statement '{e}' has no effect and is dropped");
                Ok(())
            }
            Stmt::Decl { name, .. } => {
                warn!("local declaration '{name}' is only observable through the SSA pipeline");
                Ok(())
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => self.if_stmt(cond, then_body, else_body.as_deref()),
            Stmt::While { cond, body } => self.while_stmt(cond, body),
            Stmt::For {
                init,
                cond,
                update,
                body,
            } => self.for_stmt(init.as_deref(), cond.as_ref(), update.as_deref(), body),
            Stmt::Switch { selector, arms } => self.switch_stmt(selector, arms),
            Stmt::Break => self.break_stmt(),
            Stmt::Continue => self.continue_stmt(),
            Stmt::Return(_) => {
                let mut m = MCode::nop();
                m.forced_jmp = 1;
                let addr = self.push(m, "return");
                self.pend(addr, PendingKind::Exit);
                Ok(())
            }
            Stmt::Block(body) => self.stmts(body),
        }
    }

    /// Folds one or more comma-separated state assignments into a single
    /// capture word with final-value semantics.
    fn assigns(&mut self, list: &[Assign]) -> Result<()> {
        let mut mask = 0u32;
        let mut label = String::new();
        for a in list {
            let Some(sv) = self.hw.state(&a.name) else {
                warn!(
                    "assignment to '{}' does not drive a state bit and is dropped",
                    a.name
                );
                continue;
            };
            let Some(value @ (0 | 1)) = a.value.as_const() else {
                return Err(CompileError::UnsupportedConstruct(format!(
                    "state assignment '{} = {}' must assign the literal 0 or 1",
                    a.name, a.value
                )));
            };
            let bit = 1u32 << sv.bit_index;
            self.state_image = (self.state_image & !bit) | ((value as u32) << sv.bit_index);
            mask |= bit;
            if !label.is_empty() {
                label.push_str(", ");
            }
            label.push_str(&format!("{} = {}", a.name, value));
        }

        if mask == 0 {
            return Ok(());
        }

        let mut m = MCode::nop();
        m.state = self.state_image & mask;
        m.mask = mask;
        m.state_capture = 1;
        self.push(m, label);
        Ok(())
    }

    /// Builds the condition word for a branch, per the hybrid policy.
    ///
    /// Returns `None` for a constant-false condition, which callers encode
    /// as an unconditional jump instead. The returned word jumps to `jadr`
    /// when the condition is false.
    fn cond_word(&mut self, cond: &Expr) -> Result<Option<MCode>> {
        let mut m = MCode::nop();
        m.branch = 1;
        match self.cond.classify(cond, self.hw)? {
            CondKind::ConstTrue => {}
            CondKind::ConstFalse => return Ok(None),
            CondKind::DirectInput(idx) => {
                // Direct reads carry index + 1; 0 means constant true.
                m.state = idx + 1;
            }
            CondKind::Lut(var_sel) => m.var_sel = var_sel,
        }
        Ok(Some(m))
    }

    fn if_stmt(
        &mut self,
        cond: &Expr,
        then_body: &[Stmt],
        else_body: Option<&[Stmt]>,
    ) -> Result<()> {
        let label = format!("if ({cond})");
        let cond_pending = match self.cond_word(cond)? {
            Some(m) => {
                let addr = self.push(m, label);
                self.pend(addr, PendingKind::Direct(None))
            }
            None => {
                // if (0): the then branch is skipped unconditionally but
                // still lowered so diagnostics keep their shape.
                let mut m = MCode::nop();
                m.forced_jmp = 1;
                let addr = self.push(m, label);
                self.pend(addr, PendingKind::Direct(None))
            }
        };

        self.stmts(then_body)?;

        match else_body {
            None => {
                let after = self.cur();
                self.patch_direct(cond_pending, after);
            }
            Some(else_body) => {
                let mut skip = MCode::nop();
                skip.forced_jmp = 1;
                let skip_addr = self.push(skip, "else");
                let skip_pending = self.pend(skip_addr, PendingKind::Direct(None));

                let else_start = self.cur();
                self.patch_direct(cond_pending, else_start);
                self.stmts(else_body)?;

                let after = self.cur();
                self.patch_direct(skip_pending, after);
            }
        }
        Ok(())
    }

    fn while_stmt(&mut self, cond: &Expr, body: &[Stmt]) -> Result<()> {
        let header = self.cur();
        let infinite = matches!(cond.as_const(), Some(1));
        let ctx_idx = self.push_ctx(LoopSwitchContext {
            kind: CtxKind::While,
            continue_target: Some(header),
            break_target: if infinite {
                BreakTarget::Exit
            } else {
                BreakTarget::Pending
            },
        });

        let label = format!("while ({cond})");
        match self.cond_word(cond)? {
            Some(m) => {
                let addr = self.push(m, label);
                // The header's false branch is exactly the break target:
                // the word after the loop, or the exit for while (1).
                if infinite {
                    self.pend(addr, PendingKind::Exit);
                } else {
                    self.pend(addr, PendingKind::Break(ctx_idx));
                }
            }
            None => {
                // while (0): never entered; jump straight past the body.
                let mut m = MCode::nop();
                m.forced_jmp = 1;
                let addr = self.push(m, label);
                self.pend(addr, PendingKind::Break(ctx_idx));
            }
        }

        self.stmts(body)?;

        let mut back = MCode::nop();
        back.forced_jmp = 1;
        let back_addr = self.push(back, "loop");
        self.pend(back_addr, PendingKind::Continue(ctx_idx));

        self.pop_ctx();
        if !infinite {
            self.contexts[ctx_idx].break_target = BreakTarget::Addr(self.cur());
        }
        Ok(())
    }

    fn for_stmt(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        update: Option<&Stmt>,
        body: &[Stmt],
    ) -> Result<()> {
        if self.timer_count >= limits::MAX_TIMERS {
            return Err(CompileError::CapacityExceeded(format!(
                "more than {} for loops (one hardware timer each)",
                limits::MAX_TIMERS
            )));
        }
        let timer = self.timer_count;
        self.timer_count += 1;

        if let Some(count) = self.induction_count(init, cond, update) {
            return self.timer_for(timer, count, body);
        }

        if let Some(init) = init {
            self.stmt(init)?;
        }

        let header = self.cur();
        let cond_one = Expr::Num(1);
        let cond = cond.unwrap_or(&cond_one);
        let infinite = matches!(cond.as_const(), Some(1));
        let ctx_idx = self.push_ctx(LoopSwitchContext {
            kind: CtxKind::For,
            // `continue` re-enters at the update expression; patched below
            // once the update's address exists.
            continue_target: if update.is_some() { None } else { Some(header) },
            break_target: if infinite {
                BreakTarget::Exit
            } else {
                BreakTarget::Pending
            },
        });

        let label = format!("for ({cond})");
        match self.cond_word(cond)? {
            Some(m) => {
                let addr = self.push(m, label);
                if infinite {
                    self.pend(addr, PendingKind::Exit);
                } else {
                    self.pend(addr, PendingKind::Break(ctx_idx));
                }
            }
            None => {
                let mut m = MCode::nop();
                m.forced_jmp = 1;
                let addr = self.push(m, label);
                self.pend(addr, PendingKind::Break(ctx_idx));
            }
        }

        self.stmts(body)?;

        if let Some(update) = update {
            let update_addr = self.cur();
            self.contexts[ctx_idx].continue_target = Some(update_addr);
            self.stmt(update)?;
        }

        let mut back = MCode::nop();
        back.forced_jmp = 1;
        let back_addr = self.push(back, "loop");
        // The back edge re-tests the condition, not the update.
        self.pending.push(PendingJump {
            instruction_index: back_addr,
            kind: PendingKind::Direct(Some(header)),
        });

        self.pop_ctx();
        if !infinite {
            self.contexts[ctx_idx].break_target = BreakTarget::Addr(self.cur());
        }
        Ok(())
    }

    /// Recognizes the counted induction form `for (i = c; i < n; i = ...)`
    /// over a non-hardware name and returns the iteration count.
    fn induction_count(
        &self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        update: Option<&Stmt>,
    ) -> Option<u32> {
        let (name, start) = match init? {
            Stmt::Assign(Assign { name, value }) | Stmt::Decl {
                name,
                init: Some(value),
            } => (name, value.as_const()?),
            _ => return None,
        };
        if self.hw.is_state(name) || self.hw.is_input(name) {
            return None;
        }
        let Expr::Binary { op, lhs, rhs } = cond? else {
            return None;
        };
        if lhs.as_ident() != Some(name) {
            return None;
        }
        let limit = rhs.as_const()?;
        let iterations = match op {
            BinOp::Lt => limit - start,
            BinOp::Le => limit - start + 1,
            _ => return None,
        };
        match update? {
            Stmt::Assign(Assign { name: un, .. }) if un == name => {}
            _ => return None,
        }
        u32::try_from(iterations.max(0)).ok()
    }

    /// Lowers a counted loop onto a hardware timer: arm, test, body, back
    /// edge. The induction update is the timer's own tick.
    fn timer_for(&mut self, timer: usize, count: u32, body: &[Stmt]) -> Result<()> {
        let mut arm = MCode::nop();
        arm.timer_ld = 1;
        arm.timer_sel = timer as u32;
        arm.state = count;
        self.push(arm, format!("timer {timer} <- {count}"));

        let header = self.cur();
        let ctx_idx = self.push_ctx(LoopSwitchContext {
            kind: CtxKind::For,
            continue_target: Some(header),
            break_target: BreakTarget::Pending,
        });

        let mut test = MCode::nop();
        test.branch = 1;
        test.var_or_timer = 1;
        test.timer_sel = timer as u32;
        let test_addr = self.push(test, format!("for (timer {timer})"));
        self.pend(test_addr, PendingKind::Break(ctx_idx));

        self.stmts(body)?;

        let mut back = MCode::nop();
        back.forced_jmp = 1;
        let back_addr = self.push(back, "loop");
        self.pend(back_addr, PendingKind::Continue(ctx_idx));

        self.pop_ctx();
        self.contexts[ctx_idx].break_target = BreakTarget::Addr(self.cur());
        Ok(())
    }

    fn switch_stmt(&mut self, selector: &Expr, arms: &[SwitchArm]) -> Result<()> {
        let Some(name) = selector.as_ident() else {
            return Err(CompileError::UnsupportedConstruct(format!(
                "switch selector '{selector}' must be an input variable"
            )));
        };
        let Some(input) = self.hw.input(name) else {
            return Err(CompileError::UnsupportedConstruct(format!(
                "switch selector '{name}' is not an input variable"
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

        let mut sel = MCode::nop();
        sel.switch_adr = 1;
        sel.switch_sel = switch_id;
        sel.state = input.input_index;
        let start_addr = self.push(sel, format!("SWITCH {name}"));

        let ctx_idx = self.push_ctx(LoopSwitchContext {
            kind: CtxKind::Switch,
            continue_target: None,
            break_target: BreakTarget::Pending,
        });

        let mut default_addr = None;
        for arm in arms {
            let marker_addr = self.cur();
            match arm.label {
                crate::ast::CaseLabel::Value(v) => {
                    self.push(MCode::nop(), format!("CASE {v}"));
                    self.dispatch.set_case(switch_id, v, marker_addr)?;
                }
                crate::ast::CaseLabel::Default => {
                    self.push(MCode::nop(), "DEFAULT");
                    default_addr = Some(marker_addr);
                }
            }
            self.stmts(&arm.body)?;
        }

        let closing_addr = self.push(MCode::nop(), "}}");
        let end_addr = closing_addr + 1;

        self.dispatch
            .finalize_row(switch_id, default_addr.unwrap_or(end_addr));
        self.switch_infos.push(SwitchInfo {
            switch_id,
            start_addr,
            end_addr,
            input_index: input.input_index,
        });

        self.pop_ctx();
        self.contexts[ctx_idx].break_target = BreakTarget::Addr(end_addr);
        Ok(())
    }

    fn break_stmt(&mut self) -> Result<()> {
        let &ctx_idx = self.stack.last().ok_or(CompileError::BreakOutsideLoop)?;
        let mut m = MCode::nop();
        m.forced_jmp = 1;
        let addr = self.push(m, "break");

        if self.contexts[ctx_idx].kind == CtxKind::Switch {
            if self.switch_breaks.len() >= limits::MAX_SWITCH_BREAKS {
                return Err(CompileError::CapacityExceeded(format!(
                    "more than {} breaks inside switches",
                    limits::MAX_SWITCH_BREAKS
                )));
            }
            self.switch_breaks.push(addr);
        } else {
            self.pend(addr, PendingKind::Break(ctx_idx));
        }
        Ok(())
    }

    fn continue_stmt(&mut self) -> Result<()> {
        // continue binds to the innermost loop; switch frames are skipped.
        let ctx_idx = self
            .stack
            .iter()
            .rev()
            .copied()
            .find(|&i| self.contexts[i].kind != CtxKind::Switch)
            .ok_or(CompileError::ContinueOutsideLoop)?;

        let mut m = MCode::nop();
        m.forced_jmp = 1;
        let addr = self.push(m, "continue");
        self.pend(addr, PendingKind::Continue(ctx_idx));
        Ok(())
    }
}
