//! SSA construction: the alternative front-end.
//!
//! Converts the same AST the direct walk consumes into a CFG of basic
//! blocks holding versioned SSA instructions, with phi nodes at join
//! points. Variable versions are tracked through a scope stack: entering
//! a block pushes a scope, popping removes the names declared there, and
//! a shadowed declaration gets a fresh version without disturbing the
//! outer binding. Version numbers themselves are globally monotonic per
//! name. State-variable writes become `Store` instructions so later
//! passes can tell hardware effects from plain data flow; input reads
//! become `Load`s into temporaries.

use crate::ast::{Assign, BinOp, CaseLabel, Expr, SourceProgram, Stmt, SwitchArm, UnOp};
use crate::cfg::{BlockId, Cfg};
use crate::hw::HardwareContext;
use crate::{CompileError, Result};
use std::collections::HashMap;
use std::fmt;

/// An SSA value: a versioned variable, a constant, or a temporary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SsaValue {
    Var { name: String, version: u32 },
    Const(i64),
    Temp(u32),
}

impl SsaValue {
    pub fn var(name: &str, version: u32) -> Self {
        SsaValue::Var {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for SsaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SsaValue::Var { name, version } => write!(f, "{name}.{version}"),
            SsaValue::Const(n) => write!(f, "{n}"),
            SsaValue::Temp(id) => write!(f, "t{id}"),
        }
    }
}

/// A phi node merging one value per predecessor edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Phi {
    pub dest: SsaValue,
    /// (predecessor block, value at the end of that block).
    pub args: Vec<(BlockId, SsaValue)>,
}

impl fmt::Display for Phi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = phi", self.dest)?;
        for (i, (blk, val)) in self.args.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}[b{blk}: {val}]")?;
        }
        Ok(())
    }
}

/// SSA instruction kinds.
///
/// `Call` never leaves the builder today (the language has no calls) but
/// is part of the instruction set; the optimizer treats it as
/// side-effecting if it ever appears.
#[derive(Debug, Clone, PartialEq)]
pub enum SsaInstr {
    /// Plain data move to a fresh version.
    Assign { dest: SsaValue, src: SsaValue },
    BinaryOp {
        dest: SsaValue,
        op: BinOp,
        lhs: SsaValue,
        rhs: SsaValue,
    },
    UnaryOp {
        dest: SsaValue,
        op: UnOp,
        operand: SsaValue,
    },
    /// Read of a hardware input into a temporary.
    Load { dest: SsaValue, input: String },
    /// Write of a hardware state bit; `version` is the fresh SSA version
    /// of the state name so later reads see this write.
    Store {
        state: String,
        version: u32,
        src: SsaValue,
    },
    Call { name: String, args: Vec<SsaValue> },
    Return,
    Branch {
        cond: SsaValue,
        then_blk: BlockId,
        else_blk: BlockId,
    },
    Jump(BlockId),
    Switch {
        selector: SsaValue,
        cases: Vec<(i64, BlockId)>,
        default: BlockId,
    },
}

impl SsaInstr {
    /// Whether this instruction ends a block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            SsaInstr::Return | SsaInstr::Branch { .. } | SsaInstr::Jump(_) | SsaInstr::Switch { .. }
        )
    }

    /// The value this instruction defines, if any.
    pub fn dest(&self) -> Option<&SsaValue> {
        match self {
            SsaInstr::Assign { dest, .. }
            | SsaInstr::BinaryOp { dest, .. }
            | SsaInstr::UnaryOp { dest, .. }
            | SsaInstr::Load { dest, .. } => Some(dest),
            _ => None,
        }
    }

    /// Whether removing this instruction could change hardware behavior.
    pub fn has_side_effect(&self) -> bool {
        matches!(
            self,
            SsaInstr::Store { .. }
                | SsaInstr::Call { .. }
                | SsaInstr::Return
                | SsaInstr::Branch { .. }
                | SsaInstr::Jump(_)
                | SsaInstr::Switch { .. }
        )
    }
}

impl fmt::Display for SsaInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SsaInstr::Assign { dest, src } => write!(f, "{dest} = {src}"),
            SsaInstr::BinaryOp { dest, op, lhs, rhs } => {
                write!(f, "{dest} = {lhs} {op} {rhs}")
            }
            SsaInstr::UnaryOp { dest, op, operand } => write!(f, "{dest} = {op}{operand}"),
            SsaInstr::Load { dest, input } => write!(f, "{dest} = load {input}"),
            SsaInstr::Store {
                state,
                version,
                src,
            } => write!(f, "store {state}.{version} <- {src}"),
            SsaInstr::Call { name, args } => {
                write!(f, "call {name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            SsaInstr::Return => write!(f, "return"),
            SsaInstr::Branch {
                cond,
                then_blk,
                else_blk,
            } => write!(f, "br {cond} ? b{then_blk} : b{else_blk}"),
            SsaInstr::Jump(blk) => write!(f, "jmp b{blk}"),
            SsaInstr::Switch {
                selector,
                cases,
                default,
            } => {
                write!(f, "switch {selector}")?;
                for (v, blk) in cases {
                    write!(f, " [{v}: b{blk}]")?;
                }
                write!(f, " [default: b{default}]")
            }
        }
    }
}

/// Builds the CFG+SSA form of `main` and annotates dominators.
pub fn build(ast: &SourceProgram, hw: &HardwareContext) -> Result<Cfg> {
    let main = ast
        .main()
        .ok_or_else(|| CompileError::MalformedProgram("no main() function".into()))?;

    let mut b = Builder {
        hw,
        cfg: Cfg::default(),
        cur: 0,
        scopes: Vec::new(),
        max_version: HashMap::new(),
        temp_counter: 0,
        end_maps: HashMap::new(),
        loops: Vec::new(),
    };

    let entry = b.cfg.add_block("entry");
    let exit = b.cfg.add_block("exit");
    b.cfg.entry = entry;
    b.cfg.exit = exit;
    b.cur = entry;

    // The outermost scope binds every state variable at version 0.
    let mut global = HashMap::new();
    for s in &hw.states {
        global.insert(s.name.clone(), 0);
    }
    b.scopes.push(global);

    b.stmts(&main.body)?;
    b.terminate(SsaInstr::Jump(exit));
    b.cfg.add_edge(b.cur, exit);

    b.cur = exit;
    b.terminate(SsaInstr::Return);

    b.cfg.compute_dominators();
    b.cfg.compute_dominance_frontiers();
    Ok(b.cfg)
}

struct LoopCtx {
    /// Where `continue` goes (loop header or update block); None inside a
    /// switch frame.
    continue_blk: Option<BlockId>,
    /// Where `break` goes.
    break_blk: BlockId,
}

struct Builder<'a> {
    hw: &'a HardwareContext,
    cfg: Cfg,
    cur: BlockId,
    scopes: Vec<HashMap<String, u32>>,
    max_version: HashMap<String, u32>,
    temp_counter: u32,
    /// Flattened variable map at the point each block was terminated.
    end_maps: HashMap<BlockId, HashMap<String, u32>>,
    loops: Vec<LoopCtx>,
}

impl<'a> Builder<'a> {
    fn fresh_temp(&mut self) -> SsaValue {
        let t = self.temp_counter;
        self.temp_counter += 1;
        SsaValue::Temp(t)
    }

    /// Next version for `name`; versions grow monotonically across all
    /// scopes so two bindings never collide.
    fn bump(&mut self, name: &str) -> u32 {
        let v = self.max_version.entry(name.to_string()).or_insert(0);
        *v += 1;
        *v
    }

    /// Current version of `name`: top-of-stack scope first, falling
    /// outward; unknown names bind at version 0 in the outermost scope.
    fn get_version(&mut self, name: &str) -> u32 {
        for scope in self.scopes.iter().rev() {
            if let Some(&v) = scope.get(name) {
                return v;
            }
        }
        self.scopes[0].insert(name.to_string(), 0);
        0
    }

    /// Rebinds `name` in the scope that currently holds it.
    fn set_version(&mut self, name: &str, version: u32) {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(name) {
                *slot = version;
                return;
            }
        }
        self.scopes[0].insert(name.to_string(), version);
    }

    /// The variable map as seen from the current scope stack.
    fn flatten(&self) -> HashMap<String, u32> {
        let mut map = HashMap::new();
        for scope in &self.scopes {
            for (k, &v) in scope {
                map.insert(k.clone(), v);
            }
        }
        map
    }

    fn emit(&mut self, instr: SsaInstr) {
        self.cfg.blocks[self.cur].instrs.push(instr);
    }

    /// Seals the current block with a terminator and snapshots its
    /// variable map for later phi construction.
    fn terminate(&mut self, term: SsaInstr) {
        let snapshot = self.flatten();
        let block = &mut self.cfg.blocks[self.cur];
        if block.terminator().is_none() {
            block.instrs.push(term);
        }
        self.end_maps.entry(self.cur).or_insert(snapshot);
    }

    /// Creates phis in `block` for every name whose version differs among
    /// the already-terminated predecessors, and updates the current map.
    fn make_phis(&mut self, block: BlockId) {
        let preds = self.cfg.blocks[block].preds.clone();
        if preds.len() < 2 {
            if let Some(&p) = preds.first() {
                if let Some(map) = self.end_maps.get(&p).cloned() {
                    for (name, v) in map {
                        self.set_version(&name, v);
                    }
                }
            }
            return;
        }

        let mut names: Vec<String> = Vec::new();
        for p in &preds {
            if let Some(map) = self.end_maps.get(p) {
                for name in map.keys() {
                    if !names.contains(name) {
                        names.push(name.clone());
                    }
                }
            }
        }
        names.sort();

        for name in names {
            let versions: Vec<u32> = preds
                .iter()
                .map(|p| {
                    self.end_maps
                        .get(p)
                        .and_then(|m| m.get(&name))
                        .copied()
                        .unwrap_or(0)
                })
                .collect();
            if versions.windows(2).all(|w| w[0] == w[1]) {
                self.set_version(&name, versions[0]);
                continue;
            }
            let fresh = self.bump(&name);
            let args = preds
                .iter()
                .zip(&versions)
                .map(|(&p, &v)| (p, SsaValue::var(&name, v)))
                .collect();
            self.cfg.blocks[block].phis.push(Phi {
                dest: SsaValue::var(&name, fresh),
                args,
            });
            self.set_version(&name, fresh);
        }
    }

    fn stmts(&mut self, body: &[Stmt]) -> Result<()> {
        for stmt in body {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    /// Lowers a construct body in its own scope, so declarations inside
    /// it disappear when the construct ends.
    fn stmts_scoped(&mut self, body: &[Stmt]) -> Result<()> {
        self.scopes.push(HashMap::new());
        let result = self.stmts(body);
        self.scopes.pop();
        result
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Assign(a) => self.assign(a),
            Stmt::CommaAssign(list) => {
                for a in list {
                    self.assign(a)?;
                }
                Ok(())
            }
            Stmt::Expr(e) => {
                // Evaluated for effect-free completeness, then unused.
                let _ = self.expr(e)?;
                Ok(())
            }
            Stmt::Decl { name, init } => {
                let value = match init {
                    Some(e) => self.expr(e)?,
                    None => SsaValue::Const(0),
                };
                let version = self.bump(name);
                let scope = self.scopes.last_mut().expect("scope stack empty");
                scope.insert(name.clone(), version);
                self.emit(SsaInstr::Assign {
                    dest: SsaValue::var(name, version),
                    src: value,
                });
                Ok(())
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => self.if_stmt(cond, then_body, else_body.as_deref()),
            Stmt::While { cond, body } => self.loop_stmt(Some(cond), None, body),
            Stmt::For {
                init,
                cond,
                update,
                body,
            } => {
                if let Some(init) = init {
                    self.stmt(init)?;
                }
                self.loop_stmt(cond.as_ref(), update.as_deref(), body)
            }
            Stmt::Switch { selector, arms } => self.switch_stmt(selector, arms),
            Stmt::Break => {
                let target = self
                    .loops
                    .last()
                    .map(|l| l.break_blk)
                    .ok_or(CompileError::BreakOutsideLoop)?;
                self.jump_and_detach(target, "after.break");
                Ok(())
            }
            Stmt::Continue => {
                let target = self
                    .loops
                    .iter()
                    .rev()
                    .find_map(|l| l.continue_blk)
                    .ok_or(CompileError::ContinueOutsideLoop)?;
                self.jump_and_detach(target, "after.continue");
                Ok(())
            }
            Stmt::Return(_) => {
                let exit = self.cfg.exit;
                self.jump_and_detach(exit, "after.return");
                Ok(())
            }
            Stmt::Block(body) => {
                self.scopes.push(HashMap::new());
                let r = self.stmts(body);
                self.scopes.pop();
                r
            }
        }
    }

    /// Terminates the current block with a jump and continues building in
    /// a fresh, unreachable block (statements after break/continue/return).
    fn jump_and_detach(&mut self, target: BlockId, label: &str) {
        self.terminate(SsaInstr::Jump(target));
        self.cfg.add_edge(self.cur, target);
        self.cur = self.cfg.add_block(label);
    }

    fn assign(&mut self, a: &Assign) -> Result<()> {
        let value = self.expr(&a.value)?;
        let version = self.bump(&a.name);
        if self.hw.is_state(&a.name) {
            self.emit(SsaInstr::Store {
                state: a.name.clone(),
                version,
                src: value,
            });
        } else {
            self.emit(SsaInstr::Assign {
                dest: SsaValue::var(&a.name, version),
                src: value,
            });
        }
        self.set_version(&a.name, version);
        Ok(())
    }

    fn expr(&mut self, e: &Expr) -> Result<SsaValue> {
        match e {
            Expr::Num(n) => Ok(SsaValue::Const(*n)),
            Expr::Ident(name) => {
                if self.hw.is_input(name) {
                    let dest = self.fresh_temp();
                    self.emit(SsaInstr::Load {
                        dest: dest.clone(),
                        input: name.clone(),
                    });
                    Ok(dest)
                } else {
                    let version = self.get_version(name);
                    Ok(SsaValue::var(name, version))
                }
            }
            Expr::Unary { op, operand } => {
                let operand = self.expr(operand)?;
                let dest = self.fresh_temp();
                self.emit(SsaInstr::UnaryOp {
                    dest: dest.clone(),
                    op: *op,
                    operand,
                });
                Ok(dest)
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.expr(lhs)?;
                let rhs = self.expr(rhs)?;
                let dest = self.fresh_temp();
                self.emit(SsaInstr::BinaryOp {
                    dest: dest.clone(),
                    op: *op,
                    lhs,
                    rhs,
                });
                Ok(dest)
            }
        }
    }

    fn if_stmt(
        &mut self,
        cond: &Expr,
        then_body: &[Stmt],
        else_body: Option<&[Stmt]>,
    ) -> Result<()> {
        let cond_val = self.expr(cond)?;
        let then_blk = self.cfg.add_block("if.then");
        let merge_blk = self.cfg.add_block("if.merge");
        let else_blk = match else_body {
            Some(_) => self.cfg.add_block("if.else"),
            None => merge_blk,
        };

        self.terminate(SsaInstr::Branch {
            cond: cond_val,
            then_blk,
            else_blk,
        });
        self.cfg.add_edge(self.cur, then_blk);
        self.cfg.add_edge(self.cur, else_blk);

        let before = self.flatten();

        self.cur = then_blk;
        self.stmts_scoped(then_body)?;
        self.terminate(SsaInstr::Jump(merge_blk));
        self.cfg.add_edge(self.cur, merge_blk);

        if let Some(else_body) = else_body {
            // The else arm starts from the pre-branch variable map.
            for (name, v) in &before {
                self.set_version(name, *v);
            }
            self.cur = else_blk;
            self.stmts_scoped(else_body)?;
            self.terminate(SsaInstr::Jump(merge_blk));
            self.cfg.add_edge(self.cur, merge_blk);
        }

        self.cur = merge_blk;
        self.make_phis(merge_blk);
        Ok(())
    }

    /// Shared loop construction for `while` and the general `for` form.
    fn loop_stmt(
        &mut self,
        cond: Option<&Expr>,
        update: Option<&Stmt>,
        body: &[Stmt],
    ) -> Result<()> {
        let header = self.cfg.add_block("loop.header");
        let body_blk = self.cfg.add_block("loop.body");
        let update_blk = update.map(|_| self.cfg.add_block("loop.update"));
        let exit_blk = self.cfg.add_block("loop.exit");

        self.terminate(SsaInstr::Jump(header));
        self.cfg.add_edge(self.cur, header);

        // Names assigned anywhere in the loop need loop-carried phis at
        // the header; created with the preheader operand now, back-edge
        // operands filled in after the latch is sealed.
        let mut assigned = Vec::new();
        collect_assigned(body, &mut assigned);
        if let Some(u) = update {
            collect_assigned(std::slice::from_ref(u), &mut assigned);
        }

        let mut header_phi_names = Vec::new();
        for name in assigned {
            // Only names already visible outside the loop carry values
            // around the back edge.
            let visible = self.scopes.iter().any(|s| s.contains_key(&name));
            if !visible {
                continue;
            }
            let old = self.get_version(&name);
            let fresh = self.bump(&name);
            self.cfg.blocks[header].phis.push(Phi {
                dest: SsaValue::var(&name, fresh),
                args: vec![(self.cur, SsaValue::var(&name, old))],
            });
            self.set_version(&name, fresh);
            header_phi_names.push(name);
        }

        self.cur = header;
        let cond_one = Expr::Num(1);
        let cond_val = self.expr(cond.unwrap_or(&cond_one))?;
        self.terminate(SsaInstr::Branch {
            cond: cond_val,
            then_blk: body_blk,
            else_blk: exit_blk,
        });
        self.cfg.add_edge(header, body_blk);
        self.cfg.add_edge(header, exit_blk);

        self.loops.push(LoopCtx {
            continue_blk: Some(update_blk.unwrap_or(header)),
            break_blk: exit_blk,
        });

        self.cur = body_blk;
        self.stmts_scoped(body)?;

        if let Some(u) = update_blk {
            self.terminate(SsaInstr::Jump(u));
            self.cfg.add_edge(self.cur, u);
            self.cur = u;
            if let Some(update) = update {
                self.stmt(update)?;
            }
        }
        self.terminate(SsaInstr::Jump(header));
        self.cfg.add_edge(self.cur, header);

        self.loops.pop();

        // Fill the remaining header phi operands, one per predecessor
        // edge added while the body was built (latch and continues).
        for name in &header_phi_names {
            let preds = self.cfg.blocks[header].preds.clone();
            let phi_idx = self.cfg.blocks[header]
                .phis
                .iter()
                .position(|p| matches!(&p.dest, SsaValue::Var { name: n, .. } if n == name))
                .expect("header phi vanished");
            for p in preds {
                let already = self.cfg.blocks[header].phis[phi_idx]
                    .args
                    .iter()
                    .any(|(blk, _)| *blk == p);
                if already {
                    continue;
                }
                let version = self
                    .end_maps
                    .get(&p)
                    .and_then(|m| m.get(name))
                    .copied()
                    .unwrap_or(0);
                self.cfg.blocks[header].phis[phi_idx]
                    .args
                    .push((p, SsaValue::var(name, version)));
            }
        }

        self.cur = exit_blk;
        self.make_phis(exit_blk);
        Ok(())
    }

    fn switch_stmt(&mut self, selector: &Expr, arms: &[SwitchArm]) -> Result<()> {
        let selector_val = self.expr(selector)?;
        let exit_blk = self.cfg.add_block("switch.exit");

        let arm_blocks: Vec<BlockId> = arms
            .iter()
            .map(|arm| match arm.label {
                CaseLabel::Value(v) => self.cfg.add_block(format!("case.{v}")),
                CaseLabel::Default => self.cfg.add_block("case.default"),
            })
            .collect();

        let mut cases = Vec::new();
        let mut default = exit_blk;
        for (arm, &blk) in arms.iter().zip(&arm_blocks) {
            match arm.label {
                CaseLabel::Value(v) => cases.push((v, blk)),
                CaseLabel::Default => default = blk,
            }
        }

        self.terminate(SsaInstr::Switch {
            selector: selector_val,
            cases: cases.clone(),
            default,
        });
        let sel_blk = self.cur;
        for &blk in &arm_blocks {
            self.cfg.add_edge(sel_blk, blk);
        }
        if default == exit_blk {
            self.cfg.add_edge(sel_blk, exit_blk);
        }

        self.loops.push(LoopCtx {
            continue_blk: None,
            break_blk: exit_blk,
        });

        // Arms fall through to the next arm, C style; the last falls to
        // the switch exit.
        for (i, (arm, &blk)) in arms.iter().zip(&arm_blocks).enumerate() {
            self.cur = blk;
            self.make_phis(blk);
            self.stmts_scoped(&arm.body)?;
            let next = arm_blocks.get(i + 1).copied().unwrap_or(exit_blk);
            self.terminate(SsaInstr::Jump(next));
            self.cfg.add_edge(self.cur, next);
        }

        self.loops.pop();
        self.cur = exit_blk;
        self.make_phis(exit_blk);
        Ok(())
    }
}

/// Syntactic scan for every name assigned or declared in a statement list.
fn collect_assigned(body: &[Stmt], out: &mut Vec<String>) {
    let mut push = |name: &String, out: &mut Vec<String>| {
        if !out.contains(name) {
            out.push(name.clone());
        }
    };
    for stmt in body {
        match stmt {
            Stmt::Assign(a) => push(&a.name, out),
            Stmt::CommaAssign(list) => {
                for a in list {
                    push(&a.name, out);
                }
            }
            Stmt::Decl { name, .. } => push(name, out),
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                collect_assigned(then_body, out);
                if let Some(e) = else_body {
                    collect_assigned(e, out);
                }
            }
            Stmt::While { body, .. } => collect_assigned(body, out),
            Stmt::For {
                init, update, body, ..
            } => {
                if let Some(i) = init {
                    collect_assigned(std::slice::from_ref(i), out);
                }
                if let Some(u) = update {
                    collect_assigned(std::slice::from_ref(u), out);
                }
                collect_assigned(body, out);
            }
            Stmt::Switch { arms, .. } => {
                for arm in arms {
                    collect_assigned(&arm.body, out);
                }
            }
            Stmt::Block(body) => collect_assigned(body, out),
            Stmt::Expr(_) | Stmt::Break | Stmt::Continue | Stmt::Return(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Function, TopDecl};

    fn source(decls: &[(&str, Option<i64>)], body: Vec<Stmt>) -> (SourceProgram, HardwareContext) {
        let src = SourceProgram {
            decls: decls
                .iter()
                .map(|(n, i)| TopDecl {
                    name: (*n).into(),
                    init: *i,
                })
                .collect(),
            functions: vec![Function {
                name: "main".into(),
                body,
            }],
        };
        let hw = HardwareContext::infer(&src).unwrap();
        (src, hw)
    }

    fn num(n: i64) -> Expr {
        Expr::Num(n)
    }

    fn ident(name: &str) -> Expr {
        Expr::Ident(name.into())
    }

    #[test]
    fn straight_line_versions_and_store() {
        // x = 2 + 3; LED0 = x;
        let (src, hw) = source(
            &[("LED0", Some(0)), ("a0", None)],
            vec![
                Stmt::Assign(Assign {
                    name: "x".into(),
                    value: Expr::Binary {
                        op: BinOp::Add,
                        lhs: Box::new(num(2)),
                        rhs: Box::new(num(3)),
                    },
                }),
                Stmt::Assign(Assign {
                    name: "LED0".into(),
                    value: ident("x"),
                }),
            ],
        );
        let cfg = build(&src, &hw).unwrap();
        let entry = &cfg.blocks[cfg.entry];

        assert!(matches!(
            &entry.instrs[0],
            SsaInstr::BinaryOp { op: BinOp::Add, .. }
        ));
        assert!(matches!(
            &entry.instrs[1],
            SsaInstr::Assign { dest: SsaValue::Var { name, version: 1 }, .. } if name == "x"
        ));
        assert!(matches!(
            &entry.instrs[2],
            SsaInstr::Store { state, version: 1, .. } if state == "LED0"
        ));
    }

    #[test]
    fn if_merge_creates_phi_for_diverging_versions() {
        // if (a0) { x = 1; } else { x = 2; }
        let (src, hw) = source(
            &[("LED0", Some(0)), ("a0", None)],
            vec![
                Stmt::Decl {
                    name: "x".into(),
                    init: Some(num(0)),
                },
                Stmt::If {
                    cond: ident("a0"),
                    then_body: vec![Stmt::Assign(Assign {
                        name: "x".into(),
                        value: num(1),
                    })],
                    else_body: Some(vec![Stmt::Assign(Assign {
                        name: "x".into(),
                        value: num(2),
                    })]),
                },
            ],
        );
        let cfg = build(&src, &hw).unwrap();
        let merge = cfg
            .blocks
            .iter()
            .find(|b| b.label == "if.merge")
            .expect("merge block");
        assert_eq!(merge.phis.len(), 1);
        assert!(matches!(
            &merge.phis[0].dest,
            SsaValue::Var { name, .. } if name == "x"
        ));
        assert_eq!(merge.phis[0].args.len(), 2);
    }

    #[test]
    fn while_header_gets_loop_carried_phi() {
        // while (a0) { LED0 = 1; }
        let (src, hw) = source(
            &[("LED0", Some(0)), ("a0", None)],
            vec![Stmt::While {
                cond: ident("a0"),
                body: vec![Stmt::Assign(Assign {
                    name: "LED0".into(),
                    value: num(1),
                })],
            }],
        );
        let cfg = build(&src, &hw).unwrap();
        let header = cfg
            .blocks
            .iter()
            .find(|b| b.label == "loop.header")
            .expect("header block");
        assert_eq!(header.phis.len(), 1);
        // Preheader and latch operands.
        assert_eq!(header.phis[0].args.len(), 2);
        assert!(header.terminator().is_some());
    }

    #[test]
    fn every_reachable_block_is_terminated() {
        let (src, hw) = source(
            &[("LED0", Some(0)), ("a0", None)],
            vec![Stmt::If {
                cond: ident("a0"),
                then_body: vec![Stmt::Assign(Assign {
                    name: "LED0".into(),
                    value: num(1),
                })],
                else_body: None,
            }],
        );
        let cfg = build(&src, &hw).unwrap();
        for &b in &cfg.reverse_postorder() {
            assert!(
                cfg.blocks[b].terminator().is_some(),
                "block {b} ({}) lacks a terminator",
                cfg.blocks[b].label
            );
        }
    }

    #[test]
    fn shadowed_declaration_preserves_outer_version() {
        // x = 5; { int x = 7; } LED0 = x;  -> the store reads version 1.
        let (src, hw) = source(
            &[("LED0", Some(0))],
            vec![
                Stmt::Assign(Assign {
                    name: "x".into(),
                    value: num(5),
                }),
                Stmt::Block(vec![Stmt::Decl {
                    name: "x".into(),
                    init: Some(num(7)),
                }]),
                Stmt::Assign(Assign {
                    name: "LED0".into(),
                    value: ident("x"),
                }),
            ],
        );
        let cfg = build(&src, &hw).unwrap();
        let entry = &cfg.blocks[cfg.entry];
        let store = entry
            .instrs
            .iter()
            .find_map(|i| match i {
                SsaInstr::Store { src, .. } => Some(src.clone()),
                _ => None,
            })
            .expect("store");
        assert_eq!(store, SsaValue::var("x", 1));
    }
}
