//! Conditional-expression compilation: the hybrid varSel policy and the
//! truth-table lookup memory.
//!
//! Branch and loop conditions fall into three classes. Constant literals
//! need no hardware evaluation at all. A bare input identifier is read
//! directly off the input bus. Everything else is compiled to a row of the
//! conditional LUT: the expression is evaluated for every combination of
//! input values and the resulting bit string is stored in the memory the
//! engine indexes with the live input vector. Direct reads consume no LUT
//! rows, which keeps the table minimal.

use crate::ast::{BinOp, Expr, UnOp};
use crate::hw::HardwareContext;
use crate::{CompileError, Result};
use log::debug;
use smc_common::limits;

/// Classification of a condition under the hybrid varSel policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondKind {
    /// Literal `1`: the branch never fires (jump-on-false never jumps).
    ConstTrue,
    /// Literal `0`: the branch always fires.
    ConstFalse,
    /// A bare input identifier; `varSel = 0` and the input index is carried
    /// in the word's auxiliary operand.
    DirectInput(u32),
    /// Anything else; `varSel` names the allocated LUT row.
    Lut(u32),
}

/// A registered complex condition awaiting truth-table evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct CondExpr {
    /// The expression as written in the source.
    pub expr: Expr,
    /// The LUT row assigned to it (dense from 1).
    pub var_sel: u32,
}

/// Allocator for varSel identifiers and registry of complex conditions.
///
/// One per lowering run. The counter starts at 1; row 0 is the reserved
/// "no lookup" encoding. Registered expressions are evaluated into the LUT
/// after lowering completes.
#[derive(Debug, Default)]
pub struct CondAlloc {
    exprs: Vec<CondExpr>,
}

impl CondAlloc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies the hybrid policy to a condition expression.
    ///
    /// Constants and bare input reads return without touching the LUT;
    /// any other expression is validated (it may reference input variables
    /// only) and registered under the next varSel.
    ///
    /// # Errors
    ///
    /// `UnsupportedConstruct` when the expression references a name that is
    /// not an input variable; `CapacityExceeded` when the LUT is full.
    pub fn classify(&mut self, expr: &Expr, hw: &HardwareContext) -> Result<CondKind> {
        match expr {
            Expr::Num(0) => return Ok(CondKind::ConstFalse),
            Expr::Num(1) => return Ok(CondKind::ConstTrue),
            Expr::Ident(name) => {
                if let Some(input) = hw.input(name) {
                    return Ok(CondKind::DirectInput(input.input_index));
                }
                return Err(CompileError::UnsupportedConstruct(format!(
                    "condition reads '{name}', which is not an input variable"
                )));
            }
            _ => {}
        }

        let mut names = Vec::new();
        expr.referenced_idents(&mut names);
        for name in &names {
            if !hw.is_input(name) {
                return Err(CompileError::UnsupportedConstruct(format!(
                    "condition '{expr}' reads '{name}', which is not an input variable"
                )));
            }
        }

        let var_sel = self.exprs.len() as u32 + 1;
        if var_sel as usize >= limits::MAX_LUT_ROWS {
            return Err(CompileError::CapacityExceeded(format!(
                "more than {} conditional expressions",
                limits::MAX_LUT_ROWS - 1
            )));
        }
        debug!("varSel {var_sel} <- {expr}");
        self.exprs.push(CondExpr {
            expr: expr.clone(),
            var_sel,
        });
        Ok(CondKind::Lut(var_sel))
    }

    /// Highest varSel handed out so far (0 when none).
    pub fn max_var_sel(&self) -> u32 {
        self.exprs.len() as u32
    }

    /// The registered expressions, in varSel order.
    pub fn entries(&self) -> &[CondExpr] {
        &self.exprs
    }

    /// Evaluates every registered expression into the LUT memory.
    ///
    /// Row `k` holds the truth table of the expression with `varSel = k`,
    /// one bit per input-vector combination, column index formed by the
    /// input bits in index order. Row 0 is emitted as zeros.
    pub fn build_lut(&self, hw: &HardwareContext) -> CondLut {
        let num_inputs = hw.num_inputs();
        let width = 1usize << num_inputs;
        let rows = self.exprs.len() + 1;
        let mut bits = vec![0u8; rows * width];

        for entry in &self.exprs {
            let row = entry.var_sel as usize;
            for col in 0..width {
                let truth = eval_condition(&entry.expr, hw, col as u32);
                bits[row * width + col] = truth as u8;
            }
        }

        CondLut {
            num_inputs,
            rows,
            bits,
        }
    }

    /// Computes which inputs each registered expression actually reads.
    ///
    /// Returns one mask per LUT row (bit `i` set when input `i` is
    /// referenced). Purely diagnostic: the emitter stores full rows either
    /// way, but the report and the HDL integrator can see the real fan-in.
    pub fn dependence_masks(&self, hw: &HardwareContext) -> Vec<u32> {
        self.exprs
            .iter()
            .map(|entry| {
                let mut names = Vec::new();
                entry.expr.referenced_idents(&mut names);
                names
                    .iter()
                    .filter_map(|n| hw.input(n))
                    .fold(0u32, |acc, i| acc | (1 << i.input_index))
            })
            .collect()
    }
}

/// The assembled conditional-LUT memory, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondLut {
    /// Number of hardware inputs indexing a row.
    pub num_inputs: usize,
    /// Number of rows, `max_varsel + 1` including the reserved row 0.
    pub rows: usize,
    /// `rows * 2^num_inputs` single-bit entries.
    pub bits: Vec<u8>,
}

impl Default for CondLut {
    /// An empty table: the reserved row 0 over zero inputs.
    fn default() -> Self {
        CondLut {
            num_inputs: 0,
            rows: 1,
            bits: vec![0],
        }
    }
}

impl CondLut {
    /// Entries per row (`2^num_inputs`).
    pub fn width(&self) -> usize {
        1usize << self.num_inputs
    }

    /// The bit at (row, input-vector column).
    pub fn bit(&self, row: usize, col: usize) -> u8 {
        self.bits[row * self.width() + col]
    }

    /// One full row.
    pub fn row(&self, row: usize) -> &[u8] {
        let w = self.width();
        &self.bits[row * w..(row + 1) * w]
    }
}

/// Evaluates a condition for one assignment of the input vector.
///
/// `vector` carries input `i`'s value in bit `i`. Comparison and logical
/// operators yield 0/1, arithmetic is plain integer math, and the root is
/// coerced to a boolean.
pub fn eval_condition(expr: &Expr, hw: &HardwareContext, vector: u32) -> bool {
    eval_int(expr, hw, vector) != 0
}

fn eval_int(expr: &Expr, hw: &HardwareContext, vector: u32) -> i64 {
    match expr {
        Expr::Num(n) => *n,
        Expr::Ident(name) => {
            // classify() guarantees only input names reach evaluation.
            let idx = hw.input(name).map(|i| i.input_index).unwrap_or(0);
            ((vector >> idx) & 1) as i64
        }
        Expr::Unary { op, operand } => {
            let v = eval_int(operand, hw, vector);
            match op {
                UnOp::Not => (v == 0) as i64,
                UnOp::Neg => -v,
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            let a = eval_int(lhs, hw, vector);
            let b = eval_int(rhs, hw, vector);
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
                BinOp::Div => {
                    if b == 0 {
                        0
                    } else {
                        a / b
                    }
                }
            }
        }
    }
}
