//! Compilation core for the hotstate machine compiler.
//!
//! Transforms a parsed AST of the restricted C-like state machine language
//! into a linear microcode program with fully resolved jump targets, plus
//! the auxiliary memories (conditional-expression LUT, switch-dispatch
//! table) the engine loads at reset. Two front-ends share the same backend:
//! a direct AST walk and a CFG+SSA pipeline with optimizer passes. File
//! parsing and image emission live in `smc_io`; this crate is pure
//! transformation.

pub mod ast;
pub mod cfg;
pub mod cond;
pub mod emit;
pub mod hw;
pub mod lower;
pub mod lower_cfg;
pub mod opt;
pub mod program;
pub mod resolve;
pub mod sim;
pub mod ssa;

use std::fmt;

/// Errors that abort a compilation run.
///
/// The core never catches and continues: any of these propagates out of the
/// pipeline and no output files are written. Diagnostic labels accumulated
/// so far stay in the partially built program to aid post-mortem dumps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// The program has no `main`, no usable declarations, or a root node of
    /// the wrong kind.
    MalformedProgram(String),
    /// An AST node outside the recognized construct set.
    UnsupportedConstruct(String),
    /// `break` with no enclosing loop or switch.
    BreakOutsideLoop,
    /// `continue` with no enclosing loop.
    ContinueOutsideLoop,
    /// A pending switch break with no enclosing switch interval.
    BreakOutsideSwitch,
    /// A compile-time capacity (switches, LUT rows, timers, address bits)
    /// was exceeded.
    CapacityExceeded(String),
    /// A resolved jump target fell outside the emitted program.
    InconsistentSizeEstimate(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::MalformedProgram(what) => {
                write!(f, "malformed program: {what}")
            }
            CompileError::UnsupportedConstruct(what) => {
                write!(f, "unsupported construct: {what}")
            }
            CompileError::BreakOutsideLoop => write!(f, "break outside loop or switch"),
            CompileError::ContinueOutsideLoop => write!(f, "continue outside loop"),
            CompileError::BreakOutsideSwitch => {
                write!(f, "switch break with no enclosing switch")
            }
            CompileError::CapacityExceeded(what) => {
                write!(f, "capacity exceeded: {what}")
            }
            CompileError::InconsistentSizeEstimate(what) => {
                write!(f, "inconsistent jump target: {what}")
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, CompileError>;
