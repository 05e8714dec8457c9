//! Hardware model inference from the parsed source.
//!
//! Walks the file-scope declarations once and builds the canonical tables
//! of state variables (driven latch bits) and input variables (external
//! wires). Bit and input indices are assigned densely in source order and
//! are stable: the generated hardware's wire numbering depends on them.
//! The context is immutable after construction.

use crate::ast::SourceProgram;
use crate::{CompileError, Result};
use log::warn;
use smc_common::limits;

/// A hardware latch bit driven by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateVariable {
    /// Source name of the variable.
    pub name: String,
    /// Position of the latch in the state register, dense from 0.
    pub bit_index: u32,
    /// Reset value of the latch (0 or 1).
    pub initial_value: u32,
}

/// An external wire the state machine reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputVariable {
    /// Source name of the variable.
    pub name: String,
    /// Position of the wire on the input bus, dense from 0.
    pub input_index: u32,
}

/// Canonical tables of the inferred hardware.
///
/// Built once from the AST before lowering begins; every later stage
/// borrows it read-only. Derived aggregates (`initial_state_value`,
/// `initial_mask`) describe the reset pattern the entry word captures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardwareContext {
    /// State variables in declaration order.
    pub states: Vec<StateVariable>,
    /// Input variables in declaration order.
    pub inputs: Vec<InputVariable>,
}

impl HardwareContext {
    /// Infers the hardware model from the file-scope declarations.
    ///
    /// A declaration initialized to 0 or 1 contributes a state variable
    /// with the next free bit index; a declaration without an initializer
    /// contributes an input variable with the next free input index. Any
    /// other file-scope declaration is ignored with a warning.
    ///
    /// # Errors
    ///
    /// `MalformedProgram` when the program has no `main` function, and
    /// `CapacityExceeded` when more inputs are declared than the
    /// conditional LUT can index.
    pub fn infer(program: &SourceProgram) -> Result<Self> {
        if program.main().is_none() {
            return Err(CompileError::MalformedProgram(
                "no main() function".into(),
            ));
        }

        let mut ctx = HardwareContext::default();
        for decl in &program.decls {
            match decl.init {
                Some(v @ (0 | 1)) => {
                    ctx.states.push(StateVariable {
                        name: decl.name.clone(),
                        bit_index: ctx.states.len() as u32,
                        initial_value: v as u32,
                    });
                }
                None => {
                    ctx.inputs.push(InputVariable {
                        name: decl.name.clone(),
                        input_index: ctx.inputs.len() as u32,
                    });
                }
                Some(other) => {
                    warn!(
                        "ignoring file-scope declaration '{} = {}': initializer is neither 0 nor 1",
                        decl.name, other
                    );
                }
            }
        }

        if ctx.states.is_empty() {
            return Err(CompileError::MalformedProgram(
                "no state variable declarations".into(),
            ));
        }
        if ctx.inputs.len() > limits::MAX_INPUTS {
            return Err(CompileError::CapacityExceeded(format!(
                "{} input variables, the conditional LUT indexes at most {}",
                ctx.inputs.len(),
                limits::MAX_INPUTS
            )));
        }

        Ok(ctx)
    }

    /// OR of `initial_value << bit_index` over every state variable.
    pub fn initial_state_value(&self) -> u32 {
        self.states
            .iter()
            .fold(0, |acc, s| acc | (s.initial_value << s.bit_index))
    }

    /// OR of `1 << bit_index` over every state variable.
    pub fn initial_mask(&self) -> u32 {
        self.states.iter().fold(0, |acc, s| acc | (1 << s.bit_index))
    }

    /// Looks up a state variable by name.
    pub fn state(&self, name: &str) -> Option<&StateVariable> {
        self.states.iter().find(|s| s.name == name)
    }

    /// Looks up an input variable by name.
    pub fn input(&self, name: &str) -> Option<&InputVariable> {
        self.inputs.iter().find(|i| i.name == name)
    }

    /// Whether `name` names a state variable.
    pub fn is_state(&self, name: &str) -> bool {
        self.state(name).is_some()
    }

    /// Whether `name` names an input variable.
    pub fn is_input(&self, name: &str) -> bool {
        self.input(name).is_some()
    }

    /// Number of state latch bits.
    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    /// Number of input wires.
    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Function, TopDecl};

    fn program(decls: Vec<TopDecl>) -> SourceProgram {
        SourceProgram {
            decls,
            functions: vec![Function {
                name: "main".into(),
                body: Vec::new(),
            }],
        }
    }

    fn decl(name: &str, init: Option<i64>) -> TopDecl {
        TopDecl {
            name: name.into(),
            init,
        }
    }

    #[test]
    fn classifies_states_and_inputs_in_order() {
        let p = program(vec![
            decl("LED0", Some(0)),
            decl("a0", None),
            decl("LED1", Some(1)),
            decl("a1", None),
        ]);
        let hw = HardwareContext::infer(&p).unwrap();
        assert_eq!(hw.num_states(), 2);
        assert_eq!(hw.num_inputs(), 2);
        assert_eq!(hw.state("LED0").unwrap().bit_index, 0);
        assert_eq!(hw.state("LED1").unwrap().bit_index, 1);
        assert_eq!(hw.input("a1").unwrap().input_index, 1);
        assert_eq!(hw.initial_state_value(), 0b10);
        assert_eq!(hw.initial_mask(), 0b11);
    }

    #[test]
    fn unknown_initializer_is_ignored() {
        let p = program(vec![decl("K", Some(42)), decl("LED", Some(1))]);
        let hw = HardwareContext::infer(&p).unwrap();
        assert_eq!(hw.num_states(), 1);
        assert_eq!(hw.state("LED").unwrap().bit_index, 0);
    }

    #[test]
    fn missing_main_is_malformed() {
        let p = SourceProgram {
            decls: vec![decl("LED", Some(0))],
            functions: Vec::new(),
        };
        assert!(matches!(
            HardwareContext::infer(&p),
            Err(CompileError::MalformedProgram(_))
        ));
    }
}
