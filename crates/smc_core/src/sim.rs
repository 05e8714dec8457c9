//! Cycle-accurate simulator of the hotstate machine engine.
//!
//! Executes a resolved program the way the hardware does: one word per
//! cycle, state capture under mask, jump-on-false branches fed by the
//! conditional LUT or a direct input read, switch dispatch through the
//! dispatch memory, and down-counting timers armed by timer-load words.
//! The test suite drives compiled programs through this model to check
//! end-to-end behavior; it is not part of the CLI surface.

use crate::program::Program;
use smc_common::limits;
use smc_common::mcode::MCode;

/// Interpreter state for one engine instance.
pub struct Engine<'a> {
    program: &'a Program,
    /// Current microcode address.
    pub pc: usize,
    /// The state register (one bit per state variable).
    pub state: u32,
    timers: Vec<u32>,
}

impl<'a> Engine<'a> {
    /// An engine at reset: address 0, cleared state and timers. The entry
    /// word captures the declared initial pattern on the first cycle.
    pub fn new(program: &'a Program) -> Self {
        Self {
            program,
            pc: 0,
            state: 0,
            timers: vec![0; program.timer_count.max(1)],
        }
    }

    /// Whether the engine sits on the exit self-loop.
    pub fn halted(&self) -> bool {
        let m = &self.program.codes[self.pc].mcode;
        m.forced_jmp == 1 && m.jadr as usize == self.pc
    }

    /// Executes one cycle with the given input vector (input `i` in bit
    /// `i`) and returns the next address.
    pub fn step(&mut self, inputs: u32) -> usize {
        let m = self.program.codes[self.pc].mcode;

        if m.state_capture == 1 {
            self.state = (self.state & !m.mask) | (m.state & m.mask);
        }
        if m.timer_ld == 1 {
            self.timers[m.timer_sel as usize] = m.state;
        }

        self.pc = self.next_pc(&m, inputs);
        self.pc
    }

    /// Runs until the exit self-loop or the cycle budget runs out,
    /// holding the inputs constant. Returns the cycles consumed.
    pub fn run(&mut self, inputs: u32, max_cycles: usize) -> usize {
        for cycle in 0..max_cycles {
            if self.halted() {
                return cycle;
            }
            self.step(inputs);
        }
        max_cycles
    }

    fn next_pc(&mut self, m: &MCode, inputs: u32) -> usize {
        if m.switch_adr == 1 {
            let slice_mask = (1u32 << limits::SWITCH_OFFSET_BITS) - 1;
            let value = ((inputs >> m.state) & slice_mask) as usize;
            return self.program.dispatch.get(m.switch_sel, value);
        }
        if m.branch == 1 {
            if !self.condition(m, inputs) {
                return m.jadr as usize;
            }
            return self.pc + 1;
        }
        if m.forced_jmp == 1 {
            return m.jadr as usize;
        }
        self.pc + 1
    }

    /// The selected condition value; evaluating a timer condition
    /// consumes one tick.
    fn condition(&mut self, m: &MCode, inputs: u32) -> bool {
        if m.var_or_timer == 1 {
            let t = m.timer_sel as usize;
            if self.timers[t] > 0 {
                self.timers[t] -= 1;
                return true;
            }
            return false;
        }
        if m.var_sel > 0 {
            let col = inputs as usize & (self.program.lut.width() - 1);
            return self.program.lut.bit(m.var_sel as usize, col) == 1;
        }
        // varSel = 0: aux operand 0 is constant true, k > 0 reads input k-1.
        if m.state == 0 {
            return true;
        }
        (inputs >> (m.state - 1)) & 1 == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Assign, Expr, Function, SourceProgram, Stmt, TopDecl};
    use crate::hw::HardwareContext;
    use crate::lower;

    fn compile(decls: &[(&str, Option<i64>)], body: Vec<Stmt>) -> Program {
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
        lower::compile(&src, &hw).unwrap()
    }

    fn set_led(v: i64) -> Stmt {
        Stmt::Assign(Assign {
            name: "LED0".into(),
            value: Expr::Num(v),
        })
    }

    #[test]
    fn conditional_set_follows_the_input() {
        // while (1) { if (a0) { LED0 = 1; } }
        let program = compile(
            &[("LED0", Some(0)), ("a0", None)],
            vec![Stmt::While {
                cond: Expr::Num(1),
                body: vec![Stmt::If {
                    cond: Expr::Ident("a0".into()),
                    then_body: vec![set_led(1)],
                    else_body: None,
                }],
            }],
        );

        // With a0 low the loop spins and the LED stays off.
        let mut engine = Engine::new(&program);
        for _ in 0..16 {
            engine.step(0);
        }
        assert_eq!(engine.state, 0);
        assert!(!engine.halted());

        // Raising a0 drives the LED high within one loop pass.
        for _ in 0..8 {
            engine.step(1);
        }
        assert_eq!(engine.state, 1);
    }

    #[test]
    fn break_reaches_the_exit_loop() {
        // while (1) { if (a0) break; LED0 = 1; }
        let program = compile(
            &[("LED0", Some(0)), ("a0", None)],
            vec![Stmt::While {
                cond: Expr::Num(1),
                body: vec![
                    Stmt::If {
                        cond: Expr::Ident("a0".into()),
                        then_body: vec![Stmt::Break],
                        else_body: None,
                    },
                    set_led(1),
                ],
            }],
        );

        let mut engine = Engine::new(&program);
        let cycles = engine.run(1, 64);
        assert!(cycles < 64, "engine should halt via the break");
        assert!(engine.halted());
        // The break fires before the assignment runs.
        assert_eq!(engine.state, 0);
    }

    #[test]
    fn initial_state_is_captured_at_reset() {
        let program = compile(
            &[("LED0", Some(1)), ("LED1", Some(0)), ("a0", None)],
            vec![set_led(0)],
        );
        let mut engine = Engine::new(&program);
        engine.step(0);
        assert_eq!(engine.state, 0b01);
        engine.run(0, 16);
        assert_eq!(engine.state, 0b00);
    }

    #[test]
    fn counted_loop_runs_its_iterations() {
        // for (i = 0; i < 3; i = i + 1) { LED0 = 1; } LED0 = 0; ...
        let program = compile(
            &[("LED0", Some(0)), ("a0", None)],
            vec![
                Stmt::For {
                    init: Some(Box::new(Stmt::Assign(Assign {
                        name: "i".into(),
                        value: Expr::Num(0),
                    }))),
                    cond: Some(Expr::Binary {
                        op: crate::ast::BinOp::Lt,
                        lhs: Box::new(Expr::Ident("i".into())),
                        rhs: Box::new(Expr::Num(3)),
                    }),
                    update: Some(Box::new(Stmt::Assign(Assign {
                        name: "i".into(),
                        value: Expr::Binary {
                            op: crate::ast::BinOp::Add,
                            lhs: Box::new(Expr::Ident("i".into())),
                            rhs: Box::new(Expr::Num(1)),
                        },
                    }))),
                    body: vec![set_led(1)],
                },
                set_led(0),
            ],
        );

        let mut engine = Engine::new(&program);
        let cycles = engine.run(0, 64);
        assert!(cycles < 64);
        // Three iterations set the LED, the epilogue clears it again.
        assert_eq!(engine.state, 0);
    }
}
