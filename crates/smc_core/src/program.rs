//! The lowered program and its auxiliary memories.
//!
//! A `Program` is the shared output of both front-ends: the ordered word
//! array (index = address), the switch-dispatch memory, the conditional
//! LUT, and the per-switch bookkeeping the resolver and the report consume.
//! `validate` re-checks the structural invariants after resolution; the
//! host runs it after every successful compilation.

use crate::cond::CondLut;
use crate::{CompileError, Result};
use smc_common::limits;
use smc_common::mcode::Code;

/// Bookkeeping for one source `switch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchInfo {
    /// Dense switch id, also the dispatch-table row block index.
    pub switch_id: u32,
    /// Address of the selector word.
    pub start_addr: usize,
    /// Address immediately after the closing marker word.
    pub end_addr: usize,
    /// Input index supplying the selector value.
    pub input_index: u32,
}

/// The switch-dispatch memory.
///
/// Row `s` spans `2^SWITCH_OFFSET_BITS` slots; slot `v` holds the address
/// the engine jumps to when switch `s` observes selector value `v`. Slots
/// not named by a `case` are filled with the default-case address when the
/// switch finishes lowering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchDispatch {
    entries: Vec<usize>,
    mapped: Vec<bool>,
}

impl SwitchDispatch {
    /// Slots per switch row.
    pub fn row_len() -> usize {
        1usize << limits::SWITCH_OFFSET_BITS
    }

    /// Appends an empty row for a newly allocated switch id.
    pub fn push_row(&mut self) {
        self.entries.extend(std::iter::repeat(0).take(Self::row_len()));
        self.mapped.extend(std::iter::repeat(false).take(Self::row_len()));
    }

    /// Number of switch rows.
    pub fn num_switches(&self) -> usize {
        self.entries.len() / Self::row_len()
    }

    /// Records the target of `case value:` for the given switch.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` when the case value does not fit the selector
    /// width.
    pub fn set_case(&mut self, switch_id: u32, value: i64, addr: usize) -> Result<()> {
        let row_len = Self::row_len();
        if value < 0 || value as usize >= row_len {
            return Err(CompileError::CapacityExceeded(format!(
                "case {value} outside the {}-bit selector range",
                limits::SWITCH_OFFSET_BITS
            )));
        }
        let idx = switch_id as usize * row_len + value as usize;
        self.entries[idx] = addr;
        self.mapped[idx] = true;
        Ok(())
    }

    /// Fills every slot a `case` did not claim with the default address.
    pub fn finalize_row(&mut self, switch_id: u32, default_addr: usize) {
        let row_len = Self::row_len();
        let base = switch_id as usize * row_len;
        for i in base..base + row_len {
            if !self.mapped[i] {
                self.entries[i] = default_addr;
            }
        }
    }

    /// The jump address for (switch, selector value).
    pub fn get(&self, switch_id: u32, value: usize) -> usize {
        self.entries[switch_id as usize * Self::row_len() + value]
    }

    /// All entries, row-major, for emission.
    pub fn entries(&self) -> &[usize] {
        &self.entries
    }
}

/// Counts the report prints in its statistics block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgramStats {
    pub total_instructions: usize,
    pub state_assignments: usize,
    pub branches: usize,
    pub jumps: usize,
    pub switches: usize,
    pub timers: usize,
    pub lut_rows: usize,
}

/// A fully lowered (and, after resolution, fully addressed) program.
#[derive(Debug, Clone, Default)]
pub struct Program {
    /// The instruction stream; a word's index is its address.
    pub codes: Vec<Code>,
    /// One record per source switch, in allocation order.
    pub switch_infos: Vec<SwitchInfo>,
    /// The switch-dispatch memory.
    pub dispatch: SwitchDispatch,
    /// The conditional-expression LUT.
    pub lut: CondLut,
    /// Number of hardware timers allocated (one per `for`).
    pub timer_count: usize,
    /// Diagnostic input-dependence mask per LUT row (row 0 excluded).
    pub var_sel_masks: Vec<u32>,
}

impl Program {
    /// Number of words.
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Whether the program is empty (only before lowering).
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Address of the exit self-loop, the last word.
    pub fn exit_addr(&self) -> usize {
        self.codes.len() - 1
    }

    /// Derives the statistics block from the word stream.
    pub fn stats(&self) -> ProgramStats {
        let mut s = ProgramStats {
            total_instructions: self.codes.len(),
            switches: self.switch_infos.len(),
            timers: self.timer_count,
            lut_rows: self.lut.rows,
            ..Default::default()
        };
        for code in &self.codes {
            let m = &code.mcode;
            if m.state_capture == 1 {
                s.state_assignments += 1;
            }
            if m.branch == 1 {
                s.branches += 1;
            }
            if m.forced_jmp == 1 {
                s.jumps += 1;
            }
        }
        s
    }

    /// Re-checks the structural invariants of a resolved program.
    ///
    /// Covers address closure, the exit self-loop, state/mask consistency,
    /// varSel closure, dispatch-table address ranges, and LUT completeness.
    /// Break-target correctness and stack balance are enforced during
    /// lowering and resolution; the integration tests check them against
    /// literal scenarios.
    pub fn validate(&self) -> Result<()> {
        let n = self.codes.len();
        if n == 0 {
            return Err(CompileError::MalformedProgram("empty program".into()));
        }

        for (addr, code) in self.codes.iter().enumerate() {
            let m = &code.mcode;
            if (m.branch == 1 || m.forced_jmp == 1) && m.jadr as usize >= n {
                return Err(CompileError::InconsistentSizeEstimate(format!(
                    "word {addr} jumps to {} in a {n}-word program",
                    m.jadr
                )));
            }
            if m.state_capture == 1 && m.state & !m.mask != 0 {
                return Err(CompileError::MalformedProgram(format!(
                    "word {addr} sets state bits outside its mask"
                )));
            }
            if m.var_sel as usize >= self.lut.rows.max(1) {
                return Err(CompileError::MalformedProgram(format!(
                    "word {addr} selects LUT row {} of {}",
                    m.var_sel, self.lut.rows
                )));
            }
        }

        let exit = &self.codes[n - 1].mcode;
        if exit.forced_jmp != 1 || exit.jadr as usize != n - 1 {
            return Err(CompileError::MalformedProgram(
                "last word is not the exit self-loop".into(),
            ));
        }

        for &entry in self.dispatch.entries() {
            if entry >= n {
                return Err(CompileError::InconsistentSizeEstimate(format!(
                    "dispatch entry {entry} outside the {n}-word program"
                )));
            }
        }

        if self.lut.bits.len() != self.lut.rows * self.lut.width() {
            return Err(CompileError::MalformedProgram(
                "conditional LUT is not rows * 2^num_inputs entries".into(),
            ));
        }
        if self.lut.bits.iter().any(|&b| b > 1) {
            return Err(CompileError::MalformedProgram(
                "conditional LUT holds a non-bit entry".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smc_common::mcode::MCode;

    fn exit_word(addr: usize) -> Code {
        let mut m = MCode::nop();
        m.forced_jmp = 1;
        m.jadr = addr as u32;
        Code::new(m, ":exit")
    }

    #[test]
    fn dispatch_defaults_fill_unmapped_slots() {
        let mut d = SwitchDispatch::default();
        d.push_row();
        d.set_case(0, 3, 7).unwrap();
        d.finalize_row(0, 11);
        assert_eq!(d.get(0, 3), 7);
        assert_eq!(d.get(0, 0), 11);
        assert_eq!(d.get(0, 255), 11);
    }

    #[test]
    fn case_outside_selector_range_is_rejected() {
        let mut d = SwitchDispatch::default();
        d.push_row();
        assert!(d.set_case(0, 256, 0).is_err());
        assert!(d.set_case(0, -1, 0).is_err());
    }

    #[test]
    fn validate_accepts_minimal_program() {
        let mut p = Program::default();
        let mut entry = MCode::nop();
        entry.state_capture = 1;
        p.codes.push(Code::new(entry, "main"));
        p.codes.push(exit_word(1));
        p.validate().unwrap();
    }

    #[test]
    fn validate_rejects_out_of_range_jump() {
        let mut p = Program::default();
        let mut bad = MCode::nop();
        bad.branch = 1;
        bad.jadr = 9;
        p.codes.push(Code::bare(bad));
        p.codes.push(exit_word(1));
        assert!(matches!(
            p.validate(),
            Err(CompileError::InconsistentSizeEstimate(_))
        ));
    }

    #[test]
    fn validate_rejects_state_outside_mask() {
        let mut p = Program::default();
        let mut bad = MCode::nop();
        bad.state_capture = 1;
        bad.state = 0b10;
        bad.mask = 0b01;
        p.codes.push(Code::bare(bad));
        p.codes.push(exit_word(1));
        assert!(p.validate().is_err());
    }

    #[test]
    fn validate_requires_exit_self_loop() {
        let mut p = Program::default();
        p.codes.push(Code::bare(MCode::nop()));
        let mut not_self = MCode::nop();
        not_self.forced_jmp = 1;
        not_self.jadr = 0;
        p.codes.push(Code::bare(not_self));
        assert!(p.validate().is_err());
    }
}
