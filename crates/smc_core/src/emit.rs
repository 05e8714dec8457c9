//! Field-width measurement for emission.
//!
//! The microcode word has no fixed total width: each field is packed just
//! wide enough for the largest value the program actually uses, minimum
//! one bit. The exception is `jadr`, which switches to its full 8-bit
//! hardware width once the program outgrows a 16-word address space so
//! the sequencer wiring stays independent of program length. The widths
//! measured here drive the packer, the generated parameter file, and the
//! dispatch-image formatting.

use crate::program::Program;
use smc_common::limits;
use smc_common::mcode::FIELD_COUNT;

/// Bit width per field in canonical order, plus the derived totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldWidths {
    pub widths: [u32; FIELD_COUNT],
}

/// Minimum bits to represent every value in `0..=max`.
pub fn width_of(max: u32) -> u32 {
    (u32::BITS - max.leading_zeros()).max(1)
}

impl FieldWidths {
    /// Measures the per-field maxima over a resolved program.
    pub fn measure(program: &Program) -> Self {
        let mut maxima = [0u32; FIELD_COUNT];
        for code in &program.codes {
            for (slot, value) in maxima.iter_mut().zip(code.mcode.fields()) {
                *slot = (*slot).max(value);
            }
        }

        let mut widths = [0u32; FIELD_COUNT];
        for (w, &max) in widths.iter_mut().zip(&maxima) {
            *w = width_of(max);
        }

        // Field 2 is jadr; see the module header for the fixed-width rule.
        if program.len() > limits::JADR_NARROW_LIMIT {
            widths[2] = limits::MAX_JADR_BITS;
        }
        FieldWidths { widths }
    }

    /// Total packed word width, the sum of all field widths.
    pub fn total(&self) -> u32 {
        self.widths.iter().sum()
    }

    /// Width of the jump-address field.
    pub fn jadr_bits(&self) -> u32 {
        self.widths[2]
    }

    /// Hex digits per line of the microcode image.
    pub fn word_hex_digits(&self) -> usize {
        self.total().div_ceil(4) as usize
    }

    /// Hex digits per line of the switch-dispatch image.
    pub fn addr_hex_digits(&self) -> usize {
        (self.jadr_bits().div_ceil(4) as usize).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smc_common::mcode::{Code, MCode};

    fn program_of(codes: Vec<Code>) -> Program {
        Program {
            codes,
            ..Default::default()
        }
    }

    fn word(f: impl FnOnce(&mut MCode)) -> Code {
        let mut m = MCode::nop();
        f(&mut m);
        Code::bare(m)
    }

    #[test]
    fn width_of_is_ceil_log2_with_floor_one() {
        assert_eq!(width_of(0), 1);
        assert_eq!(width_of(1), 1);
        assert_eq!(width_of(2), 2);
        assert_eq!(width_of(3), 2);
        assert_eq!(width_of(4), 3);
        assert_eq!(width_of(255), 8);
    }

    #[test]
    fn short_program_measures_jadr_narrow() {
        let p = program_of(vec![
            word(|m| {
                m.state = 5;
                m.mask = 7;
            }),
            word(|m| {
                m.forced_jmp = 1;
                m.jadr = 1;
            }),
        ]);
        let w = FieldWidths::measure(&p);
        assert_eq!(w.widths[0], 3); // state up to 5
        assert_eq!(w.widths[1], 3); // mask up to 7
        assert_eq!(w.jadr_bits(), 1);
        // Every untouched flag still claims one bit.
        assert_eq!(w.widths[13], 1);
    }

    #[test]
    fn long_program_pins_jadr_to_eight_bits() {
        let mut codes: Vec<Code> = (0..20).map(|_| word(|_| {})).collect();
        codes.push(word(|m| {
            m.forced_jmp = 1;
            m.jadr = 20;
        }));
        let w = FieldWidths::measure(&program_of(codes));
        assert_eq!(w.jadr_bits(), limits::MAX_JADR_BITS);
        assert_eq!(w.addr_hex_digits(), 2);
    }

    #[test]
    fn total_is_sum_of_widths() {
        let p = program_of(vec![word(|m| m.state = 3)]);
        let w = FieldWidths::measure(&p);
        assert_eq!(w.total(), w.widths.iter().sum::<u32>());
        assert_eq!(w.word_hex_digits(), w.total().div_ceil(4) as usize);
    }
}
