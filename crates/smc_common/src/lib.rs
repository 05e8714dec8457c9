//! Common definitions shared across the state machine compiler system.
//!
//! This crate provides the fixed microcode word format consumed by the
//! hotstate machine engine, the canonical field packing order used by the
//! emitter and the hardware integration, and the compile-time capacity
//! limits shared by the compiler core, the file emitter, and the host tools.

// Capacity limits and configuration constants for the target engine.
//
// These bounds must match the generated hardware: the dispatch memory is
// sized from SWITCH_OFFSET_BITS, and the microcode address field is capped
// at MAX_JADR_BITS. Exceeding any of them is a CapacityExceeded compile
// error, never a silent truncation.
pub mod limits {
    /// Number of selector bits per switch-dispatch row.
    ///
    /// Each switch owns a `2^SWITCH_OFFSET_BITS`-entry slice of the dispatch
    /// memory, indexed by the selector value observed on the input bus.
    /// Case labels must fit in this many bits.
    pub const SWITCH_OFFSET_BITS: u32 = 8;

    /// Maximum number of `switch` statements per program.
    pub const MAX_SWITCHES: usize = 16;

    /// Maximum number of pending switch-break records per program.
    pub const MAX_SWITCH_BREAKS: usize = 64;

    /// Maximum number of conditional-LUT rows, including the reserved row 0.
    ///
    /// Row 0 encodes "no lookup" and is never assigned to an expression, so
    /// at most `MAX_LUT_ROWS - 1` complex conditions may appear in a source
    /// program.
    pub const MAX_LUT_ROWS: usize = 64;

    /// Maximum number of hardware input wires.
    ///
    /// The conditional LUT stores one column per input-vector combination,
    /// so its width is `2^num_inputs`; this cap keeps the table addressable.
    pub const MAX_INPUTS: usize = 16;

    /// Maximum number of hardware timers (one is allocated per `for` loop).
    pub const MAX_TIMERS: usize = 16;

    /// Widest supported jump-address field, in bits.
    ///
    /// Programs longer than `2^MAX_JADR_BITS` words do not fit the engine's
    /// sequencer and are rejected.
    pub const MAX_JADR_BITS: u32 = 8;

    /// Address-space size up to which `jadr` uses its measured width.
    ///
    /// Beyond this many words the field is emitted at the fixed
    /// MAX_JADR_BITS width so the sequencer wiring does not depend on the
    /// program length.
    pub const JADR_NARROW_LIMIT: usize = 16;
}

/// Microcode word format for the hotstate machine engine.
///
/// Defines the fourteen-field control word executed once per clock, the
/// debug-labelled `Code` record the compiler manipulates, and the canonical
/// field order used when packing words into the memory image.
pub mod mcode {
    /// Number of fields in a microcode word.
    pub const FIELD_COUNT: usize = 14;

    /// Field names in canonical packing order, most significant first.
    ///
    /// The emitter packs fields in exactly this order and the generated
    /// parameter file names widths after it; the engine's instruction
    /// decoder must slice the word identically.
    pub const FIELD_NAMES: [&str; FIELD_COUNT] = [
        "state",
        "mask",
        "jadr",
        "varSel",
        "timerSel",
        "timerLd",
        "switchSel",
        "switchAdr",
        "stateCapture",
        "varOrTimer",
        "branch",
        "forcedJmp",
        "sub",
        "rtn",
    ];

    /// Width-parameter names for the hardware integration, in field order.
    pub const PARAM_NAMES: [&str; FIELD_COUNT] = [
        "STATE_WIDTH",
        "MASK_WIDTH",
        "JADR_WIDTH",
        "VAR_SEL_WIDTH",
        "TIMER_SEL_WIDTH",
        "TIMER_LD_WIDTH",
        "SWITCH_SEL_WIDTH",
        "SWITCH_ADR_WIDTH",
        "STATE_CAPTURE_WIDTH",
        "VAR_OR_TIMER_WIDTH",
        "BRANCH_WIDTH",
        "FORCED_JMP_WIDTH",
        "SUB_WIDTH",
        "RTN_WIDTH",
    ];

    /// One microcode control word.
    ///
    /// Every field is a non-negative integer; single-bit flags hold 0 or 1
    /// and multi-bit fields carry indices or bit patterns. Field widths are
    /// not fixed here — they are measured over the whole program at emission
    /// time. On words that do not capture state, the `state` field doubles
    /// as an auxiliary operand: the direct-input index of a `varSel = 0`
    /// branch, the selector input index of a dispatch word, or the count of
    /// a timer-load word.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct MCode {
        /// State-bit write pattern (under `mask`), or auxiliary operand.
        pub state: u32,
        /// Write-enable mask: `state_out = (state_in & ~mask) | (state & mask)`.
        pub mask: u32,
        /// Jump target address for `branch` / `forced_jmp` words.
        pub jadr: u32,
        /// Conditional-LUT row; 0 means no lookup (direct input or constant).
        pub var_sel: u32,
        /// Timer index for `timer_ld` and timer conditions.
        pub timer_sel: u32,
        /// Arm timer `timer_sel` with the count carried in `state`.
        pub timer_ld: u32,
        /// Switch id selecting the dispatch-table row block.
        pub switch_sel: u32,
        /// Fetch the next address from the switch-dispatch memory.
        pub switch_adr: u32,
        /// Latch `state` into the state register under `mask`.
        pub state_capture: u32,
        /// Condition source: 0 = input/LUT, 1 = timer.
        pub var_or_timer: u32,
        /// Conditional jump: if the selected condition is false, go to `jadr`.
        pub branch: u32,
        /// Unconditional jump to `jadr`.
        pub forced_jmp: u32,
        /// Subroutine call flag (reserved, always 0).
        pub sub: u32,
        /// Subroutine return flag (reserved, always 0).
        pub rtn: u32,
    }

    impl MCode {
        /// A word with every field zero: the engine falls through to the
        /// next address without touching any state.
        pub fn nop() -> Self {
            Self::default()
        }

        /// Returns the fields as an array in canonical packing order.
        pub fn fields(&self) -> [u32; FIELD_COUNT] {
            [
                self.state,
                self.mask,
                self.jadr,
                self.var_sel,
                self.timer_sel,
                self.timer_ld,
                self.switch_sel,
                self.switch_adr,
                self.state_capture,
                self.var_or_timer,
                self.branch,
                self.forced_jmp,
                self.sub,
                self.rtn,
            ]
        }
    }

    /// A microcode word together with its diagnostic label.
    ///
    /// The label is human-readable provenance for the stdout table and the
    /// post-mortem dump; hardware never observes it. The word's address is
    /// its index in the owning program.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct Code {
        /// The control word itself.
        pub mcode: MCode,
        /// Diagnostic label, typically the source construct that produced
        /// the word.
        pub label: Option<String>,
    }

    impl Code {
        /// Wraps a word with a label.
        pub fn new(mcode: MCode, label: impl Into<String>) -> Self {
            Self {
                mcode,
                label: Some(label.into()),
            }
        }

        /// Wraps a word without a label.
        pub fn bare(mcode: MCode) -> Self {
            Self { mcode, label: None }
        }

        /// The label, or an empty string for display purposes.
        pub fn label_str(&self) -> &str {
            self.label.as_deref().unwrap_or("")
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn field_order_matches_names() {
            let mut m = MCode::nop();
            m.state = 1;
            m.rtn = 14;
            let f = m.fields();
            assert_eq!(f[0], 1);
            assert_eq!(f[FIELD_COUNT - 1], 14);
            assert_eq!(FIELD_NAMES[0], "state");
            assert_eq!(FIELD_NAMES[FIELD_COUNT - 1], "rtn");
        }

        #[test]
        fn nop_is_all_zero() {
            assert!(MCode::nop().fields().iter().all(|&f| f == 0));
        }
    }
}
