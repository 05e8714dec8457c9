//! Two-pass jump resolution.
//!
//! Pass A rewrites every pending jump against the finalized context
//! history: exits to the last word, direct targets to the address the walk
//! patched in, break/continue targets to the frame captured when the jump
//! was emitted. Pass B handles breaks inside switches with a label-driven
//! interval scan: `SWITCH` labels open an interval, `}}` closing markers
//! close one, and each recorded break lands one past the innermost closing
//! marker containing it.

use crate::lower::{BreakTarget, Lowered, PendingKind};
use crate::{CompileError, Result};
use log::debug;

/// Pass A: rewrites every pending `jadr` to its concrete address.
///
/// # Errors
///
/// `InconsistentSizeEstimate` when a pending jump never received a target
/// or the target falls outside the emitted program.
pub fn resolve_pending(lowered: &mut Lowered) -> Result<()> {
    let n = lowered.program.len();
    let exit = lowered.program.exit_addr();

    for pj in &lowered.pending {
        let target = match pj.kind {
            PendingKind::Exit => exit,
            PendingKind::Direct(Some(addr)) => addr,
            PendingKind::Direct(None) => {
                return Err(CompileError::InconsistentSizeEstimate(format!(
                    "word {} has an unpatched forward jump",
                    pj.instruction_index
                )));
            }
            PendingKind::Break(ctx) => match lowered.contexts[ctx].break_target {
                BreakTarget::Addr(addr) => addr,
                BreakTarget::Exit => exit,
                BreakTarget::Pending => {
                    return Err(CompileError::InconsistentSizeEstimate(format!(
                        "word {} breaks to an unfinished context",
                        pj.instruction_index
                    )));
                }
            },
            PendingKind::Continue(ctx) => {
                lowered.contexts[ctx].continue_target.ok_or_else(|| {
                    CompileError::InconsistentSizeEstimate(format!(
                        "word {} continues to an unfinished context",
                        pj.instruction_index
                    ))
                })?
            }
        };

        if target >= n {
            return Err(CompileError::InconsistentSizeEstimate(format!(
                "word {} resolves to {target} in a {n}-word program",
                pj.instruction_index
            )));
        }
        debug!("resolve [{:3}] -> {target}", pj.instruction_index);
        lowered.program.codes[pj.instruction_index].mcode.jadr = target as u32;
    }
    Ok(())
}

/// Pass B: matches each break inside a switch with the innermost
/// enclosing switch end.
///
/// Scans the emitted stream once, pushing on every `SWITCH` label and
/// popping on every `}}` closing marker; each pop records a
/// `[start, closing]` interval. A break at address `b` then takes the
/// smallest interval containing it and jumps to `closing + 1`.
///
/// # Errors
///
/// `BreakOutsideSwitch` when a recorded break is covered by no interval.
pub fn resolve_switch_breaks(lowered: &mut Lowered) -> Result<()> {
    let mut stack: Vec<usize> = Vec::new();
    let mut intervals: Vec<(usize, usize)> = Vec::new();

    for (addr, code) in lowered.program.codes.iter().enumerate() {
        match code.label.as_deref() {
            Some(label) if label.starts_with("SWITCH") => stack.push(addr),
            Some("}}") => {
                if let Some(start) = stack.pop() {
                    intervals.push((start, addr));
                } else {
                    log::warn!("closing marker at {addr} without an open switch");
                }
            }
            _ => {}
        }
    }

    for &brk in &lowered.switch_breaks {
        // Innermost = greatest start among the intervals covering brk;
        // switch intervals nest properly.
        let innermost = intervals
            .iter()
            .filter(|&&(start, closing)| start <= brk && brk <= closing)
            .max_by_key(|&&(start, _)| start);
        let Some(&(_, closing)) = innermost else {
            return Err(CompileError::BreakOutsideSwitch);
        };
        let target = closing + 1;
        if target >= lowered.program.len() {
            return Err(CompileError::InconsistentSizeEstimate(format!(
                "switch break at {brk} resolves past the program end"
            )));
        }
        debug!("switch break [{brk:3}] -> {target}");
        lowered.program.codes[brk].mcode.jadr = target as u32;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::{LoopSwitchContext, PendingJump};
    use crate::program::Program;
    use smc_common::mcode::{Code, MCode};

    fn jump_word(label: &str) -> Code {
        let mut m = MCode::nop();
        m.forced_jmp = 1;
        Code::new(m, label)
    }

    fn lowered(codes: Vec<Code>) -> Lowered {
        Lowered {
            program: Program {
                codes,
                ..Default::default()
            },
            pending: Vec::new(),
            contexts: Vec::new(),
            switch_breaks: Vec::new(),
        }
    }

    #[test]
    fn pass_a_resolves_exit_and_direct() {
        let mut l = lowered(vec![
            jump_word("to exit"),
            jump_word("direct"),
            jump_word(":exit"),
        ]);
        l.pending.push(PendingJump {
            instruction_index: 0,
            kind: PendingKind::Exit,
        });
        l.pending.push(PendingJump {
            instruction_index: 1,
            kind: PendingKind::Direct(Some(0)),
        });
        resolve_pending(&mut l).unwrap();
        assert_eq!(l.program.codes[0].mcode.jadr, 2);
        assert_eq!(l.program.codes[1].mcode.jadr, 0);
    }

    #[test]
    fn pass_a_rejects_unpatched_direct() {
        let mut l = lowered(vec![jump_word("lost"), jump_word(":exit")]);
        l.pending.push(PendingJump {
            instruction_index: 0,
            kind: PendingKind::Direct(None),
        });
        assert!(matches!(
            resolve_pending(&mut l),
            Err(CompileError::InconsistentSizeEstimate(_))
        ));
    }

    #[test]
    fn pass_a_reads_context_history() {
        let mut l = lowered(vec![jump_word("break"), jump_word(":exit")]);
        l.contexts.push(LoopSwitchContext {
            kind: crate::lower::CtxKind::While,
            continue_target: Some(0),
            break_target: BreakTarget::Addr(1),
        });
        l.pending.push(PendingJump {
            instruction_index: 0,
            kind: PendingKind::Break(0),
        });
        resolve_pending(&mut l).unwrap();
        assert_eq!(l.program.codes[0].mcode.jadr, 1);
    }

    #[test]
    fn pass_b_matches_innermost_interval() {
        // 0: SWITCH, 1: SWITCH, 2: break, 3: }}, 4: break, 5: }}, 6: exit
        let mut l = lowered(vec![
            jump_word("SWITCH s0"),
            jump_word("SWITCH s1"),
            jump_word("break"),
            jump_word("}}"),
            jump_word("break"),
            jump_word("}}"),
            jump_word(":exit"),
        ]);
        l.switch_breaks = vec![2, 4];
        resolve_switch_breaks(&mut l).unwrap();
        assert_eq!(l.program.codes[2].mcode.jadr, 4);
        assert_eq!(l.program.codes[4].mcode.jadr, 6);
    }

    #[test]
    fn pass_b_rejects_uncovered_break() {
        let mut l = lowered(vec![jump_word("break"), jump_word(":exit")]);
        l.switch_breaks = vec![0];
        assert!(matches!(
            resolve_switch_breaks(&mut l),
            Err(CompileError::BreakOutsideSwitch)
        ));
    }
}
