//! End-to-end pipeline tests: source text through the parser, both
//! front-ends, resolution, validation, and emission.

use smc_core::emit::FieldWidths;
use smc_core::hw::HardwareContext;
use smc_core::program::Program;
use smc_core::sim::Engine;
use smc_core::{lower, lower_cfg, opt, ssa};
use smc_io::{emitter, parser};

fn compile(source: &str) -> Program {
    let ast = parser::parse(source).expect("parse");
    let hw = HardwareContext::infer(&ast).expect("hardware inference");
    let program = lower::compile(&ast, &hw).expect("lowering");
    program.validate().expect("invariants");
    program
}

#[test]
fn single_conditional_led_set() {
    // Entry capture, while(1) header, direct-input branch, assignment,
    // back jump, exit self-loop.
    let program = compile(
        "int LED0 = 0; int a0;\nint main(){ while(1){ if(a0){ LED0 = 1; } } }",
    );
    assert_eq!(program.len(), 6);

    let entry = &program.codes[0].mcode;
    assert_eq!((entry.state, entry.mask, entry.state_capture), (0, 1, 1));

    let header = &program.codes[1].mcode;
    assert_eq!((header.branch, header.var_sel), (1, 0));
    assert_eq!(header.jadr as usize, program.exit_addr());

    let cond = &program.codes[2].mcode;
    assert_eq!((cond.branch, cond.var_sel), (1, 0));
    assert_eq!(cond.jadr, 4);

    let set = &program.codes[3].mcode;
    assert_eq!((set.state, set.mask, set.state_capture), (1, 1, 1));

    let back = &program.codes[4].mcode;
    assert_eq!((back.forced_jmp, back.jadr), (1, 1));
}

#[test]
fn comma_assignment_takes_final_value() {
    let program = compile("int LED0 = 0; int a0;\nint main(){ LED0 = 1, LED0 = 0; }");
    // Entry, the folded assignment, exit.
    assert_eq!(program.len(), 3);
    let word = &program.codes[1].mcode;
    assert_eq!((word.state, word.mask, word.state_capture), (0, 1, 1));
}

#[test]
fn complex_condition_compiles_to_lut_row() {
    let program = compile(
        "int LED0 = 0; int LED1 = 0; int a0; int a1;\nint main(){ if(a0 && a1) LED0 = 1; else LED1 = 1; }",
    );
    let branch = program
        .codes
        .iter()
        .find(|c| c.mcode.branch == 1)
        .expect("branch word");
    assert_eq!(branch.mcode.var_sel, 1);
    // Row 1 indexed by (a1 << 1) | a0: true only when both are high.
    assert_eq!(program.lut.row(1), &[0, 0, 0, 1]);
    assert_eq!(program.lut.rows, 2);
}

#[test]
fn nested_switch_breaks_bind_innermost() {
    let program = compile(
        "int LED0 = 0; int s0; int s1;\n\
         int main(){\n\
           switch(s0){\n\
             case 0:\n\
               switch(s1){ case 0: LED0 = 1; break; case 1: break; }\n\
               break;\n\
             case 1: LED0 = 0; break;\n\
           }\n\
         }",
    );
    assert_eq!(program.switch_infos.len(), 2);
    let outer = program.switch_infos[0];
    let inner = program.switch_infos[1];
    assert!(outer.start_addr < inner.start_addr);
    assert!(inner.end_addr < outer.end_addr);

    // Every break word inside the inner interval exits the inner switch.
    for (addr, code) in program.codes.iter().enumerate() {
        if code.label_str() != "break" {
            continue;
        }
        let jadr = code.mcode.jadr as usize;
        if addr > inner.start_addr && addr < inner.end_addr - 1 {
            assert_eq!(jadr, inner.end_addr, "inner break at {addr}");
        } else {
            assert_eq!(jadr, outer.end_addr, "outer break at {addr}");
        }
    }

    // Dispatch integrity: named cases point at their markers, everything
    // else at the default (here the switch end).
    assert_eq!(program.dispatch.get(0, 0), outer.start_addr + 1);
    assert_eq!(program.dispatch.get(1, 0), inner.start_addr + 1);
    for value in 2..8 {
        assert_eq!(program.dispatch.get(1, value), inner.end_addr);
    }
}

#[test]
fn while_one_break_targets_exit() {
    let program = compile(
        "int LED0 = 0; int a0;\nint main(){ while(1){ if(a0) break; LED0 = 1; } }",
    );
    let exit = program.exit_addr();

    let header = &program.codes[1].mcode;
    assert_eq!(header.branch, 1);
    assert_eq!(header.jadr as usize, exit, "header false branch -> exit");

    let brk = program
        .codes
        .iter()
        .find(|c| c.label_str() == "break")
        .expect("break word");
    assert_eq!(brk.mcode.jadr as usize, exit);
}

#[test]
fn ssa_pipeline_folds_constants_and_keeps_state_writes() {
    let source = "int LED0 = 0; int a0;\nint main(){ int x = 2 + 3; LED0 = x; }";
    let ast = parser::parse(source).unwrap();
    let hw = HardwareContext::infer(&ast).unwrap();
    let mut cfg = ssa::build(&ast, &hw).unwrap();
    let stats = opt::optimize(&mut cfg, &hw);

    assert!(stats.constants_found >= 1, "constant propagation event");
    assert!(stats.dead_removed >= 1, "x temporary reported dead");

    let program = lower_cfg::lower(&cfg, &hw).unwrap();
    program.validate().unwrap();
    assert!(
        program
            .codes
            .iter()
            .any(|c| c.mcode.state_capture == 1 && c.mcode.mask == 1 && c.mcode.state == 1),
        "LED0 write preserved through optimization"
    );
}

#[test]
fn both_front_ends_halt_the_same_way() {
    let source = "int LED0 = 0; int a0;\nint main(){ if(a0){ LED0 = 1; } }";
    let ast = parser::parse(source).unwrap();
    let hw = HardwareContext::infer(&ast).unwrap();

    let direct = lower::compile(&ast, &hw).unwrap();
    let cfg = ssa::build(&ast, &hw).unwrap();
    let via_ssa = lower_cfg::lower(&cfg, &hw).unwrap();

    for program in [&direct, &via_ssa] {
        let mut engine = Engine::new(program);
        engine.run(1, 128);
        assert!(engine.halted());
        assert_eq!(engine.state, 1, "LED0 set when a0 is high");
    }
}

#[test]
fn simulated_machine_follows_input() {
    let program = compile(
        "int LED0 = 0; int a0;\nint main(){ while(1){ if(a0){ LED0 = 1; } } }",
    );
    let mut engine = Engine::new(&program);
    for _ in 0..24 {
        engine.step(0);
    }
    assert_eq!(engine.state, 0);
    for _ in 0..8 {
        engine.step(1);
    }
    assert_eq!(engine.state, 1);
}

#[test]
fn address_closure_and_lut_completeness() {
    let program = compile(
        "int LED0 = 0; int a0; int a1;\n\
         int main(){\n\
           while(a0){\n\
             if(a0 && a1) LED0 = 1; else LED0 = 0;\n\
             if(!a1) continue;\n\
           }\n\
         }",
    );
    let n = program.len();
    for code in &program.codes {
        let m = &code.mcode;
        if m.branch == 1 || m.forced_jmp == 1 {
            assert!((m.jadr as usize) < n);
        }
        if m.state_capture == 1 {
            assert_eq!(m.state & !m.mask, 0);
        }
        assert!((m.var_sel as usize) < program.lut.rows.max(1));
    }
    assert_eq!(
        program.lut.bits.len(),
        program.lut.rows * (1 << program.lut.num_inputs)
    );
    assert!(program.lut.bits.iter().all(|&b| b <= 1));
}

#[test]
fn emission_is_idempotent_and_sized() {
    let program = compile(
        "int LED0 = 0; int sel;\n\
         int main(){ switch(sel){ case 0: LED0 = 1; break; default: LED0 = 0; } }",
    );
    let widths = FieldWidths::measure(&program);
    let first = emitter::render(&program, &widths);
    let second = emitter::render(&program, &widths);
    assert_eq!(first, second);

    assert_eq!(first.microcode.len(), program.len());
    assert_eq!(first.dispatch.len(), 256);
    assert_eq!(
        first.vardata.len(),
        program.lut.rows * (1 << program.lut.num_inputs)
    );
    for line in &first.microcode {
        assert_eq!(line.len(), widths.word_hex_digits());
    }
}

#[test]
fn empty_stack_errors_surface() {
    let ast = parser::parse("int LED0 = 0;\nint main(){ break; }").unwrap();
    let hw = HardwareContext::infer(&ast).unwrap();
    assert!(lower::compile(&ast, &hw).is_err());

    let ast = parser::parse("int LED0 = 0;\nint main(){ continue; }").unwrap();
    let hw = HardwareContext::infer(&ast).unwrap();
    assert!(lower::compile(&ast, &hw).is_err());
}
