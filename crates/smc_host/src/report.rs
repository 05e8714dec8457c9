//! Stdout reporting: the microcode table, variable listings, and the
//! statistics block.

use smc_common::mcode::FIELD_NAMES;
use smc_core::emit::FieldWidths;
use smc_core::hw::HardwareContext;
use smc_core::opt::OptStats;
use smc_core::program::Program;

/// Prints one row per microcode word with every field in hex plus the
/// diagnostic label.
pub fn print_microcode(program: &Program) {
    print!("addr ");
    for name in FIELD_NAMES {
        print!("{name:>12} ");
    }
    println!("label");

    for (addr, code) in program.codes.iter().enumerate() {
        print!("{addr:04x} ");
        for value in code.mcode.fields() {
            print!("{value:>12x} ");
        }
        println!("{}", code.label_str());
    }
}

/// Prints the inferred hardware tables.
pub fn print_hardware(hw: &HardwareContext) {
    println!("State variables:");
    for s in &hw.states {
        println!("  bit {:2}  {} (initial {})", s.bit_index, s.name, s.initial_value);
    }
    println!("Input variables:");
    for i in &hw.inputs {
        println!("  in  {:2}  {}", i.input_index, i.name);
    }
    println!(
        "initial state = 0x{:x}, initial mask = 0x{:x}",
        hw.initial_state_value(),
        hw.initial_mask()
    );
}

/// Prints the state/input assignment listings that follow the table.
pub fn print_variables(hw: &HardwareContext, program: &Program) {
    println!("\nState assignments:");
    for s in &hw.states {
        let writes = program
            .codes
            .iter()
            .filter(|c| c.mcode.state_capture == 1 && c.mcode.mask & (1 << s.bit_index) != 0)
            .count();
        println!("  {} (bit {}): {} write(s)", s.name, s.bit_index, writes);
    }
    println!("Input assignments:");
    for i in &hw.inputs {
        println!("  {} -> input {}", i.name, i.input_index);
    }
}

/// Prints the statistics block.
pub fn print_stats(program: &Program, widths: &FieldWidths, opt: Option<&OptStats>) {
    let stats = program.stats();
    println!("\nStatistics");
    println!("Total instructions:  {}", stats.total_instructions);
    println!("State assignments:   {}", stats.state_assignments);
    println!("Branches:            {}", stats.branches);
    println!("Jumps:               {}", stats.jumps);
    println!("Timers:              {}", stats.timers);
    println!("Conditional rows:    {}", stats.lut_rows);
    println!("Switches:            {}", stats.switches);
    for info in &program.switch_infos {
        println!(
            "  switch {}: input {}, words [{}, {})",
            info.switch_id, info.input_index, info.start_addr, info.end_addr
        );
    }
    for (row, mask) in program.var_sel_masks.iter().enumerate() {
        println!("  varSel {}: reads input mask 0x{mask:x}", row + 1);
    }
    println!("Instruction width:   {} bits", widths.total());

    if let Some(opt) = opt {
        println!("Optimizer:");
        println!("  constants folded:  {}", opt.constants_found);
        println!("  copies recorded:   {}", opt.copies_found);
        println!("  dead removed:      {}", opt.dead_removed);
        println!("  iterations:        {}", opt.iterations);
    }
}
