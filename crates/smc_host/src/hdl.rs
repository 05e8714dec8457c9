//! HDL back-end: Verilog engine module, testbench, and Makefile.
//!
//! Generates a self-contained RTL rendition of the hotstate machine
//! engine wired to the emitted memory images: microcode ROM, switch
//! dispatch memory, and conditional LUT are loaded with `$readmemh` at
//! time zero, and the sequencer implements the same word semantics the
//! software simulator models (jump-on-false branches, capture under
//! mask, dispatch, down-counting timers).

use anyhow::{Context, Result};
use smc_core::hw::HardwareContext;
use smc_core::program::Program;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

fn stem(base: &Path) -> String {
    base.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sm".into())
}

fn create(base: &Path, suffix: &str) -> Result<BufWriter<File>> {
    let mut name = stem(base);
    name.push_str(suffix);
    let path = base.with_file_name(name);
    let file =
        File::create(&path).with_context(|| format!("cannot write {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Writes `<base>.v`: the engine module bound to this program's images.
pub fn write_module(base: &Path, hw: &HardwareContext, program: &Program) -> Result<()> {
    let name = stem(base);
    let mut out = create(base, ".v")?;

    let num_inputs = hw.num_inputs().max(1);
    let state_bits = hw.num_states().max(1);
    let lut_entries = program.lut.rows * (1 << program.lut.num_inputs);
    let dispatch_entries = program.dispatch.entries().len().max(1);
    let timers = program.timer_count.max(1);

    writeln!(out, "// Generated by smc; do not edit.")?;
    writeln!(out, "module {name}_sm (")?;
    writeln!(out, "    input  wire                  clk,")?;
    writeln!(out, "    input  wire                  rst_n,")?;
    writeln!(out, "    input  wire [{}:0] in_bus,", num_inputs - 1)?;
    writeln!(out, "    output reg  [{}:0] state_out", state_bits - 1)?;
    writeln!(out, ");")?;
    writeln!(out, "`include \"{name}_params.vh\"")?;
    writeln!(out)?;
    writeln!(out, "  // Field offsets from the LSB, reverse packing order.")?;
    writeln!(out, "  localparam RTN_LSB           = 0;")?;
    writeln!(out, "  localparam SUB_LSB           = RTN_LSB + RTN_WIDTH;")?;
    writeln!(out, "  localparam FORCED_JMP_LSB    = SUB_LSB + SUB_WIDTH;")?;
    writeln!(out, "  localparam BRANCH_LSB        = FORCED_JMP_LSB + FORCED_JMP_WIDTH;")?;
    writeln!(out, "  localparam VAR_OR_TIMER_LSB  = BRANCH_LSB + BRANCH_WIDTH;")?;
    writeln!(out, "  localparam STATE_CAPTURE_LSB = VAR_OR_TIMER_LSB + VAR_OR_TIMER_WIDTH;")?;
    writeln!(out, "  localparam SWITCH_ADR_LSB    = STATE_CAPTURE_LSB + STATE_CAPTURE_WIDTH;")?;
    writeln!(out, "  localparam SWITCH_SEL_LSB    = SWITCH_ADR_LSB + SWITCH_ADR_WIDTH;")?;
    writeln!(out, "  localparam TIMER_LD_LSB      = SWITCH_SEL_LSB + SWITCH_SEL_WIDTH;")?;
    writeln!(out, "  localparam TIMER_SEL_LSB     = TIMER_LD_LSB + TIMER_LD_WIDTH;")?;
    writeln!(out, "  localparam VAR_SEL_LSB       = TIMER_SEL_LSB + TIMER_SEL_WIDTH;")?;
    writeln!(out, "  localparam JADR_LSB          = VAR_SEL_LSB + VAR_SEL_WIDTH;")?;
    writeln!(out, "  localparam MASK_LSB          = JADR_LSB + JADR_WIDTH;")?;
    writeln!(out, "  localparam STATE_LSB         = MASK_LSB + MASK_WIDTH;")?;
    writeln!(out)?;
    writeln!(out, "  reg [INSTR_WIDTH-1:0] smdata [0:INSTR_COUNT-1];")?;
    writeln!(out, "  reg [JADR_WIDTH-1:0]  switchdata [0:{}];", dispatch_entries - 1)?;
    writeln!(out, "  reg                   vardata [0:{}];", lut_entries.max(1) - 1)?;
    writeln!(out, "  initial begin")?;
    writeln!(out, "    $readmemh(\"{name}_smdata.mem\", smdata);")?;
    writeln!(out, "    $readmemh(\"{name}_switchdata.mem\", switchdata);")?;
    writeln!(out, "    $readmemh(\"{name}_vardata.mem\", vardata);")?;
    writeln!(out, "  end")?;
    writeln!(out)?;
    writeln!(out, "  reg  [JADR_WIDTH-1:0] pc;")?;
    writeln!(out, "  reg  [STATE_WIDTH-1:0] timer [0:{}];", timers - 1)?;
    writeln!(out, "  wire [INSTR_WIDTH-1:0] instr = smdata[pc];")?;
    writeln!(out)?;
    writeln!(out, "  wire [STATE_WIDTH-1:0] f_state = instr[STATE_LSB +: STATE_WIDTH];")?;
    writeln!(out, "  wire [MASK_WIDTH-1:0]  f_mask  = instr[MASK_LSB +: MASK_WIDTH];")?;
    writeln!(out, "  wire [JADR_WIDTH-1:0]  f_jadr  = instr[JADR_LSB +: JADR_WIDTH];")?;
    writeln!(out, "  wire [VAR_SEL_WIDTH-1:0] f_var_sel = instr[VAR_SEL_LSB +: VAR_SEL_WIDTH];")?;
    writeln!(out, "  wire [TIMER_SEL_WIDTH-1:0] f_timer_sel = instr[TIMER_SEL_LSB +: TIMER_SEL_WIDTH];")?;
    writeln!(out, "  wire f_timer_ld      = instr[TIMER_LD_LSB];")?;
    writeln!(out, "  wire [SWITCH_SEL_WIDTH-1:0] f_switch_sel = instr[SWITCH_SEL_LSB +: SWITCH_SEL_WIDTH];")?;
    writeln!(out, "  wire f_switch_adr    = instr[SWITCH_ADR_LSB];")?;
    writeln!(out, "  wire f_state_capture = instr[STATE_CAPTURE_LSB];")?;
    writeln!(out, "  wire f_var_or_timer  = instr[VAR_OR_TIMER_LSB];")?;
    writeln!(out, "  wire f_branch        = instr[BRANCH_LSB];")?;
    writeln!(out, "  wire f_forced_jmp    = instr[FORCED_JMP_LSB];")?;
    writeln!(out)?;
    writeln!(out, "  // Condition mux: timer, LUT row, direct input, or constant.")?;
    writeln!(out, "  wire timer_live = timer[f_timer_sel] != 0;")?;
    writeln!(out, "  wire lut_bit    = vardata[(f_var_sel << {}) | in_bus];", program.lut.num_inputs)?;
    writeln!(out, "  wire direct_bit = (f_state == 0) ? 1'b1 : in_bus[f_state - 1];")?;
    writeln!(out, "  wire cond = f_var_or_timer ? timer_live :")?;
    writeln!(out, "              (f_var_sel != 0) ? lut_bit : direct_bit;")?;
    writeln!(out)?;
    writeln!(out, "  wire [7:0] sw_value = in_bus >> f_state;")?;
    writeln!(out, "  wire [JADR_WIDTH-1:0] dispatch_adr =")?;
    writeln!(out, "      switchdata[{{f_switch_sel, sw_value}}];")?;
    writeln!(out)?;
    writeln!(out, "  always @(posedge clk or negedge rst_n) begin")?;
    writeln!(out, "    if (!rst_n) begin")?;
    writeln!(out, "      pc <= 0;")?;
    writeln!(out, "      state_out <= 0;")?;
    writeln!(out, "    end else begin")?;
    writeln!(out, "      if (f_state_capture)")?;
    writeln!(out, "        state_out <= (state_out & ~f_mask) | (f_state & f_mask);")?;
    writeln!(out, "      if (f_timer_ld)")?;
    writeln!(out, "        timer[f_timer_sel] <= f_state;")?;
    writeln!(out, "      else if (f_branch && f_var_or_timer && timer_live)")?;
    writeln!(out, "        timer[f_timer_sel] <= timer[f_timer_sel] - 1;")?;
    writeln!(out, "      if (f_switch_adr)")?;
    writeln!(out, "        pc <= dispatch_adr;")?;
    writeln!(out, "      else if (f_branch && !cond)")?;
    writeln!(out, "        pc <= f_jadr;")?;
    writeln!(out, "      else if (f_forced_jmp)")?;
    writeln!(out, "        pc <= f_jadr;")?;
    writeln!(out, "      else")?;
    writeln!(out, "        pc <= pc + 1;")?;
    writeln!(out, "    end")?;
    writeln!(out, "  end")?;
    writeln!(out, "endmodule")?;
    out.flush()?;
    Ok(())
}

/// Writes `<base>_tb.v`: clock/reset generation and a walking-ones input
/// stimulus with a cycle budget.
pub fn write_testbench(base: &Path, hw: &HardwareContext, program: &Program) -> Result<()> {
    let name = stem(base);
    let mut out = create(base, "_tb.v")?;

    let num_inputs = hw.num_inputs().max(1);
    let state_bits = hw.num_states().max(1);
    let budget = (program.len() * 64).max(1024);

    writeln!(out, "// Generated by smc; do not edit.")?;
    writeln!(out, "`timescale 1ns/1ps")?;
    writeln!(out, "module {name}_tb;")?;
    writeln!(out, "  reg clk = 0;")?;
    writeln!(out, "  reg rst_n = 0;")?;
    writeln!(out, "  reg [{}:0] in_bus = 0;", num_inputs - 1)?;
    writeln!(out, "  wire [{}:0] state_out;", state_bits - 1)?;
    writeln!(out)?;
    writeln!(out, "  {name}_sm dut (")?;
    writeln!(out, "    .clk(clk), .rst_n(rst_n),")?;
    writeln!(out, "    .in_bus(in_bus), .state_out(state_out)")?;
    writeln!(out, "  );")?;
    writeln!(out)?;
    writeln!(out, "  always #5 clk = ~clk;")?;
    writeln!(out)?;
    writeln!(out, "  integer i;")?;
    writeln!(out, "  initial begin")?;
    writeln!(out, "    $dumpfile(\"{name}_tb.vcd\");")?;
    writeln!(out, "    $dumpvars(0, {name}_tb);")?;
    writeln!(out, "    #20 rst_n = 1;")?;
    writeln!(out, "    for (i = 0; i < {budget}; i = i + 1) begin")?;
    writeln!(out, "      @(posedge clk);")?;
    writeln!(out, "      if (i % 64 == 0)")?;
    writeln!(out, "        in_bus <= (in_bus == 0) ? 1 : in_bus << 1;")?;
    writeln!(out, "    end")?;
    writeln!(out, "    $display(\"final state = %h\", state_out);")?;
    writeln!(out, "    $finish;")?;
    writeln!(out, "  end")?;
    writeln!(out, "endmodule")?;
    out.flush()?;
    Ok(())
}

/// Writes a Makefile with icarus verilog targets.
pub fn write_makefile(base: &Path) -> Result<()> {
    let name = stem(base);
    let mut out = create(base, ".mk")?;
    writeln!(out, "# Generated by smc; do not edit.")?;
    writeln!(out, "SIM = {name}_tb.vvp")?;
    writeln!(out)?;
    writeln!(out, "all: run")?;
    writeln!(out)?;
    writeln!(out, "$(SIM): {name}.v {name}_tb.v {name}_params.vh")?;
    writeln!(out, "\tiverilog -g2012 -o $(SIM) {name}.v {name}_tb.v")?;
    writeln!(out)?;
    writeln!(out, "run: $(SIM)")?;
    writeln!(out, "\tvvp $(SIM)")?;
    writeln!(out)?;
    writeln!(out, "wave: run")?;
    writeln!(out, "\tgtkwave {name}_tb.vcd")?;
    writeln!(out)?;
    writeln!(out, "clean:")?;
    writeln!(out, "\trm -f $(SIM) {name}_tb.vcd")?;
    writeln!(out)?;
    writeln!(out, ".PHONY: all run wave clean")?;
    out.flush()?;
    Ok(())
}
