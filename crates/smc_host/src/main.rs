//! `smc`: command-line driver for the state machine compiler.
//!
//! Reads one source file, runs the selected front-end (direct AST walk by
//! default, CFG+SSA with `--microcode-ssa`), prints the microcode table
//! and statistics, and writes the memory images next to the source.
//! Optional back-ends emit a CFG DOT dump and the Verilog integration
//! files.

mod hdl;
mod report;
mod visualizer;

use anyhow::Result;
use clap::Parser;
use smc_core::emit::FieldWidths;
use smc_core::hw::HardwareContext;
use smc_core::opt::OptStats;
use smc_core::{lower, lower_cfg, opt, ssa};
use smc_io::emitter;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "smc", about = "Microcode compiler for the hotstate machine engine")]
struct Cli {
    /// Source file (restricted C subset).
    source: PathBuf,

    /// Write a DOT dump of the CFG to <base>.dot.
    #[arg(long)]
    dot: bool,

    /// Print the inferred state/input variable tables.
    #[arg(long)]
    hardware: bool,

    /// Compile through the CFG+SSA front-end.
    #[arg(long, conflicts_with = "microcode_hs")]
    microcode_ssa: bool,

    /// Compile through the direct AST walk (the default).
    #[arg(long)]
    microcode_hs: bool,

    /// Run the SSA optimizer (implies the SSA front-end path for it to
    /// act on).
    #[arg(long)]
    opt: bool,

    /// Generate the Verilog engine integration file.
    #[arg(long)]
    verilog: bool,

    /// Generate the Verilog testbench and Makefile.
    #[arg(long)]
    testbench: bool,

    /// Generate every HDL output.
    #[arg(long)]
    all_hdl: bool,

    /// Verbose trace output on stderr.
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(if cli.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .init();

    let ast = smc_io::load_source(&cli.source)?;
    let hw = HardwareContext::infer(&ast)?;

    if cli.hardware {
        report::print_hardware(&hw);
    }

    let base = emitter::output_base(&cli.source);
    // The optimizer acts on the SSA form, so --opt pulls in that
    // front-end; --dot only needs the CFG built.
    let use_ssa = cli.microcode_ssa || cli.opt;
    let mut cfg = if use_ssa || cli.dot {
        Some(ssa::build(&ast, &hw)?)
    } else {
        None
    };

    let mut opt_stats: Option<OptStats> = None;
    if cli.opt {
        let cfg = cfg.as_mut().expect("CFG built for --opt");
        opt_stats = Some(opt::optimize(cfg, &hw));
    }

    if cli.dot {
        let cfg = cfg.as_ref().expect("CFG built for --dot");
        let dot_path = base.with_extension("dot");
        visualizer::write_dot(cfg, &dot_path)?;
        println!("wrote {}", dot_path.display());
    }

    let program = match (use_ssa, cfg.as_ref()) {
        (true, Some(cfg)) => lower_cfg::lower(cfg, &hw)?,
        _ => lower::compile(&ast, &hw)?,
    };
    program.validate()?;

    let widths = FieldWidths::measure(&program);
    report::print_microcode(&program);
    report::print_variables(&hw, &program);
    report::print_stats(&program, &widths, opt_stats.as_ref());

    emitter::write_images(&program, &widths, &base)?;

    if cli.verilog || cli.all_hdl {
        hdl::write_module(&base, &hw, &program)?;
    }
    if cli.testbench || cli.all_hdl {
        hdl::write_testbench(&base, &hw, &program)?;
        hdl::write_makefile(&base)?;
    }

    Ok(())
}
