//! Memory-image emission: bit packing and file writing.
//!
//! Packs each resolved microcode word into a single binary word whose
//! per-field widths were measured over the whole program, then renders
//! the three memory images plus the width-parameter file the hardware
//! integrator consumes. Rendering is pure (string vectors in, same
//! strings out every time); writing happens only after every image
//! rendered successfully, so a failed run leaves no partial files.

use anyhow::{Context, Result};
use bitvec::prelude::*;
use smc_common::mcode::{MCode, PARAM_NAMES};
use smc_core::emit::FieldWidths;
use smc_core::program::Program;
use std::fs;
use std::path::{Path, PathBuf};

/// The rendered text of the four output files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Images {
    /// `<base>_smdata.mem`: one hex microcode word per line.
    pub microcode: Vec<String>,
    /// `<base>_switchdata.mem`: one hex dispatch address per line.
    pub dispatch: Vec<String>,
    /// `<base>_vardata.mem`: one LUT bit per line.
    pub vardata: Vec<String>,
    /// `<base>_params.vh`: localparam width declarations.
    pub params: String,
}

/// Packs one word into bits, fields in canonical order, most significant
/// field first, left-padded so the width is a whole number of hex digits.
pub fn pack_word(mcode: &MCode, widths: &FieldWidths) -> BitVec<u8, Msb0> {
    let total = widths.total();
    let padding = (4 - total % 4) % 4;
    let mut bits: BitVec<u8, Msb0> = BitVec::with_capacity((total + padding) as usize);
    for _ in 0..padding {
        bits.push(false);
    }
    for (value, width) in mcode.fields().into_iter().zip(widths.widths) {
        for i in (0..width).rev() {
            bits.push((value >> i) & 1 == 1);
        }
    }
    bits
}

fn bits_to_hex(bits: &BitSlice<u8, Msb0>) -> String {
    bits.chunks(4)
        .map(|nibble| {
            let v = nibble
                .iter()
                .fold(0u32, |acc, bit| (acc << 1) | (*bit as u32));
            char::from_digit(v, 16).unwrap_or('0')
        })
        .collect()
}

/// Renders every output image from a resolved program.
pub fn render(program: &Program, widths: &FieldWidths) -> Images {
    let microcode = program
        .codes
        .iter()
        .map(|code| bits_to_hex(&pack_word(&code.mcode, widths)))
        .collect();

    let addr_digits = widths.addr_hex_digits();
    let dispatch = program
        .dispatch
        .entries()
        .iter()
        .map(|&addr| format!("{addr:0addr_digits$x}"))
        .collect();

    let vardata = program.lut.bits.iter().map(|b| b.to_string()).collect();

    let mut params = String::new();
    for (name, width) in PARAM_NAMES.iter().zip(widths.widths) {
        params.push_str(&format!("localparam {name} = {width};\n"));
    }
    params.push_str(&format!("localparam INSTR_WIDTH = {};\n", widths.total()));
    params.push_str(&format!(
        "localparam INSTR_COUNT = {};\n",
        program.codes.len()
    ));

    Images {
        microcode,
        dispatch,
        vardata,
        params,
    }
}

/// The output stem for a source file: its path with the extension cut.
pub fn output_base(source: &Path) -> PathBuf {
    source.with_extension("")
}

/// Renders and writes all four files next to the source.
pub fn write_images(program: &Program, widths: &FieldWidths, base: &Path) -> Result<()> {
    let images = render(program, widths);
    let write_lines = |suffix: &str, lines: &[String]| -> Result<()> {
        let path = with_suffix(base, suffix);
        let mut text = lines.join("\n");
        text.push('\n');
        fs::write(&path, text).with_context(|| format!("cannot write {}", path.display()))
    };
    write_lines("_smdata.mem", &images.microcode)?;
    write_lines("_switchdata.mem", &images.dispatch)?;
    write_lines("_vardata.mem", &images.vardata)?;
    let params_path = with_suffix(base, "_params.vh");
    fs::write(&params_path, &images.params)
        .with_context(|| format!("cannot write {}", params_path.display()))?;
    Ok(())
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smc_common::mcode::Code;

    fn tiny_program() -> Program {
        let mut entry = MCode::nop();
        entry.state = 1;
        entry.mask = 1;
        entry.state_capture = 1;
        let mut exit = MCode::nop();
        exit.forced_jmp = 1;
        exit.jadr = 1;
        Program {
            codes: vec![Code::new(entry, "main"), Code::new(exit, ":exit")],
            ..Default::default()
        }
    }

    #[test]
    fn packs_fields_msb_first() {
        let program = tiny_program();
        let widths = FieldWidths::measure(&program);
        // Every field is one bit wide here: 14 bits, padded to 16.
        assert_eq!(widths.total(), 14);
        let bits = pack_word(&program.codes[0].mcode, &widths);
        assert_eq!(bits.len(), 16);
        // state=1, mask=1 lead; state_capture is field 8.
        assert!(bits[2]);
        assert!(bits[3]);
        assert!(bits[2 + 8]);
    }

    #[test]
    fn hex_line_width_matches_total() {
        let program = tiny_program();
        let widths = FieldWidths::measure(&program);
        let images = render(&program, &widths);
        assert_eq!(images.microcode.len(), 2);
        for line in &images.microcode {
            assert_eq!(line.len(), widths.word_hex_digits());
        }
    }

    #[test]
    fn rendering_is_idempotent() {
        let program = tiny_program();
        let widths = FieldWidths::measure(&program);
        assert_eq!(render(&program, &widths), render(&program, &widths));
    }

    #[test]
    fn params_cover_every_field_and_total() {
        let program = tiny_program();
        let widths = FieldWidths::measure(&program);
        let images = render(&program, &widths);
        for name in PARAM_NAMES {
            assert!(images.params.contains(name), "missing {name}");
        }
        assert!(images.params.contains("INSTR_WIDTH = 14"));
    }

    #[test]
    fn written_files_land_next_to_base() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("blinky");
        let program = tiny_program();
        let widths = FieldWidths::measure(&program);
        write_images(&program, &widths, &base).unwrap();
        for suffix in ["_smdata.mem", "_switchdata.mem", "_vardata.mem", "_params.vh"] {
            assert!(dir.path().join(format!("blinky{suffix}")).exists());
        }
    }
}
