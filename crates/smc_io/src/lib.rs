//! Source ingestion and image emission for the state machine compiler.
//!
//! The boundary crate between the filesystem and the pure compilation
//! core: include preprocessing and parsing on the way in, bit packing and
//! memory-image writing on the way out.

/// Memory-image rendering and file output.
pub mod emitter;
/// nom parser for the restricted C subset.
pub mod parser;
/// `#include` expansion with cycle detection.
pub mod preprocess;

use anyhow::Result;
use smc_core::ast::SourceProgram;
use std::path::Path;

/// Preprocesses and parses a source file into an AST.
pub fn load_source(path: &Path) -> Result<SourceProgram> {
    let text = preprocess::expand(path)?;
    parser::parse(&text)
}
