//! `#include` preprocessing.
//!
//! Expands include directives before parsing, producing a single flat
//! source string. Includes are resolved relative to the including file.
//! A visited-set plus a depth bound make duplicate and circular includes
//! terminate: a file already on the current expansion path is an error,
//! a file included twice on disjoint paths is expanded twice like the C
//! preprocessor would.

use anyhow::{Context, Result, bail};
use log::warn;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Maximum include nesting depth.
pub const MAX_INCLUDE_DEPTH: usize = 16;

/// Reads a source file and expands every `#include "..."` directive.
pub fn expand(path: &Path) -> Result<String> {
    let mut active = HashSet::new();
    expand_file(path, 0, &mut active)
}

fn expand_file(path: &Path, depth: usize, active: &mut HashSet<PathBuf>) -> Result<String> {
    if depth > MAX_INCLUDE_DEPTH {
        bail!(
            "include nesting deeper than {MAX_INCLUDE_DEPTH} at {}",
            path.display()
        );
    }

    let canonical = fs::canonicalize(path)
        .with_context(|| format!("cannot resolve {}", path.display()))?;
    if !active.insert(canonical.clone()) {
        bail!("circular include of {}", path.display());
    }

    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut out = String::with_capacity(text.len());
    for (lineno, line) in text.lines().enumerate() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("#include") {
            let target = parse_include_target(rest).with_context(|| {
                format!("{}:{}: malformed #include", path.display(), lineno + 1)
            })?;
            let included = dir.join(target);
            let expanded = expand_file(&included, depth + 1, active)?;
            out.push_str(&expanded);
            if !out.ends_with('\n') {
                out.push('\n');
            }
        } else if trimmed.starts_with('#') {
            warn!(
                "{}:{}: ignoring unsupported directive '{}'",
                path.display(),
                lineno + 1,
                trimmed
            );
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }

    active.remove(&canonical);
    Ok(out)
}

fn parse_include_target(rest: &str) -> Result<&str> {
    let rest = rest.trim();
    let quoted = rest
        .strip_prefix('"')
        .and_then(|r| r.split_once('"'))
        .map(|(target, _)| target)
        .or_else(|| {
            rest.strip_prefix('<')
                .and_then(|r| r.split_once('>'))
                .map(|(target, _)| target)
        });
    match quoted {
        Some(t) if !t.is_empty() => Ok(t),
        _ => bail!("expected #include \"file\""),
    }
}
