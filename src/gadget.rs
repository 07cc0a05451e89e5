//! Gadget records and their rendering.

use std::fmt;

use colored::Colorize;
use serde::Serialize;

use crate::error::Result;

/// A file offset plus the preconditions under which jumping there
/// spawns a shell.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Gadget {
    /// Offset of the first instruction, relative to the library base.
    pub offset: u64,
    /// Predicates that must hold on entry, in the order they were derived.
    pub constraints: Vec<String>,
    /// The call that fires, e.g. `execve("/bin/sh", rsp+0x30, environ)`.
    pub effect: String,
}

impl Gadget {
    pub fn new(offset: u64, constraints: Vec<String>, effect: String) -> Self {
        Self { offset, constraints, effect }
    }

    /// Render with the offset shifted by a load base, colorized for a terminal.
    pub fn render(&self, base: u64) -> String {
        let mut out = format!(
            "{} {}\n",
            format!("{:#x}", base.wrapping_add(self.offset)).yellow(),
            self.effect.green()
        );
        if self.constraints.is_empty() {
            out.push_str(&format!("{}\n", "constraints: none".dimmed()));
        } else {
            out.push_str(&format!("{}\n", "constraints:".dimmed()));
            for constraint in &self.constraints {
                out.push_str(&format!("  {}\n", constraint));
            }
        }
        out
    }
}

impl fmt::Display for Gadget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x} {}", self.offset, self.effect)?;
        if self.constraints.is_empty() {
            return Ok(());
        }
        write!(f, "\nconstraints:")?;
        for constraint in &self.constraints {
            write!(f, "\n  {}", constraint)?;
        }
        Ok(())
    }
}

/// All gadgets, one block each, separated by blank lines.
pub fn format_gadgets(gadgets: &[Gadget], base: u64) -> String {
    gadgets
        .iter()
        .map(|g| g.render(base))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Offsets only, space separated.
pub fn format_raw(gadgets: &[Gadget], base: u64) -> String {
    gadgets
        .iter()
        .map(|g| base.wrapping_add(g.offset).to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn to_json(gadgets: &[Gadget]) -> Result<String> {
    Ok(serde_json::to_string_pretty(gadgets)?)
}

/// Order gadgets by distance to the nearest of `targets` (stable).
pub fn sort_by_proximity(gadgets: &mut [Gadget], targets: &[u64]) {
    if targets.is_empty() {
        return;
    }
    gadgets.sort_by_key(|g| {
        targets
            .iter()
            .map(|t| t.abs_diff(g.offset))
            .min()
            .unwrap_or(u64::MAX)
    });
}
