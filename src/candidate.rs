//! Candidate extraction.
//!
//! A candidate is a run of instructions inside one function that ends
//! with a call to a program-spawning routine. Every suffix of a candidate
//! is a possible gadget entry point.

use crate::config::Config;
use crate::disasm::{Block, Instruction};
use crate::types::Arch;

/// Instructions leading up to, and ending with, a qualifying call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub lines: Vec<Instruction>,
}

impl Candidate {
    pub fn new(lines: Vec<Instruction>) -> Self {
        Self { lines }
    }

    /// The terminal call.
    pub fn call(&self) -> Option<&Instruction> {
        self.lines.last()
    }

    /// Every suffix, longest first, ending with the call alone.
    pub fn suffixes(&self) -> impl Iterator<Item = &[Instruction]> + '_ {
        (0..self.lines.len()).map(move |start| &self.lines[start..])
    }
}

/// Whether `insn` calls a routine named by the config's pattern.
pub fn is_qualifying_call(insn: &Instruction, config: &Config, arch: Arch) -> bool {
    arch.is_call(&insn.text)
        && insn
            .annotation()
            .map_or(false, |target| config.is_shell_target(target))
}

/// Collect candidates from per-function blocks.
///
/// A block with several qualifying calls is cut after each one, so a
/// candidate never contains an earlier qualifying call. At most
/// `config.lookback` instructions are kept in front of each call.
pub fn extract_candidates(blocks: &[Block], config: &Config, arch: Arch) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for block in blocks {
        let mut window_start = 0;
        for (idx, insn) in block.iter().enumerate() {
            if !is_qualifying_call(insn, config, arch) {
                continue;
            }
            let start = window_start.max(idx.saturating_sub(config.lookback));
            let lines = trim(&block[start..=idx], arch);
            candidates.push(Candidate::new(lines.to_vec()));
            window_start = idx + 1;
        }
    }
    candidates
}

/// Drop everything up to and including the last branch before the call.
///
/// Code in front of a branch does not fall through into what follows it.
pub fn trim(lines: &[Instruction], arch: Arch) -> &[Instruction] {
    let Some((_, body)) = lines.split_last() else {
        return lines;
    };
    match body.iter().rposition(|insn| arch.is_branch(&insn.text)) {
        Some(pos) => &lines[pos + 1..],
        None => lines,
    }
}
