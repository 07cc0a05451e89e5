//! One-gadget discovery.
//!
//! Ties the pipeline together: candidates are cut from the disassembly,
//! every suffix of every candidate is replayed on a fresh processor, and
//! the final state is handed to the [`Resolver`]. Candidates are
//! independent, so they are fanned out over the rayon pool.

use std::path::Path;

use rayon::prelude::*;

use crate::candidate::{extract_candidates, Candidate};
use crate::config::Config;
use crate::disasm::{self, Block};
use crate::elf::LibraryImage;
use crate::error::Result;
use crate::gadget::Gadget;
use crate::processor::{emulate, new_processor, GotRegister};
use crate::resolver::Resolver;
use crate::strings::{require_cstr, StringLookup};
use crate::types::Arch;
use crate::x86::{self, Operand};

const BIN_SH: &str = "/bin/sh";

/// Where instruction text comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Source {
    /// iced-x86 over the executable sections.
    #[default]
    Builtin,
    /// External GNU objdump.
    Objdump,
}

/// The library being searched, as seen by the discovery loop.
#[derive(Clone, Copy)]
pub struct Target<'a> {
    pub arch: Arch,
    pub lookup: &'a (dyn StringLookup + Sync),
    /// GOT address, used to resolve GOT-relative operands on i386.
    pub got_base: Option<u64>,
    /// Label for error messages.
    pub name: &'a str,
}

/// Search a parsed library for gadgets.
pub fn find_one_gadgets(
    image: &LibraryImage,
    config: &Config,
    arch: Arch,
    source: Source,
) -> Result<Vec<Gadget>> {
    let blocks = match source {
        Source::Builtin => disasm::disassemble_image(image, arch),
        Source::Objdump => disasm::run_objdump(Path::new(image.path()), arch)?,
    };
    log::debug!("{} function blocks from {:?} disassembly", blocks.len(), source);
    let target = Target {
        arch,
        lookup: image,
        got_base: image.got_base(),
        name: image.path(),
    };
    find_gadgets(&target, &blocks, config)
}

/// Search pre-disassembled blocks for gadgets.
///
/// Fails only when `/bin/sh` is missing from the file; every per-suffix
/// failure just means fewer gadgets.
pub fn find_gadgets(target: &Target<'_>, blocks: &[Block], config: &Config) -> Result<Vec<Gadget>> {
    let binsh = require_cstr(target.lookup, target.name, BIN_SH)?;
    log::debug!("{:?} at file offset {:#x}", BIN_SH, binsh);

    let candidates = extract_candidates(blocks, config, target.arch);
    log::info!("{} candidate call sites", candidates.len());

    let mut gadgets: Vec<Gadget> = candidates
        .par_iter()
        .flat_map_iter(|candidate| candidate_gadgets(target, candidate))
        .collect();

    gadgets.sort_by(|a, b| {
        (a.offset, &a.effect, &a.constraints).cmp(&(b.offset, &b.effect, &b.constraints))
    });
    gadgets.dedup();
    log::info!("{} gadgets", gadgets.len());
    Ok(gadgets)
}

/// Gadgets from every suffix of one candidate.
pub fn candidate_gadgets(target: &Target<'_>, candidate: &Candidate) -> Vec<Gadget> {
    let got = match (target.arch, target.got_base) {
        (Arch::I386, Some(addr)) => detect_got_register(candidate, addr, target.lookup)
            .map(|reg| GotRegister { reg, addr }),
        _ => None,
    };
    let resolver = Resolver::new(target.lookup);
    log::trace!("candidate:\n{}", disasm::format_block(&candidate.lines));

    let mut gadgets = Vec::new();
    for suffix in candidate.suffixes() {
        let offset = suffix[0].offset;
        let mut processor = new_processor(target.arch, got.as_ref());
        if !emulate(&mut *processor, suffix) {
            log::debug!("{:#x}: not emulatable", offset);
            continue;
        }
        let Some(resolution) = resolver.resolve(&*processor) else {
            log::debug!("{:#x}: unresolved call to {}", offset, processor.call_target());
            continue;
        };

        let mut constraints = Vec::with_capacity(resolution.constraints.len() + 1);
        if let Some(got) = &got {
            constraints.push(format!("{} is the GOT address of libc", got.reg));
        }
        constraints.extend(resolution.constraints);
        gadgets.push(Gadget::new(offset, constraints, resolution.effect));
    }
    gadgets
}

/// Find the i386 register used as `[R+disp]` to reach `/bin/sh`.
///
/// Position-independent i386 code addresses its data relative to a
/// register loaded with the GOT address; the register is whichever one
/// makes `got + disp` land on the string.
pub fn detect_got_register(candidate: &Candidate, got: u64, lookup: &dyn StringLookup) -> Option<String> {
    for insn in &candidate.lines {
        let (_, operands) = x86::split_mnemonic(insn.body());
        let Some(operands) = x86::parse_operands(operands) else {
            continue;
        };
        for operand in operands {
            let Operand::Mem(mem) = operand else {
                continue;
            };
            if mem.segment.is_some() || mem.index.is_some() {
                continue;
            }
            let Some(base) = mem.base.as_deref().and_then(|b| x86::canonical_register(Arch::I386, b)) else {
                continue;
            };
            if base == "esp" || base == "ebp" {
                continue;
            }
            if lookup.holds_str(got.wrapping_add(mem.disp as u64), BIN_SH.as_bytes()) {
                return Some(base.to_string());
            }
        }
    }
    None
}
