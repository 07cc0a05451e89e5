//! oneshot: finds one-shot `execve("/bin/sh")` gadgets in C libraries.
//!
//! A one-gadget is an address inside libc that spawns a shell when jumped
//! to, provided a few register or stack conditions hold. Discovery works on
//! disassembly text: call sites of `exec*`/`posix_spawn*` are located, the
//! code leading up to each call is replayed symbolically, and the final
//! machine state is turned into a list of preconditions.
//!
//! # Module overview
//!
//! ## Input
//!
//! - [`error`]: error type used throughout the crate.
//! - [`types`]: the [`Arch`](types::Arch) tag.
//! - [`config`]: lookback bound and call-target pattern.
//! - [`elf`]: goblin-backed library image (symbols, sections, build-id).
//! - [`strings`]: C-string search and the `StringLookup` capability.
//! - [`disasm`]: instruction records from iced-x86 or GNU objdump.
//!
//! ## Emulation
//!
//! - [`symbolic`]: symbolic values (registers, stack offsets, loads).
//! - [`processor`]: the per-architecture processor contract.
//! - [`x86`]: operand parser and emulation core shared by the x86 adapters.
//! - [`amd64`], [`i386`]: System V and cdecl adapters.
//!
//! ## Discovery
//!
//! - [`candidate`]: instruction windows ending in a spawning call.
//! - [`resolver`]: final state to constraints and effect.
//! - [`gadget`]: the result record and its renderings.
//! - [`one_gadget`]: the discovery loop.

pub mod error;
pub mod types;
pub mod config;
pub mod symbolic;
pub mod strings;
pub mod elf;
pub mod disasm;
pub mod x86;
pub mod processor;
pub mod amd64;
pub mod i386;
pub mod candidate;
pub mod resolver;
pub mod gadget;
pub mod one_gadget;
