use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::x86;

/// Instruction-set architecture of the analyzed library.
///
/// The tag selects the processor adapter, the calling convention and the
/// branch predicate used while trimming candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    /// x86_64, System V calling convention.
    Amd64,
    /// 32-bit x86, cdecl calling convention.
    I386,
}

impl Arch {
    /// Map an ELF `e_machine` value to an architecture tag.
    pub fn from_machine(machine: u16) -> Result<Self> {
        match machine {
            goblin::elf::header::EM_X86_64 => Ok(Arch::Amd64),
            goblin::elf::header::EM_386 => Ok(Arch::I386),
            other => Err(Error::UnsupportedArch(format!(
                "e_machine {} ({})",
                other,
                goblin::elf::header::machine_to_str(other)
            ))),
        }
    }

    /// Decoder bitness.
    pub fn bits(self) -> u32 {
        match self {
            Arch::Amd64 => 64,
            Arch::I386 => 32,
        }
    }

    /// Size of a stack word in bytes.
    pub fn word_size(self) -> i64 {
        match self {
            Arch::Amd64 => 8,
            Arch::I386 => 4,
        }
    }

    pub fn stack_pointer(self) -> &'static str {
        match self {
            Arch::Amd64 => "rsp",
            Arch::I386 => "esp",
        }
    }

    pub fn program_counter(self) -> &'static str {
        match self {
            Arch::Amd64 => "rip",
            Arch::I386 => "eip",
        }
    }

    /// Mnemonic of call instructions in disassembly text.
    pub fn call_mnemonic(self) -> &'static str {
        "call"
    }

    /// Whether the instruction text is a call (AT&T-suffixed `callq` too).
    pub fn is_call(self, text: &str) -> bool {
        let (mnemonic, _) = x86::split_mnemonic(x86::body_of(text));
        mnemonic
            .strip_prefix(self.call_mnemonic())
            .map_or(false, |suffix| suffix.is_empty() || suffix == "q")
    }

    /// Whether the instruction text is a conditional or unconditional branch.
    pub fn is_branch(self, text: &str) -> bool {
        x86::is_branch(text)
    }

    /// Name of the objdump `-m` machine for this architecture.
    pub fn objdump_machine(self) -> &'static str {
        match self {
            Arch::Amd64 => "i386:x86-64",
            Arch::I386 => "i386",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::Amd64 => write!(f, "amd64"),
            Arch::I386 => write!(f, "i386"),
        }
    }
}

impl FromStr for Arch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "amd64" | "x86_64" | "x86-64" | "x64" => Ok(Arch::Amd64),
            "i386" | "i686" | "x86" | "ia32" => Ok(Arch::I386),
            other => Err(Error::UnsupportedArch(other.to_string())),
        }
    }
}
