//! 32-bit x86 processor adapter (cdecl calling convention).
//!
//! Position-independent i386 code reaches its data through a register
//! holding the GOT address. When discovery knows which register that is,
//! the adapter starts with it set to the GOT address as a global, so
//! `lea eax,[ebx-0x4a3c4]` evaluates to a fixed address.

use std::collections::{BTreeMap, HashMap};

use crate::disasm::Instruction;
use crate::processor::Processor;
use crate::symbolic::SymValue;
use crate::types::Arch;
use crate::x86::X86Core;

#[derive(Debug, Clone)]
pub struct I386Processor {
    core: X86Core,
}

impl I386Processor {
    pub fn new() -> Self {
        Self { core: X86Core::new(Arch::I386) }
    }

    /// Processor whose `reg` holds the GOT address `got` on entry.
    pub fn with_got(reg: &str, got: u64) -> Self {
        let mut core = X86Core::new(Arch::I386);
        if !core.seed_register(reg, SymValue::Global(got)) {
            log::warn!("{} is not an i386 register, GOT base ignored", reg);
        }
        Self { core }
    }
}

impl Default for I386Processor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for I386Processor {
    fn process(&mut self, insn: &Instruction) -> bool {
        self.core.process(insn)
    }

    /// Every argument lives on the stack, first argument at `[esp]`.
    fn argument(&self, index: usize) -> SymValue {
        self.core.stack_argument(index)
    }

    fn registers(&self) -> &HashMap<String, SymValue> {
        self.core.registers()
    }

    fn stack(&self) -> &BTreeMap<i64, SymValue> {
        self.core.stack()
    }

    fn pc(&self) -> &str {
        Arch::I386.program_counter()
    }

    fn sp(&self) -> &str {
        Arch::I386.stack_pointer()
    }

    fn constraints(&self) -> &[String] {
        self.core.constraints()
    }

    fn word_size(&self) -> i64 {
        Arch::I386.word_size()
    }
}
