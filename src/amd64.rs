//! x86_64 processor adapter (System V calling convention).

use std::collections::{BTreeMap, HashMap};

use crate::disasm::Instruction;
use crate::processor::Processor;
use crate::symbolic::SymValue;
use crate::types::Arch;
use crate::x86::X86Core;

/// Integer argument registers, in order.
pub const ARGUMENT_REGISTERS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

#[derive(Debug, Clone)]
pub struct Amd64Processor {
    core: X86Core,
}

impl Amd64Processor {
    pub fn new() -> Self {
        Self { core: X86Core::new(Arch::Amd64) }
    }
}

impl Default for Amd64Processor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for Amd64Processor {
    fn process(&mut self, insn: &Instruction) -> bool {
        self.core.process(insn)
    }

    fn argument(&self, index: usize) -> SymValue {
        match ARGUMENT_REGISTERS.get(index) {
            Some(reg) => self.core.registers()[*reg].clone(),
            // Stack arguments start right at the stack pointer; the return
            // address is not pushed yet when the call is reached.
            None => self.core.stack_argument(index - ARGUMENT_REGISTERS.len()),
        }
    }

    fn registers(&self) -> &HashMap<String, SymValue> {
        self.core.registers()
    }

    fn stack(&self) -> &BTreeMap<i64, SymValue> {
        self.core.stack()
    }

    fn pc(&self) -> &str {
        Arch::Amd64.program_counter()
    }

    fn sp(&self) -> &str {
        Arch::Amd64.stack_pointer()
    }

    fn constraints(&self) -> &[String] {
        self.core.constraints()
    }

    fn word_size(&self) -> i64 {
        Arch::Amd64.word_size()
    }
}
