//! The processor contract every architecture adapter satisfies.
//!
//! Discovery never looks at opcodes itself: it feeds instructions to a
//! [`Processor`] and reads the resulting symbolic state back through this
//! trait. Adapters are picked by [`Arch`] tag with [`new_processor`].

use std::collections::{BTreeMap, HashMap};

use crate::amd64::Amd64Processor;
use crate::disasm::Instruction;
use crate::i386::I386Processor;
use crate::symbolic::SymValue;
use crate::types::Arch;

/// A register known to hold the library's GOT address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GotRegister {
    pub reg: String,
    pub addr: u64,
}

/// Symbolic emulator for one instruction-set architecture.
pub trait Processor {
    /// Replay one instruction. `false` means the instruction cannot be
    /// modeled and the current attempt must be abandoned.
    fn process(&mut self, insn: &Instruction) -> bool;

    /// The `index`-th argument of a call under the platform ABI.
    fn argument(&self, index: usize) -> SymValue;

    fn registers(&self) -> &HashMap<String, SymValue>;

    /// Stack slots written so far, keyed by offset from the entry stack pointer.
    fn stack(&self) -> &BTreeMap<i64, SymValue>;

    /// Name of the program-counter register.
    fn pc(&self) -> &str;

    /// Name of the stack-pointer register.
    fn sp(&self) -> &str;

    /// Bytes in a stack slot.
    fn word_size(&self) -> i64;

    /// Preconditions established while replaying (e.g. `writable: rbp-0x50`).
    fn constraints(&self) -> &[String];

    /// Value at `sp + offset` as seen by the current state.
    fn stack_slot(&self, offset: i64) -> SymValue {
        self.stack()
            .get(&offset)
            .cloned()
            .unwrap_or_else(|| SymValue::stack(self.sp(), offset).deref())
    }

    /// Symbol the program counter was sent to by the last call.
    fn call_target(&self) -> String {
        self.registers()
            .get(self.pc())
            .map(|value| value.to_string())
            .unwrap_or_default()
    }
}

/// Fresh processor for `arch`; `got` seeds the GOT register on i386.
pub fn new_processor(arch: Arch, got: Option<&GotRegister>) -> Box<dyn Processor> {
    match arch {
        Arch::Amd64 => Box::new(Amd64Processor::new()),
        Arch::I386 => match got {
            Some(got) => Box::new(I386Processor::with_got(&got.reg, got.addr)),
            None => Box::new(I386Processor::new()),
        },
    }
}

/// Replay `insns` in order. Stops at, and reports, the first failure.
pub fn emulate(processor: &mut dyn Processor, insns: &[Instruction]) -> bool {
    insns.iter().all(|insn| processor.process(insn))
}
