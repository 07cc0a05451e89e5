//! Shared x86 instruction parsing and symbolic execution.
//!
//! Both x86 adapters read Intel-syntax text (objdump or iced-x86) and
//! replay a small subset of the instruction set over [`SymValue`]s. The
//! adapters differ only in register naming and calling convention, which
//! live in [`crate::amd64`] and [`crate::i386`].

use std::collections::{BTreeMap, HashMap};

use crate::disasm::Instruction;
use crate::symbolic::SymValue;
use crate::types::Arch;

/// Prefixes that may precede the mnemonic.
const PREFIXES: &[&str] = &[
    "bnd", "notrack", "lock", "rep", "repz", "repe", "repnz", "repne", "data16", "addr32",
];

/// Operand-size keywords dropped before parsing memory operands.
const SIZE_WORDS: &[&str] = &[
    "byte", "word", "dword", "qword", "fword", "tbyte", "oword", "xmmword", "ymmword",
    "zmmword", "ptr",
];

pub const AMD64_REGISTERS: [&str; 16] = [
    "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "rbp", "rsp",
    "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15",
];

pub const I386_REGISTERS: [&str; 8] = ["eax", "ebx", "ecx", "edx", "esi", "edi", "ebp", "esp"];

/// Split an instruction body into its mnemonic and operand text.
pub fn split_mnemonic(body: &str) -> (&str, &str) {
    let mut rest = body.trim();
    loop {
        let (word, tail) = match rest.split_once(char::is_whitespace) {
            Some((word, tail)) => (word, tail.trim_start()),
            None => (rest, ""),
        };
        if PREFIXES.contains(&word) && !tail.is_empty() {
            rest = tail;
            continue;
        }
        return (word, tail);
    }
}

/// Instruction text without its trailing `# ...` comment.
pub fn body_of(text: &str) -> &str {
    text.split('#').next().unwrap_or("")
}

/// `jmp` and every conditional jump.
pub fn is_branch(text: &str) -> bool {
    let (mnemonic, _) = split_mnemonic(body_of(text));
    mnemonic.starts_with('j')
}

pub fn is_call(text: &str) -> bool {
    let (mnemonic, _) = split_mnemonic(body_of(text));
    mnemonic == "call" || mnemonic == "callq"
}

/// A parsed instruction operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Reg(String),
    Imm(i64),
    Mem(MemRef),
}

/// `segment:[base + index*scale + disp]`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemRef {
    pub segment: Option<String>,
    pub base: Option<String>,
    pub index: Option<(String, i64)>,
    pub disp: i64,
    /// Access width in bytes from a `BYTE`/`DWORD`/... keyword, if given.
    pub size: Option<i64>,
}

/// Width in bytes named by an operand-size keyword.
fn size_keyword(word: &str) -> Option<i64> {
    match word {
        "byte" => Some(1),
        "word" => Some(2),
        "dword" => Some(4),
        "fword" => Some(6),
        "qword" => Some(8),
        "tbyte" => Some(10),
        "oword" | "xmmword" => Some(16),
        "ymmword" => Some(32),
        "zmmword" => Some(64),
        _ => None,
    }
}

/// Parse a comma-separated operand list.
pub fn parse_operands(text: &str) -> Option<Vec<Operand>> {
    let text = text.trim();
    if text.is_empty() {
        return Some(Vec::new());
    }
    split_top_level(text).into_iter().map(parse_operand).collect()
}

fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

pub fn parse_operand(text: &str) -> Option<Operand> {
    let lowered = text.to_ascii_lowercase();
    let size = lowered.split_whitespace().find_map(size_keyword);
    let stripped: String = lowered
        .split_whitespace()
        .filter(|w| !SIZE_WORDS.contains(w))
        .collect::<Vec<_>>()
        .join("");
    if stripped.is_empty() {
        return None;
    }

    let (segment, rest) = match stripped.split_once(':') {
        Some((seg, rest)) => (Some(seg.to_string()), rest),
        None => (None, stripped.as_str()),
    };

    if let Some(inner) = rest.strip_prefix('[') {
        let inner = inner.strip_suffix(']')?;
        let mut mem = parse_mem(inner)?;
        mem.segment = segment;
        mem.size = size;
        return Some(Operand::Mem(mem));
    }
    if let Some(value) = parse_number(rest) {
        return Some(match segment {
            // `fs:0x28` style absolute reference
            Some(seg) => Operand::Mem(MemRef { segment: Some(seg), disp: value, size, ..MemRef::default() }),
            None => Operand::Imm(value),
        });
    }
    if segment.is_none() && rest.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Some(Operand::Reg(rest.to_string()));
    }
    None
}

fn parse_mem(inner: &str) -> Option<MemRef> {
    let mut mem = MemRef::default();
    let mut terms = Vec::new();
    let mut sign = 1i64;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        if c == '+' || c == '-' {
            if i > start {
                terms.push((sign, &inner[start..i]));
            }
            sign = if c == '-' { -1 } else { 1 };
            start = i + 1;
        }
    }
    if start < inner.len() {
        terms.push((sign, &inner[start..]));
    }

    for (sign, term) in terms {
        if let Some((lhs, rhs)) = term.split_once('*') {
            let (reg, scale) = match parse_number(rhs) {
                Some(scale) => (lhs, scale),
                None => (rhs, parse_number(lhs)?),
            };
            if sign < 0 || mem.index.is_some() {
                return None;
            }
            mem.index = Some((reg.to_string(), scale));
        } else if let Some(value) = parse_number(term) {
            mem.disp = mem.disp.wrapping_add(sign.wrapping_mul(value));
        } else if sign < 0 {
            return None;
        } else if mem.base.is_none() {
            mem.base = Some(term.to_string());
        } else if mem.index.is_none() {
            mem.index = Some((term.to_string(), 1));
        } else {
            return None;
        }
    }
    Some(mem)
}

/// `0x..` hex, plain decimal, or either with a leading minus.
pub fn parse_number(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = if let Some(hex) = digits.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).ok()? as i64
    } else if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.parse::<u64>().ok()? as i64
    } else {
        return None;
    };
    Some(if negative { value.wrapping_neg() } else { value })
}

/// First token of a comment as a hex address (`3eaeb0` or `0x3eaeb0`).
fn comment_address(comment: &str) -> Option<u64> {
    let token = comment.split_whitespace().next()?;
    let hex = token.strip_prefix("0x").unwrap_or(token);
    u64::from_str_radix(hex, 16).ok()
}

/// Map a register name to the name the core tracks it under.
pub fn canonical_register(arch: Arch, name: &str) -> Option<&'static str> {
    match arch {
        Arch::Amd64 => {
            if let Some(reg) = AMD64_REGISTERS.iter().copied().find(|r| *r == name) {
                return Some(reg);
            }
            let full = match name {
                "eax" => "rax",
                "ebx" => "rbx",
                "ecx" => "rcx",
                "edx" => "rdx",
                "esi" => "rsi",
                "edi" => "rdi",
                "ebp" => "rbp",
                "esp" => "rsp",
                _ => {
                    // r8d..r15d
                    let base = name.strip_suffix('d')?;
                    let numbered = base.len() > 1
                        && base.starts_with('r')
                        && base[1..].bytes().all(|b| b.is_ascii_digit());
                    return AMD64_REGISTERS.iter().copied().find(|r| numbered && *r == base);
                }
            };
            Some(full)
        }
        Arch::I386 => I386_REGISTERS.iter().copied().find(|r| *r == name),
    }
}

/// Symbolic machine state shared by the x86 adapters.
#[derive(Debug, Clone)]
pub struct X86Core {
    arch: Arch,
    registers: HashMap<String, SymValue>,
    stack: BTreeMap<i64, SymValue>,
    constraints: Vec<String>,
    /// Set once the terminal call has been replayed.
    called: bool,
}

impl X86Core {
    pub fn new(arch: Arch) -> Self {
        let names: &[&str] = match arch {
            Arch::Amd64 => &AMD64_REGISTERS,
            Arch::I386 => &I386_REGISTERS,
        };
        let mut registers: HashMap<String, SymValue> =
            names.iter().map(|r| (r.to_string(), SymValue::reg(r))).collect();
        let sp = arch.stack_pointer();
        registers.insert(sp.to_string(), SymValue::stack(sp, 0));
        let pc = arch.program_counter();
        registers.insert(pc.to_string(), SymValue::reg(pc));
        Self {
            arch,
            registers,
            stack: BTreeMap::new(),
            constraints: Vec::new(),
            called: false,
        }
    }

    pub fn registers(&self) -> &HashMap<String, SymValue> {
        &self.registers
    }

    pub fn stack(&self) -> &BTreeMap<i64, SymValue> {
        &self.stack
    }

    pub fn constraints(&self) -> &[String] {
        &self.constraints
    }

    /// Current value of a register (by any alias).
    pub fn register(&self, name: &str) -> Option<SymValue> {
        let canonical = canonical_register(self.arch, name)?;
        self.registers.get(canonical).cloned()
    }

    /// Overwrite a register before emulation starts.
    pub fn seed_register(&mut self, name: &str, value: SymValue) -> bool {
        self.set_register(name, value).is_some()
    }

    /// Value stored at `sp + offset`, or the unknown load `[sp+offset]`.
    pub fn stack_slot(&self, offset: i64) -> SymValue {
        self.stack
            .get(&offset)
            .cloned()
            .unwrap_or_else(|| SymValue::stack(self.arch.stack_pointer(), offset).deref())
    }

    /// Load a word from `addr`, resolving stack addresses to slots.
    pub fn load(&self, addr: &SymValue) -> SymValue {
        match addr.stack_offset() {
            Some(offset) => self.stack_slot(offset),
            None => addr.deref(),
        }
    }

    /// The stack word `index` words above the current stack pointer.
    pub fn stack_argument(&self, index: usize) -> SymValue {
        let sp = &self.registers[self.arch.stack_pointer()];
        self.load(&sp.add(self.arch.word_size() * index as i64))
    }

    /// Replay one instruction. Returns false when it cannot be modeled.
    pub fn process(&mut self, insn: &Instruction) -> bool {
        if self.called {
            return false;
        }
        let (mnemonic, operands) = split_mnemonic(insn.body());
        match mnemonic {
            "nop" | "endbr64" | "endbr32" | "cmp" | "test" => true,
            "call" | "callq" => {
                let target = insn
                    .annotation()
                    .map(str::to_string)
                    .unwrap_or_else(|| operands.trim().to_string());
                self.registers
                    .insert(self.arch.program_counter().to_string(), SymValue::Unknown(target));
                self.called = true;
                true
            }
            _ => match parse_operands(operands) {
                Some(ops) => self.execute(mnemonic, &ops, insn).is_some(),
                None => false,
            },
        }
    }

    fn execute(&mut self, mnemonic: &str, ops: &[Operand], insn: &Instruction) -> Option<()> {
        match (mnemonic, ops) {
            ("mov" | "movabs", [dst, src]) => {
                let value = self.read(src, insn)?;
                self.write(dst, value, insn)
            }
            ("lea", [Operand::Reg(dst), Operand::Mem(mem)]) => {
                let addr = self.address(mem, insn)?;
                self.set_register(dst, addr)
            }
            ("xor", [Operand::Reg(a), Operand::Reg(b)]) => {
                if canonical_register(self.arch, a)? != canonical_register(self.arch, b)? {
                    return None;
                }
                self.set_register(a, SymValue::Zero)
            }
            ("add", [dst @ Operand::Reg(_), Operand::Imm(k)]) => {
                let value = self.read(dst, insn)?.add(*k);
                self.write(dst, value, insn)
            }
            ("sub", [dst @ Operand::Reg(_), Operand::Imm(k)]) => {
                let value = self.read(dst, insn)?.add(k.wrapping_neg());
                self.write(dst, value, insn)
            }
            ("push", [src]) => {
                let value = self.read(src, insn)?;
                let top = self.sp_offset()? - self.arch.word_size();
                self.stack.insert(top, value);
                self.set_sp(top);
                Some(())
            }
            ("pop", [dst]) => {
                let top = self.sp_offset()?;
                let value = self.stack_slot(top);
                self.set_sp(top + self.arch.word_size());
                self.write(dst, value, insn)
            }
            _ => None,
        }
    }

    fn sp_offset(&self) -> Option<i64> {
        self.registers[self.arch.stack_pointer()].stack_offset()
    }

    fn set_sp(&mut self, offset: i64) {
        let sp = self.arch.stack_pointer();
        self.registers.insert(sp.to_string(), SymValue::stack(sp, offset));
    }

    fn set_register(&mut self, name: &str, value: SymValue) -> Option<()> {
        let canonical = canonical_register(self.arch, name)?;
        self.registers.insert(canonical.to_string(), value);
        Some(())
    }

    fn read(&self, op: &Operand, insn: &Instruction) -> Option<SymValue> {
        match op {
            Operand::Reg(name) => self.register(name),
            Operand::Imm(value) => Some(SymValue::imm(*value)),
            Operand::Mem(mem) => {
                if self.is_partial(mem) {
                    return None;
                }
                Some(self.load(&self.address(mem, insn)?))
            }
        }
    }

    fn write(&mut self, op: &Operand, value: SymValue, insn: &Instruction) -> Option<()> {
        match op {
            Operand::Reg(name) => self.set_register(name, value),
            Operand::Mem(mem) => {
                if self.is_partial(mem) {
                    return None;
                }
                let addr = self.address(mem, insn)?;
                if let Some(offset) = addr.stack_offset() {
                    self.stack.insert(offset, value);
                    return Some(());
                }
                if addr.is_global_relative() {
                    return None;
                }
                let fact = format!("writable: {}", addr);
                if !self.constraints.contains(&fact) {
                    self.constraints.push(fact);
                }
                Some(())
            }
            Operand::Imm(_) => None,
        }
    }

    /// Accesses narrower than a stack word only touch part of a value.
    fn is_partial(&self, mem: &MemRef) -> bool {
        mem.size.map_or(false, |size| size < self.arch.word_size())
    }

    /// Evaluate the address a memory operand refers to.
    fn address(&self, mem: &MemRef, insn: &Instruction) -> Option<SymValue> {
        if mem.segment.is_some() || mem.index.is_some() {
            return None;
        }
        match mem.base.as_deref() {
            None => Some(SymValue::Global(mem.disp as u64)),
            Some("rip") | Some("eip") => {
                let target = comment_address(insn.comment()?)?;
                Some(SymValue::Global(target))
            }
            Some(base) => Some(self.register(base)?.add(mem.disp)),
        }
    }
}
