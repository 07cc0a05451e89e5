//! Disassembly sources.
//!
//! Produces per-function blocks of [`Instruction`] line records, either by
//! decoding executable sections with iced-x86 or by parsing the Intel
//! syntax output of GNU objdump. Both sources render the same text shape:
//! branch and call targets carry a `<symbol>` annotation and RIP-relative
//! operands carry a `# 0xADDR` comment with the absolute target.

use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;

use iced_x86::{Decoder, DecoderOptions, FlowControl, Formatter, FormatterOutput,
               FormatterTextKind, Instruction as IcedInstruction, IntelFormatter, OpKind};

use crate::elf::LibraryImage;
use crate::error::{Error, Result};
use crate::types::Arch;

/// One disassembled line: where it lives and what it says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Address as shown by the disassembler.
    pub offset: u64,
    /// Mnemonic, operands and annotations.
    pub text: String,
}

impl Instruction {
    pub fn new(offset: u64, text: impl Into<String>) -> Self {
        Self { offset, text: text.into() }
    }

    /// The instruction proper, without the trailing `# ...` comment.
    pub fn body(&self) -> &str {
        match self.text.find('#') {
            Some(pos) => self.text[..pos].trim_end(),
            None => self.text.trim_end(),
        }
    }

    /// The comment after `#`, if any.
    pub fn comment(&self) -> Option<&str> {
        self.text.find('#').map(|pos| self.text[pos + 1..].trim())
    }

    /// Symbol named by a trailing `<...>` annotation in the body.
    pub fn annotation(&self) -> Option<&str> {
        let body = self.body();
        let inner = body.strip_suffix('>')?;
        let start = inner.rfind('<')?;
        Some(&inner[start + 1..])
    }
}

/// Instructions of one function, in address order.
pub type Block = Vec<Instruction>;

/// Parse `objdump -d -M intel --no-show-raw-insn` output into blocks.
///
/// Every line that is not an instruction (function headers, section
/// banners, blank separators) closes the current block.
pub fn parse_objdump(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();
    for line in text.lines() {
        match parse_objdump_line(line) {
            Some(insn) => current.push(insn),
            None => {
                if !current.is_empty() {
                    blocks.push(std::mem::take(&mut current));
                }
            }
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

fn parse_objdump_line(line: &str) -> Option<Instruction> {
    let (addr, rest) = line.split_once(':')?;
    let addr = addr.trim();
    if addr.is_empty() || !addr.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let text = rest.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return None;
    }
    let offset = u64::from_str_radix(addr, 16).ok()?;
    Some(Instruction::new(offset, text))
}

/// Disassemble a library with the external GNU objdump.
pub fn run_objdump(path: &Path, arch: Arch) -> Result<Vec<Block>> {
    let output = Command::new("objdump")
        .arg("--no-show-raw-insn")
        .arg("-M")
        .arg("intel")
        .arg("-m")
        .arg(arch.objdump_machine())
        .arg("-d")
        .arg(path)
        .output()
        .map_err(|e| Error::Disassembler(format!("spawn objdump: {}", e)))?;
    if !output.status.success() {
        return Err(Error::Disassembler(format!(
            "objdump exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(parse_objdump(&String::from_utf8_lossy(&output.stdout)))
}

/// Disassemble every executable section of a library with iced-x86.
pub fn disassemble_image(image: &LibraryImage, arch: Arch) -> Vec<Block> {
    let starts = image.function_starts();
    let symbolize = |addr: u64| image.symbolize(addr);
    let mut blocks = Vec::new();
    for section in image.exec_sections() {
        log::debug!(
            "disassembling {} ({:#x} bytes at {:#x})",
            section.name,
            section.data.len(),
            section.addr
        );
        let insns = disassemble(section.data, section.addr, arch, &symbolize);
        blocks.extend(split_blocks(insns, &starts));
    }
    blocks
}

/// Decode a run of code bytes into annotated Intel-syntax lines.
///
/// `symbolize` names branch targets; unnamed targets get no annotation.
pub fn disassemble(
    code: &[u8],
    base_addr: u64,
    arch: Arch,
    symbolize: &dyn Fn(u64) -> Option<String>,
) -> Vec<Instruction> {
    let mut decoder = Decoder::with_ip(arch.bits(), code, base_addr, DecoderOptions::NONE);
    let mut formatter = intel_formatter();
    let mut output = FormatterOutputBuffer::new();
    let mut results = Vec::new();
    let mut insn = IcedInstruction::default();

    while decoder.can_decode() {
        decoder.decode_out(&mut insn);
        if insn.is_invalid() {
            continue;
        }

        output.clear();
        formatter.format(&insn, &mut output);
        let mut text = output.text().to_string();

        let is_flow = matches!(
            insn.flow_control(),
            FlowControl::Call | FlowControl::UnconditionalBranch | FlowControl::ConditionalBranch
        );
        let is_near = matches!(
            insn.op0_kind(),
            OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64
        );
        if is_flow && is_near {
            if let Some(name) = symbolize(insn.near_branch_target()) {
                text.push_str(&format!(" <{}>", name));
            }
        }
        if insn.is_ip_rel_memory_operand() {
            text.push_str(&format!(" # {:#x}", insn.ip_rel_memory_address()));
        }

        results.push(Instruction::new(insn.ip(), text));
    }

    results
}

/// Cut a linear instruction stream at function entry points.
pub fn split_blocks(insns: Vec<Instruction>, starts: &BTreeSet<u64>) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut current: Block = Vec::new();
    for insn in insns {
        if starts.contains(&insn.offset) && !current.is_empty() {
            blocks.push(std::mem::take(&mut current));
        }
        current.push(insn);
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

/// Render a block the way objdump lays it out.
pub fn format_block(block: &[Instruction]) -> String {
    let mut out = String::new();
    for insn in block {
        out.push_str(&format!("  {:8x}:\t{}\n", insn.offset, insn.text));
    }
    out
}

fn intel_formatter() -> IntelFormatter {
    let mut formatter = IntelFormatter::new();
    let options = formatter.options_mut();
    options.set_hex_prefix("0x");
    options.set_hex_suffix("");
    options.set_uppercase_hex(false);
    options.set_rip_relative_addresses(true);
    options.set_space_after_operand_separator(false);
    options.set_branch_leading_zeros(false);
    options.set_show_branch_size(false);
    formatter
}

/// Internal buffer for iced-x86 formatter output.
struct FormatterOutputBuffer {
    text: String,
}

impl FormatterOutputBuffer {
    fn new() -> Self {
        Self { text: String::new() }
    }

    fn clear(&mut self) {
        self.text.clear();
    }

    fn text(&self) -> &str {
        &self.text
    }
}

impl FormatterOutput for FormatterOutputBuffer {
    fn write(&mut self, text: &str, _kind: FormatterTextKind) {
        self.text.push_str(text);
    }
}
