//! ELF library loading.
//!
//! Parses the target library once with goblin and keeps what discovery
//! needs: executable sections, function symbols, loadable segments for
//! address translation, the GOT base and the GNU build-id.

use std::collections::BTreeSet;
use std::path::Path;

use goblin::elf::Elf;

use crate::error::Result;
use crate::strings::{self, StringLookup};
use crate::types::Arch;

/// A function symbol from `.symtab` or `.dynsym`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub addr: u64,
    /// Size in bytes (0 if unknown).
    pub size: u64,
}

/// Borrowed view of an executable section.
#[derive(Debug, Clone, Copy)]
pub struct ExecSection<'a> {
    pub name: &'a str,
    pub addr: u64,
    pub data: &'a [u8],
}

#[derive(Debug, Clone)]
struct Segment {
    vaddr: u64,
    offset: u64,
    filesz: u64,
}

#[derive(Debug, Clone)]
struct Section {
    name: String,
    addr: u64,
    offset: u64,
    size: u64,
}

/// A parsed C library image.
pub struct LibraryImage {
    path: String,
    data: Vec<u8>,
    arch: Arch,
    segments: Vec<Segment>,
    exec_sections: Vec<Section>,
    symbols: Vec<Symbol>,
    got: Option<u64>,
    build_id: Option<String>,
}

impl LibraryImage {
    /// Read and parse a library from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::parse(path.display().to_string(), data)
    }

    /// Parse an in-memory library; `path` only labels error messages.
    pub fn parse(path: String, data: Vec<u8>) -> Result<Self> {
        let (arch, segments, exec_sections, symbols, got, build_id) = {
            let elf = Elf::parse(&data)?;
            let arch = Arch::from_machine(elf.header.e_machine)?;

            let segments = elf
                .program_headers
                .iter()
                .filter(|ph| ph.p_type == goblin::elf::program_header::PT_LOAD)
                .map(|ph| Segment {
                    vaddr: ph.p_vaddr,
                    offset: ph.p_offset,
                    filesz: ph.p_filesz,
                })
                .collect::<Vec<_>>();

            let mut exec_sections = Vec::new();
            let mut got_plt = None;
            let mut got = None;
            for sh in &elf.section_headers {
                let name = elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("");
                match name {
                    ".got.plt" => got_plt = Some(sh.sh_addr),
                    ".got" => got = Some(sh.sh_addr),
                    _ => {}
                }
                if sh.is_executable() && sh.sh_type != goblin::elf::section_header::SHT_NOBITS {
                    if sh.sh_offset.saturating_add(sh.sh_size) > data.len() as u64 {
                        log::warn!("section {} extends past end of file, skipped", name);
                        continue;
                    }
                    exec_sections.push(Section {
                        name: name.to_string(),
                        addr: sh.sh_addr,
                        offset: sh.sh_offset,
                        size: sh.sh_size,
                    });
                }
            }

            let mut symbols = Vec::new();
            let tables = [(&elf.syms, &elf.strtab), (&elf.dynsyms, &elf.dynstrtab)];
            for (syms, strtab) in tables {
                for sym in syms.iter() {
                    if !sym.is_function() || sym.st_value == 0 {
                        continue;
                    }
                    if let Some(name) = strtab.get_at(sym.st_name) {
                        if !name.is_empty() {
                            symbols.push(Symbol {
                                name: name.to_string(),
                                addr: sym.st_value,
                                size: sym.st_size,
                            });
                        }
                    }
                }
            }
            // One name per address; public names win over `__` aliases.
            symbols.sort_by(|a, b| {
                (a.addr, a.name.starts_with('_'), &a.name).cmp(&(b.addr, b.name.starts_with('_'), &b.name))
            });
            symbols.dedup_by_key(|s| s.addr);

            let build_id = read_build_id(&elf, &data);

            (arch, segments, exec_sections, symbols, got_plt.or(got), build_id)
        };

        Ok(Self {
            path,
            data,
            arch,
            segments,
            exec_sections,
            symbols,
            got,
            build_id,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Address the GOT register holds in position-independent i386 code.
    pub fn got_base(&self) -> Option<u64> {
        self.got
    }

    /// GNU build-id as lowercase hex.
    pub fn build_id(&self) -> Option<&str> {
        self.build_id.as_deref()
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn exec_sections(&self) -> Vec<ExecSection<'_>> {
        self.exec_sections
            .iter()
            .map(|s| ExecSection {
                name: &s.name,
                addr: s.addr,
                data: &self.data[s.offset as usize..(s.offset + s.size) as usize],
            })
            .collect()
    }

    pub fn function_starts(&self) -> BTreeSet<u64> {
        self.symbols.iter().map(|s| s.addr).collect()
    }

    /// Address of a function symbol by exact name.
    pub fn symbol_addr(&self, name: &str) -> Option<u64> {
        self.symbols.iter().find(|s| s.name == name).map(|s| s.addr)
    }

    /// Name an address as `sym` or `sym+0xN`.
    pub fn symbolize(&self, addr: u64) -> Option<String> {
        symbolize(&self.symbols, addr)
    }

    /// Translate a virtual address into a file offset.
    pub fn file_offset(&self, vaddr: u64) -> Option<u64> {
        self.segments
            .iter()
            .find(|seg| vaddr >= seg.vaddr && vaddr - seg.vaddr < seg.filesz)
            .map(|seg| vaddr - seg.vaddr + seg.offset)
    }
}

impl StringLookup for LibraryImage {
    fn find_cstr(&self, literal: &[u8]) -> Option<u64> {
        strings::find_cstr(&self.data, literal)
    }

    fn holds_str(&self, addr: u64, literal: &[u8]) -> bool {
        match self.file_offset(addr) {
            Some(off) => self.data.get(off as usize..).map_or(false, |rest| rest.starts_with(literal)),
            None => false,
        }
    }
}

/// Look up `addr` in a list of symbols sorted by address.
pub fn symbolize(symbols: &[Symbol], addr: u64) -> Option<String> {
    let idx = symbols.partition_point(|s| s.addr <= addr);
    let sym = symbols.get(idx.checked_sub(1)?)?;
    if sym.addr == addr {
        Some(sym.name.clone())
    } else if addr - sym.addr < sym.size {
        Some(format!("{}+{:#x}", sym.name, addr - sym.addr))
    } else {
        None
    }
}

fn read_build_id(elf: &Elf, data: &[u8]) -> Option<String> {
    let notes = elf.iter_note_sections(data, Some(".note.gnu.build-id"))?;
    for note in notes.flatten() {
        if note.n_type == goblin::elf::note::NT_GNU_BUILD_ID {
            return Some(note.desc.iter().map(|b| format!("{:02x}", b)).collect());
        }
    }
    None
}
