//! String lookup in raw library bytes.
//!
//! Discovery needs two questions answered about the target file: where a
//! NUL-terminated literal lives, and whether a given address holds a
//! literal. [`StringLookup`] is that capability; [`LibraryImage`] answers
//! it for parsed ELF files and [`RawImage`] for flat byte buffers.
//!
//! [`LibraryImage`]: crate::elf::LibraryImage

use crate::error::{Error, Result};

/// Byte-string queries over the analyzed file.
pub trait StringLookup {
    /// File offset of the first occurrence of `literal` followed by NUL.
    fn find_cstr(&self, literal: &[u8]) -> Option<u64>;

    /// Whether the bytes at virtual address `addr` begin with `literal`.
    fn holds_str(&self, addr: u64, literal: &[u8]) -> bool;
}

/// Like [`StringLookup::find_cstr`], but a missing literal is fatal.
pub fn require_cstr(lookup: &dyn StringLookup, path: &str, literal: &str) -> Result<u64> {
    lookup.find_cstr(literal.as_bytes()).ok_or_else(|| Error::StringNotFound {
        path: path.to_string(),
        literal: literal.to_string(),
    })
}

/// Offset of the first `literal\0` in `data`.
pub fn find_cstr(data: &[u8], literal: &[u8]) -> Option<u64> {
    find_all_cstr(data, literal).into_iter().next()
}

/// Offsets of every `literal\0` in `data`.
pub fn find_all_cstr(data: &[u8], literal: &[u8]) -> Vec<u64> {
    let needle_len = literal.len() + 1;
    if data.len() < needle_len {
        return Vec::new();
    }
    let mut offsets = Vec::new();
    for i in 0..=data.len() - needle_len {
        if &data[i..i + literal.len()] == literal && data[i + literal.len()] == 0 {
            offsets.push(i as u64);
        }
    }
    offsets
}

/// A flat buffer mapped at `base` (virtual address = base + file offset).
#[derive(Debug, Clone, Default)]
pub struct RawImage {
    data: Vec<u8>,
    base: u64,
}

impl RawImage {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, base: 0 }
    }

    pub fn with_base(data: Vec<u8>, base: u64) -> Self {
        Self { data, base }
    }

    /// Copy `bytes` into the buffer at `offset`, growing it as needed.
    pub fn place(&mut self, offset: usize, bytes: &[u8]) {
        if self.data.len() < offset + bytes.len() {
            self.data.resize(offset + bytes.len(), 0);
        }
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

impl StringLookup for RawImage {
    fn find_cstr(&self, literal: &[u8]) -> Option<u64> {
        find_cstr(&self.data, literal)
    }

    fn holds_str(&self, addr: u64, literal: &[u8]) -> bool {
        addr.checked_sub(self.base)
            .and_then(|off| self.data.get(off as usize..))
            .map_or(false, |rest| rest.starts_with(literal))
    }
}
