//! Symbolic values tracked during emulation.
//!
//! A [`SymValue`] is a small expression tree over registers, the entry
//! stack pointer, fixed addresses and memory dereferences. Values are
//! immutable: every operation returns a new value. Comparisons are purely
//! syntactic, so two different expressions for the same location are
//! distinct unless [`SymValue::add`] folds them into the same shape.

use std::fmt;

/// A register or memory expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymValue {
    /// The constant zero / NULL.
    Zero,
    /// Any other known constant.
    Imm(i64),
    /// The value a register held when emulation started.
    Reg(String),
    /// `sp + offset`, relative to the stack pointer at emulation start.
    Stack { sp: String, offset: i64 },
    /// An address baked into the binary (RIP- or GOT-relative).
    Global(u64),
    /// Memory load from the inner address.
    Deref(Box<SymValue>),
    /// `base + offset` for bases that do not fold (registers, loads).
    Offset(Box<SymValue>, i64),
    /// Opaque expression kept only for rendering (e.g. a call target).
    Unknown(String),
}

impl SymValue {
    pub fn reg(name: &str) -> Self {
        SymValue::Reg(name.to_string())
    }

    pub fn stack(sp: &str, offset: i64) -> Self {
        SymValue::Stack { sp: sp.to_string(), offset }
    }

    /// A constant; zero is normalized to [`SymValue::Zero`].
    pub fn imm(value: i64) -> Self {
        if value == 0 {
            SymValue::Zero
        } else {
            SymValue::Imm(value)
        }
    }

    /// `self + k`, folding into stack, global and constant values.
    pub fn add(&self, k: i64) -> Self {
        if k == 0 {
            return self.clone();
        }
        match self {
            SymValue::Zero => SymValue::Imm(k),
            SymValue::Imm(v) => SymValue::imm(v.wrapping_add(k)),
            SymValue::Stack { sp, offset } => SymValue::Stack {
                sp: sp.clone(),
                offset: offset.wrapping_add(k),
            },
            SymValue::Global(addr) => SymValue::Global(addr.wrapping_add(k as u64)),
            SymValue::Offset(base, off) => {
                let total = off.wrapping_add(k);
                if total == 0 {
                    (**base).clone()
                } else {
                    SymValue::Offset(base.clone(), total)
                }
            }
            other => SymValue::Offset(Box::new(other.clone()), k),
        }
    }

    /// The value loaded from the address `self`.
    pub fn deref(&self) -> Self {
        SymValue::Deref(Box::new(self.clone()))
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, SymValue::Zero)
    }

    /// Offset of an un-dereferenced stack address.
    pub fn stack_offset(&self) -> Option<i64> {
        match self {
            SymValue::Stack { offset, .. } => Some(*offset),
            _ => None,
        }
    }

    pub fn global_addr(&self) -> Option<u64> {
        match self {
            SymValue::Global(addr) => Some(*addr),
            _ => None,
        }
    }

    /// Strip outer dereferences, returning the innermost operand and
    /// how many loads were peeled off.
    pub fn strip_derefs(&self) -> (&SymValue, u32) {
        let mut cur = self;
        let mut depth = 0;
        while let SymValue::Deref(inner) = cur {
            cur = inner;
            depth += 1;
        }
        (cur, depth)
    }

    /// Whether this expression depends on a fixed address in the binary.
    pub fn is_global_relative(&self) -> bool {
        match self {
            SymValue::Global(_) => true,
            SymValue::Deref(inner) | SymValue::Offset(inner, _) => inner.is_global_relative(),
            _ => false,
        }
    }
}

/// Render a signed displacement as `+0x10` / `-0x28`.
pub(crate) fn fmt_disp(f: &mut fmt::Formatter<'_>, k: i64) -> fmt::Result {
    if k < 0 {
        write!(f, "-{:#x}", k.unsigned_abs())
    } else {
        write!(f, "+{:#x}", k)
    }
}

impl fmt::Display for SymValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymValue::Zero => write!(f, "0"),
            SymValue::Imm(v) if *v < 0 => write!(f, "-{:#x}", v.unsigned_abs()),
            SymValue::Imm(v) => write!(f, "{:#x}", v),
            SymValue::Reg(name) => write!(f, "{}", name),
            SymValue::Stack { sp, offset } => {
                write!(f, "{}", sp)?;
                if *offset != 0 {
                    fmt_disp(f, *offset)?;
                }
                Ok(())
            }
            SymValue::Global(addr) => write!(f, "{:#x}", addr),
            SymValue::Deref(inner) => write!(f, "[{}]", inner),
            SymValue::Offset(base, k) => {
                write!(f, "{}", base)?;
                fmt_disp(f, *k)
            }
            SymValue::Unknown(text) => write!(f, "{}", text),
        }
    }
}
