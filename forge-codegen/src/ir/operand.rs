//! `Operand`: the tagged union every instruction's dest/src slot holds,
//! expressed as a Rust enum rather than a tagged class hierarchy.

use crate::ir::entities::{Part, Variable};
use crate::reg::{CondFlag, Label, Reg};
use crate::reference::Reference;
use crate::size::{Offset, Size};

#[derive(Clone)]
pub enum Operand {
    None,
    /// A single-width constant. Constants above 32 bits are legal here but
    /// must be lowered (pooled into a `dat` block) before x86 encoding.
    Constant { value: u64, size: Size },
    /// Two constants: one used when targeting a 32-bit backend, the other
    /// for 64-bit. Lets front-ends emit e.g. a pointer-sized constant
    /// without knowing the target's word size.
    DualConstant { value32: u32, value64: u64, size: Size },
    Register(Reg),
    /// `[reg + offset]`.
    Relative { reg: Reg, offset: Offset, size: Size },
    /// `variable (+ offset)`. The carried `Size` is the size of this read,
    /// which need not equal the variable's own declared size.
    Variable { var: Variable, offset: Offset, size: Size },
    Label(Label),
    /// A block or part, used by pseudo-ops (`beginBlock`, `endBlock`,
    /// `jmpBlock`) that refer to the part graph rather than a value.
    Part(Part),
    Reference(Reference),
    CondFlag(CondFlag),
}

impl Operand {
    pub fn empty(&self) -> bool {
        matches!(self, Operand::None)
    }

    pub fn size(&self) -> Size {
        match self {
            Operand::None => Size::new(),
            Operand::Constant { size, .. } => *size,
            Operand::DualConstant { size, .. } => *size,
            Operand::Register(r) => r.size(),
            Operand::Relative { size, .. } => *size,
            Operand::Variable { size, .. } => *size,
            Operand::Label(_) => crate::size::s_ptr(),
            Operand::Part(_) => Size::new(),
            Operand::Reference(_) => crate::size::s_ptr(),
            Operand::CondFlag(_) => Size::new(),
        }
    }

    /// May this operand be used as a source (read)?
    pub fn readable(&self) -> bool {
        !matches!(self, Operand::None | Operand::Part(_))
    }

    /// May this operand be used as a destination (written)?
    pub fn writable(&self) -> bool {
        matches!(
            self,
            Operand::Register(_) | Operand::Relative { .. } | Operand::Variable { .. }
        )
    }

    pub fn is_register(&self) -> bool {
        matches!(self, Operand::Register(_))
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Operand::Relative { .. } | Operand::Variable { .. })
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Operand::Constant { .. } | Operand::DualConstant { .. })
    }

    pub fn reg(&self) -> Option<Reg> {
        match self {
            Operand::Register(r) => Some(*r),
            Operand::Relative { reg, .. } => Some(*reg),
            _ => None,
        }
    }

    pub fn variable(&self) -> Option<Variable> {
        match self {
            Operand::Variable { var, .. } => Some(*var),
            _ => None,
        }
    }

    pub fn offset(&self) -> Offset {
        match self {
            Operand::Relative { offset, .. } | Operand::Variable { offset, .. } => *offset,
            _ => Offset::default(),
        }
    }

    pub fn cond_flag(&self) -> Option<CondFlag> {
        match self {
            Operand::CondFlag(f) => Some(*f),
            _ => None,
        }
    }

    pub fn constant_word(&self, target_64bit: bool) -> Option<u64> {
        match self {
            Operand::Constant { value, .. } => Some(*value),
            Operand::DualConstant { value32, value64, .. } => {
                Some(if target_64bit { *value64 } else { *value32 as u64 })
            }
            _ => None,
        }
    }

    /// True if this constant needs more than 32 bits to represent on the
    /// given target, and therefore requires pooling into a data block
    /// rather than being encoded as an immediate.
    pub fn is_large_constant(&self, target_64bit: bool) -> bool {
        match self.constant_word(target_64bit) {
            Some(v) => target_64bit && (v > u32::MAX as u64),
            None => false,
        }
    }
}

pub fn byte_const(v: u8) -> Operand {
    Operand::Constant { value: v as u64, size: crate::size::s_byte() }
}
pub fn int_const(v: i32) -> Operand {
    Operand::Constant { value: v as u32 as u64, size: crate::size::s_int() }
}
pub fn long_const(v: i64) -> Operand {
    Operand::Constant { value: v as u64, size: crate::size::s_long() }
}
pub fn ptr_const(v: Offset) -> Operand {
    Operand::DualConstant {
        value32: v.offset32() as u32,
        value64: v.offset64() as u64,
        size: crate::size::s_ptr(),
    }
}

pub fn byte_rel(reg: Reg, offset: Offset) -> Operand {
    Operand::Relative { reg, offset, size: crate::size::s_byte() }
}
pub fn int_rel(reg: Reg, offset: Offset) -> Operand {
    Operand::Relative { reg, offset, size: crate::size::s_int() }
}
pub fn long_rel(reg: Reg, offset: Offset) -> Operand {
    Operand::Relative { reg, offset, size: crate::size::s_long() }
}
pub fn ptr_rel(reg: Reg, offset: Offset) -> Operand {
    Operand::Relative { reg, offset, size: crate::size::s_ptr() }
}

pub fn var_operand(var: Variable, offset: Offset, size: Size) -> Operand {
    Operand::Variable { var, offset, size }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reg::EAX;

    #[test]
    fn register_readable_and_writable() {
        let op = Operand::Register(EAX);
        assert!(op.readable());
        assert!(op.writable());
    }

    #[test]
    fn label_not_writable() {
        let op = Operand::Label(Label::new(0));
        assert!(op.readable());
        assert!(!op.writable());
    }

    #[test]
    fn large_constant_detected_on_64bit_only() {
        let op = long_const(0x1_0000_0001);
        assert!(op.is_large_constant(true));
        assert!(!op.is_large_constant(false));
    }
}
