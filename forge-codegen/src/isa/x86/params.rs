//! cdecl calling-convention materialization: every parameter on the stack,
//! right to left, caller cleans up afterward.
//!
//! Simpler than the System V path: no register classification at all,
//! which is why x86-32 carries no equivalent of
//! [`crate::isa::x64::params::ParamClass::Integer`].

use crate::typedesc::TypeDesc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackParam {
    pub offset: u32,
}

pub struct Params {
    stack_offset: u32,
}

impl Params {
    pub fn new() -> Self {
        Params { stack_offset: 0 }
    }

    /// Classify one parameter: always a stack slot, padded to 4-byte
    /// pointer width. `Complex` parameters still pass a hidden pointer, but
    /// that pointer is itself just another 4-byte stack slot here.
    pub fn classify(&mut self, desc: &TypeDesc) -> StackParam {
        let size = if desc.is_complex() { 4 } else { desc.size().size32().max(4) };
        let offset = self.stack_offset;
        self.stack_offset += size.div_ceil(4) * 4;
        StackParam { offset }
    }

    pub fn stack_bytes_used(&self) -> u32 {
        self.stack_offset
    }
}

impl Default for Params {
    fn default() -> Self {
        Self::new()
    }
}

/// Integer results return in `eax` (`edx:eax` for 64-bit integers); real
/// results return on the x87 stack via `fstp`; `Complex` results use a
/// hidden pointer passed as an hidden first stack parameter, same as
/// System V.
pub enum ReturnClass {
    Eax,
    EdxEax,
    X87,
    Memory,
}

pub fn classify_return(desc: &TypeDesc) -> ReturnClass {
    use crate::typedesc::PrimitiveKind;
    match desc {
        TypeDesc::Primitive { kind: PrimitiveKind::None, .. } => ReturnClass::Eax,
        TypeDesc::Primitive { kind: PrimitiveKind::Real, .. } => ReturnClass::X87,
        TypeDesc::Primitive { size, .. } if size.size32() > 4 => ReturnClass::EdxEax,
        TypeDesc::Primitive { .. } => ReturnClass::Eax,
        TypeDesc::Complex { .. } => ReturnClass::Memory,
        TypeDesc::Simple { size, .. } if size.size32() > 4 => ReturnClass::Memory,
        TypeDesc::Simple { .. } => ReturnClass::Eax,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::size::s_int;
    use crate::typedesc::PrimitiveKind;

    #[test]
    fn params_pack_left_to_right_on_the_stack() {
        let mut p = Params::new();
        let a = p.classify(&TypeDesc::Primitive { kind: PrimitiveKind::Integer, size: s_int() });
        let b = p.classify(&TypeDesc::Primitive { kind: PrimitiveKind::Integer, size: s_int() });
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 4);
    }
}
