//! ABI-facing description of a parameter or return value's layout and
//! copy/destroy behavior, expressed as a closed sum type with pattern
//! matching at the (few) use sites -- the calling-convention materializer
//! and the frame lowering's destructor walk.

use crate::reference::Reference;
use crate::size::Size;

/// The three ABI-relevant flavors a scalar register half can be classified
/// as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimitiveKind {
    /// No value (e.g. a `void` result).
    None,
    Pointer,
    Integer,
    Real,
}

/// A member of a `SimpleDesc`, with its offset recorded for both 32- and
/// 64-bit layouts since aggregate packing can differ between them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    pub kind: PrimitiveKind,
    pub size: Size,
    pub offset32: u32,
    pub offset64: u32,
}

/// A function pointer to a user-supplied copy constructor or destructor,
/// called by address at runtime. Carried as a `Reference` so relocation of
/// the target function (e.g. when the GC moves code) propagates the same
/// way any other code reference does.
#[derive(Clone)]
pub struct UserFn(pub Reference);

/// Describes a single value as it crosses the ABI boundary: a parameter or
/// a function result.
#[derive(Clone)]
pub enum TypeDesc {
    /// A scalar that fits in one register and is bitwise-copyable.
    Primitive { kind: PrimitiveKind, size: Size },

    /// A value with non-trivial copy/destroy semantics. Always passed by a
    /// hidden pointer to a caller-materialized copy; never split across
    /// registers.
    Complex {
        size: Size,
        ctor: UserFn,
        dtor: UserFn,
    },

    /// A trivially-copyable aggregate. May be split across registers
    /// (x86-64 "eightbyte" classification) or passed on the stack depending
    /// on its member layout.
    Simple { size: Size, members: Vec<Member> },
}

impl TypeDesc {
    pub fn size(&self) -> Size {
        match self {
            TypeDesc::Primitive { size, .. } => *size,
            TypeDesc::Complex { size, .. } => *size,
            TypeDesc::Simple { size, .. } => *size,
        }
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, TypeDesc::Complex { .. })
    }
}
