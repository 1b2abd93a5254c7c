//! `Instr`: an immutable `(opcode, dest, src)` triple, plus the opcode table
//! and its `DestMode` classification.

use crate::ir::operand::Operand;
use crate::reference::Reference;
use crate::size::Size;
use crate::typedesc::TypeDesc;

/// How an opcode uses its `dest` operand. `src` is always read-only when
/// present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DestMode {
    None,
    Read,
    Write,
    ReadWrite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    Nop,
    // Arithmetic
    Add,
    Adc,
    Sub,
    Sbb,
    Mul,
    IDiv,
    UDiv,
    IMod,
    UMod,
    BAnd,
    BOr,
    BXor,
    BNot,
    Shl,
    Shr,
    Sar,
    // Data movement
    Mov,
    Swap,
    Lea,
    Push,
    Pop,
    PushFlags,
    PopFlags,
    // Control flow
    Jmp,
    Call,
    Ret,
    SetCond,
    Cmp,
    // x87
    FLd,
    FILd,
    FStp,
    FIStp,
    FLdz,
    FAddP,
    FSubP,
    FMulP,
    FDivP,
    FCompP,
    FWait,
    // Width cast
    ICast,
    UCast,
    // Pseudo-instructions
    Prolog,
    Epilog,
    BeginBlock,
    EndBlock,
    JmpBlock,
    FnParam,
    FnParamRef,
    FnCall,
    FnCallRef,
    FnRet,
    FnRetRef,
    Preserve,
    Location,
    Dat,
    Align,
    LblOffset,
    ThreadLocal,
}

impl Opcode {
    pub fn dest_mode(self) -> DestMode {
        use DestMode::*;
        use Opcode::*;
        match self {
            Nop | PushFlags | Jmp | Call | Ret | Prolog | Epilog | BeginBlock | EndBlock
            | JmpBlock | FnParam | FnParamRef | FnCall | FnCallRef | FnRet | FnRetRef
            | Preserve | Location | Dat | Align | LblOffset | ThreadLocal | FWait | FLdz
            | FLd | FILd | Push => None,
            Cmp | FCompP => Read,
            Add | Adc | Sub | Sbb | Mul | IDiv | UDiv | IMod | UMod | BAnd | BOr | BXor
            | BNot | Shl | Shr | Sar | FAddP | FSubP | FMulP | FDivP => ReadWrite,
            Mov | Swap | Lea | Pop | PopFlags | SetCond | FStp | FIStp | ICast | UCast => Write,
        }
    }

    /// Whether this opcode carries a `TypeDesc` (is a `TypeInstr`).
    pub fn is_type_carrying(self) -> bool {
        matches!(
            self,
            Opcode::FnParam | Opcode::FnParamRef | Opcode::FnCall | Opcode::FnCallRef
                | Opcode::FnRet | Opcode::FnRetRef
        )
    }
}

/// Errors raised while constructing or validating IR.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InvalidValue {
    #[error("{op:?} requires operands of equal size, got dest={dest_size:?} src={src_size:?}")]
    SizeMismatch {
        op: Opcode,
        dest_size: Size,
        src_size: Size,
    },
    #[error("{op:?} requires a {expected} operand for {slot}, found a different kind")]
    WrongOperandKind {
        op: Opcode,
        expected: &'static str,
        slot: &'static str,
    },
    #[error("{op:?} requires its destination to be writable")]
    NotWritable { op: Opcode },
    #[error("{op:?} requires its source to be readable")]
    NotReadable { op: Opcode },
}

/// An immutable instruction. `TypeDesc` is only present for the `fnParam*`
/// and `fnCall*`/`fnRet*` family, where it is required to drive ABI
/// classification; other opcodes carry `None`.
#[derive(Clone)]
pub struct Instr {
    op: Opcode,
    dest: Operand,
    src: Operand,
    type_desc: Option<TypeDesc>,
    /// `fnCall*`/`fnParam*`'s "member" flag: whether the callee is a member
    /// function taking an implicit `this`.
    member: bool,
}

impl Instr {
    /// Build an instruction, validating operand kinds/sizes against
    /// `op`'s shape. Callers that construct pseudo-instructions the checked
    /// constructor can't express (pass-through for backend rewrites) should
    /// use `loose`.
    pub fn new(op: Opcode, dest: Operand, src: Operand) -> Result<Instr, InvalidValue> {
        let mode = op.dest_mode();
        if matches!(mode, DestMode::Write | DestMode::ReadWrite) && !dest.empty() && !dest.writable() {
            return Err(InvalidValue::NotWritable { op });
        }
        if matches!(mode, DestMode::Read | DestMode::ReadWrite) && !dest.empty() && !dest.readable() {
            return Err(InvalidValue::NotReadable { op });
        }
        if !src.empty() && !src.readable() {
            return Err(InvalidValue::NotReadable { op });
        }
        if !dest.empty() && !src.empty() && dest.size() != src.size() && binary_needs_equal_size(op)
        {
            return Err(InvalidValue::SizeMismatch {
                op,
                dest_size: dest.size(),
                src_size: src.size(),
            });
        }
        Ok(Instr {
            op,
            dest,
            src,
            type_desc: None,
            member: false,
        })
    }

    /// Construct without the sanity checks `new` performs -- used for
    /// pseudo-instructions and by backend lowering passes that know their
    /// rewrite is valid by construction.
    pub fn loose(op: Opcode, dest: Operand, src: Operand) -> Instr {
        Instr {
            op,
            dest,
            src,
            type_desc: None,
            member: false,
        }
    }

    pub fn with_type_desc(mut self, desc: TypeDesc, member: bool) -> Instr {
        self.type_desc = Some(desc);
        self.member = member;
        self
    }

    pub fn op(&self) -> Opcode {
        self.op
    }

    pub fn dest(&self) -> &Operand {
        &self.dest
    }

    pub fn src(&self) -> &Operand {
        &self.src
    }

    pub fn mode(&self) -> DestMode {
        self.op.dest_mode()
    }

    pub fn type_desc(&self) -> Option<&TypeDesc> {
        self.type_desc.as_ref()
    }

    pub fn member(&self) -> bool {
        self.member
    }

    pub fn size(&self) -> Size {
        let d = self.dest.size();
        let s = self.src.size();
        if d.size64() >= s.size64() {
            d
        } else {
            s
        }
    }

    /// Build a new instruction from this one with different operands, no
    /// validation -- used by backend lowering passes ("intended to be used
    /// by backends", per `Instr::alter`).
    pub fn alter(&self, dest: Operand, src: Operand) -> Instr {
        Instr {
            op: self.op,
            dest,
            src,
            type_desc: self.type_desc.clone(),
            member: self.member,
        }
    }

    pub fn alter_dest(&self, dest: Operand) -> Instr {
        self.alter(dest, self.src.clone())
    }

    pub fn alter_src(&self, src: Operand) -> Instr {
        self.alter(self.dest.clone(), src)
    }
}

fn binary_needs_equal_size(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::Add
            | Opcode::Adc
            | Opcode::Sub
            | Opcode::Sbb
            | Opcode::BAnd
            | Opcode::BOr
            | Opcode::BXor
            | Opcode::Cmp
            | Opcode::Mov
            | Opcode::Swap
    )
}

/// A reference to code or data that can be relocated, used by `call`/`jmp`
/// to an external symbol and by `dat` entries. Distinct from
/// `reference::Reference` naming to avoid confusion with the general
/// `RefSource` machinery that this wraps at the IR layer.
pub type CodeRef = Reference;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reg::{EAX, EBX};

    #[test]
    fn size_mismatch_rejected() {
        let dest = Operand::Register(EAX);
        let src = crate::ir::operand::byte_const(1);
        assert!(Instr::new(Opcode::Add, dest, src).is_err());
    }

    #[test]
    fn matching_sizes_accepted() {
        let dest = Operand::Register(EAX);
        let src = Operand::Register(EBX);
        assert!(Instr::new(Opcode::Add, dest, src).is_ok());
    }

    #[test]
    fn bxor_reg_reg_idiom_constructs() {
        let dest = Operand::Register(EAX);
        let src = Operand::Register(EAX);
        assert!(Instr::new(Opcode::BXor, dest, src).is_ok());
    }
}
