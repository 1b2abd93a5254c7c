//! Resolves `Operand::Variable` into concrete `Operand::Relative` operands
//! once the final frame layout is known. Mirrors
//! [`crate::isa::x64::resolve_vars`]; the only difference is that every
//! cdecl parameter (not just the overflow ones) lives in the positive
//! incoming-stack area, so there is no register-to-local copy to account
//! for, only the same complex-parameter indirection.
//!
//! A `Complex`-typed parameter's stack slot holds a pointer to the caller's
//! copy rather than the value itself (see `isa::x86::params`), so a read of
//! it is resolved through an extra indirection: load the stored pointer
//! into a scratch register, then address the field relative to that
//! register instead of `ebp`.

use crate::ir::instr::Instr;
use crate::ir::listing::Listing;
use crate::ir::operand::Operand;
use crate::isa::x86::layout::X86Layout;
use crate::isa::x86::registers::{ECX, EBP, EDX};
use crate::reg::Reg;
use crate::transform::Transform;
use crate::typedesc::TypeDesc;

pub struct ResolveVars<'a> {
    layout: &'a X86Layout,
}

impl<'a> ResolveVars<'a> {
    pub fn new(layout: &'a X86Layout) -> Self {
        ResolveVars { layout }
    }

    fn is_indirect_complex_param(&self, src: &Listing, var: crate::ir::entities::Variable) -> bool {
        src.is_param(var) && matches!(src.param_desc(var), Some(TypeDesc::Complex { .. }))
    }

    fn resolve(&self, dest: &mut Listing, src: &Listing, op: &Operand, scratch: Reg) -> Operand {
        let Operand::Variable { var, offset, size } = op else {
            return op.clone();
        };
        let base = self.layout.offset(src, *var);
        if self.is_indirect_complex_param(src, *var) {
            dest.push(Instr::loose(
                crate::ir::instr::Opcode::Mov,
                Operand::Register(scratch),
                crate::ir::operand::int_rel(EBP, base),
            ));
            return Operand::Relative { reg: scratch, offset: *offset, size: *size };
        }
        Operand::Relative { reg: EBP, offset: base + *offset, size: *size }
    }
}

impl<'a> Transform for ResolveVars<'a> {
    fn during(&mut self, dest: &mut Listing, src: &Listing, id: usize) {
        let instr = src.at(id);
        for label in src.labels(id) {
            dest.push_label(*label);
        }
        let new_dest = self.resolve(dest, src, instr.dest(), ECX);
        let new_src = self.resolve(dest, src, instr.src(), EDX);
        dest.push(instr.alter(new_dest, new_src));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instr::Opcode;
    use crate::ir::listing::FreeOpt;
    use crate::isa::x86::layout;
    use crate::size::s_int;
    use crate::typedesc::PrimitiveKind;

    #[test]
    fn plain_local_resolves_to_ebp_relative() {
        let mut l = Listing::new();
        let v = l.create_var(l.root(), s_int(), None, FreeOpt::NONE);
        l.push(Instr::loose(
            Opcode::Mov,
            Operand::Register(crate::isa::x86::registers::EAX),
            crate::ir::operand::var_operand(v, crate::size::Offset::default(), s_int()),
        ));
        let lay = layout::layout(&l);
        let mut pass = ResolveVars::new(&lay);
        let out = crate::transform::transform(&l, &mut pass);
        let last = out.at(out.count() - 1);
        assert!(matches!(last.src(), Operand::Relative { reg, .. } if reg.same(EBP)));
    }

    #[test]
    fn complex_param_read_goes_through_scratch_pointer() {
        let mut l = Listing::new();
        let p = l.create_param(TypeDesc::Complex {
            size: crate::size::Size::same(16, 8),
            ctor: crate::typedesc::UserFn(crate::reference::RefSource::new("ctor").add_ref()),
            dtor: crate::typedesc::UserFn(crate::reference::RefSource::new("dtor").add_ref()),
        });
        l.push(Instr::loose(
            Opcode::Mov,
            Operand::Register(crate::isa::x86::registers::EAX),
            crate::ir::operand::var_operand(p, crate::size::Offset::default(), s_int()),
        ));
        let lay = layout::layout(&l);
        let mut pass = ResolveVars::new(&lay);
        let out = crate::transform::transform(&l, &mut pass);
        assert_eq!(out.at(0).op(), Opcode::Mov);
        let final_read = out.at(out.count() - 1);
        assert!(matches!(final_read.src(), Operand::Relative { reg, .. } if reg.same(EDX)));
        let _ = PrimitiveKind::Integer;
    }
}
