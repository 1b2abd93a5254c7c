//! Resolves `Operand::Variable` into concrete `Operand::Relative` operands
//! once the final frame layout is known.
//!
//! Runs after invalid-instruction lowering (which may have created new
//! temporary variables via `Listing::create_var` -- the calling-convention
//! materializer's complex-argument copies) and the layout pass that assigns
//! them offsets, and before the used-register dataflow the frame lowering
//! consults, so accesses to `rbp`-relative locals are visible to that
//! dataflow.
//!
//! A `Complex`-typed parameter's variable holds a pointer to the caller's
//! copy rather than the value itself, so a read of it is resolved through an
//! extra indirection: load the stored pointer into a scratch register, then
//! address the field relative to that register instead of `rbp`.

use crate::ir::instr::Instr;
use crate::ir::listing::Listing;
use crate::ir::operand::Operand;
use crate::isa::x64::layout::X64Layout;
use crate::isa::x64::registers::{R14, RBP, R15_SCRATCH};
use crate::reg::Reg;
use crate::transform::Transform;
use crate::typedesc::TypeDesc;

pub struct ResolveVars<'a> {
    layout: &'a X64Layout,
}

impl<'a> ResolveVars<'a> {
    pub fn new(layout: &'a X64Layout) -> Self {
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
            let ptr_reg = scratch.with_width(crate::reg::Width::Long);
            dest.push(Instr::loose(
                crate::ir::instr::Opcode::Mov,
                Operand::Register(ptr_reg),
                crate::ir::operand::long_rel(RBP, base),
            ));
            return Operand::Relative { reg: ptr_reg, offset: *offset, size: *size };
        }
        Operand::Relative { reg: RBP, offset: base + *offset, size: *size }
    }
}

impl<'a> Transform for ResolveVars<'a> {
    fn during(&mut self, dest: &mut Listing, src: &Listing, id: usize) {
        let instr = src.at(id);
        for label in src.labels(id) {
            dest.push_label(*label);
        }
        // Distinct scratch registers for dest/src so a single instruction
        // that dereferences a complex parameter through both slots doesn't
        // clobber one lookup with the other.
        let new_dest = self.resolve(dest, src, instr.dest(), R15_SCRATCH);
        let new_src = self.resolve(dest, src, instr.src(), R14);
        dest.push(instr.alter(new_dest, new_src));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instr::Opcode;
    use crate::ir::listing::FreeOpt;
    use crate::isa::x64::layout;
    use crate::size::s_int;
    use crate::typedesc::PrimitiveKind;

    #[test]
    fn plain_local_resolves_to_rbp_relative() {
        let mut l = Listing::new();
        let v = l.create_var(l.root(), s_int(), None, FreeOpt::NONE);
        l.push(Instr::loose(
            Opcode::Mov,
            Operand::Register(crate::isa::x64::registers::EAX),
            crate::ir::operand::var_operand(v, crate::size::Offset::default(), s_int()),
        ));
        let lay = layout::layout(&l);
        let mut pass = ResolveVars::new(&lay);
        let out = crate::transform::transform(&l, &mut pass);
        let last = out.at(out.count() - 1);
        assert!(matches!(last.src(), Operand::Relative { reg, .. } if reg.same(RBP)));
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
            Operand::Register(crate::isa::x64::registers::EAX),
            crate::ir::operand::var_operand(p, crate::size::Offset::default(), s_int()),
        ));
        let lay = layout::layout(&l);
        let mut pass = ResolveVars::new(&lay);
        let out = crate::transform::transform(&l, &mut pass);
        // First emitted instruction loads the stored pointer; the original
        // mov now reads through that scratch register instead of `rbp`.
        assert_eq!(out.at(0).op(), Opcode::Mov);
        let final_read = out.at(out.count() - 1);
        assert!(matches!(final_read.src(), Operand::Relative { reg, .. } if reg.same(R15_SCRATCH)));
        let _ = PrimitiveKind::Integer;
    }
}
