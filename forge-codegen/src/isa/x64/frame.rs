//! x86-64 prolog/epilog construction.
//!
//! The prolog pushes `rbp`, establishes the new frame pointer, reserves
//! stack space for locals plus the two EH slots, spills the callee-saved
//! registers the body actually clobbers, and copies register-passed
//! parameters into their local slots. The epilog undoes each of these in
//! reverse. Root-block variables with a destructor are zero-initialized so
//! an unwind pass before their constructor runs sees a null pointer rather
//! than garbage.
//!
//! Each callee-saved spill is paired with a `preserve` pseudo-instruction
//! recording it for [`FrameBuilder::build_fde`], which turns the sequence
//! into `.eh_frame` CFI events; nothing in this crate emits an object file,
//! so `build_fde`'s output is a standalone, independently testable artifact.

use crate::ir::instr::{Instr, Opcode};
use crate::ir::listing::Listing;
use crate::ir::operand::{self, Operand};
use crate::isa::x64::eh::{CfiEvent, FdeBuilder};
use crate::isa::x64::layout::X64Layout;
use crate::isa::x64::params::{ParamClass, Params};
use crate::isa::x64::registers::{dwarf_reg, EXTRA_CALLEE_SAVED_GP, RBP, RSP};
use crate::regalloc::used_regs::UsedRegs;
use crate::size::{s_ptr, Offset};

pub struct FrameBuilder<'a> {
    layout: &'a X64Layout,
    used: &'a UsedRegs,
}

impl<'a> FrameBuilder<'a> {
    pub fn new(layout: &'a X64Layout, used: &'a UsedRegs) -> Self {
        FrameBuilder { layout, used }
    }

    /// Replace a `prolog` pseudo-instruction with the concrete push/mov/sub
    /// sequence, EH slot initialization, parameter materialization and
    /// zero-initialization of destructor-bearing root variables.
    pub fn expand_prolog(&self, dest: &mut Listing, src: &Listing) {
        dest.push(Instr::loose(
            Opcode::Push,
            Operand::None,
            Operand::Register(RBP),
        ));
        dest.push(Instr::loose(
            Opcode::Mov,
            Operand::Register(RBP),
            Operand::Register(RSP),
        ));
        let frame_size = self.layout.frame_size.offset64();
        if frame_size != 0 {
            dest.push(Instr::loose(
                Opcode::Sub,
                Operand::Register(RSP),
                operand::long_const(frame_size),
            ));
        }

        let ptr_size = s_ptr().size64() as i64;
        // The owner pointer is patched in by the embedder at install time,
        // once it knows which runtime/arena owns this frame; zero marks "no
        // owner yet" for an unwind pass that runs before that happens.
        dest.push(Instr::loose(
            Opcode::Mov,
            operand::long_rel(RBP, self.layout.eh_slot),
            operand::long_const(0),
        ));
        dest.push(Instr::loose(
            Opcode::Mov,
            operand::long_rel(RBP, self.layout.eh_slot + Offset::same(ptr_size)),
            operand::long_const(0),
        ));

        for &r in self.used_callee_saved() {
            dest.push(Instr::loose(Opcode::Push, Operand::None, Operand::Register(r)));
            dest.push(Instr::loose(Opcode::Preserve, Operand::None, Operand::Register(r)));
        }

        let mut params = Params::new();
        for &p in src.params() {
            let desc = src.param_desc(p).expect("param without TypeDesc");
            let classified = params.classify(desc);
            let dest_offset = self.layout.offset(src, p);
            if let Some(ParamClass::Integer(r)) | Some(ParamClass::Sse(r)) =
                classified.classes.first()
            {
                dest.push(Instr::loose(
                    Opcode::Mov,
                    operand::long_rel(RBP, dest_offset),
                    Operand::Register(*r),
                ));
            }
        }

        for v in src.part_vars(src.root()) {
            if src.free_fn(v).is_some() {
                let off = self.layout.offset(src, v);
                dest.push(Instr::loose(
                    Opcode::Mov,
                    operand::long_rel(RBP, off),
                    operand::long_const(0),
                ));
            }
        }
    }

    /// Replace an `epilog` pseudo-instruction with the teardown sequence:
    /// pop callee-saved registers in reverse order, tear down the frame,
    /// return.
    pub fn expand_epilog(&self, dest: &mut Listing, _src: &Listing) {
        for &r in self.used_callee_saved().iter().rev() {
            dest.push(Instr::loose(Opcode::Pop, Operand::Register(r), Operand::None));
        }
        dest.push(Instr::loose(
            Opcode::Mov,
            Operand::Register(RSP),
            Operand::Register(RBP),
        ));
        dest.push(Instr::loose(
            Opcode::Pop,
            Operand::Register(RBP),
            Operand::None,
        ));
        dest.push(Instr::loose(Opcode::Ret, Operand::None, Operand::None));
    }

    /// Which of the extra callee-saved registers (beyond `rbp`, pushed
    /// unconditionally above) the body actually clobbers, in a fixed
    /// canonical order so prolog pushes and epilog pops stay mirrored.
    fn used_callee_saved(&self) -> Vec<crate::reg::Reg> {
        EXTRA_CALLEE_SAVED_GP
            .iter()
            .copied()
            .filter(|r| self.used.all().has(*r))
            .collect()
    }

    /// Build the `.eh_frame` CFI events describing this function's prolog:
    /// the CFA moves onto `rbp` after the standard push/mov, `rbp` itself is
    /// recorded at its saved slot, and each spilled extra callee-saved
    /// register gets an `Offset` event at its push-order slot.
    pub fn build_fde(&self) -> FdeBuilder {
        let mut fde = FdeBuilder::new();
        fde.push(CfiEvent::DefCfaOffset { offset: 16 });
        fde.push(CfiEvent::Offset { dwarf_reg: dwarf_reg(RBP), factored_offset: -2 });
        fde.push(CfiEvent::DefCfaRegister { dwarf_reg: dwarf_reg(RBP) });

        let extra = self.used_callee_saved();
        for (i, &r) in extra.iter().enumerate() {
            let factored_offset = -3 - i as i64;
            fde.push(CfiEvent::Offset { dwarf_reg: dwarf_reg(r), factored_offset });
        }
        fde
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::x64::layout::layout as x64_layout;
    use crate::isa::x64::X64Arena;
    use crate::regalloc::used_regs;

    #[test]
    fn prolog_pushes_rbp_before_reserving_locals() {
        let l = Listing::new();
        let lay = x64_layout(&l);
        let arena = X64Arena::new();
        let used = used_regs::compute(&l, &arena);
        let mut dest = l.fork();
        FrameBuilder::new(&lay, &used).expand_prolog(&mut dest, &l);
        assert_eq!(dest.at(0).op(), Opcode::Push);
        assert_eq!(dest.at(1).op(), Opcode::Mov);
    }

    #[test]
    fn epilog_pops_in_reverse_of_prolog_pushes() {
        let l = Listing::new();
        let lay = x64_layout(&l);
        let arena = X64Arena::new();
        let used = used_regs::compute(&l, &arena);
        let mut dest = l.fork();
        FrameBuilder::new(&lay, &used).expand_epilog(&mut dest, &l);
        let last = dest.at(dest.count() - 1);
        assert_eq!(last.op(), Opcode::Ret);
    }

    #[test]
    fn unused_extra_callee_saved_registers_are_not_pushed_twice() {
        let l = Listing::new();
        let lay = x64_layout(&l);
        let arena = X64Arena::new();
        let used = used_regs::compute(&l, &arena);
        let mut dest = l.fork();
        let builder = FrameBuilder::new(&lay, &used);
        builder.expand_prolog(&mut dest, &l);
        let push_count = (0..dest.count()).filter(|&i| dest.at(i).op() == Opcode::Push).count();
        // Only the unconditional `push rbp`; nothing in `l` clobbers rbx/r12-r14.
        assert_eq!(push_count, 1);
    }

    #[test]
    fn fde_records_rbp_and_each_preserved_register() {
        let l = Listing::new();
        let lay = x64_layout(&l);
        let arena = X64Arena::new();
        let used = used_regs::compute(&l, &arena);
        let fde = FrameBuilder::new(&lay, &used).build_fde();
        let bytes = fde.encode().unwrap();
        assert!(!bytes.is_empty());
    }
}
