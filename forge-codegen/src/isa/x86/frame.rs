//! x86-32 prolog/epilog. No EH slots here: this backend targets the
//! non-Windows path only (see DESIGN.md), and the POSIX x86-32 unwinder
//! reads the same `.eh_frame` shape as x86-64 at the DWARF level,
//! constructed from the generic [`crate::isa::x64::eh`] building blocks
//! reused verbatim.

use crate::ir::instr::{Instr, Opcode};
use crate::ir::listing::Listing;
use crate::ir::operand::{self, Operand};
use crate::isa::x86::layout::X86Layout;
use crate::isa::x86::params::Params;
use crate::isa::x86::registers::{CALLEE_SAVED_GP, EBP, ESP};
use crate::regalloc::used_regs::UsedRegs;

pub struct FrameBuilder<'a> {
    layout: &'a X86Layout,
    used: &'a UsedRegs,
}

impl<'a> FrameBuilder<'a> {
    pub fn new(layout: &'a X86Layout, used: &'a UsedRegs) -> Self {
        FrameBuilder { layout, used }
    }

    pub fn expand_prolog(&self, dest: &mut Listing, src: &Listing) {
        dest.push(Instr::loose(Opcode::Push, Operand::None, Operand::Register(EBP)));
        dest.push(Instr::loose(Opcode::Mov, Operand::Register(EBP), Operand::Register(ESP)));
        let frame_size = self.layout.frame_size.offset32();
        if frame_size != 0 {
            dest.push(Instr::loose(Opcode::Sub, Operand::Register(ESP), operand::int_const(frame_size)));
        }
        for &r in self.used_callee_saved() {
            dest.push(Instr::loose(Opcode::Push, Operand::None, Operand::Register(r)));
        }

        let mut params = Params::new();
        for &p in src.params() {
            let desc = src.param_desc(p).expect("param without TypeDesc");
            let _ = params.classify(desc);
            let _ = self.layout.offset(src, p);
            // cdecl parameters are read directly from the incoming stack area
            // at each use site; no register-to-local copy is needed since
            // nothing arrives in a register to begin with.
        }
    }

    pub fn expand_epilog(&self, dest: &mut Listing, _src: &Listing) {
        for &r in self.used_callee_saved().iter().rev() {
            dest.push(Instr::loose(Opcode::Pop, Operand::Register(r), Operand::None));
        }
        dest.push(Instr::loose(Opcode::Mov, Operand::Register(ESP), Operand::Register(EBP)));
        dest.push(Instr::loose(Opcode::Pop, Operand::Register(EBP), Operand::None));
        dest.push(Instr::loose(Opcode::Ret, Operand::None, Operand::None));
    }

    /// Which callee-saved registers the body actually clobbers; `ebp` is
    /// never a candidate here since it is already pushed/popped
    /// unconditionally as the frame pointer and `CALLEE_SAVED_GP` on this
    /// backend never includes it.
    fn used_callee_saved(&self) -> Vec<crate::reg::Reg> {
        CALLEE_SAVED_GP.iter().copied().filter(|r| self.used.all().has(*r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::x86::layout::layout as x86_layout;
    use crate::isa::x86::X86Arena;
    use crate::regalloc::used_regs;

    #[test]
    fn prolog_establishes_ebp_frame() {
        let l = Listing::new();
        let lay = x86_layout(&l);
        let arena = X86Arena::new();
        let used = used_regs::compute(&l, &arena);
        let mut dest = l.fork();
        FrameBuilder::new(&lay, &used).expand_prolog(&mut dest, &l);
        assert_eq!(dest.at(0).op(), Opcode::Push);
        assert_eq!(dest.at(1).op(), Opcode::Mov);
    }

    #[test]
    fn unused_callee_saved_registers_are_not_pushed() {
        let l = Listing::new();
        let lay = x86_layout(&l);
        let arena = X86Arena::new();
        let used = used_regs::compute(&l, &arena);
        let mut dest = l.fork();
        FrameBuilder::new(&lay, &used).expand_prolog(&mut dest, &l);
        let push_count = (0..dest.count()).filter(|&i| dest.at(i).op() == Opcode::Push).count();
        assert_eq!(push_count, 1);
    }
}
