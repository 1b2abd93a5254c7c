//! The x86-32 cdecl backend. Deliberately simpler than [`crate::isa::x64`]:
//! no register-passed arguments, no SSE argument bank, and no Windows SEH
//! unwind tables (see DESIGN.md).

pub mod asm_out;
pub mod frame;
pub mod layout;
pub mod params;
pub mod registers;
pub mod remove_invalid;
pub mod resolve_vars;

use crate::ir::instr::Opcode;
use crate::ir::listing::Listing;
use crate::isa::call_conv::CallConv;
use crate::isa::Arena;
use crate::output::Output;
use crate::regalloc::register_set::RegSet;
use crate::regalloc::used_regs;
use crate::result::CodegenResult;

pub struct X86Arena;

impl X86Arena {
    pub fn new() -> Self {
        X86Arena
    }
}

impl Default for X86Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Arena for X86Arena {
    fn transform(&self, listing: &Listing) -> CodegenResult<Listing> {
        log::debug!("x86: transforming listing with {} instructions", listing.count());
        let used = used_regs::compute(listing, self);
        let mut invalid_pass = remove_invalid::RemoveInvalid::new(&used);
        let lowered = crate::transform::transform(listing, &mut invalid_pass);

        let layout = layout::layout(&lowered);
        log::debug!("x86: frame size {:?}", layout.frame_size);

        let mut resolve_pass = resolve_vars::ResolveVars::new(&layout);
        let resolved = crate::transform::transform(&lowered, &mut resolve_pass);

        let used_resolved = used_regs::compute(&resolved, self);
        Ok(expand_frame_pseudo_ops(&resolved, &layout, &used_resolved))
    }

    fn output(&self, listing: &Listing, output: &mut Output) -> CodegenResult<()> {
        let sink = output.as_sink();
        for (i, instr) in listing.iter() {
            for label in listing.labels(i) {
                sink.mark_label(*label);
            }
            asm_out::encode(sink, instr)?;
        }
        Ok(())
    }

    fn remove_fn_regs(&self, live: &mut RegSet) {
        for &r in registers::CALLER_SAVED_GP.iter() {
            live.remove(r);
        }
    }

    fn call_conv(&self) -> CallConv {
        CallConv::Cdecl
    }

    fn is_64bit(&self) -> bool {
        false
    }
}

fn expand_frame_pseudo_ops(
    src: &Listing,
    layout: &layout::X86Layout,
    used: &used_regs::UsedRegs,
) -> Listing {
    let mut dest = src.fork();
    let builder = frame::FrameBuilder::new(layout, used);
    for (i, instr) in src.iter() {
        for label in src.labels(i) {
            dest.push_label(*label);
        }
        match instr.op() {
            Opcode::Prolog => builder.expand_prolog(&mut dest, src),
            Opcode::Epilog => builder.expand_epilog(&mut dest, src),
            _ => dest.push(instr.clone()),
        }
    }
    dest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instr::Instr;
    use crate::ir::operand::Operand;

    #[test]
    fn transform_expands_prolog_and_epilog() {
        let mut l = Listing::new();
        l.push(Instr::loose(Opcode::Prolog, Operand::None, Operand::None));
        l.push(Instr::loose(Opcode::Epilog, Operand::None, Operand::None));
        let arena = X86Arena::new();
        let out = arena.transform(&l).unwrap();
        assert!((0..out.count()).any(|i| out.at(i).op() == Opcode::Push));
    }
}
