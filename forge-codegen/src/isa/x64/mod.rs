//! The x86-64 System V backend.
//!
//! Wires the used-register dataflow, invalid-instruction lowering, frame
//! construction and encoder into one [`crate::isa::Arena`] implementation.

pub mod asm_out;
pub mod eh;
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

pub struct X64Arena;

impl X64Arena {
    pub fn new() -> Self {
        X64Arena
    }
}

impl Default for X64Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Arena for X64Arena {
    fn transform(&self, listing: &Listing) -> CodegenResult<Listing> {
        log::debug!("x64: transforming listing with {} instructions", listing.count());
        let used = used_regs::compute(listing, self);
        let mut invalid_pass = remove_invalid::RemoveInvalid::new(&used);
        let lowered = crate::transform::transform(listing, &mut invalid_pass);

        let layout = layout::layout(&lowered);
        log::debug!("x64: frame size {:?}", layout.frame_size);

        let mut resolve_pass = resolve_vars::ResolveVars::new(&layout);
        let resolved = crate::transform::transform(&lowered, &mut resolve_pass);

        // Re-run the dataflow on the fully-resolved listing: only now do
        // `rbp`-relative locals (and the scratch registers the materializer
        // and `resolve_vars` introduced) show up as real register reads, and
        // the frame lowering below needs that to decide which callee-saved
        // registers actually need spilling.
        let used_resolved = used_regs::compute(&resolved, self);
        let framed = expand_frame_pseudo_ops(&resolved, &layout, &used_resolved);
        Ok(framed)
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
        for &r in registers::SSE_ARG.iter() {
            live.remove(r);
        }
    }

    fn call_conv(&self) -> CallConv {
        CallConv::SystemV
    }

    fn is_64bit(&self) -> bool {
        true
    }
}

fn expand_frame_pseudo_ops(
    src: &Listing,
    layout: &layout::X64Layout,
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
            _ => {
                dest.push(instr.clone());
            }
        }
    }
    dest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instr::Instr;
    use crate::ir::operand::{self, Operand};
    use crate::isa::x64::registers::{EAX, RBP, RDI};
    use crate::size::{s_int, Offset};
    use crate::typedesc::{PrimitiveKind, TypeDesc};

    #[test]
    fn transform_expands_prolog_and_epilog() {
        let mut l = Listing::new();
        l.push(Instr::loose(Opcode::Prolog, Operand::None, Operand::None));
        l.push(Instr::loose(Opcode::Epilog, Operand::None, Operand::None));
        let arena = X64Arena::new();
        let out = arena.transform(&l).unwrap();
        assert!((0..out.count()).any(|i| out.at(i).op() == Opcode::Push));
        assert!((0..out.count()).any(|i| out.at(i).op() == Opcode::Ret));
    }

    /// An identity function -- one integer parameter, returned unchanged --
    /// run through the whole pipeline (lowering, layout, variable
    /// resolution, frame construction) rather than any single pass, to
    /// catch mismatches at the seams between them.
    #[test]
    fn identity_function_produces_standard_prolog_body_epilog() {
        let mut l = Listing::new();
        let p = l.create_param(TypeDesc::Primitive { kind: PrimitiveKind::Integer, size: s_int() });
        l.result = Some(TypeDesc::Primitive { kind: PrimitiveKind::Integer, size: s_int() });
        l.push(Instr::loose(Opcode::Prolog, Operand::None, Operand::None));
        l.push(Instr::loose(
            Opcode::FnRet,
            Operand::None,
            operand::var_operand(p, Offset::default(), s_int()),
        ));
        l.push(Instr::loose(Opcode::Epilog, Operand::None, Operand::None));

        let arena = X64Arena::new();
        let out = arena.transform(&l).unwrap();

        // Standard prolog: push rbp; mov rbp, rsp.
        assert_eq!(out.at(0).op(), Opcode::Push);
        assert!(matches!(out.at(0).src(), Operand::Register(r) if r.same(RBP)));
        assert_eq!(out.at(1).op(), Opcode::Mov);
        assert!(matches!(out.at(1).dest(), Operand::Register(r) if r.same(RBP)));

        // The incoming parameter (rdi) is copied into its stack slot
        // somewhere in the prolog, and the body later reads that slot back
        // into eax for the return.
        let copies_rdi_to_stack = (0..out.count()).any(|i| {
            matches!(out.at(i).op(), Opcode::Mov)
                && matches!(out.at(i).dest(), Operand::Relative { reg, .. } if reg.same(RBP))
                && matches!(out.at(i).src(), Operand::Register(r) if r.same(RDI))
        });
        assert!(copies_rdi_to_stack);

        let moves_into_eax = (0..out.count()).any(|i| {
            matches!(out.at(i).op(), Opcode::Mov)
                && matches!(out.at(i).dest(), Operand::Register(r) if r.same(EAX))
                && matches!(out.at(i).src(), Operand::Relative { reg, .. } if reg.same(RBP))
        });
        assert!(moves_into_eax);

        // Standard epilog: ends in `ret`, immediately preceded by `pop rbp`.
        let last = out.count() - 1;
        assert_eq!(out.at(last).op(), Opcode::Ret);
        assert_eq!(out.at(last - 1).op(), Opcode::Pop);
        assert!(matches!(out.at(last - 1).dest(), Operand::Register(r) if r.same(RBP)));
    }
}
