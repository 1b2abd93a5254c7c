//! x86-32 physical register constants.
//!
//! x86-32 has no SSE argument bank in the cdecl convention this backend
//! targets (floats return through the x87 stack via `fstp`), so there is
//! no `SSE_ARG` table here.

use crate::reg::{Backend, Reg, Width};

pub const fn gp(slot: u8, width: Width) -> Reg {
    Reg::new(width, Backend::X86Gp, slot)
}

pub const EAX: Reg = gp(0, Width::Int);
pub const ECX: Reg = gp(1, Width::Int);
pub const EDX: Reg = gp(2, Width::Int);
pub const EBX: Reg = gp(3, Width::Int);
pub const ESP: Reg = gp(4, Width::Int);
pub const EBP: Reg = gp(5, Width::Int);
pub const ESI: Reg = gp(6, Width::Int);
pub const EDI: Reg = gp(7, Width::Int);

pub const AL: Reg = gp(0, Width::Byte);
pub const CL: Reg = gp(1, Width::Byte);
pub const DL: Reg = gp(2, Width::Byte);

pub const ALL_GP: [Reg; 8] = [EAX, ECX, EDX, EBX, ESP, EBP, ESI, EDI];
pub const CALLER_SAVED_GP: [Reg; 3] = [EAX, ECX, EDX];
pub const CALLEE_SAVED_GP: [Reg; 3] = [EBX, ESI, EDI];

pub const DIV_DEST: Reg = EAX;
pub const DIV_CLOBBER: Reg = EDX;

pub fn needs_rex_bit(_r: Reg) -> bool {
    false
}

pub fn modrm_bits(r: Reg) -> u8 {
    r.slot() & 0x7
}
