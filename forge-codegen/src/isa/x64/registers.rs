//! x86-64 physical register constants and ModR/M slot numbers.

use crate::reg::{Backend, Reg, Width};

pub const fn gp(slot: u8, width: Width) -> Reg {
    Reg::new(width, Backend::X86Gp, slot)
}

pub const fn sse(slot: u8) -> Reg {
    Reg::new(Width::Long, Backend::X86Sse, slot)
}

// ModR/M encodings 0-15 for the 16 general-purpose registers; 8-15 need a
// REX prefix bit set.
pub const RAX: Reg = gp(0, Width::Long);
pub const RCX: Reg = gp(1, Width::Long);
pub const RDX: Reg = gp(2, Width::Long);
pub const RBX: Reg = gp(3, Width::Long);
pub const RSP: Reg = gp(4, Width::Long);
pub const RBP: Reg = gp(5, Width::Long);
pub const RSI: Reg = gp(6, Width::Long);
pub const RDI: Reg = gp(7, Width::Long);
pub const R8: Reg = gp(8, Width::Long);
pub const R9: Reg = gp(9, Width::Long);
pub const R10: Reg = gp(10, Width::Long);
pub const R11: Reg = gp(11, Width::Long);
pub const R12: Reg = gp(12, Width::Long);
pub const R13: Reg = gp(13, Width::Long);
pub const R14: Reg = gp(14, Width::Long);
pub const R15: Reg = gp(15, Width::Long);

pub const EAX: Reg = gp(0, Width::Int);
pub const ECX: Reg = gp(1, Width::Int);
pub const EDX: Reg = gp(2, Width::Int);
pub const EBX: Reg = gp(3, Width::Int);

pub const AL: Reg = gp(0, Width::Byte);
pub const CL: Reg = gp(1, Width::Byte);
pub const DL: Reg = gp(2, Width::Byte);
pub const AH_VIA_EAX_SHIFT: u32 = 8;

pub const XMM0: Reg = sse(0);
pub const XMM1: Reg = sse(1);
pub const XMM2: Reg = sse(2);
pub const XMM3: Reg = sse(3);
pub const XMM4: Reg = sse(4);
pub const XMM5: Reg = sse(5);
pub const XMM6: Reg = sse(6);
pub const XMM7: Reg = sse(7);

/// All 16 general-purpose registers, in ModR/M order.
pub const ALL_GP: [Reg; 16] = [
    RAX, RCX, RDX, RBX, RSP, RBP, RSI, RDI, R8, R9, R10, R11, R12, R13, R14, R15,
];

/// Integer argument registers, System V order.
pub const INT_ARG: [Reg; 6] = [RDI, RSI, RDX, RCX, R8, R9];
/// Floating-point argument registers, System V order.
pub const SSE_ARG: [Reg; 8] = [XMM0, XMM1, XMM2, XMM3, XMM4, XMM5, XMM6, XMM7];

/// Caller-saved ("volatile") integer registers under System V: anything not
/// in `CALLEE_SAVED`.
pub const CALLER_SAVED_GP: [Reg; 9] = [RAX, RCX, RDX, RSI, RDI, R8, R9, R10, R11];
pub const CALLEE_SAVED_GP: [Reg; 5] = [RBX, RBP, R12, R13, R14];
/// Callee-saved registers beyond `rbp`, which the prolog/epilog push and pop
/// unconditionally as the frame pointer. The used-register dataflow marks
/// `rbp` live at nearly every memory access once local variables resolve to
/// `rbp`-relative operands, so it must not also appear in the "extra save if
/// clobbered" set or it would be pushed and popped twice.
pub const EXTRA_CALLEE_SAVED_GP: [Reg; 4] = [RBX, R12, R13, R14];
/// `r15` is used by the frame lowering as a dedicated scratch register for
/// shuffling source operands during register-assignment cycles; it is
/// treated as callee-saved like the rest of the non-volatile bank.
pub const R15_SCRATCH: Reg = R15;

/// `mul/div/mod` dest requirement and `idiv`'s `rdx` clobber.
pub const DIV_DEST: Reg = RAX;
pub const DIV_CLOBBER: Reg = RDX;

/// Does encoding this register require a REX prefix (id >= 8, or a byte
/// register that needs `sil`/`dil`-style access)?
pub fn needs_rex_bit(r: Reg) -> bool {
    r.backend() == Backend::X86Gp && r.slot() >= 8
}

pub fn modrm_bits(r: Reg) -> u8 {
    r.slot() & 0x7
}

/// DWARF register number for `.eh_frame` CFI, distinct from the ModR/M slot
/// numbering above (`rcx`/`rdx` and `rbp`/`rsp`/`rsi`/`rdi` are ordered
/// differently in the two schemes; `r8`-`r15` coincide).
pub fn dwarf_reg(r: Reg) -> u8 {
    const MODRM_TO_DWARF: [u8; 8] = [0, 2, 1, 3, 7, 6, 4, 5];
    let slot = r.slot();
    if slot < 8 {
        MODRM_TO_DWARF[slot as usize]
    } else {
        slot
    }
}
