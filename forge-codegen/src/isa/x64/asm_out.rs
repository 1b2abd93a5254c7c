//! x86-64 byte-level encoder.
//!
//! Every instruction lowered by [`crate::isa::x64::remove_invalid`] is
//! encoded here with REX/opcode/ModR-M/SIB/displacement bytes written
//! through the [`Sink`] trait shared by the measuring and writing output
//! passes.

use crate::ir::instr::{Instr, Opcode};
use crate::ir::operand::Operand;
use crate::isa::x64::registers::{modrm_bits, needs_rex_bit};
use crate::output::{GcTag, Sink};
use crate::reg::{Reg, Width};
use crate::result::{internal, CodegenResult};

const REX_BASE: u8 = 0x40;
const REX_W: u8 = 0x08;
const REX_R: u8 = 0x04;
const REX_X: u8 = 0x02;
const REX_B: u8 = 0x01;

const MOD_DIRECT: u8 = 0b11;
const MOD_DISP8: u8 = 0b01;
const MOD_DISP32: u8 = 0b10;
const MOD_INDIRECT: u8 = 0b00;

fn rex(w: bool, r: bool, x: bool, b: bool) -> Option<u8> {
    if !(w || r || x || b) {
        return None;
    }
    let mut byte = REX_BASE;
    if w {
        byte |= REX_W;
    }
    if r {
        byte |= REX_R;
    }
    if x {
        byte |= REX_X;
    }
    if b {
        byte |= REX_B;
    }
    Some(byte)
}

fn modrm(md: u8, reg: u8, rm: u8) -> u8 {
    (md << 6) | ((reg & 0x7) << 3) | (rm & 0x7)
}

/// Emit the ModR/M (+ SIB if `rm` is `rsp`/`r12`, + displacement) bytes for
/// a register-to-register-or-memory operand pair.
fn emit_modrm_for_reg_and_operand(sink: &mut dyn Sink, reg_bits: u8, operand: &Operand) {
    match operand {
        Operand::Register(r) => {
            sink.put_byte(modrm(MOD_DIRECT, reg_bits, modrm_bits(*r)));
        }
        Operand::Relative { reg, offset, .. } => {
            let base_bits = modrm_bits(*reg);
            let disp = offset.offset64();
            let needs_sib = base_bits == 0b100;
            let md = if disp == 0 && base_bits != 0b101 {
                MOD_INDIRECT
            } else if (-128..=127).contains(&disp) {
                MOD_DISP8
            } else {
                MOD_DISP32
            };
            let rm = if needs_sib { 0b100 } else { base_bits };
            sink.put_byte(modrm(md, reg_bits, rm));
            if needs_sib {
                // scale=0, index=none(100), base=base_bits
                sink.put_byte((0 << 6) | (0b100 << 3) | base_bits);
            }
            match md {
                MOD_DISP8 => sink.put_byte(disp as i8 as u8),
                MOD_DISP32 => sink.put_int(disp as i32 as u32),
                _ => {}
            }
        }
        _ => {
            // Labels/variables must have been resolved to a Relative operand
            // by the frame lowering before reaching the encoder.
        }
    }
}

/// Opcode byte(s) and whether the operation needs a ModR/M `reg` field
/// encoding an opcode extension rather than a second register.
struct ArithOp {
    reg_dest_mem_src: u8,
    mem_dest_reg_src: u8,
    imm_opcode_ext: u8,
}

fn arith_op(op: Opcode) -> Option<ArithOp> {
    Some(match op {
        Opcode::Add => ArithOp { reg_dest_mem_src: 0x03, mem_dest_reg_src: 0x01, imm_opcode_ext: 0 },
        Opcode::Adc => ArithOp { reg_dest_mem_src: 0x13, mem_dest_reg_src: 0x11, imm_opcode_ext: 2 },
        Opcode::Sub => ArithOp { reg_dest_mem_src: 0x2b, mem_dest_reg_src: 0x29, imm_opcode_ext: 5 },
        Opcode::Sbb => ArithOp { reg_dest_mem_src: 0x1b, mem_dest_reg_src: 0x19, imm_opcode_ext: 3 },
        Opcode::BAnd => ArithOp { reg_dest_mem_src: 0x23, mem_dest_reg_src: 0x21, imm_opcode_ext: 4 },
        Opcode::BOr => ArithOp { reg_dest_mem_src: 0x0b, mem_dest_reg_src: 0x09, imm_opcode_ext: 1 },
        Opcode::BXor => ArithOp { reg_dest_mem_src: 0x33, mem_dest_reg_src: 0x31, imm_opcode_ext: 6 },
        Opcode::Cmp => ArithOp { reg_dest_mem_src: 0x3b, mem_dest_reg_src: 0x39, imm_opcode_ext: 7 },
        _ => return None,
    })
}

/// Encode one already-lowered instruction. `target_64bit` selects which
/// half of dual-width constants to emit.
pub fn encode(sink: &mut dyn Sink, instr: &Instr) -> CodegenResult<()> {
    match instr.op() {
        Opcode::Nop => sink.put_byte(0x90),
        Opcode::Push => encode_push(sink, instr),
        Opcode::Pop => encode_pop(sink, instr),
        Opcode::Mov => encode_mov(sink, instr),
        Opcode::Ret => sink.put_byte(0xc3),
        Opcode::Cmp | Opcode::Add | Opcode::Adc | Opcode::Sub | Opcode::Sbb | Opcode::BAnd
        | Opcode::BOr | Opcode::BXor => encode_arith(sink, instr)?,
        Opcode::Jmp => encode_jmp(sink, instr),
        Opcode::Call => encode_call(sink, instr),
        Opcode::Lea => encode_lea(sink, instr)?,
        Opcode::ICast => encode_cast(sink, instr, true)?,
        Opcode::UCast => encode_cast(sink, instr, false)?,
        Opcode::Dat => encode_dat(sink, instr),
        Opcode::BeginBlock | Opcode::EndBlock | Opcode::JmpBlock | Opcode::Preserve
        | Opcode::Location => {}
        other => return Err(internal(format!("{other:?} must be lowered before encoding"))),
    }
    Ok(())
}

fn width_rex_w(w: Width) -> bool {
    matches!(w, Width::Long)
}

fn encode_push(sink: &mut dyn Sink, instr: &Instr) {
    if let Operand::Register(r) = instr.src() {
        if needs_rex_bit(*r) {
            sink.put_byte(REX_BASE | REX_B);
        }
        sink.put_byte(0x50 + modrm_bits(*r));
    }
}

fn encode_pop(sink: &mut dyn Sink, instr: &Instr) {
    if let Operand::Register(r) = instr.dest() {
        if needs_rex_bit(*r) {
            sink.put_byte(REX_BASE | REX_B);
        }
        sink.put_byte(0x58 + modrm_bits(*r));
    }
}

fn encode_mov(sink: &mut dyn Sink, instr: &Instr) {
    match (instr.dest(), instr.src()) {
        (Operand::Register(d), Operand::Register(s)) => {
            if let Some(b) = rex(width_rex_w(d.width()), needs_rex_bit(*s), false, needs_rex_bit(*d)) {
                sink.put_byte(b);
            }
            sink.put_byte(0x89);
            emit_modrm_for_reg_and_operand(sink, modrm_bits(*s), &Operand::Register(*d));
        }
        (dest @ Operand::Relative { .. }, Operand::Register(s)) => {
            if let Some(b) = rex(width_rex_w(s.width()), needs_rex_bit(*s), false, false) {
                sink.put_byte(b);
            }
            sink.put_byte(0x89);
            emit_modrm_for_reg_and_operand(sink, modrm_bits(*s), dest);
        }
        (Operand::Register(d), src @ Operand::Relative { .. }) => {
            if let Some(b) = rex(width_rex_w(d.width()), needs_rex_bit(*d), false, false) {
                sink.put_byte(b);
            }
            sink.put_byte(0x8b);
            emit_modrm_for_reg_and_operand(sink, modrm_bits(*d), src);
        }
        (Operand::Register(d), Operand::Constant { value, .. }) => {
            if let Some(b) = rex(width_rex_w(d.width()), false, false, needs_rex_bit(*d)) {
                sink.put_byte(b);
            }
            sink.put_byte(0xb8 + modrm_bits(*d));
            if matches!(d.width(), Width::Long) {
                sink.put_long(*value);
            } else {
                sink.put_int(*value as u32);
            }
        }
        _ => {}
    }
}

fn encode_arith(sink: &mut dyn Sink, instr: &Instr) -> CodegenResult<()> {
    let shape = arith_op(instr.op()).ok_or_else(|| internal("not an arith opcode"))?;
    match (instr.dest(), instr.src()) {
        (Operand::Register(d), Operand::Register(_)) | (Operand::Register(d), Operand::Relative { .. }) => {
            if let Some(b) = rex(width_rex_w(d.width()), false, false, false) {
                sink.put_byte(b);
            }
            sink.put_byte(shape.reg_dest_mem_src);
            emit_modrm_for_reg_and_operand(sink, modrm_bits(*d), instr.src());
        }
        (dest @ Operand::Relative { .. }, Operand::Register(s)) => {
            if let Some(b) = rex(width_rex_w(s.width()), false, false, false) {
                sink.put_byte(b);
            }
            sink.put_byte(shape.mem_dest_reg_src);
            emit_modrm_for_reg_and_operand(sink, modrm_bits(*s), dest);
        }
        (dest, Operand::Constant { value, .. }) => {
            sink.put_byte(0x81);
            emit_modrm_for_reg_and_operand(sink, shape.imm_opcode_ext, dest);
            sink.put_int(*value as u32);
        }
        _ => return Err(internal("unsupported arith operand shape")),
    }
    Ok(())
}

fn encode_jmp(sink: &mut dyn Sink, instr: &Instr) {
    if let Operand::Label(_) = instr.dest() {
        sink.put_byte(0xe9);
        // Relative displacement is patched by the caller once every label's
        // offset is known; emit a zero placeholder here.
        sink.put_int(0);
        sink.mark_gc_ref(GcTag::Jump, None);
    }
}

/// `lea`: the invalid-instruction pass already guarantees a register
/// destination and a `Relative` source by the time this runs.
fn encode_lea(sink: &mut dyn Sink, instr: &Instr) -> CodegenResult<()> {
    let Operand::Register(d) = instr.dest() else {
        return Err(internal("lea destination must be a register after lowering"));
    };
    match instr.src() {
        src @ Operand::Relative { .. } => {
            if let Some(b) = rex(width_rex_w(d.width()), needs_rex_bit(*d), false, false) {
                sink.put_byte(b);
            }
            sink.put_byte(0x8d);
            emit_modrm_for_reg_and_operand(sink, modrm_bits(*d), src);
            Ok(())
        }
        _ => Err(internal("lea source must be a memory operand after lowering")),
    }
}

/// `call`: direct through a relocatable reference/label, or indirect through
/// a register/memory operand already resolved by the frame lowering.
fn encode_call(sink: &mut dyn Sink, instr: &Instr) {
    match instr.src() {
        Operand::Reference(target) => {
            sink.put_byte(0xe8);
            sink.put_int(0);
            sink.mark_gc_ref(GcTag::Jump, Some(target.clone()));
        }
        Operand::Label(_) => {
            sink.put_byte(0xe8);
            sink.put_int(0);
            sink.mark_gc_ref(GcTag::Jump, None);
        }
        Operand::Register(r) => {
            if needs_rex_bit(*r) {
                sink.put_byte(REX_BASE | REX_B);
            }
            sink.put_byte(0xff);
            sink.put_byte(modrm(MOD_DIRECT, 2, modrm_bits(*r)));
        }
        src @ Operand::Relative { .. } => {
            sink.put_byte(0xff);
            emit_modrm_for_reg_and_operand(sink, 2, src);
        }
        _ => {}
    }
}

/// `iCast`/`uCast`, already forced by the invalid-instruction pass into one
/// physical register pair. Narrowing (or same-width) casts need no bytes at
/// all since the narrower alias already holds the right value; widening
/// needs `movzx`/`movsx` (or `movsxd`/an implicit 32-bit write for the
/// int-to-long case, since x86-64 zero-extends any 32-bit register write).
fn encode_cast(sink: &mut dyn Sink, instr: &Instr, signed: bool) -> CodegenResult<()> {
    let (Operand::Register(d), Operand::Register(s)) = (instr.dest(), instr.src()) else {
        return Err(internal("cast operands must be registers after lowering"));
    };
    if (d.width() as u8) <= (s.width() as u8) {
        return Ok(());
    }
    match s.width() {
        Width::Int => {
            if signed {
                if let Some(b) = rex(true, needs_rex_bit(*d), false, needs_rex_bit(*s)) {
                    sink.put_byte(b);
                }
                sink.put_byte(0x63);
                emit_modrm_for_reg_and_operand(sink, modrm_bits(*d), &Operand::Register(*s));
            } else {
                // A plain 32-bit `mov` into the alias of `d` already zeroes
                // the upper 32 bits of the 64-bit register.
                if let Some(b) = rex(false, needs_rex_bit(*d), false, needs_rex_bit(*s)) {
                    sink.put_byte(b);
                }
                sink.put_byte(0x89);
                emit_modrm_for_reg_and_operand(sink, modrm_bits(*s), &Operand::Register(d.with_width(Width::Int)));
            }
        }
        Width::Byte => {
            if let Some(b) = rex(width_rex_w(d.width()), needs_rex_bit(*d), false, needs_rex_bit(*s)) {
                sink.put_byte(b);
            }
            sink.put_byte(0x0f);
            sink.put_byte(if signed { 0xbe } else { 0xb6 });
            emit_modrm_for_reg_and_operand(sink, modrm_bits(*d), &Operand::Register(*s));
        }
        Width::Long | Width::Ptr => {}
    }
    Ok(())
}

fn encode_dat(sink: &mut dyn Sink, instr: &Instr) {
    if let Operand::Constant { value, size } = instr.src() {
        match size.size64() {
            1 => sink.put_byte(*value as u8),
            4 => sink.put_int(*value as u32),
            _ => sink.put_long(*value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operand;
    use crate::isa::x64::registers::{EAX, EBX};
    use crate::output::LabelOutput;

    #[test]
    fn ret_is_one_byte() {
        let instr = Instr::loose(Opcode::Ret, Operand::None, Operand::None);
        let mut out = LabelOutput::new();
        encode(&mut out, &instr).unwrap();
        assert_eq!(out.size, 1);
    }

    #[test]
    fn reg_reg_mov_has_modrm() {
        let instr = Instr::loose(Opcode::Mov, Operand::Register(EAX), Operand::Register(EBX));
        let mut out = LabelOutput::new();
        encode(&mut out, &instr).unwrap();
        assert!(out.size >= 2);
    }

    #[test]
    fn lowering_leftover_opcode_is_rejected() {
        // `fnCall` itself is always fully materialized into a real `call`
        // before the encoder runs; `align` has no lowering anywhere in this
        // backend and exercises the same defense-in-depth fallback.
        let instr = Instr::loose(Opcode::Align, Operand::None, Operand::None);
        let mut out = LabelOutput::new();
        assert!(encode(&mut out, &instr).is_err());
        let _ = operand::byte_const(0);
    }

    #[test]
    fn lea_with_register_dest_encodes_modrm_mem() {
        let instr = Instr::loose(
            Opcode::Lea,
            Operand::Register(EAX),
            operand::long_rel(crate::isa::x64::registers::RBP, crate::size::Offset::same(-8)),
        );
        let mut out = LabelOutput::new();
        encode(&mut out, &instr).unwrap();
        assert!(out.size >= 3);
    }

    #[test]
    fn direct_call_records_a_relocation() {
        let target = crate::reference::RefSource::new("callee").add_ref();
        let instr = Instr::loose(Opcode::Call, Operand::None, Operand::Reference(target));
        let mut out = LabelOutput::new();
        encode(&mut out, &instr).unwrap();
        assert_eq!(out.refs, 1);
        assert_eq!(out.size, 5);
    }
}
