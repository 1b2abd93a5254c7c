//! x86-32 byte-level encoder: the same ModR/M-based shapes as
//! [`crate::isa::x64::asm_out`] minus REX prefixes, since x86-32 has only
//! eight general-purpose registers and no need for an extension bit.

use crate::ir::instr::{Instr, Opcode};
use crate::ir::operand::Operand;
use crate::isa::x86::registers::modrm_bits;
use crate::output::{GcTag, Sink};
use crate::result::{internal, CodegenResult};

const MOD_DIRECT: u8 = 0b11;
const MOD_DISP8: u8 = 0b01;
const MOD_DISP32: u8 = 0b10;
const MOD_INDIRECT: u8 = 0b00;

fn modrm(md: u8, reg: u8, rm: u8) -> u8 {
    (md << 6) | ((reg & 0x7) << 3) | (rm & 0x7)
}

fn emit_modrm_for_reg_and_operand(sink: &mut dyn Sink, reg_bits: u8, operand: &Operand) {
    match operand {
        Operand::Register(r) => sink.put_byte(modrm(MOD_DIRECT, reg_bits, modrm_bits(*r))),
        Operand::Relative { reg, offset, .. } => {
            let base_bits = modrm_bits(*reg);
            let disp = offset.offset32();
            let md = if disp == 0 && base_bits != 0b101 {
                MOD_INDIRECT
            } else if (-128..=127).contains(&disp) {
                MOD_DISP8
            } else {
                MOD_DISP32
            };
            sink.put_byte(modrm(md, reg_bits, base_bits));
            match md {
                MOD_DISP8 => sink.put_byte(disp as i8 as u8),
                MOD_DISP32 => sink.put_int(disp as u32),
                _ => {}
            }
        }
        _ => {}
    }
}

pub fn encode(sink: &mut dyn Sink, instr: &Instr) -> CodegenResult<()> {
    match instr.op() {
        Opcode::Nop => sink.put_byte(0x90),
        Opcode::Ret => sink.put_byte(0xc3),
        Opcode::Push => {
            if let Operand::Register(r) = instr.src() {
                sink.put_byte(0x50 + modrm_bits(*r));
            }
        }
        Opcode::Pop => {
            if let Operand::Register(r) = instr.dest() {
                sink.put_byte(0x58 + modrm_bits(*r));
            }
        }
        Opcode::Mov => encode_mov(sink, instr),
        Opcode::Jmp => {
            sink.put_byte(0xe9);
            sink.put_int(0);
            sink.mark_gc_ref(GcTag::Jump, None);
        }
        Opcode::Dat => {
            if let Operand::Constant { value, size } = instr.src() {
                if size.size32() == 1 {
                    sink.put_byte(*value as u8);
                } else {
                    sink.put_int(*value as u32);
                }
            }
        }
        Opcode::BeginBlock | Opcode::EndBlock | Opcode::JmpBlock | Opcode::Preserve
        | Opcode::Location => {}
        other => return Err(internal(format!("{other:?} must be lowered before encoding"))),
    }
    Ok(())
}

fn encode_mov(sink: &mut dyn Sink, instr: &Instr) {
    match (instr.dest(), instr.src()) {
        (Operand::Register(d), Operand::Register(s)) => {
            sink.put_byte(0x89);
            emit_modrm_for_reg_and_operand(sink, modrm_bits(*s), &Operand::Register(*d));
        }
        (dest @ Operand::Relative { .. }, Operand::Register(s)) => {
            sink.put_byte(0x89);
            emit_modrm_for_reg_and_operand(sink, modrm_bits(*s), dest);
        }
        (Operand::Register(d), src @ Operand::Relative { .. }) => {
            sink.put_byte(0x8b);
            emit_modrm_for_reg_and_operand(sink, modrm_bits(*d), src);
        }
        (Operand::Register(d), Operand::Constant { value, .. }) => {
            sink.put_byte(0xb8 + modrm_bits(*d));
            sink.put_int(*value as u32);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::LabelOutput;

    #[test]
    fn ret_is_one_byte() {
        let instr = Instr::loose(Opcode::Ret, Operand::None, Operand::None);
        let mut out = LabelOutput::new();
        encode(&mut out, &instr).unwrap();
        assert_eq!(out.size, 1);
    }
}
