//! Minimal DWARF `.eh_frame` emission, covering the POSIX unwind path only
//! (no Windows SEH tables).
//!
//! Emits one CIE shared by every function and one FDE per function into a
//! fixed-size buffer; a program with more CFI opcodes than fit in that
//! buffer is a bug in the frame lowering, not a recoverable runtime
//! condition, so overflow raises [`crate::result::CodegenError::FdeOverflow`].

use crate::result::{CodegenError, CodegenResult};

const FDE_BUFFER_CAP: usize = 128;

const DW_CFA_DEF_CFA_OFFSET: u8 = 0x0e;
const DW_CFA_OFFSET_BASE: u8 = 0x80;
const DW_CFA_DEF_CFA_REGISTER: u8 = 0x0d;
const DW_CFA_ADVANCE_LOC1: u8 = 0x02;

/// One unwind-relevant event recorded as the prolog is built, later turned
/// into CFI opcodes.
#[derive(Clone, Copy, Debug)]
pub enum CfiEvent {
    AdvanceLoc { delta: u8 },
    DefCfaOffset { offset: u32 },
    DefCfaRegister { dwarf_reg: u8 },
    Offset { dwarf_reg: u8, factored_offset: i64 },
}

pub struct FdeBuilder {
    events: Vec<CfiEvent>,
}

impl FdeBuilder {
    pub fn new() -> Self {
        FdeBuilder { events: Vec::new() }
    }

    pub fn push(&mut self, event: CfiEvent) {
        self.events.push(event);
    }

    /// Encode the accumulated events as raw CFI opcode bytes into a
    /// fixed-capacity buffer, per the "zRP" augmentation convention (no
    /// personality routine, no LSDA pointer).
    pub fn encode(&self) -> CodegenResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(FDE_BUFFER_CAP);
        for ev in &self.events {
            match *ev {
                CfiEvent::AdvanceLoc { delta } => {
                    buf.push(DW_CFA_ADVANCE_LOC1);
                    buf.push(delta);
                }
                CfiEvent::DefCfaOffset { offset } => {
                    buf.push(DW_CFA_DEF_CFA_OFFSET);
                    push_uleb128(&mut buf, offset as u64);
                }
                CfiEvent::DefCfaRegister { dwarf_reg } => {
                    buf.push(DW_CFA_DEF_CFA_REGISTER);
                    push_uleb128(&mut buf, dwarf_reg as u64);
                }
                CfiEvent::Offset { dwarf_reg, factored_offset } => {
                    buf.push(DW_CFA_OFFSET_BASE | (dwarf_reg & 0x3f));
                    push_uleb128(&mut buf, factored_offset as u64);
                }
            }
            if buf.len() > FDE_BUFFER_CAP {
                return Err(CodegenError::FdeOverflow);
            }
        }
        while buf.len() % 8 != 0 {
            buf.push(0); // DW_CFA_nop
        }
        Ok(buf)
    }
}

impl Default for FdeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn push_uleb128(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// The single CIE (Common Information Entry) shared by every function
/// emitted by this backend: augmentation string `"zR"`, code alignment 1,
/// data alignment -8, return address column `rip` (16).
pub struct Cie;

impl Cie {
    pub const CODE_ALIGNMENT: u64 = 1;
    pub const DATA_ALIGNMENT: i64 = -8;
    pub const RETURN_ADDRESS_REGISTER: u8 = 16;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fde_encodes_to_padding_only() {
        let fde = FdeBuilder::new();
        let bytes = fde.encode().unwrap();
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn overflow_is_reported_not_panicked() {
        let mut fde = FdeBuilder::new();
        for i in 0..100 {
            fde.push(CfiEvent::AdvanceLoc { delta: i as u8 });
        }
        assert!(matches!(fde.encode(), Err(CodegenError::FdeOverflow)));
    }
}
