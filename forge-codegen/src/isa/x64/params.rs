//! System V calling-convention classification.
//!
//! Each parameter is classified into an integer register, an SSE register,
//! or a stack slot; `SimpleDesc` values are split into 8-byte "eightbytes",
//! each classified independently, falling back to the stack as a whole if
//! not enough registers remain for every eightbyte.

use crate::isa::x64::registers::{INT_ARG, SSE_ARG};
use crate::reg::Reg;
use crate::size::Offset;
use crate::typedesc::{PrimitiveKind, TypeDesc};

/// Where a single eightbyte (or a whole primitive/complex value) ends up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamClass {
    Integer(Reg),
    Sse(Reg),
    /// Stack offset relative to the parameter area, assigned by `Params`
    /// once the register banks are exhausted.
    Stack(u32),
}

/// One fully-classified parameter, in argument order. `ComplexDesc`
/// parameters always produce exactly one `Integer` class: the hidden
/// pointer to the caller-materialized copy.
#[derive(Clone, Debug)]
pub struct ClassifiedParam {
    pub classes: Vec<ParamClass>,
    /// True if this parameter needed a stack-allocated copy constructed by
    /// the caller before the call (always true for `Complex`).
    pub hidden_copy: bool,
}

/// Incrementally assigns integer/SSE registers and stack slots to a
/// sequence of parameters, System V style.
pub struct Params {
    next_int: usize,
    next_sse: usize,
    stack_offset: u32,
}

impl Params {
    pub fn new() -> Self {
        Params {
            next_int: 0,
            next_sse: 0,
            stack_offset: 0,
        }
    }

    fn take_int(&mut self) -> Option<Reg> {
        let r = INT_ARG.get(self.next_int).copied();
        if r.is_some() {
            self.next_int += 1;
        }
        r
    }

    fn take_sse(&mut self) -> Option<Reg> {
        let r = SSE_ARG.get(self.next_sse).copied();
        if r.is_some() {
            self.next_sse += 1;
        }
        r
    }

    fn push_stack(&mut self, size: u32) -> ParamClass {
        let offset = self.stack_offset;
        self.stack_offset += size.max(8).div_ceil(8) * 8;
        ParamClass::Stack(offset)
    }

    /// Classify one parameter, consuming registers from the running
    /// sequence. Call in argument order.
    pub fn classify(&mut self, desc: &TypeDesc) -> ClassifiedParam {
        match desc {
            TypeDesc::Primitive { kind, .. } => {
                let class = match kind {
                    PrimitiveKind::Real => self
                        .take_sse()
                        .map(ParamClass::Sse)
                        .unwrap_or_else(|| self.push_stack(8)),
                    PrimitiveKind::Integer | PrimitiveKind::Pointer => self
                        .take_int()
                        .map(ParamClass::Integer)
                        .unwrap_or_else(|| self.push_stack(8)),
                    PrimitiveKind::None => self.push_stack(0),
                };
                ClassifiedParam {
                    classes: vec![class],
                    hidden_copy: false,
                }
            }
            TypeDesc::Complex { .. } => {
                let class = self
                    .take_int()
                    .map(ParamClass::Integer)
                    .unwrap_or_else(|| self.push_stack(8));
                ClassifiedParam {
                    classes: vec![class],
                    hidden_copy: true,
                }
            }
            TypeDesc::Simple { size, members } => {
                if size.size64() > 16 {
                    let class = self.push_stack(size.size64() as u32);
                    return ClassifiedParam {
                        classes: vec![class],
                        hidden_copy: false,
                    };
                }

                let eightbytes = eightbyte_kinds(members, size.size64() as u32);
                let mut int_needed = 0usize;
                let mut sse_needed = 0usize;
                for k in &eightbytes {
                    match k {
                        PrimitiveKind::Real => sse_needed += 1,
                        _ => int_needed += 1,
                    }
                }
                let int_avail = INT_ARG.len() - self.next_int;
                let sse_avail = SSE_ARG.len() - self.next_sse;
                if int_needed > int_avail || sse_needed > sse_avail {
                    let class = self.push_stack(size.size64() as u32);
                    return ClassifiedParam {
                        classes: vec![class],
                        hidden_copy: false,
                    };
                }

                let classes = eightbytes
                    .iter()
                    .map(|k| match k {
                        PrimitiveKind::Real => ParamClass::Sse(self.take_sse().unwrap()),
                        _ => ParamClass::Integer(self.take_int().unwrap()),
                    })
                    .collect();
                ClassifiedParam {
                    classes,
                    hidden_copy: false,
                }
            }
        }
    }

    pub fn stack_bytes_used(&self) -> u32 {
        self.stack_offset
    }
}

impl Default for Params {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify each 8-byte chunk of a `SimpleDesc` as `Integer` if any member
/// overlapping it is integer/pointer, else `Real`.
fn eightbyte_kinds(members: &[crate::typedesc::Member], total_size: u32) -> Vec<PrimitiveKind> {
    let n_eightbytes = total_size.div_ceil(8).max(1) as usize;
    let mut kinds = vec![PrimitiveKind::Real; n_eightbytes];
    for m in members {
        let eb = (m.offset64 / 8) as usize;
        if eb < kinds.len() && !matches!(m.kind, PrimitiveKind::Real) {
            kinds[eb] = PrimitiveKind::Integer;
        }
    }
    kinds
}

/// Classify a function's return value. Integer/pointer results go to
/// `rax`/`rdx`; real results to `xmm0`/`xmm1`; anything that doesn't fit
/// ("memory" class) is returned through a hidden first parameter holding
/// the caller-supplied destination pointer.
pub enum ReturnClass {
    Registers(Vec<ParamClass>),
    /// Hidden pointer parameter, classified like any other integer
    /// parameter (consumed from `Params` before the visible parameters).
    Memory,
}

pub fn classify_return(desc: &TypeDesc) -> ReturnClass {
    use crate::isa::x64::registers::{RAX, RDX, XMM0, XMM1};
    match desc {
        TypeDesc::Primitive {
            kind: PrimitiveKind::None,
            ..
        } => ReturnClass::Registers(vec![]),
        TypeDesc::Primitive {
            kind: PrimitiveKind::Real,
            ..
        } => ReturnClass::Registers(vec![ParamClass::Sse(XMM0)]),
        TypeDesc::Primitive { .. } => ReturnClass::Registers(vec![ParamClass::Integer(RAX)]),
        TypeDesc::Complex { .. } => ReturnClass::Memory,
        TypeDesc::Simple { size, members } => {
            if size.size64() > 16 {
                return ReturnClass::Memory;
            }
            let kinds = eightbyte_kinds(members, size.size64() as u32);
            let int_regs = [RAX, RDX];
            let sse_regs = [XMM0, XMM1];
            let mut next_int = 0;
            let mut next_sse = 0;
            let classes = kinds
                .iter()
                .map(|k| match k {
                    PrimitiveKind::Real => {
                        let r = sse_regs[next_sse];
                        next_sse += 1;
                        ParamClass::Sse(r)
                    }
                    _ => {
                        let r = int_regs[next_int];
                        next_int += 1;
                        ParamClass::Integer(r)
                    }
                })
                .collect();
            ReturnClass::Registers(classes)
        }
    }
}

/// A slot for a complex argument's caller-allocated stack copy, produced
/// when a by-value aggregate with a non-trivial copy constructor is passed
/// through a hidden pointer.
pub struct ComplexCopySlot {
    pub offset: Offset,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::size::s_int;

    #[test]
    fn first_six_integers_go_to_registers() {
        let mut p = Params::new();
        for _ in 0..6 {
            let c = p.classify(&TypeDesc::Primitive {
                kind: PrimitiveKind::Integer,
                size: s_int(),
            });
            assert!(matches!(c.classes[0], ParamClass::Integer(_)));
        }
        let overflow = p.classify(&TypeDesc::Primitive {
            kind: PrimitiveKind::Integer,
            size: s_int(),
        });
        assert!(matches!(overflow.classes[0], ParamClass::Stack(_)));
    }

    #[test]
    fn complex_param_is_hidden_pointer() {
        let mut p = Params::new();
        let c = p.classify(&TypeDesc::Complex {
            size: crate::size::Size::same(32, 8),
            ctor: crate::typedesc::UserFn(crate::reference::RefSource::new("ctor").add_ref()),
            dtor: crate::typedesc::UserFn(crate::reference::RefSource::new("dtor").add_ref()),
        });
        assert!(c.hidden_copy);
        assert!(matches!(c.classes[0], ParamClass::Integer(_)));
    }
}
