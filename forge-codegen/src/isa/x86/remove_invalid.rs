//! x86-32 invalid-instruction lowering.
//!
//! A strict subset of the x86-64 rules in
//! [`crate::isa::x64::remove_invalid`]: no 64-bit immediate pooling (every
//! constant already fits in 32 bits on this target), no register-classified
//! arguments (cdecl pushes everything on the stack), and a single x87
//! register file instead of an SSE bank for real numbers. The same
//! two-memory-operand, `lea`-destination, shift-count, `mul`/`div`/`mod`
//! fixed-register and `fnParam*`/`fnCall*`/`fnRet*` materialization rules
//! apply.

use crate::ir::instr::{Instr, Opcode};
use crate::ir::listing::Listing;
use crate::ir::operand::{self, Operand};
use crate::isa::x86::params::{classify_return, ReturnClass};
use crate::isa::x86::registers::{CL, DIV_CLOBBER, DIV_DEST, EAX, EDX};
use crate::reg::Width;
use crate::regalloc::used_regs::UsedRegs;
use crate::size::{s_byte, s_int, Offset};
use crate::transform::Transform;
use crate::typedesc::{PrimitiveKind, TypeDesc};

pub struct RemoveInvalid<'a> {
    used: &'a UsedRegs,
    /// `fnParam[Ref]` operands buffered since the last `fnCall[Ref]`, in
    /// argument order.
    pending_params: Vec<(TypeDesc, Operand, bool)>,
    /// The label `fnRet[Ref]` jumps to and `epilog` is placed at, created
    /// lazily the first time a function body actually returns a value.
    epilog_label: Option<crate::reg::Label>,
}

impl<'a> RemoveInvalid<'a> {
    pub fn new(used: &'a UsedRegs) -> Self {
        RemoveInvalid {
            used,
            pending_params: Vec::new(),
            epilog_label: None,
        }
    }

    fn lower_lea(&self, dest: &mut Listing, instr: &Instr) {
        if instr.dest().is_register() {
            dest.push(instr.clone());
            return;
        }
        let scratch = crate::isa::x86::registers::EDX;
        dest.push(instr.alter_dest(Operand::Register(scratch)));
        dest.push(Instr::loose(Opcode::Mov, instr.dest().clone(), Operand::Register(scratch)));
    }

    fn lower_two_memory_operands(&self, dest: &mut Listing, instr: &Instr) {
        if !(instr.dest().is_memory() && instr.src().is_memory()) {
            dest.push(instr.clone());
            return;
        }
        let scratch = crate::isa::x86::registers::EDX;
        dest.push(Instr::loose(Opcode::Mov, Operand::Register(scratch), instr.src().clone()));
        dest.push(instr.alter_src(Operand::Register(scratch)));
    }

    fn lower_shift(&self, dest: &mut Listing, line: usize, instr: &Instr) {
        let ok = instr.src().is_immediate() || matches!(instr.src(), Operand::Register(r) if r.same(CL));
        if ok {
            dest.push(instr.clone());
            return;
        }
        let save_cl = self.used.at(line).has(CL);
        if save_cl {
            dest.push(Instr::loose(Opcode::Push, Operand::None, Operand::Register(CL.with_width(Width::Int))));
        }
        dest.push(Instr::loose(Opcode::Mov, Operand::Register(CL), instr.src().clone()));
        dest.push(instr.alter_src(Operand::Register(CL)));
        if save_cl {
            dest.push(Instr::loose(Opcode::Pop, Operand::Register(CL.with_width(Width::Int)), Operand::None));
        }
    }

    fn lower_div_family(&self, dest: &mut Listing, instr: &Instr) {
        let dest_is_eax = matches!(instr.dest().reg(), Some(r) if r.same(DIV_DEST));
        if !dest_is_eax {
            dest.push(Instr::loose(Opcode::Push, Operand::None, Operand::Register(DIV_DEST)));
        }
        dest.push(Instr::loose(Opcode::Mov, Operand::Register(DIV_DEST), instr.dest().clone()));
        if matches!(instr.op(), Opcode::IDiv | Opcode::IMod) {
            dest.push(Instr::loose(Opcode::Sar, Operand::Register(DIV_CLOBBER), crate::ir::operand::byte_const(31)));
        } else {
            dest.push(Instr::loose(Opcode::BXor, Operand::Register(DIV_CLOBBER), Operand::Register(DIV_CLOBBER)));
        }
        let op = match instr.op() {
            Opcode::Mul => Opcode::Mul,
            Opcode::IDiv | Opcode::IMod => Opcode::IDiv,
            _ => Opcode::UDiv,
        };
        dest.push(Instr::loose(op, Operand::Register(DIV_DEST), instr.src().clone()));
        let result = match instr.op() {
            Opcode::Mul | Opcode::IDiv | Opcode::UDiv => DIV_DEST,
            _ => DIV_CLOBBER,
        };
        dest.push(Instr::loose(Opcode::Mov, instr.dest().clone(), Operand::Register(result)));
        if !dest_is_eax {
            dest.push(Instr::loose(Opcode::Pop, Operand::Register(DIV_DEST), Operand::None));
        }
    }

    /// `iCast`/`uCast` widen or narrow through `al`/`eax`, the same scheme
    /// as the x86-64 pass minus the `rax` width tier it doesn't have.
    fn lower_cast(&self, dest: &mut Listing, instr: &Instr) {
        let dst_width = width_of(instr.dest().size());
        let src_width = width_of(instr.src().size());
        let overlaps_eax = matches!(instr.dest().reg(), Some(r) if r.same(EAX));
        let forced = EAX.with_width(dst_width);

        if !overlaps_eax {
            dest.push(Instr::loose(Opcode::Push, Operand::None, Operand::Register(EAX)));
        }
        let moved_src = match instr.src().reg() {
            Some(r) if r.same(EAX) => Operand::Register(EAX.with_width(src_width)),
            _ => instr.src().clone(),
        };
        dest.push(instr.alter(Operand::Register(forced), moved_src));
        if !overlaps_eax {
            dest.push(Instr::loose(Opcode::Mov, instr.dest().clone(), Operand::Register(forced)));
            dest.push(Instr::loose(Opcode::Pop, Operand::Register(EAX), Operand::None));
        }
    }

    /// `fnCall[Ref]`: cdecl pushes every argument right to left, through a
    /// scratch register since `push` of a non-register memory operand isn't
    /// modeled, then calls and cleans its own stack arguments up afterward.
    fn lower_call(&mut self, dest: &mut Listing, instr: &Instr) {
        let pending = std::mem::take(&mut self.pending_params);
        let mut total_bytes = 0u32;
        for (desc, value, _is_ref) in pending.iter().rev() {
            let size = if desc.is_complex() { 4 } else { desc.size().size32().max(4) };
            total_bytes += size.div_ceil(4) * 4;
            self.push_value(dest, value, size);
        }

        dest.push(Instr::loose(Opcode::Call, Operand::None, instr.src().clone()));

        if total_bytes != 0 {
            dest.push(Instr::loose(
                Opcode::Add,
                Operand::Register(crate::isa::x86::registers::ESP),
                operand::int_const(total_bytes as i32),
            ));
        }
    }

    /// Push a `size`-byte value onto the stack 4 bytes at a time,
    /// highest-offset chunk first, so the lowest-offset (first) bytes end
    /// up at the lowest address once every chunk has landed.
    fn push_value(&self, dest: &mut Listing, value: &Operand, size: u32) {
        let chunks = size.div_ceil(4).max(1);
        for i in (0..chunks).rev() {
            let chunk = if chunks == 1 {
                value.clone()
            } else {
                offset_operand(value, Offset::same(i as i64 * 4), s_int())
            };
            dest.push(Instr::loose(Opcode::Mov, Operand::Register(EDX), chunk));
            dest.push(Instr::loose(Opcode::Push, Operand::None, Operand::Register(EDX)));
        }
    }

    /// `fnRet[Ref]`: classify the function's declared result and move it
    /// into the classified register(s) or the x87 stack, then jump to the
    /// shared epilog.
    fn lower_ret(&mut self, dest: &mut Listing, src: &Listing, instr: &Instr) {
        let is_ref = instr.op() == Opcode::FnRetRef;
        let result = src.result.clone().unwrap_or(TypeDesc::Primitive {
            kind: PrimitiveKind::None,
            size: crate::size::Size::new(),
        });

        match classify_return(&result) {
            ReturnClass::Eax => {
                let value = if is_ref {
                    self.deref_chunk(dest, instr.src(), 0, result.size())
                } else {
                    instr.src().clone()
                };
                dest.push(Instr::loose(
                    Opcode::Mov,
                    Operand::Register(EAX.with_width(width_of(result.size()))),
                    value,
                ));
            }
            ReturnClass::EdxEax => {
                let lo = if is_ref {
                    self.deref_chunk(dest, instr.src(), 0, s_int())
                } else {
                    offset_operand(instr.src(), Offset::same(0), s_int())
                };
                let hi = if is_ref {
                    self.deref_chunk(dest, instr.src(), 1, s_int())
                } else {
                    offset_operand(instr.src(), Offset::same(4), s_int())
                };
                dest.push(Instr::loose(Opcode::Mov, Operand::Register(EAX), lo));
                dest.push(Instr::loose(Opcode::Mov, Operand::Register(DIV_CLOBBER), hi));
            }
            ReturnClass::X87 => {
                let value = if is_ref {
                    self.deref_chunk(dest, instr.src(), 0, result.size())
                } else {
                    instr.src().clone()
                };
                dest.push(Instr::loose(Opcode::FLd, Operand::None, value));
            }
            ReturnClass::Memory => {
                let hidden_ptr = *src
                    .params()
                    .first()
                    .expect("memory-classified result needs a hidden pointer as the first parameter");
                self.lower_memory_return(dest, instr, hidden_ptr, &result, is_ref);
            }
        }

        let label = self.epilog_label(dest);
        dest.push(Instr::loose(Opcode::Jmp, Operand::None, Operand::Label(label)));
    }

    fn deref_chunk(&self, dest: &mut Listing, ptr_operand: &Operand, i: usize, size: crate::size::Size) -> Operand {
        let ptr_reg = match ptr_operand {
            Operand::Register(r) => *r,
            other => {
                dest.push(Instr::loose(Opcode::Mov, Operand::Register(EDX), other.clone()));
                EDX
            }
        };
        Operand::Relative { reg: ptr_reg, offset: Offset::same(i as i64 * 4), size }
    }

    /// A `Memory`-classified result is returned through the caller-supplied
    /// hidden pointer, cdecl's own leading parameter: complex results go
    /// through their copy constructor (cdecl args pushed right to left, so
    /// the source pointer is pushed before the destination one), oversized
    /// simple aggregates are byte-copied 4 bytes at a time.
    fn lower_memory_return(
        &mut self,
        dest: &mut Listing,
        instr: &Instr,
        hidden_ptr: crate::ir::entities::Variable,
        result: &TypeDesc,
        is_ref: bool,
    ) {
        let ptr_size = crate::size::s_ptr();
        let dest_ptr = operand::var_operand(hidden_ptr, Offset::default(), ptr_size);
        match result {
            TypeDesc::Complex { ctor, .. } => {
                let _ = is_ref;
                self.push_value(dest, instr.src(), 4);
                self.push_value(dest, &dest_ptr, 4);
                dest.push(Instr::loose(Opcode::Call, Operand::None, Operand::Reference(ctor.0.clone())));
                dest.push(Instr::loose(
                    Opcode::Add,
                    Operand::Register(crate::isa::x86::registers::ESP),
                    operand::int_const(8),
                ));
                dest.push(Instr::loose(Opcode::Mov, Operand::Register(EAX), dest_ptr));
            }
            _ => {
                dest.push(Instr::loose(Opcode::Mov, Operand::Register(EAX), dest_ptr));
                let total = result.size().size32();
                let mut off = 0u32;
                while off < total {
                    let remaining = total - off;
                    let chunk_size = if remaining >= 4 { s_int() } else { s_byte() };
                    let step = chunk_size.size32();
                    let src_chunk = offset_operand(instr.src(), Offset::same(off as i64), chunk_size);
                    let scratch = EDX.with_width(width_of(chunk_size));
                    dest.push(Instr::loose(Opcode::Mov, Operand::Register(scratch), src_chunk));
                    dest.push(Instr::loose(
                        Opcode::Mov,
                        Operand::Relative { reg: EAX, offset: Offset::same(off as i64), size: chunk_size },
                        Operand::Register(scratch),
                    ));
                    off += step;
                }
            }
        }
    }

    fn epilog_label(&mut self, dest: &mut Listing) -> crate::reg::Label {
        *self.epilog_label.get_or_insert_with(|| dest.new_label())
    }

    /// `beginBlock(part)`: zero-initialize any destructor-bearing local
    /// declared directly in `part`, mirroring the x86-64 pass.
    fn lower_begin_block(&self, dest: &mut Listing, src: &Listing, instr: &Instr, part: crate::ir::entities::Part) {
        for v in src.part_vars(part) {
            if src.free_fn(v).is_some() {
                let size = src.var_size(v);
                dest.push(Instr::loose(
                    Opcode::Mov,
                    operand::var_operand(v, Offset::default(), size),
                    Operand::Constant { value: 0, size },
                ));
            }
        }
        dest.push(instr.clone());
    }

    /// `endBlock(part)`: destruct `part`'s own locals in reverse declaration
    /// order, each call wrapped in an `eax`-only save/restore.
    fn lower_end_block(&self, dest: &mut Listing, src: &Listing, instr: &Instr, part: crate::ir::entities::Part) {
        for v in src.part_vars(part).into_iter().rev() {
            let Some(dtor) = src.free_fn(v) else { continue };
            let size = src.var_size(v);
            let free_opt = src.free_opt(v);
            let dtor = dtor.clone();
            dest.push(Instr::loose(Opcode::Push, Operand::None, Operand::Register(EAX)));
            let arg = if free_opt.free_ptr {
                dest.push(Instr::loose(
                    Opcode::Lea,
                    Operand::Register(EDX),
                    operand::var_operand(v, Offset::default(), size),
                ));
                Operand::Register(EDX)
            } else {
                operand::var_operand(v, Offset::default(), size)
            };
            self.push_value(dest, &arg, 4);
            dest.push(Instr::loose(Opcode::Call, Operand::None, Operand::Reference(dtor)));
            dest.push(Instr::loose(
                Opcode::Add,
                Operand::Register(crate::isa::x86::registers::ESP),
                operand::int_const(4),
            ));
            dest.push(Instr::loose(Opcode::Pop, Operand::Register(EAX), Operand::None));
        }
        dest.push(instr.clone());
    }
}

/// Offset a `Variable`/`Relative` operand by `extra`, reusing its own kind
/// so a still-unresolved `Variable` stays unresolved for `resolve_vars` to
/// handle later; anything else has no further chunks and is returned as-is.
fn offset_operand(op: &Operand, extra: Offset, size: crate::size::Size) -> Operand {
    match op {
        Operand::Variable { var, offset, .. } => Operand::Variable { var: *var, offset: *offset + extra, size },
        Operand::Relative { reg, offset, .. } => Operand::Relative { reg: *reg, offset: *offset + extra, size },
        other => other.clone(),
    }
}

fn width_of(size: crate::size::Size) -> Width {
    match size.size32() {
        1 => Width::Byte,
        _ => Width::Int,
    }
}

impl<'a> Transform for RemoveInvalid<'a> {
    fn during(&mut self, dest: &mut Listing, src: &Listing, id: usize) {
        let instr = src.at(id);
        for label in src.labels(id) {
            dest.push_label(*label);
        }
        match instr.op() {
            Opcode::Lea => self.lower_lea(dest, instr),
            Opcode::Shl | Opcode::Shr | Opcode::Sar => self.lower_shift(dest, id, instr),
            Opcode::Mul | Opcode::IDiv | Opcode::UDiv | Opcode::IMod | Opcode::UMod => {
                self.lower_div_family(dest, instr)
            }
            Opcode::ICast | Opcode::UCast => self.lower_cast(dest, instr),
            Opcode::FnParam | Opcode::FnParamRef => {
                let desc = instr
                    .type_desc()
                    .cloned()
                    .expect("fnParam[Ref] must carry a TypeDesc");
                self.pending_params.push((desc, instr.src().clone(), instr.op() == Opcode::FnParamRef));
            }
            Opcode::FnCall | Opcode::FnCallRef => self.lower_call(dest, instr),
            Opcode::FnRet | Opcode::FnRetRef => self.lower_ret(dest, src, instr),
            Opcode::BeginBlock => {
                let Operand::Part(part) = instr.dest() else {
                    panic!("beginBlock must carry a Part operand")
                };
                self.lower_begin_block(dest, src, instr, *part);
            }
            Opcode::EndBlock => {
                let Operand::Part(part) = instr.dest() else {
                    panic!("endBlock must carry a Part operand")
                };
                self.lower_end_block(dest, src, instr, *part);
            }
            Opcode::Epilog => {
                if let Some(label) = self.epilog_label {
                    dest.push_label(label);
                }
                dest.push(instr.clone());
            }
            _ => self.lower_two_memory_operands(dest, instr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::x86::registers::{EAX, EBX};
    use crate::isa::x86::X86Arena;
    use crate::regalloc::used_regs;

    #[test]
    fn division_expands_to_multiple_instructions() {
        let mut l = Listing::new();
        l.push(Instr::new(Opcode::UDiv, Operand::Register(EAX), Operand::Register(EBX)).unwrap());
        let arena = X86Arena::new();
        let used = used_regs::compute(&l, &arena);
        let mut pass = RemoveInvalid::new(&used);
        let out = crate::transform::transform(&l, &mut pass);
        assert!(out.count() > 1);
    }

    #[test]
    fn single_integer_argument_call_pushes_and_cleans_up() {
        let mut l = Listing::new();
        l.push(Instr::loose(Opcode::FnParam, Operand::None, Operand::Register(EBX)).with_type_desc(
            TypeDesc::Primitive { kind: PrimitiveKind::Integer, size: s_int() },
            false,
        ));
        let target = crate::reference::RefSource::new("callee").add_ref();
        l.push(Instr::loose(Opcode::FnCall, Operand::None, Operand::Reference(target)));
        let arena = X86Arena::new();
        let used = used_regs::compute(&l, &arena);
        let mut pass = RemoveInvalid::new(&used);
        let out = crate::transform::transform(&l, &mut pass);
        assert!((0..out.count()).any(|i| out.at(i).op() == Opcode::Push));
        assert!((0..out.count()).any(|i| out.at(i).op() == Opcode::Call));
        assert!((0..out.count()).any(|i| out.at(i).op() == Opcode::Add));
    }

    #[test]
    fn identity_return_moves_param_into_eax_and_jumps_to_epilog() {
        let mut l = Listing::new();
        let p = l.create_param(TypeDesc::Primitive { kind: PrimitiveKind::Integer, size: s_int() });
        l.result = Some(TypeDesc::Primitive { kind: PrimitiveKind::Integer, size: s_int() });
        l.push(Instr::loose(
            Opcode::FnRet,
            Operand::None,
            operand::var_operand(p, crate::size::Offset::default(), s_int()),
        ));
        l.push(Instr::loose(Opcode::Epilog, Operand::None, Operand::None));
        let arena = X86Arena::new();
        let used = used_regs::compute(&l, &arena);
        let mut pass = RemoveInvalid::new(&used);
        let out = crate::transform::transform(&l, &mut pass);
        let moves_into_eax = (0..out.count()).any(|i| {
            matches!(out.at(i).op(), Opcode::Mov)
                && matches!(out.at(i).dest(), Operand::Register(r) if r.same(EAX))
        });
        assert!(moves_into_eax);
        assert!((0..out.count()).any(|i| out.at(i).op() == Opcode::Jmp));
        assert!(!out.labels(out.count() - 1).is_empty());
    }

    #[test]
    fn end_block_calls_destructor_for_var_with_free_fn() {
        use crate::ir::listing::FreeOpt;

        let mut l = Listing::new();
        let block = l.create_block(l.root());
        let dtor = crate::reference::RefSource::new("dtor").add_ref();
        let v = l.create_var(block, s_int(), Some(dtor), FreeOpt::ON_BLOCK_EXIT);
        l.push(Instr::loose(Opcode::BeginBlock, Operand::Part(block), Operand::None));
        l.push(Instr::loose(Opcode::EndBlock, Operand::Part(block), Operand::None));
        let _ = v;

        let arena = X86Arena::new();
        let used = used_regs::compute(&l, &arena);
        let mut pass = RemoveInvalid::new(&used);
        let out = crate::transform::transform(&l, &mut pass);

        assert!((0..out.count()).any(|i| out.at(i).op() == Opcode::Call));
        assert!((0..out.count()).any(|i| out.at(i).op() == Opcode::EndBlock));
    }
}
