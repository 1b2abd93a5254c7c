//! x86-64 invalid-instruction lowering.
//!
//! Rewrites instructions that the calling convention or generic IR model
//! allow but the x86-64 encoder cannot emit directly: oversized constants,
//! two memory operands, shift counts outside `cl`, the fixed-register
//! `mul`/`div`/`mod` family, the `iCast`/`uCast` width conversions, and the
//! `fnParam*`/`fnCall*`/`fnRet*` pseudo-ops, which this pass materializes
//! into the real System V argument shuffle, `call`, and return-register
//! moves.

use crate::ir::instr::{Instr, Opcode};
use crate::ir::listing::Listing;
use crate::ir::operand::{self, Operand};
use crate::isa::x64::params::{classify_return, ParamClass, Params, ReturnClass};
use crate::isa::x64::registers::{CL, DIV_CLOBBER, DIV_DEST, INT_ARG, RAX, R15_SCRATCH};
use crate::reg::{Reg, Width};
use crate::regalloc::used_regs::UsedRegs;
use crate::size::Offset;
use crate::transform::Transform;
use crate::typedesc::{PrimitiveKind, TypeDesc};

/// Walks a listing already carrying used-register information (computed by
/// the caller before invoking this pass, since scratch-register choice at a
/// given line depends on what's live at that point).
pub struct RemoveInvalid<'a> {
    used: &'a UsedRegs,
    dat_pool: Vec<(u64, crate::reg::Label)>,
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
            dat_pool: Vec::new(),
            pending_params: Vec::new(),
            epilog_label: None,
        }
    }

    /// Rule 1: a constant wider than 32 bits cannot appear as an immediate
    /// operand on x86-64; pool it into a `dat` block and reference it
    /// relative to `rip` instead. Pooled constants are deduplicated by
    /// value within one listing.
    fn pool_constant(&mut self, dest: &mut Listing, value: u64, size: crate::size::Size) -> Operand {
        let label = if let Some((_, l)) = self.dat_pool.iter().find(|(v, _)| *v == value) {
            *l
        } else {
            let l = dest.new_label();
            self.dat_pool.push((value, l));
            l
        };
        let _ = size;
        Operand::Label(label)
    }

    fn emit_dat_pool(&self, dest: &mut Listing) {
        for (value, label) in &self.dat_pool {
            dest.push_label(*label);
            dest.push(Instr::loose(
                Opcode::Dat,
                Operand::None,
                operand::long_const(*value as i64),
            ));
        }
    }

    /// Rule 2: `lea` must write a register; if the destination is memory,
    /// materialize the address in a scratch register first and `mov` it
    /// out.
    fn lower_lea(&self, dest: &mut Listing, line: usize, instr: &Instr) {
        if instr.dest().is_register() {
            dest.push(instr.clone());
            return;
        }
        let scratch = self.pick_scratch(line);
        dest.push(instr.alter_dest(Operand::Register(scratch)));
        dest.push(Instr::loose(
            Opcode::Mov,
            instr.dest().clone(),
            Operand::Register(scratch),
        ));
    }

    /// Rule 3: at most one of `dest`/`src` may be a memory operand; if both
    /// are, stage the source through a scratch register.
    fn lower_two_memory_operands(&self, dest: &mut Listing, line: usize, instr: &Instr) {
        if !(instr.dest().is_memory() && instr.src().is_memory()) {
            dest.push(instr.clone());
            return;
        }
        let scratch = self.pick_scratch(line).with_width(width_of(instr.src().size()));
        dest.push(Instr::loose(
            Opcode::Mov,
            Operand::Register(scratch),
            instr.src().clone(),
        ));
        dest.push(instr.alter_src(Operand::Register(scratch)));
    }

    /// Rule 4: `shl`/`shr`/`sar`'s count operand must be the immediate or
    /// `cl`; anything else is staged through `cl`, saving/restoring it if it
    /// was live.
    fn lower_shift(&self, dest: &mut Listing, line: usize, instr: &Instr) {
        let is_cl_ok = instr.src().is_immediate()
            || matches!(instr.src(), Operand::Register(r) if r.same(CL));
        if is_cl_ok {
            dest.push(instr.clone());
            return;
        }
        let save_cl = self.used.at(line).has(CL);
        if save_cl {
            dest.push(Instr::loose(Opcode::Push, Operand::None, Operand::Register(CL.with_width(Width::Long))));
        }
        dest.push(Instr::loose(
            Opcode::Mov,
            Operand::Register(CL),
            instr.src().clone(),
        ));
        dest.push(instr.alter_src(Operand::Register(CL)));
        if save_cl {
            dest.push(Instr::loose(Opcode::Pop, Operand::Register(CL.with_width(Width::Long)), Operand::None));
        }
    }

    /// Rule 5: `mul`/`iDiv`/`uDiv`/`iMod`/`uMod` are fixed to `rax`/`rdx`.
    /// Shuffle the real operands in and out of those registers, spilling
    /// whichever of `rax`/`rdx` is live and not the instruction's own
    /// destination.
    fn lower_div_family(&self, dest: &mut Listing, line: usize, instr: &Instr) {
        let width = width_of(instr.dest().size());
        let rax = DIV_DEST.with_width(width);
        let rdx = DIV_CLOBBER.with_width(width);

        let dest_is_rax = matches!(instr.dest().reg(), Some(r) if r.same(rax));
        if !dest_is_rax {
            dest.push(Instr::loose(Opcode::Push, Operand::None, Operand::Register(DIV_DEST)));
        }
        if self.used.at(line).has(rdx) && !matches!(instr.op(), Opcode::Mul) {
            dest.push(Instr::loose(Opcode::Push, Operand::None, Operand::Register(DIV_CLOBBER)));
        }

        dest.push(Instr::loose(Opcode::Mov, Operand::Register(rax), instr.dest().clone()));
        if matches!(instr.op(), Opcode::IDiv | Opcode::IMod) {
            // sign-extend rax into rdx:rax via a repeated shift, avoiding a
            // dedicated `cdq`/`cqo` opcode in the model.
            dest.push(Instr::loose(
                Opcode::Sar,
                Operand::Register(rdx),
                operand::byte_const((width.size().current() * 8 - 1) as u8),
            ));
        } else {
            dest.push(Instr::loose(
                Opcode::BXor,
                Operand::Register(rdx),
                Operand::Register(rdx),
            ));
        }
        let op = match instr.op() {
            Opcode::Mul => Opcode::Mul,
            Opcode::IDiv | Opcode::IMod => Opcode::IDiv,
            Opcode::UDiv | Opcode::UMod => Opcode::UDiv,
            other => other,
        };
        dest.push(Instr::loose(op, Operand::Register(rax), instr.src().clone()));

        let result_reg = match instr.op() {
            Opcode::Mul | Opcode::IDiv | Opcode::UDiv => rax,
            _ => rdx,
        };
        dest.push(Instr::loose(Opcode::Mov, instr.dest().clone(), Operand::Register(result_reg)));

        if self.used.at(line).has(rdx) && !matches!(instr.op(), Opcode::Mul) {
            dest.push(Instr::loose(Opcode::Pop, Operand::Register(DIV_CLOBBER), Operand::None));
        }
        if !dest_is_rax {
            dest.push(Instr::loose(Opcode::Pop, Operand::Register(DIV_DEST), Operand::None));
        }
    }

    /// Rule 6: `iCast`/`uCast` widen or narrow through `al`/`eax`/`rax` when
    /// the destination and source don't already overlap one physical
    /// register, so no dedicated movzx/movsx-through-memory path is needed.
    fn lower_cast(&self, dest: &mut Listing, instr: &Instr) {
        let dst_width = width_of(instr.dest().size());
        let src_width = width_of(instr.src().size());
        let overlaps_rax = matches!(instr.dest().reg(), Some(r) if r.same(RAX));
        let forced = RAX.with_width(dst_width);

        if !overlaps_rax {
            dest.push(Instr::loose(Opcode::Push, Operand::None, Operand::Register(RAX)));
        }
        let moved_src = match instr.src().reg() {
            Some(r) if r.same(RAX) => Operand::Register(RAX.with_width(src_width)),
            _ => instr.src().clone(),
        };
        dest.push(instr.alter(Operand::Register(forced), moved_src));
        if !overlaps_rax {
            dest.push(Instr::loose(Opcode::Mov, instr.dest().clone(), Operand::Register(forced)));
            dest.push(Instr::loose(Opcode::Pop, Operand::Register(RAX), Operand::None));
        }
    }

    /// Rule 8: `fnCall[Ref]` drains the parameter buffer accumulated by the
    /// preceding `fnParam[Ref]`s, classifies each with `Params` in order,
    /// assigns registers (breaking cycles through a scratch register) and
    /// pushes stack overflow arguments right-to-left, then emits the real
    /// `call`.
    fn lower_call(&mut self, dest: &mut Listing, instr: &Instr) {
        let pending = std::mem::take(&mut self.pending_params);
        let mut classifier = Params::new();
        let mut assignments: Vec<(Reg, Operand)> = Vec::new();
        let mut stack_args: Vec<(u32, Operand, Width)> = Vec::new();

        for (desc, value, _is_ref) in &pending {
            let classified = classifier.classify(desc);
            for (i, class) in classified.classes.iter().enumerate() {
                let chunk = if i == 0 {
                    value.clone()
                } else {
                    offset_operand(value, Offset::same(i as i64 * 8), crate::size::s_long())
                };
                match class {
                    ParamClass::Integer(r) | ParamClass::Sse(r) => {
                        assignments.push((r.with_width(width_of(chunk.size())), chunk));
                    }
                    ParamClass::Stack(off) => stack_args.push((*off, chunk, width_of(chunk.size()))),
                }
            }
        }

        stack_args.sort_by_key(|(off, _, _)| std::cmp::Reverse(*off));
        for (_, value, width) in &stack_args {
            let scratch = R15_SCRATCH.with_width(*width);
            dest.push(Instr::loose(Opcode::Mov, Operand::Register(scratch), value.clone()));
            dest.push(Instr::loose(Opcode::Push, Operand::None, Operand::Register(R15_SCRATCH)));
        }

        self.emit_parallel_move(dest, assignments);

        dest.push(Instr::loose(Opcode::Call, Operand::None, instr.src().clone()));

        if !stack_args.is_empty() {
            dest.push(Instr::loose(
                Opcode::Add,
                Operand::Register(crate::isa::x64::registers::RSP),
                operand::long_const(stack_args.len() as i64 * 8),
            ));
        }
    }

    /// Assign each `(target register, source operand)` pair, deferring any
    /// assignment whose target is still needed as someone else's source.
    /// A cycle (every remaining assignment blocked on another) is broken by
    /// shuffling the first one's current value into a scratch register and
    /// redirecting whoever wanted it there instead.
    fn emit_parallel_move(&self, dest: &mut Listing, mut assignments: Vec<(Reg, Operand)>) {
        while !assignments.is_empty() {
            let blocked = |target: Reg, pending: &[(Reg, Operand)]| {
                pending.iter().any(|(t, src)| {
                    !t.same(target) && matches!(src.reg(), Some(r) if r.same(target))
                })
            };
            if let Some(idx) = assignments.iter().position(|(t, _)| !blocked(*t, &assignments)) {
                let (target, value) = assignments.remove(idx);
                dest.push(Instr::loose(Opcode::Mov, Operand::Register(target), value));
            } else {
                let (target, value) = assignments.remove(0);
                dest.push(Instr::loose(
                    Opcode::Mov,
                    Operand::Register(R15_SCRATCH.with_width(target.width())),
                    Operand::Register(target),
                ));
                dest.push(Instr::loose(Opcode::Mov, Operand::Register(target), value));
                for (_, src) in assignments.iter_mut() {
                    if matches!(src.reg(), Some(r) if r.same(target)) {
                        *src = Operand::Register(R15_SCRATCH.with_width(target.width()));
                    }
                }
            }
        }
    }

    /// `fnRet[Ref]`: classify the function's declared result, move the
    /// value (or, for `fnRetRef`, dereference the pointer operand) into the
    /// classified return register(s), then jump to the shared epilog.
    fn lower_ret(&mut self, dest: &mut Listing, src: &Listing, instr: &Instr) {
        let is_ref = instr.op() == Opcode::FnRetRef;
        let result = src.result.clone().unwrap_or(TypeDesc::Primitive {
            kind: PrimitiveKind::None,
            size: crate::size::Size::new(),
        });

        match classify_return(&result) {
            ReturnClass::Registers(classes) => {
                for (i, class) in classes.iter().enumerate() {
                    let chunk_size = if classes.len() == 1 { result.size() } else { crate::size::s_long() };
                    let value = if is_ref {
                        self.deref_chunk(dest, instr.src(), i, chunk_size)
                    } else {
                        offset_operand(instr.src(), Offset::same(i as i64 * 8), chunk_size)
                    };
                    let reg = match class {
                        ParamClass::Integer(r) | ParamClass::Sse(r) => r.with_width(width_of(chunk_size)),
                        ParamClass::Stack(_) => unreachable!("return values never classify to the stack"),
                    };
                    dest.push(Instr::loose(Opcode::Mov, Operand::Register(reg), value));
                }
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

    /// Dereference `ptr_operand` (loading it into a scratch register first
    /// if it isn't already one) and read the `i`-th eightbyte of the
    /// pointee.
    fn deref_chunk(&self, dest: &mut Listing, ptr_operand: &Operand, i: usize, size: crate::size::Size) -> Operand {
        let ptr_reg = match ptr_operand {
            Operand::Register(r) => *r,
            other => {
                dest.push(Instr::loose(Opcode::Mov, Operand::Register(R15_SCRATCH), other.clone()));
                R15_SCRATCH
            }
        };
        Operand::Relative { reg: ptr_reg, offset: Offset::same(i as i64 * 8), size }
    }

    /// A `Memory`-classified result is returned through the caller-supplied
    /// hidden pointer (by convention, the function's own leading
    /// parameter): complex results go through their copy constructor,
    /// oversized simple aggregates are byte-copied eightbyte by eightbyte.
    /// Either way `rax` ends up holding the destination pointer, per the
    /// System V `sret` convention.
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
                // A `Complex` value is always addressed rather than held by
                // value, so `fnRet` and `fnRetRef` carry the same kind of
                // operand here; the constructor takes it as-is.
                let _ = is_ref;
                dest.push(Instr::loose(Opcode::Mov, Operand::Register(INT_ARG[0]), dest_ptr.clone()));
                dest.push(Instr::loose(Opcode::Mov, Operand::Register(INT_ARG[1]), instr.src().clone()));
                dest.push(Instr::loose(Opcode::Call, Operand::None, Operand::Reference(ctor.0.clone())));
                dest.push(Instr::loose(Opcode::Mov, Operand::Register(RAX), dest_ptr));
            }
            _ => {
                dest.push(Instr::loose(Opcode::Mov, Operand::Register(RAX), dest_ptr));
                let total = result.size().size64() as i64;
                let mut off = 0i64;
                while off < total {
                    let remaining = total - off;
                    let chunk_size = if remaining >= 8 {
                        crate::size::s_long()
                    } else if remaining >= 4 {
                        crate::size::s_int()
                    } else {
                        crate::size::s_byte()
                    };
                    let step = chunk_size.size64() as i64;
                    let src_chunk = offset_operand(instr.src(), Offset::same(off), chunk_size);
                    let scratch = R15_SCRATCH.with_width(width_of(chunk_size));
                    dest.push(Instr::loose(Opcode::Mov, Operand::Register(scratch), src_chunk));
                    dest.push(Instr::loose(
                        Opcode::Mov,
                        Operand::Relative { reg: RAX, offset: Offset::same(off), size: chunk_size },
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

    fn pick_scratch(&self, _line: usize) -> crate::reg::Reg {
        crate::isa::x64::registers::R15_SCRATCH
    }

    /// `beginBlock(part)`: zero-initialize any destructor-bearing local
    /// declared directly in `part`, so an unwind that runs before its
    /// constructor executes sees a null pointer instead of garbage. Root
    /// block locals are already handled by the prolog; this covers locals of
    /// nested blocks, which may be entered more than once or not at all.
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
    /// order, each call wrapped in an `rax`-only save/restore since the
    /// values being destructed never live in `rax` across the call.
    fn lower_end_block(&self, dest: &mut Listing, src: &Listing, instr: &Instr, part: crate::ir::entities::Part) {
        for v in src.part_vars(part).into_iter().rev() {
            let Some(dtor) = src.free_fn(v) else { continue };
            let size = src.var_size(v);
            let free_opt = src.free_opt(v);
            let dtor = dtor.clone();
            dest.push(Instr::loose(Opcode::Push, Operand::None, Operand::Register(RAX)));
            let arg = if free_opt.free_ptr {
                let scratch = crate::isa::x64::registers::R15_SCRATCH;
                dest.push(Instr::loose(
                    Opcode::Lea,
                    Operand::Register(scratch),
                    operand::var_operand(v, Offset::default(), size),
                ));
                Operand::Register(scratch)
            } else {
                operand::var_operand(v, Offset::default(), size)
            };
            dest.push(Instr::loose(Opcode::Mov, Operand::Register(INT_ARG[0]), arg));
            dest.push(Instr::loose(Opcode::Call, Operand::None, Operand::Reference(dtor)));
            dest.push(Instr::loose(Opcode::Pop, Operand::Register(RAX), Operand::None));
        }
        dest.push(instr.clone());
    }
}

/// Offset a `Variable`/`Relative` operand by `extra`, reusing its own kind
/// so a still-unresolved `Variable` stays unresolved for `resolve_vars` to
/// handle later; anything else (a register, a constant) has no further
/// chunks and is returned as-is.
fn offset_operand(op: &Operand, extra: Offset, size: crate::size::Size) -> Operand {
    match op {
        Operand::Variable { var, offset, .. } => Operand::Variable { var: *var, offset: *offset + extra, size },
        Operand::Relative { reg, offset, .. } => Operand::Relative { reg: *reg, offset: *offset + extra, size },
        other => other.clone(),
    }
}

fn width_of(size: crate::size::Size) -> Width {
    match size.size64() {
        1 => Width::Byte,
        4 => Width::Int,
        _ => Width::Long,
    }
}

impl<'a> Transform for RemoveInvalid<'a> {
    fn during(&mut self, dest: &mut Listing, src: &Listing, id: usize) {
        for label in src.labels(id) {
            dest.push_label(*label);
        }

        // Pool oversized constants first, then fall through to whatever
        // further lowering the (possibly rewritten) opcode needs -- a
        // pseudo-op like `fnParam` with a pooled operand still has to reach
        // its own handling below, not just be pushed verbatim.
        let mut rewritten = src.at(id).clone();
        if let Operand::Constant { value, size } = rewritten.dest() {
            if rewritten.dest().is_large_constant(true) {
                let pooled = self.pool_constant(dest, *value, *size);
                rewritten = rewritten.alter_dest(pooled);
            }
        }
        if let Operand::Constant { value, size } = rewritten.src() {
            if rewritten.src().is_large_constant(true) {
                let pooled = self.pool_constant(dest, *value, *size);
                rewritten = rewritten.alter_src(pooled);
            }
        }
        let instr = &rewritten;

        match instr.op() {
            Opcode::Lea => self.lower_lea(dest, id, instr),
            Opcode::Shl | Opcode::Shr | Opcode::Sar => self.lower_shift(dest, id, instr),
            Opcode::Mul | Opcode::IDiv | Opcode::UDiv | Opcode::IMod | Opcode::UMod => {
                self.lower_div_family(dest, id, instr)
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
            _ => self.lower_two_memory_operands(dest, id, instr),
        }
    }

    fn after(&mut self, dest: &mut Listing, _src: &Listing) {
        self.emit_dat_pool(dest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instr::Instr;
    use crate::isa::x64::registers::{EAX, EBX, RAX, RDI};
    use crate::isa::x64::X64Arena;
    use crate::regalloc::used_regs;
    use crate::size::s_int;

    #[test]
    fn oversized_constant_is_pooled() {
        let mut l = Listing::new();
        l.push(
            Instr::new(
                Opcode::Mov,
                Operand::Register(RAX),
                operand::long_const(0x1_0000_0002),
            )
            .unwrap(),
        );
        let arena = X64Arena::new();
        let used = used_regs::compute(&l, &arena);
        let mut pass = RemoveInvalid::new(&used);
        let out = crate::transform::transform(&l, &mut pass);
        let has_dat = (0..out.count()).any(|i| out.at(i).op() == Opcode::Dat);
        assert!(has_dat);
    }

    #[test]
    fn shift_by_register_routes_through_cl() {
        let mut l = Listing::new();
        l.push(Instr::new(Opcode::Shl, Operand::Register(EAX), Operand::Register(EBX)).unwrap());
        let arena = X64Arena::new();
        let used = used_regs::compute(&l, &arena);
        let mut pass = RemoveInvalid::new(&used);
        let out = crate::transform::transform(&l, &mut pass);
        let last = out.at(out.count() - 1);
        assert!(matches!(last.op(), Opcode::Shl));
        assert!(matches!(last.src(), Operand::Register(r) if r.same(CL)));
    }

    #[test]
    fn division_shuffles_through_rax_rdx() {
        let mut l = Listing::new();
        l.push(
            Instr::new(Opcode::IDiv, Operand::Register(EAX), Operand::Register(EBX)).unwrap(),
        );
        let arena = X64Arena::new();
        let used = used_regs::compute(&l, &arena);
        let mut pass = RemoveInvalid::new(&used);
        let out = crate::transform::transform(&l, &mut pass);
        let has_idiv = (0..out.count()).any(|i| out.at(i).op() == Opcode::IDiv);
        assert!(has_idiv);
        let _ = s_int();
    }

    #[test]
    fn single_integer_argument_call_assigns_rdi() {
        let mut l = Listing::new();
        l.push(Instr::loose(Opcode::FnParam, Operand::None, Operand::Register(EBX)).with_type_desc(
            TypeDesc::Primitive { kind: PrimitiveKind::Integer, size: s_int() },
            false,
        ));
        let target = crate::reference::RefSource::new("callee").add_ref();
        l.push(Instr::loose(Opcode::FnCall, Operand::None, Operand::Reference(target)));
        let arena = X64Arena::new();
        let used = used_regs::compute(&l, &arena);
        let mut pass = RemoveInvalid::new(&used);
        let out = crate::transform::transform(&l, &mut pass);
        let moves_into_rdi = (0..out.count()).any(|i| {
            matches!(out.at(i).op(), Opcode::Mov)
                && matches!(out.at(i).dest(), Operand::Register(r) if r.same(RDI))
        });
        assert!(moves_into_rdi);
        let has_call = (0..out.count()).any(|i| out.at(i).op() == Opcode::Call);
        assert!(has_call);
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
        let arena = X64Arena::new();
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

        let arena = X64Arena::new();
        let used = used_regs::compute(&l, &arena);
        let mut pass = RemoveInvalid::new(&used);
        let out = crate::transform::transform(&l, &mut pass);

        assert!((0..out.count()).any(|i| out.at(i).op() == Opcode::Call));
        let moves_into_rdi = (0..out.count()).any(|i| {
            matches!(out.at(i).op(), Opcode::Mov)
                && matches!(out.at(i).dest(), Operand::Register(r) if r.same(RDI))
        });
        assert!(moves_into_rdi);
        assert!((0..out.count()).any(|i| out.at(i).op() == Opcode::EndBlock));
    }

    #[test]
    fn begin_block_zero_initializes_destructor_bearing_locals() {
        use crate::ir::listing::FreeOpt;

        let mut l = Listing::new();
        let block = l.create_block(l.root());
        let dtor = crate::reference::RefSource::new("dtor").add_ref();
        let v = l.create_var(block, s_int(), Some(dtor), FreeOpt::ON_BLOCK_EXIT_PTR);
        l.push(Instr::loose(Opcode::BeginBlock, Operand::Part(block), Operand::None));
        let _ = v;

        let arena = X64Arena::new();
        let used = used_regs::compute(&l, &arena);
        let mut pass = RemoveInvalid::new(&used);
        let out = crate::transform::transform(&l, &mut pass);

        let zeroes_a_local = (0..out.count()).any(|i| {
            matches!(out.at(i).op(), Opcode::Mov)
                && matches!(out.at(i).dest(), Operand::Variable { .. })
                && matches!(out.at(i).src(), Operand::Constant { value: 0, .. })
        });
        assert!(zeroes_a_local);
    }
}
