//! Backwards used-register dataflow: a single backwards sweep over a
//! listing producing, for each instruction, the set of registers live
//! immediately after it. Invalid-instruction lowering queries this to pick
//! scratch registers that are provably free at a given program point.

use crate::ir::instr::{DestMode, Opcode};
use crate::ir::listing::Listing;
use crate::ir::operand::Operand;
use crate::isa::Arena;
use crate::reg::PTR_A;
use crate::regalloc::register_set::RegSet;

/// Per-instruction live-out register sets for one listing, plus the union
/// over every instruction (`all_used_regs` in the data model).
pub struct UsedRegs {
    per_line: Vec<RegSet>,
    all: RegSet,
}

impl UsedRegs {
    pub fn at(&self, line: usize) -> &RegSet {
        &self.per_line[line]
    }

    pub fn all(&self) -> &RegSet {
        &self.all
    }
}

/// Run the dataflow over `listing`, using `arena` to determine which
/// registers a call instruction clobbers under the target ABI.
pub fn compute(listing: &Listing, arena: &dyn Arena) -> UsedRegs {
    let n = listing.count();
    let mut per_line = vec![RegSet::new(); n];
    let mut all = RegSet::new();
    let mut live = RegSet::new();

    for i in (0..n).rev() {
        let instr = listing.at(i);
        match instr.op() {
            Opcode::Jmp | Opcode::EndBlock | Opcode::JmpBlock | Opcode::Prolog => {
                live.clear();
            }
            Opcode::BeginBlock => {
                live.remove(PTR_A);
            }
            Opcode::Call | Opcode::FnCall | Opcode::FnCallRef => {
                arena.remove_fn_regs(&mut live);
            }
            Opcode::BXor if regs_equal(instr.dest(), instr.src()) => {
                if let Some(r) = instr.dest().reg() {
                    live.remove(r);
                }
            }
            _ => {
                add_indirect_base(&mut live, instr.dest());
                add_indirect_base(&mut live, instr.src());
                if let Operand::Register(r) = instr.src() {
                    live.put(*r);
                }

                match instr.mode() {
                    DestMode::Write => {
                        if let Operand::Register(r) = instr.dest() {
                            live.remove(*r);
                        }
                    }
                    DestMode::Read | DestMode::ReadWrite => {
                        if let Operand::Register(r) = instr.dest() {
                            live.put(*r);
                        }
                    }
                    DestMode::None => {}
                }
            }
        }

        per_line[i] = live;
        for r in live.iter() {
            all.put(r);
        }
    }

    UsedRegs { per_line, all }
}

fn regs_equal(a: &Operand, b: &Operand) -> bool {
    match (a.reg(), b.reg()) {
        (Some(ra), Some(rb)) => ra.same(rb),
        _ => false,
    }
}

/// Indirect bases (`Relative(reg, off)`) are always a *read*, in both
/// operand positions, regardless of the instruction's `DestMode`.
fn add_indirect_base(live: &mut RegSet, op: &Operand) {
    if let Operand::Relative { reg, .. } = op {
        live.put(*reg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instr::Instr;
    use crate::ir::listing::Listing;
    use crate::isa::x64::X64Arena;
    use crate::reg::{EAX, EBX};

    #[test]
    fn bxor_self_clears_register() {
        let mut l = Listing::new();
        l.push(Instr::new(Opcode::BXor, Operand::Register(EAX), Operand::Register(EAX)).unwrap());
        l.push(Instr::new(Opcode::Add, Operand::Register(EBX), Operand::Register(EAX)).unwrap());
        let arena = X64Arena::new();
        let used = compute(&l, &arena);
        assert!(!used.at(0).has(EAX));
    }

    #[test]
    fn used_subset_of_all() {
        let mut l = Listing::new();
        l.push(Instr::new(Opcode::Add, Operand::Register(EAX), Operand::Register(EBX)).unwrap());
        let arena = X64Arena::new();
        let used = compute(&l, &arena);
        for r in used.at(0).iter() {
            assert!(used.all().has(r));
        }
    }
}
