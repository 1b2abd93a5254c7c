//! A target-independent intermediate representation and x86 code
//! generation backend: IR construction, used-register dataflow, invalid-
//! instruction lowering, calling-convention materialization, stack frame
//! layout, DWARF unwind metadata, and byte-level encoding for both x86-32
//! (cdecl) and x86-64 (System V).
//!
//! Built around entity-indexed IR data structures, a pluggable backend
//! trait ([`isa::Arena`]), and a measure-then-emit two-pass encoder
//! ([`output::Output`]).

pub mod ir {
    pub mod entities;
    pub mod instr;
    pub mod listing;
    pub mod operand;
}

pub mod isa;
pub mod layout;
pub mod output;
pub mod reference;
pub mod reg;
pub mod regalloc {
    pub mod register_set;
    pub mod used_regs;
}
pub mod result;
pub mod size;
pub mod transform;
pub mod typedesc;

pub use ir::listing::Listing;
pub use isa::Arena;
pub use result::{CodegenError, CodegenResult};
