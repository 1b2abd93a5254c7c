//! Target dispatch: the `Arena` interface and its x86/x86-64 backends.
//!
//! An `Arena` owns the per-target transform chain (used-regs -> layout ->
//! invalid lowering -> frame lowering) and the encoder, and knows which
//! registers its calling convention treats as caller-saved.

pub mod call_conv;
pub mod x64;
pub mod x86;

use crate::ir::listing::Listing;
use crate::output::{CodeOutput, LabelOutput, Output};
use crate::regalloc::register_set::RegSet;
use crate::result::CodegenResult;

pub use call_conv::CallConv;

/// A target backend. Each concrete arena wires together the transform
/// passes and encoder for one ISA.
pub trait Arena {
    /// Run this target's full lowering chain (used-regs is computed
    /// on-demand by the passes that need it, not threaded through here),
    /// producing a listing containing only instructions the encoder can
    /// emit directly.
    fn transform(&self, listing: &Listing) -> CodegenResult<Listing>;

    /// Measure `listing` (already lowered) and emit machine code plus
    /// label offsets, relocations and GC pointer markers into `output`.
    fn output(&self, listing: &Listing, output: &mut Output) -> CodegenResult<()>;

    fn label_output(&self) -> LabelOutput {
        LabelOutput::new()
    }

    fn code_output(&self, size: usize, reloc_count: usize) -> CodeOutput {
        CodeOutput::new(size, reloc_count)
    }

    /// Clear every register this ABI defines as caller-saved from `live`,
    /// used by the used-register dataflow at `call`/`fnCall` boundaries.
    fn remove_fn_regs(&self, live: &mut RegSet);

    fn call_conv(&self) -> CallConv;

    /// Is this a 64-bit target? Selects which half of `Size`/`Offset`
    /// pairs to read throughout layout and encoding.
    fn is_64bit(&self) -> bool;
}
