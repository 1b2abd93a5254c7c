//! Base trait for target-independent and per-backend lowering passes.
//!
//! A transform walks a source listing line by line, producing a fresh
//! destination listing. Passes never mutate their input in place; each one
//! consumes a `Listing` and returns a new one.

use crate::ir::listing::Listing;

/// A pass over a `Listing` that produces a new, lowered `Listing`.
pub trait Transform {
    /// Called once before the first instruction is visited. Default: no-op.
    fn before(&mut self, _dest: &mut Listing, _src: &Listing) {}

    /// Called once per instruction of `src`, in order. Implementations
    /// append zero or more instructions to `dest`.
    fn during(&mut self, dest: &mut Listing, src: &Listing, id: usize);

    /// Called once after the last instruction has been visited. Default:
    /// no-op.
    fn after(&mut self, _dest: &mut Listing, _src: &Listing) {}
}

/// Run `use_` over `src`, producing a new listing.
pub fn transform(src: &Listing, use_: &mut dyn Transform) -> Listing {
    let mut dest = src.fork();
    use_.before(&mut dest, src);
    for id in 0..src.count() {
        use_.during(&mut dest, src, id);
    }
    use_.after(&mut dest, src);
    dest
}
