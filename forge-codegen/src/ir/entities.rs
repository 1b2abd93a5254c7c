//! Densely-numbered handles into a `Listing`: `Variable`, `Part` and
//! `ParamIdx`, each a thin wrapper generated by `cranelift_entity`'s
//! `entity_impl!` macro.

use cranelift_entity::entity_impl;

/// A local variable or temporary. Indices are assigned in creation order by
/// `Listing::create_var`/`create_param`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Variable(u32);
entity_impl!(Variable, "var");

/// A scope within a `Listing`. A `Block` is a `Part` that may be entered and
/// exited with matching `begin_block`/`end_block` and own variables with
/// destructors; plain `Part`s (produced e.g. by the calling-convention
/// materializer for a temporary complex-argument scope) are always nested
/// inside some `Block`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Part(u32);
entity_impl!(Part, "part");

impl Part {
    /// The outermost part of a listing always has this id and has no
    /// parent.
    pub const ROOT: Part = Part(0);
}
