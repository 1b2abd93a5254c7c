//! Calling convention identifiers, one per target this crate implements.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallConv {
    /// x86-64 System V: integer args in `rdi, rsi, rdx, rcx, r8, r9`, float
    /// args in `xmm0..xmm7`, caller cleans the stack.
    SystemV,
    /// x86-32 cdecl: all arguments on the stack, right to left, caller
    /// cleans the stack.
    Cdecl,
}
