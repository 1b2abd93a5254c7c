//! Register-level context switch between two user-level thread stacks.
//!
//! Only the callee-saved registers and the stack pointer need to survive a
//! switch, since everything else is the caller's responsibility under the
//! platform's calling convention. This crate hand-codes that register set
//! directly because it runs on the host toolchain, not through a generated
//! code path.

use std::arch::asm;

/// Saved callee-saved register state for one suspended thread, plus its
/// stack pointer. Laid out to match the push order `switch_to` writes.
#[repr(C)]
pub struct Context {
    pub rsp: u64,
}

/// Write the initial context a brand new stack needs so that the first
/// `switch_to` into it jumps straight to `entry`, which receives `arg` in
/// its first argument register per the System V convention.
///
/// # Safety
/// `stack_high` must point one-past-the-end of a stack allocation at least
/// large enough for the pushed frame, 16-byte aligned per the ABI's call
/// boundary requirement.
pub unsafe fn init_context(stack_high: *mut u8, entry: extern "C" fn(usize) -> !, arg: usize) -> Context {
    // Stack grows down from `stack_high`; build it bottom-up (lowest address
    // first) so that `switch_to`'s five pops consume the five dummy
    // callee-saved slots, its `ret` lands on `trampoline`, and `trampoline`'s
    // own two pops then find `entry`/`arg` still sitting above it.
    let mut sp = stack_high as *mut u64;
    sp = sp.sub(1);
    *sp = arg as u64;
    sp = sp.sub(1);
    *sp = entry as usize as u64;
    sp = sp.sub(1);
    *sp = trampoline as usize as u64;
    for _ in 0..5 {
        sp = sp.sub(1);
        *sp = 0;
    }

    Context { rsp: sp as u64 }
}

/// First code to run on a freshly spawned thread's stack: pulls `entry` and
/// `arg` back off the stack (pushed there by `init_context`) and calls into
/// the real body.
#[unsafe(naked)]
#[cfg(target_arch = "x86_64")]
unsafe extern "C" fn trampoline() -> ! {
    std::arch::naked_asm!(
        "pop rax",
        "pop rdi",
        "call rax",
        "ud2",
    )
}

/// Save the callee-saved registers and stack pointer of the currently
/// running thread into `*from`, restore them from `*to`, and resume
/// execution there. Returns once some other thread switches back into
/// `from`.
///
/// # Safety
/// Both `from` and `to` must point to live `Context`s; `to` must have been
/// initialized by [`init_context`] or by a previous `switch_to` that saved
/// into it.
#[cfg(target_arch = "x86_64")]
pub unsafe fn switch_to(from: *mut Context, to: *const Context) {
    asm!(
        "push rbx",
        "push rbp",
        "push r12",
        "push r13",
        "push r14",
        "mov [{from}], rsp",
        "mov rsp, [{to}]",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbp",
        "pop rbx",
        "ret",
        from = in(reg) from,
        to = in(reg) to,
    );
}

#[cfg(not(target_arch = "x86_64"))]
pub unsafe fn switch_to(_from: *mut Context, _to: *const Context) {
    compile_error!("forge-uthreads's context switch is only implemented for x86_64");
}
