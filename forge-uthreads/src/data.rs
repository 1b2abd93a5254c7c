//! Per-thread bookkeeping: stack, saved context and intrusive queue link.
//!
//! `Arc<UThreadData>` gives the "outlives every queue and handle that
//! points at it" property for free, so every reference to a thread is
//! simply a clone of its `Arc` rather than hand-rolled atomic refcounting.

use std::sync::Arc;

use crate::context::Context;
use crate::stack::UThreadStack;

/// Entry point signature for a spawned thread's body. Takes an opaque
/// pointer to whatever parameters the caller packed for it.
pub type ThreadFn = extern "C" fn(usize) -> !;

pub struct UThreadData {
    pub(crate) stack: UThreadStack,
    pub(crate) context: std::cell::UnsafeCell<Context>,
    /// Intrusive next-pointer for whichever queue currently owns this
    /// thread (ready, waiting, or none). Guarded by the owning
    /// `UThreadState`'s lock.
    pub(crate) next: std::cell::Cell<Option<Arc<UThreadData>>>,
}

unsafe impl Sync for UThreadData {}

impl UThreadData {
    pub fn spawn(entry: ThreadFn, arg: usize) -> Arc<Self> {
        let stack = UThreadStack::allocate(crate::stack::STACK_SIZE).expect("failed to allocate uthread stack");
        let context = unsafe { crate::context::init_context(stack.high, entry, arg) };
        Arc::new(UThreadData {
            stack,
            context: std::cell::UnsafeCell::new(context),
            next: std::cell::Cell::new(None),
        })
    }

    /// Wrap the calling OS thread's own stack as a `UThreadData` so the
    /// scheduler has somewhere to save its context the first time it
    /// switches away.
    pub fn bootstrap() -> Arc<Self> {
        Arc::new(UThreadData {
            stack: UThreadStack::native(),
            context: std::cell::UnsafeCell::new(Context { rsp: 0 }),
            next: std::cell::Cell::new(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn noop(_: usize) -> ! {
        loop {
            std::hint::spin_loop();
        }
    }

    #[test]
    fn spawn_produces_a_uniquely_owned_thread() {
        let data = UThreadData::spawn(noop, 0);
        assert_eq!(Arc::strong_count(&data), 1);
    }
}
