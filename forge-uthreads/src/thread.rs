//! The public `UThread` handle and the cooperative scheduling entry points.
//!
//! `spawn` creates a new thread and returns immediately without preempting
//! the caller; `leave` voluntarily hands control to another ready thread,
//! returning once it is rescheduled.

use std::sync::Arc;
use std::time::Duration;

use crate::context::{switch_to, Context};
use crate::data::{ThreadFn, UThreadData};
use crate::state::UThreadState;

/// A handle to a user-level thread. Cheap to clone; clones refer to the
/// same underlying thread.
#[derive(Clone)]
pub struct UThread {
    data: Arc<UThreadData>,
}

impl UThread {
    /// Spawn `entry(arg)` as a new user-level thread on the calling OS
    /// thread's scheduler. Returns as soon as the thread is queued; it does
    /// not run until some thread calls [`UThread::leave`].
    pub fn spawn(entry: ThreadFn, arg: usize) -> UThread {
        let data = UThreadData::spawn(entry, arg);
        log::debug!("uthread: spawned new thread");
        UThreadState::with_current(|s| s.insert(data.clone()));
        UThread { data }
    }

    /// Yield to another ready user-level thread. Returns `true` if control
    /// actually left the caller (some other thread ran in between).
    pub fn leave() -> bool {
        UThreadState::with_current(|s| {
            let Some(next) = s.pop_ready() else {
                return false;
            };
            let current = s.running_or_bootstrap();
            s.insert(current.clone());
            switch(&current, &next, s);
            true
        })
    }

    /// Block the calling OS thread (not just this user-level thread) for
    /// approximately `ms` milliseconds, running other ready threads in the
    /// meantime.
    ///
    /// A cooperative scheduler cannot preempt a sleeping thread back in
    /// early, so this simply spins `leave()` until the deadline passes;
    /// real deployments with many threads per OS thread would instead park
    /// the thread on a timer wheel, but no such facility exists without an
    /// event loop to drive it.
    pub fn sleep(ms: u64) {
        let deadline = std::time::Instant::now() + Duration::from_millis(ms);
        while std::time::Instant::now() < deadline {
            if !UThread::leave() {
                std::thread::yield_now();
            }
        }
    }

    /// Any more threads ready to run on this OS thread?
    pub fn any() -> bool {
        UThreadState::with_current(|s| s.any())
    }

    pub fn current() -> UThread {
        UThreadState::with_current(|s| UThread {
            data: s.running_or_bootstrap(),
        })
    }
}

/// Perform the actual stack switch, updating the scheduler's notion of
/// which thread is running before and after.
fn switch(from: &Arc<UThreadData>, to: &Arc<UThreadData>, state: &UThreadState) {
    state.set_running(Some(to.clone()));
    let from_ctx: *mut Context = from.context.get();
    let to_ctx: *const Context = to.context.get();
    unsafe {
        switch_to(from_ctx, to_ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn any_is_false_with_nothing_queued() {
        assert!(!UThread::any());
    }

    static RAN_WITH: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn record_and_loop(arg: usize) -> ! {
        RAN_WITH.store(arg, Ordering::SeqCst);
        loop {
            UThread::leave();
        }
    }

    /// Exercises a real `switch_to` into a freshly spawned thread: if the
    /// stack `init_context` built is laid out wrong, this either segfaults
    /// or jumps somewhere nonsensical instead of running `record_and_loop`.
    #[test]
    fn leave_actually_switches_into_a_spawned_thread() {
        UThread::spawn(record_and_loop, 42);
        assert!(UThread::leave());
        assert_eq!(RAN_WITH.load(Ordering::SeqCst), 42);
    }
}
