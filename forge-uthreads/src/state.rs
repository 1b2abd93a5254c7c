//! Per-OS-thread scheduler state: a ready queue plus the currently running
//! thread's context.
//!
//! One instance per OS thread, reached through thread-local storage rather
//! than passed explicitly, so that `UThread::leave()` can be called from
//! anywhere without threading a scheduler handle through every call site.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::data::UThreadData;

/// The ready queue and waiting set for one OS thread. Mutated under `lock`
/// from any OS thread (another thread may `insert` a woken-up UThread
/// here), but `running` is only ever touched by the OS thread that owns
/// this state.
pub struct UThreadState {
    ready: Mutex<VecDeque<Arc<UThreadData>>>,
    running: RefCell<Option<Arc<UThreadData>>>,
}

thread_local! {
    static STATE: UThreadState = UThreadState::new();
}

impl UThreadState {
    fn new() -> Self {
        UThreadState {
            ready: Mutex::new(VecDeque::new()),
            running: RefCell::new(None),
        }
    }

    pub fn with_current<R>(f: impl FnOnce(&UThreadState) -> R) -> R {
        STATE.with(|s| f(s))
    }

    /// Add a thread to this OS thread's ready queue. Safe to call from any
    /// OS thread.
    pub fn insert(&self, data: Arc<UThreadData>) {
        self.ready.lock().push_back(data);
    }

    /// Any threads ready to run (not counting the currently running one)?
    pub fn any(&self) -> bool {
        !self.ready.lock().is_empty()
    }

    pub fn running(&self) -> Option<Arc<UThreadData>> {
        self.running.borrow().clone()
    }

    /// The currently running thread, bootstrapping one out of the calling
    /// OS thread's own stack the first time this is called on it.
    pub fn running_or_bootstrap(&self) -> Arc<UThreadData> {
        if let Some(r) = self.running() {
            return r;
        }
        let first = UThreadData::bootstrap();
        self.set_running(Some(first.clone()));
        first
    }

    pub fn set_running(&self, data: Option<Arc<UThreadData>>) {
        *self.running.borrow_mut() = data;
    }

    /// Pop the next ready thread, if any.
    pub fn pop_ready(&self) -> Option<Arc<UThreadData>> {
        self.ready.lock().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::UThreadData;

    extern "C" fn noop(_: usize) -> ! {
        loop {
            std::hint::spin_loop();
        }
    }

    #[test]
    fn inserted_thread_is_ready() {
        UThreadState::with_current(|s| {
            assert!(!s.any());
            s.insert(UThreadData::spawn(noop, 0));
            assert!(s.any());
            assert!(s.pop_ready().is_some());
            assert!(!s.any());
        });
    }
}
