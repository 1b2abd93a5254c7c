//! Synchronization primitives aware of the cooperative scheduler.
//!
//! Unlike a standard OS mutex, blocking here means removing the calling
//! user-level thread from the ready queue and switching to another one,
//! rather than parking the whole OS thread (which would starve every other
//! user-level thread sharing it).

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::data::UThreadData;
use crate::state::UThreadState;
use crate::thread::UThread;

/// A counting semaphore. `down` blocks the calling user-level thread
/// (not the OS thread) until the count is positive.
pub struct Sema {
    count: Mutex<isize>,
    waiting: Mutex<VecDeque<Arc<UThreadData>>>,
}

impl Sema {
    pub fn new(initial: isize) -> Self {
        Sema {
            count: Mutex::new(initial),
            waiting: Mutex::new(VecDeque::new()),
        }
    }

    /// Count up, waking one waiting thread if any.
    pub fn up(&self) {
        let mut count = self.count.lock();
        *count += 1;
        drop(count);
        if let Some(woken) = self.waiting.lock().pop_front() {
            UThreadState::with_current(|s| s.insert(woken));
        }
    }

    /// Count down, blocking until the count is above zero.
    pub fn down(&self) {
        loop {
            {
                let mut count = self.count.lock();
                if *count > 0 {
                    *count -= 1;
                    return;
                }
            }
            let current = UThreadState::with_current(|s| s.running_or_bootstrap());
            self.waiting.lock().push_back(current);
            // The thread that pushed us here is not in the ready queue
            // anymore; yield to whatever else is runnable. A spurious
            // wakeup just re-checks the count and blocks again.
            if !UThread::leave() {
                std::thread::yield_now();
            }
        }
    }
}

impl Default for Sema {
    fn default() -> Self {
        Self::new(1)
    }
}

/// A mutual-exclusion lock built on a binary [`Sema`]. `guard()` returns an
/// RAII guard that releases the lock on drop.
pub struct Lock {
    sema: Sema,
}

impl Lock {
    pub fn new() -> Self {
        Lock { sema: Sema::new(1) }
    }

    pub fn guard(&self) -> LockGuard<'_> {
        self.sema.down();
        LockGuard { lock: self }
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LockGuard<'a> {
    lock: &'a Lock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.sema.up();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sema_down_after_up_does_not_block() {
        let s = Sema::new(0);
        s.up();
        s.down();
    }

    #[test]
    fn lock_guard_releases_on_drop() {
        let lock = Lock::new();
        {
            let _g = lock.guard();
        }
        let _g2 = lock.guard();
    }
}
