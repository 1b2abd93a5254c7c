//! A single-shot result slot for handing a value (or an error) from one
//! user-level thread back to whichever thread is waiting on it.
//!
//! The slot and the wakeup semaphore are owned by the `Future` itself, and
//! the payload is a plain `Result<T, E>` rather than a raw exception
//! pointer.

use std::sync::Mutex;

use crate::sync::Sema;

enum Slot<T, E> {
    Empty,
    Value(T),
    Error(E),
}

/// A one-shot channel between the thread that produces a result and the
/// thread that consumes it. `post`/`post_error` may only be called once;
/// `result` may be called any number of times once a value has arrived.
pub struct Future<T, E = String> {
    slot: Mutex<Slot<T, E>>,
    ready: Sema,
}

impl<T, E> Future<T, E> {
    pub fn new() -> Self {
        Future {
            slot: Mutex::new(Slot::Empty),
            ready: Sema::new(0),
        }
    }

    /// Post a successful result. Wakes exactly one waiter per call to
    /// `result`, since `down` is immediately paired with an `up` so the
    /// slot can be read more than once.
    pub fn post(&self, value: T) {
        *self.slot.lock().unwrap() = Slot::Value(value);
        self.ready.up();
    }

    /// Post an error in place of a result.
    pub fn post_error(&self, error: E) {
        *self.slot.lock().unwrap() = Slot::Error(error);
        self.ready.up();
    }

    /// Block the calling user-level thread until a result or error has been
    /// posted, then return it. Consumes the future's own wakeup and
    /// immediately restores it so a second call also succeeds.
    pub fn result(&self) -> Result<T, E>
    where
        T: Clone,
        E: Clone,
    {
        self.ready.down();
        self.ready.up();
        match &*self.slot.lock().unwrap() {
            Slot::Empty => unreachable!("ready semaphore signaled before a result was posted"),
            Slot::Value(v) => Ok(v.clone()),
            Slot::Error(e) => Err(e.clone()),
        }
    }

    /// Has a value or error been posted yet, without blocking?
    pub fn any_posted(&self) -> bool {
        !matches!(*self.slot.lock().unwrap(), Slot::Empty)
    }
}

impl<T, E> Default for Future<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_returns_posted_value() {
        let f: Future<u32> = Future::new();
        assert!(!f.any_posted());
        f.post(42);
        assert!(f.any_posted());
        assert_eq!(f.result().unwrap(), 42);
        // Readable more than once.
        assert_eq!(f.result().unwrap(), 42);
    }

    #[test]
    fn result_propagates_posted_error() {
        let f: Future<u32, String> = Future::new();
        f.post_error("boom".to_string());
        assert_eq!(f.result().unwrap_err(), "boom");
    }
}
