//! A small M:N cooperative thread scheduler: many user-level threads
//! multiplexed onto one OS thread, switching between them with an explicit
//! `leave()` call rather than a timer interrupt.

mod context;
mod data;
mod future;
mod stack;
mod state;
mod sync;
mod thread;

pub use data::ThreadFn;
pub use future::Future;
pub use stack::STACK_SIZE;
pub use sync::{Lock, LockGuard, Sema};
pub use thread::UThread;
