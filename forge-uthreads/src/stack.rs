//! Stack allocation for a user-level thread: a fixed-size region with a
//! guard page below it so a stack overflow faults instead of corrupting
//! whatever memory happens to sit below.
//!
//! A 400 KiB stack plus one guard page, allocated with the platform's raw
//! mapping call rather than the global allocator since the region must be
//! independently unmapped and must not move.

use std::ptr;

/// Default stack size for a spawned user-level thread.
pub const STACK_SIZE: usize = 400 * 1024;

/// An owned, guarded stack region. `high` is the address execution should
/// start at (stacks grow down on every target this crate supports);
/// `low` is the first byte below the usable region (the guard page).
pub struct UThreadStack {
    base: *mut u8,
    mapped_len: usize,
    pub high: *mut u8,
    pub low: *mut u8,
}

unsafe impl Send for UThreadStack {}

impl UThreadStack {
    pub fn allocate(size: usize) -> std::io::Result<Self> {
        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                unix::allocate(size)
            } else {
                compile_error!("forge-uthreads currently supports unix targets only");
            }
        }
    }

    /// A placeholder standing in for the stack the OS already gave the
    /// calling thread, used to let that thread's execution context be
    /// represented as a `UThreadData` the scheduler can switch away from.
    /// Its `high`/`low` are meaningless and `Drop` does nothing.
    pub fn native() -> Self {
        UThreadStack {
            base: ptr::null_mut(),
            mapped_len: 0,
            high: ptr::null_mut(),
            low: ptr::null_mut(),
        }
    }
}

impl Drop for UThreadStack {
    fn drop(&mut self) {
        if self.base.is_null() {
            return;
        }
        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                unix::deallocate(self.base, self.mapped_len);
            }
        }
    }
}

#[cfg(unix)]
mod unix {
    use super::UThreadStack;
    use std::io;

    fn page_size() -> usize {
        unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
    }

    pub fn allocate(size: usize) -> io::Result<UThreadStack> {
        let page = page_size();
        let usable = (size + page - 1) / page * page;
        let mapped_len = usable + page;

        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mapped_len,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let base = base as *mut u8;

        let usable_start = unsafe { base.add(page) };
        let rc = unsafe {
            libc::mprotect(
                usable_start as *mut libc::c_void,
                usable,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        if rc != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::munmap(base as *mut libc::c_void, mapped_len);
            }
            return Err(err);
        }

        Ok(UThreadStack {
            base,
            mapped_len,
            high: unsafe { usable_start.add(usable) },
            low: usable_start,
        })
    }

    pub fn deallocate(base: *mut u8, mapped_len: usize) {
        unsafe {
            libc::munmap(base as *mut libc::c_void, mapped_len);
        }
    }

    use std::ptr;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_stack_is_writable_near_the_top() {
        let stack = UThreadStack::allocate(STACK_SIZE).unwrap();
        unsafe {
            let probe = stack.high.sub(8);
            ptr::write(probe as *mut u64, 0x1234);
            assert_eq!(ptr::read(probe as *const u64), 0x1234);
        }
    }

    #[test]
    fn high_is_above_low_by_the_requested_size() {
        let stack = UThreadStack::allocate(STACK_SIZE).unwrap();
        let len = stack.high as usize - stack.low as usize;
        assert!(len >= STACK_SIZE);
    }
}
