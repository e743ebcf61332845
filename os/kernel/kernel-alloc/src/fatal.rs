//! # Fatal Error Policy
//!
//! Nothing the memory core reports can be recovered from: running out of
//! frames at boot, mapping over a live page or freeing a block twice all
//! leave the kernel with a broken assumption. The kernel-facing
//! [`MemoryManager`](crate::MemoryManager) therefore turns every error into a
//! halt: the diagnostic goes to the log, then the kernel panics and its panic
//! handler stops the CPU.
//!
//! The components themselves return `Result`, which keeps them testable on
//! the host.

use core::fmt;

/// Log `reason` and halt.
#[cold]
#[track_caller]
pub fn halt(reason: &dyn fmt::Display) -> ! {
    log::error!("fatal memory error: {reason}");
    panic!("{reason}")
}

/// Unwrap a memory-core result or halt with its error.
pub trait OrHalt<T> {
    fn or_halt(self) -> T;
}

impl<T, E: fmt::Display> OrHalt<T> for Result<T, E> {
    #[inline]
    #[track_caller]
    fn or_halt(self) -> T {
        match self {
            Ok(v) => v,
            Err(e) => halt(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryError;

    #[test]
    fn ok_passes_through() {
        let r: Result<u32, MemoryError> = Ok(7);
        assert_eq!(r.or_halt(), 7);
    }

    #[test]
    #[should_panic(expected = "out of memory: no run of 3 free frames")]
    fn error_halts_with_its_message() {
        let r: Result<(), MemoryError> = Err(MemoryError::OutOfMemory { frames: 3 });
        r.or_halt();
    }
}
