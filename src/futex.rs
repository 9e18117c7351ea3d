//! Linux futex primitives for an optional OS-level wait, as an alternative
//! to [`crate::backoff::AdaptiveBackoff`]'s doubling sleep.
//!
//! Grounded on `ipc_futex.c`'s Linux branch (`SYS_futex` with `FUTEX_WAIT`/
//! `FUTEX_WAKE`); the macOS `__ulock_wait` branch is not ported — this crate
//! targets the same Linux-first posture as the rest of the pack.
//!
//! Grounded further on `examples/neerajchowdary889-DMXP-MPMC`'s
//! `Core/futex.rs` for the direct `libc::syscall(SYS_futex, ...)` call
//! shape (this pack's other example of the same primitive).
//!
//! This module is deliberately *not* wired into [`crate::channel::Channel`]:
//! a real cross-process wake needs the readiness word to live in the same
//! shared region every attached process maps, which would add a field to
//! the bit-exact header layout §6 of the spec defines and this crate
//! preserves untouched. What's here is the primitive a caller can build
//! that integration on top of — place a `AtomicU32` of their own in a
//! region they control, `wake_one`/`wake_all` it after a successful
//! [`crate::ring::RingBuffer::write`], and `wait` on it in place of a
//! sleep. The readiness word is always a hint: correctness still comes from
//! `seq == head`, never from whether a wake was observed.

use std::sync::atomic::AtomicU32;
use std::time::Duration;

/// Outcome of [`futex_wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// The word no longer held `expected` when the kernel checked, or a
    /// wake arrived. The caller should re-check its condition either way —
    /// this is a hint, not a guarantee that the condition it's waiting for
    /// is now true.
    Woken,
    /// `timeout` elapsed with no wake.
    TimedOut,
}

/// Blocks the calling thread until `addr` no longer holds `expected`, a
/// waker calls [`futex_wake_one`]/[`futex_wake_all`] on the same address,
/// or `timeout` elapses.
///
/// A signal interruption is treated as a spurious wake (returns
/// [`WaitResult::Woken`]) rather than propagated, matching the C original's
/// `EINTR` handling in its read loop.
pub fn futex_wait(addr: &AtomicU32, expected: u32, timeout: Duration) -> WaitResult {
    let ts = libc::timespec {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as libc::c_long,
    };
    loop {
        let rc = unsafe {
            libc::syscall(
                libc::SYS_futex,
                addr as *const AtomicU32 as *const u32,
                libc::FUTEX_WAIT,
                expected,
                &ts as *const libc::timespec,
            )
        };
        if rc == 0 {
            return WaitResult::Woken;
        }
        match std::io::Error::last_os_error().raw_os_error() {
            Some(libc::EAGAIN) => return WaitResult::Woken,
            Some(libc::EINTR) => continue,
            Some(libc::ETIMEDOUT) => return WaitResult::TimedOut,
            _ => return WaitResult::Woken,
        }
    }
}

/// Wakes at most one thread blocked in [`futex_wait`] on `addr`.
pub fn futex_wake_one(addr: &AtomicU32) {
    unsafe {
        libc::syscall(libc::SYS_futex, addr as *const AtomicU32 as *const u32, libc::FUTEX_WAKE, 1i32);
    }
}

/// Wakes every thread blocked in [`futex_wait`] on `addr`.
pub fn futex_wake_all(addr: &AtomicU32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            addr as *const AtomicU32 as *const u32,
            libc::FUTEX_WAKE,
            i32::MAX,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_times_out_when_never_woken() {
        let word = AtomicU32::new(0);
        let result = futex_wait(&word, 0, Duration::from_millis(5));
        assert_eq!(result, WaitResult::TimedOut);
    }

    #[test]
    fn test_wait_returns_immediately_when_value_already_changed() {
        let word = AtomicU32::new(1);
        let result = futex_wait(&word, 0, Duration::from_secs(5));
        assert_eq!(result, WaitResult::Woken);
    }

    #[test]
    fn test_wake_one_unblocks_a_waiter() {
        let word = Arc::new(AtomicU32::new(0));
        let waiter_word = Arc::clone(&word);
        let waiter = thread::spawn(move || futex_wait(&waiter_word, 0, Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        word.store(1, Ordering::SeqCst);
        futex_wake_one(&word);
        assert_eq!(waiter.join().unwrap(), WaitResult::Woken);
    }
}
