//! Debug assertion macros for the shared ring buffer's busy-tag/seq protocol.
//!
//! These checks are only active in debug builds (`#[cfg(debug_assertions)]`),
//! so there is zero overhead in release builds. They exist to catch protocol
//! bugs during development, not to police a hostile or corrupted peer at
//! runtime — a process sharing memory with us can violate every one of these
//! without tripping a release build.

/// Assert that a cursor never moves backward (using wrapping comparison, so
/// this still holds across the 64-bit wrap that would take centuries at
/// realistic throughput).
macro_rules! debug_assert_cursor_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new.wrapping_sub($old) < (1u64 << 63),
            "{} moved backward: {} -> {}",
            $name,
            $old,
            $new
        )
    };
}

/// Assert that the number of bytes in flight never exceeds the data area.
macro_rules! debug_assert_fill_bounded {
    ($filled:expr, $capacity:expr) => {
        debug_assert!(
            $filled <= $capacity,
            "fill level {} exceeds data area capacity {}",
            $filled,
            $capacity
        )
    };
}

/// Assert that an `entry_size` is 8-byte aligned, matching `IPC_DATA_ALIGN`.
macro_rules! debug_assert_entry_aligned {
    ($entry_size:expr) => {
        debug_assert!(
            $entry_size % 8 == 0,
            "entry_size {} is not 8-byte aligned",
            $entry_size
        )
    };
}

/// Assert that a freshly committed entry's `seq` equals the offset at which
/// its header was written — the sole "this slot is fully published" marker.
macro_rules! debug_assert_seq_matches_offset {
    ($seq:expr, $offset:expr) => {
        debug_assert!(
            $seq == $offset,
            "seq {} does not match the offset {} it was committed at",
            $seq,
            $offset
        )
    };
}

/// Assert that a cursor CAS we expected to be uncontested (we hold the busy
/// tag) in fact succeeded. Failure here means another actor mutated a cursor
/// we believed only we could touch — a protocol violation, not ordinary
/// contention.
macro_rules! debug_assert_cas_uncontested {
    ($what:literal, $succeeded:expr) => {
        debug_assert!($succeeded, "expected uncontested CAS on {} to succeed", $what)
    };
}

pub(crate) use debug_assert_cas_uncontested;
pub(crate) use debug_assert_cursor_monotonic;
pub(crate) use debug_assert_entry_aligned;
pub(crate) use debug_assert_fill_bounded;
pub(crate) use debug_assert_seq_matches_offset;
