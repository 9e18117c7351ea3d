use thiserror::Error;

/// Hard failures from the ring buffer layer.
///
/// These always propagate to the caller — the buffer layer never sleeps
/// and never swallows an error, including the retryable ones folded into
/// [`PeekOutcome`](crate::ring::PeekOutcome)/[`ReadOutcome`](crate::ring::ReadOutcome)/
/// [`SkipOutcome`](crate::ring::SkipOutcome) instead of this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    /// A pointer/length/offset argument failed validation.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Which precondition failed.
        reason: InvalidArgumentReason,
    },
    /// `roundUp(header + payload, 8)` exceeds the data area, for any fill level.
    #[error("entry too large: requires {required} bytes, buffer holds {buffer_size}")]
    EntryTooLarge {
        /// Bytes the entry would occupy including its header.
        required: u64,
        /// Total data-area capacity.
        buffer_size: u64,
    },
    /// There is not enough *contiguous* free space for the entry right now.
    #[error("no space: offset {offset}, required {required}, free {free}")]
    NoSpace {
        /// `tail` at the time of the failed reservation.
        offset: u64,
        /// Bytes required for this entry.
        required: u64,
        /// Bytes currently free.
        free: u64,
    },
    /// The cursor's busy tag is held by another actor; the caller may retry.
    #[error("locked: offset {offset}")]
    Locked {
        /// Untagged cursor value observed.
        offset: u64,
    },
    /// The destination buffer is smaller than the entry's payload.
    #[error("destination too small: offset {offset}, required {required}")]
    TooSmall {
        /// Offset of the entry that didn't fit.
        offset: u64,
        /// Payload size the caller must provide capacity for.
        required: usize,
    },
    /// `skip`'s caller-supplied offset does not match the current head.
    #[error("offset mismatch: expected {expected}, head is {actual}")]
    OffsetMismatch {
        /// Offset the caller believed was current.
        expected: u64,
        /// The actual untagged `head`.
        actual: u64,
    },
    /// A CAS that should have been uncontested (the caller holds the busy
    /// tag) failed. This indicates memory corruption or a protocol bug, not
    /// ordinary contention.
    #[error("illegal state: {reason}")]
    IllegalState {
        /// Free-form diagnostic text.
        reason: &'static str,
    },
    /// The blocking channel read exceeded its caller-supplied deadline.
    #[error("timeout")]
    Timeout,
    /// The blocking channel read observed the same stuck offset
    /// `max_round_trips` times with no deadline set.
    #[error("retry limit reached at offset {offset}")]
    RetryLimit {
        /// Offset the read loop kept re-observing.
        offset: u64,
    },
    /// A host-level failure (allocation, clock, futex syscall, ...).
    #[error("system error: {reason}")]
    System {
        /// `errno` if one is available, 0 otherwise.
        errno: i32,
        /// Free-form diagnostic text.
        reason: &'static str,
    },
}

/// Which precondition an `InvalidArgument` failure violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidArgumentReason {
    /// A required pointer argument was null.
    NullPointer,
    /// A region was smaller than `header size + minimum data area`.
    RegionTooSmall,
    /// `length - header size` is not a power of two.
    DataSizeNotPowerOfTwo,
    /// A payload length was zero.
    ZeroLength,
    /// A `skip` offset was not 8-byte aligned.
    Unaligned,
    /// A channel configuration violated `max_round_trips >= 1 && start_sleep_ns > 0
    /// && max_sleep_ns >= start_sleep_ns`.
    InvalidChannelConfig,
    /// A segment name contained an interior NUL byte and cannot be passed
    /// to `shm_open`.
    InvalidName,
}

impl std::fmt::Display for InvalidArgumentReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::NullPointer => "pointer is null",
            Self::RegionTooSmall => "region smaller than header + minimum data area",
            Self::DataSizeNotPowerOfTwo => "data area size must be a power of two",
            Self::ZeroLength => "payload length is zero",
            Self::Unaligned => "offset must be 8-byte aligned",
            Self::InvalidChannelConfig => {
                "config must satisfy max_round_trips >= 1 && start_sleep_ns > 0 && max_sleep_ns >= start_sleep_ns"
            }
            Self::InvalidName => "segment name contains an interior NUL byte",
        };
        f.write_str(text)
    }
}

/// Errors surfaced by the [`SharedSegment`](crate::shm::SharedSegment) layer.
#[derive(Debug, Clone, Error)]
pub enum ShmError {
    /// A required argument (name, size) failed validation.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Which precondition failed.
        reason: InvalidArgumentReason,
    },
    /// A segment with this name already exists at a different size.
    #[error("size mismatch for segment {name:?}: requested {requested}, existing is {existing}")]
    SizeMismatch {
        /// Name of the segment.
        name: String,
        /// Size the caller asked for (after page rounding).
        requested: u64,
        /// Size the existing segment actually has.
        existing: u64,
    },
    /// A `shm_open`/`ftruncate`/`mmap`/`munmap`/`shm_unlink` call failed.
    #[error("system error ({errno}): {reason}")]
    System {
        /// `errno` reported by the failing syscall.
        errno: i32,
        /// Which operation failed.
        reason: &'static str,
    },
}

/// Errors surfaced by the [`Channel`](crate::channel::Channel) layer.
///
/// The channel classifies the buffer's retryable statuses internally
/// (sleep and try again) and only ever surfaces `Timeout`, `RetryLimit`,
/// a hard [`RingError`], or `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Wraps a hard [`RingError`] bubbled up unchanged from the buffer layer.
    #[error(transparent)]
    Ring(#[from] RingError),
    /// The channel's configuration was invalid at construction time.
    #[error("invalid channel config: {reason}")]
    InvalidConfig {
        /// Which precondition failed.
        reason: InvalidArgumentReason,
    },
}
