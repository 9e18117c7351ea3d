//! A lock-free multi-producer / multi-consumer FIFO byte queue that lives in
//! a single region of memory — shared-memory-backed when that region comes
//! from a [`SharedSegment`], or heap-backed for in-process use and tests.
//!
//! The crate is three layers, each depending only on the one below it:
//!
//! - [`shm`] — opens/attaches a named POSIX shared-memory segment and hands
//!   back a raw pointer and length. Knows nothing about ring buffers.
//! - [`ring`] — [`RingBuffer`], the lock-free protocol itself: a header of
//!   two cache-line-separated cursors (`head`, `tail`) with an in-band busy
//!   bit, and a per-entry `seq` field that is the sole commit marker. No
//!   mutexes, no sleeping; contention and backpressure are returned to the
//!   caller as [`RingError::Locked`]/[`RingError::NoSpace`].
//! - [`channel`] — [`Channel`], a blocking read loop layered on the buffer's
//!   non-blocking `peek`/`read`: adaptive-backoff sleep, a retry budget or a
//!   wall-clock deadline, and transparent `TooSmall` destination growth.
//!
//! A producer and a consumer never need to coordinate setup beyond agreeing
//! on a region: one process `create`s (or `open_or_create`s the backing
//! segment and `create_in`s the buffer over it), every other process
//! `attach`es. Any number of threads in any number of attached processes may
//! call `write`/`read`/`peek`/`skip` concurrently; delivery is exactly-once
//! per entry, FIFO within a single producer, and CAS-linearisation-ordered
//! across producers.
//!
//! ```
//! use ringmpmc_rs::{ChannelConfig, Channel, RingBuffer};
//!
//! let buffer = RingBuffer::create_heap(4096).unwrap();
//! let channel = Channel::new(buffer, ChannelConfig::low_latency());
//!
//! channel.write(b"hello").unwrap();
//! assert_eq!(channel.try_read().unwrap().unwrap(), b"hello");
//! ```

pub mod backoff;
pub mod channel;
pub mod error;
#[cfg(all(feature = "futex", target_os = "linux"))]
pub mod futex;
pub(crate) mod invariants;
pub mod ring;
pub mod shm;

pub use channel::{Channel, ChannelConfig};
pub use error::{ChannelError, InvalidArgumentReason, RingError, ShmError};
pub use ring::{ForceSkipOutcome, PeekOutcome, Peeked, ReadEntry, ReadOutcome, RingBuffer, SkipOutcome};
pub use shm::SharedSegment;
