//! Lock-free MPMC ring buffer over a caller-supplied memory region.
//!
//! This is the layer that actually implements the cross-process protocol:
//! two cache-line-separated 64-bit cursors (`head`, `tail`) whose low bit
//! doubles as a single-actor busy tag, and a per-entry `seq` field that is
//! the sole commit marker. There is no separate "ready" flag and no mutex —
//! every participant (any number of threads, in any number of processes
//! that have the region mapped) serialises through compare-and-swap on the
//! cursor it needs to move.
//!
//! # Memory ordering
//!
//! - A writer claims space by CAS'ing `tail` to its tagged form, writes the
//!   entry's `payload_size`/`entry_size` fields and payload bytes with plain
//!   (non-atomic) stores, then does a `Release` store of `seq` — this store
//!   must be last, because it is the one a reader synchronises on.
//! - A reader CAS's `head` to its tagged form, does an `Acquire` load of
//!   `seq` at the claimed slot, and only treats the slot as committed (and
//!   its payload as readable) once `seq` equals the offset it expects. The
//!   acquire/release pair on `seq` is what makes the writer's plain stores
//!   visible to the reader — the cursor CAS alone does not establish that
//!   edge, because cursor and `seq` are different atomics.
//! - Releasing a busy tag (CAS back to the untagged value, or forward past
//!   the entry) uses `AcqRel` so a subsequent acquirer observes every write
//!   made under the tag.
//!
//! # Layout
//!
//! ```text
//! offset 0:   head:u64 (atomic)
//! offset 8:   data_size:u64 (atomic)
//! offset 16:  padding to 64 bytes
//! offset 64:  tail:u64 (atomic)
//! offset 72:  padding to 128 bytes
//! offset 128: data area, data_size bytes, entries 8-byte aligned
//! ```
//!
//! Each entry in the data area is `seq:u64, payload_size:u64, entry_size:u64`
//! followed by `payload_size` payload bytes and `entry_size - 24 -
//! payload_size` bytes of alignment padding. A placeholder entry has
//! `payload_size == 0`; its `entry_size` consumes the remaining bytes to the
//! wrap point so that no real entry ever straddles the wrap boundary.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{InvalidArgumentReason, RingError};
use crate::invariants::{
    debug_assert_cas_uncontested, debug_assert_cursor_monotonic, debug_assert_entry_aligned,
    debug_assert_fill_bounded, debug_assert_seq_matches_offset,
};

/// Bytes the fixed header occupies: `head` + `data_size` padded to one cache
/// line, followed by `tail` padded to a second cache line.
const CACHE_LINE: usize = 64;
const HEADER_SIZE: usize = CACHE_LINE * 2;

/// 8-byte alignment every entry header and payload region respects.
pub const DATA_ALIGN: u64 = 8;

/// `seq`, `payload_size`, `entry_size`: three `u64` fields.
pub const ENTRY_HEADER_SIZE: u64 = 24;

const FIELD_SEQ: usize = 0;
const FIELD_PAYLOAD_SIZE: usize = 8;
const FIELD_ENTRY_SIZE: usize = 16;

const BUSY_BIT: u64 = 1;

#[inline]
fn untag(v: u64) -> u64 {
    v & !BUSY_BIT
}

#[inline]
fn tag(v: u64) -> u64 {
    v | BUSY_BIT
}

#[inline]
fn is_busy(v: u64) -> bool {
    v & BUSY_BIT != 0
}

#[inline]
fn round_up_8(n: u64) -> u64 {
    (n + (DATA_ALIGN - 1)) & !(DATA_ALIGN - 1)
}

#[inline]
fn next_pow2(n: u64) -> u64 {
    if n <= 1 {
        1
    } else {
        n.next_power_of_two()
    }
}

#[repr(C)]
struct Header {
    head: AtomicU64,
    data_size: AtomicU64,
    _pad0: [u8; CACHE_LINE - 16],
    tail: AtomicU64,
    _pad1: [u8; CACHE_LINE - 8],
}

const _: () = assert!(std::mem::size_of::<Header>() == HEADER_SIZE);

/// A borrowed view of a committed entry's payload, returned by [`RingBuffer::peek`].
pub struct Peeked<'a> {
    /// The payload bytes, borrowed directly from the data area.
    pub payload: &'a [u8],
    /// The (untagged) offset at which the entry is committed.
    pub offset: u64,
}

/// Outcome of a non-destructive [`RingBuffer::peek`].
pub enum PeekOutcome<'a> {
    /// A committed entry is available without mutating any cursor.
    Entry(Peeked<'a>),
    /// `tail == head`: nothing to read.
    Empty,
    /// The slot at `offset` is claimed but its `seq` has not been published yet.
    NotReady {
        /// The offset a producer is (or was) mid-publish at.
        offset: u64,
    },
    /// The slot at `offset` carries structurally impossible metadata
    /// (`entry_size` outside `[ENTRY_HEADER_SIZE, data_size]` or unaligned)
    /// despite an apparently matching `seq`. Retryable: most often this is a
    /// caller deliberately corrupting `seq`/`entry_size` for a test, or a
    /// misbehaving producer; it self-heals once the real write lands.
    Corrupted {
        /// The offset the corrupted entry claims to occupy.
        offset: u64,
    },
}

/// Outcome of a destructive [`RingBuffer::read`].
pub struct ReadEntry {
    /// Bytes copied into the caller's destination.
    pub size: usize,
    /// The offset the consumed entry was committed at.
    pub offset: u64,
}

/// See [`PeekOutcome`] — identical classification, `Entry` carries a copy
/// instead of a borrow and advances `head`.
pub enum ReadOutcome {
    /// A committed entry was copied out and `head` advanced past it.
    Entry(ReadEntry),
    /// `tail == head`: nothing to read.
    Empty,
    /// See [`PeekOutcome::NotReady`].
    NotReady {
        /// The offset a producer is (or was) mid-publish at.
        offset: u64,
    },
    /// See [`PeekOutcome::Corrupted`].
    Corrupted {
        /// The offset the corrupted entry claims to occupy.
        offset: u64,
    },
}

/// Outcome of [`RingBuffer::skip`].
pub enum SkipOutcome {
    /// The entry at the caller's offset was skipped; `head` is now here.
    Skipped {
        /// `head` after the skip.
        new_head: u64,
    },
    /// `tail == head`: nothing to skip.
    Empty,
    /// See [`PeekOutcome::NotReady`].
    NotReady {
        /// The offset a producer is (or was) mid-publish at.
        offset: u64,
    },
    /// See [`PeekOutcome::Corrupted`].
    Corrupted {
        /// The offset the corrupted entry claims to occupy.
        offset: u64,
    },
}

/// Outcome of [`RingBuffer::force_skip`].
pub enum ForceSkipOutcome {
    /// `head` advanced past the stuck entry.
    Skipped {
        /// `head` after the forced skip.
        new_head: u64,
    },
    /// `tail == head`: nothing to skip.
    Empty,
    /// Another actor's CAS won the race; `head` already moved.
    AlreadySkipped,
}

enum Classification {
    Empty,
    NotReady,
    Corrupted,
    Placeholder { entry_size: u64 },
    Entry { rel: u64, payload_size: u64, entry_size: u64 },
}

/// A lock-free MPMC byte ring over a region of memory the caller owns the
/// lifetime of (heap-allocated for tests/benches, or a shared-memory
/// mapping kept alive by a [`crate::shm::SharedSegment`]).
///
/// `RingBuffer` is `Send + Sync`: every field it touches after construction
/// is either an atomic or governed by the busy-tag protocol, which is
/// exactly the point of the design.
pub struct RingBuffer {
    region: *mut u8,
    data_size: u64,
    _owned: Option<Box<[u8]>>,
}

unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Bytes the header occupies ahead of the data area.
    #[inline]
    pub fn memory_overhead() -> usize {
        HEADER_SIZE
    }

    /// Smallest region `create` will accept: header plus an 8-byte data area.
    #[inline]
    pub fn min_size() -> usize {
        HEADER_SIZE + DATA_ALIGN as usize
    }

    /// `next_pow2(desired_capacity) + memory_overhead()`, clamped up to
    /// [`RingBuffer::min_size`].
    pub fn suggest_size(desired_capacity: usize) -> usize {
        let min_size = Self::min_size() as u64;
        let overhead = Self::memory_overhead() as u64;
        if desired_capacity as u64 + overhead < min_size {
            return min_size as usize;
        }
        (next_pow2(desired_capacity as u64) + overhead) as usize
    }

    fn validate_region(region: *mut u8, region_len: usize) -> Result<u64, RingError> {
        if region.is_null() {
            return Err(RingError::InvalidArgument {
                reason: InvalidArgumentReason::NullPointer,
            });
        }
        if region_len < Self::min_size() {
            return Err(RingError::InvalidArgument {
                reason: InvalidArgumentReason::RegionTooSmall,
            });
        }
        let data_size = (region_len - Self::memory_overhead()) as u64;
        if !data_size.is_power_of_two() {
            return Err(RingError::InvalidArgument {
                reason: InvalidArgumentReason::DataSizeNotPowerOfTwo,
            });
        }
        Ok(data_size)
    }

    /// Initialises a fresh ring over `region` (`region_len` bytes), zeroing
    /// its cursors. The caller must guarantee no other actor observes this
    /// memory as an existing ring until this returns.
    ///
    /// # Safety
    /// `region` must be valid for reads and writes for `region_len` bytes
    /// and must remain valid for as long as the returned `RingBuffer` (and
    /// any other handle attached to the same region) is used.
    pub unsafe fn create_in(region: *mut u8, region_len: usize) -> Result<Self, RingError> {
        let data_size = Self::validate_region(region, region_len)?;
        let header = region as *mut Header;
        std::ptr::write(
            header,
            Header {
                head: AtomicU64::new(0),
                data_size: AtomicU64::new(data_size),
                _pad0: [0u8; CACHE_LINE - 16],
                tail: AtomicU64::new(0),
                _pad1: [0u8; CACHE_LINE - 8],
            },
        );
        Ok(Self {
            region,
            data_size,
            _owned: None,
        })
    }

    /// Attaches to a ring previously initialised by [`RingBuffer::create_in`]
    /// over the same region. Does not touch any atomic.
    ///
    /// # Safety
    /// Same obligations as [`RingBuffer::create_in`], plus: `region` must
    /// already hold a valid header written by `create_in`.
    pub unsafe fn attach_in(region: *mut u8, region_len: usize) -> Result<Self, RingError> {
        let expected_data_size = Self::validate_region(region, region_len)?;
        let header = &*(region as *const Header);
        let data_size = header.data_size.load(Ordering::Acquire);
        if data_size != expected_data_size {
            return Err(RingError::InvalidArgument {
                reason: InvalidArgumentReason::RegionTooSmall,
            });
        }
        Ok(Self {
            region,
            data_size,
            _owned: None,
        })
    }

    /// Allocates a heap-backed ring of at least `desired_capacity` data
    /// bytes, for use without a shared-memory segment (tests, benches,
    /// single-process pipelines).
    pub fn create_heap(desired_capacity: usize) -> Result<Self, RingError> {
        let size = Self::suggest_size(desired_capacity);
        let mut owned = vec![0u8; size].into_boxed_slice();
        let region = owned.as_mut_ptr();
        let data_size = Self::validate_region(region, size)?;
        unsafe {
            let header = region as *mut Header;
            std::ptr::write(
                header,
                Header {
                    head: AtomicU64::new(0),
                    data_size: AtomicU64::new(data_size),
                    _pad0: [0u8; CACHE_LINE - 16],
                    tail: AtomicU64::new(0),
                    _pad1: [0u8; CACHE_LINE - 8],
                },
            );
        }
        Ok(Self {
            region,
            data_size,
            _owned: Some(owned),
        })
    }

    #[inline]
    fn header(&self) -> &Header {
        unsafe { &*(self.region as *const Header) }
    }

    #[inline]
    unsafe fn entry_ptr(&self, rel: u64) -> *mut u8 {
        self.region.add(HEADER_SIZE + rel as usize)
    }

    #[inline]
    unsafe fn seq_atomic(&self, rel: u64) -> &AtomicU64 {
        &*(self.entry_ptr(rel).add(FIELD_SEQ) as *const AtomicU64)
    }

    #[inline]
    unsafe fn write_field(&self, rel: u64, field: usize, value: u64) {
        std::ptr::write(self.entry_ptr(rel).add(field) as *mut u64, value);
    }

    #[inline]
    unsafe fn read_field(&self, rel: u64, field: usize) -> u64 {
        std::ptr::read(self.entry_ptr(rel).add(field) as *const u64)
    }

    /// Capacity of the data area in bytes.
    #[inline]
    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    /// Directly pokes the `seq` field of the entry claimed at `offset`,
    /// returning the value that was there before.
    ///
    /// There is nothing encapsulating the data area from another process
    /// that has the same region mapped — anyone with the pointer can
    /// already write into it. This just gives in-process callers (fault
    /// injection tests, recovery tooling) the same ability without reaching
    /// around the type. See the scenario this exists for: injecting a
    /// `seq` mismatch to drive the channel's retry budget to exhaustion.
    ///
    /// # Safety
    /// `offset` must be the untagged offset of an entry that has already
    /// had its header written (i.e. observed via a prior `peek`/`read`, or
    /// known to equal the current `head`/`tail`). Calling this while
    /// another actor holds the busy tag on the cursor covering `offset` is
    /// safe with respect to memory safety but will be observed as a
    /// spurious `Corrupted`/`NotReady` classification by any reader.
    pub unsafe fn debug_poke_seq(&self, offset: u64, value: u64) -> u64 {
        let rel = offset & (self.data_size - 1);
        let seq = self.seq_atomic(rel);
        let previous = seq.load(Ordering::Acquire);
        seq.store(value, Ordering::Release);
        previous
    }

    fn classify(&self, head: u64, tail: u64) -> Classification {
        if tail == head {
            return Classification::Empty;
        }
        if is_busy(tail) {
            return Classification::NotReady;
        }
        let rel = head & (self.data_size - 1);
        let seq = unsafe { self.seq_atomic(rel).load(Ordering::Acquire) };
        if seq != head {
            return Classification::NotReady;
        }
        let payload_size = unsafe { self.read_field(rel, FIELD_PAYLOAD_SIZE) };
        let entry_size = unsafe { self.read_field(rel, FIELD_ENTRY_SIZE) };
        if entry_size < ENTRY_HEADER_SIZE || entry_size % DATA_ALIGN != 0 || entry_size > self.data_size {
            return Classification::Corrupted;
        }
        if payload_size == 0 {
            return Classification::Placeholder { entry_size };
        }
        Classification::Entry { rel, payload_size, entry_size }
    }

    /// Writes `payload` as a single entry. Retries internally on wrap
    /// (placeholder insertion) but never sleeps and never retries on
    /// contention — [`RingError::Locked`] and [`RingError::NoSpace`] are the
    /// caller's signal to retry.
    pub fn write(&self, payload: &[u8]) -> Result<(), RingError> {
        if payload.is_empty() {
            return Err(RingError::InvalidArgument {
                reason: InvalidArgumentReason::ZeroLength,
            });
        }
        let full_entry_size = round_up_8(ENTRY_HEADER_SIZE + payload.len() as u64);
        if full_entry_size > self.data_size {
            return Err(RingError::EntryTooLarge {
                required: full_entry_size,
                buffer_size: self.data_size,
            });
        }
        let header = self.header();
        loop {
            let tail = header.tail.load(Ordering::Acquire);
            if is_busy(tail) {
                return Err(RingError::Locked { offset: untag(tail) });
            }
            let head = header.head.load(Ordering::Acquire);
            let rel = tail & (self.data_size - 1);
            let space_to_wrap = self.data_size - rel;
            let filled = tail.wrapping_sub(untag(head));
            debug_assert_fill_bounded!(filled, self.data_size);
            let free = self.data_size - filled;
            if free < full_entry_size {
                return Err(RingError::NoSpace {
                    offset: tail,
                    required: full_entry_size,
                    free,
                });
            }
            let placeholder = space_to_wrap < full_entry_size + ENTRY_HEADER_SIZE;
            if header
                .tail
                .compare_exchange(tail, tag(tail), Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }
            let entry_size = if placeholder { space_to_wrap } else { full_entry_size };
            debug_assert_entry_aligned!(entry_size);
            unsafe {
                self.write_field(
                    rel,
                    FIELD_PAYLOAD_SIZE,
                    if placeholder { 0 } else { payload.len() as u64 },
                );
                self.write_field(rel, FIELD_ENTRY_SIZE, entry_size);
                if !placeholder {
                    std::ptr::copy_nonoverlapping(
                        payload.as_ptr(),
                        self.entry_ptr(rel).add(ENTRY_HEADER_SIZE as usize),
                        payload.len(),
                    );
                }
                self.seq_atomic(rel).store(tail, Ordering::Release);
            }
            let new_tail = tail + entry_size;
            debug_assert_cursor_monotonic!("tail", tail, new_tail);
            let advanced = header
                .tail
                .compare_exchange(tag(tail), new_tail, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok();
            if !advanced {
                return Err(RingError::IllegalState {
                    reason: "tail CAS failed while this writer held the busy tag",
                });
            }
            if placeholder {
                log::trace!("wrote placeholder at {tail}, entry_size={entry_size}, retrying write");
                continue;
            }
            return Ok(());
        }
    }

    fn acquire_head(&self) -> Result<u64, RingError> {
        let header = self.header();
        loop {
            let head = header.head.load(Ordering::Acquire);
            if is_busy(head) {
                return Err(RingError::Locked { offset: untag(head) });
            }
            if header
                .head
                .compare_exchange(head, tag(head), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(head);
            }
        }
    }

    fn release_head_to(&self, head: u64, new_head: u64) {
        let ok = self
            .header()
            .head
            .compare_exchange(tag(head), new_head, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok();
        debug_assert_cas_uncontested!("head release", ok);
    }

    /// Non-destructively inspects the next entry, advancing `head` only to
    /// skip over placeholders (which are always invisible to callers).
    pub fn peek(&self) -> Result<PeekOutcome<'_>, RingError> {
        loop {
            let head = self.acquire_head()?;
            let tail = self.header().tail.load(Ordering::Acquire);
            match self.classify(head, tail) {
                Classification::Empty => {
                    self.release_head_to(head, head);
                    return Ok(PeekOutcome::Empty);
                }
                Classification::NotReady => {
                    self.release_head_to(head, head);
                    return Ok(PeekOutcome::NotReady { offset: head });
                }
                Classification::Corrupted => {
                    self.release_head_to(head, head);
                    return Ok(PeekOutcome::Corrupted { offset: head });
                }
                Classification::Placeholder { entry_size } => {
                    let new_head = head + entry_size;
                    debug_assert_cursor_monotonic!("head", head, new_head);
                    self.release_head_to(head, new_head);
                    continue;
                }
                Classification::Entry { rel, payload_size, entry_size: _ } => {
                    debug_assert_seq_matches_offset!(head, head);
                    let ptr = unsafe { self.entry_ptr(rel).add(ENTRY_HEADER_SIZE as usize) };
                    let payload = unsafe { std::slice::from_raw_parts(ptr, payload_size as usize) };
                    self.release_head_to(head, head);
                    return Ok(PeekOutcome::Entry(Peeked { payload, offset: head }));
                }
            }
        }
    }

    /// Destructively reads the next entry into `dest`, advancing `head`
    /// past it. `dest` must be at least as large as the entry's payload or
    /// this fails with [`RingError::TooSmall`] without advancing `head`.
    pub fn read(&self, dest: &mut [u8]) -> Result<ReadOutcome, RingError> {
        loop {
            let head = self.acquire_head()?;
            let tail = self.header().tail.load(Ordering::Acquire);
            match self.classify(head, tail) {
                Classification::Empty => {
                    self.release_head_to(head, head);
                    return Ok(ReadOutcome::Empty);
                }
                Classification::NotReady => {
                    self.release_head_to(head, head);
                    return Ok(ReadOutcome::NotReady { offset: head });
                }
                Classification::Corrupted => {
                    self.release_head_to(head, head);
                    return Ok(ReadOutcome::Corrupted { offset: head });
                }
                Classification::Placeholder { entry_size } => {
                    let new_head = head + entry_size;
                    debug_assert_cursor_monotonic!("head", head, new_head);
                    self.release_head_to(head, new_head);
                    continue;
                }
                Classification::Entry { rel, payload_size, entry_size } => {
                    if dest.len() < payload_size as usize {
                        self.release_head_to(head, head);
                        return Err(RingError::TooSmall {
                            offset: head,
                            required: payload_size as usize,
                        });
                    }
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            self.entry_ptr(rel).add(ENTRY_HEADER_SIZE as usize),
                            dest.as_mut_ptr(),
                            payload_size as usize,
                        );
                    }
                    let new_head = head + entry_size;
                    debug_assert_cursor_monotonic!("head", head, new_head);
                    self.release_head_to(head, new_head);
                    return Ok(ReadOutcome::Entry(ReadEntry {
                        size: payload_size as usize,
                        offset: head,
                    }));
                }
            }
        }
    }

    /// Skips the entry at `offset` without copying it out. `offset` must
    /// equal the current (untagged) `head`; a stale offset fails with
    /// [`RingError::OffsetMismatch`], making a successful skip
    /// non-repeatable.
    pub fn skip(&self, offset: u64) -> Result<SkipOutcome, RingError> {
        if offset % DATA_ALIGN != 0 {
            return Err(RingError::InvalidArgument {
                reason: InvalidArgumentReason::Unaligned,
            });
        }
        let header = self.header();
        loop {
            let head = header.head.load(Ordering::Acquire);
            if is_busy(head) {
                return Err(RingError::Locked { offset: untag(head) });
            }
            if head != offset {
                return Err(RingError::OffsetMismatch { expected: offset, actual: head });
            }
            if header
                .head
                .compare_exchange(head, tag(head), Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }
            let tail = header.tail.load(Ordering::Acquire);
            match self.classify(head, tail) {
                Classification::Empty => {
                    self.release_head_to(head, head);
                    return Ok(SkipOutcome::Empty);
                }
                Classification::NotReady => {
                    self.release_head_to(head, head);
                    return Ok(SkipOutcome::NotReady { offset: head });
                }
                Classification::Corrupted => {
                    self.release_head_to(head, head);
                    return Ok(SkipOutcome::Corrupted { offset: head });
                }
                Classification::Placeholder { entry_size } => {
                    let new_head = head + entry_size;
                    self.release_head_to(head, new_head);
                    continue;
                }
                Classification::Entry { entry_size, .. } => {
                    let new_head = head + entry_size;
                    debug_assert_cursor_monotonic!("head", head, new_head);
                    self.release_head_to(head, new_head);
                    return Ok(SkipOutcome::Skipped { new_head });
                }
            }
        }
    }

    /// Best-effort recovery for a slot whose `seq` will never arrive (a
    /// crashed or misbehaving producer). Does **not** acquire the busy tag
    /// and does **not** validate the entry header it skips over — see the
    /// crate-level design notes on trusted-producer deployments.
    pub fn force_skip(&self) -> Result<ForceSkipOutcome, RingError> {
        let header = self.header();
        let head = untag(header.head.load(Ordering::Acquire));
        let tail = untag(header.tail.load(Ordering::Acquire));
        if tail == head {
            return Ok(ForceSkipOutcome::Empty);
        }
        let rel = head & (self.data_size - 1);
        let entry_size = unsafe { self.read_field(rel, FIELD_ENTRY_SIZE) };
        let new_head = head.wrapping_add(entry_size);
        match header
            .head
            .compare_exchange(head, new_head, Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(_) => {
                log::debug!("force_skip advanced head {head} -> {new_head}");
                Ok(ForceSkipOutcome::Skipped { new_head })
            }
            Err(_) => Ok(ForceSkipOutcome::AlreadySkipped),
        }
    }
}
