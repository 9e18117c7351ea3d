//! A named POSIX shared-memory segment: the thing two unrelated processes
//! actually map to get at the same [`RingBuffer`](crate::ring::RingBuffer).
//!
//! The buffer and channel layers only ever consume a `(*mut u8, usize)` pair
//! — this module is the one place that knows about `shm_open`, `ftruncate`,
//! `mmap`, and page sizes. Grounded on `ipc_mmap.c`'s `_open_shm`/`ipc_mmap`/
//! `ipc_unmap`/`ipc_unlink`/`ipc_reset`, which implement exactly this and
//! nothing more.

use std::ffi::CString;
use std::ptr;

use crate::error::{InvalidArgumentReason, ShmError};

/// POSIX shared-memory object permission bits (`rw-rw-rw-`), matching
/// `ipc_mmap.c`'s `OPEN_MODE`. A real deployment would narrow this with
/// `umask`; this crate, like the C original, leaves that to the caller's
/// process environment.
const OPEN_MODE: libc::mode_t = 0o666;

/// A shared-memory region opened or attached via [`SharedSegment::open_or_create`].
///
/// Dropping a `SharedSegment` unmaps the region (`munmap`) but does not
/// unlink the name — the segment outlives any one process attached to it
/// until a caller explicitly calls [`SharedSegment::unlink`] or
/// [`SharedSegment::reset`]. This mirrors POSIX shared memory's own
/// lifetime: unlinking removes the name, not the mapping held by processes
/// that already attached.
pub struct SharedSegment {
    name: String,
    ptr: *mut u8,
    size: usize,
}

// Safety: the mapped region is handed to the ring buffer layer, which
// synchronizes all access to it with atomics. The segment handle itself
// only ever reads its own `ptr`/`size` fields.
unsafe impl Send for SharedSegment {}
unsafe impl Sync for SharedSegment {}

impl SharedSegment {
    /// Opens an existing named segment, or creates one if none exists.
    ///
    /// `size` is rounded up to the host page size before use. If a segment
    /// with this `name` already exists, this attaches to it and returns its
    /// *actual* size — which the caller must check against what it asked
    /// for, since an existing segment created with a different size cannot
    /// be resized in place (`ipc_mmap.c:_open_shm`'s `O_CREAT|O_EXCL` then
    /// `O_RDWR` fallback).
    pub fn open_or_create(name: &str, size: usize) -> Result<Self, ShmError> {
        if name.is_empty() || size == 0 {
            return Err(ShmError::InvalidArgument {
                reason: InvalidArgumentReason::ZeroLength,
            });
        }
        let c_name = CString::new(name).map_err(|_| ShmError::InvalidArgument {
            reason: InvalidArgumentReason::InvalidName,
        })?;

        let page_size = page_size();
        let aligned_size = round_up(size as u64, page_size) as usize;

        let (fd, created_size) = open_shm(&c_name, aligned_size)?;
        let map_result = unsafe { map_fd(fd, created_size) };
        let ptr = match map_result {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };
        unsafe { libc::close(fd) };

        if created_size != aligned_size {
            unsafe { libc::munmap(ptr.cast(), created_size) };
            return Err(ShmError::SizeMismatch {
                name: name.to_string(),
                requested: aligned_size as u64,
                existing: created_size as u64,
            });
        }

        Ok(Self {
            name: name.to_string(),
            ptr,
            size: aligned_size,
        })
    }

    /// Unlinks the segment's name from the OS (`shm_unlink`) without
    /// unmapping it from this process. Any process still attached keeps its
    /// mapping valid; no new process can `open_or_create` the name until it
    /// is recreated.
    pub fn unlink(&self) -> Result<(), ShmError> {
        unlink_name(&self.name)
    }

    /// Unlinks a segment by name without first attaching to it — for
    /// cleaning up after a crashed peer that never called `unlink` itself
    /// (`ipc_mmap.c:ipc_reset`).
    pub fn reset(name: &str) -> Result<(), ShmError> {
        if name.is_empty() {
            return Err(ShmError::InvalidArgument {
                reason: InvalidArgumentReason::ZeroLength,
            });
        }
        unlink_name(name)
    }

    /// The page-rounded size of the mapped region.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The name this segment was opened or created under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw pointer to the start of the mapped region.
    ///
    /// # Safety
    /// The caller must not access the region past `size()` bytes, and must
    /// synchronize access with any other attached process through the
    /// ring buffer protocol, not through this pointer directly.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.cast(), self.size);
        }
    }
}

fn unlink_name(name: &str) -> Result<(), ShmError> {
    let c_name = CString::new(name).map_err(|_| ShmError::InvalidArgument {
        reason: InvalidArgumentReason::InvalidName,
    })?;
    let rc = unsafe { libc::shm_unlink(c_name.as_ptr()) };
    if rc != 0 {
        return Err(ShmError::System {
            errno: last_errno(),
            reason: "shm_unlink failed",
        });
    }
    Ok(())
}

/// `ipc_mmap.c:_open_shm` — first-creator-wins: try `O_CREAT|O_EXCL` first,
/// and only fall back to a plain `O_RDWR` attach on `EEXIST`. Returns the
/// open fd and the size the segment actually ends up at (the requested size
/// if we created it, or whatever `fstat` reports if we attached to one that
/// already existed).
fn open_shm(c_name: &CString, size: usize) -> Result<(libc::c_int, usize), ShmError> {
    let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_CREAT | libc::O_EXCL | libc::O_RDWR, OPEN_MODE) };
    if fd >= 0 {
        if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
            let errno = last_errno();
            unsafe { libc::close(fd) };
            return Err(ShmError::System {
                errno,
                reason: "ftruncate failed",
            });
        }
        return Ok((fd, size));
    }

    let errno = last_errno();
    if errno != libc::EEXIST {
        return Err(ShmError::System {
            errno,
            reason: "shm_open (create) failed",
        });
    }

    let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, OPEN_MODE) };
    if fd < 0 {
        return Err(ShmError::System {
            errno: last_errno(),
            reason: "shm_open (attach) failed",
        });
    }
    let existing_size = fd_size(fd)?;
    Ok((fd, existing_size))
}

fn fd_size(fd: libc::c_int) -> Result<usize, ShmError> {
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd, &mut stat) } != 0 {
        let errno = last_errno();
        unsafe { libc::close(fd) };
        return Err(ShmError::System {
            errno,
            reason: "fstat failed",
        });
    }
    Ok(stat.st_size as usize)
}

/// # Safety
/// `fd` must be a valid, open file descriptor referring to a shared-memory
/// object at least `size` bytes long.
unsafe fn map_fd(fd: libc::c_int, size: usize) -> Result<*mut u8, ShmError> {
    let ptr = libc::mmap(ptr::null_mut(), size, libc::PROT_READ | libc::PROT_WRITE, libc::MAP_SHARED, fd, 0);
    if ptr == libc::MAP_FAILED {
        return Err(ShmError::System {
            errno: last_errno(),
            reason: "mmap failed",
        });
    }
    Ok(ptr.cast())
}

fn page_size() -> u64 {
    let rc = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if rc <= 0 {
        4096
    } else {
        rc as u64
    }
}

fn round_up(value: u64, align: u64) -> u64 {
    (value + align - 1) / align * align
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("/ringmpmc-test-{}-{}-{}", std::process::id(), tag, unique_suffix())
    }

    fn unique_suffix() -> u64 {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        COUNTER.fetch_add(1, Ordering::Relaxed)
    }

    #[test]
    fn test_open_or_create_rounds_up_to_page_size() {
        let name = unique_name("round");
        let seg = SharedSegment::open_or_create(&name, 1).unwrap();
        assert_eq!(seg.size() as u64, page_size());
        seg.unlink().unwrap();
    }

    #[test]
    fn test_second_open_attaches_to_first_creator() {
        let name = unique_name("attach");
        let seg_a = SharedSegment::open_or_create(&name, 4096).unwrap();
        let seg_b = SharedSegment::open_or_create(&name, 4096).unwrap();
        assert_eq!(seg_a.size(), seg_b.size());

        unsafe {
            ptr::write(seg_a.as_ptr(), 0xAB);
        }
        let observed = unsafe { ptr::read(seg_b.as_ptr()) };
        assert_eq!(observed, 0xAB);

        seg_a.unlink().unwrap();
    }

    #[test]
    fn test_size_mismatch_is_reported() {
        let name = unique_name("mismatch");
        let seg = SharedSegment::open_or_create(&name, 4096).unwrap();
        let err = SharedSegment::open_or_create(&name, 8192).unwrap_err();
        assert!(matches!(err, ShmError::SizeMismatch { .. }));
        seg.unlink().unwrap();
    }

    #[test]
    fn test_reset_unlinks_without_attaching() {
        let name = unique_name("reset");
        let seg = SharedSegment::open_or_create(&name, 4096).unwrap();
        drop(seg);
        SharedSegment::reset(&name).unwrap();
    }

    #[test]
    fn test_rejects_empty_name() {
        assert!(matches!(
            SharedSegment::open_or_create("", 4096),
            Err(ShmError::InvalidArgument { .. })
        ));
    }
}
