// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Anonymous shared memory region that can be handed to a peer process
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests
//!
//! The region is backed by an unnamed file (memfd on Linux, an immediately
//! unlinked POSIX shm object elsewhere) so the only way to reach it is through
//! its descriptor. The mapping is fixed for the lifetime of the value: it is
//! never resized or remapped.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr::NonNull;
use std::slice;

use crate::channel::OsHandle;
use crate::{IpcError, Result};

/// A `MAP_SHARED` mapping plus the descriptor that backs it.
#[derive(Debug)]
pub struct SharedMemory {
    ptr: NonNull<u8>,
    len: usize,
    handle: OsHandle,
}

// SAFETY: the mapping is owned by this value; access goes through `&self`/`&mut self`.
unsafe impl Send for SharedMemory {}

impl SharedMemory {
    /// Creates and maps a zero-filled region of `len` bytes.
    pub fn create(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(IpcError::Shm(io::Error::new(
                io::ErrorKind::InvalidInput,
                "shared memory region must not be empty",
            )));
        }
        let fd = anonymous_file()?;
        let size = libc::off_t::try_from(len)
            .map_err(|_| IpcError::Shm(io::Error::new(io::ErrorKind::InvalidInput, "region too large")))?;
        // SAFETY: `fd` is a valid descriptor we own.
        if unsafe { libc::ftruncate(fd.as_raw_fd(), size) } != 0 {
            return Err(IpcError::Shm(io::Error::last_os_error()));
        }
        Self::map(OsHandle::new(fd), len)
    }

    /// Maps a region received from the peer; the size is taken from the descriptor.
    pub fn from_handle(handle: OsHandle) -> Result<Self> {
        // SAFETY: `stat` is plain data and `handle` is an open descriptor.
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(handle.as_raw_fd(), &mut stat) } != 0 {
            return Err(IpcError::InvalidHandle(io::Error::last_os_error().to_string()));
        }
        let len = usize::try_from(stat.st_size).unwrap_or(0);
        if len == 0 {
            return Err(IpcError::InvalidHandle("shared memory handle has no backing size".into()));
        }
        Self::map(handle, len)
    }

    fn map(handle: OsHandle, len: usize) -> Result<Self> {
        // SAFETY: a fresh shared mapping of an fd-backed object; no existing memory is aliased.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                handle.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(IpcError::Shm(io::Error::last_os_error()));
        }
        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| IpcError::Shm(io::Error::other("mmap returned null")))?;
        log::debug!("vm-ipc: mapped shared region len={len} fd={}", handle.as_raw_fd());
        Ok(Self { ptr, len, handle })
    }

    /// Handle to transfer to the peer.
    pub fn handle(&self) -> OsHandle {
        self.handle.clone()
    }

    /// Mapped size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false: empty regions are rejected at creation.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read view of the whole region.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `ptr` maps `len` readable bytes for the lifetime of `self`.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Write view of the whole region.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` rules out other local views.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        // SAFETY: unmapping exactly the range returned by mmap.
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn anonymous_file() -> Result<OwnedFd> {
    // SAFETY: the name is NUL-terminated; the returned fd is fresh.
    let fd = unsafe { libc::memfd_create(b"gamevm-shm\0".as_ptr().cast(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(IpcError::Shm(io::Error::last_os_error()));
    }
    // SAFETY: fd was just created and is owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn anonymous_file() -> Result<OwnedFd> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static NEXT: AtomicU32 = AtomicU32::new(0);

    let name = format!("/gamevm-{}-{}\0", std::process::id(), NEXT.fetch_add(1, Ordering::Relaxed));
    // SAFETY: `name` is NUL-terminated and outlives both calls.
    let fd = unsafe {
        libc::shm_open(
            name.as_ptr().cast(),
            libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
            0o600,
        )
    };
    if fd < 0 {
        return Err(IpcError::Shm(io::Error::last_os_error()));
    }
    // SAFETY: as above; unlinking leaves the descriptor as the only reference.
    unsafe {
        libc::shm_unlink(name.as_ptr().cast());
        Ok(OwnedFd::from_raw_fd(fd))
    }
}
