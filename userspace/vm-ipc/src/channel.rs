// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Message-preserving duplex channel abstraction shared by host and VM.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::Arc;

use crate::Result;

/// OS resource transferred alongside a frame (a file descriptor on Unix).
///
/// Cloning shares the same descriptor; it is closed when the last clone drops.
#[derive(Clone, Debug)]
pub struct OsHandle(Arc<OwnedFd>);

impl OsHandle {
    /// Wraps an owned descriptor.
    pub fn new(fd: OwnedFd) -> Self {
        Self(Arc::new(fd))
    }

    /// Duplicates the descriptor into an independently owned one.
    pub fn try_clone_owned(&self) -> std::io::Result<OwnedFd> {
        self.0.try_clone()
    }
}

impl From<OwnedFd> for OsHandle {
    fn from(fd: OwnedFd) -> Self {
        Self::new(fd)
    }
}

impl AsFd for OsHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl AsRawFd for OsHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

/// One message: payload bytes plus any handles riding with it.
#[derive(Clone, Debug, Default)]
pub struct Frame {
    /// Payload, starting with the opcode.
    pub data: Vec<u8>,
    /// Out-of-band handles, in encoding order.
    pub handles: Vec<OsHandle>,
}

impl Frame {
    /// Frame without handles.
    pub fn bytes(data: Vec<u8>) -> Self {
        Self { data, handles: Vec::new() }
    }
}

/// Reliable, ordered, message-preserving duplex link.
///
/// Both operations block; the single-threaded VM relies on that.
pub trait Channel: Send {
    /// Delivers `frame` to the peer as a unit.
    fn send(&self, frame: Frame) -> Result<()>;

    /// Waits for the next complete frame from the peer.
    fn recv(&self) -> Result<Frame>;
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn send(&self, frame: Frame) -> Result<()> {
        (**self).send(frame)
    }

    fn recv(&self) -> Result<Frame> {
        (**self).recv()
    }
}
