// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Unix stream socket backend for `Channel`
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests over `UnixStream::pair`
//!
//! Frames are written as `[len][handle_count][payload]` (see `framing`). Handles
//! ride as SCM_RIGHTS ancillary data on the first write of their frame; the
//! receiver queues descriptors in arrival order and hands `handle_count` of them
//! to each completed frame.
//!
//! SECURITY INVARIANTS:
//!   - Received descriptors are close-on-exec where the platform allows it
//!   - A truncated control message is an error; no descriptor is leaked
//!   - Frame and handle counts are bounded before allocation

use std::collections::VecDeque;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::ptr;

use parking_lot::Mutex;

use crate::channel::{Channel, Frame, OsHandle};
use crate::framing::{encode_frame, FrameReader, MAX_FRAME_HANDLES};
use crate::{IpcError, Result};

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

#[cfg(any(target_os = "linux", target_os = "android"))]
const RECV_FLAGS: libc::c_int = libc::MSG_CMSG_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const RECV_FLAGS: libc::c_int = 0;

const READ_CHUNK: usize = 16 * 1024;

struct RecvState {
    reader: FrameReader,
    fds: VecDeque<OwnedFd>,
    /// Scratch buffer for `recvmsg`, reused across calls.
    chunk: Box<[u8]>,
}

/// `Channel` over a connected Unix stream socket.
pub struct UnixChannel {
    stream: UnixStream,
    send_lock: Mutex<()>,
    recv_state: Mutex<RecvState>,
}

impl UnixChannel {
    /// Wraps an already connected stream.
    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            stream,
            send_lock: Mutex::new(()),
            recv_state: Mutex::new(RecvState {
                reader: FrameReader::new(),
                fds: VecDeque::new(),
                chunk: vec![0u8; READ_CHUNK].into_boxed_slice(),
            }),
        }
    }

    /// Connected pair, mostly for tests and in-process harnesses.
    pub fn pair() -> Result<(Self, Self)> {
        let (a, b) = UnixStream::pair().map_err(IpcError::Transport)?;
        Ok((Self::from_stream(a), Self::from_stream(b)))
    }

    /// Adopts a descriptor inherited from the parent process.
    ///
    /// Fails with [`IpcError::InvalidHandle`] when `fd` is not an open socket;
    /// in that case ownership is not taken.
    ///
    /// # Safety
    ///
    /// `fd` must not be owned by anything else in this process. On success the
    /// returned channel closes it on drop.
    pub unsafe fn from_inherited_fd(fd: RawFd) -> Result<Self> {
        let mut stat: libc::stat = mem::zeroed();
        if libc::fstat(fd, &mut stat) != 0 {
            return Err(IpcError::InvalidHandle(format!(
                "descriptor {fd}: {}",
                io::Error::last_os_error()
            )));
        }
        if stat.st_mode & libc::S_IFMT != libc::S_IFSOCK {
            return Err(IpcError::InvalidHandle(format!("descriptor {fd} is not a socket")));
        }
        Ok(Self::from_stream(UnixStream::from_raw_fd(fd)))
    }

    fn send_bytes(&self, bytes: &[u8], fds: &[RawFd]) -> Result<()> {
        let fd = self.stream.as_raw_fd();
        let mut offset = 0;
        let mut pending_fds = fds;
        while offset < bytes.len() {
            let written = sendmsg_once(fd, &bytes[offset..], pending_fds).map_err(transport_error)?;
            if written == 0 {
                return Err(IpcError::PeerClosed);
            }
            offset += written;
            pending_fds = &[];
        }
        Ok(())
    }
}

impl Channel for UnixChannel {
    fn send(&self, frame: Frame) -> Result<()> {
        let bytes = encode_frame(&frame.data, frame.handles.len())?;
        let fds: Vec<RawFd> = frame.handles.iter().map(AsRawFd::as_raw_fd).collect();
        let _guard = self.send_lock.lock();
        // `frame.handles` stays alive until sendmsg has duplicated the descriptors.
        self.send_bytes(&bytes, &fds)
    }

    fn recv(&self) -> Result<Frame> {
        let mut guard = self.recv_state.lock();
        let state = &mut *guard;
        loop {
            if let Some((header, payload)) = state.reader.next_frame()? {
                let expected = header.handle_count as usize;
                if state.fds.len() < expected {
                    return Err(IpcError::MissingHandles { expected, received: state.fds.len() });
                }
                let handles = state.fds.drain(..expected).map(OsHandle::new).collect();
                return Ok(Frame { data: payload, handles });
            }
            let (read, fds) = recvmsg_once(self.stream.as_raw_fd(), &mut state.chunk)?;
            if read == 0 {
                return Err(IpcError::PeerClosed);
            }
            state.fds.extend(fds);
            state.reader.push(&state.chunk[..read]);
        }
    }
}

fn transport_error(err: io::Error) -> IpcError {
    match err.kind() {
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => IpcError::PeerClosed,
        _ => IpcError::Transport(err),
    }
}

fn control_words(payload_len: usize) -> usize {
    // SAFETY: CMSG_SPACE is pure arithmetic.
    let space = unsafe { libc::CMSG_SPACE(payload_len as libc::c_uint) } as usize;
    space.div_ceil(mem::size_of::<u64>())
}

fn sendmsg_once(fd: RawFd, bytes: &[u8], fds: &[RawFd]) -> io::Result<usize> {
    let mut iov = libc::iovec { iov_base: bytes.as_ptr() as *mut libc::c_void, iov_len: bytes.len() };
    let payload_len = mem::size_of_val(fds);
    // u64 words keep the control buffer aligned for `cmsghdr`.
    let mut control = vec![0u64; control_words(payload_len)];

    // SAFETY: msghdr is plain data; all-zero is a valid empty header.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    if !fds.is_empty() {
        msg.msg_control = control.as_mut_ptr().cast();
        // SAFETY: pure arithmetic.
        msg.msg_controllen = unsafe { libc::CMSG_SPACE(payload_len as libc::c_uint) } as _;
        // SAFETY: the control buffer holds CMSG_SPACE(payload_len) bytes, so the first
        // header and `fds.len()` descriptors fit.
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(payload_len as libc::c_uint) as _;
            ptr::copy_nonoverlapping(
                fds.as_ptr().cast::<u8>(),
                libc::CMSG_DATA(cmsg),
                payload_len,
            );
        }
    }

    loop {
        // SAFETY: msg points at live buffers for the duration of the call.
        let n = unsafe { libc::sendmsg(fd, &msg, SEND_FLAGS) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

fn recvmsg_once(fd: RawFd, buf: &mut [u8]) -> Result<(usize, Vec<OwnedFd>)> {
    let mut iov = libc::iovec { iov_base: buf.as_mut_ptr().cast(), iov_len: buf.len() };
    let mut control = vec![0u64; control_words(MAX_FRAME_HANDLES * mem::size_of::<RawFd>())];

    // SAFETY: msghdr is plain data; all-zero is a valid empty header.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr().cast();
    msg.msg_controllen = (control.len() * mem::size_of::<u64>()) as _;

    let read = loop {
        // SAFETY: msg points at live buffers for the duration of the call.
        let n = unsafe { libc::recvmsg(fd, &mut msg, RECV_FLAGS) };
        if n >= 0 {
            break n as usize;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(transport_error(err));
        }
    };

    let mut fds = Vec::new();
    // SAFETY: the kernel filled `control` and set msg_controllen; the CMSG_* macros
    // stay within it. Every SCM_RIGHTS descriptor is fresh and owned by us.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data = libc::CMSG_DATA(cmsg);
                let header_len = data as usize - cmsg as usize;
                let count = ((*cmsg).cmsg_len as usize - header_len) / mem::size_of::<RawFd>();
                for i in 0..count {
                    let raw = ptr::read_unaligned(data.cast::<RawFd>().add(i));
                    fds.push(OwnedFd::from_raw_fd(raw));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    if msg.msg_flags & libc::MSG_CTRUNC != 0 {
        log::error!("vm-ipc: ancillary data truncated, dropping {} descriptors", fds.len());
        return Err(IpcError::HandlesTruncated);
    }
    Ok((read, fds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom, Write};
    use std::thread;

    fn memfile(contents: &[u8]) -> std::fs::File {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(contents).unwrap();
        file
    }

    #[test]
    fn frames_cross_a_socketpair() {
        let (a, b) = UnixChannel::pair().unwrap();
        a.send(Frame::bytes(vec![1, 2, 3])).unwrap();
        a.send(Frame::bytes(Vec::new())).unwrap();
        assert_eq!(b.recv().unwrap().data, vec![1, 2, 3]);
        assert!(b.recv().unwrap().data.is_empty());
    }

    #[test]
    fn large_frames_survive_partial_io() {
        let (a, b) = UnixChannel::pair().unwrap();
        let payload: Vec<u8> = (0..1_000_000u32).map(|i| i as u8).collect();
        let expected = payload.clone();
        let writer = thread::spawn(move || a.send(Frame::bytes(payload)).unwrap());
        assert_eq!(b.recv().unwrap().data, expected);
        writer.join().unwrap();
    }

    #[test]
    fn receive_buffer_is_reused_across_frames() {
        let (a, b) = UnixChannel::pair().unwrap();
        let scratch = b.recv_state.lock().chunk.as_ptr();
        let big: Vec<u8> = (0..READ_CHUNK as u32 * 3 + 5).map(|i| (i % 251) as u8).collect();
        let expected = big.clone();
        let writer = thread::spawn(move || {
            a.send(Frame::bytes(big)).unwrap();
            a.send(Frame::bytes(vec![9; 3])).unwrap();
            a
        });
        assert_eq!(b.recv().unwrap().data, expected);
        assert_eq!(b.recv().unwrap().data, vec![9; 3]);
        writer.join().unwrap();
        assert_eq!(b.recv_state.lock().chunk.as_ptr(), scratch);
    }

    #[test]
    fn descriptors_travel_with_their_frame() {
        let (a, b) = UnixChannel::pair().unwrap();
        let file = memfile(b"shared");
        let frame = Frame { data: vec![7], handles: vec![OsHandle::new(OwnedFd::from(file))] };
        a.send(frame).unwrap();

        let received = b.recv().unwrap();
        assert_eq!(received.data, vec![7]);
        assert_eq!(received.handles.len(), 1);
        let mut file = std::fs::File::from(received.handles[0].try_clone_owned().unwrap());
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut text = String::new();
        file.read_to_string(&mut text).unwrap();
        assert_eq!(text, "shared");
    }

    #[test]
    fn closed_peer_is_reported() {
        let (a, b) = UnixChannel::pair().unwrap();
        drop(a);
        assert!(matches!(b.recv(), Err(IpcError::PeerClosed)));
        assert!(matches!(b.send(Frame::bytes(vec![0])), Err(IpcError::PeerClosed)));
    }

    #[test]
    fn non_socket_descriptor_is_rejected() {
        let file = memfile(b"x");
        // SAFETY: the descriptor is still owned by `file`; rejection does not take it.
        let err = unsafe { UnixChannel::from_inherited_fd(file.as_raw_fd()) };
        assert!(matches!(err, Err(IpcError::InvalidHandle(_))));
        // SAFETY: -1 is never a valid descriptor.
        let err = unsafe { UnixChannel::from_inherited_fd(-1) };
        assert!(matches!(err, Err(IpcError::InvalidHandle(_))));
    }
}
