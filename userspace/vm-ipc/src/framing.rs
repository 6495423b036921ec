// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Frame boundaries on top of a byte stream
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit + property tests
//!
//! HEADER (8 bytes, little-endian):
//!   - [0..4]  payload length
//!   - [4..8]  number of handles that travel with the frame
//!
//! The stream may deliver a frame across any number of reads; `FrameReader`
//! buffers until a header and its full payload are present.

use crate::{IpcError, Result};

/// Size of the per-frame header.
pub const FRAME_HEADER_LEN: usize = 8;

/// Largest payload accepted from the peer.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Most handles accepted on a single frame.
pub const MAX_FRAME_HANDLES: usize = 16;

/// Decoded frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length in bytes.
    pub len: u32,
    /// Handles attached to the frame.
    pub handle_count: u32,
}

impl FrameHeader {
    /// Serialises the header.
    pub fn to_le_bytes(self) -> [u8; FRAME_HEADER_LEN] {
        let mut out = [0u8; FRAME_HEADER_LEN];
        out[..4].copy_from_slice(&self.len.to_le_bytes());
        out[4..].copy_from_slice(&self.handle_count.to_le_bytes());
        out
    }

    /// Parses and bounds-checks a header.
    pub fn from_le_bytes(bytes: [u8; FRAME_HEADER_LEN]) -> Result<Self> {
        let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let handle_count = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if len as usize > MAX_FRAME_LEN {
            return Err(IpcError::FrameTooLarge(len as usize));
        }
        if handle_count as usize > MAX_FRAME_HANDLES {
            return Err(IpcError::TooManyHandles(handle_count as usize));
        }
        Ok(Self { len, handle_count })
    }
}

/// Prepends the header to `payload`.
pub fn encode_frame(payload: &[u8], handle_count: usize) -> Result<Vec<u8>> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(IpcError::FrameTooLarge(payload.len()));
    }
    if handle_count > MAX_FRAME_HANDLES {
        return Err(IpcError::TooManyHandles(handle_count));
    }
    let header = FrameHeader { len: payload.len() as u32, handle_count: handle_count as u32 };
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(&header.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Incremental frame assembler.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    /// Empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes read from the stream.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes buffered but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pops the next complete frame as `(header, payload)`, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<(FrameHeader, Vec<u8>)>> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let mut raw = [0u8; FRAME_HEADER_LEN];
        raw.copy_from_slice(&self.buf[..FRAME_HEADER_LEN]);
        let header = FrameHeader::from_le_bytes(raw)?;
        let end = FRAME_HEADER_LEN + header.len as usize;
        if self.buf.len() < end {
            return Ok(None);
        }
        let payload = self.buf[FRAME_HEADER_LEN..end].to_vec();
        self.buf.drain(..end);
        Ok(Some((header, payload)))
    }
}
