// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Flat little-endian codec for call arguments and results
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (covered by GAME_API_VERSION)
//! TEST_COVERAGE: Unit + property tests
//!
//! ENCODING:
//!   - fixed-width integers / floats: little-endian, no tag
//!   - bool: one byte, 0 or 1 (anything else is rejected)
//!   - string / blob / Vec<T>: u32le length (bytes for string/blob, items for Vec) then body
//!   - [T; N]: N items, no length
//!   - tuples and records: fields in declaration order
//!   - OsHandle: moved out-of-band with the frame, never as bytes
//!
//! INVARIANTS:
//!   - Decoding never reads past the buffer: every shortfall is `WireError::Truncated`
//!   - `Reader::finish` rejects trailing bytes so shape mismatches cannot pass silently

use std::collections::VecDeque;

use thiserror::Error;
use vm_abi::Opcode;

use crate::channel::{Frame, OsHandle};

/// Decoding/encoding failures. All of them indicate a host/VM version mismatch.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Tried to read past the end of the payload.
    #[error("payload truncated: needed {needed} more bytes, {remaining} left")]
    Truncated {
        /// Bytes the decoder asked for.
        needed: usize,
        /// Bytes left in the payload.
        remaining: usize,
    },
    /// String payload was not UTF-8.
    #[error("string is not valid utf-8")]
    InvalidUtf8,
    /// Bool byte was neither 0 nor 1.
    #[error("invalid bool byte {0:#04x}")]
    InvalidBool(u8),
    /// Bytes left over after the declared shape was decoded.
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
    /// A handle was expected but the frame carried none.
    #[error("frame carries no handle for a handle-typed value")]
    MissingHandle,
    /// A length did not fit the u32 prefix.
    #[error("length {0} does not fit the wire prefix")]
    LengthOverflow(usize),
}

/// Value with a fixed wire representation.
pub trait Wire: Sized {
    /// Appends `self` to `w`.
    fn encode(&self, w: &mut Writer);

    /// Reads one value from `r`.
    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError>;
}

/// Growable output buffer plus the handles that travel with it.
#[derive(Debug, Default)]
pub struct Writer {
    data: Vec<u8>,
    handles: Vec<OsHandle>,
    overflow: Option<usize>,
}

impl Writer {
    /// Empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writer pre-seeded with the message opcode.
    pub fn for_opcode(opcode: Opcode) -> Self {
        let mut w = Self::new();
        w.put_u32(opcode.raw());
        w
    }

    /// Encodes `value`.
    pub fn write<T: Wire>(&mut self, value: &T) -> &mut Self {
        value.encode(self);
        self
    }

    /// Appends raw bytes without a length prefix.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Appends a u32 length prefix, recording an overflow instead of truncating.
    pub fn put_len(&mut self, len: usize) {
        match u32::try_from(len) {
            Ok(len) => self.put_u32(len),
            Err(_) => {
                self.overflow.get_or_insert(len);
                self.put_u32(0);
            }
        }
    }

    fn put_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Queues a handle for out-of-band transfer.
    pub fn push_handle(&mut self, handle: OsHandle) {
        self.handles.push(handle);
    }

    /// Encoded bytes so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Finishes the frame.
    pub fn into_frame(self) -> Result<Frame, WireError> {
        if let Some(len) = self.overflow {
            return Err(WireError::LengthOverflow(len));
        }
        Ok(Frame { data: self.data, handles: self.handles })
    }
}

/// Cursor over a received payload.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    handles: VecDeque<OsHandle>,
}

impl<'a> Reader<'a> {
    /// Reader over `buf` with the handles received alongside it.
    pub fn new(buf: &'a [u8], handles: Vec<OsHandle>) -> Self {
        Self { buf, pos: 0, handles: handles.into() }
    }

    /// Reader over bytes only.
    pub fn from_bytes(buf: &'a [u8]) -> Self {
        Self::new(buf, Vec::new())
    }

    /// Decodes one value.
    pub fn read<T: Wire>(&mut self) -> Result<T, WireError> {
        T::decode(self)
    }

    /// Bytes not consumed yet.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Borrows the next `len` bytes.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < len {
            return Err(WireError::Truncated { needed: len, remaining: self.remaining() });
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Reads a u32 length prefix.
    pub fn take_len(&mut self) -> Result<usize, WireError> {
        Ok(u32::from_le_bytes(self.take_array()?) as usize)
    }

    /// Pops the next out-of-band handle.
    pub fn take_handle(&mut self) -> Result<OsHandle, WireError> {
        self.handles.pop_front().ok_or(WireError::MissingHandle)
    }

    /// Asserts the whole payload was consumed.
    pub fn finish(&self) -> Result<(), WireError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(WireError::TrailingBytes(n)),
        }
    }
}

macro_rules! wire_le {
    ($($ty:ty),*) => {
        $(
            impl Wire for $ty {
                fn encode(&self, w: &mut Writer) {
                    w.put_bytes(&self.to_le_bytes());
                }

                fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
                    Ok(<$ty>::from_le_bytes(r.take_array()?))
                }
            }
        )*
    };
}

wire_le!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl Wire for bool {
    fn encode(&self, w: &mut Writer) {
        w.put_bytes(&[u8::from(*self)]);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        match u8::decode(r)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(WireError::InvalidBool(other)),
        }
    }
}

impl Wire for String {
    fn encode(&self, w: &mut Writer) {
        w.put_len(self.len());
        w.put_bytes(self.as_bytes());
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let len = r.take_len()?;
        let bytes = r.take(len)?;
        core::str::from_utf8(bytes).map(str::to_owned).map_err(|_| WireError::InvalidUtf8)
    }
}

/// Opaque length-prefixed byte string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Blob(pub Vec<u8>);

impl Wire for Blob {
    fn encode(&self, w: &mut Writer) {
        w.put_len(self.0.len());
        w.put_bytes(&self.0);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let len = r.take_len()?;
        Ok(Self(r.take(len)?.to_vec()))
    }
}

impl<T: Wire> Wire for Vec<T> {
    fn encode(&self, w: &mut Writer) {
        w.put_len(self.len());
        for item in self {
            item.encode(w);
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let count = r.take_len()?;
        // Every item takes at least one byte, so the payload bounds the allocation.
        let mut out = Vec::with_capacity(count.min(r.remaining()));
        for _ in 0..count {
            out.push(T::decode(r)?);
        }
        Ok(out)
    }
}

impl<T: Wire, const N: usize> Wire for [T; N] {
    fn encode(&self, w: &mut Writer) {
        for item in self {
            item.encode(w);
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let mut items = Vec::with_capacity(N);
        for _ in 0..N {
            items.push(T::decode(r)?);
        }
        items
            .try_into()
            .map_err(|_| WireError::Truncated { needed: N, remaining: 0 })
    }
}

impl<T: Wire> Wire for Option<T> {
    fn encode(&self, w: &mut Writer) {
        self.is_some().encode(w);
        if let Some(value) = self {
            value.encode(w);
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        if bool::decode(r)? {
            Ok(Some(T::decode(r)?))
        } else {
            Ok(None)
        }
    }
}

impl Wire for OsHandle {
    fn encode(&self, w: &mut Writer) {
        w.push_handle(self.clone());
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        r.take_handle()
    }
}

impl Wire for () {
    fn encode(&self, _w: &mut Writer) {}

    fn decode(_r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(())
    }
}

macro_rules! wire_tuple {
    ($($name:ident),+) => {
        impl<$($name: Wire),+> Wire for ($($name,)+) {
            #[allow(non_snake_case)]
            fn encode(&self, w: &mut Writer) {
                let ($($name,)+) = self;
                $($name.encode(w);)+
            }

            fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
                Ok(($($name::decode(r)?,)+))
            }
        }
    };
}

wire_tuple!(A);
wire_tuple!(A, B);
wire_tuple!(A, B, C);
wire_tuple!(A, B, C, D);
wire_tuple!(A, B, C, D, E);
wire_tuple!(A, B, C, D, E, F);
wire_tuple!(A, B, C, D, E, F, G);
wire_tuple!(A, B, C, D, E, F, G, H);

/// Declares a plain struct whose wire form is its fields in order.
///
/// ```ignore
/// vm_ipc::wire_record! {
///     /// Box sweep result.
///     pub struct Hit { pub fraction: f32, pub entity: i32 }
/// }
/// ```
#[macro_export]
macro_rules! wire_record {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $($(#[$fmeta:meta])* pub $field:ident : $ty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        pub struct $name {
            $($(#[$fmeta])* pub $field: $ty),*
        }

        impl $crate::Wire for $name {
            fn encode(&self, w: &mut $crate::Writer) {
                $($crate::Wire::encode(&self.$field, w);)*
            }

            fn decode(r: &mut $crate::Reader<'_>) -> Result<Self, $crate::WireError> {
                Ok(Self { $($field: <$ty as $crate::Wire>::decode(r)?),* })
            }
        }
    };
}
