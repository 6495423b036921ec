// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Typed views over the shared entity/client region
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests
//!
//! The region holds `[EntityRecord; entity_count]` followed by
//! `[ClientRecord; client_count]`. Both slices are validated once when the view
//! is built; accessors are plain bounds-checked indexing afterwards.

use vm_abi::{ClientRecord, EntityRecord, ShmLayout, GAME_DATA_LAYOUT};
use vm_ipc::{IpcError, OsHandle, SharedMemory};

use crate::error::{VmError, VmResult};

/// Entity and client tables living in one shared region.
#[derive(Debug)]
pub struct GameData {
    region: SharedMemory,
    layout: ShmLayout,
}

impl GameData {
    /// Allocates a zeroed region for [`GAME_DATA_LAYOUT`].
    pub fn allocate() -> VmResult<Self> {
        let region = SharedMemory::create(GAME_DATA_LAYOUT.total_len())?;
        Self::from_region(region, GAME_DATA_LAYOUT)
    }

    /// Wraps an existing region, checking it can hold `layout` with our record types.
    pub fn from_region(region: SharedMemory, layout: ShmLayout) -> VmResult<Self> {
        if layout.entity_size != core::mem::size_of::<EntityRecord>()
            || layout.client_size != core::mem::size_of::<ClientRecord>()
        {
            return Err(VmError::MalformedMessage(format!(
                "record sizes {}/{} do not match {}/{}",
                layout.entity_size,
                layout.client_size,
                core::mem::size_of::<EntityRecord>(),
                core::mem::size_of::<ClientRecord>(),
            )));
        }
        if region.len() < layout.total_len() {
            return Err(VmError::MalformedMessage(format!(
                "region of {} bytes cannot hold layout of {} bytes",
                region.len(),
                layout.total_len()
            )));
        }
        let bytes = region.as_bytes();
        let entities = &bytes[..layout.entity_table_len()];
        let clients = &bytes[layout.client_offset()..layout.total_len()];
        if bytemuck::try_cast_slice::<u8, EntityRecord>(entities).is_err()
            || bytemuck::try_cast_slice::<u8, ClientRecord>(clients).is_err()
        {
            return Err(VmError::Transport(IpcError::InvalidHandle(
                "shared region is not aligned for its records".into(),
            )));
        }
        Ok(Self { region, layout })
    }

    /// Region geometry.
    pub fn layout(&self) -> ShmLayout {
        self.layout
    }

    /// Handle to hand to the peer.
    pub fn handle(&self) -> OsHandle {
        self.region.handle()
    }

    /// Whole entity table.
    pub fn entities(&self) -> &[EntityRecord] {
        bytemuck::cast_slice(&self.region.as_bytes()[..self.layout.entity_table_len()])
    }

    /// Whole entity table, writable.
    pub fn entities_mut(&mut self) -> &mut [EntityRecord] {
        let end = self.layout.entity_table_len();
        bytemuck::cast_slice_mut(&mut self.region.as_bytes_mut()[..end])
    }

    /// Whole client table.
    pub fn clients(&self) -> &[ClientRecord] {
        bytemuck::cast_slice(&self.region.as_bytes()[self.layout.client_offset()..self.layout.total_len()])
    }

    /// Whole client table, writable.
    pub fn clients_mut(&mut self) -> &mut [ClientRecord] {
        let (start, end) = (self.layout.client_offset(), self.layout.total_len());
        bytemuck::cast_slice_mut(&mut self.region.as_bytes_mut()[start..end])
    }

    /// Entity `index`, if in range.
    pub fn entity(&self, index: usize) -> Option<&EntityRecord> {
        self.entities().get(index)
    }

    /// Entity `index`, writable.
    pub fn entity_mut(&mut self, index: usize) -> Option<&mut EntityRecord> {
        self.entities_mut().get_mut(index)
    }

    /// Client `index`, if in range.
    pub fn client(&self, index: usize) -> Option<&ClientRecord> {
        self.clients().get(index)
    }

    /// Client `index`, writable.
    pub fn client_mut(&mut self, index: usize) -> Option<&mut ClientRecord> {
        self.clients_mut().get_mut(index)
    }
}
