// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Shared-memory record layouts for the entity and client tables
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (covered by GAME_API_VERSION)
//! TEST_COVERAGE: Unit tests + `tests/abi_roundtrip.rs`
//!
//! Region layout: `[EntityRecord; MAX_GENTITIES][ClientRecord; MAX_CLIENTS]`, contiguous.
//! Every record is `repr(C)`, 4-byte aligned and free of padding, which is what lets the
//! `bytemuck::Pod` derive succeed and both processes view the same bytes identically.

use bytemuck::{Pod, Zeroable};

use crate::Vec3;

/// Entity table capacity.
pub const MAX_GENTITIES: usize = 1 << 10;
/// Client table capacity.
pub const MAX_CLIENTS: usize = 64;
/// Number of `stats` / `persistent` slots per client.
pub const MAX_STATS: usize = 16;

/// Entity state shared with the host (networked state plus server-side link data).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct EntityRecord {
    /// Table index of this entity.
    pub number: i32,
    /// Entity type tag.
    pub e_type: i32,
    /// Networked entity flags.
    pub e_flags: i32,
    /// Owning entity, or `ENTITYNUM_NONE`.
    pub owner_num: i32,
    /// World position.
    pub origin: Vec3,
    /// Orientation in degrees.
    pub angles: Vec3,
    /// Bounding box minimum, relative to `origin`.
    pub mins: Vec3,
    /// Bounding box maximum, relative to `origin`.
    pub maxs: Vec3,
    /// `ContentMask` bits this entity occupies.
    pub contents: u32,
    /// Non-zero while linked into the world.
    pub linked: u32,
    /// Incremented by the host on every link.
    pub link_count: i32,
    /// Model index, or inline brush model number.
    pub model_index: i32,
    /// Server-side visibility flags.
    pub sv_flags: i32,
    /// Single client allowed to see this entity when the matching flag is set.
    pub single_client: i32,
    /// Non-zero for inline brush models.
    pub bmodel: u32,
}

/// Player state shared with the host.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ClientRecord {
    /// Table index of this client.
    pub client_num: i32,
    /// Time of the last executed usercmd.
    pub command_time: i32,
    /// Movement type.
    pub pm_type: i32,
    /// Movement flags.
    pub pm_flags: i32,
    /// World position.
    pub origin: Vec3,
    /// Velocity.
    pub velocity: Vec3,
    /// View angles in degrees.
    pub view_angles: Vec3,
    /// Selected weapon.
    pub weapon: i32,
    /// Weapon state machine.
    pub weapon_state: i32,
    /// Last measured ping.
    pub ping: i32,
    /// Health, armour, etc.
    pub stats: [i32; MAX_STATS],
    /// Values that survive respawn.
    pub persistent: [i32; MAX_STATS],
}

/// Geometry of the shared region: counts and record sizes of both tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShmLayout {
    /// Entity table capacity.
    pub entity_count: usize,
    /// Size of one entity record in bytes.
    pub entity_size: usize,
    /// Client table capacity.
    pub client_count: usize,
    /// Size of one client record in bytes.
    pub client_size: usize,
}

/// Layout of the game-module region.
pub const GAME_DATA_LAYOUT: ShmLayout = ShmLayout::new(
    MAX_GENTITIES,
    core::mem::size_of::<EntityRecord>(),
    MAX_CLIENTS,
    core::mem::size_of::<ClientRecord>(),
);

impl ShmLayout {
    /// Describes a region with the given capacities and record sizes.
    pub const fn new(
        entity_count: usize,
        entity_size: usize,
        client_count: usize,
        client_size: usize,
    ) -> Self {
        Self { entity_count, entity_size, client_count, client_size }
    }

    /// Bytes occupied by the entity table.
    pub const fn entity_table_len(&self) -> usize {
        self.entity_count * self.entity_size
    }

    /// Offset of the first client record; always `entity_count * entity_size`.
    pub const fn client_offset(&self) -> usize {
        self.entity_table_len()
    }

    /// Bytes occupied by the client table.
    pub const fn client_table_len(&self) -> usize {
        self.client_count * self.client_size
    }

    /// Total region size.
    pub const fn total_len(&self) -> usize {
        self.client_offset() + self.client_table_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_have_no_hidden_padding() {
        assert_eq!(core::mem::size_of::<EntityRecord>(), 23 * 4);
        assert_eq!(core::mem::size_of::<ClientRecord>(), (4 + 9 + 3 + 2 * MAX_STATS) * 4);
        assert_eq!(core::mem::align_of::<EntityRecord>(), 4);
        assert_eq!(core::mem::align_of::<ClientRecord>(), 4);
    }

    #[test]
    fn client_table_follows_entity_table() {
        let layout = ShmLayout::new(7, 12, 3, 40);
        assert_eq!(layout.client_offset(), 84);
        assert_eq!(layout.total_len(), 84 + 120);
    }
}
