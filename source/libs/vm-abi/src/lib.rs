// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Shared ABI definitions for the game VM boundary (host engine <-> sandboxed module)
//! OWNERS: @runtime
//! PUBLIC API: Opcode, GAME_API_VERSION, major/game/syscall/command/cvar opcode tables,
//!             ContentMask, layout::{EntityRecord, ClientRecord, ShmLayout}
//! DEPENDS_ON: no_std, bitflags, bytemuck
//! INVARIANTS: Opcode is `major << 16 | minor`; `Opcode::RETURN` is reserved for replies;
//!             record layouts are `repr(C)` without padding so both address spaces agree
//! ADR: docs/adr/0003-ipc-runtime-architecture.md

use core::fmt;

pub mod layout;

pub use layout::{ClientRecord, EntityRecord, ShmLayout, GAME_DATA_LAYOUT, MAX_CLIENTS, MAX_GENTITIES};

/// Syscall ABI version sent by the VM as its very first message.
///
/// Bump whenever an opcode, argument shape or record layout changes: there is no schema
/// negotiation, so host and VM builds must agree on this number exactly.
pub const GAME_API_VERSION: u32 = 0x0001_0003;

/// Three-component vector as carried on the wire and in shared records.
pub type Vec3 = [f32; 3];

/// 32-bit operation identifier: subsystem in the high half, operation in the low half.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Opcode(u32);

impl Opcode {
    /// Reserved identifier tagging reply frames of synchronous calls.
    pub const RETURN: Opcode = Opcode(u32::MAX);

    /// Packs `major:minor` into one opcode.
    pub const fn new(major: u16, minor: u16) -> Self {
        Self(((major as u32) << 16) | minor as u32)
    }

    /// Reinterprets a raw wire value.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw wire value.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Subsystem identifier.
    pub const fn major(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Operation identifier within the subsystem.
    pub const fn minor(self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    /// Returns `true` for majors handled by the shared (non game-specific) syscall families.
    pub const fn is_common(self) -> bool {
        let major = self.major();
        major != major::QVM && major < major::LAST_COMMON_SYSCALL
    }
}

impl fmt::Debug for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::RETURN {
            return f.write_str("Opcode(RETURN)");
        }
        write!(f, "Opcode({}:{})", self.major(), self.minor())
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::RETURN {
            return f.write_str("return");
        }
        write!(f, "{}:{}", self.major(), self.minor())
    }
}

/// Major (subsystem) identifiers.
pub mod major {
    /// Game-module family: lifecycle/client callbacks inbound, game syscalls outbound.
    pub const QVM: u16 = 0;
    /// Console command proxy shared by all VM types.
    pub const COMMAND: u16 = 1;
    /// Console variable proxy shared by all VM types.
    pub const CVAR: u16 = 2;
    /// First major that no VM type understands.
    pub const LAST_COMMON_SYSCALL: u16 = 3;
}

/// Inbound (host -> VM) game-module operations, major [`major::QVM`].
pub mod game {
    use super::{major, Opcode};

    /// Level start.
    pub const INIT: Opcode = Opcode::new(major::QVM, 0);
    /// Level end.
    pub const SHUTDOWN: Opcode = Opcode::new(major::QVM, 1);
    /// Client connection attempt.
    pub const CLIENT_CONNECT: Opcode = Opcode::new(major::QVM, 2);
    /// Client entered the game.
    pub const CLIENT_BEGIN: Opcode = Opcode::new(major::QVM, 3);
    /// Client userinfo string changed.
    pub const CLIENT_USERINFO_CHANGED: Opcode = Opcode::new(major::QVM, 4);
    /// Client left.
    pub const CLIENT_DISCONNECT: Opcode = Opcode::new(major::QVM, 5);
    /// Client issued a command.
    pub const CLIENT_COMMAND: Opcode = Opcode::new(major::QVM, 6);
    /// Client movement tick.
    pub const CLIENT_THINK: Opcode = Opcode::new(major::QVM, 7);
    /// Server frame.
    pub const RUN_FRAME: Opcode = Opcode::new(major::QVM, 8);
    /// Snapshot filtering callback (not supported by this ABI).
    pub const SNAPSHOT_CALLBACK: Opcode = Opcode::new(major::QVM, 9);
    /// Bot AI frame (not supported by this ABI).
    pub const BOTAI_START_FRAME: Opcode = Opcode::new(major::QVM, 10);
    /// Out-of-band client message (not supported by this ABI).
    pub const MESSAGE_RECEIVED: Opcode = Opcode::new(major::QVM, 11);
}

/// Outbound (VM -> host) game syscalls, major [`major::QVM`].
pub mod syscall {
    use super::{major, Opcode};

    macro_rules! syscalls {
        ($($(#[$meta:meta])* $name:ident = $minor:expr;)*) => {
            $($(#[$meta])* pub const $name: Opcode = Opcode::new(major::QVM, $minor);)*
        };
    }

    syscalls! {
        /// Console print.
        PRINT = 0;
        /// Fatal error report (one-way).
        ERROR = 1;
        /// Elapsed engine time.
        MILLISECONDS = 2;
        /// Queue console text.
        SEND_CONSOLE_COMMAND = 3;
        /// Open a file.
        FS_FOPEN_FILE = 4;
        /// Read from a file.
        FS_READ = 5;
        /// Write to a file.
        FS_WRITE = 6;
        /// Rename a file.
        FS_RENAME = 7;
        /// Close a file.
        FS_FCLOSE_FILE = 8;
        /// List files.
        FS_GET_FILE_LIST = 9;
        /// Check for a pak.
        FS_FIND_PAK = 10;
        /// Announce the shared region, transferring its handle.
        LOCATE_GAME_DATA1 = 11;
        /// Announce the shared region again (handle already known).
        LOCATE_GAME_DATA2 = 12;
        /// Link an entity into the world.
        LINK_ENTITY = 13;
        /// Unlink an entity.
        UNLINK_ENTITY = 14;
        /// Entities touching a box.
        ENTITIES_IN_BOX = 15;
        /// Box/entity contact test.
        ENTITY_CONTACT = 16;
        /// Sweep a box through the world.
        TRACE = 17;
        /// Contents at a point.
        POINT_CONTENTS = 18;
        /// Assign an inline brush model.
        SET_BRUSH_MODEL = 19;
        /// Potentially-visible-set test.
        IN_PVS = 20;
        /// PVS test ignoring area portals.
        IN_PVS_IGNORE_PORTALS = 21;
        /// Open/close an area portal.
        ADJUST_AREA_PORTAL_STATE = 22;
        /// Area connectivity.
        AREAS_CONNECTED = 23;
        /// Kick a client.
        DROP_CLIENT = 24;
        /// Reliable command to a client.
        SEND_SERVER_COMMAND = 25;
        /// Set a configstring.
        SET_CONFIGSTRING = 26;
        /// Get a configstring.
        GET_CONFIGSTRING = 27;
        /// Restrict configstring visibility (accepted, ignored by the host).
        SET_CONFIGSTRING_RESTRICTIONS = 28;
        /// Set a client's userinfo.
        SET_USERINFO = 29;
        /// Get a client's userinfo.
        GET_USERINFO = 30;
        /// Get the serverinfo string.
        GET_SERVERINFO = 31;
        /// Get a client's last usercmd.
        GET_USERCMD = 32;
        /// Next token of the map entity string.
        GET_ENTITY_TOKEN = 33;
        /// Submit a game statistic.
        SEND_GAME_STAT = 34;
        /// Look up a model tag.
        GET_TAG = 35;
        /// Load a tag file.
        REGISTER_TAG = 36;
        /// Raw message to a client.
        SEND_MESSAGE = 37;
        /// Delivery status of the last raw message.
        MESSAGE_STATUS = 38;
        /// Public key fingerprint.
        GEN_FINGERPRINT = 39;
        /// A client's public key.
        GET_PLAYER_PUBKEY = 40;
        /// Wall-clock time broken into fields.
        GM_TIME = 41;
        /// Locale-formatted time.
        GET_TIME_STRING = 42;
        /// Allocate a bot client slot.
        BOT_ALLOCATE_CLIENT = 43;
        /// Free a bot client slot.
        BOT_FREE_CLIENT = 44;
        /// Pop a server command queued for a bot.
        BOT_GET_CONSOLE_MESSAGE = 45;
        /// Load a navigation mesh.
        BOT_NAV_SETUP = 46;
        /// Unload all navigation meshes.
        BOT_NAV_SHUTDOWN = 47;
        /// Select a navigation mesh for a bot.
        BOT_SET_NAVMESH = 48;
        /// Plan a route.
        BOT_FIND_ROUTE = 49;
        /// Advance along the planned route.
        BOT_UPDATE_PATH = 50;
        /// Raycast over the navigation mesh.
        BOT_NAV_RAYCAST = 51;
        /// Random reachable point.
        BOT_NAV_RANDOM_POINT = 52;
        /// Random reachable point within a radius.
        BOT_NAV_RANDOM_POINT_RADIUS = 53;
        /// Enable navmesh polygons in a box.
        BOT_ENABLE_AREA = 54;
        /// Disable navmesh polygons in a box.
        BOT_DISABLE_AREA = 55;
        /// Add a temporary obstacle.
        BOT_ADD_OBSTACLE = 56;
        /// Remove a temporary obstacle.
        BOT_REMOVE_OBSTACLE = 57;
        /// Rebuild tiles touched by obstacles.
        BOT_UPDATE_OBSTACLES = 58;
    }
}

/// Console command proxy, major [`major::COMMAND`].
pub mod command {
    use super::{major, Opcode};

    /// VM -> host: make a VM-implemented command known to the console.
    pub const ADD_COMMAND: Opcode = Opcode::new(major::COMMAND, 0);
    /// VM -> host: forget a VM-implemented command.
    pub const REMOVE_COMMAND: Opcode = Opcode::new(major::COMMAND, 1);
    /// Host -> VM: run a VM-implemented command.
    pub const EXECUTE: Opcode = Opcode::new(major::COMMAND, 2);
}

/// Console variable proxy, major [`major::CVAR`].
pub mod cvar {
    use super::{major, Opcode};

    /// VM -> host: declare a cvar with its default.
    pub const REGISTER: Opcode = Opcode::new(major::CVAR, 0);
    /// VM -> host: read the current value.
    pub const GET_VALUE: Opcode = Opcode::new(major::CVAR, 1);
    /// VM -> host: assign a value.
    pub const SET_VALUE: Opcode = Opcode::new(major::CVAR, 2);
    /// Host -> VM: a registered cvar changed.
    pub const ON_VALUE_CHANGED: Opcode = Opcode::new(major::CVAR, 3);
}

/// Trace result value for "no entity hit".
pub const ENTITYNUM_NONE: i32 = MAX_GENTITIES as i32 - 1;
/// Trace result value for "world geometry hit".
pub const ENTITYNUM_WORLD: i32 = MAX_GENTITIES as i32 - 2;
/// Pass-entity value telling the host to ignore all entities in a trace.
pub const PASS_NO_ENTITIES: i32 = -2;

/// Longest reliable command text the host accepts per call, in bytes.
pub const MAX_SERVER_COMMAND_LEN: usize = 1022;

bitflags::bitflags! {
    /// Brush/entity contents mask used by traces and point queries.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ContentMask: u32 {
        /// Solid world geometry.
        const SOLID = 1 << 0;
        /// Lava volume.
        const LAVA = 1 << 3;
        /// Slime volume.
        const SLIME = 1 << 4;
        /// Water volume.
        const WATER = 1 << 5;
        /// Blocks players only.
        const PLAYERCLIP = 1 << 16;
        /// Blocks monsters/bots only.
        const MONSTERCLIP = 1 << 17;
        /// Entity body.
        const BODY = 1 << 25;
        /// Corpse.
        const CORPSE = 1 << 26;
        /// Trigger volume.
        const TRIGGER = 1 << 30;
    }
}

impl ContentMask {
    /// Mask used for player movement traces.
    pub const PLAYER_SOLID: ContentMask =
        ContentMask::SOLID.union(ContentMask::PLAYERCLIP).union(ContentMask::BODY);
}
