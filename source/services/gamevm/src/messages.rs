// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Message catalogue of the game VM interface
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (covered by GAME_API_VERSION)
//! TEST_COVERAGE: Unit tests
//!
//! Every operation is a zero-sized marker type implementing `vm_ipc::Message`,
//! so the host and the VM share one definition of each opcode's argument and
//! reply shape. Argument tuples follow the call's parameter order; replies carry
//! the return value first, then any out-parameters.

use vm_abi::{command, cvar, game, syscall, Opcode, Vec3};
use vm_ipc::{wire_record, Blob, Message, OneWay, OsHandle, Reader, Request, Wire, WireError, Writer};

macro_rules! messages {
    ($($(#[$meta:meta])* $name:ident = $opcode:expr; $args:ty => $reply:ty;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug)]
            pub enum $name {}

            impl Message for $name {
                const OPCODE: Opcode = $opcode;
                const NAME: &'static str = stringify!($name);
                type Args = $args;
                type Reply = $reply;
            }

            impl Request for $name {}
        )*
    };
}

wire_record! {
    /// Result of a box sweep.
    #[derive(Clone, Debug, Default, PartialEq)]
    pub struct TraceResult {
        /// The whole sweep was inside solid.
        pub all_solid: bool,
        /// The start point was inside solid.
        pub start_solid: bool,
        /// Fraction of the sweep completed, 1.0 when nothing was hit.
        pub fraction: f32,
        /// Final position.
        pub end_pos: Vec3,
        /// Normal of the surface hit.
        pub plane_normal: Vec3,
        /// Distance of the plane hit.
        pub plane_dist: f32,
        /// Surface flags of the surface hit.
        pub surface_flags: i32,
        /// Contents of the surface hit.
        pub contents: u32,
        /// Entity hit, `ENTITYNUM_WORLD` or `ENTITYNUM_NONE`.
        pub entity_num: i32,
    }
}

wire_record! {
    /// One client input sample.
    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    pub struct UserCmd {
        /// Server time the command applies to.
        pub server_time: i32,
        /// View angles, short-encoded.
        pub angles: [i32; 3],
        /// Pressed buttons.
        pub buttons: i32,
        /// Selected weapon.
        pub weapon: u8,
        /// Forward/back movement.
        pub forward_move: i8,
        /// Strafe movement.
        pub right_move: i8,
        /// Jump/crouch movement.
        pub up_move: i8,
    }
}

wire_record! {
    /// Position plus orientation axes.
    #[derive(Clone, Debug, Default, PartialEq)]
    pub struct Orientation {
        /// Origin.
        pub origin: Vec3,
        /// Forward, left and up axes.
        pub axis: [Vec3; 3],
    }
}

wire_record! {
    /// Broken-down wall-clock time.
    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    pub struct QTime {
        /// Seconds.
        pub sec: i32,
        /// Minutes.
        pub min: i32,
        /// Hours.
        pub hour: i32,
        /// Day of month.
        pub mday: i32,
        /// Month, zero-based.
        pub mon: i32,
        /// Years since 1900.
        pub year: i32,
        /// Day of week.
        pub wday: i32,
        /// Day of year.
        pub yday: i32,
        /// Daylight saving flag.
        pub isdst: i32,
    }
}

wire_record! {
    /// Navigation mesh selector for a bot class.
    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    pub struct BotClass {
        /// Mesh name.
        pub name: String,
        /// Polygon flags the bot may walk on.
        pub polyflags_include: u16,
        /// Polygon flags the bot must avoid.
        pub polyflags_exclude: u16,
    }
}

wire_record! {
    /// Route goal.
    #[derive(Clone, Debug, Default, PartialEq)]
    pub struct BotRouteTarget {
        /// Goal kind (position or entity).
        pub kind: i32,
        /// Goal position.
        pub pos: Vec3,
        /// Half extents used to snap the goal onto the mesh.
        pub poly_extents: Vec3,
    }
}

wire_record! {
    /// Steering output for one path step.
    #[derive(Clone, Debug, Default, PartialEq)]
    pub struct BotNavCmd {
        /// Current position on the mesh.
        pub pos: Vec3,
        /// Next corner to steer towards.
        pub tpos: Vec3,
        /// Direction to the next corner.
        pub dir: Vec3,
        /// Non-zero when the goal is directly reachable.
        pub direct_path_to_goal: i32,
        /// Non-zero when a path exists.
        pub have_path: i32,
    }
}

wire_record! {
    /// Navigation mesh raycast hit.
    #[derive(Clone, Debug, Default, PartialEq)]
    pub struct BotTrace {
        /// Fraction of the ray travelled.
        pub frac: f32,
        /// Wall normal at the hit.
        pub normal: Vec3,
    }
}

/// Outcome of a connection attempt.
///
/// Wire form: `denied: bool`, followed by `reason: string` only when denied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectVerdict {
    /// Client may join.
    Allowed,
    /// Client is refused with a reason shown to the player.
    Denied(String),
}

impl ConnectVerdict {
    /// Returns `true` for [`ConnectVerdict::Denied`].
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied(_))
    }
}

impl Wire for ConnectVerdict {
    fn encode(&self, w: &mut Writer) {
        match self {
            Self::Allowed => {
                w.write(&false);
            }
            Self::Denied(reason) => {
                w.write(&true).write(reason);
            }
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        if r.read::<bool>()? {
            Ok(Self::Denied(r.read()?))
        } else {
            Ok(Self::Allowed)
        }
    }
}

/// When the host runs console text queued by the VM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum ExecWhen {
    /// Run immediately.
    Now = 0,
    /// Insert at the front of the command buffer.
    Insert = 1,
    /// Append to the command buffer.
    Append = 2,
}

/// File open mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum FsMode {
    /// Read only.
    Read = 0,
    /// Create or truncate.
    Write = 1,
    /// Create or append.
    Append = 2,
    /// Append and flush after every write.
    AppendSync = 3,
}

/// Fatal error report; the VM exits right after sending it, so nothing waits for a reply.
#[derive(Debug)]
pub enum ErrorMsg {}

impl Message for ErrorMsg {
    const OPCODE: Opcode = syscall::ERROR;
    const NAME: &'static str = "ErrorMsg";
    type Args = String;
    type Reply = ();
}

impl OneWay for ErrorMsg {}

messages! {
    // Host -> VM, game family.

    /// Start a level.
    GameInit = game::INIT; (i32, i32, bool) => ();
    /// Tear the level down.
    GameShutdown = game::SHUTDOWN; bool => ();
    /// Client connection attempt: `(client, first_time, is_bot)`.
    GameClientConnect = game::CLIENT_CONNECT; (i32, bool, i32) => ConnectVerdict;
    /// Client entered the game.
    GameClientBegin = game::CLIENT_BEGIN; i32 => ();
    /// Client userinfo changed.
    GameClientUserinfoChanged = game::CLIENT_USERINFO_CHANGED; i32 => ();
    /// Client left.
    GameClientDisconnect = game::CLIENT_DISCONNECT; i32 => ();
    /// Client command text.
    GameClientCommand = game::CLIENT_COMMAND; (i32, String) => ();
    /// Run queued usercmds of a client.
    GameClientThink = game::CLIENT_THINK; i32 => ();
    /// Advance the simulation.
    GameRunFrame = game::RUN_FRAME; i32 => ();

    // Common families.

    /// VM -> host: register a console command implemented by the VM.
    AddCommand = command::ADD_COMMAND; String => ();
    /// VM -> host: unregister a console command.
    RemoveCommand = command::REMOVE_COMMAND; String => ();
    /// Host -> VM: run a VM console command; args[0] is its name.
    ExecuteCommand = command::EXECUTE; Vec<String> => ();
    /// VM -> host: `(name, description, flags, default)`.
    RegisterCvar = cvar::REGISTER; (String, String, i32, String) => ();
    /// VM -> host: current value of a cvar.
    GetCvar = cvar::GET_VALUE; String => String;
    /// VM -> host: assign a cvar.
    SetCvar = cvar::SET_VALUE; (String, String) => ();
    /// Host -> VM: a registered cvar changed.
    CvarOnValueChanged = cvar::ON_VALUE_CHANGED; (String, String) => ();

    // VM -> host, game syscalls.

    /// Console print.
    Print = syscall::PRINT; String => ();
    /// Engine milliseconds.
    Milliseconds = syscall::MILLISECONDS; () => i32;
    /// `(exec_when, text)`.
    SendConsoleCommand = syscall::SEND_CONSOLE_COMMAND; (i32, String) => ();
    /// `(path, want_handle, mode) -> (length, handle)`.
    FsFOpenFile = syscall::FS_FOPEN_FILE; (String, bool, i32) => (i32, i32);
    /// `(handle, len) -> bytes`.
    FsRead = syscall::FS_READ; (i32, i32) => Blob;
    /// `(handle, bytes) -> written`.
    FsWrite = syscall::FS_WRITE; (i32, Blob) => i32;
    /// `(from, to)`.
    FsRename = syscall::FS_RENAME; (String, String) => ();
    /// Close a handle.
    FsFCloseFile = syscall::FS_FCLOSE_FILE; i32 => ();
    /// `(path, extension, buffer_size) -> (count, NUL-separated names)`.
    FsGetFileList = syscall::FS_GET_FILE_LIST; (String, String, i32) => (i32, String);
    /// Is the named pak loaded.
    FsFindPak = syscall::FS_FIND_PAK; String => bool;
    /// `(region, num_entities, entity_size, client_size)`.
    LocateGameData1 = syscall::LOCATE_GAME_DATA1; (OsHandle, i32, i32, i32) => ();
    /// `(num_entities, entity_size, client_size)`; region already known.
    LocateGameData2 = syscall::LOCATE_GAME_DATA2; (i32, i32, i32) => ();
    /// Link entity by index.
    LinkEntity = syscall::LINK_ENTITY; i32 => ();
    /// Unlink entity by index.
    UnlinkEntity = syscall::UNLINK_ENTITY; i32 => ();
    /// `(mins, maxs, max_count) -> entity numbers`.
    EntitiesInBox = syscall::ENTITIES_IN_BOX; (Vec3, Vec3, i32) => Vec<i32>;
    /// `(mins, maxs, entity) -> touching`.
    EntityContact = syscall::ENTITY_CONTACT; (Vec3, Vec3, i32) => i32;
    /// `(start, mins, maxs, end, pass_entity, content_mask)`.
    Trace = syscall::TRACE; (Vec3, Vec3, Vec3, Vec3, i32, u32) => TraceResult;
    /// `(point, pass_entity) -> contents`.
    PointContents = syscall::POINT_CONTENTS; (Vec3, i32) => u32;
    /// `(entity, model_name)`.
    SetBrushModel = syscall::SET_BRUSH_MODEL; (i32, String) => ();
    /// PVS test between two points.
    InPvs = syscall::IN_PVS; (Vec3, Vec3) => bool;
    /// PVS test ignoring portals.
    InPvsIgnorePortals = syscall::IN_PVS_IGNORE_PORTALS; (Vec3, Vec3) => bool;
    /// `(entity, open)`.
    AdjustAreaPortalState = syscall::ADJUST_AREA_PORTAL_STATE; (i32, bool) => ();
    /// `(area1, area2) -> connected`.
    AreasConnected = syscall::AREAS_CONNECTED; (i32, i32) => bool;
    /// `(client, reason)`.
    DropClient = syscall::DROP_CLIENT; (i32, String) => ();
    /// `(client, text)`; client -1 broadcasts.
    SendServerCommand = syscall::SEND_SERVER_COMMAND; (i32, String) => ();
    /// `(index, value)`.
    SetConfigString = syscall::SET_CONFIGSTRING; (i32, String) => ();
    /// `(index, buffer_size) -> value`.
    GetConfigString = syscall::GET_CONFIGSTRING; (i32, i32) => String;
    /// Accepted and ignored by the host.
    SetConfigStringRestrictions = syscall::SET_CONFIGSTRING_RESTRICTIONS; () => ();
    /// `(client, userinfo)`.
    SetUserinfo = syscall::SET_USERINFO; (i32, String) => ();
    /// `(client, buffer_size) -> userinfo`.
    GetUserinfo = syscall::GET_USERINFO; (i32, i32) => String;
    /// `buffer_size -> serverinfo`.
    GetServerinfo = syscall::GET_SERVERINFO; i32 => String;
    /// Last usercmd of a client.
    GetUsercmd = syscall::GET_USERCMD; i32 => UserCmd;
    /// `-> (more, token)`.
    GetEntityToken = syscall::GET_ENTITY_TOKEN; () => (bool, String);
    /// Statistic line.
    SendGameStat = syscall::SEND_GAME_STAT; String => ();
    /// `(client, tag_file, tag_name) -> (found, orientation)`.
    GetTag = syscall::GET_TAG; (i32, i32, String) => (i32, Orientation);
    /// `file -> loaded`.
    RegisterTag = syscall::REGISTER_TAG; String => i32;
    /// `(client, len, bytes)`.
    SendMessage = syscall::SEND_MESSAGE; (i32, i32, Blob) => ();
    /// `client -> status`.
    MessageStatus = syscall::MESSAGE_STATUS; i32 => i32;
    /// `(key_len, key, buffer_size) -> fingerprint`.
    GenFingerprint = syscall::GEN_FINGERPRINT; (i32, Blob, i32) => String;
    /// `(client, buffer_size) -> key`.
    GetPlayerPubkey = syscall::GET_PLAYER_PUBKEY; (i32, i32) => String;
    /// `-> (unix_time, broken_down)`.
    GmTime = syscall::GM_TIME; () => (i32, QTime);
    /// `(buffer_size, format, time) -> text`.
    GetTimeString = syscall::GET_TIME_STRING; (i32, String, QTime) => String;

    // VM -> host, bot navigation.

    /// `client -> allocated slot`.
    BotAllocateClient = syscall::BOT_ALLOCATE_CLIENT; i32 => i32;
    /// Release a bot slot.
    BotFreeClient = syscall::BOT_FREE_CLIENT; i32 => ();
    /// `(client, buffer_size) -> (available, text)`.
    BotGetConsoleMessage = syscall::BOT_GET_CONSOLE_MESSAGE; (i32, i32) => (i32, String);
    /// `class -> (ok, nav_handle)`.
    BotNavSetup = syscall::BOT_NAV_SETUP; BotClass => (i32, i32);
    /// Unload all meshes.
    BotNavShutdown = syscall::BOT_NAV_SHUTDOWN; () => ();
    /// `(client, nav_handle)`.
    BotSetNavmesh = syscall::BOT_SET_NAVMESH; (i32, i32) => ();
    /// `(client, target, allow_partial) -> found`.
    BotFindRoute = syscall::BOT_FIND_ROUTE; (i32, BotRouteTarget, bool) => i32;
    /// `(client, target) -> steering`.
    BotUpdatePath = syscall::BOT_UPDATE_PATH; (i32, BotRouteTarget) => BotNavCmd;
    /// `(client, start, end) -> (hit, trace)`.
    BotNavRaycast = syscall::BOT_NAV_RAYCAST; (i32, Vec3, Vec3) => (i32, BotTrace);
    /// `client -> point`.
    BotNavRandomPoint = syscall::BOT_NAV_RANDOM_POINT; i32 => Vec3;
    /// `(client, origin, radius) -> (found, point)`.
    BotNavRandomPointRadius = syscall::BOT_NAV_RANDOM_POINT_RADIUS; (i32, Vec3, f32) => (i32, Vec3);
    /// `(origin, mins, maxs)`.
    BotEnableArea = syscall::BOT_ENABLE_AREA; (Vec3, Vec3, Vec3) => ();
    /// `(origin, mins, maxs)`.
    BotDisableArea = syscall::BOT_DISABLE_AREA; (Vec3, Vec3, Vec3) => ();
    /// `(mins, maxs) -> obstacle handle`.
    BotAddObstacle = syscall::BOT_ADD_OBSTACLE; (Vec3, Vec3) => i32;
    /// Remove an obstacle.
    BotRemoveObstacle = syscall::BOT_REMOVE_OBSTACLE; i32 => ();
    /// Rebuild obstacle tiles.
    BotUpdateObstacles = syscall::BOT_UPDATE_OBSTACLES; () => ();
}
