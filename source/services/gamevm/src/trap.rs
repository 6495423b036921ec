// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Outbound calls from game code into the host
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests + tests/e2e
//!
//! Every call is a synchronous rendezvous on the root channel: the host may call
//! back into the VM before answering, and those nested calls are served in place.
//!
//! CONTRACTS:
//!   - `error` sends one report (never recursively) and yields `VmError::Exit`
//!   - `send_server_command` refuses text over MAX_SERVER_COMMAND_LEN bytes; nothing is sent
//!   - String results requested with a buffer size are clamped to `size - 1` bytes
//!   - `fs_read` / `entities_in_box` results never exceed the requested count

use log::{error, warn};
use vm_abi::{
    ClientRecord, ContentMask, EntityRecord, Vec3, MAX_CLIENTS, MAX_SERVER_COMMAND_LEN,
    PASS_NO_ENTITIES,
};
use vm_ipc::rpc;
use vm_ipc::{Blob, Request};

use crate::error::{VmError, VmResult};
use crate::messages::*;
use crate::module::GameModule;
use crate::runtime::VmContext;

/// Cuts `text` to at most `buffer_size - 1` bytes on a char boundary.
pub fn clamp_to_buffer(mut text: String, buffer_size: usize) -> String {
    let limit = buffer_size.saturating_sub(1);
    if text.len() > limit {
        let mut cut = limit;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

fn wire_len(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

fn wire_index(index: usize) -> i32 {
    i32::try_from(index).unwrap_or(-1)
}

impl<G: GameModule> VmContext<G> {
    fn call<M: Request>(&mut self, args: M::Args) -> VmResult<M::Reply> {
        rpc::call::<_, M>(self, &args)
    }

    /// Console print.
    pub fn print(&mut self, text: &str) -> VmResult<()> {
        self.call::<Print>(text.to_owned())
    }

    /// Reports a fatal error to the host and returns the exit signal.
    ///
    /// A second report (an error raised while reporting) skips the send.
    pub fn error(&mut self, text: &str) -> VmError {
        if self.error_reported {
            return VmError::Exit;
        }
        self.error_reported = true;
        error!("gamevm: {text}");
        if let Err(err) = rpc::post::<_, ErrorMsg>(&*self, &text.to_owned()) {
            warn!("gamevm: error report not delivered: {err}");
        }
        VmError::Exit
    }

    /// Milliseconds since the host started.
    pub fn milliseconds(&mut self) -> VmResult<i32> {
        self.call::<Milliseconds>(())
    }

    /// Queues console text on the host.
    pub fn send_console_command(&mut self, when: ExecWhen, text: &str) -> VmResult<()> {
        self.call::<SendConsoleCommand>((when as i32, text.to_owned()))
    }

    /// Opens `path`. Returns the file length and, when `open` is set, the handle.
    pub fn fs_fopen(&mut self, path: &str, mode: FsMode, open: bool) -> VmResult<(i32, Option<i32>)> {
        let (length, handle) = self.call::<FsFOpenFile>((path.to_owned(), open, mode as i32))?;
        Ok((length, open.then_some(handle)))
    }

    /// Reads up to `len` bytes.
    pub fn fs_read(&mut self, handle: i32, len: usize) -> VmResult<Vec<u8>> {
        let Blob(mut data) = self.call::<FsRead>((handle, wire_len(len)))?;
        data.truncate(len);
        Ok(data)
    }

    /// Writes `data`; returns the bytes written.
    pub fn fs_write(&mut self, handle: i32, data: &[u8]) -> VmResult<i32> {
        self.call::<FsWrite>((handle, Blob(data.to_vec())))
    }

    /// Renames a file.
    pub fn fs_rename(&mut self, from: &str, to: &str) -> VmResult<()> {
        self.call::<FsRename>((from.to_owned(), to.to_owned()))
    }

    /// Closes a handle.
    pub fn fs_fclose(&mut self, handle: i32) -> VmResult<()> {
        self.call::<FsFCloseFile>(handle)
    }

    /// Lists files; returns the count and the NUL-separated names clamped to `buffer_size`.
    pub fn fs_get_file_list(
        &mut self,
        path: &str,
        extension: &str,
        buffer_size: usize,
    ) -> VmResult<(i32, String)> {
        let (count, list) =
            self.call::<FsGetFileList>((path.to_owned(), extension.to_owned(), wire_len(buffer_size)))?;
        Ok((count, clamp_to_buffer(list, buffer_size)))
    }

    /// Whether a pak of that name is loaded.
    pub fn fs_find_pak(&mut self, name: &str) -> VmResult<bool> {
        self.call::<FsFindPak>(name.to_owned())
    }

    /// Tells the host where the entity and client tables are.
    ///
    /// The first call transfers the region handle; later calls only update the
    /// active entity count.
    pub fn locate_game_data(&mut self, num_entities: usize) -> VmResult<()> {
        let layout = self.game_data.layout();
        if num_entities > layout.entity_count {
            return Err(self.error(&format!(
                "locate_game_data: {num_entities} entities exceed capacity {}",
                layout.entity_count
            )));
        }
        let counts = (
            wire_index(num_entities),
            wire_len(core::mem::size_of::<EntityRecord>()),
            wire_len(core::mem::size_of::<ClientRecord>()),
        );
        if self.region_announced {
            return self.call::<LocateGameData2>(counts);
        }
        self.call::<LocateGameData1>((self.game_data.handle(), counts.0, counts.1, counts.2))?;
        self.region_announced = true;
        Ok(())
    }

    /// Links entity `index` into the world.
    pub fn link_entity(&mut self, index: usize) -> VmResult<()> {
        self.call::<LinkEntity>(wire_index(index))
    }

    /// Unlinks entity `index`.
    pub fn unlink_entity(&mut self, index: usize) -> VmResult<()> {
        self.call::<UnlinkEntity>(wire_index(index))
    }

    /// Entities whose bounds touch the box, at most `max_count`.
    pub fn entities_in_box(&mut self, mins: Vec3, maxs: Vec3, max_count: usize) -> VmResult<Vec<i32>> {
        let mut list = self.call::<EntitiesInBox>((mins, maxs, wire_len(max_count)))?;
        list.truncate(max_count);
        Ok(list)
    }

    /// Whether entity `index` touches the box.
    pub fn entity_contact(&mut self, mins: Vec3, maxs: Vec3, index: usize) -> VmResult<bool> {
        Ok(self.call::<EntityContact>((mins, maxs, wire_index(index)))? != 0)
    }

    /// Sweeps a box from `start` to `end`; missing bounds mean a point trace.
    pub fn trace(
        &mut self,
        start: Vec3,
        mins: Option<Vec3>,
        maxs: Option<Vec3>,
        end: Vec3,
        pass_entity: i32,
        mask: ContentMask,
    ) -> VmResult<TraceResult> {
        self.call::<Trace>((
            start,
            mins.unwrap_or_default(),
            maxs.unwrap_or_default(),
            end,
            pass_entity,
            mask.bits(),
        ))
    }

    /// [`trace`](Self::trace) ignoring every entity.
    pub fn trace_no_ents(
        &mut self,
        start: Vec3,
        mins: Option<Vec3>,
        maxs: Option<Vec3>,
        end: Vec3,
        mask: ContentMask,
    ) -> VmResult<TraceResult> {
        self.trace(start, mins, maxs, end, PASS_NO_ENTITIES, mask)
    }

    /// Contents at `point`.
    pub fn point_contents(&mut self, point: Vec3, pass_entity: i32) -> VmResult<ContentMask> {
        Ok(ContentMask::from_bits_retain(self.call::<PointContents>((point, pass_entity))?))
    }

    /// Assigns an inline model to entity `index`.
    pub fn set_brush_model(&mut self, index: usize, name: &str) -> VmResult<()> {
        self.call::<SetBrushModel>((wire_index(index), name.to_owned()))
    }

    /// PVS test.
    pub fn in_pvs(&mut self, a: Vec3, b: Vec3) -> VmResult<bool> {
        self.call::<InPvs>((a, b))
    }

    /// PVS test ignoring area portals.
    pub fn in_pvs_ignore_portals(&mut self, a: Vec3, b: Vec3) -> VmResult<bool> {
        self.call::<InPvsIgnorePortals>((a, b))
    }

    /// Opens or closes the portal owned by entity `index`.
    pub fn adjust_area_portal_state(&mut self, index: usize, open: bool) -> VmResult<()> {
        self.call::<AdjustAreaPortalState>((wire_index(index), open))
    }

    /// Whether two areas are connected.
    pub fn areas_connected(&mut self, area1: i32, area2: i32) -> VmResult<bool> {
        self.call::<AreasConnected>((area1, area2))
    }

    /// Kicks a client.
    pub fn drop_client(&mut self, client: i32, reason: &str) -> VmResult<()> {
        self.call::<DropClient>((client, reason.to_owned()))
    }

    /// Sends a reliable command; `client = -1` broadcasts.
    ///
    /// Text longer than [`MAX_SERVER_COMMAND_LEN`] bytes is refused with a
    /// warning and `Ok(false)`; nothing reaches the host.
    pub fn send_server_command(&mut self, client: i32, text: &str) -> VmResult<bool> {
        if text.len() > MAX_SERVER_COMMAND_LEN {
            let preview = clamp_to_buffer(text.to_owned(), 951);
            warn!(
                "gamevm: send_server_command({client}, ...) length {} exceeds {MAX_SERVER_COMMAND_LEN}",
                text.len()
            );
            warn!("gamevm: text [{preview}]... truncated");
            return Ok(false);
        }
        self.call::<SendServerCommand>((client, text.to_owned()))?;
        Ok(true)
    }

    /// Sets configstring `index`.
    pub fn set_configstring(&mut self, index: i32, value: &str) -> VmResult<()> {
        self.call::<SetConfigString>((index, value.to_owned()))
    }

    /// Reads configstring `index`, clamped to `buffer_size`.
    pub fn get_configstring(&mut self, index: i32, buffer_size: usize) -> VmResult<String> {
        let value = self.call::<GetConfigString>((index, wire_len(buffer_size)))?;
        Ok(clamp_to_buffer(value, buffer_size))
    }

    /// Accepted by the host and ignored.
    pub fn set_configstring_restrictions(&mut self) -> VmResult<()> {
        self.call::<SetConfigStringRestrictions>(())
    }

    /// Replaces a client's userinfo.
    pub fn set_userinfo(&mut self, client: i32, userinfo: &str) -> VmResult<()> {
        self.call::<SetUserinfo>((client, userinfo.to_owned()))
    }

    /// Reads a client's userinfo, clamped to `buffer_size`.
    pub fn get_userinfo(&mut self, client: i32, buffer_size: usize) -> VmResult<String> {
        let value = self.call::<GetUserinfo>((client, wire_len(buffer_size)))?;
        Ok(clamp_to_buffer(value, buffer_size))
    }

    /// Reads the serverinfo string, clamped to `buffer_size`.
    pub fn get_serverinfo(&mut self, buffer_size: usize) -> VmResult<String> {
        let value = self.call::<GetServerinfo>(wire_len(buffer_size))?;
        Ok(clamp_to_buffer(value, buffer_size))
    }

    /// Latest input of a client.
    pub fn get_usercmd(&mut self, client: i32) -> VmResult<UserCmd> {
        if !(0..MAX_CLIENTS as i32).contains(&client) {
            return Err(self.error(&format!("get_usercmd: bad client {client}")));
        }
        self.call::<GetUsercmd>(client)
    }

    /// Next token of the map entity string; `None` once exhausted.
    pub fn get_entity_token(&mut self, buffer_size: usize) -> VmResult<Option<String>> {
        let (more, token) = self.call::<GetEntityToken>(())?;
        Ok(more.then(|| clamp_to_buffer(token, buffer_size)))
    }

    /// Submits a statistic line.
    pub fn send_game_stat(&mut self, data: &str) -> VmResult<()> {
        self.call::<SendGameStat>(data.to_owned())
    }

    /// Looks up a tag on a client's model.
    pub fn get_tag(&mut self, client: i32, tag_file: i32, name: &str) -> VmResult<Option<Orientation>> {
        let (found, orientation) = self.call::<GetTag>((client, tag_file, name.to_owned()))?;
        Ok((found != 0).then_some(orientation))
    }

    /// Loads a tag file.
    pub fn load_tag(&mut self, filename: &str) -> VmResult<bool> {
        Ok(self.call::<RegisterTag>(filename.to_owned())? != 0)
    }

    /// Sends raw bytes to a client.
    pub fn send_message(&mut self, client: i32, data: &[u8]) -> VmResult<()> {
        self.call::<SendMessage>((client, wire_len(data.len()), Blob(data.to_vec())))
    }

    /// Delivery status of the last raw message.
    pub fn message_status(&mut self, client: i32) -> VmResult<i32> {
        self.call::<MessageStatus>(client)
    }

    /// Fingerprint of a public key, clamped to `buffer_size`.
    pub fn gen_fingerprint(&mut self, pubkey: &[u8], buffer_size: usize) -> VmResult<String> {
        let fingerprint = self.call::<GenFingerprint>((
            wire_len(pubkey.len()),
            Blob(pubkey.to_vec()),
            wire_len(buffer_size),
        ))?;
        Ok(clamp_to_buffer(fingerprint, buffer_size))
    }

    /// Public key of a client, clamped to `buffer_size`.
    pub fn get_player_pubkey(&mut self, client: i32, buffer_size: usize) -> VmResult<String> {
        let key = self.call::<GetPlayerPubkey>((client, wire_len(buffer_size)))?;
        Ok(clamp_to_buffer(key, buffer_size))
    }

    /// Current UTC time: seconds since the epoch plus broken-down fields.
    pub fn gm_time(&mut self) -> VmResult<(i32, QTime)> {
        self.call::<GmTime>(())
    }

    /// Formats `time` with a strftime-style `format`, clamped to `buffer_size`.
    pub fn get_time_string(&mut self, buffer_size: usize, format: &str, time: &QTime) -> VmResult<String> {
        let text = self.call::<GetTimeString>((wire_len(buffer_size), format.to_owned(), time.clone()))?;
        Ok(clamp_to_buffer(text, buffer_size))
    }

    /// Registers a console command the host forwards back through `COMMAND/EXECUTE`.
    pub fn add_command(&mut self, name: &str) -> VmResult<()> {
        self.call::<AddCommand>(name.to_owned())?;
        self.commands.insert(name.to_owned());
        Ok(())
    }

    /// Unregisters a console command.
    pub fn remove_command(&mut self, name: &str) -> VmResult<()> {
        self.call::<RemoveCommand>(name.to_owned())?;
        self.commands.remove(name);
        Ok(())
    }

    /// Declares a cvar; its default seeds the local cache.
    pub fn register_cvar(&mut self, name: &str, description: &str, flags: i32, default: &str) -> VmResult<()> {
        self.call::<RegisterCvar>((name.to_owned(), description.to_owned(), flags, default.to_owned()))?;
        self.cvars.entry(name.to_owned()).or_insert_with(|| default.to_owned());
        Ok(())
    }

    /// Reads a cvar from the host and refreshes the cache.
    pub fn get_cvar(&mut self, name: &str) -> VmResult<String> {
        let value = self.call::<GetCvar>(name.to_owned())?;
        self.cvars.insert(name.to_owned(), value.clone());
        Ok(value)
    }

    /// Assigns a cvar.
    pub fn set_cvar(&mut self, name: &str, value: &str) -> VmResult<()> {
        self.call::<SetCvar>((name.to_owned(), value.to_owned()))?;
        self.cvars.insert(name.to_owned(), value.to_owned());
        Ok(())
    }

    /// Claims a bot slot; returns the slot or a negative value.
    pub fn bot_allocate_client(&mut self, client: i32) -> VmResult<i32> {
        self.call::<BotAllocateClient>(client)
    }

    /// Releases a bot slot.
    pub fn bot_free_client(&mut self, client: i32) -> VmResult<()> {
        self.call::<BotFreeClient>(client)
    }

    /// Pops a server command queued for a bot, clamped to `buffer_size`.
    pub fn bot_get_server_command(&mut self, client: i32, buffer_size: usize) -> VmResult<Option<String>> {
        let (available, text) = self.call::<BotGetConsoleMessage>((client, wire_len(buffer_size)))?;
        Ok((available != 0).then(|| clamp_to_buffer(text, buffer_size)))
    }

    /// Loads the mesh for a bot class; returns its handle.
    pub fn bot_setup_nav(&mut self, class: &BotClass) -> VmResult<Option<i32>> {
        let (ok, handle) = self.call::<BotNavSetup>(class.clone())?;
        Ok((ok != 0).then_some(handle))
    }

    /// Unloads all meshes.
    pub fn bot_shutdown_nav(&mut self) -> VmResult<()> {
        self.call::<BotNavShutdown>(())
    }

    /// Selects a mesh for a bot.
    pub fn bot_set_nav_mesh(&mut self, client: i32, nav_handle: i32) -> VmResult<()> {
        self.call::<BotSetNavmesh>((client, nav_handle))
    }

    /// Plans a route.
    pub fn bot_find_route(&mut self, client: i32, target: &BotRouteTarget, allow_partial: bool) -> VmResult<bool> {
        Ok(self.call::<BotFindRoute>((client, target.clone(), allow_partial))? != 0)
    }

    /// Advances along the planned route.
    pub fn bot_update_path(&mut self, client: i32, target: &BotRouteTarget) -> VmResult<BotNavCmd> {
        self.call::<BotUpdatePath>((client, target.clone()))
    }

    /// Raycast over the mesh; `Some` on hit.
    pub fn bot_nav_trace(&mut self, client: i32, start: Vec3, end: Vec3) -> VmResult<Option<BotTrace>> {
        let (hit, trace) = self.call::<BotNavRaycast>((client, start, end))?;
        Ok((hit != 0).then_some(trace))
    }

    /// Random reachable point.
    pub fn bot_find_random_point(&mut self, client: i32) -> VmResult<Vec3> {
        self.call::<BotNavRandomPoint>(client)
    }

    /// Random reachable point within `radius` of `origin`.
    pub fn bot_find_random_point_in_radius(
        &mut self,
        client: i32,
        origin: Vec3,
        radius: f32,
    ) -> VmResult<Option<Vec3>> {
        let (found, point) = self.call::<BotNavRandomPointRadius>((client, origin, radius))?;
        Ok((found != 0).then_some(point))
    }

    /// Enables mesh polygons in a box.
    pub fn bot_enable_area(&mut self, origin: Vec3, mins: Vec3, maxs: Vec3) -> VmResult<()> {
        self.call::<BotEnableArea>((origin, mins, maxs))
    }

    /// Disables mesh polygons in a box.
    pub fn bot_disable_area(&mut self, origin: Vec3, mins: Vec3, maxs: Vec3) -> VmResult<()> {
        self.call::<BotDisableArea>((origin, mins, maxs))
    }

    /// Adds a temporary obstacle; returns its handle.
    pub fn bot_add_obstacle(&mut self, mins: Vec3, maxs: Vec3) -> VmResult<i32> {
        self.call::<BotAddObstacle>((mins, maxs))
    }

    /// Removes an obstacle.
    pub fn bot_remove_obstacle(&mut self, handle: i32) -> VmResult<()> {
        self.call::<BotRemoveObstacle>(handle)
    }

    /// Rebuilds tiles touched by obstacles.
    pub fn bot_update_obstacles(&mut self) -> VmResult<()> {
        self.call::<BotUpdateObstacles>(())
    }
}
