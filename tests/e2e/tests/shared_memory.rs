// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Game data region shared over a Unix socketpair
//! INTENT: The first announcement carries the region handle; both sides see the same records

use std::mem::size_of;

use gamevm::messages::{GameClientConnect, GameClientDisconnect, GameInit, GameRunFrame};
use gamevm::{ConnectVerdict, GameModule, NullGame, VmContext, VmResult};
use gamevm_e2e::{accept, spawn_vm_unix, HostState};
use vm_abi::{ClientRecord, EntityRecord, ENTITYNUM_WORLD, MAX_CLIENTS, MAX_GENTITIES};

#[test]
fn host_maps_the_announced_region() {
    let (channel, vm) = spawn_vm_unix(NullGame::default());
    let mut host = accept(channel, HostState::default());
    assert!(host.game_data().is_none());

    host.call::<GameInit>(&(0, 1, false)).expect("init");
    let data = host.game_data().expect("region mapped");
    assert_eq!(data.layout().client_offset(), MAX_GENTITIES * size_of::<EntityRecord>());
    assert_eq!(host.active_entities(), MAX_CLIENTS);
    let world = data.entity(ENTITYNUM_WORLD as usize).expect("world entity");
    assert_eq!(world.number, ENTITYNUM_WORLD);

    let verdict = host.call::<GameClientConnect>(&(5, true, 0)).expect("connect");
    assert_eq!(verdict, ConnectVerdict::Allowed);
    let data = host.game_data().expect("region mapped");
    assert_eq!(data.client(5).expect("client 5").client_num, 5);

    host.call::<GameClientDisconnect>(&5).expect("disconnect");
    let data = host.game_data().expect("region mapped");
    assert_eq!(*data.client(5).expect("client 5"), ClientRecord::default());

    drop(host);
    vm.join().expect("vm thread").expect_err("peer closed");
}

/// Grows its entity count every frame and re-announces it.
#[derive(Default)]
struct Spawner {
    active: usize,
}

impl GameModule for Spawner {
    fn init(vm: &mut VmContext<Self>, _level_time: i32, _seed: i32, _restart: bool) -> VmResult<()> {
        vm.game.active = MAX_CLIENTS;
        vm.locate_game_data(vm.game.active)
    }

    fn run_frame(vm: &mut VmContext<Self>, _level_time: i32) -> VmResult<()> {
        let index = vm.game.active;
        if let Some(entity) = vm.game_data_mut().entity_mut(index) {
            entity.number = index as i32;
            entity.origin = [1.0, 2.0, 3.0];
        }
        vm.game.active += 1;
        vm.locate_game_data(vm.game.active)
    }
}

#[test]
fn later_announcements_reuse_the_mapping() {
    let (channel, vm) = spawn_vm_unix(Spawner::default());
    let mut host = accept(channel, HostState::default());

    host.call::<GameInit>(&(0, 1, false)).expect("init");
    let base = host.game_data().expect("region mapped").entities().as_ptr();
    for frame in 1..=3 {
        host.call::<GameRunFrame>(&(frame * 50)).expect("frame");
    }

    let data = host.game_data().expect("region mapped");
    assert_eq!(data.entities().as_ptr(), base);
    assert_eq!(host.active_entities(), MAX_CLIENTS + 3);
    let spawned = data.entity(MAX_CLIENTS + 2).expect("spawned entity");
    assert_eq!(spawned.number, (MAX_CLIENTS + 2) as i32);
    assert_eq!(spawned.origin, [1.0, 2.0, 3.0]);

    drop(host);
    vm.join().expect("vm thread").expect_err("peer closed");
}
