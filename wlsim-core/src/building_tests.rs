use super::*;
use crate::testing::GameBuilder;
use crate::transport::Road;
use std::sync::{Arc, Mutex};

fn index(game: &Game, name: &str) -> DescriptionIndex {
    game.descriptions.building_index(name).unwrap()
}

/// Build `name` at `coords` and connect it to the player's headquarters.
fn connected(game: &mut Game, player: PlayerNumber, name: &str, coords: Coords) -> Serial {
    let descr = index(game, name);
    let building = game.build_building(player, coords, descr).unwrap();
    let hq_flag = game.building_flag(game.headquarters(player).unwrap()).unwrap();
    let flag = game.building_flag(building).unwrap();
    game.build_road_between(player, hq_flag, flag).unwrap();
    building
}

fn alice_with_hq() -> Game {
    GameBuilder::new()
        .with_player(1, "Alice")
        .with_headquarters(1, Coords::new(6, 6))
        .seed(9)
        .build()
}

fn input_request(game: &Game, building: Serial, slot: usize) -> RequestId {
    match &game.objects.get::<Building>(building).unwrap().state {
        BuildingState::ProductionSite { inputs, .. } => inputs[slot].request.unwrap(),
        other => panic!("not a production site: {other:?}"),
    }
}

#[test]
fn test_production_site_requests_its_inputs() {
    let mut game = alice_with_hq();
    let sawmill = index(&game, "sawmill");
    let sawmill = game.build_building(1, Coords::new(14, 10), sawmill).unwrap();
    let rid = input_request(&game, sawmill, 0);
    let r = game.logistics.request(rid).unwrap();
    assert_eq!(r.kind, WareWorker::Ware);
    assert_eq!(r.index, game.descriptions.ware_index("log").unwrap());
    assert_eq!(r.count, 8);
    assert!(!game.objects.get::<Building>(sawmill).unwrap().helper.is_null());
}

#[test]
fn test_lowering_input_queue_shrinks_request() {
    let mut game = alice_with_hq();
    let sawmill = index(&game, "sawmill");
    let sawmill = game.build_building(1, Coords::new(14, 10), sawmill).unwrap();
    let log = game.descriptions.ware_index("log").unwrap();
    game.set_input_queue(1, sawmill, log, 2).unwrap();
    let rid = input_request(&game, sawmill, 0);
    assert_eq!(game.logistics.request(rid).unwrap().count, 2);

    let planks = game.descriptions.ware_index("planks").unwrap();
    assert!(game.set_input_queue(1, sawmill, planks, 2).is_err());
}

#[test]
fn test_sawmill_turns_logs_into_planks() {
    let mut game = alice_with_hq();
    let hq = game.headquarters(1).unwrap();
    let planks = game.descriptions.ware_index("planks").unwrap();
    let before = game.objects.get::<Building>(hq).unwrap().stock(WareWorker::Ware, planks);
    connected(&mut game, 1, "sawmill", Coords::new(12, 6));

    game.run_queue(600_000).unwrap();
    assert!(game.metrics.wares_delivered > 0);
    let after = game.objects.get::<Building>(hq).unwrap().stock(WareWorker::Ware, planks);
    assert!(after > before, "planks {before} -> {after}");
}

#[test]
fn test_military_site_is_manned_and_conquers() {
    let mut game = alice_with_hq();
    let owned = Arc::new(Mutex::new(Vec::new()));
    let sink = owned.clone();
    let _sub = game.notes().subscribe(move |note| {
        if let Note::OwnershipChanged { owner, fields } = note {
            sink.lock().unwrap().push((*owner, fields.len()));
        }
    });
    let sentinel = connected(&mut game, 1, "sentinel", Coords::new(12, 6));
    assert!(game.map.field(Coords::new(12, 6)).owner.is_none());

    game.run_queue(240_000).unwrap();
    let b = game.objects.get::<Building>(sentinel).unwrap();
    assert_eq!(b.soldiers_inside().len(), 2);
    assert_eq!(game.map.field(Coords::new(12, 6)).owner, Some(1));
    assert_eq!(game.map.field(Coords::new(17, 6)).owner, Some(1));
    let notes = owned.lock().unwrap();
    assert!(!notes.is_empty());
    assert!(notes.iter().all(|&(owner, _)| owner == Some(1)));
}

#[test]
fn test_injured_soldiers_heal_inside() {
    let mut game = alice_with_hq();
    let sentinel = connected(&mut game, 1, "sentinel", Coords::new(12, 6));
    game.run_queue(240_000).unwrap();
    let soldier = game.objects.get::<Building>(sentinel).unwrap().soldiers_inside()[0];
    let max = game.bob(soldier).unwrap().soldier().unwrap().stats.max_health;
    game.bob_mut(soldier).unwrap().soldier_mut().unwrap().health = max / 2;
    game.schedule_building_act(sentinel, 0).unwrap();

    let now = game.time();
    game.run_queue(now + 1500).unwrap();
    let health = game.bob(soldier).unwrap().soldier().unwrap().health;
    assert!(health > max / 2 && health < max);
    game.run_queue(now + 200_000).unwrap();
    assert_eq!(game.bob(soldier).unwrap().soldier().unwrap().health, max);
}

#[test]
fn test_attack_on_unmanned_site_conquers_it() {
    let mut game = GameBuilder::new()
        .with_player(1, "Alice")
        .with_player(2, "Bob")
        .with_headquarters(1, Coords::new(4, 4))
        .size(40, 32)
        .seed(1)
        .build();
    let conquered = Arc::new(Mutex::new(Vec::new()));
    let sink = conquered.clone();
    let _sub = game.notes().subscribe(move |note| {
        if let Note::BuildingConquered { building, new_owner, .. } = note {
            sink.lock().unwrap().push((*building, *new_owner));
        }
    });
    connected(&mut game, 1, "sentinel", Coords::new(10, 4));
    game.run_queue(240_000).unwrap();

    let sentinel = index(&game, "sentinel");
    let target = game.place_building(2, Coords::new(18, 4), sentinel).unwrap();
    assert!(game.attack(1, game.headquarters(1).unwrap(), 1).is_err());
    let launched = game.attack(1, target, 5).unwrap();
    // One soldier always stays home.
    assert_eq!(launched, 1);

    let now = game.time();
    game.run_queue(now + 120_000).unwrap();
    assert!(game.objects.get::<Building>(target).is_none());
    assert_eq!(conquered.lock().unwrap().as_slice(), &[(target, 1)]);
    assert_eq!(game.players[&2].messages.len(), 1);
}

#[test]
fn test_destroying_building_orphans_its_workers() {
    let mut game = alice_with_hq();
    let sawmill = connected(&mut game, 1, "sawmill", Coords::new(12, 6));
    game.run_queue(5_000).unwrap();
    let helper = game.objects.get::<Building>(sawmill).unwrap().helper.serial().unwrap();
    let flag = game.building_flag(sawmill).unwrap();
    game.remove_flag(1, flag).unwrap();
    assert!(game.objects.get::<Building>(sawmill).is_none());
    assert!(game.objects.serials_of::<Road>().is_empty());
    assert!(game.map.field(Coords::new(12, 6)).immovable.is_none());
    let b = game.bob(helper).unwrap();
    assert!(b.location.is_none());
}
