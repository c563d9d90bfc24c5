use super::*;
use crate::geometry::Coords;
use crate::notification::Note;
use crate::testing::GameBuilder;
use std::sync::{Arc, Mutex};

fn alice() -> Game {
    GameBuilder::new().with_player(1, "Alice").build()
}

#[test]
fn test_new_flags_get_their_own_economies() {
    let mut game = alice();
    let a = game.build_flag(1, Coords::new(4, 4)).unwrap();
    let b = game.build_flag(1, Coords::new(9, 4)).unwrap();
    for kind in WareWorker::ALL {
        let ea = game.economy_of(a, kind).unwrap();
        let eb = game.economy_of(b, kind).unwrap();
        assert_ne!(ea, eb);
        assert_eq!(game.economy(ea).unwrap().kind, kind);
    }
}

#[test]
fn test_road_merges_into_lower_economy() {
    let mut game = alice();
    let a = game.build_flag(1, Coords::new(4, 4)).unwrap();
    let b = game.build_flag(1, Coords::new(9, 4)).unwrap();
    let before: Vec<_> = WareWorker::ALL
        .iter()
        .map(|&k| game.economy_of(a, k).unwrap().min(game.economy_of(b, k).unwrap()))
        .collect();
    game.build_road_between(1, a, b).unwrap();
    for (i, &kind) in WareWorker::ALL.iter().enumerate() {
        let ea = game.economy_of(a, kind).unwrap();
        assert_eq!(ea, game.economy_of(b, kind).unwrap());
        assert_eq!(ea, before[i]);
        let e = game.economy(ea).unwrap();
        assert!(e.flags.contains(&a) && e.flags.contains(&b));
    }
}

#[test]
fn test_removing_road_splits_economy() {
    let mut game = alice();
    let a = game.build_flag(1, Coords::new(4, 4)).unwrap();
    let b = game.build_flag(1, Coords::new(9, 4)).unwrap();
    let c = game.build_flag(1, Coords::new(14, 4)).unwrap();
    game.build_road_between(1, a, b).unwrap();
    let bc = game.build_road_between(1, b, c).unwrap();
    let merged = game.economy_of(a, WareWorker::Ware).unwrap();
    assert_eq!(game.economy(merged).unwrap().flags.len(), 3);

    game.remove_road(1, bc).unwrap();
    let ea = game.economy_of(a, WareWorker::Ware).unwrap();
    let ec = game.economy_of(c, WareWorker::Ware).unwrap();
    assert_eq!(ea, game.economy_of(b, WareWorker::Ware).unwrap());
    assert_ne!(ea, ec);
    assert_eq!(game.economy(ea).unwrap().flags.len(), 2);
    assert_eq!(game.economy(ec).unwrap().flags.len(), 1);
}

#[test]
fn test_balances_are_coalesced() {
    let mut game = alice();
    let a = game.build_flag(1, Coords::new(4, 4)).unwrap();
    let economy = game.economy_of(a, WareWorker::Ware).unwrap();
    game.schedule_balance(economy);
    game.schedule_balance(economy);
    game.schedule_balance(economy);
    let before = game.metrics.balances;
    game.run_queue(1000).unwrap();
    assert!(game.metrics.balances - before <= 2);
    assert!(!game.economy(economy).unwrap().balance_pending);
}

#[test]
fn test_unconnected_request_stays_open() {
    let mut game = GameBuilder::new()
        .with_player(1, "Alice")
        .with_headquarters(1, Coords::new(6, 6))
        .build();
    let sawmill = game.descriptions.building_index("sawmill").unwrap();
    let sawmill = game.build_building(1, Coords::new(14, 10), sawmill).unwrap();
    game.run_queue(30_000).unwrap();
    let economy = game.economy_of(sawmill, WareWorker::Ware).unwrap();
    let open = game.logistics.open_requests(economy);
    assert!(!open.is_empty());
    for rid in open {
        assert!(game.logistics.transfers_of_request(rid).is_empty());
    }
}

#[test]
fn test_headquarters_supplies_sawmill() {
    let mut game = GameBuilder::new()
        .with_player(1, "Alice")
        .with_headquarters(1, Coords::new(6, 6))
        .seed(5)
        .build();
    let delivered = Arc::new(Mutex::new(0u32));
    let sink = delivered.clone();
    let _sub = game.notes().subscribe(move |note| {
        if let Note::WareDelivered { .. } = note {
            *sink.lock().unwrap() += 1;
        }
    });
    let sawmill = game.descriptions.building_index("sawmill").unwrap();
    let sawmill = game.build_building(1, Coords::new(12, 6), sawmill).unwrap();
    let hq_flag = game.building_flag(game.headquarters(1).unwrap()).unwrap();
    let sawmill_flag = game.building_flag(sawmill).unwrap();
    game.build_road_between(1, hq_flag, sawmill_flag).unwrap();
    assert_eq!(
        game.economy_of(sawmill, WareWorker::Ware),
        game.economy_of(hq_flag, WareWorker::Ware)
    );

    game.run_queue(300_000).unwrap();
    assert!(game.metrics.transfers_finished > 0);
    assert!(game.metrics.wares_delivered > 0);
    assert!(*delivered.lock().unwrap() > 0);
}
