use super::*;
use crate::testing::GameBuilder;

fn alice() -> Game {
    GameBuilder::new().with_player(1, "Alice").build()
}

fn wait_at(game: &mut Game, worker: Serial, flag: Serial) {
    game.push_task(worker, State::new(TaskKind::WaitForCapacity).objvar1(flag), 0)
        .unwrap();
    game.flag_mut(flag).unwrap().wait_for_capacity(worker);
}

#[test]
fn test_wakeup_reaches_only_the_front_worker() {
    let mut game = alice();
    let flag = game.build_flag(1, Coords::new(10, 10)).unwrap();
    let first = game.spawn_worker(1, "carrier", Coords::new(9, 10)).unwrap();
    let second = game.spawn_worker(1, "carrier", Coords::new(11, 10)).unwrap();
    wait_at(&mut game, first, flag);
    wait_at(&mut game, second, flag);
    game.run_queue(100).unwrap();

    game.wake_up_capacity_queue(flag).unwrap();
    assert_eq!(game.get_signal(first), Some("wakeup"));
    assert_eq!(game.get_signal(second), Some(""));
    game.run_queue(200).unwrap();
    assert!(!game.bob(first).unwrap().has_task(TaskKind::WaitForCapacity));
    assert!(game.bob(second).unwrap().has_task(TaskKind::WaitForCapacity));
    let f = game.objects.get::<Flag>(flag).unwrap();
    assert!(!f.is_waiting_for_capacity(first));
    assert!(f.is_waiting_for_capacity(second));
}

#[test]
fn test_wakeup_skips_workers_that_stopped_waiting() {
    let mut game = alice();
    let flag = game.build_flag(1, Coords::new(10, 10)).unwrap();
    let gone = game.spawn_worker(1, "carrier", Coords::new(9, 10)).unwrap();
    let waiting = game.spawn_worker(1, "carrier", Coords::new(11, 10)).unwrap();
    // Queued, but busy with something else.
    game.push_task(gone, State::new(TaskKind::Idle).ivar1(-1), 0).unwrap();
    game.flag_mut(flag).unwrap().wait_for_capacity(gone);
    wait_at(&mut game, waiting, flag);
    game.run_queue(100).unwrap();

    game.wake_up_capacity_queue(flag).unwrap();
    assert_eq!(game.get_signal(gone), Some(""));
    assert_eq!(game.get_signal(waiting), Some("wakeup"));
    assert!(game.objects.get::<Flag>(flag).unwrap().capacity_wait.is_empty());
}

#[test]
fn test_full_flag_rejects_wares() {
    let mut game = alice();
    let flag = game.build_flag(1, Coords::new(10, 10)).unwrap();
    let capacity = game.config.flag_capacity;
    for _ in 0..capacity {
        game.spawn_ware_on_flag(flag, "log").unwrap();
    }
    let err = game.spawn_ware_on_flag(flag, "log").unwrap_err();
    assert!(matches!(err, EngineError::FlagFull { .. }));
    assert_eq!(game.objects.get::<Flag>(flag).unwrap().current_wares(), capacity);
}

#[test]
fn test_road_is_staffed_from_headquarters() {
    let mut game = GameBuilder::new()
        .with_player(1, "Alice")
        .with_headquarters(1, Coords::new(6, 6))
        .build();
    let hq = game.headquarters(1).unwrap();
    let hq_flag = game.building_flag(hq).unwrap();
    let far = game.build_flag(1, Coords::new(13, 7)).unwrap();
    let road = game.build_road_between(1, hq_flag, far).unwrap();
    assert!(game.objects.get::<Road>(road).unwrap().carrier_request.is_some());

    game.run_queue(60_000).unwrap();
    let r = game.objects.get::<Road>(road).unwrap();
    let carrier = r.carrier.serial().expect("road has a carrier");
    assert!(r.carrier_request.is_none());
    let b = game.bob(carrier).unwrap();
    assert_eq!(b.location, Some(road));
    assert!(b.has_task(TaskKind::Road));
    let stock = game
        .objects
        .get::<Building>(hq)
        .unwrap()
        .stock(WareWorker::Worker, game.descriptions.carrier());
    assert!(stock < 10);
}

#[test]
fn test_removing_flag_tears_down_roads_and_wares() {
    let mut game = alice();
    let a = game.build_flag(1, Coords::new(4, 4)).unwrap();
    let b = game.build_flag(1, Coords::new(9, 4)).unwrap();
    let road = game.build_road_between(1, a, b).unwrap();
    let ware = game.spawn_ware_on_flag(b, "log").unwrap();
    let interior = game.objects.get::<Road>(road).unwrap().path.coords(&game.map)[1];

    game.remove_flag(1, b).unwrap();
    assert!(game.objects.get::<Road>(road).is_none());
    assert!(game.objects.get::<WareInstance>(ware).is_none());
    assert!(game.map.field(interior).immovable.is_none());
    assert!(game.objects.get::<Flag>(a).unwrap().attached_roads().next().is_none());
}

#[test]
fn test_carrier_moves_ware_between_flags() {
    let mut game = GameBuilder::new()
        .with_player(1, "Alice")
        .with_headquarters(1, Coords::new(6, 6))
        .build();
    let hq = game.headquarters(1).unwrap();
    let hq_flag = game.building_flag(hq).unwrap();
    let far = game.build_flag(1, Coords::new(13, 7)).unwrap();
    game.build_road_between(1, hq_flag, far).unwrap();
    game.run_queue(60_000).unwrap();

    // A stray log on the far flag is brought home.
    let log = game.descriptions.ware_index("log").unwrap();
    let before = game.objects.get::<Building>(hq).unwrap().stock(WareWorker::Ware, log);
    let ware = game.spawn_ware_on_flag(far, "log").unwrap();
    game.run_queue(180_000).unwrap();
    assert!(game.objects.get::<WareInstance>(ware).is_none());
    let after = game.objects.get::<Building>(hq).unwrap().stock(WareWorker::Ware, log);
    assert_eq!(after, before + 1);
}

#[test]
fn test_dead_carrier_releases_its_ack() {
    let mut game = GameBuilder::new()
        .with_player(1, "Alice")
        .with_headquarters(1, Coords::new(6, 6))
        .build();
    let hq = game.headquarters(1).unwrap();
    let hq_flag = game.building_flag(hq).unwrap();
    let far = game.build_flag(1, Coords::new(13, 7)).unwrap();
    let road = game.build_road_between(1, hq_flag, far).unwrap();
    game.run_queue(60_000).unwrap();
    let carrier = game.objects.get::<Road>(road).unwrap().carrier.serial().unwrap();

    let log = game.descriptions.ware_index("log").unwrap();
    let before = game.objects.get::<Building>(hq).unwrap().stock(WareWorker::Ware, log);
    let ware = game.spawn_ware_on_flag(far, "log").unwrap();
    let acked_by = |game: &Game| {
        game.objects
            .get::<Flag>(far)
            .and_then(|f| f.wares.iter().find(|pw| pw.ware.is(ware)).cloned())
            .and_then(|pw| pw.acked_by.serial())
    };
    while acked_by(&game).is_none() {
        let now = game.time();
        assert!(now < 120_000, "ware never acked");
        game.run_queue(now + 100).unwrap();
    }
    assert_eq!(acked_by(&game), Some(carrier));

    game.schedule_destroy(carrier);
    let now = game.time();
    game.run_queue(now).unwrap();
    assert!(game.objects.get::<Bob>(carrier).is_none());
    let f = game.objects.get::<Flag>(far).unwrap();
    let pw = f.wares.iter().find(|pw| pw.ware.is(ware)).unwrap();
    assert!(pw.pending);
    assert!(pw.acked_by.is_null());
    assert!(f.has_pending_ware(hq_flag));

    // The replacement carrier takes the ware home.
    game.run_queue(now + 400_000).unwrap();
    assert!(game.objects.get::<WareInstance>(ware).is_none());
    let after = game.objects.get::<Building>(hq).unwrap().stock(WareWorker::Ware, log);
    assert_eq!(after, before + 1);
}

#[test]
fn test_swap_on_full_flag_keeps_waiter_in_front() {
    let mut game = alice();
    let a = game.build_flag(1, Coords::new(4, 4)).unwrap();
    let b = game.build_flag(1, Coords::new(9, 4)).unwrap();
    game.build_road_between(1, a, b).unwrap();
    let capacity = game.config.flag_capacity;
    let mut stored = Vec::new();
    for _ in 0..capacity {
        stored.push(game.spawn_ware_on_flag(b, "log").unwrap());
    }
    let waiter = game.spawn_worker(1, "carrier", Coords::new(10, 4)).unwrap();
    wait_at(&mut game, waiter, b);
    let carrier = game.spawn_worker(1, "carrier", Coords::new(8, 4)).unwrap();
    game.run_queue(100).unwrap();

    // One ware on the full flag goes back towards `a` and is promised to the
    // carrier, who arrives with a ware of its own.
    {
        let pw = game.flag_mut(b).unwrap().pending_ware_mut(stored[0]).unwrap();
        pw.nextstep = Some(a);
        pw.pending = false;
        pw.acked_by = OPtr::new(carrier);
    }
    let log = game.descriptions.ware_index("log").unwrap();
    let incoming = game.create_ware(1, log, Some(carrier));

    let swapped = game.swap_ware(b, carrier, a, incoming).unwrap();
    assert_eq!(swapped, Some(stored[0]));
    let f = game.objects.get::<Flag>(b).unwrap();
    assert_eq!(f.current_wares(), capacity);
    assert!(f.is_waiting_for_capacity(waiter));
    assert_eq!(game.get_signal(waiter), Some(""));

    // A pickup without a swap frees a slot for real.
    game.flag_mut(b).unwrap().pending_ware_mut(stored[1]).unwrap().nextstep = Some(a);
    game.flag_mut(b).unwrap().pending_ware_mut(stored[1]).unwrap().pending = true;
    let fetched = game.fetch_pending_ware(b, carrier, a).unwrap();
    assert_eq!(fetched, Some(stored[1]));
    assert_eq!(game.get_signal(waiter), Some("wakeup"));
}
