//! Worker programs.
//!
//! * `transfer`: follow a [`Transfer`](crate::transport::Transfer) hop by
//!   hop: out of buildings, along roads, into the destination.
//! * `gowarehouse`: offer oneself as an idle supply until the economy sends
//!   the worker somewhere (usually back into storage).
//! * `leavebuilding`, `return`, `fetchfromflag`, `dropoff`: short trips
//!   between a building and its flag.
//! * `waitforcapacity`: park until a slot on a full flag frees up.
//! * `fugitive`: a worker without location looks for a connected flag.
//! * `geologist`: survey spots around a flag.
//! * `buildingwork`: the in-building loop of helpers and stationed soldiers.

use crate::bob::State;
use crate::building::Building;
use crate::error::EngineError;
use crate::game::Game;
use crate::geometry::{Coords, Direction, NodeCaps};
use crate::notification::Note;
use crate::object::{Serial, Time};
use crate::player::PlayerNumber;
use crate::tasks::movement::{
    start_task_idle, start_task_move, start_task_movepath, start_task_movepath_to, FORCE_NONE,
};
use crate::tasks::TaskKind;
use crate::transport::{Flag, NextStep, Road, RoadKind, SupplySource, TransferId, WareInstance};
use rand::Rng;
use wldata::WareWorker;

/// Re-check interval of a worker waiting for a warehouse.
const GOWAREHOUSE_IDLE_MS: i64 = 1000;
/// Retry delay after a soldier was blocked on its way.
const BLOCKED_RETRY_MS: Time = 500;
/// Time a geologist spends examining one spot.
const GEOLOGIST_SEARCH_MS: Time = 1500;
const FUGITIVE_SEARCH_RADIUS: u32 = 6;
const FUGITIVE_PERSIST: u32 = 3;

fn current_signal(game: &Game, bob: Serial) -> String {
    game.get_signal(bob).unwrap_or_default().to_string()
}

fn has_signal(game: &Game, bob: Serial) -> bool {
    game.get_signal(bob).is_some_and(|s| !s.is_empty())
}

/// Position and base flag of a building.
fn building_site(game: &Game, building: Serial) -> Option<(Coords, Serial, Coords)> {
    let b = game.objects.get::<Building>(building)?;
    let flag_pos = game.objects.get::<Flag>(b.flag)?.position;
    Some((b.position, b.flag, flag_pos))
}

fn give_up_transfer(game: &mut Game, worker: Serial, tid: TransferId) -> Result<(), EngineError> {
    log::debug!("MO({}): transfer {} failed", worker, tid);
    game.transfer_failed(tid);
    game.pop_task(worker)
}

enum RoadWalk {
    Walking,
    Lost,
    At(Serial),
}

/// Continue a walk along the road the worker is on, towards the flag stored
/// in the frame.
fn walk_road(game: &mut Game, worker: Serial, location: Serial, position: Coords) -> Result<RoadWalk, EngineError> {
    let next = game.top_state(worker)?.objvar1;
    let Some(road) = game.objects.get::<Road>(location) else {
        game.top_state_mut(worker)?.ivar1 = 0;
        return Ok(RoadWalk::At(location));
    };
    let Some((flag, end)) = next.and_then(|f| road.end_of(f).map(|end| (f, end))) else {
        return Ok(RoadWalk::Lost);
    };
    let Some(flag_pos) = game.objects.get::<Flag>(flag).map(|f| f.position) else {
        return Ok(RoadWalk::Lost);
    };
    if position != flag_pos {
        return match road.path_to_end(&game.map, position, end) {
            Some(path) => start_task_movepath(game, worker, path, FORCE_NONE).map(|_| RoadWalk::Walking),
            None => Ok(RoadWalk::Lost),
        };
    }
    game.bob_mut(worker)?.location = Some(flag);
    game.top_state_mut(worker)?.ivar1 = 0;
    Ok(RoadWalk::At(flag))
}

pub(crate) fn transfer_update(game: &mut Game, worker: Serial) -> Result<(), EngineError> {
    let signal = current_signal(game, worker);
    match signal.as_str() {
        "" => {}
        // A new destination is picked up at the next flag.
        "transfer" => game.signal_handled(worker)?,
        "blocked" => {
            game.signal_handled(worker)?;
            return game.schedule_act(worker, BLOCKED_RETRY_MS);
        }
        _ => {
            log::trace!("MO({}): transfer interrupted by '{}'", worker, signal);
            return game.pop_task(worker);
        }
    }
    let b = game.bob(worker)?;
    let Some(tid) = b.transfer else {
        return game.pop_task(worker);
    };
    let position = b.position;
    let Some(mut location) = b.location.filter(|&l| game.objects.contains(l)) else {
        return give_up_transfer(game, worker, tid);
    };

    if game.top_state(worker)?.ivar1 == 1 {
        match walk_road(game, worker, location, position)? {
            RoadWalk::Walking => return Ok(()),
            RoadWalk::Lost => return give_up_transfer(game, worker, tid),
            RoadWalk::At(flag) => location = flag,
        }
    }

    match game.transfer_next_step(tid, location)? {
        NextStep::Arrived => {
            game.pop_task(worker)?;
            game.transfer_finished(tid)
        }
        NextStep::Fail => give_up_transfer(game, worker, tid),
        NextStep::Go(next) => transfer_step(game, worker, tid, location, position, next),
    }
}

fn transfer_step(
    game: &mut Game,
    worker: Serial,
    tid: TransferId,
    location: Serial,
    position: Coords,
    next: Serial,
) -> Result<(), EngineError> {
    if let Some(b) = game.objects.get::<Building>(location) {
        let (building_pos, flag) = (b.position, b.flag);
        if position == building_pos {
            return game.push_task(worker, State::new(TaskKind::LeaveBuilding).ivar1(1), 0);
        }
        game.bob_mut(worker)?.location = Some(flag);
        return game.schedule_act(worker, 0);
    }
    if game.objects.get::<Road>(location).is_some() {
        // Standing on a road without walking it: head for its base flag.
        let s = game.top_state_mut(worker)?;
        s.ivar1 = 1;
        s.objvar1 = Some(next);
        return game.schedule_act(worker, 0);
    }
    let Some(flag_pos) = game.objects.get::<Flag>(location).map(|f| f.position) else {
        return give_up_transfer(game, worker, tid);
    };
    if position != flag_pos {
        if start_task_movepath_to(game, worker, flag_pos, 0, FORCE_NONE)? {
            return Ok(());
        }
        return give_up_transfer(game, worker, tid);
    }

    if game.objects.get::<Building>(next).is_some() {
        game.bob_mut(worker)?.location = Some(next);
        return start_task_move(game, worker, Direction::NorthWest, true);
    }
    if game.objects.get::<Road>(next).is_some() {
        // The road itself is the destination.
        game.bob_mut(worker)?.location = Some(next);
        return game.schedule_act(worker, 0);
    }

    let road = game.objects.get::<Flag>(location).and_then(|f| {
        f.attached_roads().find(|&r| {
            game.objects
                .get::<Road>(r)
                .is_some_and(|road| road.kind == RoadKind::Road && road.other_flag(location) == Some(next))
        })
    });
    let path = road.and_then(|r| {
        let road = game.objects.get::<Road>(r)?;
        road.path_to_end(&game.map, position, road.end_of(next)?)
    });
    let (Some(road), Some(path)) = (road, path) else {
        return give_up_transfer(game, worker, tid);
    };
    game.bob_mut(worker)?.location = Some(road);
    let s = game.top_state_mut(worker)?;
    s.ivar1 = 1;
    s.objvar1 = Some(next);
    start_task_movepath(game, worker, path, FORCE_NONE)
}

/// Wait at the current location as an idle supply until the economy
/// assigns a transfer, then follow it.
pub fn start_task_gowarehouse(game: &mut Game, worker: Serial) -> Result<(), EngineError> {
    game.push_task(worker, State::new(TaskKind::GoWarehouse), 0)
}

pub(crate) fn gowarehouse_update(game: &mut Game, worker: Serial) -> Result<(), EngineError> {
    let signal = current_signal(game, worker);
    match signal.as_str() {
        "" => {}
        // A failed or cancelled route: try again with whatever comes next.
        "transfer" | "cancel" | "fail" => game.signal_handled(worker)?,
        _ => return game.pop_task(worker),
    }
    let b = game.bob(worker)?;
    let (transfer, position) = (b.transfer, b.position);
    let Some(location) = b.location.filter(|&l| game.objects.contains(l)) else {
        return game.pop_task(worker);
    };
    if transfer.is_some() {
        log::trace!("MO({}): [gowarehouse] got transfer", worker);
        return game.push_task(worker, State::new(TaskKind::Transfer), 0);
    }
    if let Some(building) = game.objects.get::<Building>(location) {
        if building.position == position {
            if building.is_warehouse() {
                return game.incorporate_item(location, worker, WareWorker::Worker);
            }
            return game.push_task(worker, State::new(TaskKind::LeaveBuilding).ivar1(1), 0);
        }
    }
    if game.bob(worker)?.supply.is_none() {
        let s = game.add_supply(SupplySource::IdleWorker(worker), WareWorker::Worker);
        game.bob_mut(worker)?.supply = Some(s);
    }
    start_task_idle(game, worker, GOWAREHOUSE_IDLE_MS)
}

/// A request took the worker: it is no longer idle.
pub(crate) fn gowarehouse_signal_immediate(game: &mut Game, worker: Serial) -> Result<(), EngineError> {
    if current_signal(game, worker) != "transfer" {
        return Ok(());
    }
    let requested = game
        .bob(worker)?
        .transfer
        .and_then(|t| game.logistics.transfer(t))
        .is_some_and(|t| t.request.is_some());
    if requested {
        if let Some(s) = game.bob_mut(worker)?.supply.take() {
            game.remove_supply(s);
        }
    }
    Ok(())
}

pub(crate) fn gowarehouse_pop(game: &mut Game, worker: Serial) -> Result<(), EngineError> {
    if let Some(s) = game.bob_mut(worker)?.supply.take() {
        game.remove_supply(s);
    }
    Ok(())
}

pub(crate) fn leavebuilding_update(game: &mut Game, worker: Serial) -> Result<(), EngineError> {
    if has_signal(game, worker) {
        return game.pop_task(worker);
    }
    let b = game.bob(worker)?;
    let position = b.position;
    let Some((building_pos, flag, _)) = b.location.and_then(|l| building_site(game, l)) else {
        return game.pop_task(worker);
    };
    if position == building_pos {
        return start_task_move(game, worker, Direction::SouthEast, true);
    }
    if game.top_state(worker)?.ivar1 == 1 {
        game.bob_mut(worker)?.location = Some(flag);
    }
    game.pop_task(worker)
}

/// Walk back into `building` through its flag.
pub fn start_task_return(game: &mut Game, worker: Serial, building: Serial) -> Result<(), EngineError> {
    game.push_task(worker, State::new(TaskKind::Return).objvar1(building), 0)
}

pub(crate) fn return_update(game: &mut Game, worker: Serial) -> Result<(), EngineError> {
    if has_signal(game, worker) {
        return game.pop_task(worker);
    }
    let Some(building) = game.top_state(worker)?.objvar1 else {
        return game.pop_task(worker);
    };
    let Some((building_pos, _, flag_pos)) = building_site(game, building) else {
        return game.pop_task(worker);
    };
    let position = game.bob(worker)?.position;
    if position == building_pos {
        return game.pop_task(worker);
    }
    game.bob_mut(worker)?.location = Some(building);
    if position == flag_pos {
        return start_task_move(game, worker, Direction::NorthWest, true);
    }
    if start_task_movepath_to(game, worker, flag_pos, 0, FORCE_NONE)? {
        return Ok(());
    }
    game.pop_task(worker)
}

/// Step out to the building's flag, take a ware destined for the building
/// and carry it inside.
pub(crate) fn fetchfromflag_update(game: &mut Game, worker: Serial) -> Result<(), EngineError> {
    if has_signal(game, worker) {
        return game.pop_task(worker);
    }
    let state = game.top_state(worker)?;
    let (phase, building) = (state.ivar1, state.objvar1);
    let Some(building) = building else {
        return game.pop_task(worker);
    };
    let Some((building_pos, flag, _)) = building_site(game, building) else {
        return game.pop_task(worker);
    };
    match phase {
        0 => {
            if game.bob(worker)?.position != building_pos {
                return game.pop_task(worker);
            }
            game.top_state_mut(worker)?.ivar1 = 1;
            start_task_move(game, worker, Direction::SouthEast, true)
        }
        1 => {
            let ware = game.fetch_ware_for_building(flag, building, worker)?;
            game.bob_mut(worker)?.carried_ware = ware;
            game.top_state_mut(worker)?.ivar1 = 2;
            start_task_move(game, worker, Direction::NorthWest, true)
        }
        _ => {
            if let Some(ware) = game.bob_mut(worker)?.carried_ware.take() {
                if let Some(w) = game.objects.get_mut::<WareInstance>(ware) {
                    w.location = Some(building);
                }
                game.ware_update(ware)?;
                let still_here = game
                    .objects
                    .get::<WareInstance>(ware)
                    .is_some_and(|w| w.location == Some(building));
                if still_here {
                    game.building_keep_ware(building, ware)?;
                }
            }
            game.pop_task(worker)
        }
    }
}

/// Carry the held ware out to the building's flag.
pub(crate) fn dropoff_update(game: &mut Game, worker: Serial) -> Result<(), EngineError> {
    if has_signal(game, worker) {
        return game.pop_task(worker);
    }
    let state = game.top_state(worker)?;
    let (phase, building) = (state.ivar1, state.objvar1);
    let Some(building) = building else {
        return game.pop_task(worker);
    };
    let Some((building_pos, flag, _)) = building_site(game, building) else {
        return game.pop_task(worker);
    };
    match phase {
        0 => {
            if game.bob(worker)?.position != building_pos {
                return game.pop_task(worker);
            }
            game.top_state_mut(worker)?.ivar1 = 1;
            start_task_move(game, worker, Direction::SouthEast, true)
        }
        1 => {
            if game.bob(worker)?.carried_ware.is_some() {
                if start_task_waitforcapacity(game, worker, flag)? {
                    return Ok(());
                }
                if let Some(ware) = game.bob_mut(worker)?.carried_ware.take() {
                    game.add_ware_to_flag(flag, ware)?;
                }
            }
            game.top_state_mut(worker)?.ivar1 = 2;
            start_task_move(game, worker, Direction::NorthWest, true)
        }
        _ => game.pop_task(worker),
    }
}

/// Queue up at a full flag. Returns `false` (and does nothing) when the
/// flag has room.
pub fn start_task_waitforcapacity(game: &mut Game, worker: Serial, flag: Serial) -> Result<bool, EngineError> {
    let Some(f) = game.objects.get::<Flag>(flag) else {
        return Ok(false);
    };
    if f.has_capacity() {
        return Ok(false);
    }
    game.flag_mut(flag)?.wait_for_capacity(worker);
    log::trace!("MO({}): waiting for capacity at flag {}", worker, flag);
    game.push_task(worker, State::new(TaskKind::WaitForCapacity).objvar1(flag), 0)?;
    Ok(true)
}

pub(crate) fn waitforcapacity_update(game: &mut Game, worker: Serial) -> Result<(), EngineError> {
    match current_signal(game, worker).as_str() {
        "" => game.skip_act(worker),
        "wakeup" => {
            game.signal_handled(worker)?;
            game.pop_task(worker)
        }
        _ => game.pop_task(worker),
    }
}

pub(crate) fn waitforcapacity_pop(game: &mut Game, worker: Serial) -> Result<(), EngineError> {
    let Some(flag) = game.top_state(worker)?.objvar1 else {
        return Ok(());
    };
    if let Some(f) = game.objects.get_mut::<Flag>(flag) {
        f.skip_wait_for_capacity(worker);
    }
    Ok(())
}

/// The worker lost its location. It wanders around looking for a flag of
/// its owner that leads to a warehouse, and dies after a while.
pub fn start_task_fugitive(game: &mut Game, worker: Serial) -> Result<(), EngineError> {
    let deadline = game.time() + game.config.fugitive_timeout_ms;
    log::debug!("MO({}): lost, searching a flag until {}", worker, deadline);
    game.push_task(worker, State::new(TaskKind::Fugitive).ivar1(deadline as i64), 0)
}

/// A flag of `owner` whose worker economy has a warehouse.
fn is_way_home(game: &Game, flag: Serial, owner: PlayerNumber) -> bool {
    game.objects.owner(flag) == Some(owner)
        && game
            .objects
            .get::<Flag>(flag)
            .and_then(|f| f.economy(WareWorker::Worker))
            .and_then(|e| game.economy(e))
            .is_some_and(|e| !e.warehouses.is_empty())
}

pub(crate) fn fugitive_update(game: &mut Game, worker: Serial) -> Result<(), EngineError> {
    if has_signal(game, worker) {
        // Blocked or failed steps: just pick another direction.
        game.signal_handled(worker)?;
    }
    let b = game.bob(worker)?;
    let (position, located) = (b.position, b.location.is_some());
    if located {
        return game.pop_task(worker);
    }
    let owner = game.objects.owner(worker).unwrap_or_default();

    if let Some(flag) = game
        .map
        .field(position)
        .immovable
        .filter(|&f| is_way_home(game, f, owner))
    {
        log::debug!("MO({}): fugitive found flag {}", worker, flag);
        game.bob_mut(worker)?.location = Some(flag);
        return game.pop_task(worker);
    }

    let deadline = game.top_state(worker)?.ivar1 as Time;
    if game.time() >= deadline {
        return worker_got_lost(game, worker, owner, position);
    }

    let target = game
        .map
        .region(position, FUGITIVE_SEARCH_RADIUS)
        .into_iter()
        .filter_map(|c| game.map.field(c).immovable)
        .filter(|&f| is_way_home(game, f, owner))
        .filter_map(|f| game.objects.get::<Flag>(f).map(|f| f.position))
        .min_by_key(|&c| (game.map.calc_distance(position, c), c));
    if let Some(c) = target {
        if start_task_movepath_to(game, worker, c, FUGITIVE_PERSIST, FORCE_NONE)? {
            return Ok(());
        }
    }
    let dir = Direction::ALL[game.rng.gen_range(0..Direction::ALL.len())];
    start_task_move(game, worker, dir, false)
}

fn worker_got_lost(game: &mut Game, worker: Serial, owner: PlayerNumber, position: Coords) -> Result<(), EngineError> {
    let name = game
        .bob(worker)
        .ok()
        .and_then(|b| game.descriptions.worker(b.descr))
        .map(|d| d.name.clone())
        .unwrap_or_default();
    log::info!("Player {}: {} {} got lost at {}", owner, name, worker, position);
    game.send_message(
        owner,
        "Worker got lost",
        format!("A {} got lost and died.", name),
        Some(position),
    );
    game.notes.publish(&Note::WorkerLost {
        player: owner,
        worker,
        position,
    });
    game.schedule_destroy(worker);
    Ok(())
}

/// Survey `ivar1` random spots within `ivar2` of the flag in `objvar1`,
/// then walk back to the flag.
pub(crate) fn geologist_update(game: &mut Game, worker: Serial) -> Result<(), EngineError> {
    match current_signal(game, worker).as_str() {
        "" => {}
        "fail" | "blocked" => game.signal_handled(worker)?,
        _ => return game.pop_task(worker),
    }
    let state = game.top_state(worker)?;
    let (flag, attempts, radius, spot) = (state.objvar1, state.ivar1, state.ivar2, state.coords);
    let Some(flag_pos) = flag.and_then(|f| game.objects.get::<Flag>(f)).map(|f| f.position) else {
        return game.pop_task(worker);
    };
    let position = game.bob(worker)?.position;

    if let Some(spot) = spot {
        let s = game.top_state_mut(worker)?;
        s.coords = None;
        s.ivar1 -= 1;
        if spot == position {
            survey(game, worker, spot);
            return game.schedule_act(worker, GEOLOGIST_SEARCH_MS);
        }
    }

    if attempts <= 0 {
        if position != flag_pos && start_task_movepath_to(game, worker, flag_pos, 0, FORCE_NONE)? {
            return Ok(());
        }
        return game.pop_task(worker);
    }

    let spots: Vec<Coords> = game
        .map
        .region(flag_pos, radius.max(0) as u32)
        .into_iter()
        .filter(|&c| c != flag_pos)
        .filter(|&c| {
            let field = game.map.field(c);
            field.caps.contains(NodeCaps::WALKABLE) && field.immovable.is_none()
        })
        .collect();
    if spots.is_empty() {
        game.top_state_mut(worker)?.ivar1 = 0;
        let delay = game.config.signal_delay_ms;
        return game.schedule_act(worker, delay);
    }
    let spot = spots[game.rng.gen_range(0..spots.len())];
    game.top_state_mut(worker)?.coords = Some(spot);
    if start_task_movepath_to(game, worker, spot, 0, FORCE_NONE)? {
        return Ok(());
    }
    let delay = game.config.signal_delay_ms;
    game.schedule_act(worker, delay)
}

/// Report a resource at `spot`, once per spot.
fn survey(game: &mut Game, worker: Serial, spot: Coords) {
    let Some(resource) = game.map.field(spot).resource else {
        return;
    };
    let owner = game.objects.owner(worker).unwrap_or_default();
    let known = game
        .players
        .get(&owner)
        .is_some_and(|p| p.messages.iter().any(|m| m.position == Some(spot)));
    if known {
        return;
    }
    let name = game
        .descriptions
        .ware(resource.ware)
        .map(|w| w.name.clone())
        .unwrap_or_default();
    log::debug!("MO({}): found {} x{} at {}", worker, name, resource.amount, spot);
    game.send_message(
        owner,
        "Resources found",
        format!("{} ({})", name, resource.amount),
        Some(spot),
    );
}

/// In-building loop. The building's helper fetches wares waiting at the
/// flag and carries out wares the building wants to get rid of; everybody
/// else just waits for a signal.
pub(crate) fn buildingwork_update(game: &mut Game, worker: Serial) -> Result<(), EngineError> {
    match current_signal(game, worker).as_str() {
        "" | "fetch" | "wakeup" => game.signal_handled(worker)?,
        _ => return game.pop_task(worker),
    }
    let b = game.bob(worker)?;
    let position = b.position;
    let Some(building) = b.location else {
        return game.pop_task(worker);
    };
    let Some(bd) = game.objects.get::<Building>(building) else {
        return game.pop_task(worker);
    };
    if bd.position != position {
        return game.pop_task(worker);
    }
    if !bd.helper.is(worker) {
        return game.skip_act(worker);
    }
    let waiting = game
        .objects
        .get::<Flag>(bd.flag)
        .is_some_and(|f| f.wares.iter().any(|pw| pw.nextstep == Some(building)));
    if waiting {
        return game.push_task(worker, State::new(TaskKind::FetchFromFlag).objvar1(building), 0);
    }
    if let Some(ware) = game.building_take_outgoing(building) {
        if let Some(w) = game.objects.get_mut::<WareInstance>(ware) {
            w.location = Some(worker);
        }
        game.bob_mut(worker)?.carried_ware = Some(ware);
        return game.push_task(worker, State::new(TaskKind::DropOff).objvar1(building), 0);
    }
    game.skip_act(worker)
}

#[cfg(test)]
mod tests {
    use crate::geometry::Coords;
    use crate::tasks::TaskKind;
    use crate::testing::GameBuilder;

    #[test]
    fn test_waitforcapacity_does_nothing_with_room() {
        let mut game = GameBuilder::new().with_player(1, "Alice").build();
        let flag = game.build_flag(1, Coords::new(4, 4)).unwrap();
        let bob = game.spawn_worker(1, "carrier", Coords::new(4, 4)).unwrap();
        assert!(!super::start_task_waitforcapacity(&mut game, bob, flag).unwrap());
        assert!(game.bob(bob).unwrap().stack.is_empty());
    }

    #[test]
    fn test_fugitive_dies_after_timeout() {
        let mut game = GameBuilder::new().with_player(1, "Alice").build();
        let bob = game.spawn_worker(1, "carrier", Coords::new(6, 6)).unwrap();
        let timeout = game.config.fugitive_timeout_ms;
        game.run_queue(timeout + 10_000).unwrap();
        assert!(game.objects.get::<crate::bob::Bob>(bob).is_none());
        let p = &game.players[&1];
        assert!(p.messages.iter().any(|m| m.title == "Worker got lost"));
    }

    #[test]
    fn test_fugitive_finds_connected_flag() {
        let mut game = GameBuilder::new()
            .with_player(1, "Alice")
            .with_headquarters(1, Coords::new(4, 4))
            .build();
        let hq_flag = game.building_flag(game.headquarters(1).unwrap()).unwrap();
        let flag_pos = game.objects.get::<crate::transport::Flag>(hq_flag).unwrap().position;
        let bob = game
            .spawn_worker(1, "carrier", Coords::new(flag_pos.x + 2, flag_pos.y))
            .unwrap();
        game.run_queue(20_000).unwrap();
        let b = game.bob(bob);
        // Either still walking home or already back in storage.
        if let Ok(b) = b {
            assert!(b.location.is_some() || b.has_task(TaskKind::Fugitive));
        }
    }
}
