//! The scout program: roam around a flag for a while, alternating between
//! peeking at enemy military sites and random spots, and reveal what it
//! sees to its owner.

use crate::bob::{Role, ScoutTarget};
use crate::building::{Building, BuildingState};
use crate::error::EngineError;
use crate::game::Game;
use crate::geometry::{Coords, NodeCaps};
use crate::object::{Serial, Time};
use crate::tasks::movement::{start_task_movepath_to, FORCE_NONE};
use crate::transport::Flag;
use rand::Rng;
use std::collections::VecDeque;

/// How long one scouting trip lasts.
pub const SCOUT_DURATION_MS: i64 = 75_000;
/// Radius around the flag the scout explores.
pub const SCOUT_RADIUS: u32 = 15;
/// Rest at each visited spot.
const SCOUT_PAUSE_MS: Time = 2000;
const SCOUT_PERSIST: u32 = 2;

fn worklist_mut(game: &mut Game, scout: Serial) -> Result<Option<&mut VecDeque<ScoutTarget>>, EngineError> {
    Ok(match &mut game.bob_mut(scout)?.role {
        Role::Scout { worklist, .. } => Some(worklist),
        _ => None,
    })
}

/// Refill the worklist: every entry is either a visible enemy military site
/// or a random spot, chosen by a coin flip.
fn prepare_scouting(game: &mut Game, scout: Serial, center: Coords) -> Result<(), EngineError> {
    let owner = game.objects.owner(scout).unwrap_or_default();
    let enemies: Vec<(Serial, Coords)> = game
        .objects
        .serials_of::<Building>()
        .into_iter()
        .filter(|&b| game.objects.owner(b).is_some_and(|o| o != owner))
        .filter_map(|b| {
            let building = game.objects.get::<Building>(b)?;
            matches!(building.state, BuildingState::MilitarySite { .. }).then_some((b, building.position))
        })
        .filter(|&(_, pos)| game.map.calc_distance(center, pos) <= SCOUT_RADIUS)
        .filter(|&(_, pos)| {
            game.players
                .get(&owner)
                .is_some_and(|p| p.has_explored(&game.map, pos))
        })
        .collect();
    let spots: Vec<Coords> = game
        .map
        .region(center, SCOUT_RADIUS)
        .into_iter()
        .filter(|&c| game.map.field(c).caps.contains(NodeCaps::WALKABLE))
        .collect();

    let cap = game.config.scout_worklist_cap;
    let markers = game.config.scout_random_markers;
    let mut fresh = Vec::new();
    for _ in 0..markers {
        let pick_enemy = !enemies.is_empty() && game.rng.gen_bool(0.5);
        if pick_enemy {
            let (site, position) = enemies[game.rng.gen_range(0..enemies.len())];
            fresh.push(ScoutTarget::EnemySite { site, position });
        } else if !spots.is_empty() {
            fresh.push(ScoutTarget::Random(spots[game.rng.gen_range(0..spots.len())]));
        }
    }
    if let Some(worklist) = worklist_mut(game, scout)? {
        for target in fresh {
            if worklist.len() >= cap {
                break;
            }
            worklist.push_back(target);
        }
    }
    Ok(())
}

/// Move the scout's revealed area to its current position.
fn reveal(game: &mut Game, scout: Serial) -> Result<(), EngineError> {
    let b = game.bob(scout)?;
    let position = b.position;
    let radius = game
        .descriptions
        .worker(b.descr)
        .map(|d| d.vision_range)
        .unwrap_or(0);
    let old = match b.role {
        Role::Scout { revealed, .. } => revealed,
        _ => return Ok(()),
    };
    if old == Some((position, radius)) {
        return Ok(());
    }
    let owner = game.objects.owner(scout).unwrap_or_default();
    if let Some(player) = game.players.get_mut(&owner) {
        player.see_area(&game.map, position, radius);
        if let Some((c, r)) = old {
            player.unsee_area(&game.map, c, r);
        }
    }
    if let Role::Scout { revealed, .. } = &mut game.bob_mut(scout)?.role {
        *revealed = Some((position, radius));
    }
    Ok(())
}

pub(crate) fn scout_update(game: &mut Game, scout: Serial) -> Result<(), EngineError> {
    match game.get_signal(scout).unwrap_or_default().to_string().as_str() {
        "" => {}
        "blocked" | "fail" => game.signal_handled(scout)?,
        _ => return game.pop_task(scout),
    }
    let state = game.top_state(scout)?;
    let (flag, duration, deadline, arrived) = (state.objvar1, state.ivar1, state.ivar2, state.ivar3);
    let Some(flag_pos) = flag.and_then(|f| game.objects.get::<Flag>(f)).map(|f| f.position) else {
        return game.pop_task(scout);
    };
    let now = game.time();
    if deadline == 0 {
        game.top_state_mut(scout)?.ivar2 = now as i64 + duration;
        log::debug!("MO({}): scouting around {} for {} ms", scout, flag_pos, duration);
        prepare_scouting(game, scout, flag_pos)?;
    }
    reveal(game, scout)?;

    if arrived == 1 {
        game.top_state_mut(scout)?.ivar3 = 0;
        return game.schedule_act(scout, SCOUT_PAUSE_MS);
    }

    let position = game.bob(scout)?.position;
    if deadline != 0 && now as i64 >= deadline {
        if position != flag_pos && start_task_movepath_to(game, scout, flag_pos, 0, FORCE_NONE)? {
            return Ok(());
        }
        return game.pop_task(scout);
    }

    let empty = worklist_mut(game, scout)?.map_or(true, |w| w.is_empty());
    if empty {
        prepare_scouting(game, scout, flag_pos)?;
    }
    let Some(target) = worklist_mut(game, scout)?.and_then(|w| w.pop_front()) else {
        return game.schedule_act(scout, SCOUT_PAUSE_MS);
    };
    let dest = match target {
        ScoutTarget::EnemySite { site, position } => {
            if !game.objects.contains(site) {
                return game.schedule_act(scout, 0);
            }
            // Stop a bit short of the site.
            let around: Vec<Coords> = game
                .map
                .region(position, 2)
                .into_iter()
                .filter(|&c| game.map.calc_distance(position, c) == 2)
                .collect();
            if around.is_empty() {
                position
            } else {
                around[game.rng.gen_range(0..around.len())]
            }
        }
        ScoutTarget::Random(c) => c,
    };
    game.top_state_mut(scout)?.ivar3 = 1;
    if start_task_movepath_to(game, scout, dest, SCOUT_PERSIST, FORCE_NONE)? {
        return Ok(());
    }
    game.top_state_mut(scout)?.ivar3 = 0;
    let delay = game.config.signal_delay_ms;
    game.schedule_act(scout, delay)
}

/// Hide the area the scout revealed.
pub(crate) fn scout_pop(game: &mut Game, scout: Serial) -> Result<(), EngineError> {
    let owner = game.objects.owner(scout).unwrap_or_default();
    let revealed = match &mut game.bob_mut(scout)?.role {
        Role::Scout { revealed, worklist } => {
            worklist.clear();
            revealed.take()
        }
        _ => None,
    };
    if let (Some((c, r)), Some(player)) = (revealed, game.players.get_mut(&owner)) {
        player.unsee_area(&game.map, c, r);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bob::Bob;
    use crate::tasks::TaskKind;
    use crate::testing::GameBuilder;

    #[test]
    fn test_scout_reveals_and_returns() {
        let mut game = GameBuilder::new().with_player(1, "Alice").seed(7).build();
        let flag = game.build_flag(1, Coords::new(10, 10)).unwrap();
        let scout = game.spawn_worker(1, "scout", Coords::new(10, 10)).unwrap();
        game.bob_mut(scout).unwrap().location = Some(flag);
        game.push_task(
            scout,
            crate::bob::State::new(TaskKind::Scout)
                .objvar1(flag)
                .ivar1(SCOUT_DURATION_MS),
            0,
        )
        .unwrap();
        game.run_queue(5_000).unwrap();
        let explored = game.players[&1].explored_count();
        assert!(explored > 0);
        let b = game.objects.get::<Bob>(scout).unwrap();
        match &b.role {
            Role::Scout { worklist, revealed } => {
                assert!(worklist.len() <= game.config.scout_worklist_cap);
                assert!(revealed.is_some());
            }
            other => panic!("not a scout: {other:?}"),
        }
        game.run_queue(SCOUT_DURATION_MS as u64 + 60_000).unwrap();
        let b = game.objects.get::<Bob>(scout);
        assert!(b.map_or(true, |b| !b.has_task(TaskKind::Scout)));
    }

    #[test]
    fn test_worklist_respects_cap() {
        let mut game = GameBuilder::new().with_player(1, "Alice").build();
        game.config.scout_worklist_cap = 3;
        let scout = game.spawn_worker(1, "scout", Coords::new(10, 10)).unwrap();
        prepare_scouting(&mut game, scout, Coords::new(10, 10)).unwrap();
        prepare_scouting(&mut game, scout, Coords::new(10, 10)).unwrap();
        let len = worklist_mut(&mut game, scout).unwrap().map(|w| w.len());
        assert_eq!(len, Some(3));
    }
}
