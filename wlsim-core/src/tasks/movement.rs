//! Generic bob tasks: `idle`, `movepath` and `move`.

use crate::bob::{StartWalk, State};
use crate::error::EngineError;
use crate::game::Game;
use crate::geometry::{Coords, Direction, Path};
use crate::object::{Serial, Time};
use crate::tasks::TaskKind;

/// `movepath` never forces.
pub const FORCE_NONE: i64 = 0;
/// Every step of the path is forced through blocked nodes.
pub const FORCE_ALL: i64 = 1;
/// Only the final step is forced.
pub const FORCE_LAST: i64 = 2;

/// Idle for `timeout` ms; a negative timeout idles until a signal arrives.
pub fn start_task_idle(game: &mut Game, bob: Serial, timeout: i64) -> Result<(), EngineError> {
    game.push_task(bob, State::new(TaskKind::Idle).ivar1(timeout), 0)
}

pub(crate) fn idle_update(game: &mut Game, bob: Serial) -> Result<(), EngineError> {
    let timeout = game.top_state(bob)?.ivar1;
    let signalled = game.get_signal(bob).is_some_and(|s| !s.is_empty());
    if timeout == 0 || signalled {
        return game.pop_task(bob);
    }
    game.top_state_mut(bob)?.ivar1 = 0;
    if timeout > 0 {
        game.schedule_act(bob, timeout as Time)
    } else {
        game.skip_act(bob)
    }
}

/// Walk along `path`. `force` is one of the `FORCE_*` modes.
pub fn start_task_movepath(
    game: &mut Game,
    bob: Serial,
    path: Path,
    force: i64,
) -> Result<(), EngineError> {
    game.push_task(bob, State::new(TaskKind::MovePath).path(path).ivar2(force), 0)
}

/// Find a path to `dest` and walk it. Returns `false` when no path exists.
pub fn start_task_movepath_to(
    game: &mut Game,
    bob: Serial,
    dest: Coords,
    persist: u32,
    force: i64,
) -> Result<bool, EngineError> {
    let b = game.bob(bob)?;
    let Some(path) = game.map.findpath(b.position, dest, persist, b.movecaps()) else {
        log::debug!("MO({}): no path from {} to {}", bob, b.position, dest);
        return Ok(false);
    };
    start_task_movepath(game, bob, path, force)?;
    Ok(true)
}

pub(crate) fn movepath_update(game: &mut Game, bob: Serial) -> Result<(), EngineError> {
    if game.get_signal(bob).is_some_and(|s| !s.is_empty()) {
        // Leave the signal for the task below.
        return game.pop_task(bob);
    }
    let state = game.top_state(bob)?;
    let Some(path) = &state.path else {
        return game.pop_task(bob);
    };
    let index = state.ivar1 as usize;
    if index >= path.nsteps() {
        return game.pop_task(bob);
    }
    let dir = path.steps[index];
    let force = state.ivar2 == FORCE_ALL || (state.ivar2 == FORCE_LAST && index + 1 == path.nsteps());
    game.top_state_mut(bob)?.ivar1 += 1;
    start_task_move(game, bob, dir, force)
}

/// Take a single step, or signal `blocked`/`fail` if that is impossible.
pub fn start_task_move(
    game: &mut Game,
    bob: Serial,
    dir: Direction,
    force: bool,
) -> Result<(), EngineError> {
    match game.start_walk(bob, dir, force)? {
        StartWalk::Started(ms) => game.push_task(bob, State::new(TaskKind::Move), ms),
        StartWalk::Blocked => game.send_signal(bob, "blocked"),
        StartWalk::Failed => game.send_signal(bob, "fail"),
    }
}

pub(crate) fn move_update(game: &mut Game, bob: Serial) -> Result<(), EngineError> {
    let now = game.time();
    if let Some(walk) = game.bob(bob)?.walking {
        if walk.end > now {
            // Woken early by a signal; finish the step first.
            return game.schedule_act(bob, walk.end - now);
        }
    }
    game.end_walk(bob)?;
    game.pop_task(bob)
}
