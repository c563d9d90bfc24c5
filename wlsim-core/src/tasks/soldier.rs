//! Soldier programs: `attack`, `defense`, `battle` and `die`.
//!
//! An attacker walks to the flag of the attacked site and asks it for a
//! defender. Each defender that comes out fights one [`Battle`]; when no
//! defender is left the site is conquered. Badly injured attackers turn
//! back home.
//!
//! Soldiers cannot walk onto nodes where a fight is going on and get a
//! `"blocked"` signal instead. Every such signal widens the path search;
//! after too many in a row the soldier forces its way through.
//!
//! [`Battle`]: crate::battle::Battle

use crate::bob::State;
use crate::building::Building;
use crate::error::EngineError;
use crate::game::Game;
use crate::geometry::{Coords, Direction};
use crate::notification::Note;
use crate::object::{Attackable, Serial, Time};
use crate::tasks::movement::{start_task_move, start_task_movepath_to, FORCE_ALL, FORCE_NONE};
use crate::tasks::worker::start_task_return;
use crate::tasks::TaskKind;

/// Initial path persistence of an attack.
const ATTACK_PERSIST: i64 = 2;
/// How long a dying soldier stays on the field.
const DIE_DELAY_MS: Time = 1000;

const PHASE_ATTACK: i64 = 0;
const PHASE_RETURN: i64 = 1;

pub fn start_task_attack(game: &mut Game, soldier: Serial, target: Serial) -> Result<(), EngineError> {
    game.push_task(
        soldier,
        State::new(TaskKind::Attack)
            .objvar1(target)
            .ivar1(PHASE_ATTACK)
            .ivar2(ATTACK_PERSIST),
        0,
    )
}

pub fn start_task_defense(game: &mut Game, soldier: Serial, home: Serial) -> Result<(), EngineError> {
    game.push_task(soldier, State::new(TaskKind::Defense).objvar1(home), 0)
}

/// Soldier state needed by every program: (in battle, should retreat, dead, home).
fn soldier_status(game: &Game, soldier: Serial) -> Result<(bool, bool, bool, Option<Serial>), EngineError> {
    let b = game.bob(soldier)?;
    Ok(match b.soldier() {
        Some(s) => (!s.battle.is_null(), s.should_retreat(), s.health == 0, s.home),
        None => (false, false, false, None),
    })
}

/// Count a `"blocked"` signal on the attack frame. Only blocks in a row at
/// the same node add up; a soldier that got further since starts over.
fn note_blocked(state: &mut State, position: Coords) {
    if state.coords != Some(position) {
        state.coords = Some(position);
        state.ivar3 = 0;
    }
    state.ivar3 += 1;
    state.ivar2 += 1;
}

/// Walk home and get back into the site's soldier list.
fn go_home(game: &mut Game, soldier: Serial, home: Option<Serial>) -> Result<(), EngineError> {
    let Some((home, home_pos)) = home.and_then(|h| game.objects.get::<Building>(h).map(|b| (h, b.position))) else {
        return game.pop_task(soldier);
    };
    if game.bob(soldier)?.position == home_pos {
        game.soldier_returned(home, soldier)?;
        return game.pop_task(soldier);
    }
    start_task_return(game, soldier, home)
}

pub(crate) fn attack_update(game: &mut Game, soldier: Serial) -> Result<(), EngineError> {
    let signal = game.get_signal(soldier).unwrap_or_default().to_string();
    match signal.as_str() {
        "" | "battle" | "wakeup" => game.signal_handled(soldier)?,
        "blocked" => {
            game.signal_handled(soldier)?;
            let position = game.bob(soldier)?.position;
            let s = game.top_state_mut(soldier)?;
            note_blocked(s, position);
            log::trace!("MO({}): attack blocked {} times at {}", soldier, s.ivar3, position);
        }
        "fail" => {
            game.signal_handled(soldier)?;
            game.top_state_mut(soldier)?.ivar1 = PHASE_RETURN;
        }
        _ => return game.pop_task(soldier),
    }

    let (in_battle, retreat, dead, home) = soldier_status(game, soldier)?;
    if dead {
        return game.push_task(soldier, State::new(TaskKind::Die), 0);
    }
    if in_battle {
        return game.push_task(soldier, State::new(TaskKind::Battle), 0);
    }
    let state = game.top_state(soldier)?;
    let (target, mut phase, persist, blocked) = (state.objvar1, state.ivar1, state.ivar2, state.ivar3);

    if phase == PHASE_ATTACK && retreat {
        log::debug!("MO({}): injured, retreating", soldier);
        phase = PHASE_RETURN;
    }
    if phase == PHASE_ATTACK {
        let owner = game.objects.owner(soldier);
        let target_pos = target.and_then(|t| {
            let b = game.objects.get::<Building>(t)?;
            let hostile = game.objects.owner(t) != owner && b.can_be_attacked();
            hostile.then(|| b.attack_target_position(&game.map))
        });
        match (target, target_pos) {
            (Some(target), Some(target_pos)) => {
                let position = game.bob(soldier)?.position;
                if position != target_pos {
                    let force = if blocked > game.config.soldier_stuck_threshold {
                        FORCE_ALL
                    } else {
                        FORCE_NONE
                    };
                    if start_task_movepath_to(game, soldier, target_pos, persist.max(0) as u32, force)? {
                        return Ok(());
                    }
                    log::debug!("MO({}): cannot reach {}", soldier, target_pos);
                } else {
                    let s = game.top_state_mut(soldier)?;
                    s.ivar3 = 0;
                    s.coords = None;
                    if game.defend_request(target, soldier)? {
                        return game.push_task(soldier, State::new(TaskKind::Battle), 0);
                    }
                    game.conquer_site(target, soldier)?;
                }
            }
            _ => log::debug!("MO({}): attack target gone", soldier),
        }
        phase = PHASE_RETURN;
    }
    game.top_state_mut(soldier)?.ivar1 = phase;
    go_home(game, soldier, home)
}

pub(crate) fn defense_update(game: &mut Game, soldier: Serial) -> Result<(), EngineError> {
    let signal = game.get_signal(soldier).unwrap_or_default().to_string();
    match signal.as_str() {
        "" | "battle" | "blocked" | "wakeup" => game.signal_handled(soldier)?,
        _ => return game.pop_task(soldier),
    }
    let (in_battle, _, dead, _) = soldier_status(game, soldier)?;
    if dead {
        return game.push_task(soldier, State::new(TaskKind::Die), 0);
    }
    let home = game.top_state(soldier)?.objvar1;
    if !in_battle {
        return go_home(game, soldier, home);
    }
    // The attacker waits on the flag in front of the site.
    let site = home.and_then(|h| {
        let b = game.objects.get::<Building>(h)?;
        Some((b.position, b.attack_target_position(&game.map)))
    });
    let position = game.bob(soldier)?.position;
    match site {
        Some((_, flag_pos)) if position == flag_pos => {
            game.push_task(soldier, State::new(TaskKind::Battle), 0)
        }
        Some((home_pos, _)) if position == home_pos => {
            start_task_move(game, soldier, Direction::SouthEast, true)
        }
        Some((_, flag_pos)) => {
            if start_task_movepath_to(game, soldier, flag_pos, 0, FORCE_ALL)? {
                return Ok(());
            }
            game.push_task(soldier, State::new(TaskKind::Battle), 0)
        }
        None => game.push_task(soldier, State::new(TaskKind::Battle), 0),
    }
}

/// Wait for the battle to end. The battle object does the fighting.
pub(crate) fn battle_update(game: &mut Game, soldier: Serial) -> Result<(), EngineError> {
    if game.get_signal(soldier).is_some_and(|s| !s.is_empty()) {
        game.signal_handled(soldier)?;
    }
    let (in_battle, _, dead, _) = soldier_status(game, soldier)?;
    if dead {
        game.pop_task(soldier)?;
        return game.push_task(soldier, State::new(TaskKind::Die), 0);
    }
    if !in_battle {
        return game.pop_task(soldier);
    }
    game.skip_act(soldier)
}

pub(crate) fn die_update(game: &mut Game, soldier: Serial) -> Result<(), EngineError> {
    if game.get_signal(soldier).is_some_and(|s| !s.is_empty()) {
        game.signal_handled(soldier)?;
    }
    if game.top_state(soldier)?.ivar1 == 0 {
        game.top_state_mut(soldier)?.ivar1 = 1;
        return game.schedule_act(soldier, DIE_DELAY_MS);
    }
    let position = game.bob(soldier)?.position;
    let player = game.objects.owner(soldier).unwrap_or_default();
    log::debug!("MO({}): soldier died at {}", soldier, position);
    game.soldier_died(soldier)?;
    game.notes.publish(&Note::SoldierKilled {
        player,
        soldier,
        position,
    });
    game.schedule_destroy(soldier);
    Ok(())
}
