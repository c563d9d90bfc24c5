//! Carrier programs.
//!
//! `road`: stay on the road, walk to its middle when idle and wait for
//! wares. `transport`: carry one ware from one end of the road to the
//! other, swapping it for a ware going back when the target flag is
//! crowded.
//!
//! A carrier holds at most one promised pickup at a time (see
//! [`Bob::promised_pickup`](crate::bob::Bob::promised_pickup)).

use crate::bob::State;
use crate::error::EngineError;
use crate::game::Game;
use crate::object::Serial;
use crate::tasks::movement::{start_task_movepath, start_task_movepath_to, FORCE_NONE};
use crate::tasks::worker::start_task_waitforcapacity;
use crate::tasks::TaskKind;
use crate::transport::{Flag, Road, FLAG_END, FLAG_START};

/// Pause after fetching a ware before walking off.
const HANDOVER_MS: u64 = 20;

fn road_of(game: &Game, carrier: Serial) -> Option<(Serial, Road)> {
    let location = game.bob(carrier).ok()?.location?;
    game.objects
        .get::<Road>(location)
        .map(|r| (location, r.clone()))
}

/// A ware became pending at road end `end`. Returns whether the carrier
/// reacted to it.
pub fn notify_ware(game: &mut Game, carrier: Serial, end: usize) -> Result<bool, EngineError> {
    let Some((_, road)) = road_of(game, carrier) else {
        return Ok(false);
    };
    let b = game.bob(carrier)?;
    let (top, transporting, promised) = (
        b.top_task(),
        b.has_task(TaskKind::Transport),
        b.promised_pickup(),
    );
    let flag = road.flag(end);
    if top == Some(TaskKind::WaitForCapacity) {
        // Waiting to drop at that flag: a ware going back allows a swap.
        if game.top_state(carrier)?.objvar1 == Some(flag) {
            game.send_signal(carrier, "wakeup")?;
            return Ok(true);
        }
        return Ok(false);
    }
    if transporting || promised.is_some() || !game.bob(carrier)?.has_task(TaskKind::Road) {
        return Ok(false);
    }
    let other = road.flag(end ^ 1);
    let max = game.config.max_transfer_priority;
    let acked = game
        .objects
        .get_mut::<Flag>(flag)
        .is_some_and(|f| f.ack_pickup(carrier, other, max));
    if acked {
        game.bob_mut(carrier)?.set_promised_pickup(Some(end));
        game.send_signal(carrier, "ware")?;
    }
    Ok(true)
}

pub(crate) fn road_update(game: &mut Game, carrier: Serial) -> Result<(), EngineError> {
    let signal = game.get_signal(carrier).unwrap_or_default().to_string();
    match signal.as_str() {
        "" => {}
        "road" | "ware" | "blocked" => game.signal_handled(carrier)?,
        _ => {
            log::trace!("MO({}): road task stops on '{}'", carrier, signal);
            return game.pop_task(carrier);
        }
    }
    let Some((road_serial, road)) = road_of(game, carrier) else {
        return game.pop_task(carrier);
    };
    if !road.carrier.is(carrier) {
        return game.pop_task(carrier);
    }

    if game.bob(carrier)?.promised_pickup().is_none() {
        if let Some(end) = find_pending_ware(game, carrier, road_serial, &road)? {
            game.bob_mut(carrier)?.set_promised_pickup(Some(end));
        }
    }
    if let Some(end) = game.bob(carrier)?.promised_pickup() {
        let delay = game.config.carrier_pickup_delay_ms;
        return game.push_task(
            carrier,
            State::new(TaskKind::Transport).ivar1(end as i64),
            delay,
        );
    }

    // Nothing to do: wait in the middle of the road.
    let position = game.bob(carrier)?.position;
    let idle = road.idle_position(&game.map);
    if position != idle {
        if let Some(index) = road.index_of(&game.map, position) {
            let target = road.idle_index();
            let path = if index < target {
                road.path
                    .trimmed_start(&game.map, index)
                    .truncated(&game.map, target - index)
            } else {
                road.path.truncated(&game.map, index).reversed().truncated(&game.map, index - target)
            };
            return start_task_movepath(game, carrier, path, FORCE_NONE);
        }
        if start_task_movepath_to(game, carrier, idle, 0, FORCE_NONE)? {
            return Ok(());
        }
        return game.pop_task(carrier);
    }
    game.skip_act(carrier)
}

/// Ack a pending ware at one of the road's flags. With wares at both ends
/// the closer flag wins.
fn find_pending_ware(
    game: &mut Game,
    carrier: Serial,
    road_serial: Serial,
    road: &Road,
) -> Result<Option<usize>, EngineError> {
    let pending = |end: usize| {
        game.objects
            .get::<Flag>(road.flag(end))
            .is_some_and(|f| f.has_pending_ware(road.flag(end ^ 1)))
    };
    let end = match (pending(FLAG_START), pending(FLAG_END)) {
        (true, true) => {
            let position = game.bob(carrier)?.position;
            road.find_closest_flag(&game.map, position, game.carrier_step_ms())
        }
        (false, true) => FLAG_END,
        (true, false) => FLAG_START,
        (false, false) => return Ok(None),
    };
    let flag = road.flag(end);
    let max = game.config.max_transfer_priority;
    let acked = game
        .objects
        .get_mut::<Flag>(flag)
        .is_some_and(|f| f.ack_pickup(carrier, road.flag(end ^ 1), max));
    if !acked {
        log::error!("MO({}): road {}: flag {} refused ack", carrier, road_serial, flag);
        return Err(EngineError::AckRefused { flag });
    }
    Ok(Some(end))
}

/// Walk to road end `end`. Returns `true` if a walk was started.
fn walk_to_flag(game: &mut Game, carrier: Serial, road: &Road, end: usize) -> Result<bool, EngineError> {
    let flag_pos = match game.objects.get::<Flag>(road.flag(end)) {
        Some(f) => f.position,
        None => return Ok(false),
    };
    let position = game.bob(carrier)?.position;
    if position == flag_pos {
        return Ok(false);
    }
    match road.path_to_end(&game.map, position, end) {
        Some(path) => start_task_movepath(game, carrier, path, FORCE_NONE).map(|_| true),
        None => start_task_movepath_to(game, carrier, flag_pos, 0, FORCE_NONE),
    }
}

pub(crate) fn transport_update(game: &mut Game, carrier: Serial) -> Result<(), EngineError> {
    let signal = game.get_signal(carrier).unwrap_or_default().to_string();
    match signal.as_str() {
        "" => {}
        "road" | "ware" | "wakeup" => game.signal_handled(carrier)?,
        _ => return game.pop_task(carrier),
    }
    let Some((_, road)) = road_of(game, carrier) else {
        return game.pop_task(carrier);
    };
    let source = game.top_state(carrier)?.ivar1 as usize & 1;
    let dest = source ^ 1;

    if let Some(ware) = game.bob(carrier)?.carried_ware {
        if walk_to_flag(game, carrier, &road, dest)? {
            return Ok(());
        }
        return drop_ware(game, carrier, &road, source, ware);
    }

    if walk_to_flag(game, carrier, &road, source)? {
        return Ok(());
    }
    let b = game.bob_mut(carrier)?;
    if b.promised_pickup() == Some(source) {
        b.set_promised_pickup(None);
    }
    match game.fetch_pending_ware(road.flag(source), carrier, road.flag(dest))? {
        Some(ware) => {
            game.bob_mut(carrier)?.carried_ware = Some(ware);
            game.schedule_act(carrier, HANDOVER_MS)
        }
        // Somebody else was faster, or the ware was rerouted.
        None => game.pop_task(carrier),
    }
}

/// Leaving the road or giving up a transport: acks nobody will serve go back.
pub(crate) fn release_pickups_pop(game: &mut Game, carrier: Serial) -> Result<(), EngineError> {
    game.release_pickups(carrier)
}

/// At the target flag with a ware.
fn drop_ware(
    game: &mut Game,
    carrier: Serial,
    road: &Road,
    source: usize,
    ware: Serial,
) -> Result<(), EngineError> {
    let dest = source ^ 1;
    let dest_flag = road.flag(dest);
    let back = road.flag(source);
    let threshold = game.config.congestion_threshold;
    let Some(f) = game.objects.get::<Flag>(dest_flag) else {
        return game.pop_task(carrier);
    };
    let full = !f.has_capacity();
    let crowded = full || f.is_congested(threshold);
    let promised_here = game.bob(carrier)?.promised_pickup() == Some(dest);

    if crowded && !promised_here {
        let max = game.config.max_transfer_priority;
        let f = game.flag_mut(dest_flag)?;
        if f.has_pending_ware(back) {
            if !f.ack_pickup(carrier, back, max) {
                return Err(EngineError::AckRefused { flag: dest_flag });
            }
            game.bob_mut(carrier)?.set_promised_pickup(Some(dest));
        } else if full {
            if start_task_waitforcapacity(game, carrier, dest_flag)? {
                return Ok(());
            }
        }
    }

    game.bob_mut(carrier)?.carried_ware = None;
    let swap = if game.bob(carrier)?.promised_pickup() == Some(dest) {
        game.bob_mut(carrier)?.set_promised_pickup(None);
        game.swap_ware(dest_flag, carrier, back, ware)?
    } else {
        game.add_ware_to_flag(dest_flag, ware)?;
        None
    };

    match swap {
        Some(other) => {
            log::trace!("MO({}): swapped ware {} for {}", carrier, ware, other);
            game.bob_mut(carrier)?.carried_ware = Some(other);
            game.top_state_mut(carrier)?.ivar1 = dest as i64;
            game.schedule_act(carrier, HANDOVER_MS)
        }
        None => game.pop_task(carrier),
    }
}
