//! One-on-one fights between soldiers.
//!
//! A [`Battle`] is a map object of its own. Once both soldiers stand on the
//! same node it strikes every `battle_round_ms`, alternating between the
//! two. A strike hits unless the victim evades; a hit takes a random attack
//! value, reduced by the victim's defense. The battle ends when one soldier
//! is dead or gone.

use crate::bob::Bob;
use crate::cmd_queue::Command;
use crate::error::EngineError;
use crate::game::Game;
use crate::object::{Body, OPtr, Serial};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Battle {
    /// The attacker.
    pub first: Serial,
    pub second: Serial,
    /// Whose turn the next strike is.
    pub first_strikes: bool,
    pub actid: u32,
}

impl Battle {
    pub fn new(first: Serial, second: Serial) -> Self {
        Self {
            first,
            second,
            first_strikes: true,
            actid: 0,
        }
    }
}

impl Game {
    /// Pair two soldiers in a new battle.
    pub(crate) fn start_battle(&mut self, first: Serial, second: Serial) -> Result<Serial, EngineError> {
        let owner = self.objects.owner(first).unwrap_or_default();
        let battle = self.objects.insert(owner, Body::Battle(Battle::new(first, second)));
        for soldier in [first, second] {
            if let Some(s) = self.bob_mut(soldier)?.soldier_mut() {
                s.battle = OPtr::new(battle);
            }
        }
        log::debug!("Battle {}: {} vs {}", battle, first, second);
        self.schedule_battle_act(battle)?;
        Ok(battle)
    }

    fn schedule_battle_act(&mut self, battle: Serial) -> Result<(), EngineError> {
        let due = self.time + self.config.battle_round_ms;
        let data = self
            .objects
            .get::<Battle>(battle)
            .map(|b| b.actid)
            .ok_or(EngineError::MissingObject(battle))?;
        self.queue.enqueue(due, Command::Act { serial: battle, data });
        Ok(())
    }

    /// Entry point of `Command::Act` for battles.
    pub(crate) fn battle_act(&mut self, battle: Serial, data: u32) -> Result<(), EngineError> {
        let Some(b) = self.objects.get_mut::<Battle>(battle) else {
            return Ok(());
        };
        if b.actid != data {
            self.metrics.stale_acts += 1;
            return Ok(());
        }
        b.actid += 1;
        let (first, second, first_strikes) = (b.first, b.second, b.first_strikes);

        let fighter = |game: &Game, s: Serial| {
            game.objects
                .get::<Bob>(s)
                .and_then(|b| b.soldier().map(|d| (b.position, d.health, d.stats)))
                .filter(|&(_, health, _)| health > 0)
        };
        let (Some(a), Some(d)) = (fighter(self, first), fighter(self, second)) else {
            return self.end_battle(battle);
        };
        if a.0 != d.0 {
            // The defender is still on its way out.
            return self.schedule_battle_act(battle);
        }

        let (striker, victim, attack, defense) = if first_strikes {
            (first, second, a.2, d.2)
        } else {
            (second, first, d.2, a.2)
        };
        if let Some(b) = self.objects.get_mut::<Battle>(battle) {
            b.first_strikes = !first_strikes;
        }
        let roll = self.rng.gen_range(0..100u32);
        if roll < defense.evade {
            log::trace!("Battle {}: {} evaded {}", battle, victim, striker);
            return self.schedule_battle_act(battle);
        }
        let raw = self.rng.gen_range(attack.attack_min..=attack.attack_max.max(attack.attack_min));
        let damage = raw * 100u32.saturating_sub(defense.defense) / 100;
        let remaining = match self.bob_mut(victim)?.soldier_mut() {
            Some(s) => {
                s.health = s.health.saturating_sub(damage);
                s.health
            }
            None => 0,
        };
        log::trace!("Battle {}: {} hits {} for {} ({} left)", battle, striker, victim, damage, remaining);
        if remaining == 0 {
            log::debug!("Battle {}: {} defeated {}", battle, striker, victim);
            return self.end_battle(battle);
        }
        self.schedule_battle_act(battle)
    }

    fn end_battle(&mut self, battle: Serial) -> Result<(), EngineError> {
        let Some(b) = self.objects.remove(battle) else {
            return Ok(());
        };
        let Body::Battle(b) = b.body else {
            return Ok(());
        };
        for soldier in [b.first, b.second] {
            let Some(s) = self.objects.get_mut::<Bob>(soldier).and_then(|b| b.soldier_mut()) else {
                continue;
            };
            if s.battle.is(battle) {
                s.battle = OPtr::null();
            }
            self.send_signal(soldier, "battle")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bob::State;
    use crate::geometry::Coords;
    use crate::tasks::TaskKind;
    use crate::testing::GameBuilder;

    /// Keep a soldier standing still until it gets a signal.
    fn park(game: &mut Game, soldier: Serial) {
        game.push_task(soldier, State::new(TaskKind::Idle).ivar1(-1), 0)
            .unwrap();
    }

    fn health(game: &Game, soldier: Serial) -> u32 {
        game.bob(soldier).unwrap().soldier().unwrap().health
    }

    #[test]
    fn test_battle_ends_with_one_dead_soldier() {
        let mut game = GameBuilder::new()
            .with_player(1, "Alice")
            .with_player(2, "Bob")
            .seed(3)
            .build();
        let a = game.spawn_worker(1, "soldier", Coords::new(5, 5)).unwrap();
        let d = game.spawn_worker(2, "soldier", Coords::new(5, 5)).unwrap();
        park(&mut game, a);
        park(&mut game, d);
        let battle = game.start_battle(a, d).unwrap();
        assert!(game.bob(a).unwrap().is_in_battle());
        for _ in 0..300 {
            let t = game.time() + 1000;
            game.run_queue(t).unwrap();
            if game.objects.get::<Battle>(battle).is_none() {
                break;
            }
        }
        assert!(game.objects.get::<Battle>(battle).is_none());
        let alive = [a, d].iter().filter(|&&s| health(&game, s) > 0).count();
        assert_eq!(alive, 1);
        assert!(!game.bob(a).unwrap().is_in_battle());
        assert!(!game.bob(d).unwrap().is_in_battle());
    }

    #[test]
    fn test_battle_waits_for_both_soldiers() {
        let mut game = GameBuilder::new()
            .with_player(1, "Alice")
            .with_player(2, "Bob")
            .build();
        let a = game.spawn_worker(1, "soldier", Coords::new(5, 5)).unwrap();
        let d = game.spawn_worker(2, "soldier", Coords::new(9, 9)).unwrap();
        park(&mut game, a);
        park(&mut game, d);
        let battle = game.start_battle(a, d).unwrap();
        game.run_queue(10_000).unwrap();
        let max = game.bob(d).unwrap().soldier().unwrap().stats.max_health;
        assert_eq!(health(&game, d), max);
        assert_eq!(health(&game, a), max);
        assert!(game.objects.get::<Battle>(battle).is_some());
    }
}
