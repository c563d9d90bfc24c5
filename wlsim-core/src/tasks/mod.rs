//! Task programs and their dispatch table.
//!
//! Each [`TaskKind`] has a static [`Task`] descriptor and up to three entry
//! points: `update` (mandatory), `signal_immediate` and `pop`. The entry
//! points are free functions taking the game and the bob's serial.

pub mod carrier;
pub mod movement;
pub mod scout;
pub mod soldier;
pub mod worker;

use crate::error::EngineError;
use crate::game::Game;
use crate::object::Serial;
use serde::{Deserialize, Serialize};

/// Static description of a task kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Task {
    pub name: &'static str,
    /// May appear at most once per stack.
    pub unique: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    Idle,
    MovePath,
    Move,
    Transfer,
    GoWarehouse,
    Return,
    LeaveBuilding,
    FetchFromFlag,
    DropOff,
    WaitForCapacity,
    Fugitive,
    Geologist,
    BuildingWork,
    Road,
    Transport,
    Scout,
    Attack,
    Defense,
    Battle,
    Die,
}

impl TaskKind {
    pub const fn descr(self) -> Task {
        let (name, unique) = match self {
            TaskKind::Idle => ("idle", false),
            TaskKind::MovePath => ("movepath", false),
            TaskKind::Move => ("move", false),
            TaskKind::Transfer => ("transfer", true),
            TaskKind::GoWarehouse => ("gowarehouse", true),
            TaskKind::Return => ("return", true),
            TaskKind::LeaveBuilding => ("leavebuilding", true),
            TaskKind::FetchFromFlag => ("fetchfromflag", true),
            TaskKind::DropOff => ("dropoff", true),
            TaskKind::WaitForCapacity => ("waitforcapacity", true),
            TaskKind::Fugitive => ("fugitive", true),
            TaskKind::Geologist => ("geologist", true),
            TaskKind::BuildingWork => ("buildingwork", true),
            TaskKind::Road => ("road", true),
            TaskKind::Transport => ("transport", true),
            TaskKind::Scout => ("scout", true),
            TaskKind::Attack => ("attack", true),
            TaskKind::Defense => ("defense", true),
            TaskKind::Battle => ("battle", true),
            TaskKind::Die => ("die", true),
        };
        Task { name, unique }
    }

    pub const fn name(self) -> &'static str {
        self.descr().name
    }
}

pub(crate) fn update(game: &mut Game, bob: Serial, task: TaskKind) -> Result<(), EngineError> {
    match task {
        TaskKind::Idle => movement::idle_update(game, bob),
        TaskKind::MovePath => movement::movepath_update(game, bob),
        TaskKind::Move => movement::move_update(game, bob),
        TaskKind::Transfer => worker::transfer_update(game, bob),
        TaskKind::GoWarehouse => worker::gowarehouse_update(game, bob),
        TaskKind::Return => worker::return_update(game, bob),
        TaskKind::LeaveBuilding => worker::leavebuilding_update(game, bob),
        TaskKind::FetchFromFlag => worker::fetchfromflag_update(game, bob),
        TaskKind::DropOff => worker::dropoff_update(game, bob),
        TaskKind::WaitForCapacity => worker::waitforcapacity_update(game, bob),
        TaskKind::Fugitive => worker::fugitive_update(game, bob),
        TaskKind::Geologist => worker::geologist_update(game, bob),
        TaskKind::BuildingWork => worker::buildingwork_update(game, bob),
        TaskKind::Road => carrier::road_update(game, bob),
        TaskKind::Transport => carrier::transport_update(game, bob),
        TaskKind::Scout => scout::scout_update(game, bob),
        TaskKind::Attack => soldier::attack_update(game, bob),
        TaskKind::Defense => soldier::defense_update(game, bob),
        TaskKind::Battle => soldier::battle_update(game, bob),
        TaskKind::Die => soldier::die_update(game, bob),
    }
}

/// Bookkeeping run on every frame when a signal arrives, top to bottom.
pub(crate) fn signal_immediate(
    game: &mut Game,
    bob: Serial,
    task: TaskKind,
) -> Result<(), EngineError> {
    match task {
        TaskKind::GoWarehouse => worker::gowarehouse_signal_immediate(game, bob),
        _ => Ok(()),
    }
}

pub(crate) fn pop_hook(game: &mut Game, bob: Serial, task: TaskKind) -> Result<(), EngineError> {
    match task {
        TaskKind::WaitForCapacity => worker::waitforcapacity_pop(game, bob),
        TaskKind::GoWarehouse => worker::gowarehouse_pop(game, bob),
        TaskKind::Scout => scout::scout_pop(game, bob),
        TaskKind::Road | TaskKind::Transport => carrier::release_pickups_pop(game, bob),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_names_are_distinct() {
        let all = [
            TaskKind::Idle,
            TaskKind::MovePath,
            TaskKind::Move,
            TaskKind::Transfer,
            TaskKind::GoWarehouse,
            TaskKind::Return,
            TaskKind::LeaveBuilding,
            TaskKind::FetchFromFlag,
            TaskKind::DropOff,
            TaskKind::WaitForCapacity,
            TaskKind::Fugitive,
            TaskKind::Geologist,
            TaskKind::BuildingWork,
            TaskKind::Road,
            TaskKind::Transport,
            TaskKind::Scout,
            TaskKind::Attack,
            TaskKind::Defense,
            TaskKind::Battle,
            TaskKind::Die,
        ];
        let mut names: Vec<_> = all.iter().map(|t| t.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), all.len());
        assert!(!TaskKind::MovePath.descr().unique);
        assert!(TaskKind::Transport.descr().unique);
    }
}
