//! # Task-stack engine
//!
//! A [`Bob`] is any moving entity (carrier, worker, soldier, scout). Its
//! behaviour is a stack of [`State`] frames; only the top frame is active.
//!
//! ```text
//!   Cmd Act{serial, actid} ──▶ bob_act ──▶ update(top frame)
//!        ▲                                   │
//!        │        schedule_act / skip_act    │
//!        └──── push_task / pop_task ◀────────┤
//!                 send_signal ◀──────────────┘
//! ```
//!
//! Every update must end by scheduling an act, skipping (waiting for a
//! signal), popping its frame or sending a signal. Each scheduled act carries
//! the current `actid`; acts scheduled before a later signal, pop or reset
//! carry a stale id and are dropped when they come due.

use crate::battle::Battle;
use crate::cmd_queue::Command;
use crate::error::EngineError;
use crate::game::Game;
use crate::geometry::{Coords, Direction, NodeCaps, Path};
use crate::object::{HasTaskStack, OPtr, Serial, Time};
use crate::tasks::{self, TaskKind};
use crate::transport::{SupplyId, TransferId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use wldata::{DescriptionIndex, SoldierStats, WorkerKind};

/// One task frame. The scratch fields belong to the frame's task alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub task: TaskKind,
    pub ivar1: i64,
    pub ivar2: i64,
    pub ivar3: i64,
    pub objvar1: Option<Serial>,
    pub svar1: String,
    pub coords: Option<Coords>,
    pub path: Option<Path>,
    pub route: Option<Vec<Serial>>,
}

impl State {
    pub fn new(task: TaskKind) -> Self {
        Self {
            task,
            ivar1: 0,
            ivar2: 0,
            ivar3: 0,
            objvar1: None,
            svar1: String::new(),
            coords: None,
            path: None,
            route: None,
        }
    }

    pub fn ivar1(mut self, v: i64) -> Self {
        self.ivar1 = v;
        self
    }

    pub fn ivar2(mut self, v: i64) -> Self {
        self.ivar2 = v;
        self
    }

    pub fn objvar1(mut self, serial: Serial) -> Self {
        self.objvar1 = Some(serial);
        self
    }

    pub fn svar1(mut self, s: impl Into<String>) -> Self {
        self.svar1 = s.into();
        self
    }

    pub fn coords(mut self, c: Coords) -> Self {
        self.coords = Some(c);
        self
    }

    pub fn path(mut self, path: Path) -> Self {
        self.path = Some(path);
        self
    }
}

/// A step in progress, for drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Walk {
    pub from: Coords,
    pub dir: Direction,
    pub start: Time,
    pub end: Time,
}

/// Outcome of trying to take one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartWalk {
    /// Step started; the bob arrives after this many ms.
    Started(Time),
    /// Another bob holds the node (e.g. a fight is going on there).
    Blocked,
    /// The node cannot be entered at all.
    Failed,
}

/// A place a scout wants to visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoutTarget {
    EnemySite { site: Serial, position: Coords },
    Random(Coords),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoldierData {
    pub stats: SoldierStats,
    pub health: u32,
    pub battle: OPtr<Battle>,
    /// Military site the soldier belongs to.
    pub home: Option<Serial>,
}

impl SoldierData {
    pub fn new(stats: SoldierStats) -> Self {
        Self {
            stats,
            health: stats.max_health,
            battle: OPtr::null(),
            home: None,
        }
    }

    /// Injured badly enough to give up an attack.
    pub fn should_retreat(&self) -> bool {
        self.health * 100 < self.stats.max_health * self.stats.retreat_health_percent
    }
}

/// Kind specific data of a bob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Worker,
    Carrier {
        /// Road end (0 = start, 1 = end) where a ware was acked for us.
        promised_pickup_to: Option<usize>,
    },
    Soldier(SoldierData),
    Scout {
        worklist: VecDeque<ScoutTarget>,
        /// Area currently revealed by the scout.
        revealed: Option<(Coords, u32)>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bob {
    pub descr: DescriptionIndex,
    pub kind: WorkerKind,
    pub position: Coords,
    pub walking: Option<Walk>,
    pub stack: Vec<State>,
    pub signal: String,
    pub actid: u32,
    pub actscheduled: bool,
    #[serde(default)]
    pub in_act: bool,
    /// Flag, road or building the worker belongs to right now.
    pub location: Option<Serial>,
    pub carried_ware: Option<Serial>,
    pub transfer: Option<TransferId>,
    pub supply: Option<SupplyId>,
    pub role: Role,
}

impl Bob {
    pub fn new(descr: DescriptionIndex, kind: WorkerKind, position: Coords, role: Role) -> Self {
        Self {
            descr,
            kind,
            position,
            walking: None,
            stack: Vec::new(),
            signal: String::new(),
            actid: 0,
            actscheduled: false,
            in_act: false,
            location: None,
            carried_ware: None,
            transfer: None,
            supply: None,
            role,
        }
    }

    pub fn movecaps(&self) -> NodeCaps {
        match self.kind {
            WorkerKind::Ferry => NodeCaps::WALKABLE | NodeCaps::SWIMMABLE,
            _ => NodeCaps::WALKABLE,
        }
    }

    pub fn top_task(&self) -> Option<TaskKind> {
        self.stack.last().map(|s| s.task)
    }

    pub fn has_task(&self, task: TaskKind) -> bool {
        self.stack.iter().any(|s| s.task == task)
    }

    pub fn soldier(&self) -> Option<&SoldierData> {
        match &self.role {
            Role::Soldier(s) => Some(s),
            _ => None,
        }
    }

    pub fn soldier_mut(&mut self) -> Option<&mut SoldierData> {
        match &mut self.role {
            Role::Soldier(s) => Some(s),
            _ => None,
        }
    }

    pub fn promised_pickup(&self) -> Option<usize> {
        match self.role {
            Role::Carrier { promised_pickup_to } => promised_pickup_to,
            _ => None,
        }
    }

    pub fn set_promised_pickup(&mut self, to: Option<usize>) {
        if let Role::Carrier { promised_pickup_to } = &mut self.role {
            *promised_pickup_to = to;
        }
    }

    pub fn is_in_battle(&self) -> bool {
        self.soldier().is_some_and(|s| !s.battle.is_null())
    }
}

impl HasTaskStack for Bob {
    fn stack(&self) -> &[State] {
        &self.stack
    }

    fn signal(&self) -> &str {
        &self.signal
    }
}

impl Game {
    pub(crate) fn bob(&self, serial: Serial) -> Result<&Bob, EngineError> {
        self.objects
            .get::<Bob>(serial)
            .ok_or(EngineError::MissingObject(serial))
    }

    pub(crate) fn bob_mut(&mut self, serial: Serial) -> Result<&mut Bob, EngineError> {
        self.objects
            .get_mut::<Bob>(serial)
            .ok_or(EngineError::MissingObject(serial))
    }

    /// Top frame of `serial`'s stack.
    pub(crate) fn top_state(&self, serial: Serial) -> Result<&State, EngineError> {
        self.bob(serial)?
            .stack
            .last()
            .ok_or_else(|| EngineError::TaskStackMisuse {
                serial,
                reason: "no active task".to_string(),
            })
    }

    pub(crate) fn top_state_mut(&mut self, serial: Serial) -> Result<&mut State, EngineError> {
        self.bob_mut(serial)?
            .stack
            .last_mut()
            .ok_or_else(|| EngineError::TaskStackMisuse {
                serial,
                reason: "no active task".to_string(),
            })
    }

    pub fn get_signal(&self, serial: Serial) -> Option<&str> {
        self.objects.get::<Bob>(serial).map(|b| b.signal.as_str())
    }

    /// Schedule the next act of `serial` `delay` ms from now.
    pub fn schedule_act(&mut self, serial: Serial, delay: Time) -> Result<(), EngineError> {
        let due = self.time + delay;
        let bob = self.bob_mut(serial)?;
        bob.actscheduled = true;
        let data = bob.actid;
        self.queue.enqueue(due, Command::Act { serial, data });
        Ok(())
    }

    /// Do not act again until a signal arrives.
    pub fn skip_act(&mut self, serial: Serial) -> Result<(), EngineError> {
        let bob = self.bob_mut(serial)?;
        if !bob.in_act {
            return Err(EngineError::TaskStackMisuse {
                serial,
                reason: "skip_act outside of act".to_string(),
            });
        }
        bob.actscheduled = true;
        Ok(())
    }

    /// Push a new frame and schedule its first update after `delay` ms.
    pub fn push_task(&mut self, serial: Serial, state: State, delay: Time) -> Result<(), EngineError> {
        let task = state.task;
        let bob = self.bob_mut(serial)?;
        if task.descr().unique && bob.has_task(task) {
            return Err(EngineError::DuplicateUniqueTask {
                serial,
                task: task.name(),
            });
        }
        if !bob.in_act {
            // Started from outside: acts issued before this push are obsolete.
            bob.actid += 1;
        }
        log::trace!("MO({}): push task {}", serial, task.name());
        bob.stack.push(state);
        self.schedule_act(serial, delay)
    }

    /// Pop the top frame. Only the frame's own update may do this.
    pub fn pop_task(&mut self, serial: Serial) -> Result<(), EngineError> {
        let bob = self.bob(serial)?;
        let Some(task) = bob.top_task() else {
            return Err(EngineError::TaskStackMisuse {
                serial,
                reason: "pop_task on empty stack".to_string(),
            });
        };
        if !bob.in_act {
            return Err(EngineError::TaskStackMisuse {
                serial,
                reason: format!("pop_task of {} outside of act", task.name()),
            });
        }
        tasks::pop_hook(self, serial, task)?;
        let bob = self.bob_mut(serial)?;
        bob.stack.pop();
        log::trace!("MO({}): pop task {}", serial, task.name());
        let delay = self.config.signal_delay_ms;
        self.schedule_act(serial, delay)
    }

    /// Overwrite the pending signal and wake the bob up.
    pub fn send_signal(&mut self, serial: Serial, signal: &str) -> Result<(), EngineError> {
        let Some(bob) = self.objects.get_mut::<Bob>(serial) else {
            return Ok(());
        };
        log::trace!("MO({}): signal '{}'", serial, signal);
        bob.signal = signal.to_string();
        let frames: Vec<TaskKind> = bob.stack.iter().rev().map(|s| s.task).collect();
        for task in frames {
            tasks::signal_immediate(self, serial, task)?;
        }
        let bob = self.bob_mut(serial)?;
        bob.actid += 1;
        let delay = self.config.signal_delay_ms;
        self.schedule_act(serial, delay)
    }

    pub fn signal_handled(&mut self, serial: Serial) -> Result<(), EngineError> {
        self.bob_mut(serial)?.signal.clear();
        Ok(())
    }

    /// Pop every frame (running pop hooks) and restart from the auto task.
    pub fn reset_tasks(&mut self, serial: Serial) -> Result<(), EngineError> {
        let was_in_act = self.bob(serial)?.in_act;
        self.bob_mut(serial)?.in_act = true;
        while let Some(task) = self.bob(serial)?.top_task() {
            tasks::pop_hook(self, serial, task)?;
            self.bob_mut(serial)?.stack.pop();
        }
        let bob = self.bob_mut(serial)?;
        bob.in_act = was_in_act;
        bob.actid += 1;
        bob.signal.clear();
        let delay = self.config.signal_delay_ms;
        self.schedule_act(serial, delay)
    }

    /// Entry point of `Command::Act` for bobs.
    pub(crate) fn bob_act(&mut self, serial: Serial, data: u32) -> Result<(), EngineError> {
        let Some(bob) = self.objects.get_mut::<Bob>(serial) else {
            return Ok(());
        };
        if data != bob.actid {
            self.metrics.stale_acts += 1;
            return Ok(());
        }
        bob.actid += 1;
        bob.actscheduled = false;

        if bob.stack.is_empty() {
            bob.signal.clear();
            bob.in_act = true;
            self.init_auto_task(serial)?;
            let bob = self.bob_mut(serial)?;
            bob.in_act = false;
            if !bob.actscheduled {
                return Err(EngineError::AutoTaskFailed { serial });
            }
            return Ok(());
        }
        self.do_act(serial)
    }

    fn do_act(&mut self, serial: Serial) -> Result<(), EngineError> {
        let bob = self.bob_mut(serial)?;
        if bob.in_act {
            return Err(EngineError::TaskStackMisuse {
                serial,
                reason: "reentrant act".to_string(),
            });
        }
        let Some(task) = bob.top_task() else {
            return Err(EngineError::TaskStackMisuse {
                serial,
                reason: "act without task".to_string(),
            });
        };
        bob.in_act = true;
        self.metrics.acts += 1;

        tasks::update(self, serial, task)?;

        let bob = self.bob_mut(serial)?;
        if !bob.actscheduled {
            return Err(EngineError::FailedToAct {
                serial,
                task: task.name(),
            });
        }
        bob.in_act = false;
        Ok(())
    }

    /// Pick a task for a bob whose stack ran empty.
    fn init_auto_task(&mut self, serial: Serial) -> Result<(), EngineError> {
        let bob = self.bob(serial)?;
        let kind = bob.kind;
        let location = bob.location;

        let Some(location) = location.filter(|&l| self.objects.contains(l)) else {
            self.bob_mut(serial)?.location = None;
            return tasks::worker::start_task_fugitive(self, serial);
        };

        if let Some(road) = self.objects.get::<crate::transport::Road>(location) {
            if matches!(kind, WorkerKind::Carrier | WorkerKind::Ferry) && road.carrier.is(serial) {
                return self.push_task(serial, State::new(TaskKind::Road), 0);
            }
        }

        if let Some(building) = self.objects.get::<crate::building::Building>(location) {
            if building.position == self.bob(serial)?.position {
                return self.worker_inside_building(serial, location);
            }
        }

        tasks::worker::start_task_gowarehouse(self, serial)
    }

    /// Start walking one step. The bob's position changes right away; the
    /// returned time says when it arrives.
    pub fn start_walk(
        &mut self,
        serial: Serial,
        dir: Direction,
        forcemove: bool,
    ) -> Result<StartWalk, EngineError> {
        let bob = self.bob(serial)?;
        let from = bob.position;
        let to = self.map.neighbour(from, dir);
        if !self.map.can_enter(to, bob.movecaps()) {
            return Ok(StartWalk::Failed);
        }
        if !forcemove && bob.kind == WorkerKind::Soldier && self.node_blocked_for_soldier(serial, to)
        {
            return Ok(StartWalk::Blocked);
        }
        let step_ms = self
            .descriptions
            .worker(bob.descr)
            .map(|d| d.walk_step_ms)
            .unwrap_or(1800) as Time;
        let start = self.time;
        self.set_position(serial, to)?;
        self.bob_mut(serial)?.walking = Some(Walk {
            from,
            dir,
            start,
            end: start + step_ms,
        });
        Ok(StartWalk::Started(step_ms))
    }

    /// A node with a fight on it cannot be entered by other soldiers.
    fn node_blocked_for_soldier(&self, serial: Serial, to: Coords) -> bool {
        self.map.field(to).bobs.iter().any(|&other| {
            other != serial
                && self
                    .objects
                    .get::<Bob>(other)
                    .is_some_and(|b| b.is_in_battle())
        })
    }

    pub fn end_walk(&mut self, serial: Serial) -> Result<(), EngineError> {
        self.bob_mut(serial)?.walking = None;
        Ok(())
    }

    /// Move without walking, keeping the field bob lists current.
    pub fn set_position(&mut self, serial: Serial, to: Coords) -> Result<(), EngineError> {
        let to = self.map.normalize(to);
        let from = self.bob(serial)?.position;
        self.map.field_mut(from).bobs.retain(|&b| b != serial);
        self.map.field_mut(to).bobs.push(serial);
        self.bob_mut(serial)?.position = to;
        Ok(())
    }

    /// Destroy `serial` at the current time. For bobs this also counts as
    /// the act of the running update.
    pub fn schedule_destroy(&mut self, serial: Serial) {
        if let Some(bob) = self.objects.get_mut::<Bob>(serial) {
            bob.actid += 1;
            bob.actscheduled = true;
        }
        let now = self.time;
        self.queue.enqueue(now, Command::Destroy { serial });
    }
}

#[cfg(test)]
#[path = "bob_tests.rs"]
mod bob_tests;
