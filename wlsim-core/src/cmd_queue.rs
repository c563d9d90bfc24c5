//! # Command queue
//!
//! Every state change of a running game is a [`Command`] with a due time.
//! Commands run in non-decreasing due time; commands due at the same time
//! run in the order they were enqueued. Replaying the same command stream on
//! the same initial state yields the same game.

use crate::geometry::{Coords, Direction};
use crate::object::{Serial, Time};
use crate::player::PlayerNumber;
use crate::transport::{EconomyId, FlagJobKind};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use wldata::DescriptionIndex;

/// Actions issued by players (or scripts on their behalf).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerCommand {
    BuildFlag {
        player: PlayerNumber,
        coords: Coords,
    },
    BuildRoad {
        player: PlayerNumber,
        start: Coords,
        steps: Vec<Direction>,
    },
    BuildWaterway {
        player: PlayerNumber,
        start: Coords,
        steps: Vec<Direction>,
    },
    BuildBuilding {
        player: PlayerNumber,
        coords: Coords,
        building: DescriptionIndex,
    },
    RemoveFlag {
        player: PlayerNumber,
        flag: Serial,
    },
    RemoveRoad {
        player: PlayerNumber,
        road: Serial,
    },
    FlagAction {
        player: PlayerNumber,
        flag: Serial,
        job: FlagJobKind,
    },
    Attack {
        player: PlayerNumber,
        target: Serial,
        soldiers: u32,
    },
    SetInputMaxFill {
        player: PlayerNumber,
        building: Serial,
        ware: DescriptionIndex,
        max_fill: u32,
    },
}

impl PlayerCommand {
    pub fn player(&self) -> PlayerNumber {
        match self {
            PlayerCommand::BuildFlag { player, .. }
            | PlayerCommand::BuildRoad { player, .. }
            | PlayerCommand::BuildWaterway { player, .. }
            | PlayerCommand::BuildBuilding { player, .. }
            | PlayerCommand::RemoveFlag { player, .. }
            | PlayerCommand::RemoveRoad { player, .. }
            | PlayerCommand::FlagAction { player, .. }
            | PlayerCommand::Attack { player, .. }
            | PlayerCommand::SetInputMaxFill { player, .. } => *player,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Run the object's act. `data` is the act id the command was issued
    /// with; a mismatch means the act was superseded.
    Act { serial: Serial, data: u32 },
    Destroy { serial: Serial },
    /// Match requests and supplies of an economy. Stale timers are ignored.
    EconomyBalance { economy: EconomyId, timer: u32 },
    /// Record a state checksum and schedule the next one.
    Checksum,
    Player(PlayerCommand),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedCommand {
    pub due: Time,
    /// Insertion counter, the tie-break among equal due times.
    pub seq: u64,
    pub command: Command,
}

impl Ord for QueuedCommand {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: invert so the earliest command is on top.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedCommand {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct QueueSnapshot {
    next_seq: u64,
    commands: Vec<QueuedCommand>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "QueueSnapshot", into = "QueueSnapshot")]
pub struct CmdQueue {
    heap: BinaryHeap<QueuedCommand>,
    next_seq: u64,
}

impl PartialEq for CmdQueue {
    fn eq(&self, other: &Self) -> bool {
        self.next_seq == other.next_seq && self.sorted() == other.sorted()
    }
}

impl From<QueueSnapshot> for CmdQueue {
    fn from(s: QueueSnapshot) -> Self {
        Self {
            heap: s.commands.into_iter().collect(),
            next_seq: s.next_seq,
        }
    }
}

impl From<CmdQueue> for QueueSnapshot {
    fn from(q: CmdQueue) -> Self {
        let commands = q.sorted();
        QueueSnapshot {
            next_seq: q.next_seq,
            commands,
        }
    }
}

impl CmdQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, due: Time, command: Command) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedCommand { due, seq, command });
    }

    pub fn peek_due(&self) -> Option<Time> {
        self.heap.peek().map(|c| c.due)
    }

    /// Next command due at or before `until`.
    pub fn pop_due(&mut self, until: Time) -> Option<QueuedCommand> {
        if self.peek_due()? <= until {
            self.heap.pop()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Pending commands in execution order.
    pub fn sorted(&self) -> Vec<QueuedCommand> {
        let mut v: Vec<_> = self.heap.iter().cloned().collect();
        v.sort_by(|a, b| b.cmp(a));
        v
    }

    /// Rewrite or drop pending commands, keeping their order.
    pub(crate) fn retain_map<F>(&mut self, mut f: F)
    where
        F: FnMut(Command) -> Option<Command>,
    {
        let old = std::mem::take(&mut self.heap);
        self.heap = old
            .into_vec()
            .into_iter()
            .filter_map(|qc| {
                f(qc.command).map(|command| QueuedCommand {
                    due: qc.due,
                    seq: qc.seq,
                    command,
                })
            })
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn destroy(n: u32) -> Command {
        Command::Destroy { serial: Serial(n) }
    }

    #[test]
    fn test_equal_due_times_run_fifo() {
        let mut q = CmdQueue::new();
        q.enqueue(100, destroy(1));
        q.enqueue(50, destroy(2));
        q.enqueue(100, destroy(3));
        q.enqueue(50, destroy(4));
        let order: Vec<_> = std::iter::from_fn(|| q.pop_due(1000))
            .map(|c| c.command)
            .collect();
        assert_eq!(order, vec![destroy(2), destroy(4), destroy(1), destroy(3)]);
    }

    #[test]
    fn test_pop_due_leaves_future_commands() {
        let mut q = CmdQueue::new();
        q.enqueue(10, destroy(1));
        q.enqueue(20, destroy(2));
        assert!(q.pop_due(15).is_some());
        assert!(q.pop_due(15).is_none());
        assert_eq!(q.len(), 1);
        assert_eq!(q.peek_due(), Some(20));
    }

    #[test]
    fn test_snapshot_keeps_order() {
        let mut q = CmdQueue::new();
        q.enqueue(5, destroy(1));
        q.enqueue(5, destroy(2));
        let json = serde_json::to_string(&q).unwrap();
        let mut back: CmdQueue = serde_json::from_str(&json).unwrap();
        assert_eq!(back.pop_due(5).unwrap().command, destroy(1));
        back.enqueue(5, destroy(3));
        assert_eq!(back.pop_due(5).unwrap().command, destroy(2));
        assert_eq!(back.pop_due(5).unwrap().command, destroy(3));
    }

    proptest! {
        #[test]
        fn prop_execution_order_is_by_due_then_insertion(dues in proptest::collection::vec(0u64..20, 1..60)) {
            let mut q = CmdQueue::new();
            for (i, &due) in dues.iter().enumerate() {
                q.enqueue(due, destroy(i as u32));
            }
            let mut last: Option<(Time, u64)> = None;
            while let Some(c) = q.pop_due(Time::MAX) {
                if let Some(prev) = last {
                    prop_assert!(prev < (c.due, c.seq));
                }
                last = Some((c.due, c.seq));
            }
        }
    }
}
