//! # Game session
//!
//! [`Game`] owns everything that makes up one running simulation: the map,
//! the objects, the command queue, the players and the economies. The whole
//! state advances only through [`Game::run_queue`], which executes queued
//! commands in due order. Given the same seed and the same commands, two
//! sessions evolve identically (see [`Game::checksum`]).

use crate::bob::{Bob, Role, ScoutTarget, SoldierData};
use crate::building::{Building, BuildingState};
use crate::cmd_queue::{CmdQueue, Command, QueuedCommand};
use crate::config::SimConfig;
use crate::error::EngineError;
use crate::geometry::{Coords, Map};
use crate::metrics::SimMetrics;
use crate::notification::{Note, NotificationBus};
use crate::object::{Body, ObjectManager, Serial, Time};
use crate::player::{Message, Player, PlayerNumber};
use crate::tasks::TaskKind;
use crate::transport::{Flag, Logistics, RequestTarget, Road, WareInstance};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHasher;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::hash::Hasher;
use std::sync::Arc;
use std::time::Instant;
use wldata::{DescriptionIndex, Descriptions, WareWorker, WorkerKind};

pub struct Game {
    /// Current game time in ms.
    pub time: Time,
    pub config: SimConfig,
    pub descriptions: Arc<Descriptions>,
    pub map: Map,
    pub objects: ObjectManager,
    pub queue: CmdQueue,
    pub players: BTreeMap<PlayerNumber, Player>,
    pub logistics: Logistics,
    pub rng: ChaCha8Rng,
    pub notes: NotificationBus,
    pub metrics: SimMetrics,
}

/// What a renderer needs to draw one object. Computing it never changes
/// the game.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawInfo {
    pub position: Coords,
    pub animation: String,
    /// Node the bob is walking away from, if it is between two nodes.
    pub walking_from: Option<Coords>,
    /// Progress of the current step, 0.0 to 1.0.
    pub walk_progress: f32,
}

/// The parts of the state that are hashed for desync detection.
#[derive(Serialize)]
struct ChecksumView<'a> {
    objects: &'a ObjectManager,
    logistics: &'a Logistics,
    players: &'a BTreeMap<PlayerNumber, Player>,
    map: &'a Map,
    queue: Vec<QueuedCommand>,
    rng_word_pos: u128,
}

impl Game {
    pub fn new(map: Map, descriptions: Arc<Descriptions>, config: SimConfig, seed: u64) -> Self {
        let mut queue = CmdQueue::new();
        if config.checksum_frequency > 0 {
            queue.enqueue(config.checksum_frequency, Command::Checksum);
        }
        Self {
            time: 0,
            config,
            descriptions,
            map,
            objects: ObjectManager::new(),
            queue,
            players: BTreeMap::new(),
            logistics: Logistics::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            notes: NotificationBus::new(),
            metrics: SimMetrics::default(),
        }
    }

    pub fn add_player(&mut self, number: PlayerNumber, name: impl Into<String>) {
        let player = Player::new(number, name, &self.map);
        log::info!("Player {}: {}", number, player.name);
        self.players.insert(number, player);
    }

    pub fn time(&self) -> Time {
        self.time
    }

    pub fn notes(&self) -> &NotificationBus {
        &self.notes
    }

    /// Time a carrier needs for one step; the base unit of road costs.
    pub fn carrier_step_ms(&self) -> u32 {
        self.descriptions
            .worker(self.descriptions.carrier())
            .map(|d| d.walk_step_ms)
            .unwrap_or(1800)
    }

    /// Create a bob of worker type `index`. It does nothing until its first
    /// act is scheduled.
    pub(crate) fn create_bob(
        &mut self,
        owner: PlayerNumber,
        index: DescriptionIndex,
        position: Coords,
    ) -> Result<Serial, EngineError> {
        let descr = self
            .descriptions
            .worker(index)
            .ok_or_else(|| EngineError::InconsistentEconomy(format!("unknown worker {}", index)))?;
        let role = match descr.kind {
            WorkerKind::Carrier | WorkerKind::Ferry => Role::Carrier {
                promised_pickup_to: None,
            },
            WorkerKind::Soldier => {
                let stats = descr.soldier.ok_or_else(|| {
                    EngineError::InconsistentEconomy(format!("soldier {} has no combat values", descr.name))
                })?;
                Role::Soldier(SoldierData::new(stats))
            }
            WorkerKind::Scout => Role::Scout {
                worklist: VecDeque::<ScoutTarget>::new(),
                revealed: None,
            },
            WorkerKind::Geologist | WorkerKind::Worker => Role::Worker,
        };
        let position = self.map.normalize(position);
        let bob = Bob::new(index, descr.kind, position, role);
        let serial = self.objects.insert(owner, Body::Bob(Box::new(bob)));
        self.map.field_mut(position).bobs.push(serial);
        Ok(serial)
    }

    pub(crate) fn create_ware(
        &mut self,
        owner: PlayerNumber,
        index: DescriptionIndex,
        location: Option<Serial>,
    ) -> Serial {
        let mut ware = WareInstance::new(index);
        ware.location = location;
        self.objects.insert(owner, Body::Ware(ware))
    }

    /// Execute every command due at or before `until`, then advance the
    /// clock to `until`.
    #[tracing::instrument(skip_all, name = "run_queue")]
    pub fn run_queue(&mut self, until: Time) -> Result<(), EngineError> {
        let start = Instant::now();
        while let Some(queued) = self.queue.pop_due(until) {
            self.time = self.time.max(queued.due);
            self.metrics.commands += 1;
            self.execute(queued.command)?;
        }
        self.time = self.time.max(until);
        self.metrics.total_time += start.elapsed();
        Ok(())
    }

    fn record_checksum(&mut self) {
        let sum = self.checksum();
        log::trace!("checksum at {}: {:016x}", self.time, sum);
        self.metrics.checksums.push((self.time, sum));
        let frequency = self.config.checksum_frequency;
        if frequency > 0 {
            self.queue.enqueue(self.time + frequency, Command::Checksum);
        }
    }

    fn execute(&mut self, command: Command) -> Result<(), EngineError> {
        match command {
            Command::Act { serial, data } => {
                let Some(object) = self.objects.object(serial) else {
                    return Ok(());
                };
                match object.body {
                    Body::Bob(_) => self.bob_act(serial, data),
                    Body::Building(_) => self.building_act(serial, data),
                    Body::Battle(_) => self.battle_act(serial, data),
                    _ => Ok(()),
                }
            }
            Command::Destroy { serial } => self.destroy_object(serial),
            Command::EconomyBalance { economy, timer } => {
                self.metrics.balances += 1;
                self.balance(economy, timer)
            }
            Command::Checksum => {
                self.record_checksum();
                Ok(())
            }
            Command::Player(cmd) => self.execute_player_command(&cmd),
        }
    }

    /// Remove any object, cleaning up everything that refers to it.
    pub(crate) fn destroy_object(&mut self, serial: Serial) -> Result<(), EngineError> {
        let Some(object) = self.objects.object(serial) else {
            return Ok(());
        };
        match object.body {
            Body::Flag(_) => self.destroy_flag(serial),
            Body::Road(_) => self.destroy_road(serial),
            Body::Building(_) => self.destroy_building(serial),
            Body::Ware(_) => self.destroy_ware(serial),
            Body::Battle(_) => {
                self.objects.remove(serial);
                Ok(())
            }
            Body::Bob(_) => self.destroy_bob(serial),
        }
    }

    fn destroy_bob(&mut self, serial: Serial) -> Result<(), EngineError> {
        let b = self.bob(serial)?;
        let (transfer, supply, carried, location, position) =
            (b.transfer, b.supply, b.carried_ware, b.location, b.position);
        let is_soldier = b.soldier().is_some();
        log::debug!("MO({}): destroyed", serial);

        if let Some(t) = transfer {
            self.transfer_failed(t);
        }
        if let Some(s) = supply {
            self.remove_supply(s);
        }
        if let Some(w) = carried {
            self.destroy_ware(w)?;
        }
        crate::tasks::scout::scout_pop(self, serial)?;
        self.release_pickups(serial)?;
        if is_soldier {
            self.soldier_died(serial)?;
        }

        // A road losing its carrier asks for a new one.
        if let Some(road) = location.filter(|&l| self.objects.get::<Road>(l).is_some_and(|r| r.carrier.is(serial))) {
            let index = match self.objects.get::<Road>(road).map(|r| r.kind) {
                Some(crate::transport::RoadKind::Waterway) => self.descriptions.ferry(),
                _ => Some(self.descriptions.carrier()),
            };
            if let Some(r) = self.objects.get_mut::<Road>(road) {
                r.carrier = crate::object::OPtr::null();
            }
            if let Some(index) = index {
                let rid = self.create_request(RequestTarget::Road(road), WareWorker::Worker, index, 1);
                if let Some(r) = self.objects.get_mut::<Road>(road) {
                    r.carrier_request = Some(rid);
                }
            }
        }
        for b in self.objects.serials_of::<Building>() {
            if let Some(building) = self.objects.get_mut::<Building>(b) {
                if building.helper.is(serial) {
                    building.helper = crate::object::OPtr::null();
                }
            }
        }
        let waiting_at: Vec<Serial> = self
            .objects
            .serials_of::<Flag>()
            .into_iter()
            .filter(|&f| {
                self.objects
                    .get::<Flag>(f)
                    .is_some_and(|flag| flag.is_waiting_for_capacity(serial))
            })
            .collect();
        for f in waiting_at {
            self.flag_mut(f)?.skip_wait_for_capacity(serial);
        }

        self.map.field_mut(position).bobs.retain(|&b| b != serial);
        self.objects.remove(serial);
        Ok(())
    }

    /// Deterministic hash of the simulation state. Two sessions that
    /// executed the same commands from the same seed agree on it.
    pub fn checksum(&self) -> u64 {
        let view = ChecksumView {
            objects: &self.objects,
            logistics: &self.logistics,
            players: &self.players,
            map: &self.map,
            queue: self.queue.sorted(),
            rng_word_pos: self.rng.get_word_pos(),
        };
        let mut hasher = FxHasher::default();
        match serde_json::to_vec(&view) {
            Ok(bytes) => hasher.write(&bytes),
            Err(e) => log::warn!("Failed to serialize state for checksum: {}", e),
        }
        hasher.finish()
    }

    /// Put a message into `player`'s inbox and announce it on the bus.
    pub fn send_message(&mut self, player: PlayerNumber, title: &str, body: String, position: Option<Coords>) {
        let message = Message {
            time: self.time,
            title: title.to_string(),
            body,
            position,
        };
        let Some(p) = self.players.get_mut(&player) else {
            return;
        };
        p.add_message(message.clone());
        self.notes.publish(&Note::PlayerMessage { player, message });
    }

    pub fn draw_info(&self, serial: Serial) -> Option<DrawInfo> {
        let object = self.objects.object(serial)?;
        let idle = |position| DrawInfo {
            position,
            animation: "idle".to_string(),
            walking_from: None,
            walk_progress: 0.0,
        };
        match &object.body {
            Body::Flag(f) => Some(idle(f.position)),
            Body::Road(r) => Some(idle(r.path.start)),
            Body::Ware(w) => {
                let location = w.location?;
                self.draw_info(location).map(|d| idle(d.position))
            }
            Body::Battle(b) => self.objects.get::<Bob>(b.first).map(|f| DrawInfo {
                animation: "fight".to_string(),
                ..idle(f.position)
            }),
            Body::Building(b) => {
                let working = matches!(
                    b.state,
                    BuildingState::ProductionSite {
                        working_since: Some(_),
                        ..
                    }
                );
                Some(DrawInfo {
                    animation: if working { "working" } else { "idle" }.to_string(),
                    ..idle(b.position)
                })
            }
            Body::Bob(b) => {
                let Some(walk) = b.walking.filter(|w| w.end > self.time) else {
                    let animation = match b.top_task() {
                        Some(TaskKind::Battle) => "fight",
                        Some(TaskKind::Die) => "die",
                        _ => "idle",
                    };
                    return Some(DrawInfo {
                        animation: animation.to_string(),
                        ..idle(b.position)
                    });
                };
                let span = walk.end.saturating_sub(walk.start).max(1);
                let progress = self.time.saturating_sub(walk.start) as f32 / span as f32;
                let animation = if b.carried_ware.is_some() { "walkload" } else { "walk" };
                Some(DrawInfo {
                    position: b.position,
                    animation: format!("{}_{}", animation, walk.dir.name()),
                    walking_from: Some(walk.from),
                    walk_progress: progress.clamp(0.0, 1.0),
                })
            }
        }
    }
}

impl std::fmt::Debug for Game {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Game")
            .field("time", &self.time)
            .field("objects", &self.objects.len())
            .field("queue", &self.queue.len())
            .field("players", &self.players.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::GameBuilder;
    use std::sync::Mutex;

    #[test]
    fn test_run_queue_advances_time() {
        let mut game = GameBuilder::new().with_player(1, "Alice").build();
        game.run_queue(5_000).unwrap();
        assert_eq!(game.time(), 5_000);
        game.run_queue(1_000).unwrap();
        assert_eq!(game.time(), 5_000);
    }

    #[test]
    fn test_act_for_vanished_object_is_ignored() {
        let mut game = GameBuilder::new().with_player(1, "Alice").build();
        game.queue.enqueue(10, Command::Act { serial: Serial(999), data: 0 });
        game.queue.enqueue(10, Command::Destroy { serial: Serial(999) });
        game.run_queue(100).unwrap();
        assert_eq!(game.metrics.commands, 2);
    }

    #[test]
    fn test_checksum_covers_pending_commands() {
        let build = || GameBuilder::new().with_player(1, "Alice").seed(3).build();
        let (a, mut b) = (build(), build());
        assert_eq!(a.checksum(), b.checksum());
        b.queue.enqueue(500, Command::Destroy { serial: Serial(999) });
        assert_ne!(a.checksum(), b.checksum());
    }

    #[test]
    fn test_checksums_are_recorded_per_interval() {
        let config = SimConfig {
            checksum_frequency: 1_000,
            ..SimConfig::default()
        };
        let mut game = GameBuilder::new()
            .with_player(1, "Alice")
            .with_headquarters(1, Coords::new(8, 8))
            .config(config)
            .build();
        game.run_queue(4_500).unwrap();
        game.run_queue(10_000).unwrap();
        let times: Vec<Time> = game.metrics.checksums.iter().map(|&(t, _)| t).collect();
        assert_eq!(times, (1..=10).map(|i| i * 1_000).collect::<Vec<_>>());
    }

    #[test]
    fn test_send_message_reaches_inbox_and_bus() {
        let mut game = GameBuilder::new().with_player(1, "Alice").build();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = game
            .notes()
            .subscribe(move |note| sink.lock().unwrap().push(note.clone()));
        game.send_message(1, "Hello", "World".to_string(), None);
        assert_eq!(game.players[&1].messages.len(), 1);
        assert!(matches!(
            seen.lock().unwrap().as_slice(),
            [Note::PlayerMessage { player: 1, .. }]
        ));
    }

    #[test]
    fn test_draw_info_reports_walk_progress() {
        let mut game = GameBuilder::new().with_player(1, "Alice").build();
        let bob = game.spawn_worker(1, "carrier", Coords::new(6, 6)).unwrap();
        let idle = game.draw_info(bob).unwrap();
        assert_eq!(idle.animation, "idle");
        assert!(idle.walking_from.is_none());

        game.bob_mut(bob).unwrap().walking = Some(crate::bob::Walk {
            from: Coords::new(5, 6),
            dir: crate::geometry::Direction::East,
            start: 0,
            end: 1800,
        });
        game.time = 900;
        let before = game.checksum();
        let info = game.draw_info(bob).unwrap();
        assert_eq!(info.walking_from, Some(Coords::new(5, 6)));
        assert_eq!(info.animation, "walk_e");
        assert!((info.walk_progress - 0.5).abs() < 1e-6);
        assert_eq!(game.checksum(), before);
    }
}
