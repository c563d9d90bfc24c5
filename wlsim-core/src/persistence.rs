//! # Savegames
//!
//! A savegame is a single JSON document: a versioned header followed by the
//! full game state. Object serials are not stable across a save: on load
//! every serial in the document is translated through an [`ObjectIndex`],
//! which numbers the saved objects `1..=n` in their original order.
//! References to objects that did not make it into the save are mapped to
//! serials that never resolve. Weak references then read as "gone", while
//! strict ones (road ends, building flags) fail the load.

use crate::cmd_queue::{CmdQueue, Command};
use crate::config::SimConfig;
use crate::error::GameDataError;
use crate::game::Game;
use crate::geometry::Map;
use crate::metrics::SimMetrics;
use crate::notification::NotificationBus;
use crate::object::{Body, MapObject, ObjectManager, OPtr, Serial, Time};
use crate::player::{Player, PlayerNumber};
use crate::transport::Logistics;
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;
use wldata::Descriptions;

/// Current savegame format revision.
pub const SAVEGAME_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveHeader {
    pub version: u32,
    pub tribe: String,
    pub time: Time,
    pub objects: usize,
}

#[derive(Serialize)]
struct SaveGameOut<'a> {
    header: SaveHeader,
    config: &'a SimConfig,
    map: &'a Map,
    objects: Vec<&'a MapObject>,
    queue: &'a CmdQueue,
    players: &'a BTreeMap<PlayerNumber, Player>,
    logistics: &'a Logistics,
    rng: &'a ChaCha8Rng,
    metrics: &'a SimMetrics,
}

#[derive(Deserialize)]
struct SaveGameIn {
    header: SaveHeader,
    config: SimConfig,
    map: Map,
    objects: Vec<MapObject>,
    queue: CmdQueue,
    players: BTreeMap<PlayerNumber, Player>,
    logistics: Logistics,
    rng: ChaCha8Rng,
    metrics: SimMetrics,
}

/// The part of a savegame read before the object index exists.
#[derive(Deserialize)]
struct SaveProbe {
    header: SaveHeader,
    objects: Vec<ObjectStub>,
}

#[derive(Deserialize)]
struct ObjectStub {
    serial: u32,
}

/// Translation table from saved serials to the serials of the loaded game.
#[derive(Debug, Default)]
pub struct ObjectIndex {
    map: FxHashMap<u32, Serial>,
    original: BTreeMap<Serial, u32>,
    known: u32,
    next: u32,
}

impl ObjectIndex {
    /// Index the serials of the saved objects. Order is preserved, so
    /// iteration over the loaded objects matches the saved game.
    pub fn new(saved: impl IntoIterator<Item = u32>) -> Self {
        let mut raw: Vec<u32> = saved.into_iter().collect();
        raw.sort_unstable();
        raw.dedup();
        let mut index = Self::default();
        for r in raw {
            index.next += 1;
            let serial = Serial(index.next);
            index.map.insert(r, serial);
            index.original.insert(serial, r);
        }
        index.known = index.next;
        index
    }

    /// The loaded serial for `raw`. Unknown serials get a fresh number
    /// above every known object, so they never resolve.
    pub fn remap(&mut self, raw: u32) -> Serial {
        if let Some(&serial) = self.map.get(&raw) {
            return serial;
        }
        self.next += 1;
        let serial = Serial(self.next);
        log::trace!("Dangling reference to saved object {} mapped to {}", raw, serial);
        self.map.insert(raw, serial);
        self.original.insert(serial, raw);
        serial
    }

    /// The serial `serial` had in the savegame.
    pub fn original(&self, serial: Serial) -> Option<u32> {
        self.original.get(&serial).copied()
    }

    /// Number of objects in the save.
    pub fn len(&self) -> usize {
        self.known as usize
    }

    pub fn is_empty(&self) -> bool {
        self.known == 0
    }

    /// Serials handed out during the load, dangling ones included.
    pub fn last_serial(&self) -> u32 {
        self.next
    }

    pub fn dangling(&self) -> usize {
        (self.next - self.known) as usize
    }
}

thread_local! {
    static LOAD_INDEX: RefCell<Option<ObjectIndex>> = const { RefCell::new(None) };
}

/// Translate a serial read from serialized data. Outside of
/// [`Game::load`] this is the identity.
pub(crate) fn remap_loaded_serial(raw: u32) -> Serial {
    LOAD_INDEX.with(|cell| match cell.borrow_mut().as_mut() {
        Some(index) => index.remap(raw),
        None => Serial(raw),
    })
}

/// Installs an index for the current thread and takes it back on drop.
struct IndexGuard;

impl IndexGuard {
    fn install(index: ObjectIndex) -> Self {
        LOAD_INDEX.with(|cell| *cell.borrow_mut() = Some(index));
        IndexGuard
    }

    fn take(self) -> ObjectIndex {
        LOAD_INDEX.with(|cell| cell.borrow_mut().take()).unwrap_or_default()
    }
}

impl Drop for IndexGuard {
    fn drop(&mut self) {
        LOAD_INDEX.with(|cell| cell.borrow_mut().take());
    }
}

impl Game {
    #[tracing::instrument(skip_all, name = "save")]
    pub fn save<W: Write>(&self, writer: W) -> Result<(), GameDataError> {
        let save = SaveGameOut {
            header: SaveHeader {
                version: SAVEGAME_VERSION,
                tribe: self.descriptions.tribe.clone(),
                time: self.time,
                objects: self.objects.len(),
            },
            config: &self.config,
            map: &self.map,
            objects: self.objects.iter().collect(),
            queue: &self.queue,
            players: &self.players,
            logistics: &self.logistics,
            rng: &self.rng,
            metrics: &self.metrics,
        };
        serde_json::to_writer(writer, &save)?;
        log::info!("Saved game at {} ms ({} objects)", self.time, self.objects.len());
        Ok(())
    }

    /// Read a savegame. Subscribers of the notification bus are not part of
    /// the save and have to register again.
    #[tracing::instrument(skip_all, name = "load")]
    pub fn load<R: Read>(mut reader: R, descriptions: Arc<Descriptions>) -> Result<Game, GameDataError> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;

        let probe: SaveProbe = serde_json::from_str(&text)?;
        if probe.header.version != SAVEGAME_VERSION {
            return Err(GameDataError::UnknownVersion {
                found: probe.header.version,
                supported: SAVEGAME_VERSION,
            });
        }
        if probe.header.tribe != descriptions.tribe {
            return Err(GameDataError::TribeMismatch {
                expected: descriptions.tribe.clone(),
                found: probe.header.tribe,
            });
        }
        if probe.header.objects != probe.objects.len() {
            return Err(GameDataError::Invalid(format!(
                "header announces {} objects, found {}",
                probe.header.objects,
                probe.objects.len()
            )));
        }

        let guard = IndexGuard::install(ObjectIndex::new(probe.objects.iter().map(|o| o.serial)));
        let save: SaveGameIn = serde_json::from_str(&text)?;
        let index = guard.take();
        if index.dangling() > 0 {
            log::debug!("{} references to objects missing from the save", index.dangling());
        }

        let mut game = Game {
            time: save.header.time,
            config: save.config,
            descriptions,
            map: save.map,
            objects: ObjectManager::from_objects(save.objects, index.last_serial()),
            queue: save.queue,
            players: save.players,
            logistics: save.logistics,
            rng: save.rng,
            notes: NotificationBus::new(),
            metrics: save.metrics,
        };
        game.check_references(&index)?;
        game.drop_dangling_references();
        log::info!("Loaded game at {} ms ({} objects)", game.time, index.len());
        Ok(game)
    }

    /// Strict references must resolve to an object of the right kind.
    fn check_references(&self, index: &ObjectIndex) -> Result<(), GameDataError> {
        let unknown = |owner: &MapObject, serial: Serial| GameDataError::UnknownObject {
            owner: format!("{} {}", owner.body.type_name(), index.original(owner.serial).unwrap_or(0)),
            serial: Serial(index.original(serial).unwrap_or(serial.0)),
        };
        let is_flag = |s: Serial| matches!(self.objects.object(s).map(|o| &o.body), Some(Body::Flag(_)));
        let is_building = |s: Serial| matches!(self.objects.object(s).map(|o| &o.body), Some(Body::Building(_)));
        for object in self.objects.iter() {
            match &object.body {
                Body::Road(road) => {
                    if let Some(&bad) = road.flags.iter().find(|&&f| !is_flag(f)) {
                        return Err(unknown(object, bad));
                    }
                }
                Body::Flag(flag) => {
                    if let Some(bad) = flag.building.filter(|&b| !is_building(b)) {
                        return Err(unknown(object, bad));
                    }
                }
                Body::Building(building) => {
                    if !is_flag(building.flag) {
                        return Err(unknown(object, building.flag));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Clear weak references whose targets were not saved, and drop queued
    /// commands aimed at such objects.
    fn drop_dangling_references(&mut self) {
        let stale_battles: Vec<Serial> = self
            .objects
            .iter()
            .filter_map(|o| match &o.body {
                Body::Bob(bob) => bob
                    .soldier()
                    .and_then(|s| s.battle.serial())
                    .filter(|&b| !self.objects.contains(b))
                    .map(|_| o.serial),
                _ => None,
            })
            .collect();
        for soldier in stale_battles {
            if let Some(s) = self.objects.get_mut::<crate::bob::Bob>(soldier).and_then(|b| b.soldier_mut()) {
                s.battle = OPtr::null();
            }
        }

        let objects = &self.objects;
        self.queue.retain_map(|command| match command {
            Command::Act { serial, .. } | Command::Destroy { serial } if !objects.contains(serial) => None,
            command => Some(command),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Coords;
    use crate::testing::GameBuilder;

    fn save_to_vec(game: &Game) -> Vec<u8> {
        let mut buf = Vec::new();
        game.save(&mut buf).unwrap();
        buf
    }

    fn economy_game() -> Game {
        let mut game = GameBuilder::new()
            .with_player(1, "Alice")
            .with_headquarters(1, Coords::new(6, 6))
            .seed(11)
            .build();
        let sawmill = game.descriptions.building_index("sawmill").unwrap();
        let sawmill = game.build_building(1, Coords::new(12, 6), sawmill).unwrap();
        let hq_flag = game.building_flag(game.headquarters(1).unwrap()).unwrap();
        let sawmill_flag = game.building_flag(sawmill).unwrap();
        game.build_road_between(1, hq_flag, sawmill_flag).unwrap();
        game
    }

    #[test]
    fn test_object_index_compacts_in_order() {
        let mut index = ObjectIndex::new([40, 7, 12]);
        assert_eq!(index.remap(7), Serial(1));
        assert_eq!(index.remap(12), Serial(2));
        assert_eq!(index.remap(40), Serial(3));
        assert_eq!(index.len(), 3);
        let dangling = index.remap(99);
        assert_eq!(dangling, Serial(4));
        assert_eq!(index.remap(99), dangling);
        assert_eq!(index.original(dangling), Some(99));
        assert_eq!(index.dangling(), 1);
    }

    #[test]
    fn test_serials_outside_load_are_identity() {
        let s: Serial = serde_json::from_str("17").unwrap();
        assert_eq!(s, Serial(17));
    }

    #[test]
    fn test_load_compacts_serials() {
        let mut game = GameBuilder::new().with_player(1, "Alice").build();
        let a = game.build_flag(1, Coords::new(4, 4)).unwrap();
        let b = game.build_flag(1, Coords::new(8, 4)).unwrap();
        let c = game.build_flag(1, Coords::new(12, 8)).unwrap();
        game.build_road_between(1, a, b).unwrap();
        game.remove_flag(1, c).unwrap();
        game.run_queue(1000).unwrap();
        assert!(!game.objects.contains(c));

        let bytes = save_to_vec(&game);
        let loaded = Game::load(bytes.as_slice(), game.descriptions.clone()).unwrap();
        assert_eq!(loaded.objects.len(), game.objects.len());
        let serials: Vec<u32> = loaded.objects.serials().iter().map(|s| s.0).collect();
        assert_eq!(serials, (1..=game.objects.len() as u32).collect::<Vec<_>>());
        assert!(loaded.objects.last_serial() >= game.objects.len() as u32);
        let road = loaded.objects.serials_of::<crate::transport::Road>()[0];
        for f in loaded.objects.get::<crate::transport::Road>(road).unwrap().flags {
            assert!(loaded.objects.get::<crate::transport::Flag>(f).is_some());
            assert!(loaded.map.field(loaded.objects.get::<crate::transport::Flag>(f).unwrap().position).immovable == Some(f));
        }
    }

    #[test]
    fn test_loaded_games_evolve_identically() {
        let mut game = economy_game();
        game.run_queue(20_000).unwrap();
        let bytes = save_to_vec(&game);

        let mut first = Game::load(bytes.as_slice(), game.descriptions.clone()).unwrap();
        let mut second = Game::load(bytes.as_slice(), game.descriptions.clone()).unwrap();
        assert_eq!(first.time(), 20_000);
        assert_eq!(first.checksum(), second.checksum());
        first.run_queue(120_000).unwrap();
        second.run_queue(120_000).unwrap();
        assert_eq!(first.checksum(), second.checksum());
    }

    #[test]
    fn test_unknown_version_is_fatal() {
        let game = economy_game();
        let mut doc: serde_json::Value = serde_json::from_slice(&save_to_vec(&game)).unwrap();
        doc["header"]["version"] = serde_json::json!(SAVEGAME_VERSION + 1);
        let bytes = serde_json::to_vec(&doc).unwrap();
        let err = Game::load(bytes.as_slice(), game.descriptions.clone()).unwrap_err();
        assert!(matches!(err, GameDataError::UnknownVersion { found, .. } if found == SAVEGAME_VERSION + 1));
    }

    #[test]
    fn test_tribe_mismatch() {
        let game = economy_game();
        let bytes = save_to_vec(&game);
        let mut other = (*game.descriptions).clone();
        other.tribe = "atlanteans".to_string();
        let err = Game::load(bytes.as_slice(), Arc::new(other)).unwrap_err();
        assert!(matches!(err, GameDataError::TribeMismatch { .. }));
    }

    #[test]
    fn test_road_to_missing_flag_is_rejected() {
        let game = economy_game();
        let mut doc: serde_json::Value = serde_json::from_slice(&save_to_vec(&game)).unwrap();
        let objects = doc["objects"].as_array_mut().unwrap();
        let road = objects
            .iter_mut()
            .find_map(|o| o["body"].get_mut("Road"))
            .unwrap();
        road["flags"][0] = serde_json::json!(9999);
        let bytes = serde_json::to_vec(&doc).unwrap();
        let err = Game::load(bytes.as_slice(), game.descriptions.clone()).unwrap_err();
        match err {
            GameDataError::UnknownObject { owner, serial } => {
                assert!(owner.starts_with("road"));
                assert_eq!(serial, Serial(9999));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_garbage_is_a_json_error() {
        let descriptions = Arc::new(Descriptions::default_tribe().unwrap());
        let err = Game::load(&b"not a savegame"[..], descriptions).unwrap_err();
        assert!(matches!(err, GameDataError::Json(_)));
    }
}
