use crate::building::Building;
use crate::config::SimConfig;
use crate::error::EngineError;
use crate::game::Game;
use crate::geometry::{Coords, Map, NodeCaps};
use crate::object::Serial;
use crate::player::PlayerNumber;
use crate::transport::Flag;
use std::sync::Arc;
use wldata::{Descriptions, WareWorker};

/// Starting stock of a headquarters: (kind, name, count).
pub const HQ_STOCK: &[(WareWorker, &str, u32)] = &[
    (WareWorker::Ware, "log", 20),
    (WareWorker::Ware, "planks", 10),
    (WareWorker::Ware, "granite", 10),
    (WareWorker::Ware, "fish", 6),
    (WareWorker::Ware, "meat", 6),
    (WareWorker::Ware, "ration", 6),
    (WareWorker::Ware, "ax", 4),
    (WareWorker::Worker, "carrier", 10),
    (WareWorker::Worker, "soldier", 4),
    (WareWorker::Worker, "geologist", 1),
    (WareWorker::Worker, "scout", 1),
];

/// Builds small games for tests and demo scenarios.
pub struct GameBuilder {
    width: i16,
    height: i16,
    seed: u64,
    config: SimConfig,
    descriptions: Option<Arc<Descriptions>>,
    players: Vec<(PlayerNumber, String)>,
    water: Vec<(Coords, Coords)>,
    headquarters: Vec<(PlayerNumber, Coords)>,
}

impl GameBuilder {
    pub fn new() -> Self {
        Self {
            width: 32,
            height: 32,
            seed: 0,
            config: SimConfig::default(),
            descriptions: None,
            players: Vec::new(),
            water: Vec::new(),
            headquarters: Vec::new(),
        }
    }

    pub fn size(mut self, width: i16, height: i16) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn config(mut self, config: SimConfig) -> Self {
        self.config = config;
        self
    }

    /// Use these descriptions instead of the built-in tribe.
    pub fn descriptions(mut self, descriptions: Arc<Descriptions>) -> Self {
        self.descriptions = Some(descriptions);
        self
    }

    pub fn with_player(mut self, number: PlayerNumber, name: &str) -> Self {
        self.players.push((number, name.to_string()));
        self
    }

    /// Turn the rectangle spanned by `a` and `b` (inclusive) into water.
    pub fn water_rect(mut self, a: Coords, b: Coords) -> Self {
        self.water.push((a, b));
        self
    }

    /// A stocked headquarters at `coords`, flag south-east of it.
    pub fn with_headquarters(mut self, player: PlayerNumber, coords: Coords) -> Self {
        self.headquarters.push((player, coords));
        self
    }

    /// # Panics
    ///
    /// If the built-in tribe fails to load or a headquarters cannot be
    /// placed. Both are bugs in the scenario, not in the game.
    pub fn build(self) -> Game {
        let descriptions = match self.descriptions {
            Some(d) => d,
            None => Arc::new(Descriptions::default_tribe().expect("built-in tribe must load")),
        };
        let mut map = Map::new(self.width, self.height);
        for (a, b) in &self.water {
            for y in a.y.min(b.y)..=a.y.max(b.y) {
                for x in a.x.min(b.x)..=a.x.max(b.x) {
                    map.field_mut(Coords::new(x, y)).caps = NodeCaps::SWIMMABLE;
                }
            }
        }
        let mut game = Game::new(map, descriptions, self.config, self.seed);
        for (number, name) in self.players {
            game.add_player(number, name);
        }
        for (player, coords) in self.headquarters {
            game.place_headquarters(player, coords)
                .expect("headquarters must be placeable");
        }
        game
    }
}

impl Default for GameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Game {
    /// Place a headquarters with [`HQ_STOCK`].
    pub fn place_headquarters(&mut self, player: PlayerNumber, coords: Coords) -> Result<Serial, EngineError> {
        let index = self
            .descriptions
            .building_index("headquarters")
            .ok_or_else(|| EngineError::InconsistentEconomy("tribe has no headquarters".to_string()))?;
        let hq = self.place_building(player, coords, index)?;
        for &(kind, name, count) in HQ_STOCK {
            let index = match kind {
                WareWorker::Ware => self.descriptions.ware_index(name),
                WareWorker::Worker => self.descriptions.worker_index(name),
            };
            if let Some(index) = index {
                self.warehouse_insert(hq, kind, index, count)?;
            }
        }
        Ok(hq)
    }

    /// The player's first warehouse.
    pub fn headquarters(&self, player: PlayerNumber) -> Option<Serial> {
        self.objects
            .serials_of::<Building>()
            .into_iter()
            .find(|&b| {
                self.objects.owner(b) == Some(player)
                    && self.objects.get::<Building>(b).is_some_and(|b| b.is_warehouse())
            })
    }

    /// Drop a new ware of type `name` on `flag`.
    pub fn spawn_ware_on_flag(&mut self, flag: Serial, name: &str) -> Result<Serial, EngineError> {
        self.objects
            .get::<Flag>(flag)
            .ok_or(EngineError::MissingObject(flag))?;
        let index = self
            .descriptions
            .ware_index(name)
            .ok_or_else(|| EngineError::InconsistentEconomy(format!("unknown ware {}", name)))?;
        let owner = self.objects.owner(flag).unwrap_or_default();
        let ware = self.create_ware(owner, index, Some(flag));
        self.add_ware_to_flag(flag, ware)?;
        Ok(ware)
    }

    /// Create a worker of type `name` standing at `coords` and let it pick
    /// its first task.
    pub fn spawn_worker(&mut self, owner: PlayerNumber, name: &str, coords: Coords) -> Result<Serial, EngineError> {
        let index = self
            .descriptions
            .worker_index(name)
            .ok_or_else(|| EngineError::InconsistentEconomy(format!("unknown worker {}", name)))?;
        let bob = self.create_bob(owner, index, coords)?;
        self.schedule_act(bob, 0)?;
        Ok(bob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_methods() {
        let game = GameBuilder::default()
            .with_player(1, "Alice")
            .with_player(2, "Bob")
            .water_rect(Coords::new(2, 2), Coords::new(3, 3))
            .build();
        assert_eq!(game.players.len(), 2);
        assert_eq!(game.map.field(Coords::new(3, 2)).caps, NodeCaps::SWIMMABLE);
        assert!(game.map.field(Coords::new(4, 2)).caps.contains(NodeCaps::WALKABLE));
    }

    #[test]
    fn test_headquarters_is_stocked() {
        let game = GameBuilder::new()
            .with_player(1, "Alice")
            .with_headquarters(1, Coords::new(6, 6))
            .build();
        let hq = game.headquarters(1).unwrap();
        let log = game.descriptions.ware_index("log").unwrap();
        let carrier = game.descriptions.carrier();
        let b = game.objects.get::<Building>(hq).unwrap();
        assert_eq!(b.stock(WareWorker::Ware, log), 20);
        assert_eq!(b.stock(WareWorker::Worker, carrier), 10);
        assert!(game.building_flag(hq).is_some());
        assert!(game.headquarters(2).is_none());
    }
}
