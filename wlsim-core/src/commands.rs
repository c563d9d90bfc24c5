//! Player commands.
//!
//! Each command is validated against the current state first. An invalid
//! command changes nothing: queued commands log a warning and are dropped,
//! direct calls return a [`CommandError`].

use crate::building::Building;
use crate::cmd_queue::PlayerCommand;
use crate::error::EngineError;
use crate::game::Game;
use crate::geometry::{Coords, Direction, NodeCaps, Path};
use crate::object::Serial;
use crate::player::PlayerNumber;
use crate::transport::{Flag, FlagJobKind, Road, RoadKind};
use game_pathfinding::{AStar, Graph};
use thiserror::Error;
use wldata::DescriptionIndex;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerNumber),

    #[error("player {player} cannot build at {coords}")]
    NotBuildable { player: PlayerNumber, coords: Coords },

    #[error("no flag of player {player} at {coords}")]
    NoFlag { player: PlayerNumber, coords: Coords },

    #[error("no usable path from {from} to {to}")]
    NoPath { from: Coords, to: Coords },

    #[error("invalid road: {0}")]
    InvalidRoad(String),

    #[error("object {serial} does not belong to player {player}")]
    NotOwner { serial: Serial, player: PlayerNumber },

    #[error("object {0} does not exist or has the wrong type")]
    Missing(Serial),

    #[error("unknown building type {0}")]
    UnknownBuilding(DescriptionIndex),

    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl Game {
    /// Run a queued player command. Only engine failures are errors.
    pub(crate) fn execute_player_command(&mut self, cmd: &PlayerCommand) -> Result<(), EngineError> {
        let result = match *cmd {
            PlayerCommand::BuildFlag { player, coords } => self.build_flag(player, coords).map(drop),
            PlayerCommand::BuildRoad {
                player,
                start,
                ref steps,
            } => self.build_road(player, start, steps).map(drop),
            PlayerCommand::BuildWaterway {
                player,
                start,
                ref steps,
            } => self.build_waterway(player, start, steps).map(drop),
            PlayerCommand::BuildBuilding {
                player,
                coords,
                building,
            } => self.build_building(player, coords, building).map(drop),
            PlayerCommand::RemoveFlag { player, flag } => self.remove_flag(player, flag),
            PlayerCommand::RemoveRoad { player, road } => self.remove_road(player, road),
            PlayerCommand::FlagAction { player, flag, job } => self.flag_action(player, flag, job).map(drop),
            PlayerCommand::Attack {
                player,
                target,
                soldiers,
            } => self.attack(player, target, soldiers).map(drop),
            PlayerCommand::SetInputMaxFill {
                player,
                building,
                ware,
                max_fill,
            } => self.set_input_queue(player, building, ware, max_fill),
        };
        match result {
            Ok(()) => Ok(()),
            Err(CommandError::Engine(e)) => Err(e),
            Err(e) => {
                log::warn!("Failed to execute command for player {}: {}", cmd.player(), e);
                Ok(())
            }
        }
    }

    fn check_player(&self, player: PlayerNumber) -> Result<(), CommandError> {
        if self.players.contains_key(&player) {
            Ok(())
        } else {
            Err(CommandError::UnknownPlayer(player))
        }
    }

    fn check_owner(&self, player: PlayerNumber, serial: Serial) -> Result<(), CommandError> {
        match self.objects.owner(serial) {
            Some(owner) if owner == player => Ok(()),
            Some(_) => Err(CommandError::NotOwner { serial, player }),
            None => Err(CommandError::Missing(serial)),
        }
    }

    /// Free land the player may use (own or unclaimed).
    fn is_free_for(&self, player: PlayerNumber, c: Coords) -> bool {
        let field = self.map.field(c);
        field.immovable.is_none() && field.owner.map_or(true, |o| o == player)
    }

    fn can_place_flag(&self, player: PlayerNumber, c: Coords) -> bool {
        self.is_free_for(player, c)
            && self.map.field(c).caps.contains(NodeCaps::BUILDABLE)
            && Direction::ALL.into_iter().all(|d| {
                let n = self.map.neighbour(c, d);
                self.map
                    .field(n)
                    .immovable
                    .map_or(true, |i| self.objects.get::<Flag>(i).is_none())
            })
    }

    /// Own flag at `c`, if any.
    fn own_flag_at(&self, player: PlayerNumber, c: Coords) -> Option<Serial> {
        self.map
            .field(c)
            .immovable
            .filter(|&i| self.objects.get::<Flag>(i).is_some() && self.objects.owner(i) == Some(player))
    }

    pub fn build_flag(&mut self, player: PlayerNumber, coords: Coords) -> Result<Serial, CommandError> {
        self.check_player(player)?;
        let coords = self.map.normalize(coords);
        if !self.can_place_flag(player, coords) {
            return Err(CommandError::NotBuildable { player, coords });
        }
        Ok(self.place_flag(player, coords)?)
    }

    pub fn build_road(&mut self, player: PlayerNumber, start: Coords, steps: &[Direction]) -> Result<Serial, CommandError> {
        self.build_route(player, RoadKind::Road, start, steps)
    }

    pub fn build_waterway(
        &mut self,
        player: PlayerNumber,
        start: Coords,
        steps: &[Direction],
    ) -> Result<Serial, CommandError> {
        self.build_route(player, RoadKind::Waterway, start, steps)
    }

    /// Build a road along the shortest free path between two flags.
    pub fn build_road_between(&mut self, player: PlayerNumber, a: Serial, b: Serial) -> Result<Serial, CommandError> {
        self.build_route_between(player, RoadKind::Road, a, b)
    }

    pub fn build_waterway_between(&mut self, player: PlayerNumber, a: Serial, b: Serial) -> Result<Serial, CommandError> {
        self.build_route_between(player, RoadKind::Waterway, a, b)
    }

    fn build_route_between(
        &mut self,
        player: PlayerNumber,
        kind: RoadKind,
        a: Serial,
        b: Serial,
    ) -> Result<Serial, CommandError> {
        let from = self.objects.get::<Flag>(a).ok_or(CommandError::Missing(a))?.position;
        let to = self.objects.get::<Flag>(b).ok_or(CommandError::Missing(b))?.position;
        let movecaps = match kind {
            RoadKind::Road => NodeCaps::WALKABLE,
            RoadKind::Waterway => NodeCaps::WALKABLE | NodeCaps::SWIMMABLE,
        };
        let graph = RouteGraph {
            game: self,
            player,
            kind,
            goal: to,
        };
        let (nodes, _) = AStar::find_path(&graph, from, to, &movecaps).ok_or(CommandError::NoPath { from, to })?;
        let steps: Vec<Direction> = nodes
            .windows(2)
            .filter_map(|pair| self.map.direction_to(pair[0], pair[1]))
            .collect();
        self.build_route(player, kind, from, &steps)
    }

    fn build_route(
        &mut self,
        player: PlayerNumber,
        kind: RoadKind,
        start: Coords,
        steps: &[Direction],
    ) -> Result<Serial, CommandError> {
        self.check_player(player)?;
        let start = self.map.normalize(start);
        if steps.is_empty() {
            return Err(CommandError::InvalidRoad("no steps".to_string()));
        }
        let start_flag = self
            .own_flag_at(player, start)
            .ok_or(CommandError::NoFlag { player, coords: start })?;
        let mut path = Path::new(start);
        for &d in steps {
            path.end = self.map.neighbour(path.end, d);
            path.steps.push(d);
        }
        let nodes = path.coords(&self.map);
        let end = path.end;

        let mut seen = nodes.clone();
        seen.sort();
        seen.dedup();
        if seen.len() != nodes.len() {
            return Err(CommandError::InvalidRoad("path crosses itself".to_string()));
        }
        for &c in &nodes[1..nodes.len() - 1] {
            if !self.is_free_for(player, c) || !self.route_node_ok(kind, c) {
                return Err(CommandError::InvalidRoad(format!("node {} is blocked", c)));
            }
        }
        let end_flag = match self.own_flag_at(player, end) {
            Some(f) => f,
            None if self.can_place_flag(player, end) => self.place_flag(player, end)?,
            None => return Err(CommandError::NoFlag { player, coords: end }),
        };
        if end_flag == start_flag {
            return Err(CommandError::InvalidRoad("road ends where it starts".to_string()));
        }
        if kind == RoadKind::Waterway {
            if self.descriptions.ferry().is_none() {
                return Err(CommandError::Rejected("tribe has no ferries".to_string()));
            }
            for flag in [start_flag, end_flag] {
                if self.has_waterway(flag) {
                    return Err(CommandError::InvalidRoad(format!("flag {} already has a waterway", flag)));
                }
            }
        }
        Ok(self.place_road(player, kind, start_flag, end_flag, path)?)
    }

    fn route_node_ok(&self, kind: RoadKind, c: Coords) -> bool {
        let caps = self.map.field(c).caps;
        match kind {
            RoadKind::Road => caps.contains(NodeCaps::WALKABLE),
            // Waterways run over water and along its shore.
            RoadKind::Waterway => {
                caps.contains(NodeCaps::SWIMMABLE)
                    || Direction::ALL.into_iter().any(|d| {
                        self.map
                            .field(self.map.neighbour(c, d))
                            .caps
                            .contains(NodeCaps::SWIMMABLE)
                    })
            }
        }
    }

    fn has_waterway(&self, flag: Serial) -> bool {
        self.objects.get::<Flag>(flag).is_some_and(|f| {
            f.attached_roads().any(|r| {
                self.objects
                    .get::<Road>(r)
                    .is_some_and(|r| r.kind == RoadKind::Waterway)
            })
        })
    }

    /// Place a building at `coords`; its flag goes south-east of it.
    pub fn build_building(
        &mut self,
        player: PlayerNumber,
        coords: Coords,
        building: DescriptionIndex,
    ) -> Result<Serial, CommandError> {
        self.check_player(player)?;
        if self.descriptions.building(building).is_none() {
            return Err(CommandError::UnknownBuilding(building));
        }
        let coords = self.map.normalize(coords);
        let flag_pos = self.map.brn(coords);
        let site_ok = self.is_free_for(player, coords) && self.map.field(coords).caps.contains(NodeCaps::BUILDABLE);
        let flag_ok = match self.own_flag_at(player, flag_pos) {
            Some(f) => self.objects.get::<Flag>(f).is_some_and(|f| f.building.is_none()),
            None => self.can_place_flag(player, flag_pos),
        };
        if !site_ok || !flag_ok {
            return Err(CommandError::NotBuildable { player, coords });
        }
        Ok(self.place_building(player, coords, building)?)
    }

    pub fn remove_flag(&mut self, player: PlayerNumber, flag: Serial) -> Result<(), CommandError> {
        self.objects.get::<Flag>(flag).ok_or(CommandError::Missing(flag))?;
        self.check_owner(player, flag)?;
        Ok(self.destroy_flag(flag)?)
    }

    pub fn remove_road(&mut self, player: PlayerNumber, road: Serial) -> Result<(), CommandError> {
        self.objects.get::<Road>(road).ok_or(CommandError::Missing(road))?;
        self.check_owner(player, road)?;
        Ok(self.destroy_road(road)?)
    }

    /// Order a geologist or scout to the flag. Returns the job id.
    pub fn flag_action(&mut self, player: PlayerNumber, flag: Serial, job: FlagJobKind) -> Result<u32, CommandError> {
        self.objects.get::<Flag>(flag).ok_or(CommandError::Missing(flag))?;
        self.check_owner(player, flag)?;
        Ok(self.add_flag_job(flag, job)?)
    }

    /// Launch up to `soldiers` attackers at an enemy military site. Returns
    /// how many soldiers set out.
    pub fn attack(&mut self, player: PlayerNumber, target: Serial, soldiers: u32) -> Result<u32, CommandError> {
        self.check_player(player)?;
        let b = self.objects.get::<Building>(target).ok_or(CommandError::Missing(target))?;
        if !b.is_military() {
            return Err(CommandError::Rejected(format!("{} cannot be attacked", target)));
        }
        if self.objects.owner(target) == Some(player) {
            return Err(CommandError::Rejected("cannot attack own building".to_string()));
        }
        let launched = self.launch_attack(player, target, soldiers)?;
        if launched == 0 {
            return Err(CommandError::Rejected(format!("no soldiers available to attack {}", target)));
        }
        Ok(launched)
    }

    pub fn set_input_queue(
        &mut self,
        player: PlayerNumber,
        building: Serial,
        ware: DescriptionIndex,
        max_fill: u32,
    ) -> Result<(), CommandError> {
        self.objects
            .get::<Building>(building)
            .ok_or(CommandError::Missing(building))?;
        self.check_owner(player, building)?;
        if !self.set_input_max_fill(building, ware, max_fill)? {
            return Err(CommandError::Rejected(format!(
                "building {} has no input queue for ware {}",
                building, ware
            )));
        }
        Ok(())
    }
}

/// Nodes a new road or waterway of `player` may run over. Only the goal
/// flag may be occupied.
struct RouteGraph<'a> {
    game: &'a Game,
    player: PlayerNumber,
    kind: RoadKind,
    goal: Coords,
}

impl Graph<Coords, NodeCaps> for RouteGraph<'_> {
    fn neighbors(&self, node: Coords, movecaps: &NodeCaps) -> Vec<Coords> {
        let map = &self.game.map;
        Direction::ALL
            .into_iter()
            .map(|d| map.neighbour(node, d))
            .filter(|&n| map.can_enter(n, *movecaps))
            .filter(|&n| {
                n == self.goal
                    || (self.game.is_free_for(self.player, n) && self.game.route_node_ok(self.kind, n))
            })
            .collect()
    }

    fn cost(&self, _from: Coords, _to: Coords, _movecaps: &NodeCaps) -> u32 {
        1
    }

    fn heuristic(&self, from: Coords, target: Coords, _movecaps: &NodeCaps) -> u32 {
        self.game.map.calc_distance(from, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd_queue::Command;
    use crate::testing::GameBuilder;

    #[test]
    fn test_flags_need_distance() {
        let mut game = GameBuilder::new().with_player(1, "Alice").build();
        game.build_flag(1, Coords::new(4, 4)).unwrap();
        let err = game.build_flag(1, Coords::new(5, 4)).unwrap_err();
        assert!(matches!(err, CommandError::NotBuildable { .. }));
        assert!(game.build_flag(1, Coords::new(6, 4)).is_ok());
    }

    #[test]
    fn test_road_creates_end_flag_and_requests_carrier() {
        let mut game = GameBuilder::new().with_player(1, "Alice").build();
        game.build_flag(1, Coords::new(4, 4)).unwrap();
        let road = game
            .build_road(1, Coords::new(4, 4), &[Direction::East, Direction::East, Direction::East])
            .unwrap();
        let r = game.objects.get::<Road>(road).unwrap();
        assert!(game.objects.get::<Flag>(r.flags[1]).is_some());
        assert!(r.carrier_request.is_some());
        assert_eq!(game.map.field(Coords::new(5, 4)).immovable, Some(road));
    }

    #[test]
    fn test_road_rejects_self_crossing() {
        let mut game = GameBuilder::new().with_player(1, "Alice").build();
        game.build_flag(1, Coords::new(4, 4)).unwrap();
        let err = game
            .build_road(1, Coords::new(4, 4), &[Direction::East, Direction::West, Direction::East])
            .unwrap_err();
        assert!(matches!(err, CommandError::InvalidRoad(_)));
    }

    #[test]
    fn test_road_cannot_cross_water() {
        let mut game = GameBuilder::new()
            .with_player(1, "Alice")
            .water_rect(Coords::new(6, 0), Coords::new(6, 10))
            .build();
        game.build_flag(1, Coords::new(4, 4)).unwrap();
        let err = game
            .build_road(1, Coords::new(4, 4), &[Direction::East; 4])
            .unwrap_err();
        assert!(matches!(err, CommandError::InvalidRoad(_)));
    }

    #[test]
    fn test_road_between_flags_goes_around_roads() {
        let mut game = GameBuilder::new().with_player(1, "Alice").build();
        let a = game.build_flag(1, Coords::new(4, 8)).unwrap();
        let b = game.build_flag(1, Coords::new(12, 8)).unwrap();
        let ab = game.build_road_between(1, a, b).unwrap();
        let c = game.build_flag(1, Coords::new(8, 4)).unwrap();
        let d = game.build_flag(1, Coords::new(8, 12)).unwrap();
        let cd = game.build_road_between(1, c, d).unwrap();

        let nodes = |road: Serial| game.objects.get::<Road>(road).unwrap().path.coords(&game.map);
        let first = nodes(ab);
        assert!(nodes(cd).iter().all(|n| !first.contains(n)));
    }

    #[test]
    fn test_foreign_objects_cannot_be_removed() {
        let mut game = GameBuilder::new()
            .with_player(1, "Alice")
            .with_player(2, "Bob")
            .build();
        let flag = game.build_flag(1, Coords::new(4, 4)).unwrap();
        let err = game.remove_flag(2, flag).unwrap_err();
        assert!(matches!(err, CommandError::NotOwner { .. }));
        game.remove_flag(1, flag).unwrap();
        assert!(game.objects.get::<Flag>(flag).is_none());
        assert_eq!(game.map.field(Coords::new(4, 4)).immovable, None);
    }

    #[test]
    fn test_invalid_queued_command_is_dropped() {
        let mut game = GameBuilder::new().with_player(1, "Alice").build();
        let flag = game.build_flag(1, Coords::new(4, 4)).unwrap();
        let before = game.objects.len();
        game.queue.enqueue(
            10,
            Command::Player(PlayerCommand::BuildFlag {
                player: 1,
                coords: Coords::new(5, 4),
            }),
        );
        game.queue.enqueue(
            10,
            Command::Player(PlayerCommand::RemoveFlag {
                player: 7,
                flag,
            }),
        );
        game.run_queue(100).unwrap();
        assert_eq!(game.objects.len(), before);
    }

    #[test]
    fn test_queued_build_commands_apply() {
        let mut game = GameBuilder::new().with_player(1, "Alice").build();
        let sawmill = game.descriptions.building_index("sawmill").unwrap();
        game.queue.enqueue(
            10,
            Command::Player(PlayerCommand::BuildBuilding {
                player: 1,
                coords: Coords::new(6, 6),
                building: sawmill,
            }),
        );
        game.run_queue(100).unwrap();
        let b = game.map.field(Coords::new(6, 6)).immovable.unwrap();
        assert!(game.objects.get::<Building>(b).is_some());
        assert!(game.building_flag(b).is_some());
    }
}
