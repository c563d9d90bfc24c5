//! Routing over the flag graph.
//!
//! Costs are walking times: a road costs its step count times the carrier
//! step time. Wares pay an extra penalty for entering a congested flag so
//! that traffic spreads over alternative roads.

use crate::game::Game;
use crate::geometry::Map;
use crate::object::{ObjectManager, Serial};
use crate::transport::{Flag, Road, RoadKind};
use game_pathfinding::{AStar, Graph, PathResult};
use std::collections::BTreeMap;
use wldata::WareWorker;

/// Borrowed view of the transport graph.
pub struct FlagGraph<'a> {
    pub objects: &'a ObjectManager,
    pub map: &'a Map,
    pub step_ms: u32,
    pub congestion_threshold: usize,
    pub congestion_penalty_ms: u32,
}

impl FlagGraph<'_> {
    fn flag(&self, serial: Serial) -> Option<&Flag> {
        self.objects.get::<Flag>(serial)
    }

    /// Roads usable by items of `kind`, with the flag at their other end.
    fn links(&self, flag: Serial, kind: WareWorker) -> Vec<(Serial, &Road)> {
        let Some(f) = self.flag(flag) else {
            return Vec::new();
        };
        f.attached_roads()
            .filter_map(|r| self.objects.get::<Road>(r))
            .filter(|road| kind == WareWorker::Ware || road.kind == RoadKind::Road)
            .filter_map(|road| road.other_flag(flag).map(|other| (other, road)))
            .collect()
    }
}

impl Graph<Serial, WareWorker> for FlagGraph<'_> {
    fn neighbors(&self, node: Serial, kind: &WareWorker) -> Vec<Serial> {
        let mut out: Vec<Serial> = self.links(node, *kind).into_iter().map(|(f, _)| f).collect();
        out.sort();
        out.dedup();
        out
    }

    fn cost(&self, from: Serial, to: Serial, kind: &WareWorker) -> u32 {
        let road_cost = self
            .links(from, *kind)
            .into_iter()
            .filter(|(f, _)| *f == to)
            .map(|(_, road)| road.cost(self.step_ms))
            .min()
            .unwrap_or(u32::MAX);
        let congested = *kind == WareWorker::Ware
            && self
                .flag(to)
                .is_some_and(|f| f.is_congested(self.congestion_threshold));
        if congested {
            road_cost.saturating_add(self.congestion_penalty_ms)
        } else {
            road_cost
        }
    }

    fn heuristic(&self, from: Serial, target: Serial, _kind: &WareWorker) -> u32 {
        match (self.flag(from), self.flag(target)) {
            (Some(a), Some(b)) => self.map.calc_distance(a.position, b.position) * self.step_ms,
            _ => 0,
        }
    }
}

impl Game {
    pub fn flag_graph(&self) -> FlagGraph<'_> {
        FlagGraph {
            objects: &self.objects,
            map: &self.map,
            step_ms: self.carrier_step_ms(),
            congestion_threshold: self.config.congestion_threshold,
            congestion_penalty_ms: self.config.congestion_penalty_ms as u32,
        }
    }

    /// Cheapest flag route, start and goal included.
    #[tracing::instrument(skip_all, name = "find_route")]
    pub fn find_route(&self, from: Serial, to: Serial, kind: WareWorker) -> Option<PathResult<Serial>> {
        AStar::find_path(&self.flag_graph(), from, to, &kind)
    }

    /// Cheapest route to whichever of `targets` is closest.
    pub fn find_route_to_any(
        &self,
        from: Serial,
        targets: &[Serial],
        kind: WareWorker,
    ) -> Option<PathResult<Serial>> {
        AStar::find_closest(&self.flag_graph(), from, &kind, None, |f| targets.contains(&f))
    }

    /// Route cost from `from` to every reachable flag.
    pub fn route_costs_from(&self, from: Serial, kind: WareWorker) -> BTreeMap<Serial, u32> {
        AStar::distances(&self.flag_graph(), from, &kind, None)
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::GameBuilder;
    use crate::geometry::Coords;
    use wldata::WareWorker;

    #[test]
    fn test_route_prefers_shorter_roads() {
        let mut game = GameBuilder::new().with_player(1, "Alice").build();
        let a = game.build_flag(1, Coords::new(4, 4)).unwrap();
        let b = game.build_flag(1, Coords::new(8, 4)).unwrap();
        let c = game.build_flag(1, Coords::new(12, 4)).unwrap();
        game.build_road_between(1, a, b).unwrap();
        game.build_road_between(1, b, c).unwrap();
        let (route, cost) = game.find_route(a, c, WareWorker::Ware).unwrap();
        assert_eq!(route, vec![a, b, c]);
        assert_eq!(cost, 8 * 1800);
    }

    #[test]
    fn test_workers_do_not_route_over_waterways() {
        let mut game = GameBuilder::new()
            .with_player(1, "Alice")
            .water_rect(Coords::new(6, 2), Coords::new(9, 10))
            .build();
        let a = game.build_flag(1, Coords::new(4, 6)).unwrap();
        let b = game.build_flag(1, Coords::new(11, 6)).unwrap();
        game.build_waterway_between(1, a, b).unwrap();
        assert!(game.find_route(a, b, WareWorker::Ware).is_some());
        assert!(game.find_route(a, b, WareWorker::Worker).is_none());
    }

    #[test]
    fn test_congested_flag_costs_extra() {
        let mut game = GameBuilder::new().with_player(1, "Alice").build();
        let a = game.build_flag(1, Coords::new(4, 4)).unwrap();
        let b = game.build_flag(1, Coords::new(8, 4)).unwrap();
        game.build_road_between(1, a, b).unwrap();
        let plain = game.route_costs_from(a, WareWorker::Ware)[&b];
        for _ in 0..6 {
            game.spawn_ware_on_flag(b, "log").unwrap();
        }
        let congested = game.route_costs_from(a, WareWorker::Ware)[&b];
        assert_eq!(congested, plain + game.config.congestion_penalty_ms as u32);
        assert_eq!(game.route_costs_from(a, WareWorker::Worker)[&b], plain);
    }
}
