use crate::bob::Bob;
use crate::geometry::{Coords, Map, Path};
use crate::object::{OPtr, Serial};
use crate::transport::RequestId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoadKind {
    Road,
    /// Water route served by a ferry. Only wares travel on waterways.
    Waterway,
}

impl RoadKind {
    pub fn name(self) -> &'static str {
        match self {
            RoadKind::Road => "road",
            RoadKind::Waterway => "waterway",
        }
    }
}

/// Index of a road end.
pub const FLAG_START: usize = 0;
pub const FLAG_END: usize = 1;

/// A road or waterway between two flags, staffed by one carrier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Road {
    pub kind: RoadKind,
    pub flags: [Serial; 2],
    /// Walk from the start flag to the end flag.
    pub path: Path,
    pub carrier: OPtr<Bob>,
    pub carrier_request: Option<RequestId>,
}

impl Road {
    pub fn new(kind: RoadKind, start: Serial, end: Serial, path: Path) -> Self {
        Self {
            kind,
            flags: [start, end],
            path,
            carrier: OPtr::null(),
            carrier_request: None,
        }
    }

    pub fn flag(&self, end: usize) -> Serial {
        self.flags[end & 1]
    }

    /// Which end `flag` is, if it is one.
    pub fn end_of(&self, flag: Serial) -> Option<usize> {
        self.flags.iter().position(|&f| f == flag)
    }

    pub fn other_flag(&self, flag: Serial) -> Option<Serial> {
        self.end_of(flag).map(|end| self.flags[end ^ 1])
    }

    /// Where an idle carrier waits: the middle of the road.
    pub fn idle_index(&self) -> usize {
        self.path.nsteps() / 2
    }

    pub fn idle_position(&self, map: &Map) -> Coords {
        self.path.truncated(map, self.idle_index()).end
    }

    /// Step index of `pos` along the road, if it lies on it.
    pub fn index_of(&self, map: &Map, pos: Coords) -> Option<usize> {
        self.path.coords(map).iter().position(|&c| c == pos)
    }

    /// Path from `pos` (on the road) to the given end.
    pub fn path_to_end(&self, map: &Map, pos: Coords, end: usize) -> Option<Path> {
        let index = self.index_of(map, pos)?;
        Some(if end == FLAG_END {
            self.path.trimmed_start(map, index)
        } else {
            self.path.truncated(map, index).reversed()
        })
    }

    /// Road end that is strictly cheaper to reach from `pos`; the start wins
    /// ties.
    pub fn find_closest_flag(&self, map: &Map, pos: Coords, step_ms: u32) -> usize {
        let Some(index) = self.index_of(map, pos) else {
            return FLAG_START;
        };
        let startcost = map.calc_cost(&self.path.truncated(map, index), step_ms);
        let endcost = map.calc_cost(&self.path.trimmed_start(map, index), step_ms);
        if endcost < startcost {
            FLAG_END
        } else {
            FLAG_START
        }
    }

    /// Walking cost of the whole road.
    pub fn cost(&self, step_ms: u32) -> u32 {
        self.path.nsteps() as u32 * step_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Direction, NodeCaps};

    fn straight_road(map: &Map, len: i16) -> Road {
        let path = map
            .findpath(Coords::new(2, 2), Coords::new(2 + len, 2), 0, NodeCaps::WALKABLE)
            .unwrap();
        assert!(path.steps.iter().all(|&d| d == Direction::East));
        Road::new(RoadKind::Road, Serial(1), Serial(2), path)
    }

    #[test]
    fn test_closest_flag_tie_goes_to_start() {
        let map = Map::new(16, 16);
        let road = straight_road(&map, 4);
        assert_eq!(road.find_closest_flag(&map, Coords::new(4, 2), 1800), FLAG_START);
        assert_eq!(road.find_closest_flag(&map, Coords::new(5, 2), 1800), FLAG_END);
        assert_eq!(road.find_closest_flag(&map, Coords::new(3, 2), 1800), FLAG_START);
    }

    #[test]
    fn test_path_to_end_from_middle() {
        let map = Map::new(16, 16);
        let road = straight_road(&map, 4);
        let to_start = road.path_to_end(&map, Coords::new(4, 2), FLAG_START).unwrap();
        assert_eq!(to_start.end, Coords::new(2, 2));
        assert_eq!(to_start.nsteps(), 2);
        let to_end = road.path_to_end(&map, Coords::new(4, 2), FLAG_END).unwrap();
        assert_eq!(to_end.end, Coords::new(6, 2));
        assert_eq!(road.idle_position(&map), Coords::new(4, 2));
    }

    #[test]
    fn test_other_flag() {
        let map = Map::new(16, 16);
        let road = straight_road(&map, 2);
        assert_eq!(road.other_flag(Serial(1)), Some(Serial(2)));
        assert_eq!(road.other_flag(Serial(3)), None);
    }
}
