//! # Map substrate
//!
//! Hex fields on a wrapping rectangle. Odd rows are shifted half a field to
//! the right:
//!
//! ```text
//!  y=0   (0,0)  (1,0)  (2,0)
//!  y=1      (0,1)  (1,1)  (2,1)
//!  y=2   (0,2)  (1,2)  (2,2)
//! ```
//!
//! Walking directions are numbered clockwise starting top-right, matching
//! the road slot indices on flags.

use crate::object::Serial;
use crate::player::PlayerNumber;
use bitflags::bitflags;
use game_pathfinding::{AStar, Graph};
use serde::{Deserialize, Serialize};
use std::fmt;
use wldata::DescriptionIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Coords {
    pub x: i16,
    pub y: i16,
}

impl Coords {
    pub const fn new(x: i16, y: i16) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Coords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    NorthEast = 1,
    East = 2,
    SouthEast = 3,
    SouthWest = 4,
    West = 5,
    NorthWest = 6,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::NorthEast,
        Direction::East,
        Direction::SouthEast,
        Direction::SouthWest,
        Direction::West,
        Direction::NorthWest,
    ];

    pub fn opposite(self) -> Direction {
        match self {
            Direction::NorthEast => Direction::SouthWest,
            Direction::East => Direction::West,
            Direction::SouthEast => Direction::NorthWest,
            Direction::SouthWest => Direction::NorthEast,
            Direction::West => Direction::East,
            Direction::NorthWest => Direction::SouthEast,
        }
    }

    /// Slot index 0..6 on a flag.
    pub fn index(self) -> usize {
        self as usize - 1
    }

    pub fn from_index(index: usize) -> Option<Direction> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Direction::NorthEast => "ne",
            Direction::East => "e",
            Direction::SouthEast => "se",
            Direction::SouthWest => "sw",
            Direction::West => "w",
            Direction::NorthWest => "nw",
        }
    }
}

bitflags! {
    /// What may move over or stand on a node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct NodeCaps: u8 {
        const WALKABLE = 0b0000_0001;
        const SWIMMABLE = 0b0000_0010;
        /// Flags and buildings may be placed here.
        const BUILDABLE = 0b0000_0100;
    }
}

/// A ground resource that geologists can find.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub ware: DescriptionIndex,
    pub amount: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub caps: NodeCaps,
    pub owner: Option<PlayerNumber>,
    /// Flag, road or building occupying the node.
    pub immovable: Option<Serial>,
    /// Bobs standing on (or walking onto) the node, in arrival order.
    pub bobs: Vec<Serial>,
    pub resource: Option<Resource>,
}

impl Default for Field {
    fn default() -> Self {
        Self {
            caps: NodeCaps::WALKABLE | NodeCaps::BUILDABLE,
            owner: None,
            immovable: None,
            bobs: Vec::new(),
            resource: None,
        }
    }
}

/// A walk: a start node plus one direction per step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    pub start: Coords,
    pub end: Coords,
    pub steps: Vec<Direction>,
}

impl Path {
    pub fn new(start: Coords) -> Self {
        Self {
            start,
            end: start,
            steps: Vec::new(),
        }
    }

    pub fn nsteps(&self) -> usize {
        self.steps.len()
    }

    /// Every node of the path, start and end included.
    pub fn coords(&self, map: &Map) -> Vec<Coords> {
        let mut out = Vec::with_capacity(self.steps.len() + 1);
        let mut c = self.start;
        out.push(c);
        for &d in &self.steps {
            c = map.neighbour(c, d);
            out.push(c);
        }
        out
    }

    pub fn reversed(&self) -> Path {
        Path {
            start: self.end,
            end: self.start,
            steps: self.steps.iter().rev().map(|d| d.opposite()).collect(),
        }
    }

    /// The first `n` steps.
    pub fn truncated(&self, map: &Map, n: usize) -> Path {
        let steps: Vec<Direction> = self.steps.iter().take(n).copied().collect();
        let end = steps.iter().fold(self.start, |c, &d| map.neighbour(c, d));
        Path {
            start: self.start,
            end,
            steps,
        }
    }

    /// Everything after the first `n` steps.
    pub fn trimmed_start(&self, map: &Map, n: usize) -> Path {
        let start = self
            .steps
            .iter()
            .take(n)
            .fold(self.start, |c, &d| map.neighbour(c, d));
        Path {
            start,
            end: self.end,
            steps: self.steps.iter().skip(n).copied().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Map {
    width: i16,
    height: i16,
    fields: Vec<Field>,
}

impl Map {
    pub fn new(width: i16, height: i16) -> Self {
        let width = width.max(2);
        // Odd row shifting requires an even height for wrapping.
        let height = (height.max(2) + 1) & !1;
        Self {
            width,
            height,
            fields: vec![Field::default(); width as usize * height as usize],
        }
    }

    pub fn width(&self) -> i16 {
        self.width
    }

    pub fn height(&self) -> i16 {
        self.height
    }

    pub fn normalize(&self, c: Coords) -> Coords {
        Coords {
            x: c.x.rem_euclid(self.width),
            y: c.y.rem_euclid(self.height),
        }
    }

    fn index(&self, c: Coords) -> usize {
        let c = self.normalize(c);
        c.y as usize * self.width as usize + c.x as usize
    }

    pub fn field(&self, c: Coords) -> &Field {
        &self.fields[self.index(c)]
    }

    pub fn field_mut(&mut self, c: Coords) -> &mut Field {
        let i = self.index(c);
        &mut self.fields[i]
    }

    pub fn fields_owned_by(&self, player: PlayerNumber) -> usize {
        self.fields.iter().filter(|f| f.owner == Some(player)).count()
    }

    pub fn all_coords(&self) -> impl Iterator<Item = Coords> + '_ {
        (0..self.height).flat_map(move |y| (0..self.width).map(move |x| Coords::new(x, y)))
    }

    pub fn neighbour(&self, c: Coords, dir: Direction) -> Coords {
        let odd = c.y & 1 == 1;
        let n = match dir {
            Direction::NorthEast => {
                if odd {
                    Coords::new(c.x + 1, c.y - 1)
                } else {
                    Coords::new(c.x, c.y - 1)
                }
            }
            Direction::East => Coords::new(c.x + 1, c.y),
            Direction::SouthEast => {
                if odd {
                    Coords::new(c.x + 1, c.y + 1)
                } else {
                    Coords::new(c.x, c.y + 1)
                }
            }
            Direction::SouthWest => {
                if odd {
                    Coords::new(c.x, c.y + 1)
                } else {
                    Coords::new(c.x - 1, c.y + 1)
                }
            }
            Direction::West => Coords::new(c.x - 1, c.y),
            Direction::NorthWest => {
                if odd {
                    Coords::new(c.x, c.y - 1)
                } else {
                    Coords::new(c.x - 1, c.y - 1)
                }
            }
        };
        self.normalize(n)
    }

    pub fn tln(&self, c: Coords) -> Coords {
        self.neighbour(c, Direction::NorthWest)
    }

    pub fn brn(&self, c: Coords) -> Coords {
        self.neighbour(c, Direction::SouthEast)
    }

    /// Direction of a neighbouring node, if `to` is adjacent to `from`.
    pub fn direction_to(&self, from: Coords, to: Coords) -> Option<Direction> {
        let to = self.normalize(to);
        Direction::ALL
            .into_iter()
            .find(|&d| self.neighbour(from, d) == to)
    }

    fn to_cube(c: Coords) -> (i32, i32) {
        // Odd-row offset to axial
        let q = c.x as i32 - ((c.y as i32 - (c.y as i32 & 1)) / 2);
        (q, c.y as i32)
    }

    /// Number of steps between two nodes, honouring wrap-around.
    pub fn calc_distance(&self, a: Coords, b: Coords) -> u32 {
        let a = self.normalize(a);
        let b = self.normalize(b);
        let (w, h) = (self.width as i32, self.height as i32);
        let (aq, ar) = Self::to_cube(a);
        let mut best = u32::MAX;
        for dy in [-h, 0, h] {
            for dx in [-w, 0, w] {
                let bx = b.x as i32 + dx;
                let by = b.y as i32 + dy;
                // Heights are even, so row parity survives the shift.
                let bq = bx - ((by - (by & 1)) / 2);
                let dq = bq - aq;
                let dr = by - ar;
                let d = (dq.abs() + dr.abs() + (dq + dr).abs()) / 2;
                best = best.min(d as u32);
            }
        }
        best
    }

    /// All nodes within `radius` steps of `center`, sorted.
    pub fn region(&self, center: Coords, radius: u32) -> Vec<Coords> {
        let r = radius.min(self.width.max(self.height) as u32) as i16;
        let mut out = Vec::new();
        for dy in -r..=r {
            for dx in -r - 1..=r + 1 {
                let c = self.normalize(Coords::new(center.x + dx, center.y + dy));
                if self.calc_distance(center, c) <= radius && !out.contains(&c) {
                    out.push(c);
                }
            }
        }
        out.sort();
        out
    }

    pub fn can_enter(&self, c: Coords, movecaps: NodeCaps) -> bool {
        self.field(c).caps.intersects(movecaps)
    }

    /// Cost estimate of walking a path: one step time per step.
    pub fn calc_cost(&self, path: &Path, step_ms: u32) -> u32 {
        path.nsteps() as u32 * step_ms
    }

    /// Find a walkable path.
    ///
    /// `persist` bounds the search: with `persist > 0` paths longer than
    /// `persist` times the direct distance are not considered. Zero searches
    /// the whole reachable area.
    #[tracing::instrument(skip_all, name = "findpath")]
    pub fn findpath(
        &self,
        start: Coords,
        end: Coords,
        persist: u32,
        movecaps: NodeCaps,
    ) -> Option<Path> {
        let start = self.normalize(start);
        let end = self.normalize(end);
        if start == end {
            return Some(Path::new(start));
        }
        if !self.can_enter(end, movecaps) {
            return None;
        }
        let limit = if persist > 0 {
            Some(self.calc_distance(start, end).saturating_mul(persist).max(2))
        } else {
            None
        };
        let (nodes, _) = AStar::find_path_bounded(self, start, end, &movecaps, limit)?;
        let mut path = Path::new(start);
        for pair in nodes.windows(2) {
            path.steps.push(self.direction_to(pair[0], pair[1])?);
        }
        path.end = end;
        Some(path)
    }
}

impl Graph<Coords, NodeCaps> for Map {
    fn neighbors(&self, node: Coords, movecaps: &NodeCaps) -> Vec<Coords> {
        Direction::ALL
            .into_iter()
            .map(|d| self.neighbour(node, d))
            .filter(|&n| self.can_enter(n, *movecaps))
            .collect()
    }

    fn cost(&self, _from: Coords, _to: Coords, _movecaps: &NodeCaps) -> u32 {
        1
    }

    fn heuristic(&self, from: Coords, target: Coords, _movecaps: &NodeCaps) -> u32 {
        self.calc_distance(from, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neighbours_are_symmetric() {
        let map = Map::new(16, 16);
        for c in [Coords::new(3, 3), Coords::new(4, 4), Coords::new(0, 0), Coords::new(15, 15)] {
            for d in Direction::ALL {
                let n = map.neighbour(c, d);
                assert_eq!(map.neighbour(n, d.opposite()), c, "{c} {d:?}");
                assert_eq!(map.calc_distance(c, n), 1);
            }
        }
    }

    #[test]
    fn test_brn_of_even_and_odd_rows() {
        let map = Map::new(10, 10);
        assert_eq!(map.brn(Coords::new(2, 2)), Coords::new(2, 3));
        assert_eq!(map.brn(Coords::new(2, 3)), Coords::new(3, 4));
        assert_eq!(map.tln(Coords::new(3, 4)), Coords::new(2, 3));
    }

    #[test]
    fn test_distance_wraps() {
        let map = Map::new(20, 20);
        assert_eq!(map.calc_distance(Coords::new(0, 4), Coords::new(19, 4)), 1);
        assert_eq!(map.calc_distance(Coords::new(2, 2), Coords::new(6, 2)), 4);
    }

    #[test]
    fn test_region_size() {
        let map = Map::new(32, 32);
        // 1 + 6 + 12
        assert_eq!(map.region(Coords::new(10, 10), 2).len(), 19);
    }

    #[test]
    fn test_findpath_avoids_water() {
        let mut map = Map::new(12, 12);
        for y in 0..12 {
            if y != 9 {
                map.field_mut(Coords::new(5, y)).caps = NodeCaps::SWIMMABLE;
            }
        }
        let path = map
            .findpath(Coords::new(3, 4), Coords::new(7, 4), 0, NodeCaps::WALKABLE)
            .unwrap();
        assert!(path.nsteps() > 4);
        assert!(path
            .coords(&map)
            .iter()
            .all(|&c| map.can_enter(c, NodeCaps::WALKABLE)));
        assert_eq!(path.coords(&map).last(), Some(&Coords::new(7, 4)));
    }

    #[test]
    fn test_findpath_persist_gives_up_on_detours() {
        let mut map = Map::new(30, 30);
        for y in 0..30 {
            if y != 20 {
                map.field_mut(Coords::new(10, y)).caps = NodeCaps::empty();
            }
        }
        let start = Coords::new(8, 4);
        let end = Coords::new(12, 4);
        assert!(map.findpath(start, end, 1, NodeCaps::WALKABLE).is_none());
        assert!(map.findpath(start, end, 0, NodeCaps::WALKABLE).is_some());
    }

    #[test]
    fn test_path_reverse_and_trim() {
        let map = Map::new(16, 16);
        let path = map
            .findpath(Coords::new(2, 2), Coords::new(6, 2), 0, NodeCaps::WALKABLE)
            .unwrap();
        let rev = path.reversed();
        assert_eq!(rev.start, path.end);
        assert_eq!(rev.coords(&map).last(), Some(&path.start));
        let head = path.truncated(&map, 1);
        let tail = path.trimmed_start(&map, 1);
        assert_eq!(head.end, tail.start);
        assert_eq!(head.nsteps() + tail.nsteps(), path.nsteps());
    }
}
