//! Players: vision counters and the in-game message inbox.

use crate::geometry::{Coords, Map};
use crate::object::Time;
use serde::{Deserialize, Serialize};

pub type PlayerNumber = u8;

/// An in-game message shown to the player, e.g. "worker got lost".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub time: Time,
    pub title: String,
    pub body: String,
    pub position: Option<Coords>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub number: PlayerNumber,
    pub name: String,
    /// Per-field count of objects currently seeing the field.
    vision: Vec<u16>,
    /// Fields that have been seen at least once.
    explored: Vec<bool>,
    /// Per-field count of military buildings claiming the field.
    influence: Vec<u16>,
    pub messages: Vec<Message>,
}

impl Player {
    pub fn new(number: PlayerNumber, name: impl Into<String>, map: &Map) -> Self {
        let n = map.width() as usize * map.height() as usize;
        Self {
            number,
            name: name.into(),
            vision: vec![0; n],
            explored: vec![false; n],
            influence: vec![0; n],
            messages: Vec::new(),
        }
    }

    fn index(map: &Map, c: Coords) -> usize {
        let c = map.normalize(c);
        c.y as usize * map.width() as usize + c.x as usize
    }

    pub fn see_area(&mut self, map: &Map, center: Coords, radius: u32) {
        for c in map.region(center, radius) {
            let i = Self::index(map, c);
            self.vision[i] = self.vision[i].saturating_add(1);
            self.explored[i] = true;
        }
    }

    pub fn unsee_area(&mut self, map: &Map, center: Coords, radius: u32) {
        for c in map.region(center, radius) {
            let i = Self::index(map, c);
            self.vision[i] = self.vision[i].saturating_sub(1);
        }
    }

    pub fn sees(&self, map: &Map, c: Coords) -> bool {
        self.vision[Self::index(map, c)] > 0
    }

    pub fn has_explored(&self, map: &Map, c: Coords) -> bool {
        self.explored[Self::index(map, c)]
    }

    pub fn explored_count(&self) -> usize {
        self.explored.iter().filter(|&&e| e).count()
    }

    pub fn add_influence(&mut self, map: &Map, center: Coords, radius: u32) {
        for c in map.region(center, radius) {
            let i = Self::index(map, c);
            self.influence[i] = self.influence[i].saturating_add(1);
        }
    }

    pub fn remove_influence(&mut self, map: &Map, center: Coords, radius: u32) {
        for c in map.region(center, radius) {
            let i = Self::index(map, c);
            self.influence[i] = self.influence[i].saturating_sub(1);
        }
    }

    pub fn influence(&self, map: &Map, c: Coords) -> u16 {
        self.influence[Self::index(map, c)]
    }

    pub fn add_message(&mut self, message: Message) {
        log::debug!("Player {}: message '{}'", self.number, message.title);
        self.messages.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vision_counts_overlapping_areas() {
        let map = Map::new(20, 20);
        let mut p = Player::new(1, "Alice", &map);
        let c = Coords::new(5, 5);
        p.see_area(&map, c, 2);
        p.see_area(&map, c, 1);
        p.unsee_area(&map, c, 2);
        assert!(p.sees(&map, c));
        assert!(!p.sees(&map, Coords::new(7, 5)));
        assert!(p.has_explored(&map, Coords::new(7, 5)));
        assert_eq!(p.explored_count(), 19);
    }

    #[test]
    fn test_influence_is_counted() {
        let map = Map::new(20, 20);
        let mut p = Player::new(1, "Alice", &map);
        let c = Coords::new(5, 5);
        p.add_influence(&map, c, 1);
        p.add_influence(&map, c, 0);
        assert_eq!(p.influence(&map, c), 2);
        p.remove_influence(&map, c, 1);
        assert_eq!(p.influence(&map, c), 1);
        assert_eq!(p.influence(&map, Coords::new(6, 5)), 0);
    }
}
