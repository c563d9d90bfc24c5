//! # wlsim Simulation Core
//!
//! Deterministic settlers-style economy simulation: flags and roads form a
//! transport network, carriers move wares between flags, buildings request
//! and produce wares, soldiers fight over territory.
//!
//! Everything that happens is a command in one time-ordered queue. Given the
//! same seed and the same player commands, two games produce bit-identical
//! state, which is what lockstep multiplayer and replays rely on.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ PlayerCommand│────▶│   CmdQueue   │────▶│  run_queue   │
//! │  (UI, CLI)   │     │ (due, seq)   │     │  (dispatch)  │
//! └──────────────┘     └──────▲───────┘     └──────┬───────┘
//!                             │ schedule           │ act / balance
//!                      ┌──────┴───────┐     ┌──────▼───────┐
//!                      │  Bob tasks   │◀────│ ObjectManager│
//!                      │  Buildings   │     │  Logistics   │
//!                      └──────────────┘     └──────┬───────┘
//!                                                  │ publish
//!                                           ┌──────▼───────┐
//!                                           │ Notification │
//!                                           └──────────────┘
//! ```
//!
//! ## Key Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Game`] | Complete simulation state and the queue driving it |
//! | [`CmdQueue`] | Deterministic command queue ordered by (due time, insertion) |
//! | [`Bob`] | Mobile unit driven by a stack of task [`State`]s |
//! | [`Flag`], [`Road`] | Nodes and edges of the transport network |
//! | [`Logistics`] | Economies, requests, supplies and transfers |
//! | [`Building`] | Warehouses, production and military sites |
//! | [`NotificationBus`] | Typed publish/subscribe for game events |
//!
//! ## Persistence
//!
//! [`Game::save`] and [`Game::load`] write and read a versioned JSON
//! savegame. Serials are renumbered on load through an
//! [`ObjectIndex`](persistence::ObjectIndex).

pub mod battle;
pub mod bob;
pub mod building;
pub mod cmd_queue;
pub mod commands;
pub mod config;
pub mod error;
pub mod game;
pub mod geometry;
pub mod metrics;
pub mod notification;
pub mod object;
pub mod persistence;
pub mod player;
pub mod tasks;
pub mod testing;
pub mod transport;

pub use battle::Battle;
pub use bob::{Bob, Role, State};
pub use building::{Building, BuildingState};
pub use cmd_queue::{CmdQueue, Command, PlayerCommand};
pub use commands::CommandError;
pub use config::SimConfig;
pub use error::{EngineError, GameDataError};
pub use game::{DrawInfo, Game};
pub use geometry::{Coords, Direction, Map};
pub use metrics::SimMetrics;
pub use notification::{Note, NotificationBus};
pub use object::{OPtr, ObjectManager, Serial, Time};
pub use persistence::SAVEGAME_VERSION;
pub use player::{Player, PlayerNumber};
pub use tasks::TaskKind;
pub use transport::{Economy, Flag, Logistics, Road, RoadKind, WareInstance};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::GameBuilder;

    fn scenario(seed: u64) -> Game {
        let config = SimConfig {
            checksum_frequency: 5000,
            ..SimConfig::default()
        };
        let mut game = GameBuilder::new()
            .seed(seed)
            .config(config)
            .with_player(1, "Alice")
            .with_headquarters(1, Coords::new(6, 6))
            .build();
        let sawmill = game.descriptions.building_index("sawmill").unwrap();
        let sawmill = game.build_building(1, Coords::new(14, 6), sawmill).unwrap();
        let hq_flag = game.building_flag(game.headquarters(1).unwrap()).unwrap();
        let sawmill_flag = game.building_flag(sawmill).unwrap();
        game.build_road_between(1, hq_flag, sawmill_flag).unwrap();
        game
    }

    #[test]
    fn test_same_seed_same_history() {
        let mut a = scenario(42);
        let mut b = scenario(42);
        a.run_queue(90_000).unwrap();
        // Chunking the run differently must not matter.
        for t in (7_000..=90_000).step_by(7_000) {
            b.run_queue(t).unwrap();
        }
        b.run_queue(90_000).unwrap();
        assert_eq!(a.metrics.checksums, b.metrics.checksums);
        assert_eq!(a.checksum(), b.checksum());
        assert_eq!(a.metrics.checksums.len(), 18);
    }
}
