use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use wldata::Descriptions;
use wlsim_core::testing::GameBuilder;
use wlsim_core::transport::FlagJobKind;
use wlsim_core::{Coords, Game, PlayerNumber, Serial, SimConfig};

/// Buildings each player starts with, relative to the headquarters.
const LAYOUT: &[(&str, i16, i16)] = &[("sawmill", 6, 0), ("tavern", 0, 6), ("sentinel", 7, 6)];

const HEADQUARTERS: [(PlayerNumber, &str, Coords); 2] = [
    (1, "Player 1", Coords::new(6, 6)),
    (2, "Player 2", Coords::new(30, 24)),
];

/// Two players, each with a headquarters, a small production chain and a
/// military site, everything connected by roads. Player 1 also sends a
/// geologist out.
pub fn demo(descriptions: Arc<Descriptions>, config: SimConfig, seed: u64) -> Result<Game> {
    let mut builder = GameBuilder::new()
        .size(48, 40)
        .seed(seed)
        .config(config)
        .descriptions(descriptions);
    for (number, name, hq) in HEADQUARTERS {
        builder = builder.with_player(number, name).with_headquarters(number, hq);
    }
    let mut game = builder.build();

    for (player, _, hq) in HEADQUARTERS {
        let hq_flag = game
            .headquarters(player)
            .and_then(|hq| game.building_flag(hq))
            .ok_or_else(|| anyhow!("player {} has no headquarters", player))?;
        for &(name, dx, dy) in LAYOUT {
            let building = build_connected(&mut game, player, hq_flag, name, Coords::new(hq.x + dx, hq.y + dy))
                .with_context(|| format!("player {}: placing {}", player, name))?;
            log::info!("Player {}: {} {}", player, name, building);
        }
    }

    let p1_flag = game
        .headquarters(1)
        .and_then(|hq| game.building_flag(hq))
        .ok_or_else(|| anyhow!("player 1 has no headquarters"))?;
    game.flag_action(1, p1_flag, FlagJobKind::Geologist)?;
    Ok(game)
}

fn build_connected(
    game: &mut Game,
    player: PlayerNumber,
    hq_flag: Serial,
    name: &str,
    coords: Coords,
) -> Result<Serial> {
    let descr = game
        .descriptions
        .building_index(name)
        .ok_or_else(|| anyhow!("tribe '{}' has no building '{}'", game.descriptions.tribe, name))?;
    let building = game.build_building(player, coords, descr)?;
    let flag = game
        .building_flag(building)
        .ok_or_else(|| anyhow!("building {} has no flag", building))?;
    game.build_road_between(player, hq_flag, flag)?;
    Ok(building)
}
