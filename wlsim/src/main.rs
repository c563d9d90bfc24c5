use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::Arc;
use wldata::Descriptions;
use wlsim_core::{Game, SimConfig};

mod scenario;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless settlers economy simulation", long_about = None)]
struct Args {
    /// Game time to simulate, in milliseconds
    #[arg(short, long, default_value_t = 300_000)]
    time: u64,

    /// Seed of the demo scenario
    #[arg(long, default_value_t = 12345)]
    seed: u64,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Engine constants as JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tribe descriptions as JSON (built-in tribe if omitted)
    #[arg(long)]
    tribe: Option<PathBuf>,

    /// Continue a saved game instead of starting the demo scenario
    #[arg(long)]
    load: Option<PathBuf>,

    /// Save the game when the run ends
    #[arg(long)]
    save: Option<PathBuf>,

    /// Run the scenario twice and fail if the checksums differ
    #[arg(long)]
    verify: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = std::str::FromStr::from_str(&args.log_level).unwrap_or(log::LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .init();

    log::info!("Starting wlsim...");

    let descriptions = match &args.tribe {
        Some(path) => Descriptions::load_json(path)
            .with_context(|| format!("failed to load tribe from {}", path.display()))?,
        None => Descriptions::default_tribe()?,
    };
    let descriptions = Arc::new(descriptions);
    let config = match &args.config {
        Some(path) => SimConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => SimConfig::default(),
    };

    let mut game = start(&args, descriptions.clone(), config.clone())?;
    let until = game.time() + args.time;
    game.run_queue(until)?;
    report(&game);

    if args.verify {
        let mut replay = start(&args, descriptions, config)?;
        replay.run_queue(until)?;
        if replay.checksum() != game.checksum() || replay.metrics.checksums != game.metrics.checksums {
            bail!(
                "determinism check failed: {:016x} != {:016x}",
                game.checksum(),
                replay.checksum()
            );
        }
        println!("Determinism check passed ({} checkpoints)", game.metrics.checksums.len());
    }

    if let Some(path) = &args.save {
        let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        game.save(BufWriter::new(file))?;
        println!("Saved game to {}", path.display());
    }

    log::info!("Simulation finished at {} ms", game.time());
    Ok(())
}

fn start(args: &Args, descriptions: Arc<Descriptions>, config: SimConfig) -> Result<Game> {
    match &args.load {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("failed to open savegame {}", path.display()))?;
            let game = Game::load(BufReader::new(file), descriptions)
                .with_context(|| format!("failed to load savegame {}", path.display()))?;
            log::info!("Loaded {} at {} ms", path.display(), game.time());
            Ok(game)
        }
        None => scenario::demo(descriptions, config, args.seed),
    }
}

fn report(game: &Game) {
    let m = &game.metrics;
    println!("Game time: {} ms", game.time());
    println!("Objects: {}", game.objects.len());
    for (number, player) in &game.players {
        println!(
            "Player {} ({}): {} fields owned, {} messages",
            number,
            player.name,
            game.map.fields_owned_by(*number),
            player.messages.len()
        );
    }
    println!(
        "Commands: {} ({} acts, {} stale, {} balances)",
        m.commands, m.acts, m.stale_acts, m.balances
    );
    println!(
        "Transfers: {} finished, {} failed; {} wares delivered",
        m.transfers_finished, m.transfers_failed, m.wares_delivered
    );
    println!(
        "Performance: {:.2} us/command, {:.0}x real time",
        m.command_avg_us(),
        m.speedup(game.time())
    );
    println!("Checksum: {:016x}", game.checksum());
}
