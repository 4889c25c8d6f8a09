//! Tricolor demo runner.
//!
//! Wires the engine to the in-memory balance store and drives the round
//! loop, printing lifecycle events as JSON lines. Useful for watching the
//! engine live and as an integration smoke test.

use clap::Parser;
use log::{info, warn};
use std::sync::Arc;
use tricolor::{
    config::{generate_sample_config, ConfigLoader},
    BalanceStore, BetSubmission, Color, ColorBet, GameEngine, GameEvent, InMemoryBalanceStore,
    NumberBet,
};

#[derive(Parser, Debug)]
#[command(name = "tricolor", about = "Round lifecycle & settlement engine demo")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<String>,

    /// Write a sample configuration file to the given path and exit
    #[arg(long)]
    generate_config: Option<String>,

    /// Number of rounds to run (0 = forever)
    #[arg(long, default_value_t = 0)]
    rounds: u32,

    /// Place a demo bet each round for a seeded demo player
    #[arg(long, default_value_t = false)]
    demo_bets: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Some(path) = args.generate_config {
        generate_sample_config(&path)?;
        println!("sample configuration written to {}", path);
        return Ok(());
    }

    let mut loader = ConfigLoader::new();
    if let Some(ref path) = args.config {
        loader = loader.with_path(path);
    }
    let config = loader.load()?;
    info!(
        "starting engine: round={}ms reveal={}ms min_stake={}",
        config.round_duration_ms, config.reveal_pause_ms, config.min_stake
    );

    let balances = Arc::new(InMemoryBalanceStore::new());
    balances.set_balance("demo-player", 10_000);

    let engine = GameEngine::new(config, balances.clone());
    let mut events = engine.history.subscribe();

    let scheduler = engine.scheduler.clone();
    tokio::spawn(async move { scheduler.run().await });

    let mut settled_rounds = 0u32;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                warn!("event stream lagged, {} events missed", missed);
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };

        println!("{}", serde_json::to_string(&event)?);

        match event {
            GameEvent::RoundOpened { round } if args.demo_bets => {
                let submission = BetSubmission {
                    user_id: "demo-player".to_string(),
                    round_id: round.id,
                    color_bet: Some(ColorBet {
                        color: Color::Red,
                        amount: 10,
                    }),
                    number_bet: Some(NumberBet {
                        number: (round.id % 10) as u8,
                        amount: 10,
                    }),
                };
                if let Err(e) = engine.ledger.place_wager(&submission).await {
                    warn!("demo bet rejected: {}", e);
                }
            }
            GameEvent::RoundSettled { round_id, .. } => {
                settled_rounds += 1;
                let balance = balances.balance("demo-player").await?;
                info!(
                    "round {} settled, demo player balance: {}",
                    round_id, balance
                );
                if args.rounds > 0 && settled_rounds >= args.rounds {
                    break;
                }
            }
            _ => {}
        }
    }

    Ok(())
}
