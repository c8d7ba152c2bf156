//! Wipe the betsync database: bets, team snapshot, poll cursor, and the game
//! state (reset to Open / 0 / no winner).
//!
//! Usage:
//!   cargo run --bin reset_db -- --yes

use anyhow::{bail, Result};
use tracing::info;

use betsync::config::Config;
use betsync::store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    let confirmed = args.iter().any(|a| a == "--yes");

    let config = Config::discover()?;
    config.logging.install();

    if !confirmed {
        bail!("refusing to reset {} without --yes", config.database.url);
    }

    let store = Store::connect(&config.database.url, 1).await?;
    let bets = store.bet_count().await?;
    store.reset().await?;

    info!(database = %config.database.url, bets_deleted = bets, "database reset");
    println!("Database reset: {} bets deleted, game state restored to defaults.", bets);
    Ok(())
}
