//! Backfill the bet ledger from the block explorer's transaction history for
//! the betting contract. Safe to re-run: bets already stored are skipped.
//!
//! Usage:
//!   cargo run --bin import_bets                 # from chain.start_block (or 0)
//!   cargo run --bin import_bets -- --from 5000  # from a given block

use anyhow::{Context, Result};
use tracing::info;

use betsync::config::Config;
use betsync::explorer::{self, ExplorerClient};
use betsync::ledger::BetLedger;
use betsync::store::Store;

fn start_block_arg(args: &[String]) -> Result<Option<u64>> {
    match args.iter().position(|a| a == "--from") {
        Some(i) => {
            let value = args.get(i + 1).context("--from needs a block number")?;
            Ok(Some(value.parse().with_context(|| format!("bad block number {value:?}"))?))
        }
        None => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    let config = Config::discover()?;
    config.logging.install();

    let contract = config.contract_address()?;
    let start_block = start_block_arg(&args)?
        .or(config.chain.start_block)
        .unwrap_or(0);

    let client = ExplorerClient::new(config.explorer.url.clone(), config.explorer.api_key.clone())?;
    let store = Store::connect(&config.database.url, config.database.max_connections).await?;
    let ledger = BetLedger::new(store);

    info!(
        contract = %contract,
        from = start_block,
        explorer = %config.explorer.url,
        "fetching contract transactions"
    );
    let txs = client.contract_transactions(contract, start_block).await?;
    let report = explorer::import_transactions(&ledger, contract, &txs).await?;

    println!("=== Bet import ===");
    println!("Transactions fetched: {}", report.fetched);
    println!("Bets recorded:        {}", report.recorded);
    println!("Already recorded:     {}", report.duplicates);
    println!("Skipped:              {}", report.skipped);
    Ok(())
}
