use betsync::api::{self, AppState};
use betsync::chain::{abi, ChainReader, RpcChainReader};
use betsync::config::Config;
use betsync::ledger::BetLedger;
use betsync::reconcile::Reconciler;
use betsync::scheduler;
use betsync::store::Store;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = Config::discover()?;
    config.logging.install();
    config.validate()?;

    info!("betsync v{} starting", env!("CARGO_PKG_VERSION"));

    for (name, ok) in abi::verify_topic_hashes() {
        if !ok {
            warn!(event = %name, "event topic hash mismatch");
        }
    }

    // --- Database ---
    let store = Store::connect(&config.database.url, config.database.max_connections).await?;

    // --- Chain ---
    let contract = config.contract_address()?;
    let request_timeout = Duration::from_secs(config.chain.request_timeout_secs);
    let chain: Arc<dyn ChainReader> =
        Arc::new(RpcChainReader::connect(&config.chain.rpc_url, contract, request_timeout)?);

    // --- Services ---
    let reconciler = Arc::new(
        Reconciler::new(chain.clone(), store.clone())
            .with_chain_timeout(Duration::from_secs(config.sync.reconcile_timeout_secs)),
    );
    match chain.check_connection().await {
        Ok(()) => {
            reconciler.note_chain(true);
            info!(rpc = %config.chain.rpc_url, contract = %contract, "chain reachable");
        }
        Err(e) => {
            reconciler.note_chain(false);
            warn!(error = %e, "chain not reachable yet, background tasks will retry");
        }
    }
    let ledger = BetLedger::new(store.clone());

    let cancel = CancellationToken::new();
    let handles = scheduler::spawn_background(
        &config,
        chain.clone(),
        store.clone(),
        ledger.clone(),
        reconciler.clone(),
        cancel.clone(),
    );

    // --- Shutdown on Ctrl-C ---
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
                return;
            }
            info!("shutdown requested");
            cancel.cancel();
        });
    }

    // --- API ---
    let state = AppState {
        store,
        ledger,
        reconciler,
    };
    let served = api::serve(state, &config.server.bind, cancel.clone()).await;
    if let Err(ref e) = served {
        error!(error = %e, "api server failed");
    }

    // Stop the background loops if the server exited on its own.
    cancel.cancel();
    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            error!(error = %e, "background task panicked");
        }
    }

    info!("betsync stopped");
    served
}
