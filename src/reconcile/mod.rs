//! Snapshot reconciler: copies the contract's global state and team list into
//! the local store.
//!
//! Every run is a full replace. Runs are serialized through a single write
//! lock held across the chain reads *and* the database write, so a slow run
//! can never overwrite a newer snapshot with older chain data. Readers are
//! not locked out; they see the previous snapshot until the transaction
//! commits.
//!
//! The chain reads are bounded by `chain_timeout`, so a node that stops
//! answering releases the lock instead of stalling resets and shutdown.
//! The outcome of the last chain contact is kept in memory for `/health`.

use crate::chain::{ChainError, ChainGlobalState, ChainReader, GameStatus, TeamInfo};
use crate::store::{GlobalState, Store, StoreError, TeamSnapshot};

use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    ChainUnavailable(#[from] ChainError),
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

/// What a successful reconciliation wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSummary {
    pub status: GameStatus,
    pub total_prize_pool: U256,
    pub winning_team_id: Option<u32>,
    pub team_count: usize,
    pub synced_at: DateTime<Utc>,
}

const DEFAULT_CHAIN_TIMEOUT: Duration = Duration::from_secs(45);

pub struct Reconciler {
    chain: Arc<dyn ChainReader>,
    store: Store,
    chain_timeout: Duration,
    write_lock: Mutex<()>,
    last_success: RwLock<Option<DateTime<Utc>>>,
    chain_connected: AtomicBool,
}

impl Reconciler {
    pub fn new(chain: Arc<dyn ChainReader>, store: Store) -> Self {
        Self {
            chain,
            store,
            chain_timeout: DEFAULT_CHAIN_TIMEOUT,
            write_lock: Mutex::new(()),
            last_success: RwLock::new(None),
            chain_connected: AtomicBool::new(false),
        }
    }

    /// Bound on the chain reads of one run.
    pub fn with_chain_timeout(mut self, timeout: Duration) -> Self {
        self.chain_timeout = timeout;
        self
    }

    /// Record the outcome of a chain contact made outside `reconcile`.
    pub fn note_chain(&self, connected: bool) {
        self.chain_connected.store(connected, Ordering::Relaxed);
    }

    /// Whether the last chain contact succeeded. No I/O.
    pub fn chain_connected(&self) -> bool {
        self.chain_connected.load(Ordering::Relaxed)
    }

    async fn read_chain(&self) -> Result<(ChainGlobalState, Vec<TeamInfo>), ChainError> {
        self.chain.check_connection().await?;
        let state = self.chain.read_global_state().await?;
        let teams = self.chain.teams().await?;
        Ok((state, teams))
    }

    /// Read the contract and replace the stored snapshot.
    ///
    /// Errors are returned to the caller untouched; retrying is the trigger's job.
    pub async fn reconcile(&self) -> Result<SyncSummary, SyncError> {
        let _guard = self.write_lock.lock().await;

        let read = match tokio::time::timeout(self.chain_timeout, self.read_chain()).await {
            Ok(read) => read,
            Err(_) => Err(ChainError::Unavailable(format!(
                "chain reads timed out after {}s",
                self.chain_timeout.as_secs_f64()
            ))),
        };
        // Bad contract data still means the node answered.
        self.note_chain(!matches!(read, Err(ChainError::Unavailable(_))));
        let (chain_state, teams) = read?;
        let teams: Vec<TeamSnapshot> = teams.into_iter().map(TeamSnapshot::from).collect();

        let state = GlobalState::from(&chain_state);
        if let Err(e) = self.store.replace_snapshot(&state, &teams).await {
            warn!(error = %e, "snapshot write rolled back");
            return Err(e.into());
        }

        let synced_at = Utc::now();
        *self.last_success.write().await = Some(synced_at);

        info!(
            status = %state.status,
            prize_pool = %state.total_prize_pool,
            winner = ?state.winning_team_id,
            teams = teams.len(),
            "snapshot reconciled"
        );

        Ok(SyncSummary {
            status: state.status,
            total_prize_pool: state.total_prize_pool,
            winning_team_id: state.winning_team_id,
            team_count: teams.len(),
            synced_at,
        })
    }

    /// Wipe the store while holding the write lock.
    pub async fn reset_all(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.store.reset().await?;
        *self.last_success.write().await = None;
        debug!("reconciler state cleared");
        Ok(())
    }

    pub async fn last_success(&self) -> Option<DateTime<Utc>> {
        *self.last_success.read().await
    }
}
