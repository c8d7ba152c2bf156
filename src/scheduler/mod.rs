//! Background triggers for the reconciler and the event poller.
//!
//! Each loop is a [`Task`] driven by [`run_task`]: run once immediately, then
//! wait `on_success` or `on_failure` depending on the outcome, until the
//! cancellation token fires. Errors are logged and never end the loop.
//! Cancellation also interrupts a run in progress. That is safe because every
//! write is a single transaction that rolls back when dropped, and the poll
//! cursor is saved only after its range has been recorded.

use crate::chain::{ChainError, ChainReader, Cursor};
use crate::config::Config;
use crate::events::{self, ChainEvent};
use crate::ledger::{BetLedger, LedgerError};
use crate::reconcile::{Reconciler, SyncError};
use crate::store::{InsertOutcome, Store, StoreError};

use async_trait::async_trait;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Name of the event poller's row in `sync_cursor`.
pub const EVENT_CURSOR: &str = "events";

/// How long to wait between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopPolicy {
    pub on_success: Duration,
    pub on_failure: Duration,
}

impl LoopPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            on_success: interval,
            on_failure: interval,
        }
    }

    /// Periodic reconciliation, independent of poll health.
    pub fn reconcile(config: &Config) -> Self {
        Self::fixed(Duration::from_secs(config.sync.reconcile_interval_secs))
    }

    /// Short interval while polls succeed, longer after a failure.
    pub fn poll(config: &Config) -> Self {
        Self {
            on_success: Duration::from_secs(config.sync.poll_interval_secs),
            on_failure: Duration::from_secs(config.sync.poll_backoff_secs),
        }
    }
}

#[async_trait]
pub trait Task: Send {
    type Error: Display + Send;

    fn name(&self) -> &'static str;

    async fn run_once(&mut self) -> Result<(), Self::Error>;
}

/// Drive `task` until `cancel` fires.
pub async fn run_task<T: Task>(mut task: T, policy: LoopPolicy, cancel: CancellationToken) {
    let name = task.name();
    info!(
        task = name,
        success_secs = policy.on_success.as_secs_f64(),
        failure_secs = policy.on_failure.as_secs_f64(),
        "background task started"
    );

    let mut consecutive_failures: u32 = 0;
    while !cancel.is_cancelled() {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                info!(task = name, "run interrupted by shutdown");
                break;
            }
            outcome = task.run_once() => outcome,
        };
        let wait = match outcome {
            Ok(()) => {
                if consecutive_failures > 0 {
                    info!(task = name, after = consecutive_failures, "task recovered");
                }
                consecutive_failures = 0;
                policy.on_success
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!(
                    task = name,
                    error = %e,
                    consecutive_failures,
                    backoff_secs = policy.on_failure.as_secs_f64(),
                    "task run failed"
                );
                policy.on_failure
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }

    info!(task = name, "background task stopped");
}

pub fn spawn_task<T>(task: T, policy: LoopPolicy, cancel: CancellationToken) -> JoinHandle<()>
where
    T: Task + 'static,
{
    tokio::spawn(run_task(task, policy, cancel))
}

// ---------------------------------------------------------------------------
// Periodic reconciliation
// ---------------------------------------------------------------------------

pub struct ReconcileTask {
    reconciler: Arc<Reconciler>,
}

impl ReconcileTask {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl Task for ReconcileTask {
    type Error = SyncError;

    fn name(&self) -> &'static str {
        "reconcile"
    }

    async fn run_once(&mut self) -> Result<(), SyncError> {
        self.reconciler.reconcile().await.map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Event polling
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum PollError {
    #[error("chain: {0}")]
    Chain(#[from] ChainError),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("reconcile after events: {0}")]
    Sync(#[from] SyncError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub max_block_range: u64,
    /// First block to scan when there is no usable cursor. `None` = chain head.
    pub start_block: Option<u64>,
    pub resume_from_cursor: bool,
}

impl PollSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_block_range: config.chain.max_block_range,
            start_block: config.chain.start_block,
            resume_from_cursor: config.sync.resume_from_cursor,
        }
    }
}

/// Outcome of one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub from_block: u64,
    pub to_block: u64,
    pub events: usize,
    pub bets_recorded: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

pub struct EventPoller {
    chain: Arc<dyn ChainReader>,
    ledger: BetLedger,
    reconciler: Arc<Reconciler>,
    store: Store,
    settings: PollSettings,
    cursor: Option<Cursor>,
}

impl EventPoller {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        ledger: BetLedger,
        reconciler: Arc<Reconciler>,
        store: Store,
        settings: PollSettings,
    ) -> Self {
        Self {
            chain,
            ledger,
            reconciler,
            store,
            settings,
            cursor: None,
        }
    }

    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }

    /// Where to start on the first poll: stored cursor, then configured start
    /// block, then the current head. The choice is persisted right away so a
    /// restart before the first event does not skip blocks.
    async fn initial_cursor(&self) -> Result<Cursor, PollError> {
        if self.settings.resume_from_cursor {
            if let Some(last_block) = self.store.load_cursor(EVENT_CURSOR).await? {
                info!(block = last_block, "resuming event poll from stored cursor");
                return Ok(Cursor { last_block });
            }
        }

        let cursor = match self.settings.start_block {
            Some(start) => {
                info!(block = start, "starting event poll from configured block");
                Cursor {
                    last_block: start.saturating_sub(1),
                }
            }
            None => {
                let head = self.chain.head_block().await?;
                info!(block = head, "starting event poll from chain head");
                Cursor { last_block: head }
            }
        };
        self.store.save_cursor(EVENT_CURSOR, cursor.last_block).await?;
        Ok(cursor)
    }

    /// Fetch the next block range, record its bets, persist the cursor and
    /// reconcile if anything happened.
    pub async fn poll_once(&mut self) -> Result<PollReport, PollError> {
        let since = match self.cursor {
            Some(cursor) => cursor,
            None => {
                let cursor = self.initial_cursor().await?;
                self.cursor = Some(cursor);
                cursor
            }
        };

        let batch = match self
            .chain
            .poll_events(since, self.settings.max_block_range)
            .await
        {
            Ok(batch) => {
                self.reconciler.note_chain(true);
                batch
            }
            Err(e) => {
                self.reconciler
                    .note_chain(!matches!(e, ChainError::Unavailable(_)));
                return Err(e.into());
            }
        };
        let mut report = PollReport {
            from_block: since.last_block + 1,
            to_block: batch.cursor.last_block,
            ..Default::default()
        };
        if batch.cursor == since {
            return Ok(report);
        }

        let normalized = events::normalize_batch(&batch.events);
        report.events = normalized.len();

        for event in &normalized {
            match &event.event {
                ChainEvent::BetPlaced { .. } => {
                    // Without a tx hash and block time the bet could not be
                    // deduplicated on replay. Fail the range and retry it.
                    if event.tx_hash.is_none() || event.block_timestamp.is_none() {
                        return Err(ChainError::InvalidData(format!(
                            "bet event in block {} has no tx hash or block time",
                            event.block_number
                        ))
                        .into());
                    }
                    let Some(submission) = event.to_bet_submission() else {
                        continue;
                    };
                    match self.ledger.record_bet(submission).await {
                        Ok(InsertOutcome::Inserted(_)) => report.bets_recorded += 1,
                        Ok(InsertOutcome::Duplicate(_)) => report.duplicates += 1,
                        // A bad event will not get better on retry; skip it.
                        Err(LedgerError::Validation(reason)) => {
                            report.rejected += 1;
                            warn!(
                                block = event.block_number,
                                %reason,
                                "skipping invalid bet event"
                            );
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                ChainEvent::StatusChanged { .. } | ChainEvent::WinnerSelected { .. } => {
                    info!(block = event.block_number, event = %event.event, "contract event");
                }
            }
        }

        self.store
            .save_cursor(EVENT_CURSOR, batch.cursor.last_block)
            .await?;
        self.cursor = Some(batch.cursor);

        if !normalized.is_empty() {
            self.reconciler.reconcile().await?;
        }

        debug!(
            from = report.from_block,
            to = report.to_block,
            events = report.events,
            recorded = report.bets_recorded,
            duplicates = report.duplicates,
            "poll complete"
        );
        Ok(report)
    }
}

#[async_trait]
impl Task for EventPoller {
    type Error = PollError;

    fn name(&self) -> &'static str {
        "event-poll"
    }

    async fn run_once(&mut self) -> Result<(), PollError> {
        self.poll_once().await.map(|_| ())
    }
}

/// Spawn the periodic reconciler and the event poller.
pub fn spawn_background(
    config: &Config,
    chain: Arc<dyn ChainReader>,
    store: Store,
    ledger: BetLedger,
    reconciler: Arc<Reconciler>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let poller = EventPoller::new(
        chain,
        ledger,
        reconciler.clone(),
        store,
        PollSettings::from_config(config),
    );

    vec![
        spawn_task(
            ReconcileTask::new(reconciler),
            LoopPolicy::reconcile(config),
            cancel.clone(),
        ),
        spawn_task(poller, LoopPolicy::poll(config), cancel),
    ]
}
