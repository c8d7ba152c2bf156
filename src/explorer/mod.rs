//! Etherscan-compatible block-explorer client.
//!
//! Backfills the bet ledger from the contract's transaction history
//! (`module=account&action=txlist`). Only successful `placeBet(uint256)`
//! calls become bets; each carries full provenance (hash, timeStamp, block,
//! gas figures), so re-running an import never duplicates a row.
//!
//! `txlist` caps a response at [`TXLIST_PAGE_SIZE`] rows. A full page is
//! followed by another request starting at the last block it contained, and
//! rows seen twice at the page boundary are dropped by hash.

use crate::chain::abi::PLACE_BET_SELECTOR;
use crate::ledger::{BetLedger, BetSubmission, LedgerError, Provenance};
use crate::store::InsertOutcome;

use alloy::primitives::{hex, Address, U256};
use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ExplorerError {
    #[error("explorer request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("explorer API error: {0}")]
    Api(String),
}

/// One row of `txlist`. The API sends every field as a string.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExplorerTx {
    pub block_number: String,
    pub time_stamp: String,
    pub hash: String,
    pub from: String,
    pub to: String,
    pub value: String,
    pub gas: String,
    pub gas_price: String,
    pub gas_used: String,
    pub is_error: String,
    pub input: String,
}

#[derive(Debug, Deserialize)]
struct TxListResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: Value,
}

impl TxListResponse {
    fn into_transactions(self) -> Result<Vec<ExplorerTx>, ExplorerError> {
        if self.status == "1" {
            return serde_json::from_value(self.result)
                .map_err(|e| ExplorerError::Api(format!("unexpected txlist shape: {e}")));
        }
        // status "0" with an empty result just means no history yet.
        match &self.result {
            Value::Array(rows) if rows.is_empty() => Ok(Vec::new()),
            Value::String(detail) => Err(ExplorerError::Api(format!("{}: {detail}", self.message))),
            _ => Err(ExplorerError::Api(self.message)),
        }
    }
}

/// Most rows a single `txlist` request returns.
pub const TXLIST_PAGE_SIZE: usize = 10_000;

/// Anything that serves `txlist` pages.
#[async_trait]
pub trait TxSource: Send + Sync {
    /// Up to `page_size` transactions to `contract` from `start_block` on,
    /// oldest first.
    async fn tx_page(
        &self,
        contract: Address,
        start_block: u64,
        page_size: usize,
    ) -> Result<Vec<ExplorerTx>, ExplorerError>;
}

/// Every transaction to `contract` from `start_block` on, across as many
/// pages as it takes.
pub async fn fetch_all_transactions<S: TxSource + ?Sized>(
    source: &S,
    contract: Address,
    start_block: u64,
    page_size: usize,
) -> Result<Vec<ExplorerTx>, ExplorerError> {
    let mut txs = Vec::new();
    let mut seen = HashSet::new();
    let mut start = start_block;

    loop {
        let page = source.tx_page(contract, start, page_size).await?;
        let full = page.len() >= page_size;
        let last_block = page.last().and_then(|tx| tx.block_number.parse::<u64>().ok());
        let fetched = page.len();

        for tx in page {
            if seen.insert(tx.hash.to_ascii_lowercase()) {
                txs.push(tx);
            }
        }
        debug!(from = start, fetched, total = txs.len(), "txlist page");

        if !full {
            return Ok(txs);
        }
        // The last block may have been cut mid-way, so the next page starts on it.
        match last_block {
            Some(next) if next > start => start = next,
            _ => {
                warn!(block = start, page_size, "txlist page did not advance");
                return Err(ExplorerError::Api(format!(
                    "more than {page_size} transactions from block {start} on could not be paged"
                )));
            }
        }
    }
}

pub struct ExplorerClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl ExplorerClient {
    pub fn new(base_url: String, api_key: String) -> Result<Self, ExplorerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url,
            api_key,
            client,
        })
    }

    /// All transactions sent to `contract` from `start_block` on, oldest first.
    pub async fn contract_transactions(
        &self,
        contract: Address,
        start_block: u64,
    ) -> Result<Vec<ExplorerTx>, ExplorerError> {
        let txs = fetch_all_transactions(self, contract, start_block, TXLIST_PAGE_SIZE).await?;
        debug!(contract = %contract, from = start_block, count = txs.len(), "fetched txlist");
        Ok(txs)
    }
}

#[async_trait]
impl TxSource for ExplorerClient {
    async fn tx_page(
        &self,
        contract: Address,
        start_block: u64,
        page_size: usize,
    ) -> Result<Vec<ExplorerTx>, ExplorerError> {
        let address = format!("{contract:#x}");
        let start = start_block.to_string();
        let offset = page_size.to_string();

        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("module", "account"),
                ("action", "txlist"),
                ("address", address.as_str()),
                ("startblock", start.as_str()),
                ("endblock", "99999999"),
                ("page", "1"),
                ("offset", offset.as_str()),
                ("sort", "asc"),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ExplorerError::Api(format!("HTTP {status}: {body}")));
        }

        resp.json::<TxListResponse>().await?.into_transactions()
    }
}

/// Team id from `placeBet(uint256)` calldata, `None` for any other call.
pub fn decode_place_bet(input: &str) -> Option<u32> {
    let bytes = hex::decode(input.trim()).ok()?;
    if bytes.len() < 36 || bytes[..4] != PLACE_BET_SELECTOR {
        return None;
    }
    let word: [u8; 32] = bytes[4..36].try_into().ok()?;
    U256::from_be_bytes(word).try_into().ok()
}

/// Ledger submission for a successful `placeBet` sent to `contract`.
pub fn bet_from_transaction(tx: &ExplorerTx, contract: Address) -> Option<BetSubmission> {
    if tx.is_error == "1" {
        return None;
    }
    let to: Address = tx.to.parse().ok()?;
    if to != contract {
        return None;
    }
    let team_id = decode_place_bet(&tx.input)?;

    let timestamp = tx
        .time_stamp
        .parse::<i64>()
        .ok()
        .and_then(|ts| DateTime::from_timestamp(ts, 0));

    Some(BetSubmission {
        user_address: Some(tx.from.clone()),
        team_id: Some(team_id),
        amount_wei: Some(tx.value.clone()),
        timestamp,
        provenance: Some(Provenance {
            tx_hash: tx.hash.to_ascii_lowercase(),
            time_stamp: tx.time_stamp.clone(),
            block_number: tx.block_number.parse().ok(),
            gas: tx.gas.parse().ok(),
            gas_price: Some(tx.gas_price.clone()).filter(|p| !p.is_empty()),
            gas_used: tx.gas_used.parse().ok(),
        }),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub fetched: usize,
    pub recorded: usize,
    pub duplicates: usize,
    pub skipped: usize,
}

/// Record every bet in `txs`. Invalid rows are skipped; storage errors abort.
pub async fn import_transactions(
    ledger: &BetLedger,
    contract: Address,
    txs: &[ExplorerTx],
) -> Result<ImportReport, LedgerError> {
    let mut report = ImportReport {
        fetched: txs.len(),
        ..Default::default()
    };

    for tx in txs {
        let Some(submission) = bet_from_transaction(tx, contract) else {
            report.skipped += 1;
            continue;
        };
        match ledger.record_bet(submission).await {
            Ok(InsertOutcome::Inserted(_)) => report.recorded += 1,
            Ok(InsertOutcome::Duplicate(_)) => report.duplicates += 1,
            Err(LedgerError::Validation(reason)) => {
                warn!(tx = %tx.hash, %reason, "skipping transaction");
                report.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        fetched = report.fetched,
        recorded = report.recorded,
        duplicates = report.duplicates,
        skipped = report.skipped,
        "explorer import finished"
    );
    Ok(report)
}
