//! Read-only access to the betting contract.
//!
//! `ChainReader` is the seam the rest of the crate talks to; `RpcChainReader`
//! is the alloy-backed implementation used in production.

use crate::chain::abi::{self, IWorldCupBetting};
use crate::chain::types::{
    ChainError, ChainGlobalState, Cursor, EventBatch, GameStatus, RawEvent, TeamInfo,
};

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::IntoFuture;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Cheap round-trip proving the RPC endpoint answers.
    async fn check_connection(&self) -> Result<(), ChainError>;

    async fn status(&self) -> Result<GameStatus, ChainError>;

    async fn total_prize_pool(&self) -> Result<U256, ChainError>;

    async fn winning_team_id(&self) -> Result<u32, ChainError>;

    /// Full team list in contract order. No upper bound on its length.
    async fn teams(&self) -> Result<Vec<TeamInfo>, ChainError>;

    async fn head_block(&self) -> Result<u64, ChainError>;

    /// Contract logs for the three tracked events in `from..=to`.
    async fn logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RawEvent>, ChainError>;

    /// Status, pool and winner. The winner is only read once the game is
    /// `Finished`; before that the contract value is meaningless.
    async fn read_global_state(&self) -> Result<ChainGlobalState, ChainError> {
        let status = self.status().await?;
        let total_prize_pool = self.total_prize_pool().await?;
        let winning_team_id = if status == GameStatus::Finished {
            Some(self.winning_team_id().await?)
        } else {
            None
        };
        Ok(ChainGlobalState {
            status,
            total_prize_pool,
            winning_team_id,
        })
    }

    /// Events after `since`, capped at `max_range` blocks. The returned cursor
    /// points at the last block covered, even when no events were found.
    async fn poll_events(&self, since: Cursor, max_range: u64) -> Result<EventBatch, ChainError> {
        let head = self.head_block().await?;
        if head <= since.last_block {
            return Ok(EventBatch {
                events: Vec::new(),
                cursor: since,
            });
        }
        let from = since.last_block + 1;
        let to = head.min(since.last_block.saturating_add(max_range.max(1)));
        let events = self.logs(from, to).await?;
        Ok(EventBatch {
            events,
            cursor: Cursor { last_block: to },
        })
    }
}

/// JSON-RPC backed reader.
pub struct RpcChainReader {
    provider: DynProvider,
    contract: Address,
    /// Upper bound on any single RPC round-trip.
    request_timeout: Duration,
}

impl RpcChainReader {
    /// Build an HTTP provider. No request is made until the first call.
    pub fn connect(
        rpc_url: &str,
        contract: Address,
        request_timeout: Duration,
    ) -> Result<Self, ChainError> {
        let url = rpc_url
            .parse::<alloy::transports::http::reqwest::Url>()
            .map_err(|e| ChainError::Unavailable(format!("bad RPC url {rpc_url:?}: {e}")))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();
        Ok(Self {
            provider,
            contract,
            request_timeout,
        })
    }

    /// Run one RPC call under `request_timeout`.
    async fn timed<T, E, F>(&self, what: &str, call: F) -> Result<T, ChainError>
    where
        E: std::fmt::Display,
        F: IntoFuture<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result.map_err(unavailable),
            Err(_) => Err(ChainError::Unavailable(format!(
                "{what} timed out after {}s",
                self.request_timeout.as_secs_f64()
            ))),
        }
    }

    fn instance(&self) -> IWorldCupBetting::IWorldCupBettingInstance<DynProvider> {
        IWorldCupBetting::new(self.contract, self.provider.clone())
    }

    /// Block timestamps for logs the node returned without one.
    ///
    /// The timestamp is half of a bet's dedup key, so a block that cannot be
    /// fetched fails the whole call rather than yielding a log without one.
    async fn fill_timestamps(&self, events: &mut [RawEvent]) -> Result<(), ChainError> {
        let mut cache: HashMap<u64, u64> = HashMap::new();
        for event in events.iter_mut().filter(|e| e.block_timestamp.is_none()) {
            let number = event.block_number;
            let ts = match cache.get(&number) {
                Some(ts) => *ts,
                None => {
                    let block = self
                        .timed(
                            "eth_getBlockByNumber",
                            self.provider
                                .get_block_by_number(BlockNumberOrTag::Number(number)),
                        )
                        .await?
                        .ok_or_else(|| {
                            ChainError::Unavailable(format!("block {number} not found"))
                        })?;
                    cache.insert(number, block.header.timestamp);
                    block.header.timestamp
                }
            };
            event.block_timestamp = Some(ts);
        }
        Ok(())
    }
}

fn unavailable(e: impl std::fmt::Display) -> ChainError {
    ChainError::Unavailable(e.to_string())
}

fn to_u32(value: U256, what: &str) -> Result<u32, ChainError> {
    value
        .try_into()
        .map_err(|_| ChainError::InvalidData(format!("{what} {value} does not fit in u32")))
}

impl TryFrom<&Log> for RawEvent {
    type Error = ChainError;

    /// Pending logs (no block number or tx hash yet) are rejected.
    fn try_from(log: &Log) -> Result<Self, ChainError> {
        let block_number = log
            .block_number
            .ok_or_else(|| ChainError::Unavailable("log without block number".to_string()))?;
        let tx_hash = log.transaction_hash.ok_or_else(|| {
            ChainError::Unavailable(format!("log in block {block_number} without tx hash"))
        })?;
        Ok(RawEvent {
            block_number,
            block_timestamp: log.block_timestamp,
            tx_hash: Some(tx_hash),
            log_index: log.log_index,
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
            removed: log.removed,
        })
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn check_connection(&self) -> Result<(), ChainError> {
        self.timed("eth_chainId", self.provider.get_chain_id()).await?;
        Ok(())
    }

    async fn status(&self) -> Result<GameStatus, ChainError> {
        let instance = self.instance();
        let code = self.timed("status()", instance.status().call()).await?;
        GameStatus::from_code(code)
            .ok_or_else(|| ChainError::InvalidData(format!("unknown status code {code}")))
    }

    async fn total_prize_pool(&self) -> Result<U256, ChainError> {
        let instance = self.instance();
        self.timed("totalPrizePool()", instance.totalPrizePool().call())
            .await
    }

    async fn winning_team_id(&self) -> Result<u32, ChainError> {
        let instance = self.instance();
        let id = self
            .timed("winningTeamId()", instance.winningTeamId().call())
            .await?;
        to_u32(id, "winning team id")
    }

    async fn teams(&self) -> Result<Vec<TeamInfo>, ChainError> {
        let instance = self.instance();
        let teams = self.timed("getTeams()", instance.getTeams().call()).await?;

        teams
            .into_iter()
            .map(|t| {
                Ok(TeamInfo {
                    id: to_u32(t.id, "team id")?,
                    name: t.name,
                    total_bet_amount: t.totalBetAmount,
                    supporter_count: t.supporterCount.try_into().map_err(|_| {
                        ChainError::InvalidData(format!(
                            "supporter count {} does not fit in u64",
                            t.supporterCount
                        ))
                    })?,
                })
            })
            .collect()
    }

    async fn head_block(&self) -> Result<u64, ChainError> {
        self.timed("eth_blockNumber", self.provider.get_block_number())
            .await
    }

    async fn logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RawEvent>, ChainError> {
        let filter = Filter::new()
            .address(self.contract)
            .event_signature(abi::event_topics())
            .from_block(from_block)
            .to_block(to_block);

        let logs = self.timed("eth_getLogs", self.provider.get_logs(&filter)).await?;
        let mut events = logs
            .iter()
            .map(RawEvent::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        self.fill_timestamps(&mut events).await?;
        debug!(from = from_block, to = to_block, count = events.len(), "fetched contract logs");
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, B256};

    #[test]
    fn test_pending_logs_are_rejected() {
        let pending = Log::default();
        assert!(matches!(
            RawEvent::try_from(&pending),
            Err(ChainError::Unavailable(_))
        ));

        let no_hash = Log {
            block_number: Some(5),
            ..Default::default()
        };
        assert!(RawEvent::try_from(&no_hash).is_err());

        let mined = Log {
            block_number: Some(5),
            block_timestamp: Some(60),
            transaction_hash: Some(B256::repeat_byte(1)),
            ..Default::default()
        };
        let raw = RawEvent::try_from(&mined).unwrap();
        assert_eq!(raw.block_number, 5);
        assert_eq!(raw.block_timestamp, Some(60));
        assert_eq!(raw.tx_hash, Some(B256::repeat_byte(1)));
    }

    #[tokio::test]
    async fn test_silent_endpoint_times_out() {
        // Accepts connections but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let contract = address!("5fbdb2315678afecb367f032d93f642f64180aa3");
        let reader = RpcChainReader::connect(&url, contract, Duration::from_millis(200)).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), reader.check_connection())
            .await
            .expect("request was not bounded");
        match result {
            Err(ChainError::Unavailable(msg)) => assert!(msg.contains("timed out"), "{msg}"),
            other => panic!("expected a timeout, got {other:?}"),
        }
        drop(listener);
    }
}
