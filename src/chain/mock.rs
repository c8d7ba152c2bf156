//! Scriptable in-memory `ChainReader` for tests, plus log builders that
//! ABI-encode the three tracked events by hand.

use crate::chain::abi;
use crate::chain::reader::ChainReader;
use crate::chain::types::{ChainError, GameStatus, RawEvent, TeamInfo};

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MockState {
    pub connected: bool,
    pub status_code: u8,
    pub total_prize_pool: U256,
    pub winning_team_id: u32,
    pub teams: Vec<TeamInfo>,
    pub head: u64,
    pub logs: Vec<RawEvent>,
    /// Delay injected into `teams()` to widen race windows.
    pub teams_delay: Option<Duration>,
    /// Calls made while set never return, like a node that accepts the
    /// connection and then goes silent.
    pub hung: bool,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            connected: true,
            status_code: 0,
            total_prize_pool: U256::ZERO,
            winning_team_id: 0,
            teams: Vec::new(),
            head: 0,
            logs: Vec::new(),
            teams_delay: None,
            hung: false,
        }
    }
}

#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockState>,
    winner_reads: AtomicUsize,
}

impl MockChain {
    pub fn new(state: MockState) -> Self {
        Self {
            state: Mutex::new(state),
            winner_reads: AtomicUsize::new(0),
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut MockState)) {
        let mut state = self.state.lock().unwrap();
        f(&mut state);
    }

    pub fn winner_reads(&self) -> usize {
        self.winner_reads.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> MockState {
        self.state.lock().unwrap().clone()
    }

    async fn ensure_connected(&self) -> Result<MockState, ChainError> {
        let state = self.snapshot();
        if state.hung {
            std::future::pending::<()>().await;
        }
        if state.connected {
            Ok(state)
        } else {
            Err(ChainError::Unavailable("connection refused".to_string()))
        }
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn check_connection(&self) -> Result<(), ChainError> {
        self.ensure_connected().await.map(|_| ())
    }

    async fn status(&self) -> Result<GameStatus, ChainError> {
        let code = self.ensure_connected().await?.status_code;
        GameStatus::from_code(code)
            .ok_or_else(|| ChainError::InvalidData(format!("unknown status code {code}")))
    }

    async fn total_prize_pool(&self) -> Result<U256, ChainError> {
        Ok(self.ensure_connected().await?.total_prize_pool)
    }

    async fn winning_team_id(&self) -> Result<u32, ChainError> {
        self.winner_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.ensure_connected().await?.winning_team_id)
    }

    async fn teams(&self) -> Result<Vec<TeamInfo>, ChainError> {
        let state = self.ensure_connected().await?;
        if let Some(delay) = state.teams_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(state.teams)
    }

    async fn head_block(&self) -> Result<u64, ChainError> {
        Ok(self.ensure_connected().await?.head)
    }

    async fn logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RawEvent>, ChainError> {
        let state = self.ensure_connected().await?;
        Ok(state
            .logs
            .into_iter()
            .filter(|l| l.block_number >= from_block && l.block_number <= to_block)
            .collect())
    }
}

pub fn team(id: u32, name: &str, total_bet: u64, supporters: u64) -> TeamInfo {
    TeamInfo {
        id,
        name: name.to_string(),
        total_bet_amount: U256::from(total_bet),
        supporter_count: supporters,
    }
}

fn word(value: U256) -> [u8; 32] {
    value.to_be_bytes::<32>()
}

fn address_topic(address: Address) -> B256 {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(address.as_slice());
    B256::from(out)
}

fn raw(block: u64, tx: u8, topics: Vec<B256>, data: Vec<u8>) -> RawEvent {
    RawEvent {
        block_number: block,
        block_timestamp: Some(1_700_000_000 + block * 12),
        tx_hash: Some(B256::repeat_byte(tx)),
        log_index: Some(0),
        topics,
        data: Bytes::from(data),
        removed: false,
    }
}

pub fn bet_placed_log(block: u64, tx: u8, user: Address, team_id: u32, amount: U256) -> RawEvent {
    raw(
        block,
        tx,
        vec![
            abi::BET_PLACED_TOPIC,
            address_topic(user),
            B256::from(word(U256::from(team_id))),
        ],
        word(amount).to_vec(),
    )
}

pub fn status_changed_log(block: u64, tx: u8, code: u8) -> RawEvent {
    raw(
        block,
        tx,
        vec![abi::STATUS_CHANGED_TOPIC],
        word(U256::from(code)).to_vec(),
    )
}

pub fn winner_selected_log(block: u64, tx: u8, team_id: u32, name: &str) -> RawEvent {
    let mut data = Vec::new();
    data.extend_from_slice(&word(U256::from(32u64)));
    data.extend_from_slice(&word(U256::from(name.len())));
    let mut padded = name.as_bytes().to_vec();
    padded.resize(name.len().div_ceil(32) * 32, 0);
    data.extend_from_slice(&padded);
    raw(
        block,
        tx,
        vec![
            abi::WINNER_SELECTED_TOPIC,
            B256::from(word(U256::from(team_id))),
        ],
        data,
    )
}
