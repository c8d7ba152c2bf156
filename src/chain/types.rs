//! Chain-side types shared by the reader, the normalizer and the reconciler.

use alloy::primitives::{Bytes, B256, U256};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    /// RPC endpoint unreachable, or a contract call reverted.
    #[error("chain unavailable: {0}")]
    Unavailable(String),
    /// The contract answered with something we cannot represent.
    #[error("invalid chain data: {0}")]
    InvalidData(String),
}

/// Contract lifecycle status, as encoded by the contract's `uint8 status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameStatus {
    Open,
    Stopped,
    Finished,
    Refunding,
}

impl GameStatus {
    pub const ALL: [GameStatus; 4] = [
        GameStatus::Open,
        GameStatus::Stopped,
        GameStatus::Finished,
        GameStatus::Refunding,
    ];

    /// Map the on-chain code. Codes outside 0..=3 yield `None`.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    pub fn code(self) -> u8 {
        match self {
            GameStatus::Open => 0,
            GameStatus::Stopped => 1,
            GameStatus::Finished => 2,
            GameStatus::Refunding => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GameStatus::Open => "Open",
            GameStatus::Stopped => "Stopped",
            GameStatus::Finished => "Finished",
            GameStatus::Refunding => "Refunding",
        }
    }
}

impl std::fmt::Display for GameStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Global contract state read in one reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainGlobalState {
    pub status: GameStatus,
    pub total_prize_pool: U256,
    /// Only populated when `status` is `Finished`.
    pub winning_team_id: Option<u32>,
}

/// One entry of `getTeams()`.
#[derive(Debug, Clone, PartialEq)]
pub struct TeamInfo {
    pub id: u32,
    pub name: String,
    pub total_bet_amount: U256,
    pub supporter_count: u64,
}

/// A contract log as delivered by the RPC node, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub block_number: u64,
    pub block_timestamp: Option<u64>,
    pub tx_hash: Option<B256>,
    pub log_index: Option<u64>,
    pub topics: Vec<B256>,
    pub data: Bytes,
    /// Set by the node when the log was dropped by a reorg.
    pub removed: bool,
}

/// Position of the event poller: every block up to and including
/// `last_block` has been processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub last_block: u64,
}

/// Result of one `poll_events` call.
#[derive(Debug, Clone)]
pub struct EventBatch {
    pub events: Vec<RawEvent>,
    /// Cursor to persist once every event in the batch has been handled.
    pub cursor: Cursor,
}
