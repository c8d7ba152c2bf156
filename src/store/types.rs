//! Row types for SQLite persistence.

use crate::chain::{ChainGlobalState, GameStatus, TeamInfo};

use alloy::primitives::U256;
use chrono::{DateTime, Utc};

/// The singleton game state row.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalState {
    pub status: GameStatus,
    pub total_prize_pool: U256,
    /// `None` unless the game is `Finished`.
    pub winning_team_id: Option<u32>,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            status: GameStatus::Open,
            total_prize_pool: U256::ZERO,
            winning_team_id: None,
        }
    }
}

impl From<&ChainGlobalState> for GlobalState {
    fn from(chain: &ChainGlobalState) -> Self {
        Self {
            status: chain.status,
            total_prize_pool: chain.total_prize_pool,
            winning_team_id: chain.winning_team_id,
        }
    }
}

/// One cached team row.
#[derive(Debug, Clone, PartialEq)]
pub struct TeamSnapshot {
    pub id: u32,
    pub name: String,
    pub total_bet_amount: U256,
    pub supporter_count: u64,
}

impl From<TeamInfo> for TeamSnapshot {
    fn from(team: TeamInfo) -> Self {
        Self {
            id: team.id,
            name: team.name,
            total_bet_amount: team.total_bet_amount,
            supporter_count: team.supporter_count,
        }
    }
}

/// Where a bet was observed on chain. `(tx_hash, time_stamp)` is unique
/// across the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct Provenance {
    pub tx_hash: String,
    /// Block timestamp as the source reported it (unix seconds, decimal).
    pub time_stamp: String,
    pub block_number: Option<u64>,
    pub gas: Option<u64>,
    /// Wei per gas unit, decimal.
    pub gas_price: Option<String>,
    pub gas_used: Option<u64>,
}

/// A validated bet ready to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBet {
    pub user_address: String,
    pub team_id: u32,
    pub amount_wei: U256,
    pub timestamp: DateTime<Utc>,
    pub provenance: Option<Provenance>,
}

/// A stored bet.
#[derive(Debug, Clone, PartialEq)]
pub struct BetRecord {
    pub id: i64,
    pub user_address: String,
    pub team_id: u32,
    pub amount_wei: U256,
    pub timestamp: DateTime<Utc>,
    pub provenance: Option<Provenance>,
}

/// Result of an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    /// Same provenance already stored; carries the existing row id.
    Duplicate(i64),
}

impl InsertOutcome {
    pub fn id(self) -> i64 {
        match self {
            InsertOutcome::Inserted(id) | InsertOutcome::Duplicate(id) => id,
        }
    }

    pub fn is_duplicate(self) -> bool {
        matches!(self, InsertOutcome::Duplicate(_))
    }
}

/// Per-address ledger aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct BettorTotal {
    pub user_address: String,
    pub total_wei: U256,
    pub bet_count: u64,
}
