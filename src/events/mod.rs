//! Raw contract logs → typed domain events.
//!
//! Decoding is done by hand against the fixed event layouts:
//!
//! - `BetPlaced(address indexed user, uint256 indexed teamId, uint256 amount)`
//!   topics: [sig, user, teamId], data: [amount]
//! - `StatusChanged(uint8 newStatus)`
//!   topics: [sig], data: [newStatus]
//! - `WinnerSelected(uint256 indexed teamId, string teamName)`
//!   topics: [sig, teamId], data: [offset, len, bytes...]
//!
//! Logs that fail to decode are dropped with a warning; a single bad log
//! never stops a batch.

use crate::chain::abi;
use crate::chain::{GameStatus, RawEvent};
use crate::ledger::{BetSubmission, Provenance};

use alloy::primitives::{Address, B256, U256};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("log has no topic0")]
    MissingTopic,
    #[error("unrecognised event topic {0}")]
    UnknownTopic(B256),
    #[error("{event}: expected {expected} topics, got {got}")]
    TopicCount {
        event: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{event}: malformed data ({detail})")]
    Data { event: &'static str, detail: String },
}

/// A decoded contract event.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainEvent {
    BetPlaced {
        user: Address,
        team_id: u32,
        amount: U256,
    },
    StatusChanged {
        new_status: GameStatus,
    },
    WinnerSelected {
        team_id: u32,
        team_name: String,
    },
}

impl std::fmt::Display for ChainEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BetPlaced {
                user,
                team_id,
                amount,
            } => write!(f, "BetPlaced(user={user}, team={team_id}, amount={amount})"),
            Self::StatusChanged { new_status } => write!(f, "StatusChanged({new_status})"),
            Self::WinnerSelected { team_id, team_name } => {
                write!(f, "WinnerSelected(team={team_id}, name={team_name})")
            }
        }
    }
}

/// A decoded event together with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub event: ChainEvent,
    pub block_number: u64,
    pub block_timestamp: Option<u64>,
    pub tx_hash: Option<B256>,
    pub log_index: Option<u64>,
}

impl NormalizedEvent {
    /// Ledger submission for a `BetPlaced` event, `None` for anything else.
    ///
    /// Provenance (tx hash + block timestamp string) is attached whenever
    /// both are known, so redelivered logs collapse onto one ledger row.
    pub fn to_bet_submission(&self) -> Option<BetSubmission> {
        let ChainEvent::BetPlaced {
            user,
            team_id,
            amount,
        } = &self.event
        else {
            return None;
        };

        let provenance = match (self.tx_hash, self.block_timestamp) {
            (Some(tx_hash), Some(ts)) => Some(Provenance {
                tx_hash: format!("{tx_hash:#x}"),
                time_stamp: ts.to_string(),
                block_number: Some(self.block_number),
                gas: None,
                gas_price: None,
                gas_used: None,
            }),
            _ => None,
        };

        Some(BetSubmission {
            user_address: Some(format!("{user:#x}")),
            team_id: Some(*team_id),
            amount_wei: Some(amount.to_string()),
            timestamp: self
                .block_timestamp
                .and_then(|ts| i64::try_from(ts).ok())
                .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0)),
            provenance,
        })
    }
}

fn word_at(data: &[u8], offset: usize) -> Option<U256> {
    let end = offset.checked_add(32)?;
    let bytes: [u8; 32] = data.get(offset..end)?.try_into().ok()?;
    Some(U256::from_be_bytes(bytes))
}

fn team_id_from(value: U256, event: &'static str) -> Result<u32, DecodeError> {
    value.try_into().map_err(|_| DecodeError::Data {
        event,
        detail: format!("team id {value} out of range"),
    })
}

fn require_topics(raw: &RawEvent, event: &'static str, expected: usize) -> Result<(), DecodeError> {
    if raw.topics.len() < expected {
        return Err(DecodeError::TopicCount {
            event,
            expected,
            got: raw.topics.len(),
        });
    }
    Ok(())
}

fn decode_bet_placed(raw: &RawEvent) -> Result<ChainEvent, DecodeError> {
    const EVENT: &str = "BetPlaced";
    require_topics(raw, EVENT, 3)?;

    let user = Address::from_slice(&raw.topics[1].0[12..]);
    let team_id = team_id_from(U256::from_be_bytes(raw.topics[2].0), EVENT)?;
    let amount = word_at(&raw.data, 0).ok_or_else(|| DecodeError::Data {
        event: EVENT,
        detail: format!("{} data bytes, need 32", raw.data.len()),
    })?;

    Ok(ChainEvent::BetPlaced {
        user,
        team_id,
        amount,
    })
}

fn decode_status_changed(raw: &RawEvent) -> Result<ChainEvent, DecodeError> {
    const EVENT: &str = "StatusChanged";
    let code = word_at(&raw.data, 0).ok_or_else(|| DecodeError::Data {
        event: EVENT,
        detail: format!("{} data bytes, need 32", raw.data.len()),
    })?;
    let new_status = u8::try_from(code)
        .ok()
        .and_then(GameStatus::from_code)
        .ok_or_else(|| DecodeError::Data {
            event: EVENT,
            detail: format!("unknown status code {code}"),
        })?;
    Ok(ChainEvent::StatusChanged { new_status })
}

fn decode_winner_selected(raw: &RawEvent) -> Result<ChainEvent, DecodeError> {
    const EVENT: &str = "WinnerSelected";
    require_topics(raw, EVENT, 2)?;
    let team_id = team_id_from(U256::from_be_bytes(raw.topics[1].0), EVENT)?;

    let malformed = |detail: &str| DecodeError::Data {
        event: EVENT,
        detail: detail.to_string(),
    };

    // Dynamic string: offset word, then length word at that offset, then bytes.
    let offset: usize = word_at(&raw.data, 0)
        .ok_or_else(|| malformed("missing string offset"))?
        .try_into()
        .map_err(|_| malformed("string offset out of range"))?;
    let len: usize = word_at(&raw.data, offset)
        .ok_or_else(|| malformed("missing string length"))?
        .try_into()
        .map_err(|_| malformed("string length out of range"))?;
    let start = offset + 32;
    let bytes = start
        .checked_add(len)
        .and_then(|end| raw.data.get(start..end))
        .ok_or_else(|| malformed("string runs past end of data"))?;
    let team_name =
        String::from_utf8(bytes.to_vec()).map_err(|_| malformed("team name is not UTF-8"))?;

    Ok(ChainEvent::WinnerSelected { team_id, team_name })
}

/// Decode one raw log.
pub fn normalize(raw: &RawEvent) -> Result<NormalizedEvent, DecodeError> {
    let topic0 = *raw.topics.first().ok_or(DecodeError::MissingTopic)?;

    let event = match topic0 {
        t if t == abi::BET_PLACED_TOPIC => decode_bet_placed(raw)?,
        t if t == abi::STATUS_CHANGED_TOPIC => decode_status_changed(raw)?,
        t if t == abi::WINNER_SELECTED_TOPIC => decode_winner_selected(raw)?,
        other => return Err(DecodeError::UnknownTopic(other)),
    };

    Ok(NormalizedEvent {
        event,
        block_number: raw.block_number,
        block_timestamp: raw.block_timestamp,
        tx_hash: raw.tx_hash,
        log_index: raw.log_index,
    })
}

/// Decode a batch in delivery order.
///
/// Reorged (`removed`) logs and undecodable logs are skipped. Logs repeated
/// within the batch (same tx hash and log index) are kept once; repeats across
/// batches are left to the ledger's provenance constraint.
pub fn normalize_batch(raws: &[RawEvent]) -> Vec<NormalizedEvent> {
    let mut seen: HashSet<(B256, u64)> = HashSet::new();
    let mut out = Vec::with_capacity(raws.len());

    for raw in raws {
        if raw.removed {
            debug!(block = raw.block_number, tx = ?raw.tx_hash, "skipping removed log");
            continue;
        }
        if let (Some(tx), Some(index)) = (raw.tx_hash, raw.log_index) {
            if !seen.insert((tx, index)) {
                debug!(block = raw.block_number, tx = %tx, index, "duplicate log in batch");
                continue;
            }
        }
        match normalize(raw) {
            Ok(event) => out.push(event),
            Err(e) => warn!(
                block = raw.block_number,
                tx = ?raw.tx_hash,
                error = %e,
                "dropping undecodable log"
            ),
        }
    }

    out
}
