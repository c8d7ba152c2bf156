//! Append-only bet ledger.
//!
//! Bets arrive from three places: the frontend reporting its own transaction
//! (`POST /record_bet`), the event poller (decoded `BetPlaced` logs) and the
//! block-explorer import. All of them go through [`BetLedger::record_bet`],
//! which validates the submission and lets the store's provenance constraint
//! absorb repeats.

pub use crate::store::Provenance;

use crate::store::{BetRecord, InsertOutcome, NewBet, Store, StoreError};

use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("invalid bet: {0}")]
    Validation(String),
    #[error(transparent)]
    Persistence(#[from] StoreError),
}

/// An unvalidated bet. Every field is optional so missing input can be
/// reported as a validation error rather than a parse failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BetSubmission {
    pub user_address: Option<String>,
    pub team_id: Option<u32>,
    /// Decimal wei string.
    pub amount_wei: Option<String>,
    /// Defaults to now when absent.
    pub timestamp: Option<DateTime<Utc>>,
    pub provenance: Option<Provenance>,
}

/// A user's bets plus their sum.
#[derive(Debug, Clone, PartialEq)]
pub struct UserBets {
    pub total_wei: U256,
    pub bets: Vec<BetRecord>,
}

/// Lower-cased `0x`-prefixed hex address.
///
/// Short forms such as `0xabc` are accepted as-is; the frontend reports
/// whatever the wallet returned and the ledger only keys on it.
pub fn normalize_address(raw: &str) -> Result<String, LedgerError> {
    let trimmed = raw.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| LedgerError::Validation(format!("address {raw:?} must start with 0x")))?;

    if hex.is_empty() || hex.len() > 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(LedgerError::Validation(format!(
            "address {raw:?} is not a hex address"
        )));
    }
    Ok(format!("0x{}", hex.to_ascii_lowercase()))
}

/// Positive integer amount in wei.
pub fn parse_amount(raw: &str) -> Result<U256, LedgerError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(LedgerError::Validation(format!(
            "amount {raw:?} is not a decimal integer"
        )));
    }
    let amount = U256::from_str_radix(trimmed, 10)
        .map_err(|_| LedgerError::Validation(format!("amount {raw:?} is out of range")))?;
    if amount.is_zero() {
        return Err(LedgerError::Validation("amount must be greater than zero".to_string()));
    }
    Ok(amount)
}

#[derive(Clone)]
pub struct BetLedger {
    store: Store,
}

impl BetLedger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn validate(submission: BetSubmission) -> Result<NewBet, LedgerError> {
        let user_address = submission
            .user_address
            .as_deref()
            .ok_or_else(|| LedgerError::Validation("missing userAddress".to_string()))?;
        let team_id = submission
            .team_id
            .ok_or_else(|| LedgerError::Validation("missing teamId".to_string()))?;
        let amount = submission
            .amount_wei
            .as_deref()
            .ok_or_else(|| LedgerError::Validation("missing amount".to_string()))?;

        Ok(NewBet {
            user_address: normalize_address(user_address)?,
            team_id,
            amount_wei: parse_amount(amount)?,
            timestamp: submission.timestamp.unwrap_or_else(Utc::now),
            provenance: submission.provenance,
        })
    }

    /// Validate and append. Resubmitting a bet with known provenance returns
    /// the existing id as [`InsertOutcome::Duplicate`].
    pub async fn record_bet(
        &self,
        submission: BetSubmission,
    ) -> Result<InsertOutcome, LedgerError> {
        let bet = Self::validate(submission)?;
        let outcome = self.store.insert_bet(&bet).await?;

        match outcome {
            InsertOutcome::Inserted(id) => info!(
                id,
                user = %bet.user_address,
                team = bet.team_id,
                amount_wei = %bet.amount_wei,
                "bet recorded"
            ),
            InsertOutcome::Duplicate(id) => debug!(
                id,
                tx = bet.provenance.as_ref().map(|p| p.tx_hash.as_str()),
                "bet already recorded"
            ),
        }
        Ok(outcome)
    }

    pub async fn list_bets_for(&self, user_address: &str) -> Result<UserBets, LedgerError> {
        let address = normalize_address(user_address)?;
        let bets = self.store.bets_for(&address).await?;
        let total_wei = bets
            .iter()
            .fold(U256::ZERO, |acc, b| acc.saturating_add(b.amount_wei));
        Ok(UserBets { total_wei, bets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_ETH: &str = "1000000000000000000";

    fn submission(user: &str, team: u32, amount: &str) -> BetSubmission {
        BetSubmission {
            user_address: Some(user.to_string()),
            team_id: Some(team),
            amount_wei: Some(amount.to_string()),
            ..Default::default()
        }
    }

    async fn ledger() -> BetLedger {
        BetLedger::new(Store::in_memory().await.unwrap())
    }

    #[test]
    fn test_address_normalization() {
        assert_eq!(normalize_address("0xabc").unwrap(), "0xabc");
        assert_eq!(normalize_address(" 0xABCdef ").unwrap(), "0xabcdef");
        assert!(normalize_address("abc").is_err());
        assert!(normalize_address("0x").is_err());
        assert!(normalize_address("0xnothex").is_err());
        assert!(normalize_address(&format!("0x{}", "a".repeat(41))).is_err());
    }

    #[test]
    fn test_amount_parsing() {
        assert_eq!(parse_amount(ONE_ETH).unwrap(), U256::from(10u64).pow(U256::from(18u64)));
        assert!(parse_amount("0").is_err());
        assert!(parse_amount("1.5").is_err());
        assert!(parse_amount("-1").is_err());
        assert!(parse_amount("").is_err());
        assert!(parse_amount(&"9".repeat(100)).is_err());
    }

    #[tokio::test]
    async fn test_missing_fields_are_rejected() {
        let ledger = ledger().await;
        for missing in [
            BetSubmission {
                user_address: None,
                ..submission("0xabc", 1, ONE_ETH)
            },
            BetSubmission {
                team_id: None,
                ..submission("0xabc", 1, ONE_ETH)
            },
            BetSubmission {
                amount_wei: None,
                ..submission("0xabc", 1, ONE_ETH)
            },
        ] {
            assert!(matches!(
                ledger.record_bet(missing).await,
                Err(LedgerError::Validation(_))
            ));
        }
        assert!(ledger.list_bets_for("0xabc").await.unwrap().bets.is_empty());
    }

    #[tokio::test]
    async fn test_record_and_list_with_total() {
        let ledger = ledger().await;
        let first = ledger.record_bet(submission("0xAbC", 1, ONE_ETH)).await.unwrap();
        ledger.record_bet(submission("0xabc", 2, "5")).await.unwrap();
        ledger.record_bet(submission("0xdef", 1, "7")).await.unwrap();

        assert!(!first.is_duplicate());
        let bets = ledger.list_bets_for("0xABC").await.unwrap();
        assert_eq!(bets.bets.len(), 2);
        assert_eq!(bets.bets[0].id, first.id());
        assert_eq!(bets.bets[0].amount_wei.to_string(), ONE_ETH);
        assert_eq!(
            bets.total_wei,
            U256::from(10u64).pow(U256::from(18u64)) + U256::from(5u64)
        );
    }

    #[tokio::test]
    async fn test_same_provenance_is_recorded_once() {
        let ledger = ledger().await;
        let with_provenance = BetSubmission {
            provenance: Some(Provenance {
                tx_hash: "0x01".to_string(),
                time_stamp: "1700000000".to_string(),
                block_number: Some(1),
                gas: None,
                gas_price: None,
                gas_used: None,
            }),
            ..submission("0xabc", 1, ONE_ETH)
        };

        let first = ledger.record_bet(with_provenance.clone()).await.unwrap();
        let second = ledger.record_bet(with_provenance).await.unwrap();
        assert_eq!(second, InsertOutcome::Duplicate(first.id()));
        assert_eq!(ledger.list_bets_for("0xabc").await.unwrap().bets.len(), 1);
    }
}
