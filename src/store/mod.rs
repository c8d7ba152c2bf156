//! SQLite persistence for the snapshot, the bet ledger and the poll cursor.
//!
//! Tables:
//!   game_state   → singleton row (id = 1)                 owner: reconciler
//!   teams        → team snapshot, replaced wholesale      owner: reconciler
//!   user_bets    → append-only ledger                     owner: ledger
//!   sync_cursor  → last processed block per event stream  owner: scheduler
//!
//! Big integers (wei amounts) are stored as decimal TEXT so no precision is
//! lost; SQLite INTEGER is only used for values that fit in i64. Bet
//! timestamps are fixed-width RFC 3339 (microseconds, `Z`) so they sort as text.

pub mod schema;
pub mod types;

pub use types::{
    BetRecord, BettorTotal, GlobalState, InsertOutcome, NewBet, Provenance, TeamSnapshot,
};

use crate::chain::GameStatus;

use alloy::primitives::U256;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt {table}.{column}: {detail}")]
    Corrupt {
        table: &'static str,
        column: &'static str,
        detail: String,
    },
    #[error("{field} value {value} does not fit in an SQLite integer")]
    OutOfRange { field: &'static str, value: u64 },
}

fn corrupt(table: &'static str, column: &'static str, detail: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        table,
        column,
        detail: detail.into(),
    }
}

fn sql_int(field: &'static str, value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::OutOfRange { field, value })
}

fn parse_wei(text: &str, table: &'static str, column: &'static str) -> Result<U256, StoreError> {
    U256::from_str_radix(text, 10).map_err(|e| corrupt(table, column, format!("{text:?}: {e}")))
}

fn parse_u32(value: i64, table: &'static str, column: &'static str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| corrupt(table, column, format!("{value} out of range")))
}

fn parse_u64(value: i64, table: &'static str, column: &'static str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| corrupt(table, column, format!("{value} is negative")))
}

/// Shared handle to the database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the database at `url` and apply the schema.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        schema::create_tables(&store.pool).await?;
        info!(url = url, "database ready");
        Ok(store)
    }

    /// Private in-memory database on a single pinned connection.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        schema::create_tables(&store.pool).await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // --- Snapshot ---

    /// Current game state. A missing row reads as the defaults.
    pub async fn global_state(&self) -> Result<GlobalState, StoreError> {
        let row = sqlx::query(
            "SELECT status, total_prize_pool, winning_team_id FROM game_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(GlobalState::default());
        };

        let code: i64 = row.try_get("status")?;
        let status = u8::try_from(code)
            .ok()
            .and_then(GameStatus::from_code)
            .ok_or_else(|| corrupt("game_state", "status", format!("unknown status {code}")))?;
        let pool: String = row.try_get("total_prize_pool")?;
        let winner: Option<i64> = row.try_get("winning_team_id")?;

        Ok(GlobalState {
            status,
            total_prize_pool: parse_wei(&pool, "game_state", "total_prize_pool")?,
            winning_team_id: winner
                .map(|w| parse_u32(w, "game_state", "winning_team_id"))
                .transpose()?,
        })
    }

    /// Team snapshot ordered by id.
    pub async fn teams(&self) -> Result<Vec<TeamSnapshot>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, total_bet_amount, supporter_count FROM teams ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<TeamSnapshot, StoreError> {
                let amount: String = row.try_get("total_bet_amount")?;
                Ok(TeamSnapshot {
                    id: parse_u32(row.try_get("id")?, "teams", "id")?,
                    name: row.try_get("name")?,
                    total_bet_amount: parse_wei(&amount, "teams", "total_bet_amount")?,
                    supporter_count: parse_u64(
                        row.try_get("supporter_count")?,
                        "teams",
                        "supporter_count",
                    )?,
                })
            })
            .collect()
    }

    /// Overwrite the game state and replace the team table in one transaction.
    ///
    /// Any error rolls the whole transaction back (the `Transaction` is dropped
    /// uncommitted), so readers only ever see the old or the new snapshot.
    pub async fn replace_snapshot(
        &self,
        state: &GlobalState,
        teams: &[TeamSnapshot],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO game_state (id, status, total_prize_pool, winning_team_id)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                total_prize_pool = excluded.total_prize_pool,
                winning_team_id = excluded.winning_team_id",
        )
        .bind(i64::from(state.status.code()))
        .bind(state.total_prize_pool.to_string())
        .bind(state.winning_team_id.map(i64::from))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM teams").execute(&mut *tx).await?;

        for team in teams {
            sqlx::query(
                "INSERT INTO teams (id, name, total_bet_amount, supporter_count)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(i64::from(team.id))
            .bind(&team.name)
            .bind(team.total_bet_amount.to_string())
            .bind(sql_int("supporter_count", team.supporter_count)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(teams = teams.len(), status = %state.status, "snapshot replaced");
        Ok(())
    }

    // --- Ledger ---

    /// Append a bet. A bet whose provenance is already stored is not inserted
    /// again; the existing row id is returned instead.
    pub async fn insert_bet(&self, bet: &NewBet) -> Result<InsertOutcome, StoreError> {
        let prov = bet.provenance.as_ref();
        let block_number = prov
            .and_then(|p| p.block_number)
            .map(|b| sql_int("block_number", b))
            .transpose()?;
        let gas = prov
            .and_then(|p| p.gas)
            .map(|g| sql_int("gas", g))
            .transpose()?;
        let gas_used = prov
            .and_then(|p| p.gas_used)
            .map(|g| sql_int("gas_used", g))
            .transpose()?;

        let result = sqlx::query(
            "INSERT INTO user_bets
                (user_address, team_id, amount_wei, timestamp,
                 tx_hash, time_stamp, block_number, gas, gas_price, gas_used)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT (tx_hash, time_stamp) DO NOTHING",
        )
        .bind(&bet.user_address)
        .bind(i64::from(bet.team_id))
        .bind(bet.amount_wei.to_string())
        .bind(bet.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true))
        .bind(prov.map(|p| p.tx_hash.as_str()))
        .bind(prov.map(|p| p.time_stamp.as_str()))
        .bind(block_number)
        .bind(gas)
        .bind(prov.and_then(|p| p.gas_price.as_deref()))
        .bind(gas_used)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(InsertOutcome::Inserted(result.last_insert_rowid()));
        }

        // Only a provenance conflict can make the insert a no-op.
        let Some(p) = prov else {
            return Err(corrupt("user_bets", "id", "insert without provenance was ignored"));
        };
        let existing: i64 = sqlx::query_scalar(
            "SELECT id FROM user_bets WHERE tx_hash = ?1 AND time_stamp = ?2",
        )
        .bind(&p.tx_hash)
        .bind(&p.time_stamp)
        .fetch_one(&self.pool)
        .await?;
        Ok(InsertOutcome::Duplicate(existing))
    }

    /// Every bet placed by `user_address`, oldest first.
    pub async fn bets_for(&self, user_address: &str) -> Result<Vec<BetRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, user_address, team_id, amount_wei, timestamp,
                    tx_hash, time_stamp, block_number, gas, gas_price, gas_used
             FROM user_bets WHERE user_address = ?1
             ORDER BY timestamp, id",
        )
        .bind(user_address)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(bet_from_row).collect()
    }

    pub async fn bet_count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_bets")
            .fetch_one(&self.pool)
            .await?;
        parse_u64(count, "user_bets", "id")
    }

    /// Ledger totals per address, ordered by address.
    pub async fn bettor_totals(&self) -> Result<Vec<BettorTotal>, StoreError> {
        let rows = sqlx::query("SELECT user_address, amount_wei FROM user_bets")
            .fetch_all(&self.pool)
            .await?;

        let mut totals: BTreeMap<String, (U256, u64)> = BTreeMap::new();
        for row in &rows {
            let address: String = row.try_get("user_address")?;
            let amount: String = row.try_get("amount_wei")?;
            let amount = parse_wei(&amount, "user_bets", "amount_wei")?;
            let entry = totals.entry(address).or_insert((U256::ZERO, 0));
            entry.0 = entry.0.saturating_add(amount);
            entry.1 += 1;
        }

        Ok(totals
            .into_iter()
            .map(|(user_address, (total_wei, bet_count))| BettorTotal {
                user_address,
                total_wei,
                bet_count,
            })
            .collect())
    }

    // --- Cursor ---

    pub async fn load_cursor(&self, name: &str) -> Result<Option<u64>, StoreError> {
        let block: Option<i64> =
            sqlx::query_scalar("SELECT last_block FROM sync_cursor WHERE name = ?1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        block
            .map(|b| parse_u64(b, "sync_cursor", "last_block"))
            .transpose()
    }

    pub async fn save_cursor(&self, name: &str, last_block: u64) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sync_cursor (name, last_block, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET
                last_block = excluded.last_block,
                updated_at = excluded.updated_at",
        )
        .bind(name)
        .bind(sql_int("last_block", last_block)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- Admin ---

    /// Wipe every table and reseed the default game state, atomically.
    pub async fn reset(&self) -> Result<(), StoreError> {
        warn!("resetting database: deleting bets, teams, game state and cursors");
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM user_bets").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM teams").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM sync_cursor").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM game_state").execute(&mut *tx).await?;
        sqlx::query(
            "INSERT INTO game_state (id, status, total_prize_pool, winning_team_id)
             VALUES (1, 0, '0', NULL)",
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        info!("database reset complete");
        Ok(())
    }
}

fn bet_from_row(row: &SqliteRow) -> Result<BetRecord, StoreError> {
    let amount: String = row.try_get("amount_wei")?;
    let timestamp: String = row.try_get("timestamp")?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|e| corrupt("user_bets", "timestamp", format!("{timestamp:?}: {e}")))?
        .with_timezone(&Utc);

    let tx_hash: Option<String> = row.try_get("tx_hash")?;
    let time_stamp: Option<String> = row.try_get("time_stamp")?;
    let provenance = match (tx_hash, time_stamp) {
        (Some(tx_hash), Some(time_stamp)) => {
            let block_number: Option<i64> = row.try_get("block_number")?;
            let gas: Option<i64> = row.try_get("gas")?;
            let gas_used: Option<i64> = row.try_get("gas_used")?;
            Some(Provenance {
                tx_hash,
                time_stamp,
                block_number: block_number
                    .map(|b| parse_u64(b, "user_bets", "block_number"))
                    .transpose()?,
                gas: gas.map(|g| parse_u64(g, "user_bets", "gas")).transpose()?,
                gas_price: row.try_get("gas_price")?,
                gas_used: gas_used
                    .map(|g| parse_u64(g, "user_bets", "gas_used"))
                    .transpose()?,
            })
        }
        _ => None,
    };

    Ok(BetRecord {
        id: row.try_get("id")?,
        user_address: row.try_get("user_address")?,
        team_id: parse_u32(row.try_get("team_id")?, "user_bets", "team_id")?,
        amount_wei: parse_wei(&amount, "user_bets", "amount_wei")?,
        timestamp,
        provenance,
    })
}
