//! Database schema creation.

use sqlx::SqlitePool;

/// Create all tables and indexes, then seed the singleton game state row.
pub async fn create_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Singleton row: id is pinned to 1
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS game_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            status INTEGER NOT NULL DEFAULT 0,
            total_prize_pool TEXT NOT NULL DEFAULT '0',
            winning_team_id INTEGER
        )",
    )
    .execute(pool)
    .await?;

    // Team snapshot: replaced wholesale by every reconciliation
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS teams (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            total_bet_amount TEXT NOT NULL DEFAULT '0',
            supporter_count INTEGER NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await?;

    // Bet ledger: append-only. Provenance columns are NULL for client reports,
    // and NULLs never collide in the unique constraint.
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS user_bets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_address TEXT NOT NULL,
            team_id INTEGER NOT NULL,
            amount_wei TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            tx_hash TEXT,
            time_stamp TEXT,
            block_number INTEGER,
            gas INTEGER,
            gas_price TEXT,
            gas_used INTEGER,
            UNIQUE (tx_hash, time_stamp)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_user_bets_user ON user_bets(user_address)")
        .execute(pool)
        .await?;

    // Event poller position, keyed by stream name
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS sync_cursor (
            name TEXT PRIMARY KEY,
            last_block INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    seed_game_state(pool).await?;

    Ok(())
}

/// Insert the default game state row if it is missing.
pub async fn seed_game_state(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT OR IGNORE INTO game_state (id, status, total_prize_pool, winning_team_id)
         VALUES (1, 0, '0', NULL)",
    )
    .execute(pool)
    .await?;
    Ok(())
}
