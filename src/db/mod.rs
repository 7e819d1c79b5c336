//! SQLite persistence for ledger state and the trade audit trail.
//!
//! The core treats this as its event sink and crash-recovery store: open
//! positions mirror the in-memory ledger, `trades` is append-only, and
//! `risk_events` records halts, resumes, and suspect profit rates.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{Position, TradeRecord, TradeSide};
use crate::trading::CapitalAccount;

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Stored position row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredPosition {
    pub symbol: String,
    pub quantity: f64,
    pub avg_price: f64,
    pub total_invested: f64,
    pub entry_time: String,
    pub last_price: f64,
    pub updated_at: String,
}

impl StoredPosition {
    /// Rebuild the in-memory position. Rows written by this process always
    /// parse; a hand-edited database falls back to sane defaults.
    pub fn to_position(&self) -> Position {
        Position {
            symbol: self.symbol.clone(),
            quantity: Decimal::try_from(self.quantity).unwrap_or(Decimal::ZERO),
            avg_price: Decimal::try_from(self.avg_price).unwrap_or(Decimal::ZERO),
            total_invested: Decimal::try_from(self.total_invested).unwrap_or(Decimal::ZERO),
            entry_time: DateTime::parse_from_rfc3339(&self.entry_time)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            last_price: Decimal::try_from(self.last_price).unwrap_or(Decimal::ZERO),
        }
    }
}

/// Stored trade row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredTrade {
    pub id: String,
    pub symbol: String,
    pub side: String,
    pub quantity: f64,
    pub price: f64,
    pub amount: f64,
    pub fee: f64,
    pub profit: Option<f64>,
    pub profit_rate: Option<f64>,
    pub suspect: bool,
    pub executed_at: String,
}

impl StoredTrade {
    pub fn side(&self) -> Option<TradeSide> {
        self.side.parse().ok()
    }
}

/// Stored account snapshot (single row).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredAccount {
    pub initial_value: f64,
    pub cash_balance: f64,
    pub realized_profit_today: f64,
    pub trades_today: i64,
    pub trading_halted: bool,
    pub trading_day: String,
}

impl Database {
    /// Open (or create) the database and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        // An in-memory database exists per connection; it must not be pooled.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                symbol TEXT PRIMARY KEY,
                quantity REAL NOT NULL,
                avg_price REAL NOT NULL,
                total_invested REAL NOT NULL,
                entry_time TEXT NOT NULL,
                last_price REAL NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity REAL NOT NULL,
                price REAL NOT NULL,
                amount REAL NOT NULL,
                fee REAL NOT NULL DEFAULT 0,
                profit REAL,
                profit_rate REAL,
                suspect INTEGER NOT NULL DEFAULT 0,
                executed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS risk_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                detail TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                initial_value REAL NOT NULL,
                cash_balance REAL NOT NULL,
                realized_profit_today REAL NOT NULL DEFAULT 0,
                trades_today INTEGER NOT NULL DEFAULT 0,
                trading_halted INTEGER NOT NULL DEFAULT 0,
                trading_day TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_summary (
                trading_day TEXT PRIMARY KEY,
                initial_value REAL NOT NULL,
                final_value REAL NOT NULL,
                realized_profit REAL NOT NULL,
                trades INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_time ON trades(executed_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Positions ====================

    /// Upsert the stored mirror of an open position.
    pub async fn save_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (symbol, quantity, avg_price, total_invested, entry_time, last_price, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, datetime('now'))
            ON CONFLICT(symbol) DO UPDATE SET
                quantity = excluded.quantity,
                avg_price = excluded.avg_price,
                total_invested = excluded.total_invested,
                entry_time = excluded.entry_time,
                last_price = excluded.last_price,
                updated_at = datetime('now')
            "#,
        )
        .bind(&position.symbol)
        .bind(position.quantity.to_f64().unwrap_or(0.0))
        .bind(position.avg_price.to_f64().unwrap_or(0.0))
        .bind(position.total_invested.to_f64().unwrap_or(0.0))
        .bind(position.entry_time.to_rfc3339())
        .bind(position.last_price.to_f64().unwrap_or(0.0))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Drop a fully exited position.
    pub async fn remove_position(&self, symbol: &str) -> Result<()> {
        sqlx::query("DELETE FROM positions WHERE symbol = ?")
            .bind(symbol)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All stored positions, for ledger restore at startup.
    pub async fn load_positions(&self) -> Result<Vec<StoredPosition>> {
        sqlx::query_as::<_, StoredPosition>("SELECT * FROM positions")
            .fetch_all(&self.pool)
            .await
            .context("failed to load positions")
    }

    // ==================== Trades ====================

    /// Append a trade record. Records are never updated.
    pub async fn record_trade(&self, trade: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (id, symbol, side, quantity, price, amount, fee, profit, profit_rate, suspect, executed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.quantity.to_f64().unwrap_or(0.0))
        .bind(trade.price.to_f64().unwrap_or(0.0))
        .bind(trade.amount.to_f64().unwrap_or(0.0))
        .bind(trade.fee.to_f64().unwrap_or(0.0))
        .bind(trade.profit.and_then(|p| p.to_f64()))
        .bind(trade.profit_rate.and_then(|r| r.to_f64()))
        .bind(trade.suspect)
        .bind(trade.executed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent trades, newest first.
    pub async fn recent_trades(&self, limit: i64) -> Result<Vec<StoredTrade>> {
        sqlx::query_as::<_, StoredTrade>(
            "SELECT * FROM trades ORDER BY executed_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to load trades")
    }

    // ==================== Risk events ====================

    /// Append a halt/resume/suspect event for the audit trail.
    pub async fn record_risk_event(&self, kind: &str, detail: &str) -> Result<()> {
        sqlx::query("INSERT INTO risk_events (kind, detail) VALUES (?, ?)")
            .bind(kind)
            .bind(detail)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== Account state ====================

    /// Persist the account snapshot (single row, id = 1).
    pub async fn save_account(&self, account: &CapitalAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_state (id, initial_value, cash_balance, realized_profit_today, trades_today, trading_halted, trading_day, updated_at)
            VALUES (1, ?, ?, ?, ?, ?, ?, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                initial_value = excluded.initial_value,
                cash_balance = excluded.cash_balance,
                realized_profit_today = excluded.realized_profit_today,
                trades_today = excluded.trades_today,
                trading_halted = excluded.trading_halted,
                trading_day = excluded.trading_day,
                updated_at = datetime('now')
            "#,
        )
        .bind(account.initial_value.to_f64().unwrap_or(0.0))
        .bind(account.cash_balance.to_f64().unwrap_or(0.0))
        .bind(account.realized_profit_today.to_f64().unwrap_or(0.0))
        .bind(account.trades_today as i64)
        .bind(account.trading_halted)
        .bind(account.trading_day.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Restore the account snapshot, if one was ever saved.
    pub async fn load_account(&self) -> Result<Option<CapitalAccount>> {
        let row = sqlx::query_as::<_, StoredAccount>(
            "SELECT initial_value, cash_balance, realized_profit_today, trades_today, trading_halted, trading_day FROM account_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| CapitalAccount {
            initial_value: Decimal::try_from(r.initial_value).unwrap_or(Decimal::ZERO),
            cash_balance: Decimal::try_from(r.cash_balance).unwrap_or(Decimal::ZERO),
            realized_profit_today: Decimal::try_from(r.realized_profit_today)
                .unwrap_or(Decimal::ZERO),
            trades_today: r.trades_today.max(0) as u32,
            trading_halted: r.trading_halted,
            trading_day: r
                .trading_day
                .parse::<NaiveDate>()
                .unwrap_or_else(|_| Utc::now().date_naive()),
        }))
    }

    // ==================== Daily summary ====================

    /// Record the closing snapshot of a finished trading day.
    pub async fn save_daily_summary(
        &self,
        trading_day: NaiveDate,
        initial_value: Decimal,
        final_value: Decimal,
        realized_profit: Decimal,
        trades: u32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_summary (trading_day, initial_value, final_value, realized_profit, trades)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(trading_day) DO UPDATE SET
                final_value = excluded.final_value,
                realized_profit = excluded.realized_profit,
                trades = excluded.trades
            "#,
        )
        .bind(trading_day.to_string())
        .bind(initial_value.to_f64().unwrap_or(0.0))
        .bind(final_value.to_f64().unwrap_or(0.0))
        .bind(realized_profit.to_f64().unwrap_or(0.0))
        .bind(trades as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Pool access for ad-hoc queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
