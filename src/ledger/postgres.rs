//! PostgreSQL ledger adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use crate::domain::{
    Pool, PoolStatus, PortfolioSummary, Position, PositionStatus, PriceSample, Trade,
};
use crate::error::{Result, SniperError};

use super::{Ledger, QUOTE_MINT};

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Create a new PostgreSQL ledger
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn position_from_row(row: &sqlx::postgres::PgRow) -> Result<Position> {
        let status_str: String = row.get("status");
        let status = match status_str.as_str() {
            "OPEN" => PositionStatus::Open,
            "CLOSED" => PositionStatus::Closed,
            other => {
                return Err(SniperError::Internal(format!(
                    "Invalid position status: {}",
                    other
                )))
            }
        };

        Ok(Position {
            pool_id: row.get("pool_id"),
            entry_trade_id: row.get("entry_trade_id"),
            entry_price: row.get("entry_price"),
            base_amount: row.get("base_amount"),
            quote_spent: row.get("quote_spent"),
            opened_at: row.get::<DateTime<Utc>, _>("opened_at"),
            status,
            consecutive_profit_updates: 0,
            last_price: row.get("last_price"),
            exit_trade_id: row.get("exit_trade_id"),
            exit_price: row.get("exit_price"),
            closed_at: row.get("closed_at"),
            realized_pnl: row.get("realized_pnl"),
        })
    }
}

#[async_trait]
impl Ledger for PostgresLedger {
    async fn record_pool(&self, pool: &Pool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pools (pool_id, base_mint, quote_mint, base_decimals, quote_decimals,
                               discovered_at, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (pool_id) DO NOTHING
            "#,
        )
        .bind(&pool.pool_id)
        .bind(&pool.base_mint)
        .bind(&pool.quote_mint)
        .bind(pool.base_decimals as i16)
        .bind(pool.quote_decimals as i16)
        .bind(pool.discovered_at)
        .bind(pool.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_pool_status(&self, pool_id: &str, status: PoolStatus) -> Result<()> {
        sqlx::query(r#"UPDATE pools SET status = $1 WHERE pool_id = $2"#)
            .bind(status.as_str())
            .bind(pool_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn record_trade(&self, trade: &Trade) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (signature, pool_id, side, base_amount, quote_amount, price,
                                executed_at, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (signature) DO NOTHING
            "#,
        )
        .bind(&trade.signature)
        .bind(&trade.pool_id)
        .bind(trade.side.as_str())
        .bind(trade.base_amount)
        .bind(trade.quote_amount)
        .bind(trade.price)
        .bind(trade.timestamp)
        .bind(trade.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn open_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (pool_id, entry_trade_id, entry_price, base_amount,
                                   quote_spent, last_price, opened_at, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'OPEN')
            ON CONFLICT (pool_id) DO NOTHING
            "#,
        )
        .bind(&position.pool_id)
        .bind(&position.entry_trade_id)
        .bind(position.entry_price)
        .bind(position.base_amount)
        .bind(position.quote_spent)
        .bind(position.last_price)
        .bind(position.opened_at)
        .execute(&self.pool)
        .await?;

        debug!(pool_id = %position.pool_id, "position persisted");
        Ok(())
    }

    async fn close_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE positions
            SET status = 'CLOSED',
                exit_trade_id = $1,
                exit_price = $2,
                closed_at = $3,
                last_price = $4,
                realized_pnl = $5,
                updated_at = NOW()
            WHERE pool_id = $6
            "#,
        )
        .bind(&position.exit_trade_id)
        .bind(position.exit_price)
        .bind(position.closed_at)
        .bind(position.last_price)
        .bind(position.realized_pnl)
        .bind(&position.pool_id)
        .execute(&self.pool)
        .await?;

        debug!(pool_id = %position.pool_id, "position close persisted");
        Ok(())
    }

    async fn record_snapshot(&self, sample: &PriceSample) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pool_snapshots (pool_id, price, base_reserve, quote_reserve, observed_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&sample.pool_id)
        .bind(sample.price)
        .bind(sample.base_reserve)
        .bind(sample.quote_reserve)
        .bind(sample.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_balance(&self, mint: &str, amount: Decimal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO balances (mint, amount, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (mint) DO UPDATE SET amount = EXCLUDED.amount, updated_at = NOW()
            "#,
        )
        .bind(mint)
        .bind(amount)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_open_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT pool_id, entry_trade_id, exit_trade_id, entry_price, exit_price,
                   base_amount, quote_spent, last_price, opened_at, closed_at,
                   realized_pnl, status
            FROM positions
            WHERE status = 'OPEN'
            ORDER BY opened_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::position_from_row).collect()
    }

    async fn portfolio_summary(&self) -> Result<PortfolioSummary> {
        let balance: Decimal =
            sqlx::query_scalar(r#"SELECT amount FROM balances WHERE mint = $1"#)
                .bind(QUOTE_MINT)
                .fetch_optional(&self.pool)
                .await?
                .unwrap_or(Decimal::ZERO);

        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'OPEN')::BIGINT AS open_count,
                COALESCE(SUM(base_amount * last_price - quote_spent)
                         FILTER (WHERE status = 'OPEN'), 0) AS unrealized_pnl,
                COALESCE(SUM(realized_pnl) FILTER (WHERE status = 'CLOSED'), 0) AS realized_pnl
            FROM positions
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let total_trades: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM trades"#)
            .fetch_one(&self.pool)
            .await?;

        Ok(PortfolioSummary {
            balance,
            open_positions: row.get::<i64, _>("open_count") as usize,
            total_trades: total_trades as usize,
            unrealized_pnl: row.get("unrealized_pnl"),
            realized_pnl: row.get("realized_pnl"),
        })
    }
}

// Integration tests for this adapter require a running PostgreSQL with
// migrations applied; engine-level behavior is covered against the
// in-memory ledger instead.
