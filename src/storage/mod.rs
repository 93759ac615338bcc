//! Persistence layer.
//!
//! Append-only trade ledger in SQLite. One row per completed cycle,
//! never updated or deleted. Timestamps are stored as fixed-width
//! RFC 3339 strings (UTC, microseconds) so that lexical order equals
//! chronological order; amounts are stored as decimal strings.

use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::types::{Action, TradeRecord};

/// Default ledger database file.
pub const DEFAULT_LEDGER_FILE: &str = "trades.db";

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    decision TEXT NOT NULL,
    percentage INTEGER NOT NULL,
    reason TEXT NOT NULL,
    base_balance TEXT NOT NULL,
    quote_balance TEXT NOT NULL,
    price TEXT NOT NULL
)";

const CREATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(timestamp DESC)";

const SELECT_COLUMNS: &str =
    "SELECT id, timestamp, decision, percentage, reason, base_balance, quote_balance, price FROM trades";

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt ledger row {id}: {message}")]
    Corrupt { id: i64, message: String },
}

// ---------------------------------------------------------------------------
// Performance summary
// ---------------------------------------------------------------------------

/// Portfolio performance across the whole ledger, measured against the
/// first recorded cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceSummary {
    pub records: u64,
    /// Buy/sell rows whose order executed (percentage > 0).
    pub orders_executed: u64,
    pub since: DateTime<Utc>,
    pub first_value: Decimal,
    pub latest_value: Decimal,
    pub pnl: Decimal,
    /// P&L as a percentage of the first value (0 if that was 0).
    pub pnl_pct: Decimal,
}

impl PerformanceSummary {
    fn from_endpoints(first: &TradeRecord, latest: &TradeRecord, records: u64, orders: u64) -> Self {
        let first_value = first.portfolio_value();
        let latest_value = latest.portfolio_value();
        let pnl = latest_value - first_value;
        let pnl_pct = if first_value.is_zero() {
            Decimal::ZERO
        } else {
            (pnl / first_value * Decimal::ONE_HUNDRED).round_dp(2)
        };
        Self {
            records,
            orders_executed: orders,
            since: first.timestamp,
            first_value,
            latest_value,
            pnl,
            pnl_pct,
        }
    }
}

impl fmt::Display for PerformanceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.pnl >= Decimal::ZERO { "+" } else { "" };
        write!(
            f,
            "value={:.0} ({sign}{:.0}, {sign}{}%) | records={} orders={} since {}",
            self.latest_value,
            self.pnl,
            self.pnl_pct,
            self.records,
            self.orders_executed,
            self.since.format("%Y-%m-%d %H:%M"),
        )
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct TradeLedger {
    pool: SqlitePool,
}

impl TradeLedger {
    /// Open (or create) the ledger database at `path`.
    pub async fn open(path: &str) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let ledger = Self::init(pool).await?;
        let records = ledger.count().await?;
        info!(path, records, "Trade ledger opened");
        Ok(ledger)
    }

    /// Open a private in-memory ledger. Useful for testing and dry runs.
    pub async fn open_in_memory() -> Result<Self, LedgerError> {
        // A single connection that never idles out; the database lives and
        // dies with it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<std::time::Duration>)
            .max_lifetime(None::<std::time::Duration>)
            .connect("sqlite::memory:")
            .await?;
        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> Result<Self, LedgerError> {
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        sqlx::query(CREATE_INDEX).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Append a record and return it as stored (with id, and with its
    /// timestamp moved forward if it did not strictly follow the latest row).
    pub async fn append(&self, record: &TradeRecord) -> Result<TradeRecord, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let latest: Option<String> =
            sqlx::query_scalar("SELECT timestamp FROM trades ORDER BY timestamp DESC, id DESC LIMIT 1")
                .fetch_optional(&mut *tx)
                .await?;

        let mut timestamp = record.timestamp.trunc_subsecs(6);
        if let Some(latest) = latest {
            let latest = parse_timestamp(0, &latest)?;
            if timestamp <= latest {
                warn!(
                    requested = %record.timestamp,
                    latest = %latest,
                    "Record timestamp not after latest ledger row; advancing"
                );
                timestamp = latest + Duration::microseconds(1);
            }
        }

        let result = sqlx::query(
            "INSERT INTO trades \
             (timestamp, decision, percentage, reason, base_balance, quote_balance, price) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(format_timestamp(&timestamp))
        .bind(record.decision.as_str())
        .bind(i64::from(record.percentage))
        .bind(&record.reason)
        .bind(record.base_balance.to_string())
        .bind(record.quote_balance.to_string())
        .bind(record.price.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let stored = TradeRecord {
            id: Some(result.last_insert_rowid()),
            timestamp,
            ..record.clone()
        };
        debug!(id = stored.id, decision = %stored.decision, pct = stored.percentage, "Trade recorded");
        Ok(stored)
    }

    /// At most `limit` records, newest first. Empty ledger → empty vec.
    pub async fn recent(&self, limit: usize) -> Result<Vec<TradeRecord>, LedgerError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} ORDER BY timestamp DESC, id DESC LIMIT ?1"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_row).collect()
    }

    /// Number of stored records.
    pub async fn count(&self) -> Result<u64, LedgerError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trades")
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }

    /// Performance since the first record, or `None` on an empty ledger.
    pub async fn performance(&self) -> Result<Option<PerformanceSummary>, LedgerError> {
        let first = sqlx::query(&format!(
            "{SELECT_COLUMNS} ORDER BY timestamp ASC, id ASC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        let Some(first) = first else {
            return Ok(None);
        };
        let first = decode_row(&first)?;

        let latest = match self.recent(1).await?.into_iter().next() {
            Some(r) => r,
            None => first.clone(),
        };

        let records = self.count().await?;
        let orders: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM trades WHERE decision != 'hold' AND percentage > 0",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(Some(PerformanceSummary::from_endpoints(
            &first,
            &latest,
            records,
            orders.max(0) as u64,
        )))
    }
}

// ---------------------------------------------------------------------------
// Row codec
// ---------------------------------------------------------------------------

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(id: i64, raw: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LedgerError::Corrupt {
            id,
            message: format!("timestamp {raw:?}: {e}"),
        })
}

fn parse_decimal(id: i64, column: &str, raw: &str) -> Result<Decimal, LedgerError> {
    Decimal::from_str(raw).map_err(|e| LedgerError::Corrupt {
        id,
        message: format!("{column} {raw:?}: {e}"),
    })
}

fn decode_row(row: &SqliteRow) -> Result<TradeRecord, LedgerError> {
    let id: i64 = row.try_get("id")?;
    let timestamp: String = row.try_get("timestamp")?;
    let decision: String = row.try_get("decision")?;
    let percentage: i64 = row.try_get("percentage")?;
    let reason: String = row.try_get("reason")?;
    let base: String = row.try_get("base_balance")?;
    let quote: String = row.try_get("quote_balance")?;
    let price: String = row.try_get("price")?;

    Ok(TradeRecord {
        id: Some(id),
        timestamp: parse_timestamp(id, &timestamp)?,
        decision: Action::from_str(&decision).map_err(|e| LedgerError::Corrupt {
            id,
            message: e.to_string(),
        })?,
        percentage: u8::try_from(percentage).map_err(|_| LedgerError::Corrupt {
            id,
            message: format!("percentage out of range: {percentage}"),
        })?,
        reason,
        base_balance: parse_decimal(id, "base_balance", &base)?,
        quote_balance: parse_decimal(id, "quote_balance", &quote)?,
        price: parse_decimal(id, "price", &price)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Balances, Decision};
    use rust_decimal_macros::dec;

    fn make_record(action: Action, pct: u8, quote: Decimal) -> TradeRecord {
        let decision = Decision {
            action,
            percentage: pct,
            reason: format!("{action} test"),
        };
        TradeRecord::new(
            &decision,
            pct,
            &Balances {
                base: dec!(0.01),
                quote,
                price: dec!(100000000),
            },
        )
    }

    fn temp_path() -> String {
        let mut p = std::env::temp_dir();
        p.push(format!("autotrade_test_ledger_{}.db", uuid::Uuid::new_v4()));
        p.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn test_recent_on_empty_ledger() {
        let ledger = TradeLedger::open_in_memory().await.unwrap();
        assert!(ledger.recent(5).await.unwrap().is_empty());
        assert_eq!(ledger.count().await.unwrap(), 0);
        assert!(ledger.performance().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_assigns_ids() {
        let ledger = TradeLedger::open_in_memory().await.unwrap();
        let a = ledger.append(&make_record(Action::Buy, 20, dec!(1000))).await.unwrap();
        let b = ledger.append(&make_record(Action::Hold, 0, dec!(1000))).await.unwrap();
        assert!(a.id.is_some());
        assert!(b.id > a.id);
        assert_eq!(ledger.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_recent_newest_first_and_limited() {
        let ledger = TradeLedger::open_in_memory().await.unwrap();
        for i in 0..7u8 {
            ledger
                .append(&make_record(Action::Buy, i + 1, dec!(1000)))
                .await
                .unwrap();
        }

        let recent = ledger.recent(5).await.unwrap();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].percentage, 7);
        assert_eq!(recent[4].percentage, 3);
        for pair in recent.windows(2) {
            assert!(pair[0].timestamp > pair[1].timestamp);
        }

        assert_eq!(ledger.recent(100).await.unwrap().len(), 7);
        assert!(ledger.recent(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timestamps_strictly_increase() {
        let ledger = TradeLedger::open_in_memory().await.unwrap();
        let mut rec = make_record(Action::Hold, 0, dec!(1000));
        let first = ledger.append(&rec).await.unwrap();

        // Same and earlier timestamps are pushed past the latest row.
        let second = ledger.append(&rec).await.unwrap();
        rec.timestamp = first.timestamp - Duration::hours(1);
        let third = ledger.append(&rec).await.unwrap();

        assert!(second.timestamp > first.timestamp);
        assert!(third.timestamp > second.timestamp);

        let recent = ledger.recent(3).await.unwrap();
        assert_eq!(recent[0].id, third.id);
        assert_eq!(recent[2].id, first.id);
    }

    #[tokio::test]
    async fn test_fields_survive_storage() {
        let ledger = TradeLedger::open_in_memory().await.unwrap();
        let rec = make_record(Action::Sell, 35, dec!(123456.789));
        let stored = ledger.append(&rec).await.unwrap();

        let loaded = ledger.recent(1).await.unwrap().remove(0);
        assert_eq!(loaded, stored);
        assert_eq!(loaded.decision, Action::Sell);
        assert_eq!(loaded.quote_balance, dec!(123456.789));
        assert_eq!(loaded.base_balance, dec!(0.01));
        assert_eq!(loaded.reason, "sell test");
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let path = temp_path();
        {
            let ledger = TradeLedger::open(&path).await.unwrap();
            ledger.append(&make_record(Action::Buy, 50, dec!(500))).await.unwrap();
        }

        let reopened = TradeLedger::open(&path).await.unwrap();
        let recent = reopened.recent(5).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].percentage, 50);

        drop(reopened);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_performance_summary() {
        let ledger = TradeLedger::open_in_memory().await.unwrap();
        // value = quote + 0.01 * 100_000_000 = quote + 1_000_000
        ledger.append(&make_record(Action::Hold, 0, dec!(0))).await.unwrap();
        ledger.append(&make_record(Action::Buy, 30, dec!(50000))).await.unwrap();
        ledger.append(&make_record(Action::Sell, 0, dec!(100000))).await.unwrap();

        let perf = ledger.performance().await.unwrap().unwrap();
        assert_eq!(perf.records, 3);
        assert_eq!(perf.orders_executed, 1);
        assert_eq!(perf.first_value, dec!(1000000));
        assert_eq!(perf.latest_value, dec!(1100000));
        assert_eq!(perf.pnl, dec!(100000));
        assert_eq!(perf.pnl_pct, dec!(10));
        assert!(format!("{perf}").contains("+10"));
    }
}
