//! Shared types for the AUTOTRADE agent.
//!
//! These types form the data model used across all modules: the market
//! snapshot a cycle collects, the decision the oracle returns, and the
//! trade record the ledger keeps. They are kept free of I/O so that the
//! exchange, oracle, and engine modules can depend on them without cycles.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::exchange::ExchangeError;
use crate::storage::LedgerError;
use crate::strategy::sizing::SizingRejection;

// ---------------------------------------------------------------------------
// Asset pair
// ---------------------------------------------------------------------------

/// A spot market, written `QUOTE-BASE` the way the exchange names it
/// (`KRW-BTC` trades BTC against KRW).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetPair {
    /// Currency the asset is priced in (KRW).
    pub quote: String,
    /// The traded asset (BTC).
    pub base: String,
}

impl AssetPair {
    pub fn new(quote: &str, base: &str) -> Self {
        Self {
            quote: quote.to_uppercase(),
            base: base.to_uppercase(),
        }
    }

    /// Market code as used on the wire.
    pub fn market(&self) -> String {
        format!("{}-{}", self.quote, self.base)
    }
}

impl fmt::Display for AssetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.quote, self.base)
    }
}

impl FromStr for AssetPair {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('-');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(quote), Some(base), None) if !quote.is_empty() && !base.is_empty() => {
                Ok(AssetPair::new(quote, base))
            }
            _ => Err(anyhow::anyhow!("Invalid asset pair (expected QUOTE-BASE): {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Candle granularity for OHLCV requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    /// N-minute candles (1, 3, 5, 10, 15, 30, 60, 240).
    Minutes(u32),
    Day,
    Week,
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interval::Minutes(n) => write!(f, "minute{n}"),
            Interval::Day => write!(f, "day"),
            Interval::Week => write!(f, "week"),
        }
    }
}

impl FromStr for Interval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "day" | "days" | "1d" => Ok(Interval::Day),
            "week" | "weeks" | "1w" => Ok(Interval::Week),
            other => {
                let minutes = other
                    .strip_prefix("minute")
                    .and_then(|n| n.parse::<u32>().ok())
                    .filter(|n| [1, 3, 5, 10, 15, 30, 60, 240].contains(n));
                minutes
                    .map(Interval::Minutes)
                    .ok_or_else(|| anyhow::anyhow!("Unsupported candle interval: {s}"))
            }
        }
    }
}

/// One OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// A recent news headline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub date: String,
}

/// Account balances and the current price of the base asset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Balances {
    /// Base-asset holdings (BTC).
    pub base: Decimal,
    /// Quote-currency holdings (KRW).
    pub quote: Decimal,
    /// Price of one unit of base in quote currency.
    pub price: Decimal,
}

impl Balances {
    /// Total account value in quote currency.
    pub fn total_value(&self) -> Decimal {
        self.quote + self.base * self.price
    }
}

impl fmt::Display for Balances {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "base={} quote={:.0} price={:.0} total={:.0}",
            self.base.normalize(),
            self.quote,
            self.price,
            self.total_value(),
        )
    }
}

/// Everything one cycle knows about the market, collected fresh and
/// discarded when the cycle ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub pair: AssetPair,
    pub short_term: Vec<Candle>,
    pub mid_term: Vec<Candle>,
    pub long_term: Vec<Candle>,
    pub news: Vec<NewsItem>,
    pub balances: Balances,
    pub collected_at: DateTime<Utc>,
}

impl fmt::Display for MarketSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} candles={}/{}/{} news={} | {}",
            self.pair,
            self.short_term.len(),
            self.mid_term.len(),
            self.long_term.len(),
            self.news.len(),
            self.balances,
        )
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// What the oracle wants done this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "buy",
            Action::Sell => "sell",
            Action::Hold => "hold",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(Action::Buy),
            "sell" => Ok(Action::Sell),
            "hold" => Ok(Action::Hold),
            _ => Err(anyhow::anyhow!("Unknown action: {s}")),
        }
    }
}

/// A validated oracle decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    /// Share of the configured order range to use, 0–100.
    pub percentage: u8,
    pub reason: String,
}

impl Decision {
    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            action: Action::Hold,
            percentage: 0,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}% ({})",
            self.action.as_str().to_uppercase(),
            self.percentage,
            self.reason
        )
    }
}

// ---------------------------------------------------------------------------
// Trade record
// ---------------------------------------------------------------------------

/// One completed cycle, as persisted in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Row id; `None` until the ledger has stored it.
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub decision: Action,
    /// Requested percentage if the order executed, otherwise 0.
    pub percentage: u8,
    pub reason: String,
    pub base_balance: Decimal,
    pub quote_balance: Decimal,
    pub price: Decimal,
}

impl TradeRecord {
    pub fn new(decision: &Decision, percentage: u8, balances: &Balances) -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
            decision: decision.action,
            percentage,
            reason: decision.reason.clone(),
            base_balance: balances.base,
            quote_balance: balances.quote,
            price: balances.price,
        }
    }

    /// Account value in quote currency at the time of the record.
    pub fn portfolio_value(&self) -> Decimal {
        self.quote_balance + self.base_balance * self.price
    }
}

impl fmt::Display for TradeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}% | base={} quote={:.0} @ {:.0} | {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.decision.as_str().to_uppercase(),
            self.percentage,
            self.base_balance.normalize(),
            self.quote_balance,
            self.price,
            self.reason,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failure classes of a trading cycle.
///
/// `DataUnavailable`, `OracleContractViolation` and `OracleUnavailable` abort
/// the cycle before anything is written. `SizingRejected` and
/// `ExecutionFailed` still produce a ledger row with percentage 0.
/// `NotifierFailed` is only ever logged.
#[derive(Debug, thiserror::Error)]
pub enum TradeError {
    #[error("DataUnavailable: {0}")]
    DataUnavailable(String),

    #[error("OracleContractViolation: {0}")]
    OracleContractViolation(String),

    #[error("OracleUnavailable: {0}")]
    OracleUnavailable(String),

    #[error("SizingRejected: {0}")]
    SizingRejected(#[from] SizingRejection),

    #[error("ExecutionFailed: {0}")]
    ExecutionFailed(#[from] ExchangeError),

    #[error("NotifierFailed: {0}")]
    NotifierFailed(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl TradeError {
    /// Short failure-class label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            TradeError::DataUnavailable(_) => "DataUnavailable",
            TradeError::OracleContractViolation(_) => "OracleContractViolation",
            TradeError::OracleUnavailable(_) => "OracleUnavailable",
            TradeError::SizingRejected(_) => "SizingRejected",
            TradeError::ExecutionFailed(_) => "ExecutionFailed",
            TradeError::NotifierFailed(_) => "NotifierFailed",
            TradeError::Ledger(_) => "Ledger",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
