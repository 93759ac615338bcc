//! Exchange integration.
//!
//! Defines the `ExchangeClient` trait the cycle trades through and the
//! typed `ExchangeError` every primitive fails with. The Bithumb REST
//! client is the production implementation.

pub mod bithumb;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{AssetPair, Candle, Interval};

/// Errors raised by exchange primitives.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Exchange API error {status} ({name}): {message}")]
    Api {
        status: u16,
        name: String,
        message: String,
    },

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("Failed to decode exchange response: {0}")]
    Decode(String),

    #[error("Request signing failed: {0}")]
    Auth(String),

    #[error("Exchange call timed out after {0}s")]
    Timeout(u64),
}

/// Which way an order went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Acknowledgement returned when a market order is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub side: OrderSide,
    /// Quote amount for buys, base quantity for sells.
    pub amount: Decimal,
    pub state: String,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for OrderReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}] state={}",
            self.side,
            self.amount.normalize(),
            self.order_id,
            self.state
        )
    }
}

/// Abstraction over a spot exchange.
///
/// Market orders are not idempotent; callers must never retry
/// `place_market_buy` / `place_market_sell` blindly.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Available balance of one asset (0 when the account holds none).
    async fn get_balance(&self, asset: &str) -> Result<Decimal, ExchangeError>;

    /// Last traded price of the pair's base asset in quote currency.
    async fn get_current_price(&self, pair: &AssetPair) -> Result<Decimal, ExchangeError>;

    /// The most recent `count` candles, oldest first.
    async fn get_ohlcv(
        &self,
        pair: &AssetPair,
        interval: Interval,
        count: u32,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Spend `quote_amount` of quote currency on base at market.
    async fn place_market_buy(
        &self,
        pair: &AssetPair,
        quote_amount: Decimal,
    ) -> Result<OrderReceipt, ExchangeError>;

    /// Sell `base_quantity` of base at market.
    async fn place_market_sell(
        &self,
        pair: &AssetPair,
        base_quantity: Decimal,
    ) -> Result<OrderReceipt, ExchangeError>;

    /// Exchange name for logging.
    fn name(&self) -> &'static str;
}
