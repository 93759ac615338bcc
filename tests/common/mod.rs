//! Shared fakes for integration testing.
//!
//! A deterministic in-memory exchange, a scripted oracle that replies with
//! raw JSON text, and a notifier that records every message. Nothing here
//! touches the network.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use autotrade::data::news::DisabledNews;
use autotrade::engine::collector::{CollectorConfig, SnapshotCollector};
use autotrade::engine::executor::{Executor, ExecutorConfig};
use autotrade::engine::{CycleConfig, TradingCycle};
use autotrade::exchange::{ExchangeClient, ExchangeError, OrderReceipt, OrderSide};
use autotrade::llm::contract::parse_decision;
use autotrade::llm::DecisionOracle;
use autotrade::notify::Notifier;
use autotrade::storage::TradeLedger;
use autotrade::strategy::{SizingConfig, SizingPolicy};
use autotrade::types::{
    AssetPair, Balances, Candle, Decision, Interval, MarketSnapshot, TradeError, TradeRecord,
};

pub const PRICE: Decimal = dec!(100000000);

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

/// Which exchange primitive should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Candles,
    Balance,
    Sell,
    Buy,
}

/// In-memory exchange. Fills market orders instantly at the fixed price.
pub struct FakeExchange {
    balances: Mutex<Balances>,
    fee_rate: Decimal,
    faults: Mutex<Vec<Fault>>,
    /// Every order call, e.g. `buy 15045.13`.
    orders: Mutex<Vec<String>>,
}

impl FakeExchange {
    pub fn new(base: Decimal, quote: Decimal) -> Self {
        Self {
            balances: Mutex::new(Balances {
                base,
                quote,
                price: PRICE,
            }),
            fee_rate: dec!(0.003),
            faults: Mutex::new(Vec::new()),
            orders: Mutex::new(Vec::new()),
        }
    }

    pub fn fail(&self, fault: Fault) {
        self.faults.lock().unwrap().push(fault);
    }

    pub fn orders(&self) -> Vec<String> {
        self.orders.lock().unwrap().clone()
    }

    pub fn balances(&self) -> Balances {
        *self.balances.lock().unwrap()
    }

    fn faulty(&self, fault: Fault) -> bool {
        self.faults.lock().unwrap().contains(&fault)
    }

    fn receipt(side: OrderSide, amount: Decimal) -> OrderReceipt {
        OrderReceipt {
            order_id: uuid::Uuid::new_v4().to_string(),
            side,
            amount,
            state: "done".to_string(),
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl ExchangeClient for FakeExchange {
    async fn get_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        if self.faulty(Fault::Balance) {
            return Err(ExchangeError::Decode("balance unavailable".into()));
        }
        let b = self.balances.lock().unwrap();
        Ok(if asset == "BTC" { b.base } else { b.quote })
    }

    async fn get_current_price(&self, _pair: &AssetPair) -> Result<Decimal, ExchangeError> {
        Ok(self.balances.lock().unwrap().price)
    }

    async fn get_ohlcv(
        &self,
        _pair: &AssetPair,
        _interval: Interval,
        count: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        if self.faulty(Fault::Candles) {
            return Err(ExchangeError::Api {
                status: 503,
                name: "service_unavailable".into(),
                message: "maintenance".into(),
            });
        }
        let now = Utc::now();
        Ok((0..count)
            .rev()
            .map(|i| Candle {
                timestamp: now - ChronoDuration::hours(i as i64),
                open: PRICE,
                high: PRICE + dec!(1000),
                low: PRICE - dec!(1000),
                close: PRICE,
                volume: dec!(1.5),
            })
            .collect())
    }

    async fn place_market_buy(
        &self,
        _pair: &AssetPair,
        quote_amount: Decimal,
    ) -> Result<OrderReceipt, ExchangeError> {
        self.orders
            .lock()
            .unwrap()
            .push(format!("buy {}", quote_amount.round_dp(2)));
        if self.faulty(Fault::Buy) {
            return Err(ExchangeError::InsufficientBalance("KRW".into()));
        }
        let mut b = self.balances.lock().unwrap();
        if quote_amount > b.quote {
            return Err(ExchangeError::InsufficientBalance("KRW".into()));
        }
        b.quote -= quote_amount;
        let price = b.price;
        b.base += quote_amount * (Decimal::ONE - self.fee_rate) / price;
        Ok(Self::receipt(OrderSide::Buy, quote_amount))
    }

    async fn place_market_sell(
        &self,
        _pair: &AssetPair,
        base_quantity: Decimal,
    ) -> Result<OrderReceipt, ExchangeError> {
        self.orders
            .lock()
            .unwrap()
            .push(format!("sell {}", base_quantity.round_dp(8)));
        let mut b = self.balances.lock().unwrap();
        if self.faulty(Fault::Sell) || base_quantity > b.base {
            return Err(ExchangeError::InsufficientBalance("BTC".into()));
        }
        b.base -= base_quantity;
        let price = b.price;
        b.quote += base_quantity * price * (Decimal::ONE - self.fee_rate);
        Ok(Self::receipt(OrderSide::Sell, base_quantity))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

/// Replies with queued raw texts, run through the real contract parser.
/// An empty queue means the oracle is unreachable.
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<String>>,
    /// Length of the history passed on each call.
    seen_history: Mutex<Vec<usize>>,
}

impl ScriptedOracle {
    pub fn new<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            seen_history: Mutex::new(Vec::new()),
        }
    }

    pub fn seen_history(&self) -> Vec<usize> {
        self.seen_history.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn decide(
        &self,
        _snapshot: &MarketSnapshot,
        recent: &[TradeRecord],
    ) -> Result<Decision, TradeError> {
        self.seen_history.lock().unwrap().push(recent.len());
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(raw) => parse_decision(&raw),
            None => Err(TradeError::OracleUnavailable("connection refused".into())),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> Result<(), TradeError> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Harness {
    pub cycle: TradingCycle,
    pub exchange: Arc<FakeExchange>,
    pub oracle: Arc<ScriptedOracle>,
    pub notifier: Arc<RecordingNotifier>,
    pub ledger: Arc<TradeLedger>,
}

/// Wire a full cycle around the fakes with the standard sizing setup.
pub async fn harness(exchange: FakeExchange, oracle: ScriptedOracle) -> Harness {
    let exchange = Arc::new(exchange);
    let oracle = Arc::new(oracle);
    let notifier = Arc::new(RecordingNotifier::default());
    let ledger = Arc::new(TradeLedger::open_in_memory().await.unwrap());

    let call_timeout = Duration::from_secs(5);
    let collector = SnapshotCollector::new(
        exchange.clone(),
        Arc::new(DisabledNews),
        CollectorConfig {
            call_timeout,
            ..CollectorConfig::default()
        },
    );
    let executor = Executor::new(
        exchange.clone(),
        ledger.clone(),
        ExecutorConfig {
            settlement_wait: Duration::ZERO,
            call_timeout,
            ..ExecutorConfig::default()
        },
    );
    let cycle = TradingCycle::new(
        collector,
        oracle.clone(),
        SizingPolicy::new(SizingConfig::default()),
        executor,
        ledger.clone(),
        notifier.clone(),
        CycleConfig::default(),
    );

    Harness {
        cycle,
        exchange,
        oracle,
        notifier,
        ledger,
    }
}
