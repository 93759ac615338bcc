//! Execution engine.
//!
//! Places at most one market order per cycle, waits for the exchange to
//! settle, re-reads balances and writes exactly one ledger record. Orders
//! are never retried: market orders are not idempotent, and the next
//! scheduled cycle is the retry.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::collector::{read_balances, with_timeout};
use crate::exchange::{ExchangeClient, OrderReceipt};
use crate::storage::TradeLedger;
use crate::strategy::sizing::{OrderSize, SizingRejection};
use crate::types::{Action, AssetPair, Balances, Decision, TradeError, TradeRecord};

/// A hold is a completed non-action, so it counts as executed and keeps
/// its requested percentage in the ledger.
pub const HOLD_COUNTS_AS_EXECUTED: bool = true;

// ---------------------------------------------------------------------------
// Execution result
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ExecutionOutcome {
    pub executed: bool,
    /// Why a buy/sell did not execute (`SizingRejected` or `ExecutionFailed`).
    pub error: Option<TradeError>,
    pub receipt: Option<OrderReceipt>,
    /// The ledger row written for this cycle.
    pub record: TradeRecord,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub pair: AssetPair,
    /// Pause between order submission and the balance re-read.
    pub settlement_wait: Duration,
    pub call_timeout: Duration,
    /// Log orders instead of placing them.
    pub dry_run: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pair: AssetPair::new("KRW", "BTC"),
            settlement_wait: Duration::from_secs(1),
            call_timeout: Duration::from_secs(30),
            dry_run: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct Executor {
    exchange: Arc<dyn ExchangeClient>,
    ledger: Arc<TradeLedger>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        ledger: Arc<TradeLedger>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            exchange,
            ledger,
            config,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    /// Carry out `decision` with its sized order (or sizing rejection) and
    /// record the cycle. `snapshot` is written if the post-trade read fails.
    ///
    /// Only a ledger failure is returned as `Err`; order failures are
    /// reported in the outcome.
    pub async fn execute(
        &self,
        decision: &Decision,
        sized: Result<OrderSize, SizingRejection>,
        snapshot: &Balances,
    ) -> Result<ExecutionOutcome, TradeError> {
        let mut submitted = false;

        let (executed, error, receipt) = match sized {
            Err(rejection) => {
                warn!(action = %decision.action, reason = %rejection, "Order not placed");
                (false, Some(TradeError::SizingRejected(rejection)), None)
            }
            Ok(OrderSize::None) => {
                let executed = decision.action == Action::Hold && HOLD_COUNTS_AS_EXECUTED;
                info!(action = %decision.action, "No order to place");
                (executed, None, None)
            }
            Ok(size) if self.config.dry_run => {
                info!(
                    pair = %self.config.pair,
                    order = %size,
                    "[DRY RUN] Would place market order"
                );
                (true, None, None)
            }
            Ok(size) => {
                submitted = true;
                match self.place(size).await {
                    Ok(None) => (false, None, None),
                    Ok(Some(receipt)) => {
                        info!(
                            exchange = self.exchange.name(),
                            receipt = %receipt,
                            "Order accepted"
                        );
                        (true, None, Some(receipt))
                    }
                    Err(e) => {
                        error!(
                            exchange = self.exchange.name(),
                            order = %size,
                            error = %e,
                            "Order failed — not retrying"
                        );
                        (false, Some(e), None)
                    }
                }
            }
        };

        if submitted && !self.config.settlement_wait.is_zero() {
            tokio::time::sleep(self.config.settlement_wait).await;
        }

        let balances = match read_balances(
            &*self.exchange,
            &self.config.pair,
            self.config.call_timeout,
        )
        .await
        {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "Post-trade balance read failed — recording pre-trade balances");
                *snapshot
            }
        };

        let percentage = if executed { decision.percentage } else { 0 };
        let record = self
            .ledger
            .append(&TradeRecord::new(decision, percentage, &balances))
            .await?;

        Ok(ExecutionOutcome {
            executed,
            error,
            receipt,
            record,
        })
    }

    /// Submit exactly one order. `Ok(None)` for a zero-size order.
    async fn place(&self, size: OrderSize) -> Result<Option<OrderReceipt>, TradeError> {
        let pair = &self.config.pair;
        let call = match size {
            OrderSize::Buy { quote_amount } => self.exchange.place_market_buy(pair, quote_amount),
            OrderSize::Sell { base_quantity, .. } => {
                self.exchange.place_market_sell(pair, base_quantity)
            }
            OrderSize::None => return Ok(None),
        };
        with_timeout(self.config.call_timeout, call)
            .await
            .map(Some)
            .map_err(TradeError::ExecutionFailed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
