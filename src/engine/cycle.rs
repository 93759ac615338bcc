//! One trading cycle: collect → decide → size → execute → persist.
//!
//! Failures before execution (data, history, oracle) abort the cycle with
//! no ledger write. From sizing onward the cycle always ends with exactly
//! one ledger record. The notifier hears about each step.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::collector::SnapshotCollector;
use super::executor::{ExecutionOutcome, Executor};
use super::scheduler::Cycle;
use crate::llm::DecisionOracle;
use crate::notify::{notify_best_effort, Notifier};
use crate::storage::TradeLedger;
use crate::strategy::sizing::{OrderSize, SizingPolicy};
use crate::types::{Decision, MarketSnapshot, TradeError, TradeRecord};

#[derive(Debug, Clone)]
pub struct CycleConfig {
    /// Number of recent ledger rows shown to the oracle.
    pub history_window: usize,
    /// Deadline for the oracle call.
    pub oracle_timeout: Duration,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            history_window: 5,
            oracle_timeout: Duration::from_secs(120),
        }
    }
}

/// What a completed cycle did.
#[derive(Debug)]
pub struct CycleReport {
    pub decision: Decision,
    /// `None` when sizing rejected the order.
    pub order: Option<OrderSize>,
    pub executed: bool,
    /// Failure class and message of a rejected or failed order.
    pub failure: Option<String>,
    pub record: TradeRecord,
}

impl CycleReport {
    fn from_outcome(decision: Decision, order: Option<OrderSize>, outcome: ExecutionOutcome) -> Self {
        Self {
            decision,
            order,
            executed: outcome.executed,
            failure: outcome.error.map(|e| e.to_string()),
            record: outcome.record,
        }
    }
}

pub struct TradingCycle {
    collector: SnapshotCollector,
    oracle: Arc<dyn DecisionOracle>,
    sizing: SizingPolicy,
    executor: Executor,
    ledger: Arc<TradeLedger>,
    notifier: Arc<dyn Notifier>,
    config: CycleConfig,
}

impl TradingCycle {
    pub fn new(
        collector: SnapshotCollector,
        oracle: Arc<dyn DecisionOracle>,
        sizing: SizingPolicy,
        executor: Executor,
        ledger: Arc<TradeLedger>,
        notifier: Arc<dyn Notifier>,
        config: CycleConfig,
    ) -> Self {
        Self {
            collector,
            oracle,
            sizing,
            executor,
            ledger,
            notifier,
            config,
        }
    }

    async fn abort(&self, e: TradeError) -> TradeError {
        error!(kind = e.kind(), error = %e, "Cycle aborted before execution");
        notify_best_effort(&*self.notifier, &format!("Cycle aborted ({}): {e}", e.kind())).await;
        e
    }

    /// Collect, load history and consult the oracle.
    async fn gather_decision(&self) -> Result<(Decision, MarketSnapshot), TradeError> {
        let snapshot = self.collector.collect().await?;
        let recent = self.ledger.recent(self.config.history_window).await?;

        let decision = match tokio::time::timeout(
            self.config.oracle_timeout,
            self.oracle.decide(&snapshot, &recent),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(TradeError::OracleUnavailable(format!(
                    "{} timed out after {}s",
                    self.oracle.model_name(),
                    self.config.oracle_timeout.as_secs()
                )))
            }
        };
        Ok((decision, snapshot))
    }

    /// Run the full pipeline once.
    pub async fn run(&self) -> Result<CycleReport, TradeError> {
        let pair = self.collector.pair().clone();
        info!(pair = %pair, dry_run = self.executor.is_dry_run(), "Starting cycle");
        notify_best_effort(&*self.notifier, &format!("Trading cycle started for {pair}")).await;

        let (decision, snapshot) = match self.gather_decision().await {
            Ok(v) => v,
            Err(e) => return Err(self.abort(e).await),
        };
        notify_best_effort(&*self.notifier, &format!("Decision: {decision}")).await;

        let sized = self.sizing.size(&decision, &snapshot.balances);
        match &sized {
            Ok(size) => {
                info!(action = %decision.action, order = %size, "Order sized");
                if !size.is_zero() {
                    notify_best_effort(&*self.notifier, &format!("Sized order: {size}")).await;
                }
            }
            Err(rejection) => {
                warn!(kind = "SizingRejected", reason = %rejection, "Order rejected by sizing");
                notify_best_effort(&*self.notifier, &format!("Order rejected: {rejection}")).await;
            }
        }
        let order = sized.as_ref().ok().copied();

        let outcome = self
            .executor
            .execute(&decision, sized, &snapshot.balances)
            .await?;

        if let Some(e) = &outcome.error {
            warn!(kind = e.kind(), error = %e, "Cycle completed without an order");
        }
        let result_text = match (&outcome.receipt, &outcome.error) {
            (Some(receipt), _) => format!("Order executed: {receipt}"),
            (None, Some(e)) => format!("Order not executed ({}): {e}", e.kind()),
            (None, None) => format!("{} recorded", decision.action.as_str().to_uppercase()),
        };
        notify_best_effort(
            &*self.notifier,
            &format!("{result_text}\nBalances: {}", self.record_balances(&outcome.record)),
        )
        .await;

        match self.ledger.performance().await {
            Ok(Some(perf)) => info!(performance = %perf, "Ledger performance"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Could not compute performance"),
        }

        let report = CycleReport::from_outcome(decision, order, outcome);
        info!(
            action = %report.decision.action,
            pct = report.record.percentage,
            executed = report.executed,
            record_id = report.record.id,
            "Cycle complete"
        );
        Ok(report)
    }

    fn record_balances(&self, record: &TradeRecord) -> String {
        let pair = self.collector.pair();
        format!(
            "{} {} | {} {:.0} @ {:.0}",
            pair.base,
            record.base_balance.normalize(),
            pair.quote,
            record.quote_balance,
            record.price
        )
    }
}

#[async_trait]
impl Cycle for TradingCycle {
    async fn run(&self) -> Result<CycleReport, TradeError> {
        TradingCycle::run(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::news::DisabledNews;
    use crate::engine::collector::CollectorConfig;
    use crate::engine::executor::ExecutorConfig;
    use crate::exchange::testing::funded_exchange;
    use crate::notify::LogNotifier;
    use crate::strategy::SizingConfig;
    use crate::types::Candle;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    /// Never answers within any reasonable deadline.
    struct StalledOracle;

    #[async_trait]
    impl DecisionOracle for StalledOracle {
        async fn decide(
            &self,
            _snapshot: &MarketSnapshot,
            _recent: &[TradeRecord],
        ) -> Result<Decision, TradeError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Decision::hold("too late"))
        }

        fn model_name(&self) -> &str {
            "stalled"
        }
    }

    fn candle() -> Candle {
        Candle {
            timestamp: Utc::now(),
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100),
            volume: dec!(1),
        }
    }

    #[tokio::test]
    async fn test_stalled_oracle_is_unavailable_and_writes_nothing() {
        let mut ex = funded_exchange(dec!(0.01), dec!(100000), dec!(100000000));
        ex.expect_get_ohlcv()
            .times(3)
            .returning(|_, _, count| Ok(vec![candle(); count as usize]));
        // No place_* expectation: an order attempt would panic the mock.
        let exchange = Arc::new(ex);
        let ledger = Arc::new(TradeLedger::open_in_memory().await.unwrap());

        let cycle = TradingCycle::new(
            SnapshotCollector::new(exchange.clone(), Arc::new(DisabledNews), CollectorConfig::default()),
            Arc::new(StalledOracle),
            SizingPolicy::new(SizingConfig::default()),
            Executor::new(exchange, ledger.clone(), ExecutorConfig::default()),
            ledger.clone(),
            Arc::new(LogNotifier),
            CycleConfig {
                oracle_timeout: Duration::from_millis(50),
                ..CycleConfig::default()
            },
        );

        let err = tokio::time::timeout(Duration::from_secs(10), cycle.run())
            .await
            .expect("oracle deadline enforced")
            .unwrap_err();

        assert!(matches!(err, TradeError::OracleUnavailable(_)), "got {err}");
        assert!(err.to_string().contains("timed out"));
        assert_eq!(ledger.count().await.unwrap(), 0);
    }
}
