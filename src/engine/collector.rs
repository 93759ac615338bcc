//! Market snapshot collector.
//!
//! Gathers the three candle series, balances, price and headlines a cycle
//! decides on. Exchange data is mandatory: any failure or timeout is
//! `DataUnavailable` and aborts the cycle. News is optional and degrades
//! to an empty list.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::data::{fetch_news, NewsQuery, NewsSource};
use crate::exchange::{ExchangeClient, ExchangeError};
use crate::types::{AssetPair, Balances, Candle, Interval, MarketSnapshot, TradeError};

/// One candle series to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesSpec {
    pub interval: Interval,
    pub count: u32,
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub pair: AssetPair,
    pub short_term: SeriesSpec,
    pub mid_term: SeriesSpec,
    pub long_term: SeriesSpec,
    pub news: NewsQuery,
    /// Upper bound on every individual external call.
    pub call_timeout: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            pair: AssetPair::new("KRW", "BTC"),
            short_term: SeriesSpec {
                interval: Interval::Minutes(60),
                count: 24,
            },
            mid_term: SeriesSpec {
                interval: Interval::Minutes(240),
                count: 30,
            },
            long_term: SeriesSpec {
                interval: Interval::Day,
                count: 30,
            },
            news: NewsQuery::default(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Await an exchange call, turning an elapsed deadline into
/// `ExchangeError::Timeout`.
pub async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, ExchangeError>
where
    F: Future<Output = Result<T, ExchangeError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ExchangeError::Timeout(timeout.as_secs())),
    }
}

/// Read base and quote balances plus the current price.
pub async fn read_balances(
    exchange: &dyn ExchangeClient,
    pair: &AssetPair,
    timeout: Duration,
) -> Result<Balances, ExchangeError> {
    let quote = with_timeout(timeout, exchange.get_balance(&pair.quote)).await?;
    let base = with_timeout(timeout, exchange.get_balance(&pair.base)).await?;
    let price = with_timeout(timeout, exchange.get_current_price(pair)).await?;
    Ok(Balances { base, quote, price })
}

pub struct SnapshotCollector {
    exchange: Arc<dyn ExchangeClient>,
    news: Arc<dyn NewsSource>,
    config: CollectorConfig,
}

impl SnapshotCollector {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        news: Arc<dyn NewsSource>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            exchange,
            news,
            config,
        }
    }

    pub fn pair(&self) -> &AssetPair {
        &self.config.pair
    }

    async fn series(&self, label: &str, spec: SeriesSpec) -> Result<Vec<Candle>, TradeError> {
        let candles = with_timeout(
            self.config.call_timeout,
            self.exchange.get_ohlcv(&self.config.pair, spec.interval, spec.count),
        )
        .await
        .map_err(|e| TradeError::DataUnavailable(format!("{label} {} candles: {e}", spec.interval)))?;

        if candles.is_empty() {
            return Err(TradeError::DataUnavailable(format!(
                "{label} {} candles: empty series",
                spec.interval
            )));
        }
        debug!(series = label, interval = %spec.interval, count = candles.len(), "Candles fetched");
        Ok(candles)
    }

    /// Build a fresh snapshot for this cycle.
    pub async fn collect(&self) -> Result<MarketSnapshot, TradeError> {
        let short_term = self.series("short-term", self.config.short_term).await?;
        let mid_term = self.series("mid-term", self.config.mid_term).await?;
        let long_term = self.series("long-term", self.config.long_term).await?;

        let balances = read_balances(&*self.exchange, &self.config.pair, self.config.call_timeout)
            .await
            .map_err(|e| TradeError::DataUnavailable(format!("balances: {e}")))?;

        let news = fetch_news(&*self.news, &self.config.news, self.config.call_timeout).await;

        let snapshot = MarketSnapshot {
            pair: self.config.pair.clone(),
            short_term,
            mid_term,
            long_term,
            news,
            balances,
            collected_at: Utc::now(),
        };
        info!(
            exchange = self.exchange.name(),
            snapshot = %snapshot,
            "Market snapshot collected"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::news::DisabledNews;
    use crate::exchange::testing::{funded_exchange, MockExchange};
    use rust_decimal_macros::dec;

    fn candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle {
                timestamp: Utc::now() - chrono::Duration::hours(i as i64),
                open: dec!(100),
                high: dec!(101),
                low: dec!(99),
                close: dec!(100),
                volume: dec!(1),
            })
            .collect()
    }

    fn collector(exchange: MockExchange) -> SnapshotCollector {
        SnapshotCollector::new(
            Arc::new(exchange),
            Arc::new(DisabledNews),
            CollectorConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_collect_requests_configured_series() {
        let mut ex = funded_exchange(dec!(0.1), dec!(500000), dec!(90000000));
        ex.expect_get_ohlcv()
            .withf(|pair, interval, count| {
                pair.market() == "KRW-BTC"
                    && matches!(
                        (*interval, *count),
                        (Interval::Minutes(60), 24) | (Interval::Minutes(240), 30) | (Interval::Day, 30)
                    )
            })
            .times(3)
            .returning(|_, _, count| Ok(candles(count as usize)));

        let snap = collector(ex).collect().await.unwrap();
        assert_eq!(snap.short_term.len(), 24);
        assert_eq!(snap.mid_term.len(), 30);
        assert_eq!(snap.long_term.len(), 30);
        assert!(snap.news.is_empty());
        assert_eq!(snap.balances.quote, dec!(500000));
        assert_eq!(snap.balances.base, dec!(0.1));
        assert_eq!(snap.balances.price, dec!(90000000));
    }

    #[tokio::test]
    async fn test_series_failure_is_data_unavailable() {
        let mut ex = funded_exchange(dec!(0), dec!(0), dec!(1));
        ex.expect_get_ohlcv()
            .returning(|_, _, _| Err(ExchangeError::Decode("bad candle".into())));

        let err = collector(ex).collect().await.unwrap_err();
        assert!(matches!(err, TradeError::DataUnavailable(_)));
    }

    #[tokio::test]
    async fn test_empty_series_is_data_unavailable() {
        let mut ex = funded_exchange(dec!(0), dec!(0), dec!(1));
        ex.expect_get_ohlcv().returning(|_, _, _| Ok(Vec::new()));
        let err = collector(ex).collect().await.unwrap_err();
        assert!(err.to_string().contains("empty series"));
    }

    #[tokio::test]
    async fn test_price_failure_is_data_unavailable() {
        let mut ex = MockExchange::new();
        ex.expect_get_ohlcv().returning(|_, _, c| Ok(candles(c as usize)));
        ex.expect_get_balance().returning(|_| Ok(dec!(1)));
        ex.expect_get_current_price().returning(|_| {
            Err(ExchangeError::Api {
                status: 503,
                name: "unavailable".into(),
                message: "maintenance".into(),
            })
        });
        ex.expect_name().return_const("mock");

        let err = collector(ex).collect().await.unwrap_err();
        assert_eq!(err.kind(), "DataUnavailable");
        assert!(err.to_string().contains("balances"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_maps_elapsed() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(120)).await;
            Ok::<_, ExchangeError>(1)
        };
        let err = with_timeout(Duration::from_secs(5), slow).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Timeout(5)));
    }
}
