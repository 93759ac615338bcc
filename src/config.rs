//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at startup into `SecretString`s. Every section has defaults,
//! so a missing section means "use the standard setup".

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::data::NewsQuery;
use crate::engine::collector::{CollectorConfig, SeriesSpec};
use crate::engine::executor::ExecutorConfig;
use crate::engine::{CycleConfig, TriggerSchedule};
use crate::llm::openai::Provider;
use crate::storage::DEFAULT_LEDGER_FILE;
use crate::strategy::sizing::SizingConfig;
use crate::types::{AssetPair, Interval};

/// Environment variable that overrides the config path.
pub const CONFIG_PATH_ENV: &str = "AUTOTRADE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Candle endpoints cap a single request at this many rows.
const MAX_SERIES_COUNT: u32 = 200;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub market: MarketConfig,
    pub sizing: SizingSection,
    pub exchange: ExchangeConfig,
    pub llm: LlmConfig,
    pub news: NewsConfig,
    pub notifier: NotifierConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    /// Local times of day (`HH:MM`) at which a cycle fires.
    pub triggers: Vec<String>,
    pub poll_interval_secs: u64,
    /// Deadline for each exchange and news call.
    pub call_timeout_secs: u64,
    pub settlement_wait_secs: u64,
    pub dry_run: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "AUTOTRADE-001".to_string(),
            triggers: vec!["09:00".into(), "15:00".into(), "21:00".into()],
            poll_interval_secs: 60,
            call_timeout_secs: 30,
            settlement_wait_secs: 1,
            dry_run: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SeriesConfig {
    /// `minuteN`, `day` or `week`.
    pub interval: String,
    pub count: u32,
}

impl SeriesConfig {
    fn new(interval: &str, count: u32) -> Self {
        Self {
            interval: interval.to_string(),
            count,
        }
    }

    fn to_spec(&self, label: &str) -> Result<SeriesSpec> {
        let interval: Interval = self
            .interval
            .parse()
            .with_context(|| format!("market.{label}.interval"))?;
        if self.count == 0 || self.count > MAX_SERIES_COUNT {
            anyhow::bail!(
                "market.{label}.count must be in 1..={MAX_SERIES_COUNT}, got {}",
                self.count
            );
        }
        Ok(SeriesSpec {
            interval,
            count: self.count,
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarketConfig {
    /// `QUOTE-BASE`, e.g. `KRW-BTC`.
    pub pair: String,
    /// Recent ledger rows shown to the oracle.
    pub history_window: usize,
    pub short_term: SeriesConfig,
    pub mid_term: SeriesConfig,
    pub long_term: SeriesConfig,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            pair: "KRW-BTC".to_string(),
            history_window: 5,
            short_term: SeriesConfig::new("minute60", 24),
            mid_term: SeriesConfig::new("minute240", 30),
            long_term: SeriesConfig::new("day", 30),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SizingSection {
    pub min_order: Decimal,
    pub max_order: Decimal,
    pub fee_rate: Decimal,
    pub min_notional: Decimal,
}

impl Default for SizingSection {
    fn default() -> Self {
        Self {
            min_order: dec!(10000),
            max_order: dec!(20000),
            fee_rate: dec!(0.003),
            min_notional: dec!(5000),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExchangeConfig {
    pub access_key_env: String,
    pub secret_key_env: String,
    /// Override for testing against a local stub.
    pub base_url: Option<String>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            access_key_env: "BITHUMB_ACCESS_KEY".to_string(),
            secret_key_env: "BITHUMB_SECRET_KEY".to_string(),
            base_url: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key_env: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens: 1024,
            timeout_secs: 120,
            base_url: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NewsConfig {
    pub enabled: bool,
    pub api_key_env: String,
    pub query: String,
    pub region: String,
    pub language: String,
    pub limit: usize,
}

impl Default for NewsConfig {
    fn default() -> Self {
        let q = NewsQuery::default();
        Self {
            enabled: true,
            api_key_env: "SERPAPI_API_KEY".to_string(),
            query: q.query,
            region: q.region,
            language: q.language,
            limit: q.limit,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NotifierConfig {
    pub telegram_bot_token_env: Option<String>,
    pub telegram_chat_id_env: Option<String>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token_env: Some("TELEGRAM_BOT_TOKEN".to_string()),
            telegram_chat_id_env: Some("TELEGRAM_CHAT_ID".to_string()),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_LEDGER_FILE.to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent settings before anything touches the network.
    pub fn validate(&self) -> Result<()> {
        self.pair()?;
        self.schedule()?;
        self.collector_series()?;

        if self.market.history_window == 0 {
            anyhow::bail!("market.history_window must be at least 1");
        }
        if self.agent.poll_interval_secs == 0 {
            anyhow::bail!("agent.poll_interval_secs must be at least 1");
        }
        if self.agent.call_timeout_secs == 0 {
            anyhow::bail!("agent.call_timeout_secs must be at least 1");
        }

        let s = &self.sizing;
        if s.min_order < Decimal::ZERO || s.min_notional < Decimal::ZERO {
            anyhow::bail!("sizing amounts must not be negative");
        }
        if s.min_order > s.max_order {
            anyhow::bail!(
                "sizing.min_order ({}) exceeds sizing.max_order ({})",
                s.min_order,
                s.max_order
            );
        }
        if s.fee_rate < Decimal::ZERO || s.fee_rate >= Decimal::ONE {
            anyhow::bail!("sizing.fee_rate must be in [0, 1), got {}", s.fee_rate);
        }
        let largest_order = s.max_order / (Decimal::ONE - s.fee_rate);
        if s.min_notional > largest_order {
            anyhow::bail!(
                "sizing.min_notional ({}) exceeds the largest possible order ({}); every buy and sell would be rejected",
                s.min_notional,
                largest_order.round_dp(2)
            );
        }
        if self.news.limit == 0 {
            anyhow::bail!("news.limit must be at least 1");
        }
        Ok(())
    }

    pub fn pair(&self) -> Result<AssetPair> {
        self.market.pair.parse().context("market.pair")
    }

    pub fn schedule(&self) -> Result<TriggerSchedule> {
        TriggerSchedule::parse(self.agent.triggers.as_slice()).context("agent.triggers")
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.call_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.agent.poll_interval_secs)
    }

    fn collector_series(&self) -> Result<(SeriesSpec, SeriesSpec, SeriesSpec)> {
        Ok((
            self.market.short_term.to_spec("short_term")?,
            self.market.mid_term.to_spec("mid_term")?,
            self.market.long_term.to_spec("long_term")?,
        ))
    }

    pub fn news_query(&self) -> NewsQuery {
        NewsQuery {
            query: self.news.query.clone(),
            region: self.news.region.clone(),
            language: self.news.language.clone(),
            limit: self.news.limit,
        }
    }

    pub fn collector_config(&self) -> Result<CollectorConfig> {
        let (short_term, mid_term, long_term) = self.collector_series()?;
        Ok(CollectorConfig {
            pair: self.pair()?,
            short_term,
            mid_term,
            long_term,
            news: self.news_query(),
            call_timeout: self.call_timeout(),
        })
    }

    pub fn sizing_config(&self) -> SizingConfig {
        SizingConfig {
            min_order: self.sizing.min_order,
            max_order: self.sizing.max_order,
            fee_rate: self.sizing.fee_rate,
            min_notional: self.sizing.min_notional,
        }
    }

    pub fn executor_config(&self) -> Result<ExecutorConfig> {
        Ok(ExecutorConfig {
            pair: self.pair()?,
            settlement_wait: Duration::from_secs(self.agent.settlement_wait_secs),
            call_timeout: self.call_timeout(),
            dry_run: self.agent.dry_run,
        })
    }

    pub fn cycle_config(&self) -> CycleConfig {
        CycleConfig {
            history_window: self.market.history_window,
            oracle_timeout: Duration::from_secs(self.llm.timeout_secs),
        }
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve a required secret.
    pub fn resolve_secret(env_name: &str) -> Result<SecretString> {
        let value = Self::resolve_env(env_name)?;
        if value.trim().is_empty() {
            anyhow::bail!("Environment variable is empty: {env_name}");
        }
        Ok(SecretString::new(value))
    }

    /// Resolve an optional secret; unset, empty or unconfigured → `None`.
    pub fn optional_secret(env_name: Option<&str>) -> Option<SecretString> {
        let name = env_name?;
        std::env::var(name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(SecretString::new)
    }
}
