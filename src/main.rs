//! AUTOTRADE: scheduled LLM-advised spot trading agent
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the exchange, oracle, news and notifier clients into a trading
//! cycle, and runs it on the configured schedule with graceful shutdown.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

use autotrade::config::{self, AppConfig};
use autotrade::data::news::{DisabledNews, SerpApiNews};
use autotrade::data::NewsSource;
use autotrade::engine::collector::SnapshotCollector;
use autotrade::engine::executor::Executor;
use autotrade::engine::{FireResult, Scheduler, TradingCycle};
use autotrade::exchange::bithumb::BithumbClient;
use autotrade::exchange::ExchangeClient;
use autotrade::llm::openai::OpenAiOracle;
use autotrade::llm::DecisionOracle;
use autotrade::notify::telegram::TelegramNotifier;
use autotrade::notify::{LogNotifier, Notifier};
use autotrade::storage::TradeLedger;
use autotrade::strategy::SizingPolicy;

const BANNER: &str = r#"
    _   _   _ _____ ___ _____ ____      _    ____  _____
   / \ | | | |_   _/ _ \_   _|  _ \    / \  |  _ \| ____|
  / _ \| | | | | || | | || | | |_) |  / _ \ | | | |  _|
 / ___ \ |_| | | || |_| || | |  _ <  / ___ \| |_| | |___
/_/   \_\___/  |_| \___/ |_| |_| \_\/_/   \_\____/|_____|

  Scheduled LLM-advised spot trading agent
  v0.1.0
"#;

#[derive(Debug, Parser)]
#[command(name = "autotrade", version, about = "Scheduled LLM-advised spot trading agent")]
struct Cli {
    /// Path to the TOML config (default: $AUTOTRADE_CONFIG or config.toml).
    #[arg(long, value_name = "PATH")]
    config: Option<String>,

    /// Run one cycle immediately and exit.
    #[arg(long)]
    once: bool,

    /// Log orders instead of placing them.
    #[arg(long)]
    dry_run: bool,

    /// Print the N most recent ledger rows and the performance summary, then exit.
    #[arg(long, value_name = "N")]
    history: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var(config::CONFIG_PATH_ENV).ok())
        .unwrap_or_else(|| config::DEFAULT_CONFIG_PATH.to_string());

    let mut cfg = AppConfig::load(&config_path)?;
    if cli.dry_run {
        cfg.agent.dry_run = true;
    }

    init_logging();

    let ledger = Arc::new(
        TradeLedger::open(&cfg.storage.path)
            .await
            .with_context(|| format!("Failed to open trade ledger at {}", cfg.storage.path))?,
    );

    if let Some(n) = cli.history {
        return print_history(&ledger, n).await;
    }

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        pair = %cfg.market.pair,
        triggers = ?cfg.agent.triggers,
        dry_run = cfg.agent.dry_run,
        config = %config_path,
        "AUTOTRADE starting up"
    );

    // -- Initialise components -------------------------------------------

    let exchange: Arc<dyn ExchangeClient> = Arc::new(
        BithumbClient::new(
            AppConfig::resolve_secret(&cfg.exchange.access_key_env)?,
            AppConfig::resolve_secret(&cfg.exchange.secret_key_env)?,
            cfg.exchange.base_url.clone(),
            cfg.call_timeout(),
        )
        .context("Failed to build exchange client")?,
    );

    let oracle: Arc<dyn DecisionOracle> = Arc::new(
        OpenAiOracle::new(
            cfg.llm.provider,
            AppConfig::resolve_secret(&cfg.llm.api_key_env)?,
            Some(cfg.llm.model.clone()),
            cfg.llm.base_url.clone(),
            Some(cfg.llm.max_tokens),
            std::time::Duration::from_secs(cfg.llm.timeout_secs),
        )
        .context("Failed to build oracle client")?,
    );
    info!(provider = %cfg.llm.provider, model = oracle.model_name(), "Decision oracle ready");

    let news: Arc<dyn NewsSource> = match (
        cfg.news.enabled,
        AppConfig::optional_secret(Some(cfg.news.api_key_env.as_str())),
    ) {
        (true, Some(key)) => Arc::new(SerpApiNews::new(key, cfg.call_timeout())?),
        (true, None) => {
            warn!(env = %cfg.news.api_key_env, "No news API key — running without headlines");
            Arc::new(DisabledNews)
        }
        (false, _) => Arc::new(DisabledNews),
    };

    let notifier: Arc<dyn Notifier> = match (
        AppConfig::optional_secret(cfg.notifier.telegram_bot_token_env.as_deref()),
        cfg.notifier
            .telegram_chat_id_env
            .as_deref()
            .and_then(|env| std::env::var(env).ok())
            .filter(|id| !id.trim().is_empty()),
    ) {
        (Some(token), Some(chat_id)) => {
            Arc::new(TelegramNotifier::new(token, chat_id, cfg.call_timeout())?)
        }
        _ => {
            info!("Telegram not configured — notifications go to the log");
            Arc::new(LogNotifier)
        }
    };

    let collector = SnapshotCollector::new(exchange.clone(), news, cfg.collector_config()?);
    let executor = Executor::new(exchange.clone(), ledger.clone(), cfg.executor_config()?);
    let cycle = Arc::new(TradingCycle::new(
        collector,
        oracle,
        SizingPolicy::new(cfg.sizing_config()),
        executor,
        ledger.clone(),
        notifier,
        cfg.cycle_config(),
    ));

    let scheduler = Scheduler::new(cycle, cfg.schedule()?, cfg.poll_interval());

    // -- Run -------------------------------------------------------------

    if cli.once {
        let result = scheduler.fire().await;
        info!(result = ?result, "Single cycle finished");
        if result != FireResult::Completed {
            anyhow::bail!("Cycle did not complete");
        }
        return Ok(());
    }

    info!("Entering main loop. Press Ctrl+C to stop.");
    scheduler
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    let records = ledger.count().await?;
    info!(records, "AUTOTRADE shut down cleanly.");
    Ok(())
}

/// Print recent ledger rows, newest first, and the performance summary.
async fn print_history(ledger: &TradeLedger, limit: usize) -> Result<()> {
    let rows = ledger.recent(limit).await?;
    if rows.is_empty() {
        println!("No trades recorded yet.");
        return Ok(());
    }
    for row in &rows {
        println!("{row}");
    }
    if let Some(perf) = ledger.performance().await? {
        println!();
        println!("{perf}");
    }
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("autotrade=info"));

    let json_logging = std::env::var("AUTOTRADE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
