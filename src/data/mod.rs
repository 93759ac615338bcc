//! External market context.
//!
//! Defines the `NewsSource` trait and the `fetch_news` boundary that keeps
//! news optional: any failure there becomes an empty headline list.

pub mod news;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::NewsItem;

/// A headline search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsQuery {
    pub query: String,
    /// Two-letter region code (`us`).
    pub region: String,
    /// Two-letter language code (`en`).
    pub language: String,
    pub limit: usize,
}

impl Default for NewsQuery {
    fn default() -> Self {
        Self {
            query: "bitcoin news".to_string(),
            region: "us".to_string(),
            language: "en".to_string(),
            limit: 5,
        }
    }
}

/// Abstraction over headline providers.
#[async_trait]
pub trait NewsSource: Send + Sync {
    /// Most relevant headlines first, at most `query.limit`.
    async fn search(&self, query: &NewsQuery) -> Result<Vec<NewsItem>>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// Search `source`, degrading every failure (error or timeout) to an
/// empty list.
pub async fn fetch_news(
    source: &dyn NewsSource,
    query: &NewsQuery,
    timeout: Duration,
) -> Vec<NewsItem> {
    match tokio::time::timeout(timeout, source.search(query)).await {
        Ok(Ok(mut items)) => {
            items.truncate(query.limit);
            debug!(source = source.name(), count = items.len(), "News fetched");
            items
        }
        Ok(Err(e)) => {
            warn!(source = source.name(), error = %e, "News unavailable — continuing without");
            Vec::new()
        }
        Err(_) => {
            warn!(
                source = source.name(),
                timeout_secs = timeout.as_secs(),
                "News timed out — continuing without"
            );
            Vec::new()
        }
    }
}
