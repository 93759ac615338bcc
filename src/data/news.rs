//! Headline providers.
//!
//! `SerpApiNews` queries Google News through SerpApi. `DisabledNews` stands
//! in when no API key is configured and always returns nothing.
//!
//! API: `https://serpapi.com/search.json?engine=google_news`
//! Auth: API key via `api_key` query param.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{NewsQuery, NewsSource};
use crate::types::NewsItem;

const SERPAPI_URL: &str = "https://serpapi.com/search.json";

// ---------------------------------------------------------------------------
// SerpApi response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SerpApiResponse {
    #[serde(default)]
    news_results: Vec<SerpApiNewsResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SerpApiNewsResult {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    date: Option<String>,
    /// Story clusters carry their headline here instead of `title`.
    #[serde(default)]
    highlight: Option<Highlight>,
}

#[derive(Debug, Deserialize)]
struct Highlight {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

impl SerpApiNewsResult {
    fn into_item(self) -> Option<NewsItem> {
        let (h_title, h_date) = match self.highlight {
            Some(h) => (h.title, h.date),
            None => (None, None),
        };
        let title = self.title.or(h_title)?;
        Some(NewsItem {
            title,
            date: self.date.or(h_date).unwrap_or_default(),
        })
    }
}

fn items_from_response(body: SerpApiResponse, limit: usize) -> Result<Vec<NewsItem>> {
    if let Some(err) = body.error {
        anyhow::bail!("SerpApi error: {err}");
    }
    Ok(body
        .news_results
        .into_iter()
        .filter_map(SerpApiNewsResult::into_item)
        .take(limit)
        .collect())
}

// ---------------------------------------------------------------------------
// SerpApi provider
// ---------------------------------------------------------------------------

pub struct SerpApiNews {
    http: Client,
    api_key: SecretString,
}

impl SerpApiNews {
    pub fn new(api_key: SecretString, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build SerpApi HTTP client")?;
        Ok(Self { http, api_key })
    }
}

#[async_trait]
impl NewsSource for SerpApiNews {
    async fn search(&self, query: &NewsQuery) -> Result<Vec<NewsItem>> {
        let url = format!(
            "{SERPAPI_URL}?engine=google_news&q={}&gl={}&hl={}&api_key={}",
            urlencoding::encode(&query.query),
            urlencoding::encode(&query.region),
            urlencoding::encode(&query.language),
            urlencoding::encode(self.api_key.expose_secret()),
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("SerpApi request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("SerpApi returned HTTP {status}");
        }

        let body: SerpApiResponse = response
            .json()
            .await
            .context("Failed to parse SerpApi response")?;

        let items = items_from_response(body, query.limit)?;
        debug!(query = %query.query, count = items.len(), "SerpApi news");
        Ok(items)
    }

    fn name(&self) -> &str {
        "serpapi"
    }
}

// ---------------------------------------------------------------------------
// Disabled provider
// ---------------------------------------------------------------------------

/// Used when news is switched off or no key is configured.
pub struct DisabledNews;

#[async_trait]
impl NewsSource for DisabledNews {
    async fn search(&self, _query: &NewsQuery) -> Result<Vec<NewsItem>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
