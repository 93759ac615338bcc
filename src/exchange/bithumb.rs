//! Bithumb exchange integration.
//!
//! REST v1 API. Public market data (ticker, candles) needs no auth;
//! private calls (accounts, orders) carry an HS256 JWT signed with the
//! secret key. When a call has parameters the token also commits to a
//! SHA-512 hash of the url-encoded parameter string.
//!
//! API: `https://api.bithumb.com/v1/...`

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::{Decimal, RoundingStrategy};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256, Sha512};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ExchangeClient, ExchangeError, OrderReceipt, OrderSide};
use crate::types::{AssetPair, Candle, Interval};

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://api.bithumb.com";

/// Decimal places accepted for base-asset order volumes.
const BASE_VOLUME_DP: u32 = 8;

/// Candle endpoints return at most this many rows per request.
const MAX_CANDLES_PER_REQUEST: u32 = 200;

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AccountEntry {
    currency: String,
    #[serde(default)]
    balance: Decimal,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    trade_price: Decimal,
}

#[derive(Debug, Deserialize)]
struct CandleRow {
    candle_date_time_utc: String,
    opening_price: Decimal,
    high_price: Decimal,
    low_price: Decimal,
    trade_price: Decimal,
    #[serde(default)]
    candle_acc_trade_volume: Decimal,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    uuid: String,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    name: serde_json::Value,
    #[serde(default)]
    message: String,
}

impl CandleRow {
    fn into_candle(self) -> Result<Candle, ExchangeError> {
        let ts = NaiveDateTime::parse_from_str(&self.candle_date_time_utc, "%Y-%m-%dT%H:%M:%S")
            .map_err(|e| {
                ExchangeError::Decode(format!(
                    "bad candle timestamp {:?}: {e}",
                    self.candle_date_time_utc
                ))
            })?;
        Ok(Candle {
            timestamp: ts.and_utc(),
            open: self.opening_price,
            high: self.high_price,
            low: self.low_price,
            close: self.trade_price,
            volume: self.candle_acc_trade_volume,
        })
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct BithumbClient {
    http: Client,
    access_key: SecretString,
    secret_key: SecretString,
    base_url: String,
}

impl BithumbClient {
    pub fn new(
        access_key: SecretString,
        secret_key: SecretString,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ExchangeError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("AUTOTRADE/0.1.0")
            .build()?;

        Ok(Self {
            http,
            access_key,
            secret_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    /// Build the bearer token for a private call.
    fn auth_token(&self, query: &str) -> Result<String, ExchangeError> {
        let mut claims = serde_json::json!({
            "access_key": self.access_key.expose_secret(),
            "nonce": Uuid::new_v4().to_string(),
            "timestamp": Utc::now().timestamp_millis(),
        });
        if !query.is_empty() {
            claims["query_hash"] = serde_json::json!(hex::encode(Sha512::digest(query.as_bytes())));
            claims["query_hash_alg"] = serde_json::json!("SHA512");
        }
        sign_jwt(self.secret_key.expose_secret().as_bytes(), &claims)
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}?{}", self.base_url, path, encode_query(params));
        debug!(url = %url, "Bithumb public request");
        let response = self.http.get(&url).send().await?;
        read_response(response).await
    }

    async fn private_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let query = encode_query(params);
        let token = self.auth_token(&query)?;
        // GET parameters go on the url verbatim so they match the signed hash.
        let url = if method == Method::GET && !query.is_empty() {
            format!("{}{}?{}", self.base_url, path, query)
        } else {
            format!("{}{}", self.base_url, path)
        };

        let mut request = self
            .http
            .request(method.clone(), &url)
            .header("Authorization", format!("Bearer {token}"));

        if method != Method::GET {
            let body: serde_json::Map<String, serde_json::Value> = params
                .iter()
                .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.clone())))
                .collect();
            request = request.json(&body);
        }

        let response = request.send().await?;
        read_response(response).await
    }

    async fn place_order(
        &self,
        pair: &AssetPair,
        side: OrderSide,
        amount: Decimal,
    ) -> Result<OrderReceipt, ExchangeError> {
        let params: Vec<(&str, String)> = match side {
            OrderSide::Buy => vec![
                ("market", pair.market()),
                ("side", "bid".to_string()),
                ("ord_type", "price".to_string()),
                ("price", format_quote_amount(amount)),
            ],
            OrderSide::Sell => vec![
                ("market", pair.market()),
                ("side", "ask".to_string()),
                ("ord_type", "market".to_string()),
                ("volume", format_base_volume(amount)),
            ],
        };

        info!(market = %pair, side = %side, amount = %amount.normalize(), "Submitting market order");

        let resp: OrderResponse = self
            .private_request(Method::POST, "/v1/orders", &params)
            .await?;

        Ok(OrderReceipt {
            order_id: resp.uuid,
            side,
            amount,
            state: resp.state.unwrap_or_else(|| "wait".to_string()),
            created_at: Utc::now(),
        })
    }
}

#[async_trait]
impl ExchangeClient for BithumbClient {
    async fn get_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        let accounts: Vec<AccountEntry> = self
            .private_request(Method::GET, "/v1/accounts", &[])
            .await?;

        Ok(accounts
            .iter()
            .find(|a| a.currency.eq_ignore_ascii_case(asset))
            .map(|a| a.balance)
            .unwrap_or(Decimal::ZERO))
    }

    async fn get_current_price(&self, pair: &AssetPair) -> Result<Decimal, ExchangeError> {
        let tickers: Vec<TickerEntry> = self
            .public_get("/v1/ticker", &[("markets", pair.market())])
            .await?;

        tickers
            .first()
            .map(|t| t.trade_price)
            .ok_or_else(|| ExchangeError::Decode(format!("empty ticker response for {pair}")))
    }

    async fn get_ohlcv(
        &self,
        pair: &AssetPair,
        interval: Interval,
        count: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let count = count.clamp(1, MAX_CANDLES_PER_REQUEST);
        let rows: Vec<CandleRow> = self
            .public_get(
                &candle_path(interval),
                &[("market", pair.market()), ("count", count.to_string())],
            )
            .await?;

        candles_oldest_first(rows)
    }

    async fn place_market_buy(
        &self,
        pair: &AssetPair,
        quote_amount: Decimal,
    ) -> Result<OrderReceipt, ExchangeError> {
        self.place_order(pair, OrderSide::Buy, quote_amount).await
    }

    async fn place_market_sell(
        &self,
        pair: &AssetPair,
        base_quantity: Decimal,
    ) -> Result<OrderReceipt, ExchangeError> {
        self.place_order(pair, OrderSide::Sell, base_quantity).await
    }

    fn name(&self) -> &'static str {
        "bithumb"
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Sign `claims` as a compact HS256 JWT.
fn sign_jwt(secret: &[u8], claims: &serde_json::Value) -> Result<String, ExchangeError> {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = serde_json::to_vec(claims).map_err(|e| ExchangeError::Auth(e.to_string()))?;
    let signing_input = format!("{header}.{}", URL_SAFE_NO_PAD.encode(payload));

    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| ExchangeError::Auth(e.to_string()))?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{signing_input}.{signature}"))
}

fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn candle_path(interval: Interval) -> String {
    match interval {
        Interval::Minutes(n) => format!("/v1/candles/minutes/{n}"),
        Interval::Day => "/v1/candles/days".to_string(),
        Interval::Week => "/v1/candles/weeks".to_string(),
    }
}

/// The API returns newest first; the rest of the agent expects oldest first.
fn candles_oldest_first(rows: Vec<CandleRow>) -> Result<Vec<Candle>, ExchangeError> {
    let mut candles = rows
        .into_iter()
        .map(CandleRow::into_candle)
        .collect::<Result<Vec<_>, _>>()?;
    candles.sort_by_key(|c| c.timestamp);
    Ok(candles)
}

/// Quote currency (KRW) orders are whole units.
fn format_quote_amount(amount: Decimal) -> String {
    amount.trunc().normalize().to_string()
}

fn format_base_volume(amount: Decimal) -> String {
    amount
        .round_dp_with_strategy(BASE_VOLUME_DP, RoundingStrategy::ToZero)
        .normalize()
        .to_string()
}

async fn read_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ExchangeError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let err = parse_api_error(status.as_u16(), &body);
        warn!(status = status.as_u16(), error = %err, "Bithumb API error");
        return Err(err);
    }

    serde_json::from_str(&body).map_err(|e| {
        let snippet: String = body.chars().take(200).collect();
        ExchangeError::Decode(format!("{e}: {snippet}"))
    })
}

fn parse_api_error(status: u16, body: &str) -> ExchangeError {
    let (name, message) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let name = match envelope.error.name {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => "unknown".to_string(),
                other => other.to_string(),
            };
            (name, envelope.error.message)
        }
        Err(_) => ("unknown".to_string(), body.chars().take(200).collect()),
    };

    // Balance shortfalls come back in Korean ("부족") or as insufficient_funds_*.
    let lowered = format!("{name} {message}").to_lowercase();
    if lowered.contains("insufficient") || lowered.contains("부족") {
        return ExchangeError::InsufficientBalance(message);
    }

    ExchangeError::Api {
        status,
        name,
        message,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
