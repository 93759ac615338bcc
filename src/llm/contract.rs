//! The decision contract shared by every oracle provider.
//!
//! Builds the request document (market snapshot + recent trades), holds the
//! fixed task instruction, and turns the oracle's raw reply into a validated
//! `Decision`. Nothing here knows which provider is on the other end.

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use crate::types::{
    Action, Candle, Decision, MarketSnapshot, NewsItem, TradeError, TradeRecord,
};

// ---------------------------------------------------------------------------
// Instruction
// ---------------------------------------------------------------------------

/// Task description sent as the system message. `{BASE}` and `{QUOTE}` are
/// replaced with the pair's assets.
const INSTRUCTION_TEMPLATE: &str = r#"You are an expert {BASE} investor.

You invest according to two principles:
Rule No.1: Never lose money.
Rule No.2: Never forget Rule No.1.

You will receive a JSON document with:
1. short_term, mid_term, long_term: OHLCV candles (1 hour, 4 hours, 1 day), oldest first.
2. news: recent {BASE} headlines with title and date.
3. current_balance: {QUOTE} and {BASE} holdings, the current {BASE} price in {QUOTE}, and the total account value.
4. recent_trades: your most recent decisions, newest first, with the balances that followed them.

Review recent_trades before deciding. Judge whether those calls were profitable, whether conditions have changed since the last one, and keep your strategy consistent unless there is a clear reason to change it.

Decide whether to buy, sell, or hold {BASE}. For buy or sell, give an integer percentage from 1 to 100 expressing conviction: 1 means the smallest allowed order, 100 the largest. For hold, use 0.

Respond ONLY with a JSON object of exactly this shape:
{"decision": "buy", "percentage": 20, "reason": "short technical reason"}
{"decision": "sell", "percentage": 50, "reason": "short technical reason"}
{"decision": "hold", "percentage": 0, "reason": "short technical reason"}"#;

/// The system instruction for a given pair.
pub fn instruction(snapshot: &MarketSnapshot) -> String {
    INSTRUCTION_TEMPLATE
        .replace("{BASE}", &snapshot.pair.base)
        .replace("{QUOTE}", &snapshot.pair.quote)
}

// ---------------------------------------------------------------------------
// Request payload
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct BalancePayload {
    base: Decimal,
    quote: Decimal,
    price: Decimal,
    total_value: Decimal,
}

#[derive(Debug, Serialize)]
struct TradePayload<'a> {
    timestamp: String,
    decision: Action,
    percentage: u8,
    reason: &'a str,
    base_balance: Decimal,
    quote_balance: Decimal,
    price: Decimal,
}

#[derive(Debug, Serialize)]
struct OraclePayload<'a> {
    pair: String,
    short_term: &'a [Candle],
    mid_term: &'a [Candle],
    long_term: &'a [Candle],
    news: &'a [NewsItem],
    current_balance: BalancePayload,
    recent_trades: Vec<TradePayload<'a>>,
}

/// Serialize the snapshot and history into the user-message document.
pub fn build_payload(
    snapshot: &MarketSnapshot,
    recent: &[TradeRecord],
) -> Result<String, TradeError> {
    let b = &snapshot.balances;
    let payload = OraclePayload {
        pair: snapshot.pair.market(),
        short_term: &snapshot.short_term,
        mid_term: &snapshot.mid_term,
        long_term: &snapshot.long_term,
        news: &snapshot.news,
        current_balance: BalancePayload {
            base: b.base,
            quote: b.quote,
            price: b.price,
            total_value: b.total_value(),
        },
        recent_trades: recent
            .iter()
            .map(|r| TradePayload {
                timestamp: r.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                decision: r.decision,
                percentage: r.percentage,
                reason: &r.reason,
                base_balance: r.base_balance,
                quote_balance: r.quote_balance,
                price: r.price,
            })
            .collect(),
    };

    serde_json::to_string(&payload)
        .map_err(|e| TradeError::OracleUnavailable(format!("failed to encode request: {e}")))
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

/// Pull the first JSON object out of a reply that may be wrapped in a
/// markdown fence or preceded by prose. Brace-delimited prose such as
/// `{trend}` is skipped.
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();

    if trimmed.starts_with('{') && serde_json::from_str::<Value>(trimmed).is_ok() {
        return Some(trimmed);
    }

    if let Some(block) = fenced_block(trimmed) {
        if serde_json::from_str::<Value>(block).is_ok() {
            return Some(block);
        }
    }

    trimmed
        .match_indices('{')
        .filter_map(|(start, _)| {
            balanced_object_len(&trimmed[start..]).map(|len| &trimmed[start..start + len])
        })
        .find(|candidate| serde_json::from_str::<Value>(candidate).is_ok())
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    // Skip the language tag line, if any.
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// Length of the balanced `{...}` that `text` starts with.
fn balanced_object_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn violation(msg: impl Into<String>) -> TradeError {
    TradeError::OracleContractViolation(msg.into())
}

/// Parse and validate a raw oracle reply.
///
/// `decision` must name buy/sell/hold (case and surrounding whitespace are
/// ignored). `percentage` must be a JSON integer in [0, 100]; absent or
/// null means 0. `reason` must be a string.
pub fn parse_decision(raw: &str) -> Result<Decision, TradeError> {
    let json = extract_json(raw).ok_or_else(|| {
        violation(format!("no JSON object in reply ({} chars)", raw.len()))
    })?;

    let value: Value =
        serde_json::from_str(json).map_err(|e| violation(format!("invalid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| violation("reply is not a JSON object"))?;

    let action = match obj.get("decision") {
        Some(Value::String(s)) => s
            .parse::<Action>()
            .map_err(|_| violation(format!("unknown decision {s:?}")))?,
        Some(other) => return Err(violation(format!("decision must be a string, got {other}"))),
        None => return Err(violation("missing decision")),
    };

    let percentage = match obj.get("percentage") {
        None | Some(Value::Null) => 0,
        Some(Value::Number(n)) => match n.as_u64() {
            Some(p) if p <= 100 => p as u8,
            Some(p) => return Err(violation(format!("percentage {p} outside [0, 100]"))),
            None if n.is_i64() => return Err(violation(format!("percentage {n} outside [0, 100]"))),
            None => return Err(violation(format!("percentage {n} is not an integer"))),
        },
        Some(other) => {
            return Err(violation(format!("percentage must be an integer, got {other}")))
        }
    };

    let reason = match obj.get("reason") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => return Err(violation(format!("reason must be a string, got {other}"))),
        None => return Err(violation("missing reason")),
    };

    Ok(Decision {
        action,
        percentage,
        reason,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetPair, Balances};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn snapshot() -> MarketSnapshot {
        let candle = Candle {
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            open: dec!(100),
            high: dec!(110),
            low: dec!(90),
            close: dec!(105),
            volume: dec!(3.5),
        };
        MarketSnapshot {
            pair: AssetPair::new("KRW", "BTC"),
            short_term: vec![candle.clone(); 3],
            mid_term: vec![candle.clone(); 2],
            long_term: vec![candle],
            news: vec![NewsItem {
                title: "ETF inflows rise".into(),
                date: "01/01/2025".into(),
            }],
            balances: Balances {
                base: dec!(0.5),
                quote: dec!(1000000),
                price: dec!(100000000),
            },
            collected_at: Utc::now(),
        }
    }

    fn violation_text(raw: &str) -> String {
        match parse_decision(raw) {
            Err(TradeError::OracleContractViolation(msg)) => msg,
            other => panic!("expected contract violation, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_clean_reply() {
        let d = parse_decision(r#"{"decision":"buy","percentage":20,"reason":"breakout"}"#).unwrap();
        assert_eq!(d.action, Action::Buy);
        assert_eq!(d.percentage, 20);
        assert_eq!(d.reason, "breakout");
    }

    #[test]
    fn test_parse_case_and_whitespace_insensitive() {
        let d = parse_decision(r#"{"decision":" SELL ","percentage":100,"reason":"x"}"#).unwrap();
        assert_eq!(d.action, Action::Sell);
        assert_eq!(d.percentage, 100);
    }

    #[test]
    fn test_missing_or_null_percentage_is_zero() {
        let d = parse_decision(r#"{"decision":"hold","reason":"flat"}"#).unwrap();
        assert_eq!(d.percentage, 0);
        let d = parse_decision(r#"{"decision":"hold","percentage":null,"reason":"flat"}"#).unwrap();
        assert_eq!(d.percentage, 0);
    }

    #[test]
    fn test_unknown_decision_is_violation() {
        let msg = violation_text(r#"{"decision":"fly","percentage":10,"reason":"up"}"#);
        assert!(msg.contains("fly"));
    }

    #[test]
    fn test_percentage_out_of_range() {
        violation_text(r#"{"decision":"buy","percentage":101,"reason":"x"}"#);
        violation_text(r#"{"decision":"buy","percentage":-5,"reason":"x"}"#);
    }

    #[test]
    fn test_non_integer_percentage() {
        violation_text(r#"{"decision":"buy","percentage":12.5,"reason":"x"}"#);
        violation_text(r#"{"decision":"buy","percentage":"20","reason":"x"}"#);
    }

    #[test]
    fn test_missing_fields() {
        violation_text(r#"{"percentage":10,"reason":"x"}"#);
        violation_text(r#"{"decision":"buy","percentage":10}"#);
        violation_text("I think you should buy");
        violation_text("[1, 2, 3]");
    }

    #[test]
    fn test_extract_from_fence_and_prose() {
        let fenced = "```json\n{\"decision\":\"hold\",\"percentage\":0,\"reason\":\"wait\"}\n```";
        assert_eq!(parse_decision(fenced).unwrap().action, Action::Hold);

        let prose = "Here is my call:\n{\"decision\":\"buy\",\"percentage\":5,\"reason\":\"a {b} c\"} thanks";
        let d = parse_decision(prose).unwrap();
        assert_eq!(d.percentage, 5);
        assert_eq!(d.reason, "a {b} c");
    }

    #[test]
    fn test_extract_json_none_on_garbage() {
        assert!(extract_json("no braces here").is_none());
        assert!(extract_json("{ unbalanced").is_none());
        assert!(extract_json("{trend} and {more prose}").is_none());
    }

    #[test]
    fn test_extract_skips_braced_prose() {
        let raw = "Given {trend}: {\"decision\":\"sell\",\"percentage\":40,\"reason\":\"overbought\"}";
        assert_eq!(
            extract_json(raw),
            Some("{\"decision\":\"sell\",\"percentage\":40,\"reason\":\"overbought\"}")
        );
        let d = parse_decision(raw).unwrap();
        assert_eq!(d.action, Action::Sell);
        assert_eq!(d.percentage, 40);

        // A valid object nested in a broken outer one.
        let nested = "{note: {\"decision\":\"hold\",\"reason\":\"flat\"}";
        assert_eq!(parse_decision(nested).unwrap().action, Action::Hold);
    }

    #[test]
    fn test_payload_shape() {
        let snap = snapshot();
        let record = TradeRecord::new(&Decision::hold("flat"), 0, &snap.balances);
        let body = build_payload(&snap, &[record]).unwrap();
        let v: Value = serde_json::from_str(&body).unwrap();

        assert_eq!(v["pair"], "KRW-BTC");
        assert_eq!(v["short_term"].as_array().unwrap().len(), 3);
        assert_eq!(v["mid_term"].as_array().unwrap().len(), 2);
        assert_eq!(v["long_term"].as_array().unwrap().len(), 1);
        assert_eq!(v["news"][0]["title"], "ETF inflows rise");
        assert_eq!(v["current_balance"]["total_value"].as_f64().unwrap(), 51_000_000.0);
        assert_eq!(v["recent_trades"][0]["decision"], "hold");
    }

    #[test]
    fn test_instruction_names_assets() {
        let text = instruction(&snapshot());
        assert!(text.contains("expert BTC investor"));
        assert!(text.contains("KRW"));
        assert!(!text.contains("{BASE}"));
    }
}
