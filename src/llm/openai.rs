//! OpenAI-compatible chat-completions oracle.
//!
//! Sends the fixed instruction as the system message and the JSON payload
//! as the user message, asking for a `json_object` response. The same wire
//! format serves OpenAI and OpenRouter; only the endpoint and headers differ.
//! No retries: the next scheduled cycle is the retry.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use super::contract;
use super::DecisionOracle;
use crate::types::{Decision, MarketSnapshot, TradeError, TradeRecord};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Which OpenAI-compatible service to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAi,
    OpenRouter,
}

impl Provider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => OPENAI_BASE_URL,
            Provider::OpenRouter => OPENROUTER_BASE_URL,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::OpenAi => write!(f, "openai"),
            Provider::OpenRouter => write!(f, "openrouter"),
        }
    }
}

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u32,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenAiOracle {
    http: Client,
    api_key: SecretString,
    provider: Provider,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiOracle {
    pub fn new(
        provider: Provider,
        api_key: SecretString,
        model: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        timeout: Duration,
    ) -> Result<Self, TradeError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TradeError::OracleUnavailable(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_key,
            provider,
            base_url: base_url
                .unwrap_or_else(|| provider.default_base_url().to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// One chat-completions round trip; returns the assistant's text.
    async fn call_api(&self, system: String, user: String) -> Result<String, TradeError> {
        let request = ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(system),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Some(user),
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let mut builder = self
            .http
            .post(self.endpoint())
            .bearer_auth(self.api_key.expose_secret())
            .json(&request);
        if self.provider == Provider::OpenRouter {
            builder = builder.header("X-Title", "AUTOTRADE");
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TradeError::OracleUnavailable(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TradeError::OracleUnavailable(format!(
                "{} API error {status}: {}",
                self.provider,
                body.chars().take(300).collect::<String>()
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| TradeError::OracleUnavailable(format!("unreadable response: {e}")))?;

        if let Some(usage) = &body.usage {
            debug!(model = %self.model, tokens = usage.total_tokens, "Oracle call complete");
        }

        extract_content(body)
    }
}

fn extract_content(body: ChatResponse) -> Result<String, TradeError> {
    body.choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| TradeError::OracleContractViolation("empty completion".into()))
}

#[async_trait]
impl DecisionOracle for OpenAiOracle {
    async fn decide(
        &self,
        snapshot: &MarketSnapshot,
        recent: &[TradeRecord],
    ) -> Result<Decision, TradeError> {
        let system = contract::instruction(snapshot);
        let user = contract::build_payload(snapshot, recent)?;

        debug!(
            provider = %self.provider,
            model = %self.model,
            payload_bytes = user.len(),
            history = recent.len(),
            "Requesting decision"
        );

        let text = self.call_api(system, user).await?;
        let decision = contract::parse_decision(&text)?;

        info!(
            model = %self.model,
            action = %decision.action,
            pct = decision.percentage,
            "Oracle decided"
        );
        Ok(decision)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn client(provider: Provider, base_url: Option<String>) -> OpenAiOracle {
        OpenAiOracle::new(
            provider,
            SecretString::new("test-key".into()),
            None,
            base_url,
            None,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_client_defaults() {
        let c = client(Provider::OpenAi, None);
        assert_eq!(c.model_name(), DEFAULT_MODEL);
        assert_eq!(c.endpoint(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn test_openrouter_endpoint_and_override() {
        let c = client(Provider::OpenRouter, None);
        assert_eq!(c.endpoint(), "https://openrouter.ai/api/v1/chat/completions");

        let c = client(Provider::OpenAi, Some("http://localhost:8080/v1/".into()));
        assert_eq!(c.endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn test_request_asks_for_json_object() {
        let req = ChatRequest {
            model: "gpt-4o",
            max_tokens: 10,
            messages: vec![],
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_extract_content() {
        let body: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"{\"decision\":\"hold\"}"}}],
                "usage":{"total_tokens":42}}"#,
        )
        .unwrap();
        assert_eq!(extract_content(body).unwrap(), r#"{"decision":"hold"}"#);

        let empty: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(
            extract_content(empty),
            Err(TradeError::OracleContractViolation(_))
        ));
    }

    #[test]
    fn test_provider_serde() {
        let p: Provider = serde_json::from_str("\"openrouter\"").unwrap();
        assert_eq!(p, Provider::OpenRouter);
        assert_eq!(Provider::default(), Provider::OpenAi);
    }
}
