//! Decision oracle integration.
//!
//! Defines the `DecisionOracle` trait the cycle consults and the
//! provider-neutral contract (`contract`) every implementation shares.
//! `openai` speaks the OpenAI-compatible chat-completions protocol, which
//! covers both OpenAI and OpenRouter.

pub mod contract;
pub mod openai;

use async_trait::async_trait;

use crate::types::{Decision, MarketSnapshot, TradeError, TradeRecord};

/// Abstraction over the external decision maker.
///
/// Implementors send the snapshot plus recent history to the oracle and
/// return a validated decision. A reply that breaks the contract is
/// `OracleContractViolation`; an unreachable oracle is `OracleUnavailable`.
/// Neither is ever replaced by a made-up decision.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn decide(
        &self,
        snapshot: &MarketSnapshot,
        recent: &[TradeRecord],
    ) -> Result<Decision, TradeError>;

    /// Model identifier string.
    fn model_name(&self) -> &str;
}
