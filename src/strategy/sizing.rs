//! Order sizing policy.
//!
//! Maps a decision's percentage onto a bounded order: the target value is
//! interpolated linearly between `min_order` and `max_order`, then grossed
//! up by `1 / (1 - fee_rate)` so the fee comes out of the spend rather than
//! the target. Sells convert the same target into base quantity at the
//! current price. The oracle's free-text reason plays no part.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt;
use tracing::debug;

use crate::types::{Action, Balances, Decision};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Sizing bounds, all in quote currency except `fee_rate`.
#[derive(Debug, Clone, PartialEq)]
pub struct SizingConfig {
    /// Order value at 0%.
    pub min_order: Decimal,
    /// Order value at 100%.
    pub max_order: Decimal,
    /// Exchange fee as a fraction (0.003 = 0.3%). Must be in [0, 1).
    pub fee_rate: Decimal,
    /// Smallest order the exchange accepts.
    pub min_notional: Decimal,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            min_order: dec!(10000),
            max_order: dec!(20000),
            fee_rate: dec!(0.003),
            min_notional: dec!(5000),
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// A sized order, ready for the execution engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderSize {
    /// Nothing to place (hold).
    None,
    /// Spend `quote_amount` of quote currency.
    Buy { quote_amount: Decimal },
    /// Sell `base_quantity` of base, worth roughly `notional` in quote.
    Sell {
        base_quantity: Decimal,
        notional: Decimal,
    },
}

impl OrderSize {
    pub fn is_zero(&self) -> bool {
        matches!(self, OrderSize::None)
    }

    /// Order value in quote currency.
    pub fn notional(&self) -> Decimal {
        match self {
            OrderSize::None => Decimal::ZERO,
            OrderSize::Buy { quote_amount } => *quote_amount,
            OrderSize::Sell { notional, .. } => *notional,
        }
    }
}

impl fmt::Display for OrderSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSize::None => write!(f, "no order"),
            OrderSize::Buy { quote_amount } => write!(f, "BUY for {:.0} quote", quote_amount),
            OrderSize::Sell {
                base_quantity,
                notional,
            } => write!(
                f,
                "SELL {} base (~{:.0} quote)",
                base_quantity.round_dp(8).normalize(),
                notional
            ),
        }
    }
}

/// Why a buy or sell could not be sized.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SizingRejection {
    #[error("order value {notional} below minimum notional {minimum}")]
    BelowMinimumNotional { notional: Decimal, minimum: Decimal },

    #[error("{0} requested with 0%")]
    ZeroPercentage(Action),

    #[error("cannot size a sell at price {0}")]
    InvalidPrice(Decimal),
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

pub struct SizingPolicy {
    config: SizingConfig,
}

impl SizingPolicy {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Interpolated value before fee compensation.
    fn target_value(&self, percentage: u8) -> Decimal {
        let pct = Decimal::from(percentage.min(100)) / Decimal::ONE_HUNDRED;
        self.config.min_order + (self.config.max_order - self.config.min_order) * pct
    }

    fn fee_adjusted(&self, value: Decimal) -> Decimal {
        value / (Decimal::ONE - self.config.fee_rate)
    }

    /// Size `decision` against the current market. Balances are not checked;
    /// the exchange rejects what the account cannot cover.
    pub fn size(
        &self,
        decision: &Decision,
        balances: &Balances,
    ) -> Result<OrderSize, SizingRejection> {
        if decision.action == Action::Hold {
            return Ok(OrderSize::None);
        }
        if decision.percentage == 0 {
            return Err(SizingRejection::ZeroPercentage(decision.action));
        }

        let notional = self.fee_adjusted(self.target_value(decision.percentage));
        if notional < self.config.min_notional {
            return Err(SizingRejection::BelowMinimumNotional {
                notional,
                minimum: self.config.min_notional,
            });
        }

        let size = match decision.action {
            Action::Buy => OrderSize::Buy {
                quote_amount: notional,
            },
            Action::Sell => {
                if balances.price <= Decimal::ZERO {
                    return Err(SizingRejection::InvalidPrice(balances.price));
                }
                OrderSize::Sell {
                    base_quantity: notional / balances.price,
                    notional,
                }
            }
            Action::Hold => OrderSize::None,
        };

        debug!(
            action = %decision.action,
            pct = decision.percentage,
            notional = %notional.round_dp(2),
            "Order sized"
        );
        Ok(size)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
