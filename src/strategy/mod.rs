//! Strategy: turns an oracle decision into an order size.

pub mod sizing;

pub use sizing::{OrderSize, SizingConfig, SizingPolicy, SizingRejection};
