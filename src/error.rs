//! Typed errors for the trading core.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors produced by the ledger, risk controller, and execution gateway.
///
/// `RiskHalted` is a gated rejection (an expected outcome of a risk check,
/// not a fault) and callers must be able to tell it apart from the rest.
#[derive(Error, Debug)]
pub enum TradingError {
    #[error("invalid input for {field}: {value}")]
    InvalidInput { field: &'static str, value: Decimal },

    #[error("sell of {requested} {symbol} exceeds held quantity {held}")]
    InsufficientPosition {
        symbol: String,
        requested: Decimal,
        held: Decimal,
    },

    #[error("no open position for {0}")]
    NoPosition(String),

    #[error("order rejected by execution gateway: {0}")]
    ExecutionRejected(String),

    #[error("trading halted: {0}")]
    RiskHalted(String),
}

impl TradingError {
    pub fn invalid(field: &'static str, value: Decimal) -> Self {
        Self::InvalidInput { field, value }
    }

    /// True for rejections that are normal control flow rather than faults.
    pub fn is_gated(&self) -> bool {
        matches!(self, Self::RiskHalted(_))
    }
}

pub type TradingResult<T> = Result<T, TradingError>;
