//! Dual-mode order execution.
//!
//! One contract, two interchangeable variants picked once at startup. The
//! ledger never branches on which variant is behind the trait; both must
//! leave it with identical post-conditions for a given fill.

mod live;
mod simulated;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::TradingResult;
use crate::models::TradeSide;

pub use live::LiveGateway;
pub use simulated::SimulatedGateway;

/// Which execution backend is in use. Selected at startup, never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Simulated,
    Live,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Simulated => "simulated",
            ExecutionMode::Live => "live",
        }
    }
}

/// A market order handed to the gateway.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: TradeSide,

    /// Quote-currency notional to spend; meaningful for buys
    pub amount: Decimal,

    /// Base quantity to sell; meaningful for sells
    pub quantity: Decimal,

    /// Market price observed when the decision was made
    pub price: Decimal,
}

impl OrderRequest {
    /// Market buy spending `amount` of quote currency.
    pub fn market_buy(symbol: &str, amount: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: TradeSide::Buy,
            amount,
            quantity: Decimal::ZERO,
            price,
        }
    }

    /// Market sell of `quantity` base units.
    pub fn market_sell(symbol: &str, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: TradeSide::Sell,
            amount: Decimal::ZERO,
            quantity,
            price,
        }
    }
}

/// A confirmed execution result. `quantity` may be below the request for a
/// partially filled live order; the coordinator applies only this portion.
#[derive(Debug, Clone, Copy)]
pub struct Fill {
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
}

impl Fill {
    /// Gross quote value of the fill.
    pub fn gross(&self) -> Decimal {
        self.quantity * self.price
    }
}

/// Order execution backend.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    fn mode(&self) -> ExecutionMode;

    /// Submit a market order and report the confirmed fill. Failures and
    /// timeouts surface as `ExecutionRejected`; an unconfirmed submission is
    /// never reported as filled.
    async fn submit_order(&self, order: &OrderRequest) -> TradingResult<Fill>;
}
