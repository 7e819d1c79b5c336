//! Trade record: the append-only audit trail of executed orders.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

impl std::str::FromStr for TradeSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(TradeSide::Buy),
            "SELL" => Ok(TradeSide::Sell),
            other => Err(format!("unknown trade side: {other}")),
        }
    }
}

/// One executed order. Immutable once emitted; the ledger is reconciled
/// against these records and never rewrites them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Record identifier (UUID)
    pub id: String,

    /// Market symbol, e.g. "KRW-BTC"
    pub symbol: String,

    /// Trade direction
    pub side: TradeSide,

    /// Filled quantity of the base asset
    pub quantity: Decimal,

    /// Fill price per unit
    pub price: Decimal,

    /// Gross quote-currency value of the fill
    pub amount: Decimal,

    /// Fee charged by the exchange, in quote currency
    pub fee: Decimal,

    /// Realized profit in quote currency (sells only)
    pub profit: Option<Decimal>,

    /// Realized return on the sold portion's cost basis (sells only)
    pub profit_rate: Option<Decimal>,

    /// Set when the profit rate came from the sanity fallback and should
    /// not be trusted without review
    pub suspect: bool,

    /// When the fill was applied to the ledger
    pub executed_at: DateTime<Utc>,
}

impl TradeRecord {
    /// Build a record for an applied buy fill.
    pub fn buy(symbol: &str, quantity: Decimal, price: Decimal, amount: Decimal, fee: Decimal) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side: TradeSide::Buy,
            quantity,
            price,
            amount,
            fee,
            profit: None,
            profit_rate: None,
            suspect: false,
            executed_at: Utc::now(),
        }
    }

    /// Build a record for an applied sell fill.
    pub fn sell(
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        amount: Decimal,
        fee: Decimal,
        profit: Decimal,
        profit_rate: Decimal,
        suspect: bool,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side: TradeSide::Sell,
            quantity,
            price,
            amount,
            fee,
            profit: Some(profit),
            profit_rate: Some(profit_rate),
            suspect,
            executed_at: Utc::now(),
        }
    }

    /// True when this sell locked in a gain.
    pub fn is_winner(&self) -> bool {
        self.profit.is_some_and(|p| p > Decimal::ZERO)
    }
}
