//! Wire types for the exchange REST API.
//!
//! The exchange serializes most numbers as strings; `rust_decimal`'s serde
//! helpers convert them at the boundary so nothing downstream handles text.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One entry of the public ticker response.
#[derive(Debug, Clone, Deserialize)]
pub struct Ticker {
    pub market: String,

    /// Last traded price; arrives as a JSON number
    pub trade_price: Decimal,
}

/// One asset balance from the private accounts endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountBalance {
    pub currency: String,

    #[serde(with = "rust_decimal::serde::str")]
    pub balance: Decimal,

    #[serde(with = "rust_decimal::serde::str")]
    pub locked: Decimal,

    #[serde(with = "rust_decimal::serde::str")]
    pub avg_buy_price: Decimal,

    pub unit_currency: String,
}

/// Order side on the wire: `bid` buys, `ask` sells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Bid,
    Ask,
}

/// Order type on the wire. Market buys are placed by quote amount
/// (`price`), market sells by base volume (`market`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Price,
    Market,
}

/// Body of an order placement request.
#[derive(Debug, Clone, Serialize)]
pub struct PlaceOrderRequest {
    pub market: String,
    pub side: OrderSide,
    pub ord_type: OrderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
}

/// Acknowledgement returned when an order is accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderAck {
    pub uuid: String,
    pub state: String,
}

/// One partial execution within an order.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderTrade {
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,

    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,

    /// Quote-currency value of this execution
    #[serde(with = "rust_decimal::serde::str")]
    pub funds: Decimal,
}

/// Full order state, including its executions.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderDetail {
    pub uuid: String,
    pub state: String,

    #[serde(with = "rust_decimal::serde::str")]
    pub executed_volume: Decimal,

    #[serde(with = "rust_decimal::serde::str")]
    pub paid_fee: Decimal,

    #[serde(default)]
    pub trades: Vec<OrderTrade>,
}

impl OrderDetail {
    /// Whether the exchange considers this order finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self.state.as_str(), "done" | "cancel")
    }

    /// Volume-weighted average execution price across the order's trades.
    pub fn average_fill_price(&self) -> Option<Decimal> {
        let volume: Decimal = self.trades.iter().map(|t| t.volume).sum();
        if volume.is_zero() {
            return None;
        }
        let funds: Decimal = self.trades.iter().map(|t| t.funds).sum();
        Some(funds / volume)
    }
}
