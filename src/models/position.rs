//! Position model: one open holding per market symbol.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Quantities at or below this are treated as zero (a fully exited lot).
pub const QUANTITY_DUST: Decimal = dec!(0.00000001);

/// An open spot position, carried at weighted average cost.
///
/// `total_invested` is the cost basis of the quantity currently held, not a
/// lifetime total: it grows with buys and shrinks proportionally with sells,
/// so `total_invested == avg_price * quantity` holds after every mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Market symbol, e.g. "KRW-BTC"
    pub symbol: String,

    /// Quantity of the base asset held
    pub quantity: Decimal,

    /// Weighted average acquisition cost per unit
    pub avg_price: Decimal,

    /// Cost basis attributed to the held quantity, in quote currency
    pub total_invested: Decimal,

    /// First acquisition of the current open lot
    pub entry_time: DateTime<Utc>,

    /// Last observed market price, used as the reference for the
    /// profit-rate fallback estimate
    pub last_price: Decimal,
}

impl Position {
    /// Open a new position from an initial fill.
    pub fn open(symbol: String, quantity: Decimal, price: Decimal, amount: Decimal) -> Self {
        Self {
            symbol,
            quantity,
            avg_price: price,
            total_invested: amount,
            entry_time: Utc::now(),
            last_price: price,
        }
    }

    /// Merge an additional fill into the lot, recomputing the average cost.
    pub fn add(&mut self, quantity: Decimal, amount: Decimal) {
        let new_quantity = self.quantity + quantity;
        let new_invested = self.total_invested + amount;
        if !new_quantity.is_zero() {
            self.avg_price = new_invested / new_quantity;
        }
        self.quantity = new_quantity;
        self.total_invested = new_invested;
    }

    /// Reduce the lot by a sold quantity. The average price is unchanged by
    /// a sell; the cost basis shrinks in proportion to the quantity sold.
    pub fn reduce(&mut self, quantity: Decimal) {
        self.quantity -= quantity;
        self.total_invested -= self.avg_price * quantity;
    }

    /// Record the latest observed market price.
    pub fn mark(&mut self, price: Decimal) {
        self.last_price = price;
    }

    /// Whether the remaining quantity is within dust tolerance of zero.
    pub fn is_exhausted(&self) -> bool {
        self.quantity <= QUANTITY_DUST
    }

    /// Market value of the holding at the given price.
    pub fn value_at(&self, price: Decimal) -> Decimal {
        self.quantity * price
    }

    /// Unrealized profit at the given price.
    pub fn unrealized_at(&self, price: Decimal) -> Decimal {
        (price - self.avg_price) * self.quantity
    }
}
