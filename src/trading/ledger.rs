//! Position ledger: per-symbol holdings at weighted average cost.
//!
//! All mutations validate their inputs and either apply fully or not at all;
//! a rejected operation leaves the ledger untouched.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::error::{TradingError, TradingResult};
use crate::models::Position;

/// Outcome of a sell applied to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Part of the lot remains open.
    Partial,
    /// The lot was closed and removed from the ledger.
    Full,
}

/// Result of `apply_sell`, consumed by the coordinator for realized-profit
/// accounting and trade recording.
#[derive(Debug, Clone)]
pub struct SellOutcome {
    /// Realized profit on the sold portion: `(price - avg_price) * quantity`
    pub realized_profit: Decimal,

    /// Cost basis released by this sell
    pub released_basis: Decimal,

    /// Average cost of the lot at the time of the sell
    pub avg_price: Decimal,

    /// Whether the lot survived the sell
    pub exit: ExitKind,
}

/// Exclusive owner of all open positions.
#[derive(Debug, Default)]
pub struct PositionLedger {
    positions: HashMap<String, Position>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a buy fill, opening a new lot or averaging into an existing one.
    ///
    /// `amount` is the net cost charged for the fill (fees already deducted),
    /// so the stored basis reflects what was actually paid.
    pub fn apply_buy(
        &mut self,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        amount: Decimal,
    ) -> TradingResult<&Position> {
        validate_positive("quantity", quantity)?;
        validate_positive("price", price)?;
        validate_positive("amount", amount)?;

        match self.positions.entry(symbol.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().add(quantity, amount);
            }
            Entry::Vacant(entry) => {
                entry.insert(Position::open(symbol.to_string(), quantity, price, amount));
            }
        }

        Ok(&self.positions[symbol])
    }

    /// Apply a sell fill at `price`, reducing the lot proportionally.
    ///
    /// The average price never moves on a sell. When the remainder is within
    /// dust tolerance of zero the position is removed entirely and the
    /// outcome reports a full exit.
    pub fn apply_sell(
        &mut self,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
    ) -> TradingResult<SellOutcome> {
        validate_positive("quantity", quantity)?;
        validate_positive("price", price)?;

        let position = self
            .positions
            .get_mut(symbol)
            .ok_or_else(|| TradingError::NoPosition(symbol.to_string()))?;

        if quantity > position.quantity {
            return Err(TradingError::InsufficientPosition {
                symbol: symbol.to_string(),
                requested: quantity,
                held: position.quantity,
            });
        }

        let avg_price = position.avg_price;
        let realized_profit = (price - avg_price) * quantity;
        let released_basis = avg_price * quantity;

        position.reduce(quantity);

        let exit = if position.is_exhausted() {
            self.positions.remove(symbol);
            ExitKind::Full
        } else {
            ExitKind::Partial
        };

        Ok(SellOutcome {
            realized_profit,
            released_basis,
            avg_price,
            exit,
        })
    }

    /// Record a fresh market price on an open position.
    pub fn mark(&mut self, symbol: &str, price: Decimal) {
        if let Some(position) = self.positions.get_mut(symbol) {
            position.mark(price);
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    /// Market value of all holdings given current prices. Symbols with no
    /// quote fall back to their last marked price.
    pub fn total_value(&self, prices: &HashMap<String, Decimal>) -> Decimal {
        self.positions
            .values()
            .map(|p| p.value_at(*prices.get(&p.symbol).unwrap_or(&p.last_price)))
            .sum()
    }

    /// Restore a position loaded from storage. Used only at startup.
    pub fn restore(&mut self, position: Position) {
        self.positions.insert(position.symbol.clone(), position);
    }
}

fn validate_positive(field: &'static str, value: Decimal) -> TradingResult<()> {
    if value <= Decimal::ZERO {
        return Err(TradingError::invalid(field, value));
    }
    Ok(())
}
