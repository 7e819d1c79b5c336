//! Data models for positions, trades, and signals.

mod position;
mod signal;
mod trade;

pub use position::{Position, QUANTITY_DUST};
pub use signal::{Signal, SignalAction};
pub use trade::{TradeRecord, TradeSide};
