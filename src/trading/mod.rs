//! Trading core: ledger, capital account, profit computation, risk gates.

mod account;
mod config;
mod ledger;
mod profit;
mod risk;
mod signal_source;

pub use account::CapitalAccount;
pub use config::{HaltPolicy, TradingConfig};
pub use ledger::{ExitKind, PositionLedger, SellOutcome};
pub use profit::{profit_rate, ProfitRate, MAX_PLAUSIBLE_RATE};
pub use risk::{HaltReason, RiskController};
pub use signal_source::{HoldSignals, ScriptedSignals, SignalSource};
