//! Signal model consumed from the external signal source.
//!
//! Signal generation (indicator evaluation, strategy scoring) lives outside
//! this crate; the coordinator only consumes the resulting decisions.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Decision for one symbol in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

/// A buy/sell/hold decision with the notional the source wants deployed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Market symbol, e.g. "KRW-BTC"
    pub symbol: String,

    /// Desired action
    pub action: SignalAction,

    /// Suggested quote-currency amount for a BUY; ignored for SELL (sells
    /// close the whole position) and HOLD
    #[serde(default)]
    pub suggested_amount: Decimal,
}

impl Signal {
    pub fn hold(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            action: SignalAction::Hold,
            suggested_amount: Decimal::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_deserializes_without_amount() {
        let sig: Signal =
            serde_json::from_str(r#"{"symbol":"KRW-BTC","action":"SELL"}"#).unwrap();
        assert_eq!(sig.action, SignalAction::Sell);
        assert_eq!(sig.suggested_amount, Decimal::ZERO);
    }

    #[test]
    fn test_hold_constructor() {
        let sig = Signal::hold("KRW-ETH");
        assert_eq!(sig.action, SignalAction::Hold);
        assert_eq!(sig.suggested_amount, Decimal::ZERO);
    }
}
