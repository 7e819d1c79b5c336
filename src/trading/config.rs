//! Trading and risk configuration.

use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// What a daily halt blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltPolicy {
    /// Halt blocks every order, including closing sells.
    BlockAll,
    /// Halt blocks new entries but still lets sells reduce risk.
    AllowClosing,
}

/// Configuration for position sizing and risk limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Quote-currency capital the bot is allowed to work with
    pub initial_amount: Decimal,

    /// Daily realized-return ceiling; reaching it halts the day
    pub max_daily_profit: Decimal,

    /// Daily realized-loss floor (positive number); reaching it halts the day
    pub max_daily_loss: Decimal,

    /// Maximum number of concurrently open positions
    pub max_positions: usize,

    /// Single-position cap as a fraction of total balance
    pub max_position_size: Decimal,

    /// Stop-loss distance below average cost (e.g. 0.02 = 2%)
    pub stop_loss_rate: Decimal,

    /// Smallest order the exchange accepts, in quote currency
    pub min_trade_amount: Decimal,

    /// Hard ceiling on orders per trading day
    pub max_daily_trades: u32,

    /// Whether exchange fees are modeled/deducted
    pub include_fees: bool,

    /// Taker fee rate (Upbit spot: 0.05%)
    pub fee_rate: Decimal,

    /// Behavior of sells while the daily halt is active
    pub halt_policy: HaltPolicy,

    /// Local hour at which the trading day rolls over
    pub day_reset_hour: u32,

    /// Timeout for a single order submission, in seconds
    pub order_timeout_secs: u64,

    /// Markets the bot trades
    pub target_symbols: Vec<String>,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            initial_amount: dec!(1000000),   // 1M KRW
            max_daily_profit: dec!(0.05),    // +5% realized stops the day
            max_daily_loss: dec!(0.03),      // -3% realized stops the day
            max_positions: 5,
            max_position_size: dec!(0.3),    // 30% of balance per position
            stop_loss_rate: dec!(0.02),      // 2% below average cost
            min_trade_amount: dec!(50000),   // 50k KRW exchange minimum
            max_daily_trades: 100,
            include_fees: true,
            fee_rate: dec!(0.0005),          // 0.05%
            halt_policy: HaltPolicy::AllowClosing,
            day_reset_hour: 9,
            order_timeout_secs: 10,
            target_symbols: vec![
                "KRW-BTC".to_string(),
                "KRW-ETH".to_string(),
                "KRW-XRP".to_string(),
                "KRW-ADA".to_string(),
                "KRW-SOL".to_string(),
            ],
        }
    }
}

impl TradingConfig {
    /// Load overrides from a JSON file, or defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Fee for a gross order amount under the current fee settings.
    pub fn fee_for(&self, amount: Decimal) -> Decimal {
        if self.include_fees {
            amount * self.fee_rate
        } else {
            Decimal::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_disabled() {
        let config = TradingConfig {
            include_fees: false,
            ..Default::default()
        };
        assert_eq!(config.fee_for(dec!(100000)), Decimal::ZERO);
    }

    #[test]
    fn test_fee_rate_applied() {
        let config = TradingConfig::default();
        assert_eq!(config.fee_for(dec!(100000)), dec!(50));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = TradingConfig::load(Path::new("/nonexistent/config.json")).unwrap();
        assert_eq!(config.max_positions, 5);
        assert_eq!(config.halt_policy, HaltPolicy::AllowClosing);
    }
}
