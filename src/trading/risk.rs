//! Risk controller: pre-trade gates evaluated before any order is placed.
//!
//! Every check is a pure function of its inputs. The only state that
//! persists across calls within a day (`trading_halted`, daily totals) lives
//! on the explicitly passed [`CapitalAccount`].

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::Position;
use crate::trading::account::CapitalAccount;
use crate::trading::config::TradingConfig;
use crate::trading::ledger::PositionLedger;

/// Why the daily circuit breaker fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    DailyProfitTarget,
    DailyLossLimit,
    DailyTradeCeiling,
}

impl HaltReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HaltReason::DailyProfitTarget => "daily profit target reached",
            HaltReason::DailyLossLimit => "daily loss limit reached",
            HaltReason::DailyTradeCeiling => "daily trade ceiling reached",
        }
    }
}

/// Stateless view over the configured limits.
#[derive(Debug, Clone)]
pub struct RiskController {
    config: TradingConfig,
}

impl RiskController {
    pub fn new(config: TradingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TradingConfig {
        &self.config
    }

    /// Daily circuit breaker. Fires when the day's return (measured against
    /// the day-start snapshot) reaches either bound, threshold inclusive, or
    /// when the trade-count ceiling is hit. The caller sets the halt flag.
    pub fn daily_limit_check(
        &self,
        account: &CapitalAccount,
        current_total_value: Decimal,
    ) -> Option<HaltReason> {
        let rate = account.daily_rate(current_total_value);
        if rate >= self.config.max_daily_profit {
            return Some(HaltReason::DailyProfitTarget);
        }
        if rate <= -self.config.max_daily_loss {
            return Some(HaltReason::DailyLossLimit);
        }
        if account.trades_today >= self.config.max_daily_trades {
            return Some(HaltReason::DailyTradeCeiling);
        }
        None
    }

    /// A brand-new entry is rejected once the ledger is at capacity. Adding
    /// to an already open position does not count against the limit.
    pub fn position_count_check(&self, ledger: &PositionLedger, symbol: &str) -> bool {
        ledger.contains(symbol) || ledger.len() < self.config.max_positions
    }

    /// Cap a requested buy amount at the per-position share of the total
    /// balance. Never expands the request.
    pub fn position_size_check(&self, requested: Decimal, total_balance: Decimal) -> Decimal {
        requested.min(total_balance * self.config.max_position_size)
    }

    /// Stop loss: true when the price has fallen to or through the
    /// cost-relative threshold.
    pub fn stop_loss_check(&self, position: &Position, current_price: Decimal) -> bool {
        current_price <= position.avg_price * (dec!(1) - self.config.stop_loss_rate)
    }

    /// Whether an order below the exchange minimum should even be attempted.
    pub fn meets_minimum(&self, amount: Decimal) -> bool {
        amount >= self.config.min_trade_amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn controller() -> RiskController {
        RiskController::new(TradingConfig::default())
    }

    fn account_with_snapshot(initial: Decimal) -> CapitalAccount {
        let mut account = CapitalAccount::new(initial, 9);
        account.initial_value = initial;
        account
    }

    #[test]
    fn test_daily_profit_threshold_inclusive() {
        let ctl = controller();
        let account = account_with_snapshot(dec!(1000000));

        // Exactly at +5% counts as triggering.
        assert_eq!(
            ctl.daily_limit_check(&account, dec!(1050000)),
            Some(HaltReason::DailyProfitTarget)
        );
        assert_eq!(ctl.daily_limit_check(&account, dec!(1049999)), None);
    }

    #[test]
    fn test_daily_loss_threshold_inclusive() {
        let ctl = controller();
        let account = account_with_snapshot(dec!(1000000));

        assert_eq!(
            ctl.daily_limit_check(&account, dec!(970000)),
            Some(HaltReason::DailyLossLimit)
        );
        assert_eq!(ctl.daily_limit_check(&account, dec!(970001)), None);
    }

    #[test]
    fn test_daily_trade_ceiling() {
        let ctl = controller();
        let mut account = account_with_snapshot(dec!(1000000));
        account.trades_today = 100;

        assert_eq!(
            ctl.daily_limit_check(&account, dec!(1000000)),
            Some(HaltReason::DailyTradeCeiling)
        );
    }

    #[test]
    fn test_position_count_blocks_new_entry_only() {
        let ctl = RiskController::new(TradingConfig {
            max_positions: 2,
            ..Default::default()
        });

        let mut ledger = PositionLedger::new();
        ledger.apply_buy("KRW-BTC", dec!(0.01), dec!(50000000), dec!(500000)).unwrap();
        ledger.apply_buy("KRW-ETH", dec!(0.1), dec!(3000000), dec!(300000)).unwrap();

        // At capacity: a new symbol is blocked, an add-on is not.
        assert!(!ctl.position_count_check(&ledger, "KRW-XRP"));
        assert!(ctl.position_count_check(&ledger, "KRW-BTC"));
    }

    #[test]
    fn test_position_size_cap() {
        let ctl = controller();
        assert_eq!(
            ctl.position_size_check(dec!(500000), dec!(1000000)),
            dec!(300000)
        );
        // Never expanded.
        assert_eq!(
            ctl.position_size_check(dec!(100000), dec!(1000000)),
            dec!(100000)
        );
    }

    #[test]
    fn test_stop_loss_boundary() {
        let ctl = controller();
        let pos = Position::open("KRW-BTC".to_string(), dec!(1), dec!(100), dec!(100));

        assert!(ctl.stop_loss_check(&pos, dec!(98)));
        assert!(!ctl.stop_loss_check(&pos, dec!(98.01)));
    }

    #[test]
    fn test_minimum_order_amount() {
        let ctl = controller();
        assert!(!ctl.meets_minimum(dec!(49999)));
        assert!(ctl.meets_minimum(dec!(50000)));
    }
}
