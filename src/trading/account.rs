//! Capital account: cash, the day-start snapshot, and the halt flag.
//!
//! Daily state is never ambient: the account is owned by the coordinator
//! and passed explicitly to every check that needs it. Rollover is a single
//! transition taken at the start of a cycle, driven by the wall clock.

use chrono::{DateTime, Duration, Local, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Mutable account state for the current trading day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalAccount {
    /// Total account value snapshotted at the last day boundary
    pub initial_value: Decimal,

    /// Uncommitted quote-currency funds available for new buys
    pub cash_balance: Decimal,

    /// Realized gains/losses from sells since the day boundary
    pub realized_profit_today: Decimal,

    /// Orders executed since the day boundary
    pub trades_today: u32,

    /// Set by the risk controller; cleared only at rollover
    pub trading_halted: bool,

    /// The trading day this state belongs to
    pub trading_day: NaiveDate,
}

impl CapitalAccount {
    /// Start a fresh account funded with `initial_amount` of cash.
    pub fn new(initial_amount: Decimal, day_reset_hour: u32) -> Self {
        Self {
            initial_value: initial_amount,
            cash_balance: initial_amount,
            realized_profit_today: Decimal::ZERO,
            trades_today: 0,
            trading_halted: false,
            trading_day: trading_day_of(Local::now(), day_reset_hour),
        }
    }

    /// Roll into a new trading day if the wall clock has crossed the
    /// boundary. Returns true when a rollover happened.
    ///
    /// `current_total_value` (cash plus marked positions) becomes the new
    /// day-start snapshot; realized profit, the trade counter, and the halt
    /// flag all reset together.
    pub fn maybe_rollover(
        &mut self,
        now: DateTime<Local>,
        day_reset_hour: u32,
        current_total_value: Decimal,
    ) -> bool {
        let today = trading_day_of(now, day_reset_hour);
        if today == self.trading_day {
            return false;
        }

        self.trading_day = today;
        self.initial_value = current_total_value;
        self.realized_profit_today = Decimal::ZERO;
        self.trades_today = 0;
        self.trading_halted = false;
        true
    }

    /// Apply the cash effect of an executed buy: the full charge including
    /// fee leaves the balance.
    pub fn settle_buy(&mut self, charged: Decimal) {
        self.cash_balance -= charged;
        self.trades_today += 1;
    }

    /// Apply the cash effect of an executed sell: net proceeds come back and
    /// the realized result counts toward the daily total.
    pub fn settle_sell(&mut self, net_proceeds: Decimal, realized_profit: Decimal) {
        self.cash_balance += net_proceeds;
        self.realized_profit_today += realized_profit;
        self.trades_today += 1;
    }

    pub fn halt(&mut self) {
        self.trading_halted = true;
    }

    /// Daily return measured against the day-start snapshot.
    pub fn daily_rate(&self, current_total_value: Decimal) -> Decimal {
        if self.initial_value.is_zero() {
            return Decimal::ZERO;
        }
        (current_total_value - self.initial_value) / self.initial_value
    }
}

/// The trading day that `now` falls in, where days start at `reset_hour`
/// local time rather than midnight.
fn trading_day_of(now: DateTime<Local>, reset_hour: u32) -> NaiveDate {
    (now - Duration::hours(reset_hour as i64)).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn local(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_day_starts_at_reset_hour() {
        // 08:59 still belongs to the previous trading day; 09:00 starts a new one.
        assert_eq!(
            trading_day_of(local(2025, 3, 10, 8), 9),
            NaiveDate::from_ymd_opt(2025, 3, 9).unwrap()
        );
        assert_eq!(
            trading_day_of(local(2025, 3, 10, 9), 9),
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
        );
    }

    #[test]
    fn test_rollover_resets_daily_state() {
        let mut account = CapitalAccount::new(dec!(1000000), 9);
        account.trading_day = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        account.realized_profit_today = dec!(42000);
        account.trades_today = 7;
        account.trading_halted = true;

        let rolled = account.maybe_rollover(local(2025, 3, 10, 10), 9, dec!(1042000));
        assert!(rolled);
        assert_eq!(account.initial_value, dec!(1042000));
        assert_eq!(account.realized_profit_today, Decimal::ZERO);
        assert_eq!(account.trades_today, 0);
        assert!(!account.trading_halted);
    }

    #[test]
    fn test_no_rollover_within_same_day() {
        let mut account = CapitalAccount::new(dec!(1000000), 9);
        account.trading_day = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        account.trading_halted = true;

        let rolled = account.maybe_rollover(local(2025, 3, 10, 23), 9, dec!(900000));
        assert!(!rolled);
        assert!(account.trading_halted);
        assert_eq!(account.initial_value, dec!(1000000));
    }

    #[test]
    fn test_settlement_updates_cash_and_profit() {
        let mut account = CapitalAccount::new(dec!(1000000), 9);
        account.settle_buy(dec!(300000));
        assert_eq!(account.cash_balance, dec!(700000));

        account.settle_sell(dec!(310000), dec!(10000));
        assert_eq!(account.cash_balance, dec!(1010000));
        assert_eq!(account.realized_profit_today, dec!(10000));
        assert_eq!(account.trades_today, 2);
    }

    #[test]
    fn test_daily_rate_guards_zero_snapshot() {
        let mut account = CapitalAccount::new(dec!(1000000), 9);
        assert_eq!(account.daily_rate(dec!(1050000)), dec!(0.05));

        account.initial_value = Decimal::ZERO;
        assert_eq!(account.daily_rate(dec!(1050000)), Decimal::ZERO);
    }
}
