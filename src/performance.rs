//! Performance report over the bot's own recorded trades.

use rust_decimal::Decimal;
use statrs::statistics::Statistics;

use crate::db::StoredTrade;
use crate::models::TradeSide;

/// Aggregate performance over a slice of recorded trades. Only sells carry
/// realized profit; buys count toward volume and trade totals.
#[derive(Debug, Clone, Default)]
pub struct PerformanceReport {
    pub total_trades: u32,
    pub closed_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub win_rate: f64,
    pub total_volume: Decimal,
    pub realized_profit: Decimal,
    pub profit_factor: f64,
    pub max_drawdown_pct: f64,
    /// Standard deviation of per-trade realized returns
    pub return_dispersion: f64,
    pub suspect_trades: u32,
}

impl PerformanceReport {
    /// Build a report from stored trades (any order; sells are re-sorted by
    /// execution time for the drawdown walk).
    pub fn from_trades(trades: &[StoredTrade]) -> Self {
        let mut report = Self {
            total_trades: trades.len() as u32,
            ..Default::default()
        };

        report.total_volume = trades
            .iter()
            .map(|t| Decimal::try_from(t.amount).unwrap_or(Decimal::ZERO))
            .sum();
        report.suspect_trades = trades.iter().filter(|t| t.suspect).count() as u32;

        let mut sells: Vec<&StoredTrade> = trades
            .iter()
            .filter(|t| t.side() == Some(TradeSide::Sell))
            .collect();
        sells.sort_by(|a, b| a.executed_at.cmp(&b.executed_at));

        let profits: Vec<f64> = sells.iter().filter_map(|t| t.profit).collect();
        if profits.is_empty() {
            return report;
        }

        report.closed_trades = profits.len() as u32;
        report.winning_trades = profits.iter().filter(|&&p| p > 0.0).count() as u32;
        report.losing_trades = profits.iter().filter(|&&p| p < 0.0).count() as u32;
        report.win_rate = report.winning_trades as f64 / profits.len() as f64;
        report.realized_profit = profits
            .iter()
            .map(|&p| Decimal::try_from(p).unwrap_or(Decimal::ZERO))
            .sum();

        let gross_profit: f64 = profits.iter().filter(|&&p| p > 0.0).sum();
        let gross_loss: f64 = profits.iter().filter(|&&p| p < 0.0).map(|p| p.abs()).sum();
        if gross_loss > 0.0 {
            report.profit_factor = gross_profit / gross_loss;
        }

        report.max_drawdown_pct = max_drawdown(&profits);

        let returns: Vec<f64> = sells.iter().filter_map(|t| t.profit_rate).collect();
        if returns.len() >= 2 {
            report.return_dispersion = returns.std_dev();
        }

        report
    }
}

/// Largest peak-to-trough loss, as a fraction of the peak, along the equity
/// curve implied by the profit sequence.
fn max_drawdown(profits: &[f64]) -> f64 {
    let mut equity = 0.0f64;
    let mut peak = 0.0f64;
    let mut max_dd = 0.0f64;

    for profit in profits {
        equity += profit;
        if equity > peak {
            peak = equity;
        }
        if peak > 0.0 {
            let dd = (peak - equity) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }

    max_dd
}

impl std::fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Performance ===")?;
        writeln!(f, "Trades:          {} ({} closed)", self.total_trades, self.closed_trades)?;
        writeln!(f, "Win Rate:        {:.1}%", self.win_rate * 100.0)?;
        writeln!(f, "Realized P&L:    {:.0}", self.realized_profit)?;
        writeln!(f, "Profit Factor:   {:.2}", self.profit_factor)?;
        writeln!(f, "Max Drawdown:    {:.1}%", self.max_drawdown_pct * 100.0)?;
        writeln!(f, "Volume:          {:.0}", self.total_volume)?;
        if self.suspect_trades > 0 {
            writeln!(f, "Suspect Trades:  {} (check risk_events)", self.suspect_trades)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sell(profit: f64, rate: f64, at: &str) -> StoredTrade {
        StoredTrade {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: "KRW-BTC".to_string(),
            side: "SELL".to_string(),
            quantity: 0.01,
            price: 50_000_000.0,
            amount: 500_000.0,
            fee: 250.0,
            profit: Some(profit),
            profit_rate: Some(rate),
            suspect: false,
            executed_at: at.to_string(),
        }
    }

    fn buy(at: &str) -> StoredTrade {
        StoredTrade {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: "KRW-BTC".to_string(),
            side: "BUY".to_string(),
            quantity: 0.01,
            price: 50_000_000.0,
            amount: 500_000.0,
            fee: 250.0,
            profit: None,
            profit_rate: None,
            suspect: false,
            executed_at: at.to_string(),
        }
    }

    #[test]
    fn test_win_rate_counts_sells_only() {
        let trades = vec![
            buy("2025-03-01T00:00:00+00:00"),
            sell(100_000.0, 0.2, "2025-03-02T00:00:00+00:00"),
            sell(-50_000.0, -0.1, "2025-03-03T00:00:00+00:00"),
            sell(200_000.0, 0.4, "2025-03-04T00:00:00+00:00"),
        ];

        let report = PerformanceReport::from_trades(&trades);
        assert_eq!(report.total_trades, 4);
        assert_eq!(report.closed_trades, 3);
        assert_eq!(report.winning_trades, 2);
        assert_eq!(report.losing_trades, 1);
        assert!((report.win_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.realized_profit, rust_decimal_macros::dec!(250000));
        assert!((report.profit_factor - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_drawdown_walk() {
        // Equity 100 -> 150 -> 70 -> 50 -> 150: worst trough is 100/150.
        let profits = [100.0, 50.0, -80.0, -20.0, 100.0];
        let dd = max_drawdown(&profits);
        assert!(dd > 0.66 && dd < 0.67);
    }

    #[test]
    fn test_empty_history() {
        let report = PerformanceReport::from_trades(&[]);
        assert_eq!(report.total_trades, 0);
        assert_eq!(report.win_rate, 0.0);
        assert_eq!(report.realized_profit, Decimal::ZERO);
    }
}
