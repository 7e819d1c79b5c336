//! Trade coordinator: runs one decision cycle at a time.
//!
//! Each cycle: roll the trading day if the wall clock crossed the boundary,
//! refresh prices, run the daily circuit breaker, force stop-loss exits for
//! every open position, then work through the signal batch. Ledger, account,
//! and risk state mutate under one writer lock; reporting reads take a
//! snapshot through the same lock.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::api::ExchangeClient;
use crate::db::Database;
use crate::error::TradingError;
use crate::execution::{ExecutionGateway, OrderRequest};
use crate::models::{Position, Signal, SignalAction, TradeRecord};
use crate::trading::{
    profit_rate, CapitalAccount, ExitKind, HaltPolicy, PositionLedger, RiskController,
    SignalSource, TradingConfig,
};

/// Market-data collaborator: current prices on demand.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn current_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>>;
}

#[async_trait]
impl MarketData for ExchangeClient {
    async fn current_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>> {
        ExchangeClient::current_prices(self, symbols).await
    }
}

/// Fixed price table; used where live quotes are unavailable or undesired.
pub struct StaticPrices(pub HashMap<String, Decimal>);

#[async_trait]
impl MarketData for StaticPrices {
    async fn current_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>> {
        Ok(symbols
            .iter()
            .filter_map(|s| self.0.get(s).map(|p| (s.clone(), *p)))
            .collect())
    }
}

/// Terminal states of one decision cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    ReceivedSignal,
    RiskChecked,
    Executed,
    LedgerUpdated,
    Recorded,
    Rejected,
    RolledBack,
}

/// What one processed signal ended as.
#[derive(Debug)]
pub struct CycleOutcome {
    pub state: CycleState,
    pub record: Option<TradeRecord>,
    pub reason: Option<String>,
}

impl CycleOutcome {
    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            state: CycleState::Rejected,
            record: None,
            reason: Some(reason.into()),
        }
    }

    fn rolled_back(reason: impl Into<String>) -> Self {
        Self {
            state: CycleState::RolledBack,
            record: None,
            reason: Some(reason.into()),
        }
    }

    fn recorded(record: TradeRecord) -> Self {
        Self {
            state: CycleState::Recorded,
            record: Some(record),
            reason: None,
        }
    }
}

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub trading: TradingConfig,
    pub poll_interval_secs: u64,
}

/// All mutable core state, guarded by one writer lock.
struct CoreState {
    ledger: PositionLedger,
    account: CapitalAccount,
}

/// Read-only view for reporting.
#[derive(Debug, Clone)]
pub struct BotSnapshot {
    pub account: CapitalAccount,
    pub positions: Vec<Position>,
}

/// The coordinator itself.
pub struct Bot {
    config: BotConfig,
    risk: RiskController,
    db: Database,
    market: Arc<dyn MarketData>,
    gateway: Arc<dyn ExecutionGateway>,
    signals: Box<dyn SignalSource>,
    state: Arc<RwLock<CoreState>>,
    shutdown: Arc<AtomicBool>,
}

impl Bot {
    pub fn new(
        config: BotConfig,
        db: Database,
        market: Arc<dyn MarketData>,
        gateway: Arc<dyn ExecutionGateway>,
        signals: Box<dyn SignalSource>,
    ) -> Self {
        let account = CapitalAccount::new(
            config.trading.initial_amount,
            config.trading.day_reset_hour,
        );
        let risk = RiskController::new(config.trading.clone());

        Self {
            config,
            risk,
            db,
            market,
            gateway,
            signals,
            state: Arc::new(RwLock::new(CoreState {
                ledger: PositionLedger::new(),
                account,
            })),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Restore ledger and account state from storage.
    pub async fn initialize(&mut self) -> Result<()> {
        let mut state = self.state.write().await;

        let (account, stored) =
            futures::try_join!(self.db.load_account(), self.db.load_positions())?;

        if let Some(account) = account {
            info!(
                cash = %account.cash_balance,
                halted = account.trading_halted,
                day = %account.trading_day,
                "restored account state"
            );
            state.account = account;
        }

        for row in &stored {
            state.ledger.restore(row.to_position());
        }

        info!(
            positions = stored.len(),
            mode = self.gateway.mode().as_str(),
            "bot initialized"
        );
        Ok(())
    }

    /// Main loop: serialized cycles until shutdown.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            interval = self.config.poll_interval_secs,
            mode = self.gateway.mode().as_str(),
            "starting trading loop"
        );

        let mut poll = interval(Duration::from_secs(self.config.poll_interval_secs));

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            poll.tick().await;
            if let Err(e) = self.tick().await {
                error!(error = %e, "cycle failed");
            }
        }

        let state = self.state.read().await;
        self.db.save_account(&state.account).await?;
        info!("trading loop stopped");
        Ok(())
    }

    /// One decision cycle.
    pub async fn tick(&mut self) -> Result<()> {
        let prices = self.fetch_prices().await?;
        let batch = self.signals.next_batch();

        let mut state = self.state.write().await;
        let state = &mut *state;

        for (symbol, price) in &prices {
            state.ledger.mark(symbol, *price);
        }
        let total_value = state.account.cash_balance + state.ledger.total_value(&prices);

        self.roll_day_if_needed(state, total_value).await?;
        self.run_daily_breaker(state, total_value).await?;
        self.run_stop_losses(state, &prices).await?;

        for signal in batch {
            if signal.action == SignalAction::Hold {
                continue;
            }
            match self.process_signal(state, &signal, &prices).await {
                Ok(outcome) => {
                    if let Some(reason) = &outcome.reason {
                        info!(
                            symbol = %signal.symbol,
                            state = ?outcome.state,
                            reason = %reason,
                            "signal not applied"
                        );
                    }
                }
                Err(e) => warn!(symbol = %signal.symbol, error = %e, "signal processing failed"),
            }
        }

        self.db.save_account(&state.account).await?;
        Ok(())
    }

    /// Prices for every target symbol plus everything currently held.
    async fn fetch_prices(&self) -> Result<HashMap<String, Decimal>> {
        let mut symbols: HashSet<String> =
            self.config.trading.target_symbols.iter().cloned().collect();
        {
            let state = self.state.read().await;
            symbols.extend(state.ledger.symbols());
        }
        let symbols: Vec<String> = symbols.into_iter().collect();
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }
        self.market
            .current_prices(&symbols)
            .await
            .context("market data fetch failed")
    }

    /// Day rollover: close out the previous day's summary, then reset.
    async fn roll_day_if_needed(&self, state: &mut CoreState, total_value: Decimal) -> Result<()> {
        let previous = state.account.clone();
        let rolled = state.account.maybe_rollover(
            Local::now(),
            self.config.trading.day_reset_hour,
            total_value,
        );
        if rolled {
            info!(
                day = %state.account.trading_day,
                opening_value = %total_value,
                "trading day rolled over"
            );
            self.db
                .save_daily_summary(
                    previous.trading_day,
                    previous.initial_value,
                    total_value,
                    previous.realized_profit_today,
                    previous.trades_today,
                )
                .await?;
            if previous.trading_halted {
                self.db
                    .record_risk_event("resume", "halt cleared at day rollover")
                    .await?;
            }
        }
        Ok(())
    }

    /// Daily circuit breaker; sets the halt flag and emits the event once.
    async fn run_daily_breaker(&self, state: &mut CoreState, total_value: Decimal) -> Result<()> {
        if state.account.trading_halted {
            return Ok(());
        }
        if let Some(reason) = self.risk.daily_limit_check(&state.account, total_value) {
            let rate = state.account.daily_rate(total_value);
            warn!(reason = reason.as_str(), daily_rate = %rate, "daily limit reached, halting");
            state.account.halt();
            self.db
                .record_risk_event(
                    "halt",
                    &format!("{} (daily rate {rate})", reason.as_str()),
                )
                .await?;
        }
        Ok(())
    }

    /// Stop-loss pass. Runs before any strategy signal each cycle and forces
    /// a full exit for every breached position.
    async fn run_stop_losses(
        &self,
        state: &mut CoreState,
        prices: &HashMap<String, Decimal>,
    ) -> Result<()> {
        let breached: Vec<(String, Decimal)> = state
            .ledger
            .iter()
            .filter_map(|pos| {
                prices
                    .get(&pos.symbol)
                    .filter(|price| self.risk.stop_loss_check(pos, **price))
                    .map(|price| (pos.symbol.clone(), *price))
            })
            .collect();

        for (symbol, price) in breached {
            if state.account.trading_halted
                && self.config.trading.halt_policy == HaltPolicy::BlockAll
            {
                warn!(symbol = %symbol, "stop loss breached but halt policy blocks all orders");
                continue;
            }
            warn!(symbol = %symbol, price = %price, "stop loss triggered, forcing exit");
            let outcome = self.execute_sell(state, &symbol, price, false).await?;
            if outcome.state != CycleState::Recorded {
                warn!(
                    symbol = %symbol,
                    state = ?outcome.state,
                    reason = ?outcome.reason,
                    "forced exit did not complete"
                );
            }
        }
        Ok(())
    }

    /// Run one signal through the cycle state machine.
    async fn process_signal(
        &self,
        state: &mut CoreState,
        signal: &Signal,
        prices: &HashMap<String, Decimal>,
    ) -> Result<CycleOutcome> {
        debug!(symbol = %signal.symbol, action = ?signal.action, state = ?CycleState::ReceivedSignal, "cycle start");

        let Some(price) = prices.get(&signal.symbol).copied() else {
            return Ok(CycleOutcome::rejected("no market price available"));
        };

        match signal.action {
            SignalAction::Buy => self.execute_buy(state, signal, price, prices).await,
            SignalAction::Sell => self.execute_sell(state, &signal.symbol, price, false).await,
            SignalAction::Hold => Ok(CycleOutcome::rejected("hold")),
        }
    }

    async fn execute_buy(
        &self,
        state: &mut CoreState,
        signal: &Signal,
        price: Decimal,
        prices: &HashMap<String, Decimal>,
    ) -> Result<CycleOutcome> {
        // Risk gates: halt, position count, size cap, cash, exchange minimum.
        if state.account.trading_halted {
            return Ok(CycleOutcome::rejected(
                TradingError::RiskHalted("new entries blocked for the day".to_string())
                    .to_string(),
            ));
        }
        if !self.risk.position_count_check(&state.ledger, &signal.symbol) {
            return Ok(CycleOutcome::rejected(format!(
                "position limit reached ({})",
                self.config.trading.max_positions
            )));
        }

        let total_balance = state.account.cash_balance + state.ledger.total_value(prices);
        let capped = self
            .risk
            .position_size_check(signal.suggested_amount, total_balance);
        let amount = capped.min(state.account.cash_balance);
        if !self.risk.meets_minimum(amount) {
            return Ok(CycleOutcome::rejected(format!(
                "order amount {amount} below exchange minimum"
            )));
        }
        debug!(symbol = %signal.symbol, %amount, state = ?CycleState::RiskChecked, "risk checks passed");

        let order = OrderRequest::market_buy(&signal.symbol, amount, price);
        let fill = match self.gateway.submit_order(&order).await {
            Ok(fill) => fill,
            Err(e) => return self.record_execution_failure(&signal.symbol, e).await,
        };
        debug!(symbol = %signal.symbol, quantity = %fill.quantity, state = ?CycleState::Executed, "order filled");

        if fill.quantity <= Decimal::ZERO || fill.price <= Decimal::ZERO {
            return self
                .record_rollback(&signal.symbol, "buy fill with no quantity or price")
                .await;
        }

        // Cost basis is net of fee; the full charge leaves cash.
        let net_cost = fill.quantity * fill.price;
        let position = state
            .ledger
            .apply_buy(&signal.symbol, fill.quantity, fill.price, net_cost)?
            .clone();
        state.account.settle_buy(net_cost + fill.fee);
        debug!(symbol = %signal.symbol, state = ?CycleState::LedgerUpdated, "ledger updated");

        self.db.save_position(&position).await?;

        let record = TradeRecord::buy(&signal.symbol, fill.quantity, fill.price, net_cost, fill.fee);
        self.db.record_trade(&record).await?;
        info!(
            symbol = %signal.symbol,
            quantity = %fill.quantity,
            price = %fill.price,
            avg_price = %position.avg_price,
            "buy recorded"
        );
        Ok(CycleOutcome::recorded(record))
    }

    /// Sell the entire open position for `symbol` at the current price.
    /// Shared by strategy sells, stop-loss exits, and `close_all`; `force`
    /// (emergency liquidation) overrides the halt policy.
    async fn execute_sell(
        &self,
        state: &mut CoreState,
        symbol: &str,
        price: Decimal,
        force: bool,
    ) -> Result<CycleOutcome> {
        let Some(position) = state.ledger.get(symbol).cloned() else {
            return Ok(CycleOutcome::rejected(
                TradingError::NoPosition(symbol.to_string()).to_string(),
            ));
        };

        if !force
            && state.account.trading_halted
            && self.config.trading.halt_policy == HaltPolicy::BlockAll
        {
            return Ok(CycleOutcome::rejected(
                TradingError::RiskHalted("halt policy blocks closing sells".to_string())
                    .to_string(),
            ));
        }
        debug!(symbol = %symbol, state = ?CycleState::RiskChecked, "risk checks passed");

        let requested = position.quantity;
        let order = OrderRequest::market_sell(symbol, requested, price);
        let fill = match self.gateway.submit_order(&order).await {
            Ok(fill) => fill,
            Err(e) => return self.record_execution_failure(symbol, e).await,
        };
        debug!(symbol = %symbol, quantity = %fill.quantity, state = ?CycleState::Executed, "order filled");

        // A fill larger than requested (or empty) violates ledger
        // assumptions; nothing is applied.
        if fill.quantity <= Decimal::ZERO || fill.quantity > requested {
            return self
                .record_rollback(
                    symbol,
                    &format!(
                        "sell fill {} outside requested {requested}",
                        fill.quantity
                    ),
                )
                .await;
        }
        if fill.quantity < requested {
            // Confirmed partial: shrink the mutation to the filled amount.
            warn!(
                symbol = %symbol,
                requested = %requested,
                filled = %fill.quantity,
                "partial sell fill, applying confirmed portion"
            );
        }

        let rate = profit_rate(&position, fill.price)?;
        if rate.suspect {
            warn!(symbol = %symbol, rate = %rate.rate, "suspect profit rate");
            self.db
                .record_risk_event(
                    "suspect_profit_rate",
                    &format!(
                        "{symbol}: rate {} from avg {} last {} current {}",
                        rate.rate, position.avg_price, position.last_price, fill.price
                    ),
                )
                .await?;
        }

        let outcome = state.ledger.apply_sell(symbol, fill.quantity, fill.price)?;
        let gross = fill.quantity * fill.price;
        let net_profit = outcome.realized_profit - fill.fee;
        state.account.settle_sell(gross - fill.fee, net_profit);
        debug!(symbol = %symbol, state = ?CycleState::LedgerUpdated, "ledger updated");

        match outcome.exit {
            ExitKind::Full => {
                self.db.remove_position(symbol).await?;
                info!(symbol = %symbol, profit = %net_profit, "position fully closed");
            }
            ExitKind::Partial => {
                let remaining = state
                    .ledger
                    .get(symbol)
                    .cloned()
                    .context("partial exit left no position")?;
                self.db.save_position(&remaining).await?;
                info!(
                    symbol = %symbol,
                    remaining = %remaining.quantity,
                    profit = %net_profit,
                    "position partially closed"
                );
            }
        }

        let record = TradeRecord::sell(
            symbol,
            fill.quantity,
            fill.price,
            gross,
            fill.fee,
            net_profit,
            rate.rate,
            rate.suspect,
        );
        self.db.record_trade(&record).await?;
        Ok(CycleOutcome::recorded(record))
    }

    /// Force-exit every open position, halt state notwithstanding.
    pub async fn close_all(&mut self) -> Result<Vec<TradeRecord>> {
        let prices = self.fetch_prices().await?;
        let mut state = self.state.write().await;
        let state = &mut *state;

        let mut records = Vec::new();
        for symbol in state.ledger.symbols() {
            let Some(price) = prices.get(&symbol).copied() else {
                warn!(symbol = %symbol, "no price for emergency exit, skipping");
                continue;
            };
            match self.execute_sell(state, &symbol, price, true).await {
                Ok(outcome) => {
                    if let Some(record) = outcome.record {
                        records.push(record);
                    }
                }
                Err(e) => error!(symbol = %symbol, error = %e, "emergency exit failed"),
            }
        }

        self.db.save_account(&state.account).await?;
        info!(count = records.len(), "emergency liquidation finished");
        Ok(records)
    }

    /// A gateway failure or timeout: nothing was applied, but the submission
    /// is logged as suspect for manual reconciliation.
    async fn record_execution_failure(
        &self,
        symbol: &str,
        error: TradingError,
    ) -> Result<CycleOutcome> {
        warn!(symbol = %symbol, error = %error, "execution failed, no ledger mutation");
        self.db
            .record_risk_event("execution_failed", &format!("{symbol}: {error}"))
            .await?;
        Ok(CycleOutcome::rolled_back(error.to_string()))
    }

    async fn record_rollback(&self, symbol: &str, reason: &str) -> Result<CycleOutcome> {
        warn!(symbol = %symbol, reason = %reason, "fill violates ledger assumptions, rolled back");
        self.db
            .record_risk_event("rolled_back", &format!("{symbol}: {reason}"))
            .await?;
        Ok(CycleOutcome::rolled_back(reason.to_string()))
    }

    /// Consistent read-only snapshot for reporting.
    pub async fn snapshot(&self) -> BotSnapshot {
        let state = self.state.read().await;
        BotSnapshot {
            account: state.account.clone(),
            positions: state.ledger.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ExecutionMode, Fill, SimulatedGateway};
    use crate::models::SignalAction;
    use crate::trading::{HoldSignals, ScriptedSignals};
    use rust_decimal_macros::dec;

    fn buy_signal(symbol: &str, amount: Decimal) -> Signal {
        Signal {
            symbol: symbol.to_string(),
            action: SignalAction::Buy,
            suggested_amount: amount,
        }
    }

    fn sell_signal(symbol: &str) -> Signal {
        Signal {
            symbol: symbol.to_string(),
            action: SignalAction::Sell,
            suggested_amount: Decimal::ZERO,
        }
    }

    fn prices(entries: &[(&str, Decimal)]) -> HashMap<String, Decimal> {
        entries
            .iter()
            .map(|(s, p)| (s.to_string(), *p))
            .collect()
    }

    async fn test_bot(
        config: TradingConfig,
        market_prices: HashMap<String, Decimal>,
        signals: Box<dyn SignalSource>,
    ) -> Bot {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let gateway = Arc::new(SimulatedGateway::new(
            config.initial_amount,
            if config.include_fees { config.fee_rate } else { Decimal::ZERO },
        ));
        Bot::new(
            BotConfig {
                trading: config,
                poll_interval_secs: 1,
            },
            db,
            Arc::new(StaticPrices(market_prices)),
            gateway,
            signals,
        )
    }

    fn btc_config() -> TradingConfig {
        TradingConfig {
            include_fees: false,
            target_symbols: vec!["KRW-BTC".to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_buy_cycle_updates_ledger_account_and_db() {
        let signals = ScriptedSignals::from_batches(vec![vec![buy_signal(
            "KRW-BTC",
            dec!(200000),
        )]]);
        let mut bot = test_bot(
            btc_config(),
            prices(&[("KRW-BTC", dec!(50000000))]),
            Box::new(signals),
        )
        .await;

        bot.tick().await.unwrap();

        let snap = bot.snapshot().await;
        assert_eq!(snap.positions.len(), 1);
        let pos = &snap.positions[0];
        assert_eq!(pos.avg_price, dec!(50000000));
        assert_eq!(pos.quantity, dec!(0.004));
        assert_eq!(snap.account.cash_balance, dec!(800000));

        let trades = bot.db.recent_trades(10).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].side, "BUY");

        let stored = bot.db.load_positions().await.unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_size_cap_and_minimum_gate() {
        // 500k requested against a 1M balance caps to 300k (30%).
        let signals = ScriptedSignals::from_batches(vec![vec![buy_signal(
            "KRW-BTC",
            dec!(500000),
        )]]);
        let mut bot = test_bot(
            btc_config(),
            prices(&[("KRW-BTC", dec!(50000000))]),
            Box::new(signals),
        )
        .await;

        bot.tick().await.unwrap();
        let snap = bot.snapshot().await;
        assert_eq!(snap.account.cash_balance, dec!(700000));

        // Below the 50k exchange minimum: rejected, no second position delta.
        let signals = ScriptedSignals::from_batches(vec![vec![buy_signal(
            "KRW-BTC",
            dec!(10000),
        )]]);
        let mut bot2 = test_bot(
            btc_config(),
            prices(&[("KRW-BTC", dec!(50000000))]),
            Box::new(signals),
        )
        .await;
        bot2.tick().await.unwrap();
        assert!(bot2.snapshot().await.positions.is_empty());
    }

    #[tokio::test]
    async fn test_position_count_blocks_new_symbol() {
        let config = TradingConfig {
            max_positions: 1,
            include_fees: false,
            target_symbols: vec!["KRW-BTC".to_string(), "KRW-ETH".to_string()],
            ..Default::default()
        };
        let signals = ScriptedSignals::from_batches(vec![
            vec![buy_signal("KRW-BTC", dec!(100000))],
            vec![buy_signal("KRW-ETH", dec!(100000))],
        ]);
        let mut bot = test_bot(
            config,
            prices(&[("KRW-BTC", dec!(50000000)), ("KRW-ETH", dec!(3000000))]),
            Box::new(signals),
        )
        .await;

        bot.tick().await.unwrap();
        bot.tick().await.unwrap();

        let snap = bot.snapshot().await;
        assert_eq!(snap.positions.len(), 1);
        assert_eq!(snap.positions[0].symbol, "KRW-BTC");
    }

    #[tokio::test]
    async fn test_sell_realizes_profit_and_closes() {
        let signals = ScriptedSignals::from_batches(vec![
            vec![buy_signal("KRW-BTC", dec!(100000))],
            vec![sell_signal("KRW-BTC")],
        ]);
        let mut bot = test_bot(
            btc_config(),
            prices(&[("KRW-BTC", dec!(50000000))]),
            Box::new(signals),
        )
        .await;

        bot.tick().await.unwrap();

        // Price moves up 4% before the sell cycle.
        bot.market = Arc::new(StaticPrices(prices(&[("KRW-BTC", dec!(52000000))])));
        bot.tick().await.unwrap();

        let snap = bot.snapshot().await;
        assert!(snap.positions.is_empty());
        assert_eq!(snap.account.realized_profit_today, dec!(4000));
        assert_eq!(snap.account.cash_balance, dec!(1004000));

        let trades = bot.db.recent_trades(10).await.unwrap();
        let sell = trades.iter().find(|t| t.side == "SELL").unwrap();
        assert_eq!(sell.profit, Some(4000.0));
        assert!(!sell.suspect);
    }

    #[tokio::test]
    async fn test_daily_halt_blocks_buys_allows_closing_sell() {
        // Day starts at 1M; realized profit pushes value to the +5% line.
        let signals = ScriptedSignals::from_batches(vec![
            vec![buy_signal("KRW-BTC", dec!(300000))],
            // After the halt: a buy must be rejected, a sell must pass.
            vec![buy_signal("KRW-BTC", dec!(100000)), sell_signal("KRW-BTC")],
        ]);
        let mut bot = test_bot(
            btc_config(),
            prices(&[("KRW-BTC", dec!(50000000))]),
            Box::new(signals),
        )
        .await;

        bot.tick().await.unwrap();

        // +20% on a 300k position lifts total value past the +5% target.
        bot.market = Arc::new(StaticPrices(prices(&[("KRW-BTC", dec!(60000000))])));
        bot.tick().await.unwrap();

        let snap = bot.snapshot().await;
        assert!(snap.account.trading_halted);
        // The buy was rejected, the closing sell went through.
        assert!(snap.positions.is_empty());
        let buys: Vec<_> = bot
            .db
            .recent_trades(10)
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.side == "BUY")
            .collect();
        assert_eq!(buys.len(), 1);
    }

    #[tokio::test]
    async fn test_block_all_policy_blocks_closing_sell() {
        let config = TradingConfig {
            halt_policy: HaltPolicy::BlockAll,
            include_fees: false,
            target_symbols: vec!["KRW-BTC".to_string()],
            ..Default::default()
        };
        let signals = ScriptedSignals::from_batches(vec![
            vec![buy_signal("KRW-BTC", dec!(300000))],
            vec![sell_signal("KRW-BTC")],
        ]);
        let mut bot = test_bot(
            config,
            prices(&[("KRW-BTC", dec!(50000000))]),
            Box::new(signals),
        )
        .await;

        bot.tick().await.unwrap();
        bot.market = Arc::new(StaticPrices(prices(&[("KRW-BTC", dec!(60000000))])));
        bot.tick().await.unwrap();

        let snap = bot.snapshot().await;
        assert!(snap.account.trading_halted);
        // Position survives: the halt blocks even closing sells.
        assert_eq!(snap.positions.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_loss_preempts_and_forces_exit() {
        let signals = ScriptedSignals::from_batches(vec![
            vec![buy_signal("KRW-BTC", dec!(100000))],
            vec![],
        ]);
        let mut bot = test_bot(
            btc_config(),
            prices(&[("KRW-BTC", dec!(50000000))]),
            Box::new(signals),
        )
        .await;

        bot.tick().await.unwrap();

        // 2% below average cost is exactly the stop; it must fire.
        bot.market = Arc::new(StaticPrices(prices(&[("KRW-BTC", dec!(49000000))])));
        bot.tick().await.unwrap();

        let snap = bot.snapshot().await;
        assert!(snap.positions.is_empty());
        assert_eq!(snap.account.realized_profit_today, dec!(-2000));
    }

    #[tokio::test]
    async fn test_missing_price_rejects_without_mutation() {
        let signals = ScriptedSignals::from_batches(vec![vec![buy_signal(
            "KRW-BTC",
            dec!(100000),
        )]]);
        // Market returns no quote for the target symbol.
        let mut bot = test_bot(btc_config(), HashMap::new(), Box::new(signals)).await;

        bot.tick().await.unwrap();
        assert!(bot.snapshot().await.positions.is_empty());
    }

    #[tokio::test]
    async fn test_close_all_ignores_halt() {
        let signals = ScriptedSignals::from_batches(vec![vec![
            buy_signal("KRW-BTC", dec!(100000)),
            buy_signal("KRW-ETH", dec!(100000)),
        ]]);
        let config = TradingConfig {
            include_fees: false,
            target_symbols: vec!["KRW-BTC".to_string(), "KRW-ETH".to_string()],
            ..Default::default()
        };
        let mut bot = test_bot(
            config,
            prices(&[("KRW-BTC", dec!(50000000)), ("KRW-ETH", dec!(3000000))]),
            Box::new(signals),
        )
        .await;

        bot.tick().await.unwrap();
        {
            let mut state = bot.state.write().await;
            state.account.halt();
        }

        let records = bot.close_all().await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(bot.snapshot().await.positions.is_empty());
    }

    // Gateway double that fills sells at half the requested quantity.
    struct HalfFillGateway;

    #[async_trait]
    impl ExecutionGateway for HalfFillGateway {
        fn mode(&self) -> ExecutionMode {
            ExecutionMode::Simulated
        }

        async fn submit_order(&self, order: &OrderRequest) -> crate::error::TradingResult<Fill> {
            match order.side {
                crate::models::TradeSide::Buy => Ok(Fill {
                    quantity: order.amount / order.price,
                    price: order.price,
                    fee: Decimal::ZERO,
                }),
                crate::models::TradeSide::Sell => Ok(Fill {
                    quantity: order.quantity / dec!(2),
                    price: order.price,
                    fee: Decimal::ZERO,
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_partial_sell_fill_shrinks_mutation() {
        let signals = ScriptedSignals::from_batches(vec![
            vec![buy_signal("KRW-BTC", dec!(100000))],
            vec![sell_signal("KRW-BTC")],
        ]);
        let db = Database::new("sqlite::memory:").await.unwrap();
        let mut bot = Bot::new(
            BotConfig {
                trading: btc_config(),
                poll_interval_secs: 1,
            },
            db,
            Arc::new(StaticPrices(prices(&[("KRW-BTC", dec!(50000000))]))),
            Arc::new(HalfFillGateway),
            Box::new(signals),
        );

        bot.tick().await.unwrap();
        bot.tick().await.unwrap();

        // Only the confirmed half left the ledger.
        let snap = bot.snapshot().await;
        assert_eq!(snap.positions.len(), 1);
        assert_eq!(snap.positions[0].quantity, dec!(0.001));
    }

    // Gateway double that rejects everything.
    struct RejectingGateway;

    #[async_trait]
    impl ExecutionGateway for RejectingGateway {
        fn mode(&self) -> ExecutionMode {
            ExecutionMode::Live
        }

        async fn submit_order(&self, _order: &OrderRequest) -> crate::error::TradingResult<Fill> {
            Err(TradingError::ExecutionRejected("exchange unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_gateway_failure_leaves_state_untouched() {
        let signals = ScriptedSignals::from_batches(vec![vec![buy_signal(
            "KRW-BTC",
            dec!(100000),
        )]]);
        let db = Database::new("sqlite::memory:").await.unwrap();
        let mut bot = Bot::new(
            BotConfig {
                trading: btc_config(),
                poll_interval_secs: 1,
            },
            db,
            Arc::new(StaticPrices(prices(&[("KRW-BTC", dec!(50000000))]))),
            Arc::new(RejectingGateway),
            Box::new(signals),
        );

        bot.tick().await.unwrap();

        let snap = bot.snapshot().await;
        assert!(snap.positions.is_empty());
        assert_eq!(snap.account.cash_balance, dec!(1000000));

        // The failure is on the audit trail.
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM risk_events WHERE kind = 'execution_failed'")
                .fetch_one(bot.db.pool())
                .await
                .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_restore_from_storage() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let pos = Position::open("KRW-BTC".to_string(), dec!(0.01), dec!(50000000), dec!(500000));
        db.save_position(&pos).await.unwrap();

        let mut account = CapitalAccount::new(dec!(1000000), 9);
        account.cash_balance = dec!(500000);
        db.save_account(&account).await.unwrap();

        let mut bot = Bot::new(
            BotConfig {
                trading: btc_config(),
                poll_interval_secs: 1,
            },
            db,
            Arc::new(StaticPrices(HashMap::new())),
            Arc::new(SimulatedGateway::new(dec!(500000), Decimal::ZERO)),
            Box::new(HoldSignals),
        );
        bot.initialize().await.unwrap();

        let snap = bot.snapshot().await;
        assert_eq!(snap.positions.len(), 1);
        assert_eq!(snap.account.cash_balance, dec!(500000));
    }
}
