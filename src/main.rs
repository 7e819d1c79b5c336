//! Upbit spot auto-trader
//!
//! Tracks holdings at weighted average cost, computes realized/unrealized
//! performance, and gates every order through the same daily and
//! per-position risk checks in simulated and live execution.

mod api;
mod bot;
mod db;
mod error;
mod execution;
mod models;
mod performance;
mod trading;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::ExchangeClient;
use crate::bot::{Bot, BotConfig};
use crate::db::Database;
use crate::execution::{ExecutionGateway, LiveGateway, SimulatedGateway};
use crate::performance::PerformanceReport;
use crate::trading::{HoldSignals, ScriptedSignals, SignalSource, TradingConfig};

/// Upbit auto-trader CLI.
#[derive(Parser)]
#[command(name = "upbit-trader")]
#[command(about = "Automated spot trading with average-cost tracking and daily risk limits", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./trader.db?mode=rwc")]
    database: String,

    /// Trading config file (JSON); defaults apply when absent
    #[arg(short, long, default_value = "trader_config.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the trading loop
    Run {
        /// Starting capital in KRW (overrides the config file)
        #[arg(short, long)]
        portfolio: Option<f64>,

        /// Polling interval in seconds
        #[arg(short, long, default_value = "30")]
        interval: u64,

        /// Submit real orders (default is simulated execution)
        #[arg(long)]
        live: bool,

        /// JSON file of scripted signal batches to replay
        #[arg(long)]
        signals: Option<PathBuf>,
    },

    /// Show account state and open positions
    Status,

    /// Show recent trades and the performance report
    History {
        /// Number of trades to include
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// Show the effective trading configuration
    Config,

    /// Force-exit every open position
    CloseAll {
        /// Submit real orders (default is simulated execution)
        #[arg(long)]
        live: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let db = Database::new(&cli.database).await?;
    let mut trading_config = TradingConfig::load(&cli.config)?;

    match cli.command {
        Commands::Run {
            portfolio,
            interval,
            live,
            signals,
        } => {
            if let Some(portfolio) = portfolio {
                trading_config.initial_amount = Decimal::try_from(portfolio)?;
            }

            let signal_source: Box<dyn SignalSource> = match &signals {
                Some(path) => Box::new(ScriptedSignals::from_file(path)?),
                None => Box::new(HoldSignals),
            };

            let (market, gateway) = build_execution(&trading_config, live, &db).await?;

            info!(
                live,
                interval,
                capital = %trading_config.initial_amount,
                symbols = trading_config.target_symbols.len(),
                "starting trader"
            );

            let mut bot = Bot::new(
                BotConfig {
                    trading: trading_config,
                    poll_interval_secs: interval,
                },
                db,
                market,
                gateway,
                signal_source,
            );
            bot.initialize().await?;

            println!("\n=== Upbit Auto-Trader ===");
            println!("Mode:     {}", if live { "LIVE TRADING" } else { "SIMULATED" });
            println!("Interval: {interval}s");
            println!("\nPress Ctrl+C to stop.\n");

            bot.run().await?;

            let snapshot = bot.snapshot().await;
            print_snapshot(&snapshot);
        }

        Commands::Status => {
            let Some(account) = db.load_account().await? else {
                println!("No trading session found. Run 'upbit-trader run' to start.");
                return Ok(());
            };
            let positions = db.load_positions().await?;

            let sign = if account.realized_profit_today >= Decimal::ZERO { "+" } else { "" };
            println!("\n=== Account ===");
            println!("Trading Day:      {}", account.trading_day);
            println!("Day-Start Value:  {:.0}", account.initial_value);
            println!("Cash Balance:     {:.0}", account.cash_balance);
            println!("Realized Today:   {sign}{:.0}", account.realized_profit_today);
            println!("Trades Today:     {}", account.trades_today);
            println!(
                "Trading:          {}",
                if account.trading_halted { "HALTED" } else { "active" }
            );

            println!("\n=== Open Positions ({}) ===", positions.len());
            for pos in &positions {
                let unrealized = (pos.last_price - pos.avg_price) * pos.quantity;
                println!(
                    "  {:<10} {:>14.8} @ {:>14.0} (last {:>14.0}, {:+.0})",
                    pos.symbol, pos.quantity, pos.avg_price, pos.last_price, unrealized
                );
            }
            if positions.is_empty() {
                println!("  none");
            }
        }

        Commands::History { limit } => {
            let trades = db.recent_trades(limit).await?;
            if trades.is_empty() {
                println!("No trades recorded yet.");
                return Ok(());
            }

            println!(
                "\n{:<20} {:<10} {:<5} {:>14} {:>14} {:>12}",
                "TIME", "SYMBOL", "SIDE", "PRICE", "AMOUNT", "PROFIT"
            );
            println!("{}", "-".repeat(80));
            for trade in &trades {
                println!(
                    "{:<20} {:<10} {:<5} {:>14.0} {:>14.0} {:>12}{}",
                    &trade.executed_at[..19.min(trade.executed_at.len())],
                    trade.symbol,
                    trade.side,
                    trade.price,
                    trade.amount,
                    trade
                        .profit
                        .map(|p| format!("{p:+.0}"))
                        .unwrap_or_else(|| "-".to_string()),
                    if trade.suspect { " (suspect)" } else { "" },
                );
            }

            println!("\n{}", PerformanceReport::from_trades(&trades));
        }

        Commands::Config => {
            println!("\n=== Trading Configuration ===\n");
            println!("Capital:              {}", trading_config.initial_amount);
            println!("Max Daily Profit:     {}%", trading_config.max_daily_profit * Decimal::from(100));
            println!("Max Daily Loss:       {}%", trading_config.max_daily_loss * Decimal::from(100));
            println!("Max Positions:        {}", trading_config.max_positions);
            println!("Max Position Size:    {}%", trading_config.max_position_size * Decimal::from(100));
            println!("Stop Loss:            {}%", trading_config.stop_loss_rate * Decimal::from(100));
            println!("Min Trade Amount:     {}", trading_config.min_trade_amount);
            println!("Max Daily Trades:     {}", trading_config.max_daily_trades);
            println!("Fees:                 {} ({}%)",
                if trading_config.include_fees { "on" } else { "off" },
                trading_config.fee_rate * Decimal::from(100));
            println!("Halt Policy:          {:?}", trading_config.halt_policy);
            println!("Day Reset Hour:       {:02}:00", trading_config.day_reset_hour);
            println!("Order Timeout:        {}s", trading_config.order_timeout_secs);
            println!("Symbols:              {}", trading_config.target_symbols.join(", "));
        }

        Commands::CloseAll { live } => {
            let (market, gateway) = build_execution(&trading_config, live, &db).await?;

            let mut bot = Bot::new(
                BotConfig {
                    trading: trading_config,
                    poll_interval_secs: 30,
                },
                db,
                market,
                gateway,
                Box::new(HoldSignals),
            );
            bot.initialize().await?;

            let records = bot.close_all().await?;
            if records.is_empty() {
                println!("No positions to close.");
            } else {
                println!("Closed {} positions:", records.len());
                for record in &records {
                    let profit = record.profit.unwrap_or_default();
                    let sign = if profit >= Decimal::ZERO { "+" } else { "" };
                    println!(
                        "  {} {:.8} @ {:.0} (profit {sign}{profit:.0})",
                        record.symbol, record.quantity, record.price
                    );
                }
            }
        }
    }

    Ok(())
}

/// Market-data source and execution gateway for the chosen mode. Live mode
/// needs exchange credentials; simulated mode only reads public tickers and
/// resumes its virtual wallet from any stored session.
async fn build_execution(
    config: &TradingConfig,
    live: bool,
    db: &Database,
) -> Result<(Arc<ExchangeClient>, Arc<dyn ExecutionGateway>)> {
    if live {
        let client = Arc::new(ExchangeClient::from_env()?);
        let gateway: Arc<dyn ExecutionGateway> = Arc::new(LiveGateway::new(
            client.clone(),
            Duration::from_secs(config.order_timeout_secs),
        ));
        Ok((client, gateway))
    } else {
        let client = Arc::new(ExchangeClient::public()?);
        let fee_rate = if config.include_fees {
            config.fee_rate
        } else {
            Decimal::ZERO
        };
        let gateway = Arc::new(SimulatedGateway::new(config.initial_amount, fee_rate));
        if let Some(account) = db.load_account().await? {
            let positions: Vec<_> = db
                .load_positions()
                .await?
                .iter()
                .map(|row| row.to_position())
                .collect();
            gateway
                .restore_holdings(account.cash_balance, &positions)
                .await;
        }
        let gateway: Arc<dyn ExecutionGateway> = gateway;
        Ok((client, gateway))
    }
}

fn print_snapshot(snapshot: &crate::bot::BotSnapshot) {
    let sign = if snapshot.account.realized_profit_today >= Decimal::ZERO { "+" } else { "" };
    println!("\n=== Final State ===");
    println!("Cash Balance:    {:.0}", snapshot.account.cash_balance);
    println!("Realized Today:  {sign}{:.0}", snapshot.account.realized_profit_today);
    println!("Trades Today:    {}", snapshot.account.trades_today);
    println!("Open Positions:  {}", snapshot.positions.len());
    for pos in &snapshot.positions {
        println!(
            "  {} {:.8} @ {:.0}",
            pos.symbol, pos.quantity, pos.avg_price
        );
    }
}
