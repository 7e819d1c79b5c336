//! Paper-trading gateway backed by an isolated virtual wallet.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{TradingError, TradingResult};
use crate::models::{Position, TradeSide};

use super::{ExecutionGateway, ExecutionMode, Fill, OrderRequest};

/// Quote currency key in the virtual wallet.
const QUOTE: &str = "KRW";

/// Simulated execution: every order fills fully at the requested price,
/// minus the configured fee. Balances live entirely in memory and nothing
/// here ever touches the network.
pub struct SimulatedGateway {
    balances: RwLock<HashMap<String, Decimal>>,
    fee_rate: Decimal,
}

impl SimulatedGateway {
    pub fn new(initial_cash: Decimal, fee_rate: Decimal) -> Self {
        let mut balances = HashMap::new();
        balances.insert(QUOTE.to_string(), initial_cash);
        Self {
            balances: RwLock::new(balances),
            fee_rate,
        }
    }

    /// Balance of one asset in the virtual wallet.
    pub async fn balance(&self, asset: &str) -> Decimal {
        *self
            .balances
            .read()
            .await
            .get(asset)
            .unwrap_or(&Decimal::ZERO)
    }

    /// Overwrite an asset balance. Test and bootstrap hook.
    pub async fn set_balance(&self, asset: &str, balance: Decimal) {
        self.balances.write().await.insert(asset.to_string(), balance);
    }

    /// Align the virtual wallet with ledger state restored from storage, so
    /// a resumed paper session can sell what it already holds.
    pub async fn restore_holdings(&self, cash: Decimal, positions: &[Position]) {
        let mut balances = self.balances.write().await;
        balances.clear();
        balances.insert(QUOTE.to_string(), cash);
        for position in positions {
            *balances
                .entry(Self::base_asset(&position.symbol).to_string())
                .or_default() += position.quantity;
        }
    }

    fn base_asset(symbol: &str) -> &str {
        symbol.split('-').nth(1).unwrap_or(symbol)
    }
}

#[async_trait]
impl ExecutionGateway for SimulatedGateway {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Simulated
    }

    async fn submit_order(&self, order: &OrderRequest) -> TradingResult<Fill> {
        if order.price <= Decimal::ZERO {
            return Err(TradingError::invalid("price", order.price));
        }

        let asset = Self::base_asset(&order.symbol);
        let mut balances = self.balances.write().await;

        match order.side {
            TradeSide::Buy => {
                if order.amount <= Decimal::ZERO {
                    return Err(TradingError::invalid("amount", order.amount));
                }
                let cash = *balances.get(QUOTE).unwrap_or(&Decimal::ZERO);
                if cash < order.amount {
                    return Err(TradingError::ExecutionRejected(format!(
                        "virtual balance {cash} below order amount {}",
                        order.amount
                    )));
                }

                let fee = order.amount * self.fee_rate;
                let quantity = (order.amount - fee) / order.price;

                *balances.entry(QUOTE.to_string()).or_default() -= order.amount;
                *balances.entry(asset.to_string()).or_default() += quantity;

                debug!(symbol = %order.symbol, %quantity, fee = %fee, "simulated buy filled");
                Ok(Fill {
                    quantity,
                    price: order.price,
                    fee,
                })
            }
            TradeSide::Sell => {
                if order.quantity <= Decimal::ZERO {
                    return Err(TradingError::invalid("quantity", order.quantity));
                }
                let held = *balances.get(asset).unwrap_or(&Decimal::ZERO);
                if held < order.quantity {
                    return Err(TradingError::ExecutionRejected(format!(
                        "virtual balance {held} {asset} below order quantity {}",
                        order.quantity
                    )));
                }

                let gross = order.quantity * order.price;
                let fee = gross * self.fee_rate;

                *balances.entry(asset.to_string()).or_default() -= order.quantity;
                *balances.entry(QUOTE.to_string()).or_default() += gross - fee;

                debug!(symbol = %order.symbol, quantity = %order.quantity, fee = %fee, "simulated sell filled");
                Ok(Fill {
                    quantity: order.quantity,
                    price: order.price,
                    fee,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_buy_moves_virtual_balances() {
        let gateway = SimulatedGateway::new(dec!(1000000), dec!(0.0005));
        let order = OrderRequest::market_buy("KRW-BTC", dec!(100000), dec!(50000000));

        let fill = gateway.submit_order(&order).await.unwrap();
        assert_eq!(fill.price, dec!(50000000));
        assert_eq!(fill.fee, dec!(50));
        assert_eq!(fill.quantity, dec!(99950) / dec!(50000000));

        assert_eq!(gateway.balance("KRW").await, dec!(900000));
        assert_eq!(gateway.balance("BTC").await, fill.quantity);
    }

    #[tokio::test]
    async fn test_sell_returns_net_proceeds() {
        let gateway = SimulatedGateway::new(dec!(0), dec!(0.0005));
        gateway.set_balance("BTC", dec!(0.01)).await;

        let order = OrderRequest::market_sell("KRW-BTC", dec!(0.01), dec!(50000000));
        let fill = gateway.submit_order(&order).await.unwrap();

        assert_eq!(fill.quantity, dec!(0.01));
        assert_eq!(fill.fee, dec!(250));
        assert_eq!(gateway.balance("KRW").await, dec!(499750));
        assert_eq!(gateway.balance("BTC").await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_overdraft_is_rejected_without_mutation() {
        let gateway = SimulatedGateway::new(dec!(50000), dec!(0.0005));
        let order = OrderRequest::market_buy("KRW-BTC", dec!(100000), dec!(50000000));

        let err = gateway.submit_order(&order).await.unwrap_err();
        assert!(matches!(err, TradingError::ExecutionRejected(_)));
        assert_eq!(gateway.balance("KRW").await, dec!(50000));
    }

    #[tokio::test]
    async fn test_selling_unheld_asset_rejected() {
        let gateway = SimulatedGateway::new(dec!(1000000), dec!(0.0005));
        let order = OrderRequest::market_sell("KRW-ETH", dec!(1), dec!(3000000));

        assert!(matches!(
            gateway.submit_order(&order).await.unwrap_err(),
            TradingError::ExecutionRejected(_)
        ));
    }

    #[tokio::test]
    async fn test_restore_holdings_enables_sell() {
        let gateway = SimulatedGateway::new(dec!(1000000), Decimal::ZERO);
        let positions = vec![Position::open(
            "KRW-BTC".to_string(),
            dec!(0.01),
            dec!(50000000),
            dec!(500000),
        )];
        gateway.restore_holdings(dec!(500000), &positions).await;

        assert_eq!(gateway.balance("KRW").await, dec!(500000));
        let order = OrderRequest::market_sell("KRW-BTC", dec!(0.01), dec!(51000000));
        let fill = gateway.submit_order(&order).await.unwrap();
        assert_eq!(fill.quantity, dec!(0.01));
    }

    #[tokio::test]
    async fn test_zero_fee_mode() {
        let gateway = SimulatedGateway::new(dec!(1000000), Decimal::ZERO);
        let order = OrderRequest::market_buy("KRW-BTC", dec!(100000), dec!(50000000));

        let fill = gateway.submit_order(&order).await.unwrap();
        assert_eq!(fill.fee, Decimal::ZERO);
        assert_eq!(fill.quantity, dec!(0.002));
    }
}
