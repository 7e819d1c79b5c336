//! Live execution through the exchange REST API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::api::{ExchangeClient, OrderSide, OrderType, PlaceOrderRequest};
use crate::error::{TradingError, TradingResult};
use crate::models::TradeSide;

use super::{ExecutionGateway, ExecutionMode, Fill, OrderRequest};

const FILL_POLL_ATTEMPTS: u32 = 5;
const FILL_POLL_INTERVAL: Duration = Duration::from_millis(400);

/// Real order submission. Every call runs under a deadline; an expired or
/// failed submission surfaces as `ExecutionRejected` so the coordinator
/// never has to reason about an ambiguous fill.
pub struct LiveGateway {
    client: Arc<ExchangeClient>,
    timeout: Duration,
}

impl LiveGateway {
    pub fn new(client: Arc<ExchangeClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn submit_and_confirm(&self, order: &OrderRequest) -> TradingResult<Fill> {
        let request = match order.side {
            TradeSide::Buy => PlaceOrderRequest {
                market: order.symbol.clone(),
                side: OrderSide::Bid,
                ord_type: OrderType::Price,
                volume: None,
                price: Some(order.amount.normalize().to_string()),
            },
            TradeSide::Sell => PlaceOrderRequest {
                market: order.symbol.clone(),
                side: OrderSide::Ask,
                ord_type: OrderType::Market,
                volume: Some(order.quantity.normalize().to_string()),
                price: None,
            },
        };

        let ack = self
            .client
            .place_order(&request)
            .await
            .map_err(|e| TradingError::ExecutionRejected(e.to_string()))?;

        debug!(uuid = %ack.uuid, market = %order.symbol, "order accepted, awaiting fill");

        let detail = self
            .client
            .wait_for_order(&ack.uuid, FILL_POLL_ATTEMPTS, FILL_POLL_INTERVAL)
            .await
            .map_err(|e| TradingError::ExecutionRejected(e.to_string()))?;

        if detail.executed_volume <= Decimal::ZERO {
            return Err(TradingError::ExecutionRejected(format!(
                "order {} ended {} with no executed volume",
                detail.uuid, detail.state
            )));
        }

        if !detail.is_terminal() {
            warn!(
                uuid = %detail.uuid,
                executed = %detail.executed_volume,
                "order still open at deadline; applying confirmed portion only"
            );
        }

        let price = detail.average_fill_price().unwrap_or(order.price);
        Ok(Fill {
            quantity: detail.executed_volume,
            price,
            fee: detail.paid_fee,
        })
    }
}

#[async_trait]
impl ExecutionGateway for LiveGateway {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Live
    }

    async fn submit_order(&self, order: &OrderRequest) -> TradingResult<Fill> {
        match tokio::time::timeout(self.timeout, self.submit_and_confirm(order)).await {
            Ok(result) => result,
            // A timed-out order is rejected, never an unknown fill. The
            // submission is logged upstream for manual reconciliation.
            Err(_) => Err(TradingError::ExecutionRejected(format!(
                "order for {} timed out after {:?}",
                order.symbol, self.timeout
            ))),
        }
    }
}
