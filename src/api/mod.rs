//! Exchange REST API: public market data and signed private calls.

mod client;
mod types;

pub use client::ExchangeClient;
pub use types::{
    AccountBalance, OrderAck, OrderDetail, OrderSide, OrderTrade, OrderType, PlaceOrderRequest,
    Ticker,
};
