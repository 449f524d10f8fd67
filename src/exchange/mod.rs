//! Exchange integrations for signal-driven futures trading.
//!
//! ## Binance
//! - REST client for account, order and position endpoints
//! - Kline websocket stream for the candle feed
//!
//! ## Mock
//! In-memory venue with resting-order triggers for paper trading and tests.

mod client;
pub mod mock;
mod traits;
mod types;
mod websocket;

pub use client::{BinanceClient, MAX_KLINE_LIMIT};
pub use mock::MockExchange;
#[cfg(test)]
pub use traits::MockFuturesExchange;
pub use traits::FuturesExchange;
pub use types::*;
pub use websocket::{BinanceWebSocket, KlineEvent, KlinePayload, WsEvent};
