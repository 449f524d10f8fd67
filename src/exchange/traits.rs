//! Venue-agnostic futures capability set consumed by the trade engine.
//!
//! The engine only talks to the exchange through this trait, so the live
//! REST client, the in-memory [`MockExchange`](super::MockExchange) and test
//! doubles are interchangeable.

use crate::exchange::types::*;
use crate::trading::SymbolFilters;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Everything the trade lifecycle engine needs from a derivatives exchange.
///
/// All calls are awaited one at a time by the driver loop; implementations
/// own their own timeouts and transport error handling.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FuturesExchange: Send + Sync {
    /// Fetch exchange-wide instrument metadata.
    async fn exchange_info(&self) -> Result<FuturesExchangeInfo>;

    /// Fetch the trading filters of one instrument.
    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        let info = self.exchange_info().await?;
        let symbol_info = info
            .symbol(symbol)
            .ok_or_else(|| anyhow!("Symbol {} not found in exchange info", symbol))?;
        SymbolFilters::from_symbol_info(symbol_info)
    }

    /// Fetch account balances.
    async fn account_information(&self) -> Result<AccountInformation>;

    /// Fetch the notional/leverage brackets of one instrument.
    async fn leverage_brackets(&self, symbol: &str) -> Result<Vec<NotionalBracket>>;

    /// Set the initial leverage for a symbol.
    async fn set_leverage(&self, symbol: &str, leverage: u8) -> Result<()>;

    /// Set margin mode for a symbol. "Already set" is not an error.
    async fn set_margin_type(&self, symbol: &str, margin_type: MarginType) -> Result<()>;

    /// Current last-traded price.
    async fn symbol_price(&self, symbol: &str) -> Result<Decimal>;

    /// Submit an order.
    async fn place_order(&self, order: &NewOrder) -> Result<OrderResponse>;

    /// Cancel an order by exchange id.
    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<OrderResponse>;

    /// List open orders for a symbol.
    async fn open_orders(&self, symbol: &str) -> Result<Vec<OrderResponse>>;

    /// Current position (signed quantity, entry price) for a symbol.
    async fn position_risk(&self, symbol: &str) -> Result<PositionRisk>;
}
