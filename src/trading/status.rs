//! Status payload reported back to the signal source.

use super::manager::TradeManager;
use super::model::{EntryKind, ManagedOrder, TradeSide};
use crate::exchange::FuturesExchange;
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTradeStatus {
    pub side: Option<TradeSide>,
    pub entry_kind: Option<EntryKind>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub entry_price: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub sl: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub tp1: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub tp2: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub tp3: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveLimitOrderStatus {
    pub side: Option<TradeSide>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub price: Option<Decimal>,
}

/// Both status blocks; every field is null when no trade exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub active_trade_status: ActiveTradeStatus,
    pub active_limit_order_status: ActiveLimitOrderStatus,
}

impl<E: FuturesExchange> TradeManager<E> {
    /// Snapshot of the trade for the signal source. No side effects.
    pub fn build_status_payload(&self) -> StatusPayload {
        let mut payload = StatusPayload::default();
        let Some(trade) = self.trade.as_ref() else {
            return payload;
        };

        if trade.position_open {
            let tp = |slot: usize| trade.tp_targets.get(slot).copied().flatten().map(|t| t.price);
            payload.active_trade_status = ActiveTradeStatus {
                side: Some(trade.side),
                entry_kind: Some(trade.entry_kind),
                entry_price: trade.entry_price,
                sl: Some(trade.sl_price),
                tp1: tp(0),
                tp2: tp(1),
                tp3: tp(2),
            };
        }

        if let Some(ManagedOrder::LimitEntry { price, .. }) = &trade.entry_order {
            if !trade.position_open {
                payload.active_limit_order_status = ActiveLimitOrderStatus {
                    side: Some(trade.side),
                    price: Some(*price),
                };
            }
        }

        payload
    }
}
