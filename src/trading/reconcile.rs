//! Per-cycle reconciliation of the local trade against exchange state.

use super::error::TradeResult;
use super::manager::TradeManager;
use super::model::ActiveTrade;
use super::orders::{OrderRouter, FLAT_EPSILON};
use crate::exchange::FuturesExchange;
use crate::utils::decimal::is_flat;
use std::collections::HashSet;
use tracing::{debug, info, warn};

impl<E: FuturesExchange> TradeManager<E> {
    /// Bring the local trade in line with the exchange position.
    ///
    /// Safe to call every cycle, with or without a trade. A flat exchange
    /// position clears the trade, open or pending, even if cancelling its
    /// orders fails. A first non-zero position on a pending trade opens it and
    /// places its stop-loss and take-profits.
    pub async fn sync_state(&mut self) -> TradeResult<()> {
        let position = self.router.client.position_risk(&self.router.symbol).await?;
        let qty = position.position_amt;

        let Some(trade) = self.trade.as_mut() else {
            self.last_position_size = qty;
            return Ok(());
        };

        if !trade.take_profit_orders.is_empty() {
            reconcile_take_profits(&self.router, trade).await;
        }

        if is_flat(qty, FLAT_EPSILON) {
            if trade.has_protective_orders() {
                self.router.cancel_protective_orders(trade).await;
            }
            if trade.has_pending_entry() {
                self.router.cancel_pending_entry(trade).await;
            }
            info!(side = trade.side.as_str(), "Position flat, trade cleared");
            self.clear_trade();
            return Ok(());
        }

        if !trade.position_open {
            trade.position_open = true;
            trade.entry_price = Some(position.entry_price);
            trade.quantity = qty.abs();
            trade.entry_order = None;
            self.last_position_size = qty;

            info!(
                side = trade.side.as_str(),
                quantity = %trade.quantity,
                entry_price = %position.entry_price,
                "Entry filled, placing protective orders"
            );
            self.router.place_protective_orders(trade).await?;
            return Ok(());
        }

        // The market-entry reference is only kept until the exchange confirms the position.
        trade.entry_order = None;

        if qty.abs() != self.last_position_size.abs() {
            info!(
                previous = %self.last_position_size,
                current = %qty,
                "Position size changed"
            );
            trade.quantity = qty.abs();
        }

        self.last_position_size = qty;
        Ok(())
    }
}

/// Drop take-profit legs that are no longer open on the exchange, nulling their target slots.
///
/// If the open-order listing fails the legs are left untouched for this cycle.
async fn reconcile_take_profits<E: FuturesExchange>(router: &OrderRouter<E>, trade: &mut ActiveTrade) {
    let open_ids: HashSet<i64> = match router.client.open_orders(&router.symbol).await {
        Ok(orders) => orders.iter().map(|o| o.order_id).collect(),
        Err(e) => {
            warn!(error = %e, "Failed to list open orders, skipping take-profit reconciliation");
            return;
        }
    };

    let tracked = std::mem::take(&mut trade.take_profit_orders);
    for order in tracked {
        if open_ids.contains(&order.order_id()) {
            trade.take_profit_orders.push(order);
            continue;
        }

        if let Some(slot) = order
            .target_index()
            .and_then(|index| trade.tp_targets.get_mut(index))
        {
            *slot = None;
        }
        debug!(
            order_id = order.order_id(),
            target_index = ?order.target_index(),
            "Take-profit no longer open"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{PositionRisk, PositionSide};
    use crate::trading::testing::*;
    use crate::trading::ManagedOrder;
    use anyhow::anyhow;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_sync_without_trade_records_position() {
        let (client, mut manager) = setup().await;
        client.set_position(dec!(0.5), dec!(60000)).await;

        assert_ok!(manager.sync_state().await);

        assert!(manager.trade().is_none());
        assert_eq!(manager.last_position_size(), dec!(0.5));
        assert_eq!(client.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_limit_fill_opens_trade_and_places_protection() {
        let (client, mut manager) = setup().await;
        manager.handle_signal_value(&limit_long(67000)).await.unwrap();

        client.set_price(dec!(66900)).await;
        assert_ok!(manager.sync_state().await);

        let trade = manager.trade().unwrap();
        assert!(trade.position_open);
        assert_eq!(trade.entry_price, Some(dec!(67000)));
        assert_eq!(trade.quantity, dec!(0.029));
        assert!(trade.entry_order.is_none());
        assert!(trade.stop_loss_order.is_some());
        assert_eq!(trade.take_profit_orders.len(), 2);
        assert_eq!(manager.last_position_size(), dec!(0.029));
        // limit + stop + two legs
        assert_eq!(client.order_count().await, 4);
    }

    #[tokio::test]
    async fn test_flat_sync_clears_pending_limit_trade() {
        let (client, mut manager) = setup().await;
        manager.handle_signal_value(&limit_long(67000)).await.unwrap();
        let entry_id = manager.trade().unwrap().entry_order.as_ref().unwrap().order_id();

        assert_ok!(manager.sync_state().await);

        assert!(manager.trade().is_none());
        assert_eq!(manager.build_status_payload(), Default::default());
        // The resting entry is not left behind untracked
        let state = client.snapshot().await;
        assert_eq!(state.cancel_log, vec![entry_id]);
        assert!(state.open_orders.is_empty());
    }

    #[tokio::test]
    async fn test_flat_sync_clears_pending_trade_when_entry_cancel_fails() {
        let (client, mut manager) = setup().await;
        manager.handle_signal_value(&limit_long(67000)).await.unwrap();
        client.set_fail_cancels(true).await;

        assert_ok!(manager.sync_state().await);

        assert!(manager.trade().is_none());
        assert_eq!(client.snapshot().await.open_orders.len(), 1);
    }

    #[tokio::test]
    async fn test_vanished_limit_entry_clears_trade() {
        let (client, mut manager) = setup().await;
        manager.handle_signal_value(&limit_long(67000)).await.unwrap();
        let entry_id = manager.trade().unwrap().entry_order.as_ref().unwrap().order_id();

        assert!(client.remove_open_order(entry_id).await);
        assert_ok!(manager.sync_state().await);

        assert!(manager.trade().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_entry_trade_cleared_on_flat_sync() {
        let (_client, mut manager) = setup().await;
        manager.handle_signal_value(&limit_long(67000)).await.unwrap();
        manager
            .handle_signal_value(&serde_json::json!({"type": "cancel_entry_order"}))
            .await
            .unwrap();

        assert_ok!(manager.sync_state().await);

        assert!(manager.trade().is_none());
    }

    #[tokio::test]
    async fn test_take_profit_fill_nulls_only_that_leg() {
        let (client, mut manager) = setup().await;
        manager.handle_signal_value(&market_long()).await.unwrap();
        let stop_before = manager.trade().unwrap().stop_loss_order.clone();

        client.set_price(dec!(69000)).await;
        assert_ok!(manager.sync_state().await);

        let trade = manager.trade().unwrap();
        assert_eq!(trade.tp_targets[0], None);
        assert_eq!(trade.tp_targets[1].map(|t| t.price), Some(dec!(70000)));
        assert_eq!(trade.take_profit_orders.len(), 1);
        assert_eq!(trade.take_profit_orders[0].target_index(), Some(1));
        assert_eq!(trade.stop_loss_order, stop_before);
        assert_eq!(trade.quantity, dec!(0.012));
        assert!(trade.entry_order.is_none());
    }

    #[tokio::test]
    async fn test_external_cancel_nulls_only_that_leg() {
        let (client, mut manager) = setup().await;
        manager.handle_signal_value(&market_long()).await.unwrap();
        let second_leg = manager.trade().unwrap().take_profit_orders[1].order_id();

        client.remove_open_order(second_leg).await;
        assert_ok!(manager.sync_state().await);

        let trade = manager.trade().unwrap();
        assert!(trade.tp_targets[0].is_some());
        assert_eq!(trade.tp_targets[1], None);
        assert_eq!(trade.take_profit_orders.len(), 1);
        assert!(trade.stop_loss_order.is_some());
        assert_eq!(trade.quantity, dec!(0.029));
    }

    #[tokio::test]
    async fn test_stop_fill_clears_trade() {
        let (client, mut manager) = setup().await;
        manager.handle_signal_value(&market_long()).await.unwrap();

        client.set_price(dec!(67000)).await;
        assert_ok!(manager.sync_state().await);

        assert!(manager.trade().is_none());
        assert_eq!(manager.last_position_size(), Decimal::ZERO);
        // Both legs cancelled; the triggered stop is already gone
        let state = client.snapshot().await;
        assert_eq!(state.cancel_log.len(), 2);
        assert!(state.open_orders.is_empty());
    }

    #[tokio::test]
    async fn test_flat_clears_even_when_cancels_fail() {
        let (client, mut manager) = setup().await;
        manager.handle_signal_value(&market_long()).await.unwrap();
        client.set_fail_cancels(true).await;
        client.set_position(Decimal::ZERO, Decimal::ZERO).await;

        assert_ok!(manager.sync_state().await);

        assert!(manager.trade().is_none());
        assert_eq!(manager.build_status_payload(), Default::default());
    }

    #[tokio::test]
    async fn test_size_change_adopted_without_resizing_legs() {
        let (client, mut manager) = setup().await;
        manager.handle_signal_value(&market_long()).await.unwrap();
        assert_ok!(manager.sync_state().await);
        let orders_before = client.order_count().await;

        client.set_position(dec!(0.02), dec!(68000)).await;
        assert_ok!(manager.sync_state().await);

        let trade = manager.trade().unwrap();
        assert_eq!(trade.quantity, dec!(0.02));
        let legs: Vec<_> = trade.take_profit_orders.iter().map(ManagedOrder::quantity).collect();
        assert_eq!(legs, vec![Some(dec!(0.017)), Some(dec!(0.012))]);
        assert_eq!(client.order_count().await, orders_before);
        assert_eq!(manager.last_position_size(), dec!(0.02));
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let (client, mut manager) = setup().await;
        manager.handle_signal_value(&market_long()).await.unwrap();

        assert_ok!(manager.sync_state().await);
        let trade_after_first = manager.trade().cloned();
        let orders_after_first = client.order_count().await;

        assert_ok!(manager.sync_state().await);

        assert_eq!(manager.trade().cloned(), trade_after_first);
        assert_eq!(client.order_count().await, orders_after_first);
    }

    #[tokio::test]
    async fn test_open_orders_failure_keeps_legs() {
        let mut mock = scripted_exchange();
        let ids = Arc::new(AtomicI64::new(1));
        mock.expect_place_order()
            .returning(move |order| Ok(ack(ids.fetch_add(1, Ordering::SeqCst), order)));
        mock.expect_position_risk().returning(|symbol| {
            Ok(PositionRisk {
                symbol: symbol.to_string(),
                position_amt: dec!(0.029),
                entry_price: dec!(68000),
                mark_price: dec!(68000),
                unrealized_profit: Decimal::ZERO,
                liquidation_price: Decimal::ZERO,
                margin_type: Some("isolated".to_string()),
                position_side: Some(PositionSide::Both),
            })
        });
        mock.expect_open_orders()
            .returning(|_| Err(anyhow!("Failed to send GET /fapi/v1/openOrders")));

        let mut manager = crate::trading::TradeManager::new(Arc::new(mock), manager_config())
            .await
            .unwrap();
        manager.handle_signal_value(&market_long()).await.unwrap();
        assert_ok!(manager.sync_state().await);

        let trade = manager.trade().unwrap();
        assert_eq!(trade.take_profit_orders.len(), 2);
        assert!(trade.tp_targets.iter().all(Option::is_some));
    }

    #[tokio::test]
    async fn test_position_query_failure_propagates() {
        let mut mock = scripted_exchange();
        mock.expect_position_risk()
            .returning(|_| Err(anyhow!("Failed to send GET /fapi/v2/positionRisk")));

        let mut manager = crate::trading::TradeManager::new(Arc::new(mock), manager_config())
            .await
            .unwrap();
        let err = assert_err!(manager.sync_state().await);
        assert!(err.is_retryable());
    }
}
