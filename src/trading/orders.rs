//! Order placement and cancellation for the managed symbol.

use super::error::{TradeError, TradeResult};
use super::filters::SymbolFilters;
use super::model::{ActiveTrade, ManagedOrder, OrderHandle, TpTarget, TradeSide};
use crate::exchange::{FuturesExchange, NewOrder, OrderSide};
use crate::utils::decimal::is_flat;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Below this absolute quantity a position counts as closed.
pub const FLAT_EPSILON: Decimal = dec!(0.00000001);

/// Normalizes and submits the engine's orders for one symbol.
pub struct OrderRouter<E: FuturesExchange> {
    pub(super) client: Arc<E>,
    pub(super) symbol: String,
    pub(super) filters: SymbolFilters,
}

impl<E: FuturesExchange> OrderRouter<E> {
    pub fn new(client: Arc<E>, symbol: String, filters: SymbolFilters) -> Self {
        Self {
            client,
            symbol,
            filters,
        }
    }

    /// Market entry. Fill price falls back to the order price, then to `reference_price`.
    pub async fn place_market_entry(
        &self,
        side: TradeSide,
        quantity: Decimal,
        reference_price: Decimal,
    ) -> TradeResult<ManagedOrder> {
        let order = NewOrder::market(&self.symbol, side.entry_side(), quantity);
        let response = self.client.place_order(&order).await?;

        let fill_price = [response.avg_price, response.price]
            .into_iter()
            .find(|p| *p > Decimal::ZERO)
            .unwrap_or(reference_price);
        let filled = if response.executed_qty > Decimal::ZERO {
            response.executed_qty
        } else {
            quantity
        };

        info!(
            order_id = response.order_id,
            side = side.as_str(),
            quantity = %filled,
            price = %fill_price,
            "Market entry filled"
        );

        Ok(ManagedOrder::MarketEntry {
            handle: OrderHandle::from(&response),
            quantity: filled,
            fill_price,
        })
    }

    /// Resting GTC limit entry at the tick-normalized price.
    pub async fn place_limit_entry(
        &self,
        side: TradeSide,
        quantity: Decimal,
        limit_price: Decimal,
    ) -> TradeResult<ManagedOrder> {
        let price = self.filters.normalize_price(limit_price)?;
        let order = NewOrder::limit(&self.symbol, side.entry_side(), quantity, price);
        let response = self.client.place_order(&order).await?;

        info!(
            order_id = response.order_id,
            side = side.as_str(),
            %quantity,
            %price,
            "Limit entry placed"
        );

        Ok(ManagedOrder::LimitEntry {
            handle: OrderHandle::from(&response),
            quantity: if response.orig_qty > Decimal::ZERO {
                response.orig_qty
            } else {
                quantity
            },
            price,
        })
    }

    /// Close-position stop triggered by mark price.
    pub async fn place_stop_loss(
        &self,
        side: TradeSide,
        stop_price: Decimal,
    ) -> TradeResult<ManagedOrder> {
        let stop_price = self.filters.normalize_price(stop_price)?;
        let order = NewOrder::close_position_stop(&self.symbol, side.exit_side(), stop_price);
        let response = self.client.place_order(&order).await?;

        info!(order_id = response.order_id, %stop_price, "Stop-loss placed");

        Ok(ManagedOrder::StopLoss {
            handle: OrderHandle::from(&response),
            stop_price,
        })
    }

    /// Place reduce-only take-profit legs for `trade.quantity`, appending each to the trade.
    ///
    /// Every leg but the last gets `quantity × size_pct / 100` floored to the
    /// lot step; the last leg gets whatever remains, so the legs never add up
    /// to more than the position. Legs that floor to zero are skipped. Legs
    /// placed before a failure stay tracked on the trade.
    pub async fn place_take_profits(&self, trade: &mut ActiveTrade) -> TradeResult<()> {
        let legs: Vec<(usize, TpTarget)> = trade
            .tp_targets
            .iter()
            .enumerate()
            .filter_map(|(index, target)| target.map(|t| (index, t)))
            .collect();

        let quantities = take_profit_quantities(&self.filters, trade.quantity, &legs)?;
        let side = trade.side.exit_side();

        for ((target_index, target), quantity) in legs.into_iter().zip(quantities) {
            if quantity <= Decimal::ZERO {
                debug!(target_index, "Skipping take-profit leg with zero quantity");
                continue;
            }

            let stop_price = self.filters.normalize_price(target.price)?;
            let order = NewOrder::take_profit(&self.symbol, side, quantity, stop_price);
            let response = self.client.place_order(&order).await?;

            info!(
                order_id = response.order_id,
                target_index,
                %quantity,
                %stop_price,
                "Take-profit placed"
            );

            trade.take_profit_orders.push(ManagedOrder::TakeProfit {
                handle: OrderHandle::from(&response),
                quantity,
                stop_price,
                target_index,
            });
        }

        Ok(())
    }

    /// Reject a stop or targets that cannot be normalized and sized, before
    /// any order is placed or cancelled.
    pub fn check_protective_inputs(
        &self,
        quantity: Decimal,
        sl: Option<Decimal>,
        targets: &[TpTarget],
    ) -> TradeResult<()> {
        if let Some(sl) = sl {
            self.filters.normalize_price(sl)?;
        }
        let legs: Vec<(usize, TpTarget)> = targets.iter().copied().enumerate().collect();
        for (_, target) in &legs {
            self.filters.normalize_price(target.price)?;
        }
        take_profit_quantities(&self.filters, quantity, &legs)?;
        Ok(())
    }

    /// Stop-loss first, then the take-profit legs.
    pub async fn place_protective_orders(&self, trade: &mut ActiveTrade) -> TradeResult<()> {
        if !trade.position_open {
            return Ok(());
        }
        trade.stop_loss_order = Some(self.place_stop_loss(trade.side, trade.sl_price).await?);
        self.place_take_profits(trade).await
    }

    pub async fn cancel(&self, order: &ManagedOrder) -> TradeResult<()> {
        self.client
            .cancel_order(&self.symbol, order.order_id())
            .await?;
        debug!(
            order_id = order.order_id(),
            order_type = order.order_type().as_str(),
            "Order cancelled"
        );
        Ok(())
    }

    /// Cancel every order in `orders`, stopping at the first failure.
    ///
    /// On failure the orders not yet cancelled are put back.
    pub async fn cancel_all(&self, orders: &mut Vec<ManagedOrder>) -> TradeResult<()> {
        let mut pending = std::mem::take(orders).into_iter();
        while let Some(order) = pending.next() {
            if let Err(e) = self.cancel(&order).await {
                *orders = std::iter::once(order).chain(pending).collect();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Cancel the stop-loss and all take-profit legs, dropping their references.
    ///
    /// Best-effort: each failure is logged and discarded, and the references
    /// are dropped regardless. Orders that failed to cancel may linger on the
    /// exchange untracked.
    pub async fn cancel_protective_orders(&self, trade: &mut ActiveTrade) {
        for order in std::mem::take(&mut trade.take_profit_orders) {
            if let Err(e) = self.cancel(&order).await {
                warn!(order_id = order.order_id(), error = %e, "Failed to cancel take-profit");
            }
        }

        if let Some(order) = trade.stop_loss_order.take() {
            if let Err(e) = self.cancel(&order).await {
                warn!(order_id = order.order_id(), error = %e, "Failed to cancel stop-loss");
            }
        }
    }

    /// Cancel a resting limit entry and drop its reference. Best-effort like
    /// [`cancel_protective_orders`](Self::cancel_protective_orders).
    pub async fn cancel_pending_entry(&self, trade: &mut ActiveTrade) {
        if let Some(order) = trade.entry_order.take() {
            if let Err(e) = self.cancel(&order).await {
                warn!(order_id = order.order_id(), error = %e, "Failed to cancel pending entry");
            }
        }
    }

    /// Flatten the exchange position with a reduce-only market order.
    ///
    /// Sized from the exchange-reported quantity. Returns `false` when the
    /// position was already flat.
    pub async fn close_position(&self) -> TradeResult<bool> {
        let position = self.client.position_risk(&self.symbol).await?;
        let qty = position.position_amt;
        if is_flat(qty, FLAT_EPSILON) {
            debug!(symbol = %self.symbol, "Position already flat");
            return Ok(false);
        }

        let side = if qty > Decimal::ZERO {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        let order = NewOrder::market(&self.symbol, side, qty.abs()).reduce_only();
        let response = self.client.place_order(&order).await?;

        info!(
            order_id = response.order_id,
            side = side.as_str(),
            quantity = %qty.abs(),
            "Position closed"
        );
        Ok(true)
    }
}

/// Leg quantities under the remainder rule, one per entry of `legs`.
///
/// Negative percentages count as zero. A percentage too large to apply is a
/// validation error.
pub fn take_profit_quantities(
    filters: &SymbolFilters,
    quantity: Decimal,
    legs: &[(usize, TpTarget)],
) -> TradeResult<Vec<Decimal>> {
    let mut allocated = Decimal::ZERO;
    let last = legs.len().saturating_sub(1);
    let mut quantities = Vec::with_capacity(legs.len());

    for (position, (_, target)) in legs.iter().enumerate() {
        let out_of_range = || {
            TradeError::validation(format!(
                "take-profit size_pct {} out of range",
                target.size_pct
            ))
        };

        let qty = if position == last {
            filters.normalize_qty((quantity - allocated).max(Decimal::ZERO))?
        } else {
            let share = quantity
                .checked_mul(target.size_pct.max(Decimal::ZERO))
                .and_then(|v| v.checked_div(dec!(100)))
                .ok_or_else(out_of_range)?;
            let qty = filters.normalize_qty(share)?;
            allocated = allocated.checked_add(qty).ok_or_else(out_of_range)?;
            qty
        };
        quantities.push(qty);
    }

    Ok(quantities)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters() -> SymbolFilters {
        SymbolFilters {
            tick_size: dec!(0.1),
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            min_notional: dec!(5),
        }
    }

    fn legs(pcts: &[Decimal]) -> Vec<(usize, TpTarget)> {
        pcts.iter()
            .enumerate()
            .map(|(i, pct)| {
                (
                    i,
                    TpTarget {
                        price: dec!(69000) + Decimal::from(i as u32) * dec!(1000),
                        size_pct: *pct,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_remainder_rule_sixty_forty() {
        let quantities = take_profit_quantities(&filters(), dec!(0.029), &legs(&[dec!(60), dec!(40)])).unwrap();
        assert_eq!(quantities, vec![dec!(0.017), dec!(0.012)]);
        assert_eq!(quantities.iter().sum::<Decimal>(), dec!(0.029));
    }

    #[test]
    fn test_remainder_rule_three_legs() {
        let quantities = take_profit_quantities(
            &filters(),
            dec!(0.1),
            &legs(&[dec!(33.3), dec!(33.3), dec!(33.4)]),
        )
        .unwrap();
        assert_eq!(quantities, vec![dec!(0.033), dec!(0.033), dec!(0.034)]);
    }

    #[test]
    fn test_over_allocation_leaves_last_leg_empty() {
        let quantities = take_profit_quantities(&filters(), dec!(0.01), &legs(&[dec!(80), dec!(80), dec!(50)])).unwrap();
        assert_eq!(quantities[0], dec!(0.008));
        assert_eq!(quantities[1], dec!(0.008));
        assert_eq!(quantities[2], Decimal::ZERO);
    }

    #[test]
    fn test_under_allocation_goes_to_last_leg() {
        let quantities = take_profit_quantities(&filters(), dec!(0.02), &legs(&[dec!(25), dec!(25)])).unwrap();
        assert_eq!(quantities, vec![dec!(0.005), dec!(0.015)]);
    }

    #[test]
    fn test_single_leg_takes_everything() {
        let quantities = take_profit_quantities(&filters(), dec!(0.029), &legs(&[dec!(10)])).unwrap();
        assert_eq!(quantities, vec![dec!(0.029)]);
    }

    #[test]
    fn test_negative_share_counts_as_zero() {
        let quantities =
            take_profit_quantities(&filters(), dec!(0.02), &legs(&[dec!(-50), dec!(100)])).unwrap();
        assert_eq!(quantities, vec![Decimal::ZERO, dec!(0.02)]);
    }

    #[test]
    fn test_oversized_share_is_validation_error() {
        let huge = Decimal::from_str_exact("70000000000000000000000000000").unwrap();
        let err = take_profit_quantities(&filters(), dec!(2), &legs(&[huge, dec!(10)])).unwrap_err();
        assert!(matches!(err, TradeError::Validation(_)));
    }

    #[test]
    fn test_no_legs() {
        assert!(take_profit_quantities(&filters(), dec!(0.029), &[]).unwrap().is_empty());
    }
}
