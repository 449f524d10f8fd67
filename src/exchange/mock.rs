//! In-memory futures venue for paper trading, replays and tests.
//!
//! Market orders fill at the current price. LIMIT, STOP_MARKET and
//! TAKE_PROFIT_MARKET orders rest until [`MockExchange::set_price`] crosses
//! their trigger.

use super::traits::FuturesExchange;
use super::types::*;
use anyhow::{bail, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Simulated one-way position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockPosition {
    /// Signed quantity: positive long, negative short
    pub qty: Decimal,
    pub entry_price: Decimal,
}

/// Mutable venue state, readable through [`MockExchange::snapshot`].
#[derive(Debug, Clone)]
pub struct MockExchangeState {
    pub wallet_balance: Decimal,
    pub available_balance: Option<Decimal>,
    pub price: Decimal,
    pub position: MockPosition,
    pub realized_pnl: Decimal,
    /// Resting orders in placement order
    pub open_orders: Vec<OrderResponse>,
    /// Every accepted order request
    pub order_log: Vec<NewOrder>,
    /// Ids of successfully cancelled orders
    pub cancel_log: Vec<i64>,
    pub leverage: Option<u8>,
    pub margin_type: Option<MarginType>,
    pub fail_cancels: bool,
}

/// Paper-trading venue implementing [`FuturesExchange`] for a single symbol.
pub struct MockExchange {
    state: Arc<RwLock<MockExchangeState>>,
    order_id_counter: AtomicI64,
    symbol_info: FuturesSymbolInfo,
    brackets: Vec<NotionalBracket>,
}

impl MockExchange {
    /// Create a venue quoting `symbol` at `price` with `wallet_balance` in the margin asset.
    ///
    /// Filters default to BTC-style increments (tick 0.1, step 0.001, min qty
    /// 0.001, min notional 5) and the maximum bracket leverage to 125.
    pub fn new(symbol: &str, wallet_balance: Decimal, price: Decimal) -> Self {
        let margin_asset = if symbol.ends_with("USDC") { "USDC" } else { "USDT" };
        let symbol_info = FuturesSymbolInfo {
            symbol: symbol.to_string(),
            status: "TRADING".to_string(),
            margin_asset: Some(margin_asset.to_string()),
            filters: vec![
                SymbolFilter::PriceFilter {
                    tick_size: dec!(0.1),
                },
                SymbolFilter::LotSize {
                    step_size: dec!(0.001),
                    min_qty: dec!(0.001),
                },
                SymbolFilter::MinNotional { notional: dec!(5) },
            ],
        };

        let state = MockExchangeState {
            wallet_balance,
            available_balance: Some(wallet_balance),
            price,
            position: MockPosition::default(),
            realized_pnl: Decimal::ZERO,
            open_orders: Vec::new(),
            order_log: Vec::new(),
            cancel_log: Vec::new(),
            leverage: None,
            margin_type: None,
            fail_cancels: false,
        };

        Self {
            state: Arc::new(RwLock::new(state)),
            order_id_counter: AtomicI64::new(1),
            symbol_info,
            brackets: vec![bracket(1, 125, dec!(0), dec!(50000))],
        }
    }

    /// Replace the default symbol filters.
    pub fn with_filters(
        mut self,
        tick_size: Decimal,
        step_size: Decimal,
        min_qty: Decimal,
        min_notional: Decimal,
    ) -> Self {
        self.symbol_info.filters = vec![
            SymbolFilter::PriceFilter { tick_size },
            SymbolFilter::LotSize { step_size, min_qty },
            SymbolFilter::MinNotional {
                notional: min_notional,
            },
        ];
        self
    }

    /// Publish a single bracket allowing up to `max_leverage`.
    pub fn with_max_leverage(mut self, max_leverage: u8) -> Self {
        self.brackets = vec![bracket(1, max_leverage, dec!(0), dec!(50000))];
        self
    }

    /// Override the reported available balance (`None` omits the field).
    pub async fn set_available_balance(&self, available: Option<Decimal>) {
        self.state.write().await.available_balance = available;
    }

    /// Move the market and fire every resting order the new price crosses.
    pub async fn set_price(&self, price: Decimal) {
        let mut state = self.state.write().await;
        state.price = price;
        trigger_resting_orders(&mut state);
        debug!(%price, qty = %state.position.qty, "Mock price updated");
    }

    /// Force the position, as if it changed outside this process.
    pub async fn set_position(&self, qty: Decimal, entry_price: Decimal) {
        let mut state = self.state.write().await;
        state.position = MockPosition { qty, entry_price };
    }

    /// Drop a resting order without filling it, as if it was cancelled externally.
    pub async fn remove_open_order(&self, order_id: i64) -> bool {
        let mut state = self.state.write().await;
        let before = state.open_orders.len();
        state.open_orders.retain(|o| o.order_id != order_id);
        state.open_orders.len() != before
    }

    /// Make every subsequent cancel request fail.
    pub async fn set_fail_cancels(&self, fail: bool) {
        self.state.write().await.fail_cancels = fail;
    }

    /// Number of orders accepted so far.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.order_log.len()
    }

    /// Clone of the current venue state.
    pub async fn snapshot(&self) -> MockExchangeState {
        self.state.read().await.clone()
    }

    fn next_order_id(&self) -> i64 {
        self.order_id_counter.fetch_add(1, Ordering::SeqCst)
    }

    fn ensure_symbol(&self, symbol: &str) -> Result<()> {
        if symbol != self.symbol_info.symbol {
            bail!("Invalid symbol {} (mock quotes {})", symbol, self.symbol_info.symbol);
        }
        Ok(())
    }
}

fn bracket(index: u8, initial_leverage: u8, floor: Decimal, cap: Decimal) -> NotionalBracket {
    NotionalBracket {
        bracket: index,
        initial_leverage,
        notional_cap: cap,
        notional_floor: floor,
        maint_margin_ratio: dec!(0.004),
    }
}

fn signed(side: OrderSide, qty: Decimal) -> Decimal {
    match side {
        OrderSide::Buy => qty,
        OrderSide::Sell => -qty,
    }
}

/// Apply a fill to the position and return the quantity actually filled.
fn apply_fill(
    state: &mut MockExchangeState,
    side: OrderSide,
    qty: Decimal,
    price: Decimal,
    reduce_only: bool,
) -> Decimal {
    let current = state.position.qty;
    let mut delta = signed(side, qty);

    if reduce_only {
        let reduces = !current.is_zero() && current.is_sign_positive() != delta.is_sign_positive();
        if !reduces {
            return Decimal::ZERO;
        }
        let capped = delta.abs().min(current.abs());
        delta = if delta.is_sign_negative() { -capped } else { capped };
    }

    let next = current + delta;
    let same_direction = current.is_zero() || current.is_sign_positive() == delta.is_sign_positive();

    if same_direction {
        let total = current.abs() + delta.abs();
        state.position.entry_price =
            (state.position.entry_price * current.abs() + price * delta.abs()) / total;
    } else {
        let closed = delta.abs().min(current.abs());
        let direction = if current.is_sign_positive() { Decimal::ONE } else { -Decimal::ONE };
        let pnl = (price - state.position.entry_price) * closed * direction;
        state.realized_pnl += pnl;
        state.wallet_balance += pnl;
        if let Some(available) = state.available_balance.as_mut() {
            *available += pnl;
        }
        if next.is_zero() {
            state.position.entry_price = Decimal::ZERO;
        } else if next.is_sign_positive() != current.is_sign_positive() {
            state.position.entry_price = price;
        }
    }

    state.position.qty = if next.is_zero() { Decimal::ZERO } else { next };
    delta.abs()
}

fn crosses(order: &OrderResponse, price: Decimal) -> bool {
    match (order.order_type, order.side) {
        (OrderType::Limit, OrderSide::Buy) => price <= order.price,
        (OrderType::Limit, OrderSide::Sell) => price >= order.price,
        (OrderType::StopMarket, OrderSide::Sell) => price <= order.stop_price,
        (OrderType::StopMarket, OrderSide::Buy) => price >= order.stop_price,
        (OrderType::TakeProfitMarket, OrderSide::Sell) => price >= order.stop_price,
        (OrderType::TakeProfitMarket, OrderSide::Buy) => price <= order.stop_price,
        _ => false,
    }
}

fn trigger_resting_orders(state: &mut MockExchangeState) {
    let price = state.price;
    let (triggered, resting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.open_orders)
        .into_iter()
        .partition(|o| crosses(o, price));
    state.open_orders = resting;

    for order in triggered {
        let fill_price = if order.order_type == OrderType::Limit {
            order.price
        } else {
            price
        };
        let qty = if order.close_position {
            state.position.qty.abs()
        } else {
            order.orig_qty
        };
        let reduce = order.reduce_only || order.close_position;
        let filled = apply_fill(state, order.side, qty, fill_price, reduce);

        info!(
            order_id = order.order_id,
            order_type = order.order_type.as_str(),
            side = order.side.as_str(),
            quantity = %filled,
            price = %fill_price,
            position = %state.position.qty,
            "Mock resting order triggered"
        );
    }
}

#[async_trait]
impl FuturesExchange for MockExchange {
    async fn exchange_info(&self) -> Result<FuturesExchangeInfo> {
        Ok(FuturesExchangeInfo {
            symbols: vec![self.symbol_info.clone()],
        })
    }

    async fn account_information(&self) -> Result<AccountInformation> {
        let state = self.state.read().await;
        let asset = self
            .symbol_info
            .margin_asset
            .clone()
            .unwrap_or_else(|| "USDT".to_string());

        Ok(AccountInformation {
            total_wallet_balance: state.wallet_balance,
            available_balance: state.available_balance,
            assets: vec![AccountAsset {
                asset,
                wallet_balance: state.wallet_balance,
                available_balance: state.available_balance,
            }],
        })
    }

    async fn leverage_brackets(&self, symbol: &str) -> Result<Vec<NotionalBracket>> {
        self.ensure_symbol(symbol)?;
        Ok(self.brackets.clone())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u8) -> Result<()> {
        self.ensure_symbol(symbol)?;
        debug!(%symbol, %leverage, "Mock set leverage");
        self.state.write().await.leverage = Some(leverage);
        Ok(())
    }

    async fn set_margin_type(&self, symbol: &str, margin_type: MarginType) -> Result<()> {
        self.ensure_symbol(symbol)?;
        debug!(%symbol, margin_type = margin_type.as_str(), "Mock set margin type");
        self.state.write().await.margin_type = Some(margin_type);
        Ok(())
    }

    async fn symbol_price(&self, symbol: &str) -> Result<Decimal> {
        self.ensure_symbol(symbol)?;
        Ok(self.state.read().await.price)
    }

    async fn place_order(&self, order: &NewOrder) -> Result<OrderResponse> {
        self.ensure_symbol(&order.symbol)?;
        let mut state = self.state.write().await;

        let close_position = order.close_position.unwrap_or(false);
        let reduce_only = order.reduce_only.unwrap_or(false);
        let quantity = order.quantity.unwrap_or(Decimal::ZERO);
        if quantity <= Decimal::ZERO && !close_position {
            bail!("Mock rejected order: quantity must be positive");
        }

        let order_id = self.next_order_id();
        let mut response = OrderResponse {
            order_id,
            symbol: order.symbol.clone(),
            status: OrderStatus::New,
            client_order_id: order
                .new_client_order_id
                .clone()
                .unwrap_or_else(|| format!("mock-{}", order_id)),
            price: order.price.unwrap_or(Decimal::ZERO),
            avg_price: Decimal::ZERO,
            orig_qty: quantity,
            executed_qty: Decimal::ZERO,
            stop_price: order.stop_price.unwrap_or(Decimal::ZERO),
            side: order.side,
            order_type: order.order_type,
            time_in_force: order.time_in_force,
            reduce_only,
            close_position,
            update_time: chrono::Utc::now().timestamp_millis(),
        };
        state.order_log.push(order.clone());

        match order.order_type {
            OrderType::Market => {
                let price = state.price;
                let filled = apply_fill(&mut state, order.side, quantity, price, reduce_only);
                response.status = OrderStatus::Filled;
                response.avg_price = price;
                response.executed_qty = filled;

                info!(
                    order_id,
                    symbol = %order.symbol,
                    side = order.side.as_str(),
                    quantity = %filled,
                    price = %price,
                    "Mock market order executed"
                );
            }
            OrderType::Limit | OrderType::StopMarket | OrderType::TakeProfitMarket => {
                state.open_orders.push(response.clone());
                info!(
                    order_id,
                    symbol = %order.symbol,
                    order_type = order.order_type.as_str(),
                    side = order.side.as_str(),
                    quantity = %quantity,
                    price = %response.price,
                    stop_price = %response.stop_price,
                    "Mock order resting"
                );
                trigger_resting_orders(&mut state);
            }
            other => bail!("Mock does not support {} orders", other.as_str()),
        }

        Ok(response)
    }

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<OrderResponse> {
        self.ensure_symbol(symbol)?;
        let mut state = self.state.write().await;

        if state.fail_cancels {
            bail!("Mock cancel rejected for order {}", order_id);
        }

        let Some(index) = state.open_orders.iter().position(|o| o.order_id == order_id) else {
            bail!("Unknown order sent (code -2011) for order {}", order_id);
        };

        let mut cancelled = state.open_orders.remove(index);
        cancelled.status = OrderStatus::Canceled;
        state.cancel_log.push(order_id);
        debug!(%symbol, order_id, "Mock order cancelled");
        Ok(cancelled)
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OrderResponse>> {
        self.ensure_symbol(symbol)?;
        Ok(self.state.read().await.open_orders.clone())
    }

    async fn position_risk(&self, symbol: &str) -> Result<PositionRisk> {
        if symbol != self.symbol_info.symbol {
            bail!("No position data returned for {}", symbol);
        }
        let state = self.state.read().await;
        let position = &state.position;

        Ok(PositionRisk {
            symbol: symbol.to_string(),
            position_amt: position.qty,
            entry_price: position.entry_price,
            mark_price: state.price,
            unrealized_profit: (state.price - position.entry_price) * position.qty,
            liquidation_price: Decimal::ZERO,
            margin_type: state.margin_type.map(|m| m.as_str().to_lowercase()),
            position_side: Some(PositionSide::Both),
        })
    }
}
