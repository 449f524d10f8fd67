//! Signal-driven lifecycle of the single managed trade.

use super::error::{TradeError, TradeResult};
use super::filters::SymbolFilters;
use super::model::{ActiveTrade, EntryKind, ManagedOrder};
use super::orders::OrderRouter;
use super::signal::{EnterSignal, EntryRequest, Signal, UpdateSignal};
use super::sizer::PositionSizer;
use crate::config::TradingConfig;
use crate::exchange::{FuturesExchange, MarginType};
use anyhow::{anyhow, Context};
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Settings the engine needs from the trading configuration.
#[derive(Debug, Clone)]
pub struct TradeManagerConfig {
    pub symbol: String,
    /// Fixed leverage; the maximum bracket leverage when `None`
    pub leverage: Option<u8>,
    pub margin_type: MarginType,
    pub margin_usage_pct: Decimal,
}

impl From<&TradingConfig> for TradeManagerConfig {
    fn from(config: &TradingConfig) -> Self {
        Self {
            symbol: config.symbol.clone(),
            leverage: config.leverage,
            margin_type: config.margin_type,
            margin_usage_pct: config.margin_usage_pct,
        }
    }
}

/// Owns the at-most-one [`ActiveTrade`] and every order placed for it.
///
/// `handle_signal` and [`sync_state`](TradeManager::sync_state) take
/// `&mut self` and are expected to be called one at a time by a single
/// driver loop.
pub struct TradeManager<E: FuturesExchange> {
    pub(super) router: OrderRouter<E>,
    pub(super) sizer: PositionSizer,
    explicit_leverage: Option<u8>,
    margin_type: MarginType,
    leverage: Option<u8>,
    pub(super) trade: Option<ActiveTrade>,
    pub(super) last_position_size: Decimal,
}

impl<E: FuturesExchange> TradeManager<E> {
    /// Fetch the symbol's filters and margin asset. No trade exists afterwards.
    pub async fn new(client: Arc<E>, config: TradeManagerConfig) -> TradeResult<Self> {
        let info = client
            .exchange_info()
            .await
            .context("Failed to fetch exchange info")?;
        let symbol_info = info
            .symbol(&config.symbol)
            .ok_or_else(|| anyhow!("Symbol {} not found in exchange info", config.symbol))?;
        let margin_asset = symbol_info
            .margin_asset
            .clone()
            .ok_or_else(|| anyhow!("Margin asset for {} not found in exchange info", config.symbol))?;
        let filters = SymbolFilters::from_symbol_info(symbol_info)?;

        info!(
            symbol = %config.symbol,
            %margin_asset,
            tick_size = %filters.tick_size,
            step_size = %filters.step_size,
            min_qty = %filters.min_qty,
            min_notional = %filters.min_notional,
            "Trade manager ready"
        );

        Ok(Self {
            router: OrderRouter::new(client, config.symbol, filters),
            sizer: PositionSizer::new(filters, margin_asset, config.margin_usage_pct),
            explicit_leverage: config.leverage,
            margin_type: config.margin_type,
            leverage: None,
            trade: None,
            last_position_size: Decimal::ZERO,
        })
    }

    /// Set the margin type, then the configured or maximum leverage.
    #[instrument(skip(self))]
    pub async fn initialize(&mut self) -> TradeResult<()> {
        self.router
            .client
            .set_margin_type(&self.router.symbol, self.margin_type)
            .await?;

        let leverage = match self.explicit_leverage {
            Some(leverage) => leverage,
            None => self.fetch_max_leverage().await?,
        };
        self.router
            .client
            .set_leverage(&self.router.symbol, leverage)
            .await?;
        self.leverage = Some(leverage);

        info!(
            symbol = %self.router.symbol,
            leverage,
            margin_type = self.margin_type.as_str(),
            "Trade manager initialized"
        );
        Ok(())
    }

    async fn fetch_max_leverage(&self) -> TradeResult<u8> {
        let brackets = self
            .router
            .client
            .leverage_brackets(&self.router.symbol)
            .await?;
        brackets
            .iter()
            .map(|b| b.initial_leverage)
            .max()
            .ok_or_else(|| {
                TradeError::Exchange(anyhow!(
                    "No leverage brackets returned for {}",
                    self.router.symbol
                ))
            })
    }

    /// Size an order at `reference_price` with the active (or maximum) leverage.
    pub async fn compute_order_quantity(&self, reference_price: Decimal) -> TradeResult<Decimal> {
        let leverage = match self.leverage {
            Some(leverage) => leverage,
            None => self.fetch_max_leverage().await?,
        };
        self.sizer
            .compute_order_quantity(self.router.client.as_ref(), leverage, reference_price)
            .await
    }

    pub fn symbol(&self) -> &str {
        &self.router.symbol
    }

    pub fn filters(&self) -> &SymbolFilters {
        &self.router.filters
    }

    pub fn margin_asset(&self) -> &str {
        self.sizer.margin_asset()
    }

    pub fn leverage(&self) -> Option<u8> {
        self.leverage
    }

    pub fn trade(&self) -> Option<&ActiveTrade> {
        self.trade.as_ref()
    }

    /// Signed position size observed by the last `sync_state`.
    pub fn last_position_size(&self) -> Decimal {
        self.last_position_size
    }

    /// Parse and apply a decoded signal.
    pub async fn handle_signal_value(&mut self, value: &Value) -> TradeResult<()> {
        let signal = Signal::parse(value)?;
        self.handle_signal(signal).await
    }

    /// Apply one decision. Errors propagate; nothing is retried here.
    pub async fn handle_signal(&mut self, signal: Signal) -> TradeResult<()> {
        debug!(action = signal.action(), "Handling signal");
        match signal {
            Signal::Enter(enter) => self.handle_enter(enter).await,
            Signal::Update(update) => self.handle_update(update).await,
            Signal::Exit => self.handle_exit().await,
            Signal::CancelEntry => self.handle_cancel_entry().await,
            Signal::Wait | Signal::Hold => Ok(()),
        }
    }

    async fn handle_enter(&mut self, enter: EnterSignal) -> TradeResult<()> {
        if let Some(trade) = &self.trade {
            if trade.position_open || trade.entry_order.is_some() {
                return Err(TradeError::conflict(
                    "a trade is already open or pending; cannot enter another",
                ));
            }
        }

        let reference_price = match enter.entry {
            EntryRequest::Limit { price } => price,
            EntryRequest::Market => self.router.client.symbol_price(&self.router.symbol).await?,
        };
        let quantity = self.compute_order_quantity(reference_price).await?;
        self.router
            .check_protective_inputs(quantity, Some(enter.sl), &enter.tp)?;

        let mut trade = ActiveTrade::new(
            enter.side,
            enter.entry.kind(),
            quantity,
            &enter.tp,
            enter.sl,
        );

        match enter.entry {
            EntryRequest::Market => {
                let order = self
                    .router
                    .place_market_entry(enter.side, quantity, reference_price)
                    .await?;
                if let ManagedOrder::MarketEntry { fill_price, .. } = &order {
                    trade.entry_price = Some(*fill_price);
                }
                trade.position_open = true;
                trade.entry_order = Some(order);

                let trade = self.trade.insert(trade);
                self.router.place_protective_orders(trade).await?;
            }
            EntryRequest::Limit { price } => {
                let order = self
                    .router
                    .place_limit_entry(enter.side, quantity, price)
                    .await?;
                if let ManagedOrder::LimitEntry { price, .. } = &order {
                    trade.entry_price = Some(*price);
                }
                trade.entry_order = Some(order);
                self.trade = Some(trade);
            }
        }

        info!(
            side = enter.side.as_str(),
            entry_kind = ?enter.entry.kind(),
            %quantity,
            sl = %enter.sl,
            legs = enter.tp.len(),
            "Trade entered"
        );
        Ok(())
    }

    async fn handle_update(&mut self, update: UpdateSignal) -> TradeResult<()> {
        let Some(trade) = self.trade.as_mut() else {
            debug!("Update without an active trade ignored");
            return Ok(());
        };

        self.router.check_protective_inputs(
            trade.quantity,
            update.sl,
            update.tp.as_deref().unwrap_or_default(),
        )?;
        if let Some(price) = update.entry.as_ref().and_then(|e| e.price) {
            self.router.filters.normalize_price(price)?;
        }

        if let Some(sl) = update.sl {
            trade.sl_price = sl;
            if let Some(order) = trade.stop_loss_order.as_ref() {
                self.router.cancel(order).await?;
            }
            trade.stop_loss_order = None;
            if trade.position_open {
                trade.stop_loss_order = Some(self.router.place_stop_loss(trade.side, sl).await?);
            }
            info!(%sl, "Stop-loss updated");
        }

        if let Some(targets) = update.tp {
            self.router.cancel_all(&mut trade.take_profit_orders).await?;
            trade.set_tp_targets(&targets);
            if trade.position_open {
                self.router.place_take_profits(trade).await?;
            }
            info!(legs = targets.len(), "Take-profits updated");
        }

        if let Some(entry) = update.entry {
            let Some(pending) = trade.entry_order.as_ref().filter(|_| !trade.position_open) else {
                debug!("Entry update ignored without a pending entry");
                return Ok(());
            };

            let kind = entry.kind.as_deref().map(str::to_lowercase);
            let is_limit = match kind.as_deref() {
                Some(kind) => kind == "limit",
                None => trade.entry_kind == EntryKind::Limit,
            };
            if !is_limit {
                return Err(TradeError::validation(
                    "pending entry updates must specify a limit order",
                ));
            }
            let price = entry
                .price
                .ok_or_else(|| TradeError::validation("limit entry update requires a price"))?;

            self.router.cancel(pending).await?;
            trade.entry_order = None;
            trade.entry_kind = EntryKind::Limit;

            let order = self
                .router
                .place_limit_entry(trade.side, trade.quantity, price)
                .await?;
            if let ManagedOrder::LimitEntry { price, .. } = &order {
                trade.entry_price = Some(*price);
            }
            trade.entry_order = Some(order);
            info!(%price, "Limit entry repriced");
        }

        Ok(())
    }

    async fn handle_exit(&mut self) -> TradeResult<()> {
        let Some(trade) = self.trade.as_mut() else {
            debug!("Exit without an active trade ignored");
            return Ok(());
        };

        if !trade.position_open {
            if let Some(order) = trade.entry_order.as_ref() {
                self.router.cancel(order).await?;
                info!(order_id = order.order_id(), "Pending entry cancelled on exit");
                self.clear_trade();
                return Ok(());
            }
        }

        self.router.close_position().await?;
        self.router.cancel_protective_orders(trade).await;
        self.clear_trade();
        info!("Trade exited");
        Ok(())
    }

    async fn handle_cancel_entry(&mut self) -> TradeResult<()> {
        let Some(trade) = self.trade.as_mut() else {
            return Ok(());
        };
        if trade.position_open {
            return Ok(());
        }
        if let Some(order) = trade.entry_order.as_ref() {
            self.router.cancel(order).await?;
            info!(order_id = order.order_id(), "Pending entry cancelled");
        }
        trade.entry_order = None;
        Ok(())
    }

    /// Drop the trade and forget the last observed position size.
    pub(super) fn clear_trade(&mut self) {
        self.trade = None;
        self.last_position_size = Decimal::ZERO;
    }
}
