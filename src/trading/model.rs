//! Trade state owned by the [`TradeManager`](super::TradeManager).

use crate::exchange::{OrderResponse, OrderSide, OrderType};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of the managed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Long,
    Short,
}

impl TradeSide {
    /// Order side that opens the position.
    pub fn entry_side(&self) -> OrderSide {
        match self {
            TradeSide::Long => OrderSide::Buy,
            TradeSide::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces or closes the position.
    pub fn exit_side(&self) -> OrderSide {
        self.entry_side().opposite()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Long => "long",
            TradeSide::Short => "short",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Market,
    Limit,
}

/// One take-profit leg as requested by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TpTarget {
    pub price: Decimal,
    #[serde(default)]
    pub size_pct: Decimal,
}

/// Exchange identity shared by every managed order kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderHandle {
    pub order_id: i64,
    pub client_order_id: String,
    pub side: OrderSide,
}

impl From<&OrderResponse> for OrderHandle {
    fn from(response: &OrderResponse) -> Self {
        Self {
            order_id: response.order_id,
            client_order_id: response.client_order_id.clone(),
            side: response.side,
        }
    }
}

/// An order placed by the engine, one variant per role.
#[derive(Debug, Clone, PartialEq)]
pub enum ManagedOrder {
    MarketEntry {
        handle: OrderHandle,
        quantity: Decimal,
        fill_price: Decimal,
    },
    LimitEntry {
        handle: OrderHandle,
        quantity: Decimal,
        price: Decimal,
    },
    /// Close-position stop, no quantity of its own
    StopLoss {
        handle: OrderHandle,
        stop_price: Decimal,
    },
    TakeProfit {
        handle: OrderHandle,
        quantity: Decimal,
        stop_price: Decimal,
        /// Position of the leg in `ActiveTrade::tp_targets`
        target_index: usize,
    },
}

impl ManagedOrder {
    pub fn handle(&self) -> &OrderHandle {
        match self {
            ManagedOrder::MarketEntry { handle, .. }
            | ManagedOrder::LimitEntry { handle, .. }
            | ManagedOrder::StopLoss { handle, .. }
            | ManagedOrder::TakeProfit { handle, .. } => handle,
        }
    }

    pub fn order_id(&self) -> i64 {
        self.handle().order_id
    }

    pub fn order_type(&self) -> OrderType {
        match self {
            ManagedOrder::MarketEntry { .. } => OrderType::Market,
            ManagedOrder::LimitEntry { .. } => OrderType::Limit,
            ManagedOrder::StopLoss { .. } => OrderType::StopMarket,
            ManagedOrder::TakeProfit { .. } => OrderType::TakeProfitMarket,
        }
    }

    pub fn quantity(&self) -> Option<Decimal> {
        match self {
            ManagedOrder::MarketEntry { quantity, .. }
            | ManagedOrder::LimitEntry { quantity, .. }
            | ManagedOrder::TakeProfit { quantity, .. } => Some(*quantity),
            ManagedOrder::StopLoss { .. } => None,
        }
    }

    pub fn target_index(&self) -> Option<usize> {
        match self {
            ManagedOrder::TakeProfit { target_index, .. } => Some(*target_index),
            _ => None,
        }
    }

    pub fn is_limit_entry(&self) -> bool {
        matches!(self, ManagedOrder::LimitEntry { .. })
    }
}

/// The single trade the engine orchestrates.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTrade {
    pub side: TradeSide,
    pub entry_kind: EntryKind,
    pub quantity: Decimal,
    /// Requested legs; a slot becomes `None` once reconciliation sees its order gone
    pub tp_targets: Vec<Option<TpTarget>>,
    pub sl_price: Decimal,
    pub position_open: bool,
    pub entry_price: Option<Decimal>,
    pub entry_order: Option<ManagedOrder>,
    pub stop_loss_order: Option<ManagedOrder>,
    pub take_profit_orders: Vec<ManagedOrder>,
}

impl ActiveTrade {
    pub fn new(
        side: TradeSide,
        entry_kind: EntryKind,
        quantity: Decimal,
        tp_targets: &[TpTarget],
        sl_price: Decimal,
    ) -> Self {
        Self {
            side,
            entry_kind,
            quantity,
            tp_targets: tp_targets.iter().copied().map(Some).collect(),
            sl_price,
            position_open: false,
            entry_price: None,
            entry_order: None,
            stop_loss_order: None,
            take_profit_orders: Vec::new(),
        }
    }

    /// A LIMIT entry is resting and the position has not opened yet.
    pub fn has_pending_entry(&self) -> bool {
        !self.position_open && self.entry_order.as_ref().is_some_and(ManagedOrder::is_limit_entry)
    }

    pub fn has_protective_orders(&self) -> bool {
        self.stop_loss_order.is_some() || !self.take_profit_orders.is_empty()
    }

    /// Replace the requested legs.
    pub fn set_tp_targets(&mut self, targets: &[TpTarget]) {
        self.tp_targets = targets.iter().copied().map(Some).collect();
    }
}
