//! Type definitions for Binance USD-M futures requests and responses.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ==================== Exchange Info ====================

/// Exchange information for futures.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuturesExchangeInfo {
    #[serde(default)]
    pub symbols: Vec<FuturesSymbolInfo>,
}

impl FuturesExchangeInfo {
    /// Look up one instrument by symbol.
    pub fn symbol(&self, symbol: &str) -> Option<&FuturesSymbolInfo> {
        self.symbols.iter().find(|s| s.symbol == symbol)
    }
}

/// Symbol information for futures.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuturesSymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub margin_asset: Option<String>,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

/// One entry of a symbol's `filters` array.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "filterType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SymbolFilter {
    #[serde(rename_all = "camelCase")]
    PriceFilter {
        #[serde(with = "rust_decimal::serde::str")]
        tick_size: Decimal,
    },
    #[serde(rename_all = "camelCase")]
    LotSize {
        #[serde(with = "rust_decimal::serde::str")]
        step_size: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        min_qty: Decimal,
    },
    MinNotional {
        #[serde(default, with = "rust_decimal::serde::str")]
        notional: Decimal,
    },
    #[serde(other)]
    Other,
}

// ==================== Market Data ====================

/// Latest traded price for a symbol.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerPrice {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
}

// ==================== Account ====================

/// Futures account information (`/fapi/v2/account`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInformation {
    #[serde(default, with = "rust_decimal::serde::str")]
    pub total_wallet_balance: Decimal,
    /// Absent on some account types; callers fall back to the wallet balance.
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub available_balance: Option<Decimal>,
    #[serde(default)]
    pub assets: Vec<AccountAsset>,
}

/// Per-asset balance inside the futures account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountAsset {
    pub asset: String,
    #[serde(default, with = "rust_decimal::serde::str")]
    pub wallet_balance: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub available_balance: Option<Decimal>,
}

/// Futures position information (`/fapi/v2/positionRisk`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRisk {
    pub symbol: String,
    /// Signed quantity: positive long, negative short.
    #[serde(with = "rust_decimal::serde::str")]
    pub position_amt: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    #[serde(default, with = "rust_decimal::serde::str")]
    pub mark_price: Decimal,
    #[serde(rename = "unRealizedProfit", default, with = "rust_decimal::serde::str")]
    pub unrealized_profit: Decimal,
    #[serde(default, with = "rust_decimal::serde::str")]
    pub liquidation_price: Decimal,
    #[serde(default)]
    pub margin_type: Option<String>,
    #[serde(default)]
    pub position_side: Option<PositionSide>,
}

/// Position side (long, short, or both for one-way mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Both,
    Long,
    Short,
}

/// Margin type for positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginType {
    Isolated,
    #[serde(alias = "crossed")]
    Cross,
}

impl MarginType {
    /// Value expected by `/fapi/v1/marginType`.
    pub fn as_str(&self) -> &'static str {
        match self {
            MarginType::Isolated => "ISOLATED",
            MarginType::Cross => "CROSSED",
        }
    }
}

// ==================== Orders ====================

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    Stop,
    StopMarket,
    TakeProfit,
    TakeProfitMarket,
    TrailingStopMarket,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::Stop => "STOP",
            OrderType::StopMarket => "STOP_MARKET",
            OrderType::TakeProfit => "TAKE_PROFIT",
            OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
            OrderType::TrailingStopMarket => "TRAILING_STOP_MARKET",
        }
    }
}

/// Time in force for limit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Gtc, // Good Till Cancel
    Ioc, // Immediate or Cancel
    Fok, // Fill or Kill
    Gtx, // Post Only (Good Till Crossing)
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
            TimeInForce::Gtx => "GTX",
        }
    }
}

/// Price that triggers stop and take-profit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkingType {
    MarkPrice,
    ContractPrice,
}

impl WorkingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkingType::MarkPrice => "MARK_PRICE",
            WorkingType::ContractPrice => "CONTRACT_PRICE",
        }
    }
}

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    ExpiredInMatch,
}

/// New order request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
    pub reduce_only: Option<bool>,
    pub close_position: Option<bool>,
    pub working_type: Option<WorkingType>,
    pub new_client_order_id: Option<String>,
}

impl NewOrder {
    /// Immediate market order.
    pub fn market(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self::base(symbol, side, OrderType::Market).with_quantity(quantity)
    }

    /// Resting good-till-cancel limit order.
    pub fn limit(symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) -> Self {
        let mut order = Self::base(symbol, side, OrderType::Limit).with_quantity(quantity);
        order.price = Some(price);
        order.time_in_force = Some(TimeInForce::Gtc);
        order
    }

    /// Stop that closes the entire position, triggered by mark price.
    pub fn close_position_stop(symbol: &str, side: OrderSide, stop_price: Decimal) -> Self {
        let mut order = Self::base(symbol, side, OrderType::StopMarket);
        order.stop_price = Some(stop_price);
        order.close_position = Some(true);
        order.working_type = Some(WorkingType::MarkPrice);
        order
    }

    /// Reduce-only take-profit leg with an explicit quantity.
    pub fn take_profit(symbol: &str, side: OrderSide, quantity: Decimal, stop_price: Decimal) -> Self {
        let mut order =
            Self::base(symbol, side, OrderType::TakeProfitMarket).with_quantity(quantity);
        order.stop_price = Some(stop_price);
        order.reduce_only = Some(true);
        order
    }

    /// Mark this order as reduce-only.
    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = Some(true);
        self
    }

    fn with_quantity(mut self, quantity: Decimal) -> Self {
        self.quantity = Some(quantity);
        self
    }

    fn base(symbol: &str, side: OrderSide, order_type: OrderType) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type,
            quantity: None,
            price: None,
            stop_price: None,
            time_in_force: None,
            reduce_only: None,
            close_position: None,
            working_type: None,
            new_client_order_id: None,
        }
    }
}

/// Order response from the exchange (also the shape of `/fapi/v1/openOrders` rows).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: i64,
    pub symbol: String,
    pub status: OrderStatus,
    pub client_order_id: String,
    #[serde(default, with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(default, with = "rust_decimal::serde::str")]
    pub avg_price: Decimal,
    #[serde(default, with = "rust_decimal::serde::str")]
    pub orig_qty: Decimal,
    #[serde(default, with = "rust_decimal::serde::str")]
    pub executed_qty: Decimal,
    #[serde(default, with = "rust_decimal::serde::str")]
    pub stop_price: Decimal,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(default)]
    pub time_in_force: Option<TimeInForce>,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub close_position: bool,
    #[serde(default)]
    pub update_time: i64,
}

/// Binance error body (`{"code": -2019, "msg": "Margin is insufficient."}`).
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

// ==================== Leverage Bracket Types ====================

/// Leverage bracket information for a symbol.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeverageBracket {
    pub symbol: String,
    pub brackets: Vec<NotionalBracket>,
}

/// Notional bracket with maintenance margin rate.
///
/// Binance sends these values as JSON numbers, not strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotionalBracket {
    /// Bracket number (tier)
    pub bracket: u8,
    /// Initial leverage for this bracket
    pub initial_leverage: u8,
    /// Maximum notional value for this bracket
    #[serde(default)]
    pub notional_cap: Decimal,
    /// Notional floor for this bracket
    #[serde(default)]
    pub notional_floor: Decimal,
    /// Maintenance margin rate (e.g., 0.004 = 0.4%)
    #[serde(default)]
    pub maint_margin_ratio: Decimal,
}
