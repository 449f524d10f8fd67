//! Shared fixtures for engine tests.

use super::{TradeManager, TradeManagerConfig};
use crate::exchange::{
    AccountInformation, FuturesExchangeInfo, FuturesSymbolInfo, MarginType, MockExchange,
    MockFuturesExchange, NewOrder, NotionalBracket, OrderResponse, OrderStatus, OrderType,
    SymbolFilter,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;

pub const SYMBOL: &str = "BTCUSDC";

/// Mock venue at 68000 with 1000 USDC, engine at 20x and 10% margin usage.
pub async fn setup() -> (Arc<MockExchange>, TradeManager<MockExchange>) {
    setup_at(dec!(68000), dec!(1000)).await
}

pub async fn setup_at(
    price: Decimal,
    balance: Decimal,
) -> (Arc<MockExchange>, TradeManager<MockExchange>) {
    let client = Arc::new(MockExchange::new(SYMBOL, balance, price));
    let config = TradeManagerConfig {
        leverage: Some(20),
        ..manager_config()
    };
    let mut manager = TradeManager::new(client.clone(), config).await.unwrap();
    manager.initialize().await.unwrap();
    (client, manager)
}

pub fn market_long() -> Value {
    json!({
        "type": "enter",
        "side": "long",
        "entry": {"kind": "market"},
        "sl": 67320,
        "tp": [{"price": 69000, "size_pct": 60}, {"price": 70000, "size_pct": 40}]
    })
}

pub fn limit_long(price: u32) -> Value {
    json!({
        "type": "enter",
        "side": "long",
        "entry": {"kind": "limit", "price": price},
        "sl": 66000,
        "tp": [{"price": 69000, "size_pct": 60}, {"price": 70000, "size_pct": 40}]
    })
}

/// Exchange info listing only [`SYMBOL`] with BTC-style filters.
pub fn exchange_info() -> FuturesExchangeInfo {
    FuturesExchangeInfo {
        symbols: vec![FuturesSymbolInfo {
            symbol: SYMBOL.to_string(),
            status: "TRADING".to_string(),
            margin_asset: Some("USDC".to_string()),
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
        }],
    }
}

/// Acknowledgement the exchange would return for `order`.
pub fn ack(order_id: i64, order: &NewOrder) -> OrderResponse {
    OrderResponse {
        order_id,
        symbol: order.symbol.clone(),
        status: if order.order_type == OrderType::Market {
            OrderStatus::Filled
        } else {
            OrderStatus::New
        },
        client_order_id: format!("test-{}", order_id),
        price: order.price.unwrap_or(Decimal::ZERO),
        avg_price: Decimal::ZERO,
        orig_qty: order.quantity.unwrap_or(Decimal::ZERO),
        executed_qty: Decimal::ZERO,
        stop_price: order.stop_price.unwrap_or(Decimal::ZERO),
        side: order.side,
        order_type: order.order_type,
        time_in_force: order.time_in_force,
        reduce_only: order.reduce_only.unwrap_or(false),
        close_position: order.close_position.unwrap_or(false),
        update_time: 0,
    }
}

/// Mocked exchange that serves metadata, 1000 USDC, 20x brackets and a 68000 price.
pub fn scripted_exchange() -> MockFuturesExchange {
    let mut mock = MockFuturesExchange::new();
    mock.expect_exchange_info().returning(|| Ok(exchange_info()));
    mock.expect_leverage_brackets().returning(|_| {
        Ok(vec![NotionalBracket {
            bracket: 1,
            initial_leverage: 20,
            notional_cap: dec!(50000),
            notional_floor: Decimal::ZERO,
            maint_margin_ratio: dec!(0.004),
        }])
    });
    mock.expect_account_information().returning(|| {
        Ok(AccountInformation {
            total_wallet_balance: dec!(1000),
            available_balance: Some(dec!(1000)),
            assets: vec![],
        })
    });
    mock.expect_symbol_price().returning(|_| Ok(dec!(68000)));
    mock
}

pub fn manager_config() -> TradeManagerConfig {
    TradeManagerConfig {
        symbol: SYMBOL.to_string(),
        leverage: None,
        margin_type: MarginType::Isolated,
        margin_usage_pct: dec!(0.10),
    }
}
