//! # Signal Trader
//!
//! Order orchestration for a single Binance USDⓈ-M futures position driven
//! by an external signal source.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Binance API client (REST + WebSocket), exchange trait and mock venue
//! - `trading`: Position sizing, order orchestration, reconciliation and status
//! - `feed`: Closed-candle aggregation from the kline stream
//! - `signal`: Signal source client (Responses API)
//! - `utils`: Shared utilities and decimal arithmetic

pub mod config;
pub mod exchange;
pub mod feed;
pub mod signal;
pub mod trading;
pub mod utils;

pub use config::Config;
