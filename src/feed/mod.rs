//! Market-data feed for the signal source.
//!
//! Closed 5m and 15m klines arrive from the websocket task over an mpsc
//! channel; [`CandleFeed`] keeps the latest closed candle per interval and
//! turns them into update batches for the driver loop.

mod aggregator;
mod candle;

pub use aggregator::{CandleFeed, CandleUpdate};
pub use candle::{Candle, Interval};
