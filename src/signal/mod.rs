//! External signal source.
//!
//! The trading decision comes from an LLM behind a Responses-style HTTP API.
//! The driver sends one initial candle snapshot, then each cycle's new candles
//! with the engine's status payload, and hands the decoded JSON decision to
//! the trade manager.

mod extract;
mod responses;

pub use extract::{extract_text, extract_trailing_json};
pub use responses::ResponsesClient;

use crate::feed::{Candle, CandleUpdate};
use crate::trading::StatusPayload;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Source of trading decisions, one JSON signal per call.
#[async_trait]
pub trait SignalSource: Send {
    /// Open the session with historical candles. Allowed once per session.
    async fn send_initial_snapshot(
        &mut self,
        symbol: &str,
        candles_5m: &[Candle],
        candles_15m: &[Candle],
    ) -> Result<Value>;

    /// Ask for the next decision given fresh candles and the current trade status.
    async fn request_signal(
        &mut self,
        symbol: &str,
        update: &CandleUpdate,
        status: &StatusPayload,
    ) -> Result<Value>;
}
