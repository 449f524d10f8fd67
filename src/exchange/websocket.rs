//! Binance futures kline websocket feeding the driver loop.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const FUTURES_WS_URL: &str = "wss://fstream.binance.com";
const FUTURES_TESTNET_WS_URL: &str = "wss://fstream.binancefuture.com";

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// WebSocket event types.
#[derive(Debug, Clone)]
pub enum WsEvent {
    /// Kline update (open or closed candle)
    Kline(KlineEvent),
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KlineEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "k")]
    pub kline: KlinePayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KlinePayload {
    #[serde(rename = "t")]
    pub open_time: i64,
    #[serde(rename = "T")]
    pub close_time: i64,
    #[serde(rename = "i")]
    pub interval: String,
    #[serde(rename = "o", with = "rust_decimal::serde::str")]
    pub open: Decimal,
    #[serde(rename = "h", with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(rename = "l", with = "rust_decimal::serde::str")]
    pub low: Decimal,
    #[serde(rename = "c", with = "rust_decimal::serde::str")]
    pub close: Decimal,
    #[serde(rename = "v", with = "rust_decimal::serde::str")]
    pub volume: Decimal,
    /// Whether this kline is final
    #[serde(rename = "x")]
    pub is_closed: bool,
}

#[derive(Deserialize)]
struct StreamWrapper {
    data: KlineEvent,
}

/// Parse one combined-stream frame into a kline event.
pub fn parse_kline_frame(text: &str) -> Option<KlineEvent> {
    serde_json::from_str::<StreamWrapper>(text)
        .map(|wrapper| wrapper.data)
        .ok()
}

/// Binance WebSocket client.
pub struct BinanceWebSocket {
    base_url: String,
}

impl BinanceWebSocket {
    /// Create a new WebSocket client.
    pub fn new(testnet: bool) -> Self {
        let base_url = if testnet {
            FUTURES_TESTNET_WS_URL.to_string()
        } else {
            FUTURES_WS_URL.to_string()
        };

        Self { base_url }
    }

    /// Combined stream URL for the given symbol and kline intervals.
    pub fn kline_stream_url(&self, symbol: &str, intervals: &[&str]) -> String {
        let streams: Vec<String> = intervals
            .iter()
            .map(|interval| format!("{}@kline_{}", symbol.to_lowercase(), interval))
            .collect();

        format!("{}/stream?streams={}", self.base_url, streams.join("/"))
    }

    /// Spawn a task streaming klines into `tx`, reconnecting until the receiver is dropped.
    pub fn spawn_kline_stream(
        &self,
        symbol: &str,
        intervals: &[&str],
        tx: mpsc::Sender<WsEvent>,
    ) -> JoinHandle<()> {
        let url = self.kline_stream_url(symbol, intervals);

        tokio::spawn(async move {
            loop {
                match Self::connect_and_handle(&url, &tx).await {
                    Ok(()) => info!("Kline stream ended"),
                    Err(e) => error!("Kline stream error: {:#}", e),
                }

                if tx.is_closed() {
                    debug!("Event receiver dropped, stopping kline stream");
                    return;
                }

                let _ = tx.send(WsEvent::Disconnected).await;
                warn!(delay_secs = RECONNECT_DELAY.as_secs(), "Reconnecting kline stream");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        })
    }

    /// Read one connection until it closes.
    async fn connect_and_handle(url: &str, tx: &mpsc::Sender<WsEvent>) -> Result<()> {
        info!("Connecting to WebSocket: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .context("Failed to connect to WebSocket")?;

        let (_write, mut read) = ws_stream.split();

        // Notify connection established
        let _ = tx.send(WsEvent::Connected).await;

        while let Some(msg) = read.next().await {
            match msg.context("WebSocket read failed")? {
                Message::Text(text) => {
                    let Some(event) = parse_kline_frame(&text) else {
                        debug!("Ignoring non-kline frame");
                        continue;
                    };
                    if tx.send(WsEvent::Kline(event)).await.is_err() {
                        warn!("Event receiver dropped");
                        return Ok(());
                    }
                }
                Message::Ping(_) => {
                    debug!("Received ping, sending pong");
                    // Pong is handled automatically by tungstenite
                }
                Message::Close(_) => {
                    info!("WebSocket closed by server");
                    return Ok(());
                }
                _ => {}
            }
        }

        Ok(())
    }
}
