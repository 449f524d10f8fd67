//! Configuration management for the signal trader.
//!
//! Loads settings from `.env`, an optional `config.toml` and `TRADER__*`
//! environment variables.

use crate::exchange::MarginType;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Binance API credentials and transport
    #[serde(default)]
    pub binance: BinanceConfig,
    /// Instrument and margin settings
    #[serde(default)]
    pub trading: TradingConfig,
    /// Candle feed settings
    #[serde(default)]
    pub feed: FeedConfig,
    /// External signal source
    #[serde(default)]
    pub signal: SignalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceConfig {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret key for signing requests
    #[serde(default)]
    pub secret_key: String,
    /// Use testnet instead of production
    #[serde(default)]
    pub testnet: bool,
    /// Override of the mainnet REST base URL
    #[serde(default)]
    pub rest_url: Option<String>,
    /// REST request timeout
    #[serde(default = "default_rest_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Fixed leverage; the symbol's maximum bracket leverage when unset
    #[serde(default)]
    pub leverage: Option<u8>,
    #[serde(default = "default_margin_type")]
    pub margin_type: MarginType,
    /// Fraction of the balance committed as margin per trade (0.0-1.0]
    #[serde(default = "default_margin_usage_pct")]
    pub margin_usage_pct: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Candles fetched per interval when seeding the feed baseline
    #[serde(default = "default_candle_limit")]
    pub candle_limit: u16,
    /// Driver loop poll interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// 5m candles sent in the initial snapshot
    #[serde(default = "default_initial_snapshot_5m")]
    pub initial_snapshot_5m: usize,
    /// 15m candles sent in the initial snapshot
    #[serde(default = "default_initial_snapshot_15m")]
    pub initial_snapshot_15m: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_signal_model")]
    pub model: String,
    #[serde(default = "default_signal_base_url")]
    pub base_url: String,
    #[serde(default = "default_signal_timeout")]
    pub timeout_secs: u64,
    /// Ask the provider to keep the conversation server-side
    #[serde(default = "default_store_messages")]
    pub store_messages: bool,
    /// System message sent with the initial snapshot
    #[serde(default = "default_instructions")]
    pub instructions: String,
}

fn default_rest_timeout() -> u64 {
    10
}

fn default_symbol() -> String {
    "BTCUSDC".to_string()
}

fn default_margin_type() -> MarginType {
    MarginType::Isolated
}

fn default_margin_usage_pct() -> Decimal {
    Decimal::new(10, 2) // 0.10 (10%)
}

fn default_candle_limit() -> u16 {
    2
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_initial_snapshot_5m() -> usize {
    1300
}

fn default_initial_snapshot_15m() -> usize {
    1200
}

fn default_signal_model() -> String {
    "grok-4".to_string()
}

fn default_signal_base_url() -> String {
    "https://api.x.ai/v1".to_string()
}

fn default_signal_timeout() -> u64 {
    220
}

fn default_store_messages() -> bool {
    true
}

fn default_instructions() -> String {
    DEFAULT_INSTRUCTIONS.trim().to_string()
}

const DEFAULT_INSTRUCTIONS: &str = r#"
You are an intraday trader managing one BTCUSDC perpetual futures position at a time.
You receive closed 5m and 15m candles (open, high, low, close, volume) and reply with
your reasoning followed by exactly one JSON object as the last thing in the message.

Decision schema:
{
  "type": "enter | update | exit | cancel_entry_order | wait | hold",
  "side": "long | short",
  "entry": { "kind": "market | limit", "price": number },
  "sl": number,
  "tp": [ { "price": number, "size_pct": number } ]
}

- enter: open a trade; side, entry, sl and 1-3 tp legs are required, size_pct summing to 100.
  entry.price is required for limit entries only.
- update: move sl, replace tp, or reprice a pending limit entry; include only changed fields.
- exit: close the open position or drop a pending entry.
- cancel_entry_order: cancel a resting limit entry.
- wait: no trade and nothing to do. hold: keep the current trade unchanged.

Every target must offer at least 1:2 reward to risk. Avoid choppy markets.

Each update also carries activeTradeStatus {side, entryKind, entryPrice, sl, tp1, tp2, tp3}
and activeLimitOrderStatus {side, price}. Fields are null when nothing is active; a tp slot
turns null once that leg has filled.
"#;

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("TRADER"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.trading.margin_usage_pct > Decimal::ZERO
                && self.trading.margin_usage_pct <= Decimal::ONE,
            "margin_usage_pct must be between 0 (exclusive) and 1"
        );

        anyhow::ensure!(
            self.trading.leverage.map_or(true, |leverage| leverage >= 1),
            "leverage must be >= 1 when set"
        );

        anyhow::ensure!(
            !self.trading.symbol.trim().is_empty(),
            "symbol must not be empty"
        );

        anyhow::ensure!(
            self.feed.initial_snapshot_5m > 0 && self.feed.initial_snapshot_15m > 0,
            "initial snapshot candle counts must be positive"
        );

        anyhow::ensure!(
            self.feed.poll_interval_ms > 0,
            "poll_interval_ms must be positive"
        );

        Ok(())
    }

    /// Additional checks for running against the live exchange and signal source.
    pub fn validate_live(&self) -> Result<()> {
        self.validate()?;

        anyhow::ensure!(
            !self.binance.api_key.is_empty() && !self.binance.secret_key.is_empty(),
            "Binance API credentials are required (TRADER__BINANCE__API_KEY, TRADER__BINANCE__SECRET_KEY)"
        );

        anyhow::ensure!(
            !self.signal.api_key.is_empty(),
            "Signal source API key is required (TRADER__SIGNAL__API_KEY)"
        );

        Ok(())
    }
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            testnet: false,
            rest_url: None,
            timeout_secs: default_rest_timeout(),
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            leverage: None,
            margin_type: default_margin_type(),
            margin_usage_pct: default_margin_usage_pct(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            candle_limit: default_candle_limit(),
            poll_interval_ms: default_poll_interval_ms(),
            initial_snapshot_5m: default_initial_snapshot_5m(),
            initial_snapshot_15m: default_initial_snapshot_15m(),
        }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_signal_model(),
            base_url: default_signal_base_url(),
            timeout_secs: default_signal_timeout(),
            store_messages: default_store_messages(),
            instructions: default_instructions(),
        }
    }
}
