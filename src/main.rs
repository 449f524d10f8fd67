//! Signal Trader - Main Entry Point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use signal_trader::config::Config;
use signal_trader::exchange::{
    BinanceClient, BinanceWebSocket, FuturesExchange, MarginType, MockExchange, OrderResponse,
    PositionRisk, MAX_KLINE_LIMIT,
};
use signal_trader::feed::{Candle, CandleFeed, Interval};
use signal_trader::signal::{ResponsesClient, SignalSource};
use signal_trader::trading::{TradeManager, TradeManagerConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Capacity of the kline hand-off channel between the websocket task and the driver.
const FEED_CHANNEL_CAPACITY: usize = 256;

/// Signal Trader CLI
#[derive(Parser)]
#[command(name = "signal-trader")]
#[command(version, about = "Signal-driven order orchestration on Binance Futures")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live driver loop (default)
    Run,

    /// Replay a scripted enter/update/exit flow against the mock exchange
    Replay {
        /// Starting mark price
        #[arg(short, long, default_value = "68000")]
        price: Decimal,

        /// Paper wallet balance
        #[arg(short, long, default_value = "1000")]
        balance: Decimal,
    },

    /// Print the exchange position and resting orders for the configured symbol
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run().await,
        Commands::Replay { price, balance } => replay(price, balance).await,
        Commands::Status => show_status().await,
    }
}

/// Live driver: snapshot, then sync → candles → status → signal → handle until Ctrl-C or SIGTERM.
async fn run() -> Result<()> {
    info!("Signal Trader v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    config.validate_live()?;
    log_config(&config);

    let symbol = config.trading.symbol.clone();
    let client = Arc::new(BinanceClient::new(&config.binance)?);
    let mut signal_source = ResponsesClient::new(&config.signal)?;

    let mut manager =
        TradeManager::new(client.clone(), TradeManagerConfig::from(&config.trading)).await?;
    manager.initialize().await?;

    info!(
        candles_5m = config.feed.initial_snapshot_5m,
        candles_15m = config.feed.initial_snapshot_15m,
        "Fetching historical context"
    );
    let snapshot_5m = fetch_snapshot(&client, &symbol, Interval::FiveMinutes, config.feed.initial_snapshot_5m).await?;
    let snapshot_15m = fetch_snapshot(&client, &symbol, Interval::FifteenMinutes, config.feed.initial_snapshot_15m).await?;
    anyhow::ensure!(
        !snapshot_5m.is_empty() && !snapshot_15m.is_empty(),
        "Failed to retrieve initial candle snapshot"
    );

    match signal_source
        .send_initial_snapshot(&symbol, &snapshot_5m, &snapshot_15m)
        .await
    {
        Ok(signal) => {
            info!(%signal, "Initial signal received");
            if let Err(e) = manager.handle_signal_value(&signal).await {
                error!(error = %e, "Failed to handle initial signal");
            }
        }
        Err(e) => error!(error = %format!("{:#}", e), "Initial snapshot failed"),
    }

    let mut feed = CandleFeed::new();
    feed.load_baselines(&client, &symbol, config.feed.candle_limit)
        .await?;

    let (tx, mut rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
    let ws = BinanceWebSocket::new(config.binance.testnet);
    let intervals: Vec<&str> = Interval::ALL.iter().map(Interval::as_str).collect();
    let stream = ws.spawn_kline_stream(&symbol, &intervals, tx);

    let shutdown = watch_shutdown(shutdown_signal());

    let poll_interval = Duration::from_millis(config.feed.poll_interval_ms);
    info!("Starting main loop");

    while !shutdown.load(Ordering::SeqCst) {
        if let Err(e) = manager.sync_state().await {
            warn!(error = %e, "State sync failed");
        }

        let Some(update) = feed.poll(&mut rx, poll_interval).await else {
            continue;
        };

        info!(
            candles_5m = update.candles_5m.len(),
            has_15m = update.candles_15m.is_some(),
            "Dispatching candles to signal source"
        );

        let status = manager.build_status_payload();
        let signal = match signal_source.request_signal(&symbol, &update, &status).await {
            Ok(signal) => signal,
            Err(e) => {
                error!(error = %format!("{:#}", e), "Signal request failed");
                continue;
            }
        };

        info!(%signal, "Signal received");
        if let Err(e) = manager.handle_signal_value(&signal).await {
            error!(error = %e, retryable = e.is_retryable(), "Failed to handle signal");
        }
    }

    info!("Shutting down");
    stream.abort();
    Ok(())
}

/// Flag that flips once `signal` resolves.
fn watch_shutdown<F>(signal: F) -> Arc<AtomicBool>
where
    F: Future<Output = ()> + Send + 'static,
{
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        signal.await;
        info!("Shutdown signal received");
        shutdown_clone.store(true, Ordering::SeqCst);
    });
    shutdown
}

/// Resolves on Ctrl-C, or on SIGTERM where the platform has it.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl-C only"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Ctrl-C handler failed");
        std::future::pending::<()>().await;
    }
}

/// Fetch `count` historical candles, capped at the exchange's per-request limit.
async fn fetch_snapshot(
    client: &BinanceClient,
    symbol: &str,
    interval: Interval,
    count: usize,
) -> Result<Vec<Candle>> {
    let limit = u16::try_from(count).unwrap_or(MAX_KLINE_LIMIT);
    let rows = client.klines(symbol, interval.as_str(), limit).await?;
    Candle::from_kline_rows(&rows).with_context(|| format!("Bad {} snapshot", interval))
}

/// Run a scripted flow through the engine against the in-memory venue.
async fn replay(price: Decimal, balance: Decimal) -> Result<()> {
    let symbol = "BTCUSDC";
    let client = Arc::new(MockExchange::new(symbol, balance, price));
    let config = TradeManagerConfig {
        symbol: symbol.to_string(),
        leverage: Some(20),
        margin_type: MarginType::Isolated,
        margin_usage_pct: dec!(0.10),
    };

    let mut manager = TradeManager::new(client.clone(), config).await?;
    manager.initialize().await?;

    let sl = price * dec!(0.99);
    let tp1 = price * dec!(1.015);
    let tp2 = price * dec!(1.03);
    let script: Vec<(Option<Decimal>, Value)> = vec![
        (
            None,
            json!({
                "type": "enter",
                "side": "long",
                "entry": {"kind": "market"},
                "sl": sl,
                "tp": [{"price": tp1, "size_pct": 60}, {"price": tp2, "size_pct": 40}]
            }),
        ),
        (None, json!({"type": "update", "sl": price * dec!(0.995)})),
        (Some(tp1), json!({"type": "hold"})),
        (None, json!({"type": "exit"})),
    ];

    for (move_to, signal) in script {
        if let Some(next_price) = move_to {
            info!(price = %next_price, "Moving mock price");
            client.set_price(next_price).await;
        }
        manager.sync_state().await?;
        info!(%signal, "Replaying signal");
        if let Err(e) = manager.handle_signal_value(&signal).await {
            warn!(error = %e, "Signal rejected");
        }
        info!(status = %serde_json::to_string(&manager.build_status_payload())?, "Status");
    }
    manager.sync_state().await?;

    let state = client.snapshot().await;
    let report = json!({
        "orders": state.order_log,
        "cancelled": state.cancel_log,
        "position": {
            "qty": state.position.qty,
            "entryPrice": state.position.entry_price,
        },
        "realizedPnl": state.realized_pnl,
        "walletBalance": state.wallet_balance,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Print what the exchange holds for the configured symbol: position, resting orders and filters.
async fn show_status() -> Result<()> {
    let config = Config::load()?;
    config.validate()?;

    let symbol = &config.trading.symbol;
    let client = BinanceClient::new(&config.binance)?;
    let position = client.position_risk(symbol).await?;
    let orders = client.open_orders(symbol).await?;
    let filters = client.symbol_filters(symbol).await?;

    info!(
        symbol = %symbol,
        position = %position.position_amt,
        open_orders = orders.len(),
        "Exchange state"
    );

    let mut report = position_report(&position, &orders);
    report["filters"] = json!({
        "tickSize": filters.tick_size,
        "stepSize": filters.step_size,
        "minQty": filters.min_qty,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn position_report(position: &PositionRisk, orders: &[OrderResponse]) -> Value {
    let orders: Vec<Value> = orders
        .iter()
        .map(|o| {
            json!({
                "orderId": o.order_id,
                "type": o.order_type,
                "side": o.side,
                "status": o.status,
                "price": o.price,
                "stopPrice": o.stop_price,
                "origQty": o.orig_qty,
                "reduceOnly": o.reduce_only,
                "closePosition": o.close_position,
            })
        })
        .collect();

    json!({
        "symbol": position.symbol,
        "position": {
            "qty": position.position_amt,
            "entryPrice": position.entry_price,
            "markPrice": position.mark_price,
            "unrealizedProfit": position.unrealized_profit,
            "liquidationPrice": position.liquidation_price,
        },
        "openOrders": orders,
    })
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "signal-trader.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the whole process
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("signal_trader=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    Ok(())
}

fn log_config(config: &Config) {
    info!(
        symbol = %config.trading.symbol,
        testnet = config.binance.testnet,
        leverage = ?config.trading.leverage,
        margin_type = config.trading.margin_type.as_str(),
        margin_usage_pct = %(config.trading.margin_usage_pct * Decimal::ONE_HUNDRED),
        model = %config.signal.model,
        poll_interval_ms = config.feed.poll_interval_ms,
        "Configuration loaded"
    );
}
