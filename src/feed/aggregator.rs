use super::candle::{Candle, Interval};
use crate::exchange::{BinanceClient, KlineEvent, WsEvent};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Candles to forward to the signal source this cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CandleUpdate {
    #[serde(rename = "5m")]
    pub candles_5m: Vec<Candle>,
    #[serde(rename = "15m", skip_serializing_if = "Option::is_none")]
    pub candles_15m: Option<Vec<Candle>>,
}

impl CandleUpdate {
    pub fn is_empty(&self) -> bool {
        self.candles_5m.is_empty() && self.candles_15m.as_ref().map_or(true, Vec::is_empty)
    }
}

/// Latest closed candle per interval plus the open time last forwarded.
#[derive(Debug, Default)]
pub struct CandleFeed {
    latest_closed: HashMap<Interval, Candle>,
    last_sent_open_time: HashMap<Interval, i64>,
    dirty: BTreeSet<Interval>,
}

impl CandleFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a baseline candle that counts as already sent.
    pub fn seed(&mut self, interval: Interval, candle: Candle) {
        self.last_sent_open_time.insert(interval, candle.open_time);
        self.latest_closed.insert(interval, candle);
    }

    /// Seed both intervals from the newest REST klines.
    pub async fn load_baselines(
        &mut self,
        client: &BinanceClient,
        symbol: &str,
        candle_limit: u16,
    ) -> Result<()> {
        for interval in Interval::ALL {
            let rows = client
                .klines(symbol, interval.as_str(), candle_limit)
                .await
                .with_context(|| format!("Failed to load {} baseline", interval))?;
            if let Some(row) = rows.last() {
                self.seed(interval, Candle::from_kline_row(row)?);
            }
        }

        info!(%symbol, "Loaded initial candle baselines");
        Ok(())
    }

    /// Accept a kline event. Only closed 5m/15m klines count; a new open
    /// time marks the interval dirty. Returns the interval when it did.
    pub fn ingest(&mut self, event: &KlineEvent) -> Option<Interval> {
        let kline = &event.kline;
        if !kline.is_closed {
            return None;
        }
        let interval = kline.interval.parse::<Interval>().ok()?;

        let candle = Candle::from(kline);
        let previous = self
            .latest_closed
            .insert(interval, candle)
            .map(|c| c.open_time);

        if previous == Some(kline.open_time) {
            return None;
        }

        debug!(%interval, open_time = kline.open_time, "Closed candle received");
        self.dirty.insert(interval);
        Some(interval)
    }

    pub fn has_pending(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Drain dirty intervals into an update.
    ///
    /// A 15m update always carries the current 5m candle, even if it was
    /// already sent. Otherwise a candle is forwarded only once.
    pub fn take_update(&mut self) -> Option<CandleUpdate> {
        if self.dirty.is_empty() {
            return None;
        }
        let dirty = std::mem::take(&mut self.dirty);
        let include_15m = dirty.contains(&Interval::FifteenMinutes);

        let mut update = CandleUpdate::default();

        if include_15m {
            if let Some(candle) = self.unsent(Interval::FifteenMinutes) {
                update.candles_15m = Some(vec![candle]);
            }
        }

        if let Some(candle) = self.latest_closed.get(&Interval::FiveMinutes).cloned() {
            let forced = include_15m;
            let fresh = self.last_sent_open_time.get(&Interval::FiveMinutes) != Some(&candle.open_time);
            if forced || fresh {
                self.last_sent_open_time
                    .insert(Interval::FiveMinutes, candle.open_time);
                update.candles_5m.push(candle);
            }
        }

        if update.is_empty() {
            None
        } else {
            Some(update)
        }
    }

    /// Wait up to `wait` for kline events, drain whatever else is queued,
    /// and return the resulting update. `None` when nothing new closed.
    pub async fn poll(
        &mut self,
        rx: &mut mpsc::Receiver<WsEvent>,
        wait: Duration,
    ) -> Option<CandleUpdate> {
        if let Ok(Some(event)) = tokio::time::timeout(wait, rx.recv()).await {
            self.handle_event(event);
            while let Ok(event) = rx.try_recv() {
                self.handle_event(event);
            }
        }
        self.take_update()
    }

    fn handle_event(&mut self, event: WsEvent) {
        match event {
            WsEvent::Kline(kline) => {
                self.ingest(&kline);
            }
            WsEvent::Connected => info!("Kline stream connected"),
            WsEvent::Disconnected => warn!("Kline stream disconnected"),
        }
    }

    fn unsent(&mut self, interval: Interval) -> Option<Candle> {
        let candle = self.latest_closed.get(&interval)?;
        if self.last_sent_open_time.get(&interval) == Some(&candle.open_time) {
            return None;
        }
        self.last_sent_open_time.insert(interval, candle.open_time);
        Some(candle.clone())
    }
}
