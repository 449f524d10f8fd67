use crate::exchange::KlinePayload;
use anyhow::{anyhow, bail, Context, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Kline intervals the feed tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Interval {
    FiveMinutes,
    FifteenMinutes,
}

impl Interval {
    pub const ALL: [Interval; 2] = [Interval::FiveMinutes, Interval::FifteenMinutes];

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "5m" => Ok(Interval::FiveMinutes),
            "15m" => Ok(Interval::FifteenMinutes),
            other => bail!("Unsupported kline interval: {}", other),
        }
    }
}

/// One closed OHLCV candle as sent to the signal source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candle {
    pub open_time: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub open: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub close: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub volume: Decimal,
    pub close_time: i64,
}

impl Candle {
    /// Build from a REST `/fapi/v1/klines` row
    /// (`[openTime, open, high, low, close, volume, closeTime, ...]`).
    pub fn from_kline_row(row: &[Value]) -> Result<Self> {
        if row.len() < 7 {
            bail!("Kline row has {} fields, expected at least 7", row.len());
        }

        Ok(Self {
            open_time: row_int(&row[0]).context("Invalid kline open time")?,
            open: row_decimal(&row[1]).context("Invalid kline open")?,
            high: row_decimal(&row[2]).context("Invalid kline high")?,
            low: row_decimal(&row[3]).context("Invalid kline low")?,
            close: row_decimal(&row[4]).context("Invalid kline close")?,
            volume: row_decimal(&row[5]).context("Invalid kline volume")?,
            close_time: row_int(&row[6]).context("Invalid kline close time")?,
        })
    }

    /// Parse a batch of REST rows, failing on the first malformed one.
    pub fn from_kline_rows(rows: &[Vec<Value>]) -> Result<Vec<Self>> {
        rows.iter().map(|row| Self::from_kline_row(row)).collect()
    }
}

impl From<&KlinePayload> for Candle {
    fn from(k: &KlinePayload) -> Self {
        Self {
            open_time: k.open_time,
            open: k.open,
            high: k.high,
            low: k.low,
            close: k.close,
            volume: k.volume,
            close_time: k.close_time,
        }
    }
}

fn row_int(value: &Value) -> Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| anyhow!("expected integer, got {}", value))
}

// Binance sends prices as strings; accept bare numbers too.
fn row_decimal(value: &Value) -> Result<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s).with_context(|| format!("bad decimal {:?}", s)),
        Value::Number(n) => {
            Decimal::from_str(&n.to_string()).with_context(|| format!("bad decimal {}", n))
        }
        other => bail!("expected decimal, got {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn row() -> Vec<Value> {
        serde_json::from_value(json!([
            1717000000000i64, "68000.0", "68150.0", "67990.1", "68120.5", "12.345",
            1717000299999i64, "840000.0", 100, "6.0", "408000.0", "0"
        ]))
        .unwrap()
    }

    #[test]
    fn test_from_kline_row() {
        let candle = Candle::from_kline_row(&row()).unwrap();
        assert_eq!(candle.open_time, 1717000000000);
        assert_eq!(candle.high, dec!(68150.0));
        assert_eq!(candle.close, dec!(68120.5));
        assert_eq!(candle.volume, dec!(12.345));
        assert_eq!(candle.close_time, 1717000299999);
    }

    #[test]
    fn test_short_or_malformed_row_rejected() {
        assert!(Candle::from_kline_row(&row()[..5]).is_err());

        let mut bad = row();
        bad[2] = json!(null);
        assert!(Candle::from_kline_row(&bad).is_err());
    }

    #[test]
    fn test_payload_uses_numbers() {
        let candle = Candle::from_kline_row(&row()).unwrap();
        let value = serde_json::to_value(&candle).unwrap();
        assert_eq!(value["open"], json!(68000.0));
        assert_eq!(value["open_time"], json!(1717000000000i64));
        assert_eq!(value["volume"], json!(12.345));
    }

    #[test]
    fn test_interval_parsing() {
        assert_eq!("5m".parse::<Interval>().unwrap(), Interval::FiveMinutes);
        assert_eq!("15m".parse::<Interval>().unwrap(), Interval::FifteenMinutes);
        assert!("1h".parse::<Interval>().is_err());
        assert_eq!(Interval::FifteenMinutes.to_string(), "15m");
    }
}
