//! Typed decisions parsed from the signal source's JSON.

use super::error::{TradeError, TradeResult};
use super::model::{EntryKind, TpTarget, TradeSide};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

/// How a new trade gets into the market.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryRequest {
    Market,
    Limit { price: Decimal },
}

impl EntryRequest {
    pub fn kind(&self) -> EntryKind {
        match self {
            EntryRequest::Market => EntryKind::Market,
            EntryRequest::Limit { .. } => EntryKind::Limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnterSignal {
    pub side: TradeSide,
    pub entry: EntryRequest,
    pub sl: Decimal,
    pub tp: Vec<TpTarget>,
}

/// Requested change to a pending entry. Checked against trade state when applied.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EntryUpdate {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
}

/// Partial update: each present field is applied independently.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSignal {
    pub sl: Option<Decimal>,
    pub tp: Option<Vec<TpTarget>>,
    pub entry: Option<EntryUpdate>,
}

/// A decision from the signal source.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Enter(EnterSignal),
    Update(UpdateSignal),
    Exit,
    /// `cancel_limit_order`, `cancel_entry_order` and `cancel_stop_order`
    CancelEntry,
    Wait,
    Hold,
}

#[derive(Debug, Deserialize)]
struct RawSignal {
    #[serde(rename = "type")]
    action: Option<String>,
    side: Option<String>,
    entry: Option<EntryUpdate>,
    sl: Option<Decimal>,
    tp: Option<Vec<TpTarget>>,
}

impl Signal {
    /// Validate a decoded decision.
    pub fn parse(value: &Value) -> TradeResult<Self> {
        let raw = RawSignal::deserialize(value)
            .map_err(|e| TradeError::validation(format!("malformed signal: {}", e)))?;

        let action = raw
            .action
            .as_deref()
            .map(|a| a.trim().to_lowercase())
            .ok_or_else(|| TradeError::validation("signal has no type"))?;

        match action.as_str() {
            "enter" => Self::parse_enter(raw).map(Signal::Enter),
            "update" => Ok(Signal::Update(UpdateSignal {
                sl: raw.sl,
                tp: raw.tp,
                entry: raw.entry.filter(|e| e.kind.is_some() || e.price.is_some()),
            })),
            "exit" => Ok(Signal::Exit),
            "cancel_limit_order" | "cancel_entry_order" | "cancel_stop_order" => {
                Ok(Signal::CancelEntry)
            }
            "wait" => Ok(Signal::Wait),
            "hold" => Ok(Signal::Hold),
            other => Err(TradeError::validation(format!(
                "unsupported signal type: {}",
                other
            ))),
        }
    }

    fn parse_enter(raw: RawSignal) -> TradeResult<EnterSignal> {
        let side = match raw.side.as_deref().map(str::to_lowercase).as_deref() {
            Some("long") => TradeSide::Long,
            Some("short") => TradeSide::Short,
            Some(other) => {
                return Err(TradeError::validation(format!("unsupported side: {}", other)))
            }
            None => return Err(TradeError::validation("enter requires side")),
        };

        let sl = raw
            .sl
            .ok_or_else(|| TradeError::validation("enter requires sl"))?;

        let entry = match raw.entry {
            None => EntryRequest::Market,
            Some(entry) => match entry.kind.as_deref().map(str::to_lowercase).as_deref() {
                None | Some("market") => EntryRequest::Market,
                Some("limit") => EntryRequest::Limit {
                    price: entry
                        .price
                        .ok_or_else(|| TradeError::validation("limit entry requires a price"))?,
                },
                Some(other) => {
                    return Err(TradeError::validation(format!(
                        "unsupported entry kind: {}",
                        other
                    )))
                }
            },
        };

        Ok(EnterSignal {
            side,
            entry,
            sl,
            tp: raw.tp.unwrap_or_default(),
        })
    }

    pub fn action(&self) -> &'static str {
        match self {
            Signal::Enter(_) => "enter",
            Signal::Update(_) => "update",
            Signal::Exit => "exit",
            Signal::CancelEntry => "cancel_entry_order",
            Signal::Wait => "wait",
            Signal::Hold => "hold",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_market_enter() {
        let signal = Signal::parse(&json!({
            "type": "enter",
            "side": "long",
            "entry": {"kind": "market"},
            "sl": 67320,
            "tp": [{"price": 69000, "size_pct": 60}, {"price": 70000, "size_pct": 40}]
        }))
        .unwrap();

        let Signal::Enter(enter) = signal else {
            panic!("expected enter");
        };
        assert_eq!(enter.side, TradeSide::Long);
        assert_eq!(enter.entry, EntryRequest::Market);
        assert_eq!(enter.sl, dec!(67320));
        assert_eq!(enter.tp.len(), 2);
        assert_eq!(enter.tp[1].size_pct, dec!(40));
    }

    #[test]
    fn test_enter_defaults_to_market_without_tp() {
        let signal = Signal::parse(&json!({"type": "enter", "side": "short", "sl": 70000})).unwrap();
        let Signal::Enter(enter) = signal else {
            panic!("expected enter");
        };
        assert_eq!(enter.entry.kind(), EntryKind::Market);
        assert!(enter.tp.is_empty());
    }

    #[test]
    fn test_limit_enter_requires_price() {
        let err = Signal::parse(&json!({
            "type": "enter", "side": "long", "sl": 67000, "entry": {"kind": "limit"}
        }))
        .unwrap_err();
        assert!(matches!(err, TradeError::Validation(_)));

        let signal = Signal::parse(&json!({
            "type": "enter", "side": "long", "sl": 67000,
            "entry": {"kind": "limit", "price": "67500.5"}
        }))
        .unwrap();
        let Signal::Enter(enter) = signal else {
            panic!("expected enter");
        };
        assert_eq!(enter.entry, EntryRequest::Limit { price: dec!(67500.5) });
    }

    #[test]
    fn test_enter_requires_side_and_sl() {
        assert!(matches!(
            Signal::parse(&json!({"type": "enter", "sl": 67000})),
            Err(TradeError::Validation(_))
        ));
        assert!(matches!(
            Signal::parse(&json!({"type": "enter", "side": "long"})),
            Err(TradeError::Validation(_))
        ));
        assert!(matches!(
            Signal::parse(&json!({"type": "enter", "side": "sideways", "sl": 1})),
            Err(TradeError::Validation(_))
        ));
    }

    #[test]
    fn test_unsupported_entry_kind() {
        let err = Signal::parse(&json!({
            "type": "enter", "side": "long", "sl": 67000, "entry": {"kind": "stop"}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("unsupported entry kind"));
    }

    #[test]
    fn test_cancel_aliases() {
        for action in ["cancel_limit_order", "cancel_entry_order", "cancel_stop_order"] {
            assert_eq!(Signal::parse(&json!({"type": action})).unwrap(), Signal::CancelEntry);
        }
    }

    #[test]
    fn test_unknown_action_is_validation_error() {
        let err = Signal::parse(&json!({"type": "pyramid"})).unwrap_err();
        assert!(matches!(err, TradeError::Validation(_)));
        assert!(matches!(
            Signal::parse(&json!({"side": "long"})),
            Err(TradeError::Validation(_))
        ));
    }

    #[test]
    fn test_update_keeps_only_present_fields() {
        let signal = Signal::parse(&json!({"type": "update", "sl": 67500, "entry": {}})).unwrap();
        assert_eq!(
            signal,
            Signal::Update(UpdateSignal {
                sl: Some(dec!(67500)),
                tp: None,
                entry: None,
            })
        );
    }

    #[test]
    fn test_passive_actions() {
        assert_eq!(Signal::parse(&json!({"type": "wait"})).unwrap(), Signal::Wait);
        assert_eq!(Signal::parse(&json!({"type": "hold"})).unwrap(), Signal::Hold);
        assert_eq!(Signal::parse(&json!({"type": "exit"})).unwrap(), Signal::Exit);
    }
}
