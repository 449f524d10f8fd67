//! Exchange-imposed trading constraints for one instrument.

use super::error::{TradeError, TradeResult};
use crate::exchange::{FuturesSymbolInfo, SymbolFilter};
use crate::utils::decimal::floor_to_increment;
use anyhow::{bail, Result};
use rust_decimal::Decimal;
use serde::Serialize;

/// Tick/step/minimum constraints every submitted price and quantity must respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SymbolFilters {
    /// Minimum price increment
    pub tick_size: Decimal,
    /// Minimum quantity increment
    pub step_size: Decimal,
    pub min_qty: Decimal,
    /// Minimum price × quantity; zero when the exchange does not publish one
    pub min_notional: Decimal,
}

impl SymbolFilters {
    /// Build filters from the symbol's `PRICE_FILTER`, `LOT_SIZE` and `MIN_NOTIONAL` entries.
    pub fn from_symbol_info(info: &FuturesSymbolInfo) -> Result<Self> {
        let mut tick_size = Decimal::ZERO;
        let mut step_size = Decimal::ZERO;
        let mut min_qty = Decimal::ZERO;
        let mut min_notional = Decimal::ZERO;

        for filter in &info.filters {
            match filter {
                SymbolFilter::PriceFilter { tick_size: tick } => tick_size = *tick,
                SymbolFilter::LotSize {
                    step_size: step,
                    min_qty: min,
                } => {
                    step_size = *step;
                    min_qty = *min;
                }
                SymbolFilter::MinNotional { notional } => min_notional = *notional,
                SymbolFilter::Other => {}
            }
        }

        if tick_size.is_zero() || step_size.is_zero() {
            bail!("Symbol {} lacks price or lot size filters", info.symbol);
        }

        Ok(Self {
            tick_size,
            step_size,
            min_qty,
            min_notional,
        })
    }

    /// Round a price down to the tick size.
    ///
    /// Prices come from the signal source; one too large to normalize is a
    /// validation error.
    pub fn normalize_price(&self, price: Decimal) -> TradeResult<Decimal> {
        floor_to_increment(price, self.tick_size).ok_or_else(|| {
            TradeError::validation(format!(
                "price {} out of range for tick size {}",
                price, self.tick_size
            ))
        })
    }

    /// Round a quantity down to the step size.
    pub fn normalize_qty(&self, qty: Decimal) -> TradeResult<Decimal> {
        floor_to_increment(qty, self.step_size).ok_or_else(|| {
            TradeError::sizing(format!(
                "quantity {} out of range for step size {}",
                qty, self.step_size
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc_filters() -> SymbolFilters {
        SymbolFilters {
            tick_size: dec!(0.1),
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            min_notional: dec!(5),
        }
    }

    #[test]
    fn test_normalize_price_floors_to_tick() {
        let filters = btc_filters();
        let price = filters.normalize_price(dec!(67320.19)).unwrap();
        assert_eq!(price, dec!(67320.1));
        assert!(price <= dec!(67320.19));
        assert!((price / filters.tick_size).fract().is_zero());
    }

    #[test]
    fn test_normalize_qty_floors_to_step() {
        let filters = btc_filters();
        assert_eq!(filters.normalize_qty(dec!(0.0294117)).unwrap(), dec!(0.029));
        assert_eq!(filters.normalize_qty(dec!(0.0174)).unwrap(), dec!(0.017));
        assert_eq!(filters.normalize_qty(dec!(0.0009)).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_out_of_range_values_are_errors() {
        let filters = btc_filters();
        let huge = Decimal::from_str_exact("70000000000000000000000000000").unwrap();

        let err = filters.normalize_price(huge).unwrap_err();
        assert!(matches!(err, TradeError::Validation(_)));

        let err = filters.normalize_qty(huge).unwrap_err();
        assert!(matches!(err, TradeError::Sizing(_)));
    }

    #[test]
    fn test_zero_sizes_are_identity() {
        let filters = SymbolFilters {
            tick_size: Decimal::ZERO,
            step_size: Decimal::ZERO,
            min_qty: Decimal::ZERO,
            min_notional: Decimal::ZERO,
        };
        assert_eq!(filters.normalize_price(dec!(68000.123)).unwrap(), dec!(68000.123));
        assert_eq!(filters.normalize_qty(dec!(0.0294117)).unwrap(), dec!(0.0294117));
    }

    #[test]
    fn test_from_symbol_info_requires_tick_and_step() {
        let info = FuturesSymbolInfo {
            symbol: "BTCUSDC".to_string(),
            status: "TRADING".to_string(),
            margin_asset: Some("USDC".to_string()),
            filters: vec![SymbolFilter::PriceFilter {
                tick_size: dec!(0.1),
            }],
        };
        assert!(SymbolFilters::from_symbol_info(&info).is_err());
    }

    #[test]
    fn test_from_symbol_info() {
        let info = FuturesSymbolInfo {
            symbol: "BTCUSDC".to_string(),
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
                SymbolFilter::Other,
            ],
        };
        assert_eq!(SymbolFilters::from_symbol_info(&info).unwrap(), btc_filters());
    }
}
