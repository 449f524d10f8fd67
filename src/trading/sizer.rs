//! Position sizing against account margin and exchange limits.

use super::error::{TradeError, TradeResult};
use super::filters::SymbolFilters;
use crate::exchange::{AccountInformation, FuturesExchange};
use rust_decimal::Decimal;
use tracing::{debug, info};

/// Turns balance, margin usage and leverage into an order quantity.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    filters: SymbolFilters,
    margin_asset: String,
    margin_usage_pct: Decimal,
}

impl PositionSizer {
    pub fn new(filters: SymbolFilters, margin_asset: String, margin_usage_pct: Decimal) -> Self {
        Self {
            filters,
            margin_asset,
            margin_usage_pct,
        }
    }

    pub fn margin_asset(&self) -> &str {
        &self.margin_asset
    }

    /// Wallet balance, capped by the available balance when that is the tighter limit.
    ///
    /// A missing available balance counts as equal to the wallet balance.
    pub fn select_balance(wallet: Decimal, available: Option<Decimal>) -> Decimal {
        let available = available.unwrap_or(wallet);
        let reference = if wallet > Decimal::ZERO { wallet } else { available };
        if available > Decimal::ZERO {
            reference.min(available)
        } else {
            reference
        }
    }

    /// Balance backing new positions: account totals first, then the margin asset's own row.
    pub fn usable_balance(&self, account: &AccountInformation) -> TradeResult<Decimal> {
        let balance =
            Self::select_balance(account.total_wallet_balance, account.available_balance);
        if balance > Decimal::ZERO {
            return Ok(balance);
        }

        let asset_balance = account
            .assets
            .iter()
            .find(|a| a.asset == self.margin_asset)
            .map(|a| Self::select_balance(a.wallet_balance, a.available_balance))
            .unwrap_or(Decimal::ZERO);

        if asset_balance > Decimal::ZERO {
            debug!(asset = %self.margin_asset, balance = %asset_balance, "Using margin asset balance");
            return Ok(asset_balance);
        }

        Err(TradeError::sizing(format!(
            "no usable {} balance",
            self.margin_asset
        )))
    }

    /// Quantity for `balance` at `leverage`, floored to the lot step.
    pub fn quantity_for_balance(
        &self,
        balance: Decimal,
        leverage: u8,
        reference_price: Decimal,
    ) -> TradeResult<Decimal> {
        if reference_price <= Decimal::ZERO {
            return Err(TradeError::sizing(format!(
                "invalid reference price {}",
                reference_price
            )));
        }

        let overflow = || {
            TradeError::sizing(format!(
                "order size overflows at balance {} and reference price {}",
                balance, reference_price
            ))
        };
        let margin_allocation = balance
            .checked_mul(self.margin_usage_pct)
            .ok_or_else(overflow)?;
        let notional = margin_allocation
            .checked_mul(Decimal::from(leverage))
            .ok_or_else(overflow)?;

        if self.filters.min_notional > Decimal::ZERO && notional < self.filters.min_notional {
            return Err(TradeError::sizing(format!(
                "notional {} below minimum {}",
                notional, self.filters.min_notional
            )));
        }

        let quantity = self
            .filters
            .normalize_qty(notional.checked_div(reference_price).ok_or_else(overflow)?)?;
        if quantity <= Decimal::ZERO || quantity < self.filters.min_qty {
            return Err(TradeError::sizing(format!(
                "quantity {} below minimum lot {}",
                quantity, self.filters.min_qty
            )));
        }

        info!(
            %balance,
            %margin_allocation,
            leverage,
            %notional,
            %reference_price,
            %quantity,
            "Computed order quantity"
        );

        Ok(quantity)
    }

    /// Fetch the account and size an order at `reference_price`.
    pub async fn compute_order_quantity<E>(
        &self,
        client: &E,
        leverage: u8,
        reference_price: Decimal,
    ) -> TradeResult<Decimal>
    where
        E: FuturesExchange + ?Sized,
    {
        if reference_price <= Decimal::ZERO {
            return Err(TradeError::sizing(format!(
                "invalid reference price {}",
                reference_price
            )));
        }

        let account = client.account_information().await?;
        let balance = self.usable_balance(&account)?;
        self.quantity_for_balance(balance, leverage, reference_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{AccountAsset, MockExchange};
    use rust_decimal_macros::dec;

    fn sizer() -> PositionSizer {
        PositionSizer::new(
            SymbolFilters {
                tick_size: dec!(0.1),
                step_size: dec!(0.001),
                min_qty: dec!(0.001),
                min_notional: dec!(5),
            },
            "USDC".to_string(),
            dec!(0.10),
        )
    }

    #[test]
    fn test_select_balance() {
        assert_eq!(PositionSizer::select_balance(dec!(1000), Some(dec!(800))), dec!(800));
        assert_eq!(PositionSizer::select_balance(dec!(1000), Some(dec!(1200))), dec!(1000));
        assert_eq!(PositionSizer::select_balance(dec!(1000), None), dec!(1000));
        assert_eq!(PositionSizer::select_balance(dec!(0), Some(dec!(300))), dec!(300));
        assert_eq!(PositionSizer::select_balance(dec!(500), Some(dec!(0))), dec!(500));
    }

    #[test]
    fn test_scenario_quantity() {
        // 1000 × 10% = 100 margin, × 20 = 2000 notional, / 68000 = 0.02941..
        let quantity = sizer()
            .quantity_for_balance(dec!(1000), 20, dec!(68000))
            .unwrap();
        assert_eq!(quantity, dec!(0.029));
        assert!((quantity / dec!(0.001)).fract().is_zero());
        assert!(dec!(2000) - quantity * dec!(68000) < dec!(0.001) * dec!(68000));
    }

    #[test]
    fn test_notional_below_minimum() {
        let err = sizer().quantity_for_balance(dec!(2), 20, dec!(68000)).unwrap_err();
        assert!(matches!(err, TradeError::Sizing(_)));
    }

    #[test]
    fn test_quantity_below_min_lot() {
        // 100 × 10% × 1 = 10 notional, / 68000 floors to zero
        let err = sizer().quantity_for_balance(dec!(100), 1, dec!(68000)).unwrap_err();
        assert!(matches!(err, TradeError::Sizing(_)));
    }

    #[test]
    fn test_invalid_reference_price() {
        let err = sizer().quantity_for_balance(dec!(1000), 20, Decimal::ZERO).unwrap_err();
        assert!(matches!(err, TradeError::Sizing(_)));
    }

    #[test]
    fn test_margin_asset_fallback() {
        let account = AccountInformation {
            total_wallet_balance: Decimal::ZERO,
            available_balance: Some(Decimal::ZERO),
            assets: vec![
                AccountAsset {
                    asset: "USDT".to_string(),
                    wallet_balance: dec!(50),
                    available_balance: Some(dec!(50)),
                },
                AccountAsset {
                    asset: "USDC".to_string(),
                    wallet_balance: dec!(900),
                    available_balance: Some(dec!(700)),
                },
            ],
        };
        assert_eq!(sizer().usable_balance(&account).unwrap(), dec!(700));
    }

    #[test]
    fn test_no_balance_is_sizing_error() {
        let account = AccountInformation::default();
        assert!(matches!(
            sizer().usable_balance(&account),
            Err(TradeError::Sizing(_))
        ));
    }

    #[tokio::test]
    async fn test_compute_order_quantity_against_exchange() {
        let client = MockExchange::new("BTCUSDC", dec!(1000), dec!(68000));
        client.set_available_balance(Some(dec!(600))).await;

        // 600 × 10% × 20 = 1200 / 60000 = 0.02
        let quantity = sizer()
            .compute_order_quantity(&client, 20, dec!(60000))
            .await
            .unwrap();
        assert_eq!(quantity, dec!(0.02));
    }
}
