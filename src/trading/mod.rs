//! Trade lifecycle engine.
//!
//! ## Components
//! - `sizer`: Position sizing from balance, margin usage and leverage
//! - `orders`: Order placement, take-profit leg allocation, cancellation
//! - `manager`: Signal handling (enter, update, exit, cancel pending entry)
//! - `reconcile`: Per-cycle sync against the exchange position and open orders
//! - `status`: Status payload for the signal source

mod error;
mod filters;
mod manager;
mod model;
mod orders;
mod reconcile;
mod signal;
mod sizer;
mod status;

#[cfg(test)]
mod testing;

pub use error::{TradeError, TradeResult};
pub use filters::SymbolFilters;
pub use manager::{TradeManager, TradeManagerConfig};
pub use model::{ActiveTrade, EntryKind, ManagedOrder, OrderHandle, TpTarget, TradeSide};
pub use orders::{take_profit_quantities, OrderRouter, FLAT_EPSILON};
pub use signal::{EnterSignal, EntryRequest, EntryUpdate, Signal, UpdateSignal};
pub use sizer::PositionSizer;
pub use status::{ActiveLimitOrderStatus, ActiveTradeStatus, StatusPayload};
