//! Error taxonomy of the trade lifecycle engine.

use thiserror::Error;

/// Closed set of failures `handle_signal` and `sync_state` can report.
///
/// Callers match on the kind instead of the message: an `Exchange` error is
/// transient and the next reconciliation cycle repairs any drift, the other
/// kinds will fail again until the signal or the account changes.
#[derive(Debug, Error)]
pub enum TradeError {
    /// Malformed or missing signal fields, unsupported action or entry kind
    #[error("invalid signal: {0}")]
    Validation(String),

    /// Balance non-positive, notional below exchange minimum, quantity below minimum lot
    #[error("cannot size order: {0}")]
    Sizing(String),

    /// Enter while a trade or pending entry already exists
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// Transport or API failure from the exchange client
    #[error(transparent)]
    Exchange(#[from] anyhow::Error),
}

impl TradeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        TradeError::Validation(msg.into())
    }

    pub fn sizing(msg: impl Into<String>) -> Self {
        TradeError::Sizing(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        TradeError::StateConflict(msg.into())
    }

    /// Whether retrying on a later cycle can succeed without outside changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TradeError::Exchange(_))
    }
}

pub type TradeResult<T> = std::result::Result<T, TradeError>;
