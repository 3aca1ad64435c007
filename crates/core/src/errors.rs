use crate::trade::{TradeId, TradeStatus};
use thiserror::Error;

/// Errors from the trade registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A record with this id is already registered.
    #[error("trade {0} already registered")]
    DuplicateTrade(TradeId),

    /// No record with this id exists.
    #[error("trade {0} not found")]
    NotFound(TradeId),

    /// A mutation attempted a status transition the lifecycle forbids.
    /// Indicates a logic defect or a lost race; the mutation is discarded.
    #[error("trade {id}: illegal status transition {from:?} -> {to:?}")]
    InvalidTransition {
        id: TradeId,
        from: TradeStatus,
        to: TradeStatus,
    },

    /// The record is already terminal. Terminal records are immutable and
    /// kept only for audit; any mutation attempt is discarded.
    #[error("trade {id} is terminal ({status:?}) and cannot be updated")]
    TerminalRecord { id: TradeId, status: TradeStatus },
}

/// Errors from the order gateway contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Network trouble or rate limiting; safe to retry with backoff.
    #[error("transient gateway failure: {0}")]
    Transient(String),

    /// The exchange refused the order (e.g. insufficient margin). Not
    /// retried; the trade is surfaced to an operator.
    #[error("order rejected: {0}")]
    Rejected(String),
}

/// Errors from the price source contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PriceError {
    /// Symbol unknown or the latest quote is stale.
    #[error("no usable price for {0}")]
    Unavailable(String),
}

/// Errors raised by trade-level validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TradeError {
    #[error("invalid trade intent: {0}")]
    InvalidIntent(String),
}
