use crate::errors::{GatewayError, PriceError};
use crate::trade::Side;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Entry order specification passed to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySpec {
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub leverage: u32,
}

/// Live mark-price supplier. Implementations wrap an exchange feed; tests
/// use scripted sources.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Current mark price for `symbol`.
    ///
    /// # Errors
    /// `PriceError::Unavailable` when the symbol is unknown or the quote is
    /// stale.
    async fn current_price(&self, symbol: &str) -> Result<Decimal, PriceError>;
}

/// Order placement contract consumed by the lifecycle engine. The exchange
/// wire protocol lives behind this seam.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Places the entry order(s) for a new trade.
    ///
    /// # Errors
    /// `GatewayError::Transient` on network trouble, `Rejected` when the
    /// exchange refuses the order.
    async fn place_entry(&self, spec: &EntrySpec) -> Result<Vec<String>, GatewayError>;

    /// Places a protective stop order.
    ///
    /// # Errors
    /// See [`OrderGateway::place_entry`].
    async fn place_stop(
        &self,
        symbol: &str,
        side: Side,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<String, GatewayError>;

    /// Cancels a working order. Cancelling an already-gone order is not an
    /// error.
    ///
    /// # Errors
    /// `GatewayError::Transient` on network trouble.
    async fn cancel(&self, order_id: &str) -> Result<(), GatewayError>;

    /// Closes `quantity` of the position at market; returns the fill price.
    ///
    /// # Errors
    /// See [`OrderGateway::place_entry`].
    async fn close_market(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<Decimal, GatewayError>;

    /// Net signed position for `symbol` (positive long, negative short).
    ///
    /// # Errors
    /// `GatewayError::Transient` on network trouble.
    async fn get_position(&self, symbol: &str) -> Result<Decimal, GatewayError>;
}
