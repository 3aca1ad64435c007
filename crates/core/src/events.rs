use crate::trade::{CloseReason, Side, TradeId, TradeStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Why a stop was relocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopMoveReason {
    Breakeven,
    Trailing,
    Pyramid,
    Manual,
}

/// Discrete state-change event pushed to the reporting collaborator.
///
/// Emitted on every transition and gateway action; never polled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub trade_id: TradeId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: TradeEventKind,
}

impl TradeEvent {
    #[must_use]
    pub fn now(trade_id: TradeId, kind: TradeEventKind) -> Self {
        Self {
            trade_id,
            timestamp: Utc::now(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TradeEventKind {
    /// Trade record created and entry orders placed.
    Opened {
        symbol: String,
        side: Side,
        entry_price: Decimal,
        quantity: Decimal,
    },

    StatusChanged {
        from: TradeStatus,
        to: TradeStatus,
    },

    StopMoved {
        from: Decimal,
        to: Decimal,
        reason: StopMoveReason,
    },

    /// A profit target was consumed with a partial close.
    TargetHit {
        index: usize,
        price: Decimal,
        quantity: Decimal,
    },

    /// Pyramiding added to the position.
    PositionIncreased {
        added_quantity: Decimal,
        margin: Decimal,
        leverage: u32,
        pyramid_level: u32,
    },

    /// An opposite-direction hedge trade was spawned.
    HedgeOpened {
        hedge_id: TradeId,
    },

    /// A re-entry attempt was scheduled after a stop-out.
    ReentryScheduled {
        delay_secs: u64,
        attempt: u32,
    },

    /// Position fully closed; the trade is terminal.
    Closed {
        reason: CloseReason,
        fill_price: Decimal,
        realized_pnl: Decimal,
    },

    /// A monitor tick failed and was deferred to the next interval.
    TickError {
        message: String,
    },
}
