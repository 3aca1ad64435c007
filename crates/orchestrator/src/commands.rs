use rust_decimal::Decimal;
use tokio::sync::oneshot;
use trade_guard_core::trade::{Side, TradeId, TradeRecord};

/// Control messages delivered to a running trade monitor.
#[derive(Debug)]
pub enum MonitorCommand {
    /// Stop the monitor loop without touching the trade.
    Shutdown,
}

/// Requests a monitor sends up to the lifecycle coordinator when a decision
/// requires spawning a new trade.
#[derive(Debug)]
pub enum SpawnRequest {
    /// Open an opposite-direction hedge for `parent_id`. The coordinator
    /// replies with the hedge's id so the parent can record the back-link
    /// within the same tick commit.
    Hedge {
        parent_id: TradeId,
        symbol: String,
        side: Side,
        quantity: Decimal,
        stop: Decimal,
        reply: oneshot::Sender<TradeId>,
    },
    /// Re-open a position after a stop-out, after a randomized delay and a
    /// price-drift check.
    Reentry {
        closed: TradeRecord,
        min_delay_secs: u64,
        max_delay_secs: u64,
        max_deviation: Decimal,
    },
}
