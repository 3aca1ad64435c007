use crate::commands::MonitorCommand;
use tokio::sync::mpsc;
use trade_guard_core::trade::TradeId;

/// Cheap clonable handle to a running trade monitor.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    trade_id: TradeId,
    sender: mpsc::Sender<MonitorCommand>,
}

impl MonitorHandle {
    #[must_use]
    pub fn new(trade_id: TradeId, sender: mpsc::Sender<MonitorCommand>) -> Self {
        Self { trade_id, sender }
    }

    #[must_use]
    pub fn trade_id(&self) -> &str {
        &self.trade_id
    }

    /// Asks the monitor loop to stop. A monitor that already exited on its
    /// own (terminal trade) has dropped its receiver; that is not an error.
    pub async fn shutdown(&self) {
        if self.sender.send(MonitorCommand::Shutdown).await.is_err() {
            tracing::debug!(trade_id = %self.trade_id, "monitor already stopped");
        }
    }
}
