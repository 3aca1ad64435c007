use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use trade_guard_core::events::TradeEvent;
use trade_guard_core::trade::TradeId;
use trade_guard_core::traits::{OrderGateway, PriceSource};

use crate::commands::SpawnRequest;
use crate::handle::MonitorHandle;
use crate::monitor::TradeMonitor;
use crate::registry::TradeRegistry;

const COMMAND_BUFFER: usize = 8;

/// Owns the monitor tasks: one per active trade.
///
/// Monitors deregister themselves when their loop ends, so the map only ever
/// holds live tasks. Shared collaborators are captured once at construction
/// and handed to every monitor.
pub struct MonitorSupervisor {
    registry: Arc<TradeRegistry>,
    prices: Arc<dyn PriceSource>,
    gateway: Arc<dyn OrderGateway>,
    events: mpsc::Sender<TradeEvent>,
    spawn: mpsc::Sender<SpawnRequest>,
    monitors: RwLock<HashMap<TradeId, MonitorHandle>>,
}

impl MonitorSupervisor {
    #[must_use]
    pub fn new(
        registry: Arc<TradeRegistry>,
        prices: Arc<dyn PriceSource>,
        gateway: Arc<dyn OrderGateway>,
        events: mpsc::Sender<TradeEvent>,
        spawn: mpsc::Sender<SpawnRequest>,
    ) -> Self {
        Self {
            registry,
            prices,
            gateway,
            events,
            spawn,
            monitors: RwLock::new(HashMap::new()),
        }
    }

    /// Spawns a monitor task for `trade_id`. A second start for the same id
    /// is a no-op; the existing monitor keeps running.
    pub async fn start_monitor(self: &Arc<Self>, trade_id: TradeId) {
        let mut monitors = self.monitors.write().await;
        if monitors.contains_key(&trade_id) {
            tracing::warn!(trade_id = %trade_id, "monitor already running");
            return;
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let monitor = TradeMonitor::new(
            trade_id.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.prices),
            Arc::clone(&self.gateway),
            self.events.clone(),
            self.spawn.clone(),
            command_rx,
        );
        monitors.insert(trade_id.clone(), MonitorHandle::new(trade_id.clone(), command_tx));

        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            monitor.run().await;
            supervisor.monitors.write().await.remove(&trade_id);
        });
    }

    /// Sends a shutdown to the monitor for `trade_id`, if one is running.
    /// The trade record is untouched.
    pub async fn stop_monitor(&self, trade_id: &str) {
        let handle = self.monitors.read().await.get(trade_id).cloned();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }

    /// Shuts down every running monitor.
    pub async fn shutdown_all(&self) {
        let handles: Vec<_> = self.monitors.read().await.values().cloned().collect();
        for handle in handles {
            handle.shutdown().await;
        }
    }

    pub async fn is_monitored(&self, trade_id: &str) -> bool {
        self.monitors.read().await.contains_key(trade_id)
    }

    pub async fn active_count(&self) -> usize {
        self.monitors.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use trade_guard_core::config::RiskConfig;
    use trade_guard_core::trade::{Side, TradeIntent, TradeRecord, TradeStatus};
    use trade_guard_exchange_paper::{PaperGateway, StaticPriceSource};

    async fn wait_until<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    fn fixture() -> (Arc<TradeRegistry>, Arc<StaticPriceSource>, Arc<MonitorSupervisor>) {
        let registry = Arc::new(TradeRegistry::new());
        let prices = Arc::new(StaticPriceSource::new());
        let gateway = Arc::new(PaperGateway::new(Arc::clone(&prices) as _));
        let (event_tx, mut event_rx) = mpsc::channel(64);
        let (spawn_tx, mut spawn_rx) = mpsc::channel(8);
        // Drain sinks; these tests only exercise task lifecycle.
        tokio::spawn(async move { while event_rx.recv().await.is_some() {} });
        tokio::spawn(async move { while spawn_rx.recv().await.is_some() {} });
        let supervisor = Arc::new(MonitorSupervisor::new(
            Arc::clone(&registry),
            Arc::clone(&prices) as _,
            gateway as _,
            event_tx,
            spawn_tx,
        ));
        (registry, prices, supervisor)
    }

    fn open_record(id: &str) -> TradeRecord {
        let intent = TradeIntent {
            symbol: "BTCUSDT".to_string(),
            side: Side::Long,
            entry_price: dec!(67000),
            stop_price: Some(dec!(66000)),
            target_prices: vec![],
            initial_margin: dec!(20),
            leverage: 10,
        };
        let config = RiskConfig {
            tick_interval_ms: 10,
            ..RiskConfig::default()
        };
        let mut record = TradeRecord::from_intent(id.to_string(), &intent, config, Utc::now());
        record.status = TradeStatus::Open;
        record
    }

    #[tokio::test]
    async fn stop_monitor_ends_the_task_and_deregisters_it() {
        let (registry, prices, supervisor) = fixture();
        prices.set("BTCUSDT", dec!(67000));
        registry.register(open_record("t1")).await.unwrap();

        supervisor.start_monitor("t1".to_string()).await;
        assert!(supervisor.is_monitored("t1").await);

        supervisor.stop_monitor("t1").await;
        wait_until(|| async { !supervisor.is_monitored("t1").await }).await;
        // Shutdown does not close the trade.
        assert_eq!(registry.get("t1").await.unwrap().status, TradeStatus::Open);
    }

    #[tokio::test]
    async fn terminal_trade_removes_its_own_monitor() {
        let (registry, prices, supervisor) = fixture();
        // Price below the stop: first tick closes the trade.
        prices.set("BTCUSDT", dec!(65000));
        registry.register(open_record("t1")).await.unwrap();

        supervisor.start_monitor("t1".to_string()).await;
        wait_until(|| async { !supervisor.is_monitored("t1").await }).await;
        assert_eq!(
            registry.get("t1").await.unwrap().status,
            TradeStatus::ClosedStop
        );
    }

    #[tokio::test]
    async fn duplicate_start_is_a_no_op() {
        let (registry, prices, supervisor) = fixture();
        prices.set("BTCUSDT", dec!(67000));
        registry.register(open_record("t1")).await.unwrap();

        supervisor.start_monitor("t1".to_string()).await;
        supervisor.start_monitor("t1".to_string()).await;
        assert_eq!(supervisor.active_count().await, 1);
    }
}
