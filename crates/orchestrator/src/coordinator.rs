use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use trade_guard_core::config::RiskConfig;
use trade_guard_core::events::{StopMoveReason, TradeEvent, TradeEventKind};
use trade_guard_core::trade::{CloseReason, Side, TradeId, TradeIntent, TradeRecord, TradeStatus};
use trade_guard_core::traits::{EntrySpec, OrderGateway, PriceSource};

use crate::commands::SpawnRequest;
use crate::registry::TradeRegistry;
use crate::supervisor::MonitorSupervisor;

/// Entry point for trade lifecycles: opens trades from validated intents,
/// services spawn requests from monitors (hedges, re-entries), and exposes
/// the manual overrides.
///
/// Ids are allocated here as UUIDs, so two concurrent opens can never
/// collide in the registry.
pub struct LifecycleCoordinator {
    registry: Arc<TradeRegistry>,
    supervisor: Arc<MonitorSupervisor>,
    prices: Arc<dyn PriceSource>,
    gateway: Arc<dyn OrderGateway>,
    events: mpsc::Sender<TradeEvent>,
    config: RiskConfig,
}

impl LifecycleCoordinator {
    #[must_use]
    pub fn new(
        registry: Arc<TradeRegistry>,
        supervisor: Arc<MonitorSupervisor>,
        prices: Arc<dyn PriceSource>,
        gateway: Arc<dyn OrderGateway>,
        events: mpsc::Sender<TradeEvent>,
        config: RiskConfig,
    ) -> Self {
        Self {
            registry,
            supervisor,
            prices,
            gateway,
            events,
            config,
        }
    }

    /// Opens a trade from an intent: places the entry and protective stop,
    /// registers the record, and starts its monitor.
    ///
    /// # Errors
    /// Intent validation failures, gateway rejections, and registry errors.
    pub async fn open_trade(self: &Arc<Self>, intent: &TradeIntent) -> anyhow::Result<TradeId> {
        self.open_with_lineage(intent, None, 0).await
    }

    async fn open_with_lineage(
        self: &Arc<Self>,
        intent: &TradeIntent,
        reentry_of: Option<TradeId>,
        reentry_count: u32,
    ) -> anyhow::Result<TradeId> {
        intent.validate()?;

        let id = uuid::Uuid::new_v4().to_string();
        let mut record =
            TradeRecord::from_intent(id.clone(), intent, self.config.clone(), Utc::now());
        record.reentry_of = reentry_of;
        record.reentry_count = reentry_count;

        let spec = EntrySpec {
            symbol: record.symbol.clone(),
            side: record.side,
            price: record.entry_price,
            quantity: record.quantity,
            leverage: record.leverage,
        };
        record.order_ids = self
            .gateway
            .place_entry(&spec)
            .await
            .context("entry order failed")?;
        let stop_order_id = self
            .gateway
            .place_stop(&record.symbol, record.side, record.stop_price, record.quantity)
            .await
            .context("protective stop failed")?;
        record.stop_order_id = Some(stop_order_id);
        record.status = TradeStatus::Open;

        self.registry.register(record.clone()).await?;
        self.supervisor.start_monitor(id.clone()).await;
        self.emit(
            &id,
            TradeEventKind::Opened {
                symbol: record.symbol,
                side: record.side,
                entry_price: record.entry_price,
                quantity: record.quantity,
            },
        )
        .await;
        tracing::info!(trade_id = %id, "trade opened");
        Ok(id)
    }

    /// Services spawn requests from monitors until the channel closes.
    pub async fn run(self: Arc<Self>, mut spawn_rx: mpsc::Receiver<SpawnRequest>) {
        while let Some(request) = spawn_rx.recv().await {
            match request {
                SpawnRequest::Hedge {
                    parent_id,
                    symbol,
                    side,
                    quantity,
                    stop,
                    reply,
                } => {
                    match self.open_hedge(&parent_id, &symbol, side, quantity, stop).await {
                        Ok(hedge_id) => {
                            // A dropped receiver means the parent's tick gave
                            // up waiting. Link the hedge directly so the next
                            // tick sees it set and cannot spawn a duplicate.
                            if reply.send(hedge_id.clone()).is_err() {
                                tracing::warn!(
                                    parent_id = %parent_id,
                                    hedge_id = %hedge_id,
                                    "hedge reply dropped, linking directly"
                                );
                                self.link_hedge(&parent_id, &hedge_id).await;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(parent_id = %parent_id, %err, "hedge open failed");
                        }
                    }
                }
                SpawnRequest::Reentry {
                    closed,
                    min_delay_secs,
                    max_delay_secs,
                    max_deviation,
                } => {
                    let delay_secs =
                        rand::thread_rng().gen_range(min_delay_secs..=max_delay_secs);
                    self.emit(
                        &closed.id,
                        TradeEventKind::ReentryScheduled {
                            delay_secs,
                            attempt: closed.reentry_count + 1,
                        },
                    )
                    .await;
                    let coordinator = Arc::clone(&self);
                    tokio::spawn(async move {
                        tokio::time::sleep(std::time::Duration::from_secs(delay_secs)).await;
                        coordinator.attempt_reentry(closed, max_deviation).await;
                    });
                }
            }
        }
        tracing::debug!("spawn channel closed, coordinator loop ending");
    }

    async fn open_hedge(
        self: &Arc<Self>,
        parent_id: &str,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        stop: Decimal,
    ) -> anyhow::Result<TradeId> {
        let parent = self.registry.get(parent_id).await?;
        let price = self.prices.current_price(symbol).await?;
        // Margin sized so the record's own quantity math reproduces the
        // requested hedge size at the current price.
        let margin = quantity * price / Decimal::from(parent.leverage);
        let intent = TradeIntent {
            symbol: symbol.to_string(),
            side,
            entry_price: price,
            stop_price: Some(stop),
            target_prices: vec![],
            initial_margin: margin,
            leverage: parent.leverage,
        };
        let hedge_id = self.open_with_lineage(&intent, None, 0).await?;
        tracing::info!(parent_id, hedge_id = %hedge_id, "hedge opened");
        Ok(hedge_id)
    }

    async fn link_hedge(&self, parent_id: &str, hedge_id: &str) {
        let result = self
            .registry
            .update(parent_id, |r| {
                if r.hedge_trade_id.is_none() {
                    r.hedge_trade_id = Some(hedge_id.to_string());
                }
            })
            .await;
        if let Err(err) = result {
            tracing::warn!(parent_id, %err, "hedge back-link failed");
        }
    }

    /// Re-opens a stop-closed trade if the price has not drifted beyond the
    /// configured deviation since the original entry.
    async fn attempt_reentry(self: &Arc<Self>, closed: TradeRecord, max_deviation: Decimal) {
        let price = match self.prices.current_price(&closed.symbol).await {
            Ok(price) => price,
            Err(err) => {
                tracing::warn!(trade_id = %closed.id, %err, "re-entry price unavailable");
                return;
            }
        };
        let deviation = ((price - closed.entry_price) / closed.entry_price).abs();
        if deviation > max_deviation {
            tracing::info!(
                trade_id = %closed.id,
                %deviation,
                "price drifted too far, re-entry skipped"
            );
            return;
        }

        let intent = TradeIntent {
            symbol: closed.symbol.clone(),
            side: closed.side,
            entry_price: price,
            // The old stop level is stale at the new entry; the fallback
            // distance re-derives one.
            stop_price: None,
            target_prices: closed.target_prices.clone(),
            initial_margin: closed.initial_margin,
            leverage: closed.leverage,
        };
        match self
            .open_with_lineage(&intent, Some(closed.id.clone()), closed.reentry_count + 1)
            .await
        {
            Ok(new_id) => {
                tracing::info!(trade_id = %closed.id, new_id = %new_id, "re-entry opened");
            }
            Err(err) => {
                tracing::warn!(trade_id = %closed.id, %err, "re-entry open failed");
            }
        }
    }

    /// Manually closes a trade at market. Stops the monitor first so the
    /// close cannot race a tick.
    ///
    /// # Errors
    /// Unknown id, already-terminal trade, or gateway failure.
    pub async fn close_manual(&self, trade_id: &str) -> anyhow::Result<TradeRecord> {
        let record = self.registry.get(trade_id).await?;
        if record.status.is_terminal() {
            anyhow::bail!("trade {trade_id} is already closed");
        }
        self.supervisor.stop_monitor(trade_id).await;

        let fill = self
            .gateway
            .close_market(&record.symbol, record.side, record.quantity)
            .await
            .context("manual close failed")?;
        if let Some(order_id) = &record.stop_order_id {
            if let Err(err) = self.gateway.cancel(order_id).await {
                tracing::warn!(trade_id, %err, "stop cancel failed");
            }
        }

        let realized = record.realized_for(record.quantity, fill);
        let committed = self
            .registry
            .update(trade_id, |r| {
                r.realized_pnl += realized;
                r.quantity = Decimal::ZERO;
                r.unrealized_pnl = Decimal::ZERO;
                r.stop_order_id = None;
                r.status = TradeStatus::ClosedManual;
            })
            .await?;
        self.emit(
            trade_id,
            TradeEventKind::Closed {
                reason: CloseReason::Manual,
                fill_price: fill,
                realized_pnl: committed.realized_pnl,
            },
        )
        .await;
        tracing::info!(trade_id, %fill, "trade closed manually");
        Ok(committed)
    }

    /// Manually relocates the protective stop. Loosening moves are refused.
    ///
    /// # Errors
    /// Unknown id, terminal trade, loosening candidate, or gateway failure.
    pub async fn move_stop_manual(
        &self,
        trade_id: &str,
        price: Decimal,
    ) -> anyhow::Result<TradeRecord> {
        let record = self.registry.get(trade_id).await?;
        if record.status.is_terminal() {
            anyhow::bail!("trade {trade_id} is already closed");
        }
        if !record.side.tightens_stop(record.stop_price, price) {
            anyhow::bail!(
                "stop {price} does not tighten the current stop {}",
                record.stop_price
            );
        }

        if let Some(order_id) = &record.stop_order_id {
            if let Err(err) = self.gateway.cancel(order_id).await {
                tracing::warn!(trade_id, %err, "stop cancel failed");
            }
        }
        let order_id = self
            .gateway
            .place_stop(&record.symbol, record.side, price, record.quantity)
            .await
            .context("stop placement failed")?;

        let committed = self
            .registry
            .update(trade_id, |r| {
                r.stop_price = price;
                r.stop_order_id = Some(order_id.clone());
            })
            .await?;
        self.emit(
            trade_id,
            TradeEventKind::StopMoved {
                from: record.stop_price,
                to: price,
                reason: StopMoveReason::Manual,
            },
        )
        .await;
        Ok(committed)
    }

    async fn emit(&self, trade_id: &str, kind: TradeEventKind) {
        let event = TradeEvent::now(trade_id.to_string(), kind);
        if self.events.send(event).await.is_err() {
            tracing::debug!(trade_id, "event receiver dropped");
        }
    }
}
