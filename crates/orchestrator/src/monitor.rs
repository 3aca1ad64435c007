use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};
use trade_guard_core::errors::{GatewayError, RegistryError};
use trade_guard_core::events::{StopMoveReason, TradeEvent, TradeEventKind};
use trade_guard_core::trade::{CloseReason, TradeId, TradeRecord, TradeStatus};
use trade_guard_core::traits::{EntrySpec, OrderGateway, PriceSource};
use trade_guard_risk::{evaluate, Action, Decision};

use crate::commands::{MonitorCommand, SpawnRequest};
use crate::registry::TradeRegistry;

const PRICE_CALL_TIMEOUT: Duration = Duration::from_secs(3);
const GATEWAY_CALL_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_GATEWAY_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(250);
const SPAWN_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Staged registry mutation, produced while executing gateway calls and
/// replayed in one atomic commit. Gateway side effects always land before
/// the record changes; a crash between the two leaves the record behind the
/// exchange, never ahead of it.
#[derive(Debug, Clone)]
enum Effect {
    /// Re-derive unrealized PnL from the record at this mark price. Applied
    /// last, so a close earlier in the batch leaves it at zero.
    MarkToPrice(Decimal),
    ArmBreakeven,
    ActivateTrailing,
    MoveStop {
        to: Decimal,
        order_id: Option<String>,
    },
    /// Adopt a freshly placed stop order without moving the stop price.
    /// Staged after fills that change the position size.
    ReplaceStop { order_id: Option<String> },
    PartialClose {
        quantity: Decimal,
        fill: Decimal,
    },
    FullClose {
        reason: CloseReason,
        fill: Decimal,
    },
    Increase {
        added_quantity: Decimal,
        price: Decimal,
        rearm_breakeven: bool,
        order_ids: Vec<String>,
    },
    SetHedge(TradeId),
    SetStatus(TradeStatus),
}

fn apply_effect(record: &mut TradeRecord, effect: &Effect) {
    match effect {
        Effect::MarkToPrice(price) => record.unrealized_pnl = record.unrealized_at(*price),
        Effect::ArmBreakeven => record.breakeven_armed = true,
        Effect::ActivateTrailing => record.trailing_active = true,
        Effect::MoveStop { to, order_id } => {
            // Re-checked against the committed record, not the tick's
            // snapshot: a concurrent manual tightening must not be undone
            // by a staler, looser candidate.
            if record.side.tightens_stop(record.stop_price, *to) {
                record.stop_price = *to;
                record.stop_order_id.clone_from(order_id);
            }
        }
        Effect::ReplaceStop { order_id } => record.stop_order_id.clone_from(order_id),
        Effect::PartialClose { quantity, fill } => {
            record.realized_pnl += record.realized_for(*quantity, *fill);
            record.quantity = (record.quantity - quantity).max(Decimal::ZERO);
            record.next_target += 1;
        }
        Effect::FullClose { reason, fill } => {
            record.realized_pnl += record.realized_for(record.quantity, *fill);
            record.quantity = Decimal::ZERO;
            record.unrealized_pnl = Decimal::ZERO;
            record.stop_order_id = None;
            record.status = reason.terminal_status();
        }
        Effect::Increase {
            added_quantity,
            price,
            rearm_breakeven,
            order_ids,
        } => {
            let total = record.quantity + added_quantity;
            // PnL basis blends the fills; entry_price stays at the original
            // fill so every profit threshold keeps its original anchor.
            record.average_entry =
                (record.average_entry * record.quantity + price * added_quantity) / total;
            record.quantity = total;
            record.pyramid_level += 1;
            if *rearm_breakeven {
                record.breakeven_armed = false;
            }
            record.order_ids.extend(order_ids.iter().cloned());
        }
        Effect::SetHedge(id) => record.hedge_trade_id = Some(id.clone()),
        Effect::SetStatus(status) => record.status = *status,
    }
}

/// Outcome of one apply pass: the staged effects plus the events to emit
/// once they commit.
#[derive(Default)]
struct Staged {
    effects: Vec<Effect>,
    events: Vec<TradeEventKind>,
    /// Set when a `Rejected` gateway response forces the trade into
    /// `Aborted` instead of processing further actions.
    aborted: Option<String>,
}

/// The record as the current tick's actions see it, advanced after every
/// completed gateway call so later actions in the batch observe earlier
/// fills and moves.
struct WorkingView {
    stop: Decimal,
    stop_order_id: Option<String>,
    quantity: Decimal,
}

/// Per-trade supervision loop.
///
/// One monitor task owns one trade id for the trade's whole life: it ticks
/// on the configured interval, evaluates the risk rules against the current
/// price, executes the resulting gateway calls, and commits the results to
/// the registry in a single atomic update. The task ends when the trade
/// reaches a terminal status or a shutdown command arrives.
pub struct TradeMonitor {
    trade_id: TradeId,
    registry: Arc<TradeRegistry>,
    prices: Arc<dyn PriceSource>,
    gateway: Arc<dyn OrderGateway>,
    events: mpsc::Sender<TradeEvent>,
    spawn: mpsc::Sender<SpawnRequest>,
    commands: mpsc::Receiver<MonitorCommand>,
}

impl TradeMonitor {
    pub fn new(
        trade_id: TradeId,
        registry: Arc<TradeRegistry>,
        prices: Arc<dyn PriceSource>,
        gateway: Arc<dyn OrderGateway>,
        events: mpsc::Sender<TradeEvent>,
        spawn: mpsc::Sender<SpawnRequest>,
        commands: mpsc::Receiver<MonitorCommand>,
    ) -> Self {
        Self {
            trade_id,
            registry,
            prices,
            gateway,
            events,
            spawn,
            commands,
        }
    }

    /// Runs the tick loop until the trade goes terminal or a shutdown
    /// command arrives.
    pub async fn run(mut self) {
        let tick_interval = match self.registry.get(&self.trade_id).await {
            Ok(record) => record.config.tick_interval(),
            Err(err) => {
                tracing::error!(trade_id = %self.trade_id, %err, "monitor has no record");
                return;
            }
        };
        let mut interval = tokio::time::interval(tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(trade_id = %self.trade_id, ?tick_interval, "monitor started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(true) => break,
                        Ok(false) => {}
                        Err(err) => {
                            tracing::warn!(trade_id = %self.trade_id, %err, "tick failed");
                            self.emit(TradeEventKind::TickError {
                                message: err.to_string(),
                            })
                            .await;
                        }
                    }
                }
                command = self.commands.recv() => {
                    match command {
                        Some(MonitorCommand::Shutdown) | None => break,
                    }
                }
            }
        }
        tracing::info!(trade_id = %self.trade_id, "monitor stopped");
    }

    /// One evaluation tick. Returns `true` when the trade is terminal and
    /// the loop should end.
    async fn tick(&self) -> anyhow::Result<bool> {
        let record = self.registry.get(&self.trade_id).await?;
        if record.status.is_terminal() {
            return Ok(true);
        }

        let price = match tokio::time::timeout(
            PRICE_CALL_TIMEOUT,
            self.prices.current_price(&record.symbol),
        )
        .await
        {
            Ok(Ok(price)) => price,
            Ok(Err(err)) => {
                tracing::warn!(trade_id = %self.trade_id, %err, "price unavailable, skipping tick");
                return Ok(false);
            }
            Err(_) => {
                tracing::warn!(trade_id = %self.trade_id, "price fetch timed out, skipping tick");
                return Ok(false);
            }
        };

        let decision = evaluate(&record, price, Utc::now());
        let mut staged = self.execute(&record, price, &decision).await;
        staged.effects.push(Effect::MarkToPrice(price));

        let committed = match self
            .registry
            .update(&self.trade_id, |r| {
                for effect in &staged.effects {
                    apply_effect(r, effect);
                }
            })
            .await
        {
            Ok(committed) => committed,
            // The trade went terminal under us (manual close mid-tick).
            // The staged effects are discarded; terminal records never
            // change.
            Err(RegistryError::TerminalRecord { .. }) => return Ok(true),
            Err(err) => return Err(err.into()),
        };

        if committed.status != record.status {
            self.emit(TradeEventKind::StatusChanged {
                from: record.status,
                to: committed.status,
            })
            .await;
        }
        for kind in staged.events {
            self.emit(kind).await;
        }
        if let Some(message) = staged.aborted {
            self.emit(TradeEventKind::TickError { message }).await;
        }

        if committed.status == TradeStatus::ClosedStop {
            self.schedule_reentry(&committed).await;
        }
        Ok(committed.status.is_terminal())
    }

    /// Executes the decision's gateway calls in order, staging one effect
    /// per completed call. Processing stops at the first `Rejected`
    /// response, which aborts the trade; exhausted transient retries stop
    /// processing too but leave the status alone so the next tick retries.
    async fn execute(&self, record: &TradeRecord, price: Decimal, decision: &Decision) -> Staged {
        let mut staged = Staged::default();

        // A latch whose stop move is part of this batch is staged only once
        // that move lands; committing it alone would silence the rule while
        // the stop still sits at its old level. A latch with no matching
        // move means the stop already sat tighter, so it commits up front.
        let moves_breakeven = decision.actions.iter().any(|action| {
            matches!(
                action,
                Action::MoveStop {
                    reason: StopMoveReason::Breakeven,
                    ..
                }
            )
        });
        let moves_trailing = decision.actions.iter().any(|action| {
            matches!(
                action,
                Action::MoveStop {
                    reason: StopMoveReason::Trailing,
                    ..
                }
            )
        });
        if decision.arm_breakeven && !moves_breakeven {
            staged.effects.push(Effect::ArmBreakeven);
        }
        if decision.activate_trailing && !moves_trailing {
            staged.effects.push(Effect::ActivateTrailing);
        }

        // The record as the actions see it, advanced as calls execute.
        let mut view = WorkingView {
            stop: record.stop_price,
            stop_order_id: record.stop_order_id.clone(),
            quantity: record.quantity,
        };

        for action in &decision.actions {
            let result = self
                .execute_action(record, price, action, &mut staged, &mut view)
                .await;
            match result {
                Ok(()) => {
                    if let Action::MoveStop { reason, .. } = action {
                        match reason {
                            StopMoveReason::Breakeven if decision.arm_breakeven => {
                                staged.effects.push(Effect::ArmBreakeven);
                            }
                            StopMoveReason::Trailing if decision.activate_trailing => {
                                staged.effects.push(Effect::ActivateTrailing);
                            }
                            _ => {}
                        }
                    }
                }
                Err(GatewayError::Rejected(message)) => {
                    tracing::error!(
                        trade_id = %self.trade_id,
                        %message,
                        "gateway rejected action, aborting trade"
                    );
                    staged.effects.push(Effect::SetStatus(TradeStatus::Aborted));
                    staged.aborted = Some(format!("gateway rejected: {message}"));
                    return staged;
                }
                Err(GatewayError::Transient(message)) => {
                    tracing::warn!(
                        trade_id = %self.trade_id,
                        %message,
                        "gateway retries exhausted, deferring to next tick"
                    );
                    return staged;
                }
            }
        }

        if let Some(status) = decision.status {
            staged.effects.push(Effect::SetStatus(status));
        }
        staged
    }

    async fn execute_action(
        &self,
        record: &TradeRecord,
        price: Decimal,
        action: &Action,
        staged: &mut Staged,
        view: &mut WorkingView,
    ) -> Result<(), GatewayError> {
        match action {
            Action::CloseMarket {
                quantity: close_quantity,
                reason,
            } => {
                let close_quantity = (*close_quantity).min(view.quantity);
                let symbol = record.symbol.clone();
                let side = record.side;
                let gateway = Arc::clone(&self.gateway);
                let fill = self
                    .with_retry("close_market", || {
                        let gateway = Arc::clone(&gateway);
                        let symbol = symbol.clone();
                        async move { gateway.close_market(&symbol, side, close_quantity).await }
                    })
                    .await?;

                if close_quantity >= view.quantity {
                    // Full close. Drop the protective stop so no orphan
                    // order lingers on the exchange.
                    if let Some(order_id) = &view.stop_order_id {
                        self.cancel_best_effort(order_id).await;
                    }
                    view.quantity = Decimal::ZERO;
                    view.stop_order_id = None;
                    staged.effects.push(Effect::FullClose {
                        reason: *reason,
                        fill,
                    });
                    if *reason == CloseReason::Target {
                        staged.events.push(TradeEventKind::TargetHit {
                            index: record.next_target,
                            price: fill,
                            quantity: close_quantity,
                        });
                    }
                    staged.events.push(TradeEventKind::Closed {
                        reason: *reason,
                        fill_price: fill,
                        realized_pnl: record.realized_pnl
                            + record.realized_for(close_quantity, fill),
                    });
                } else {
                    view.quantity -= close_quantity;
                    staged.effects.push(Effect::PartialClose {
                        quantity: close_quantity,
                        fill,
                    });
                    staged.events.push(TradeEventKind::TargetHit {
                        index: record.next_target,
                        price: fill,
                        quantity: close_quantity,
                    });
                    self.resize_stop(record, staged, view).await?;
                }
            }

            Action::MoveStop {
                price: new_stop,
                reason,
            } => {
                if let Some(order_id) = &view.stop_order_id {
                    self.cancel_best_effort(order_id).await;
                }
                let symbol = record.symbol.clone();
                let side = record.side;
                let new_stop = *new_stop;
                let quantity = view.quantity;
                let gateway = Arc::clone(&self.gateway);
                let order_id = self
                    .with_retry("place_stop", || {
                        let gateway = Arc::clone(&gateway);
                        let symbol = symbol.clone();
                        async move { gateway.place_stop(&symbol, side, new_stop, quantity).await }
                    })
                    .await?;
                staged.events.push(TradeEventKind::StopMoved {
                    from: view.stop,
                    to: new_stop,
                    reason: *reason,
                });
                view.stop = new_stop;
                view.stop_order_id = Some(order_id.clone());
                staged.effects.push(Effect::MoveStop {
                    to: new_stop,
                    order_id: Some(order_id),
                });
            }

            Action::IncreasePosition {
                quantity: added,
                margin,
                leverage,
                rearm_breakeven,
            } => {
                let spec = EntrySpec {
                    symbol: record.symbol.clone(),
                    side: record.side,
                    price,
                    quantity: *added,
                    leverage: *leverage,
                };
                let gateway = Arc::clone(&self.gateway);
                let order_ids = self
                    .with_retry("place_entry", || {
                        let gateway = Arc::clone(&gateway);
                        let spec = spec.clone();
                        async move { gateway.place_entry(&spec).await }
                    })
                    .await?;
                view.quantity += *added;
                staged.effects.push(Effect::Increase {
                    added_quantity: *added,
                    price,
                    rearm_breakeven: *rearm_breakeven,
                    order_ids,
                });
                staged.events.push(TradeEventKind::PositionIncreased {
                    added_quantity: *added,
                    margin: *margin,
                    leverage: *leverage,
                    pyramid_level: record.pyramid_level + 1,
                });
                self.resize_stop(record, staged, view).await?;
            }

            Action::OpenHedge {
                side,
                quantity: hedge_quantity,
                stop: hedge_stop,
            } => {
                let (reply_tx, reply_rx) = oneshot::channel();
                let request = SpawnRequest::Hedge {
                    parent_id: self.trade_id.clone(),
                    symbol: record.symbol.clone(),
                    side: *side,
                    quantity: *hedge_quantity,
                    stop: *hedge_stop,
                    reply: reply_tx,
                };
                if self.spawn.send(request).await.is_err() {
                    return Err(GatewayError::Transient(
                        "lifecycle coordinator unavailable".to_string(),
                    ));
                }
                match tokio::time::timeout(SPAWN_REPLY_TIMEOUT, reply_rx).await {
                    Ok(Ok(hedge_id)) => {
                        staged.effects.push(Effect::SetHedge(hedge_id.clone()));
                        staged.events.push(TradeEventKind::HedgeOpened { hedge_id });
                    }
                    Ok(Err(_)) | Err(_) => {
                        // Hedge did not open; the latch stays clear so the
                        // next tick retries.
                        return Err(GatewayError::Transient(
                            "hedge spawn did not complete".to_string(),
                        ));
                    }
                }
            }

            // Only emitted on a terminal pass, handled by schedule_reentry.
            Action::ScheduleReentry { .. } => {}
        }
        Ok(())
    }

    /// Re-places the protective stop at the working quantity without moving
    /// its price. Called after any fill that changes the position size, so
    /// the resting order never protects a stale quantity.
    async fn resize_stop(
        &self,
        record: &TradeRecord,
        staged: &mut Staged,
        view: &mut WorkingView,
    ) -> Result<(), GatewayError> {
        if view.quantity <= Decimal::ZERO {
            return Ok(());
        }
        if let Some(order_id) = &view.stop_order_id {
            self.cancel_best_effort(order_id).await;
        }
        let symbol = record.symbol.clone();
        let side = record.side;
        let stop = view.stop;
        let quantity = view.quantity;
        let gateway = Arc::clone(&self.gateway);
        let order_id = self
            .with_retry("place_stop", || {
                let gateway = Arc::clone(&gateway);
                let symbol = symbol.clone();
                async move { gateway.place_stop(&symbol, side, stop, quantity).await }
            })
            .await?;
        view.stop_order_id = Some(order_id.clone());
        staged.effects.push(Effect::ReplaceStop {
            order_id: Some(order_id),
        });
        Ok(())
    }

    /// Runs the terminal evaluation pass on a freshly stop-closed record and
    /// forwards any re-entry request to the coordinator.
    async fn schedule_reentry(&self, record: &TradeRecord) {
        let decision = evaluate(record, record.stop_price, Utc::now());
        for action in decision.actions {
            if let Action::ScheduleReentry {
                min_delay_secs,
                max_delay_secs,
                max_deviation,
            } = action
            {
                let request = SpawnRequest::Reentry {
                    closed: record.clone(),
                    min_delay_secs,
                    max_delay_secs,
                    max_deviation,
                };
                if self.spawn.send(request).await.is_err() {
                    tracing::warn!(trade_id = %self.trade_id, "coordinator gone, re-entry dropped");
                }
            }
        }
    }

    /// Bounded retry for transient gateway failures. Rejections surface
    /// immediately; transports get `MAX_GATEWAY_ATTEMPTS` tries with a
    /// doubling backoff.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut backoff = RETRY_BACKOFF_BASE;
        for attempt in 1..=MAX_GATEWAY_ATTEMPTS {
            let outcome = tokio::time::timeout(GATEWAY_CALL_TIMEOUT, call()).await;
            let message = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(GatewayError::Rejected(message))) => {
                    return Err(GatewayError::Rejected(message));
                }
                Ok(Err(GatewayError::Transient(message))) => message,
                Err(_) => "gateway call timed out".to_string(),
            };
            tracing::warn!(
                trade_id = %self.trade_id,
                what,
                attempt,
                %message,
                "gateway call failed"
            );
            if attempt < MAX_GATEWAY_ATTEMPTS {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
        Err(GatewayError::Transient(format!(
            "{what} failed after {MAX_GATEWAY_ATTEMPTS} attempts"
        )))
    }

    async fn cancel_best_effort(&self, order_id: &str) {
        let gateway = Arc::clone(&self.gateway);
        let result = self
            .with_retry("cancel", || {
                let gateway = Arc::clone(&gateway);
                let order_id = order_id.to_string();
                async move { gateway.cancel(&order_id).await }
            })
            .await;
        if let Err(err) = result {
            tracing::warn!(trade_id = %self.trade_id, %err, "stop cancel failed");
        }
    }

    async fn emit(&self, kind: TradeEventKind) {
        let event = TradeEvent::now(self.trade_id.clone(), kind);
        if self.events.send(event).await.is_err() {
            tracing::debug!(trade_id = %self.trade_id, "event receiver dropped");
        }
    }
}
