use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use figment::providers::{Format, Toml};
use figment::Figment;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::mpsc;
use trade_guard_core::{ConfigLoader, TradeEvent, TradeEventKind, TradeIntent};
use trade_guard_exchange_paper::{PaperGateway, ScriptedPriceSource};
use trade_guard_orchestrator::{LifecycleCoordinator, MonitorSupervisor, TradeRegistry};

/// A deterministic paper session: one intent, one price path.
#[derive(Debug, Deserialize)]
struct Scenario {
    intent: TradeIntent,
    /// Mark prices consumed one per tick; the last one holds once the
    /// path runs out.
    prices: Vec<Decimal>,
}

/// Replays a scenario file through the full lifecycle stack against the
/// paper gateway, printing events as they happen.
pub async fn run_simulate(scenario_path: &str, config_path: &str, json: bool) -> anyhow::Result<()> {
    let scenario: Scenario = Figment::new()
        .merge(Toml::file(scenario_path))
        .extract()
        .with_context(|| format!("failed to load scenario {scenario_path}"))?;
    let config = ConfigLoader::load_from(config_path)?;

    let registry = Arc::new(TradeRegistry::new());
    let prices = Arc::new(ScriptedPriceSource::new(
        scenario.intent.symbol.clone(),
        scenario.prices,
    ));
    let gateway = Arc::new(PaperGateway::new(Arc::clone(&prices) as _));
    let (event_tx, mut event_rx) = mpsc::channel(256);
    let (spawn_tx, spawn_rx) = mpsc::channel(32);

    let supervisor = Arc::new(MonitorSupervisor::new(
        Arc::clone(&registry),
        Arc::clone(&prices) as _,
        Arc::clone(&gateway) as _,
        event_tx.clone(),
        spawn_tx,
    ));
    let coordinator = Arc::new(LifecycleCoordinator::new(
        Arc::clone(&registry),
        Arc::clone(&supervisor),
        Arc::clone(&prices) as _,
        Arc::clone(&gateway) as _,
        event_tx,
        config.risk.clone(),
    ));
    tokio::spawn(Arc::clone(&coordinator).run(spawn_rx));

    let trade_id = coordinator.open_trade(&scenario.intent).await?;
    tracing::info!(%trade_id, "simulation started");

    let tick = config.risk.tick_interval();
    let mut quiet_ticks = 0u32;
    loop {
        tokio::select! {
            event = event_rx.recv() => {
                match event {
                    Some(event) => print_event(&event, json)?,
                    None => break,
                }
            }
            _ = tokio::time::sleep(tick) => {
                if registry.list_active().await.is_empty() {
                    break;
                }
                // An exhausted price path never produces new crossings;
                // give the monitors a few more ticks, then stop.
                if prices.remaining() == 0 {
                    quiet_ticks += 1;
                    if quiet_ticks > 5 {
                        break;
                    }
                }
            }
        }
    }
    supervisor.shutdown_all().await;
    // Drain whatever the final ticks produced.
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(event) = event_rx.try_recv() {
        print_event(&event, json)?;
    }

    println!("--- session summary ---");
    for record in registry.history().await {
        println!(
            "{}  {:?}  realized {}",
            record.id, record.status, record.realized_pnl
        );
    }
    for record in registry.list_active().await {
        println!(
            "{}  {:?}  still open, quantity {}",
            record.id, record.status, record.quantity
        );
    }
    Ok(())
}

fn print_event(event: &TradeEvent, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    let line = match &event.kind {
        TradeEventKind::Opened {
            symbol,
            side,
            entry_price,
            quantity,
        } => format!("opened {symbol} {side:?} {quantity} @ {entry_price}"),
        TradeEventKind::StatusChanged { from, to } => format!("status {from:?} -> {to:?}"),
        TradeEventKind::StopMoved { from, to, reason } => {
            format!("stop {from} -> {to} ({reason:?})")
        }
        TradeEventKind::TargetHit {
            index,
            price,
            quantity,
        } => format!("target {index} hit: closed {quantity} @ {price}"),
        TradeEventKind::PositionIncreased {
            added_quantity,
            pyramid_level,
            ..
        } => format!("pyramid level {pyramid_level}: added {added_quantity}"),
        TradeEventKind::HedgeOpened { hedge_id } => format!("hedge opened: {hedge_id}"),
        TradeEventKind::ReentryScheduled {
            delay_secs,
            attempt,
        } => format!("re-entry {attempt} scheduled in {delay_secs}s"),
        TradeEventKind::Closed {
            reason,
            fill_price,
            realized_pnl,
        } => format!("closed ({reason:?}) @ {fill_price}, realized {realized_pnl}"),
        TradeEventKind::TickError { message } => format!("tick error: {message}"),
    };
    println!("[{}] {}  {}", event.timestamp.format("%H:%M:%S%.3f"), event.trade_id, line);
    Ok(())
}
