use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trade_guard_core::events::StopMoveReason;
use trade_guard_core::trade::{CloseReason, Side, TradeRecord, TradeStatus};

/// An intended protective mutation, to be executed by the monitor in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Close `quantity` at market.
    CloseMarket {
        quantity: Decimal,
        reason: CloseReason,
    },
    /// Relocate the protective stop. Always a tightening move; candidates
    /// that would loosen the stop are discarded before emission.
    MoveStop {
        price: Decimal,
        reason: StopMoveReason,
    },
    /// Add to the position at market (pyramiding step).
    IncreasePosition {
        quantity: Decimal,
        margin: Decimal,
        leverage: u32,
        rearm_breakeven: bool,
    },
    /// Spawn an opposite-direction hedge trade.
    OpenHedge {
        side: Side,
        quantity: Decimal,
        stop: Decimal,
    },
    /// Schedule a delayed re-entry after a stop-out. The coordinator samples
    /// the delay from the range and revalidates price drift before opening.
    ScheduleReentry {
        min_delay_secs: u64,
        max_delay_secs: u64,
        max_deviation: Decimal,
    },
}

/// Outcome of one evaluation tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decision {
    /// Suggested next status; `None` leaves the status alone. The registry
    /// still validates the transition at commit time.
    pub status: Option<TradeStatus>,
    /// Latch the breakeven feature as armed (idempotent).
    pub arm_breakeven: bool,
    /// Latch trailing as active.
    pub activate_trailing: bool,
    pub actions: Vec<Action>,
}

impl Decision {
    #[must_use]
    fn none() -> Self {
        Self::default()
    }

    #[must_use]
    fn close_all(record: &TradeRecord, reason: CloseReason) -> Self {
        Self {
            status: Some(reason.terminal_status()),
            actions: vec![Action::CloseMarket {
                quantity: record.quantity,
                reason,
            }],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.actions.is_empty()
    }
}

/// Breakeven stop level: entry nudged into profit by the configured buffer.
#[must_use]
pub fn breakeven_stop(record: &TradeRecord) -> Decimal {
    match record.side {
        Side::Long => record.entry_price * (Decimal::ONE + record.config.breakeven_buffer),
        Side::Short => record.entry_price * (Decimal::ONE - record.config.breakeven_buffer),
    }
}

/// Trailing stop candidate at the configured distance from current price.
#[must_use]
pub fn trailing_stop(side: Side, price: Decimal, distance: Decimal) -> Decimal {
    match side {
        Side::Long => price * (Decimal::ONE - distance),
        Side::Short => price * (Decimal::ONE + distance),
    }
}

/// Evaluates one trade against current price and policy.
///
/// Pure: no clocks, no I/O; `now` is an argument. Rules run in strict
/// precedence. Timeout and stop/target hits short-circuit the softer
/// adjustments; breakeven, trailing, pyramiding, and hedging are independent
/// and may all contribute to the same tick. On a `ClosedStop` record only
/// the re-entry rule runs (the monitor performs one terminal pass).
#[must_use]
pub fn evaluate(record: &TradeRecord, price: Decimal, now: DateTime<Utc>) -> Decision {
    if record.status == TradeStatus::ClosedStop {
        return reentry_rule(record);
    }
    if !record.status.is_engaged() {
        return Decision::none();
    }

    // Rule 1: timeout.
    if now - record.opened_at >= record.config.timeout() {
        return Decision::close_all(record, CloseReason::Timeout);
    }

    // Rule 2: stop hit, then target hit. Mutually exclusive with the softer
    // rules below.
    if record.side.stop_crossed(price, record.stop_price) {
        return Decision::close_all(record, CloseReason::Stop);
    }
    if let Some(target) = record.next_target_price() {
        if record.side.target_crossed(price, target) {
            let last = record.next_target + 1 == record.target_prices.len();
            let quantity = if last {
                record.quantity
            } else {
                record.target_portion().min(record.quantity)
            };
            return Decision {
                status: last.then_some(TradeStatus::ClosedTarget),
                actions: vec![Action::CloseMarket {
                    quantity,
                    reason: CloseReason::Target,
                }],
                ..Decision::default()
            };
        }
    }

    let mut decision = Decision::none();
    let pol = record.profit_fraction(price);
    let mut stop = record.stop_price;

    // Rule 3: breakeven arming. Re-firing once armed is a no-op.
    if !record.breakeven_armed && pol >= record.config.breakeven_threshold {
        decision.arm_breakeven = true;
        decision.status = Some(TradeStatus::BreakevenArmed);
        let candidate = breakeven_stop(record);
        if record.side.tightens_stop(stop, candidate) {
            decision.actions.push(Action::MoveStop {
                price: candidate,
                reason: StopMoveReason::Breakeven,
            });
            stop = candidate;
        }
    }

    // Rule 4: trailing activation and update. Tighten-only, with a minimum
    // relative step to bound update frequency.
    if pol >= record.config.trailing_threshold {
        decision.activate_trailing = true;
        decision.status = Some(TradeStatus::Trailing);
        let candidate = trailing_stop(record.side, price, record.config.trailing_distance);
        let step = (candidate - stop).abs();
        if record.side.tightens_stop(stop, candidate)
            && step >= record.config.trailing_step * stop
        {
            decision.actions.push(Action::MoveStop {
                price: candidate,
                reason: StopMoveReason::Trailing,
            });
        }
    }

    // Rule 5: pyramiding. Steps consume strictly in order, once each.
    let mut fired_pyramid = false;
    for step in record
        .config
        .pyramid_steps
        .iter()
        .skip(record.pyramid_level as usize)
    {
        if pol < step.trigger {
            break;
        }
        decision.actions.push(Action::IncreasePosition {
            quantity: step.margin * Decimal::from(step.leverage) / price,
            margin: step.margin,
            leverage: step.leverage,
            rearm_breakeven: step.rearm_breakeven,
        });
        fired_pyramid = true;
    }
    if fired_pyramid {
        decision.status = Some(TradeStatus::Pyramiding);
    }

    // Rule 6: hedge trigger on drawdown, once per trade.
    if pol <= -record.config.hedge_threshold && record.hedge_trade_id.is_none() {
        let hedge_side = record.side.opposite();
        decision.actions.push(Action::OpenHedge {
            side: hedge_side,
            quantity: record.quantity * record.config.hedge_size_fraction,
            stop: match hedge_side {
                Side::Long => price * (Decimal::ONE - record.config.hedge_stop_distance),
                Side::Short => price * (Decimal::ONE + record.config.hedge_stop_distance),
            },
        });
        decision.status = Some(TradeStatus::Hedged);
    }

    if !decision.is_empty() {
        tracing::debug!(
            trade_id = %record.id,
            %price,
            %pol,
            actions = decision.actions.len(),
            "risk decision"
        );
    }

    decision
}

/// Rule 7: re-entry scheduling, evaluated only on `ClosedStop`.
fn reentry_rule(record: &TradeRecord) -> Decision {
    if record.reentry_count >= record.config.max_retries {
        return Decision::none();
    }
    let (min_delay_secs, max_delay_secs) = record.config.reentry_delay_secs;
    Decision {
        actions: vec![Action::ScheduleReentry {
            min_delay_secs,
            max_delay_secs,
            max_deviation: record.config.reentry_max_deviation,
        }],
        ..Decision::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use trade_guard_core::config::RiskConfig;
    use trade_guard_core::trade::{TradeIntent, TradeRecord};

    fn long_record(targets: Vec<Decimal>) -> TradeRecord {
        let intent = TradeIntent {
            symbol: "BTCUSDT".to_string(),
            side: Side::Long,
            entry_price: dec!(67000),
            stop_price: Some(dec!(66000)),
            target_prices: targets,
            initial_margin: dec!(20),
            leverage: 10,
        };
        let mut record = TradeRecord::from_intent(
            "t1".to_string(),
            &intent,
            RiskConfig::default(),
            Utc::now(),
        );
        record.status = TradeStatus::Open;
        record
    }

    fn short_record() -> TradeRecord {
        let intent = TradeIntent {
            symbol: "ETHUSDT".to_string(),
            side: Side::Short,
            entry_price: dec!(100),
            stop_price: Some(dec!(103)),
            target_prices: vec![],
            initial_margin: dec!(20),
            leverage: 10,
        };
        let mut record = TradeRecord::from_intent(
            "t2".to_string(),
            &intent,
            RiskConfig::default(),
            Utc::now(),
        );
        record.status = TradeStatus::Open;
        record
    }

    /// Applies stop moves and latches the way the monitor does, for
    /// multi-tick tests.
    fn apply_soft(record: &mut TradeRecord, decision: &Decision) {
        if decision.arm_breakeven {
            record.breakeven_armed = true;
        }
        if decision.activate_trailing {
            record.trailing_active = true;
        }
        for action in &decision.actions {
            match action {
                Action::MoveStop { price, .. } => record.stop_price = *price,
                Action::IncreasePosition { quantity, .. } => {
                    record.quantity += *quantity;
                    record.pyramid_level += 1;
                }
                _ => {}
            }
        }
        if let Some(status) = decision.status {
            record.status = status;
        }
    }

    #[test]
    fn breakeven_arms_at_threshold_with_exact_stop() {
        let record = long_record(vec![]);
        let decision = evaluate(&record, dec!(68340), Utc::now());

        assert!(decision.arm_breakeven);
        assert_eq!(decision.status, Some(TradeStatus::BreakevenArmed));
        assert_eq!(
            decision.actions,
            vec![Action::MoveStop {
                price: dec!(67067.000),
                reason: StopMoveReason::Breakeven,
            }]
        );
    }

    #[test]
    fn breakeven_does_not_fire_below_threshold() {
        let record = long_record(vec![]);
        // 0.75% profit, below the 2% threshold
        let decision = evaluate(&record, dec!(67500), Utc::now());
        assert!(decision.is_empty());
    }

    #[test]
    fn breakeven_refire_is_noop_once_armed() {
        let mut record = long_record(vec![]);
        record.breakeven_armed = true;
        record.stop_price = dec!(67067);
        record.status = TradeStatus::BreakevenArmed;

        let decision = evaluate(&record, dec!(68340), Utc::now());
        assert!(!decision.arm_breakeven);
        assert!(decision.actions.is_empty());
    }

    #[test]
    fn breakeven_mirrors_for_shorts() {
        let record = short_record();
        // 2% profit for a short at entry 100
        let decision = evaluate(&record, dec!(98), Utc::now());
        assert!(decision.arm_breakeven);
        assert_eq!(
            decision.actions,
            vec![Action::MoveStop {
                price: dec!(99.900),
                reason: StopMoveReason::Breakeven,
            }]
        );
    }

    #[test]
    fn trailing_activates_and_respects_hysteresis() {
        let mut record = long_record(vec![]);
        record.breakeven_armed = true;
        record.status = TradeStatus::BreakevenArmed;
        record.stop_price = dec!(67067);

        // 3% profit: trailing activates, stop to 69010 * 0.99
        let decision = evaluate(&record, dec!(69010), Utc::now());
        assert!(decision.activate_trailing);
        assert_eq!(decision.status, Some(TradeStatus::Trailing));
        assert_eq!(
            decision.actions,
            vec![Action::MoveStop {
                price: dec!(68319.9000),
                reason: StopMoveReason::Trailing,
            }]
        );
        apply_soft(&mut record, &decision);

        // 0.13% further: candidate moves less than 0.5% of the stop, no move
        let decision = evaluate(&record, dec!(69100), Utc::now());
        assert!(decision.actions.is_empty());

        // A real move clears the hysteresis step
        let decision = evaluate(&record, dec!(69700), Utc::now());
        assert_eq!(
            decision.actions,
            vec![Action::MoveStop {
                price: dec!(69003.0000),
                reason: StopMoveReason::Trailing,
            }]
        );
    }

    #[test]
    fn trailing_never_loosens_the_stop() {
        let mut record = long_record(vec![]);
        record.breakeven_armed = true;
        record.trailing_active = true;
        record.status = TradeStatus::Trailing;
        record.stop_price = dec!(69500);

        // Price retreat puts the candidate below the current stop; the
        // candidate is discarded silently.
        let decision = evaluate(&record, dec!(69100), Utc::now());
        assert!(decision.actions.is_empty());
    }

    #[test]
    fn stop_tightening_is_monotonic_across_a_price_path() {
        let mut record = long_record(vec![]);
        let now = Utc::now();
        let path = [
            dec!(67000),
            dec!(68340),
            dec!(69010),
            dec!(68500),
            dec!(69700),
            dec!(69200),
            dec!(70500),
        ];
        let mut last_stop = record.stop_price;
        for price in path {
            let decision = evaluate(&record, price, now);
            apply_soft(&mut record, &decision);
            assert!(
                record.stop_price >= last_stop,
                "stop loosened from {last_stop} to {} at price {price}",
                record.stop_price
            );
            last_stop = record.stop_price;
        }
    }

    #[test]
    fn timeout_closes_at_boundary_and_not_before() {
        let mut record = long_record(vec![]);
        let now = Utc::now();

        record.opened_at = now - Duration::seconds(4 * 3600 - 1);
        let decision = evaluate(&record, dec!(67000), now);
        assert!(decision.is_empty());

        record.opened_at = now - Duration::seconds(4 * 3600);
        let decision = evaluate(&record, dec!(67000), now);
        assert_eq!(decision.status, Some(TradeStatus::ClosedTimeout));
        assert_eq!(
            decision.actions,
            vec![Action::CloseMarket {
                quantity: record.quantity,
                reason: CloseReason::Timeout,
            }]
        );
    }

    #[test]
    fn timeout_takes_precedence_over_stop_hit() {
        let mut record = long_record(vec![]);
        let now = Utc::now();
        record.opened_at = now - Duration::seconds(5 * 3600);

        // Price is through the stop as well; timeout still wins.
        let decision = evaluate(&record, dec!(65000), now);
        assert_eq!(decision.status, Some(TradeStatus::ClosedTimeout));
    }

    #[test]
    fn stop_cross_closes_the_full_position() {
        let record = long_record(vec![]);
        let decision = evaluate(&record, dec!(65900), Utc::now());
        assert_eq!(decision.status, Some(TradeStatus::ClosedStop));
        assert_eq!(
            decision.actions,
            vec![Action::CloseMarket {
                quantity: record.quantity,
                reason: CloseReason::Stop,
            }]
        );
    }

    #[test]
    fn target_hit_closes_a_portion_and_short_circuits() {
        let record = long_record(vec![dec!(68000), dec!(69000), dec!(71000)]);
        // Through target 1 and past the breakeven threshold; only the target
        // close is emitted this tick.
        let decision = evaluate(&record, dec!(68400), Utc::now());
        assert_eq!(decision.status, None);
        assert_eq!(
            decision.actions,
            vec![Action::CloseMarket {
                quantity: record.target_portion(),
                reason: CloseReason::Target,
            }]
        );
        assert!(!decision.arm_breakeven);
    }

    #[test]
    fn final_target_closes_the_remainder() {
        let mut record = long_record(vec![dec!(68000), dec!(69000), dec!(71000)]);
        record.next_target = 2;
        record.quantity = record.initial_quantity / dec!(3);

        let decision = evaluate(&record, dec!(71050), Utc::now());
        assert_eq!(decision.status, Some(TradeStatus::ClosedTarget));
        assert_eq!(
            decision.actions,
            vec![Action::CloseMarket {
                quantity: record.quantity,
                reason: CloseReason::Target,
            }]
        );
    }

    #[test]
    fn pyramid_step_fires_once_per_level() {
        let mut record = long_record(vec![]);
        // 2.6% profit crosses the first step (2.5%) only
        let price = dec!(68742);
        let decision = evaluate(&record, price, Utc::now());

        let increases: Vec<_> = decision
            .actions
            .iter()
            .filter(|a| matches!(a, Action::IncreasePosition { .. }))
            .collect();
        assert_eq!(increases.len(), 1);
        assert_eq!(
            increases[0],
            &Action::IncreasePosition {
                quantity: dec!(1000) / price,
                margin: dec!(20),
                leverage: 50,
                rearm_breakeven: true,
            }
        );
        assert_eq!(decision.status, Some(TradeStatus::Pyramiding));
        apply_soft(&mut record, &decision);

        // Price oscillates below and back above the threshold: the consumed
        // level never re-fires.
        for price in [dec!(68000), dec!(68742), dec!(68100), dec!(68800)] {
            let decision = evaluate(&record, price, Utc::now());
            assert!(
                !decision
                    .actions
                    .iter()
                    .any(|a| matches!(a, Action::IncreasePosition { .. })),
                "level re-fired at price {price}"
            );
        }
    }

    #[test]
    fn pyramid_consumes_multiple_levels_in_one_jump() {
        let record = long_record(vec![]);
        // 6.5% profit crosses all three default steps at once
        let decision = evaluate(&record, dec!(71355), Utc::now());
        let increases = decision
            .actions
            .iter()
            .filter(|a| matches!(a, Action::IncreasePosition { .. }))
            .count();
        assert_eq!(increases, 3);
    }

    #[test]
    fn breakeven_and_pyramiding_fire_in_the_same_tick() {
        let record = long_record(vec![]);
        let decision = evaluate(&record, dec!(68742), Utc::now());
        assert!(decision.arm_breakeven);
        assert!(decision
            .actions
            .iter()
            .any(|a| matches!(a, Action::MoveStop { .. })));
        assert!(decision
            .actions
            .iter()
            .any(|a| matches!(a, Action::IncreasePosition { .. })));
    }

    #[test]
    fn hedge_opens_on_drawdown_once() {
        let mut record = long_record(vec![]);
        record.stop_price = dec!(60000);

        // 2% drawdown
        let decision = evaluate(&record, dec!(65660), Utc::now());
        assert_eq!(decision.status, Some(TradeStatus::Hedged));
        assert_eq!(
            decision.actions,
            vec![Action::OpenHedge {
                side: Side::Short,
                quantity: record.quantity,
                stop: dec!(65660) * dec!(1.0015),
            }]
        );

        record.hedge_trade_id = Some("h1".to_string());
        record.status = TradeStatus::Hedged;
        let decision = evaluate(&record, dec!(65660), Utc::now());
        assert!(decision.actions.is_empty());
    }

    #[test]
    fn reentry_scheduled_only_after_stop_close_and_under_limit() {
        let mut record = long_record(vec![]);
        record.status = TradeStatus::ClosedStop;

        let decision = evaluate(&record, dec!(66000), Utc::now());
        assert_eq!(
            decision.actions,
            vec![Action::ScheduleReentry {
                min_delay_secs: 90,
                max_delay_secs: 180,
                max_deviation: dec!(0.01),
            }]
        );

        record.reentry_count = record.config.max_retries;
        let decision = evaluate(&record, dec!(66000), Utc::now());
        assert!(decision.is_empty());
    }

    #[test]
    fn no_reentry_for_other_terminal_states() {
        let mut record = long_record(vec![]);
        for status in [
            TradeStatus::ClosedTarget,
            TradeStatus::ClosedTimeout,
            TradeStatus::ClosedManual,
            TradeStatus::Aborted,
        ] {
            record.status = status;
            assert!(evaluate(&record, dec!(66000), Utc::now()).is_empty());
        }
    }

    #[test]
    fn pending_entry_is_left_alone() {
        let mut record = long_record(vec![]);
        record.status = TradeStatus::PendingEntry;
        assert!(evaluate(&record, dec!(70000), Utc::now()).is_empty());
    }
}
