use crate::config::RiskConfig;
use crate::errors::TradeError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type TradeId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// Sign-adjusted profit fraction relative to entry.
    ///
    /// Positive when price has moved in the trade's favor. `entry` must be
    /// non-zero (enforced at intent validation).
    #[must_use]
    pub fn profit_fraction(self, entry: Decimal, current: Decimal) -> Decimal {
        match self {
            Self::Long => (current - entry) / entry,
            Self::Short => (entry - current) / entry,
        }
    }

    /// Whether `price` has crossed the stop on the adverse side.
    #[must_use]
    pub fn stop_crossed(self, price: Decimal, stop: Decimal) -> bool {
        match self {
            Self::Long => price <= stop,
            Self::Short => price >= stop,
        }
    }

    /// Whether `price` has reached a profit target.
    #[must_use]
    pub fn target_crossed(self, price: Decimal, target: Decimal) -> bool {
        match self {
            Self::Long => price >= target,
            Self::Short => price <= target,
        }
    }

    /// Whether `candidate` is a strictly tighter stop than `current`.
    ///
    /// Tighter means closer to price on the profitable side: higher for
    /// longs, lower for shorts. Equal candidates do not tighten.
    #[must_use]
    pub fn tightens_stop(self, current: Decimal, candidate: Decimal) -> bool {
        match self {
            Self::Long => candidate > current,
            Self::Short => candidate < current,
        }
    }
}

/// Reason a position (or part of one) was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseReason {
    Target,
    Stop,
    Timeout,
    Manual,
}

impl CloseReason {
    #[must_use]
    pub const fn terminal_status(self) -> TradeStatus {
        match self {
            Self::Target => TradeStatus::ClosedTarget,
            Self::Stop => TradeStatus::ClosedStop,
            Self::Timeout => TradeStatus::ClosedTimeout,
            Self::Manual => TradeStatus::ClosedManual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    PendingEntry,
    Open,
    BreakevenArmed,
    Trailing,
    Pyramiding,
    Hedged,
    ClosedTarget,
    ClosedStop,
    ClosedTimeout,
    ClosedManual,
    /// Order rejected by the exchange; requires operator attention.
    Aborted,
}

impl TradeStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::ClosedTarget
                | Self::ClosedStop
                | Self::ClosedTimeout
                | Self::ClosedManual
                | Self::Aborted
        )
    }

    /// Open with protective management running (position exists on the
    /// exchange).
    #[must_use]
    pub const fn is_engaged(self) -> bool {
        matches!(
            self,
            Self::Open | Self::BreakevenArmed | Self::Trailing | Self::Pyramiding | Self::Hedged
        )
    }

    /// Forward-only transition predicate. The engaged sub-states are
    /// mutually reachable (breakeven, trailing, pyramiding, and hedging are
    /// independent features); terminal states are absorbing; nothing moves
    /// back to `PendingEntry` or from engaged back to plain `Open`.
    #[must_use]
    pub const fn can_transition(from: Self, to: Self) -> bool {
        if from as u8 == to as u8 {
            return true;
        }
        match from {
            Self::PendingEntry => matches!(to, Self::Open) || to.is_terminal(),
            Self::Open => to.is_engaged() || to.is_terminal(),
            Self::BreakevenArmed | Self::Trailing | Self::Pyramiding | Self::Hedged => {
                (to.is_engaged() && !matches!(to, Self::Open)) || to.is_terminal()
            }
            _ => false,
        }
    }
}

/// Normalized trade intent, the engine's input contract.
///
/// Produced upstream by signal parsing (out of scope here); consumed by the
/// lifecycle coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeIntent {
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    /// Absent stops get a fallback at `fallback_stop_distance` from entry.
    pub stop_price: Option<Decimal>,
    pub target_prices: Vec<Decimal>,
    pub initial_margin: Decimal,
    pub leverage: u32,
}

impl TradeIntent {
    /// Validates prices and ordering before a record is created.
    ///
    /// # Errors
    /// Returns `TradeError::InvalidIntent` when the entry price is not
    /// positive, the stop sits on the wrong side of entry, or the targets
    /// are not strictly increasing in distance from entry.
    pub fn validate(&self) -> Result<(), TradeError> {
        if self.entry_price <= Decimal::ZERO {
            return Err(TradeError::InvalidIntent(format!(
                "entry price must be positive, got {}",
                self.entry_price
            )));
        }
        if self.initial_margin <= Decimal::ZERO {
            return Err(TradeError::InvalidIntent(format!(
                "initial margin must be positive, got {}",
                self.initial_margin
            )));
        }
        if self.leverage == 0 {
            return Err(TradeError::InvalidIntent("leverage must be >= 1".into()));
        }
        if let Some(stop) = self.stop_price {
            let wrong_side = match self.side {
                Side::Long => stop >= self.entry_price,
                Side::Short => stop <= self.entry_price,
            };
            if wrong_side {
                return Err(TradeError::InvalidIntent(format!(
                    "stop {} is not on the adverse side of entry {}",
                    stop, self.entry_price
                )));
            }
        }
        let mut last_distance = Decimal::ZERO;
        for (i, target) in self.target_prices.iter().enumerate() {
            let in_profit = match self.side {
                Side::Long => *target > self.entry_price,
                Side::Short => *target < self.entry_price,
            };
            if !in_profit {
                return Err(TradeError::InvalidIntent(format!(
                    "target {} ({target}) is not on the profitable side of entry",
                    i + 1
                )));
            }
            let distance = (*target - self.entry_price).abs();
            if distance <= last_distance {
                return Err(TradeError::InvalidIntent(format!(
                    "targets must be strictly increasing in distance from entry (target {})",
                    i + 1
                )));
            }
            last_distance = distance;
        }
        Ok(())
    }
}

/// The central entity, exclusively owned by the trade registry.
///
/// Everything outside the registry works on clones; mutation goes through
/// the registry's serialized `update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: TradeId,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    /// Quantity-weighted fill basis, advanced by pyramid adds. PnL is
    /// measured from here; profit thresholds stay anchored to
    /// `entry_price`.
    pub average_entry: Decimal,
    /// Current position size. Grows by pyramiding, shrinks by partial
    /// closes; never negative.
    pub quantity: Decimal,
    /// Quantity at entry, the base for per-target close portions.
    pub initial_quantity: Decimal,
    pub initial_margin: Decimal,
    pub leverage: u32,
    pub stop_price: Decimal,
    pub target_prices: Vec<Decimal>,
    /// Index of the first unconsumed target.
    pub next_target: usize,
    pub status: TradeStatus,
    pub breakeven_armed: bool,
    pub trailing_active: bool,
    /// Count of consumed pyramid steps.
    pub pyramid_level: u32,
    pub hedge_trade_id: Option<TradeId>,
    /// Set on trades spawned by re-entry, pointing at the stop-closed trade.
    pub reentry_of: Option<TradeId>,
    pub reentry_count: u32,
    pub opened_at: DateTime<Utc>,
    /// Exchange order ids currently associated with the trade.
    pub order_ids: Vec<String>,
    /// Id of the working protective stop order, if one is placed.
    pub stop_order_id: Option<String>,
    pub realized_pnl: Decimal,
    /// Derived each tick; not authoritative.
    pub unrealized_pnl: Decimal,
    /// Config snapshot captured at registration. Mid-flight config changes
    /// never retroactively alter an armed trade.
    pub config: RiskConfig,
}

impl TradeRecord {
    /// Builds a record from a validated intent and a config snapshot.
    ///
    /// Quantity is sized as `margin * leverage / entry`; a missing stop gets
    /// the configured fallback distance.
    #[must_use]
    pub fn from_intent(
        id: TradeId,
        intent: &TradeIntent,
        config: RiskConfig,
        opened_at: DateTime<Utc>,
    ) -> Self {
        let quantity =
            intent.initial_margin * Decimal::from(intent.leverage) / intent.entry_price;
        let stop_price = intent.stop_price.unwrap_or_else(|| match intent.side {
            Side::Long => intent.entry_price * (Decimal::ONE - config.fallback_stop_distance),
            Side::Short => intent.entry_price * (Decimal::ONE + config.fallback_stop_distance),
        });
        Self {
            id,
            symbol: intent.symbol.clone(),
            side: intent.side,
            entry_price: intent.entry_price,
            average_entry: intent.entry_price,
            quantity,
            initial_quantity: quantity,
            initial_margin: intent.initial_margin,
            leverage: intent.leverage,
            stop_price,
            target_prices: intent.target_prices.clone(),
            next_target: 0,
            status: TradeStatus::PendingEntry,
            breakeven_armed: false,
            trailing_active: false,
            pyramid_level: 0,
            hedge_trade_id: None,
            reentry_of: None,
            reentry_count: 0,
            opened_at,
            order_ids: Vec::new(),
            stop_order_id: None,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            config,
        }
    }

    #[must_use]
    pub fn profit_fraction(&self, price: Decimal) -> Decimal {
        self.side.profit_fraction(self.entry_price, price)
    }

    #[must_use]
    pub fn next_target_price(&self) -> Option<Decimal> {
        self.target_prices.get(self.next_target).copied()
    }

    /// Portion of the original size closed per target hit.
    #[must_use]
    pub fn target_portion(&self) -> Decimal {
        if self.target_prices.is_empty() {
            return self.quantity;
        }
        self.initial_quantity / Decimal::from(self.target_prices.len() as u64)
    }

    /// Signed unrealized PnL of the remaining position at `price`, measured
    /// from the blended fill basis.
    #[must_use]
    pub fn unrealized_at(&self, price: Decimal) -> Decimal {
        match self.side {
            Side::Long => (price - self.average_entry) * self.quantity,
            Side::Short => (self.average_entry - price) * self.quantity,
        }
    }

    /// Realized PnL contribution of closing `quantity` at `fill_price`.
    #[must_use]
    pub fn realized_for(&self, quantity: Decimal, fill_price: Decimal) -> Decimal {
        match self.side {
            Side::Long => (fill_price - self.average_entry) * quantity,
            Side::Short => (self.average_entry - fill_price) * quantity,
        }
    }
}
