use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One pyramiding step: when profit crosses `trigger`, add
/// `margin * leverage / price` to the position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyramidStep {
    /// Profit fraction that consumes this step (e.g. 0.025 = 2.5%).
    pub trigger: Decimal,
    /// Additional margin committed at this step (quote units).
    pub margin: Decimal,
    /// Leverage applied to the additional margin.
    pub leverage: u32,
    /// Re-arm the breakeven rule after this step fires.
    #[serde(default)]
    pub rearm_breakeven: bool,
}

/// Risk policy thresholds, snapshotted per trade at registration.
///
/// All fractional fields are fractions of entry price (0.02 = 2%), matching
/// the glossary semantics. Serde defaults mirror the battle-tested values of
/// the production configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Profit fraction that arms breakeven.
    #[serde(default = "default_breakeven_threshold")]
    pub breakeven_threshold: Decimal,
    /// Offset above (long) / below (short) entry for the breakeven stop.
    #[serde(default = "default_breakeven_buffer")]
    pub breakeven_buffer: Decimal,
    /// Profit fraction that activates trailing.
    #[serde(default = "default_trailing_threshold")]
    pub trailing_threshold: Decimal,
    /// Distance of the trailing stop from current price.
    #[serde(default = "default_trailing_distance")]
    pub trailing_distance: Decimal,
    /// Minimum relative stop move for a trailing update (hysteresis).
    #[serde(default = "default_trailing_step")]
    pub trailing_step: Decimal,
    /// Open trades are force-closed after this long.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Monitor tick interval in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Ordered pyramiding table, consumed strictly in sequence.
    #[serde(default = "default_pyramid_steps")]
    pub pyramid_steps: Vec<PyramidStep>,
    /// Drawdown fraction that opens a hedge.
    #[serde(default = "default_hedge_threshold")]
    pub hedge_threshold: Decimal,
    /// Hedge size as a fraction of the primary position.
    #[serde(default = "default_hedge_size_fraction")]
    pub hedge_size_fraction: Decimal,
    /// Hedge stop distance from the hedge entry price.
    #[serde(default = "default_hedge_stop_distance")]
    pub hedge_stop_distance: Decimal,
    /// Maximum re-entries after stop-outs, across the whole chain.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Randomized re-entry delay range in seconds (min, max).
    #[serde(default = "default_reentry_delay_secs")]
    pub reentry_delay_secs: (u64, u64),
    /// A re-entry is dropped if price has drifted further than this fraction
    /// from the closed trade's entry by the time the delay elapses.
    #[serde(default = "default_reentry_max_deviation")]
    pub reentry_max_deviation: Decimal,
    /// Stop distance applied when an intent carries no stop.
    #[serde(default = "default_fallback_stop_distance")]
    pub fallback_stop_distance: Decimal,
}

fn default_breakeven_threshold() -> Decimal {
    Decimal::new(2, 2) // 2%
}

fn default_breakeven_buffer() -> Decimal {
    Decimal::new(1, 3) // 0.1%
}

fn default_trailing_threshold() -> Decimal {
    Decimal::new(3, 2) // 3%
}

fn default_trailing_distance() -> Decimal {
    Decimal::new(1, 2) // 1%
}

fn default_trailing_step() -> Decimal {
    Decimal::new(5, 3) // 0.5%
}

const fn default_timeout_secs() -> u64 {
    4 * 3600
}

const fn default_tick_interval_ms() -> u64 {
    2_000
}

fn default_pyramid_steps() -> Vec<PyramidStep> {
    vec![
        PyramidStep {
            trigger: Decimal::new(25, 3), // 2.5%
            margin: Decimal::from(20),
            leverage: 50,
            rearm_breakeven: true,
        },
        PyramidStep {
            trigger: Decimal::new(4, 2), // 4%
            margin: Decimal::from(40),
            leverage: 50,
            rearm_breakeven: false,
        },
        PyramidStep {
            trigger: Decimal::new(6, 2), // 6%
            margin: Decimal::from(100),
            leverage: 50,
            rearm_breakeven: false,
        },
    ]
}

fn default_hedge_threshold() -> Decimal {
    Decimal::new(2, 2) // 2%
}

fn default_hedge_size_fraction() -> Decimal {
    Decimal::ONE
}

fn default_hedge_stop_distance() -> Decimal {
    Decimal::new(15, 4) // 0.15%
}

const fn default_max_retries() -> u32 {
    2
}

const fn default_reentry_delay_secs() -> (u64, u64) {
    (90, 180)
}

fn default_reentry_max_deviation() -> Decimal {
    Decimal::new(1, 2) // 1%
}

fn default_fallback_stop_distance() -> Decimal {
    Decimal::new(15, 3) // 1.5%
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            breakeven_threshold: default_breakeven_threshold(),
            breakeven_buffer: default_breakeven_buffer(),
            trailing_threshold: default_trailing_threshold(),
            trailing_distance: default_trailing_distance(),
            trailing_step: default_trailing_step(),
            timeout_secs: default_timeout_secs(),
            tick_interval_ms: default_tick_interval_ms(),
            pyramid_steps: default_pyramid_steps(),
            hedge_threshold: default_hedge_threshold(),
            hedge_size_fraction: default_hedge_size_fraction(),
            hedge_stop_distance: default_hedge_stop_distance(),
            max_retries: default_max_retries(),
            reentry_delay_secs: default_reentry_delay_secs(),
            reentry_max_deviation: default_reentry_max_deviation(),
            fallback_stop_distance: default_fallback_stop_distance(),
        }
    }
}

impl RiskConfig {
    #[must_use]
    pub fn timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.timeout_secs).unwrap_or(i64::MAX))
    }

    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub risk: RiskConfig,
}
