use anyhow::{bail, Context};
use rust_decimal::Decimal;
use trade_guard_core::{ConfigLoader, RiskConfig};

/// Loads the configuration, validates it, and prints the effective values.
pub fn run_check_config(config_path: &str) -> anyhow::Result<()> {
    let config = ConfigLoader::load_from(config_path)
        .with_context(|| format!("failed to load {config_path}"))?;
    validate(&config.risk)?;

    println!("{}", serde_json::to_string_pretty(&config.risk)?);
    println!("configuration OK");
    Ok(())
}

fn validate(risk: &RiskConfig) -> anyhow::Result<()> {
    if risk.breakeven_threshold <= Decimal::ZERO {
        bail!("breakeven_threshold must be positive");
    }
    if risk.trailing_threshold <= Decimal::ZERO || risk.trailing_distance <= Decimal::ZERO {
        bail!("trailing thresholds must be positive");
    }
    if risk.tick_interval_ms == 0 {
        bail!("tick_interval_ms must be positive");
    }
    let mut last = Decimal::ZERO;
    for (i, step) in risk.pyramid_steps.iter().enumerate() {
        if step.trigger <= last {
            bail!("pyramid step {i} trigger {} is not increasing", step.trigger);
        }
        if step.margin <= Decimal::ZERO {
            bail!("pyramid step {i} margin must be positive");
        }
        last = step.trigger;
    }
    let (min_delay, max_delay) = risk.reentry_delay_secs;
    if min_delay > max_delay {
        bail!("reentry_delay_secs minimum exceeds maximum");
    }
    Ok(())
}
