use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};
use trade_guard_core::errors::PriceError;
use trade_guard_core::traits::PriceSource;

/// Settable per-symbol price book. Unknown symbols are unavailable.
#[derive(Default)]
pub struct StaticPriceSource {
    prices: RwLock<HashMap<String, Decimal>>,
}

impl StaticPriceSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets (or replaces) the current price for a symbol.
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned.
    pub fn set(&self, symbol: &str, price: Decimal) {
        self.prices
            .write()
            .expect("price book lock poisoned")
            .insert(symbol.to_string(), price);
    }
}

#[async_trait]
impl PriceSource for StaticPriceSource {
    async fn current_price(&self, symbol: &str) -> Result<Decimal, PriceError> {
        self.prices
            .read()
            .map_err(|_| PriceError::Unavailable(symbol.to_string()))?
            .get(symbol)
            .copied()
            .ok_or_else(|| PriceError::Unavailable(symbol.to_string()))
    }
}

/// A single-symbol price path consumed one step per call, holding the last
/// price once the script runs out. Drives deterministic paper sessions.
pub struct ScriptedPriceSource {
    symbol: String,
    steps: Mutex<VecDeque<Decimal>>,
    last: Mutex<Option<Decimal>>,
}

impl ScriptedPriceSource {
    #[must_use]
    pub fn new(symbol: impl Into<String>, steps: impl IntoIterator<Item = Decimal>) -> Self {
        Self {
            symbol: symbol.into(),
            steps: Mutex::new(steps.into_iter().collect()),
            last: Mutex::new(None),
        }
    }

    /// Steps not yet consumed.
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.steps.lock().expect("script lock poisoned").len()
    }
}

#[async_trait]
impl PriceSource for ScriptedPriceSource {
    async fn current_price(&self, symbol: &str) -> Result<Decimal, PriceError> {
        if symbol != self.symbol {
            return Err(PriceError::Unavailable(symbol.to_string()));
        }
        let next = self.steps.lock().map_or(None, |mut s| s.pop_front());
        let mut last = self
            .last
            .lock()
            .map_err(|_| PriceError::Unavailable(symbol.to_string()))?;
        if let Some(price) = next {
            *last = Some(price);
        }
        last.ok_or_else(|| PriceError::Unavailable(symbol.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn static_source_returns_set_price() {
        let source = StaticPriceSource::new();
        source.set("BTCUSDT", dec!(67000));

        assert_eq!(source.current_price("BTCUSDT").await.unwrap(), dec!(67000));
        assert!(matches!(
            source.current_price("ETHUSDT").await,
            Err(PriceError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn scripted_source_steps_then_holds() {
        let source = ScriptedPriceSource::new("BTCUSDT", [dec!(67000), dec!(68000)]);

        assert_eq!(source.current_price("BTCUSDT").await.unwrap(), dec!(67000));
        assert_eq!(source.current_price("BTCUSDT").await.unwrap(), dec!(68000));
        // Script exhausted: the last price holds.
        assert_eq!(source.current_price("BTCUSDT").await.unwrap(), dec!(68000));
    }

    #[tokio::test]
    async fn scripted_source_is_unavailable_before_first_step() {
        let source = ScriptedPriceSource::new("BTCUSDT", Vec::new());
        assert!(matches!(
            source.current_price("BTCUSDT").await,
            Err(PriceError::Unavailable(_))
        ));
    }
}
