use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use trade_guard_core::errors::GatewayError;
use trade_guard_core::trade::Side;
use trade_guard_core::traits::{EntrySpec, OrderGateway, PriceSource};

/// Paper order gateway: every order fills locally, zero exchange calls.
///
/// Market closes fill at the injected price source's current mark price.
/// Positions are tracked as a net signed quantity per symbol (positive
/// long). Safe to share across monitor tasks.
pub struct PaperGateway {
    prices: Arc<dyn PriceSource>,
    positions: Mutex<HashMap<String, Decimal>>,
    working_orders: Mutex<HashSet<String>>,
    next_order_id: AtomicU64,
    injected_failures: Mutex<VecDeque<GatewayError>>,
}

impl PaperGateway {
    #[must_use]
    pub fn new(prices: Arc<dyn PriceSource>) -> Self {
        Self {
            prices,
            positions: Mutex::new(HashMap::new()),
            working_orders: Mutex::new(HashSet::new()),
            next_order_id: AtomicU64::new(1),
            injected_failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Queues an error to be returned by the next gateway call. Test aid
    /// for exercising retry and abort paths.
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned.
    pub fn inject_failure(&self, error: GatewayError) {
        self.injected_failures
            .lock()
            .expect("failure queue lock poisoned")
            .push_back(error);
    }

    /// Whether an order id is still working (placed and not cancelled).
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn order_is_working(&self, order_id: &str) -> bool {
        self.working_orders
            .lock()
            .expect("order set lock poisoned")
            .contains(order_id)
    }

    fn take_injected(&self) -> Option<GatewayError> {
        self.injected_failures
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
    }

    fn next_id(&self) -> String {
        format!("paper-{}", self.next_order_id.fetch_add(1, Ordering::SeqCst))
    }

    fn signed(side: Side, quantity: Decimal) -> Decimal {
        match side {
            Side::Long => quantity,
            Side::Short => -quantity,
        }
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn place_entry(&self, spec: &EntrySpec) -> Result<Vec<String>, GatewayError> {
        if let Some(err) = self.take_injected() {
            return Err(err);
        }
        let id = self.next_id();
        {
            let mut positions = self
                .positions
                .lock()
                .map_err(|_| GatewayError::Transient("position book lock poisoned".into()))?;
            *positions.entry(spec.symbol.clone()).or_default() +=
                Self::signed(spec.side, spec.quantity);
        }
        tracing::debug!(
            symbol = %spec.symbol,
            side = ?spec.side,
            quantity = %spec.quantity,
            order_id = %id,
            "paper entry filled"
        );
        Ok(vec![id])
    }

    async fn place_stop(
        &self,
        symbol: &str,
        _side: Side,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<String, GatewayError> {
        if let Some(err) = self.take_injected() {
            return Err(err);
        }
        let id = self.next_id();
        self.working_orders
            .lock()
            .map_err(|_| GatewayError::Transient("order set lock poisoned".into()))?
            .insert(id.clone());
        tracing::debug!(%symbol, %price, %quantity, order_id = %id, "paper stop placed");
        Ok(id)
    }

    async fn cancel(&self, order_id: &str) -> Result<(), GatewayError> {
        if let Some(err) = self.take_injected() {
            return Err(err);
        }
        // Cancelling an unknown or already-gone order is fine.
        self.working_orders
            .lock()
            .map_err(|_| GatewayError::Transient("order set lock poisoned".into()))?
            .remove(order_id);
        Ok(())
    }

    async fn close_market(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<Decimal, GatewayError> {
        if let Some(err) = self.take_injected() {
            return Err(err);
        }
        let fill = self
            .prices
            .current_price(symbol)
            .await
            .map_err(|e| GatewayError::Transient(format!("no fill price: {e}")))?;
        {
            let mut positions = self
                .positions
                .lock()
                .map_err(|_| GatewayError::Transient("position book lock poisoned".into()))?;
            *positions.entry(symbol.to_string()).or_default() -= Self::signed(side, quantity);
        }
        tracing::debug!(%symbol, side = ?side, %quantity, %fill, "paper market close filled");
        Ok(fill)
    }

    async fn get_position(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        if let Some(err) = self.take_injected() {
            return Err(err);
        }
        Ok(self
            .positions
            .lock()
            .map_err(|_| GatewayError::Transient("position book lock poisoned".into()))?
            .get(symbol)
            .copied()
            .unwrap_or_default())
    }
}
