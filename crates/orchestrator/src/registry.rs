use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use trade_guard_core::errors::RegistryError;
use trade_guard_core::trade::{TradeId, TradeRecord, TradeStatus};

/// The single authoritative store of trade records.
///
/// Every mutation goes through [`TradeRegistry::update`], which serializes
/// per id: two concurrent ticks for the same trade cannot interleave, while
/// updates for different ids proceed independently. Terminal records stay in
/// the map for audit and are excluded from the active set.
pub struct TradeRegistry {
    trades: RwLock<HashMap<TradeId, Arc<Mutex<TradeRecord>>>>,
}

impl Default for TradeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TradeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            trades: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a new record under its id.
    ///
    /// # Errors
    /// `RegistryError::DuplicateTrade` on id collision.
    pub async fn register(&self, record: TradeRecord) -> Result<TradeId, RegistryError> {
        let mut trades = self.trades.write().await;
        if trades.contains_key(&record.id) {
            return Err(RegistryError::DuplicateTrade(record.id));
        }
        let id = record.id.clone();
        trades.insert(id.clone(), Arc::new(Mutex::new(record)));
        tracing::debug!(trade_id = %id, "trade registered");
        Ok(id)
    }

    async fn slot(&self, id: &str) -> Result<Arc<Mutex<TradeRecord>>, RegistryError> {
        self.trades
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Snapshot of the record.
    ///
    /// # Errors
    /// `RegistryError::NotFound` when no record exists for `id`.
    pub async fn get(&self, id: &str) -> Result<TradeRecord, RegistryError> {
        let slot = self.slot(id).await?;
        let record = slot.lock().await;
        Ok(record.clone())
    }

    /// Atomic read-modify-write of one record.
    ///
    /// The mutation runs on a working copy; the commit happens only after
    /// the resulting status transition validates, so a rejected update
    /// leaves the record untouched. Returns the committed record.
    ///
    /// # Errors
    /// `RegistryError::NotFound` for an unknown id,
    /// `RegistryError::TerminalRecord` when the record is already terminal
    /// (terminal records are immutable, kept only for audit),
    /// `RegistryError::InvalidTransition` when the mutation attempts a
    /// transition the lifecycle forbids.
    pub async fn update<F>(&self, id: &str, mutate: F) -> Result<TradeRecord, RegistryError>
    where
        F: FnOnce(&mut TradeRecord),
    {
        let slot = self.slot(id).await?;
        let mut current = slot.lock().await;
        if current.status.is_terminal() {
            return Err(RegistryError::TerminalRecord {
                id: id.to_string(),
                status: current.status,
            });
        }
        let mut next = current.clone();
        mutate(&mut next);
        if !TradeStatus::can_transition(current.status, next.status) {
            return Err(RegistryError::InvalidTransition {
                id: id.to_string(),
                from: current.status,
                to: next.status,
            });
        }
        *current = next.clone();
        Ok(next)
    }

    /// Snapshots of all non-terminal trades.
    pub async fn list_active(&self) -> Vec<TradeRecord> {
        self.snapshots(|status| !status.is_terminal()).await
    }

    /// Snapshots of all terminal trades, retained for audit.
    pub async fn history(&self) -> Vec<TradeRecord> {
        self.snapshots(TradeStatus::is_terminal).await
    }

    async fn snapshots(&self, keep: impl Fn(TradeStatus) -> bool) -> Vec<TradeRecord> {
        let slots: Vec<_> = self.trades.read().await.values().cloned().collect();
        let mut records = Vec::new();
        for slot in slots {
            let record = slot.lock().await;
            if keep(record.status) {
                records.push(record.clone());
            }
        }
        records
    }
}
