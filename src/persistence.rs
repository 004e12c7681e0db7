//! Persistence contract (spec §9 "Ambient stack"): an opaque snapshot type
//! plus a storage trait. No concrete backend ships here — durable storage
//! is an external collaborator's responsibility; the Core only defines what
//! a snapshot contains and how to request one be saved or loaded.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::slot::{OrderStatus, PositionStatus, SlotStatus};
use crate::slot_table::SlotTable;
use crate::types::Symbol;

/// One persisted grid level. A flat, serde-friendly mirror of [`crate::core::slot::Slot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotSnapshot {
    pub price: Decimal,
    pub slot_status: SlotStatus,
    pub order_status: OrderStatus,
    pub position_status: PositionStatus,
    pub position_qty: Decimal,
    pub order_id: u64,
    pub client_oid: String,
    pub generation: u64,
}

/// Everything needed to resume one symbol's trading state after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub symbol: Symbol,
    pub anchor_price: Decimal,
    pub realized_pnl: Decimal,
    pub last_reconcile_at: Option<DateTime<Utc>>,
    pub slots: Vec<SlotSnapshot>,
    pub taken_at: DateTime<Utc>,
}

impl EngineSnapshot {
    pub fn from_slot_table(
        symbol: Symbol,
        anchor_price: Decimal,
        realized_pnl: Decimal,
        last_reconcile_at: Option<DateTime<Utc>>,
        slots: &SlotTable,
        taken_at: DateTime<Utc>,
    ) -> Self {
        let slots = slots
            .iter()
            .map(|(_, slot)| SlotSnapshot {
                price: slot.price,
                slot_status: slot.slot_status,
                order_status: slot.order_status,
                position_status: slot.position_status,
                position_qty: slot.position_qty,
                order_id: slot.order_id,
                client_oid: slot.client_oid.clone(),
                generation: slot.generation,
            })
            .collect();
        Self { symbol, anchor_price, realized_pnl, last_reconcile_at, slots, taken_at }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Storage contract for engine snapshots. Concrete implementations (a file,
/// a database, an object store) are supplied by the embedding application.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &EngineSnapshot) -> Result<(), PersistenceError>;
    async fn load(&self, symbol: &Symbol) -> Result<Option<EngineSnapshot>, PersistenceError>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    //! In-memory `SnapshotStore` used by integration tests to exercise the
    //! save/load round trip without a real backend.
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct InMemorySnapshotStore {
        snapshots: Mutex<HashMap<Symbol, EngineSnapshot>>,
    }

    #[async_trait]
    impl SnapshotStore for InMemorySnapshotStore {
        async fn save(&self, snapshot: &EngineSnapshot) -> Result<(), PersistenceError> {
            self.snapshots.lock().await.insert(snapshot.symbol.clone(), snapshot.clone());
            Ok(())
        }

        async fn load(&self, symbol: &Symbol) -> Result<Option<EngineSnapshot>, PersistenceError> {
            Ok(self.snapshots.lock().await.get(symbol).cloned())
        }
    }
}
