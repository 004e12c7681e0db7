//! Reconciler (spec §4.5): periodically (and on demand) pulls exchange
//! state and drives [`crate::position_manager::PositionManager::force_sync`].
//! The matching/ghost-fill/zombie logic itself lives on the Position
//! Manager, since it is the Slot Table's single writer (§4.1); this module
//! is the scheduling and exchange-fetch half of §4.5.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::errors::CoreError;
use crate::exchange::ExchangePort;
use crate::position_manager::PositionManager;
use crate::types::Symbol;

#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    pub interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(30) }
    }
}

pub struct Reconciler {
    symbol: Symbol,
    exchange: Arc<dyn ExchangePort>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(symbol: Symbol, exchange: Arc<dyn ExchangePort>, config: ReconcilerConfig) -> Self {
        Self { symbol, exchange, config }
    }

    /// Fetch exchange open orders + net position and apply them via
    /// `force_sync` (§4.5 steps 1-2 hand off to the Position Manager's
    /// steps 3-5).
    pub async fn reconcile_once(&self, position_manager: &Mutex<PositionManager>) -> Result<(), CoreError> {
        let open_orders = self.exchange.get_open_orders(&self.symbol).await?;
        let net_position = self.exchange.get_positions(&self.symbol).await?;

        let mut pm = position_manager.lock().await;
        pm.force_sync(&open_orders, net_position);
        info!(symbol = %self.symbol, open_orders = open_orders.len(), %net_position, "reconcile complete");
        Ok(())
    }

    /// Runs `reconcile_once` on `config.interval`, and once immediately on
    /// startup, until `cancel` fires. Intended to run as its own timer task
    /// per §5 ("Reconciler runs on its own timer task").
    pub async fn run(&self, position_manager: Arc<Mutex<PositionManager>>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(symbol = %self.symbol, "reconciler shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.reconcile_once(&position_manager).await {
                        error!(symbol = %self.symbol, %err, "reconcile cycle failed, will retry next tick");
                    }
                }
            }
        }
    }
}
