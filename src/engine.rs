//! The per-symbol concurrency model (spec §5).
//!
//! One [`SymbolEngine`] owns one [`PositionManager`] (and therefore one
//! Slot Table) for one symbol. All mutation is serialized through its
//! `run` loop; the Reconciler and any producer tasks reach it only through
//! channels or the shared `Mutex` it hands out for `force_sync`.

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::exchange::ExchangePort;
use crate::executor::{Executor, ExecutorConfig};
use crate::persistence::{EngineSnapshot, SnapshotStore};
use crate::position_manager::PositionManager;
use crate::reconciler::{Reconciler, ReconcilerConfig};
use crate::risk_monitor::RiskMonitor;
use crate::strategy::StrategyInputs;
use crate::types::{Candle, PriceUpdate, Regime};

/// Inbound events the symbol task consumes. Price ticks are lossy by
/// design (bounded, drop-oldest); order updates and candles are not
/// (§5 "backpressure").
pub enum SymbolEvent {
    Price(PriceUpdate),
    OrderUpdate(crate::exchange::OrderUpdate),
    Candle(Candle),
}

/// Bounded capacity for the price-tick channel. Order updates and candles
/// use an unbounded channel instead — per §5 they must never be dropped.
pub const PRICE_CHANNEL_CAPACITY: usize = 64;

pub struct SymbolEngine {
    config: EngineConfig,
    exchange: Arc<dyn ExchangePort>,
    position_manager: Arc<Mutex<PositionManager>>,
    executor: Executor,
    risk_monitor: RiskMonitor,
    snapshot_store: Arc<dyn SnapshotStore>,
    initialized: bool,
    /// Set by `restore()` when no snapshot exists but the exchange reports
    /// a non-zero net position; consumed by the first price tick, which
    /// supplies the entry price the exchange position API itself lacks.
    pending_position_reconstruction: Option<Decimal>,
}

impl SymbolEngine {
    pub fn new(
        config: EngineConfig,
        exchange: Arc<dyn ExchangePort>,
        snapshot_store: Arc<dyn SnapshotStore>,
    ) -> Self {
        let symbol = config.symbol.clone();
        let params = config.grid_params();
        let risk_config = crate::risk_monitor::RiskMonitorConfig {
            window: config.risk.window,
            volume_multiplier: config.risk.volume_multiplier,
            recovery_threshold: config.risk.recovery_threshold,
        };
        let executor_config = ExecutorConfig {
            rate_per_second: config.rate_limit_per_second,
            burst_capacity: config.rate_limit_burst,
            ..ExecutorConfig::default()
        };
        Self {
            position_manager: Arc::new(Mutex::new(PositionManager::new(symbol.clone(), params))),
            executor: Executor::new(Arc::clone(&exchange), executor_config),
            risk_monitor: RiskMonitor::new(risk_config, [symbol]),
            exchange,
            snapshot_store,
            config,
            initialized: false,
            pending_position_reconstruction: None,
        }
    }

    /// Restore state on startup (§9 "Persistence contract"): load the last
    /// snapshot if one exists, or — if the store is empty but the exchange
    /// reports a non-zero net position — flag the net position for
    /// reconstruction once the first price tick supplies an entry price
    /// (the exchange position query itself carries no price).
    pub async fn restore(&mut self) {
        match self.snapshot_store.load(&self.config.symbol).await {
            Ok(Some(snapshot)) => {
                info!(symbol = %self.config.symbol, "restoring from persisted snapshot");
                self.position_manager.lock().await.restore_from_snapshot(&snapshot);
                self.initialized = true;
            }
            Ok(None) => match self.exchange.get_positions(&self.config.symbol).await {
                Ok(position) if !position.is_zero() => {
                    warn!(symbol = %self.config.symbol, %position, "no snapshot found but exchange reports a position; will reconstruct on first tick");
                    self.pending_position_reconstruction = Some(position);
                }
                Ok(_) => {}
                Err(err) => {
                    error!(symbol = %self.config.symbol, %err, "failed to query exchange position on startup");
                }
            },
            Err(err) => {
                error!(symbol = %self.config.symbol, %err, "failed to load snapshot on startup, starting fresh");
            }
        }
    }

    /// Creates the price-tick producer's sending half bound to
    /// `PRICE_CHANNEL_CAPACITY`, and the order-update/candle unbounded
    /// senders, per §5's differentiated backpressure policy.
    pub fn channels() -> (
        mpsc::Sender<PriceUpdate>,
        mpsc::Receiver<PriceUpdate>,
        mpsc::UnboundedSender<crate::exchange::OrderUpdate>,
        mpsc::UnboundedReceiver<crate::exchange::OrderUpdate>,
        mpsc::UnboundedSender<Candle>,
        mpsc::UnboundedReceiver<Candle>,
    ) {
        let (price_tx, price_rx) = mpsc::channel(PRICE_CHANNEL_CAPACITY);
        let (order_tx, order_rx) = mpsc::unbounded_channel();
        let (candle_tx, candle_rx) = mpsc::unbounded_channel();
        (price_tx, price_rx, order_tx, order_rx, candle_tx, candle_rx)
    }

    /// Spawns the Reconciler as its own timer task (§5), sharing this
    /// engine's Position Manager mutex.
    pub fn spawn_reconciler(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let reconciler = Reconciler::new(
            self.config.symbol.clone(),
            Arc::clone(&self.exchange),
            ReconcilerConfig { interval: self.config.reconcile_interval },
        );
        let position_manager = Arc::clone(&self.position_manager);
        tokio::spawn(async move {
            reconciler.run(position_manager, cancel).await;
        })
    }

    /// The symbol task's main loop: drains price ticks, order updates, and
    /// candles, serializing every mutation through this single task
    /// (§5 "Per-symbol state ... is owned by a single symbol task").
    pub async fn run(
        &mut self,
        mut price_rx: mpsc::Receiver<PriceUpdate>,
        mut order_rx: mpsc::UnboundedReceiver<crate::exchange::OrderUpdate>,
        mut candle_rx: mpsc::UnboundedReceiver<Candle>,
        cancel: CancellationToken,
    ) {
        info!(symbol = %self.config.symbol, "symbol task starting");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(symbol = %self.config.symbol, "symbol task cancelled, draining and persisting");
                    if self.config.cancel_on_exit {
                        if let Err(err) = self.exchange.cancel_all(&self.config.symbol).await {
                            error!(symbol = %self.config.symbol, %err, "cancel_on_exit: failed to cancel open orders");
                        }
                    }
                    self.persist_snapshot().await;
                    return;
                }
                Some(update) = order_rx.recv() => {
                    self.position_manager.lock().await.apply_order_update(update);
                }
                Some(candle) = candle_rx.recv() => {
                    self.risk_monitor.on_candle(&self.config.symbol, candle);
                }
                maybe_price = price_rx.recv() => {
                    match maybe_price {
                        Some(price) => self.on_price_update(price).await,
                        None => {
                            warn!(symbol = %self.config.symbol, "price channel closed, shutting down symbol task");
                            self.persist_snapshot().await;
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn on_price_update(&mut self, price: PriceUpdate) {
        if !self.initialized {
            match self.pending_position_reconstruction.take() {
                Some(position) => {
                    let mut pm = self.position_manager.lock().await;
                    pm.seed_filled_position(price.price, price.price, position.abs());
                }
                None => self.position_manager.lock().await.initialize(price.price),
            }
            self.initialized = true;
        }
        let symbol = self.config.symbol.clone();
        // `reference_price` (R) is the anchor, fixed at `initialize()` time —
        // only `current_price` (P) tracks the live tick (§4.2 Inputs).
        let pm_snapshot = self.position_manager.lock().await.snapshot();
        let inputs = StrategyInputs {
            current_price: price.price,
            reference_price: pm_snapshot.anchor_price,
            atr: self.risk_monitor.atr(&symbol),
            volatility_factor: self.risk_monitor.volatility_factor(&symbol),
            risk_triggered: self.risk_monitor.triggered(),
            regime: Regime::Ranging,
            inventory_units: pm_snapshot.inventory_units,
        };

        let actions = self.position_manager.lock().await.apply_price_update(inputs);
        if actions.is_empty() {
            return;
        }
        let results = self.executor.execute(actions).await;
        self.position_manager.lock().await.apply_action_results(results);
    }

    async fn persist_snapshot(&self) {
        let pm = self.position_manager.lock().await;
        let snapshot = pm.snapshot();
        let engine_snapshot = EngineSnapshot::from_slot_table(
            self.config.symbol.clone(),
            snapshot.anchor_price,
            snapshot.realized_pnl,
            snapshot.last_reconcile_at,
            pm.slots(),
            chrono::Utc::now(),
        );
        drop(pm);
        if let Err(err) = self.snapshot_store.save(&engine_snapshot).await {
            error!(symbol = %self.config.symbol, %err, "failed to persist snapshot on shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::test_support::MockExchange;
    use crate::persistence::test_support::InMemorySnapshotStore;
    use crate::types::GridMode;
    use rust_decimal_macros::dec;

    fn config() -> EngineConfig {
        EngineConfig {
            symbol: crate::types::Symbol::new("BTC-PERP"),
            price_interval: dec!(10),
            order_quantity: dec!(0.01),
            min_order_value: dec!(1),
            buy_window_size: 2,
            sell_window_size: 2,
            grid_mode: GridMode::Neutral,
            tick_size: dec!(1),
            fee_rate: Decimal::ZERO,
            cancel_on_exit: false,
            dynamic_interval: Default::default(),
            trend_follow: Default::default(),
            risk: Default::default(),
            reconcile_interval: std::time::Duration::from_secs(30),
            rate_limit_per_second: 25,
            rate_limit_burst: 30,
        }
    }

    #[tokio::test]
    async fn shutdown_persists_a_snapshot() {
        let exchange: Arc<dyn ExchangePort> = Arc::new(MockExchange::new());
        let store: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::default());
        let mut engine = SymbolEngine::new(config(), exchange, Arc::clone(&store));

        let (price_tx, price_rx, _order_tx, order_rx, _candle_tx, candle_rx) = SymbolEngine::channels();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        let handle = tokio::spawn(async move {
            engine.run(price_rx, order_rx, candle_rx, cancel_clone).await;
        });

        price_tx.send(PriceUpdate { price: dec!(50000), at: chrono::Utc::now() }).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();
        handle.await.unwrap();

        let loaded = store.load(&crate::types::Symbol::new("BTC-PERP")).await.unwrap();
        assert!(loaded.is_some());
    }

    #[tokio::test]
    async fn shutdown_with_cancel_on_exit_cancels_open_orders() {
        let mock = Arc::new(MockExchange::new());
        let exchange: Arc<dyn ExchangePort> = mock.clone();
        let store: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::default());
        let mut cfg = config();
        cfg.cancel_on_exit = true;
        let mut engine = SymbolEngine::new(cfg, exchange, Arc::clone(&store));

        let (price_tx, price_rx, _order_tx, order_rx, _candle_tx, candle_rx) = SymbolEngine::channels();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        let handle = tokio::spawn(async move {
            engine.run(price_rx, order_rx, candle_rx, cancel_clone).await;
        });

        price_tx.send(PriceUpdate { price: dec!(50000), at: chrono::Utc::now() }).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();
        handle.await.unwrap();

        let open = mock.get_open_orders(&crate::types::Symbol::new("BTC-PERP")).await.unwrap();
        assert!(open.is_empty());
    }

    #[tokio::test]
    async fn restore_reconstructs_filled_slot_from_exchange_position() {
        let mock = Arc::new(MockExchange::new());
        *mock.position.lock().await = dec!(30);
        let exchange: Arc<dyn ExchangePort> = mock;
        let store: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::default());
        let mut engine = SymbolEngine::new(config(), exchange, store);

        engine.restore().await;
        assert!(engine.pending_position_reconstruction.is_some());

        engine.on_price_update(PriceUpdate { price: dec!(50000), at: chrono::Utc::now() }).await;
        let snapshot = engine.position_manager.lock().await.snapshot();
        assert_eq!(snapshot.inventory_units, dec!(30));
        assert!(engine.initialized);
    }

    #[tokio::test]
    async fn restore_loads_a_persisted_snapshot() {
        let exchange: Arc<dyn ExchangePort> = Arc::new(MockExchange::new());
        let store: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::default());
        let symbol = crate::types::Symbol::new("BTC-PERP");
        store
            .save(&EngineSnapshot::from_slot_table(
                symbol.clone(),
                dec!(50000),
                dec!(1.5),
                None,
                &crate::slot_table::SlotTable::new(),
                chrono::Utc::now(),
            ))
            .await
            .unwrap();

        let mut engine = SymbolEngine::new(config(), exchange, store);
        engine.restore().await;

        assert!(engine.initialized);
        assert_eq!(engine.position_manager.lock().await.snapshot().realized_pnl, dec!(1.5));
    }
}
