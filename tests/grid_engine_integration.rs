//! End-to-end scenarios wiring the Strategy, Position Manager, Executor,
//! Reconciler and Risk Monitor together against the in-memory exchange
//! test double. Mirrors the literal scenarios used to validate the grid
//! engine's behavior.

use std::sync::Arc;

use grid_mm_core::exchange::test_support::MockExchange;
use grid_mm_core::exchange::{ExchangeOrder, ExchangeOrderState, ExchangePort};
use grid_mm_core::executor::{Executor, ExecutorConfig};
use grid_mm_core::position_manager::PositionManager;
use grid_mm_core::risk_monitor::{RiskMonitor, RiskMonitorConfig};
use grid_mm_core::strategy::{GridParams, OrderAction, StrategyInputs};
use grid_mm_core::types::{Candle, GridMode, Regime, Side, Symbol};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn grid_params() -> GridParams {
    GridParams {
        price_interval: dec!(10),
        buy_window_size: 3,
        sell_window_size: 3,
        min_order_value: dec!(1),
        order_quantity: dec!(30),
        tick_size: dec!(1),
        grid_mode: GridMode::Long,
        dynamic_interval_alpha: None,
        trend_follow_skew: None,
        fee_rate: Decimal::ZERO,
    }
}

fn base_inputs(price: Decimal, atr: Decimal) -> StrategyInputs {
    StrategyInputs {
        current_price: price,
        reference_price: price,
        atr,
        volatility_factor: 1.0,
        risk_triggered: false,
        regime: Regime::Ranging,
        inventory_units: Decimal::ZERO,
    }
}

/// Like `base_inputs`, but with `current_price` and `reference_price` (the
/// anchor) set independently — the anchor stays fixed at its initialized
/// value across ticks; only the live price moves.
fn inputs_with_anchor(current_price: Decimal, reference_price: Decimal, atr: Decimal) -> StrategyInputs {
    StrategyInputs {
        current_price,
        reference_price,
        atr,
        volatility_factor: 1.0,
        risk_triggered: false,
        regime: Regime::Ranging,
        inventory_units: Decimal::ZERO,
    }
}

fn candle(close: Decimal, volume: Decimal, closed: bool) -> Candle {
    Candle { open_time: chrono::Utc::now(), open: close, high: close, low: close, close, volume, closed }
}

/// Scenario: dynamic interval expands under a volatility spike. The anchor
/// stays fixed at its initialized value, so the new buy level lands exactly
/// where the literal scenario expects, and a stale LOCKED order far outside
/// the widened window gets cancelled while one still inside it is left alone.
#[test]
fn dynamic_interval_expands_and_cancels_out_of_window_orders() {
    let symbol = Symbol::new("BTC-PERP");
    let mut params = grid_params();
    params.dynamic_interval_alpha = Some(dec!(1));
    let mut pm = PositionManager::new(symbol.clone(), params);
    pm.initialize(dec!(50000));

    // Establish a LOCKED order at the narrow-interval level 49990.
    let actions = pm.apply_price_update(base_inputs(dec!(50000), dec!(5)));
    let narrow_buy = actions.iter().find(|a| a.price() == dec!(49990)).unwrap().clone();
    pm.apply_action_results(vec![(
        narrow_buy,
        Ok(ExchangeOrder {
            order_id: 1,
            client_order_id: "c1".into(),
            symbol: symbol.clone(),
            side: Side::Buy,
            price: dec!(49990),
            quantity: dec!(30),
            filled_quantity: Decimal::ZERO,
            state: ExchangeOrderState::New,
            updated_at: chrono::Utc::now(),
        }),
    )]);

    // A second LOCKED order sitting well outside any window the new,
    // wider interval could produce (§3: "evicted when far from the window").
    let slot = pm.slots_mut().get_or_create_free(dec!(49000));
    slot.reserve(Side::Buy, dec!(30), dec!(49000), "stale-oid".into()).unwrap();
    slot.confirm_locked(2).unwrap();

    // ATR jumps 5 -> 50: effective interval becomes 50. The anchor
    // (reference_price) stays fixed at the initialized 50000; only the
    // live price ticks to 50001.
    let wide_actions = pm.apply_price_update(inputs_with_anchor(dec!(50001), dec!(50000), dec!(50)));

    // 49990 is still within the widened window (anchor 50000 +/- 150) and
    // stays LOCKED; 49000 falls outside it and gets cancelled.
    assert!(!wide_actions.iter().any(|a| matches!(a, OrderAction::Cancel { price, .. } if *price == dec!(49990))));
    assert!(wide_actions.iter().any(|a| matches!(a, OrderAction::Cancel { price, .. } if *price == dec!(49000))));
    assert!(wide_actions.iter().any(|a| a.price() == dec!(49950)));
}

/// Scenario: a ghost fill is adopted during reconcile when the exchange
/// reports no open orders but a non-zero net position.
#[tokio::test]
async fn reconcile_adopts_ghost_fill() {
    let symbol = Symbol::new("BTC-PERP");
    let mut pm = PositionManager::new(symbol.clone(), grid_params());
    pm.initialize(dec!(50000));

    let actions = pm.apply_price_update(base_inputs(dec!(50000), dec!(5)));
    let buy_action = actions.iter().find(|a| a.price() == dec!(49990)).unwrap().clone();
    pm.apply_action_results(vec![(
        buy_action,
        Ok(ExchangeOrder {
            order_id: 42,
            client_order_id: "c1".into(),
            symbol: symbol.clone(),
            side: Side::Buy,
            price: dec!(49990),
            quantity: dec!(30),
            filled_quantity: Decimal::ZERO,
            state: ExchangeOrderState::New,
            updated_at: chrono::Utc::now(),
        }),
    )]);

    // Exchange now reports no open orders and position=+30: adopt as filled.
    pm.force_sync(&[], dec!(30));

    let snapshot = pm.snapshot();
    assert_eq!(snapshot.inventory_units, dec!(30));
}

/// Scenario: all monitored symbols trip the risk condition simultaneously,
/// the strategy switches to cancel-only until recovery.
#[test]
fn risk_trigger_forces_cancel_only_mode() {
    let symbol = Symbol::new("BTC-PERP");
    let mut pm = PositionManager::new(symbol.clone(), grid_params());
    pm.initialize(dec!(50000));

    let actions = pm.apply_price_update(base_inputs(dec!(50000), dec!(5)));
    assert!(actions.iter().any(|a| matches!(a, OrderAction::Place { .. })));
    for action in &actions {
        if let OrderAction::Place { price, side, .. } = action {
            pm.apply_action_results(vec![(
                action.clone(),
                Ok(ExchangeOrder {
                    order_id: (price.to_string().len() as u64) + 100,
                    client_order_id: format!("oid-{price}"),
                    symbol: symbol.clone(),
                    side: *side,
                    price: *price,
                    quantity: dec!(30),
                    filled_quantity: Decimal::ZERO,
                    state: ExchangeOrderState::New,
                    updated_at: chrono::Utc::now(),
                }),
            )]);
        }
    }

    let mut risk_monitor = RiskMonitor::new(
        RiskMonitorConfig { window: 5, volume_multiplier: dec!(2), recovery_threshold: 1 },
        [symbol.clone()],
    );
    for _ in 0..5 {
        risk_monitor.on_candle(&symbol, candle(dec!(100), dec!(10), true));
    }
    risk_monitor.on_candle(&symbol, candle(dec!(90), dec!(50), true));
    assert!(risk_monitor.triggered());

    let mut risky_inputs = base_inputs(dec!(50000), dec!(5));
    risky_inputs.risk_triggered = risk_monitor.triggered();
    let next_actions = pm.apply_price_update(risky_inputs);

    assert!(!next_actions.is_empty());
    assert!(next_actions.iter().all(|a| matches!(a, OrderAction::Cancel { .. })));
}

/// Scenario: a post-only PLACE is rejected and the executor degrades to a
/// standard GTC limit order exactly once before succeeding.
#[tokio::test]
async fn post_only_rejection_degrades_once_then_succeeds() {
    let exchange = Arc::new(PostOnlyRejectOnceExchange::default());
    let executor = Executor::new(exchange.clone(), ExecutorConfig::default());

    let action = OrderAction::Place {
        symbol: Symbol::new("BTC-PERP"),
        side: Side::Buy,
        price: dec!(49990),
        quantity: dec!(30),
        reduce_only: false,
        client_oid: "oid-1".into(),
    };

    let results = executor.execute(vec![action]).await;
    assert!(results[0].1.is_ok());
    assert_eq!(*exchange.attempts.lock().await, 2);
    assert!(!*exchange.last_post_only.lock().await);
}

/// A test double that rejects the first attempt with a post-only-specific
/// error and accepts the (degraded) retry.
#[derive(Default)]
struct PostOnlyRejectOnceExchange {
    inner: MockExchange,
    attempts: tokio::sync::Mutex<u32>,
    last_post_only: tokio::sync::Mutex<bool>,
}

#[async_trait::async_trait]
impl ExchangePort for PostOnlyRejectOnceExchange {
    async fn place_order(&self, req: grid_mm_core::exchange::OrderRequest) -> Result<ExchangeOrder, grid_mm_core::CoreError> {
        let mut attempts = self.attempts.lock().await;
        *attempts += 1;
        *self.last_post_only.lock().await = req.post_only;
        if *attempts == 1 {
            return Err(grid_mm_core::CoreError::BusinessFatal {
                kind: grid_mm_core::errors::BusinessFatalKind::InvalidSymbol,
                message: "post-only order would take liquidity".into(),
            });
        }
        self.inner.place_order(req).await
    }

    async fn batch_place_orders(&self, reqs: Vec<grid_mm_core::exchange::OrderRequest>) -> grid_mm_core::exchange::BatchPlaceResult {
        self.inner.batch_place_orders(reqs).await
    }

    async fn cancel_order(&self, symbol: &Symbol, order_id: u64) -> Result<(), grid_mm_core::CoreError> {
        self.inner.cancel_order(symbol, order_id).await
    }

    async fn batch_cancel(&self, symbol: &Symbol, order_ids: Vec<u64>) -> Vec<Result<(), grid_mm_core::CoreError>> {
        self.inner.batch_cancel(symbol, order_ids).await
    }

    async fn cancel_all(&self, symbol: &Symbol) -> Result<(), grid_mm_core::CoreError> {
        self.inner.cancel_all(symbol).await
    }

    async fn get_order(&self, symbol: &Symbol, order_id: u64) -> Result<ExchangeOrder, grid_mm_core::CoreError> {
        self.inner.get_order(symbol, order_id).await
    }

    async fn get_open_orders(&self, symbol: &Symbol) -> Result<Vec<ExchangeOrder>, grid_mm_core::CoreError> {
        self.inner.get_open_orders(symbol).await
    }

    async fn get_positions(&self, symbol: &Symbol) -> Result<Decimal, grid_mm_core::CoreError> {
        self.inner.get_positions(symbol).await
    }

    async fn get_account(&self) -> Result<grid_mm_core::exchange::AccountInfo, grid_mm_core::CoreError> {
        self.inner.get_account().await
    }

    async fn get_balance(&self, asset: &str) -> Result<grid_mm_core::exchange::Balance, grid_mm_core::CoreError> {
        self.inner.get_balance(asset).await
    }

    fn price_decimals(&self, symbol: &Symbol) -> u32 {
        self.inner.price_decimals(symbol)
    }

    fn quantity_decimals(&self, symbol: &Symbol) -> u32 {
        self.inner.quantity_decimals(symbol)
    }

    fn base_asset(&self, symbol: &Symbol) -> String {
        self.inner.base_asset(symbol)
    }

    fn quote_asset(&self, symbol: &Symbol) -> String {
        self.inner.quote_asset(symbol)
    }

    async fn get_symbol_info(&self, symbol: &Symbol) -> Result<grid_mm_core::exchange::SymbolInfo, grid_mm_core::CoreError> {
        self.inner.get_symbol_info(symbol).await
    }
}
