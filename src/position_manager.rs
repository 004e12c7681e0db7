//! Position Manager (spec §4.3): the single writer to one symbol's Slot
//! Table. Owns the Slot Table and the buy→sell pairing needed to compute
//! realized PnL when a sell level (a *different* grid level than the buy it
//! closes) reports FILLED.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::core::ids::quantize_price;
use crate::core::slot::{PositionStatus, SlotStatus};
use crate::errors::CoreError;
use crate::exchange::{ExchangeOrder, ExchangeOrderState, OrderUpdate};
use crate::slot_table::SlotTable;
use crate::strategy::{compute_actions, GridParams, OrderAction, StrategyInputs};
use crate::types::{Side, Symbol};

/// Immutable view handed to readers (risk monitor logs, operator surfaces,
/// the persistence snapshot) without exposing the live Slot Table.
#[derive(Debug, Clone)]
pub struct PositionSnapshot {
    pub symbol: Symbol,
    pub anchor_price: Decimal,
    pub inventory_units: Decimal,
    pub realized_pnl: Decimal,
    pub open_slot_count: usize,
    pub last_reconcile_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Single writer for one symbol's Slot Table (§4.1 "single-writer").
pub struct PositionManager {
    symbol: Symbol,
    params: GridParams,
    slots: SlotTable,
    anchor_price: Decimal,
    realized_pnl: Decimal,
    last_reconcile_at: Option<chrono::DateTime<chrono::Utc>>,
    /// sell price → buy price it is expected to close, recorded when the
    /// sell PLACE is reserved (§4.2 step 5 links two distinct slots).
    closing_pairs: HashMap<Decimal, Decimal>,
    /// Per-price generation counters, read by the strategy to mint
    /// idempotent client_oids (§4.2 "Idempotency").
    generations: HashMap<Decimal, u64>,
}

impl PositionManager {
    pub fn new(symbol: Symbol, params: GridParams) -> Self {
        Self {
            symbol,
            params,
            slots: SlotTable::new(),
            anchor_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            last_reconcile_at: None,
            closing_pairs: HashMap::new(),
            generations: HashMap::new(),
        }
    }

    /// `initialize(anchor_price)` — create an empty Slot Table (§4.3).
    pub fn initialize(&mut self, anchor_price: Decimal) {
        self.anchor_price = anchor_price;
        self.slots = SlotTable::new();
        self.closing_pairs.clear();
        self.generations.clear();
        info!(symbol = %self.symbol, %anchor_price, "position manager initialized");
    }

    /// `apply_price_update(price_change)` — invoke the Strategy and reserve
    /// the resulting PLACE actions as PENDING before any exchange call, per
    /// the FREE→PENDING transition in §4.1. Returns the action list for the
    /// Order Executor; the engine calls `apply_action_results` once the
    /// executor has attempted them.
    pub fn apply_price_update(&mut self, inputs: StrategyInputs) -> Vec<OrderAction> {
        let generations = &self.generations;
        let actions = compute_actions(&self.symbol, &self.params, &inputs, &self.slots, |price| {
            *generations.get(&price).unwrap_or(&0)
        });

        for action in &actions {
            match action {
                OrderAction::Place { side, price, quantity, client_oid, reduce_only, .. } => {
                    let gen = self.generations.entry(*price).or_insert(0);
                    *gen += 1;
                    let slot = self.slots.get_or_create_free(*price);
                    if let Err(err) = slot.reserve(*side, *quantity, *price, client_oid.clone()) {
                        warn!(symbol = %self.symbol, %price, %err, "strategy emitted PLACE for a non-FREE slot, dropping");
                        continue;
                    }
                    if *side == Side::Sell && *reduce_only {
                        if let Some(buy_price) = self.nearest_filled_buy_below(*price) {
                            self.closing_pairs.insert(*price, buy_price);
                        }
                    }
                }
                OrderAction::Cancel { price, .. } => {
                    if let Some(slot) = self.slots.get_mut(price) {
                        if slot.is_locked() {
                            let _ = slot.request_cancel();
                        }
                    }
                }
            }
        }

        // Grid-level eviction (§3): a FREE slot holding no position is
        // dropped once it falls outside this tick's window, so the table
        // doesn't grow unbounded as the anchor-relative window drifts.
        let interval = crate::strategy::effective_interval(&self.params, &inputs);
        if !interval.is_zero() {
            let lowest = inputs.reference_price - interval * Decimal::from(self.params.buy_window_size.max(1));
            let highest = inputs.reference_price + interval * Decimal::from(self.params.sell_window_size.max(1));
            self.slots.prune_empty_free_slots(|price| *price >= lowest && *price <= highest);
        }

        actions
    }

    fn nearest_filled_buy_below(&self, sell_price: Decimal) -> Option<Decimal> {
        self.slots
            .iter()
            .filter(|(price, slot)| **price < sell_price && slot.position_status == PositionStatus::Filled)
            .max_by_key(|(price, _)| **price)
            .map(|(price, _)| *price)
    }

    /// `apply_order_update(order_update)` — advance the state machine for
    /// the slot matching `order_id`/`client_oid`, or run ghost-fill
    /// adoption if no slot matches (§4.3 "Ghost-fill adoption").
    pub fn apply_order_update(&mut self, update: OrderUpdate) {
        let price = self
            .slots
            .by_order_id(update.order_id)
            .map(|s| s.price)
            .or_else(|| self.slots.by_client_oid(&update.client_order_id).map(|s| s.price));

        let Some(price) = price else {
            self.adopt_ghost_fill_if_warranted(&update);
            return;
        };

        match update.state {
            ExchangeOrderState::New => {
                self.slots.index_locked(price, update.order_id, &update.client_order_id);
            }
            ExchangeOrderState::PartiallyFilled => {
                if let Some(slot) = self.slots.get_mut(&price) {
                    let _ = slot.apply_partial_fill(update.filled_quantity);
                }
            }
            ExchangeOrderState::Filled => self.apply_fill_at(price, update.filled_quantity),
            ExchangeOrderState::Canceled | ExchangeOrderState::Expired => {
                let (order_id, client_oid) = self
                    .slots
                    .get(&price)
                    .map(|s| (s.order_id, s.client_oid.clone()))
                    .unwrap_or_default();
                if let Some(slot) = self.slots.get_mut(&price) {
                    let _ = slot.apply_cancel_confirmed().or_else(|_| {
                        slot.force_free();
                        Ok::<(), crate::core::slot::SlotError>(())
                    });
                }
                self.slots.deindex(order_id, &client_oid);
            }
            ExchangeOrderState::Rejected => {
                if let Some(slot) = self.slots.get_mut(&price) {
                    slot.force_free();
                }
            }
        }
    }

    fn apply_fill_at(&mut self, price: Decimal, filled_qty: Decimal) {
        let side = self.slots.get(&price).and_then(|s| s.order_side);
        let (order_id, client_oid) = self
            .slots
            .get(&price)
            .map(|s| (s.order_id, s.client_oid.clone()))
            .unwrap_or_default();

        match side {
            Some(Side::Buy) => {
                if let Some(slot) = self.slots.get_mut(&price) {
                    if slot.apply_buy_fill(filled_qty).is_ok() {
                        debug!(symbol = %self.symbol, %price, %filled_qty, "buy slot filled");
                    }
                }
                self.slots.deindex(order_id, &client_oid);
            }
            Some(Side::Sell) => {
                let closed_qty = self
                    .slots
                    .get_mut(&price)
                    .and_then(|slot| slot.apply_sell_fill(filled_qty).ok());
                self.slots.deindex(order_id, &client_oid);
                if let Some(closed_qty) = closed_qty {
                    if let Some(buy_price) = self.closing_pairs.remove(&price) {
                        let fees = (buy_price + price) * closed_qty * self.params.fee_rate;
                        let pnl = (price - buy_price) * closed_qty - fees;
                        self.realized_pnl += pnl;
                        if let Some(buy_slot) = self.slots.get_mut(&buy_price) {
                            buy_slot.force_free();
                        }
                        info!(symbol = %self.symbol, %buy_price, sell_price = %price, %pnl, "round trip closed");
                    }
                }
            }
            None => {}
        }
    }

    /// Ghost-fill adoption for an order update with no matching slot
    /// (§4.3). Conservative: without an authoritative exchange-position
    /// comparison at this call site, adopt only when the update itself is
    /// a terminal FILLED — partial/intermediate states for an unknown order
    /// are logged and otherwise ignored, to be resolved by the next
    /// reconcile cycle instead of guessed at here.
    fn adopt_ghost_fill_if_warranted(&mut self, update: &OrderUpdate) {
        if update.state != ExchangeOrderState::Filled {
            warn!(symbol = %self.symbol, order_id = update.order_id, "order update for unknown slot, awaiting reconcile");
            return;
        }
        let price = update.fill_price.unwrap_or(self.anchor_price);
        let quantized = quantize_price(price, self.params.tick_size);
        let slot = self.slots.get_or_create_free(quantized);
        slot.adopt_ghost_fill(update.filled_quantity);
        warn!(symbol = %self.symbol, price = %quantized, qty = %update.filled_quantity, "ghost fill adopted");
    }

    /// `apply_action_results(results)` — atomic batch mutation from the
    /// Executor's outcomes. Partial failures leave their slots FREE (§4.3).
    pub fn apply_action_results(&mut self, results: Vec<(OrderAction, Result<ExchangeOrder, CoreError>)>) {
        for (action, result) in results {
            match (action, result) {
                (OrderAction::Place { price, .. }, Ok(order)) => {
                    if let Some(slot) = self.slots.get_mut(&price) {
                        if slot.confirm_locked(order.order_id).is_ok() {
                            self.slots.index_locked(price, order.order_id, &order.client_order_id);
                        }
                    }
                }
                (OrderAction::Place { price, .. }, Err(err)) => {
                    if let Some(slot) = self.slots.get_mut(&price) {
                        let _ = slot.reject();
                    }
                    self.closing_pairs.remove(&price);
                    warn!(symbol = %self.symbol, %price, %err, "place failed, slot returned to FREE");
                }
                (OrderAction::Cancel { price, .. }, Ok(_)) => {
                    if let Some(slot) = self.slots.get_mut(&price) {
                        let _ = slot.apply_cancel_confirmed();
                    }
                }
                (OrderAction::Cancel { price, order_id, client_oid, .. }, Err(err)) => {
                    // Already filled or not-found: the exchange has already
                    // resolved this order one way or the other, so treat as
                    // terminal rather than re-attempting the cancel.
                    if let Some(slot) = self.slots.get_mut(&price) {
                        slot.force_free();
                    }
                    self.slots.deindex(order_id, &client_oid);
                    debug!(symbol = %self.symbol, %price, %err, "cancel resolved terminally");
                }
            }
        }
    }

    /// `force_sync(exchange_position)` — the Reconciler's entry point
    /// (§4.5). Takes the exchange's current open orders and net position,
    /// reconciles every local slot against them.
    pub fn force_sync(&mut self, exchange_orders: &[ExchangeOrder], exchange_position: Decimal) {
        let by_price: HashMap<Decimal, &ExchangeOrder> = exchange_orders
            .iter()
            .map(|o| (quantize_price(o.price, self.params.tick_size), o))
            .collect();
        let mut matched_prices = std::collections::HashSet::new();

        let local_prices: Vec<Decimal> = self.slots.iter().map(|(p, _)| *p).collect();
        for price in local_prices {
            if let Some(order) = by_price.get(&price) {
                matched_prices.insert(price);
                let order_status = match order.state {
                    ExchangeOrderState::New => crate::core::slot::OrderStatus::Placed,
                    ExchangeOrderState::PartiallyFilled => crate::core::slot::OrderStatus::PartiallyFilled,
                    _ => crate::core::slot::OrderStatus::Placed,
                };
                if let Some(slot) = self.slots.get_mut(&price) {
                    slot.overwrite_from_exchange(order.order_id, order.client_order_id.clone(), order.side, order_status, order.filled_quantity);
                }
                continue;
            }

            let was_active = self.slots.get(&price).map(|s| s.is_locked() || s.slot_status == SlotStatus::Pending).unwrap_or(false);
            if !was_active {
                continue;
            }

            let local_filled = self.slots.total_filled_qty();
            let side = self.slots.get(&price).and_then(|s| s.order_side);
            match side {
                Some(Side::Buy) if exchange_position > local_filled => {
                    if let Some(slot) = self.slots.get_mut(&price) {
                        let original_qty = slot.original_qty;
                        slot.adopt_ghost_fill(original_qty);
                    }
                    info!(symbol = %self.symbol, %price, "ghost-fill adoption: buy slot marked FILLED during reconcile");
                }
                Some(Side::Sell) if exchange_position < local_filled => {
                    if let Some(slot) = self.slots.get_mut(&price) {
                        slot.force_free();
                    }
                    info!(symbol = %self.symbol, %price, "ghost-fill adoption: sell slot marked EMPTY during reconcile");
                }
                _ => {
                    if let Some(slot) = self.slots.get_mut(&price) {
                        slot.force_free();
                    }
                    warn!(symbol = %self.symbol, %price, "zombie slot reset to FREE during reconcile");
                }
            }
        }

        for (price, order) in &by_price {
            if !matched_prices.contains(price) {
                warn!(symbol = %self.symbol, price = %price, order_id = order.order_id, "unmatched exchange order, not auto-cancelling");
            }
        }

        self.slots.rebuild_indices();

        let recomputed = self.slots.total_filled_qty();
        if recomputed != exchange_position {
            error!(symbol = %self.symbol, local = %recomputed, exchange = %exchange_position, "CRITICAL: position drift after reconcile");
        }

        self.last_reconcile_at = Some(chrono::Utc::now());
    }

    pub fn snapshot(&self) -> PositionSnapshot {
        PositionSnapshot {
            symbol: self.symbol.clone(),
            anchor_price: self.anchor_price,
            inventory_units: self.slots.total_filled_qty(),
            realized_pnl: self.realized_pnl,
            open_slot_count: self.slots.len(),
            last_reconcile_at: self.last_reconcile_at,
        }
    }

    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut SlotTable {
        &mut self.slots
    }

    /// Restore state from a previously persisted snapshot (§9 "Persistence
    /// contract"), replacing whatever `initialize()` set up.
    pub fn restore_from_snapshot(&mut self, snapshot: &crate::persistence::EngineSnapshot) {
        self.anchor_price = snapshot.anchor_price;
        self.realized_pnl = snapshot.realized_pnl;
        self.last_reconcile_at = snapshot.last_reconcile_at;
        self.closing_pairs.clear();
        self.generations.clear();
        let mut slots = SlotTable::new();
        for s in &snapshot.slots {
            let slot = slots.get_or_create_free(s.price);
            slot.slot_status = s.slot_status;
            slot.order_status = s.order_status;
            slot.position_status = s.position_status;
            slot.position_qty = s.position_qty;
            slot.order_id = s.order_id;
            slot.client_oid = s.client_oid.clone();
            slot.generation = s.generation;
        }
        slots.rebuild_indices();
        self.slots = slots;
        info!(symbol = %self.symbol, anchor_price = %self.anchor_price, slot_count = self.slots.len(), "position manager restored from snapshot");
    }

    /// No snapshot was found but the exchange reports a non-zero net
    /// position (§9 "Load returns ... on 'empty' and non-zero exchange
    /// position, the Core reconstructs slots by treating the exchange net
    /// position as a single filled slot at entry price").
    pub fn seed_filled_position(&mut self, anchor_price: Decimal, entry_price: Decimal, qty: Decimal) {
        self.anchor_price = anchor_price;
        self.slots = SlotTable::new();
        self.closing_pairs.clear();
        self.generations.clear();
        let quantized = quantize_price(entry_price, self.params.tick_size);
        let slot = self.slots.get_or_create_free(quantized);
        slot.adopt_ghost_fill(qty);
        warn!(symbol = %self.symbol, entry_price = %quantized, %qty, "reconstructed single filled slot from exchange position, no prior snapshot");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GridMode, Regime};
    use rust_decimal_macros::dec;

    fn params() -> GridParams {
        GridParams {
            price_interval: dec!(10),
            buy_window_size: 2,
            sell_window_size: 2,
            min_order_value: dec!(1),
            order_quantity: dec!(0.01),
            tick_size: dec!(1),
            grid_mode: GridMode::Neutral,
            dynamic_interval_alpha: None,
            trend_follow_skew: None,
            fee_rate: Decimal::ZERO,
        }
    }

    fn base_inputs(price: Decimal) -> StrategyInputs {
        StrategyInputs {
            current_price: price,
            reference_price: price,
            atr: dec!(5),
            volatility_factor: 1.0,
            risk_triggered: false,
            regime: Regime::Ranging,
            inventory_units: Decimal::ZERO,
        }
    }

    #[test]
    fn price_update_reserves_slots_as_pending() {
        let mut pm = PositionManager::new(Symbol::new("BTC-PERP"), params());
        pm.initialize(dec!(50000));
        let actions = pm.apply_price_update(base_inputs(dec!(50000)));
        assert!(!actions.is_empty());
        for action in &actions {
            if let OrderAction::Place { price, .. } = action {
                assert_eq!(pm.slots().get(price).unwrap().slot_status, SlotStatus::Pending);
            }
        }
    }

    #[test]
    fn buy_then_sell_round_trip_realizes_pnl() {
        let mut pm = PositionManager::new(Symbol::new("BTC-PERP"), params());
        pm.initialize(dec!(50000));
        let actions = pm.apply_price_update(base_inputs(dec!(50000)));

        let buy_price = dec!(49990);
        pm.apply_action_results(vec![(
            actions.iter().find(|a| a.price() == buy_price).unwrap().clone(),
            Ok(ExchangeOrder {
                order_id: 1,
                client_order_id: "c1".into(),
                symbol: Symbol::new("BTC-PERP"),
                side: Side::Buy,
                price: buy_price,
                quantity: dec!(0.01),
                filled_quantity: Decimal::ZERO,
                state: ExchangeOrderState::New,
                updated_at: chrono::Utc::now(),
            }),
        )]);

        pm.apply_order_update(OrderUpdate {
            order_id: 1,
            client_order_id: "c1".into(),
            symbol: Symbol::new("BTC-PERP"),
            side: Side::Buy,
            state: ExchangeOrderState::Filled,
            filled_quantity: dec!(0.01),
            fill_price: Some(buy_price),
            updated_at: chrono::Utc::now(),
        });

        assert_eq!(pm.snapshot().inventory_units, dec!(0.01));

        let sell_actions = pm.apply_price_update(base_inputs(dec!(50000)));
        let sell_price = dec!(50000);
        let sell_action = sell_actions.iter().find(|a| matches!(a, OrderAction::Place { side: Side::Sell, .. })).unwrap().clone();
        assert_eq!(sell_action.price(), sell_price);

        pm.apply_action_results(vec![(
            sell_action,
            Ok(ExchangeOrder {
                order_id: 2,
                client_order_id: "c2".into(),
                symbol: Symbol::new("BTC-PERP"),
                side: Side::Sell,
                price: sell_price,
                quantity: dec!(0.01),
                filled_quantity: Decimal::ZERO,
                state: ExchangeOrderState::New,
                updated_at: chrono::Utc::now(),
            }),
        )]);

        pm.apply_order_update(OrderUpdate {
            order_id: 2,
            client_order_id: "c2".into(),
            symbol: Symbol::new("BTC-PERP"),
            side: Side::Sell,
            state: ExchangeOrderState::Filled,
            filled_quantity: dec!(0.01),
            fill_price: Some(sell_price),
            updated_at: chrono::Utc::now(),
        });

        let snapshot = pm.snapshot();
        assert_eq!(snapshot.inventory_units, Decimal::ZERO);
        assert_eq!(snapshot.realized_pnl, dec!(0.10)); // (50000-49990)*0.01
    }

    #[test]
    fn round_trip_pnl_nets_out_fees() {
        let mut fee_params = params();
        fee_params.fee_rate = dec!(0.001);
        let mut pm = PositionManager::new(Symbol::new("BTC-PERP"), fee_params);
        pm.initialize(dec!(50000));
        let actions = pm.apply_price_update(base_inputs(dec!(50000)));

        let buy_price = dec!(49990);
        pm.apply_action_results(vec![(
            actions.iter().find(|a| a.price() == buy_price).unwrap().clone(),
            Ok(ExchangeOrder {
                order_id: 1,
                client_order_id: "c1".into(),
                symbol: Symbol::new("BTC-PERP"),
                side: Side::Buy,
                price: buy_price,
                quantity: dec!(0.01),
                filled_quantity: Decimal::ZERO,
                state: ExchangeOrderState::New,
                updated_at: chrono::Utc::now(),
            }),
        )]);
        pm.apply_order_update(OrderUpdate {
            order_id: 1,
            client_order_id: "c1".into(),
            symbol: Symbol::new("BTC-PERP"),
            side: Side::Buy,
            state: ExchangeOrderState::Filled,
            filled_quantity: dec!(0.01),
            fill_price: Some(buy_price),
            updated_at: chrono::Utc::now(),
        });

        let sell_actions = pm.apply_price_update(base_inputs(dec!(50000)));
        let sell_price = dec!(50000);
        let sell_action = sell_actions.iter().find(|a| matches!(a, OrderAction::Place { side: Side::Sell, .. })).unwrap().clone();
        pm.apply_action_results(vec![(
            sell_action,
            Ok(ExchangeOrder {
                order_id: 2,
                client_order_id: "c2".into(),
                symbol: Symbol::new("BTC-PERP"),
                side: Side::Sell,
                price: sell_price,
                quantity: dec!(0.01),
                filled_quantity: Decimal::ZERO,
                state: ExchangeOrderState::New,
                updated_at: chrono::Utc::now(),
            }),
        )]);
        pm.apply_order_update(OrderUpdate {
            order_id: 2,
            client_order_id: "c2".into(),
            symbol: Symbol::new("BTC-PERP"),
            side: Side::Sell,
            state: ExchangeOrderState::Filled,
            filled_quantity: dec!(0.01),
            fill_price: Some(sell_price),
            updated_at: chrono::Utc::now(),
        });

        // gross (50000-49990)*0.01=0.10, fees (49990+50000)*0.01*0.001=0.9999
        let pnl = pm.snapshot().realized_pnl;
        assert_eq!(pnl, dec!(0.10) - (dec!(49990) + dec!(50000)) * dec!(0.01) * dec!(0.001));
        assert!(pnl < Decimal::ZERO);
    }

    #[test]
    fn failed_place_returns_slot_to_free() {
        let mut pm = PositionManager::new(Symbol::new("BTC-PERP"), params());
        pm.initialize(dec!(50000));
        let actions = pm.apply_price_update(base_inputs(dec!(50000)));
        let action = actions[0].clone();
        let price = action.price();

        pm.apply_action_results(vec![(
            action,
            Err(CoreError::BusinessFatal {
                kind: crate::errors::BusinessFatalKind::InsufficientMargin,
                message: "no margin".into(),
            }),
        )]);

        assert!(pm.slots().get(&price).unwrap().is_free());
    }

    #[test]
    fn force_sync_detects_ghost_fill() {
        let mut pm = PositionManager::new(Symbol::new("BTC-PERP"), params());
        pm.initialize(dec!(50000));
        let actions = pm.apply_price_update(base_inputs(dec!(50000)));
        let buy_price = dec!(49990);
        let action = actions.iter().find(|a| a.price() == buy_price).unwrap().clone();
        pm.apply_action_results(vec![(
            action,
            Ok(ExchangeOrder {
                order_id: 1,
                client_order_id: "c1".into(),
                symbol: Symbol::new("BTC-PERP"),
                side: Side::Buy,
                price: buy_price,
                quantity: dec!(0.01),
                filled_quantity: Decimal::ZERO,
                state: ExchangeOrderState::New,
                updated_at: chrono::Utc::now(),
            }),
        )]);

        // Exchange now shows no open orders and a non-zero net position:
        // the buy filled while we weren't watching.
        pm.force_sync(&[], dec!(0.01));
        assert_eq!(pm.snapshot().inventory_units, dec!(0.01));
    }
}
