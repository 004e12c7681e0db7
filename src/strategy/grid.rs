//! The grid strategy as a pure function (spec §4.2).
//!
//! `compute_actions` never touches the network or the Slot Table directly —
//! it takes an immutable snapshot and parameters in, and returns an ordered
//! action list out. All state mutation happens afterwards, in the Position
//! Manager.

use rust_decimal::Decimal;

use crate::core::ids::{client_oid, quantize_price};
use crate::core::slot::{PositionStatus, SlotStatus};
use crate::slot_table::SlotTable;
use crate::types::{GridMode, Regime, Side, Symbol};

use super::config::GridParams;
use super::OrderAction;

/// Market and risk context the strategy reacts to on every price update.
#[derive(Debug, Clone, Copy)]
pub struct StrategyInputs {
    pub current_price: Decimal,
    pub reference_price: Decimal,
    pub atr: Decimal,
    pub volatility_factor: f64,
    pub risk_triggered: bool,
    pub regime: Regime,
    /// Net inventory in base units, signed; positive = net long.
    pub inventory_units: Decimal,
}

/// Compute the effective grid spacing for this tick (§4.2 step 1).
pub fn effective_interval(params: &GridParams, inputs: &StrategyInputs) -> Decimal {
    match params.dynamic_interval_alpha {
        Some(alpha) => (params.price_interval).max(alpha * inputs.atr),
        None => params.price_interval,
    }
}

/// Compute the skewed reference price (§4.2 step 2).
fn skewed_reference(params: &GridParams, inputs: &StrategyInputs) -> Decimal {
    match params.trend_follow_skew {
        Some(s) => inputs.reference_price * (Decimal::ONE - s * inputs.inventory_units),
        None => inputs.reference_price,
    }
}

/// The pure grid decision function (§4.2).
///
/// `generation_of` supplies the current generation counter for a quantized
/// price so client_oids stay idempotent across calls within the same tick
/// and unique across cancel/replace cycles; callers pass the Slot Table's
/// own counters (a slot not yet seen reads as generation 0, so the first
/// reservation for it mints generation 1 via `slot.reserve`).
pub fn compute_actions(
    symbol: &Symbol,
    params: &GridParams,
    inputs: &StrategyInputs,
    slots: &SlotTable,
    generation_of: impl Fn(Decimal) -> u64,
) -> Vec<OrderAction> {
    let interval = effective_interval(params, inputs);
    if interval.is_zero() {
        return Vec::new();
    }
    let reference = skewed_reference(params, inputs);
    let anchor = quantize_price(reference, params.tick_size);

    let mut cancels = Vec::new();
    let mut places = Vec::new();

    if inputs.risk_triggered {
        // Step 7: cancel-only mode cancels every LOCKED slot outright, not
        // just the ones currently outside the window.
        for (price, slot) in slots.iter() {
            if slot.slot_status != SlotStatus::Locked || slot.cancel_requested {
                continue;
            }
            cancels.push(OrderAction::Cancel {
                symbol: symbol.clone(),
                price: *price,
                order_id: slot.order_id,
                client_oid: slot.client_oid.clone(),
            });
        }
        cancels.sort_by_key(|a| (a.price() - inputs.current_price).abs());
        return cancels;
    }

    // Window bounds for the CANCEL-outside-window rule (step 6).
    let lowest_buy = anchor - interval * Decimal::from(params.buy_window_size.max(1));
    let highest_sell = anchor + interval * Decimal::from(params.sell_window_size.max(1));

    for (price, slot) in slots.iter() {
        if slot.slot_status != SlotStatus::Locked || slot.cancel_requested {
            continue;
        }
        if *price < lowest_buy || *price > highest_sell {
            cancels.push(OrderAction::Cancel {
                symbol: symbol.clone(),
                price: *price,
                order_id: slot.order_id,
                client_oid: slot.client_oid.clone(),
            });
        }
    }

    // Step 3 + 4: buy levels below the reference, placed where FREE.
    if params.grid_mode == GridMode::Long || params.grid_mode == GridMode::Neutral {
        for k in 1..=params.buy_window_size {
            let level = quantize_price(anchor - interval * Decimal::from(k), params.tick_size);
            if !params.meets_min_order_value(level) {
                continue;
            }
            let is_free = slots.get(&level).map(|s| s.is_free()).unwrap_or(true);
            if !is_free {
                continue;
            }
            let generation = generation_of(level) + 1;
            places.push(OrderAction::Place {
                symbol: symbol.clone(),
                side: Side::Buy,
                price: level,
                quantity: params.order_quantity,
                reduce_only: false,
                client_oid: client_oid(symbol, Side::Buy, level, generation),
            });
        }
    }

    // Step 3: in NEUTRAL mode the grid is two-sided from the start — sell
    // levels above the reference open short exposure directly, the same
    // way buy levels open long exposure. LONG mode never opens a short; its
    // only sells are the reduce-only counter-levels from step 5 below.
    if params.grid_mode == GridMode::Neutral {
        for k in 1..=params.sell_window_size {
            let level = quantize_price(anchor + interval * Decimal::from(k), params.tick_size);
            if !params.meets_min_order_value(level) {
                continue;
            }
            let is_free = slots.get(&level).map(|s| s.is_free()).unwrap_or(true);
            if !is_free {
                continue;
            }
            let generation = generation_of(level) + 1;
            places.push(OrderAction::Place {
                symbol: symbol.clone(),
                side: Side::Sell,
                price: level,
                quantity: params.order_quantity,
                reduce_only: false,
                client_oid: client_oid(symbol, Side::Sell, level, generation),
            });
        }
    }

    // Step 5: sell counter-level for every FILLED slot not yet LOCKED there.
    for (price, slot) in slots.iter() {
        if slot.position_status != PositionStatus::Filled {
            continue;
        }
        let sell_level = quantize_price(*price + interval, params.tick_size);
        let counter_locked = slots.get(&sell_level).map(|s| s.is_locked()).unwrap_or(false);
        if counter_locked {
            continue;
        }
        let generation = generation_of(sell_level) + 1;
        places.push(OrderAction::Place {
            symbol: symbol.clone(),
            side: Side::Sell,
            price: sell_level,
            quantity: slot.position_qty,
            reduce_only: true,
            client_oid: client_oid(symbol, Side::Sell, sell_level, generation),
        });
    }

    // Step 8: cancels first, then places sorted nearest-to-price first.
    cancels.sort_by_key(|a| (a.price() - inputs.current_price).abs());
    places.sort_by_key(|a| (a.price() - inputs.current_price).abs());

    cancels.into_iter().chain(places).collect()
}
