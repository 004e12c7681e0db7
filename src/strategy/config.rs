//! Grid strategy parameters (spec §4.2 "Parameters").

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::GridMode;

/// Tunable parameters for [`super::grid::compute_actions`]. Immutable for
/// the lifetime of one engine run; changing them requires a restart so the
/// Slot Table's existing client_oids remain derivable from a single,
/// unambiguous parameter set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridParams {
    /// Base spacing between adjacent grid levels.
    pub price_interval: Decimal,
    /// Number of buy levels below the (skewed) reference price.
    pub buy_window_size: u32,
    /// Number of sell levels above the (skewed) reference price.
    pub sell_window_size: u32,
    /// Minimum notional (price * quantity) an exchange will accept.
    pub min_order_value: Decimal,
    /// Fixed order quantity per grid level.
    pub order_quantity: Decimal,
    /// Price tick size, used to quantize every computed level.
    pub tick_size: Decimal,
    pub grid_mode: GridMode,

    /// ATR multiplier for the dynamic-interval rule (§4.2 step 1). `None`
    /// disables dynamic widening and pins `I_eff = price_interval`.
    #[serde(default)]
    pub dynamic_interval_alpha: Option<Decimal>,

    /// Trend-follow skew factor `s` applied to the reference price against
    /// accumulated inventory (§4.2 step 2). `None` disables skewing.
    #[serde(default)]
    pub trend_follow_skew: Option<Decimal>,

    /// Taker/maker fee rate charged per fill, as a fraction of notional
    /// (e.g. `0.0004` = 4bps). Subtracted twice per round trip (once per
    /// side) when computing realized PnL and the startup profitability
    /// check (§4.3 "Inventory & PnL").
    #[serde(default)]
    pub fee_rate: Decimal,
}

impl GridParams {
    /// Notional value of one order at this price (before the exchange's
    /// own minimum-order-value check).
    pub fn order_notional(&self, price: Decimal) -> Decimal {
        price * self.order_quantity
    }

    pub fn meets_min_order_value(&self, price: Decimal) -> bool {
        self.order_notional(price) >= self.min_order_value
    }

    /// Fee in quote currency charged on one fill at `price` for one grid
    /// level's `order_quantity`.
    pub fn fee_at(&self, price: Decimal) -> Decimal {
        self.order_notional(price) * self.fee_rate
    }

    /// Net profit implied by one buy-then-sell round trip between adjacent
    /// grid levels spaced `price_interval` apart, after both sides' fees —
    /// the predicate an embedding CLI checks at startup to refuse a config
    /// with a negative (fee-eaten) edge per round trip.
    pub fn implied_profit_per_round_trip(&self, reference_price: Decimal) -> Decimal {
        let buy_price = reference_price - self.price_interval;
        let sell_price = reference_price;
        let gross = (sell_price - buy_price) * self.order_quantity;
        gross - self.fee_at(buy_price) - self.fee_at(sell_price)
    }
}
