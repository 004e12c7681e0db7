//! Grid strategy (spec §4.2): a pure function from market state + slot
//! snapshot to an ordered list of order actions.

pub mod config;
pub mod grid;

pub use config::GridParams;
pub use grid::{compute_actions, effective_interval, StrategyInputs};

use rust_decimal::Decimal;

use crate::types::{Side, Symbol};

/// One strategy decision. The Position Manager forwards these to the
/// Executor verbatim and applies the results back onto the Slot Table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderAction {
    Place {
        symbol: Symbol,
        side: Side,
        price: Decimal,
        quantity: Decimal,
        reduce_only: bool,
        client_oid: String,
    },
    Cancel {
        symbol: Symbol,
        price: Decimal,
        order_id: u64,
        client_oid: String,
    },
}

impl OrderAction {
    pub fn price(&self) -> Decimal {
        match self {
            OrderAction::Place { price, .. } => *price,
            OrderAction::Cancel { price, .. } => *price,
        }
    }
}
