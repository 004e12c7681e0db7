//! Slot state machine and identity helpers (spec §3 DATA MODEL, §4.1).

pub mod ids;
pub mod slot;

pub use ids::{client_oid, quantize_price};
pub use slot::{OrderStatus, PositionStatus, Slot, SlotError, SlotStatus};
