//! The Slot state machine (spec §3, §4.1).
//!
//! A [`Slot`] is the state record for one grid level. Exactly one exists per
//! active quantized price; the [`crate::slot_table::SlotTable`] is its sole
//! owner and the only writer.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SlotStatus {
    #[default]
    Free,
    Pending,
    /// Locked, with `CANCEL_REQUESTED` tracked as a sub-status via
    /// [`Slot::cancel_requested`] rather than a separate enum variant — the
    /// exchange still holds (or is assumed to hold) an open order either way.
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OrderStatus {
    #[default]
    None,
    Placed,
    Confirmed,
    PartiallyFilled,
    CancelRequested,
    Canceled,
    Filled,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PositionStatus {
    #[default]
    Empty,
    Filled,
}

/// The state record for one grid level, keyed externally by quantized price.
#[derive(Debug, Clone)]
pub struct Slot {
    pub price: Decimal,
    pub slot_status: SlotStatus,
    pub order_side: Option<Side>,
    pub order_status: OrderStatus,
    pub position_status: PositionStatus,
    pub original_qty: Decimal,
    pub position_qty: Decimal,
    pub order_filled_qty: Decimal,
    pub order_id: u64,
    pub client_oid: String,
    /// May differ from `price` during transient rounding (§3).
    pub order_price: Decimal,
    /// Bumped on every PLACE reservation at this level, so a cancel/replace
    /// within the same tick never reuses a client_oid (§4.2 "Idempotency").
    pub generation: u64,
    pub cancel_requested: bool,
}

/// Raised when a caller attempts a transition the state machine forbids.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    #[error("slot at {price} is not FREE (status={status:?})")]
    NotFree { price: Decimal, status: SlotStatus },
    #[error("slot at {price} is not PENDING (status={status:?})")]
    NotPending { price: Decimal, status: SlotStatus },
    #[error("slot at {price} is not LOCKED (status={status:?})")]
    NotLocked { price: Decimal, status: SlotStatus },
}

impl Slot {
    /// A brand-new, unvisited grid level (§3 "Lifecycle").
    pub fn new_free(price: Decimal) -> Self {
        Self {
            price,
            slot_status: SlotStatus::Free,
            order_side: None,
            order_status: OrderStatus::None,
            position_status: PositionStatus::Empty,
            original_qty: Decimal::ZERO,
            position_qty: Decimal::ZERO,
            order_filled_qty: Decimal::ZERO,
            order_id: 0,
            client_oid: String::new(),
            order_price: price,
            generation: 0,
            cancel_requested: false,
        }
    }

    /// FREE → PENDING: the Strategy emitted a PLACE for this level, before
    /// any exchange call has happened.
    pub fn reserve(
        &mut self,
        side: Side,
        qty: Decimal,
        order_price: Decimal,
        client_oid: String,
    ) -> Result<(), SlotError> {
        if self.slot_status != SlotStatus::Free {
            return Err(SlotError::NotFree { price: self.price, status: self.slot_status });
        }
        self.generation += 1;
        self.slot_status = SlotStatus::Pending;
        self.order_side = Some(side);
        self.original_qty = qty;
        self.order_price = order_price;
        self.client_oid = client_oid;
        self.order_status = OrderStatus::None;
        self.cancel_requested = false;
        Ok(())
    }

    /// PENDING → LOCKED: the executor successfully placed the order.
    pub fn confirm_locked(&mut self, order_id: u64) -> Result<(), SlotError> {
        if self.slot_status != SlotStatus::Pending {
            return Err(SlotError::NotPending { price: self.price, status: self.slot_status });
        }
        self.slot_status = SlotStatus::Locked;
        self.order_id = order_id;
        self.order_status = OrderStatus::Placed;
        Ok(())
    }

    /// PENDING → FREE: the executor reported a non-retriable placement
    /// failure.
    pub fn reject(&mut self) -> Result<(), SlotError> {
        if self.slot_status != SlotStatus::Pending {
            return Err(SlotError::NotPending { price: self.price, status: self.slot_status });
        }
        self.clear_order_identity();
        self.slot_status = SlotStatus::Free;
        self.order_status = OrderStatus::Rejected;
        Ok(())
    }

    /// LOCKED: record a NEW or PARTIALLY_FILLED update without changing
    /// slot status.
    pub fn apply_partial_fill(&mut self, filled_qty: Decimal) -> Result<(), SlotError> {
        if self.slot_status != SlotStatus::Locked {
            return Err(SlotError::NotLocked { price: self.price, status: self.slot_status });
        }
        self.order_filled_qty = filled_qty;
        self.order_status = OrderStatus::PartiallyFilled;
        Ok(())
    }

    /// LOCKED (buy) → FREE, with the slot becoming a FILLED position
    /// candidate for the matching sell.
    pub fn apply_buy_fill(&mut self, filled_qty: Decimal) -> Result<(), SlotError> {
        if self.slot_status != SlotStatus::Locked || self.order_side != Some(Side::Buy) {
            return Err(SlotError::NotLocked { price: self.price, status: self.slot_status });
        }
        self.position_qty = filled_qty;
        self.position_status = PositionStatus::Filled;
        self.order_filled_qty = filled_qty;
        self.order_status = OrderStatus::Filled;
        self.clear_order_identity();
        self.slot_status = SlotStatus::Free;
        Ok(())
    }

    /// LOCKED (sell) → FREE, position returns to EMPTY. Returns the closed
    /// quantity and the entry price the caller should use for realized PnL
    /// (the slot's own `order_price`, which is the buy price for this
    /// level under the spec's single-level round-trip model).
    pub fn apply_sell_fill(&mut self, filled_qty: Decimal) -> Result<Decimal, SlotError> {
        if self.slot_status != SlotStatus::Locked || self.order_side != Some(Side::Sell) {
            return Err(SlotError::NotLocked { price: self.price, status: self.slot_status });
        }
        self.order_filled_qty = filled_qty;
        self.order_status = OrderStatus::Filled;
        self.position_status = PositionStatus::Empty;
        let closed_qty = self.position_qty;
        self.position_qty = Decimal::ZERO;
        self.clear_order_identity();
        self.slot_status = SlotStatus::Free;
        Ok(closed_qty)
    }

    /// LOCKED → CANCEL_REQUESTED sub-status.
    pub fn request_cancel(&mut self) -> Result<(), SlotError> {
        if self.slot_status != SlotStatus::Locked {
            return Err(SlotError::NotLocked { price: self.price, status: self.slot_status });
        }
        self.cancel_requested = true;
        self.order_status = OrderStatus::CancelRequested;
        Ok(())
    }

    /// CANCEL_REQUESTED → FREE on CANCELED / EXPIRED / not-found.
    pub fn apply_cancel_confirmed(&mut self) -> Result<(), SlotError> {
        if self.slot_status != SlotStatus::Locked || !self.cancel_requested {
            return Err(SlotError::NotLocked { price: self.price, status: self.slot_status });
        }
        self.clear_order_identity();
        self.slot_status = SlotStatus::Free;
        self.order_status = OrderStatus::Canceled;
        Ok(())
    }

    /// Force the slot back to FREE from any LOCKED/PENDING state, used by
    /// the reconciler's zombie-reset rule (§4.5).
    pub fn force_free(&mut self) {
        self.clear_order_identity();
        self.slot_status = SlotStatus::Free;
        self.order_status = OrderStatus::None;
        self.position_status = PositionStatus::Empty;
        self.position_qty = Decimal::ZERO;
    }

    /// Reconciler ghost-fill adoption: mark a LOCKED buy slot FILLED without
    /// having observed the fill event directly (§4.3, §4.5).
    pub fn adopt_ghost_fill(&mut self, qty: Decimal) {
        self.position_qty = qty;
        self.position_status = PositionStatus::Filled;
        self.order_filled_qty = qty;
        self.order_status = OrderStatus::Filled;
        self.clear_order_identity();
        self.slot_status = SlotStatus::Free;
    }

    /// Reconciler overwrite when a local slot now matches an exchange order
    /// at the same price (§4.5 step 3, first bullet).
    pub fn overwrite_from_exchange(
        &mut self,
        order_id: u64,
        client_oid: String,
        side: Side,
        order_status: OrderStatus,
        filled_qty: Decimal,
    ) {
        self.slot_status = SlotStatus::Locked;
        self.order_id = order_id;
        self.client_oid = client_oid;
        self.order_side = Some(side);
        self.order_status = order_status;
        self.order_filled_qty = filled_qty;
        self.cancel_requested = false;
    }

    fn clear_order_identity(&mut self) {
        self.order_id = 0;
        self.client_oid = String::new();
        self.order_side = None;
        self.cancel_requested = false;
    }

    /// Invariant #2: `FREE ⇒ order_id=0 ∧ client_oid="" ∧ order_status=NONE`.
    pub fn free_invariant_holds(&self) -> bool {
        if self.slot_status != SlotStatus::Free {
            return true;
        }
        self.order_id == 0 && self.client_oid.is_empty()
    }

    /// Invariant #3: `position_status=FILLED ⇒ position_qty > 0`.
    pub fn position_invariant_holds(&self) -> bool {
        if self.position_status != PositionStatus::Filled {
            return true;
        }
        self.position_qty > Decimal::ZERO
    }

    pub fn is_free(&self) -> bool {
        self.slot_status == SlotStatus::Free
    }

    pub fn is_locked(&self) -> bool {
        self.slot_status == SlotStatus::Locked
    }

    pub fn is_filled_position(&self) -> bool {
        self.position_status == PositionStatus::Filled
    }
}
