//! The price-keyed grid state, owned by a single [`crate::position_manager::PositionManager`]
//! per symbol (spec §3, §4.3 "Indexing").

use std::collections::BTreeMap;
use rust_decimal::Decimal;

use crate::core::slot::Slot;

/// All slots for one symbol, keyed by quantized price, plus the two
/// secondary indices the Position Manager and Reconciler rely on.
///
/// `BTreeMap` keeps slots price-ordered, which the Grid Strategy's
/// "nearest to current price first" emission rule (§4.2 step 8) and the
/// Reconciler's price-window scan both depend on.
#[derive(Debug, Default)]
pub struct SlotTable {
    by_price: BTreeMap<Decimal, Slot>,
    order_id_index: std::collections::HashMap<u64, Decimal>,
    client_oid_index: std::collections::HashMap<String, Decimal>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, price: &Decimal) -> Option<&Slot> {
        self.by_price.get(price)
    }

    pub fn get_mut(&mut self, price: &Decimal) -> Option<&mut Slot> {
        self.by_price.get_mut(price)
    }

    pub fn get_or_create_free(&mut self, price: Decimal) -> &mut Slot {
        self.by_price.entry(price).or_insert_with(|| Slot::new_free(price))
    }

    pub fn by_order_id(&self, order_id: u64) -> Option<&Slot> {
        self.order_id_index.get(&order_id).and_then(|p| self.by_price.get(p))
    }

    pub fn by_client_oid(&self, client_oid: &str) -> Option<&Slot> {
        self.client_oid_index.get(client_oid).and_then(|p| self.by_price.get(p))
    }

    /// Record `order_id`/`client_oid` → price in the secondary indices once
    /// a slot has been LOCKED by the Executor's place confirmation.
    pub fn index_locked(&mut self, price: Decimal, order_id: u64, client_oid: &str) {
        self.order_id_index.insert(order_id, price);
        self.client_oid_index.insert(client_oid.to_string(), price);
    }

    /// Drop a slot's secondary-index entries, e.g. on transition back to FREE.
    pub fn deindex(&mut self, order_id: u64, client_oid: &str) {
        self.order_id_index.remove(&order_id);
        self.client_oid_index.remove(client_oid);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Decimal, &Slot)> {
        self.by_price.iter()
    }

    pub fn len(&self) -> usize {
        self.by_price.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_price.is_empty()
    }

    /// Total FILLED position quantity across all slots — the inventory
    /// invariant's "tracked-net" side (§8).
    pub fn total_filled_qty(&self) -> Decimal {
        self.by_price
            .values()
            .filter(|s| s.is_filled_position())
            .map(|s| s.position_qty)
            .sum()
    }

    /// Rebuild both secondary indices from scratch. Used by the Reconciler,
    /// which is the sole permitted rebuilder per §4.3.
    pub fn rebuild_indices(&mut self) {
        self.order_id_index.clear();
        self.client_oid_index.clear();
        for (price, slot) in self.by_price.iter() {
            if slot.is_locked() && slot.order_id != 0 {
                self.order_id_index.insert(slot.order_id, *price);
                if !slot.client_oid.is_empty() {
                    self.client_oid_index.insert(slot.client_oid.clone(), *price);
                }
            }
        }
    }

    /// Remove slots that are FREE and hold no position — housekeeping so
    /// the table doesn't grow unbounded as the grid drifts with price.
    pub fn prune_empty_free_slots(&mut self, keep_within: impl Fn(&Decimal) -> bool) {
        self.by_price.retain(|price, slot| {
            if slot.is_free() && !slot.is_filled_position() {
                keep_within(price)
            } else {
                true
            }
        });
    }
}
