//! Client order id generation and price quantization helpers (§4.2
//! "Idempotency", §3 "Price quantization").

use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::types::{Side, Symbol};

/// Round `price` to the nearest multiple of `tick`, half-up.
pub fn quantize_price(price: Decimal, tick: Decimal) -> Decimal {
    if tick.is_zero() {
        return price;
    }
    (price / tick).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero) * tick
}

/// Deterministic, idempotent client order id:
/// `H(symbol, side, quantized_price, generation_counter)` (§4.2).
///
/// Same inputs always produce the same id, so a crash-and-retry before the
/// exchange ack is observed never double-places — a retried PLACE with an
/// unchanged generation collides with the original on the exchange's
/// client-id uniqueness constraint instead of creating a duplicate order.
pub fn client_oid(symbol: &Symbol, side: Side, quantized_price: Decimal, generation: u64) -> String {
    let mut hasher = DefaultHasher::new();
    symbol.as_str().hash(&mut hasher);
    side.hash(&mut hasher);
    quantized_price.to_string().hash(&mut hasher);
    generation.hash(&mut hasher);
    format!("gmm-{:016x}", hasher.finish())
}
