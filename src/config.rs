//! Configuration (spec §9.2). Loading from a file or environment is an
//! external collaborator's job (the Core only validates); this module
//! defines the shape and the safety-check predicates that gate startup.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::StartupError;
use crate::types::{GridMode, Symbol};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicIntervalConfig {
    pub enabled: bool,
    /// `α` in `I_eff = max(base, α · ATR)` (§4.2).
    pub alpha: Decimal,
}

impl Default for DynamicIntervalConfig {
    fn default() -> Self {
        Self { enabled: false, alpha: Decimal::new(3, 0) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendFollowConfig {
    pub enabled: bool,
    /// `s` in `R' = R · (1 − s · inventory_units)` (§4.2).
    pub skew_factor: Decimal,
}

impl Default for TrendFollowConfig {
    fn default() -> Self {
        Self { enabled: false, skew_factor: Decimal::new(1, 4) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskControlConfig {
    pub window: usize,
    pub volume_multiplier: Decimal,
    pub recovery_threshold: usize,
}

impl Default for RiskControlConfig {
    fn default() -> Self {
        Self { window: 20, volume_multiplier: Decimal::new(15, 1), recovery_threshold: 1 }
    }
}

/// Per-symbol engine configuration (§9.2). One `EngineConfig` drives one
/// symbol task (§5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub symbol: Symbol,
    pub price_interval: Decimal,
    pub order_quantity: Decimal,
    pub min_order_value: Decimal,
    pub buy_window_size: u32,
    pub sell_window_size: u32,
    pub grid_mode: GridMode,
    pub tick_size: Decimal,

    /// Taker/maker fee rate charged per fill, as a fraction of notional.
    #[serde(default)]
    pub fee_rate: Decimal,

    /// Cancel all open orders for the symbol as part of shutdown, before
    /// the final snapshot is persisted (§5 "Cancellation").
    #[serde(default)]
    pub cancel_on_exit: bool,

    #[serde(default)]
    pub dynamic_interval: DynamicIntervalConfig,
    #[serde(default)]
    pub trend_follow: TrendFollowConfig,
    #[serde(default)]
    pub risk: RiskControlConfig,

    #[serde(with = "humantime_seconds", default = "default_reconcile_interval")]
    pub reconcile_interval: Duration,

    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_second: usize,
    #[serde(default = "default_burst")]
    pub rate_limit_burst: usize,
}

fn default_reconcile_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_rate_limit() -> usize {
    25
}

fn default_burst() -> usize {
    30
}

/// Serializes a `Duration` as whole seconds, matching the plain integer
/// shape operators expect in a JSON config file.
mod humantime_seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

impl EngineConfig {
    /// Safety checks that must pass before any order is placed (§9.2,
    /// mirrors §6 "Exit codes"). Returns the first violation found.
    pub fn validate(&self) -> Result<(), StartupError> {
        if self.price_interval <= Decimal::ZERO {
            return Err(StartupError::SafetyCheck("price_interval must be positive".into()));
        }
        if self.order_quantity <= Decimal::ZERO {
            return Err(StartupError::SafetyCheck("order_quantity must be positive".into()));
        }
        if self.buy_window_size == 0 && self.sell_window_size == 0 {
            return Err(StartupError::SafetyCheck("at least one of buy/sell window size must be non-zero".into()));
        }
        if self.tick_size <= Decimal::ZERO {
            return Err(StartupError::SafetyCheck("tick_size must be positive".into()));
        }
        if self.dynamic_interval.enabled && self.dynamic_interval.alpha <= Decimal::ZERO {
            return Err(StartupError::SafetyCheck("dynamic_interval.alpha must be positive when enabled".into()));
        }
        if self.trend_follow.enabled && self.trend_follow.skew_factor < Decimal::ZERO {
            return Err(StartupError::SafetyCheck("trend_follow.skew_factor must be non-negative when enabled".into()));
        }
        if self.risk.window == 0 {
            return Err(StartupError::SafetyCheck("risk.window must be non-zero".into()));
        }
        if self.rate_limit_burst < self.rate_limit_per_second {
            return Err(StartupError::SafetyCheck("rate_limit_burst must be >= rate_limit_per_second".into()));
        }
        if self.fee_rate < Decimal::ZERO {
            return Err(StartupError::SafetyCheck("fee_rate must be non-negative".into()));
        }
        Ok(())
    }

    pub fn grid_params(&self) -> crate::strategy::GridParams {
        crate::strategy::GridParams {
            price_interval: self.price_interval,
            buy_window_size: self.buy_window_size,
            sell_window_size: self.sell_window_size,
            min_order_value: self.min_order_value,
            order_quantity: self.order_quantity,
            tick_size: self.tick_size,
            grid_mode: self.grid_mode,
            dynamic_interval_alpha: self.dynamic_interval.enabled.then_some(self.dynamic_interval.alpha),
            trend_follow_skew: self.trend_follow.enabled.then_some(self.trend_follow.skew_factor),
            fee_rate: self.fee_rate,
        }
    }

    /// The startup safety check an embedding CLI runs against the grid's
    /// implied per-round-trip profit once a starting reference price is
    /// known (§9.2 "negative net profit per trade"). `EngineConfig` itself
    /// has no live price, so this is exposed for the caller to invoke with
    /// one rather than folded into `validate()`.
    pub fn check_profitable_at(&self, reference_price: Decimal) -> Result<(), StartupError> {
        let params = self.grid_params();
        if params.implied_profit_per_round_trip(reference_price) <= Decimal::ZERO {
            return Err(StartupError::SafetyCheck("grid_params imply non-positive profit per round trip after fees".into()));
        }
        Ok(())
    }
}
