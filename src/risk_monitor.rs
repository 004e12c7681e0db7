//! Risk Monitor (spec §4.6): per-symbol rolling candle window, producing a
//! cross-symbol `triggered` flag plus per-symbol ATR and volatility factor
//! that the Grid Strategy consumes.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tracing::{info, warn};

use crate::types::{Candle, Symbol};

#[derive(Debug, Clone)]
pub struct RiskMonitorConfig {
    /// Number of closed candles averaged over. Typically 20.
    pub window: usize,
    /// Volume must exceed `ma_volume * volume_multiplier` to trip the
    /// trigger condition.
    pub volume_multiplier: Decimal,
    /// Number of monitored symbols that must independently satisfy the
    /// recovery condition before the overall trigger clears (hysteresis).
    pub recovery_threshold: usize,
}

impl Default for RiskMonitorConfig {
    fn default() -> Self {
        Self { window: 20, volume_multiplier: Decimal::new(15, 1), recovery_threshold: 1 }
    }
}

/// Per-symbol rolling state: closed-candle window plus the latest
/// (possibly still-forming) candle.
struct SymbolWindow {
    closed: VecDeque<Candle>,
    capacity: usize,
    latest: Option<Candle>,
    /// `ma_close`/`ma_volume` over `closed` as of just before the latest
    /// closed candle was appended, so the trigger/recovery conditions
    /// evaluate that candle against a baseline it isn't itself part of.
    baseline_close: Option<Decimal>,
    baseline_volume: Option<Decimal>,
}

impl SymbolWindow {
    fn new(capacity: usize) -> Self {
        Self {
            closed: VecDeque::with_capacity(capacity),
            capacity,
            latest: None,
            baseline_close: None,
            baseline_volume: None,
        }
    }

    fn push(&mut self, candle: Candle) {
        if candle.closed {
            self.baseline_close = self.ma_close();
            self.baseline_volume = self.ma_volume();
            if self.closed.len() == self.capacity {
                self.closed.pop_front();
            }
            self.closed.push_back(candle);
        }
        self.latest = Some(candle);
    }

    fn ma_close(&self) -> Option<Decimal> {
        average(self.closed.iter().map(|c| c.close))
    }

    fn ma_volume(&self) -> Option<Decimal> {
        average(self.closed.iter().map(|c| c.volume))
    }

    /// The average to evaluate `latest` against: when `latest` is a closed
    /// candle it was appended into `closed` by `push`, so using it here
    /// would dilute the baseline with the very candle being judged — use
    /// the pre-append snapshot instead. A still-forming `latest` was never
    /// appended, so the plain window average is already exclusive of it.
    fn effective_ma_close(&self) -> Option<Decimal> {
        if self.latest.map(|c| c.closed).unwrap_or(false) {
            self.baseline_close
        } else {
            self.ma_close()
        }
    }

    fn effective_ma_volume(&self) -> Option<Decimal> {
        if self.latest.map(|c| c.closed).unwrap_or(false) {
            self.baseline_volume
        } else {
            self.ma_volume()
        }
    }

    /// Average true range over the closed window, smoothed as a simple
    /// mean of per-candle true range (Wilder smoothing is not needed here
    /// since the strategy only needs a magnitude, not a lag-matched signal).
    fn atr(&self) -> Decimal {
        if self.closed.is_empty() {
            return Decimal::ZERO;
        }
        let mut prev_close: Option<Decimal> = None;
        let mut sum = Decimal::ZERO;
        let mut count = 0u32;
        for candle in &self.closed {
            let tr = match prev_close {
                Some(pc) => (candle.high - candle.low).max((candle.high - pc).abs()).max((candle.low - pc).abs()),
                None => candle.high - candle.low,
            };
            sum += tr;
            count += 1;
            prev_close = Some(candle.close);
        }
        if count == 0 {
            Decimal::ZERO
        } else {
            sum / Decimal::from(count)
        }
    }

    fn volatility_factor(&self) -> f64 {
        let Some(ma) = self.ma_close() else { return 1.0 };
        if ma.is_zero() {
            return 1.0;
        }
        (self.atr() / ma).to_f64().unwrap_or(1.0)
    }

    fn trigger_condition(&self, config: &RiskMonitorConfig) -> bool {
        let Some(latest) = self.latest else { return false };
        let (Some(ma_close), Some(ma_volume)) = (self.effective_ma_close(), self.effective_ma_volume()) else {
            return false;
        };
        latest.close < ma_close && latest.volume > ma_volume * config.volume_multiplier
    }

    fn recovery_condition(&self, config: &RiskMonitorConfig) -> bool {
        let Some(latest) = self.latest else { return false };
        if !latest.closed {
            return false;
        }
        let (Some(ma_close), Some(ma_volume)) = (self.effective_ma_close(), self.effective_ma_volume()) else {
            return false;
        };
        latest.close > ma_close && latest.volume < ma_volume * config.volume_multiplier
    }
}

fn average(values: impl Iterator<Item = Decimal>) -> Option<Decimal> {
    let mut sum = Decimal::ZERO;
    let mut count = 0u32;
    for v in values {
        sum += v;
        count += 1;
    }
    if count == 0 {
        None
    } else {
        Some(sum / Decimal::from(count))
    }
}

/// Tracks every monitored symbol and derives the cross-symbol trigger.
pub struct RiskMonitor {
    config: RiskMonitorConfig,
    windows: std::collections::HashMap<Symbol, SymbolWindow>,
    triggered: bool,
}

impl RiskMonitor {
    pub fn new(config: RiskMonitorConfig, symbols: impl IntoIterator<Item = Symbol>) -> Self {
        let windows = symbols
            .into_iter()
            .map(|s| (s, SymbolWindow::new(config.window)))
            .collect();
        Self { config, windows, triggered: false }
    }

    pub fn on_candle(&mut self, symbol: &Symbol, candle: Candle) {
        if let Some(window) = self.windows.get_mut(symbol) {
            window.push(candle);
        }
        self.recompute();
    }

    fn recompute(&mut self) {
        if self.windows.is_empty() {
            return;
        }
        if !self.triggered {
            let all_trigger = self.windows.values().all(|w| w.trigger_condition(&self.config));
            if all_trigger {
                self.triggered = true;
                warn!("risk monitor triggered: all monitored symbols show price<MA and volume spike");
            }
        } else {
            let recovered = self.windows.values().filter(|w| w.recovery_condition(&self.config)).count();
            if recovered >= self.config.recovery_threshold {
                self.triggered = false;
                info!(recovered, "risk monitor recovered: hysteresis threshold met");
            }
        }
    }

    pub fn triggered(&self) -> bool {
        self.triggered
    }

    pub fn atr(&self, symbol: &Symbol) -> Decimal {
        self.windows.get(symbol).map(|w| w.atr()).unwrap_or(Decimal::ZERO)
    }

    pub fn volatility_factor(&self, symbol: &Symbol) -> f64 {
        self.windows.get(symbol).map(|w| w.volatility_factor()).unwrap_or(1.0)
    }
}
