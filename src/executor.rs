//! Order Executor (spec §4.4): rate-limited, retried order placement and
//! cancellation against an [`ExchangePort`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info_span, warn, Instrument};

use crate::common::{BackoffConfig, ExponentialBackoff, RateLimiter, RateLimiterConfig};
use crate::errors::CoreError;
use crate::exchange::{ExchangeOrder, ExchangePort, OrderRequest};
use crate::strategy::OrderAction;
use crate::types::{Side, TimeInForce};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub rate_per_second: usize,
    pub burst_capacity: usize,
    pub backoff: BackoffConfig,
    /// Ring buffer capacity for the error-rate health check (§4.4).
    pub health_window_capacity: usize,
    pub unhealthy_failure_threshold: usize,
    pub unhealthy_window: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            rate_per_second: 25,
            burst_capacity: 30,
            backoff: BackoffConfig::default(),
            health_window_capacity: 1000,
            unhealthy_failure_threshold: 50,
            unhealthy_window: Duration::from_secs(300),
        }
    }
}

/// Bounded ring of recent failure timestamps backing `check_health` (§4.4).
struct FailureRing {
    capacity: usize,
    timestamps: VecDeque<Instant>,
}

impl FailureRing {
    fn new(capacity: usize) -> Self {
        Self { capacity, timestamps: VecDeque::with_capacity(capacity) }
    }

    fn record(&mut self, at: Instant) {
        if self.timestamps.len() == self.capacity {
            self.timestamps.pop_front();
        }
        self.timestamps.push_back(at);
    }

    fn count_within(&self, window: Duration, now: Instant) -> usize {
        self.timestamps.iter().filter(|t| now.duration_since(**t) <= window).count()
    }
}

/// A rate-limited, retrying wrapper around one [`ExchangePort`].
pub struct Executor {
    exchange: Arc<dyn ExchangePort>,
    limiter: RateLimiter,
    config: ExecutorConfig,
    failures: Mutex<FailureRing>,
}

impl Executor {
    pub fn new(exchange: Arc<dyn ExchangePort>, config: ExecutorConfig) -> Self {
        let limiter_config = RateLimiterConfig::default()
            .with_rate(config.rate_per_second)
            .with_burst_capacity(config.burst_capacity);
        Self {
            exchange,
            limiter: RateLimiter::new(limiter_config),
            failures: Mutex::new(FailureRing::new(config.health_window_capacity)),
            config,
        }
    }

    /// `check_health()` — unhealthy when more than
    /// `unhealthy_failure_threshold` failures occurred within
    /// `unhealthy_window` (§4.4).
    pub async fn check_health(&self) -> bool {
        let failures = self.failures.lock().await;
        failures.count_within(self.config.unhealthy_window, Instant::now()) <= self.config.unhealthy_failure_threshold
    }

    /// Execute a batch of strategy actions in order, pairing each with its
    /// outcome so the Position Manager can apply results atomically.
    pub async fn execute(&self, actions: Vec<OrderAction>) -> Vec<(OrderAction, Result<ExchangeOrder, CoreError>)> {
        let mut results = Vec::with_capacity(actions.len());
        for action in actions {
            let outcome = self.execute_one(&action).await;
            results.push((action, outcome));
        }
        results
    }

    async fn execute_one(&self, action: &OrderAction) -> Result<ExchangeOrder, CoreError> {
        match action {
            OrderAction::Place { symbol, side, price, quantity, reduce_only, client_oid } => {
                let req = OrderRequest {
                    symbol: symbol.clone(),
                    side: *side,
                    order_type: crate::types::OrderType::Limit,
                    time_in_force: TimeInForce::PostOnly,
                    quantity: *quantity,
                    price: *price,
                    reduce_only: *reduce_only,
                    post_only: true,
                    client_order_id: client_oid.clone(),
                    use_margin: matches!(side, Side::Buy) && !*reduce_only,
                };
                self.place_with_retry(req).await
            }
            OrderAction::Cancel { symbol, order_id, .. } => {
                self.cancel_with_retry(symbol, *order_id).await.map(|_| ExchangeOrder {
                    order_id: *order_id,
                    client_order_id: String::new(),
                    symbol: symbol.clone(),
                    side: Side::Buy,
                    price: rust_decimal::Decimal::ZERO,
                    quantity: rust_decimal::Decimal::ZERO,
                    filled_quantity: rust_decimal::Decimal::ZERO,
                    state: crate::exchange::ExchangeOrderState::Canceled,
                    updated_at: chrono::Utc::now(),
                })
            }
        }
    }

    async fn place_with_retry(&self, mut req: OrderRequest) -> Result<ExchangeOrder, CoreError> {
        let mut backoff = ExponentialBackoff::new(self.config.backoff);
        let mut degraded_once = false;
        loop {
            self.limiter.acquire().await;
            let span = info_span!("place_order", symbol = %req.symbol, side = ?req.side, price = %req.price, attempt = backoff.attempt());
            let result = self.exchange.place_order(req.clone()).instrument(span).await;

            match result {
                Ok(order) => return Ok(order),
                Err(err) if is_post_only_rejection(&err) && !degraded_once => {
                    debug!(symbol = %req.symbol, "post-only rejected, degrading to GTC limit once");
                    req.post_only = false;
                    req.time_in_force = TimeInForce::Gtc;
                    degraded_once = true;
                    continue;
                }
                Err(err) if !err.is_retriable() => {
                    self.record_failure().await;
                    return Err(err);
                }
                Err(err) => {
                    self.record_failure().await;
                    let Some(delay) = backoff.next_delay() else {
                        warn!(symbol = %req.symbol, "place_order retries exhausted");
                        return Err(err);
                    };
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn cancel_with_retry(&self, symbol: &crate::types::Symbol, order_id: u64) -> Result<(), CoreError> {
        let mut backoff = ExponentialBackoff::new(self.config.backoff);
        loop {
            self.limiter.acquire().await;
            let span = info_span!("cancel_order", %symbol, order_id, attempt = backoff.attempt());
            let result = self.exchange.cancel_order(symbol, order_id).instrument(span).await;
            match result {
                Ok(()) => return Ok(()),
                Err(err) if !err.is_retriable() => {
                    // OrderAlreadyFilled / OrderNotFound: terminal, not a failure worth
                    // counting against health since the order is already resolved.
                    return Err(err);
                }
                Err(err) => {
                    self.record_failure().await;
                    let Some(delay) = backoff.next_delay() else {
                        return Err(err);
                    };
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn record_failure(&self) {
        self.failures.lock().await.record(Instant::now());
    }
}

/// Whether `err` is the post-only-specific rejection the executor degrades
/// once for (§4.4 "Post-only degradation"). Exchange ports surface this as
/// a business-fatal error whose message names the post-only constraint.
fn is_post_only_rejection(err: &CoreError) -> bool {
    matches!(err, CoreError::BusinessFatal { message, .. } if message.to_lowercase().contains("post-only") || message.to_lowercase().contains("post only"))
}
