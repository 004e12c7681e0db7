//! Exchange Port — the one collaborator contract the trading core depends
//! on (spec §6). Concrete REST/WebSocket adapters implement this trait
//! outside the core; the core never branches on which adapter it holds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::types::{OrderType, Side, Symbol, TimeInForce};

/// Bit-exact order request fields from spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub quantity: Decimal,
    pub price: Decimal,
    pub reduce_only: bool,
    pub post_only: bool,
    pub client_order_id: String,
    pub use_margin: bool,
}

/// The order state as last reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeOrderState {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
}

/// An order as reported back by the exchange port, either as the
/// synchronous result of `place_order` or as an entry in
/// `get_open_orders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeOrder {
    pub order_id: u64,
    pub client_order_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub state: ExchangeOrderState,
    pub updated_at: DateTime<Utc>,
}

/// An order-stream push: a change in an order's exchange-side state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: u64,
    pub client_order_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub state: ExchangeOrderState,
    pub filled_quantity: Decimal,
    pub fill_price: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Balance {
    pub free: Decimal,
    pub locked: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountInfo {
    pub equity: Decimal,
    pub available_margin: Decimal,
    pub leverage: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub price_decimals: u32,
    pub quantity_decimals: u32,
    pub tick_size: Decimal,
    pub min_order_value: Decimal,
}

/// Result of a batch placement: per-request results in request order, plus
/// a flag distinguishing "the whole batch was rejected for margin" from
/// per-order rejections (§6).
#[derive(Debug, Clone)]
pub struct BatchPlaceResult {
    pub results: Vec<Result<ExchangeOrder, CoreError>>,
    pub margin_error: bool,
}

/// The Exchange Port: order CRUD, account introspection, and streams.
///
/// Implementations are expected to be internally thread-safe — the spec
/// requires this be the only resource shared across per-symbol tasks
/// (§5 "Shared resources").
#[async_trait]
pub trait ExchangePort: Send + Sync {
    async fn place_order(&self, req: OrderRequest) -> Result<ExchangeOrder, CoreError>;
    async fn batch_place_orders(&self, reqs: Vec<OrderRequest>) -> BatchPlaceResult;
    async fn cancel_order(&self, symbol: &Symbol, order_id: u64) -> Result<(), CoreError>;
    async fn batch_cancel(&self, symbol: &Symbol, order_ids: Vec<u64>) -> Vec<Result<(), CoreError>>;
    async fn cancel_all(&self, symbol: &Symbol) -> Result<(), CoreError>;
    async fn get_order(&self, symbol: &Symbol, order_id: u64) -> Result<ExchangeOrder, CoreError>;
    async fn get_open_orders(&self, symbol: &Symbol) -> Result<Vec<ExchangeOrder>, CoreError>;
    async fn get_positions(&self, symbol: &Symbol) -> Result<Decimal, CoreError>;
    async fn get_account(&self) -> Result<AccountInfo, CoreError>;
    async fn get_balance(&self, asset: &str) -> Result<Balance, CoreError>;

    fn price_decimals(&self, symbol: &Symbol) -> u32;
    fn quantity_decimals(&self, symbol: &Symbol) -> u32;
    fn base_asset(&self, symbol: &Symbol) -> String;
    fn quote_asset(&self, symbol: &Symbol) -> String;
    async fn get_symbol_info(&self, symbol: &Symbol) -> Result<SymbolInfo, CoreError>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    //! A minimal in-memory [`ExchangePort`] double used by this crate's
    //! integration tests. Not a production adapter — it has no network I/O.
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct MockExchange {
        pub orders: Mutex<HashMap<u64, ExchangeOrder>>,
        pub next_id: Mutex<u64>,
        pub position: Mutex<Decimal>,
        pub reject_next: Mutex<Option<CoreError>>,
    }

    impl MockExchange {
        pub fn new() -> Self {
            Self {
                orders: Mutex::new(HashMap::new()),
                next_id: Mutex::new(1),
                position: Mutex::new(Decimal::ZERO),
                reject_next: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl ExchangePort for MockExchange {
        async fn place_order(&self, req: OrderRequest) -> Result<ExchangeOrder, CoreError> {
            if let Some(err) = self.reject_next.lock().await.take() {
                return Err(err);
            }
            let mut next_id = self.next_id.lock().await;
            let order_id = *next_id;
            *next_id += 1;
            let order = ExchangeOrder {
                order_id,
                client_order_id: req.client_order_id,
                symbol: req.symbol,
                side: req.side,
                price: req.price,
                quantity: req.quantity,
                filled_quantity: Decimal::ZERO,
                state: ExchangeOrderState::New,
                updated_at: Utc::now(),
            };
            self.orders.lock().await.insert(order_id, order.clone());
            Ok(order)
        }

        async fn batch_place_orders(&self, reqs: Vec<OrderRequest>) -> BatchPlaceResult {
            let mut results = Vec::with_capacity(reqs.len());
            for req in reqs {
                results.push(self.place_order(req).await);
            }
            BatchPlaceResult { results, margin_error: false }
        }

        async fn cancel_order(&self, _symbol: &Symbol, order_id: u64) -> Result<(), CoreError> {
            let mut orders = self.orders.lock().await;
            match orders.get_mut(&order_id) {
                Some(o) if o.state == ExchangeOrderState::Filled => {
                    Err(CoreError::BusinessFatal {
                        kind: crate::errors::BusinessFatalKind::OrderAlreadyFilled,
                        message: "order already filled".into(),
                    })
                }
                Some(o) => {
                    o.state = ExchangeOrderState::Canceled;
                    Ok(())
                }
                None => Err(CoreError::BusinessFatal {
                    kind: crate::errors::BusinessFatalKind::OrderNotFound,
                    message: "order not found".into(),
                }),
            }
        }

        async fn batch_cancel(&self, symbol: &Symbol, order_ids: Vec<u64>) -> Vec<Result<(), CoreError>> {
            let mut out = Vec::with_capacity(order_ids.len());
            for id in order_ids {
                out.push(self.cancel_order(symbol, id).await);
            }
            out
        }

        async fn cancel_all(&self, symbol: &Symbol) -> Result<(), CoreError> {
            let ids: Vec<u64> = self.orders.lock().await.keys().copied().collect();
            for id in ids {
                let _ = self.cancel_order(symbol, id).await;
            }
            Ok(())
        }

        async fn get_order(&self, _symbol: &Symbol, order_id: u64) -> Result<ExchangeOrder, CoreError> {
            self.orders
                .lock()
                .await
                .get(&order_id)
                .cloned()
                .ok_or_else(|| CoreError::BusinessFatal {
                    kind: crate::errors::BusinessFatalKind::OrderNotFound,
                    message: "order not found".into(),
                })
        }

        async fn get_open_orders(&self, _symbol: &Symbol) -> Result<Vec<ExchangeOrder>, CoreError> {
            Ok(self
                .orders
                .lock()
                .await
                .values()
                .filter(|o| matches!(o.state, ExchangeOrderState::New | ExchangeOrderState::PartiallyFilled))
                .cloned()
                .collect())
        }

        async fn get_positions(&self, _symbol: &Symbol) -> Result<Decimal, CoreError> {
            Ok(*self.position.lock().await)
        }

        async fn get_account(&self) -> Result<AccountInfo, CoreError> {
            Ok(AccountInfo {
                equity: Decimal::new(100_000, 0),
                available_margin: Decimal::new(100_000, 0),
                leverage: Decimal::new(1, 0),
            })
        }

        async fn get_balance(&self, _asset: &str) -> Result<Balance, CoreError> {
            Ok(Balance { free: Decimal::new(100_000, 0), locked: Decimal::ZERO })
        }

        fn price_decimals(&self, _symbol: &Symbol) -> u32 {
            2
        }

        fn quantity_decimals(&self, _symbol: &Symbol) -> u32 {
            4
        }

        fn base_asset(&self, _symbol: &Symbol) -> String {
            "BTC".into()
        }

        fn quote_asset(&self, _symbol: &Symbol) -> String {
            "USDT".into()
        }

        async fn get_symbol_info(&self, _symbol: &Symbol) -> Result<SymbolInfo, CoreError> {
            Ok(SymbolInfo {
                price_decimals: 2,
                quantity_decimals: 4,
                tick_size: Decimal::new(1, 2),
                min_order_value: Decimal::new(10, 0),
            })
        }
    }
}
