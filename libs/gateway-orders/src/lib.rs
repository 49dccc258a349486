//! Order Manager — the entry point external callers use to place,
//! cancel, and modify orders, backed by the Active-Order Table, the
//! Risk Engine, and the rate limiter that throttles admission before
//! anything reaches the exchange.
//!
//! `place` submits synchronously: the caller awaits the exchange's
//! response directly rather than enqueuing and polling. The Execution
//! Worker is reserved for orders released by the Price-Watch
//! Integrator, where nothing is waiting on an immediate reply.

use gateway_execution::{ExecutionHandle, ExecutionWorker};
use gateway_jsonrpc::RpcClient;
use gateway_risk::RiskEngine;
use gateway_session::SessionManager;
use gateway_types::{parse_order_state, GatewayError, Order, OrderStatus, OrderType, Position};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct PlaceParams {
    instrument_name: String,
    amount: f64,
    #[serde(rename = "type")]
    order_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<f64>,
}

#[derive(Debug, Serialize)]
struct CancelParams {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct PlaceResult {
    order: RawOrder,
}

#[derive(Debug, Deserialize)]
struct RawOrder {
    order_id: String,
    order_state: String,
    filled_amount: f64,
    average_price: f64,
}

struct RateLimiter {
    window: Mutex<VecDeque<Instant>>,
    max_per_second: u32,
}

impl RateLimiter {
    fn new(max_per_second: u32) -> Self {
        Self { window: Mutex::new(VecDeque::new()), max_per_second }
    }

    /// Returns `true` and records the admission if under the limit.
    fn try_admit(&self) -> bool {
        let mut window = self.window.lock();
        let now = Instant::now();
        while let Some(&oldest) = window.front() {
            if now.duration_since(oldest) >= Duration::from_secs(1) {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() as u32 >= self.max_per_second {
            return false;
        }
        window.push_back(now);
        true
    }
}

/// Owns the Execution Worker, the Active-Order Table, and the admission
/// rate limiter for one exchange session.
pub struct OrderManager {
    rpc: Arc<RpcClient>,
    session: Arc<SessionManager>,
    risk: Arc<RiskEngine>,
    active_orders: Arc<Mutex<HashMap<String, Order>>>,
    rate_limiter: RateLimiter,
    execution: ExecutionHandle,
}

impl OrderManager {
    pub fn new(
        rpc: Arc<RpcClient>,
        session: Arc<SessionManager>,
        risk: Arc<RiskEngine>,
        max_requests_per_second: u32,
    ) -> Self {
        let active_orders: Arc<Mutex<HashMap<String, Order>>> = Arc::new(Mutex::new(HashMap::new()));

        let callback_orders = active_orders.clone();
        let callback_risk = risk.clone();
        let execution = ExecutionWorker::spawn(
            rpc.clone(),
            session.clone(),
            Box::new(move |order, fill| {
                if let Some(fill) = &fill {
                    let signed_amount = order.side.sign() * fill.amount;
                    callback_risk.update_position(&order.instrument, signed_amount, fill.price);
                }
                record_order(&callback_orders, order);
            }),
        );

        Self {
            rpc,
            session,
            risk,
            active_orders,
            rate_limiter: RateLimiter::new(max_requests_per_second),
            execution,
        }
    }

    /// Hand a price-watch-released order to the Execution Worker's
    /// queue instead of submitting it inline.
    pub fn release_from_price_watch(&self, order: Order) {
        self.execution.submit(order);
    }

    /// Validate, rate-limit, and synchronously submit an order.
    pub async fn place(&self, mut order: Order) -> Order {
        if !self.rate_limiter.try_admit() {
            order.reject("Rate limit exceeded");
            return order;
        }

        if let Err(err) = self.risk.validate(&order) {
            warn!(instrument = %order.instrument, %err, "order rejected by risk engine");
            order.reject(err.to_string());
            return order;
        }

        if let Err(err) = self.session.refresh().await {
            warn!(%err, "session refresh failed before order placement");
            order.reject(err.to_string());
            return order;
        }

        let Some(token) = self.session.current_token() else {
            order.reject("no session token available");
            return order;
        };

        let method = format!("private/{}", order.side.as_method_fragment());
        let params = PlaceParams {
            instrument_name: order.instrument.clone(),
            amount: order.amount,
            order_type: match order.order_type {
                OrderType::Limit => "limit",
                OrderType::Market => "market",
            },
            price: matches!(order.order_type, OrderType::Limit).then_some(order.price),
        };

        match self.rpc.call_private::<_, PlaceResult>(&method, params, &token).await {
            Ok(result) => {
                apply_raw_order(&mut order, &result.order);
                if matches!(order.status, OrderStatus::Filled | OrderStatus::PartiallyFilled) {
                    let signed_amount = order.side.sign() * order.filled_amount;
                    self.risk.update_position(&order.instrument, signed_amount, order.average_filled_price);
                }
            }
            Err(err) => {
                order.reject(err.to_string());
            }
        }

        record_order(&self.active_orders, order.clone());
        info!(order_id = %order.order_id, status = ?order.status, "order placement completed");
        order
    }

    pub async fn cancel(&self, order_id: &str) -> Result<(), GatewayError> {
        self.session.refresh().await?;

        let Some(token) = self.session.current_token() else {
            return Err(GatewayError::AuthUnavailable("no session token available".to_string()));
        };

        let params = CancelParams { order_id: order_id.to_string() };
        self.rpc.call_private::<_, serde_json::Value>("private/cancel", params, &token).await?;

        if let Some(order) = self.active_orders.lock().get_mut(order_id) {
            order.status = OrderStatus::Cancelled;
        }
        self.active_orders.lock().retain(|_, order| !order.is_terminal());
        Ok(())
    }

    /// Cancel `order_id` and place `replacement` in its place.
    pub async fn modify(&self, order_id: &str, replacement: Order) -> Result<Order, GatewayError> {
        self.cancel(order_id).await?;
        Ok(self.place(replacement).await)
    }

    pub fn set_risk_limits(&self, limits: gateway_types::RiskLimits) {
        self.risk.set_limits(limits);
    }

    pub fn positions(&self) -> HashMap<String, Position> {
        self.risk.positions()
    }

    pub fn active_order(&self, order_id: &str) -> Option<Order> {
        self.active_orders.lock().get(order_id).cloned()
    }

    pub fn active_order_count(&self) -> usize {
        self.active_orders.lock().len()
    }

    pub fn shutdown(&self) {
        self.execution.stop();
    }
}

fn record_order(table: &Arc<Mutex<HashMap<String, Order>>>, order: Order) {
    if order.is_terminal() && order.status != OrderStatus::Filled && order.status != OrderStatus::PartiallyFilled {
        table.lock().remove(&order.order_id);
    } else {
        table.lock().insert(order.order_id.clone(), order);
    }
}

fn apply_raw_order(order: &mut Order, raw: &RawOrder) {
    if order.order_id.is_empty() {
        order.order_id = raw.order_id.clone();
    }
    order.status = parse_order_state(&raw.order_state);
    order.filled_amount = raw.filled_amount;
    order.average_filled_price = raw.average_price;
}
