//! Execution Worker — owns the single thread that actually talks to
//! the exchange's order-entry endpoints.
//!
//! Orders arrive over an unbounded `crossbeam_channel` queue; the
//! worker thread drains it, submits each order through a
//! single-threaded Tokio runtime driven with `block_on`, and reports
//! the resulting order state back through a caller-supplied callback.
//! The worker never holds a reference back to its owner: the Order
//! Manager registers a boxed callback at spawn time instead.

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use gateway_jsonrpc::RpcClient;
use gateway_session::SessionManager;
use gateway_types::{parse_order_state, Fill, Order, OrderStatus, OrderType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Serialize)]
struct PlaceParams {
    instrument_name: String,
    amount: f64,
    #[serde(rename = "type")]
    order_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<f64>,
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

enum WorkerMessage {
    Submit(Order),
    Shutdown,
}

/// A boxed reporter invoked once per completed submission with the
/// updated order and, when one occurred, the resulting fill.
pub type UpdateCallback = Box<dyn Fn(Order, Option<Fill>) + Send + Sync>;

/// Handle for submitting orders to the background worker thread.
pub struct ExecutionHandle {
    tx: Sender<WorkerMessage>,
}

impl ExecutionHandle {
    pub fn submit(&self, order: Order) {
        let order_id = order.order_id.clone();
        if self.tx.send(WorkerMessage::Submit(order)).is_err() {
            warn!(order_id, "execution worker channel closed, order dropped");
        }
    }

    pub fn stop(&self) {
        let _ = self.tx.send(WorkerMessage::Shutdown);
    }
}

pub struct ExecutionWorker;

impl ExecutionWorker {
    /// Spawn the worker on a dedicated OS thread and return a handle for
    /// submitting orders to it.
    pub fn spawn(
        rpc: Arc<RpcClient>,
        session: Arc<SessionManager>,
        on_update: UpdateCallback,
    ) -> ExecutionHandle {
        let (tx, rx) = crossbeam_channel::unbounded();

        thread::Builder::new()
            .name("execution-worker".to_string())
            .spawn(move || {
                info!("execution worker thread started");
                run_loop(rx, rpc, session, on_update);
                info!("execution worker thread stopped");
            })
            .expect("failed to spawn execution worker thread");

        ExecutionHandle { tx }
    }
}

fn run_loop(
    rx: Receiver<WorkerMessage>,
    rpc: Arc<RpcClient>,
    session: Arc<SessionManager>,
    on_update: UpdateCallback,
) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime for execution worker");

    loop {
        match rx.recv() {
            Ok(WorkerMessage::Submit(order)) => {
                let (updated, fill) = runtime.block_on(submit_order(&rpc, &session, order));
                on_update(updated, fill);
            }
            Ok(WorkerMessage::Shutdown) | Err(_) => return,
        }

        // Drain any further queued orders without blocking before going
        // back to a blocking recv, so a burst doesn't pay wakeup latency
        // per order.
        loop {
            match rx.try_recv() {
                Ok(WorkerMessage::Submit(order)) => {
                    let (updated, fill) = runtime.block_on(submit_order(&rpc, &session, order));
                    on_update(updated, fill);
                }
                Ok(WorkerMessage::Shutdown) => return,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }
    }
}

async fn submit_order(
    rpc: &RpcClient,
    session: &SessionManager,
    mut order: Order,
) -> (Order, Option<Fill>) {
    let Some(token) = session.current_token() else {
        order.reject("no session token available");
        return (order, None);
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

    let start = Instant::now();
    let result = rpc.call_private::<_, PlaceResult>(&method, params, &token).await;
    let latency = start.elapsed();

    let parsed = match result {
        Ok(result) => result,
        Err(err) => {
            error!(order_id = %order.order_id, %err, "order submission failed");
            order.reject(err.to_string());
            return (order, None);
        }
    };

    apply_raw_order(&mut order, &parsed.order);
    info!(order_id = %order.order_id, latency_ms = latency.as_secs_f64() * 1000.0, "order submission completed");

    let fill = matches!(order.status, OrderStatus::Filled | OrderStatus::PartiallyFilled).then(|| Fill {
        order_id: order.order_id.clone(),
        amount: order.filled_amount,
        price: order.average_filled_price,
        timestamp: Utc::now(),
    });

    (order, fill)
}

fn apply_raw_order(order: &mut Order, raw: &RawOrder) {
    if order.order_id.is_empty() {
        order.order_id = raw.order_id.clone();
    }
    order.status = parse_order_state(&raw.order_state);
    order.filled_amount = raw.filled_amount;
    order.average_filled_price = raw.average_price;
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::{OrderType, Side};

    #[test]
    fn raw_order_maps_onto_existing_order() {
        let mut order = Order::new("BTC-PERPETUAL", Side::Buy, 1.0, 30000.0, OrderType::Limit);
        let raw = RawOrder {
            order_id: "abc123".to_string(),
            order_state: "filled".to_string(),
            filled_amount: 1.0,
            average_price: 30010.0,
        };
        apply_raw_order(&mut order, &raw);
        assert_eq!(order.order_id, "abc123");
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_amount, 1.0);
    }

    #[test]
    fn existing_order_id_is_not_overwritten() {
        let mut order = Order::new("BTC-PERPETUAL", Side::Buy, 1.0, 30000.0, OrderType::Limit);
        order.order_id = "existing".to_string();
        let raw = RawOrder {
            order_id: "different".to_string(),
            order_state: "open".to_string(),
            filled_amount: 0.0,
            average_price: 0.0,
        };
        apply_raw_order(&mut order, &raw);
        assert_eq!(order.order_id, "existing");
    }
}
