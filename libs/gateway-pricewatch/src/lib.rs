//! Price-Watch Integrator — holds orders whose limit price has not yet
//! been touched by the market and releases them for execution once it
//! is.
//!
//! Runs a 100ms poll loop on its own OS thread rather than reacting to
//! every order book tick: watched orders are typically few, and a fixed
//! poll interval keeps the loop's CPU cost predictable regardless of
//! how fast the upstream feed updates.

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use gateway_orderbook::OrderBookRegistry;
use gateway_types::{Order, OrderType, Side};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

enum WatchCommand {
    Enroll(Order),
    Remove(String),
    Shutdown,
}

struct Watch {
    order: Order,
}

/// Invoked once an order's trigger condition is met, with its price
/// updated to the level that satisfied it.
pub type ReleaseCallback = Box<dyn Fn(Order) + Send + Sync>;

pub struct PriceWatchHandle {
    tx: Sender<WatchCommand>,
}

impl PriceWatchHandle {
    pub fn enroll(&self, order: Order) {
        let _ = self.tx.send(WatchCommand::Enroll(order));
    }

    pub fn remove(&self, order_id: &str) {
        let _ = self.tx.send(WatchCommand::Remove(order_id.to_string()));
    }

    pub fn stop(&self) {
        let _ = self.tx.send(WatchCommand::Shutdown);
    }
}

pub struct PriceWatch;

impl PriceWatch {
    pub fn spawn(books: Arc<OrderBookRegistry>, on_release: ReleaseCallback) -> PriceWatchHandle {
        let (tx, rx) = crossbeam_channel::unbounded();

        thread::Builder::new()
            .name("price-watch".to_string())
            .spawn(move || {
                info!("price watch thread started");
                run_loop(rx, books, on_release);
                info!("price watch thread stopped");
            })
            .expect("failed to spawn price watch thread");

        PriceWatchHandle { tx }
    }
}

fn run_loop(rx: Receiver<WatchCommand>, books: Arc<OrderBookRegistry>, on_release: ReleaseCallback) {
    let mut watched: HashMap<String, Watch> = HashMap::new();

    loop {
        loop {
            match rx.try_recv() {
                Ok(WatchCommand::Enroll(order)) => {
                    watched.insert(order.order_id.clone(), Watch { order });
                }
                Ok(WatchCommand::Remove(order_id)) => {
                    watched.remove(&order_id);
                }
                Ok(WatchCommand::Shutdown) => return,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        let mut triggered = Vec::new();
        for (order_id, watch) in &watched {
            let book = books.book(&watch.order.instrument);
            let current_price = match watch.order.side {
                Side::Buy => book.best_ask(),
                Side::Sell => book.best_bid(),
            };
            if current_price <= 0.0 {
                continue;
            }
            if price_condition_met(&watch.order, current_price) {
                triggered.push((order_id.clone(), current_price));
            }
        }

        for (order_id, current_price) in triggered {
            if let Some(watch) = watched.remove(&order_id) {
                let mut order = watch.order;
                order.price = current_price;
                on_release(order);
            }
        }

        thread::sleep(Duration::from_millis(100));
    }
}

fn price_condition_met(order: &Order, current_price: f64) -> bool {
    match order.order_type {
        OrderType::Market => true,
        OrderType::Limit => match order.side {
            Side::Buy => current_price <= order.price,
            Side::Sell => current_price >= order.price,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::Order;

    #[test]
    fn market_orders_always_trigger() {
        let order = Order::new("BTC-PERPETUAL", Side::Buy, 1.0, 0.0, OrderType::Market);
        assert!(price_condition_met(&order, 30000.0));
    }

    #[test]
    fn buy_limit_triggers_when_price_drops_to_or_below_target() {
        let order = Order::new("BTC-PERPETUAL", Side::Buy, 1.0, 30000.0, OrderType::Limit);
        assert!(price_condition_met(&order, 29999.0));
        assert!(price_condition_met(&order, 30000.0));
        assert!(!price_condition_met(&order, 30001.0));
    }

    #[test]
    fn sell_limit_triggers_when_price_rises_to_or_above_target() {
        let order = Order::new("BTC-PERPETUAL", Side::Sell, 1.0, 30000.0, OrderType::Limit);
        assert!(price_condition_met(&order, 30001.0));
        assert!(price_condition_met(&order, 30000.0));
        assert!(!price_condition_met(&order, 29999.0));
    }
}
