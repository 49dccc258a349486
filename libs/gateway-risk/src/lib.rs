//! Risk Engine — validates every order against a short-circuiting chain
//! of checks before it is allowed to reach the exchange, and tracks the
//! resulting position per instrument.
//!
//! Checks run in a fixed order (size, position, leverage, margin, rate)
//! and the first failure rejects the order outright; later checks never
//! see an order that already failed an earlier one.

use gateway_orderbook::OrderBookRegistry;
use gateway_types::{GatewayError, Order, Position, RiskLimits, Side};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Default)]
struct RiskState {
    positions: HashMap<String, Position>,
}

pub struct RiskEngine {
    limits: RwLock<RiskLimits>,
    books: Arc<OrderBookRegistry>,
    state: Mutex<RiskState>,
}

impl RiskEngine {
    pub fn new(limits: RiskLimits, books: Arc<OrderBookRegistry>) -> Self {
        Self {
            limits: RwLock::new(limits),
            books,
            state: Mutex::new(RiskState::default()),
        }
    }

    pub fn limits(&self) -> RiskLimits {
        *self.limits.read()
    }

    pub fn set_limits(&self, limits: RiskLimits) {
        *self.limits.write() = limits;
    }

    /// Run every check in order; returns `Ok(())` if `order` clears all
    /// of them, else the first `GatewayError::RiskRejected` hit.
    pub fn validate(&self, order: &Order) -> Result<(), GatewayError> {
        self.check_order_size(order)?;
        self.check_position_limit(order)?;
        self.check_leverage(order)?;
        self.check_margin(order)?;
        self.check_rate(order)?;
        Ok(())
    }

    fn reject(reason: impl Into<String>) -> GatewayError {
        let reason = reason.into();
        warn!(reason, "order rejected by risk engine");
        GatewayError::RiskRejected { reason }
    }

    fn check_order_size(&self, order: &Order) -> Result<(), GatewayError> {
        if order.amount > self.limits().max_order_size {
            return Err(Self::reject("exceeds maximum order size"));
        }
        Ok(())
    }

    fn check_position_limit(&self, order: &Order) -> Result<(), GatewayError> {
        let state = self.state.lock();
        let current = state
            .positions
            .get(&order.instrument)
            .copied()
            .unwrap_or_default();
        let projected = current.size + order.side.sign() * order.amount;
        if projected.abs() > self.limits().max_position_size {
            return Err(Self::reject("would exceed position limit"));
        }
        Ok(())
    }

    fn check_leverage(&self, order: &Order) -> Result<(), GatewayError> {
        let price = if order.price > 0.0 {
            order.price
        } else {
            let book = self.books.book(&order.instrument);
            let reference = match order.side {
                Side::Buy => book.best_ask(),
                Side::Sell => book.best_bid(),
            };
            if reference <= 0.0 {
                return Err(GatewayError::PriceUnknown);
            }
            reference
        };

        let limits = self.limits();
        let notional = order.amount * price;
        let implied_margin = notional / limits.max_leverage;
        if implied_margin < limits.min_margin {
            return Err(Self::reject("would exceed leverage limit"));
        }
        Ok(())
    }

    /// Placeholder hook: always passes until margin accounting beyond
    /// the notional/leverage estimate above is needed.
    fn check_margin(&self, _order: &Order) -> Result<(), GatewayError> {
        Ok(())
    }

    /// Placeholder hook: per-instrument throttling lives in the Order
    /// Manager's admission rate limiter, not here.
    fn check_rate(&self, _order: &Order) -> Result<(), GatewayError> {
        Ok(())
    }

    /// Fold a fill into the tracked position for `instrument`.
    pub fn update_position(&self, instrument: &str, signed_amount: f64, price: f64) {
        let mut state = self.state.lock();
        state
            .positions
            .entry(instrument.to_string())
            .or_default()
            .apply_fill(signed_amount, price);
    }

    pub fn position(&self, instrument: &str) -> Position {
        self.state
            .lock()
            .positions
            .get(instrument)
            .copied()
            .unwrap_or_default()
    }

    pub fn positions(&self) -> HashMap<String, Position> {
        self.state.lock().positions.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::OrderType;

    fn engine_with_limits(limits: RiskLimits) -> RiskEngine {
        RiskEngine::new(limits, Arc::new(OrderBookRegistry::new()))
    }

    #[test]
    fn order_over_max_size_is_rejected() {
        let engine = engine_with_limits(RiskLimits { max_order_size: 1.0, ..Default::default() });
        let order = Order::new("BTC-PERPETUAL", Side::Buy, 2.0, 30000.0, OrderType::Limit);
        assert!(matches!(engine.validate(&order), Err(GatewayError::RiskRejected { .. })));
    }

    #[test]
    fn position_limit_accounts_for_existing_exposure() {
        let engine = engine_with_limits(RiskLimits { max_position_size: 1.0, max_order_size: 10.0, ..Default::default() });
        engine.update_position("BTC-PERPETUAL", 0.8, 30000.0);
        let order = Order::new("BTC-PERPETUAL", Side::Buy, 0.5, 30000.0, OrderType::Limit);
        assert!(matches!(engine.validate(&order), Err(GatewayError::RiskRejected { .. })));
    }

    #[test]
    fn market_order_with_no_book_snapshot_is_price_unknown() {
        let engine = engine_with_limits(RiskLimits::default());
        let order = Order::new("BTC-PERPETUAL", Side::Buy, 0.1, 0.0, OrderType::Market);
        assert!(matches!(engine.validate(&order), Err(GatewayError::PriceUnknown)));
    }

    #[test]
    fn well_formed_limit_order_clears_all_checks() {
        let engine = engine_with_limits(RiskLimits::default());
        let order = Order::new("BTC-PERPETUAL", Side::Buy, 0.1, 30000.0, OrderType::Limit);
        assert!(engine.validate(&order).is_ok());
    }
}
