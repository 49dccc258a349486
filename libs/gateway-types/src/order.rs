use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Endpoint fragment used when building the `private/<side>` method name.
    pub fn as_method_fragment(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    /// Sign applied to a filled amount when folding it into a position.
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Failed,
}

impl OrderStatus {
    /// Terminal states are sticky: once reached an order never transitions
    /// further and is dropped from the Active-Order Table.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Rejected
                | OrderStatus::Failed
        )
    }
}

/// Parse a raw `order_state` string from the exchange into our status enum.
/// Unrecognized states are treated as `Pending` rather than failing the
/// whole response mapping.
pub fn parse_order_state(raw: &str) -> OrderStatus {
    match raw {
        "open" | "new" => OrderStatus::New,
        "filled" => OrderStatus::Filled,
        "partially_filled" => OrderStatus::PartiallyFilled,
        "cancelled" | "canceled" => OrderStatus::Cancelled,
        "rejected" => OrderStatus::Rejected,
        "failed" => OrderStatus::Failed,
        _ => OrderStatus::Pending,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Empty until the exchange assigns one on the first response.
    pub order_id: String,
    pub instrument: String,
    pub side: Side,
    pub amount: f64,
    /// Ignored for market orders.
    pub price: f64,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub filled_amount: f64,
    pub average_filled_price: f64,
    pub created_at: DateTime<Utc>,
    pub rejection_reason: Option<String>,
}

impl Order {
    pub fn new(instrument: impl Into<String>, side: Side, amount: f64, price: f64, order_type: OrderType) -> Self {
        Self {
            order_id: String::new(),
            instrument: instrument.into(),
            side,
            amount,
            price,
            order_type,
            status: OrderStatus::New,
            filled_amount: 0.0,
            average_filled_price: 0.0,
            created_at: Utc::now(),
            rejection_reason: None,
        }
    }

    pub fn reject(&mut self, reason: impl Into<String>) {
        self.status = OrderStatus::Rejected;
        self.rejection_reason = Some(reason.into());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `filled_amount <= amount` and `status == filled <=> filled_amount == amount`.
    pub fn invariants_hold(&self) -> bool {
        self.filled_amount <= self.amount
            && (self.status == OrderStatus::Filled) == (self.filled_amount >= self.amount && self.amount > 0.0)
    }
}

/// Immutable record of one matched execution event. Emitted exactly once
/// per fill by the Execution Worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub amount: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_order_is_not_terminal() {
        let order = Order::new("BTC-PERPETUAL", Side::Buy, 1.0, 30000.0, OrderType::Limit);
        assert!(!order.is_terminal());
        assert!(order.invariants_hold());
    }

    #[test]
    fn rejected_order_is_terminal_and_carries_reason() {
        let mut order = Order::new("BTC-PERPETUAL", Side::Buy, 1.0, 30000.0, OrderType::Limit);
        order.reject("Rate limit exceeded");
        assert!(order.is_terminal());
        assert_eq!(order.rejection_reason.as_deref(), Some("Rate limit exceeded"));
    }

    #[test]
    fn filled_state_matches_filled_amount() {
        let mut order = Order::new("BTC-PERPETUAL", Side::Buy, 1.0, 30000.0, OrderType::Limit);
        order.filled_amount = 1.0;
        order.status = OrderStatus::Filled;
        assert!(order.invariants_hold());
    }

    #[test]
    fn parse_order_state_falls_back_to_pending() {
        assert_eq!(parse_order_state("open"), OrderStatus::New);
        assert_eq!(parse_order_state("untriggered"), OrderStatus::Pending);
    }
}
