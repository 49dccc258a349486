use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_order_size: f64,
    pub max_position_size: f64,
    pub max_leverage: f64,
    pub min_margin: f64,
    pub max_daily_loss: f64,
    pub max_orders_per_second: u32,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_order_size: 1.0,
            max_position_size: 5.0,
            max_leverage: 10.0,
            min_margin: 0.1,
            max_daily_loss: 1000.0,
            max_orders_per_second: 5,
        }
    }
}
