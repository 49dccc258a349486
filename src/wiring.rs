//! Assembles every subsystem into one running gateway.
//!
//! Split out from `main` so integration tests can stand up the same
//! graph of subsystems against a config pointed at a stub transport.

use gateway_config::GatewayConfig;
use gateway_fanout::{FanoutHandle, FanoutServer};
use gateway_jsonrpc::RpcClient;
use gateway_marketdata::{MarketDataHandle, MarketDataStreamer};
use gateway_orderbook::OrderBookRegistry;
use gateway_orders::OrderManager;
use gateway_pricewatch::{PriceWatch, PriceWatchHandle};
use gateway_risk::RiskEngine;
use gateway_session::SessionManager;
use gateway_types::GatewayError;
use std::sync::Arc;
use tracing::info;

/// Every subsystem handle the driver binary needs to hold onto for the
/// lifetime of the process, plus the shared state they were built from.
pub struct Gateway {
    pub session: Arc<SessionManager>,
    pub books: Arc<OrderBookRegistry>,
    pub risk: Arc<RiskEngine>,
    pub orders: Arc<OrderManager>,
    pub market_data: MarketDataHandle,
    pub price_watch: PriceWatchHandle,
    pub fanout: FanoutHandle,
}

impl Gateway {
    /// Authenticate against the exchange, then spawn every background
    /// subsystem thread. Returns once the initial handshake succeeds and
    /// the fan-out server has started listening.
    pub async fn start(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let rpc = Arc::new(RpcClient::new(config.rest_base_url.clone()));
        let session = Arc::new(SessionManager::new(
            rpc.clone(),
            config.client_id.clone(),
            config.client_secret.clone(),
        ));
        session.authenticate().await?;
        info!("initial authentication succeeded");

        let books = Arc::new(OrderBookRegistry::new());
        let risk = Arc::new(RiskEngine::new(config.risk_limits, books.clone()));
        let orders = Arc::new(OrderManager::new(
            rpc.clone(),
            session.clone(),
            risk.clone(),
            config.max_requests_per_second,
        ));

        let fanout = FanoutServer::spawn(
            config.listen_port,
            std::fs::read(&config.cert_path).map_err(|e| {
                GatewayError::ConfigInvalid(format!("failed to read {}: {e}", config.cert_path))
            })?,
            std::fs::read(&config.key_path).map_err(|e| {
                GatewayError::ConfigInvalid(format!("failed to read {}: {e}", config.key_path))
            })?,
        );

        let fanout_for_frames = clone_fanout_broadcaster(&fanout);
        let market_data = MarketDataStreamer::spawn(
            config.ws_url.clone(),
            books.clone(),
            Box::new(move |instrument, raw_frame| fanout_for_frames(instrument, raw_frame)),
        );

        let release_orders = orders.clone();
        let price_watch = PriceWatch::spawn(
            books.clone(),
            Box::new(move |order| release_orders.release_from_price_watch(order)),
        );

        Ok(Self { session, books, risk, orders, market_data, price_watch, fanout })
    }

    /// Stop every background subsystem thread in dependency order:
    /// nothing should keep submitting orders or touching books once
    /// shutdown begins.
    pub fn shutdown(&self) {
        self.price_watch.stop();
        self.market_data.stop();
        self.orders.shutdown();
        self.fanout.stop();
        info!("gateway shutdown complete");
    }
}

/// `FanoutHandle::broadcast` takes `&self`, so this just clones the
/// handle's cheap `Arc`/`Clone` internals behind a closure the
/// Market-Data Streamer can own independently.
fn clone_fanout_broadcaster(fanout: &FanoutHandle) -> impl Fn(&str, &str) + Send + Sync + 'static {
    let fanout = fanout.clone();
    move |instrument: &str, raw_frame: &str| fanout.broadcast(instrument, raw_frame)
}
