//! Fan-out Server — the TLS WebSocket endpoint external clients use to
//! subscribe to order book updates. Every accepted connection gets an
//! outbound queue; `broadcast` fans a message out to every connection
//! subscribed to the named instrument.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
struct ClientRequest {
    #[serde(rename = "type")]
    kind: String,
    instrument: Option<String>,
}

type ConnId = u64;

/// A boxed hook invoked with the raw text of every inbound client frame,
/// before (and regardless of) subscribe/unsubscribe parsing.
pub type MessageHandler = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct FanoutState {
    connections: HashMap<ConnId, mpsc::UnboundedSender<Message>>,
    subscriptions: HashMap<String, HashSet<ConnId>>,
}

impl FanoutState {
    fn on_close(&mut self, id: ConnId) {
        self.connections.remove(&id);
        for subscribers in self.subscriptions.values_mut() {
            subscribers.remove(&id);
        }
    }

    fn add_subscription(&mut self, id: ConnId, instrument: &str) {
        self.subscriptions.entry(instrument.to_string()).or_default().insert(id);
    }

    fn remove_subscription(&mut self, id: ConnId, instrument: &str) {
        if let Some(subscribers) = self.subscriptions.get_mut(instrument) {
            subscribers.remove(&id);
        }
    }

    fn is_subscribed(&self, id: ConnId, instrument: &str) -> bool {
        self.subscriptions
            .get(instrument)
            .map(|subscribers| subscribers.contains(&id))
            .unwrap_or(false)
    }
}

/// Shared registry plus a counter for minting connection ids.
#[derive(Clone, Default)]
struct Registry {
    state: Arc<Mutex<FanoutState>>,
    next_id: Arc<AtomicU64>,
    message_handler: Arc<Mutex<Option<MessageHandler>>>,
}

impl Registry {
    fn next_conn_id(&self) -> ConnId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Clone)]
pub struct FanoutHandle {
    registry: Registry,
    stop_flag: Arc<AtomicBool>,
}

impl FanoutHandle {
    /// Send `message` to every connection currently subscribed to
    /// `instrument`.
    pub fn broadcast(&self, instrument: &str, message: &str) {
        let state = self.registry.state.lock();
        let Some(subscribers) = state.subscriptions.get(instrument) else {
            return;
        };
        for id in subscribers {
            if let Some(sender) = state.connections.get(id) {
                let _ = sender.send(Message::Text(message.to_string()));
            }
        }
    }

    pub fn is_subscribed(&self, conn_id: u64, instrument: &str) -> bool {
        self.registry.state.lock().is_subscribed(conn_id, instrument)
    }

    pub fn subscriber_count(&self, instrument: &str) -> usize {
        self.registry
            .state
            .lock()
            .subscriptions
            .get(instrument)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    /// Register a hook invoked with the raw payload of every inbound
    /// client frame, replacing any previously-registered hook.
    pub fn set_message_handler(&self, handler: MessageHandler) {
        *self.registry.message_handler.lock() = Some(handler);
    }
}

pub struct FanoutServer;

impl FanoutServer {
    /// Load a PEM certificate/key pair and spawn the server on its own
    /// OS thread, listening on `port`.
    pub fn spawn(port: u16, cert_pem: Vec<u8>, key_pem: Vec<u8>) -> FanoutHandle {
        let registry = Registry::default();
        let stop_flag = Arc::new(AtomicBool::new(false));

        let handle = FanoutHandle {
            registry: registry.clone(),
            stop_flag: stop_flag.clone(),
        };

        thread::Builder::new()
            .name("fanout-server".to_string())
            .spawn(move || {
                info!("fanout server thread started");
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to create tokio runtime for fanout server");
                runtime.block_on(accept_loop(port, cert_pem, key_pem, registry, stop_flag));
                info!("fanout server thread stopped");
            })
            .expect("failed to spawn fanout server thread");

        handle
    }
}

async fn accept_loop(
    port: u16,
    cert_pem: Vec<u8>,
    key_pem: Vec<u8>,
    registry: Registry,
    stop_flag: Arc<AtomicBool>,
) {
    let identity = match native_tls::Identity::from_pkcs8(&cert_pem, &key_pem) {
        Ok(identity) => identity,
        Err(e) => {
            error!(%e, "failed to build TLS identity, fanout server not started");
            return;
        }
    };
    let acceptor = match native_tls::TlsAcceptor::new(identity) {
        Ok(acceptor) => tokio_native_tls::TlsAcceptor::from(acceptor),
        Err(e) => {
            error!(%e, "failed to build TLS acceptor, fanout server not started");
            return;
        }
    };

    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%e, port, "failed to bind fanout server listener");
            return;
        }
    };
    info!(port, "fanout server listening");

    while !stop_flag.load(Ordering::SeqCst) {
        let accepted = tokio::time::timeout(std::time::Duration::from_millis(200), listener.accept()).await;
        let (stream, addr) = match accepted {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                warn!(%e, "failed to accept connection");
                continue;
            }
            Err(_) => continue,
        };

        let acceptor = acceptor.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            match acceptor.accept(stream).await {
                Ok(tls_stream) => handle_connection(tls_stream, registry).await,
                Err(e) => warn!(%e, %addr, "TLS handshake failed"),
            }
        });
    }
}

async fn handle_connection(
    tls_stream: tokio_native_tls::TlsStream<tokio::net::TcpStream>,
    registry: Registry,
) {
    let ws_stream = match tokio_tungstenite::accept_async(tls_stream).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(%e, "WebSocket handshake failed");
            return;
        }
    };

    let id = registry.next_conn_id();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    registry.state.lock().connections.insert(id, outbound_tx);
    info!(conn_id = id, "fanout client connected");

    let (mut write, mut read) = ws_stream.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if write.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_client_message(&registry, id, &text),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(conn_id = id, %e, "fanout read error");
                break;
            }
        }
    }

    writer.abort();
    registry.state.lock().on_close(id);
    info!(conn_id = id, "fanout client disconnected");
}

fn handle_client_message(registry: &Registry, id: ConnId, text: &str) {
    let start = Instant::now();

    if let Some(handler) = registry.message_handler.lock().as_deref() {
        handler(text);
    }

    if let Ok(request) = serde_json::from_str::<ClientRequest>(text) {
        if let Some(instrument) = request.instrument {
            let mut state = registry.state.lock();
            match request.kind.as_str() {
                "subscribe" => state.add_subscription(id, &instrument),
                "unsubscribe" => state.remove_subscription(id, &instrument),
                _ => {}
            }
        }
    }

    debug!(conn_id = id, latency_us = start.elapsed().as_micros(), "inbound message handled");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_bookkeeping_tracks_membership() {
        let mut state = FanoutState::default();
        state.add_subscription(1, "BTC-PERPETUAL");
        state.add_subscription(2, "BTC-PERPETUAL");
        assert!(state.is_subscribed(1, "BTC-PERPETUAL"));
        state.remove_subscription(1, "BTC-PERPETUAL");
        assert!(!state.is_subscribed(1, "BTC-PERPETUAL"));
        assert!(state.is_subscribed(2, "BTC-PERPETUAL"));
    }

    #[test]
    fn closing_a_connection_removes_it_from_every_subscription() {
        let mut state = FanoutState::default();
        state.add_subscription(1, "BTC-PERPETUAL");
        state.add_subscription(1, "ETH-PERPETUAL");
        state.on_close(1);
        assert!(!state.is_subscribed(1, "BTC-PERPETUAL"));
        assert!(!state.is_subscribed(1, "ETH-PERPETUAL"));
    }

    #[test]
    fn message_handler_sees_every_inbound_frame_including_unparseable_ones() {
        let registry = Registry::default();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        *registry.message_handler.lock() = Some(Box::new(move |text| sink.lock().push(text.to_string())));

        handle_client_message(&registry, 1, r#"{"type":"subscribe","instrument":"BTC-PERPETUAL"}"#);
        handle_client_message(&registry, 1, "not json");

        assert_eq!(seen.lock().len(), 2);
        assert!(registry.state.lock().is_subscribed(1, "BTC-PERPETUAL"));
    }
}
