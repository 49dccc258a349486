//! Market-Data Streamer — maintains the upstream WebSocket connection
//! used to keep the Order Book Engine current and to feed raw frames to
//! the Fan-out Server.
//!
//! Runs on its own OS thread driving a single-threaded Tokio runtime,
//! same as the other subsystems. Subscriptions are tracked locally so a
//! reconnect can replay them without the caller's involvement.

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use futures_util::{SinkExt, StreamExt};
use gateway_orderbook::OrderBookRegistry;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

#[derive(Debug)]
enum StreamCommand {
    Subscribe(String),
    Unsubscribe(String),
    Shutdown,
}

/// Invoked with `(instrument, raw_frame)` for every subscription update
/// received, so the Fan-out Server can rebroadcast it verbatim.
pub type FrameCallback = Box<dyn Fn(&str, &str) + Send + Sync>;

pub struct MarketDataHandle {
    tx: Sender<StreamCommand>,
}

impl MarketDataHandle {
    pub fn subscribe(&self, instrument: impl Into<String>) {
        let _ = self.tx.send(StreamCommand::Subscribe(instrument.into()));
    }

    pub fn unsubscribe(&self, instrument: impl Into<String>) {
        let _ = self.tx.send(StreamCommand::Unsubscribe(instrument.into()));
    }

    pub fn stop(&self) {
        let _ = self.tx.send(StreamCommand::Shutdown);
    }
}

pub struct MarketDataStreamer;

impl MarketDataStreamer {
    pub fn spawn(ws_url: String, books: Arc<OrderBookRegistry>, on_frame: FrameCallback) -> MarketDataHandle {
        let (tx, rx) = crossbeam_channel::unbounded();

        thread::Builder::new()
            .name("market-data-streamer".to_string())
            .spawn(move || {
                info!("market data streamer thread started");
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to create tokio runtime for market data streamer");
                runtime.block_on(run_loop(rx, ws_url, books, on_frame));
                info!("market data streamer thread stopped");
            })
            .expect("failed to spawn market data streamer thread");

        MarketDataHandle { tx }
    }
}

async fn run_loop(
    rx: Receiver<StreamCommand>,
    ws_url: String,
    books: Arc<OrderBookRegistry>,
    on_frame: FrameCallback,
) {
    let mut subscribed: HashSet<String> = HashSet::new();
    let mut backoff = Duration::from_millis(500);

    loop {
        if drain_commands(&rx, &mut subscribed) {
            return;
        }

        match connect_async(&ws_url).await {
            Ok((stream, _)) => {
                info!(ws_url, "connected to market data feed");
                backoff = Duration::from_millis(500);
                let (mut write, mut read) = stream.split();

                if !subscribed.is_empty() {
                    send_subscribe(&mut write, subscribed.iter()).await;
                }

                loop {
                    tokio::select! {
                        frame = read.next() => {
                            match frame {
                                Some(Ok(Message::Text(text))) => {
                                    handle_frame(&text, &books, &on_frame);
                                }
                                Some(Ok(Message::Ping(payload))) => {
                                    let _ = write.send(Message::Pong(payload)).await;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    error!(%e, "market data stream error");
                                    break;
                                }
                                None => {
                                    warn!("market data stream closed by peer");
                                    break;
                                }
                            }
                        }
                        _ = tokio::time::sleep(Duration::from_millis(100)) => {
                            match drain_one_command(&rx, &mut subscribed) {
                                DrainOutcome::Shutdown => return,
                                DrainOutcome::NewSubscription(instrument) => {
                                    send_subscribe(&mut write, std::iter::once(&instrument)).await;
                                }
                                DrainOutcome::Unsubscription(instrument) => {
                                    send_unsubscribe(&mut write, std::iter::once(&instrument)).await;
                                }
                                DrainOutcome::None => {}
                            }
                        }
                    }
                }
            }
            Err(e) => {
                error!(%e, "failed to connect to market data feed, retrying");
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(Duration::from_secs(30));
    }
}

enum DrainOutcome {
    None,
    NewSubscription(String),
    Unsubscription(String),
    Shutdown,
}

fn drain_one_command(rx: &Receiver<StreamCommand>, subscribed: &mut HashSet<String>) -> DrainOutcome {
    match rx.try_recv() {
        Ok(StreamCommand::Subscribe(instrument)) => {
            if subscribed.insert(instrument.clone()) {
                DrainOutcome::NewSubscription(instrument)
            } else {
                DrainOutcome::None
            }
        }
        Ok(StreamCommand::Unsubscribe(instrument)) => {
            subscribed.remove(&instrument);
            DrainOutcome::Unsubscription(instrument)
        }
        Ok(StreamCommand::Shutdown) => DrainOutcome::Shutdown,
        Err(TryRecvError::Empty) => DrainOutcome::None,
        Err(TryRecvError::Disconnected) => DrainOutcome::Shutdown,
    }
}

/// Drain every pending command without touching the socket, used before
/// a (re)connect attempt. Returns `true` if shutdown was requested.
fn drain_commands(rx: &Receiver<StreamCommand>, subscribed: &mut HashSet<String>) -> bool {
    loop {
        match rx.try_recv() {
            Ok(StreamCommand::Subscribe(instrument)) => {
                subscribed.insert(instrument);
            }
            Ok(StreamCommand::Unsubscribe(instrument)) => {
                subscribed.remove(&instrument);
            }
            Ok(StreamCommand::Shutdown) => return true,
            Err(TryRecvError::Empty) => return false,
            Err(TryRecvError::Disconnected) => return true,
        }
    }
}

async fn send_subscribe<'a>(
    write: &mut (impl futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    instruments: impl Iterator<Item = &'a String>,
) {
    let channels: Vec<String> = instruments.map(|i| format!("book.{i}.100ms")).collect();
    if channels.is_empty() {
        return;
    }
    let payload = serde_json::json!({
        "jsonrpc": "2.0",
        "method": "public/subscribe",
        "params": { "channels": channels },
    });
    debug!(?channels, "subscribing to market data channels");
    let _ = write.send(Message::Text(payload.to_string())).await;
}

async fn send_unsubscribe<'a>(
    write: &mut (impl futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    instruments: impl Iterator<Item = &'a String>,
) {
    let channels: Vec<String> = instruments.map(|i| format!("book.{i}.100ms")).collect();
    if channels.is_empty() {
        return;
    }
    let payload = serde_json::json!({
        "jsonrpc": "2.0",
        "method": "public/unsubscribe",
        "params": { "channels": channels },
    });
    let _ = write.send(Message::Text(payload.to_string())).await;
}

#[derive(Debug, Deserialize)]
struct Notification {
    method: String,
    params: Option<NotificationParams>,
}

#[derive(Debug, Deserialize)]
struct NotificationParams {
    channel: String,
    data: BookDelta,
}

#[derive(Debug, Deserialize, Default)]
struct BookDelta {
    #[serde(default)]
    bids: Vec<(f64, f64)>,
    #[serde(default)]
    asks: Vec<(f64, f64)>,
}

fn handle_frame(text: &str, books: &Arc<OrderBookRegistry>, on_frame: &FrameCallback) {
    let Ok(notification) = serde_json::from_str::<Notification>(text) else {
        return;
    };
    if notification.method != "subscription" {
        return;
    }
    let Some(params) = notification.params else {
        return;
    };
    let Some(instrument) = params.channel.strip_prefix("book.").and_then(|s| s.split('.').next()) else {
        return;
    };

    let book = books.book(instrument);
    for (price, quantity) in params.data.bids {
        book.update_bid(price, quantity);
    }
    for (price, quantity) in params.data.asks {
        book.update_ask(price, quantity);
    }

    on_frame(instrument, text);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn subscription_frame_updates_the_book() {
        let books = Arc::new(OrderBookRegistry::new());
        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "subscription",
            "params": {
                "channel": "book.BTC-PERPETUAL.100ms",
                "data": { "bids": [[100.0, 1.0]], "asks": [[101.0, 2.0]] }
            }
        })
        .to_string();

        let seen = Arc::new(AtomicBool::new(false));
        let seen_clone = seen.clone();
        let callback: FrameCallback = Box::new(move |instrument, _raw| {
            assert_eq!(instrument, "BTC-PERPETUAL");
            seen_clone.store(true, Ordering::SeqCst);
        });

        handle_frame(&frame, &books, &callback);

        let book = books.book("BTC-PERPETUAL");
        assert_eq!(book.best_bid(), 100.0);
        assert_eq!(book.best_ask(), 101.0);
        assert!(seen.load(Ordering::SeqCst));
    }

    #[test]
    fn non_subscription_frames_are_ignored() {
        let books = Arc::new(OrderBookRegistry::new());
        let callback: FrameCallback = Box::new(|_, _| panic!("should not be called"));
        handle_frame(r#"{"jsonrpc":"2.0","id":1,"result":"ok"}"#, &books, &callback);
    }
}
