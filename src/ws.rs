//! WebSocket runners and snapshot refreshers for a venue session.
//!
//! Both streams push raw frames into the session's single ingress queue;
//! the scheduled REST refreshers interleave their snapshots through the
//! same queue, which is what keeps `seq_id` monotonic across snapshot and
//! delta writes. Every task here watches the session's shutdown token and
//! exits at its next suspension point.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

use crate::dispatch::{Feed, Stream};
use crate::endpoints::op;
use crate::http::{Backoff, RestApi, RetryPolicy};
use crate::venues::{PrivateAuth, VenuePort};

/// Everything that flows into the session's ingress consumer.
#[derive(Debug)]
pub enum Ingress {
    Public(Value),
    Private(Value),
    Refresh(Feed, Value),
}

#[derive(Debug, Clone)]
pub struct WsConfig {
    pub connect_timeout: Duration,
    pub keepalive_secs: u64,
    pub reconnect: RetryPolicy,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            keepalive_secs: 20,
            reconnect: RetryPolicy {
                max_attempts: u32::MAX,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
            },
        }
    }
}

enum PumpEnd {
    Shutdown,
    Disconnected,
}

fn shutting_down(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Public market-data stream with resubscribe-on-reconnect. Each successful
/// (re)subscribe bumps the resync epoch so the refreshers force a snapshot.
pub async fn run_public(
    port: Arc<dyn VenuePort>,
    cfg: WsConfig,
    tx: mpsc::Sender<Ingress>,
    mut shutdown: watch::Receiver<bool>,
    resync: watch::Sender<u64>,
) {
    let mut backoff = Backoff::new(&cfg.reconnect);

    loop {
        if shutting_down(&shutdown) {
            break;
        }

        let url = port.public_ws_url();
        let subs = port.public_subscriptions();
        match pump(&*port, Stream::Public, &url, &subs, &cfg, &tx, &mut shutdown).await {
            Ok(PumpEnd::Shutdown) => break,
            Ok(PumpEnd::Disconnected) => {
                warn!(venue = port.name(), "public stream disconnected");
            }
            Err(e) => {
                warn!(venue = port.name(), "public stream error: {e}");
            }
        }

        if shutting_down(&shutdown) {
            break;
        }
        let delay = backoff.next_delay();
        info!(venue = port.name(), "reconnecting public stream in {delay:?}");
        sleep(delay).await;
        // Force a snapshot refresh alongside the resubscribe.
        resync.send_modify(|epoch| *epoch += 1);
    }
}

/// Private account stream. Authentication is venue-specific: a REST-issued
/// listen key on the URL, in-band auth frames, or nothing at all for
/// venues whose account channels ride the public socket.
pub async fn run_private(
    port: Arc<dyn VenuePort>,
    cfg: WsConfig,
    api: Arc<RestApi>,
    tx: mpsc::Sender<Ingress>,
    mut shutdown: watch::Receiver<bool>,
) {
    let auth = port.private_auth();
    if auth == PrivateAuth::None && port.private_subscriptions().is_empty() {
        return;
    }

    let mut backoff = Backoff::new(&cfg.reconnect);

    loop {
        if shutting_down(&shutdown) {
            break;
        }

        let (url, setup) = match auth {
            PrivateAuth::ListenKey { .. } => {
                let key = match api.create_listen_key().await {
                    Ok(body) => port.listen_key_from(&body),
                    Err(e) => {
                        warn!(venue = port.name(), "listen key request failed: {e}");
                        None
                    }
                };
                match key {
                    Some(key) => {
                        info!(venue = port.name(), "listen key issued");
                        (format!("{}/ws/{}", port.private_ws_url(), key), Vec::new())
                    }
                    None => {
                        sleep(backoff.next_delay()).await;
                        continue;
                    }
                }
            }
            PrivateAuth::InBand => {
                let mut setup = port.private_auth_messages();
                setup.extend(port.private_subscriptions());
                (port.private_ws_url(), setup)
            }
            PrivateAuth::None => (port.private_ws_url(), port.private_subscriptions()),
        };

        let ping_task = match auth {
            PrivateAuth::ListenKey { ping_secs } => {
                let api = api.clone();
                let name = port.name();
                let mut shutdown = shutdown.clone();
                Some(tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = sleep(Duration::from_secs(ping_secs)) => {}
                            _ = shutdown.changed() => break,
                        }
                        if let Err(e) = api.ping_listen_key().await {
                            // The socket drops on a truly expired key and the
                            // outer loop re-issues a fresh one.
                            warn!(venue = name, "listen key ping failed: {e}");
                        }
                    }
                }))
            }
            _ => None,
        };

        let end = pump(&*port, Stream::Private, &url, &setup, &cfg, &tx, &mut shutdown).await;
        if let Some(task) = ping_task {
            task.abort();
        }

        match end {
            Ok(PumpEnd::Shutdown) => break,
            Ok(PumpEnd::Disconnected) => warn!(venue = port.name(), "private stream disconnected"),
            Err(e) => warn!(venue = port.name(), "private stream error: {e}"),
        }

        if shutting_down(&shutdown) {
            break;
        }
        let delay = backoff.next_delay();
        info!(venue = port.name(), "reconnecting private stream in {delay:?}");
        sleep(delay).await;
    }
}

async fn pump(
    port: &dyn VenuePort,
    stream: Stream,
    url: &str,
    setup: &[Value],
    cfg: &WsConfig,
    tx: &mpsc::Sender<Ingress>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<PumpEnd, crate::error::CoreError> {
    use crate::error::CoreError;

    let connected = timeout(cfg.connect_timeout, connect_async(url)).await;
    let (ws, response) = match connected {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => return Err(CoreError::Transport(format!("ws connect: {e}"))),
        Err(_) => return Err(CoreError::Transport("ws connect timeout".into())),
    };
    info!(venue = port.name(), ?stream, status = ?response.status(), "ws connected");

    let (mut write, mut read) = ws.split();
    for msg in setup {
        if let Err(e) = write.send(Message::Text(msg.to_string())).await {
            return Err(CoreError::Transport(format!("ws subscribe: {e}")));
        }
    }

    // The sink lives in the keepalive task from here on.
    let keepalive = port.keepalive();
    let keepalive_secs = cfg.keepalive_secs;
    let writer = tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(keepalive_secs));
        tick.tick().await;
        loop {
            tick.tick().await;
            let frame = match &keepalive {
                Some(msg) => Message::Text(msg.to_string()),
                None => Message::Ping(Vec::new()),
            };
            if write.send(frame).await.is_err() {
                break;
            }
        }
    });

    let end = loop {
        tokio::select! {
            _ = shutdown.changed() => break PumpEnd::Shutdown,
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                        // Some venues batch events into arrays.
                        let frames = match value {
                            Value::Array(items) => items,
                            other => vec![other],
                        };
                        for frame in frames {
                            let ingress = match stream {
                                Stream::Public => Ingress::Public(frame),
                                Stream::Private => Ingress::Private(frame),
                            };
                            if tx.send(ingress).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Some(Ok(Message::Close(_))) => break PumpEnd::Disconnected,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(venue = port.name(), ?stream, "ws read error: {e}");
                    break PumpEnd::Disconnected;
                }
                None => break PumpEnd::Disconnected,
            }
        }
    };

    writer.abort();
    Ok(end)
}

// ─────────────────────────────────────────────────────────
// Snapshot refreshers
// ─────────────────────────────────────────────────────────

fn snapshot_op(feed: Feed) -> &'static str {
    match feed {
        Feed::Orderbook => op::GET_ORDERBOOK,
        Feed::Trades => op::GET_TRADES,
        Feed::Candles => op::GET_OHLCV,
        Feed::Ticker => op::GET_TICKER,
        Feed::Orders => op::GET_OPEN_ORDERS,
        Feed::Position => op::GET_POSITION,
    }
}

/// Periodic REST snapshot for one feed, independent of the stream, to
/// correct drift. Fires immediately at startup and whenever the resync
/// epoch bumps (i.e. after a reconnect).
pub async fn run_refresher(
    feed: Feed,
    interval_secs: u64,
    api: Arc<RestApi>,
    tx: mpsc::Sender<Ingress>,
    mut shutdown: watch::Receiver<bool>,
    mut resync: watch::Receiver<u64>,
) {
    let operation = snapshot_op(feed);
    if !api.venue().endpoints().contains(operation) {
        return;
    }

    loop {
        match api.get_snapshot(operation).await {
            Ok(body) => {
                if tx.send(Ingress::Refresh(feed, body)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(venue = api.venue().name(), feed = feed.name(), "snapshot fetch failed: {e}");
            }
        }

        tokio::select! {
            _ = sleep(Duration::from_secs(interval_secs)) => {}
            changed = resync.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}
