//! Per-venue session: owns the live state, spawns the stream readers,
//! refreshers and keepalive, and funnels every mutation through a single
//! ingress consumer so no two writers ever race.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::dispatch::{Dispatcher, Feed, Stream};
use crate::endpoints::op;
use crate::error::CoreError;
use crate::http::{RestApi, RestClient};
use crate::oms::Oms;
use crate::state::{LiveState, StateHandle};
use crate::venues::VenuePort;
use crate::ws::{self, Ingress};

pub struct VenueSession {
    port: Arc<dyn VenuePort>,
    state: StateHandle,
    api: Arc<RestApi>,
    config: SessionConfig,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl VenueSession {
    /// Warm up against REST, then spawn the whole task set. Returns once
    /// the session is live; data flows in the background.
    pub async fn spawn(port: Arc<dyn VenuePort>, config: SessionConfig) -> Result<Self, CoreError> {
        let state = StateHandle::new(LiveState::new(
            port.symbol(),
            config.orderbook_depth,
            config.trades_len,
            config.candles_len,
        ));
        let client = RestClient::new(config.request_timeout, config.rest_retry.clone())?;
        let api = Arc::new(RestApi::new(port.clone(), client));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (ingress_tx, ingress_rx) = mpsc::channel::<Ingress>(1024);
        let (resync_tx, resync_rx) = watch::channel(0u64);

        warmup(&*port, &api, &state).await;

        let mut handles = Vec::new();

        handles.push(tokio::spawn(ingress_loop(
            port.clone(),
            state.clone(),
            ingress_rx,
            shutdown_rx.clone(),
        )));

        handles.push(tokio::spawn(ws::run_public(
            port.clone(),
            config.ws.clone(),
            ingress_tx.clone(),
            shutdown_rx.clone(),
            resync_tx,
        )));

        handles.push(tokio::spawn(ws::run_private(
            port.clone(),
            config.ws.clone(),
            api.clone(),
            ingress_tx.clone(),
            shutdown_rx.clone(),
        )));

        for feed in [Feed::Orderbook, Feed::Trades, Feed::Candles, Feed::Ticker] {
            handles.push(tokio::spawn(ws::run_refresher(
                feed,
                config.refresh_secs,
                api.clone(),
                ingress_tx.clone(),
                shutdown_rx.clone(),
                resync_rx.clone(),
            )));
        }

        handles.push(tokio::spawn(bootstrap_account(
            port.clone(),
            api.clone(),
            ingress_tx,
        )));

        info!(venue = port.name(), symbol = port.symbol(), "session live");
        Ok(Self {
            port,
            state,
            api,
            config,
            shutdown: shutdown_tx,
            handles,
        })
    }

    pub fn state(&self) -> StateHandle {
        self.state.clone()
    }

    pub fn api(&self) -> Arc<RestApi> {
        self.api.clone()
    }

    pub fn venue(&self) -> &Arc<dyn VenuePort> {
        &self.port
    }

    /// An OMS bound to this session's live state.
    pub fn oms(&self) -> Oms {
        Oms::new(self.api.clone(), self.state.clone(), self.config.oms.clone())
    }

    /// Flip the shared token and reap every subtask. Subtasks exit at
    /// their next suspension point; stragglers mid-backoff are aborted.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles.drain(..) {
            handle.abort();
            let _ = handle.await;
        }
        info!(venue = self.port.name(), "session closed");
    }
}

async fn warmup(port: &dyn VenuePort, api: &RestApi, state: &StateHandle) {
    if !port.endpoints().contains(op::GET_INSTRUMENT_INFO) {
        return;
    }
    match api.get_instrument_info().await {
        Ok(body) => match port.parse_instrument(&body) {
            Some((tick_size, lot_size)) => {
                let mut live = state.write().await;
                live.tick_size = tick_size;
                live.lot_size = lot_size;
                info!(venue = port.name(), tick_size, lot_size, "instrument warmup complete");
            }
            None => warn!(venue = port.name(), "instrument info missing filters"),
        },
        Err(e) => warn!(venue = port.name(), "instrument warmup failed: {e}"),
    }
}

/// The single writer. Streamed frames and scheduled snapshots apply here,
/// in arrival order, which is what upholds the seq-id discipline.
async fn ingress_loop(
    port: Arc<dyn VenuePort>,
    state: StateHandle,
    mut rx: mpsc::Receiver<Ingress>,
    mut shutdown: watch::Receiver<bool>,
) {
    let dispatcher = Dispatcher::new(&*port);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            msg = rx.recv() => match msg {
                Some(Ingress::Public(frame)) => {
                    let mut live = state.write().await;
                    dispatcher.dispatch(&*port, Stream::Public, &mut live, &frame);
                }
                Some(Ingress::Private(frame)) => {
                    let mut live = state.write().await;
                    dispatcher.dispatch(&*port, Stream::Private, &mut live, &frame);
                }
                Some(Ingress::Refresh(feed, body)) => {
                    let mut live = state.write().await;
                    dispatcher.refresh(&*port, feed, &mut live, &body);
                }
                None => break,
            }
        }
    }
}

/// One-shot startup snapshot of open orders and position, for venues that
/// expose them over REST.
async fn bootstrap_account(
    port: Arc<dyn VenuePort>,
    api: Arc<RestApi>,
    tx: mpsc::Sender<Ingress>,
) {
    for (feed, operation) in [(Feed::Orders, op::GET_OPEN_ORDERS), (Feed::Position, op::GET_POSITION)] {
        if !port.endpoints().contains(operation) {
            continue;
        }
        match api.get_snapshot(operation).await {
            Ok(body) => {
                if tx.send(Ingress::Refresh(feed, body)).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!(venue = port.name(), feed = feed.name(), "account bootstrap failed: {e}"),
        }
    }
}
