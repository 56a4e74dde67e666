//! Routes inbound frames to per-topic handlers.
//!
//! Each venue registers a public and a private topic map. The dispatcher
//! extracts the topic identifier from the frame (venue-specific field),
//! looks up the handler and invokes it. Control/ack frames are ignored;
//! topics nobody registered fail loudly in the log. Per-frame handler
//! errors are swallowed here so one bad frame cannot kill the stream.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, warn};

use crate::error::CoreError;
use crate::state::LiveState;
use crate::venues::VenuePort;

/// The canonical feeds a venue can populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feed {
    Orderbook,
    Trades,
    Candles,
    Ticker,
    Orders,
    Position,
}

impl Feed {
    pub fn name(self) -> &'static str {
        match self {
            Feed::Orderbook => "orderbook",
            Feed::Trades => "trades",
            Feed::Candles => "ohlcv",
            Feed::Ticker => "ticker",
            Feed::Orders => "orders",
            Feed::Position => "position",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Public,
    Private,
}

/// How a port classified an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// Carries data for the named topic.
    Topic(String),
    /// Subscription confirmation, auth ack, pong and friends.
    Control,
    /// Nothing recognizable; surfaced loudly.
    Unknown,
}

/// A per-topic normalizer. `refresh` consumes a full REST snapshot,
/// `process` an incremental streaming frame.
pub trait Handler: Send + Sync {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError>;
    fn process(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError>;
}

pub struct Dispatcher {
    // A topic can feed several handlers (e.g. one account channel carrying
    // both orders and positions).
    public: HashMap<String, Vec<Arc<dyn Handler>>>,
    private: HashMap<String, Vec<Arc<dyn Handler>>>,
}

impl Dispatcher {
    /// Build the topic→handler maps from the port's static tables.
    pub fn new(port: &dyn VenuePort) -> Self {
        let mut public: HashMap<String, Vec<Arc<dyn Handler>>> = HashMap::new();
        for (topic, feed) in port.topics(Stream::Public) {
            if let Some(handler) = port.handler(feed) {
                public.entry(topic).or_default().push(handler);
            }
        }
        let mut private: HashMap<String, Vec<Arc<dyn Handler>>> = HashMap::new();
        for (topic, feed) in port.topics(Stream::Private) {
            if let Some(handler) = port.handler(feed) {
                private.entry(topic).or_default().push(handler);
            }
        }
        Self { public, private }
    }

    pub fn dispatch(
        &self,
        port: &dyn VenuePort,
        stream: Stream,
        state: &mut LiveState,
        frame: &Value,
    ) {
        let map = match stream {
            Stream::Public => &self.public,
            Stream::Private => &self.private,
        };

        match port.classify_frame(stream, frame) {
            FrameKind::Topic(topic) => match map.get(&topic) {
                Some(handlers) => {
                    for handler in handlers {
                        if let Err(e) = handler.process(state, frame) {
                            warn!(venue = port.name(), %topic, "dropping frame: {e}");
                        }
                    }
                }
                None => error!(venue = port.name(), %topic, "no handler registered for topic"),
            },
            FrameKind::Control => {}
            FrameKind::Unknown => {
                error!(venue = port.name(), ?stream, "unrecognized frame: {frame}");
            }
        }
    }

    /// Apply a scheduled REST snapshot for one feed.
    pub fn refresh(&self, port: &dyn VenuePort, feed: Feed, state: &mut LiveState, payload: &Value) {
        match port.handler(feed) {
            Some(handler) => {
                if let Err(e) = handler.refresh(state, payload) {
                    warn!(venue = port.name(), feed = feed.name(), "snapshot refresh failed: {e}");
                }
            }
            None => warn!(venue = port.name(), feed = feed.name(), "no handler for feed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_names() {
        assert_eq!(Feed::Orderbook.name(), "orderbook");
        assert_eq!(Feed::Candles.name(), "ohlcv");
    }
}
