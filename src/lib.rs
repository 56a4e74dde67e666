//! perpmux — a multi-venue market-data and execution core for perpetual
//! futures venues.
//!
//! Each venue runs as one [`session::VenueSession`]: authenticated REST
//! and WebSocket sessions, a streaming order-book engine, and handlers
//! that normalize venue payloads into one canonical [`state::LiveState`].
//! Strategies read snapshots through [`state::StateHandle`] and hand
//! intended order ladders to [`oms::Oms`], which issues the minimal set
//! of create/cancel calls.

pub mod config;
pub mod dispatch;
pub mod endpoints;
pub mod error;
pub mod http;
pub mod oms;
pub mod session;
pub mod state;
pub mod types;
pub mod venues;
pub mod ws;

pub use config::{Credentials, SessionConfig};
pub use error::{CoreError, ErrorClass};
pub use oms::{Oms, OmsConfig};
pub use session::VenueSession;
pub use state::{LiveState, StateHandle};
pub use types::{OrderType, PositionDirection, Side, TimeInForce};
