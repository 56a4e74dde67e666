//! Venue ports: everything venue-specific behind one capability set.
//!
//! A port is data plus a handful of functions: endpoint table, signing,
//! error map, subscription builders, topic maps and handlers. The session,
//! REST client and dispatcher are generic over this trait and never see a
//! venue string.

pub mod binance;
pub mod bybit;
pub mod dydx;
pub mod hyperliquid;

use std::sync::Arc;

use serde_json::Value;

use crate::dispatch::{Feed, FrameKind, Handler, Stream};
use crate::endpoints::EndpointTable;
use crate::error::{CoreError, ErrorClass};
use crate::http::SignedRequest;
use crate::state::Order;

/// How a venue authenticates its private stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivateAuth {
    /// No separate private stream: account channels ride the public socket
    /// keyed by the user address.
    None,
    /// REST-issued listen key appended to the WS URL and pinged on a timer.
    ListenKey { ping_secs: u64 },
    /// In-band auth message(s) sent right after connecting.
    InBand,
}

pub trait VenuePort: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    fn symbol(&self) -> &str;
    fn endpoints(&self) -> &EndpointTable;

    // ── REST ──
    fn sign(&self, operation: &str, payload: &Value) -> Result<SignedRequest, CoreError>;
    /// Classify a response body through the venue's code table. Unknown
    /// codes come back `ClientFatal` with the raw message captured.
    fn classify(&self, response: &Value) -> (ErrorClass, String);

    fn format_create(&self, order: &Order) -> Result<Value, CoreError>;
    fn format_amend(&self, order: &Order) -> Result<Value, CoreError>;
    fn format_cancel(&self, order: &Order) -> Result<Value, CoreError>;
    fn format_cancel_all(&self) -> Value;
    fn format_batch_create(&self, orders: &[Order]) -> Result<Value, CoreError> {
        let _ = orders;
        Err(CoreError::VenueFatal("batch create unsupported".into()))
    }
    fn format_batch_amend(&self, orders: &[Order]) -> Result<Value, CoreError> {
        let _ = orders;
        Err(CoreError::VenueFatal("batch amend unsupported".into()))
    }
    fn format_batch_cancel(&self, orders: &[Order]) -> Result<Value, CoreError> {
        let _ = orders;
        Err(CoreError::VenueFatal("batch cancel unsupported".into()))
    }
    /// Query parameters for the GET snapshot operations.
    fn query(&self, operation: &str) -> Value;

    // ── WebSocket ──
    fn public_ws_url(&self) -> String {
        self.endpoints().public_ws().to_string()
    }
    fn private_ws_url(&self) -> String {
        self.endpoints().private_ws().to_string()
    }
    fn public_subscriptions(&self) -> Vec<Value>;
    fn private_auth(&self) -> PrivateAuth {
        PrivateAuth::None
    }
    /// Auth frames for [`PrivateAuth::InBand`], built at connect time so
    /// expiries are fresh.
    fn private_auth_messages(&self) -> Vec<Value> {
        Vec::new()
    }
    fn private_subscriptions(&self) -> Vec<Value> {
        Vec::new()
    }
    /// Application-level keepalive frame, if the venue wants one.
    fn keepalive(&self) -> Option<Value> {
        None
    }
    /// Extract the listen key from the venue's create/ping response.
    fn listen_key_from(&self, response: &Value) -> Option<String> {
        let _ = response;
        None
    }

    // ── Dispatch ──
    fn classify_frame(&self, stream: Stream, frame: &Value) -> FrameKind;
    fn topics(&self, stream: Stream) -> Vec<(String, Feed)>;
    fn handler(&self, feed: Feed) -> Option<Arc<dyn Handler>>;
    /// Parse `(tick_size, lot_size)` out of the instrument-info response.
    fn parse_instrument(&self, response: &Value) -> Option<(f64, f64)> {
        let _ = response;
        None
    }
}

// ─────────────────────────────────────────────────────────
// Shared payload helpers
// ─────────────────────────────────────────────────────────

/// Read a JSON value as f64, accepting both number and string encodings;
/// venues disagree on which one prices arrive as.
pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse::<f64>().ok()))
}

pub(crate) fn field_f64(obj: &Value, field: &str) -> Option<f64> {
    obj.get(field).and_then(as_f64)
}

pub(crate) fn field_str<'a>(obj: &'a Value, field: &str) -> Option<&'a str> {
    obj.get(field).and_then(Value::as_str)
}

/// Parse `[[price, size], …]` rows, tolerating string-encoded numbers and
/// `{price, size}` objects.
pub(crate) fn parse_levels(value: &Value) -> Option<Vec<[f64; 2]>> {
    let rows = value.as_array()?;
    let mut levels = Vec::with_capacity(rows.len());
    for row in rows {
        let level = if let Some(pair) = row.as_array() {
            [as_f64(pair.first()?)?, as_f64(pair.get(1)?)?]
        } else {
            [field_f64(row, "price")?, field_f64(row, "size")?]
        };
        levels.push(level);
    }
    Some(levels)
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn hmac_sha256_hex(secret: &str, message: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret.as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Flatten a JSON object into `(key, value)` pairs plus the URL-encoded
/// query string over them. Key order is the object's (sorted) order, so
/// the signed string and the transmitted query always agree.
pub(crate) fn urlencode(payload: &Value) -> (String, Vec<(String, String)>) {
    let mut pairs = Vec::new();
    if let Some(map) = payload.as_object() {
        for (key, value) in map {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            pairs.push((key.clone(), rendered));
        }
    }
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in &pairs {
        serializer.append_pair(key, value);
    }
    (serializer.finish(), pairs)
}
