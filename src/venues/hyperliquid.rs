//! Hyperliquid port.
//!
//! Market data and account state are all served over one WS endpoint; the
//! account channels are keyed by the user's wallet address rather than an
//! API key. Exchange actions are signed EIP-712 style: the action bytes
//! and nonce hash into a phantom-agent struct whose typed-data hash the
//! wallet key signs.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use alloy_primitives::{keccak256, Address};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{eip712_domain, sol, Eip712Domain, SolStruct};
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use tracing::warn;

use crate::config::{Credentials, SessionConfig};
use crate::dispatch::{Feed, FrameKind, Handler, Stream};
use crate::endpoints::{op, Endpoint, EndpointTable, HttpMethod};
use crate::error::{CoreError, ErrorClass};
use crate::http::SignedRequest;
use crate::state::{Candle, LiveState, Order, PositionUpdate, TickerUpdate, Trade};
use crate::types::{
    OrderType, PositionDirection, Side, SideConverter, TimeInForce, TimeInForceConverter,
};

use super::{field_f64, field_str, now_ms, PrivateAuth, VenuePort};

sol! {
    struct Agent {
        string source;
        bytes32 connectionId;
    }
}

fn agent_domain() -> Eip712Domain {
    eip712_domain! {
        name: "Exchange",
        version: "1",
        chain_id: 1337,
        verifying_contract: Address::ZERO,
    }
}

fn endpoints() -> EndpointTable {
    let mut table = EndpointTable::with_base(
        "https://api.hyperliquid.xyz",
        "wss://api.hyperliquid.xyz/ws",
        "wss://api.hyperliquid.xyz/ws",
    );
    table.insert(op::CREATE_ORDER, Endpoint::new("/exchange", HttpMethod::Post));
    table.insert(op::AMEND_ORDER, Endpoint::new("/exchange", HttpMethod::Post));
    table.insert(op::CANCEL_ORDER, Endpoint::new("/exchange", HttpMethod::Post));
    table.insert(op::BATCH_CREATE_ORDERS, Endpoint::new("/exchange", HttpMethod::Post));
    table.insert(op::BATCH_CANCEL_ORDERS, Endpoint::new("/exchange", HttpMethod::Post));
    table.insert(op::GET_ORDERBOOK, Endpoint::new("/info", HttpMethod::Post));
    table.insert(op::GET_TICKER, Endpoint::new("/info", HttpMethod::Post));
    table.insert(op::GET_OHLCV, Endpoint::new("/info", HttpMethod::Post));
    table.insert(op::GET_OPEN_ORDERS, Endpoint::new("/info", HttpMethod::Post));
    table.insert(op::GET_POSITION, Endpoint::new("/info", HttpMethod::Post));
    table.insert(op::GET_INSTRUMENT_INFO, Endpoint::new("/info", HttpMethod::Post));
    table
}

fn side_converter() -> SideConverter {
    SideConverter::new("B", "A")
}

fn tif_converter() -> TimeInForceConverter {
    TimeInForceConverter::new("Gtc", "Ioc", "Alo")
}

/// Funding settles hourly; the next boundary is always the next full hour.
fn next_hour_ms(now: i64) -> f64 {
    const HOUR: i64 = 3_600_000;
    (((now / HOUR) + 1) * HOUR) as f64
}

fn hl_levels(value: &Value) -> Option<Vec<[f64; 2]>> {
    let rows = value.as_array()?;
    let mut levels = Vec::with_capacity(rows.len());
    for row in rows {
        levels.push([field_f64(row, "px")?, field_f64(row, "sz")?]);
    }
    Some(levels)
}

pub struct Hyperliquid {
    symbol: String,
    user_address: String,
    signer: Option<PrivateKeySigner>,
    /// Universe index of the coin, learned at warmup from `meta`.
    asset_index: AtomicI64,
    endpoints: EndpointTable,
    tif: TimeInForceConverter,
    handlers: HashMap<Feed, Arc<dyn Handler>>,
}

impl Hyperliquid {
    pub fn new(credentials: Credentials, config: &SessionConfig) -> Self {
        let symbol = config.symbol.to_uppercase();
        let secret = credentials.api_secret.expose_secret();
        let signer = if secret.is_empty() {
            None
        } else {
            match PrivateKeySigner::from_str(secret) {
                Ok(signer) => Some(signer),
                Err(e) => {
                    warn!("invalid hyperliquid signing key: {e}");
                    None
                }
            }
        };

        let handlers: HashMap<Feed, Arc<dyn Handler>> = HashMap::from([
            (Feed::Orderbook, Arc::new(OrderbookFrames) as Arc<dyn Handler>),
            (Feed::Trades, Arc::new(TradeFrames { side: side_converter() }) as Arc<dyn Handler>),
            (Feed::Candles, Arc::new(CandleFrames) as Arc<dyn Handler>),
            (Feed::Ticker, Arc::new(TickerFrames { symbol: symbol.clone() }) as Arc<dyn Handler>),
            (
                Feed::Orders,
                Arc::new(OrderFrames {
                    symbol: symbol.clone(),
                    side: side_converter(),
                }) as Arc<dyn Handler>,
            ),
            (
                Feed::Position,
                Arc::new(PositionFrames { symbol: symbol.clone() }) as Arc<dyn Handler>,
            ),
        ]);

        Self {
            symbol,
            user_address: credentials.api_key,
            signer,
            asset_index: AtomicI64::new(-1),
            endpoints: endpoints(),
            tif: tif_converter(),
            handlers,
        }
    }

    fn asset(&self) -> Result<i64, CoreError> {
        match self.asset_index.load(Ordering::Relaxed) {
            -1 => Err(CoreError::VenueFatal(format!(
                "asset index for {} unknown; warmup has not completed",
                self.symbol
            ))),
            index => Ok(index),
        }
    }

    /// Wrap an exchange action into the signed `{action, nonce, signature}`
    /// envelope.
    fn sign_action(&self, action: &Value) -> Result<Value, CoreError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| CoreError::VenueFatal("no signing key configured".into()))?;

        let nonce = now_ms() as u64;
        let mut bytes = serde_json::to_vec(action)
            .map_err(|e| CoreError::VenueFatal(format!("action serialize: {e}")))?;
        bytes.extend_from_slice(&nonce.to_be_bytes());
        // Trailing zero byte marks "no vault address".
        bytes.push(0x00);

        let agent = Agent {
            source: "a".to_string(),
            connectionId: keccak256(&bytes),
        };
        let hash = agent.eip712_signing_hash(&agent_domain());
        let signature = signer
            .sign_hash_sync(&hash)
            .map_err(|e| CoreError::VenueFatal(format!("eip712 signing: {e}")))?;

        Ok(json!({
            "action": action,
            "nonce": nonce,
            "signature": {
                "r": format!("0x{:064x}", signature.r()),
                "s": format!("0x{:064x}", signature.s()),
                "v": 27 + signature.v() as u8,
            },
        }))
    }

    /// Limit orders carry their TIF; trigger orders collapse to the tp/sl
    /// wire form with an implicit market trigger, and market orders go out
    /// as aggressive IOC limits.
    fn order_wire(&self, order: &Order) -> Result<Value, CoreError> {
        let asset = self.asset()?;
        let price = match order.price {
            Some(price) => price,
            None if order.order_type == OrderType::Market => 0.0,
            None => return Err(CoreError::Validation("limit order without price".into())),
        };

        let type_wire = match order.order_type {
            OrderType::Limit => json!({ "limit": { "tif": self.tif.wire(order.time_in_force) } }),
            OrderType::Market => json!({ "limit": { "tif": "Ioc" } }),
            OrderType::StopLimit => json!({
                "trigger": { "isMarket": true, "triggerPx": price.to_string(), "tpsl": "sl" }
            }),
            OrderType::TakeProfitLimit => json!({
                "trigger": { "isMarket": true, "triggerPx": price.to_string(), "tpsl": "tp" }
            }),
        };

        let mut wire = json!({
            "a": asset,
            "b": order.side == Side::Buy,
            "p": price.to_string(),
            "s": order.size.to_string(),
            "r": false,
            "t": type_wire,
        });
        if let Some(client_order_id) = &order.client_order_id {
            wire["c"] = Value::String(client_order_id.clone());
        }
        Ok(wire)
    }
}

impl VenuePort for Hyperliquid {
    fn name(&self) -> &'static str {
        "hyperliquid"
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn endpoints(&self) -> &EndpointTable {
        &self.endpoints
    }

    fn sign(&self, operation: &str, payload: &Value) -> Result<SignedRequest, CoreError> {
        let endpoint = self.endpoints.get(operation)?;
        let mut request = SignedRequest::new(
            endpoint.method,
            format!("{}{}", self.endpoints.rest_base(), endpoint.url),
        );
        request.body = Some(if endpoint.url == "/exchange" {
            self.sign_action(payload)?
        } else {
            payload.clone()
        });
        Ok(request)
    }

    fn classify(&self, response: &Value) -> (ErrorClass, String) {
        match field_str(response, "status") {
            Some("ok") | None => (ErrorClass::Ok, String::new()),
            Some(_) => {
                let message = response
                    .get("response")
                    .and_then(Value::as_str)
                    .unwrap_or("exchange rejected action")
                    .to_string();
                if message.to_lowercase().contains("rate limit") {
                    (ErrorClass::RateLimited, message)
                } else {
                    (ErrorClass::ClientFatal, message)
                }
            }
        }
    }

    fn format_create(&self, order: &Order) -> Result<Value, CoreError> {
        Ok(json!({
            "type": "order",
            "orders": [self.order_wire(order)?],
            "grouping": "na",
        }))
    }

    fn format_amend(&self, order: &Order) -> Result<Value, CoreError> {
        let oid = order
            .order_id
            .as_deref()
            .and_then(|id| id.parse::<u64>().ok())
            .ok_or_else(|| CoreError::Validation("amend without numeric oid".into()))?;
        Ok(json!({
            "type": "modify",
            "oid": oid,
            "order": self.order_wire(order)?,
        }))
    }

    fn format_cancel(&self, order: &Order) -> Result<Value, CoreError> {
        let asset = self.asset()?;
        if let Some(oid) = order.order_id.as_deref().and_then(|id| id.parse::<u64>().ok()) {
            return Ok(json!({
                "type": "cancel",
                "cancels": [{ "a": asset, "o": oid }],
            }));
        }
        let cloid = order
            .client_order_id
            .as_deref()
            .ok_or_else(|| CoreError::Validation("cancel without any order id".into()))?;
        Ok(json!({
            "type": "cancelByCloid",
            "cancels": [{ "asset": asset, "cloid": cloid }],
        }))
    }

    // No venue-side cancel-all action; callers cancel per order (or via
    // batch) from their own live-order view.
    fn format_cancel_all(&self) -> Value {
        json!({ "type": "cancel", "cancels": [] })
    }

    fn format_batch_create(&self, orders: &[Order]) -> Result<Value, CoreError> {
        let wires: Result<Vec<Value>, CoreError> =
            orders.iter().map(|order| self.order_wire(order)).collect();
        Ok(json!({
            "type": "order",
            "orders": wires?,
            "grouping": "na",
        }))
    }

    fn format_batch_cancel(&self, orders: &[Order]) -> Result<Value, CoreError> {
        let asset = self.asset()?;
        let cancels: Vec<Value> = orders
            .iter()
            .filter_map(|order| order.order_id.as_deref())
            .filter_map(|id| id.parse::<u64>().ok())
            .map(|oid| json!({ "a": asset, "o": oid }))
            .collect();
        Ok(json!({ "type": "cancel", "cancels": cancels }))
    }

    fn query(&self, operation: &str) -> Value {
        match operation {
            op::GET_ORDERBOOK => json!({ "type": "l2Book", "coin": self.symbol }),
            op::GET_TICKER => json!({ "type": "metaAndAssetCtxs" }),
            op::GET_OHLCV => json!({
                "type": "candleSnapshot",
                "req": {
                    "coin": self.symbol,
                    "interval": "1m",
                    "startTime": now_ms() - 1000 * 60_000,
                },
            }),
            op::GET_OPEN_ORDERS => json!({ "type": "openOrders", "user": self.user_address }),
            op::GET_POSITION => json!({ "type": "clearinghouseState", "user": self.user_address }),
            op::GET_INSTRUMENT_INFO => json!({ "type": "meta" }),
            _ => json!({}),
        }
    }

    fn public_subscriptions(&self) -> Vec<Value> {
        [
            json!({ "type": "l2Book", "coin": self.symbol }),
            json!({ "type": "trades", "coin": self.symbol }),
            json!({ "type": "candle", "coin": self.symbol, "interval": "1m" }),
            json!({ "type": "activeAssetCtx", "coin": self.symbol }),
        ]
        .into_iter()
        .map(|subscription| json!({ "method": "subscribe", "subscription": subscription }))
        .collect()
    }

    /// Account channels are public data keyed by the wallet address.
    fn private_auth(&self) -> PrivateAuth {
        PrivateAuth::None
    }

    fn private_subscriptions(&self) -> Vec<Value> {
        [
            json!({ "type": "orderUpdates", "user": self.user_address }),
            json!({ "type": "webData2", "user": self.user_address }),
        ]
        .into_iter()
        .map(|subscription| json!({ "method": "subscribe", "subscription": subscription }))
        .collect()
    }

    fn keepalive(&self) -> Option<Value> {
        Some(json!({ "method": "ping" }))
    }

    fn classify_frame(&self, _stream: Stream, frame: &Value) -> FrameKind {
        match field_str(frame, "channel") {
            Some("subscriptionResponse") | Some("pong") => FrameKind::Control,
            Some(channel) => FrameKind::Topic(channel.to_string()),
            None => FrameKind::Unknown,
        }
    }

    fn topics(&self, stream: Stream) -> Vec<(String, Feed)> {
        match stream {
            Stream::Public => vec![
                ("l2Book".to_string(), Feed::Orderbook),
                ("trades".to_string(), Feed::Trades),
                ("candle".to_string(), Feed::Candles),
                ("activeAssetCtx".to_string(), Feed::Ticker),
            ],
            Stream::Private => vec![
                ("orderUpdates".to_string(), Feed::Orders),
                ("webData2".to_string(), Feed::Position),
            ],
        }
    }

    fn handler(&self, feed: Feed) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&feed).cloned()
    }

    fn parse_instrument(&self, response: &Value) -> Option<(f64, f64)> {
        let universe = response.get("universe")?.as_array()?;
        let (index, entry) = universe
            .iter()
            .enumerate()
            .find(|(_, entry)| field_str(entry, "name") == Some(self.symbol.as_str()))?;
        self.asset_index.store(index as i64, Ordering::Relaxed);

        let sz_decimals = entry.get("szDecimals")?.as_i64()?;
        let lot = 10f64.powi(-sz_decimals as i32);
        // Perp prices carry at most 6 decimals minus the size decimals.
        let tick = 10f64.powi(-(6 - sz_decimals) as i32);
        Some((tick, lot))
    }
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

struct OrderbookFrames;

impl Handler for OrderbookFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        // REST body is the bare book; WS frames wrap it in `data`.
        let book = payload.get("data").unwrap_or(payload);
        let levels = book
            .get("levels")
            .and_then(Value::as_array)
            .ok_or_else(|| CoreError::schema("orderbook", "missing levels"))?;
        let bids = levels
            .first()
            .and_then(hl_levels)
            .ok_or_else(|| CoreError::schema("orderbook", "bad bid levels"))?;
        let asks = levels
            .get(1)
            .and_then(hl_levels)
            .ok_or_else(|| CoreError::schema("orderbook", "bad ask levels"))?;
        let seq_id = field_f64(book, "time")
            .ok_or_else(|| CoreError::schema("orderbook", "missing time"))? as u64;
        // Every l2Book frame is a full snapshot.
        state.orderbook.refresh(&asks, &bids, seq_id);
        Ok(())
    }

    fn process(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        self.refresh(state, payload)
    }
}

struct TradeFrames {
    side: SideConverter,
}

impl TradeFrames {
    fn push_rows(&self, state: &mut LiveState, rows: &[Value]) -> Result<(), CoreError> {
        for row in rows {
            let side_str = field_str(row, "side")
                .ok_or_else(|| CoreError::schema("trades", "missing side"))?;
            let side = self
                .side
                .side(side_str)
                .ok_or_else(|| CoreError::schema("trades", format!("unknown side {side_str}")))?;
            state.trades.push(Trade {
                timestamp: field_f64(row, "time")
                    .ok_or_else(|| CoreError::schema("trades", "missing time"))?,
                side,
                price: field_f64(row, "px")
                    .ok_or_else(|| CoreError::schema("trades", "missing px"))?,
                size: field_f64(row, "sz")
                    .ok_or_else(|| CoreError::schema("trades", "missing sz"))?,
            });
        }
        Ok(())
    }
}

impl Handler for TradeFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let rows = payload
            .get("data")
            .unwrap_or(payload)
            .as_array()
            .ok_or_else(|| CoreError::schema("trades", "expected array"))?;
        self.push_rows(state, rows)
    }

    fn process(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        self.refresh(state, payload)
    }
}

struct CandleFrames;

impl CandleFrames {
    fn candle_from(row: &Value) -> Result<Candle, CoreError> {
        Ok(Candle {
            timestamp: field_f64(row, "t")
                .ok_or_else(|| CoreError::schema("ohlcv", "missing t"))?,
            open: field_f64(row, "o").unwrap_or(0.0),
            high: field_f64(row, "h").unwrap_or(0.0),
            low: field_f64(row, "l").unwrap_or(0.0),
            close: field_f64(row, "c").unwrap_or(0.0),
            volume: field_f64(row, "v").unwrap_or(0.0),
        })
    }
}

impl Handler for CandleFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let rows = payload
            .as_array()
            .ok_or_else(|| CoreError::schema("ohlcv", "expected array"))?;
        state.candles.reset();
        for row in rows {
            state.candles.push(Self::candle_from(row)?);
        }
        Ok(())
    }

    fn process(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let data = payload
            .get("data")
            .ok_or_else(|| CoreError::schema("ohlcv", "missing data"))?;
        match data.as_array() {
            Some(rows) => {
                for row in rows {
                    state.candles.push(Self::candle_from(row)?);
                }
            }
            None => state.candles.push(Self::candle_from(data)?),
        }
        Ok(())
    }
}

struct TickerFrames {
    symbol: String,
}

impl TickerFrames {
    fn apply_ctx(state: &mut LiveState, ctx: &Value) {
        state.ticker.update(TickerUpdate {
            funding_time: Some(next_hour_ms(now_ms())),
            funding_rate: field_f64(ctx, "funding"),
            mark_price: field_f64(ctx, "markPx"),
            index_price: field_f64(ctx, "oraclePx"),
        });
    }
}

impl Handler for TickerFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        // metaAndAssetCtxs = [meta, ctxs]; ctxs align with meta.universe.
        let parts = payload
            .as_array()
            .ok_or_else(|| CoreError::schema("ticker", "expected [meta, ctxs]"))?;
        let universe = parts
            .first()
            .and_then(|meta| meta.get("universe"))
            .and_then(Value::as_array)
            .ok_or_else(|| CoreError::schema("ticker", "missing universe"))?;
        let index = universe
            .iter()
            .position(|entry| field_str(entry, "name") == Some(self.symbol.as_str()))
            .ok_or_else(|| CoreError::schema("ticker", format!("{} not in universe", self.symbol)))?;
        let ctx = parts
            .get(1)
            .and_then(Value::as_array)
            .and_then(|ctxs| ctxs.get(index))
            .ok_or_else(|| CoreError::schema("ticker", "missing asset ctx"))?;
        Self::apply_ctx(state, ctx);
        Ok(())
    }

    fn process(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let data = payload
            .get("data")
            .ok_or_else(|| CoreError::schema("ticker", "missing data"))?;
        if field_str(data, "coin").is_some_and(|coin| coin != self.symbol) {
            return Ok(());
        }
        let ctx = data
            .get("ctx")
            .ok_or_else(|| CoreError::schema("ticker", "missing ctx"))?;
        Self::apply_ctx(state, ctx);
        Ok(())
    }
}

struct OrderFrames {
    symbol: String,
    side: SideConverter,
}

impl OrderFrames {
    const REMOVE: [&'static str; 5] = [
        "filled",
        "canceled",
        "triggered",
        "rejected",
        "marginCanceled",
    ];

    fn order_from(&self, row: &Value) -> Result<Order, CoreError> {
        let side_str = field_str(row, "side")
            .ok_or_else(|| CoreError::schema("orders", "missing side"))?;
        let side = self
            .side
            .side(side_str)
            .ok_or_else(|| CoreError::schema("orders", format!("unknown side {side_str}")))?;
        let order_id = row
            .get("oid")
            .and_then(Value::as_u64)
            .map(|oid| oid.to_string())
            .ok_or_else(|| CoreError::schema("orders", "missing oid"))?;
        Ok(Order {
            symbol: self.symbol.clone(),
            side,
            // Streamed order state carries no explicit type or TIF.
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::Gtc,
            size: field_f64(row, "sz")
                .ok_or_else(|| CoreError::schema("orders", "missing sz"))?,
            price: field_f64(row, "limitPx"),
            order_id: Some(order_id),
            client_order_id: field_str(row, "cloid").map(str::to_string),
        })
    }
}

impl Handler for OrderFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let rows = payload
            .as_array()
            .ok_or_else(|| CoreError::schema("orders", "expected array"))?;
        state.orders.clear();
        for row in rows {
            if field_str(row, "coin") != Some(self.symbol.as_str()) {
                continue;
            }
            state.orders.insert(self.order_from(row)?);
        }
        Ok(())
    }

    fn process(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let rows = payload
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| CoreError::schema("orders", "missing data"))?;
        for row in rows {
            let order = row
                .get("order")
                .ok_or_else(|| CoreError::schema("orders", "missing order"))?;
            if field_str(order, "coin") != Some(self.symbol.as_str()) {
                continue;
            }
            let status = field_str(row, "status")
                .ok_or_else(|| CoreError::schema("orders", "missing status"))?;
            if status == "open" {
                state.orders.insert(self.order_from(order)?);
            } else if Self::REMOVE.contains(&status) {
                if let Some(oid) = order.get("oid").and_then(Value::as_u64) {
                    state.orders.remove(&oid.to_string());
                }
            }
        }
        Ok(())
    }
}

struct PositionFrames {
    symbol: String,
}

impl PositionFrames {
    fn apply_state(&self, state: &mut LiveState, clearinghouse: &Value) -> Result<(), CoreError> {
        let positions = clearinghouse
            .get("assetPositions")
            .and_then(Value::as_array)
            .ok_or_else(|| CoreError::schema("position", "missing assetPositions"))?;
        for entry in positions {
            let position = entry.get("position").unwrap_or(entry);
            if field_str(position, "coin") != Some(self.symbol.as_str()) {
                continue;
            }
            let size = field_f64(position, "szi")
                .ok_or_else(|| CoreError::schema("position", "missing szi"))?;
            if size == 0.0 {
                state.position.clear();
                continue;
            }
            // No explicit direction on the wire; the sign of the size is it.
            let direction = if size >= 0.0 {
                PositionDirection::Long
            } else {
                PositionDirection::Short
            };
            state.position.update(PositionUpdate {
                symbol: Some(self.symbol.clone()),
                direction: Some(direction),
                entry_price: field_f64(position, "entryPx"),
                size: Some(size),
                upnl: field_f64(position, "unrealizedPnl"),
            });
        }
        Ok(())
    }
}

impl Handler for PositionFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        self.apply_state(state, payload)
    }

    fn process(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let clearinghouse = payload
            .get("data")
            .and_then(|data| data.get("clearinghouseState"))
            .ok_or_else(|| CoreError::schema("position", "missing clearinghouseState"))?;
        self.apply_state(state, clearinghouse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A throwaway key for signing tests.
    const TEST_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn port() -> Hyperliquid {
        let p = Hyperliquid::new(
            Credentials::test("0xuser", TEST_KEY),
            &SessionConfig::test("eth"),
        );
        p.asset_index.store(4, Ordering::Relaxed);
        p
    }

    fn state() -> LiveState {
        LiveState::new("ETH", 50, 100, 100)
    }

    fn limit_order(price: f64) -> Order {
        Order {
            symbol: "ETH".to_string(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::PostOnly,
            size: 0.5,
            price: Some(price),
            order_id: None,
            client_order_id: Some("0xmm01".to_string()),
        }
    }

    #[test]
    fn test_sign_action_envelope() {
        let p = port();
        let payload = p.format_create(&limit_order(2000.0)).unwrap();
        let request = p.sign(op::CREATE_ORDER, &payload).unwrap();
        let body = request.body.unwrap();
        assert!(body.get("action").is_some());
        assert!(body.get("nonce").is_some());
        let signature = body.get("signature").unwrap();
        assert!(signature["r"].as_str().unwrap().starts_with("0x"));
        assert_eq!(signature["r"].as_str().unwrap().len(), 66);
        let v = signature["v"].as_u64().unwrap();
        assert!(v == 27 || v == 28);
    }

    #[test]
    fn test_info_queries_unsigned() {
        let p = port();
        let request = p.sign(op::GET_ORDERBOOK, &p.query(op::GET_ORDERBOOK)).unwrap();
        let body = request.body.unwrap();
        assert_eq!(body["type"], "l2Book");
        assert!(body.get("signature").is_none());
    }

    #[test]
    fn test_order_wire_shapes() {
        let p = port();
        let wire = p.order_wire(&limit_order(2000.0)).unwrap();
        assert_eq!(wire["a"], 4);
        assert_eq!(wire["b"], true);
        assert_eq!(wire["p"], "2000");
        assert!(wire["t"]["limit"].is_object());

        let mut stop = limit_order(1900.0);
        stop.order_type = OrderType::StopLimit;
        let wire = p.order_wire(&stop).unwrap();
        assert_eq!(wire["t"]["trigger"]["tpsl"], "sl");
        assert_eq!(wire["t"]["trigger"]["isMarket"], true);

        let mut tp = limit_order(2100.0);
        tp.order_type = OrderType::TakeProfitLimit;
        let wire = p.order_wire(&tp).unwrap();
        assert_eq!(wire["t"]["trigger"]["tpsl"], "tp");
    }

    #[test]
    fn test_unknown_asset_refuses_orders() {
        let p = Hyperliquid::new(
            Credentials::test("0xuser", TEST_KEY),
            &SessionConfig::test("eth"),
        );
        assert!(p.format_create(&limit_order(2000.0)).is_err());
    }

    #[test]
    fn test_classify() {
        let p = port();
        assert_eq!(p.classify(&json!({"status": "ok", "response": {}})).0, ErrorClass::Ok);
        assert_eq!(p.classify(&json!([1, 2, 3])).0, ErrorClass::Ok);
        let (class, message) = p.classify(&json!({"status": "err", "response": "bad order"}));
        assert_eq!(class, ErrorClass::ClientFatal);
        assert_eq!(message, "bad order");
        let (class, _) = p.classify(&json!({"status": "err", "response": "Rate limit exceeded"}));
        assert_eq!(class, ErrorClass::RateLimited);
    }

    #[test]
    fn test_l2book_frames_are_snapshots() {
        let p = port();
        let mut st = state();
        let frame = json!({
            "channel": "l2Book",
            "data": {
                "coin": "ETH",
                "time": 1000,
                "levels": [
                    [{"px": "1999", "sz": "10", "n": 2}],
                    [{"px": "2001", "sz": "5", "n": 1}],
                ],
            },
        });
        p.handler(Feed::Orderbook).unwrap().process(&mut st, &frame).unwrap();
        assert_eq!(st.orderbook.best_bid()[0], 1999.0);
        assert_eq!(st.orderbook.best_ask()[0], 2001.0);
        assert_eq!(st.orderbook.seq_id(), 1000);
    }

    #[test]
    fn test_position_direction_from_sign() {
        let p = port();
        let mut st = state();
        let long = json!({
            "channel": "webData2",
            "data": {"clearinghouseState": {"assetPositions": [
                {"position": {"coin": "ETH", "szi": "1.5", "entryPx": "2000", "unrealizedPnl": "10"}},
            ]}},
        });
        p.handler(Feed::Position).unwrap().process(&mut st, &long).unwrap();
        assert_eq!(st.position.direction, Some(PositionDirection::Long));

        let short = json!({
            "channel": "webData2",
            "data": {"clearinghouseState": {"assetPositions": [
                {"position": {"coin": "ETH", "szi": "-0.5", "entryPx": "2000", "unrealizedPnl": "-3"}},
            ]}},
        });
        p.handler(Feed::Position).unwrap().process(&mut st, &short).unwrap();
        assert_eq!(st.position.direction, Some(PositionDirection::Short));
        assert_eq!(st.position.size, -0.5);
    }

    #[test]
    fn test_order_updates_lifecycle() {
        let p = port();
        let mut st = state();
        let open = json!({
            "channel": "orderUpdates",
            "data": [{
                "order": {"coin": "ETH", "side": "B", "limitPx": "2000", "sz": "0.5", "oid": 77, "cloid": "0xmm01"},
                "status": "open",
            }],
        });
        p.handler(Feed::Orders).unwrap().process(&mut st, &open).unwrap();
        assert_eq!(st.orders.len(), 1);

        let canceled = json!({
            "channel": "orderUpdates",
            "data": [{
                "order": {"coin": "ETH", "side": "B", "limitPx": "2000", "sz": "0.5", "oid": 77},
                "status": "canceled",
            }],
        });
        p.handler(Feed::Orders).unwrap().process(&mut st, &canceled).unwrap();
        assert!(st.orders.is_empty());
    }

    #[test]
    fn test_meta_learns_asset_index_and_steps() {
        let p = Hyperliquid::new(
            Credentials::test("0xuser", TEST_KEY),
            &SessionConfig::test("eth"),
        );
        let meta = json!({
            "universe": [
                {"name": "BTC", "szDecimals": 5},
                {"name": "ETH", "szDecimals": 4},
            ],
        });
        let (tick, lot) = p.parse_instrument(&meta).unwrap();
        assert_eq!(p.asset_index.load(Ordering::Relaxed), 1);
        assert!((lot - 1e-4).abs() < 1e-12);
        assert!((tick - 1e-2).abs() < 1e-12);
    }

    #[test]
    fn test_next_hour_boundary() {
        let now = 3_600_000 * 5 + 1234;
        assert_eq!(next_hour_ms(now), (3_600_000 * 6) as f64);
        assert_eq!(next_hour_ms(3_600_000 * 6), (3_600_000 * 7) as f64);
    }
}
