//! dYdX v4 indexer port (market data + subaccount streams).
//!
//! Indexer reads are unsigned; account channels are keyed by the user's
//! address. Order mutation on dYdX v4 is a chain transaction through the
//! node SDK, which sits outside this crate's signed-REST model, so this
//! port registers no order-mutation endpoints.
//!
//! Funding settles at 08:00, 16:00 and midnight UTC; ticker updates snap
//! `funding_time` to the next boundary, reading the midnight target as
//! 24:00 so the result is always strictly in the future.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use serde_json::{json, Value};

use crate::config::{Credentials, SessionConfig};
use crate::dispatch::{Feed, FrameKind, Handler, Stream};
use crate::endpoints::{op, Endpoint, EndpointTable, HttpMethod};
use crate::error::{CoreError, ErrorClass};
use crate::http::SignedRequest;
use crate::state::{Candle, LiveState, Order, PositionUpdate, TickerUpdate, Trade};
use crate::types::{
    OrderType, PositionDirection, PositionDirectionConverter, SideConverter, TimeInForce,
};

use super::{field_f64, field_str, parse_levels, urlencode, VenuePort};

fn endpoints() -> EndpointTable {
    let mut table = EndpointTable::with_base(
        "https://indexer.dydx.trade/v4",
        "wss://indexer.dydx.trade/v4/ws",
        "wss://indexer.dydx.trade/v4/ws",
    );
    table.insert(op::GET_ORDERBOOK, Endpoint::new("/orderbooks/perpetualMarket/{symbol}", HttpMethod::Get));
    table.insert(op::GET_TRADES, Endpoint::new("/trades/perpetualMarket/{symbol}", HttpMethod::Get));
    table.insert(op::GET_OHLCV, Endpoint::new("/candles/perpetualMarkets/{symbol}", HttpMethod::Get));
    table.insert(op::GET_TICKER, Endpoint::new("/perpetualMarkets", HttpMethod::Get));
    table.insert(op::GET_OPEN_ORDERS, Endpoint::new("/orders", HttpMethod::Get));
    table.insert(op::GET_POSITION, Endpoint::new("/addresses/{address}/subaccountNumber/0", HttpMethod::Get));
    table.insert(op::GET_INSTRUMENT_INFO, Endpoint::new("/perpetualMarkets", HttpMethod::Get));
    table
}

fn side_converter() -> SideConverter {
    SideConverter::new("BUY", "SELL")
}

fn direction_converter() -> PositionDirectionConverter {
    PositionDirectionConverter::new("LONG", "SHORT")
}

/// Seconds until the next funding boundary among {08:00, 16:00, 24:00} UTC.
fn next_funding_time(now: DateTime<Utc>) -> f64 {
    let since_midnight = i64::from(now.num_seconds_from_midnight());
    let targets = [8 * 3600_i64, 16 * 3600, 24 * 3600];
    let wait = targets
        .iter()
        .map(|target| (target - since_midnight).rem_euclid(86_400))
        .filter(|diff| *diff > 0)
        .min()
        .unwrap_or(86_400);
    ((now.timestamp() + wait) * 1000) as f64
}

fn iso_millis(raw: &str) -> Option<f64> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp_millis() as f64)
}

pub struct Dydx {
    symbol: String,
    address: String,
    endpoints: EndpointTable,
    handlers: HashMap<Feed, Arc<dyn Handler>>,
}

impl Dydx {
    pub fn new(credentials: Credentials, config: &SessionConfig) -> Self {
        // Tickers look like "BTC-USD".
        let symbol = config.symbol.to_uppercase();
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
                Arc::new(PositionFrames {
                    symbol: symbol.clone(),
                    direction: direction_converter(),
                }) as Arc<dyn Handler>,
            ),
        ]);

        Self {
            symbol,
            address: credentials.api_key,
            endpoints: endpoints(),
            handlers,
        }
    }

    fn subaccount_id(&self) -> String {
        format!("{}/0", self.address)
    }
}

impl VenuePort for Dydx {
    fn name(&self) -> &'static str {
        "dydx"
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn endpoints(&self) -> &EndpointTable {
        &self.endpoints
    }

    fn sign(&self, operation: &str, payload: &Value) -> Result<SignedRequest, CoreError> {
        let endpoint = self.endpoints.get(operation)?;
        let path = endpoint
            .url
            .replace("{symbol}", &self.symbol)
            .replace("{address}", &self.address);
        let mut request =
            SignedRequest::new(endpoint.method, format!("{}{}", self.endpoints.rest_base(), path));
        let (_, pairs) = urlencode(payload);
        request.query = pairs;
        Ok(request)
    }

    fn classify(&self, response: &Value) -> (ErrorClass, String) {
        match response.get("errors").and_then(Value::as_array) {
            Some(errors) if !errors.is_empty() => {
                let message = errors
                    .iter()
                    .filter_map(|e| field_str(e, "msg"))
                    .collect::<Vec<_>>()
                    .join("; ");
                (ErrorClass::ClientFatal, message)
            }
            _ => (ErrorClass::Ok, String::new()),
        }
    }

    fn format_create(&self, _order: &Order) -> Result<Value, CoreError> {
        Err(CoreError::VenueFatal(
            "dydx order placement is a chain transaction; not supported by this port".into(),
        ))
    }

    fn format_amend(&self, _order: &Order) -> Result<Value, CoreError> {
        Err(CoreError::VenueFatal(
            "dydx order amendment is a chain transaction; not supported by this port".into(),
        ))
    }

    fn format_cancel(&self, _order: &Order) -> Result<Value, CoreError> {
        Err(CoreError::VenueFatal(
            "dydx order cancel is a chain transaction; not supported by this port".into(),
        ))
    }

    fn format_cancel_all(&self) -> Value {
        json!({})
    }

    fn query(&self, operation: &str) -> Value {
        match operation {
            op::GET_TRADES => json!({ "limit": 1000 }),
            op::GET_OHLCV => json!({ "resolution": "1MIN" }),
            op::GET_TICKER | op::GET_INSTRUMENT_INFO => json!({ "ticker": self.symbol }),
            op::GET_OPEN_ORDERS => json!({
                "address": self.address,
                "subaccountNumber": 0,
                "ticker": self.symbol,
                "status": "OPEN",
            }),
            _ => json!({}),
        }
    }

    fn public_subscriptions(&self) -> Vec<Value> {
        vec![
            json!({ "type": "subscribe", "channel": "v4_orderbook", "id": self.symbol }),
            json!({ "type": "subscribe", "channel": "v4_trades", "id": self.symbol }),
            json!({
                "type": "subscribe",
                "channel": "v4_candles",
                "id": format!("{}/1MIN", self.symbol),
            }),
            json!({ "type": "subscribe", "channel": "v4_markets" }),
        ]
    }

    fn private_subscriptions(&self) -> Vec<Value> {
        vec![json!({
            "type": "subscribe",
            "channel": "v4_subaccounts",
            "id": self.subaccount_id(),
        })]
    }

    fn classify_frame(&self, _stream: Stream, frame: &Value) -> FrameKind {
        match field_str(frame, "type") {
            Some("connected") | Some("unsubscribed") | Some("pong") => FrameKind::Control,
            // "subscribed" carries the initial snapshot, "channel_data" the
            // deltas; both route by channel.
            Some("subscribed") | Some("channel_data") | Some("channel_batch_data") => {
                match field_str(frame, "channel") {
                    Some(channel) => FrameKind::Topic(channel.to_string()),
                    None => FrameKind::Unknown,
                }
            }
            _ => FrameKind::Unknown,
        }
    }

    fn topics(&self, stream: Stream) -> Vec<(String, Feed)> {
        match stream {
            Stream::Public => vec![
                ("v4_orderbook".to_string(), Feed::Orderbook),
                ("v4_trades".to_string(), Feed::Trades),
                ("v4_candles".to_string(), Feed::Candles),
                ("v4_markets".to_string(), Feed::Ticker),
            ],
            Stream::Private => vec![
                ("v4_subaccounts".to_string(), Feed::Orders),
                ("v4_subaccounts".to_string(), Feed::Position),
            ],
        }
    }

    fn handler(&self, feed: Feed) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&feed).cloned()
    }

    fn parse_instrument(&self, response: &Value) -> Option<(f64, f64)> {
        let market = response.get("markets")?.get(&self.symbol)?;
        Some((field_f64(market, "tickSize")?, field_f64(market, "stepSize")?))
    }
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

fn is_snapshot(frame: &Value) -> bool {
    field_str(frame, "type") == Some("subscribed")
}

fn contents(frame: &Value) -> &Value {
    frame.get("contents").unwrap_or(frame)
}

struct OrderbookFrames;

impl Handler for OrderbookFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let bids = payload
            .get("bids")
            .and_then(parse_levels)
            .ok_or_else(|| CoreError::schema("orderbook", "missing bids"))?;
        let asks = payload
            .get("asks")
            .and_then(parse_levels)
            .ok_or_else(|| CoreError::schema("orderbook", "missing asks"))?;
        // Indexer snapshots carry no sequence number; they replace state
        // unconditionally and the stream's message ids take over from 1.
        state.orderbook.refresh(&asks, &bids, 1);
        Ok(())
    }

    fn process(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let body = contents(payload);
        if is_snapshot(payload) {
            return self.refresh(state, body);
        }
        let seq_id = payload
            .get("message_id")
            .and_then(Value::as_u64)
            .ok_or_else(|| CoreError::schema("orderbook", "missing message_id"))?;
        if let Some(bids) = body.get("bids").and_then(parse_levels) {
            state.orderbook.update_bids(&bids, seq_id);
        }
        if let Some(asks) = body.get("asks").and_then(parse_levels) {
            state.orderbook.update_asks(&asks, seq_id);
        }
        Ok(())
    }
}

struct TradeFrames {
    side: SideConverter,
}

impl TradeFrames {
    fn push_rows(&self, state: &mut LiveState, rows: &[Value]) -> Result<(), CoreError> {
        // Indexer lists arrive newest-first.
        for row in rows.iter().rev() {
            let side_str = field_str(row, "side")
                .ok_or_else(|| CoreError::schema("trades", "missing side"))?;
            let side = self
                .side
                .side(side_str)
                .ok_or_else(|| CoreError::schema("trades", format!("unknown side {side_str}")))?;
            let created_at = field_str(row, "createdAt")
                .ok_or_else(|| CoreError::schema("trades", "missing createdAt"))?;
            state.trades.push(Trade {
                timestamp: iso_millis(created_at)
                    .ok_or_else(|| CoreError::schema("trades", "bad createdAt"))?,
                side,
                price: field_f64(row, "price")
                    .ok_or_else(|| CoreError::schema("trades", "missing price"))?,
                size: field_f64(row, "size")
                    .ok_or_else(|| CoreError::schema("trades", "missing size"))?,
            });
        }
        Ok(())
    }
}

impl Handler for TradeFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let rows = payload
            .get("trades")
            .and_then(Value::as_array)
            .ok_or_else(|| CoreError::schema("trades", "missing trades"))?;
        self.push_rows(state, rows)
    }

    fn process(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let rows = contents(payload)
            .get("trades")
            .and_then(Value::as_array)
            .ok_or_else(|| CoreError::schema("trades", "missing trades"))?;
        self.push_rows(state, rows)
    }
}

struct CandleFrames;

impl CandleFrames {
    fn candle_from(row: &Value) -> Result<Candle, CoreError> {
        let started_at = field_str(row, "startedAt")
            .ok_or_else(|| CoreError::schema("ohlcv", "missing startedAt"))?;
        Ok(Candle {
            timestamp: iso_millis(started_at)
                .ok_or_else(|| CoreError::schema("ohlcv", "bad startedAt"))?,
            open: field_f64(row, "open").unwrap_or(0.0),
            high: field_f64(row, "high").unwrap_or(0.0),
            low: field_f64(row, "low").unwrap_or(0.0),
            close: field_f64(row, "close").unwrap_or(0.0),
            volume: field_f64(row, "baseTokenVolume").unwrap_or(0.0),
        })
    }
}

impl Handler for CandleFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let rows = payload
            .get("candles")
            .and_then(Value::as_array)
            .ok_or_else(|| CoreError::schema("ohlcv", "missing candles"))?;
        state.candles.reset();
        for row in rows.iter().rev() {
            state.candles.push(Self::candle_from(row)?);
        }
        Ok(())
    }

    fn process(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let body = contents(payload);
        if let Some(rows) = body.get("candles").and_then(Value::as_array) {
            for row in rows.iter().rev() {
                state.candles.push(Self::candle_from(row)?);
            }
            return Ok(());
        }
        state.candles.push(Self::candle_from(body)?);
        Ok(())
    }
}

struct TickerFrames {
    symbol: String,
}

impl TickerFrames {
    fn apply_market(&self, state: &mut LiveState, market: &Value) {
        state.ticker.update(TickerUpdate {
            funding_time: Some(next_funding_time(Utc::now())),
            funding_rate: field_f64(market, "nextFundingRate"),
            mark_price: field_f64(market, "oraclePrice"),
            index_price: field_f64(market, "oraclePrice"),
        });
    }

    fn market_in<'a>(&self, body: &'a Value) -> Option<&'a Value> {
        for section in ["markets", "trading", "oraclePrices"] {
            if let Some(market) = body.get(section).and_then(|m| m.get(&self.symbol)) {
                return Some(market);
            }
        }
        None
    }
}

impl Handler for TickerFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let market = self
            .market_in(payload)
            .ok_or_else(|| CoreError::schema("ticker", "market not in response"))?;
        self.apply_market(state, market);
        Ok(())
    }

    fn process(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let body = contents(payload);
        if let Some(market) = self.market_in(body) {
            self.apply_market(state, market);
        }
        Ok(())
    }
}

struct OrderFrames {
    symbol: String,
    side: SideConverter,
}

impl OrderFrames {
    const OVERWRITE: [&'static str; 2] = ["OPEN", "BEST_EFFORT_OPENED"];
    const REMOVE: [&'static str; 3] = ["FILLED", "CANCELED", "BEST_EFFORT_CANCELED"];

    fn apply_row(&self, state: &mut LiveState, row: &Value) -> Result<(), CoreError> {
        if field_str(row, "ticker").is_some_and(|t| t != self.symbol) {
            return Ok(());
        }
        let status = field_str(row, "status")
            .ok_or_else(|| CoreError::schema("orders", "missing status"))?;
        let order_id = field_str(row, "id")
            .ok_or_else(|| CoreError::schema("orders", "missing id"))?;

        if Self::OVERWRITE.contains(&status) {
            let side_str = field_str(row, "side")
                .ok_or_else(|| CoreError::schema("orders", "missing side"))?;
            let side = self
                .side
                .side(side_str)
                .ok_or_else(|| CoreError::schema("orders", format!("unknown side {side_str}")))?;
            let size = field_f64(row, "size")
                .ok_or_else(|| CoreError::schema("orders", "missing size"))?;
            let filled = field_f64(row, "totalFilled").unwrap_or(0.0);
            state.orders.insert(Order {
                symbol: self.symbol.clone(),
                side,
                order_type: OrderType::Limit,
                time_in_force: TimeInForce::Gtc,
                size: size - filled,
                price: field_f64(row, "price"),
                order_id: Some(order_id.to_string()),
                client_order_id: field_str(row, "clientId").map(str::to_string),
            });
        } else if Self::REMOVE.contains(&status) {
            state.orders.remove(order_id);
        }
        Ok(())
    }
}

impl Handler for OrderFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let rows = payload
            .as_array()
            .or_else(|| payload.get("orders").and_then(Value::as_array))
            .ok_or_else(|| CoreError::schema("orders", "expected order list"))?;
        state.orders.clear();
        for row in rows {
            self.apply_row(state, row)?;
        }
        Ok(())
    }

    fn process(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        // Subaccount frames without an order section are not ours.
        let Some(rows) = contents(payload).get("orders").and_then(Value::as_array) else {
            return Ok(());
        };
        for row in rows {
            self.apply_row(state, row)?;
        }
        Ok(())
    }
}

struct PositionFrames {
    symbol: String,
    direction: PositionDirectionConverter,
}

impl PositionFrames {
    fn apply_row(&self, state: &mut LiveState, row: &Value) -> Result<(), CoreError> {
        if field_str(row, "market").is_some_and(|m| m != self.symbol) {
            return Ok(());
        }
        if field_str(row, "status").is_some_and(|s| s == "CLOSED") {
            state.position.clear();
            return Ok(());
        }
        let size = field_f64(row, "size")
            .ok_or_else(|| CoreError::schema("position", "missing size"))?;
        if size == 0.0 {
            state.position.clear();
            return Ok(());
        }
        let direction = field_str(row, "side")
            .and_then(|s| self.direction.direction(s))
            .unwrap_or(if size >= 0.0 {
                PositionDirection::Long
            } else {
                PositionDirection::Short
            });
        state.position.update(PositionUpdate {
            symbol: Some(self.symbol.clone()),
            direction: Some(direction),
            entry_price: field_f64(row, "entryPrice"),
            size: Some(size),
            upnl: field_f64(row, "unrealizedPnl"),
        });
        Ok(())
    }
}

impl Handler for PositionFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let positions = payload
            .get("subaccount")
            .and_then(|s| s.get("openPerpetualPositions"))
            .ok_or_else(|| CoreError::schema("position", "missing openPerpetualPositions"))?;
        if let Some(row) = positions.get(&self.symbol) {
            self.apply_row(state, row)?;
        } else {
            state.position.clear();
        }
        Ok(())
    }

    fn process(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let body = contents(payload);
        if is_snapshot(payload) {
            if body.get("subaccount").is_some() {
                return self.refresh(state, body);
            }
            return Ok(());
        }
        let Some(rows) = body.get("perpetualPositions").and_then(Value::as_array) else {
            return Ok(());
        };
        for row in rows {
            self.apply_row(state, row)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn port() -> Dydx {
        Dydx::new(Credentials::test("dydx1address", ""), &SessionConfig::test("btc-usd"))
    }

    fn state() -> LiveState {
        LiveState::new("BTC-USD", 50, 100, 100)
    }

    #[test]
    fn test_funding_snaps_to_next_boundary() {
        // 03:30 UTC → next boundary 08:00.
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 3, 30, 0).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        assert_eq!(next_funding_time(now), (expected.timestamp() * 1000) as f64);

        // 12:00 UTC → 16:00.
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 16, 0, 0).unwrap();
        assert_eq!(next_funding_time(now), (expected.timestamp() * 1000) as f64);

        // 20:15 UTC → next midnight, never a zero/wrapped result.
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 20, 15, 0).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        assert_eq!(next_funding_time(now), (expected.timestamp() * 1000) as f64);

        // Exactly on a boundary → the following one.
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 16, 0, 0).unwrap();
        assert_eq!(next_funding_time(now), (expected.timestamp() * 1000) as f64);

        // Exactly midnight → 08:00, not another midnight.
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        assert_eq!(next_funding_time(now), (expected.timestamp() * 1000) as f64);
    }

    #[test]
    fn test_sign_substitutes_path_params() {
        let p = port();
        let request = p.sign(op::GET_ORDERBOOK, &json!({})).unwrap();
        assert!(request.url.ends_with("/orderbooks/perpetualMarket/BTC-USD"));
        let request = p.sign(op::GET_POSITION, &json!({})).unwrap();
        assert!(request.url.contains("/addresses/dydx1address/subaccountNumber/0"));
        assert!(request.headers.is_empty());
    }

    #[test]
    fn test_order_mutation_unsupported() {
        let p = port();
        let order = Order {
            symbol: "BTC-USD".to_string(),
            side: crate::types::Side::Buy,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::Gtc,
            size: 1.0,
            price: Some(60_000.0),
            order_id: None,
            client_order_id: None,
        };
        assert!(p.format_create(&order).is_err());
        assert!(p.endpoints().get(op::CREATE_ORDER).is_err());
    }

    #[test]
    fn test_subscribed_snapshot_then_delta() {
        let p = port();
        let mut st = state();
        let snapshot = json!({
            "type": "subscribed",
            "channel": "v4_orderbook",
            "contents": {
                "bids": [{"price": "60000", "size": "1"}],
                "asks": [{"price": "60010", "size": "2"}],
            },
        });
        p.handler(Feed::Orderbook).unwrap().process(&mut st, &snapshot).unwrap();
        assert_eq!(st.orderbook.best_bid()[0], 60_000.0);
        assert_eq!(st.orderbook.seq_id(), 1);

        let delta = json!({
            "type": "channel_data",
            "channel": "v4_orderbook",
            "message_id": 2,
            "contents": {"bids": [["60000", "0"], ["59990", "3"]]},
        });
        p.handler(Feed::Orderbook).unwrap().process(&mut st, &delta).unwrap();
        assert_eq!(st.orderbook.best_bid()[0], 59_990.0);
        assert_eq!(st.orderbook.seq_id(), 2);
    }

    #[test]
    fn test_trades_parse_iso_timestamps() {
        let p = port();
        let mut st = state();
        let frame = json!({
            "type": "channel_data",
            "channel": "v4_trades",
            "contents": {"trades": [
                {"side": "SELL", "price": "60000", "size": "0.5", "createdAt": "2024-05-01T03:30:00.000Z"},
            ]},
        });
        p.handler(Feed::Trades).unwrap().process(&mut st, &frame).unwrap();
        let trades = st.trades.unwrap();
        assert_eq!(trades[0].side, crate::types::Side::Sell);
        assert!(trades[0].timestamp > 1.7e12);
    }

    #[test]
    fn test_subaccount_frame_updates_orders_and_position() {
        let p = port();
        let mut st = state();
        let frame = json!({
            "type": "channel_data",
            "channel": "v4_subaccounts",
            "contents": {
                "orders": [{
                    "id": "o-1", "ticker": "BTC-USD", "side": "BUY", "price": "60000",
                    "size": "1", "totalFilled": "0.25", "status": "OPEN", "clientId": "mmB01",
                }],
                "perpetualPositions": [{
                    "market": "BTC-USD", "side": "LONG", "size": "0.25",
                    "entryPrice": "60000", "unrealizedPnl": "1.5",
                }],
            },
        });
        for handler in [Feed::Orders, Feed::Position] {
            p.handler(handler).unwrap().process(&mut st, &frame).unwrap();
        }
        assert_eq!(st.orders.len(), 1);
        assert_eq!(st.orders.get("o-1").unwrap().size, 0.75);
        assert_eq!(st.position.size, 0.25);
        assert_eq!(st.position.direction, Some(PositionDirection::Long));
    }

    #[test]
    fn test_markets_channel_updates_ticker() {
        let p = port();
        let mut st = state();
        let frame = json!({
            "type": "channel_data",
            "channel": "v4_markets",
            "contents": {"trading": {"BTC-USD": {"nextFundingRate": "0.0002", "oraclePrice": "60050"}}},
        });
        p.handler(Feed::Ticker).unwrap().process(&mut st, &frame).unwrap();
        assert_eq!(st.ticker.mark_price, 60_050.0);
        assert!((st.ticker.funding_rate_bps() - 2.0).abs() < 1e-9);
        assert!(st.ticker.funding_time > 0.0);
    }

    #[test]
    fn test_frame_classification() {
        let p = port();
        assert_eq!(
            p.classify_frame(Stream::Public, &json!({"type": "connected"})),
            FrameKind::Control
        );
        assert_eq!(
            p.classify_frame(Stream::Public, &json!({"type": "channel_data", "channel": "v4_trades"})),
            FrameKind::Topic("v4_trades".to_string())
        );
        assert_eq!(
            p.classify_frame(Stream::Public, &json!({"type": "error", "message": "bad"})),
            FrameKind::Unknown
        );
    }

    #[test]
    fn test_instrument_parse() {
        let body = json!({
            "markets": {"BTC-USD": {"tickSize": "1", "stepSize": "0.0001"}},
        });
        assert_eq!(port().parse_instrument(&body), Some((1.0, 0.0001)));
    }
}
