//! Bybit v5 linear-perp port.
//!
//! Signing: HMAC-SHA256 over `{timestamp}{api_key}{recv_window}` followed
//! by the URL-encoded query (GET) or the JSON body (POST), carried in
//! `X-BAPI-*` headers. Private stream auth is an in-band `op:auth` with an
//! HMAC over `GET/realtime{expiry}`.

use std::collections::HashMap;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::config::{Credentials, SessionConfig};
use crate::dispatch::{Feed, FrameKind, Handler, Stream};
use crate::endpoints::{op, Endpoint, EndpointTable, HttpMethod};
use crate::error::{CoreError, ErrorClass};
use crate::http::SignedRequest;
use crate::state::{Candle, LiveState, Order, PositionUpdate, TickerUpdate, Trade};
use crate::types::{
    OrderType, OrderTypeConverter, PositionDirectionConverter, SideConverter, TimeInForceConverter,
};

use super::{as_f64, field_f64, field_str, hmac_sha256_hex, now_ms, parse_levels, urlencode, PrivateAuth, VenuePort};

fn endpoints() -> EndpointTable {
    let mut table = EndpointTable::with_base(
        "https://api.bybit.com",
        "wss://stream.bybit.com/v5/public/linear",
        "wss://stream.bybit.com/v5/private",
    );
    table.insert(op::CREATE_ORDER, Endpoint::new("/v5/order/create", HttpMethod::Post));
    table.insert(op::AMEND_ORDER, Endpoint::new("/v5/order/amend", HttpMethod::Post));
    table.insert(op::CANCEL_ORDER, Endpoint::new("/v5/order/cancel", HttpMethod::Post));
    table.insert(op::CANCEL_ALL_ORDERS, Endpoint::new("/v5/order/cancel-all", HttpMethod::Post));
    table.insert(op::BATCH_CREATE_ORDERS, Endpoint::new("/v5/order/create-batch", HttpMethod::Post));
    table.insert(op::BATCH_AMEND_ORDERS, Endpoint::new("/v5/order/amend-batch", HttpMethod::Post));
    table.insert(op::BATCH_CANCEL_ORDERS, Endpoint::new("/v5/order/cancel-batch", HttpMethod::Post));
    table.insert(op::GET_ORDERBOOK, Endpoint::new("/v5/market/orderbook", HttpMethod::Get));
    table.insert(op::GET_TRADES, Endpoint::new("/v5/market/recent-trade", HttpMethod::Get));
    table.insert(op::GET_TICKER, Endpoint::new("/v5/market/tickers", HttpMethod::Get));
    table.insert(op::GET_OHLCV, Endpoint::new("/v5/market/kline", HttpMethod::Get));
    table.insert(op::GET_OPEN_ORDERS, Endpoint::new("/v5/order/realtime", HttpMethod::Get));
    table.insert(op::GET_POSITION, Endpoint::new("/v5/position/list", HttpMethod::Get));
    table.insert(op::GET_INSTRUMENT_INFO, Endpoint::new("/v5/market/instruments-info", HttpMethod::Get));
    table
}

fn error_table() -> HashMap<i64, (ErrorClass, &'static str)> {
    HashMap::from([
        (0, (ErrorClass::Ok, "")),
        (200, (ErrorClass::Ok, "")),
        (10001, (ErrorClass::ClientFatal, "illegal category")),
        (10006, (ErrorClass::RateLimited, "rate limits exceeded")),
        (10016, (ErrorClass::ServerRetryable, "bybit server error")),
        (10010, (ErrorClass::ClientFatal, "unmatched IP, check the API key's bound addresses")),
        (110001, (ErrorClass::Benign, "order doesn't exist anymore")),
        (110012, (ErrorClass::ClientFatal, "insufficient available balance")),
    ])
}

fn side_converter() -> SideConverter {
    SideConverter::new("Buy", "Sell")
}

fn order_type_converter() -> OrderTypeConverter {
    OrderTypeConverter::new("Limit", "Market", None, None)
}

fn tif_converter() -> TimeInForceConverter {
    TimeInForceConverter::new("GTC", "FOK", "PostOnly")
}

fn direction_converter() -> PositionDirectionConverter {
    PositionDirectionConverter::new("Buy", "Sell")
}

pub struct Bybit {
    symbol: String,
    api_key: String,
    api_secret: SecretString,
    recv_window: u64,
    depth: usize,
    endpoints: EndpointTable,
    errors: HashMap<i64, (ErrorClass, &'static str)>,
    side: SideConverter,
    order_type: OrderTypeConverter,
    tif: TimeInForceConverter,
    handlers: HashMap<Feed, Arc<dyn Handler>>,
}

impl Bybit {
    pub fn new(credentials: Credentials, config: &SessionConfig) -> Self {
        // Bybit requires capital symbols.
        let symbol = config.symbol.to_uppercase();
        let handlers: HashMap<Feed, Arc<dyn Handler>> = HashMap::from([
            (Feed::Orderbook, Arc::new(OrderbookFrames) as Arc<dyn Handler>),
            (Feed::Trades, Arc::new(TradeFrames { side: side_converter() }) as Arc<dyn Handler>),
            (Feed::Candles, Arc::new(CandleFrames) as Arc<dyn Handler>),
            (Feed::Ticker, Arc::new(TickerFrames) as Arc<dyn Handler>),
            (
                Feed::Orders,
                Arc::new(OrderFrames {
                    symbol: symbol.clone(),
                    side: side_converter(),
                    order_type: order_type_converter(),
                    tif: tif_converter(),
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
            api_key: credentials.api_key,
            api_secret: credentials.api_secret,
            recv_window: config.recv_window_ms,
            depth: config.orderbook_depth,
            endpoints: endpoints(),
            errors: error_table(),
            side: side_converter(),
            order_type: order_type_converter(),
            tif: tif_converter(),
            handlers,
        }
    }
}

impl VenuePort for Bybit {
    fn name(&self) -> &'static str {
        "bybit"
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

        let timestamp = now_ms();
        let param_str = match endpoint.method {
            HttpMethod::Get => {
                let (encoded, pairs) = urlencode(payload);
                request.query = pairs;
                encoded
            }
            _ => {
                let body = payload.to_string();
                request.body = Some(payload.clone());
                body
            }
        };

        let prehash = format!("{timestamp}{}{}{param_str}", self.api_key, self.recv_window);
        let signature = hmac_sha256_hex(self.api_secret.expose_secret(), &prehash);
        request.headers = vec![
            ("X-BAPI-API-KEY".to_string(), self.api_key.clone()),
            ("X-BAPI-TIMESTAMP".to_string(), timestamp.to_string()),
            ("X-BAPI-SIGN".to_string(), signature),
            ("X-BAPI-RECV-WINDOW".to_string(), self.recv_window.to_string()),
        ];
        Ok(request)
    }

    fn classify(&self, response: &Value) -> (ErrorClass, String) {
        let code = response.get("retCode").and_then(Value::as_i64).unwrap_or(0);
        match self.errors.get(&code) {
            Some((class, message)) => (*class, (*message).to_string()),
            None => {
                let raw = field_str(response, "retMsg").unwrap_or("");
                (ErrorClass::ClientFatal, format!("unknown retCode {code}: {raw}"))
            }
        }
    }

    fn format_create(&self, order: &Order) -> Result<Value, CoreError> {
        let mut payload = json!({
            "category": "linear",
            "symbol": self.symbol,
            "side": self.side.wire(order.side),
            "orderType": self.order_type.wire(order.order_type),
            "qty": order.size.to_string(),
            "timeInForce": self.tif.wire(order.time_in_force),
        });
        if let Some(price) = order.price {
            payload["price"] = Value::String(price.to_string());
        } else if order.order_type != OrderType::Market {
            return Err(CoreError::Validation("limit order without price".into()));
        }
        if let Some(client_order_id) = &order.client_order_id {
            payload["orderLinkId"] = Value::String(client_order_id.clone());
        }
        Ok(payload)
    }

    fn format_amend(&self, order: &Order) -> Result<Value, CoreError> {
        let mut payload = json!({
            "category": "linear",
            "symbol": self.symbol,
            "qty": order.size.to_string(),
        });
        if let Some(price) = order.price {
            payload["price"] = Value::String(price.to_string());
        }
        match (&order.order_id, &order.client_order_id) {
            (Some(id), _) => payload["orderId"] = Value::String(id.clone()),
            (None, Some(client_id)) => payload["orderLinkId"] = Value::String(client_id.clone()),
            (None, None) => return Err(CoreError::Validation("amend without any order id".into())),
        }
        Ok(payload)
    }

    fn format_cancel(&self, order: &Order) -> Result<Value, CoreError> {
        let mut payload = json!({
            "category": "linear",
            "symbol": self.symbol,
        });
        match (&order.order_id, &order.client_order_id) {
            (Some(id), _) => payload["orderId"] = Value::String(id.clone()),
            (None, Some(client_id)) => payload["orderLinkId"] = Value::String(client_id.clone()),
            (None, None) => return Err(CoreError::Validation("cancel without any order id".into())),
        }
        Ok(payload)
    }

    fn format_cancel_all(&self) -> Value {
        json!({ "category": "linear", "symbol": self.symbol })
    }

    fn format_batch_create(&self, orders: &[Order]) -> Result<Value, CoreError> {
        let request: Result<Vec<Value>, CoreError> = orders
            .iter()
            .map(|order| {
                let mut entry = self.format_create(order)?;
                if let Some(map) = entry.as_object_mut() {
                    map.remove("category");
                }
                Ok(entry)
            })
            .collect();
        Ok(json!({ "category": "linear", "request": request? }))
    }

    fn format_batch_amend(&self, orders: &[Order]) -> Result<Value, CoreError> {
        let request: Result<Vec<Value>, CoreError> = orders
            .iter()
            .map(|order| {
                let mut entry = self.format_amend(order)?;
                if let Some(map) = entry.as_object_mut() {
                    map.remove("category");
                }
                Ok(entry)
            })
            .collect();
        Ok(json!({ "category": "linear", "request": request? }))
    }

    fn format_batch_cancel(&self, orders: &[Order]) -> Result<Value, CoreError> {
        let request: Result<Vec<Value>, CoreError> = orders
            .iter()
            .map(|order| {
                let mut entry = self.format_cancel(order)?;
                if let Some(map) = entry.as_object_mut() {
                    map.remove("category");
                }
                Ok(entry)
            })
            .collect();
        Ok(json!({ "category": "linear", "request": request? }))
    }

    fn query(&self, operation: &str) -> Value {
        match operation {
            op::GET_ORDERBOOK => json!({
                "category": "linear",
                "symbol": self.symbol,
                "limit": self.depth,
            }),
            op::GET_TRADES => json!({
                "category": "linear",
                "symbol": self.symbol,
                "limit": 500,
            }),
            op::GET_OHLCV => json!({
                "category": "linear",
                "symbol": self.symbol,
                "interval": "1",
                "limit": 200,
            }),
            _ => json!({ "category": "linear", "symbol": self.symbol }),
        }
    }

    fn public_subscriptions(&self) -> Vec<Value> {
        vec![json!({
            "op": "subscribe",
            "args": [
                format!("publicTrade.{}", self.symbol),
                format!("tickers.{}", self.symbol),
                format!("orderbook.500.{}", self.symbol),
                format!("kline.1.{}", self.symbol),
            ],
        })]
    }

    fn private_auth(&self) -> PrivateAuth {
        PrivateAuth::InBand
    }

    fn private_auth_messages(&self) -> Vec<Value> {
        let expiry = now_ms() + 5000;
        let signature = hmac_sha256_hex(
            self.api_secret.expose_secret(),
            &format!("GET/realtime{expiry}"),
        );
        vec![json!({
            "op": "auth",
            "args": [self.api_key, expiry, signature],
        })]
    }

    fn private_subscriptions(&self) -> Vec<Value> {
        vec![json!({
            "op": "subscribe",
            "args": ["position", "order"],
        })]
    }

    fn keepalive(&self) -> Option<Value> {
        Some(json!({ "op": "ping" }))
    }

    fn classify_frame(&self, stream: Stream, frame: &Value) -> FrameKind {
        if let Some(topic) = field_str(frame, "topic") {
            let key = match stream {
                // "orderbook.500.BTCUSDT" → "orderbook"
                Stream::Public => topic.split('.').next().unwrap_or(topic),
                Stream::Private => topic,
            };
            return FrameKind::Topic(key.to_string());
        }

        if let Some(op_field) = field_str(frame, "op") {
            if op_field == "auth" {
                if frame.get("success").and_then(Value::as_bool).unwrap_or(false) {
                    info!("bybit private ws authenticated");
                } else {
                    error!("bybit private ws auth failed: {}", field_str(frame, "ret_msg").unwrap_or(""));
                }
            }
            return FrameKind::Control;
        }
        if field_str(frame, "ret_msg") == Some("OK") || frame.get("success").is_some() {
            return FrameKind::Control;
        }
        FrameKind::Unknown
    }

    fn topics(&self, stream: Stream) -> Vec<(String, Feed)> {
        match stream {
            Stream::Public => vec![
                ("orderbook".to_string(), Feed::Orderbook),
                ("publicTrade".to_string(), Feed::Trades),
                ("kline".to_string(), Feed::Candles),
                ("tickers".to_string(), Feed::Ticker),
            ],
            Stream::Private => vec![
                ("order".to_string(), Feed::Orders),
                ("position".to_string(), Feed::Position),
            ],
        }
    }

    fn handler(&self, feed: Feed) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&feed).cloned()
    }

    fn parse_instrument(&self, response: &Value) -> Option<(f64, f64)> {
        let instrument = response
            .get("result")?
            .get("list")?
            .as_array()?
            .first()?;
        let tick = field_f64(instrument.get("priceFilter")?, "tickSize")?;
        let lot = field_f64(instrument.get("lotSizeFilter")?, "qtyStep")?;
        Some((tick, lot))
    }
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

struct OrderbookFrames;

impl OrderbookFrames {
    fn apply(state: &mut LiveState, data: &Value, seq_id: u64, snapshot: bool) -> Result<(), CoreError> {
        let bids = data
            .get("b")
            .and_then(parse_levels)
            .ok_or_else(|| CoreError::schema("orderbook", "missing bids"))?;
        let asks = data
            .get("a")
            .and_then(parse_levels)
            .ok_or_else(|| CoreError::schema("orderbook", "missing asks"))?;

        if snapshot || seq_id == 1 {
            state.orderbook.refresh(&asks, &bids, seq_id);
        } else {
            if !bids.is_empty() {
                state.orderbook.update_bids(&bids, seq_id);
            }
            if !asks.is_empty() {
                state.orderbook.update_asks(&asks, seq_id);
            }
        }
        Ok(())
    }
}

impl Handler for OrderbookFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let result = payload
            .get("result")
            .ok_or_else(|| CoreError::schema("orderbook", "missing result"))?;
        let seq_id = result
            .get("u")
            .and_then(Value::as_u64)
            .ok_or_else(|| CoreError::schema("orderbook", "missing update id"))?;
        Self::apply(state, result, seq_id, true)
    }

    fn process(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let data = payload
            .get("data")
            .ok_or_else(|| CoreError::schema("orderbook", "missing data"))?;
        let seq_id = data
            .get("u")
            .and_then(Value::as_u64)
            .ok_or_else(|| CoreError::schema("orderbook", "missing update id"))?;
        let snapshot = field_str(payload, "type") == Some("snapshot");
        Self::apply(state, data, seq_id, snapshot)
    }
}

struct TradeFrames {
    side: SideConverter,
}

impl TradeFrames {
    fn trade(&self, row: &Value, ts_field: &str, side_field: &str, px_field: &str, sz_field: &str) -> Result<Trade, CoreError> {
        let side_str = field_str(row, side_field)
            .ok_or_else(|| CoreError::schema("trades", "missing side"))?;
        let side = self
            .side
            .side(side_str)
            .ok_or_else(|| CoreError::schema("trades", format!("unknown side {side_str}")))?;
        Ok(Trade {
            timestamp: field_f64(row, ts_field)
                .ok_or_else(|| CoreError::schema("trades", "missing timestamp"))?,
            side,
            price: field_f64(row, px_field)
                .ok_or_else(|| CoreError::schema("trades", "missing price"))?,
            size: field_f64(row, sz_field)
                .ok_or_else(|| CoreError::schema("trades", "missing size"))?,
        })
    }
}

impl Handler for TradeFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let rows = payload
            .get("result")
            .and_then(|r| r.get("list"))
            .and_then(Value::as_array)
            .ok_or_else(|| CoreError::schema("trades", "missing result.list"))?;
        for row in rows.iter().rev() {
            let trade = self.trade(row, "time", "side", "price", "size")?;
            state.trades.push(trade);
        }
        Ok(())
    }

    fn process(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let rows = payload
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| CoreError::schema("trades", "missing data"))?;
        for row in rows {
            let trade = self.trade(row, "T", "S", "p", "v")?;
            state.trades.push(trade);
        }
        Ok(())
    }
}

struct TickerFrames;

impl TickerFrames {
    fn update_from(data: &Value) -> TickerUpdate {
        TickerUpdate {
            funding_time: field_f64(data, "nextFundingTime"),
            funding_rate: field_f64(data, "fundingRate"),
            mark_price: field_f64(data, "markPrice"),
            index_price: field_f64(data, "indexPrice"),
        }
    }
}

impl Handler for TickerFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let row = payload
            .get("result")
            .and_then(|r| r.get("list"))
            .and_then(Value::as_array)
            .and_then(|list| list.first())
            .ok_or_else(|| CoreError::schema("ticker", "missing result.list"))?;
        state.ticker.update(Self::update_from(row));
        Ok(())
    }

    fn process(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        // Ticker pushes are sparse deltas; absent fields keep their values.
        let data = payload
            .get("data")
            .ok_or_else(|| CoreError::schema("ticker", "missing data"))?;
        state.ticker.update(Self::update_from(data));
        Ok(())
    }
}

struct CandleFrames;

impl Handler for CandleFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let rows = payload
            .get("result")
            .and_then(|r| r.get("list"))
            .and_then(Value::as_array)
            .ok_or_else(|| CoreError::schema("ohlcv", "missing result.list"))?;
        state.candles.reset();
        // REST klines arrive newest-first.
        for row in rows.iter().rev() {
            let cells = row
                .as_array()
                .ok_or_else(|| CoreError::schema("ohlcv", "kline row is not an array"))?;
            let mut values = [0.0; 6];
            for (slot, cell) in values.iter_mut().zip(cells.iter()) {
                *slot = as_f64(cell).ok_or_else(|| CoreError::schema("ohlcv", "non-numeric kline cell"))?;
            }
            state.candles.push(Candle {
                timestamp: values[0],
                open: values[1],
                high: values[2],
                low: values[3],
                close: values[4],
                volume: values[5],
            });
        }
        Ok(())
    }

    fn process(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let rows = payload
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| CoreError::schema("ohlcv", "missing data"))?;
        for row in rows {
            state.candles.push(Candle {
                timestamp: field_f64(row, "start")
                    .ok_or_else(|| CoreError::schema("ohlcv", "missing start"))?,
                open: field_f64(row, "open").unwrap_or(0.0),
                high: field_f64(row, "high").unwrap_or(0.0),
                low: field_f64(row, "low").unwrap_or(0.0),
                close: field_f64(row, "close").unwrap_or(0.0),
                volume: field_f64(row, "volume").unwrap_or(0.0),
            });
        }
        Ok(())
    }
}

struct OrderFrames {
    symbol: String,
    side: SideConverter,
    order_type: OrderTypeConverter,
    tif: TimeInForceConverter,
}

impl OrderFrames {
    const OVERWRITE: [&'static str; 3] = ["Created", "New", "PartiallyFilled"];
    const REMOVE: [&'static str; 3] = ["Rejected", "Filled", "Cancelled"];

    fn order_from(&self, row: &Value) -> Result<Order, CoreError> {
        let side_str = field_str(row, "side")
            .ok_or_else(|| CoreError::schema("orders", "missing side"))?;
        let side = self
            .side
            .side(side_str)
            .ok_or_else(|| CoreError::schema("orders", format!("unknown side {side_str}")))?;
        let order_type = field_str(row, "orderType")
            .and_then(|s| self.order_type.order_type(s))
            .ok_or_else(|| CoreError::schema("orders", "unknown orderType"))?;
        let tif = field_str(row, "timeInForce")
            .and_then(|s| self.tif.time_in_force(s))
            .unwrap_or(crate::types::TimeInForce::Gtc);

        Ok(Order {
            symbol: self.symbol.clone(),
            side,
            order_type,
            time_in_force: tif,
            size: field_f64(row, "leavesQty")
                .ok_or_else(|| CoreError::schema("orders", "missing leavesQty"))?,
            price: field_f64(row, "price"),
            order_id: field_str(row, "orderId").map(str::to_string),
            client_order_id: field_str(row, "orderLinkId").map(str::to_string),
        })
    }

    fn apply_row(&self, state: &mut LiveState, row: &Value) -> Result<(), CoreError> {
        if field_str(row, "symbol") != Some(self.symbol.as_str()) {
            return Ok(());
        }
        let status = field_str(row, "orderStatus")
            .ok_or_else(|| CoreError::schema("orders", "missing orderStatus"))?;
        if Self::OVERWRITE.contains(&status) {
            state.orders.insert(self.order_from(row)?);
        } else if Self::REMOVE.contains(&status) {
            if let Some(order_id) = field_str(row, "orderId") {
                state.orders.remove(order_id);
            }
        }
        Ok(())
    }
}

impl Handler for OrderFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let rows = payload
            .get("result")
            .and_then(|r| r.get("list"))
            .and_then(Value::as_array)
            .ok_or_else(|| CoreError::schema("orders", "missing result.list"))?;
        state.orders.clear();
        for row in rows {
            if field_str(row, "symbol") != Some(self.symbol.as_str()) {
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
    fn apply_row(&self, state: &mut LiveState, row: &Value, price_field: &str) -> Result<(), CoreError> {
        if field_str(row, "symbol") != Some(self.symbol.as_str()) {
            return Ok(());
        }
        let size = field_f64(row, "size")
            .ok_or_else(|| CoreError::schema("position", "missing size"))?;
        if size == 0.0 {
            state.position.clear();
            return Ok(());
        }
        state.position.update(PositionUpdate {
            symbol: Some(self.symbol.clone()),
            direction: field_str(row, "side").and_then(|s| self.direction.direction(s)),
            entry_price: field_f64(row, price_field),
            size: Some(size),
            upnl: field_f64(row, "unrealisedPnl"),
        });
        Ok(())
    }
}

impl Handler for PositionFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let rows = payload
            .get("result")
            .and_then(|r| r.get("list"))
            .and_then(Value::as_array)
            .ok_or_else(|| CoreError::schema("position", "missing result.list"))?;
        for row in rows {
            self.apply_row(state, row, "avgPrice")?;
        }
        Ok(())
    }

    fn process(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let rows = payload
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| CoreError::schema("position", "missing data"))?;
        for row in rows {
            self.apply_row(state, row, "entryPrice")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Side, TimeInForce};

    fn port() -> Bybit {
        Bybit::new(Credentials::test("key", "secret"), &SessionConfig::test("btcusdt"))
    }

    fn state() -> LiveState {
        LiveState::new("BTCUSDT", 50, 100, 100)
    }

    #[test]
    fn test_symbol_uppercased() {
        assert_eq!(port().symbol(), "BTCUSDT");
    }

    #[test]
    fn test_sign_get_builds_bapi_headers() {
        let request = port()
            .sign(op::GET_ORDERBOOK, &json!({"category": "linear", "symbol": "BTCUSDT"}))
            .unwrap();
        assert_eq!(request.method, HttpMethod::Get);
        assert!(request.url.ends_with("/v5/market/orderbook"));
        let names: Vec<&str> = request.headers.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"X-BAPI-API-KEY"));
        assert!(names.contains(&"X-BAPI-SIGN"));
        assert!(names.contains(&"X-BAPI-TIMESTAMP"));
        assert!(names.contains(&"X-BAPI-RECV-WINDOW"));
        assert!(request.body.is_none());
        assert!(!request.query.is_empty());
    }

    #[test]
    fn test_sign_post_carries_body() {
        let request = port()
            .sign(op::CREATE_ORDER, &json!({"symbol": "BTCUSDT"}))
            .unwrap();
        assert_eq!(request.method, HttpMethod::Post);
        assert!(request.body.is_some());
        assert!(request.query.is_empty());
    }

    #[test]
    fn test_classify_table() {
        let p = port();
        assert_eq!(p.classify(&json!({"retCode": 0})).0, ErrorClass::Ok);
        assert_eq!(p.classify(&json!({"retCode": 10006})).0, ErrorClass::RateLimited);
        assert_eq!(p.classify(&json!({"retCode": 10016})).0, ErrorClass::ServerRetryable);
        assert_eq!(p.classify(&json!({"retCode": 110001})).0, ErrorClass::Benign);
        let (class, message) = p.classify(&json!({"retCode": 99999, "retMsg": "boom"}));
        assert_eq!(class, ErrorClass::ClientFatal);
        assert!(message.contains("99999"));
        assert!(message.contains("boom"));
    }

    #[test]
    fn test_format_create_limit() {
        let order = Order {
            symbol: "BTCUSDT".to_string(),
            side: Side::Sell,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::PostOnly,
            size: 0.01,
            price: Some(65_000.0),
            order_id: None,
            client_order_id: Some("mmB03".to_string()),
        };
        let payload = port().format_create(&order).unwrap();
        assert_eq!(payload["side"], "Sell");
        assert_eq!(payload["orderType"], "Limit");
        assert_eq!(payload["timeInForce"], "PostOnly");
        assert_eq!(payload["price"], "65000");
        assert_eq!(payload["orderLinkId"], "mmB03");
    }

    #[test]
    fn test_orderbook_delta_and_snapshot() {
        let p = port();
        let mut st = state();
        let snapshot = json!({
            "topic": "orderbook.500.BTCUSDT",
            "type": "snapshot",
            "data": {"s": "BTCUSDT", "b": [["100", "1"]], "a": [["101", "2"]], "u": 10},
        });
        p.handler(Feed::Orderbook).unwrap().process(&mut st, &snapshot).unwrap();
        assert_eq!(st.orderbook.seq_id(), 10);

        let delta = json!({
            "topic": "orderbook.500.BTCUSDT",
            "type": "delta",
            "data": {"s": "BTCUSDT", "b": [["100", "0"], ["99", "3"]], "a": [], "u": 11},
        });
        p.handler(Feed::Orderbook).unwrap().process(&mut st, &delta).unwrap();
        assert_eq!(st.orderbook.best_bid()[0], 99.0);

        // seq 1 always replaces, even marked delta
        let reset = json!({
            "type": "delta",
            "data": {"b": [["98", "1"]], "a": [["102", "1"]], "u": 1},
        });
        p.handler(Feed::Orderbook).unwrap().process(&mut st, &reset).unwrap();
        assert_eq!(st.orderbook.seq_id(), 1);
        assert_eq!(st.orderbook.bids().len(), 1);
    }

    #[test]
    fn test_trade_frames() {
        let p = port();
        let mut st = state();
        let frame = json!({
            "topic": "publicTrade.BTCUSDT",
            "data": [{"T": 123, "S": "Sell", "p": "50000", "v": "1"}],
        });
        p.handler(Feed::Trades).unwrap().process(&mut st, &frame).unwrap();
        let trades = st.trades.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].side, Side::Sell);
        assert_eq!(trades[0].price, 50_000.0);
    }

    #[test]
    fn test_order_lifecycle() {
        let p = port();
        let mut st = state();
        let new_order = json!({
            "topic": "order",
            "data": [{
                "symbol": "BTCUSDT", "side": "Buy", "orderType": "Limit",
                "timeInForce": "PostOnly", "price": "64000", "qty": "0.02",
                "leavesQty": "0.02", "orderId": "o-1", "orderLinkId": "mmB01",
                "orderStatus": "New",
            }],
        });
        p.handler(Feed::Orders).unwrap().process(&mut st, &new_order).unwrap();
        assert_eq!(st.orders.len(), 1);

        let filled = json!({
            "topic": "order",
            "data": [{
                "symbol": "BTCUSDT", "side": "Buy", "orderType": "Limit",
                "timeInForce": "PostOnly", "price": "64000", "qty": "0.02",
                "leavesQty": "0", "orderId": "o-1", "orderLinkId": "mmB01",
                "orderStatus": "Filled",
            }],
        });
        p.handler(Feed::Orders).unwrap().process(&mut st, &filled).unwrap();
        assert!(st.orders.is_empty());
    }

    #[test]
    fn test_other_symbol_ignored() {
        let p = port();
        let mut st = state();
        let frame = json!({
            "topic": "order",
            "data": [{"symbol": "ETHUSDT", "orderStatus": "New"}],
        });
        p.handler(Feed::Orders).unwrap().process(&mut st, &frame).unwrap();
        assert!(st.orders.is_empty());
    }

    #[test]
    fn test_position_frames_and_close() {
        let p = port();
        let mut st = state();
        let open = json!({
            "topic": "position",
            "data": [{"symbol": "BTCUSDT", "side": "Buy", "entryPrice": "64000", "size": "0.5", "unrealisedPnl": "12.5"}],
        });
        p.handler(Feed::Position).unwrap().process(&mut st, &open).unwrap();
        assert!(!st.position.is_empty());
        assert!(st.position.in_profit());
        assert_eq!(st.position.direction, Some(crate::types::PositionDirection::Long));

        let closed = json!({
            "topic": "position",
            "data": [{"symbol": "BTCUSDT", "side": "", "entryPrice": "0", "size": "0", "unrealisedPnl": "0"}],
        });
        p.handler(Feed::Position).unwrap().process(&mut st, &closed).unwrap();
        assert!(st.position.is_empty());
        assert_eq!(st.position.direction, None);
    }

    #[test]
    fn test_ticker_sparse_update() {
        let p = port();
        let mut st = state();
        let full = json!({
            "topic": "tickers.BTCUSDT",
            "data": {"markPrice": "64000", "indexPrice": "63990", "fundingRate": "0.0001", "nextFundingTime": "1700000000000"},
        });
        p.handler(Feed::Ticker).unwrap().process(&mut st, &full).unwrap();
        let delta = json!({
            "topic": "tickers.BTCUSDT",
            "data": {"markPrice": "64010"},
        });
        p.handler(Feed::Ticker).unwrap().process(&mut st, &delta).unwrap();
        assert_eq!(st.ticker.mark_price, 64_010.0);
        assert_eq!(st.ticker.index_price, 63_990.0);
        assert!((st.ticker.funding_rate_bps() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_frame_classification() {
        let p = port();
        assert_eq!(
            p.classify_frame(Stream::Public, &json!({"topic": "orderbook.500.BTCUSDT"})),
            FrameKind::Topic("orderbook".to_string())
        );
        assert_eq!(
            p.classify_frame(Stream::Public, &json!({"op": "subscribe", "success": true})),
            FrameKind::Control
        );
        assert_eq!(
            p.classify_frame(Stream::Private, &json!({"topic": "order"})),
            FrameKind::Topic("order".to_string())
        );
        assert_eq!(p.classify_frame(Stream::Public, &json!({"weird": 1})), FrameKind::Unknown);
    }

    #[test]
    fn test_instrument_parse() {
        let body = json!({
            "result": {"list": [{
                "priceFilter": {"tickSize": "0.10"},
                "lotSizeFilter": {"qtyStep": "0.001"},
            }]},
        });
        assert_eq!(port().parse_instrument(&body), Some((0.10, 0.001)));
    }
}
