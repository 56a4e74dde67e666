//! Binance USD-M futures port.
//!
//! Signing: HMAC-SHA256 over the JSON payload, carried in a `signature`
//! field, with the API key in `X-MBX-APIKEY`. The private stream rides a
//! REST-issued listen key appended to the WS URL and pinged on a timer.

use std::collections::HashMap;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use crate::config::{Credentials, SessionConfig};
use crate::dispatch::{Feed, FrameKind, Handler, Stream};
use crate::endpoints::{op, Endpoint, EndpointTable, HttpMethod};
use crate::error::{CoreError, ErrorClass};
use crate::http::SignedRequest;
use crate::state::{Candle, LiveState, Order, PositionUpdate, TickerUpdate, Trade};
use crate::types::{
    OrderType, OrderTypeConverter, PositionDirection, PositionDirectionConverter, Side,
    SideConverter, TimeInForce, TimeInForceConverter,
};

use super::{as_f64, field_f64, field_str, hmac_sha256_hex, now_ms, parse_levels, urlencode, PrivateAuth, VenuePort};

/// Operations that go out unsigned.
const PUBLIC_OPS: [&str; 5] = [
    op::GET_ORDERBOOK,
    op::GET_TRADES,
    op::GET_OHLCV,
    op::GET_TICKER,
    op::GET_INSTRUMENT_INFO,
];

fn endpoints() -> EndpointTable {
    let mut table = EndpointTable::with_base(
        "https://fapi.binance.com",
        "wss://fstream.binance.com/ws",
        "wss://fstream.binance.com",
    );
    table.insert(op::CREATE_ORDER, Endpoint::new("/fapi/v1/order", HttpMethod::Post));
    table.insert(op::AMEND_ORDER, Endpoint::new("/fapi/v1/order", HttpMethod::Put));
    table.insert(op::CANCEL_ORDER, Endpoint::new("/fapi/v1/order", HttpMethod::Delete));
    table.insert(op::CANCEL_ALL_ORDERS, Endpoint::new("/fapi/v1/allOpenOrders", HttpMethod::Delete));
    table.insert(op::BATCH_CREATE_ORDERS, Endpoint::new("/fapi/v1/batchOrders", HttpMethod::Post));
    table.insert(op::BATCH_AMEND_ORDERS, Endpoint::new("/fapi/v1/batchOrders", HttpMethod::Put));
    table.insert(op::BATCH_CANCEL_ORDERS, Endpoint::new("/fapi/v1/batchOrders", HttpMethod::Delete));
    table.insert(op::GET_ORDERBOOK, Endpoint::new("/fapi/v1/depth", HttpMethod::Get));
    table.insert(op::GET_TRADES, Endpoint::new("/fapi/v1/trades", HttpMethod::Get));
    table.insert(op::GET_TICKER, Endpoint::new("/fapi/v1/premiumIndex", HttpMethod::Get));
    table.insert(op::GET_OHLCV, Endpoint::new("/fapi/v1/klines", HttpMethod::Get));
    table.insert(op::GET_OPEN_ORDERS, Endpoint::new("/fapi/v1/openOrders", HttpMethod::Get));
    table.insert(op::GET_POSITION, Endpoint::new("/fapi/v2/positionRisk", HttpMethod::Get));
    table.insert(op::GET_INSTRUMENT_INFO, Endpoint::new("/fapi/v1/exchangeInfo", HttpMethod::Get));
    table.insert(op::LISTEN_KEY, Endpoint::new("/fapi/v1/listenKey", HttpMethod::Post));
    table.insert(op::PING_LISTEN_KEY, Endpoint::new("/fapi/v1/listenKey", HttpMethod::Put));
    table
}

fn error_table() -> HashMap<i64, (ErrorClass, &'static str)> {
    HashMap::from([
        (0, (ErrorClass::Ok, "")),
        (200, (ErrorClass::Ok, "")),
        (1003, (ErrorClass::RateLimited, "rate limits exceeded")),
        (1015, (ErrorClass::RateLimited, "rate limits exceeded")),
        (1008, (ErrorClass::ServerRetryable, "server overloaded")),
        (1021, (ErrorClass::ServerRetryable, "outside of recvWindow")),
        (3000, (ErrorClass::ServerRetryable, "system busy")),
        (1111, (ErrorClass::ClientFatal, "incorrect tick/lot size")),
        (4029, (ErrorClass::ClientFatal, "incorrect tick size")),
        (4030, (ErrorClass::ClientFatal, "incorrect lot size")),
        (1125, (ErrorClass::ClientFatal, "invalid listen key")),
        (2010, (ErrorClass::ClientFatal, "order create rejected")),
        (2011, (ErrorClass::ClientFatal, "order cancel rejected")),
        (2012, (ErrorClass::ClientFatal, "cancel all rejected")),
        (2013, (ErrorClass::Benign, "order does not exist")),
        (2014, (ErrorClass::ClientFatal, "invalid API key format")),
        (2018, (ErrorClass::ClientFatal, "insufficient balance")),
        (3001, (ErrorClass::ClientFatal, "trading suspended for this symbol")),
        (3002, (ErrorClass::Benign, "order has been filled or canceled")),
        (3003, (ErrorClass::Benign, "order was not found")),
        (3011, (ErrorClass::ClientFatal, "API key permissions are insufficient")),
    ])
}

fn side_converter() -> SideConverter {
    SideConverter::new("BUY", "SELL")
}

fn order_type_converter() -> OrderTypeConverter {
    OrderTypeConverter::new("LIMIT", "MARKET", Some("STOP"), Some("TAKE_PROFIT"))
}

fn tif_converter() -> TimeInForceConverter {
    // GTX is Binance's post-only.
    TimeInForceConverter::new("GTC", "FOK", "GTX")
}

fn direction_converter() -> PositionDirectionConverter {
    PositionDirectionConverter::new("LONG", "SHORT")
}

/// Order ids arrive as JSON numbers; client ids as strings.
fn id_str(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub struct Binance {
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

impl Binance {
    pub fn new(credentials: Credentials, config: &SessionConfig) -> Self {
        // Binance requires capital symbols on REST, lowercase on streams.
        let symbol = config.symbol.to_uppercase();
        let handlers: HashMap<Feed, Arc<dyn Handler>> = HashMap::from([
            (Feed::Orderbook, Arc::new(OrderbookFrames) as Arc<dyn Handler>),
            (Feed::Trades, Arc::new(TradeFrames) as Arc<dyn Handler>),
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

impl VenuePort for Binance {
    fn name(&self) -> &'static str {
        "binance"
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

        if PUBLIC_OPS.contains(&operation) {
            let (_, pairs) = urlencode(payload);
            request.query = pairs;
            return Ok(request);
        }

        let mut signed = payload.clone();
        if !signed.is_object() {
            signed = json!({});
        }
        signed["timestamp"] = Value::from(now_ms());
        signed["recvWindow"] = Value::from(self.recv_window);
        let message = signed.to_string();
        let signature = hmac_sha256_hex(self.api_secret.expose_secret(), &message);
        signed["signature"] = Value::String(signature);

        request.headers = vec![("X-MBX-APIKEY".to_string(), self.api_key.clone())];
        match endpoint.method {
            HttpMethod::Get => {
                let (_, pairs) = urlencode(&signed);
                request.query = pairs;
            }
            _ => request.body = Some(signed),
        }
        Ok(request)
    }

    fn classify(&self, response: &Value) -> (ErrorClass, String) {
        let code = response.get("code").and_then(Value::as_i64).unwrap_or(0);
        let lookup = self.errors.get(&code).or_else(|| self.errors.get(&code.abs()));
        match lookup {
            Some((class, message)) => (*class, (*message).to_string()),
            None => {
                let raw = field_str(response, "msg").unwrap_or("");
                (ErrorClass::ClientFatal, format!("unknown code {code}: {raw}"))
            }
        }
    }

    fn format_create(&self, order: &Order) -> Result<Value, CoreError> {
        let mut payload = json!({
            "symbol": self.symbol,
            "side": self.side.wire(order.side),
            "type": self.order_type.wire(order.order_type),
            "quantity": order.size.to_string(),
        });
        if order.order_type != OrderType::Market {
            let price = order
                .price
                .ok_or_else(|| CoreError::Validation("limit order without price".into()))?;
            payload["price"] = Value::String(price.to_string());
            payload["timeInForce"] = Value::String(self.tif.wire(order.time_in_force).to_string());
        }
        if let Some(client_order_id) = &order.client_order_id {
            payload["newClientOrderId"] = Value::String(client_order_id.clone());
        }
        Ok(payload)
    }

    fn format_amend(&self, order: &Order) -> Result<Value, CoreError> {
        let price = order
            .price
            .ok_or_else(|| CoreError::Validation("amend without price".into()))?;
        let mut payload = json!({
            "symbol": self.symbol,
            "side": self.side.wire(order.side),
            "quantity": order.size.to_string(),
            "price": price.to_string(),
        });
        match (&order.order_id, &order.client_order_id) {
            (Some(id), _) => payload["orderId"] = Value::String(id.clone()),
            (None, Some(client_id)) => {
                payload["origClientOrderId"] = Value::String(client_id.clone())
            }
            (None, None) => return Err(CoreError::Validation("amend without any order id".into())),
        }
        Ok(payload)
    }

    fn format_cancel(&self, order: &Order) -> Result<Value, CoreError> {
        let mut payload = json!({ "symbol": self.symbol });
        match (&order.order_id, &order.client_order_id) {
            (Some(id), _) => payload["orderId"] = Value::String(id.clone()),
            (None, Some(client_id)) => {
                payload["origClientOrderId"] = Value::String(client_id.clone())
            }
            (None, None) => return Err(CoreError::Validation("cancel without any order id".into())),
        }
        Ok(payload)
    }

    fn format_cancel_all(&self) -> Value {
        json!({ "symbol": self.symbol })
    }

    fn format_batch_create(&self, orders: &[Order]) -> Result<Value, CoreError> {
        let batch: Result<Vec<Value>, CoreError> =
            orders.iter().map(|order| self.format_create(order)).collect();
        Ok(json!({ "batchOrders": batch? }))
    }

    fn format_batch_amend(&self, orders: &[Order]) -> Result<Value, CoreError> {
        let batch: Result<Vec<Value>, CoreError> =
            orders.iter().map(|order| self.format_amend(order)).collect();
        Ok(json!({ "batchOrders": batch? }))
    }

    fn format_batch_cancel(&self, orders: &[Order]) -> Result<Value, CoreError> {
        let ids: Vec<String> = orders
            .iter()
            .filter_map(|order| order.order_id.clone())
            .collect();
        Ok(json!({ "symbol": self.symbol, "orderIdList": ids }))
    }

    fn query(&self, operation: &str) -> Value {
        match operation {
            op::GET_ORDERBOOK => json!({ "symbol": self.symbol, "limit": self.depth }),
            op::GET_TRADES => json!({ "symbol": self.symbol, "limit": 1000 }),
            op::GET_OHLCV => json!({ "symbol": self.symbol, "interval": "1m", "limit": 500 }),
            op::GET_INSTRUMENT_INFO | op::LISTEN_KEY | op::PING_LISTEN_KEY => json!({}),
            _ => json!({ "symbol": self.symbol }),
        }
    }

    fn public_subscriptions(&self) -> Vec<Value> {
        let symbol = self.symbol.to_lowercase();
        vec![json!({
            "method": "SUBSCRIBE",
            "params": [
                format!("{symbol}@trade"),
                format!("{symbol}@depth@100ms"),
                format!("{symbol}@markPrice@1s"),
                format!("{symbol}@kline_1m"),
            ],
            "id": 1,
        })]
    }

    fn private_auth(&self) -> PrivateAuth {
        PrivateAuth::ListenKey { ping_secs: 1800 }
    }

    fn listen_key_from(&self, response: &Value) -> Option<String> {
        field_str(response, "listenKey").map(str::to_string)
    }

    fn classify_frame(&self, _stream: Stream, frame: &Value) -> FrameKind {
        if let Some(event) = field_str(frame, "e") {
            return FrameKind::Topic(event.to_string());
        }
        // Subscription acks carry an id; listen-key echoes carry the key.
        if frame.get("id").is_some() || frame.get("listenKey").is_some() {
            return FrameKind::Control;
        }
        FrameKind::Unknown
    }

    fn topics(&self, stream: Stream) -> Vec<(String, Feed)> {
        match stream {
            Stream::Public => vec![
                ("depthUpdate".to_string(), Feed::Orderbook),
                ("trade".to_string(), Feed::Trades),
                ("kline".to_string(), Feed::Candles),
                ("markPriceUpdate".to_string(), Feed::Ticker),
            ],
            Stream::Private => vec![
                ("ORDER_TRADE_UPDATE".to_string(), Feed::Orders),
                ("ACCOUNT_UPDATE".to_string(), Feed::Position),
            ],
        }
    }

    fn handler(&self, feed: Feed) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&feed).cloned()
    }

    fn parse_instrument(&self, response: &Value) -> Option<(f64, f64)> {
        let symbols = response.get("symbols")?.as_array()?;
        let instrument = symbols
            .iter()
            .find(|entry| field_str(entry, "symbol") == Some(self.symbol.as_str()))?;
        let filters = instrument.get("filters")?.as_array()?;
        let mut tick = None;
        let mut lot = None;
        for filter in filters {
            match field_str(filter, "filterType") {
                Some("PRICE_FILTER") => tick = field_f64(filter, "tickSize"),
                Some("LOT_SIZE") => lot = field_f64(filter, "stepSize"),
                _ => {}
            }
        }
        Some((tick?, lot?))
    }
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

struct OrderbookFrames;

impl Handler for OrderbookFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let seq_id = payload
            .get("lastUpdateId")
            .and_then(Value::as_u64)
            .ok_or_else(|| CoreError::schema("orderbook", "missing lastUpdateId"))?;
        let bids = payload
            .get("bids")
            .and_then(parse_levels)
            .ok_or_else(|| CoreError::schema("orderbook", "missing bids"))?;
        let asks = payload
            .get("asks")
            .and_then(parse_levels)
            .ok_or_else(|| CoreError::schema("orderbook", "missing asks"))?;
        state.orderbook.refresh(&asks, &bids, seq_id);
        Ok(())
    }

    fn process(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let seq_id = payload
            .get("u")
            .and_then(Value::as_u64)
            .ok_or_else(|| CoreError::schema("orderbook", "missing update id"))?;
        if let Some(bids) = payload.get("b").and_then(parse_levels) {
            state.orderbook.update_bids(&bids, seq_id);
        }
        if let Some(asks) = payload.get("a").and_then(parse_levels) {
            state.orderbook.update_asks(&asks, seq_id);
        }
        Ok(())
    }
}

struct TradeFrames;

impl Handler for TradeFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let rows = payload
            .as_array()
            .ok_or_else(|| CoreError::schema("trades", "expected array"))?;
        for row in rows {
            state.trades.push(Trade {
                timestamp: field_f64(row, "time")
                    .ok_or_else(|| CoreError::schema("trades", "missing time"))?,
                // Buyer-maker means the aggressor sold.
                side: if row.get("isBuyerMaker").and_then(Value::as_bool).unwrap_or(false) {
                    Side::Sell
                } else {
                    Side::Buy
                },
                price: field_f64(row, "price")
                    .ok_or_else(|| CoreError::schema("trades", "missing price"))?,
                size: field_f64(row, "qty")
                    .ok_or_else(|| CoreError::schema("trades", "missing qty"))?,
            });
        }
        Ok(())
    }

    fn process(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        state.trades.push(Trade {
            timestamp: field_f64(payload, "T")
                .ok_or_else(|| CoreError::schema("trades", "missing T"))?,
            side: if payload.get("m").and_then(Value::as_bool).unwrap_or(false) {
                Side::Sell
            } else {
                Side::Buy
            },
            price: field_f64(payload, "p")
                .ok_or_else(|| CoreError::schema("trades", "missing p"))?,
            size: field_f64(payload, "q")
                .ok_or_else(|| CoreError::schema("trades", "missing q"))?,
        });
        Ok(())
    }
}

struct TickerFrames;

impl Handler for TickerFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        // premiumIndex returns an object for a single symbol, an array
        // otherwise.
        let row = payload
            .as_array()
            .and_then(|rows| rows.first())
            .unwrap_or(payload);
        state.ticker.update(TickerUpdate {
            funding_time: field_f64(row, "nextFundingTime"),
            funding_rate: field_f64(row, "lastFundingRate"),
            mark_price: field_f64(row, "markPrice"),
            index_price: field_f64(row, "indexPrice"),
        });
        Ok(())
    }

    fn process(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        state.ticker.update(TickerUpdate {
            funding_time: field_f64(payload, "T"),
            funding_rate: field_f64(payload, "r"),
            mark_price: field_f64(payload, "p"),
            index_price: field_f64(payload, "i"),
        });
        Ok(())
    }
}

struct CandleFrames;

impl Handler for CandleFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let rows = payload
            .as_array()
            .ok_or_else(|| CoreError::schema("ohlcv", "expected array"))?;
        state.candles.reset();
        for row in rows {
            let cells = row
                .as_array()
                .ok_or_else(|| CoreError::schema("ohlcv", "kline row is not an array"))?;
            let mut values = [0.0; 6];
            for (slot, cell) in values.iter_mut().zip(cells.iter()) {
                *slot = as_f64(cell)
                    .ok_or_else(|| CoreError::schema("ohlcv", "non-numeric kline cell"))?;
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
        let k = payload
            .get("k")
            .ok_or_else(|| CoreError::schema("ohlcv", "missing k"))?;
        state.candles.push(Candle {
            timestamp: field_f64(k, "t").ok_or_else(|| CoreError::schema("ohlcv", "missing t"))?,
            open: field_f64(k, "o").unwrap_or(0.0),
            high: field_f64(k, "h").unwrap_or(0.0),
            low: field_f64(k, "l").unwrap_or(0.0),
            close: field_f64(k, "c").unwrap_or(0.0),
            volume: field_f64(k, "v").unwrap_or(0.0),
        });
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
    const OVERWRITE: [&'static str; 2] = ["NEW", "PARTIALLY_FILLED"];
    const REMOVE: [&'static str; 5] = [
        "FILLED",
        "CANCELED",
        "REJECTED",
        "EXPIRED",
        "EXPIRED_IN_MATCH",
    ];
}

impl Handler for OrderFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let rows = payload
            .as_array()
            .ok_or_else(|| CoreError::schema("orders", "expected array"))?;
        state.orders.clear();
        for row in rows {
            if field_str(row, "symbol") != Some(self.symbol.as_str()) {
                continue;
            }
            let side_str = field_str(row, "side")
                .ok_or_else(|| CoreError::schema("orders", "missing side"))?;
            let side = self
                .side
                .side(side_str)
                .ok_or_else(|| CoreError::schema("orders", format!("unknown side {side_str}")))?;
            let orig = field_f64(row, "origQty")
                .ok_or_else(|| CoreError::schema("orders", "missing origQty"))?;
            let executed = field_f64(row, "executedQty").unwrap_or(0.0);
            state.orders.insert(Order {
                symbol: self.symbol.clone(),
                side,
                order_type: field_str(row, "origType")
                    .and_then(|s| self.order_type.order_type(s))
                    .unwrap_or(OrderType::Limit),
                time_in_force: field_str(row, "timeInForce")
                    .and_then(|s| self.tif.time_in_force(s))
                    .unwrap_or(TimeInForce::Gtc),
                size: orig - executed,
                price: field_f64(row, "price"),
                order_id: id_str(row.get("orderId")),
                client_order_id: id_str(row.get("clientOrderId")),
            });
        }
        Ok(())
    }

    fn process(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let order = payload
            .get("o")
            .ok_or_else(|| CoreError::schema("orders", "missing o"))?;
        if field_str(order, "s") != Some(self.symbol.as_str()) {
            return Ok(());
        }
        let status = field_str(order, "X")
            .ok_or_else(|| CoreError::schema("orders", "missing status"))?;

        if Self::OVERWRITE.contains(&status) {
            let side_str = field_str(order, "S")
                .ok_or_else(|| CoreError::schema("orders", "missing side"))?;
            let side = self
                .side
                .side(side_str)
                .ok_or_else(|| CoreError::schema("orders", format!("unknown side {side_str}")))?;
            let qty = field_f64(order, "q")
                .ok_or_else(|| CoreError::schema("orders", "missing q"))?;
            let filled = field_f64(order, "z").unwrap_or(0.0);
            state.orders.insert(Order {
                symbol: self.symbol.clone(),
                side,
                order_type: field_str(order, "o")
                    .and_then(|s| self.order_type.order_type(s))
                    .unwrap_or(OrderType::Limit),
                time_in_force: field_str(order, "f")
                    .and_then(|s| self.tif.time_in_force(s))
                    .unwrap_or(TimeInForce::Gtc),
                size: qty - filled,
                price: field_f64(order, "p"),
                order_id: id_str(order.get("i")),
                client_order_id: id_str(order.get("c")),
            });
        } else if Self::REMOVE.contains(&status) {
            if let Some(order_id) = id_str(order.get("i")) {
                state.orders.remove(&order_id);
            }
        }
        Ok(())
    }
}

struct PositionFrames {
    symbol: String,
    direction: PositionDirectionConverter,
}

impl PositionFrames {
    fn direction_of(&self, row: &Value, side_field: &str, size: f64) -> Option<PositionDirection> {
        match field_str(row, side_field).and_then(|s| self.direction.direction(s)) {
            Some(direction) => Some(direction),
            // One-way mode reports "BOTH": derive from the signed size.
            None => Some(if size >= 0.0 {
                PositionDirection::Long
            } else {
                PositionDirection::Short
            }),
        }
    }

    fn apply(&self, state: &mut LiveState, row: &Value, side_field: &str, price_field: &str, size_field: &str, upnl_field: &str) -> Result<(), CoreError> {
        let size = field_f64(row, size_field)
            .ok_or_else(|| CoreError::schema("position", "missing size"))?;
        if size == 0.0 {
            state.position.clear();
            return Ok(());
        }
        state.position.update(PositionUpdate {
            symbol: Some(self.symbol.clone()),
            direction: self.direction_of(row, side_field, size),
            entry_price: field_f64(row, price_field),
            size: Some(size),
            upnl: field_f64(row, upnl_field),
        });
        Ok(())
    }
}

impl Handler for PositionFrames {
    fn refresh(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let rows = payload
            .as_array()
            .ok_or_else(|| CoreError::schema("position", "expected array"))?;
        for row in rows {
            if field_str(row, "symbol") != Some(self.symbol.as_str()) {
                continue;
            }
            self.apply(state, row, "positionSide", "entryPrice", "positionAmt", "unRealizedProfit")?;
        }
        Ok(())
    }

    fn process(&self, state: &mut LiveState, payload: &Value) -> Result<(), CoreError> {
        let account = payload
            .get("a")
            .ok_or_else(|| CoreError::schema("position", "missing a"))?;
        // Only order-driven updates mutate the position.
        if field_str(account, "m") != Some("ORDER") {
            return Ok(());
        }
        let rows = account
            .get("P")
            .and_then(Value::as_array)
            .ok_or_else(|| CoreError::schema("position", "missing P"))?;
        for row in rows {
            if field_str(row, "s") != Some(self.symbol.as_str()) {
                continue;
            }
            self.apply(state, row, "ps", "ep", "pa", "up")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port() -> Binance {
        Binance::new(Credentials::test("key", "secret"), &SessionConfig::test("btcusdt"))
    }

    fn state() -> LiveState {
        LiveState::new("BTCUSDT", 50, 100, 100)
    }

    #[test]
    fn test_sign_adds_signature_field() {
        let request = port()
            .sign(op::CREATE_ORDER, &json!({"symbol": "BTCUSDT", "side": "BUY"}))
            .unwrap();
        let body = request.body.unwrap();
        assert!(body.get("signature").is_some());
        assert!(body.get("timestamp").is_some());
        assert!(body.get("recvWindow").is_some());
        assert_eq!(request.headers[0].0, "X-MBX-APIKEY");
    }

    #[test]
    fn test_public_ops_unsigned() {
        let request = port()
            .sign(op::GET_ORDERBOOK, &json!({"symbol": "BTCUSDT", "limit": 50}))
            .unwrap();
        assert!(request.headers.is_empty());
        assert!(request.body.is_none());
    }

    #[test]
    fn test_signature_changes_between_attempts() {
        // Timestamps advance, so re-signing the same payload must not be
        // byte-stable. (Two signs in the same millisecond share a
        // timestamp, so compare the embedded timestamps instead.)
        let p = port();
        let a = p.sign(op::CREATE_ORDER, &json!({"symbol": "BTCUSDT"})).unwrap();
        let body = a.body.unwrap();
        assert!(body["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_classify_handles_negative_codes() {
        let p = port();
        assert_eq!(p.classify(&json!({"code": -1003})).0, ErrorClass::RateLimited);
        assert_eq!(p.classify(&json!({"code": 1008})).0, ErrorClass::ServerRetryable);
        assert_eq!(p.classify(&json!({"code": 2013})).0, ErrorClass::Benign);
        assert_eq!(p.classify(&json!({})).0, ErrorClass::Ok);
        let (class, message) = p.classify(&json!({"code": -9999, "msg": "nope"}));
        assert_eq!(class, ErrorClass::ClientFatal);
        assert!(message.contains("nope"));
    }

    #[test]
    fn test_market_create_has_no_price_or_tif() {
        let order = Order {
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Gtc,
            size: 0.5,
            price: None,
            order_id: None,
            client_order_id: None,
        };
        let payload = port().format_create(&order).unwrap();
        assert_eq!(payload["type"], "MARKET");
        assert!(payload.get("price").is_none());
        assert!(payload.get("timeInForce").is_none());
    }

    #[test]
    fn test_post_only_maps_to_gtx() {
        let order = Order {
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::PostOnly,
            size: 0.5,
            price: Some(60_000.0),
            order_id: None,
            client_order_id: None,
        };
        let payload = port().format_create(&order).unwrap();
        assert_eq!(payload["timeInForce"], "GTX");
    }

    #[test]
    fn test_trade_side_mapping() {
        // Buyer-maker true → aggressor sold.
        let p = port();
        let mut st = state();
        let frame = json!({"e": "trade", "m": true, "p": "50000", "q": "1", "T": 123});
        p.handler(Feed::Trades).unwrap().process(&mut st, &frame).unwrap();
        let trades = st.trades.unwrap();
        assert_eq!(trades[0].side, Side::Sell);
        assert_eq!(trades[0].price, 50_000.0);
        assert_eq!(trades[0].size, 1.0);
        assert_eq!(trades[0].timestamp, 123.0);

        let frame = json!({"e": "trade", "m": false, "p": "50001", "q": "2", "T": 124});
        p.handler(Feed::Trades).unwrap().process(&mut st, &frame).unwrap();
        assert_eq!(st.trades.last().map(|t| t.side), Some(Side::Buy));
    }

    #[test]
    fn test_depth_snapshot_and_delta() {
        let p = port();
        let mut st = state();
        let snapshot = json!({
            "lastUpdateId": 10,
            "bids": [["99", "1"], ["98", "2"]],
            "asks": [["100", "1"], ["101", "2"]],
        });
        p.handler(Feed::Orderbook).unwrap().refresh(&mut st, &snapshot).unwrap();
        assert_eq!(st.orderbook.seq_id(), 10);

        let delta = json!({"e": "depthUpdate", "u": 11, "b": [["99", "0"], ["97", "5"]], "a": []});
        p.handler(Feed::Orderbook).unwrap().process(&mut st, &delta).unwrap();
        assert_eq!(st.orderbook.bids(), &[[98.0, 2.0], [97.0, 5.0]]);
        assert_eq!(st.orderbook.best_bid()[0], 98.0);

        let stale = json!({"e": "depthUpdate", "u": 9, "b": [["98", "0"]], "a": []});
        p.handler(Feed::Orderbook).unwrap().process(&mut st, &stale).unwrap();
        assert_eq!(st.orderbook.seq_id(), 11);
        assert_eq!(st.orderbook.best_bid()[0], 98.0);
    }

    #[test]
    fn test_order_trade_update_lifecycle() {
        let p = port();
        let mut st = state();
        let new_order = json!({
            "e": "ORDER_TRADE_UPDATE",
            "o": {
                "s": "BTCUSDT", "S": "BUY", "o": "LIMIT", "f": "GTX",
                "p": "64000", "q": "0.02", "z": "0", "X": "NEW",
                "i": 123456, "c": "mmB01",
            },
        });
        p.handler(Feed::Orders).unwrap().process(&mut st, &new_order).unwrap();
        assert_eq!(st.orders.len(), 1);
        let stored = st.orders.get("123456").unwrap();
        assert_eq!(stored.size, 0.02);
        assert_eq!(stored.client_order_id.as_deref(), Some("mmB01"));

        let canceled = json!({
            "e": "ORDER_TRADE_UPDATE",
            "o": {"s": "BTCUSDT", "X": "CANCELED", "i": 123456},
        });
        p.handler(Feed::Orders).unwrap().process(&mut st, &canceled).unwrap();
        assert!(st.orders.is_empty());
    }

    #[test]
    fn test_account_update_requires_order_reason() {
        let p = port();
        let mut st = state();
        let funding = json!({
            "e": "ACCOUNT_UPDATE",
            "a": {"m": "FUNDING_FEE", "P": [{"s": "BTCUSDT", "ps": "LONG", "ep": "64000", "pa": "1", "up": "5"}]},
        });
        p.handler(Feed::Position).unwrap().process(&mut st, &funding).unwrap();
        assert!(st.position.is_empty());

        let order_update = json!({
            "e": "ACCOUNT_UPDATE",
            "a": {"m": "ORDER", "P": [{"s": "BTCUSDT", "ps": "BOTH", "ep": "64000", "pa": "-1", "up": "5"}]},
        });
        p.handler(Feed::Position).unwrap().process(&mut st, &order_update).unwrap();
        assert_eq!(st.position.size, -1.0);
        // "BOTH" falls back to sign-derived direction.
        assert_eq!(st.position.direction, Some(PositionDirection::Short));
    }

    #[test]
    fn test_mark_price_stream() {
        let p = port();
        let mut st = state();
        let frame = json!({
            "e": "markPriceUpdate", "p": "64000.5", "i": "63990.1",
            "r": "0.0001", "T": 1_700_000_000_000u64,
        });
        p.handler(Feed::Ticker).unwrap().process(&mut st, &frame).unwrap();
        assert_eq!(st.ticker.mark_price, 64_000.5);
        assert_eq!(st.ticker.index_price, 63_990.1);
        assert!((st.ticker.funding_rate_bps() - 1.0).abs() < 1e-9);
        assert_eq!(st.ticker.funding_time, 1_700_000_000_000.0);
    }

    #[test]
    fn test_frame_classification() {
        let p = port();
        assert_eq!(
            p.classify_frame(Stream::Public, &json!({"e": "depthUpdate"})),
            FrameKind::Topic("depthUpdate".to_string())
        );
        assert_eq!(
            p.classify_frame(Stream::Public, &json!({"result": null, "id": 1})),
            FrameKind::Control
        );
        assert_eq!(
            p.classify_frame(Stream::Private, &json!({"listenKey": "abc"})),
            FrameKind::Control
        );
        assert_eq!(p.classify_frame(Stream::Public, &json!({"x": 1})), FrameKind::Unknown);
    }

    #[test]
    fn test_instrument_parse() {
        let body = json!({
            "symbols": [{
                "symbol": "BTCUSDT",
                "filters": [
                    {"filterType": "PRICE_FILTER", "tickSize": "0.10"},
                    {"filterType": "LOT_SIZE", "stepSize": "0.001"},
                ],
            }],
        });
        assert_eq!(port().parse_instrument(&body), Some((0.10, 0.001)));
    }
}
