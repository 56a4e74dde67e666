//! Endpoint tables: logical operation name → (URL path, HTTP method).
//!
//! A venue port is largely data: fill in this table, the signing function
//! and the error map, and the generic client does the rest. Base URLs live
//! under the reserved names `rest`, `publicWs` and `privateWs`.

use std::collections::HashMap;

use crate::error::CoreError;

/// Logical operation names shared by all ports.
pub mod op {
    pub const CREATE_ORDER: &str = "createOrder";
    pub const AMEND_ORDER: &str = "amendOrder";
    pub const CANCEL_ORDER: &str = "cancelOrder";
    pub const CANCEL_ALL_ORDERS: &str = "cancelAllOrders";
    pub const BATCH_CREATE_ORDERS: &str = "batchCreateOrders";
    pub const BATCH_AMEND_ORDERS: &str = "batchAmendOrders";
    pub const BATCH_CANCEL_ORDERS: &str = "batchCancelOrders";
    pub const GET_ORDERBOOK: &str = "getOrderbook";
    pub const GET_TRADES: &str = "getTrades";
    pub const GET_TICKER: &str = "getTicker";
    pub const GET_OHLCV: &str = "getOhlcv";
    pub const GET_OPEN_ORDERS: &str = "getOpenOrders";
    pub const GET_POSITION: &str = "getPosition";
    pub const GET_INSTRUMENT_INFO: &str = "getInstrumentInfo";
    pub const LISTEN_KEY: &str = "listenKey";
    pub const PING_LISTEN_KEY: &str = "pingListenKey";

    pub const REST: &str = "rest";
    pub const PUBLIC_WS: &str = "publicWs";
    pub const PRIVATE_WS: &str = "privateWs";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
    /// Placeholder for base URLs, which carry no method.
    None,
}

#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    pub url: &'static str,
    pub method: HttpMethod,
}

impl Endpoint {
    pub const fn new(url: &'static str, method: HttpMethod) -> Self {
        Self { url, method }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EndpointTable {
    inner: HashMap<&'static str, Endpoint>,
}

impl EndpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(rest: &'static str, public_ws: &'static str, private_ws: &'static str) -> Self {
        let mut table = Self::new();
        table.insert(op::REST, Endpoint::new(rest, HttpMethod::None));
        table.insert(op::PUBLIC_WS, Endpoint::new(public_ws, HttpMethod::None));
        table.insert(op::PRIVATE_WS, Endpoint::new(private_ws, HttpMethod::None));
        table
    }

    pub fn insert(&mut self, name: &'static str, endpoint: Endpoint) {
        self.inner.insert(name, endpoint);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    /// An absent operation is a hard venue error, not a panic: some ports
    /// legitimately omit parts of the surface (e.g. dYdX order mutation).
    pub fn get(&self, name: &str) -> Result<Endpoint, CoreError> {
        self.inner
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::VenueFatal(format!("unsupported operation: {name}")))
    }

    pub fn rest_base(&self) -> &'static str {
        self.base(op::REST)
    }

    pub fn public_ws(&self) -> &'static str {
        self.base(op::PUBLIC_WS)
    }

    pub fn private_ws(&self) -> &'static str {
        self.base(op::PRIVATE_WS)
    }

    fn base(&self, name: &str) -> &'static str {
        self.inner.get(name).map(|e| e.url).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_urls_under_reserved_names() {
        let table = EndpointTable::with_base(
            "https://api.example.com",
            "wss://stream.example.com/public",
            "wss://stream.example.com/private",
        );
        assert_eq!(table.rest_base(), "https://api.example.com");
        assert_eq!(table.public_ws(), "wss://stream.example.com/public");
        assert_eq!(table.private_ws(), "wss://stream.example.com/private");
    }

    #[test]
    fn test_missing_operation_is_venue_fatal() {
        let table = EndpointTable::new();
        let err = table.get(op::CREATE_ORDER).unwrap_err();
        assert!(err.to_string().contains("createOrder"));
    }

    #[test]
    fn test_lookup() {
        let mut table = EndpointTable::new();
        table.insert(
            op::CREATE_ORDER,
            Endpoint::new("/v5/order/create", HttpMethod::Post),
        );
        let ep = table.get(op::CREATE_ORDER).unwrap();
        assert_eq!(ep.url, "/v5/order/create");
        assert_eq!(ep.method, HttpMethod::Post);
    }
}
