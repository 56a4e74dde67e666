//! Signed REST client shared by every venue port.
//!
//! The port contributes the signature and the error table; this module
//! contributes transport, classification-driven retry and the typed API
//! façade the OMS and refreshers call.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

use crate::endpoints::{op, HttpMethod};
use crate::error::{CoreError, ErrorClass};
use crate::state::Order;
use crate::venues::VenuePort;

/// A fully signed request, ready for transport. Produced fresh on every
/// attempt so retries carry advancing timestamps.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl SignedRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Exponential backoff with 10% jitter, capped at the policy ceiling.
#[derive(Debug)]
pub struct Backoff {
    delay: Duration,
    ceiling: Duration,
}

impl Backoff {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            delay: policy.base_delay,
            ceiling: policy.max_delay,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let jitter = 1.0 + rand::thread_rng().gen_range(0.0..0.1);
        let current = self.delay.mul_f64(jitter).min(self.ceiling);
        self.delay = (self.delay * 2).min(self.ceiling);
        current
    }
}

#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    policy: RetryPolicy,
}

impl RestClient {
    pub fn new(request_timeout: Duration, policy: RetryPolicy) -> Result<Self, CoreError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(CoreError::from)?;
        Ok(Self { http, policy })
    }

    /// Sign, send and classify one logical operation, retrying only the
    /// retryable classes.
    pub async fn send(
        &self,
        venue: &dyn VenuePort,
        operation: &str,
        payload: Value,
    ) -> Result<Value, CoreError> {
        let mut backoff = Backoff::new(&self.policy);
        let mut last_failure = String::new();

        for attempt in 1..=self.policy.max_attempts {
            // Re-sign each attempt: timestamps advance.
            let request = venue.sign(operation, &payload)?;

            match self.dispatch(&request).await {
                Ok((status, body)) => {
                    // A body the code table cannot fault on a failing HTTP
                    // status still classifies by the status itself.
                    let (class, message) = match venue.classify(&body) {
                        (ErrorClass::Ok, _) if !status.is_success() => {
                            if status.as_u16() == 429 {
                                (ErrorClass::RateLimited, format!("http {status}"))
                            } else if status.is_server_error() {
                                (ErrorClass::ServerRetryable, format!("http {status}"))
                            } else {
                                (ErrorClass::ClientFatal, format!("http {status}"))
                            }
                        }
                        classified => classified,
                    };
                    match class {
                        ErrorClass::Ok => return Ok(body),
                        ErrorClass::Benign => {
                            debug!(venue = venue.name(), operation, "benign venue response: {message}");
                            return Ok(body);
                        }
                        ErrorClass::ClientFatal => {
                            return Err(CoreError::VenueFatal(message));
                        }
                        ErrorClass::RateLimited => {
                            if attempt == self.policy.max_attempts {
                                return Err(CoreError::RateLimited(message));
                            }
                            last_failure = message;
                        }
                        ErrorClass::ServerRetryable => {
                            if attempt == self.policy.max_attempts {
                                return Err(CoreError::Transport(message));
                            }
                            last_failure = message;
                        }
                    }
                }
                Err(e @ CoreError::VenueFatal(_)) => return Err(e),
                // Timeouts and resets are server-retryable.
                Err(e) => {
                    if attempt == self.policy.max_attempts {
                        return Err(e);
                    }
                    last_failure = e.to_string();
                }
            }

            let delay = backoff.next_delay();
            warn!(
                venue = venue.name(),
                operation, attempt, "retrying in {delay:?}: {last_failure}"
            );
            tokio::time::sleep(delay).await;
        }

        Err(CoreError::Transport(format!(
            "{operation}: retries exhausted: {last_failure}"
        )))
    }

    async fn dispatch(
        &self,
        request: &SignedRequest,
    ) -> Result<(reqwest::StatusCode, Value), CoreError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::None => {
                return Err(CoreError::VenueFatal(format!(
                    "endpoint {} has no HTTP method",
                    request.url
                )))
            }
        };

        let mut builder = self.http.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CoreError::Transport(format!("timeout: {e}"))
            } else {
                CoreError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        // Bodyless HTTP failures never reach the venue code tables.
        if body.is_null() && !status.is_success() {
            if status.as_u16() == 429 {
                return Err(CoreError::RateLimited(format!("http {status}")));
            }
            if status.is_server_error() {
                return Err(CoreError::Transport(format!("http {status}")));
            }
            return Err(CoreError::VenueFatal(format!("http {status}")));
        }
        Ok((status, body))
    }
}

/// Typed REST surface over one venue: the uniform order-management calls
/// plus the market-data snapshots the refreshers pull.
pub struct RestApi {
    venue: Arc<dyn VenuePort>,
    client: RestClient,
}

impl RestApi {
    pub fn new(venue: Arc<dyn VenuePort>, client: RestClient) -> Self {
        Self { venue, client }
    }

    pub fn venue(&self) -> &Arc<dyn VenuePort> {
        &self.venue
    }

    pub async fn create_order(&self, order: &Order) -> Result<Value, CoreError> {
        let payload = self.venue.format_create(order)?;
        self.client.send(&*self.venue, op::CREATE_ORDER, payload).await
    }

    pub async fn amend_order(&self, order: &Order) -> Result<Value, CoreError> {
        let payload = self.venue.format_amend(order)?;
        self.client.send(&*self.venue, op::AMEND_ORDER, payload).await
    }

    pub async fn cancel_order(&self, order: &Order) -> Result<Value, CoreError> {
        let payload = self.venue.format_cancel(order)?;
        self.client.send(&*self.venue, op::CANCEL_ORDER, payload).await
    }

    pub async fn cancel_all_orders(&self) -> Result<Value, CoreError> {
        let payload = self.venue.format_cancel_all();
        self.client
            .send(&*self.venue, op::CANCEL_ALL_ORDERS, payload)
            .await
    }

    pub async fn batch_create_orders(&self, orders: &[Order]) -> Result<Value, CoreError> {
        let payload = self.venue.format_batch_create(orders)?;
        self.client
            .send(&*self.venue, op::BATCH_CREATE_ORDERS, payload)
            .await
    }

    pub async fn batch_amend_orders(&self, orders: &[Order]) -> Result<Value, CoreError> {
        let payload = self.venue.format_batch_amend(orders)?;
        self.client
            .send(&*self.venue, op::BATCH_AMEND_ORDERS, payload)
            .await
    }

    pub async fn batch_cancel_orders(&self, orders: &[Order]) -> Result<Value, CoreError> {
        let payload = self.venue.format_batch_cancel(orders)?;
        self.client
            .send(&*self.venue, op::BATCH_CANCEL_ORDERS, payload)
            .await
    }

    pub async fn get_snapshot(&self, operation: &'static str) -> Result<Value, CoreError> {
        let payload = self.venue.query(operation);
        self.client.send(&*self.venue, operation, payload).await
    }

    pub async fn get_orderbook(&self) -> Result<Value, CoreError> {
        self.get_snapshot(op::GET_ORDERBOOK).await
    }

    pub async fn get_trades(&self) -> Result<Value, CoreError> {
        self.get_snapshot(op::GET_TRADES).await
    }

    pub async fn get_ticker(&self) -> Result<Value, CoreError> {
        self.get_snapshot(op::GET_TICKER).await
    }

    pub async fn get_ohlcv(&self) -> Result<Value, CoreError> {
        self.get_snapshot(op::GET_OHLCV).await
    }

    pub async fn get_open_orders(&self) -> Result<Value, CoreError> {
        self.get_snapshot(op::GET_OPEN_ORDERS).await
    }

    pub async fn get_position(&self) -> Result<Value, CoreError> {
        self.get_snapshot(op::GET_POSITION).await
    }

    pub async fn get_instrument_info(&self) -> Result<Value, CoreError> {
        self.get_snapshot(op::GET_INSTRUMENT_INFO).await
    }

    pub async fn create_listen_key(&self) -> Result<Value, CoreError> {
        self.get_snapshot(op::LISTEN_KEY).await
    }

    pub async fn ping_listen_key(&self) -> Result<Value, CoreError> {
        self.get_snapshot(op::PING_LISTEN_KEY).await
    }
}
