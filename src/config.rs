//! Session configuration and venue credentials.
//!
//! Everything is env-driven with sensible defaults, so a binary can come up
//! from a plain `.env`. Secrets are wrapped in [`SecretString`] and only
//! exposed at the signing site.

use std::env;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::CoreError;
use crate::http::RetryPolicy;
use crate::oms::OmsConfig;
use crate::ws::WsConfig;

#[derive(Clone, Debug)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: SecretString,
    /// Required by some venues (e.g. OKX); unused elsewhere.
    pub passphrase: Option<SecretString>,
}

impl Credentials {
    /// Read `{PREFIX}_API_KEY`, `{PREFIX}_API_SECRET` and optionally
    /// `{PREFIX}_API_PASSPHRASE`.
    pub fn from_env(prefix: &str) -> Result<Self, CoreError> {
        let key_var = format!("{prefix}_API_KEY");
        let secret_var = format!("{prefix}_API_SECRET");
        let api_key = env::var(&key_var)
            .map_err(|_| CoreError::Validation(format!("{key_var} not set")))?;
        let api_secret = env::var(&secret_var)
            .map_err(|_| CoreError::Validation(format!("{secret_var} not set")))?;
        let passphrase = env::var(format!("{prefix}_API_PASSPHRASE"))
            .ok()
            .map(SecretString::from);
        Ok(Self {
            api_key,
            api_secret: SecretString::from(api_secret),
            passphrase,
        })
    }

    #[cfg(test)]
    pub fn test(key: &str, secret: &str) -> Self {
        Self {
            api_key: key.to_string(),
            api_secret: SecretString::from(secret.to_string()),
            passphrase: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cased per venue at port construction.
    pub symbol: String,
    pub orderbook_depth: usize,
    pub trades_len: usize,
    pub candles_len: usize,
    /// Scheduled snapshot-refresh interval per topic.
    pub refresh_secs: u64,
    pub recv_window_ms: u64,
    pub request_timeout: Duration,
    pub rest_retry: RetryPolicy,
    pub ws: WsConfig,
    pub oms: OmsConfig,
}

impl SessionConfig {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            orderbook_depth: 50,
            trades_len: 1000,
            candles_len: 1000,
            refresh_secs: 600,
            recv_window_ms: 1000,
            request_timeout: Duration::from_secs(5),
            rest_retry: RetryPolicy::default(),
            ws: WsConfig::default(),
            oms: OmsConfig::default(),
        }
    }

    /// Defaults overridden by `PERPMUX_*` variables where set.
    pub fn from_env() -> Result<Self, CoreError> {
        let symbol = env::var("PERPMUX_SYMBOL")
            .map_err(|_| CoreError::Validation("PERPMUX_SYMBOL not set".into()))?;
        let mut cfg = Self::new(symbol);

        if let Ok(v) = env::var("PERPMUX_ORDERBOOK_DEPTH") {
            if let Ok(n) = v.parse() {
                cfg.orderbook_depth = n;
            }
        }
        if let Ok(v) = env::var("PERPMUX_TRADES_LEN") {
            if let Ok(n) = v.parse() {
                cfg.trades_len = n;
            }
        }
        if let Ok(v) = env::var("PERPMUX_CANDLES_LEN") {
            if let Ok(n) = v.parse() {
                cfg.candles_len = n;
            }
        }
        if let Ok(v) = env::var("PERPMUX_REFRESH_SECS") {
            if let Ok(n) = v.parse() {
                cfg.refresh_secs = n;
            }
        }
        if let Ok(v) = env::var("PERPMUX_RECV_WINDOW_MS") {
            if let Ok(n) = v.parse() {
                cfg.recv_window_ms = n;
            }
        }
        if let Ok(v) = env::var("PERPMUX_TOTAL_ORDERS") {
            if let Ok(n) = v.parse() {
                cfg.oms.total_orders = n;
            }
        }
        if let Ok(v) = env::var("PERPMUX_OOB_SENSITIVITY") {
            if let Ok(n) = v.parse() {
                cfg.oms.sensitivity = n;
            }
        }
        Ok(cfg)
    }

    #[cfg(test)]
    pub fn test(symbol: &str) -> Self {
        Self::new(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = SessionConfig::new("btcusdt");
        assert_eq!(cfg.orderbook_depth, 50);
        assert_eq!(cfg.trades_len, 1000);
        assert_eq!(cfg.candles_len, 1000);
        assert_eq!(cfg.refresh_secs, 600);
        assert_eq!(cfg.recv_window_ms, 1000);
        assert_eq!(cfg.oms.total_orders, 10);
        assert!((cfg.oms.sensitivity - 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_missing_credentials_error_names_variable() {
        let err = Credentials::from_env("DEFINITELY_UNSET_VENUE").unwrap_err();
        assert!(err.to_string().contains("DEFINITELY_UNSET_VENUE_API_KEY"));
    }
}
