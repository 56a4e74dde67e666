//! Funding / mark / index ticker, updated only on venue push or scheduled
//! refresh.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Ticker {
    /// Next funding settlement, unix millis.
    pub funding_time: f64,
    pub funding_rate: f64,
    pub mark_price: f64,
    pub index_price: f64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct TickerRecord {
    #[serde(rename = "fundingTime")]
    pub funding_time: f64,
    #[serde(rename = "fundingRate")]
    pub funding_rate: f64,
    #[serde(rename = "markPrice")]
    pub mark_price: f64,
    #[serde(rename = "indexPrice")]
    pub index_price: f64,
}

/// Partial update from a venue frame; `None` fields keep current values.
/// Most venues push tickers as sparse deltas.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickerUpdate {
    pub funding_time: Option<f64>,
    pub funding_rate: Option<f64>,
    pub mark_price: Option<f64>,
    pub index_price: Option<f64>,
}

impl Ticker {
    pub fn funding_rate_bps(&self) -> f64 {
        self.funding_rate * 10_000.0
    }

    pub fn update(&mut self, update: TickerUpdate) {
        if let Some(v) = update.funding_time {
            self.funding_time = v;
        }
        if let Some(v) = update.funding_rate {
            self.funding_rate = v;
        }
        if let Some(v) = update.mark_price {
            self.mark_price = v;
        }
        if let Some(v) = update.index_price {
            self.index_price = v;
        }
    }

    pub fn reset(&mut self) {
        *self = Ticker::default();
    }

    pub fn recordable(&self) -> TickerRecord {
        TickerRecord {
            funding_time: self.funding_time,
            funding_rate: self.funding_rate,
            mark_price: self.mark_price,
            index_price: self.index_price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_funding_rate_bps() {
        let ticker = Ticker {
            funding_rate: 0.0001,
            ..Ticker::default()
        };
        assert!((ticker.funding_rate_bps() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_sparse_update() {
        let mut ticker = Ticker {
            funding_time: 1.0,
            funding_rate: 0.0001,
            mark_price: 100.0,
            index_price: 99.5,
        };
        ticker.update(TickerUpdate {
            mark_price: Some(101.0),
            ..TickerUpdate::default()
        });
        assert_eq!(ticker.mark_price, 101.0);
        assert_eq!(ticker.index_price, 99.5);
        assert_eq!(ticker.funding_rate, 0.0001);
    }

    #[test]
    fn test_reset() {
        let mut ticker = Ticker {
            mark_price: 100.0,
            ..Ticker::default()
        };
        ticker.reset();
        assert_eq!(ticker, Ticker::default());
    }
}
