//! OHLCV candle ring with in-place same-bucket updates.

use serde::Serialize;

use super::ring::Ring;

pub const DEFAULT_CANDLES_LEN: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    /// Bucket open time, unix millis.
    pub timestamp: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct CandleRecord {
    pub timestamp: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn recordable(&self) -> CandleRecord {
        CandleRecord {
            timestamp: self.timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Candles {
    ring: Ring<Candle>,
}

impl Candles {
    pub fn new(length: usize) -> Self {
        Self {
            ring: Ring::new(length),
        }
    }

    /// Venues stream the open bucket repeatedly: a candle whose timestamp
    /// does not advance past the head replaces the head instead of
    /// appending.
    pub fn push(&mut self, candle: Candle) {
        if let Some(head) = self.ring.last_mut() {
            if candle.timestamp <= head.timestamp {
                *head = candle;
                return;
            }
        }
        self.ring.push(candle);
    }

    pub fn extend(&mut self, candles: impl IntoIterator<Item = Candle>) {
        for candle in candles {
            self.push(candle);
        }
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn reset(&mut self) {
        self.ring.clear();
    }

    pub fn last(&self) -> Option<&Candle> {
        self.ring.last()
    }

    /// Oldest→newest snapshot copy.
    pub fn unwrap(&self) -> Vec<Candle> {
        self.ring.unwrap()
    }

    pub fn recordable(&self) -> Vec<CandleRecord> {
        self.ring.iter().map(Candle::recordable).collect()
    }
}

impl Default for Candles {
    fn default() -> Self {
        Self::new(DEFAULT_CANDLES_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: f64, close: f64) -> Candle {
        Candle {
            timestamp: ts,
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 10.0,
        }
    }

    #[test]
    fn test_new_bucket_appends() {
        let mut candles = Candles::new(4);
        candles.push(candle(60.0, 100.0));
        candles.push(candle(120.0, 101.0));
        assert_eq!(candles.len(), 2);
    }

    #[test]
    fn test_same_bucket_replaces_head() {
        let mut candles = Candles::new(4);
        candles.push(candle(60.0, 100.0));
        candles.push(candle(120.0, 101.0));
        candles.push(candle(120.0, 105.0));
        assert_eq!(candles.len(), 2);
        assert_eq!(candles.last().map(|c| c.close), Some(105.0));
    }

    #[test]
    fn test_stale_bucket_also_replaces_head() {
        let mut candles = Candles::new(4);
        candles.push(candle(120.0, 101.0));
        candles.push(candle(60.0, 99.0));
        assert_eq!(candles.len(), 1);
        assert_eq!(candles.last().map(|c| c.timestamp), Some(60.0));
    }

    #[test]
    fn test_bounded() {
        let mut candles = Candles::new(3);
        for i in 1..=5 {
            candles.push(candle(i as f64 * 60.0, 100.0 + i as f64));
        }
        let rows = candles.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].timestamp, 180.0);
        assert_eq!(rows[2].timestamp, 300.0);
    }
}
