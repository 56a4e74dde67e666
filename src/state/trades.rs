//! Append-only ring of recent public trades.

use serde::Serialize;

use super::ring::Ring;
use crate::types::Side;

pub const DEFAULT_TRADES_LEN: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trade {
    /// Unix millis.
    pub timestamp: f64,
    pub side: Side,
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct TradeRecord {
    pub timestamp: f64,
    pub side: i64,
    pub price: f64,
    pub size: f64,
}

impl Trade {
    pub fn recordable(&self) -> TradeRecord {
        TradeRecord {
            timestamp: self.timestamp,
            side: self.side.as_num(),
            price: self.price,
            size: self.size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Trades {
    ring: Ring<Trade>,
}

impl Trades {
    pub fn new(length: usize) -> Self {
        Self {
            ring: Ring::new(length),
        }
    }

    pub fn push(&mut self, trade: Trade) {
        self.ring.push(trade);
    }

    pub fn extend(&mut self, trades: impl IntoIterator<Item = Trade>) {
        for trade in trades {
            self.push(trade);
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

    pub fn last(&self) -> Option<&Trade> {
        self.ring.last()
    }

    /// Oldest→newest snapshot copy.
    pub fn unwrap(&self) -> Vec<Trade> {
        self.ring.unwrap()
    }

    pub fn recordable(&self) -> Vec<TradeRecord> {
        self.ring.iter().map(Trade::recordable).collect()
    }
}

impl Default for Trades {
    fn default() -> Self {
        Self::new(DEFAULT_TRADES_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(ts: f64, price: f64) -> Trade {
        Trade {
            timestamp: ts,
            side: Side::Buy,
            price,
            size: 1.0,
        }
    }

    #[test]
    fn test_append_only_order() {
        let mut trades = Trades::new(4);
        trades.extend([trade(1.0, 100.0), trade(2.0, 101.0)]);
        let rows = trades.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, 1.0);
        assert_eq!(rows[1].timestamp, 2.0);
    }

    #[test]
    fn test_bounded_eviction() {
        let mut trades = Trades::new(3);
        for i in 0..5 {
            trades.push(trade(i as f64, 100.0));
        }
        let rows = trades.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].timestamp, 2.0);
        assert_eq!(rows[2].timestamp, 4.0);
    }

    #[test]
    fn test_recordable() {
        let mut trades = Trades::new(2);
        trades.push(Trade {
            timestamp: 123.0,
            side: Side::Sell,
            price: 50_000.0,
            size: 1.0,
        });
        let rec = &trades.recordable()[0];
        assert_eq!(rec.side, 1);
        assert_eq!(rec.price, 50_000.0);
    }
}
