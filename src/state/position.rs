//! The venue-reported position for the session's symbol.

use serde::Serialize;

use crate::types::PositionDirection;

/// Mutated only by the position handler; cleared on full close.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Position {
    pub symbol: Option<String>,
    pub direction: Option<PositionDirection>,
    pub entry_price: f64,
    pub size: f64,
    pub upnl: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PositionRecord {
    pub symbol: Option<String>,
    pub side: Option<i64>,
    pub price: f64,
    pub size: f64,
    #[serde(rename = "uPnl")]
    pub upnl: f64,
}

/// Partial update from a venue frame; `None` fields keep current values.
#[derive(Debug, Clone, Default)]
pub struct PositionUpdate {
    pub symbol: Option<String>,
    pub direction: Option<PositionDirection>,
    pub entry_price: Option<f64>,
    pub size: Option<f64>,
    pub upnl: Option<f64>,
}

impl Position {
    pub fn is_empty(&self) -> bool {
        self.size == 0.0
    }

    pub fn in_profit(&self) -> bool {
        self.upnl > 0.0
    }

    pub fn update(&mut self, update: PositionUpdate) {
        if let Some(symbol) = update.symbol {
            self.symbol = Some(symbol);
        }
        if let Some(direction) = update.direction {
            self.direction = Some(direction);
        }
        if let Some(price) = update.entry_price {
            self.entry_price = price;
        }
        if let Some(size) = update.size {
            self.size = size;
        }
        if let Some(upnl) = update.upnl {
            self.upnl = upnl;
        }
    }

    pub fn clear(&mut self) {
        *self = Position::default();
    }

    pub fn recordable(&self) -> PositionRecord {
        PositionRecord {
            symbol: self.symbol.clone(),
            side: self.direction.map(PositionDirection::as_num),
            price: self.entry_price,
            size: self.size,
            upnl: self.upnl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_iff_zero_size() {
        let mut pos = Position::default();
        assert!(pos.is_empty());
        pos.size = 0.5;
        assert!(!pos.is_empty());
        pos.size = 0.0;
        assert!(pos.is_empty());
    }

    #[test]
    fn test_in_profit_iff_positive_upnl() {
        let mut pos = Position {
            upnl: 12.5,
            ..Position::default()
        };
        assert!(pos.in_profit());
        pos.upnl = -0.01;
        assert!(!pos.in_profit());
        pos.upnl = 0.0;
        assert!(!pos.in_profit());
    }

    #[test]
    fn test_partial_update_keeps_other_fields() {
        let mut pos = Position {
            symbol: Some("ETH".to_string()),
            direction: Some(PositionDirection::Long),
            entry_price: 2000.0,
            size: 1.0,
            upnl: 5.0,
        };
        pos.update(PositionUpdate {
            upnl: Some(-3.0),
            ..PositionUpdate::default()
        });
        assert_eq!(pos.entry_price, 2000.0);
        assert_eq!(pos.upnl, -3.0);
        assert_eq!(pos.direction, Some(PositionDirection::Long));
    }

    #[test]
    fn test_clear() {
        let mut pos = Position {
            symbol: Some("ETH".to_string()),
            direction: Some(PositionDirection::Short),
            entry_price: 2000.0,
            size: 1.0,
            upnl: 5.0,
        };
        pos.clear();
        assert_eq!(pos, Position::default());
        assert!(pos.is_empty());
    }
}
