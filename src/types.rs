//! Canonical enums shared across every venue, plus the string ↔ numeric
//! converters used at the wire boundary.
//!
//! Venue-specific strings never reach the data model: handlers convert them
//! on ingress, and the REST payload formatters convert back on egress. The
//! numeric values are fixed and identical across venues.

use std::collections::HashMap;

/// Returned by converters for a numeric value with no known mapping.
pub const UNKNOWN_STR: &str = "UNKNOWN";
/// Returned by converters for a string with no known mapping.
pub const UNKNOWN_NUM: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Buy = 0,
    Sell = 1,
}

impl Side {
    pub fn as_num(self) -> i64 {
        self as i64
    }

    pub fn from_num(n: i64) -> Option<Self> {
        match n {
            0 => Some(Side::Buy),
            1 => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn flip(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderType {
    Limit = 0,
    Market = 1,
    StopLimit = 2,
    TakeProfitLimit = 3,
}

impl OrderType {
    pub fn as_num(self) -> i64 {
        self as i64
    }

    pub fn from_num(n: i64) -> Option<Self> {
        match n {
            0 => Some(OrderType::Limit),
            1 => Some(OrderType::Market),
            2 => Some(OrderType::StopLimit),
            3 => Some(OrderType::TakeProfitLimit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeInForce {
    Gtc = 0,
    Fok = 1,
    PostOnly = 2,
}

impl TimeInForce {
    pub fn as_num(self) -> i64 {
        self as i64
    }

    pub fn from_num(n: i64) -> Option<Self> {
        match n {
            0 => Some(TimeInForce::Gtc),
            1 => Some(TimeInForce::Fok),
            2 => Some(TimeInForce::PostOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionDirection {
    Long = 0,
    Short = 1,
}

impl PositionDirection {
    pub fn as_num(self) -> i64 {
        self as i64
    }

    pub fn from_num(n: i64) -> Option<Self> {
        match n {
            0 => Some(PositionDirection::Long),
            1 => Some(PositionDirection::Short),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Converters
// ─────────────────────────────────────────────────────────

/// Bidirectional map between venue strings and canonical numeric values.
///
/// Unknown inputs fall back to [`UNKNOWN_STR`] / [`UNKNOWN_NUM`] instead of
/// erroring; callers that need a hard failure check for those sentinels.
#[derive(Debug, Clone)]
pub struct StrNumConverter {
    str_to_num: HashMap<&'static str, i64>,
    num_to_str: HashMap<i64, &'static str>,
}

impl StrNumConverter {
    pub fn new(pairs: &[(&'static str, i64)]) -> Self {
        let str_to_num: HashMap<&'static str, i64> = pairs.iter().copied().collect();
        let num_to_str = str_to_num.iter().map(|(s, n)| (*n, *s)).collect();
        Self {
            str_to_num,
            num_to_str,
        }
    }

    pub fn to_str(&self, value: i64) -> &'static str {
        self.num_to_str.get(&value).copied().unwrap_or(UNKNOWN_STR)
    }

    pub fn to_num(&self, name: &str) -> i64 {
        self.str_to_num.get(name).copied().unwrap_or(UNKNOWN_NUM)
    }
}

#[derive(Debug, Clone)]
pub struct SideConverter(StrNumConverter);

impl SideConverter {
    pub fn new(buy: &'static str, sell: &'static str) -> Self {
        Self(StrNumConverter::new(&[
            (buy, Side::Buy.as_num()),
            (sell, Side::Sell.as_num()),
        ]))
    }

    pub fn to_str(&self, value: i64) -> &'static str {
        self.0.to_str(value)
    }

    pub fn to_num(&self, name: &str) -> i64 {
        self.0.to_num(name)
    }

    pub fn side(&self, name: &str) -> Option<Side> {
        Side::from_num(self.to_num(name))
    }

    pub fn wire(&self, side: Side) -> &'static str {
        self.to_str(side.as_num())
    }
}

#[derive(Debug, Clone)]
pub struct OrderTypeConverter(StrNumConverter);

impl OrderTypeConverter {
    /// Stop-limit and take-profit strings are optional since several venues
    /// collapse them into trigger shapes that never appear as plain strings.
    pub fn new(
        limit: &'static str,
        market: &'static str,
        stop_limit: Option<&'static str>,
        take_profit_limit: Option<&'static str>,
    ) -> Self {
        let mut pairs = vec![
            (limit, OrderType::Limit.as_num()),
            (market, OrderType::Market.as_num()),
        ];
        if let Some(s) = stop_limit {
            pairs.push((s, OrderType::StopLimit.as_num()));
        }
        if let Some(s) = take_profit_limit {
            pairs.push((s, OrderType::TakeProfitLimit.as_num()));
        }
        Self(StrNumConverter::new(&pairs))
    }

    pub fn to_str(&self, value: i64) -> &'static str {
        self.0.to_str(value)
    }

    pub fn to_num(&self, name: &str) -> i64 {
        self.0.to_num(name)
    }

    pub fn order_type(&self, name: &str) -> Option<OrderType> {
        OrderType::from_num(self.to_num(name))
    }

    pub fn wire(&self, order_type: OrderType) -> &'static str {
        self.to_str(order_type.as_num())
    }
}

#[derive(Debug, Clone)]
pub struct TimeInForceConverter(StrNumConverter);

impl TimeInForceConverter {
    pub fn new(gtc: &'static str, fok: &'static str, post_only: &'static str) -> Self {
        Self(StrNumConverter::new(&[
            (gtc, TimeInForce::Gtc.as_num()),
            (fok, TimeInForce::Fok.as_num()),
            (post_only, TimeInForce::PostOnly.as_num()),
        ]))
    }

    pub fn to_str(&self, value: i64) -> &'static str {
        self.0.to_str(value)
    }

    pub fn to_num(&self, name: &str) -> i64 {
        self.0.to_num(name)
    }

    pub fn time_in_force(&self, name: &str) -> Option<TimeInForce> {
        TimeInForce::from_num(self.to_num(name))
    }

    pub fn wire(&self, tif: TimeInForce) -> &'static str {
        self.to_str(tif.as_num())
    }
}

#[derive(Debug, Clone)]
pub struct PositionDirectionConverter(StrNumConverter);

impl PositionDirectionConverter {
    pub fn new(long: &'static str, short: &'static str) -> Self {
        Self(StrNumConverter::new(&[
            (long, PositionDirection::Long.as_num()),
            (short, PositionDirection::Short.as_num()),
        ]))
    }

    pub fn to_str(&self, value: i64) -> &'static str {
        self.0.to_str(value)
    }

    pub fn to_num(&self, name: &str) -> i64 {
        self.0.to_num(name)
    }

    pub fn direction(&self, name: &str) -> Option<PositionDirection> {
        PositionDirection::from_num(self.to_num(name))
    }
}
