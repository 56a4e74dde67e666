//! Canonical order record and the live open-order map.

use std::collections::HashMap;

use serde::Serialize;

use crate::types::{OrderType, Side, TimeInForce};

/// An order as the venue reports it. Immutable once created: replacements
/// produce a new record, and equality is field-wise.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub size: f64,
    /// Absent for market orders.
    pub price: Option<f64>,
    /// Venue-assigned id; absent only on not-yet-acknowledged intents.
    pub order_id: Option<String>,
    pub client_order_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OrderRecord {
    pub symbol: String,
    pub side: i64,
    #[serde(rename = "orderType")]
    pub order_type: i64,
    #[serde(rename = "timeInForce")]
    pub time_in_force: i64,
    pub size: f64,
    pub price: Option<f64>,
    #[serde(rename = "orderId")]
    pub order_id: Option<String>,
    #[serde(rename = "clientOrderId")]
    pub client_order_id: Option<String>,
}

impl Order {
    pub fn recordable(&self) -> OrderRecord {
        OrderRecord {
            symbol: self.symbol.clone(),
            side: self.side.as_num(),
            order_type: self.order_type.as_num(),
            time_in_force: self.time_in_force.as_num(),
            size: self.size,
            price: self.price,
            order_id: self.order_id.clone(),
            client_order_id: self.client_order_id.clone(),
        }
    }
}

/// Live open orders keyed by venue order id. Populated on new / partially
/// filled, drained on terminal states.
#[derive(Debug, Clone, Default)]
pub struct Orders {
    inner: HashMap<String, Order>,
}

impl Orders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keyed by the order's venue id. Orders without one are not
    /// live on the venue yet and are ignored.
    pub fn insert(&mut self, order: Order) {
        if let Some(id) = order.order_id.clone() {
            self.inner.insert(id, order);
        }
    }

    pub fn remove(&mut self, order_id: &str) -> Option<Order> {
        self.inner.remove(order_id)
    }

    pub fn get(&self, order_id: &str) -> Option<&Order> {
        self.inner.get(order_id)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.inner.values()
    }

    pub fn to_vec(&self) -> Vec<Order> {
        self.inner.values().cloned().collect()
    }

    pub fn recordable(&self) -> Vec<OrderRecord> {
        self.inner.values().map(Order::recordable).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(id: &str, price: f64) -> Order {
        Order {
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::Gtc,
            size: 1.0,
            price: Some(price),
            order_id: Some(id.to_string()),
            client_order_id: Some(format!("mm{id}01")),
        }
    }

    #[test]
    fn test_unique_on_order_id() {
        let mut orders = Orders::new();
        orders.insert(limit("a", 100.0));
        orders.insert(limit("a", 101.0));
        assert_eq!(orders.len(), 1);
        assert_eq!(orders.get("a").and_then(|o| o.price), Some(101.0));
    }

    #[test]
    fn test_remove_on_terminal_state() {
        let mut orders = Orders::new();
        orders.insert(limit("a", 100.0));
        orders.insert(limit("b", 99.0));
        assert!(orders.remove("a").is_some());
        assert!(orders.remove("a").is_none());
        assert_eq!(orders.len(), 1);
    }

    #[test]
    fn test_without_venue_id_not_stored() {
        let mut orders = Orders::new();
        let mut o = limit("a", 100.0);
        o.order_id = None;
        orders.insert(o);
        assert!(orders.is_empty());
    }

    #[test]
    fn test_field_wise_equality() {
        let a = limit("a", 100.0);
        let mut b = a.clone();
        assert_eq!(a, b);
        b.size = 2.0;
        assert_ne!(a, b);
    }

    #[test]
    fn test_recordable_uses_canonical_numbers() {
        let rec = limit("a", 100.0).recordable();
        assert_eq!(rec.side, 0);
        assert_eq!(rec.order_type, 0);
        assert_eq!(rec.time_in_force, 0);
        assert_eq!(rec.price, Some(100.0));
    }
}
