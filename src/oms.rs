//! Order management: turn an intended order set into the minimal sequence
//! of venue actions against live state.
//!
//! Intended orders carry a `clientOrderId` whose trailing two characters
//! encode the ladder level; the prefix identifies the slot. A live order
//! matches an intended one iff they share the level prefix and the side.
//! Each resulting action runs as its own task: one failed call never
//! aborts the batch.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::CoreError;
use crate::http::RestApi;
use crate::state::{Order, StateHandle};
use crate::types::OrderType;

#[derive(Debug, Clone)]
pub struct OmsConfig {
    /// Ladder capacity; more live orders than this triggers the dedupe pass.
    pub total_orders: usize,
    /// Out-of-bounds sensitivity relative to the old order's distance to mid.
    pub sensitivity: f64,
}

impl Default for OmsConfig {
    fn default() -> Self {
        Self {
            total_orders: 10,
            sensitivity: 0.10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OmsAction {
    Create(Order),
    Cancel(Order),
    CancelAll,
}

/// Fresh opaque slot prefix for a strategy instance. Level digits are
/// appended per rung, so ids stay unique across restarts.
pub fn ladder_prefix() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

/// Compose a ladder client order id: slot prefix plus two-digit level.
pub fn ladder_client_id(prefix: &str, level: usize) -> String {
    format!("{prefix}{:02}", level % 100)
}

/// The slot identity: everything except the trailing two level digits.
pub fn level_prefix(client_order_id: &str) -> &str {
    let cut = client_order_id.len().saturating_sub(2);
    &client_order_id[..cut]
}

/// `true` when the intended price left the acceptance band around the live
/// order, scaled by that order's distance from mid.
pub fn is_out_of_bounds(old_price: f64, new_price: f64, mid: f64, sensitivity: f64) -> bool {
    let buffer = (old_price - mid).abs() * sensitivity;
    (new_price - old_price).abs() > buffer
}

fn validate(order: &Order) -> Result<(), CoreError> {
    if order.order_type != OrderType::Market && order.price.is_none() {
        return Err(CoreError::Validation(format!(
            "{:?} order without price (clientOrderId={:?})",
            order.order_type, order.client_order_id
        )));
    }
    if order.size <= 0.0 {
        return Err(CoreError::Validation(format!(
            "non-positive size {} (clientOrderId={:?})",
            order.size, order.client_order_id
        )));
    }
    Ok(())
}

fn find_matched<'a>(live: &'a [Order], intended: &Order) -> Option<&'a Order> {
    let prefix = intended.client_order_id.as_deref().map(level_prefix)?;
    live.iter().find(|candidate| {
        candidate.side == intended.side
            && candidate
                .client_order_id
                .as_deref()
                .map(level_prefix)
                .is_some_and(|p| p == prefix)
    })
}

/// Single sweep over one intended set. Pure so the action sequence is
/// directly testable; malformed intents are reported and skipped, never
/// sent.
pub fn plan(
    intended: &[Order],
    live: &[Order],
    mid: f64,
    cfg: &OmsConfig,
    first_call: bool,
) -> Vec<OmsAction> {
    let mut actions = Vec::new();

    let valid: Vec<&Order> = intended
        .iter()
        .filter(|order| match validate(order) {
            Ok(()) => true,
            Err(e) => {
                warn!("skipping intended order: {e}");
                false
            }
        })
        .collect();

    if first_call {
        actions.extend(valid.into_iter().cloned().map(OmsAction::Create));
        return actions;
    }

    // Network delay can double up a slot; keep the first order seen per
    // (side, prefix) and cancel the rest.
    if live.len() > cfg.total_orders {
        let mut seen: HashSet<(i64, String)> = HashSet::new();
        for order in live {
            let Some(prefix) = order.client_order_id.as_deref().map(level_prefix) else {
                continue;
            };
            if !seen.insert((order.side.as_num(), prefix.to_string())) {
                debug!(client_order_id = ?order.client_order_id, "cancelling duplicate order");
                actions.push(OmsAction::Cancel(order.clone()));
            }
        }
    }

    for order in valid {
        match order.order_type {
            OrderType::Market => actions.push(OmsAction::Create(order.clone())),
            _ => match find_matched(live, order) {
                Some(old)
                    if old.price.is_some_and(|old_price| {
                        order.price.is_some_and(|new_price| {
                            is_out_of_bounds(old_price, new_price, mid, cfg.sensitivity)
                        })
                    }) =>
                {
                    actions.push(OmsAction::Cancel(old.clone()));
                    actions.push(OmsAction::Create(order.clone()));
                }
                // In bounds or unmatched: send the create and let the venue
                // replace at the same clientOrderId.
                _ => actions.push(OmsAction::Create(order.clone())),
            },
        }
    }

    actions
}

pub struct Oms {
    api: Arc<RestApi>,
    state: StateHandle,
    cfg: OmsConfig,
    prev_intended: Vec<Order>,
}

impl Oms {
    pub fn new(api: Arc<RestApi>, state: StateHandle, cfg: OmsConfig) -> Self {
        Self {
            api,
            state,
            cfg,
            prev_intended: Vec::new(),
        }
    }

    /// Diff one intended set against live state and fire the actions.
    pub async fn update(&mut self, intended: Vec<Order>) {
        let live = self.state.open_orders().await;
        let mid = self.state.mid().await;
        let first_call = self.prev_intended.is_empty();

        let actions = plan(&intended, &live, mid, &self.cfg, first_call);
        self.prev_intended = intended;
        self.execute(actions);
    }

    /// Blunt variant: cancel everything, then create the whole set.
    pub async fn update_simple(&mut self, intended: Vec<Order>) {
        let mut actions = vec![OmsAction::CancelAll];
        actions.extend(
            intended
                .iter()
                .filter(|order| match validate(order) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("skipping intended order: {e}");
                        false
                    }
                })
                .cloned()
                .map(OmsAction::Create),
        );
        self.prev_intended = intended;
        self.execute(actions);
    }

    pub fn cancel_all(&self) {
        self.execute(vec![OmsAction::CancelAll]);
    }

    fn execute(&self, actions: Vec<OmsAction>) {
        for action in actions {
            let api = self.api.clone();
            tokio::spawn(async move {
                let result = match &action {
                    OmsAction::Create(order) => api.create_order(order).await,
                    OmsAction::Cancel(order) => api.cancel_order(order).await,
                    OmsAction::CancelAll => api.cancel_all_orders().await,
                };
                if let Err(e) = result {
                    warn!("order action failed: {e}");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Side, TimeInForce};

    fn limit(side: Side, price: f64, client_id: &str) -> Order {
        Order {
            symbol: "BTCUSDT".to_string(),
            side,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::PostOnly,
            size: 0.01,
            price: Some(price),
            order_id: None,
            client_order_id: Some(client_id.to_string()),
        }
    }

    fn live(side: Side, price: f64, client_id: &str, order_id: &str) -> Order {
        let mut order = limit(side, price, client_id);
        order.order_id = Some(order_id.to_string());
        order
    }

    fn market(side: Side, client_id: &str) -> Order {
        Order {
            symbol: "BTCUSDT".to_string(),
            side,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Gtc,
            size: 0.01,
            price: None,
            order_id: None,
            client_order_id: Some(client_id.to_string()),
        }
    }

    fn creates(actions: &[OmsAction]) -> usize {
        actions
            .iter()
            .filter(|a| matches!(a, OmsAction::Create(_)))
            .count()
    }

    fn cancels(actions: &[OmsAction]) -> usize {
        actions
            .iter()
            .filter(|a| matches!(a, OmsAction::Cancel(_)))
            .count()
    }

    #[test]
    fn test_ladder_client_id_round_trip() {
        let id = ladder_client_id("mmA", 7);
        assert_eq!(id, "mmA07");
        assert_eq!(level_prefix(&id), "mmA");
    }

    #[test]
    fn test_ladder_prefix_is_fresh() {
        let a = ladder_prefix();
        let b = ladder_prefix();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
        assert_eq!(level_prefix(&ladder_client_id(&a, 3)), a);
    }

    #[test]
    fn test_first_call_creates_everything() {
        let intended = vec![
            limit(Side::Buy, 99.0, "bid01"),
            limit(Side::Buy, 98.0, "bid02"),
        ];
        let actions = plan(&intended, &[], 100.0, &OmsConfig::default(), true);
        assert_eq!(actions.len(), 2);
        assert_eq!(creates(&actions), 2);
        assert_eq!(cancels(&actions), 0);
    }

    #[test]
    fn test_in_bounds_limit_yields_single_create() {
        // Live at 95 with mid 100: distance 5, buffer 0.5. New at 95.2 is
        // inside the band.
        let live_orders = vec![live(Side::Buy, 95.0, "bid01", "a")];
        let intended = vec![limit(Side::Buy, 95.2, "bid01")];
        let actions = plan(&intended, &live_orders, 100.0, &OmsConfig::default(), false);
        assert_eq!(actions, vec![OmsAction::Create(intended[0].clone())]);
    }

    #[test]
    fn test_out_of_bounds_cancels_then_creates() {
        // Live at mid: distance 0, so any move is out of bounds.
        let live_orders = vec![live(Side::Buy, 100.0, "bid01", "a")];
        let intended = vec![limit(Side::Buy, 100.01, "bid01")];
        let actions = plan(&intended, &live_orders, 100.0, &OmsConfig::default(), false);
        assert_eq!(
            actions,
            vec![
                OmsAction::Cancel(live_orders[0].clone()),
                OmsAction::Create(intended[0].clone()),
            ]
        );
    }

    #[test]
    fn test_match_requires_same_side() {
        let live_orders = vec![live(Side::Sell, 100.0, "bid01", "a")];
        let intended = vec![limit(Side::Buy, 100.01, "bid01")];
        let actions = plan(&intended, &live_orders, 100.0, &OmsConfig::default(), false);
        // No (side, prefix) match: plain create, no cancel.
        assert_eq!(cancels(&actions), 0);
        assert_eq!(creates(&actions), 1);
    }

    #[test]
    fn test_market_orders_always_create() {
        let live_orders = vec![live(Side::Buy, 100.0, "bid01", "a")];
        let intended = vec![market(Side::Buy, "bid01")];
        let actions = plan(&intended, &live_orders, 100.0, &OmsConfig::default(), false);
        assert_eq!(actions, vec![OmsAction::Create(intended[0].clone())]);
    }

    #[test]
    fn test_dedupe_cancels_duplicates_keeping_first() {
        let cfg = OmsConfig {
            total_orders: 2,
            sensitivity: 0.10,
        };
        let live_orders = vec![
            live(Side::Buy, 99.0, "bid01", "a"),
            live(Side::Buy, 99.1, "bid01", "b"),
            live(Side::Sell, 101.0, "ask01", "c"),
        ];
        let actions = plan(&[], &live_orders, 100.0, &cfg, false);
        assert_eq!(
            actions,
            vec![OmsAction::Cancel(live_orders[1].clone())]
        );
    }

    #[test]
    fn test_dedupe_skipped_within_capacity() {
        let cfg = OmsConfig {
            total_orders: 4,
            sensitivity: 0.10,
        };
        let live_orders = vec![
            live(Side::Buy, 99.0, "bid01", "a"),
            live(Side::Buy, 99.1, "bid01", "b"),
        ];
        let actions = plan(&[], &live_orders, 100.0, &cfg, false);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_limit_without_price_never_sent() {
        let mut bad = limit(Side::Buy, 0.0, "bid01");
        bad.price = None;
        let actions = plan(&[bad], &[], 100.0, &OmsConfig::default(), true);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_out_of_bounds_band() {
        // Distance 5, sensitivity 0.1 → buffer 0.5.
        assert!(!is_out_of_bounds(95.0, 95.5, 100.0, 0.1));
        assert!(is_out_of_bounds(95.0, 95.51, 100.0, 0.1));
        assert!(is_out_of_bounds(95.0, 94.49, 100.0, 0.1));
        assert!(!is_out_of_bounds(95.0, 94.5, 100.0, 0.1));
    }
}
