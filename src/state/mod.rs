//! The canonical live data model for one venue session.
//!
//! `LiveState` is owned by the session's single ingress task; everything
//! else reads through [`StateHandle`], which hands out copied snapshots so
//! strategy code never observes a half-applied update.

pub mod candles;
pub mod orderbook;
pub mod orders;
pub mod position;
pub mod ring;
pub mod ticker;
pub mod trades;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{RwLock, RwLockWriteGuard};

pub use candles::{Candle, CandleRecord, Candles};
pub use orderbook::{Level, Orderbook, OrderbookRecord};
pub use orders::{Order, OrderRecord, Orders};
pub use position::{Position, PositionRecord, PositionUpdate};
pub use ticker::{Ticker, TickerRecord, TickerUpdate};
pub use trades::{Trade, TradeRecord, Trades};

#[derive(Debug)]
pub struct LiveState {
    pub symbol: String,
    /// Learned at warmup from the venue's instrument info.
    pub tick_size: f64,
    pub lot_size: f64,
    pub orderbook: Orderbook,
    pub trades: Trades,
    pub candles: Candles,
    pub ticker: Ticker,
    pub position: Position,
    pub orders: Orders,
}

/// Composite recordable projection, suitable for a periodic JSON snapshot
/// sink.
#[derive(Debug, Clone, Serialize)]
pub struct StateRecord {
    pub symbol: String,
    pub orderbook: OrderbookRecord,
    pub orders: Vec<OrderRecord>,
    pub position: PositionRecord,
    pub ticker: TickerRecord,
    pub trades: Vec<TradeRecord>,
    pub ohlcv: Vec<CandleRecord>,
}

impl LiveState {
    pub fn new(symbol: impl Into<String>, depth: usize, trades_len: usize, candles_len: usize) -> Self {
        Self {
            symbol: symbol.into(),
            tick_size: 0.0,
            lot_size: 0.0,
            orderbook: Orderbook::new(depth),
            trades: Trades::new(trades_len),
            candles: Candles::new(candles_len),
            ticker: Ticker::default(),
            position: Position::default(),
            orders: Orders::new(),
        }
    }

    pub fn recordable(&self) -> StateRecord {
        StateRecord {
            symbol: self.symbol.clone(),
            orderbook: self.orderbook.recordable(),
            orders: self.orders.recordable(),
            position: self.position.recordable(),
            ticker: self.ticker.recordable(),
            trades: self.trades.recordable(),
            ohlcv: self.candles.recordable(),
        }
    }
}

/// Shared read view over a session's [`LiveState`].
///
/// Writes go exclusively through the ingress task, so readers only ever
/// take short read locks to copy out small structs (or clone the book).
#[derive(Debug, Clone)]
pub struct StateHandle {
    inner: Arc<RwLock<LiveState>>,
}

impl StateHandle {
    pub fn new(state: LiveState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, LiveState> {
        self.inner.write().await
    }

    pub async fn symbol(&self) -> String {
        self.inner.read().await.symbol.clone()
    }

    pub async fn ticker(&self) -> Ticker {
        self.inner.read().await.ticker
    }

    pub async fn position(&self) -> Position {
        self.inner.read().await.position.clone()
    }

    pub async fn orderbook(&self) -> Orderbook {
        self.inner.read().await.orderbook.clone()
    }

    pub async fn mid(&self) -> f64 {
        self.inner.read().await.orderbook.mid()
    }

    pub async fn open_orders(&self) -> Vec<Order> {
        self.inner.read().await.orders.to_vec()
    }

    pub async fn recent_trades(&self) -> Vec<Trade> {
        self.inner.read().await.trades.unwrap()
    }

    pub async fn candles(&self) -> Vec<Candle> {
        self.inner.read().await.candles.unwrap()
    }

    pub async fn tick_lot(&self) -> (f64, f64) {
        let state = self.inner.read().await;
        (state.tick_size, state.lot_size)
    }

    pub async fn recordable(&self) -> StateRecord {
        self.inner.read().await.recordable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    #[test]
    fn test_recordable_composes_all_components() {
        let mut state = LiveState::new("BTCUSDT", 5, 10, 10);
        state.orderbook.refresh(&[[101.0, 1.0]], &[[100.0, 2.0]], 7);
        state.trades.push(Trade {
            timestamp: 1.0,
            side: Side::Buy,
            price: 100.5,
            size: 0.1,
        });

        let rec = state.recordable();
        assert_eq!(rec.symbol, "BTCUSDT");
        assert_eq!(rec.orderbook.seq_id, 7);
        assert_eq!(rec.trades.len(), 1);
        assert!(rec.orders.is_empty());

        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["orderbook"]["seq_id"], 7);
        assert_eq!(json["trades"][0]["side"], 0);
    }

    #[tokio::test]
    async fn test_handle_snapshots_are_copies() {
        let handle = StateHandle::new(LiveState::new("ETHUSDT", 5, 10, 10));
        {
            let mut state = handle.write().await;
            state.orderbook.refresh(&[[2001.0, 1.0]], &[[2000.0, 1.0]], 1);
        }
        let book = handle.orderbook().await;
        {
            let mut state = handle.write().await;
            state.orderbook.update_bids(&[[1999.0, 3.0]], 2);
        }
        // The earlier snapshot is unaffected by later writes.
        assert_eq!(book.seq_id(), 1);
        assert_eq!(handle.orderbook().await.seq_id(), 2);
        assert!((handle.mid().await - 2000.5).abs() < 1e-9);
    }
}
