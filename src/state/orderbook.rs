//! Two-sided price-level book with sequence-gated snapshot/delta merging.
//!
//! Bids are held strictly descending and asks strictly ascending; a cached
//! best-bid/ask pair backs the analytics. Deltas older than the current
//! `seq_id` are dropped silently; the scheduled snapshot refresh corrects
//! any drift rather than buffering out-of-order frames.

use serde::Serialize;

use crate::types::Side;

/// One `[price, size]` row.
pub type Level = [f64; 2];

#[derive(Debug, Clone)]
pub struct Orderbook {
    depth: usize,
    bids: Vec<Level>,
    asks: Vec<Level>,
    /// `bba[0]` = best bid row, `bba[1]` = best ask row.
    bba: [Level; 2],
    seq_id: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OrderbookRecord {
    pub seq_id: u64,
    pub asks: Vec<Level>,
    pub bids: Vec<Level>,
}

impl Orderbook {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            bids: Vec::with_capacity(depth),
            asks: Vec::with_capacity(depth),
            bba: [[0.0; 2]; 2],
            seq_id: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn seq_id(&self) -> u64 {
        self.seq_id
    }

    pub fn bids(&self) -> &[Level] {
        &self.bids
    }

    pub fn asks(&self) -> &[Level] {
        &self.asks
    }

    pub fn best_bid(&self) -> Level {
        self.bba[0]
    }

    pub fn best_ask(&self) -> Level {
        self.bba[1]
    }

    pub fn is_populated(&self) -> bool {
        !self.bids.is_empty() && !self.asks.is_empty()
    }

    pub fn reset(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.bba = [[0.0; 2]; 2];
        self.seq_id = 0;
    }

    /// Replace the whole book from a snapshot, keeping at most `depth` rows
    /// per side.
    pub fn refresh(&mut self, asks: &[Level], bids: &[Level], new_seq_id: u64) {
        self.reset();
        self.seq_id = new_seq_id;
        self.asks.extend(asks.iter().copied().take(self.depth));
        self.bids.extend(bids.iter().copied().take(self.depth));
        self.sort_bids();
        self.sort_asks();
    }

    /// Apply a bid delta. Every existing row whose price appears in the
    /// update is removed regardless of size, then non-zero rows are added.
    pub fn update_bids(&mut self, bids: &[Level], new_seq_id: u64) {
        if bids.is_empty() || new_seq_id < self.seq_id {
            return;
        }
        self.seq_id = new_seq_id;
        self.bids
            .retain(|row| !bids.iter().any(|upd| upd[0] == row[0]));
        self.bids.extend(bids.iter().copied().filter(|upd| upd[1] != 0.0));
        self.sort_bids();
    }

    /// Ask-side twin of [`update_bids`](Self::update_bids).
    pub fn update_asks(&mut self, asks: &[Level], new_seq_id: u64) {
        if asks.is_empty() || new_seq_id < self.seq_id {
            return;
        }
        self.seq_id = new_seq_id;
        self.asks
            .retain(|row| !asks.iter().any(|upd| upd[0] == row[0]));
        self.asks.extend(asks.iter().copied().filter(|upd| upd[1] != 0.0));
        self.sort_asks();
    }

    pub fn update_full(&mut self, asks: &[Level], bids: &[Level], new_seq_id: u64) {
        self.update_asks(asks, new_seq_id);
        self.update_bids(bids, new_seq_id);
    }

    fn sort_bids(&mut self) {
        self.bids.sort_by(|a, b| b[0].total_cmp(&a[0]));
        self.bids.truncate(self.depth);
        self.bba[0] = self.bids.first().copied().unwrap_or([0.0; 2]);
    }

    fn sort_asks(&mut self) {
        self.asks.sort_by(|a, b| a[0].total_cmp(&b[0]));
        self.asks.truncate(self.depth);
        self.bba[1] = self.asks.first().copied().unwrap_or([0.0; 2]);
    }

    // ─────────────────────────────────────────────────
    // Analytics
    // ─────────────────────────────────────────────────

    pub fn mid(&self) -> f64 {
        (self.bba[0][0] + self.bba[1][0]) / 2.0
    }

    /// Mid weighted by the size imbalance at the top of the book.
    pub fn wmid(&self) -> f64 {
        let imb = self.bba[0][1] / (self.bba[0][1] + self.bba[1][1]);
        self.bba[0][0] * imb + self.bba[1][0] * (1.0 - imb)
    }

    pub fn spread(&self) -> f64 {
        self.bba[1][0] - self.bba[0][0]
    }

    /// Volume-weighted average market price across both sides up to `depth`
    /// (in size), taking a partial fill on the crossing level.
    pub fn vamp(&self, depth: f64) -> f64 {
        let (bid_sum, bid_cum) = Self::side_weighted_sum(&self.bids, depth);
        let (ask_sum, ask_cum) = Self::side_weighted_sum(&self.asks, depth);

        let total = bid_cum + ask_cum;
        if total == 0.0 {
            return 0.0;
        }
        (bid_sum + ask_sum) / total
    }

    fn side_weighted_sum(levels: &[Level], depth: f64) -> (f64, f64) {
        let mut weighted = 0.0;
        let mut cum = 0.0;
        for level in levels {
            let (price, size) = (level[0], level[1]);
            if cum + size > depth {
                let remaining = depth - cum;
                weighted += price * remaining;
                cum += remaining;
                break;
            }
            weighted += price * size;
            cum += size;
            if cum >= depth {
                break;
            }
        }
        (weighted, cum)
    }

    /// Volume-weighted average deviation from mid for a hypothetical order
    /// of `size`, walking the side that order would consume. Capped by mid.
    pub fn slippage(&self, side: Side, size: f64) -> f64 {
        let levels = match side {
            Side::Buy => &self.asks,
            Side::Sell => &self.bids,
        };
        let mid = self.mid();
        let mut cum = 0.0;
        let mut slippage = 0.0;

        for level in levels {
            cum += level[1];
            slippage += (mid - level[0]).abs() * level[1];
            if cum >= size {
                slippage /= cum;
                break;
            }
        }

        if slippage <= mid {
            slippage
        } else {
            mid
        }
    }

    pub fn recordable(&self) -> OrderbookRecord {
        OrderbookRecord {
            seq_id: self.seq_id,
            asks: self.asks.clone(),
            bids: self.bids.clone(),
        }
    }
}
