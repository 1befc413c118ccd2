//! Realized cap from sampled UTXOs and a price history.
//!
//! Each UTXO is valued at the last known price at or before its block time
//! (a backward as-of join), then values are summed per UTC day of the block.

use chrono::NaiveDate;
use mvrv_data::types::{DailyRealizedCap, PricePoint, UtxoRecord};
use std::collections::BTreeMap;

const SECS_PER_DAY: i64 = 86_400;

/// Daily realized cap plus join bookkeeping.
#[derive(Clone, Debug, PartialEq)]
pub struct RealizedCapReport {
    /// One row per day with at least one valued UTXO, ascending by date.
    pub days: Vec<DailyRealizedCap>,
    /// UTXOs that found a prior price.
    pub priced: usize,
    /// UTXOs older than the first price sample (not valued).
    pub unpriced: usize,
}

impl RealizedCapReport {
    pub fn total_usd(&self) -> f64 {
        self.days.iter().map(|d| d.realized_cap).sum()
    }
}

/// Price of the latest sample at or before `timestamp_ms`.
///
/// `prices` must be sorted by timestamp.
pub fn price_at_or_before(prices: &[PricePoint], timestamp_ms: i64) -> Option<f64> {
    let idx = prices.partition_point(|p| p.timestamp_ms <= timestamp_ms);
    idx.checked_sub(1).map(|i| prices[i].price_usd)
}

/// Unix-second window to request prices for: one day before the oldest block
/// up to the newest block. `None` for an empty input.
pub fn price_window(utxos: &[UtxoRecord]) -> Option<(i64, i64)> {
    let min = utxos.iter().map(|u| u.block_time).min()?;
    let max = utxos.iter().map(|u| u.block_time).max()?;
    Some((min - SECS_PER_DAY, max))
}

/// Values every UTXO at its as-of price and sums per UTC day.
pub fn realized_cap_by_day(utxos: &[UtxoRecord], prices: &[PricePoint]) -> RealizedCapReport {
    let mut prices = prices.to_vec();
    prices.sort_by_key(|p| p.timestamp_ms);

    // Stable sort so same-second UTXOs keep file order; summation order is
    // then fixed for a given input.
    let mut ordered: Vec<&UtxoRecord> = utxos.iter().collect();
    ordered.sort_by_key(|u| u.block_time);

    let mut by_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    let mut priced = 0;
    let mut unpriced = 0;

    for utxo in ordered {
        let price = utxo
            .block_time
            .checked_mul(1000)
            .and_then(|ts_ms| price_at_or_before(&prices, ts_ms));
        match (utxo.day(), price) {
            (Some(day), Some(price)) => {
                *by_day.entry(day).or_insert(0.0) += utxo.amount_btc * price;
                priced += 1;
            }
            _ => unpriced += 1,
        }
    }

    if unpriced > 0 {
        tracing::warn!(unpriced, "UTXOs without a prior price were not valued");
    }

    RealizedCapReport {
        days: by_day
            .into_iter()
            .map(|(date, realized_cap)| DailyRealizedCap { date, realized_cap })
            .collect(),
        priced,
        unpriced,
    }
}
