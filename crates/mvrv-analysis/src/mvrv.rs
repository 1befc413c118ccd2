//! MVRV: market value over realized value.
//!
//! Market cap is the day's closing price times the live circulating supply;
//! the ratio is taken against the realized cap of the same UTC day.

use chrono::{Days, NaiveDate};
use mvrv_data::types::{DailyRealizedCap, MvrvRecord, PricePoint};
use std::collections::BTreeMap;

/// Summary statistics over an MVRV series.
#[derive(Clone, Debug, PartialEq)]
pub struct MvrvStats {
    pub day_count: usize,
    pub min_ratio: f64,
    pub max_ratio: f64,
    pub mean_ratio: f64,
    /// Ratio of the most recent day.
    pub latest_ratio: f64,
    pub latest_date: NaiveDate,
    /// Days where market value sat below realized value.
    pub days_below_one: usize,
}

/// Last price of each UTC day.
pub fn daily_prices(prices: &[PricePoint]) -> BTreeMap<NaiveDate, f64> {
    let mut sorted = prices.to_vec();
    sorted.sort_by_key(|p| p.timestamp_ms);

    let mut by_day = BTreeMap::new();
    for point in sorted {
        if let Some(day) = point.day() {
            by_day.insert(day, point.price_usd);
        }
    }
    by_day
}

/// Unix-second window covering every realized-cap day: midnight of the first
/// day up to midnight after the last one. `None` for an empty input.
pub fn fetch_window(realized: &[DailyRealizedCap]) -> Option<(i64, i64)> {
    let first = realized.iter().map(|r| r.date).min()?;
    let last = realized.iter().map(|r| r.date).max()?;
    let end = last.checked_add_days(Days::new(1))?;

    let start_unix = first.and_hms_opt(0, 0, 0)?.and_utc().timestamp();
    let end_unix = end.and_hms_opt(0, 0, 0)?.and_utc().timestamp();
    Some((start_unix, end_unix))
}

/// Joins realized cap and daily prices on date and computes the ratio.
///
/// Days missing from either side are dropped, as are days whose realized cap
/// is not positive. Output is ascending by date.
pub fn compute_mvrv(
    realized: &[DailyRealizedCap],
    daily_prices: &BTreeMap<NaiveDate, f64>,
    circulating_supply: f64,
) -> Vec<MvrvRecord> {
    let mut rows: Vec<&DailyRealizedCap> = realized.iter().collect();
    rows.sort_by_key(|r| r.date);

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(&btc_price_usd) = daily_prices.get(&row.date) else {
            tracing::debug!(date = %row.date, "no price for realized-cap day");
            continue;
        };
        if row.realized_cap <= 0.0 {
            tracing::warn!(
                date = %row.date,
                realized_cap = row.realized_cap,
                "non-positive realized cap, ratio undefined"
            );
            continue;
        }

        let market_cap_usd = btc_price_usd * circulating_supply;
        records.push(MvrvRecord {
            date: row.date,
            realized_cap_usd: row.realized_cap,
            btc_price_usd,
            market_cap_usd,
            mvrv_ratio: market_cap_usd / row.realized_cap,
        });
    }
    records
}

/// `None` for an empty series.
pub fn compute_stats(records: &[MvrvRecord]) -> Option<MvrvStats> {
    let latest = records.iter().max_by_key(|r| r.date)?;
    let ratios = records.iter().map(|r| r.mvrv_ratio);

    Some(MvrvStats {
        day_count: records.len(),
        min_ratio: ratios.clone().fold(f64::INFINITY, f64::min),
        max_ratio: ratios.clone().fold(f64::NEG_INFINITY, f64::max),
        mean_ratio: ratios.sum::<f64>() / records.len() as f64,
        latest_ratio: latest.mvrv_ratio,
        latest_date: latest.date,
        days_below_one: records.iter().filter(|r| r.mvrv_ratio < 1.0).count(),
    })
}
