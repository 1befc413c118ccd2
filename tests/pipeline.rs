//! Integration tests for the file handoff: UTXOs -> realized cap -> MVRV.

mod common;

use chrono::NaiveDate;
use common::*;
use mvrv_analysis::chart::{render_mvrv_chart, render_realized_cap_chart};
use mvrv_analysis::mvrv::{compute_mvrv, compute_stats, daily_prices, fetch_window};
use mvrv_analysis::realized::{price_window, realized_cap_by_day};
use mvrv_data::files::{load_mvrv, load_realized_caps, save_mvrv, save_realized_caps};

/// Test the whole chain over two days of hourly prices.
///
/// Day 1: 1.0 BTC at 01:30 (priced at the 01:00 sample, 91k) and
///        0.5 BTC at 10:00 (exactly on the 10:00 sample, 100k).
/// Day 2: 2.0 BTC at 00:15 (priced at the 00:00 sample, 114k).
///
/// Circulating supply 10 BTC; closing prices are the 23:00 samples.
#[test]
fn realized_cap_feeds_mvrv() {
    let prices = hourly_prices(
        MAY_1_2025,
        &(0..48).map(|h| 90_000.0 + h as f64 * 1_000.0).collect::<Vec<_>>(),
    );
    let utxos = vec![
        sample_utxo(MAY_1_2025 + 10 * 3_600, 0.5),
        sample_utxo(MAY_1_2025 + 5_400, 1.0),
        sample_utxo(MAY_1_2025 + SECS_PER_DAY + 900, 2.0),
    ];

    let (from, to) = price_window(&utxos).expect("utxos are not empty");
    assert_eq!(from, MAY_1_2025 + 5_400 - SECS_PER_DAY);
    assert_eq!(to, MAY_1_2025 + SECS_PER_DAY + 900);

    let report = realized_cap_by_day(&utxos, &prices);
    assert_eq!(report.unpriced, 0);
    assert_eq!(report.days.len(), 2);
    assert_eq!(report.days[0].realized_cap, 91_000.0 + 50_000.0);
    assert_eq!(report.days[1].realized_cap, 2.0 * 114_000.0);

    let dir = tempfile::tempdir().expect("tempdir should be created");
    let realized_path = dir.path().join("realized_cap.csv");
    save_realized_caps(&realized_path, &report.days).expect("save should succeed");
    let realized = load_realized_caps(&realized_path).expect("load should succeed");
    assert_eq!(realized, report.days);

    assert_eq!(
        fetch_window(&realized),
        Some((MAY_1_2025, MAY_1_2025 + 2 * SECS_PER_DAY))
    );

    let daily = daily_prices(&prices);
    assert_eq!(daily[&NaiveDate::from_ymd_opt(2025, 5, 1).unwrap()], 113_000.0);
    assert_eq!(daily[&NaiveDate::from_ymd_opt(2025, 5, 2).unwrap()], 137_000.0);

    let records = compute_mvrv(&realized, &daily, 10.0);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].market_cap_usd, 1_130_000.0);
    assert!((records[0].mvrv_ratio - 1_130_000.0 / 141_000.0).abs() < 1e-9);
    assert!((records[1].mvrv_ratio - 1_370_000.0 / 228_000.0).abs() < 1e-9);

    let mvrv_path = dir.path().join("mvrv.csv");
    save_mvrv(&mvrv_path, &records).expect("save should succeed");
    let reloaded = load_mvrv(&mvrv_path).expect("load should succeed");
    assert_eq!(reloaded.len(), 2);
    assert_eq!(reloaded[1].date, NaiveDate::from_ymd_opt(2025, 5, 2).unwrap());

    let stats = compute_stats(&reloaded).expect("series is not empty");
    assert_eq!(stats.days_below_one, 0);
    assert_eq!(stats.latest_date, NaiveDate::from_ymd_opt(2025, 5, 2).unwrap());

    render_realized_cap_chart(&realized, &dir.path().join("realized.svg"))
        .expect("realized chart should render");
    render_mvrv_chart(&reloaded, &dir.path().join("mvrv.svg")).expect("mvrv chart should render");
}

/// Test that a realized-cap file written by an older run, with a
/// `realized_cap_usd` column and timestamped dates, still joins.
#[test]
fn legacy_realized_cap_file_is_accepted() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = dir.path().join("realized_cap.csv");
    std::fs::write(
        &path,
        "date,realized_cap_usd\n2025-05-01 00:00:00,500000.0\n",
    )
    .expect("fixture should write");

    let realized = load_realized_caps(&path).expect("legacy file should parse");
    let prices = hourly_prices(MAY_1_2025, &[100_000.0, 100_000.0]);
    let records = compute_mvrv(&realized, &daily_prices(&prices), 5.0);

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].mvrv_ratio, 1.0);
}
