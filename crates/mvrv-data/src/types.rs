//! Row types handed between the extraction, realized-cap and MVRV stages.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};

/// Unspent transaction output observed at a sampled block height.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UtxoRecord {
    /// Height of the block that created the output.
    pub block_height: u64,
    /// Transaction id (hex text, as printed by the node).
    pub txid: String,
    /// Output index within the transaction.
    pub vout: u32,
    /// Output value in BTC.
    pub amount_btc: f64,
    /// Block timestamp in unix seconds.
    pub block_time: i64,
}

impl UtxoRecord {
    /// UTC calendar day of the creating block.
    pub fn day(&self) -> Option<NaiveDate> {
        utc_day(self.block_time)
    }
}

/// BTC/USD price sample.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Sample time in unix milliseconds.
    pub timestamp_ms: i64,
    /// Price in USD.
    pub price_usd: f64,
}

impl PricePoint {
    /// UTC calendar day of the sample.
    pub fn day(&self) -> Option<NaiveDate> {
        DateTime::from_timestamp_millis(self.timestamp_ms).map(|dt| dt.date_naive())
    }
}

/// Realized cap of the sampled UTXOs created on one UTC day.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailyRealizedCap {
    #[serde(deserialize_with = "deserialize_day")]
    pub date: NaiveDate,
    /// Summed USD value. Older files name the column `realized_cap_usd`.
    #[serde(alias = "realized_cap_usd")]
    pub realized_cap: f64,
}

/// One day of the MVRV series.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MvrvRecord {
    #[serde(deserialize_with = "deserialize_day")]
    pub date: NaiveDate,
    pub realized_cap_usd: f64,
    pub btc_price_usd: f64,
    pub market_cap_usd: f64,
    pub mvrv_ratio: f64,
}

/// UTC calendar day of a unix-seconds timestamp.
pub fn utc_day(unix_secs: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(unix_secs, 0).map(|dt| dt.date_naive())
}

/// Parses `YYYY-MM-DD`, ignoring any time-of-day suffix
/// (`2025-05-01 00:00:00`, `2025-05-01T00:00:00Z`).
pub fn parse_day(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let day = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

fn deserialize_day<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_day(&raw).ok_or_else(|| {
        serde::de::Error::custom(format!("invalid date '{raw}', expected YYYY-MM-DD"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_day_accepts_time_suffix() {
        let expected = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
        assert_eq!(parse_day("2025-05-01"), Some(expected));
        assert_eq!(parse_day("2025-05-01 00:00:00"), Some(expected));
        assert_eq!(parse_day(" 2025-05-01T13:45:00Z "), Some(expected));
        assert_eq!(parse_day("05/01/2025"), None);
    }

    #[test]
    fn utc_day_ignores_local_time() {
        // 2025-05-01T23:59:59Z
        assert_eq!(
            utc_day(1_746_143_999),
            NaiveDate::from_ymd_opt(2025, 5, 1)
        );
        assert_eq!(
            utc_day(1_746_144_000),
            NaiveDate::from_ymd_opt(2025, 5, 2)
        );
    }

    #[test]
    fn price_point_day_uses_milliseconds() {
        let point = PricePoint {
            timestamp_ms: 1_746_144_000_000,
            price_usd: 96_000.0,
        };
        assert_eq!(point.day(), NaiveDate::from_ymd_opt(2025, 5, 2));
    }
}
