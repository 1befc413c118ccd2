//! # CoinGecko price client
//!
//! Fetches BTC/USD price history and the live circulating supply from the
//! public CoinGecko REST API.
//!
//! `market_chart/range` picks its own granularity from the window length:
//! 5-minute samples for windows up to one day, hourly up to 90 days, daily
//! beyond that. Callers that join against block times should ask for a window
//! starting a little before the first block so every block has a prior price.
//!
//! ## Rate Limits
//!
//! The keyless public tier allows a handful of calls per minute. A 429 is
//! answered by sleeping for `Retry-After` seconds and trying again, at most
//! [`MAX_RATE_LIMIT_RETRIES`] times.

use eyre::{eyre, Context, Result};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::types::PricePoint;

/// Public API base URL.
pub const COINGECKO_BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// Header carrying an optional demo-plan API key.
const API_KEY_HEADER: &str = "x-cg-demo-api-key";

pub const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// CoinGecko client for the `bitcoin` coin priced in USD.
#[derive(Clone, Debug)]
pub struct CoinGecko {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl CoinGecko {
    /// Builds a client with a 30 second request timeout.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(base_url: Option<&str>, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .wrap_err("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or(COINGECKO_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
        })
    }

    async fn get_text(&self, path_and_query: &str) -> Result<String> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let mut rate_limited = 0u32;

        loop {
            let mut request = self.client.get(&url);
            if let Some(key) = &self.api_key {
                request = request.header(API_KEY_HEADER, key);
            }

            debug!(url = %url, "CoinGecko request");
            let response = request
                .send()
                .await
                .wrap_err_with(|| format!("CoinGecko request to {url} failed"))?;

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS
                && rate_limited < MAX_RATE_LIMIT_RETRIES
            {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(60);
                rate_limited += 1;
                warn!(
                    retry_after_s = retry_after,
                    attempt = rate_limited,
                    "CoinGecko rate limit hit, waiting"
                );
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(eyre!(
                    "CoinGecko returned HTTP {}: {}",
                    status.as_u16(),
                    body
                ));
            }

            return response
                .text()
                .await
                .wrap_err("failed to read CoinGecko response body");
        }
    }

    /// BTC/USD prices between two unix-second timestamps, sorted by time.
    ///
    /// # Errors
    /// Returns error if the request fails or the body has no `prices` array.
    #[tracing::instrument(skip(self))]
    pub async fn market_chart_range(&self, from_unix: i64, to_unix: i64) -> Result<Vec<PricePoint>> {
        if to_unix < from_unix {
            return Err(eyre!(
                "to ({to_unix}) must be >= from ({from_unix})"
            ));
        }

        let body = self
            .get_text(&format!(
                "/coins/bitcoin/market_chart/range?vs_currency=usd&from={from_unix}&to={to_unix}"
            ))
            .await?;
        let prices = parse_market_chart(&body)?;

        info!(
            prices = prices.len(),
            from_unix, to_unix, "CoinGecko price fetch complete"
        );
        Ok(prices)
    }

    /// Live circulating BTC supply.
    ///
    /// # Errors
    /// Returns error if the request fails or the field is missing.
    #[tracing::instrument(skip(self))]
    pub async fn circulating_supply(&self) -> Result<f64> {
        let body = self
            .get_text("/coins/bitcoin?localization=false&tickers=false&market_data=true")
            .await?;
        let supply = parse_circulating_supply(&body)?;
        info!(supply, "circulating supply fetched");
        Ok(supply)
    }
}

/// Parses a `market_chart/range` body into time-sorted price points.
///
/// Rows are `[timestamp_ms, price]` pairs; malformed rows are skipped.
pub fn parse_market_chart(body: &str) -> Result<Vec<PricePoint>> {
    let value: serde_json::Value =
        serde_json::from_str(body).wrap_err("failed to parse CoinGecko market chart JSON")?;

    let rows = value
        .get("prices")
        .and_then(|v| v.as_array())
        .ok_or_else(|| eyre!("failed to fetch price data: response has no `prices` array"))?;

    let mut prices: Vec<PricePoint> = rows.iter().filter_map(parse_price_row).collect();
    if prices.len() < rows.len() {
        debug!(
            skipped = rows.len() - prices.len(),
            "skipped malformed price rows"
        );
    }
    prices.sort_by_key(|p| p.timestamp_ms);
    Ok(prices)
}

fn parse_price_row(row: &serde_json::Value) -> Option<PricePoint> {
    let row = row.as_array()?;
    if row.len() < 2 {
        return None;
    }
    let timestamp_ms = row[0].as_f64()? as i64;
    let price_usd = row[1].as_f64()?;
    if !price_usd.is_finite() || price_usd < 0.0 {
        return None;
    }
    Some(PricePoint {
        timestamp_ms,
        price_usd,
    })
}

/// Reads `market_data.circulating_supply` from a `/coins/bitcoin` body.
pub fn parse_circulating_supply(body: &str) -> Result<f64> {
    let value: serde_json::Value =
        serde_json::from_str(body).wrap_err("failed to parse CoinGecko coin JSON")?;

    let supply = value
        .pointer("/market_data/circulating_supply")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| eyre!("CoinGecko response has no market_data.circulating_supply"))?;

    if !supply.is_finite() || supply <= 0.0 {
        return Err(eyre!("implausible circulating supply {supply}"));
    }
    Ok(supply)
}
