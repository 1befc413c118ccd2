//! Shared test helpers and utilities.
//!
//! Provides an in-memory chain source and factory functions for UTXO and
//! price fixtures with sensible defaults.

#![allow(dead_code)]

use async_trait::async_trait;
use eyre::{eyre, Result};
use mvrv_data::node::{ChainSource, TxOutStatus, VerboseBlock, VerboseTx, VerboseTxOut};
use mvrv_data::types::{PricePoint, UtxoRecord};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// 2025-05-01T00:00:00Z.
pub const MAY_1_2025: i64 = 1_746_057_600;

pub const SECS_PER_DAY: i64 = 86_400;

/// Chain source backed by prebuilt blocks.
///
/// Heights listed in `broken` fail on `getblock`; outputs in `spent` report
/// no `gettxout` entry and outputs in `tx_out_errors` make `gettxout` fail.
/// The first `flaky_hash_calls` calls to `getblockhash` fail.
#[derive(Default)]
pub struct InMemoryChain {
    pub blocks: HashMap<u64, VerboseBlock>,
    pub spent: HashSet<(String, u32)>,
    pub broken: HashSet<u64>,
    pub tx_out_errors: HashSet<(String, u32)>,
    pub flaky_hash_calls: AtomicUsize,
    pub tx_out_calls: AtomicUsize,
}

impl InMemoryChain {
    /// Adds a block at `height` mined at `time` with the given output values,
    /// one transaction per entry of `txs`.
    pub fn with_block(mut self, height: u64, time: i64, txs: &[&[f64]]) -> Self {
        let tx = txs
            .iter()
            .enumerate()
            .map(|(i, values)| VerboseTx {
                txid: sample_txid(height, i as u64),
                vout: values
                    .iter()
                    .enumerate()
                    .map(|(n, value)| VerboseTxOut {
                        n: n as u32,
                        value: *value,
                    })
                    .collect(),
            })
            .collect();
        self.blocks.insert(height, VerboseBlock { time, tx });
        self
    }

    pub fn with_spent(mut self, txid: String, vout: u32) -> Self {
        self.spent.insert((txid, vout));
        self
    }

    pub fn with_broken(mut self, height: u64) -> Self {
        self.broken.insert(height);
        self
    }

    pub fn with_tx_out_error(mut self, txid: String, vout: u32) -> Self {
        self.tx_out_errors.insert((txid, vout));
        self
    }

    pub fn with_flaky_hash_calls(self, failures: usize) -> Self {
        self.flaky_hash_calls.store(failures, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl ChainSource for InMemoryChain {
    async fn block_hash(&self, height: u64) -> Result<String> {
        let failing = self
            .flaky_hash_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(eyre!("Could not connect to the server 127.0.0.1:8332"));
        }
        if self.blocks.contains_key(&height) || self.broken.contains(&height) {
            Ok(format!("{height:064x}"))
        } else {
            Err(eyre!("Block height out of range"))
        }
    }

    async fn block(&self, hash: &str) -> Result<VerboseBlock> {
        let height = u64::from_str_radix(hash, 16)?;
        if self.broken.contains(&height) {
            return Err(eyre!("Block not available (pruned data)"));
        }
        self.blocks
            .get(&height)
            .cloned()
            .ok_or_else(|| eyre!("Block not found"))
    }

    async fn tx_out(&self, txid: &str, vout: u32) -> Result<Option<TxOutStatus>> {
        self.tx_out_calls.fetch_add(1, Ordering::SeqCst);
        if self.tx_out_errors.contains(&(txid.to_string(), vout)) {
            return Err(eyre!("error code: -8 error message: Invalid parameter"));
        }
        if self.spent.contains(&(txid.to_string(), vout)) {
            return Ok(None);
        }
        Ok(Some(TxOutStatus {
            value: 0.0,
            confirmations: 6,
            coinbase: false,
        }))
    }
}

/// Deterministic 64-hex-char txid for a block/transaction pair.
pub fn sample_txid(height: u64, index: u64) -> String {
    format!("{:032x}{:032x}", height, index)
}

/// Creates a sample UtxoRecord with sensible defaults.
pub fn sample_utxo(block_time: i64, amount_btc: f64) -> UtxoRecord {
    UtxoRecord {
        block_height: 895_500,
        txid: sample_txid(895_500, 0),
        vout: 0,
        amount_btc,
        block_time,
    }
}

/// Hourly prices starting at `start_s`, one entry per price in `prices`.
pub fn hourly_prices(start_s: i64, prices: &[f64]) -> Vec<PricePoint> {
    prices
        .iter()
        .enumerate()
        .map(|(h, price)| PricePoint {
            timestamp_ms: (start_s + h as i64 * 3_600) * 1000,
            price_usd: *price,
        })
        .collect()
}
