//! Parallel UTXO extraction over sampled block heights.
//!
//! One task per sampled height, at most `workers` of them talking to the node
//! at once. A task scans its block, then appends the block's unspent outputs
//! to the shared CSV writer while holding its lock, so rows from one block are
//! always contiguous. Blocks land in completion order.
//!
//! The CSV sink is a blocking `io::Write`; each block's rows are written and
//! flushed synchronously from inside its task.

use eyre::{eyre, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::files::UtxoCsvWriter;
use crate::node::ChainSource;
use crate::types::UtxoRecord;

const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Block range and worker pool settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractConfig {
    /// First sampled height (inclusive).
    pub start_block: u64,
    /// Last height considered (inclusive).
    pub end_block: u64,
    /// Sample every `step`-th block.
    pub step: u64,
    /// Maximum blocks scanned concurrently.
    pub workers: usize,
    /// Attempts per block before it is skipped.
    pub max_attempts: u32,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            start_block: 895_500,
            end_block: 895_795,
            step: 10,
            workers: 16,
            max_attempts: 1,
        }
    }
}

impl ExtractConfig {
    /// # Errors
    /// Returns error for an inverted range or a zero step, pool size or attempt count.
    pub fn validate(&self) -> Result<()> {
        if self.start_block > self.end_block {
            return Err(eyre!(
                "invalid range: start-block {} is greater than end-block {}",
                self.start_block,
                self.end_block
            ));
        }
        if self.step == 0 {
            return Err(eyre!("step must be at least 1"));
        }
        if self.workers == 0 {
            return Err(eyre!("workers must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(eyre!("attempts must be at least 1"));
        }
        Ok(())
    }

    /// Sampled heights: `start, start + step, ...` up to and including `end`.
    pub fn heights(&self) -> Vec<u64> {
        let step = self.step.max(1);
        let mut heights = Vec::new();
        let mut height = self.start_block;
        while height <= self.end_block {
            heights.push(height);
            match height.checked_add(step) {
                Some(next) => height = next,
                None => break,
            }
        }
        heights
    }
}

/// Outcome of one extraction run.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractSummary {
    pub blocks_sampled: usize,
    pub blocks_scanned: usize,
    pub blocks_skipped: usize,
    pub utxos_written: usize,
    pub elapsed: Duration,
}

/// Scans one block and returns its outputs that are still unspent.
///
/// Outputs are checked one `gettxout` at a time, in transaction order. An
/// output whose status call fails is left out; the block itself only fails
/// when its hash or body cannot be fetched.
///
/// # Errors
/// Returns error if the block hash or block body cannot be fetched, or if the
/// block carries a negative output value.
#[tracing::instrument(skip(source))]
pub async fn process_block<S>(source: &S, height: u64) -> Result<Vec<UtxoRecord>>
where
    S: ChainSource + ?Sized,
{
    debug!(height, "processing block");
    let hash = source
        .block_hash(height)
        .await
        .wrap_err_with(|| format!("no block hash for height {height}"))?;
    let block = source
        .block(&hash)
        .await
        .wrap_err_with(|| format!("could not fetch block {height} ({hash})"))?;

    let mut utxos = Vec::new();
    for tx in &block.tx {
        for output in &tx.vout {
            if !output.value.is_finite() || output.value < 0.0 {
                return Err(eyre!(
                    "block {height} output {}:{} has invalid value {}",
                    tx.txid,
                    output.n,
                    output.value
                ));
            }
            match source.tx_out(&tx.txid, output.n).await {
                Ok(Some(_)) => utxos.push(UtxoRecord {
                    block_height: height,
                    txid: tx.txid.clone(),
                    vout: output.n,
                    amount_btc: output.value,
                    block_time: block.time,
                }),
                Ok(None) => {}
                Err(e) => warn!(
                    height,
                    txid = %tx.txid,
                    vout = output.n,
                    error = %e,
                    "gettxout failed, output left out"
                ),
            }
        }
    }

    debug!(height, utxos = utxos.len(), "block processed");
    Ok(utxos)
}

/// Delay before retry number `attempt`: 500 ms doubling, capped at 32 s.
fn retry_backoff(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    Duration::from_millis(500 * 2_u64.pow(exponent))
}

async fn process_block_with_retries<S>(
    source: &S,
    height: u64,
    max_attempts: u32,
) -> Result<Vec<UtxoRecord>>
where
    S: ChainSource + ?Sized,
{
    let mut attempt = 1;
    loop {
        match process_block(source, height).await {
            Ok(utxos) => return Ok(utxos),
            Err(e) if attempt < max_attempts => {
                let backoff = retry_backoff(attempt);
                debug!(
                    height,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "retrying failed block scan"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

enum BlockOutcome {
    Scanned(usize),
    Skipped,
}

/// Scans one block and appends its rows under the writer lock.
async fn scan_and_write<S, W>(
    source: &S,
    height: u64,
    max_attempts: u32,
    writer: &Mutex<UtxoCsvWriter<W>>,
) -> Result<BlockOutcome>
where
    S: ChainSource + ?Sized,
    W: Write,
{
    let utxos = match process_block_with_retries(source, height, max_attempts).await {
        Ok(utxos) => utxos,
        Err(e) => {
            warn!(height, error = %format!("{e:#}"), "skipping block");
            return Ok(BlockOutcome::Skipped);
        }
    };

    if !utxos.is_empty() {
        let mut guard = writer
            .lock()
            .map_err(|_| eyre!("UTXO writer lock poisoned"))?;
        guard
            .write_block(&utxos)
            .wrap_err_with(|| format!("failed to write UTXOs of block {height}"))?;
    }

    Ok(BlockOutcome::Scanned(utxos.len()))
}

/// Scans every sampled height and streams unspent outputs into `writer`.
///
/// A block that cannot be scanned is logged and skipped; it never fails the
/// run. Write errors do.
///
/// Returns the summary together with the flushed sink.
///
/// # Errors
/// Returns error if the configuration is invalid or writing to the sink fails.
#[tracing::instrument(skip_all, fields(start = config.start_block, end = config.end_block, step = config.step))]
pub async fn extract_utxos<S, W>(
    source: Arc<S>,
    config: &ExtractConfig,
    writer: UtxoCsvWriter<W>,
) -> Result<(ExtractSummary, W)>
where
    S: ChainSource + ?Sized + 'static,
    W: Write + Send + 'static,
{
    config.validate()?;
    let started = Instant::now();
    let heights = config.heights();
    let blocks_sampled = heights.len();

    info!(
        workers = config.workers,
        blocks = blocks_sampled,
        "starting UTXO extraction"
    );

    let progress = ProgressBar::new(blocks_sampled as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} blocks ({msg} UTXOs)")
            .wrap_err("invalid progress bar template")?,
    );
    progress.set_message("0");

    let semaphore = Arc::new(Semaphore::new(config.workers));
    let writer = Arc::new(Mutex::new(writer));
    let written = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::with_capacity(blocks_sampled);
    for height in heights {
        let sem = semaphore.clone();
        let source = source.clone();
        let writer = writer.clone();
        let progress = progress.clone();
        let written = written.clone();
        let max_attempts = config.max_attempts;

        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire().await.wrap_err("worker pool closed")?;
            let outcome =
                scan_and_write(source.as_ref(), height, max_attempts, &writer).await?;
            progress.inc(1);
            if let BlockOutcome::Scanned(count) = outcome {
                let total = written.fetch_add(count, Ordering::Relaxed) + count;
                progress.set_message(total.to_string());
            }
            Ok::<_, eyre::Report>(outcome)
        }));
    }

    let mut blocks_scanned = 0;
    let mut blocks_skipped = 0;
    let mut utxos_written = 0;
    let mut first_error = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(BlockOutcome::Scanned(count))) => {
                blocks_scanned += 1;
                utxos_written += count;
            }
            Ok(Ok(BlockOutcome::Skipped)) => blocks_skipped += 1,
            Ok(Err(e)) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
            Err(e) => {
                error!("task join error: {}", e);
                blocks_skipped += 1;
            }
        }
    }

    progress.finish_with_message(utxos_written.to_string());

    if let Some(e) = first_error {
        return Err(e);
    }

    let writer = Arc::try_unwrap(writer)
        .map_err(|_| eyre!("UTXO writer still shared after all blocks finished"))?
        .into_inner()
        .map_err(|_| eyre!("UTXO writer lock poisoned"))?;
    let sink = writer.into_inner()?;

    let summary = ExtractSummary {
        blocks_sampled,
        blocks_scanned,
        blocks_skipped,
        utxos_written,
        elapsed: started.elapsed(),
    };

    info!(
        blocks_scanned,
        blocks_skipped,
        utxos_written,
        elapsed_s = summary.elapsed.as_secs_f64(),
        "UTXO extraction complete"
    );

    Ok((summary, sink))
}
