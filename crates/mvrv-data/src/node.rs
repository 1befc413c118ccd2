//! `bitcoin-cli` subprocess client.
//!
//! Every call spawns the node's command-line RPC tool, waits at most the
//! configured timeout and captures stdout. The block scanner only needs three
//! calls per block, exposed through [`ChainSource`] so the scanner can be
//! driven by something other than a live node.

use async_trait::async_trait;
use eyre::{eyre, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Program name looked up on `PATH` when no override is given.
pub const DEFAULT_PROGRAM: &str = "bitcoin-cli";

/// Per-call timeout for a single `bitcoin-cli` invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// `getblock <hash> 2` response, reduced to the fields the scanner reads.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct VerboseBlock {
    /// Block timestamp in unix seconds.
    pub time: i64,
    #[serde(default)]
    pub tx: Vec<VerboseTx>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct VerboseTx {
    pub txid: String,
    #[serde(default)]
    pub vout: Vec<VerboseTxOut>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct VerboseTxOut {
    /// Output index.
    pub n: u32,
    /// Output value in BTC.
    pub value: f64,
}

/// `gettxout` response for an output that is still unspent.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct TxOutStatus {
    pub value: f64,
    #[serde(default)]
    pub confirmations: u64,
    #[serde(default)]
    pub coinbase: bool,
}

/// Source of block and output data for the UTXO scanner.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Hash of the block at `height` on the active chain.
    async fn block_hash(&self, height: u64) -> Result<String>;

    /// Block with decoded transactions.
    async fn block(&self, hash: &str) -> Result<VerboseBlock>;

    /// Status of one output; `None` when it has been spent.
    async fn tx_out(&self, txid: &str, vout: u32) -> Result<Option<TxOutStatus>>;
}

/// Runs RPC calls through the node's `bitcoin-cli` binary.
#[derive(Clone, Debug)]
pub struct BitcoinCli {
    program: String,
    /// Options placed before every RPC method (`-testnet`, `-datadir=...`).
    extra_args: Vec<String>,
    timeout: Duration,
}

impl Default for BitcoinCli {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM, Vec::new(), DEFAULT_TIMEOUT)
    }
}

impl BitcoinCli {
    pub fn new(program: impl Into<String>, extra_args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            extra_args,
            timeout,
        }
    }

    fn command_line(&self, args: &[&str]) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.extra_args.iter().map(String::as_str))
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Runs one CLI call and returns its trimmed stdout.
    ///
    /// # Errors
    /// Returns error if the program cannot be spawned, exits non-zero, or does
    /// not finish within the timeout (the child is killed in that case).
    #[tracing::instrument(skip(self), fields(program = %self.program))]
    pub async fn run_raw(&self, args: &[&str]) -> Result<String> {
        let line = self.command_line(args);
        let child = Command::new(&self.program)
            .args(&self.extra_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .wrap_err_with(|| format!("failed to spawn `{}`", self.program))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.wrap_err_with(|| format!("failed to run `{line}`"))?,
            Err(_) => {
                return Err(eyre!(
                    "timed out after {}s: `{line}`",
                    self.timeout.as_secs_f64()
                ))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(eyre!(
                "`{line}` exited with {}: {}",
                output.status,
                stderr.trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Runs one CLI call and decodes its stdout as JSON.
    pub async fn run_json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T> {
        let output = self.run_raw(args).await?;
        serde_json::from_str(&output).wrap_err_with(|| {
            format!(
                "invalid JSON from `{}`: {output}",
                self.command_line(args)
            )
        })
    }

    /// Current chain height. Doubles as the "is bitcoind running" check.
    pub async fn block_count(&self) -> Result<u64> {
        let output = self.run_raw(&["getblockcount"]).await?;
        output
            .parse()
            .wrap_err_with(|| format!("unexpected getblockcount output: {output}"))
    }
}

#[async_trait]
impl ChainSource for BitcoinCli {
    async fn block_hash(&self, height: u64) -> Result<String> {
        let height = height.to_string();
        let hash = self.run_raw(&["getblockhash", &height]).await?;
        if hash.is_empty() {
            return Err(eyre!("getblockhash {height} returned no hash"));
        }
        Ok(hash)
    }

    async fn block(&self, hash: &str) -> Result<VerboseBlock> {
        self.run_json(&["getblock", hash, "2"]).await
    }

    async fn tx_out(&self, txid: &str, vout: u32) -> Result<Option<TxOutStatus>> {
        let vout = vout.to_string();
        let output = self.run_raw(&["gettxout", txid, &vout]).await?;
        // bitcoin-cli prints nothing for a spent (or unknown) output.
        if output.is_empty() {
            return Ok(None);
        }
        let status = serde_json::from_str(&output)
            .wrap_err_with(|| format!("invalid gettxout JSON for {txid}:{vout}: {output}"))?;
        Ok(Some(status))
    }
}
