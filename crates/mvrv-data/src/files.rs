//! CSV handoff between the stages.
//!
//! Each stage reads the previous stage's CSV and writes its own. Column names
//! follow the row types in [`crate::types`].

use eyre::{eyre, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::types::{DailyRealizedCap, MvrvRecord, UtxoRecord};

/// Header of the extractor output.
pub const UTXO_HEADER: [&str; 5] = ["block_height", "txid", "vout", "amount_btc", "block_time"];

/// Appends UTXO rows to a CSV sink.
///
/// The header is written on construction so that a run which finds no
/// unspent outputs still produces a well-formed file.
pub struct UtxoCsvWriter<W: Write> {
    inner: csv::Writer<W>,
}

impl UtxoCsvWriter<File> {
    /// Creates (truncating) the output file at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .wrap_err_with(|| format!("failed to create {}", path.display()))?;
        Self::new(file)
    }
}

impl<W: Write> UtxoCsvWriter<W> {
    pub fn new(writer: W) -> Result<Self> {
        let mut inner = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        inner
            .write_record(UTXO_HEADER)
            .wrap_err("failed to write UTXO CSV header")?;
        Ok(Self { inner })
    }

    /// Writes one block's rows and flushes them through to the sink.
    pub fn write_block(&mut self, records: &[UtxoRecord]) -> Result<usize> {
        for record in records {
            self.inner
                .serialize(record)
                .wrap_err_with(|| format!("failed to write UTXO {}:{}", record.txid, record.vout))?;
        }
        self.inner.flush().wrap_err("failed to flush UTXO CSV")?;
        Ok(records.len())
    }

    /// Flushes and returns the underlying sink.
    pub fn into_inner(self) -> Result<W> {
        self.inner
            .into_inner()
            .map_err(|e| eyre!("failed to flush UTXO CSV: {}", e.error()))
    }
}

fn read_rows<T: DeserializeOwned, R: Read>(reader: R, what: &str) -> Result<Vec<T>> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut rows = Vec::new();
    for (index, row) in csv_reader.deserialize().enumerate() {
        // +2: one for the header, one for 1-based line numbers.
        let row: T = row.wrap_err_with(|| format!("malformed {what} row on line {}", index + 2))?;
        rows.push(row);
    }
    Ok(rows)
}

fn write_rows<T: Serialize, W: Write>(writer: W, rows: &[T], what: &str) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in rows {
        csv_writer
            .serialize(row)
            .wrap_err_with(|| format!("failed to write {what} row"))?;
    }
    csv_writer
        .flush()
        .wrap_err_with(|| format!("failed to flush {what} CSV"))
}

/// Reads extractor output, rejecting negative or non-finite amounts.
pub fn read_utxos<R: Read>(reader: R) -> Result<Vec<UtxoRecord>> {
    let rows: Vec<UtxoRecord> = read_rows(reader, "UTXO")?;
    for (index, row) in rows.iter().enumerate() {
        if !row.amount_btc.is_finite() || row.amount_btc < 0.0 {
            return Err(eyre!(
                "invalid amount_btc {} for {}:{} on line {}",
                row.amount_btc,
                row.txid,
                row.vout,
                index + 2
            ));
        }
    }
    Ok(rows)
}

pub fn read_realized_caps<R: Read>(reader: R) -> Result<Vec<DailyRealizedCap>> {
    read_rows(reader, "realized cap")
}

pub fn write_realized_caps<W: Write>(writer: W, rows: &[DailyRealizedCap]) -> Result<()> {
    write_rows(writer, rows, "realized cap")
}

pub fn read_mvrv<R: Read>(reader: R) -> Result<Vec<MvrvRecord>> {
    read_rows(reader, "MVRV")
}

pub fn write_mvrv<W: Write>(writer: W, rows: &[MvrvRecord]) -> Result<()> {
    write_rows(writer, rows, "MVRV")
}

fn open(path: &Path) -> Result<File> {
    File::open(path).wrap_err_with(|| format!("failed to open {}", path.display()))
}

fn create(path: &Path) -> Result<File> {
    File::create(path).wrap_err_with(|| format!("failed to create {}", path.display()))
}

pub fn load_utxos(path: &Path) -> Result<Vec<UtxoRecord>> {
    read_utxos(open(path)?).wrap_err_with(|| format!("failed to read {}", path.display()))
}

pub fn load_realized_caps(path: &Path) -> Result<Vec<DailyRealizedCap>> {
    read_realized_caps(open(path)?).wrap_err_with(|| format!("failed to read {}", path.display()))
}

pub fn save_realized_caps(path: &Path, rows: &[DailyRealizedCap]) -> Result<()> {
    write_realized_caps(create(path)?, rows)
        .wrap_err_with(|| format!("failed to write {}", path.display()))
}

pub fn load_mvrv(path: &Path) -> Result<Vec<MvrvRecord>> {
    read_mvrv(open(path)?).wrap_err_with(|| format!("failed to read {}", path.display()))
}

pub fn save_mvrv(path: &Path, rows: &[MvrvRecord]) -> Result<()> {
    write_mvrv(create(path)?, rows).wrap_err_with(|| format!("failed to write {}", path.display()))
}
