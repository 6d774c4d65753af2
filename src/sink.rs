// Append-only CSV persistence. The header goes in only when the file is new or empty.
//
// Single writer assumed: two processes appending to the same file can race on
// the emptiness check and duplicate or lose the header.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::PersistenceError;
use crate::models::domain::HostCounts;
use crate::models::dto::FinalMetrics;

pub const METRICS_HEADER: [&str; 5] = [
    "total_packets",
    "total_bytes",
    "duration_s",
    "throughput_bps",
    "average_delay_s",
];

pub const HOST_COUNTS_HEADER: [&str; 3] = ["Host", "Packet Count", "Byte Count"];

/// A row type with a fixed column layout.
pub trait CsvRow {
    fn header() -> &'static [&'static str];
    fn fields(&self) -> Vec<String>;
}

impl CsvRow for FinalMetrics {
    fn header() -> &'static [&'static str] {
        &METRICS_HEADER
    }

    // Floats are written at full precision; rounding is for display only.
    fn fields(&self) -> Vec<String> {
        vec![
            self.total_packets.to_string(),
            self.total_bytes.to_string(),
            self.duration_seconds.to_string(),
            self.throughput_bps.to_string(),
            self.average_delay_seconds.to_string(),
        ]
    }
}

impl CsvRow for HostCounts {
    fn header() -> &'static [&'static str] {
        &HOST_COUNTS_HEADER
    }

    fn fields(&self) -> Vec<String> {
        vec![
            escape(&self.host),
            self.packet_count.to_string(),
            self.byte_count.to_string(),
        ]
    }
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Appends rows of one schema to a CSV file.
#[derive(Debug, Clone)]
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvSink { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append<R: CsvRow>(&self, row: &R) -> Result<(), PersistenceError> {
        self.append_all(std::slice::from_ref(row))
    }

    /// Appends all rows in one open/flush.
    pub fn append_all<R: CsvRow>(&self, rows: &[R]) -> Result<(), PersistenceError> {
        let file = self.open()?;
        let needs_header = file
            .metadata()
            .map(|m| m.len() == 0)
            .map_err(|source| self.open_error(source))?;

        let mut out = BufWriter::new(file);
        let write_err = |source| PersistenceError::Write {
            path: self.path.clone(),
            source,
        };

        if needs_header {
            writeln!(out, "{}", R::header().join(",")).map_err(write_err)?;
        }
        for row in rows {
            writeln!(out, "{}", row.fields().join(",")).map_err(write_err)?;
        }
        out.flush().map_err(write_err)?;

        tracing::debug!(path = %self.path.display(), rows = rows.len(), header = needs_header, "rows appended");
        Ok(())
    }

    fn open(&self) -> Result<File, PersistenceError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.open_error(source))
    }

    fn open_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Open {
            path: self.path.clone(),
            source,
        }
    }
}
