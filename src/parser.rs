// Turns opaque packet handles into PacketRecords.
// Handles missing a timestamp or a length are dropped and counted, never surfaced.

use crate::models::domain::PacketRecord;
use crate::sniff::CaptureSource;

/// Field access on a captured packet. Either field may be absent or unparsable.
pub trait PacketHandle {
    fn timestamp(&self) -> Option<f64>;
    fn length(&self) -> Option<u64>;
}

pub fn parse_handle<H: PacketHandle>(handle: &H) -> Option<PacketRecord> {
    let timestamp = handle.timestamp().filter(|ts| ts.is_finite())?;
    let length = handle.length()?;
    Some(PacketRecord::new(timestamp, length))
}

/// Lazy, order-preserving view of a capture source as PacketRecords.
pub struct Ingestor<'a, S: CaptureSource> {
    source: &'a mut S,
    skipped: u64,
}

impl<'a, S: CaptureSource> Ingestor<'a, S> {
    pub fn new(source: &'a mut S) -> Self {
        Ingestor { source, skipped: 0 }
    }

    /// Number of malformed handles dropped so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl<S: CaptureSource> Iterator for Ingestor<'_, S> {
    type Item = PacketRecord;

    fn next(&mut self) -> Option<PacketRecord> {
        loop {
            let handle = self.source.next_handle()?;
            match parse_handle(&handle) {
                Some(record) => return Some(record),
                None => {
                    self.skipped += 1;
                    tracing::debug!(
                        source = self.source.name(),
                        skipped = self.skipped,
                        "skipping malformed packet handle"
                    );
                }
            }
        }
    }
}
