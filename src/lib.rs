//! Traffic metrics from packet captures.
//!
//! A capture source yields packet handles; the ingestor turns them into
//! records, [`stats::TrafficStats`] folds them in one pass, and the finalized
//! [`FinalMetrics`] row is appended to a CSV file.

pub mod config;
pub mod error;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod sink;
pub mod sniff;
pub mod stats;

pub use error::{CaptureError, PersistenceError};
pub use models::domain::{HostCounts, PacketRecord};
pub use models::dto::FinalMetrics;
pub use pipeline::{run, run_capture, run_hosts, RunReport};
pub use sink::CsvSink;
pub use sniff::{stop_channel, CaptureSource, CaptureSpec, PcapSource, StopSignal};
pub use stats::{OrderingPolicy, TrafficStats};
