use std::path::PathBuf;

use thiserror::Error;

/// Failures of the capture source. Opening and filter errors abort the run
/// before anything is accumulated.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("cannot open capture source {source_name}: {error}")]
    Open {
        source_name: String,
        #[source]
        error: pcap::Error,
    },

    #[error("no default capture device available")]
    NoDevice,

    #[error("invalid capture filter {filter:?}: {error}")]
    Filter {
        filter: String,
        #[source]
        error: pcap::Error,
    },

    #[error("capture source {source_name} was not released cleanly: {error}")]
    Release {
        source_name: String,
        #[source]
        error: pcap::Error,
    },
}

/// Failures of the metrics sink. Reported to the operator, never fatal.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("cannot open metrics file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write metrics file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, CaptureError>;
