pub mod domain {
    /// One successfully parsed packet.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct PacketRecord {
        /// Capture timestamp in seconds since the epoch.
        pub timestamp: f64,
        /// Original (on-the-wire) length of the packet.
        pub length_bytes: u64,
    }

    impl PacketRecord {
        pub fn new(timestamp: f64, length_bytes: u64) -> Self {
            PacketRecord { timestamp, length_bytes }
        }
    }

    /// Raw packet and byte counts for one named host.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct HostCounts {
        pub host: String,
        pub packet_count: u64,
        pub byte_count: u64,
    }
}

pub mod dto {
    use serde::Serialize;

    /// Derived metrics for one capture run. This is what gets persisted.
    #[derive(Debug, Serialize, Clone, PartialEq)]
    pub struct FinalMetrics {
        pub total_packets: u64,
        pub total_bytes: u64,
        pub duration_seconds: f64,
        pub throughput_bps: f64,
        pub average_delay_seconds: f64,
        /// Population standard deviation of the inter-arrival delays.
        pub delay_jitter_seconds: f64,
        pub min_delay_seconds: Option<f64>,
        pub max_delay_seconds: Option<f64>,
        /// Number of inter-arrival delays folded into the average.
        pub delay_samples: u64,
        pub first_seen: Option<f64>,
        pub last_seen: Option<f64>,
        /// Records that arrived with a timestamp earlier than their predecessor.
        pub out_of_order: u64,
    }

    fn rfc3339(ts: f64) -> Option<String> {
        let secs = ts.floor();
        let nanos = ((ts - secs) * 1e9) as u32;
        chrono::DateTime::<chrono::Utc>::from_timestamp(secs as i64, nanos.min(999_999_999))
            .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
    }

    impl std::fmt::Display for FinalMetrics {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            writeln!(f, "==== Network Metrics ====")?;
            writeln!(f, "Total Packets Captured: {}", self.total_packets)?;
            writeln!(f, "Total Data Transferred: {} bytes", self.total_bytes)?;
            writeln!(f, "Duration: {:.2} seconds", self.duration_seconds)?;
            writeln!(f, "Throughput: {:.2} bps", self.throughput_bps)?;
            writeln!(f, "Average Delay: {:.6} seconds", self.average_delay_seconds)?;
            if self.delay_samples > 1 {
                writeln!(f, "Delay Jitter: {:.6} seconds", self.delay_jitter_seconds)?;
            }
            if let (Some(first), Some(last)) = (
                self.first_seen.and_then(rfc3339),
                self.last_seen.and_then(rfc3339),
            ) {
                writeln!(f, "Window: {} .. {}", first, last)?;
            }
            if self.out_of_order > 0 {
                writeln!(f, "Out-of-order Packets: {}", self.out_of_order)?;
            }
            write!(f, "=========================")
        }
    }

}
