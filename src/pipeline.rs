// One capture run: source -> ingest -> fold -> finalize -> sink.

use std::fmt;

use crate::error::{CaptureError, PersistenceError};
use crate::models::domain::HostCounts;
use crate::models::dto::FinalMetrics;
use crate::parser::Ingestor;
use crate::sink::CsvSink;
use crate::sniff::{CaptureSource, CaptureSpec, CaptureStats, PcapSource, StopSignal};
use crate::stats::{OrderingPolicy, TrafficStats};

/// Outcome of a metrics run. A failed write leaves `persisted` as `Err`;
/// the metrics themselves are still available for display.
#[derive(Debug)]
pub struct RunReport {
    pub metrics: FinalMetrics,
    pub skipped_handles: u64,
    pub capture: Option<CaptureStats>,
    pub persisted: Result<(), PersistenceError>,
}

impl RunReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&serde_json::json!({
            "metrics": &self.metrics,
            "skipped_handles": self.skipped_handles,
            "capture": &self.capture,
            "persisted": self.persisted.is_ok(),
        }))
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.metrics)?;
        write!(f, "Skipped Handles: {}", self.skipped_handles)?;
        if let Some(capture) = &self.capture {
            if let Some(received) = capture.received {
                write!(f, "\nKernel Received: {}", received)?;
            }
            if let Some(dropped) = capture.dropped {
                write!(f, "\nKernel Dropped: {}", dropped)?;
            }
            if let Some(if_dropped) = capture.if_dropped {
                write!(f, "\nInterface Dropped: {}", if_dropped)?;
            }
        }
        Ok(())
    }
}

/// Drains a source into running totals and releases it.
pub fn accumulate<S: CaptureSource>(
    mut source: S,
    policy: OrderingPolicy,
) -> (TrafficStats, u64, Option<CaptureStats>) {
    let mut ingestor = Ingestor::new(&mut source);
    let stats = ingestor.by_ref().fold(TrafficStats::new(policy), TrafficStats::fold);
    let skipped = ingestor.skipped();

    let capture = match source.release() {
        Ok(capture) => Some(capture),
        Err(e) => {
            tracing::warn!(error = %e, "capture release failed");
            None
        }
    };
    (stats, skipped, capture)
}

pub fn run<S: CaptureSource>(source: S, policy: OrderingPolicy, sink: &CsvSink) -> RunReport {
    let name = source.name().to_string();
    let (stats, skipped_handles, capture) = accumulate(source, policy);
    let metrics = stats.finalize();

    tracing::info!(
        source = %name,
        packets = metrics.total_packets,
        bytes = metrics.total_bytes,
        skipped = skipped_handles,
        out_of_order = metrics.out_of_order,
        "capture run finished"
    );

    let persisted = persist(sink, &metrics);
    RunReport {
        metrics,
        skipped_handles,
        capture,
        persisted,
    }
}

/// Opens a pcap source and runs it. Failing to open the source aborts the run.
pub fn run_capture(
    spec: &CaptureSpec,
    stop: StopSignal,
    policy: OrderingPolicy,
    sink: &CsvSink,
) -> Result<RunReport, CaptureError> {
    let source = PcapSource::open(spec, stop)?;
    Ok(run(source, policy, sink))
}

fn persist(sink: &CsvSink, metrics: &FinalMetrics) -> Result<(), PersistenceError> {
    match sink.append(metrics) {
        Ok(()) => {
            tracing::info!(path = %sink.path().display(), "metrics saved");
            Ok(())
        }
        Err(e) => {
            tracing::warn!(error = %e, "metrics for this run were not saved");
            Err(e)
        }
    }
}

/// Raw counts for a single named source. Every parsed packet counts,
/// whatever its ordering.
pub fn count_host<S: CaptureSource>(host: &str, source: S) -> HostCounts {
    let (stats, skipped, _) = accumulate(source, OrderingPolicy::Accept);
    tracing::info!(host, packets = stats.packet_count, bytes = stats.byte_total, skipped, "host counted");
    HostCounts {
        host: host.to_string(),
        packet_count: stats.packet_count,
        byte_count: stats.byte_total,
    }
}

#[derive(Debug)]
pub struct HostsReport {
    pub rows: Vec<HostCounts>,
    pub persisted: Result<(), PersistenceError>,
}

/// Per-host counts mode: each `(host, spec)` is captured independently and
/// gets one row. Any source that cannot be opened aborts before anything is written.
pub fn run_hosts(hosts: &[(String, CaptureSpec)], sink: &CsvSink) -> Result<HostsReport, CaptureError> {
    let mut rows = Vec::with_capacity(hosts.len());
    for (host, spec) in hosts {
        let source = PcapSource::open(spec, StopSignal::never())?;
        rows.push(count_host(host, source));
    }

    let persisted = match sink.append_all(&rows) {
        Ok(()) => {
            tracing::info!(path = %sink.path().display(), hosts = rows.len(), "host counts saved");
            Ok(())
        }
        Err(e) => {
            tracing::warn!(error = %e, "host counts were not saved");
            Err(e)
        }
    };
    Ok(HostsReport { rows, persisted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::PacketHandle;
    use crate::sniff::{stop_channel, MemorySource};
    use tempfile::tempdir;

    #[derive(Debug, Clone, Copy)]
    struct Handle(Option<f64>, Option<u64>);

    impl PacketHandle for Handle {
        fn timestamp(&self) -> Option<f64> {
            self.0
        }
        fn length(&self) -> Option<u64> {
            self.1
        }
    }

    fn reference() -> Vec<Handle> {
        vec![
            Handle(Some(0.0), Some(100)),
            Handle(Some(1.0), Some(200)),
            Handle(Some(3.0), Some(150)),
            Handle(Some(3.5), Some(50)),
        ]
    }

    #[test]
    fn test_malformed_handle_changes_nothing() {
        let clean = accumulate(MemorySource::new("clean", reference()), OrderingPolicy::Clamp).0;

        for pos in 0..=4 {
            let mut handles = reference();
            handles.insert(pos, Handle(None, Some(9000)));
            let (stats, skipped, capture) =
                accumulate(MemorySource::new("dirty", handles), OrderingPolicy::Clamp);

            assert_eq!(skipped, 1);
            assert_eq!(capture.map(|c| c.delivered), Some(5));
            assert_eq!(stats.packet_count, clean.packet_count);
            assert_eq!(stats.byte_total, clean.byte_total);
            assert_eq!(stats.delays, clean.delays);
        }
    }

    #[test]
    fn test_run_persists_and_reports() {
        let dir = tempdir().unwrap();
        let sink = CsvSink::new(dir.path().join("network_metrics.csv"));

        let report = run(MemorySource::new("mem", reference()), OrderingPolicy::Clamp, &sink);
        assert!(report.persisted.is_ok());
        assert_eq!(report.metrics.total_packets, 4);
        assert_eq!(report.skipped_handles, 0);

        let report = run(MemorySource::new("mem", Vec::<Handle>::new()), OrderingPolicy::Clamp, &sink);
        assert_eq!(report.metrics.throughput_bps, 0.0);

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("4,500,3.5,"));
        assert_eq!(lines[2], "0,0,0,0,0");
    }

    #[test]
    fn test_persistence_failure_is_not_fatal() {
        let dir = tempdir().unwrap();
        let sink = CsvSink::new(dir.path().join("no-such-dir").join("m.csv"));

        let report = run(MemorySource::new("mem", reference()), OrderingPolicy::Clamp, &sink);
        assert!(report.persisted.is_err());
        assert_eq!(report.metrics.total_bytes, 500);
    }

    #[test]
    fn test_count_host_keeps_every_packet() {
        let handles = vec![
            Handle(Some(2.0), Some(98)),
            Handle(Some(1.0), Some(98)),
            Handle(None, Some(98)),
        ];
        let row = count_host("h1", MemorySource::new("h1", handles));
        assert_eq!(
            row,
            HostCounts { host: "h1".into(), packet_count: 2, byte_count: 196 }
        );
    }

    #[test]
    fn test_run_hosts_missing_file_aborts() {
        let dir = tempdir().unwrap();
        let sink = CsvSink::new(dir.path().join("hosts.csv"));
        let hosts = vec![("h1".to_string(), CaptureSpec::file(dir.path().join("absent.pcap")))];

        assert!(run_hosts(&hosts, &sink).is_err());
        assert!(!sink.path().exists());
    }

    #[test]
    fn test_stop_mid_stream_persists_ingested_records() {
        let dir = tempdir().unwrap();
        let sink = CsvSink::new(dir.path().join("network_metrics.csv"));
        let (stop, signal) = stop_channel();
        let mut source = MemorySource::new("mem", reference()).with_stop(signal);

        let mut ingestor = Ingestor::new(&mut source);
        let mut stats = TrafficStats::new(OrderingPolicy::Clamp);
        for record in ingestor.by_ref().take(2) {
            stats.update(&record);
        }
        stop.stop();
        for record in ingestor.by_ref() {
            stats.update(&record);
        }
        assert_eq!(source.release().unwrap().delivered, 2);

        let metrics = stats.finalize();
        assert_eq!(metrics.total_packets, 2);
        assert_eq!(metrics.total_bytes, 300);
        persist(&sink, &metrics).unwrap();

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "2,300,1,2400,1");
    }

    #[test]
    fn test_report_shows_skipped_and_kernel_counters() {
        let dir = tempdir().unwrap();
        let sink = CsvSink::new(dir.path().join("m.csv"));
        let mut handles = reference();
        handles.push(Handle(None, None));

        let mut report = run(MemorySource::new("mem", handles), OrderingPolicy::Clamp, &sink);
        let text = report.to_string();
        assert!(text.contains("Total Packets Captured: 4"));
        assert!(text.ends_with("Skipped Handles: 1"));
        assert!(!text.contains("Kernel"));

        report.capture = Some(CaptureStats {
            delivered: 5,
            received: Some(7),
            dropped: Some(2),
            if_dropped: Some(0),
        });
        let text = report.to_string();
        assert!(text.contains("Kernel Received: 7\nKernel Dropped: 2\nInterface Dropped: 0"));

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["skipped_handles"], 1);
        assert_eq!(json["capture"]["dropped"], 2);
        assert_eq!(json["metrics"]["total_packets"], 4);
        assert_eq!(json["persisted"], true);
    }
}
