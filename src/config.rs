use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::sniff::CaptureSpec;
use crate::stats::OrderingPolicy;

pub const DEFAULT_OUTPUT: &str = "network_metrics.csv";
pub const DEFAULT_HOSTS_OUTPUT: &str = "network_host_metrics.csv";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Capture packets and save traffic metrics to CSV.
#[derive(Debug, Parser)]
#[command(name = "netmetrics", version, about, subcommand_negates_reqs = true)]
pub struct Cli {
    #[command(flatten)]
    pub capture: CaptureArgs,

    /// Logging verbosity (trace, debug, info, warn, error). RUST_LOG wins when set.
    #[arg(long, global = true, default_value = "info", env = "NETMETRICS_LOG_LEVEL")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Args)]
pub struct CaptureArgs {
    /// Interface to capture traffic on (e.g. s1-eth1)
    #[arg(short, long, env = "NETMETRICS_INTERFACE", required_unless_present = "read", conflicts_with = "read")]
    pub interface: Option<String>,

    /// Read packets from a pcap file instead of a live interface
    #[arg(short, long, value_name = "PCAP")]
    pub read: Option<PathBuf>,

    /// Duration of the capture in seconds. For --read, limits the capture-time window.
    #[arg(short, long, value_name = "SECS", env = "NETMETRICS_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Output CSV file for metrics
    #[arg(short, long, default_value = DEFAULT_OUTPUT, env = "NETMETRICS_OUTPUT")]
    pub output: PathBuf,

    /// BPF filter applied to the capture
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Handling of packets whose timestamp goes backwards: accept, clamp or reject
    #[arg(long, default_value_t = OrderingPolicy::Clamp)]
    pub out_of_order: OrderingPolicy,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

impl CaptureArgs {
    pub fn capture_spec(&self) -> CaptureSpec {
        let spec = match &self.read {
            Some(path) => CaptureSpec::file(path).with_time_bound(self.timeout.map(Duration::from_secs)),
            None => CaptureSpec::live(
                self.interface.clone(),
                Duration::from_secs(self.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            ),
        };
        spec.with_filter(self.filter.clone())
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Per-host packet and byte counts from one pcap file per host
    Hosts(HostsArgs),
}

#[derive(Debug, Args)]
pub struct HostsArgs {
    /// Host capture as NAME=PCAP (repeatable)
    #[arg(long = "host", value_name = "NAME=PCAP", required = true, value_parser = parse_host)]
    pub hosts: Vec<(String, PathBuf)>,

    /// BPF filter applied to every host capture
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Output CSV file for host counts
    #[arg(short, long, default_value = DEFAULT_HOSTS_OUTPUT)]
    pub output: PathBuf,
}

impl HostsArgs {
    pub fn capture_specs(&self) -> Vec<(String, CaptureSpec)> {
        self.hosts
            .iter()
            .map(|(name, path)| (name.clone(), CaptureSpec::file(path).with_filter(self.filter.clone())))
            .collect()
    }
}

fn parse_host(s: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PCAP, got {s:?}"))?;
    if name.is_empty() || path.is_empty() {
        return Err(format!("expected NAME=PCAP, got {s:?}"));
    }
    Ok((name.to_string(), PathBuf::from(path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sniff::SourceKind;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_live_defaults() {
        let cli = Cli::try_parse_from(["netmetrics", "-i", "s1-eth1"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.capture.output, PathBuf::from(DEFAULT_OUTPUT));
        assert_eq!(cli.capture.out_of_order, OrderingPolicy::Clamp);

        let spec = cli.capture.capture_spec();
        assert_eq!(spec.kind, SourceKind::Live { interface: Some("s1-eth1".into()) });
        assert_eq!(spec.time_bound, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_explicit_timeout() {
        let cli = Cli::try_parse_from(["netmetrics", "-i", "eth0", "-t", "5"]).unwrap();
        assert_eq!(cli.capture.capture_spec().time_bound, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_read_file_has_no_default_bound() {
        let cli = Cli::try_parse_from(["netmetrics", "--read", "/tmp/h1.pcap", "-o", "out.csv", "-f", "icmp"]).unwrap();
        let spec = cli.capture.capture_spec();
        assert_eq!(spec.kind, SourceKind::File { path: "/tmp/h1.pcap".into() });
        assert_eq!(spec.time_bound, None);
        assert_eq!(spec.filter.as_deref(), Some("icmp"));
    }

    #[test]
    fn test_interface_and_read_conflict() {
        assert!(Cli::try_parse_from(["netmetrics", "-i", "eth0", "-r", "x.pcap"]).is_err());
    }

    #[test]
    fn test_hosts_subcommand() {
        let cli = Cli::try_parse_from([
            "netmetrics",
            "hosts",
            "--host",
            "h1=/tmp/h1_traffic.pcap",
            "--host",
            "h2=/tmp/h2_traffic.pcap",
        ])
        .unwrap();
        let Some(Command::Hosts(args)) = cli.command else {
            panic!("expected hosts subcommand");
        };
        assert_eq!(args.output, PathBuf::from(DEFAULT_HOSTS_OUTPUT));
        let specs = args.capture_specs();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].0, "h2");
    }

    #[test]
    fn test_parse_host() {
        assert!(parse_host("h1").is_err());
        assert!(parse_host("=x.pcap").is_err());
        assert_eq!(parse_host("h1=a=b.pcap").unwrap(), ("h1".to_string(), PathBuf::from("a=b.pcap")));
    }
}
