use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use tracing_subscriber::{fmt, EnvFilter};

use netmetrics::config::{CaptureArgs, Cli, Command, HostsArgs};
use netmetrics::{pipeline, stop_channel, CsvSink};

fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cli.log_level)
            .with_context(|| format!("invalid log level: {}", cli.log_level))?,
    };
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match &cli.command {
        Some(Command::Hosts(args)) => run_hosts(args),
        None => run_capture(&cli.capture),
    }
}

fn run_capture(args: &CaptureArgs) -> Result<()> {
    let spec = args.capture_spec();
    let (stop, signal) = stop_channel();
    ctrlc::set_handler(move || stop.stop()).context("installing Ctrl-C handler")?;

    match spec.time_bound {
        Some(bound) => println!("Starting capture on {} for {} seconds...", spec.describe(), bound.as_secs()),
        None => println!("Reading packets from {}...", spec.describe()),
    }

    let sink = CsvSink::new(&args.output);
    let report = pipeline::run_capture(&spec, signal, args.out_of_order, &sink)
        .with_context(|| format!("capture on {} failed to start", spec.describe()))?;

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        println!("{report}");
    }

    match &report.persisted {
        Ok(()) => println!("Metrics saved to {}", sink.path().display()),
        Err(e) => eprintln!("Error saving metrics to CSV: {e}"),
    }
    Ok(())
}

fn run_hosts(args: &HostsArgs) -> Result<()> {
    let sink = CsvSink::new(&args.output);
    let report = pipeline::run_hosts(&args.capture_specs(), &sink).context("host capture failed to open")?;

    for row in &report.rows {
        println!("{}: {} packets, {} bytes", row.host, row.packet_count, row.byte_count);
    }
    match &report.persisted {
        Ok(()) => println!("Metrics saved to {}", sink.path().display()),
        Err(e) => eprintln!("Error saving metrics to CSV: {e}"),
    }
    Ok(())
}
