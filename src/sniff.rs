// src/sniff.rs
// Capture sources: live interfaces and pcap files behind one trait.
use pcap::{Active, Capture, Device, Offline};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::error::{CaptureError, Result};
use crate::parser::PacketHandle;

const SNAPLEN: i32 = 65535;
const READ_TIMEOUT_MS: i32 = 100; // bounds how late a stop or deadline is noticed

/// An ordered, finite sequence of packet handles. Sources are given back
/// through `release`, which reports whether that went cleanly.
pub trait CaptureSource {
    type Handle: PacketHandle;

    fn name(&self) -> &str;

    fn next_handle(&mut self) -> Option<Self::Handle>;

    fn release(self) -> Result<CaptureStats>
    where
        Self: Sized;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub delivered: u64,
    pub received: Option<u32>,
    pub dropped: Option<u32>,
    pub if_dropped: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Sender<()>,
}

impl StopHandle {
    pub fn stop(&self) {
        // A full channel means a stop is already pending.
        let _ = self.tx.try_send(());
    }
}

#[derive(Debug)]
pub struct StopSignal {
    rx: Receiver<()>,
    stopped: bool,
}

impl StopSignal {
    pub fn never() -> Self {
        StopSignal {
            rx: crossbeam_channel::never(),
            stopped: false,
        }
    }

    pub fn is_stopped(&mut self) -> bool {
        if !self.stopped {
            self.stopped = match self.rx.try_recv() {
                Ok(()) => true,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => false,
            };
        }
        self.stopped
    }
}

pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (StopHandle { tx }, StopSignal { rx, stopped: false })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcapHandle {
    pub ts_sec: i64,
    pub ts_usec: i64,
    pub caplen: u32,
    pub len: u32,
}

impl From<&pcap::PacketHeader> for PcapHandle {
    fn from(header: &pcap::PacketHeader) -> Self {
        PcapHandle {
            ts_sec: header.ts.tv_sec as i64,
            ts_usec: header.ts.tv_usec as i64,
            caplen: header.caplen,
            len: header.len,
        }
    }
}

impl PacketHandle for PcapHandle {
    fn timestamp(&self) -> Option<f64> {
        if self.ts_sec < 0 || !(0..1_000_000).contains(&self.ts_usec) {
            return None;
        }
        Some(self.ts_sec as f64 + self.ts_usec as f64 / 1_000_000.0)
    }

    fn length(&self) -> Option<u64> {
        // A wire length shorter than what was captured is a corrupt header.
        (self.caplen <= self.len).then_some(self.len as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Live { interface: Option<String> }, // None: default device
    File { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSpec {
    pub kind: SourceKind,
    pub time_bound: Option<Duration>, // wall clock when live, capture-time window for files
    pub filter: Option<String>,
}

impl CaptureSpec {
    pub fn live(interface: Option<String>, timeout: Duration) -> Self {
        CaptureSpec {
            kind: SourceKind::Live { interface },
            time_bound: Some(timeout),
            filter: None,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        CaptureSpec {
            kind: SourceKind::File { path: path.into() },
            time_bound: None,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_time_bound(mut self, bound: Option<Duration>) -> Self {
        self.time_bound = bound;
        self
    }

    pub fn describe(&self) -> String {
        match &self.kind {
            SourceKind::Live { interface: Some(name) } => name.clone(),
            SourceKind::Live { interface: None } => "default device".to_string(),
            SourceKind::File { path } => path.display().to_string(),
        }
    }
}

enum Backend {
    Live(Capture<Active>),
    File(Capture<Offline>),
}

// libpcap closes the handle on drop; release() is where the counters come from.
pub struct PcapSource {
    name: String,
    backend: Backend,
    stop: StopSignal,
    deadline: Option<Instant>,
    window: Option<Duration>,
    window_end: Option<f64>,
    delivered: u64,
    finished: bool,
    released: bool,
}

impl PcapSource {
    pub fn open(spec: &CaptureSpec, stop: StopSignal) -> Result<Self> {
        let name = spec.describe();
        let open_err = |error: pcap::Error| CaptureError::Open {
            source_name: name.clone(),
            error,
        };

        let mut backend = match &spec.kind {
            SourceKind::Live { interface } => {
                let device = match interface {
                    Some(iface) => Device::from(iface.as_str()),
                    None => Device::lookup()
                        .map_err(open_err)?
                        .ok_or(CaptureError::NoDevice)?,
                };
                let cap = Capture::from_device(device)
                    .map_err(open_err)?
                    .promisc(false)
                    .snaplen(SNAPLEN)
                    .timeout(READ_TIMEOUT_MS)
                    .immediate_mode(true)
                    .open()
                    .map_err(open_err)?;
                Backend::Live(cap)
            }
            SourceKind::File { path } => Backend::File(Capture::from_file(path).map_err(open_err)?),
        };

        if let Some(filter) = &spec.filter {
            let result = match &mut backend {
                Backend::Live(cap) => cap.filter(filter, true),
                Backend::File(cap) => cap.filter(filter, true),
            };
            result.map_err(|error| CaptureError::Filter {
                filter: filter.clone(),
                error,
            })?;
        }

        let (deadline, window) = match backend {
            Backend::Live(_) => (spec.time_bound.map(|bound| Instant::now() + bound), None),
            Backend::File(_) => (None, spec.time_bound),
        };

        tracing::info!(source = %name, bound = ?spec.time_bound, filter = ?spec.filter, "capture opened");

        Ok(PcapSource {
            name,
            backend,
            stop,
            deadline,
            window,
            window_end: None,
            delivered: 0,
            finished: false,
            released: false,
        })
    }

    fn read_next(&mut self) -> std::result::Result<PcapHandle, pcap::Error> {
        match &mut self.backend {
            Backend::Live(cap) => cap.next_packet().map(|p| PcapHandle::from(p.header)),
            Backend::File(cap) => cap.next_packet().map(|p| PcapHandle::from(p.header)),
        }
    }

    fn past_window(&mut self, handle: &PcapHandle) -> bool {
        let (Some(window), Some(ts)) = (self.window, handle.timestamp()) else {
            return false;
        };
        let end = *self.window_end.get_or_insert(ts + window.as_secs_f64());
        ts > end
    }
}

impl CaptureSource for PcapSource {
    type Handle = PcapHandle;

    fn name(&self) -> &str {
        &self.name
    }

    fn next_handle(&mut self) -> Option<PcapHandle> {
        while !self.finished {
            if self.stop.is_stopped() {
                tracing::info!(source = %self.name, delivered = self.delivered, "capture stopped");
                self.finished = true;
                break;
            }
            if self.deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::info!(source = %self.name, delivered = self.delivered, "capture timeout reached");
                self.finished = true;
                break;
            }

            match self.read_next() {
                Ok(handle) => {
                    if self.past_window(&handle) {
                        self.finished = true;
                        break;
                    }
                    self.delivered += 1;
                    return Some(handle);
                }
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(pcap::Error::NoMorePackets) => self.finished = true,
                Err(e) => {
                    tracing::warn!(source = %self.name, error = %e, "capture read failed, ending run");
                    self.finished = true;
                }
            }
        }
        None
    }

    fn release(mut self) -> Result<CaptureStats> {
        self.released = true;
        let mut stats = CaptureStats {
            delivered: self.delivered,
            ..Default::default()
        };
        if let Backend::Live(cap) = &mut self.backend {
            let stat = cap.stats().map_err(|error| CaptureError::Release {
                source_name: self.name.clone(),
                error,
            })?;
            stats.received = Some(stat.received);
            stats.dropped = Some(stat.dropped);
            stats.if_dropped = Some(stat.if_dropped);
        }
        tracing::debug!(source = %self.name, ?stats, "capture released");
        Ok(stats)
    }
}

impl Drop for PcapSource {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(source = %self.name, "capture dropped without release");
        }
    }
}

/// Pre-recorded in-memory handles.
#[derive(Debug)]
pub struct MemorySource<H> {
    name: String,
    handles: std::vec::IntoIter<H>,
    stop: StopSignal,
    delivered: u64,
}

impl<H: PacketHandle> MemorySource<H> {
    pub fn new(name: impl Into<String>, handles: Vec<H>) -> Self {
        MemorySource {
            name: name.into(),
            handles: handles.into_iter(),
            stop: StopSignal::never(),
            delivered: 0,
        }
    }

    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }
}

impl<H: PacketHandle> CaptureSource for MemorySource<H> {
    type Handle = H;

    fn name(&self) -> &str {
        &self.name
    }

    fn next_handle(&mut self) -> Option<H> {
        if self.stop.is_stopped() {
            return None;
        }
        let handle = self.handles.next()?;
        self.delivered += 1;
        Some(handle)
    }

    fn release(self) -> Result<CaptureStats> {
        Ok(CaptureStats {
            delivered: self.delivered,
            ..Default::default()
        })
    }
}
