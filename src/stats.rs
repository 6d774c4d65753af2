// Single-pass accumulation of packet records and derivation of the final metrics.

use std::fmt;
use std::str::FromStr;

use crate::models::domain::PacketRecord;
use crate::models::dto::FinalMetrics;

/// What to do with a record whose timestamp is earlier than its predecessor's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderingPolicy {
    Accept, // negative delays pass through
    #[default]
    Clamp,
    Reject,
}

impl FromStr for OrderingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "accept" => Ok(OrderingPolicy::Accept),
            "clamp" => Ok(OrderingPolicy::Clamp),
            "reject" => Ok(OrderingPolicy::Reject),
            other => Err(format!("unknown ordering policy: {other} (expected accept, clamp or reject)")),
        }
    }
}

impl fmt::Display for OrderingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderingPolicy::Accept => "accept",
            OrderingPolicy::Clamp => "clamp",
            OrderingPolicy::Reject => "reject",
        };
        f.write_str(name)
    }
}

/// Inter-arrival delays in constant memory. Mean is `sum / count`, variance via Welford.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DelayStats {
    count: u64,
    sum: f64,
    mean: f64,
    m2: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl DelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delay: f64) {
        self.count += 1;
        self.sum += delay;
        let delta = delay - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (delay - self.mean);
        self.min = Some(self.min.map_or(delay, |m| m.min(delay)));
        self.max = Some(self.max.map_or(delay, |m| m.max(delay)));
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    // population, not sample
    pub fn std_dev(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.m2 / self.count as f64).max(0.0).sqrt()
        }
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }
}

/// Running totals for one capture run. One writer, never shared across runs.
#[derive(Debug, Clone, Default)]
pub struct TrafficStats {
    pub packet_count: u64,
    pub byte_total: u64,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub previous_timestamp: Option<f64>,
    pub delays: DelayStats,
    pub out_of_order: u64,
    policy: OrderingPolicy,
}

impl TrafficStats {
    pub fn new(policy: OrderingPolicy) -> Self {
        TrafficStats {
            policy,
            ..Default::default()
        }
    }

    pub fn update(&mut self, record: &PacketRecord) {
        let mut timestamp = record.timestamp;

        if let Some(previous) = self.previous_timestamp {
            if timestamp < previous {
                self.out_of_order += 1;
                tracing::warn!(
                    timestamp,
                    previous,
                    policy = %self.policy,
                    "packet timestamp went backwards"
                );
                match self.policy {
                    OrderingPolicy::Accept => {}
                    OrderingPolicy::Clamp => timestamp = previous,
                    OrderingPolicy::Reject => return,
                }
            }
        }

        self.packet_count += 1;
        self.byte_total += record.length_bytes;

        if self.start_time.is_none() {
            self.start_time = Some(timestamp);
        }
        self.end_time = Some(timestamp);

        if let Some(previous) = self.previous_timestamp {
            self.delays.push(timestamp - previous);
        }
        self.previous_timestamp = Some(timestamp);
    }

    pub fn fold(mut self, record: PacketRecord) -> Self {
        self.update(&record);
        self
    }

    /// Derives the final metrics. Degenerate runs yield zeros, never a division fault.
    pub fn finalize(&self) -> FinalMetrics {
        let duration_seconds = match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => (end - start).max(0.0),
            _ => 0.0,
        };

        let throughput_bps = if duration_seconds > 0.0 {
            self.byte_total as f64 * 8.0 / duration_seconds
        } else {
            0.0
        };

        FinalMetrics {
            total_packets: self.packet_count,
            total_bytes: self.byte_total,
            duration_seconds,
            throughput_bps,
            average_delay_seconds: self.delays.mean(),
            delay_jitter_seconds: self.delays.std_dev(),
            min_delay_seconds: self.delays.min(),
            max_delay_seconds: self.delays.max(),
            delay_samples: self.delays.count(),
            first_seen: self.start_time,
            last_seen: self.end_time,
            out_of_order: self.out_of_order,
        }
    }
}
