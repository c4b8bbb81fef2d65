//! iperf3 invocation and JSON report parsing.

use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::device::DeviceDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Udp,
    Tcp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Udp => write!(f, "UDP"),
            Transport::Tcp => write!(f, "TCP"),
        }
    }
}

/// Direction relative to the controller: upload sends from here to the
/// server, download asks the server to send (`-R`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => write!(f, "Upload"),
            Direction::Download => write!(f, "Download"),
        }
    }
}

/// Parameters for one iperf3 client run.
#[derive(Debug, Clone)]
pub struct Iperf3Params<'a> {
    pub server: &'a str,
    pub duration_secs: u64,
    pub report_interval_secs: f64,
    pub transport: Transport,
    pub direction: Direction,
}

/// Build the iperf3 argument list, taking the UDP target or TCP window
/// from the device's load parameters.
pub fn client_args(params: &Iperf3Params<'_>, device: &DeviceDescriptor) -> Vec<String> {
    let mut args = vec!["-J".to_string()];
    if params.transport == Transport::Udp {
        args.push("-u".to_string());
    }
    args.extend([
        "-c".to_string(),
        params.server.to_string(),
        "-t".to_string(),
        params.duration_secs.to_string(),
    ]);
    match params.transport {
        Transport::Udp => args.extend(["-b".to_string(), device.udp_target_arg()]),
        Transport::Tcp => args.extend(["-w".to_string(), device.tcp_window_arg()]),
    }
    args.extend(["-i".to_string(), params.report_interval_secs.to_string()]);
    if params.direction == Direction::Download {
        args.push("-R".to_string());
    }
    args
}

/// Parsed iperf3 JSON result. Only `end` is read; everything else in the
/// report, `start` included, is ignored.
#[derive(Debug, Deserialize)]
pub struct Iperf3Result {
    pub end: Iperf3End,
}

#[derive(Debug, Deserialize)]
pub struct Iperf3End {
    #[serde(default)]
    pub sum_received: Option<Iperf3Sum>,
    /// UDP runs on older iperf3 versions only report a combined `sum`.
    #[serde(default)]
    pub sum: Option<Iperf3Sum>,
    #[serde(default)]
    pub streams: Vec<Iperf3StreamEnd>,
}

#[derive(Debug, Deserialize)]
pub struct Iperf3Sum {
    pub bits_per_second: f64,
    #[serde(default)]
    pub jitter_ms: Option<f64>,
    #[serde(default)]
    pub lost_percent: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct Iperf3StreamEnd {
    #[serde(default)]
    pub sender: Option<Iperf3SenderEnd>,
}

#[derive(Debug, Deserialize)]
pub struct Iperf3SenderEnd {
    /// Microseconds.
    #[serde(default)]
    pub mean_rtt: Option<f64>,
}

/// Parse an iperf3 JSON output string into a structured result.
pub fn parse_output(json_str: &str) -> Result<Iperf3Result> {
    let result: Iperf3Result = serde_json::from_str(json_str)?;
    Ok(result)
}

/// Per-trial throughput metric in persisted units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThroughputMetric {
    pub kbps: f64,
    /// Sender-side mean RTT in milliseconds (TCP only).
    pub mean_rtt_ms: Option<f64>,
}

impl ThroughputMetric {
    pub fn from_result(result: &Iperf3Result, transport: Transport) -> Result<Self> {
        let received = result
            .end
            .sum_received
            .as_ref()
            .or(result.end.sum.as_ref())
            .ok_or_else(|| anyhow::anyhow!("no received throughput in iperf3 report"))?;

        let mean_rtt_ms = match transport {
            Transport::Tcp => result
                .end
                .streams
                .first()
                .and_then(|s| s.sender.as_ref())
                .and_then(|s| s.mean_rtt)
                .map(|us| us / 1000.0),
            Transport::Udp => None,
        };

        Ok(Self {
            kbps: received.bits_per_second / 1000.0,
            mean_rtt_ms,
        })
    }
}
