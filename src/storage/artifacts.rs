//! Per-run artifact directory: raw iperf3 reports, telemetry tables and
//! ping records.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;

use crate::device::DeviceDescriptor;
use crate::telemetry::TelemetrySample;
use crate::workload::ping::PingRecord;

pub const TELEMETRY_HEADER: &str =
    "timestamp,signal,signal_avg,noise_floor,rx_mcs,rx_short_gi,tx_mcs,tx_short_gi";
pub const PING_HEADER: &str = "timestamp,bytes,sequence,ttl,time_ms";

/// Stem of the latency artifacts (`Iperf3_ICMP_Test.csv`, `Iperf3_ICMP_Test_Pings.csv`).
pub const LATENCY_STEM: &str = "Iperf3_ICMP_Test";
pub const MANIFEST_FILE: &str = "run.json";

/// `2025-11-16_14:02:44_1MHz_CH47_21dBM_halow_test`
pub fn run_directory_name(started_at: &DateTime<Local>, device: &DeviceDescriptor) -> String {
    format!(
        "{}_{}MHz_CH{}_{}dBM_halow_test",
        started_at.format("%Y-%m-%d_%H:%M:%S"),
        device.bandwidth.mhz(),
        device.channel,
        device.txpower_dbm
    )
}

fn cell<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

impl TelemetrySample {
    pub fn csv_header() -> &'static str {
        TELEMETRY_HEADER
    }

    /// Unsupported fields become empty cells.
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{}",
            self.timestamp_ns,
            cell(self.rssi),
            cell(self.rssi_avg),
            cell(self.noise_floor),
            cell(self.rx_mcs),
            cell(self.rx_short_gi),
            cell(self.tx_mcs),
            cell(self.tx_short_gi)
        )
    }
}

impl PingRecord {
    pub fn csv_header() -> &'static str {
        PING_HEADER
    }

    pub fn to_csv_row(&self) -> String {
        format!(
            "{:.6},{},{},{},{}",
            self.timestamp, self.bytes, self.sequence, self.ttl, self.time_ms
        )
    }
}

pub fn telemetry_csv(samples: &[TelemetrySample]) -> String {
    let mut out = String::with_capacity(64 * (samples.len() + 1));
    out.push_str(TelemetrySample::csv_header());
    out.push('\n');
    for s in samples {
        out.push_str(&s.to_csv_row());
        out.push('\n');
    }
    out
}

pub fn ping_csv(records: &[PingRecord]) -> String {
    let mut out = String::with_capacity(48 * (records.len() + 1));
    out.push_str(PingRecord::csv_header());
    out.push('\n');
    for r in records {
        out.push_str(&r.to_csv_row());
        out.push('\n');
    }
    out
}

/// A freshly created directory holding one run's artifacts.
#[derive(Debug, Clone)]
pub struct RunDirectory {
    path: PathBuf,
}

impl RunDirectory {
    /// Create `root/name`. An existing directory of the same name is an error
    /// so a run never overwrites another.
    pub fn create(root: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("failed to create output root {}", root.display()))?;
        let path = root.join(name);
        fs::create_dir(&path)
            .with_context(|| format!("failed to create run directory {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, file: &str, contents: &str) -> Result<()> {
        let target = self.path.join(file);
        fs::write(&target, contents).with_context(|| format!("failed to write {}", target.display()))
    }

    /// `<stem>.json` with the raw report and `<stem>.csv` with the telemetry.
    pub fn write_throughput(&self, stem: &str, raw_report: &str, samples: &[TelemetrySample]) -> Result<()> {
        self.write(&format!("{stem}.json"), raw_report)?;
        self.write(&format!("{stem}.csv"), &telemetry_csv(samples))
    }

    pub fn write_latency(&self, records: &[PingRecord], samples: &[TelemetrySample]) -> Result<()> {
        self.write(&format!("{LATENCY_STEM}_Pings.csv"), &ping_csv(records))?;
        self.write(&format!("{LATENCY_STEM}.csv"), &telemetry_csv(samples))
    }

    pub fn write_manifest<T: Serialize>(&self, manifest: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(manifest)?;
        self.write(MANIFEST_FILE, &json)
    }
}
