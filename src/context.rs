//! Per-run state shared by every campaign: identity, running averages and
//! retry diagnostics.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::Serialize;
use uuid::Uuid;

use crate::orchestrator::TrialKind;

/// Arithmetic mean maintained incrementally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunningMean {
    sum: f64,
    count: u64,
}

impl RunningMean {
    pub fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.sum / self.count as f64)
    }
}

/// Accepted-result averages for one throughput campaign.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CampaignAggregate {
    pub bitrate_kbps: RunningMean,
    pub mean_rtt_ms: RunningMean,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunningAggregates {
    pub throughput: BTreeMap<String, CampaignAggregate>,
    pub latency_ms: RunningMean,
}

impl RunningAggregates {
    pub fn record_throughput(&mut self, campaign: &str, kbps: f64, mean_rtt_ms: Option<f64>) {
        let agg = self.throughput.entry(campaign.to_string()).or_default();
        agg.bitrate_kbps.push(kbps);
        if let Some(rtt) = mean_rtt_ms {
            agg.mean_rtt_ms.push(rtt);
        }
    }

    pub fn throughput(&self, campaign: &str) -> CampaignAggregate {
        self.throughput.get(campaign).copied().unwrap_or_default()
    }
}

/// Discarded attempts, so an unbounded retry loop stays visible.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryDiagnostics {
    pub discards: BTreeMap<String, u64>,
    pub by_kind: BTreeMap<TrialKind, u64>,
}

impl RetryDiagnostics {
    pub fn record_discard(&mut self, campaign: &str, kind: TrialKind) {
        *self.discards.entry(campaign.to_string()).or_default() += 1;
        *self.by_kind.entry(kind).or_default() += 1;
    }

    pub fn total(&self) -> u64 {
        self.discards.values().sum()
    }

    pub fn for_campaign(&self, campaign: &str) -> u64 {
        self.discards.get(campaign).copied().unwrap_or_default()
    }
}

/// Owned by the top-level run and threaded through every campaign.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Local>,
    pub aggregates: RunningAggregates,
    pub diagnostics: RetryDiagnostics,
}

impl RunContext {
    pub fn new() -> Self {
        Self::starting_at(Local::now())
    }

    pub fn starting_at(started_at: DateTime<Local>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            aggregates: RunningAggregates::default(),
            diagnostics: RetryDiagnostics::default(),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_mean() {
        let mut m = RunningMean::default();
        assert_eq!(m.mean(), None);
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            m.push(v);
        }
        assert_eq!(m.count(), 5);
        assert_eq!(m.mean(), Some(3.0));
    }

    #[test]
    fn test_aggregates_are_per_campaign() {
        let mut agg = RunningAggregates::default();
        agg.record_throughput("UDP Download", 2000.0, None);
        agg.record_throughput("UDP Download", 1000.0, None);
        agg.record_throughput("TCP Upload", 500.0, Some(12.0));

        assert_eq!(agg.throughput("UDP Download").bitrate_kbps.mean(), Some(1500.0));
        assert_eq!(agg.throughput("UDP Download").mean_rtt_ms.mean(), None);
        assert_eq!(agg.throughput("TCP Upload").mean_rtt_ms.mean(), Some(12.0));
        assert_eq!(agg.throughput("missing").bitrate_kbps.count(), 0);
    }

    #[test]
    fn test_discard_counters() {
        let mut d = RetryDiagnostics::default();
        d.record_discard("UDP Download", TrialKind::ThroughputDown);
        d.record_discard("UDP Download", TrialKind::ThroughputDown);
        d.record_discard("Latency", TrialKind::LatencyBatch);
        assert_eq!(d.total(), 3);
        assert_eq!(d.for_campaign("UDP Download"), 2);
        assert_eq!(d.by_kind[&TrialKind::LatencyBatch], 1);
    }
}
