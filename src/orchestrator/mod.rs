//! Trial orchestration: run a workload, sample telemetry alongside it, and
//! decide whether the attempt is kept.

pub mod feedback;
pub mod ping_batch;
pub mod sampling;
pub mod trial;

use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::telemetry::TelemetrySample;
use crate::workload::iperf::ThroughputMetric;
use crate::workload::ping::PingRecord;

pub use ping_batch::{run_latency_campaign, LatencyCampaign, PingBatchAggregator};
pub use trial::{run_throughput_campaign, ThroughputCampaign};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TrialKind {
    ThroughputDown,
    ThroughputUp,
    LatencyBatch,
}

impl fmt::Display for TrialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrialKind::ThroughputDown => write!(f, "throughput_down"),
            TrialKind::ThroughputUp => write!(f, "throughput_up"),
            TrialKind::LatencyBatch => write!(f, "latency_batch"),
        }
    }
}

/// Lifecycle of one attempt. `Accepted` and `Discarded` are its outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrialState {
    Spawned,
    Sampling,
    Accepted,
    Discarded,
}

impl TrialState {
    pub fn can_advance_to(self, next: TrialState) -> bool {
        matches!(
            (self, next),
            (TrialState::Spawned, TrialState::Sampling)
                | (TrialState::Sampling, TrialState::Accepted)
                | (TrialState::Sampling, TrialState::Discarded)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TrialState::Accepted | TrialState::Discarded)
    }

    /// Move to `next`, which must be a legal successor.
    pub fn advance(self, next: TrialState) -> TrialState {
        debug_assert!(self.can_advance_to(next), "{:?} -> {:?}", self, next);
        trace!(from = ?self, to = ?next, "trial state");
        next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum TrialMetric {
    Throughput(ThroughputMetric),
    Latency { batch_mean_ms: f64 },
}

/// A resolved attempt. Only accepted trials leave the orchestrator.
#[derive(Debug, Clone)]
pub struct Trial {
    pub kind: TrialKind,
    pub index: u32,
    /// Invocations it took to get this result, including discarded ones.
    pub attempts: u32,
    pub outcome: TrialState,
    pub samples: Vec<TelemetrySample>,
    pub metric: TrialMetric,
}

/// Why an attempt was thrown away.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscardReason {
    WorkloadFailed { code: Option<i32> },
    UnparseableReport(String),
    IncompleteBatch { expected: usize, got: usize },
    UnparseableLine(String),
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardReason::WorkloadFailed { code: Some(code) } => {
                write!(f, "workload exited with status {code}")
            }
            DiscardReason::WorkloadFailed { code: None } => {
                write!(f, "workload terminated by signal")
            }
            DiscardReason::UnparseableReport(e) => write!(f, "unparseable report: {e}"),
            DiscardReason::IncompleteBatch { expected, got } => {
                write!(f, "expected {expected} replies, got {got}")
            }
            DiscardReason::UnparseableLine(line) => write!(f, "unparseable reply line: {line}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TrialError {
    #[error("{campaign} trial {index} discarded {discards} times in a row (limit {limit})")]
    RetryBudgetExhausted {
        campaign: String,
        index: u32,
        discards: u32,
        limit: u32,
    },
}

/// How many consecutive discards of one trial index are tolerated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// `None` retries forever.
    pub max_consecutive_discards: Option<u32>,
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self {
            max_consecutive_discards: None,
        }
    }

    pub fn bounded(limit: u32) -> Self {
        Self {
            max_consecutive_discards: Some(limit),
        }
    }

    /// Fails once `discards` exceeds the bound.
    pub fn check(&self, campaign: &str, index: u32, discards: u32) -> Result<(), TrialError> {
        match self.max_consecutive_discards {
            Some(limit) if discards > limit => Err(TrialError::RetryBudgetExhausted {
                campaign: campaign.to_string(),
                index,
                discards,
                limit,
            }),
            _ => Ok(()),
        }
    }
}

/// Where accepted results go.
pub trait ResultSink {
    /// Persist one accepted throughput trial under `stem` with its raw report.
    fn throughput_trial(&mut self, stem: &str, trial: &Trial, raw_report: &str) -> Result<()>;

    /// Called for every accepted ping batch.
    fn latency_batch(&mut self, _trial: &Trial) -> Result<()> {
        Ok(())
    }

    /// Persist the full latency campaign once the sample target is reached.
    fn latency_campaign(&mut self, records: &[PingRecord], samples: &[TelemetrySample]) -> Result<()>;
}
