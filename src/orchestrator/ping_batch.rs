//! Batched ICMP latency campaign.
//!
//! Each batch is one `ping -c K` run. A batch is kept only if every one of
//! its K reply lines parses; otherwise it is rerun, so the record count is
//! always a multiple of K.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use super::feedback::{millis, telemetry_status, ProgressLine};
use super::sampling::sample_while_running;
use super::{DiscardReason, ResultSink, RetryPolicy, Trial, TrialKind, TrialMetric, TrialState};
use crate::context::RunContext;
use crate::telemetry::{TelemetrySample, TelemetrySource};
use crate::workload::ping::{parse_ping_line, reply_lines, PingRecord};
use crate::workload::Workload;

/// Parse a batch transcript, requiring exactly `batch_size` valid replies.
pub fn parse_batch(output: &str, batch_size: usize) -> Result<Vec<PingRecord>, DiscardReason> {
    let lines = reply_lines(output);
    if lines.len() != batch_size {
        return Err(DiscardReason::IncompleteBatch {
            expected: batch_size,
            got: lines.len(),
        });
    }
    lines
        .into_iter()
        .map(|line| parse_ping_line(line).ok_or_else(|| DiscardReason::UnparseableLine(line.to_string())))
        .collect()
}

/// Accumulates accepted batches until the sample target is met.
#[derive(Debug)]
pub struct PingBatchAggregator {
    batch_size: usize,
    sample_target: usize,
    records: Vec<PingRecord>,
    samples: Vec<TelemetrySample>,
}

impl PingBatchAggregator {
    pub fn new(batch_size: usize, sample_target: usize) -> Self {
        Self {
            batch_size,
            sample_target,
            records: Vec::with_capacity(sample_target),
            samples: Vec::new(),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn sample_target(&self) -> usize {
        self.sample_target
    }

    pub fn is_complete(&self) -> bool {
        self.records.len() >= self.sample_target
    }

    /// Offer one batch. On acceptance its records and samples are appended
    /// and the batch mean is returned; on rejection nothing changes.
    pub fn accept_batch(
        &mut self,
        output: &str,
        samples: Vec<TelemetrySample>,
    ) -> Result<f64, DiscardReason> {
        let batch = parse_batch(output, self.batch_size)?;
        Ok(self.push_batch(batch, samples))
    }

    /// Append an already validated batch, returning its mean.
    pub fn push_batch(&mut self, batch: Vec<PingRecord>, samples: Vec<TelemetrySample>) -> f64 {
        let batch_mean = batch.iter().map(|r| r.time_ms).sum::<f64>() / batch.len().max(1) as f64;
        self.records.extend(batch);
        self.samples.extend(samples);
        batch_mean
    }

    /// Mean round-trip time over every accepted record.
    pub fn cumulative_mean_ms(&self) -> Option<f64> {
        if self.records.is_empty() {
            return None;
        }
        Some(self.records.iter().map(|r| r.time_ms).sum::<f64>() / self.records.len() as f64)
    }

    pub fn records(&self) -> &[PingRecord] {
        &self.records
    }

    pub fn samples(&self) -> &[TelemetrySample] {
        &self.samples
    }
}

/// The latency campaign bound to its ping workload.
pub struct LatencyCampaign<'a> {
    pub workload: &'a dyn Workload,
    pub policy: RetryPolicy,
    pub interval: Duration,
}

impl LatencyCampaign<'_> {
    pub const LABEL: &'static str = "Latency";
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySummary {
    pub records: usize,
    pub batches: u32,
    pub discards: u64,
    pub mean_latency_ms: Option<f64>,
}

impl LatencySummary {
    pub fn completion_line(&self) -> String {
        let mut line = format!(
            "✓ Latency Test Complete (Average Latency: {}",
            millis(self.mean_latency_ms)
        );
        if self.discards > 0 {
            line.push_str(&format!(", Discarded: {}", self.discards));
        }
        line.push(')');
        line
    }
}

/// Run ping batches until the aggregator reaches its sample target, then
/// hand everything to the sink.
pub async fn run_latency_campaign<S>(
    ctx: &mut RunContext,
    source: &mut S,
    aggregator: &mut PingBatchAggregator,
    campaign: &LatencyCampaign<'_>,
    sink: &mut dyn ResultSink,
    progress: &mut ProgressLine,
) -> Result<LatencySummary>
where
    S: TelemetrySource + ?Sized,
{
    let label = LatencyCampaign::LABEL;
    info!(
        batch_size = aggregator.batch_size(),
        sample_target = aggregator.sample_target(),
        workload = %campaign.workload.describe(),
        "starting latency campaign"
    );

    let mut batch = 0u32;
    while !aggregator.is_complete() {
        batch += 1;
        let mut discards = 0u32;

        loop {
            let header = format!(
                "Latency Test {}/{}",
                aggregator.records().len(),
                aggregator.sample_target()
            );
            let trailer = format!(
                "[Average: {}] [Discarded: {}]",
                millis(aggregator.cumulative_mean_ms()),
                ctx.diagnostics.for_campaign(label)
            );

            let attempt = sample_while_running(campaign.workload, source, campaign.interval, &mut |s: &TelemetrySample| {
                progress.update(&format!("{header} ({}) {trailer}", telemetry_status(s)));
            })
            .await
            .with_context(|| format!("latency batch {batch} aborted"))?;

            match parse_batch(&attempt.output.stdout, aggregator.batch_size()) {
                Ok(records) => {
                    let (_, samples) = attempt.accept();
                    let sample_count = samples.len();
                    for record in &records {
                        ctx.aggregates.latency_ms.push(record.time_ms);
                    }
                    let batch_mean_ms = aggregator.push_batch(records, samples.clone());

                    let trial = Trial {
                        kind: TrialKind::LatencyBatch,
                        index: batch,
                        attempts: discards + 1,
                        outcome: TrialState::Accepted,
                        samples,
                        metric: TrialMetric::Latency { batch_mean_ms },
                    };
                    sink.latency_batch(&trial)
                        .with_context(|| format!("failed to record latency batch {batch}"))?;

                    info!(
                        batch,
                        batch_mean_ms,
                        cumulative_mean_ms = aggregator.cumulative_mean_ms(),
                        records = aggregator.records().len(),
                        samples = sample_count,
                        "batch accepted"
                    );
                    break;
                }
                Err(reason) => {
                    let dropped = attempt.discard();
                    discards += 1;
                    ctx.diagnostics.record_discard(label, TrialKind::LatencyBatch);
                    warn!(batch, discards, dropped_samples = dropped, %reason, "discarding ping batch");
                    campaign.policy.check(label, batch, discards)?;
                }
            }
        }
    }

    sink.latency_campaign(aggregator.records(), aggregator.samples())
        .context("failed to persist latency results")?;

    let summary = LatencySummary {
        records: aggregator.records().len(),
        batches: batch,
        discards: ctx.diagnostics.for_campaign(label),
        mean_latency_ms: aggregator.cumulative_mean_ms(),
    };
    progress.finish(&summary.completion_line());
    Ok(summary)
}
