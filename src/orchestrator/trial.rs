//! Throughput campaigns: N accepted iperf3 trials with telemetry.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use super::feedback::{kbps, millis, telemetry_status, ProgressLine};
use super::sampling::sample_while_running;
use super::{DiscardReason, ResultSink, RetryPolicy, Trial, TrialKind, TrialMetric, TrialState};
use crate::context::RunContext;
use crate::telemetry::{TelemetrySample, TelemetrySource};
use crate::workload::iperf::{self, Direction, ThroughputMetric, Transport};
use crate::workload::{Workload, WorkloadOutput};

/// One configured throughput campaign bound to its workload.
pub struct ThroughputCampaign<'a> {
    pub transport: Transport,
    pub direction: Direction,
    pub trials: u32,
    pub workload: &'a dyn Workload,
    pub policy: RetryPolicy,
    pub interval: Duration,
}

impl ThroughputCampaign<'_> {
    pub fn kind(&self) -> TrialKind {
        match self.direction {
            Direction::Download => TrialKind::ThroughputDown,
            Direction::Upload => TrialKind::ThroughputUp,
        }
    }

    /// `UDP Download`, `TCP Upload`, ...
    pub fn label(&self) -> String {
        format!("{} {}", self.transport, self.direction)
    }

    /// `Iperf3_UDP_Test_3`. Direction is not part of the name, so a run
    /// holds at most one campaign per transport.
    pub fn artifact_stem(&self, index: u32) -> String {
        format!("Iperf3_{}_Test_{}", self.transport, index)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignSummary {
    pub label: String,
    pub transport: Transport,
    pub accepted: u32,
    pub discards: u64,
    pub mean_kbps: Option<f64>,
    pub mean_rtt_ms: Option<f64>,
}

impl CampaignSummary {
    pub fn completion_line(&self) -> String {
        let mut line = format!(
            "✓ {} Test Complete (Average Bitrate: {}",
            self.label,
            kbps(self.mean_kbps)
        );
        if self.transport == Transport::Tcp {
            line.push_str(&format!(", Average RTT: {}", millis(self.mean_rtt_ms)));
        }
        if self.discards > 0 {
            line.push_str(&format!(", Discarded: {}", self.discards));
        }
        line.push(')');
        line
    }
}

/// Judge a finished iperf3 run.
pub fn evaluate(transport: Transport, output: &WorkloadOutput) -> Result<ThroughputMetric, DiscardReason> {
    if !output.success {
        return Err(DiscardReason::WorkloadFailed { code: output.code });
    }
    let report =
        iperf::parse_output(&output.stdout).map_err(|e| DiscardReason::UnparseableReport(e.to_string()))?;
    ThroughputMetric::from_result(&report, transport)
        .map_err(|e| DiscardReason::UnparseableReport(e.to_string()))
}

/// Run trials until `campaign.trials` have been accepted. A discarded
/// attempt keeps its index; its samples are dropped.
pub async fn run_throughput_campaign<S>(
    ctx: &mut RunContext,
    source: &mut S,
    campaign: &ThroughputCampaign<'_>,
    sink: &mut dyn ResultSink,
    progress: &mut ProgressLine,
) -> Result<CampaignSummary>
where
    S: TelemetrySource + ?Sized,
{
    let label = campaign.label();
    let kind = campaign.kind();
    info!(
        campaign = %label,
        trials = campaign.trials,
        workload = %campaign.workload.describe(),
        "starting throughput campaign"
    );

    let mut previous: Option<f64> = None;
    for index in 1..=campaign.trials {
        let mut discards = 0u32;

        let (trial, metric, raw_report) = loop {
            let aggregate = ctx.aggregates.throughput(&label);
            let header = format!("{label} Test {index}/{}", campaign.trials);
            let trailer = format!(
                "[Previous: {}] [Average: {}] [Discarded: {}]",
                kbps(previous),
                kbps(aggregate.bitrate_kbps.mean()),
                ctx.diagnostics.for_campaign(&label)
            );

            let attempt = sample_while_running(campaign.workload, source, campaign.interval, &mut |s: &TelemetrySample| {
                progress.update(&format!("{header} ({}) {trailer}", telemetry_status(s)));
            })
            .await
            .with_context(|| format!("{label} trial {index} aborted"))?;

            match evaluate(campaign.transport, &attempt.output) {
                Ok(metric) => {
                    let (output, samples) = attempt.accept();
                    let trial = Trial {
                        kind,
                        index,
                        attempts: discards + 1,
                        outcome: TrialState::Accepted,
                        samples,
                        metric: TrialMetric::Throughput(metric),
                    };
                    break (trial, metric, output.stdout);
                }
                Err(reason) => {
                    let dropped = attempt.discard();
                    discards += 1;
                    ctx.diagnostics.record_discard(&label, kind);
                    warn!(
                        campaign = %label,
                        trial = index,
                        discards,
                        dropped_samples = dropped,
                        %reason,
                        "discarding trial"
                    );
                    campaign.policy.check(&label, index, discards)?;
                }
            }
        };

        sink.throughput_trial(&campaign.artifact_stem(index), &trial, &raw_report)
            .with_context(|| format!("failed to persist {label} trial {index}"))?;
        ctx.aggregates
            .record_throughput(&label, metric.kbps, metric.mean_rtt_ms);
        previous = Some(metric.kbps);

        info!(
            campaign = %label,
            trial = index,
            kbps = metric.kbps,
            mean_rtt_ms = metric.mean_rtt_ms,
            samples = trial.samples.len(),
            attempts = trial.attempts,
            "trial accepted"
        );
    }

    let aggregate = ctx.aggregates.throughput(&label);
    let summary = CampaignSummary {
        label: label.clone(),
        transport: campaign.transport,
        accepted: campaign.trials,
        discards: ctx.diagnostics.for_campaign(&label),
        mean_kbps: aggregate.bitrate_kbps.mean(),
        mean_rtt_ms: aggregate.mean_rtt_ms.mean(),
    };
    progress.finish(&summary.completion_line());
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::testing::{CountingSource, MemorySink, ScriptedWorkload};
    use crate::orchestrator::TrialError;

    fn report(bps: u64, rtt_us: u64) -> String {
        format!(
            r#"{{"end": {{"streams": [{{"sender": {{"mean_rtt": {rtt_us}}}}}],
                "sum_received": {{"bits_per_second": {bps}}}}}}}"#
        )
    }

    fn campaign<'a>(workload: &'a ScriptedWorkload, trials: u32, policy: RetryPolicy) -> ThroughputCampaign<'a> {
        ThroughputCampaign {
            transport: Transport::Tcp,
            direction: Direction::Upload,
            trials,
            workload,
            policy,
            interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_evaluate() {
        let ok = evaluate(Transport::Tcp, &WorkloadOutput::succeeded(&report(1_500_000, 15_000))).unwrap();
        assert_eq!(ok.kbps, 1500.0);
        assert_eq!(ok.mean_rtt_ms, Some(15.0));

        assert_eq!(
            evaluate(Transport::Tcp, &WorkloadOutput::failed(1, "unable to connect")),
            Err(DiscardReason::WorkloadFailed { code: Some(1) })
        );
        assert!(matches!(
            evaluate(Transport::Udp, &WorkloadOutput::succeeded("{}")),
            Err(DiscardReason::UnparseableReport(_))
        ));
    }

    #[test]
    fn test_labels() {
        let w = ScriptedWorkload::new(vec![], Duration::ZERO);
        let c = ThroughputCampaign {
            transport: Transport::Udp,
            direction: Direction::Download,
            ..campaign(&w, 1, RetryPolicy::unbounded())
        };
        assert_eq!(c.kind(), TrialKind::ThroughputDown);
        assert_eq!(c.label(), "UDP Download");
        assert_eq!(c.artifact_stem(3), "Iperf3_UDP_Test_3");
    }

    #[tokio::test]
    async fn test_fail_fail_succeed_keeps_only_third_attempt() {
        let workload = ScriptedWorkload::new(
            vec![
                WorkloadOutput::failed(1, "connection refused"),
                WorkloadOutput::failed(1, "the server is busy running a test"),
                WorkloadOutput::succeeded(&report(1_500_000, 15_000)),
            ],
            Duration::from_millis(45),
        );
        let mut source = CountingSource::default();
        let mut sink = MemorySink::default();
        let mut ctx = RunContext::new();

        let summary = run_throughput_campaign(
            &mut ctx,
            &mut source,
            &campaign(&workload, 1, RetryPolicy::unbounded()),
            &mut sink,
            &mut ProgressLine::disabled(),
        )
        .await
        .unwrap();

        assert_eq!(workload.invocations(), 3);
        assert_eq!(sink.throughput.len(), 1);

        let (stem, trial, raw) = &sink.throughput[0];
        assert_eq!(stem, "Iperf3_TCP_Test_1");
        assert_eq!(trial.attempts, 3);
        assert_eq!(trial.outcome, TrialState::Accepted);
        assert!(raw.contains("1500000"));

        // CountingSource numbers samples; anything from the first two
        // attempts would carry a smaller counter than the third attempt's
        // first sample.
        let total = source.taken;
        let kept = trial.samples.len() as i32;
        assert!(kept > 0);
        let first_kept = -trial.samples[0].rssi.unwrap();
        assert_eq!(first_kept, total - kept + 1);

        assert_eq!(summary.discards, 2);
        assert_eq!(summary.mean_kbps, Some(1500.0));
        assert_eq!(summary.mean_rtt_ms, Some(15.0));
        assert_eq!(ctx.diagnostics.by_kind[&TrialKind::ThroughputUp], 2);
    }

    #[tokio::test]
    async fn test_unparseable_report_is_retried() {
        let workload = ScriptedWorkload::new(
            vec![
                WorkloadOutput::succeeded("iperf3: error - unable to receive results"),
                WorkloadOutput::succeeded(&report(2_000_000, 12_000)),
            ],
            Duration::from_millis(15),
        );
        let mut sink = MemorySink::default();
        let mut ctx = RunContext::new();

        let summary = run_throughput_campaign(
            &mut ctx,
            &mut CountingSource::default(),
            &campaign(&workload, 1, RetryPolicy::unbounded()),
            &mut sink,
            &mut ProgressLine::disabled(),
        )
        .await
        .unwrap();

        assert_eq!(workload.invocations(), 2);
        assert_eq!(summary.discards, 1);
        assert_eq!(sink.throughput.len(), 1);
        assert_eq!(sink.throughput[0].1.attempts, 2);
        assert_eq!(summary.mean_kbps, Some(2000.0));
    }

    #[tokio::test]
    async fn test_artifact_count_matches_trials() {
        let outputs = (1..=4)
            .map(|i| WorkloadOutput::succeeded(&report(i * 1_000_000, 10_000)))
            .collect();
        let workload = ScriptedWorkload::new(outputs, Duration::from_millis(15));
        let mut sink = MemorySink::default();
        let mut ctx = RunContext::new();

        let summary = run_throughput_campaign(
            &mut ctx,
            &mut CountingSource::default(),
            &campaign(&workload, 4, RetryPolicy::unbounded()),
            &mut sink,
            &mut ProgressLine::disabled(),
        )
        .await
        .unwrap();

        let stems: Vec<_> = sink.throughput.iter().map(|(s, _, _)| s.as_str()).collect();
        assert_eq!(
            stems,
            vec![
                "Iperf3_TCP_Test_1",
                "Iperf3_TCP_Test_2",
                "Iperf3_TCP_Test_3",
                "Iperf3_TCP_Test_4"
            ]
        );
        assert_eq!(summary.mean_kbps, Some(2500.0));
        assert_eq!(
            summary.completion_line(),
            "✓ TCP Upload Test Complete (Average Bitrate: 2500.00 Kbps, Average RTT: 10.00 ms)"
        );
    }

    #[tokio::test]
    async fn test_bounded_retry_is_fatal() {
        let workload = ScriptedWorkload::new(vec![], Duration::from_millis(5));
        let mut ctx = RunContext::new();

        let err = run_throughput_campaign(
            &mut ctx,
            &mut CountingSource::default(),
            &campaign(&workload, 2, RetryPolicy::bounded(2)),
            &mut MemorySink::default(),
            &mut ProgressLine::disabled(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<TrialError>(),
            Some(TrialError::RetryBudgetExhausted { discards: 3, .. })
        ));
        assert_eq!(workload.invocations(), 3);
    }
}
