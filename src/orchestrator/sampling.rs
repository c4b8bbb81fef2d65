//! Fixed-cadence telemetry sampling while a workload runs.

use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;
use tracing::debug;

use super::TrialState;
use crate::telemetry::{TelemetrySample, TelemetrySource};
use crate::workload::{Workload, WorkloadOutput};

/// Samples of one attempt, in arrival order with non-decreasing timestamps.
#[derive(Debug, Default)]
pub struct SampleLog {
    samples: Vec<TelemetrySample>,
}

impl SampleLog {
    /// Append a sample. A timestamp earlier than the previous one (wall clock
    /// stepped backwards) is clamped to it.
    pub fn push(&mut self, mut sample: TelemetrySample) -> &TelemetrySample {
        if let Some(last) = self.samples.last() {
            if sample.timestamp_ns < last.timestamp_ns {
                debug!(
                    previous = last.timestamp_ns,
                    current = sample.timestamp_ns,
                    "clock stepped backwards, clamping sample timestamp"
                );
                sample.timestamp_ns = last.timestamp_ns;
            }
        }
        self.samples.push(sample);
        &self.samples[self.samples.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn into_inner(self) -> Vec<TelemetrySample> {
        self.samples
    }
}

/// One workload invocation and the telemetry gathered while it ran.
#[derive(Debug)]
pub struct Attempt {
    state: TrialState,
    pub output: WorkloadOutput,
    samples: SampleLog,
}

impl Attempt {
    pub fn state(&self) -> TrialState {
        self.state
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Keep the attempt, handing its samples to the caller.
    pub fn accept(mut self) -> (WorkloadOutput, Vec<TelemetrySample>) {
        self.state = self.state.advance(TrialState::Accepted);
        (self.output, self.samples.into_inner())
    }

    /// Drop the attempt and everything it sampled.
    pub fn discard(mut self) -> usize {
        self.state = self.state.advance(TrialState::Discarded);
        self.samples.len()
    }
}

/// Run `workload` to completion while sampling `source` every `interval`.
///
/// The sleep after each sample is shortened by the time the sample took, so
/// a slow RPC does not stretch the cadence. Completion of the workload wins
/// over a pending sample or sleep. A sampling error is fatal and stops the
/// workload by dropping it.
pub async fn sample_while_running<S>(
    workload: &dyn Workload,
    source: &mut S,
    interval: Duration,
    on_sample: &mut dyn FnMut(&TelemetrySample),
) -> Result<Attempt>
where
    S: TelemetrySource + ?Sized,
{
    let mut state = TrialState::Spawned;
    let run = workload.run();
    tokio::pin!(run);
    state = state.advance(TrialState::Sampling);

    let mut log = SampleLog::default();

    let output = loop {
        let loop_start = Instant::now();

        tokio::select! {
            biased;
            output = &mut run => break output?,
            sample = source.sample() => {
                let latest = log.push(sample?);
                on_sample(latest);
            }
        }

        let pause = interval.saturating_sub(loop_start.elapsed());
        tokio::select! {
            biased;
            output = &mut run => break output?,
            _ = tokio::time::sleep(pause) => {}
        }
    };

    debug!(
        workload = %workload.describe(),
        success = output.success,
        samples = log.len(),
        "workload finished"
    );

    Ok(Attempt {
        state,
        output,
        samples: log,
    })
}
