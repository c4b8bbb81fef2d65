//! One full characterization run: authenticate, resolve the device, run
//! the throughput campaigns in order, then the latency campaign.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::HalowBenchConfig;
use crate::context::{RetryDiagnostics, RunContext};
use crate::device::{resolve_device, DeviceDescriptor};
use crate::orchestrator::feedback::ProgressLine;
use crate::orchestrator::ping_batch::LatencySummary;
use crate::orchestrator::trial::CampaignSummary;
use crate::orchestrator::{
    run_latency_campaign, run_throughput_campaign, LatencyCampaign, PingBatchAggregator,
    ThroughputCampaign,
};
use crate::rpc::{HttpTransport, Session, UbusClient};
use crate::storage::artifacts::run_directory_name;
use crate::storage::{Ledger, RunDirectory, RunRecorder};
use crate::telemetry::{TelemetrySample, TelemetrySampler, TelemetrySource};
use crate::workload::iperf::{self, Iperf3Params};
use crate::workload::ping;
use crate::workload::CommandWorkload;

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub directory: PathBuf,
    pub device: DeviceDescriptor,
    pub throughput: Vec<CampaignSummary>,
    pub latency: Option<LatencySummary>,
    pub diagnostics: RetryDiagnostics,
}

/// Written to `run.json` once every campaign has finished.
#[derive(Debug, Serialize)]
struct RunManifest<'a> {
    run_id: Uuid,
    started_at: DateTime<Local>,
    finished_at: DateTime<Local>,
    device: &'a DeviceDescriptor,
    iperf3: &'a crate::config::Iperf3Config,
    ping: &'a crate::config::PingConfig,
    retry: &'a crate::config::RetryConfig,
    sampling_interval_ms: u64,
    summary: &'a RunSummary,
}

/// Open an RPC session and resolve the device under test.
pub async fn connect(config: &HalowBenchConfig) -> Result<(UbusClient, Session, DeviceDescriptor)> {
    let transport = HttpTransport::new(&config.device.rpc_url, config.device.request_timeout())?;
    let mut client = UbusClient::new(transport);

    let session = client
        .authenticate(&config.device.credentials)
        .await
        .context("failed to retrieve ubus session token")?;
    let device = resolve_device(
        &mut client,
        &session,
        &config.capabilities,
        config.device.rpc_retry_limit,
    )
    .await?;

    Ok((client, session, device))
}

/// Take `count` telemetry samples at the configured cadence.
pub async fn take_samples(config: &HalowBenchConfig, count: usize) -> Result<(DeviceDescriptor, Vec<TelemetrySample>)> {
    let (client, session, device) = connect(config).await?;
    let mut sampler = TelemetrySampler::new(client, session, device.clone(), config.device.rpc_retry_limit);

    let interval = config.sampling_interval();
    let mut samples = Vec::with_capacity(count);
    for i in 0..count {
        let started = tokio::time::Instant::now();
        samples.push(sampler.sample().await?);
        if i + 1 < count {
            tokio::time::sleep(interval.saturating_sub(started.elapsed())).await;
        }
    }
    Ok((device, samples))
}

/// Run every configured campaign against the device and persist the results.
pub async fn run(config: &HalowBenchConfig) -> Result<RunSummary> {
    config.validate()?;
    let (client, session, device) = connect(config).await?;

    let mut ctx = RunContext::new();
    let directory = RunDirectory::create(
        &config.output.root,
        &run_directory_name(&ctx.started_at, &device),
    )?;
    info!(run_id = %ctx.run_id, directory = %directory.path().display(), "created run directory");

    let ledger = config.output.ledger_path.as_ref().and_then(|path| {
        let opened = Ledger::open(path).and_then(|ledger| {
            ledger.begin_run(&ctx, directory.path(), &device)?;
            Ok(ledger)
        });
        match opened {
            Ok(ledger) => Some(ledger),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "run ledger unavailable, continuing without it");
                None
            }
        }
    });
    let mut recorder = RunRecorder::new(ctx.run_id, directory, ledger);

    let mut sampler = TelemetrySampler::new(client, session, device.clone(), config.device.rpc_retry_limit);
    let mut progress = ProgressLine::for_stdout();
    let policy = config.retry_policy();
    let interval = config.sampling_interval();

    let mut throughput = Vec::with_capacity(config.iperf3.campaigns.len());
    for entry in config.iperf3.campaigns.iter().filter(|c| c.trials > 0) {
        let args = iperf::client_args(
            &Iperf3Params {
                server: &config.iperf3.server,
                duration_secs: config.iperf3.duration_secs,
                report_interval_secs: config.iperf3.report_interval_secs,
                transport: entry.transport,
                direction: entry.direction,
            },
            &device,
        );
        let workload = CommandWorkload::new(&config.iperf3.path, args);
        let campaign = ThroughputCampaign {
            transport: entry.transport,
            direction: entry.direction,
            trials: entry.trials,
            workload: &workload,
            policy,
            interval,
        };
        throughput.push(
            run_throughput_campaign(&mut ctx, &mut sampler, &campaign, &mut recorder, &mut progress).await?,
        );
    }

    let latency = if config.ping.sample_target > 0 {
        let workload = CommandWorkload::new(
            &config.ping.path,
            ping::ping_args(&config.ping.target, config.ping.batch_size),
        );
        let mut aggregator = PingBatchAggregator::new(config.ping.batch_size, config.ping.sample_target);
        let campaign = LatencyCampaign {
            workload: &workload,
            policy,
            interval,
        };
        Some(
            run_latency_campaign(
                &mut ctx,
                &mut sampler,
                &mut aggregator,
                &campaign,
                &mut recorder,
                &mut progress,
            )
            .await?,
        )
    } else {
        None
    };

    let summary = RunSummary {
        run_id: ctx.run_id,
        directory: recorder.directory().path().to_path_buf(),
        device,
        throughput,
        latency,
        diagnostics: ctx.diagnostics.clone(),
    };

    recorder.directory().write_manifest(&RunManifest {
        run_id: ctx.run_id,
        started_at: ctx.started_at,
        finished_at: Local::now(),
        device: &summary.device,
        iperf3: &config.iperf3,
        ping: &config.ping,
        retry: &config.retry,
        sampling_interval_ms: config.device.sampling_interval_ms,
        summary: &summary,
    })?;

    if let Some(ledger) = recorder.ledger() {
        let finished = serde_json::to_string(&summary)
            .map_err(anyhow::Error::from)
            .and_then(|json| ledger.finish_run(&ctx.run_id, ctx.diagnostics.total(), &json));
        if let Err(e) = finished {
            warn!(error = %e, "failed to close run in ledger");
        }
    }

    info!(
        run_id = %summary.run_id,
        directory = %summary.directory.display(),
        discards = summary.diagnostics.total(),
        "run complete"
    );
    Ok(summary)
}
