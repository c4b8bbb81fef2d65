//! SQLite index of runs and their accepted trials.

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use super::{open_pool, Pool};
use crate::context::RunContext;
use crate::device::DeviceDescriptor;
use crate::orchestrator::{Trial, TrialMetric};

#[derive(Debug, Clone, Serialize)]
pub struct RunRow {
    pub id: String,
    pub directory: String,
    pub board: String,
    pub channel: u32,
    pub bandwidth_mhz: u32,
    pub txpower_dbm: i32,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub discards: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrialRow {
    pub kind: String,
    pub trial_index: u32,
    pub attempts: u32,
    pub artifact: Option<String>,
    pub kbps: Option<f64>,
    pub mean_rtt_ms: Option<f64>,
    pub latency_ms: Option<f64>,
    pub sample_count: u64,
}

pub struct Ledger {
    pool: Pool,
}

impl Ledger {
    pub fn open(path: &Path) -> Result<Self> {
        let pool = open_pool(&path.to_string_lossy())
            .with_context(|| format!("failed to open run ledger {}", path.display()))?;
        Ok(Self { pool })
    }

    pub fn begin_run(&self, ctx: &RunContext, directory: &Path, device: &DeviceDescriptor) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO runs (id, directory, board, interface, raw_channel, channel,
                               bandwidth_mhz, txpower_dbm, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                ctx.run_id.to_string(),
                directory.to_string_lossy().into_owned(),
                device.board,
                device.interface,
                device.raw_channel,
                device.channel,
                device.bandwidth.mhz(),
                device.txpower_dbm,
                ctx.started_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn record_trial(&self, run_id: &Uuid, trial: &Trial, artifact: Option<&str>) -> Result<()> {
        let (kbps, mean_rtt_ms, latency_ms) = match trial.metric {
            TrialMetric::Throughput(m) => (Some(m.kbps), m.mean_rtt_ms, None),
            TrialMetric::Latency { batch_mean_ms } => (None, None, Some(batch_mean_ms)),
        };

        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO trials (run_id, kind, trial_index, attempts, artifact,
                                 kbps, mean_rtt_ms, latency_ms, sample_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run_id.to_string(),
                trial.kind.to_string(),
                trial.index,
                trial.attempts,
                artifact,
                kbps,
                mean_rtt_ms,
                latency_ms,
                trial.samples.len() as i64,
            ],
        )?;
        Ok(())
    }

    pub fn finish_run(&self, run_id: &Uuid, discards: u64, summary_json: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE runs SET finished_at = ?2, discards = ?3, summary_json = ?4 WHERE id = ?1",
            params![
                run_id.to_string(),
                chrono::Local::now().to_rfc3339(),
                discards as i64,
                summary_json
            ],
        )?;
        Ok(())
    }

    /// Most recent runs first.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunRow>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, directory, board, channel, bandwidth_mhz, txpower_dbm,
                    started_at, finished_at, discards
             FROM runs ORDER BY started_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(RunRow {
                id: row.get(0)?,
                directory: row.get(1)?,
                board: row.get(2)?,
                channel: row.get(3)?,
                bandwidth_mhz: row.get(4)?,
                txpower_dbm: row.get(5)?,
                started_at: row.get(6)?,
                finished_at: row.get(7)?,
                discards: row.get::<_, i64>(8)? as u64,
            })
        })?;

        let mut runs = Vec::new();
        for r in rows {
            runs.push(r?);
        }
        Ok(runs)
    }

    pub fn trials(&self, run_id: &Uuid) -> Result<Vec<TrialRow>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT kind, trial_index, attempts, artifact, kbps, mean_rtt_ms, latency_ms, sample_count
             FROM trials WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([run_id.to_string()], |row| {
            Ok(TrialRow {
                kind: row.get(0)?,
                trial_index: row.get(1)?,
                attempts: row.get(2)?,
                artifact: row.get(3)?,
                kbps: row.get(4)?,
                mean_rtt_ms: row.get(5)?,
                latency_ms: row.get(6)?,
                sample_count: row.get::<_, i64>(7)? as u64,
            })
        })?;

        let mut trials = Vec::new();
        for r in rows {
            trials.push(r?);
        }
        Ok(trials)
    }

    pub fn summary_json(&self, run_id: &Uuid) -> Result<Option<String>> {
        let conn = self.pool.get()?;
        let summary = conn
            .query_row(
                "SELECT summary_json FROM runs WHERE id = ?1",
                [run_id.to_string()],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(summary.flatten())
    }
}
