//! Result persistence: the per-run artifact directory and the SQLite run
//! ledger.

pub mod artifacts;
pub mod ledger;
pub mod schema;

use anyhow::Result;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::warn;
use uuid::Uuid;

pub use artifacts::RunDirectory;
pub use ledger::Ledger;

use crate::orchestrator::{ResultSink, Trial};
use crate::telemetry::TelemetrySample;
use crate::workload::ping::PingRecord;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::builder().max_size(2).build(manager)?;

    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Writes accepted results to the run directory and, when configured, the
/// ledger. Artifact failures are fatal; ledger failures are logged.
pub struct RunRecorder {
    run_id: Uuid,
    directory: RunDirectory,
    ledger: Option<Ledger>,
}

impl RunRecorder {
    pub fn new(run_id: Uuid, directory: RunDirectory, ledger: Option<Ledger>) -> Self {
        Self {
            run_id,
            directory,
            ledger,
        }
    }

    pub fn directory(&self) -> &RunDirectory {
        &self.directory
    }

    pub fn ledger(&self) -> Option<&Ledger> {
        self.ledger.as_ref()
    }

    fn index(&self, trial: &Trial, artifact: Option<&str>) {
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.record_trial(&self.run_id, trial, artifact) {
                warn!(error = %e, kind = %trial.kind, index = trial.index, "failed to record trial in ledger");
            }
        }
    }
}

impl ResultSink for RunRecorder {
    fn throughput_trial(&mut self, stem: &str, trial: &Trial, raw_report: &str) -> Result<()> {
        self.directory.write_throughput(stem, raw_report, &trial.samples)?;
        self.index(trial, Some(stem));
        Ok(())
    }

    fn latency_batch(&mut self, trial: &Trial) -> Result<()> {
        self.index(trial, Some(artifacts::LATENCY_STEM));
        Ok(())
    }

    fn latency_campaign(&mut self, records: &[PingRecord], samples: &[TelemetrySample]) -> Result<()> {
        self.directory.write_latency(records, samples)
    }
}
