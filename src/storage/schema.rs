//! Run ledger schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

pub const SCHEMA_VERSION: i64 = 1;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS runs (
            id TEXT PRIMARY KEY,
            directory TEXT NOT NULL,
            board TEXT NOT NULL,
            interface TEXT NOT NULL,
            raw_channel INTEGER NOT NULL,
            channel INTEGER NOT NULL,
            bandwidth_mhz INTEGER NOT NULL,
            txpower_dbm INTEGER NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            discards INTEGER NOT NULL DEFAULT 0,
            summary_json TEXT
        );

        CREATE TABLE IF NOT EXISTS trials (
            id INTEGER PRIMARY KEY,
            run_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            trial_index INTEGER NOT NULL,
            attempts INTEGER NOT NULL,
            artifact TEXT,
            kbps REAL,
            mean_rtt_ms REAL,
            latency_ms REAL,
            sample_count INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (run_id) REFERENCES runs(id)
        );

        CREATE INDEX IF NOT EXISTS idx_runs_started ON runs(started_at);
        CREATE INDEX IF NOT EXISTS idx_trials_run ON trials(run_id);",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}
