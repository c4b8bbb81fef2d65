//! External workload processes: the iperf3 load generator and ping for
//! latency.

pub mod iperf;
pub mod ping;

use std::process::Stdio;

use anyhow::Result;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Captured result of one workload invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl WorkloadOutput {
    pub fn succeeded(stdout: &str) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: &str) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

/// A process the orchestrator launches and samples telemetry around.
///
/// Dropping the future returned by `run` must stop the workload.
#[async_trait::async_trait]
pub trait Workload: Send + Sync {
    fn describe(&self) -> String;

    async fn run(&self) -> Result<WorkloadOutput>;
}

/// Runs an external program to completion, capturing its output.
#[derive(Debug, Clone)]
pub struct CommandWorkload {
    program: String,
    args: Vec<String>,
}

impl CommandWorkload {
    pub fn new(program: &str, args: Vec<String>) -> Self {
        Self {
            program: program.to_string(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait::async_trait]
impl Workload for CommandWorkload {
    fn describe(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }

    async fn run(&self) -> Result<WorkloadOutput> {
        debug!(program = %self.program, args = ?self.args, "launching workload");

        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| WorkloadError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        Ok(WorkloadOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
