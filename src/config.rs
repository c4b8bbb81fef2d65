//! TOML configuration for halowbench.
//!
//! Layered the usual way: every section has compiled-in defaults matching the
//! stock HaLow test bench, a file named by `$HALOWBENCH_CONFIG` or found at
//! `/etc/halowbench/halowbench.toml` overrides them, and `validate` rejects
//! combinations the orchestrator cannot honor.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::device::CapabilityTables;
use crate::orchestrator::RetryPolicy;
use crate::rpc::auth::REDACTED;
use crate::rpc::Credential;
use crate::workload::iperf::{Direction, Transport};

pub const CONFIG_ENV: &str = "HALOWBENCH_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/halowbench/halowbench.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HalowBenchConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub iperf3: Iperf3Config,
    #[serde(default)]
    pub ping: PingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub capabilities: CapabilityTables,
}

impl HalowBenchConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Try, in order: `$HALOWBENCH_CONFIG`, the system path, compiled-in
    /// defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "HALOWBENCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.device.credentials.is_empty() {
            bail!("device.credentials must list at least one username/password pair");
        }
        if self.device.rpc_retry_limit == 0 {
            bail!("device.rpc_retry_limit must be at least 1");
        }
        if self.device.sampling_interval_ms == 0 {
            bail!("device.sampling_interval_ms must be greater than zero");
        }
        if self.iperf3.report_interval_secs <= 0.0 {
            bail!("iperf3.report_interval_secs must be greater than zero");
        }
        for (i, campaign) in self.iperf3.campaigns.iter().enumerate() {
            if self.iperf3.campaigns[..i]
                .iter()
                .any(|earlier| earlier.transport == campaign.transport)
            {
                bail!(
                    "iperf3.campaigns lists {} more than once; its result files would collide",
                    campaign.transport
                );
            }
        }
        if self.ping.batch_size == 0 {
            bail!("ping.batch_size must be greater than zero");
        }
        if self.ping.sample_target % self.ping.batch_size != 0 {
            bail!(
                "ping.sample_target ({}) must be a multiple of ping.batch_size ({})",
                self.ping.sample_target,
                self.ping.batch_size
            );
        }
        self.capabilities
            .validate()
            .context("invalid [capabilities] tables")?;
        Ok(())
    }

    /// Copy with every credential password masked, for display.
    pub fn redacted(&self) -> Self {
        let mut shown = self.clone();
        for credential in &mut shown.device.credentials {
            credential.password = REDACTED.to_string();
        }
        shown
    }

    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.device.sampling_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_consecutive_discards: self.retry.max_consecutive_discards,
        }
    }
}

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

/// Management API of the device under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// ubus JSON-RPC endpoint.
    pub rpc_url: String,
    /// Tried in order until one logs in.
    pub credentials: Vec<Credential>,
    /// Attempts per ubus call before the run is aborted.
    pub rpc_retry_limit: u32,
    /// Telemetry cadence while a workload runs.
    pub sampling_interval_ms: u64,
    /// Per-request HTTP timeout. Unset leaves requests unbounded.
    pub request_timeout_ms: Option<u64>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://169.254.1.1/ubus".to_string(),
            credentials: vec![
                Credential::new("root", "heltec.org"),
                Credential::new("admin", "admin"),
            ],
            rpc_retry_limit: 5,
            sampling_interval_ms: 100,
            request_timeout_ms: None,
        }
    }
}

impl DeviceConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// Iperf3
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Iperf3Config {
    /// Path (or bare command name resolved via `$PATH`) to the iperf3 binary.
    pub path: String,
    /// iperf3 server on the far side of the link.
    pub server: String,
    pub duration_secs: u64,
    /// iperf3 `-i` reporting interval.
    pub report_interval_secs: f64,
    /// Run in this order.
    pub campaigns: Vec<ThroughputCampaignConfig>,
}

impl Default for Iperf3Config {
    fn default() -> Self {
        Self {
            path: "iperf3".to_string(),
            server: "169.254.0.225".to_string(),
            duration_secs: 30,
            report_interval_secs: 0.1,
            campaigns: vec![
                ThroughputCampaignConfig {
                    transport: Transport::Udp,
                    direction: Direction::Download,
                    trials: 5,
                },
                ThroughputCampaignConfig {
                    transport: Transport::Tcp,
                    direction: Direction::Upload,
                    trials: 5,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThroughputCampaignConfig {
    pub transport: Transport,
    pub direction: Direction,
    /// Accepted trials to collect.
    #[serde(default = "default_trials")]
    pub trials: u32,
}

fn default_trials() -> u32 {
    5
}

// ---------------------------------------------------------------------------
// Ping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PingConfig {
    pub path: String,
    pub target: String,
    /// Echo requests per `ping -c` invocation.
    pub batch_size: usize,
    /// Accepted replies to collect; 0 skips the latency campaign.
    pub sample_target: usize,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            path: "ping".to_string(),
            target: "169.254.0.225".to_string(),
            batch_size: 10,
            sample_target: 110,
        }
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Workload retry bound. Absent means a failing trial is retried forever.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_consecutive_discards: Option<u32>,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Run directories are created here.
    pub root: PathBuf,
    /// SQLite run ledger. Unset disables it.
    pub ledger_path: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            ledger_path: Some(PathBuf::from("halowbench.db")),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
